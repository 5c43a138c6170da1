//! Both halves of the boundary between host and guest.
//!
//! The only primitive assumed is an ordered, fire-and-forget broadcast: a
//! [`Port`] posts frames to the other side and an [`Inbox`] drains frames
//! from it. Nothing is shared between the two contexts except the frames
//! themselves. Two link flavours exist: an in-process pair backed by
//! `std::sync::mpsc` and a cross-process pair backed by `ipc-channel`
//! (see [`super::process`] for the bootstrap).

use std::fmt;
use std::sync::mpsc;
use std::time::Duration;

use ipc_channel::ipc::{self, IpcReceiver, IpcSender, TryRecvError};
use log::{debug, trace, warn};

use crate::protocol::{Envelope, Frame, Message};

pub trait FrameSink: Send {
    fn post(&self, frame: Frame) -> Result<(), String>;

    fn clone_sink(&self) -> Box<dyn FrameSink>;
}

/// The other side hung up; no further frames will arrive
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Disconnected;

impl fmt::Display for Disconnected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("peer disconnected")
    }
}

pub trait FrameSource: Send {
    fn try_next(&self) -> Result<Option<Frame>, Disconnected>;

    fn next_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Option<Frame>, Disconnected>;
}

impl FrameSink for mpsc::Sender<Frame> {
    fn post(&self, frame: Frame) -> Result<(), String> {
        self.send(frame).map_err(|err| err.to_string())
    }

    fn clone_sink(&self) -> Box<dyn FrameSink> {
        Box::new(self.clone())
    }
}

impl FrameSource for mpsc::Receiver<Frame> {
    fn try_next(&self) -> Result<Option<Frame>, Disconnected> {
        match self.try_recv() {
            Ok(frame) => Ok(Some(frame)),
            Err(mpsc::TryRecvError::Empty) => Ok(None),
            Err(mpsc::TryRecvError::Disconnected) => Err(Disconnected),
        }
    }

    fn next_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Option<Frame>, Disconnected> {
        match self.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(mpsc::RecvTimeoutError::Timeout) => Ok(None),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(Disconnected),
        }
    }
}

impl FrameSink for IpcSender<Frame> {
    fn post(&self, frame: Frame) -> Result<(), String> {
        self.send(frame).map_err(|err| err.to_string())
    }

    fn clone_sink(&self) -> Box<dyn FrameSink> {
        Box::new(self.clone())
    }
}

impl FrameSource for IpcReceiver<Frame> {
    fn try_next(&self) -> Result<Option<Frame>, Disconnected> {
        match self.try_recv() {
            Ok(frame) => Ok(Some(frame)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::IpcError(err)) => {
                debug!("ipc receive failed: {:?}", err);
                Err(Disconnected)
            }
        }
    }

    fn next_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Option<Frame>, Disconnected> {
        match self.try_recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::IpcError(err)) => {
                debug!("ipc receive failed: {:?}", err);
                Err(Disconnected)
            }
        }
    }
}

/// Outbound half. Sending never fails from the caller's point of view: a
/// torn-down or not-yet-listening peer is logged and the frame is dropped.
pub struct Port {
    label: &'static str,
    sink: Box<dyn FrameSink>,
    verbose: bool,
}

impl Port {
    pub fn new(label: &'static str, sink: impl FrameSink + 'static) -> Self {
        Self {
            label,
            sink: Box::new(sink),
            verbose: false,
        }
    }

    /// Log every outbound envelope at `debug` instead of `trace`
    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    /// Returns whether the frame was handed to the underlying channel, which
    /// says nothing about whether the peer will ever read it.
    pub fn send<M: Message>(&self, message: &M) -> bool {
        match message.to_envelope() {
            Ok(envelope) => self.send_envelope(&envelope),
            Err(err) => {
                warn!("[{}] {}", self.label, err);
                false
            }
        }
    }

    pub fn send_envelope(&self, envelope: &Envelope) -> bool {
        let frame = match envelope.to_frame() {
            Ok(frame) => frame,
            Err(err) => {
                warn!("[{}] {}", self.label, err);
                return false;
            }
        };

        if self.verbose {
            debug!("[{}] -> {}", self.label, frame);
        } else {
            trace!("[{}] -> {}", self.label, frame);
        }

        match self.sink.post(frame) {
            Ok(()) => true,
            Err(err) => {
                debug!(
                    "[{}] dropped `{}`; peer unavailable: {}",
                    self.label, envelope.kind, err
                );
                false
            }
        }
    }
}

impl Clone for Port {
    fn clone(&self) -> Self {
        Self {
            label: self.label,
            sink: self.sink.clone_sink(),
            verbose: self.verbose,
        }
    }
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port").field("label", &self.label).finish()
    }
}

/// Inbound half
pub struct Inbox {
    label: &'static str,
    source: Box<dyn FrameSource>,
    disconnected: bool,
}

impl Inbox {
    pub fn new(label: &'static str, source: impl FrameSource + 'static) -> Self {
        Self {
            label,
            source: Box::new(source),
            disconnected: false,
        }
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    /// Everything currently queued, in arrival order
    pub fn drain(&mut self) -> Vec<Frame> {
        let mut frames = vec![];

        while !self.disconnected {
            match self.source.try_next() {
                Ok(Some(frame)) => frames.push(frame),
                Ok(None) => break,
                Err(Disconnected) => self.mark_disconnected(),
            }
        }

        frames
    }

    /// Waits up to `timeout` for one frame
    pub fn next_timeout(&mut self, timeout: Duration) -> Option<Frame> {
        if self.disconnected {
            return None;
        }

        match self.source.next_timeout(timeout) {
            Ok(frame) => frame,
            Err(Disconnected) => {
                self.mark_disconnected();
                None
            }
        }
    }

    fn mark_disconnected(&mut self) {
        if !self.disconnected {
            debug!("[{}] peer disconnected", self.label);
        }
        self.disconnected = true;
    }
}

/// One side's view of a connection
pub struct Link {
    pub port: Port,
    pub inbox: Inbox,
}

/// In-process pair: `(guest, host)`
pub fn local_pair() -> (Link, Link) {
    let (to_guest, from_host) = mpsc::channel::<Frame>();
    let (to_host, from_guest) = mpsc::channel::<Frame>();

    let guest = Link {
        port: Port::new("guest", to_host),
        inbox: Inbox::new("guest", from_host),
    };

    let host = Link {
        port: Port::new("host", to_guest),
        inbox: Inbox::new("host", from_guest),
    };

    (guest, host)
}

/// Same-process pair over OS IPC channels: `(guest, host)`
pub fn ipc_pair() -> Result<(Link, Link), String> {
    let (to_guest, from_host) = ipc::channel::<Frame>()
        .map_err(|err| format!("failed to create IPC channel: {}", err))?;
    let (to_host, from_guest) = ipc::channel::<Frame>()
        .map_err(|err| format!("failed to create IPC channel: {}", err))?;

    let guest = Link {
        port: Port::new("guest", to_host),
        inbox: Inbox::new("guest", from_host),
    };

    let host = Link {
        port: Port::new("host", to_guest),
        inbox: Inbox::new("host", from_guest),
    };

    Ok((guest, host))
}
