//! Runs a guest in its own process and wires up an IPC link to it.
//!
//! # Bootstrap
//! ```md
//! host: IpcOneShotServer::new() -> spawn guest <args..> <server_name>
//! guest: connect_to_host(server_name) -> sends (to_guest, from_guest)
//! host: accept() -> Link { port: to_guest, inbox: from_guest }
//! ```
//! Frames from the child are pumped into an in-process channel by a
//! dedicated thread so the host can poll without blocking.

use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use ipc_channel::ipc::{self, IpcOneShotServer, IpcReceiver, IpcSender};
use log::{debug, info};

use super::transport::{Inbox, Link, Port};
use crate::protocol::Frame;

type Bootstrap = (IpcSender<Frame>, IpcReceiver<Frame>);

pub struct HostBridge {
    child: Child,
    connected: Arc<AtomicBool>,
    inbound_handle: Option<JoinHandle<()>>,
}

impl HostBridge {
    /// Spawns `command` with the bootstrap server name appended as its last
    /// argument and blocks until the guest connects.
    pub fn launch(mut command: Command) -> Result<(Self, Link), String> {
        let (server, server_name) = IpcOneShotServer::<Bootstrap>::new()
            .map_err(|err| {
                format!("failed to create IPC bootstrap: {}", err)
            })?;

        command
            .arg(&server_name)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|err| format!("failed to launch guest process: {}", err))?;

        pipe_child_logs(&mut child);

        let (_bootstrap_rx, (to_guest, from_guest)): (
            IpcReceiver<Bootstrap>,
            Bootstrap,
        ) = server.accept().map_err(|err| {
            format!("failed to accept guest bootstrap: {}", err)
        })?;

        info!("guest process connected (pid {})", child.id());

        let connected = Arc::new(AtomicBool::new(true));
        let (inbound_tx, inbound_rx) = mpsc::channel::<Frame>();

        let inbound_handle = {
            let connected = connected.clone();

            thread::spawn(move || {
                while let Ok(frame) = from_guest.recv() {
                    if inbound_tx.send(frame).is_err() {
                        break;
                    }
                }
                connected.store(false, Ordering::Release);
                debug!("guest inbound pump finished");
            })
        };

        let link = Link {
            port: Port::new("host", to_guest),
            inbox: Inbox::new("host", inbound_rx),
        };

        Ok((
            Self {
                child,
                connected,
                inbound_handle: Some(inbound_handle),
            },
            link,
        ))
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }
}

impl Drop for HostBridge {
    fn drop(&mut self) {
        debug!("shutting down guest bridge");

        let _ = self.child.kill();
        let _ = self.child.wait();

        if let Some(handle) = self.inbound_handle.take() {
            let _ = handle.join();
        }
    }
}

/// Guest half of the bootstrap
pub fn connect_to_host(server_name: &str) -> Result<Link, String> {
    let (to_guest, from_host) = ipc::channel::<Frame>()
        .map_err(|err| format!("failed to create IPC channel: {}", err))?;
    let (to_host, from_guest) = ipc::channel::<Frame>()
        .map_err(|err| format!("failed to create IPC channel: {}", err))?;

    let bootstrap = IpcSender::<Bootstrap>::connect(server_name.to_string())
        .map_err(|err| {
            format!("failed to connect to host '{}': {}", server_name, err)
        })?;

    bootstrap
        .send((to_guest, from_guest))
        .map_err(|err| format!("failed to send bootstrap to host: {}", err))?;

    Ok(Link {
        port: Port::new("guest", to_host),
        inbox: Inbox::new("guest", from_host),
    })
}

fn pipe_child_logs(child: &mut Child) {
    if let Some(stdout) = child.stdout.take() {
        thread::spawn(move || {
            let reader = BufReader::new(stdout);
            for line in reader.lines().map_while(Result::ok) {
                println!("[guest] {}", line);
            }
        });
    }

    if let Some(stderr) = child.stderr.take() {
        thread::spawn(move || {
            let reader = BufReader::new(stderr);
            for line in reader.lines().map_while(Result::ok) {
                eprintln!("[guest] {}", line);
            }
        });
    }
}
