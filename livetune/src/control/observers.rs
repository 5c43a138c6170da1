use std::panic::{self, AssertUnwindSafe};

use log::{error, trace};

use crate::framework::util::panic_message;

/// Handle returned by every `on_*` registration. Pass it back to the matching
/// `off` method to release the callback; nothing is released implicitly.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct Subscription(u64);

type Callback<T> = Box<dyn FnMut(&T) + Send>;

/// Ordered callback list. A panicking callback is isolated from its siblings
/// and from the caller; the panic message is kept so it can be reported to
/// the host.
pub struct Observers<T: ?Sized> {
    name: &'static str,
    next_id: u64,
    callbacks: Vec<(u64, Callback<T>)>,
    faults: Vec<String>,
}

impl<T: ?Sized> Observers<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            next_id: 0,
            callbacks: vec![],
            faults: vec![],
        }
    }

    pub fn subscribe<F>(&mut self, callback: F) -> Subscription
    where
        F: FnMut(&T) + Send + 'static,
    {
        self.next_id += 1;
        self.callbacks.push((self.next_id, Box::new(callback)));
        trace!("{} listener added ({} total)", self.name, self.len());
        Subscription(self.next_id)
    }

    /// Returns false when the subscription was already released
    pub fn unsubscribe(&mut self, subscription: Subscription) -> bool {
        let before = self.callbacks.len();
        self.callbacks.retain(|(id, _)| *id != subscription.0);
        let removed = self.callbacks.len() != before;
        if removed {
            trace!("{} listener removed ({} left)", self.name, self.len());
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    pub fn notify(&mut self, value: &T) {
        for (id, callback) in self.callbacks.iter_mut() {
            let result =
                panic::catch_unwind(AssertUnwindSafe(|| callback(value)));

            if let Err(payload) = result {
                let message = format!(
                    "{} callback #{} panicked: {}",
                    self.name,
                    id,
                    panic_message(payload.as_ref())
                );
                error!("{}", message);
                self.faults.push(message);
            }
        }
    }

    /// Drains the panic messages collected since the last call
    pub fn take_faults(&mut self) -> Vec<String> {
        std::mem::take(&mut self.faults)
    }
}
