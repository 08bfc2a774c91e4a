//! Process-wide cancellation signal.
//!
//! One `Shutdown` is shared by the Ctrl-C handler, the scheduler thread and
//! the HTTP server. Triggering it wakes blocking waiters (the scheduler sleeps
//! on a channel) and async waiters (the server watches a flag) alike.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use tokio::sync::watch;

struct Inner {
    /// Dropped on trigger, which disconnects `receiver`.
    sender: Mutex<Option<Sender<()>>>,
    receiver: Receiver<()>,
    flag: watch::Sender<bool>,
}

#[derive(Clone)]
pub struct Shutdown {
    inner: Arc<Inner>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (sender, receiver) = bounded(0);
        let (flag, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                sender: Mutex::new(Some(sender)),
                receiver,
                flag,
            }),
        }
    }

    /// Request shutdown. Idempotent.
    pub fn trigger(&self) {
        let sender = match self.inner.sender.lock() {
            Ok(mut sender) => sender.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(sender);
        self.inner.flag.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.inner.flag.borrow()
    }

    /// Block for up to `timeout`. Returns true if shutdown was requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        match self.inner.receiver.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => false,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
        }
    }

    /// Resolve once shutdown has been requested.
    pub async fn wait(&self) {
        let mut flag = self.inner.flag.subscribe();
        let _ = flag.wait_for(|triggered| *triggered).await;
    }
}
