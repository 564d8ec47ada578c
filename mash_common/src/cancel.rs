//! Caller-supplied cancellation for network-bounded operations.
//!
//! Sessions race every framed read and write against a [`CancellationToken`],
//! so a caller can abort a handshake that is stuck on an unresponsive peer.

use std::sync::Arc;

use tokio::sync::watch;

/// A cloneable cancellation signal.
///
/// All clones observe a single shared flag: once any clone calls
/// [`CancellationToken::cancel`], every pending and future
/// [`CancellationToken::cancelled`] call resolves. Cancellation is permanent.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);

        CancellationToken {
            sender: Arc::new(sender),
            receiver,
        }
    }

    /// Signals cancellation to all clones of this token.
    pub fn cancel(&self) {
        // Every token holds a receiver, so the send cannot fail while
        // any clone is alive.
        let _ = self.sender.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once the token is cancelled. Never resolves otherwise.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();

        loop {
            if *receiver.borrow_and_update() {
                return;
            }
            if receiver.changed().await.is_err() {
                // All senders dropped without cancelling; the token can no
                // longer fire.
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}
