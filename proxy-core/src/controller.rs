use bytes::Bytes;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

/// Result of one connect handshake as seen by the waiting client task
#[derive(Debug)]
pub enum ConnectOutcome {
    /// Agent opened the upstream connection; data for `id` arrives on `rx`
    Accepted { id: u32, rx: mpsc::Receiver<Bytes> },
    Refused,
}

/// Pairs `ConnectResponse`s with the client waiting on them.
///
/// Responses carry the agent's stream id rather than the request id, so at
/// most one handshake per agent may be outstanding. Callers hold the guard
/// from [`ConnectController::serialize`] for the whole request/response
/// exchange.
#[derive(Debug, Clone, Default)]
pub struct ConnectController {
    handshake: Arc<AsyncMutex<()>>,
    pending: Arc<Mutex<Option<oneshot::Sender<ConnectOutcome>>>>,
}

impl ConnectController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive use of the handshake slot
    pub async fn serialize(&self) -> OwnedMutexGuard<()> {
        self.handshake.clone().lock_owned().await
    }

    /// Arm the slot and return the receiver the response will be delivered on
    pub fn register(&self) -> oneshot::Receiver<ConnectOutcome> {
        let (tx, rx) = oneshot::channel();
        if let Ok(mut slot) = self.pending.lock() {
            *slot = Some(tx);
        }
        rx
    }

    /// Hand an outcome to the waiting client.
    ///
    /// Gives the outcome back when nobody is waiting (late or unsolicited
    /// response) so the caller can tear down what it set up for it.
    pub fn resolve(&self, outcome: ConnectOutcome) -> Result<(), ConnectOutcome> {
        let waiter = match self.pending.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        match waiter {
            Some(tx) => tx.send(outcome),
            None => {
                debug!("ConnectResponse with no pending request");
                Err(outcome)
            }
        }
    }

    /// Disarm the slot, dropping any waiter
    pub fn cancel(&self) {
        if let Ok(mut slot) = self.pending.lock() {
            slot.take();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_delivers_to_waiter() {
        let controller = ConnectController::new();
        let rx = controller.register();
        let (_tx, data_rx) = mpsc::channel(1);
        assert!(controller
            .resolve(ConnectOutcome::Accepted { id: 42, rx: data_rx })
            .is_ok());
        match rx.await.unwrap() {
            ConnectOutcome::Accepted { id, .. } => assert_eq!(id, 42),
            ConnectOutcome::Refused => panic!("expected accepted"),
        }
    }

    #[test]
    fn test_unsolicited_response_is_returned() {
        let controller = ConnectController::new();
        assert!(matches!(
            controller.resolve(ConnectOutcome::Refused),
            Err(ConnectOutcome::Refused)
        ));
    }

    #[test]
    fn test_cancelled_slot_rejects_late_response() {
        let controller = ConnectController::new();
        let _rx = controller.register();
        controller.cancel();
        assert!(controller.resolve(ConnectOutcome::Refused).is_err());
    }

    #[tokio::test]
    async fn test_dropped_waiter_returns_outcome() {
        let controller = ConnectController::new();
        drop(controller.register());
        assert!(controller.resolve(ConnectOutcome::Refused).is_err());
    }

    #[tokio::test]
    async fn test_handshakes_are_serialized() {
        let controller = ConnectController::new();
        let guard = controller.serialize().await;
        let second = controller.clone();
        let waiting = tokio::spawn(async move {
            let _guard = second.serialize().await;
        });
        tokio::task::yield_now().await;
        assert!(!waiting.is_finished());
        drop(guard);
        waiting.await.unwrap();
    }
}
