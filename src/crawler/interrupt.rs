use std::future;

use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

/// Create a connected interrupt handle/signal pair
pub fn interrupt_channel() -> (InterruptHandle, InterruptSignal) {
    let (tx, rx) = oneshot::channel();
    (InterruptHandle { tx }, InterruptSignal { rx: Some(rx) })
}

/// Sending side of a single-slot interrupt.
///
/// Delivering consumes the handle, so an interrupt can be sent at most once.
#[derive(Debug)]
pub struct InterruptHandle {
    tx: oneshot::Sender<()>,
}

impl InterruptHandle {
    /// Deliver the interrupt. Returns `false` if the receiving side is gone.
    pub fn send(self) -> bool {
        self.tx.send(()).is_ok()
    }
}

/// Receiving side of a single-slot interrupt
#[derive(Debug)]
pub struct InterruptSignal {
    rx: Option<oneshot::Receiver<()>>,
}

impl InterruptSignal {
    /// Non-blocking check. Returns `true` once, when an interrupt is pending.
    pub fn try_take(&mut self) -> bool {
        let Some(rx) = self.rx.as_mut() else {
            return false;
        };

        match rx.try_recv() {
            Ok(()) => {
                self.rx = None;
                true
            }
            Err(TryRecvError::Empty) => false,
            Err(TryRecvError::Closed) => {
                self.rx = None;
                false
            }
        }
    }

    /// Resolve when an interrupt is delivered.
    ///
    /// Never resolves if the handle is dropped without sending, or if the
    /// interrupt was already taken. Cancel safe.
    pub async fn received(&mut self) {
        if let Some(rx) = self.rx.as_mut() {
            let delivered = rx.await.is_ok();
            self.rx = None;
            if delivered {
                return;
            }
        }
        future::pending::<()>().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[test]
    fn test_try_take_once() {
        let (handle, mut signal) = interrupt_channel();
        assert!(!signal.try_take());

        assert!(handle.send());
        assert!(signal.try_take());
        assert!(!signal.try_take());
    }

    #[test]
    fn test_dropped_handle_is_not_an_interrupt() {
        let (handle, mut signal) = interrupt_channel();
        drop(handle);
        assert!(!signal.try_take());
    }

    #[test]
    fn test_send_to_dropped_signal() {
        let (handle, signal) = interrupt_channel();
        drop(signal);
        assert!(!handle.send());
    }

    #[tokio::test]
    async fn test_received_resolves_on_send() {
        let (handle, mut signal) = interrupt_channel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.send();
        });

        assert!(timeout(Duration::from_secs(1), signal.received()).await.is_ok());
        // Already taken: pends forever
        assert!(timeout(Duration::from_millis(50), signal.received()).await.is_err());
    }

    #[tokio::test]
    async fn test_received_pends_when_handle_dropped() {
        let (handle, mut signal) = interrupt_channel();
        drop(handle);
        assert!(timeout(Duration::from_millis(50), signal.received()).await.is_err());
    }
}
