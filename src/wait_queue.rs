//! Closeable multi-producer/multi-consumer queue.
//!
//! Used internally to carry error and state-change notifications from many
//! producer tasks (child I/O handlers) to one consumer (the owning entity's
//! task, or an application-level drain task). Transport is
//! [`tokio::sync::mpsc`]; an explicit `closed` flag (a
//! [`crossbeam::atomic::AtomicCell`], checked before every send) gives
//! `close()` the same "no panics, ever" guarantee independent of whether any
//! sender or receiver handle happens to still be alive.

use crossbeam::atomic::AtomicCell;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Error returned by [`WaitQueueSender::send`] once the queue has been closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("wait queue is closed")]
pub struct Closed;

struct Shared {
    closed: AtomicCell<bool>,
}

/// The sending half of a [`WaitQueue`]. Cheap to clone; every clone shares
/// the same underlying channel and closed flag.
pub struct WaitQueueSender<T> {
    tx: mpsc::UnboundedSender<T>,
    shared: Arc<Shared>,
}

impl<T> Clone for WaitQueueSender<T> {
    fn clone(&self) -> Self {
        WaitQueueSender {
            tx: self.tx.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> WaitQueueSender<T> {
    /// Enqueue `value`. Fails without panicking once the queue is closed or
    /// every receiver has been dropped.
    pub fn send(&self, value: T) -> Result<(), Closed> {
        if self.shared.closed.load() {
            return Err(Closed);
        }
        self.tx.send(value).map_err(|_| Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load() || self.tx.is_closed()
    }
}

/// The receiving half of a [`WaitQueue`].
pub struct WaitQueueReceiver<T> {
    rx: mpsc::UnboundedReceiver<T>,
    shared: Arc<Shared>,
}

impl<T> WaitQueueReceiver<T> {
    /// Await the next value, or `None` once the queue is closed and drained.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Close the queue: all pending and future `send` calls fail, and any
    /// in-flight or future `recv` eventually returns `None` once the
    /// already-queued values are drained.
    pub fn close(&mut self) {
        self.shared.closed.store(true);
        self.rx.close();
    }
}

/// A closeable, unbounded multi-producer/multi-consumer FIFO.
pub struct WaitQueue;

impl WaitQueue {
    /// Create a new queue, returning its sender and receiver halves.
    pub fn channel<T>() -> (WaitQueueSender<T>, WaitQueueReceiver<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            closed: AtomicCell::new(false),
        });
        (
            WaitQueueSender {
                tx,
                shared: Arc::clone(&shared),
            },
            WaitQueueReceiver { rx, shared },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_then_recv() {
        let (tx, mut rx) = WaitQueue::channel();
        tx.send(1).unwrap();
        tx.send(2).unwrap();
        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
    }

    #[tokio::test]
    async fn close_unblocks_recv_and_rejects_sends() {
        let (tx, mut rx) = WaitQueue::channel();
        tx.send(1).unwrap();
        rx.close();
        assert!(tx.send(2).is_err());
        // Already-queued values still drain.
        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn multiple_senders_share_state() {
        let (tx1, mut rx) = WaitQueue::channel();
        let tx2 = tx1.clone();
        tx1.send("a").unwrap();
        tx2.send("b").unwrap();
        assert_eq!(rx.recv().await, Some("a"));
        assert_eq!(rx.recv().await, Some("b"));
    }

    #[tokio::test]
    async fn dropping_receiver_closes_sender() {
        let (tx, rx) = WaitQueue::channel::<i32>();
        drop(rx);
        assert!(tx.is_closed());
        assert!(tx.send(1).is_err());
    }
}
