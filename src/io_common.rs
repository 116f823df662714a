//! Shared per-connection state used by both [`crate::tcp_io::TcpIoHandler`]
//! and [`crate::udp_io::UdpEntity`].

use std::cell::Cell;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::arena::ArenaIndex;
use crate::buffer::QueueEntry;
use crate::error::NetError;
use crate::queue::{OutputQueue, QueueCounters, QueueStats};
use crate::wait_queue::WaitQueueSender;

/// Posted to the owning entity's notifier channel when a handler tears
/// itself down, either cleanly (`error: None`, e.g. after `stop_io`) or
/// because of an I/O failure.
#[derive(Debug)]
pub struct TeardownNotice {
    pub handler_index: ArenaIndex,
    pub error: Option<NetError>,
}

/// Called once per complete incoming message (or, for UDP, once per
/// datagram). Returns `false` to request that the handler tear itself down,
/// the same convention the read loop uses for a closed or errored socket.
pub type MessageHandler = Box<dyn FnMut(&[u8], SocketAddr) -> bool + Send>;

/// The subset of a handler's state that needs to be readable from outside
/// the owning task (e.g. from [`crate::handles::IoInterface::is_io_started`]
/// or [`crate::handles::IoOutput::stats`]) without a channel round trip.
/// Cloned into the engine's I/O arena slot alongside the handler's command
/// sender.
pub(crate) struct IoShared {
    started: AtomicBool,
    counters: Arc<QueueCounters>,
}

impl IoShared {
    pub(crate) fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub(crate) fn stats(&self) -> QueueStats {
        self.counters.snapshot()
    }
}

/// State shared between the read loop, the write loop, and handle methods
/// for a single I/O handler. Every field here is either owning-task-only
/// (`write_in_progress`, the queue itself) or safe for concurrent access
/// (`started`, the queue's counters), via [`IoShared`].
pub struct IoHandlerCommon {
    shared: Arc<IoShared>,
    write_in_progress: Cell<bool>,
    pub queue: OutputQueue,
    pub remote_endpoint: SocketAddr,
    notifier: WaitQueueSender<TeardownNotice>,
}

impl IoHandlerCommon {
    pub fn new(remote_endpoint: SocketAddr, notifier: WaitQueueSender<TeardownNotice>) -> Self {
        let counters = QueueCounters::new();
        let shared = Arc::new(IoShared {
            started: AtomicBool::new(false),
            counters: Arc::clone(&counters),
        });
        Self {
            shared,
            write_in_progress: Cell::new(false),
            queue: OutputQueue::with_counters(counters),
            remote_endpoint,
            notifier,
        }
    }

    /// Clone of the state external handles read without messaging the
    /// owning task. Registered into the engine's I/O arena alongside this
    /// handler's command sender.
    pub(crate) fn shared(&self) -> Arc<IoShared> {
        Arc::clone(&self.shared)
    }

    /// If already started, returns `false`. Otherwise marks the handler
    /// started and returns `true`.
    pub fn start_io_setup(&self) -> bool {
        self.shared
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_started(&self) -> bool {
        self.shared.is_started()
    }

    /// Owning-task-only. If the handler is not started, `entry` is dropped
    /// and this returns `None`. If a write is already in progress, `entry`
    /// is queued and this returns `None` (the caller does not initiate a
    /// write). Otherwise marks a write in progress and returns `entry` back
    /// to the caller, who should initiate the write with it.
    pub fn start_write_setup(&mut self, entry: QueueEntry) -> Option<QueueEntry> {
        if !self.is_started() {
            return None;
        }
        if self.write_in_progress.get() {
            self.queue.push(entry);
            return None;
        }
        self.write_in_progress.set(true);
        Some(entry)
    }

    /// Owning-task-only. Pops the next queued entry, if the handler is
    /// still started. `write_in_progress` becomes `true` iff an entry is
    /// returned.
    pub fn next_write(&mut self) -> Option<QueueEntry> {
        if !self.is_started() {
            self.write_in_progress.set(false);
            return None;
        }
        let next = self.queue.pop();
        self.write_in_progress.set(next.is_some());
        next
    }

    /// Owning-task-only.
    pub fn stop(&mut self) {
        self.shared.started.store(false, Ordering::Release);
        self.write_in_progress.set(false);
    }

    /// Tell the parent entity this handler has torn down. `self_index` is
    /// the handler's own slot in the engine's I/O arena, known to the
    /// owning task but not stored redundantly here.
    pub fn notify_teardown(&self, self_index: ArenaIndex, error: Option<NetError>) {
        let _ = self.notifier.send(TeardownNotice {
            handler_index: self_index,
            error,
        });
    }
}
