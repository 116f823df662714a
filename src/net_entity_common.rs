//! Shared start/stop/callback plumbing for acceptors, connectors, and UDP
//! entities.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::NetError;
use crate::handles::{IoInterface, NetEntity};

/// The subset of an entity's state readable from outside its owning task
/// (via [`crate::handles::NetEntity::is_started`]) without a channel round
/// trip. Cloned into the engine's entity arena slot.
#[derive(Default)]
pub(crate) struct EntityShared {
    started: AtomicBool,
}

impl EntityShared {
    pub(crate) fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }
}

/// Identifies who an error or state change is about, since the callback may
/// fire for a child I/O handler rather than the entity the application
/// originally started.
#[derive(Clone)]
pub enum ErrorSource {
    Io(IoInterface),
    Entity(NetEntity),
}

pub type StateChangeCallback = Arc<dyn Fn(IoInterface, usize, bool) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(ErrorSource, NetError) + Send + Sync>;

/// Enforces "at most one start→stop cycle; start after stop fails" and
/// routes callbacks so they are always invoked from the task that owns the
/// entity's state.
pub struct NetEntityCommon {
    shared: Arc<EntityShared>,
    stopped: bool,
    state_change_cb: Option<StateChangeCallback>,
    error_cb: Option<ErrorCallback>,
}

impl NetEntityCommon {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(EntityShared::default()),
            stopped: false,
            state_change_cb: None,
            error_cb: None,
        }
    }

    pub(crate) fn shared(&self) -> Arc<EntityShared> {
        Arc::clone(&self.shared)
    }

    pub fn set_callbacks(&mut self, state_change_cb: StateChangeCallback, error_cb: ErrorCallback) {
        self.state_change_cb = Some(state_change_cb);
        self.error_cb = Some(error_cb);
    }

    pub fn is_started(&self) -> bool {
        self.shared.is_started()
    }

    pub fn try_start(&mut self) -> Result<(), NetError> {
        if self.stopped {
            return Err(NetError::AlreadyStopped);
        }
        if self.shared.started.swap(true, Ordering::AcqRel) {
            return Err(NetError::AlreadyStarted);
        }
        Ok(())
    }

    /// Marks the entity stopped. Idempotent calls after the first return
    /// `Err(NetError::AlreadyStopped)`.
    pub fn try_stop(&mut self) -> Result<(), NetError> {
        if self.stopped {
            return Err(NetError::AlreadyStopped);
        }
        self.stopped = true;
        self.shared.started.store(false, Ordering::Release);
        Ok(())
    }

    pub fn fire_state_change(&self, io: IoInterface, active_count: usize, starting: bool) {
        if let Some(cb) = &self.state_change_cb {
            cb(io, active_count, starting);
        }
    }

    pub fn fire_error(&self, source: ErrorSource, error: NetError) {
        if let Some(cb) = &self.error_cb {
            cb(source, error);
        }
    }
}

impl Default for NetEntityCommon {
    fn default() -> Self {
        Self::new()
    }
}
