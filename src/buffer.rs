//! The shared send buffer and the entries that travel through an
//! [`crate::queue::OutputQueue`].

use std::net::SocketAddr;

use bytes::Bytes;

/// One entry waiting to be written: a buffer and, for UDP sends that target
/// something other than the handler's default destination, the address to
/// send it to.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub buffer: Bytes,
    pub endpoint: Option<SocketAddr>,
}

impl QueueEntry {
    pub fn new(buffer: impl Into<Bytes>, endpoint: Option<SocketAddr>) -> Self {
        Self {
            buffer: buffer.into(),
            endpoint,
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
