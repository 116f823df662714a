//! Error taxonomy for the networking core.
//!
//! Two enums cover everything the core can report: [`NetError`] for events
//! delivered to an application's error callback, and [`HandleError`] for
//! operations attempted on a handle whose referent no longer exists.

use std::fmt;
use std::io;

use thiserror::Error;

/// Errors surfaced to an application's error callback.
///
/// A `NetError` is always associated with one component (an I/O handler, an
/// acceptor, a connector, or a UDP entity) and is delivered at most once per
/// occurrence; sentinel variants such as [`NetError::AcceptorStopped`] are
/// the last event a component ever produces.
#[derive(Debug, Error)]
pub enum NetError {
    /// Propagated from the underlying socket or resolver.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// `start_io` (or `NetEntity::start`) called on a component that is
    /// already started.
    #[error("component already started")]
    AlreadyStarted,

    /// `stop_io` (or `NetEntity::stop`) called on a component that is
    /// already stopped.
    #[error("component already stopped")]
    AlreadyStopped,

    /// The application message handler returned `false`, requesting that
    /// the I/O handler be torn down.
    #[error("message handler terminated the connection")]
    HandlerTerminated,

    /// Final event delivered by a `TcpAcceptor` after `stop()` completes.
    #[error("acceptor stopped")]
    AcceptorStopped,

    /// Final event delivered by a `TcpConnector` after `stop()` completes.
    #[error("connector stopped")]
    ConnectorStopped,

    /// Final event delivered by a `UdpEntity` after `stop()` completes.
    #[error("UDP entity stopped")]
    UdpEntityStopped,

    /// Final event delivered by an I/O handler after `stop_io()` completes.
    #[error("I/O handler stopped")]
    IoHandlerStopped,
}

/// Error returned by any handle operation whose referent has been destroyed.
///
/// This is the single error type shared by [`crate::handles::IoInterface`],
/// [`crate::handles::IoOutput`], and [`crate::handles::NetEntity`]: once a
/// handle's generation no longer matches the arena slot it points at, every
/// operation other than equality and `is_valid` fails with this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub struct HandleError;

impl fmt::Display for HandleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handle refers to a handler or entity that no longer exists")
    }
}

/// Error returned by `IoInterface::start_io`: either the handle had already
/// expired, or the handler it refers to was already started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StartIoError {
    #[error("handle refers to a handler that no longer exists")]
    Expired,
    #[error("I/O handler already started")]
    AlreadyStarted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_error_display() {
        assert_eq!(
            HandleError.to_string(),
            "handle refers to a handler or entity that no longer exists"
        );
    }

    #[test]
    fn net_error_io_display_wraps_source() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        let err = NetError::from(io_err);
        assert!(err.to_string().contains("refused"));
    }

    #[test]
    fn sentinel_variants_have_stable_messages() {
        assert_eq!(NetError::AcceptorStopped.to_string(), "acceptor stopped");
        assert_eq!(NetError::ConnectorStopped.to_string(), "connector stopped");
        assert_eq!(NetError::UdpEntityStopped.to_string(), "UDP entity stopped");
        assert_eq!(NetError::IoHandlerStopped.to_string(), "I/O handler stopped");
        assert_eq!(NetError::HandlerTerminated.to_string(), "message handler terminated the connection");
    }
}
