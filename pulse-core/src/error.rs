//! Error types for pulse-core

use thiserror::Error;

use crate::graph::NodeId;

/// Boxed error produced by user code inside a fallible effect or computed.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by the reactive core.
#[derive(Error, Debug)]
pub enum ReactiveError {
    /// A tracking guard popped a frame that was not its own.
    #[error("tracking stack corrupted: expected frame for {expected:?}, found {found:?}")]
    TrackingStackCorrupted {
        expected: Option<NodeId>,
        found: Option<NodeId>,
    },

    /// A reader was invalidated (or read itself) while it was executing.
    #[error("circular dependency: {node} was re-triggered during its own execution")]
    CircularDependency { node: NodeId, label: Option<String> },

    /// A deferred flush kept re-enqueueing readers.
    #[error("flush exceeded {limit} reader runs; readers keep re-triggering each other")]
    FlushLimitExceeded { limit: usize },

    /// Error returned by an effect or computed body.
    #[error("reactive body failed: {0}")]
    User(#[source] BoxError),

    /// The reader has been disposed.
    #[error("{0} has been disposed")]
    Disposed(NodeId),

    /// Context options or a graph snapshot failed to (de)serialize.
    #[error("json encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    /// A graph snapshot failed to encode as MessagePack.
    #[error("msgpack encoding failed: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// Bytes handed to the snapshot decoder were not a MessagePack snapshot.
    #[error("msgpack decoding failed: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),
}

impl ReactiveError {
    /// Wrap an arbitrary error raised by user code.
    pub fn user<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::User(err.into())
    }

    /// Whether this error came from a re-entrancy guard.
    pub fn is_circular(&self) -> bool {
        matches!(self, Self::CircularDependency { .. })
    }
}

/// Result type alias
pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;

/// Panic with the error's message. Backs the infallible `get`/`set`/`batch`
/// forms the same way `RefCell::borrow` backs `try_borrow`.
#[cold]
#[track_caller]
pub(crate) fn raise(err: ReactiveError) -> ! {
    panic!("{err}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_errors_keep_their_source() {
        let err = ReactiveError::user("validation failed");
        assert_eq!(err.to_string(), "reactive body failed: validation failed");
        assert!(std::error::Error::source(&err).is_some());
        assert!(!err.is_circular());
    }

    #[test]
    fn json_errors_convert_from_serde_json() {
        let parse = serde_json::from_str::<u32>("nope").unwrap_err();
        let err: ReactiveError = parse.into();
        assert!(matches!(err, ReactiveError::Json(_)));
    }

    #[test]
    fn msgpack_errors_convert_from_rmp_serde() {
        let decode = rmp_serde::from_slice::<String>(&[0xc1]).unwrap_err();
        let err: ReactiveError = decode.into();
        assert!(matches!(err, ReactiveError::MsgPackDecode(_)));
        assert!(err.to_string().starts_with("msgpack decoding failed"));
    }
}
