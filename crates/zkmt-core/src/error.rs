//! Result codes and submission-time errors.
//!
//! `ReturnCode` is what callbacks see. `ZkError` is what a submission call
//! returns synchronously when the request never reached the engine.

use crate::state::State;
use std::fmt;

/// Numeric result codes shared with the coordination service.
///
/// Values in `-1..=-9` are client/system errors, values below `-100` are
/// API errors reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ReturnCode {
    Ok = 0,
    SystemError = -1,
    RuntimeInconsistency = -2,
    DataInconsistency = -3,
    ConnectionLoss = -4,
    MarshallingError = -5,
    Unimplemented = -6,
    OperationTimeout = -7,
    BadArguments = -8,
    InvalidState = -9,
    ApiError = -100,
    NoNode = -101,
    NoAuth = -102,
    BadVersion = -103,
    NoChildrenForEphemerals = -108,
    NodeExists = -110,
    NotEmpty = -111,
    SessionExpired = -112,
    InvalidCallback = -113,
    InvalidAcl = -114,
    AuthFailed = -115,
    Closing = -116,
    Nothing = -117,
    SessionMoved = -118,
}

impl ReturnCode {
    /// Map a raw wire value to a known code.
    pub const fn from_raw(raw: i32) -> Option<ReturnCode> {
        use ReturnCode::*;
        Some(match raw {
            0 => Ok,
            -1 => SystemError,
            -2 => RuntimeInconsistency,
            -3 => DataInconsistency,
            -4 => ConnectionLoss,
            -5 => MarshallingError,
            -6 => Unimplemented,
            -7 => OperationTimeout,
            -8 => BadArguments,
            -9 => InvalidState,
            -100 => ApiError,
            -101 => NoNode,
            -102 => NoAuth,
            -103 => BadVersion,
            -108 => NoChildrenForEphemerals,
            -110 => NodeExists,
            -111 => NotEmpty,
            -112 => SessionExpired,
            -113 => InvalidCallback,
            -114 => InvalidAcl,
            -115 => AuthFailed,
            -116 => Closing,
            -117 => Nothing,
            -118 => SessionMoved,
            _ => return None,
        })
    }

    #[inline]
    pub const fn as_raw(self) -> i32 {
        self as i32
    }

    #[inline]
    pub const fn is_ok(self) -> bool {
        matches!(self, ReturnCode::Ok)
    }

    /// Server-side API errors (node missing, bad version, ...).
    #[inline]
    pub const fn is_api_error(self) -> bool {
        (self as i32) <= ReturnCode::ApiError as i32
    }

    pub const fn description(self) -> &'static str {
        use ReturnCode::*;
        match self {
            Ok => "ok",
            SystemError => "system error",
            RuntimeInconsistency => "runtime inconsistency",
            DataInconsistency => "data inconsistency",
            ConnectionLoss => "connection loss",
            MarshallingError => "marshalling error",
            Unimplemented => "unimplemented",
            OperationTimeout => "operation timeout",
            BadArguments => "bad arguments",
            InvalidState => "invalid session state",
            ApiError => "api error",
            NoNode => "no node",
            NoAuth => "not authenticated",
            BadVersion => "bad version",
            NoChildrenForEphemerals => "ephemeral nodes may not have children",
            NodeExists => "node exists",
            NotEmpty => "node not empty",
            SessionExpired => "session expired",
            InvalidCallback => "invalid callback",
            InvalidAcl => "invalid acl",
            AuthFailed => "authentication failed",
            Closing => "session closing",
            Nothing => "no server responses to process",
            SessionMoved => "session moved",
        }
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description(), self.as_raw())
    }
}

/// Errors returned by API calls.
///
/// When a submission fails no completion context exists, so the callback
/// passed with the request is never invoked. `Operation` is only produced
/// by blocking calls and carries the result code the request completed
/// with.
#[derive(Debug, thiserror::Error)]
pub enum ZkError {
    #[error("bad arguments: {0}")]
    BadArguments(&'static str),

    #[error("session is in state {0:?}")]
    InvalidState(State),

    #[error("session is closing")]
    Closing,

    #[error("marshalling failed: {0}")]
    Marshalling(String),

    #[error("system error: {0}")]
    System(#[from] std::io::Error),

    #[error("session not initialized")]
    NotInitialized,

    #[error("session already initialized")]
    AlreadyInitialized,

    #[error("operation failed: {0}")]
    Operation(ReturnCode),
}

impl ZkError {
    /// Result code reported for this error.
    pub fn code(&self) -> ReturnCode {
        match self {
            ZkError::BadArguments(_) => ReturnCode::BadArguments,
            ZkError::InvalidState(_) => ReturnCode::InvalidState,
            ZkError::Closing => ReturnCode::Closing,
            ZkError::Marshalling(_) => ReturnCode::MarshallingError,
            ZkError::System(_) => ReturnCode::SystemError,
            ZkError::NotInitialized | ZkError::AlreadyInitialized => ReturnCode::ApiError,
            ZkError::Operation(rc) => *rc,
        }
    }
}

pub type ZkResult<T> = Result<T, ZkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_roundtrip_for_known_codes() {
        for raw in [0, -1, -4, -7, -101, -110, -112, -116, -118] {
            let rc = ReturnCode::from_raw(raw).unwrap();
            assert_eq!(rc.as_raw(), raw);
        }
        assert_eq!(ReturnCode::from_raw(-104), None);
        assert_eq!(ReturnCode::from_raw(7), None);
    }

    #[test]
    fn test_api_error_classification() {
        assert!(ReturnCode::NoNode.is_api_error());
        assert!(ReturnCode::Closing.is_api_error());
        assert!(!ReturnCode::ConnectionLoss.is_api_error());
        assert!(!ReturnCode::Ok.is_api_error());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(ZkError::BadArguments("path").code(), ReturnCode::BadArguments);
        assert_eq!(
            ZkError::InvalidState(State::Expired).code(),
            ReturnCode::InvalidState
        );
        assert_eq!(ZkError::Operation(ReturnCode::NoNode).code(), ReturnCode::NoNode);
        let io = std::io::Error::from_raw_os_error(24);
        assert_eq!(ZkError::from(io).code(), ReturnCode::SystemError);
    }

    #[test]
    fn test_error_display() {
        let e = ZkError::BadArguments("path must start with '/'");
        assert_eq!(format!("{}", e), "bad arguments: path must start with '/'");
        assert_eq!(format!("{}", ReturnCode::NoNode), "no node (-101)");
    }
}
