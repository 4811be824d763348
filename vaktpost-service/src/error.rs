//! Error taxonomy for the readiness service.

use std::io;
use thiserror::Error;
use vaktpost_net::NetError;

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Failure kinds reported across the service boundary.
///
/// `Interrupted` is the expected termination path for a poll loop whose
/// service was stopped from another thread; everything else is a fault.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("service not started")]
    NotStarted,

    #[error("service already started")]
    AlreadyStarted,

    #[error("another wait is already in progress")]
    Busy,

    #[error("wait interrupted by shutdown")]
    Interrupted,

    #[error("polling resources exhausted: {0}")]
    Exhausted(#[source] io::Error),

    #[error("{context}: {source}")]
    Backend {
        context: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("backend not implemented on this platform")]
    NotImplemented,

    #[error(transparent)]
    Net(NetError),
}

impl ServiceError {
    /// Wrap the last OS error from a polling syscall.
    pub fn backend(context: &'static str) -> Self {
        ServiceError::Backend {
            context,
            source: io::Error::last_os_error(),
        }
    }
}

impl From<NetError> for ServiceError {
    fn from(err: NetError) -> Self {
        match err {
            NetError::Exhausted(source) => ServiceError::Exhausted(source),
            other => ServiceError::Net(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhaustion_is_promoted_from_net_errors() {
        let net = NetError::Exhausted(io::Error::from_raw_os_error(libc::EMFILE));
        assert!(matches!(ServiceError::from(net), ServiceError::Exhausted(_)));
    }

    #[test]
    fn other_net_errors_stay_wrapped() {
        assert!(matches!(
            ServiceError::from(NetError::InvalidSocket),
            ServiceError::Net(NetError::InvalidSocket)
        ));
    }
}
