//! Error types for socket operations.

use std::io;
use thiserror::Error;

pub type NetResult<T> = Result<T, NetError>;

/// Unified socket operation error type.
#[derive(Debug, Error)]
pub enum NetError {
    /// The supplied handle is `INVALID_SOCKET` or otherwise unusable.
    #[error("invalid socket handle")]
    InvalidSocket,

    /// Non-blocking operation had nothing to do. Callers on the readiness
    /// path treat this as "try again after the next wait", not a fault.
    #[error("operation would block")]
    WouldBlock,

    /// The OS refused to allocate a descriptor or buffer.
    #[error("socket resources exhausted: {0}")]
    Exhausted(#[source] io::Error),

    /// Any other OS-level failure, tagged with the operation that failed.
    #[error("{context}: {source}")]
    Sys {
        context: &'static str,
        #[source]
        source: io::Error,
    },
}

impl NetError {
    /// Wrap `errno` from the last syscall, classifying the common kinds.
    pub fn last_os(context: &'static str) -> Self {
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(code) if code == libc::EAGAIN || code == libc::EWOULDBLOCK => {
                NetError::WouldBlock
            }
            Some(code)
                if code == libc::EMFILE
                    || code == libc::ENFILE
                    || code == libc::ENOBUFS
                    || code == libc::ENOMEM =>
            {
                NetError::Exhausted(err)
            }
            _ => NetError::Sys {
                context,
                source: err,
            },
        }
    }

    #[inline]
    pub fn is_would_block(&self) -> bool {
        matches!(self, NetError::WouldBlock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn would_block_is_classified() {
        assert!(NetError::WouldBlock.is_would_block());
        assert!(!NetError::InvalidSocket.is_would_block());
    }

    #[test]
    fn sys_error_carries_context() {
        let err = NetError::Sys {
            context: "failed to connect socket",
            source: io::Error::from_raw_os_error(libc::ECONNREFUSED),
        };
        assert!(err.to_string().starts_with("failed to connect socket"));
    }
}
