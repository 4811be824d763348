//! Socket handles, interest flags, and readiness events.

use std::fmt;

/// Opaque platform socket handle. Ownership of the underlying descriptor
/// stays with the caller; this layer only observes readiness.
#[cfg(unix)]
pub type Socket = std::os::fd::RawFd;

#[cfg(windows)]
pub type Socket = u64;

/// Sentinel for "no socket".
#[cfg(unix)]
pub const INVALID_SOCKET: Socket = -1;

#[cfg(windows)]
pub const INVALID_SOCKET: Socket = u64::MAX;

bitflags::bitflags! {
    /// Interest registered for a socket, and the flags that fired for it.
    ///
    /// `READ` and `WRITE` are caller-selected interest. `ERROR`, `HANG_UP`
    /// and `INVALID` are condition flags: they are reported whenever the
    /// condition holds, independent of registered interest.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SocketInterest: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const ERROR = 1 << 2;
        const HANG_UP = 1 << 3;
        const INVALID = 1 << 4;

        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
    }
}

impl fmt::Display for SocketInterest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("NONE");
        }
        let mut first = true;
        for (name, _) in self.iter_names() {
            if !first {
                f.write_str("|")?;
            }
            f.write_str(name)?;
            first = false;
        }
        Ok(())
    }
}

/// One readiness notification: which socket, and which flags fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketEvent {
    pub sock: Socket,
    pub events: SocketInterest,
}

impl SocketEvent {
    #[inline]
    pub fn new(sock: Socket, events: SocketInterest) -> Self {
        Self { sock, events }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn displays_empty_set() {
        assert_eq!(SocketInterest::empty().to_string(), "NONE");
    }

    #[test]
    fn displays_combined_flags() {
        let flags = SocketInterest::READ | SocketInterest::WRITE;
        assert_eq!(flags.to_string(), "READ|WRITE");
    }

    proptest! {
        #[test]
        fn bits_roundtrip(bits in 0u8..32) {
            let flags = SocketInterest::from_bits_truncate(bits);
            prop_assert_eq!(SocketInterest::from_bits_truncate(flags.bits()), flags);
        }

        #[test]
        fn union_contains_both(a in 0u8..32, b in 0u8..32) {
            let a = SocketInterest::from_bits_truncate(a);
            let b = SocketInterest::from_bits_truncate(b);
            prop_assert!((a | b).contains(a));
            prop_assert!((a | b).contains(b));
        }

        #[test]
        fn difference_clears_flags(a in 0u8..32, b in 0u8..32) {
            let a = SocketInterest::from_bits_truncate(a);
            let b = SocketInterest::from_bits_truncate(b);
            prop_assert!((a & !b).intersection(b).is_empty());
        }
    }
}
