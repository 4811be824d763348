//! # vaktpost-net
//!
//! Socket data model and platform glue for the vaktpost readiness layer.
//! Built with safety and cross-platform uniformity as primary design
//! constraints.
//!
//! ### Key Submodules:
//! - `socket`: handle type, interest flags, readiness events
//! - `network`: the `Network` syscall seam and its POSIX implementation
//! - `pair`: connected socket pair used as a cross-thread wake channel

pub mod error;
pub mod network;
pub mod pair;
pub mod socket;

pub use error::{NetError, NetResult};
pub use network::{Network, ShutdownMode};
#[cfg(unix)]
pub use network::SysNetwork;
pub use pair::{PairMode, SocketPair};
pub use socket::{Socket, SocketEvent, SocketInterest, INVALID_SOCKET};
