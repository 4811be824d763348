//! # vaktpost-service
//!
//! Cross-platform socket readiness multiplexing.
//!
//! A `SocketService` owns an interest table (socket -> operations the caller
//! wants notified about) and delivers batched readiness events from
//! `execute`. One thread polls; any other thread may mutate the table or
//! call `notify` to interrupt an in-progress wait. The backends (select,
//! epoll, kqueue, IOCP) present identical observable behavior behind this
//! trait.
//!
//! Standard usage pattern:
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use vaktpost_net::{SysNetwork, SocketInterest, Network};
//! # use vaktpost_service::{create, ServiceKind};
//! let net: Arc<dyn Network> = Arc::new(SysNetwork::new());
//! let service = create(ServiceKind::Default, Arc::clone(&net)).unwrap();
//! service.start().unwrap();
//! # let sock = 0;
//! service.add(sock, SocketInterest::READ).unwrap();
//! loop {
//!     let events = match service.execute(Some(std::time::Duration::from_millis(500))) {
//!         Ok(events) => events,
//!         Err(vaktpost_service::ServiceError::Interrupted) => break,
//!         Err(err) => panic!("poll loop failed: {err}"),
//!     };
//!     for event in events {
//!         // perform the actual I/O via `net`, then re-arm interest
//!     }
//! }
//! ```

pub mod error;

#[cfg(unix)]
mod select;

#[cfg(target_os = "linux")]
mod epoll;

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd"
))]
mod kqueue;

#[cfg(windows)]
mod iocp;

pub use error::{ServiceError, ServiceResult};

#[cfg(unix)]
pub use select::SelectService;

#[cfg(target_os = "linux")]
pub use epoll::EpollService;

use std::sync::Arc;
use std::time::Duration;
use vaktpost_net::{Network, Socket, SocketEvent, SocketInterest};

/// Completion callback handed to `stop_with`.
pub type StopCompletion = Box<dyn FnOnce(ServiceResult<()>) + Send>;

/// Which polling backend a service uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    /// Resolve the preferred backend for the host platform.
    Default,
    Select,
    Epoll,
    Kqueue,
    Iocp,
}

impl ServiceKind {
    /// The backend `Default` resolves to on this platform.
    pub fn resolved(self) -> ServiceKind {
        if self != ServiceKind::Default {
            return self;
        }
        #[cfg(target_os = "linux")]
        {
            ServiceKind::Epoll
        }
        #[cfg(windows)]
        {
            // The only plausible Windows backend; it reports NotImplemented
            // until ported, rather than pretending select exists there.
            ServiceKind::Iocp
        }
        #[cfg(not(any(target_os = "linux", windows)))]
        {
            // kqueue is not yet ported; select is the portable fallback on
            // the remaining unix targets.
            ServiceKind::Select
        }
    }
}

/// Readiness-event multiplexer over a dynamic set of sockets.
///
/// Lifecycle: `start` -> (`add`/`remove`/`close`/`execute`/`notify`)* ->
/// `stop`. `execute` is single-waiter by contract: exactly one thread polls
/// while any number of control threads mutate interest or wake it.
pub trait SocketService: Send + Sync {
    fn kind(&self) -> ServiceKind;

    /// Allocate backend resources and the internal wake channel.
    fn start(&self) -> ServiceResult<()>;

    /// Register or update interest for `sock`. An existing registration is
    /// **replaced**, not merged.
    fn add(&self, sock: Socket, interest: SocketInterest) -> ServiceResult<()>;

    /// Clear the given flags from the socket's interest. An entry whose
    /// interest becomes empty stays registered (unlike `close`).
    fn remove(&self, sock: Socket, interest: SocketInterest) -> ServiceResult<()>;

    /// Deregister `sock` entirely. Success even if never registered, so
    /// shutdown races stay benign.
    fn close(&self, sock: Socket) -> ServiceResult<()>;

    /// Block until a registered socket is ready, `notify` is called, or
    /// `timeout` elapses (`None` waits indefinitely). Returns the batch of
    /// ready events; an empty batch means timeout or spurious wake.
    fn execute(&self, timeout: Option<Duration>) -> ServiceResult<Vec<SocketEvent>>;

    /// Wake a thread blocked in `execute` without any socket becoming
    /// ready. Safe from any thread in any state; a wake with no in-progress
    /// wait is observed by the next `execute` call instead of being lost.
    fn notify(&self);

    /// Tear the service down, interrupting any in-progress `execute`.
    fn stop(&self) {
        self.stop_with(None);
    }

    /// `stop`, reporting completion through `fn` once teardown finished.
    /// Repeated stops return without invoking the callback.
    fn stop_with(&self, completion: Option<StopCompletion>);
}

/// Construct the concrete backend for `kind`.
///
/// Backends that exist but are not ported to the host platform are refused
/// with `NotImplemented` rather than silently substituted.
pub fn create(
    kind: ServiceKind,
    net: Arc<dyn Network>,
) -> ServiceResult<Arc<dyn SocketService>> {
    match kind.resolved() {
        #[cfg(unix)]
        ServiceKind::Select => Ok(Arc::new(select::SelectService::new(net))),

        #[cfg(target_os = "linux")]
        ServiceKind::Epoll => Ok(Arc::new(epoll::EpollService::new(net))),

        #[cfg(any(
            target_os = "macos",
            target_os = "ios",
            target_os = "freebsd",
            target_os = "netbsd",
            target_os = "openbsd"
        ))]
        ServiceKind::Kqueue => Ok(Arc::new(kqueue::KqueueService::new(net))),

        #[cfg(windows)]
        ServiceKind::Iocp => Ok(Arc::new(iocp::IocpService::new(net))),

        _ => Err(ServiceError::NotImplemented),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[cfg(unix)]
    use vaktpost_net::SysNetwork;

    #[test]
    fn default_kind_resolves_to_a_concrete_backend() {
        assert_ne!(ServiceKind::Default.resolved(), ServiceKind::Default);
    }

    #[test]
    fn default_resolution_matches_the_platform() {
        let resolved = ServiceKind::Default.resolved();
        #[cfg(target_os = "linux")]
        assert_eq!(resolved, ServiceKind::Epoll);
        #[cfg(windows)]
        assert_eq!(resolved, ServiceKind::Iocp);
        #[cfg(not(any(target_os = "linux", windows)))]
        assert_eq!(resolved, ServiceKind::Select);
    }

    #[cfg(unix)]
    #[test]
    fn factory_builds_the_requested_backend() {
        let net: Arc<dyn Network> = Arc::new(SysNetwork::new());
        let service = create(ServiceKind::Select, net).unwrap();
        assert_eq!(service.kind(), ServiceKind::Select);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn foreign_backends_are_refused() {
        let net: Arc<dyn Network> = Arc::new(SysNetwork::new());
        assert!(matches!(
            create(ServiceKind::Kqueue, net),
            Err(ServiceError::NotImplemented)
        ));
    }
}
