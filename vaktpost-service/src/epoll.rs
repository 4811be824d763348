//! Linux `epoll` backend.
//!
//! Interest changes are pushed to the kernel incrementally with
//! `epoll_ctl`, so the wait itself is a single syscall returning only ready
//! descriptors. The caller-visible contract matches the select backend
//! exactly; the one reconciliation is that an entry whose interest empties
//! is deregistered from the kernel set while staying in the table.

use crate::error::{ServiceError, ServiceResult};
use crate::{ServiceKind, SocketService, StopCompletion};

use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};
use vaktpost_net::{Network, PairMode, Socket, SocketEvent, SocketInterest, SocketPair};

const WAKE: &[u8] = b"w";

fn to_epoll_events(interest: SocketInterest) -> u32 {
    let mut events = 0u32;
    if interest.contains(SocketInterest::READ) {
        events |= libc::EPOLLIN as u32;
    }
    if interest.contains(SocketInterest::WRITE) {
        events |= libc::EPOLLOUT as u32;
    }
    // EPOLLERR and EPOLLHUP are delivered unconditionally; nothing to arm.
    events
}

fn from_epoll_events(events: u32) -> SocketInterest {
    let mut fired = SocketInterest::empty();
    if events & libc::EPOLLIN as u32 != 0 {
        fired |= SocketInterest::READ;
    }
    if events & libc::EPOLLOUT as u32 != 0 {
        fired |= SocketInterest::WRITE;
    }
    if events & libc::EPOLLERR as u32 != 0 {
        fired |= SocketInterest::ERROR;
    }
    if events & libc::EPOLLHUP as u32 != 0 {
        fired |= SocketInterest::HANG_UP;
    }
    fired
}

struct Inner {
    interest: HashMap<Socket, SocketInterest>,
    pair: Option<SocketPair>,
    epfd: libc::c_int,
    started: bool,
    shutdown: bool,
    polling: bool,
    notify_pending: bool,
}

impl Inner {
    fn ctl(
        &self,
        op: libc::c_int,
        sock: Socket,
        interest: SocketInterest,
        context: &'static str,
    ) -> ServiceResult<()> {
        let mut event = libc::epoll_event {
            events: to_epoll_events(interest),
            u64: sock as u64,
        };
        let ptr = if op == libc::EPOLL_CTL_DEL {
            std::ptr::null_mut()
        } else {
            &mut event
        };
        if unsafe { libc::epoll_ctl(self.epfd, op, sock, ptr) } < 0 {
            return Err(ServiceError::backend(context));
        }
        Ok(())
    }
}

pub struct EpollService {
    net: Arc<dyn Network>,
    inner: Mutex<Inner>,
    idle: Condvar,
}

impl EpollService {
    pub fn new(net: Arc<dyn Network>) -> Self {
        Self {
            net,
            inner: Mutex::new(Inner {
                interest: HashMap::new(),
                pair: None,
                epfd: -1,
                started: false,
                shutdown: false,
                polling: false,
                notify_pending: false,
            }),
            idle: Condvar::new(),
        }
    }

    fn wake_locked(&self, inner: &Inner) {
        if !inner.polling {
            return;
        }
        if let Some(pair) = &inner.pair {
            if let Err(err) = self.net.send(pair.writer(), WAKE) {
                if !err.is_would_block() && !inner.shutdown {
                    warn!(error = %err, "failed to write wake byte");
                }
            }
        }
    }
}

impl SocketService for EpollService {
    fn kind(&self) -> ServiceKind {
        ServiceKind::Epoll
    }

    fn start(&self) -> ServiceResult<()> {
        let mut inner = self.inner.lock();

        if inner.started || inner.shutdown {
            return Err(ServiceError::AlreadyStarted);
        }

        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd < 0 {
            let err = io::Error::last_os_error();
            return Err(match err.raw_os_error() {
                Some(code) if code == libc::EMFILE || code == libc::ENFILE => {
                    ServiceError::Exhausted(err)
                }
                _ => ServiceError::Backend {
                    context: "failed to initialize epoll",
                    source: err,
                },
            });
        }
        inner.epfd = epfd;

        let pair = SocketPair::create(Arc::clone(&self.net), PairMode::NonBlocking)?;
        inner.ctl(
            libc::EPOLL_CTL_ADD,
            pair.reader(),
            SocketInterest::READ,
            "failed to register wake channel with epoll",
        )?;
        inner.pair = Some(pair);
        inner.started = true;
        Ok(())
    }

    fn add(&self, sock: Socket, interest: SocketInterest) -> ServiceResult<()> {
        let mut inner = self.inner.lock();

        if !inner.started || inner.shutdown {
            return Err(ServiceError::NotStarted);
        }
        if sock < 0 {
            return Err(ServiceError::InvalidArgument("invalid socket handle"));
        }

        let prev = inner.interest.get(&sock).copied();
        match prev {
            None if interest.is_empty() => return Ok(()),
            None => {
                inner.ctl(
                    libc::EPOLL_CTL_ADD,
                    sock,
                    interest,
                    "failed to add socket to epoll",
                )?;
            }
            Some(prev) => {
                // Replace, never merge. The kernel set only tracks entries
                // with armable flags, so pick the ctl op accordingly.
                let was_armed = to_epoll_events(prev) != 0;
                let is_armed = to_epoll_events(interest) != 0;
                match (was_armed, is_armed) {
                    (false, true) => inner.ctl(
                        libc::EPOLL_CTL_ADD,
                        sock,
                        interest,
                        "failed to add socket to epoll",
                    )?,
                    (true, true) => inner.ctl(
                        libc::EPOLL_CTL_MOD,
                        sock,
                        interest,
                        "failed to modify socket in epoll",
                    )?,
                    (true, false) => inner.ctl(
                        libc::EPOLL_CTL_DEL,
                        sock,
                        interest,
                        "failed to remove socket from epoll",
                    )?,
                    (false, false) => {}
                }
            }
        }

        inner.interest.insert(sock, interest);
        debug!(socket = sock, interest = %interest, "interest registered");
        Ok(())
    }

    fn remove(&self, sock: Socket, interest: SocketInterest) -> ServiceResult<()> {
        let mut inner = self.inner.lock();

        if !inner.started || inner.shutdown {
            return Err(ServiceError::NotStarted);
        }
        if sock < 0 {
            return Err(ServiceError::InvalidArgument("invalid socket handle"));
        }
        if interest.is_empty() {
            return Ok(());
        }

        let Some(prev) = inner.interest.get(&sock).copied() else {
            return Ok(());
        };
        let next = prev & !interest;
        if next == prev {
            return Ok(());
        }

        let was_armed = to_epoll_events(prev) != 0;
        let is_armed = to_epoll_events(next) != 0;
        match (was_armed, is_armed) {
            (true, false) => inner.ctl(
                libc::EPOLL_CTL_DEL,
                sock,
                next,
                "failed to remove socket from epoll",
            )?,
            (true, true) => inner.ctl(
                libc::EPOLL_CTL_MOD,
                sock,
                next,
                "failed to modify socket in epoll",
            )?,
            _ => {}
        }

        // The table entry survives with empty interest; only `close`
        // deregisters it from the caller's point of view.
        inner.interest.insert(sock, next);
        debug!(socket = sock, interest = %next, "interest reduced");
        Ok(())
    }

    fn close(&self, sock: Socket) -> ServiceResult<()> {
        let mut inner = self.inner.lock();

        if sock < 0 {
            return Err(ServiceError::InvalidArgument("invalid socket handle"));
        }

        if let Some(prev) = inner.interest.remove(&sock) {
            if to_epoll_events(prev) != 0 {
                if let Err(err) = inner.ctl(
                    libc::EPOLL_CTL_DEL,
                    sock,
                    SocketInterest::empty(),
                    "failed to remove socket from epoll",
                ) {
                    // The descriptor may already be gone; close stays a
                    // success so shutdown races remain benign.
                    debug!(socket = sock, error = %err, "epoll deregistration skipped");
                }
            }
            debug!(socket = sock, "socket deregistered");
        }
        Ok(())
    }

    fn execute(&self, timeout: Option<Duration>) -> ServiceResult<Vec<SocketEvent>> {
        let mut inner = self.inner.lock();

        if !inner.started || inner.shutdown {
            return Err(ServiceError::NotStarted);
        }
        if inner.polling {
            return Err(ServiceError::Busy);
        }
        if inner.notify_pending {
            inner.notify_pending = false;
            return Ok(Vec::new());
        }

        let reader = match &inner.pair {
            Some(pair) => pair.reader(),
            None => return Err(ServiceError::NotStarted),
        };
        let epfd = inner.epfd;
        let capacity = (inner.interest.len() + 1).max(64);

        let timeout_ms = timeout
            .map(|t| t.as_millis().min(i32::MAX as u128) as i32)
            .unwrap_or(-1);

        inner.polling = true;
        drop(inner);

        let mut events: Vec<libc::epoll_event> = Vec::with_capacity(capacity);
        let res = unsafe {
            libc::epoll_wait(epfd, events.as_mut_ptr(), capacity as i32, timeout_ms)
        };

        let mut inner = self.inner.lock();
        inner.polling = false;
        self.idle.notify_all();

        if inner.shutdown {
            return Err(ServiceError::Interrupted);
        }

        if res < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                return Ok(Vec::new());
            }
            error!(error = %err, "epoll_wait failed");
            return Err(ServiceError::Backend {
                context: "failed to execute epoll_wait()",
                source: err,
            });
        }

        // The kernel initialized the first `res` entries.
        unsafe { events.set_len(res as usize) };

        let mut results = Vec::with_capacity(events.len());
        for event in &events {
            let sock = event.u64 as Socket;
            if sock == reader {
                if let Some(pair) = &inner.pair {
                    pair.drain()?;
                }
                continue;
            }
            let fired = from_epoll_events(event.events);
            if !fired.is_empty() {
                results.push(SocketEvent::new(sock, fired));
            }
        }
        Ok(results)
    }

    fn notify(&self) {
        let mut inner = self.inner.lock();

        if !inner.started || inner.shutdown {
            return;
        }
        if inner.polling {
            self.wake_locked(&inner);
        } else {
            inner.notify_pending = true;
        }
    }

    fn stop_with(&self, completion: Option<StopCompletion>) {
        let mut inner = self.inner.lock();

        if inner.shutdown {
            return;
        }

        inner.shutdown = true;
        inner.interest.clear();
        self.wake_locked(&inner);

        while inner.polling {
            self.idle.wait(&mut inner);
        }

        if let Some(mut pair) = inner.pair.take() {
            pair.stop();
        }
        if inner.epfd >= 0 {
            if unsafe { libc::close(inner.epfd) } < 0 {
                warn!(error = %io::Error::last_os_error(), "failed to close epoll descriptor");
            }
            inner.epfd = -1;
        }

        drop(inner);
        debug!("epoll service stopped");

        if let Some(completion) = completion {
            completion(Ok(()));
        }
    }
}

impl Drop for EpollService {
    fn drop(&mut self) {
        self.stop_with(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaktpost_net::SysNetwork;

    fn service() -> EpollService {
        EpollService::new(Arc::new(SysNetwork::new()))
    }

    #[test]
    fn lifecycle_matches_the_select_backend() {
        let s = service();
        assert!(matches!(
            s.add(1, SocketInterest::READ),
            Err(ServiceError::NotStarted)
        ));
        s.start().unwrap();
        assert!(matches!(s.start(), Err(ServiceError::AlreadyStarted)));
        s.stop();
        assert!(matches!(
            s.execute(Some(Duration::from_millis(1))),
            Err(ServiceError::NotStarted)
        ));
    }

    #[test]
    fn close_is_idempotent_for_unknown_sockets() {
        let s = service();
        s.start().unwrap();
        s.close(99).unwrap();
        s.close(99).unwrap();
        s.stop();
    }

    #[test]
    fn negative_descriptors_report_an_invalid_handle() {
        let s = service();
        s.start().unwrap();
        assert!(matches!(
            s.add(-5, SocketInterest::READ),
            Err(ServiceError::InvalidArgument("invalid socket handle"))
        ));
        assert!(matches!(
            s.close(-5),
            Err(ServiceError::InvalidArgument("invalid socket handle"))
        ));
        s.stop();
    }

    #[test]
    fn empty_interest_keeps_the_entry_registered() {
        let net: Arc<dyn Network> = Arc::new(SysNetwork::new());
        let s = EpollService::new(Arc::clone(&net));
        s.start().unwrap();

        let (a, b) = net.socket_pair().unwrap();
        s.add(a, SocketInterest::READ).unwrap();
        s.remove(a, SocketInterest::READ).unwrap();

        // Kernel-deregistered but still in the table: re-adding uses ADD,
        // and a wait sees no events for it.
        s.add(a, SocketInterest::WRITE).unwrap();
        let events = s.execute(Some(Duration::from_millis(100))).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].sock, a);
        assert!(events[0].events.contains(SocketInterest::WRITE));

        s.stop();
        net.close(a).unwrap();
        net.close(b).unwrap();
    }
}
