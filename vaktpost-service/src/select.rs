//! Portable `select(2)` backend.
//!
//! The interest table is converted to fd-sets on every wait, which costs
//! O(n) per call but needs no kernel registration state, so it runs
//! anywhere. Socket numbers are bounded by the platform's `FD_SETSIZE`.

use crate::error::{ServiceError, ServiceResult};
use crate::{ServiceKind, SocketService, StopCompletion};

use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};
use vaktpost_net::{Network, PairMode, Socket, SocketEvent, SocketInterest, SocketPair};

/// One byte, content irrelevant; the wake signal is the readability of the
/// pair's reader, not the payload.
const WAKE: &[u8] = b"w";

struct Inner {
    interest: HashMap<Socket, SocketInterest>,
    pair: Option<SocketPair>,
    started: bool,
    shutdown: bool,
    polling: bool,
    notify_pending: bool,
}

pub struct SelectService {
    net: Arc<dyn Network>,
    inner: Mutex<Inner>,
    /// Signaled whenever the poller leaves the syscall; `stop` waits on it
    /// before tearing down descriptors out from under `select`.
    idle: Condvar,
}

impl SelectService {
    pub fn new(net: Arc<dyn Network>) -> Self {
        Self {
            net,
            inner: Mutex::new(Inner {
                interest: HashMap::new(),
                pair: None,
                started: false,
                shutdown: false,
                polling: false,
                notify_pending: false,
            }),
            idle: Condvar::new(),
        }
    }

    /// Wake an in-progress wait. Caller holds the lock.
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

fn to_timeval(timeout: Duration) -> libc::timeval {
    libc::timeval {
        tv_sec: timeout.as_secs() as libc::time_t,
        tv_usec: timeout.subsec_micros() as libc::suseconds_t,
    }
}

impl SocketService for SelectService {
    fn kind(&self) -> ServiceKind {
        ServiceKind::Select
    }

    fn start(&self) -> ServiceResult<()> {
        let mut inner = self.inner.lock();

        if inner.started || inner.shutdown {
            return Err(ServiceError::AlreadyStarted);
        }

        let pair = SocketPair::create(Arc::clone(&self.net), PairMode::NonBlocking)?;
        inner.pair = Some(pair);
        inner.started = true;
        Ok(())
    }

    fn add(&self, sock: Socket, interest: SocketInterest) -> ServiceResult<()> {
        let mut inner = self.inner.lock();

        if !inner.started || inner.shutdown {
            return Err(ServiceError::NotStarted);
        }
        // Any negative handle is bogus, not just the sentinel.
        if sock < 0 {
            return Err(ServiceError::InvalidArgument("invalid socket handle"));
        }
        if sock as usize >= libc::FD_SETSIZE {
            return Err(ServiceError::InvalidArgument(
                "descriptor exceeds select capacity",
            ));
        }
        if interest.is_empty() && !inner.interest.contains_key(&sock) {
            return Ok(());
        }

        // Replace, never merge: the caller's new set is the whole truth.
        inner.interest.insert(sock, interest);
        debug!(socket = sock, interest = %interest, "interest registered");

        self.wake_locked(&inner);
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

        if let Some(entry) = inner.interest.get_mut(&sock) {
            // The entry stays registered even when its interest empties;
            // only `close` deregisters.
            *entry &= !interest;
            debug!(socket = sock, interest = %*entry, "interest reduced");
            self.wake_locked(&inner);
        }
        Ok(())
    }

    fn close(&self, sock: Socket) -> ServiceResult<()> {
        let mut inner = self.inner.lock();

        if sock < 0 {
            return Err(ServiceError::InvalidArgument("invalid socket handle"));
        }

        if inner.interest.remove(&sock).is_some() {
            debug!(socket = sock, "socket deregistered");
            self.wake_locked(&inner);
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
            // A notify arrived while nobody was waiting; surface it as an
            // immediate spurious wake instead of losing it.
            inner.notify_pending = false;
            return Ok(Vec::new());
        }

        let reader = match &inner.pair {
            Some(pair) => pair.reader(),
            None => return Err(ServiceError::NotStarted),
        };

        let mut reads: libc::fd_set = unsafe { std::mem::zeroed() };
        let mut writes: libc::fd_set = unsafe { std::mem::zeroed() };
        let mut errors: libc::fd_set = unsafe { std::mem::zeroed() };
        unsafe {
            libc::FD_ZERO(&mut reads);
            libc::FD_ZERO(&mut writes);
            libc::FD_ZERO(&mut errors);
            libc::FD_SET(reader, &mut reads);
        }

        let mut nfds = reader + 1;
        for (&sock, &interest) in &inner.interest {
            nfds = nfds.max(sock + 1);
            unsafe {
                if interest.contains(SocketInterest::READ) {
                    libc::FD_SET(sock, &mut reads);
                }
                if interest.contains(SocketInterest::WRITE) {
                    libc::FD_SET(sock, &mut writes);
                }
                // Error conditions are reported regardless of interest.
                libc::FD_SET(sock, &mut errors);
            }
        }

        let mut tv = timeout.map(to_timeval);
        let tv_ptr = tv
            .as_mut()
            .map(|tv| tv as *mut libc::timeval)
            .unwrap_or(std::ptr::null_mut());

        inner.polling = true;
        drop(inner);

        let res = unsafe { libc::select(nfds, &mut reads, &mut writes, &mut errors, tv_ptr) };

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
            error!(error = %err, "select failed");
            return Err(ServiceError::Backend {
                context: "failed to execute select()",
                source: err,
            });
        }
        if res == 0 {
            return Ok(Vec::new());
        }

        if unsafe { libc::FD_ISSET(reader, &mut reads) } {
            if let Some(pair) = &inner.pair {
                pair.drain()?;
            }
        }

        let mut results = Vec::with_capacity(inner.interest.len());
        for (&sock, &interest) in &inner.interest {
            if sock == reader {
                continue;
            }
            let mut fired = SocketInterest::empty();
            unsafe {
                if interest.contains(SocketInterest::READ) && libc::FD_ISSET(sock, &mut reads) {
                    fired |= SocketInterest::READ;
                }
                if interest.contains(SocketInterest::WRITE) && libc::FD_ISSET(sock, &mut writes)
                {
                    fired |= SocketInterest::WRITE;
                }
                if libc::FD_ISSET(sock, &mut errors) {
                    fired |= SocketInterest::ERROR;
                }
            }
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

        drop(inner);
        debug!("select service stopped");

        if let Some(completion) = completion {
            completion(Ok(()));
        }
    }
}

impl Drop for SelectService {
    fn drop(&mut self) {
        self.stop_with(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaktpost_net::{SysNetwork, INVALID_SOCKET};

    fn service() -> SelectService {
        SelectService::new(Arc::new(SysNetwork::new()))
    }

    #[test]
    fn add_requires_start() {
        let s = service();
        assert!(matches!(
            s.add(1, SocketInterest::READ),
            Err(ServiceError::NotStarted)
        ));
    }

    #[test]
    fn double_start_fails() {
        let s = service();
        s.start().unwrap();
        assert!(matches!(s.start(), Err(ServiceError::AlreadyStarted)));
        s.stop();
    }

    #[test]
    fn add_rejects_invalid_socket() {
        let s = service();
        s.start().unwrap();
        assert!(matches!(
            s.add(INVALID_SOCKET, SocketInterest::READ),
            Err(ServiceError::InvalidArgument(_))
        ));
        s.stop();
    }

    #[test]
    fn negative_descriptors_report_an_invalid_handle() {
        let s = service();
        s.start().unwrap();
        // Not the sentinel, still bogus; must not read as a capacity error.
        assert!(matches!(
            s.add(-5, SocketInterest::READ),
            Err(ServiceError::InvalidArgument("invalid socket handle"))
        ));
        assert!(matches!(
            s.remove(-5, SocketInterest::READ),
            Err(ServiceError::InvalidArgument("invalid socket handle"))
        ));
        assert!(matches!(
            s.close(-5),
            Err(ServiceError::InvalidArgument("invalid socket handle"))
        ));
        s.stop();
    }

    #[test]
    fn add_rejects_descriptor_beyond_fd_setsize() {
        let s = service();
        s.start().unwrap();
        assert!(matches!(
            s.add(libc::FD_SETSIZE as Socket, SocketInterest::READ),
            Err(ServiceError::InvalidArgument(_))
        ));
        s.stop();
    }

    #[test]
    fn empty_add_on_unknown_socket_is_a_noop() {
        let s = service();
        s.start().unwrap();
        s.add(7, SocketInterest::empty()).unwrap();
        s.remove(7, SocketInterest::READ).unwrap();
        s.stop();
    }

    #[test]
    fn stop_is_terminal_for_the_api() {
        let s = service();
        s.start().unwrap();
        s.stop();
        assert!(matches!(
            s.add(1, SocketInterest::READ),
            Err(ServiceError::NotStarted)
        ));
        assert!(matches!(
            s.execute(Some(Duration::from_millis(1))),
            Err(ServiceError::NotStarted)
        ));
        // And repeat stops stay quiet.
        s.stop();
    }

    #[test]
    fn start_after_stop_is_refused() {
        let s = service();
        s.start().unwrap();
        s.stop();
        assert!(matches!(s.start(), Err(ServiceError::AlreadyStarted)));
    }

    #[test]
    fn close_is_idempotent() {
        let s = service();
        s.start().unwrap();
        s.close(42).unwrap();
        s.close(42).unwrap();
        s.stop();
    }

    #[test]
    fn stop_with_reports_completion() {
        let s = service();
        s.start().unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        s.stop_with(Some(Box::new(move |result| {
            tx.send(result.is_ok()).unwrap();
        })));
        assert!(rx.recv().unwrap());
    }
}
