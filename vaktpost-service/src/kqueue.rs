//! BSD/Apple `kqueue` backend.
//!
//! Not yet ported. The surface exists so platform dispatch and callers see
//! the same capability set everywhere; every operation reports
//! `NotImplemented` explicitly instead of silently doing nothing. The
//! select backend is the supported fallback on these platforms.

use crate::error::{ServiceError, ServiceResult};
use crate::{ServiceKind, SocketService, StopCompletion};

use std::sync::Arc;
use std::time::Duration;
use vaktpost_net::{Network, Socket, SocketEvent, SocketInterest};

pub struct KqueueService {
    _net: Arc<dyn Network>,
}

impl KqueueService {
    pub fn new(net: Arc<dyn Network>) -> Self {
        Self { _net: net }
    }
}

impl SocketService for KqueueService {
    fn kind(&self) -> ServiceKind {
        ServiceKind::Kqueue
    }

    fn start(&self) -> ServiceResult<()> {
        Err(ServiceError::NotImplemented)
    }

    fn add(&self, _sock: Socket, _interest: SocketInterest) -> ServiceResult<()> {
        Err(ServiceError::NotImplemented)
    }

    fn remove(&self, _sock: Socket, _interest: SocketInterest) -> ServiceResult<()> {
        Err(ServiceError::NotImplemented)
    }

    fn close(&self, _sock: Socket) -> ServiceResult<()> {
        Err(ServiceError::NotImplemented)
    }

    fn execute(&self, _timeout: Option<Duration>) -> ServiceResult<Vec<SocketEvent>> {
        Err(ServiceError::NotImplemented)
    }

    fn notify(&self) {}

    fn stop_with(&self, completion: Option<StopCompletion>) {
        if let Some(completion) = completion {
            completion(Ok(()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaktpost_net::SysNetwork;

    #[test]
    fn every_operation_reports_not_implemented() {
        let s = KqueueService::new(Arc::new(SysNetwork::new()));
        assert!(matches!(s.start(), Err(ServiceError::NotImplemented)));
        assert!(matches!(
            s.add(1, SocketInterest::READ),
            Err(ServiceError::NotImplemented)
        ));
        assert!(matches!(
            s.execute(Some(Duration::from_millis(1))),
            Err(ServiceError::NotImplemented)
        ));
        s.notify();
        s.stop();
    }
}
