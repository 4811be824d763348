//! Windows I/O completion port backend.
//!
//! Not yet ported. Completion ports invert the model (operations are
//! submitted and completions harvested, rather than readiness observed),
//! so bridging them onto this contract needs a submit/complete translation
//! layer; until that exists every operation reports `NotImplemented`.

use crate::error::{ServiceError, ServiceResult};
use crate::{ServiceKind, SocketService, StopCompletion};

use std::sync::Arc;
use std::time::Duration;
use vaktpost_net::{Network, Socket, SocketEvent, SocketInterest};

pub struct IocpService {
    _net: Arc<dyn Network>,
}

impl IocpService {
    pub fn new(net: Arc<dyn Network>) -> Self {
        Self { _net: net }
    }
}

impl SocketService for IocpService {
    fn kind(&self) -> ServiceKind {
        ServiceKind::Iocp
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
