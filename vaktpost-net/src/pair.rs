//! Cross-thread wake channel built from a connected socket pair.
//!
//! The pair carries no protocol. One side is written to force a blocked
//! readiness wait to return; the poll loop drains the reader afterwards so
//! stale bytes cannot re-trigger the wake on the next wait.

use crate::error::NetResult;
use crate::network::Network;
use crate::socket::{Socket, INVALID_SOCKET};

use std::sync::Arc;
use tracing::warn;

/// Blocking mode applied to both ends at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PairMode {
    Blocking,
    #[default]
    NonBlocking,
}

pub struct SocketPair {
    net: Arc<dyn Network>,
    sockets: [Socket; 2],
}

impl SocketPair {
    /// Create a connected, ready-to-use pair.
    pub fn create(net: Arc<dyn Network>, mode: PairMode) -> NetResult<Self> {
        let (reader, writer) = net.socket_pair()?;

        if mode == PairMode::NonBlocking {
            net.set_blocking(reader, false)?;
            net.set_blocking(writer, false)?;
        }

        Ok(Self {
            net,
            sockets: [reader, writer],
        })
    }

    /// The end the poll loop watches and drains.
    #[inline]
    pub fn reader(&self) -> Socket {
        self.sockets[0]
    }

    /// The end a waker writes to.
    #[inline]
    pub fn writer(&self) -> Socket {
        self.sockets[1]
    }

    /// Read and discard everything currently buffered on the reader end.
    ///
    /// "No data left" is success: rapid wakes coalesce into however many
    /// bytes happen to be queued, and a clean drain must consume them all.
    pub fn drain(&self) -> NetResult<()> {
        let mut buf = [0u8; 64];

        loop {
            match self.net.recv(self.reader(), &mut buf) {
                Ok(0) => return Ok(()),
                Ok(_) => continue,
                Err(err) if err.is_would_block() => return Ok(()),
                Err(err) => return Err(err),
            }
        }
    }

    /// Close both ends. Idempotent.
    pub fn stop(&mut self) {
        for sock in &mut self.sockets {
            if *sock != INVALID_SOCKET {
                if let Err(err) = self.net.close(*sock) {
                    warn!(socket = *sock, error = %err, "failed to close wake pair end");
                }
                *sock = INVALID_SOCKET;
            }
        }
    }
}

impl Drop for SocketPair {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::network::SysNetwork;

    fn pair() -> (Arc<dyn Network>, SocketPair) {
        let net: Arc<dyn Network> = Arc::new(SysNetwork::new());
        let pair = SocketPair::create(Arc::clone(&net), PairMode::NonBlocking).unwrap();
        (net, pair)
    }

    #[test]
    fn drain_consumes_buffered_message() {
        let (net, pair) = pair();

        let message = b"17 bytes of wake!";
        assert_eq!(message.len(), 17);
        assert_eq!(net.send(pair.writer(), message).unwrap(), message.len());

        pair.drain().unwrap();

        // Nothing left: a second drain is a clean success, not an error.
        pair.drain().unwrap();

        let mut buf = [0u8; 8];
        assert!(net.recv(pair.reader(), &mut buf).unwrap_err().is_would_block());
    }

    #[test]
    fn write_and_read_across_the_pair() {
        let (net, pair) = pair();

        let message = b"this is a test message";
        assert_eq!(net.send(pair.writer(), message).unwrap(), message.len());

        // The kernel buffer may not be readable within a few cycles of the
        // send returning; sit on the socket until the bytes land.
        let mut data = Vec::new();
        let mut buf = [0u8; 128];
        while data.len() < message.len() {
            match net.recv(pair.reader(), &mut buf) {
                Ok(n) => data.extend_from_slice(&buf[..n]),
                Err(err) if err.is_would_block() => {
                    std::thread::sleep(std::time::Duration::from_millis(10));
                }
                Err(err) => panic!("unexpected recv failure: {err}"),
            }
        }
        assert_eq!(&data, message);
    }

    #[test]
    fn stop_is_idempotent() {
        let (_net, mut pair) = pair();
        pair.stop();
        assert_eq!(pair.reader(), INVALID_SOCKET);
        assert_eq!(pair.writer(), INVALID_SOCKET);
        pair.stop();
    }
}
