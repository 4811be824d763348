//! The `Network` syscall seam.
//!
//! The readiness core never issues socket syscalls directly; everything goes
//! through this trait so tests and alternate platforms can substitute their
//! own provider. `SysNetwork` is the standard POSIX implementation.

use crate::error::{NetError, NetResult};
use crate::socket::{Socket, INVALID_SOCKET};

use std::net::SocketAddr;

/// Which half of the connection `shutdown` applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    Read,
    Write,
    Both,
}

/// Opaque socket-operation provider consumed by the readiness core.
///
/// Payload bytes are never interpreted at this layer.
pub trait Network: Send + Sync {
    /// Create a TCP stream socket.
    fn tcp_socket(&self, ipv6: bool) -> NetResult<Socket>;

    fn connect(&self, sock: Socket, addr: SocketAddr) -> NetResult<()>;

    fn bind(&self, sock: Socket, addr: SocketAddr) -> NetResult<()>;

    fn listen(&self, sock: Socket, backlog: i32) -> NetResult<()>;

    fn accept(&self, sock: Socket) -> NetResult<Socket>;

    fn send(&self, sock: Socket, buf: &[u8]) -> NetResult<usize>;

    /// Returns `Ok(0)` on orderly peer shutdown and `Err(WouldBlock)` when a
    /// non-blocking socket has no data.
    fn recv(&self, sock: Socket, buf: &mut [u8]) -> NetResult<usize>;

    fn set_blocking(&self, sock: Socket, blocking: bool) -> NetResult<()>;

    fn close(&self, sock: Socket) -> NetResult<()>;

    fn shutdown(&self, sock: Socket, mode: ShutdownMode) -> NetResult<()>;

    /// Create a connected pair of stream sockets.
    fn socket_pair(&self) -> NetResult<(Socket, Socket)>;
}

/// Standard POSIX `Network` implementation over `libc`.
#[cfg(unix)]
#[derive(Debug, Default, Clone, Copy)]
pub struct SysNetwork;

#[cfg(unix)]
impl SysNetwork {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(unix)]
fn check_sock(sock: Socket) -> NetResult<()> {
    if sock == INVALID_SOCKET {
        return Err(NetError::InvalidSocket);
    }
    Ok(())
}

/// Convert a `SocketAddr` into a `sockaddr_storage` suitable for the kernel.
#[cfg(unix)]
fn to_sockaddr(addr: &SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
    let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };

    match addr {
        SocketAddr::V4(v4) => {
            let sin = libc::sockaddr_in {
                sin_family: libc::AF_INET as libc::sa_family_t,
                sin_port: v4.port().to_be(),
                // Octets are already in network order; preserve the layout.
                sin_addr: libc::in_addr {
                    s_addr: u32::from_ne_bytes(v4.ip().octets()),
                },
                ..unsafe { std::mem::zeroed() }
            };
            unsafe {
                std::ptr::write(&mut storage as *mut _ as *mut libc::sockaddr_in, sin);
            }
            (
                storage,
                std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        }
        SocketAddr::V6(v6) => {
            let sin6 = libc::sockaddr_in6 {
                sin6_family: libc::AF_INET6 as libc::sa_family_t,
                sin6_port: v6.port().to_be(),
                sin6_addr: libc::in6_addr {
                    s6_addr: v6.ip().octets(),
                },
                sin6_flowinfo: v6.flowinfo(),
                sin6_scope_id: v6.scope_id(),
                ..unsafe { std::mem::zeroed() }
            };
            unsafe {
                std::ptr::write(&mut storage as *mut _ as *mut libc::sockaddr_in6, sin6);
            }
            (
                storage,
                std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t,
            )
        }
    }
}

#[cfg(target_os = "linux")]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;

#[cfg(all(unix, not(target_os = "linux")))]
const SEND_FLAGS: libc::c_int = 0;

#[cfg(unix)]
impl Network for SysNetwork {
    fn tcp_socket(&self, ipv6: bool) -> NetResult<Socket> {
        let family = if ipv6 { libc::AF_INET6 } else { libc::AF_INET };
        let sock = unsafe { libc::socket(family, libc::SOCK_STREAM, 0) };
        if sock < 0 {
            return Err(NetError::last_os("failed to create socket"));
        }
        Ok(sock)
    }

    fn connect(&self, sock: Socket, addr: SocketAddr) -> NetResult<()> {
        check_sock(sock)?;
        let (storage, len) = to_sockaddr(&addr);
        let rc = unsafe {
            libc::connect(sock, &storage as *const _ as *const libc::sockaddr, len)
        };
        if rc < 0 {
            return Err(NetError::last_os("failed to connect socket"));
        }
        Ok(())
    }

    fn bind(&self, sock: Socket, addr: SocketAddr) -> NetResult<()> {
        check_sock(sock)?;
        let (storage, len) = to_sockaddr(&addr);
        let rc = unsafe {
            libc::bind(sock, &storage as *const _ as *const libc::sockaddr, len)
        };
        if rc < 0 {
            return Err(NetError::last_os("failed to bind socket"));
        }
        Ok(())
    }

    fn listen(&self, sock: Socket, backlog: i32) -> NetResult<()> {
        check_sock(sock)?;
        if unsafe { libc::listen(sock, backlog) } < 0 {
            return Err(NetError::last_os("failed to listen on socket"));
        }
        Ok(())
    }

    fn accept(&self, sock: Socket) -> NetResult<Socket> {
        check_sock(sock)?;
        let conn = unsafe { libc::accept(sock, std::ptr::null_mut(), std::ptr::null_mut()) };
        if conn < 0 {
            return Err(NetError::last_os("failed to accept connection"));
        }
        Ok(conn)
    }

    fn send(&self, sock: Socket, buf: &[u8]) -> NetResult<usize> {
        check_sock(sock)?;
        let n = unsafe {
            libc::send(sock, buf.as_ptr() as *const libc::c_void, buf.len(), SEND_FLAGS)
        };
        if n < 0 {
            return Err(NetError::last_os("failed to send on socket"));
        }
        Ok(n as usize)
    }

    fn recv(&self, sock: Socket, buf: &mut [u8]) -> NetResult<usize> {
        check_sock(sock)?;
        let n = unsafe {
            libc::recv(sock, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0)
        };
        if n < 0 {
            return Err(NetError::last_os("failed to recv on socket"));
        }
        Ok(n as usize)
    }

    fn set_blocking(&self, sock: Socket, blocking: bool) -> NetResult<()> {
        check_sock(sock)?;
        let flags = unsafe { libc::fcntl(sock, libc::F_GETFL) };
        if flags < 0 {
            return Err(NetError::last_os("failed to read socket flags"));
        }
        let flags = if blocking {
            flags & !libc::O_NONBLOCK
        } else {
            flags | libc::O_NONBLOCK
        };
        if unsafe { libc::fcntl(sock, libc::F_SETFL, flags) } < 0 {
            return Err(NetError::last_os("failed to update socket flags"));
        }
        Ok(())
    }

    fn close(&self, sock: Socket) -> NetResult<()> {
        check_sock(sock)?;
        if unsafe { libc::close(sock) } < 0 {
            return Err(NetError::last_os("failed to close socket"));
        }
        Ok(())
    }

    fn shutdown(&self, sock: Socket, mode: ShutdownMode) -> NetResult<()> {
        check_sock(sock)?;
        let how = match mode {
            ShutdownMode::Read => libc::SHUT_RD,
            ShutdownMode::Write => libc::SHUT_WR,
            ShutdownMode::Both => libc::SHUT_RDWR,
        };
        if unsafe { libc::shutdown(sock, how) } < 0 {
            return Err(NetError::last_os("failed to shutdown socket"));
        }
        Ok(())
    }

    fn socket_pair(&self) -> NetResult<(Socket, Socket)> {
        let mut fds: [Socket; 2] = [INVALID_SOCKET, INVALID_SOCKET];
        let rc = unsafe {
            libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr())
        };
        if rc < 0 {
            return Err(NetError::last_os("failed to create socket pair"));
        }
        Ok((fds[0], fds[1]))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn pair_roundtrips_bytes() {
        let net = SysNetwork::new();
        let (a, b) = net.socket_pair().unwrap();

        let written = net.send(a, b"ping").unwrap();
        assert_eq!(written, 4);

        let mut buf = [0u8; 16];
        let read = net.recv(b, &mut buf).unwrap();
        assert_eq!(&buf[..read], b"ping");

        net.close(a).unwrap();
        net.close(b).unwrap();
    }

    #[test]
    fn nonblocking_recv_reports_would_block() {
        let net = SysNetwork::new();
        let (a, b) = net.socket_pair().unwrap();
        net.set_blocking(b, false).unwrap();

        let mut buf = [0u8; 16];
        let err = net.recv(b, &mut buf).unwrap_err();
        assert!(err.is_would_block());

        net.close(a).unwrap();
        net.close(b).unwrap();
    }

    #[test]
    fn operations_reject_invalid_handle() {
        let net = SysNetwork::new();
        assert!(matches!(
            net.send(INVALID_SOCKET, b"x"),
            Err(NetError::InvalidSocket)
        ));
        assert!(matches!(
            net.close(INVALID_SOCKET),
            Err(NetError::InvalidSocket)
        ));
    }
}
