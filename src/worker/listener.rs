//! Listener export (component B).
//!
//! Binds one shared listening socket and clones its file descriptor into
//! each worker's own `tokio::net::TcpListener`, so every worker thread
//! calls `accept()` directly against the shared kernel backlog. This
//! replaces the source's main-loop/pipe rendezvous: libuv has no native
//! way to hand one listening socket to several independent loops, but a
//! cloned file descriptor gives every Tokio worker its own listener on the
//! same backlog with no extra hop.

use std::net::SocketAddr;

use socket2::{Domain, Socket, Type};

use crate::error::{GatewayError, Result};

/// Bind the shared listening socket once, in non-blocking mode, ready to
/// be cloned into each worker.
pub fn bind(addr: SocketAddr, backlog: u32) -> Result<Socket> {
    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::STREAM, None)
        .map_err(|source| GatewayError::Listen { addr, source })?;
    socket.set_reuse_address(true).map_err(|source| GatewayError::Listen { addr, source })?;
    socket.set_nonblocking(true).map_err(|source| GatewayError::Listen { addr, source })?;
    socket.bind(&addr.into()).map_err(|source| GatewayError::Listen { addr, source })?;
    socket
        .listen(backlog as i32)
        .map_err(|source| GatewayError::Listen { addr, source })?;
    Ok(socket)
}

/// Clone the shared socket's file descriptor into a fresh `std::net::TcpListener`
/// suitable for handing to `tokio::net::TcpListener::from_std` on a worker.
pub fn clone_for_worker(shared: &Socket) -> Result<std::net::TcpListener> {
    let local_addr = shared
        .local_addr()
        .ok()
        .and_then(|a| a.as_socket())
        .unwrap_or_else(|| "0.0.0.0:0".parse().unwrap());
    let cloned = shared
        .try_clone()
        .map_err(|source| GatewayError::Listen { addr: local_addr, source })?;
    Ok(cloned.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_then_clone_preserves_local_address() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let shared = bind(addr, 16).unwrap();
        let bound_addr = shared.local_addr().unwrap().as_socket().unwrap();
        let cloned = clone_for_worker(&shared).unwrap();
        assert_eq!(cloned.local_addr().unwrap(), bound_addr);
    }
}
