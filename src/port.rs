use std::net::{Ipv4Addr, SocketAddr};
use tokio::net::TcpSocket;

/// Whether `port` can be bound on all interfaces right now.
///
/// Binds with address reuse enabled and releases the socket immediately, so a
/// port left in TIME_WAIT by a previous child still counts as free.
pub fn is_port_available(port: u16) -> bool {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let socket = match TcpSocket::new_v4() {
        Ok(socket) => socket,
        Err(e) => {
            warn!("failed to create probe socket for port {port}: {e}");
            return false;
        }
    };
    if let Err(e) = socket.set_reuseaddr(true) {
        trace!("could not set SO_REUSEADDR on probe socket: {e}");
    }
    socket.bind(addr).is_ok()
}
