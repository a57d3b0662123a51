//! Graceful shutdown trigger for the acceptor loop.
//!
//! The acceptor blocks in `accept`, so setting a flag alone is not enough to
//! stop it. `trigger` sets the flag and then opens a throwaway connection to
//! the listener; the acceptor wakes, sees the flag and returns.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const WAKE_TIMEOUT: Duration = Duration::from_secs(1);

/// Cloneable handle that stops a running server.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    triggered: Arc<AtomicBool>,
    wake_addr: SocketAddr,
}

impl ShutdownHandle {
    /// Create a handle that wakes a listener bound to `local_addr`.
    pub fn new(local_addr: SocketAddr) -> Self {
        Self {
            triggered: Arc::new(AtomicBool::new(false)),
            wake_addr: wake_addr(local_addr),
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Request shutdown. Only the first call has any effect.
    pub fn trigger(&self) {
        if self.triggered.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutdown requested, stopping acceptor");

        // The acceptor drops this connection unanswered.
        match TcpStream::connect_timeout(&self.wake_addr, WAKE_TIMEOUT) {
            Ok(_) => {}
            Err(e) => debug!(addr = %self.wake_addr, error = %e, "Wake-up connection failed"),
        }
    }
}

/// A wildcard bind address is not connectable; use loopback instead.
fn wake_addr(local_addr: SocketAddr) -> SocketAddr {
    let ip = match local_addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    SocketAddr::new(ip, local_addr.port())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_wake_addr_replaces_wildcard() {
        assert_eq!(
            wake_addr("0.0.0.0:5050".parse().unwrap()),
            "127.0.0.1:5050".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            wake_addr("[::]:5050".parse().unwrap()),
            "[::1]:5050".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            wake_addr("10.1.2.3:80".parse().unwrap()),
            "10.1.2.3:80".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn test_trigger_connects_once() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let handle = ShutdownHandle::new(listener.local_addr().unwrap());
        let clone = handle.clone();

        assert!(!handle.is_triggered());
        clone.trigger();
        assert!(handle.is_triggered());

        // The wake-up connection is waiting in the backlog.
        let (_stream, _) = listener.accept().unwrap();

        // A second trigger does not connect again.
        clone.trigger();
        listener.set_nonblocking(true).unwrap();
        assert!(listener.accept().is_err());
    }
}
