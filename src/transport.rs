//! The UDP datagram wrapper: a non-blocking socket behind a trait, so the
//! engine can be driven with a fake transport in tests (spec.md section 8).
//! Grounded on `Socket.h`/`Socket.cpp` and `Phone.cpp`'s `recvfrom`/`sendto`
//! usage in `run()`.

use std::io;
use std::net::{SocketAddr, UdpSocket};

use crate::addr::PeerAddr;
use crate::config::{PORT_DEFAULT, PORT_MAX};
use crate::error::TransportError;
use crate::protocol::MAX_PACKET_BYTES;

pub trait DatagramTransport: Send {
    /// Non-blocking send. A transient `EWOULDBLOCK` is swallowed (matches
    /// `Phone.cpp::sendPacket`'s tolerance of that one errno).
    fn send_to(&self, datagram: &[u8], to: PeerAddr) -> Result<(), TransportError>;

    /// Drain one pending datagram, if any. `Ok(None)` means "nothing to
    /// read right now" (`EWOULDBLOCK`), matching `Phone.cpp::run()`'s
    /// `break` on that errno.
    fn recv_from(&self) -> Result<Option<(Vec<u8>, PeerAddr)>, TransportError>;

    fn local_port(&self) -> u16;
}

/// Try binding ports `start..=max` in order, returning the first bound port.
/// Only `EADDRINUSE` advances to the next port; any other bind error is
/// reported immediately rather than retried (`Phone.cpp::startup` at
/// `Phone.cpp:135-136` throws right away on anything but `EADDRINUSE`).
/// Kept as a free function over a plain closure so the retry/ceiling logic
/// can be unit-tested without a real socket.
pub fn bind_with_retry<F: FnMut(u16) -> io::Result<()>>(
    mut try_bind: F,
    start: u16,
    max: u16,
) -> Result<u16, TransportError> {
    debug_assert!(start <= max);
    for port in start..=max {
        match try_bind(port) {
            Ok(()) => return Ok(port),
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => continue,
            Err(e) => return Err(TransportError::Bind { port, source: e }),
        }
    }
    Err(TransportError::PortRangeExhausted)
}

pub struct RealSocket {
    socket: UdpSocket,
    port: u16,
}

impl RealSocket {
    /// Bind the first free port in `PORT_DEFAULT..=PORT_MAX`.
    pub fn bind() -> Result<Self, TransportError> {
        Self::bind_range(PORT_DEFAULT, PORT_MAX)
    }

    /// Bind the first free port in `start..=max`. A single-port range
    /// (`start == max`) is how `--local-port` pins an exact port.
    pub fn bind_range(start: u16, max: u16) -> Result<Self, TransportError> {
        let mut bound: Option<UdpSocket> = None;
        let port = bind_with_retry(
            |port| {
                let addr: SocketAddr = ([0, 0, 0, 0], port).into();
                let socket = UdpSocket::bind(addr)?;
                socket.set_nonblocking(true)?;
                bound = Some(socket);
                Ok(())
            },
            start,
            max,
        )?;
        Ok(RealSocket {
            socket: bound.expect("bind_with_retry only returns Ok after a successful bind"),
            port,
        })
    }
}

impl DatagramTransport for RealSocket {
    fn send_to(&self, datagram: &[u8], to: PeerAddr) -> Result<(), TransportError> {
        let target: SocketAddr = to.into();
        match self.socket.send_to(datagram, target) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => classify_send_error(e),
        }
    }

    fn recv_from(&self) -> Result<Option<(Vec<u8>, PeerAddr)>, TransportError> {
        let mut buf = [0u8; MAX_PACKET_BYTES];
        match self.socket.recv_from(&mut buf) {
            Ok((len, from)) => {
                if len >= MAX_PACKET_BYTES {
                    // possibly truncated; cannot tell apart from an exact
                    // max-size AUDIO packet, so discard (DESIGN.md decision).
                    return Ok(None);
                }
                Ok(Some((buf[..len].to_vec(), PeerAddr::from(from))))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => classify_recv_error(e),
        }
    }

    fn local_port(&self) -> u16 {
        self.port
    }
}

fn classify_send_error<T>(e: io::Error) -> Result<T, TransportError> {
    match e.kind() {
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
            Err(TransportError::ConnReset)
        }
        _ => Err(TransportError::Send(e)),
    }
}

fn classify_recv_error<T>(e: io::Error) -> Result<T, TransportError> {
    match e.kind() {
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
            Err(TransportError::ConnReset)
        }
        _ => Err(TransportError::Recv(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[test]
    fn bind_with_retry_finds_first_free_port() {
        let port = bind_with_retry(
            |port| {
                if port < 56782 {
                    Err(io::Error::from(io::ErrorKind::AddrInUse))
                } else {
                    Ok(())
                }
            },
            56780,
            56789,
        )
        .unwrap();
        assert_eq!(port, 56782);
    }

    #[test]
    fn bind_with_retry_exhausts_range() {
        let result = bind_with_retry(
            |_| Err(io::Error::from(io::ErrorKind::AddrInUse)),
            56780,
            56789,
        );
        assert!(matches!(result, Err(TransportError::PortRangeExhausted)));
    }

    #[test]
    fn bind_with_retry_propagates_non_addrinuse_error_immediately() {
        let mut attempts = 0;
        let result = bind_with_retry(
            |port| {
                attempts += 1;
                assert_eq!(port, 56780, "must not try a second port");
                Err(io::Error::from(io::ErrorKind::PermissionDenied))
            },
            56780,
            56789,
        );
        assert_eq!(attempts, 1);
        match result {
            Err(TransportError::Bind { port, source }) => {
                assert_eq!(port, 56780);
                assert_eq!(source.kind(), io::ErrorKind::PermissionDenied);
            }
            other => panic!("expected TransportError::Bind, got {other:?}"),
        }
    }

    /// A fake transport for engine-level tests: a queue of inbound
    /// datagrams and a record of what was sent.
    pub struct FakeTransport {
        pub inbound: Mutex<VecDeque<(Vec<u8>, PeerAddr)>>,
        pub sent: Mutex<Vec<(Vec<u8>, PeerAddr)>>,
        pub port: u16,
    }

    impl DatagramTransport for FakeTransport {
        fn send_to(&self, datagram: &[u8], to: PeerAddr) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push((datagram.to_vec(), to));
            Ok(())
        }

        fn recv_from(&self) -> Result<Option<(Vec<u8>, PeerAddr)>, TransportError> {
            Ok(self.inbound.lock().unwrap().pop_front())
        }

        fn local_port(&self) -> u16 {
            self.port
        }
    }

    #[test]
    fn fake_transport_records_sends() {
        let fake = FakeTransport {
            inbound: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            port: 56780,
        };
        let to = PeerAddr::V4(std::net::Ipv4Addr::new(10, 0, 0, 1), 56780);
        fake.send_to(&[1, 2, 3], to).unwrap();
        assert_eq!(fake.sent.lock().unwrap().len(), 1);
    }
}
