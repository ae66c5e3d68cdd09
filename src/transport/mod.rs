//! TCP/UDP client transport with optional TLS.
//!
//! The only place this crate touches the operating system: name
//! resolution, non-blocking connect, readiness polling, TLS handshake
//! with certificate and hostname verification, and graceful shutdown.
//!
//! All blocking entry points (`send`, `receive`, `poll`) are bounded by
//! the shared timeout: -1 blocks forever, 0 never waits.

mod sys;

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs, UdpSocket};
use std::os::unix::io::FromRawFd;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use native_tls::{HandshakeError, Protocol, TlsConnector, TlsStream};

use crate::error::{Error, TransportError};

/// Default `receive` buffer size.
pub const DEFAULT_RECV_SIZE: usize = 4096;

/// How long `close` lingers on read waiting for the peer to finish.
const CLOSE_LINGER: Duration = Duration::from_secs(2);

#[derive(Clone)]
struct Config {
    hostname: String,
    port: u16,
    use_tls: bool,
    use_udp: bool,
    verify_certs: bool,
}

enum Stream {
    Tcp(TcpStream),
    Tls(TlsStream<TcpStream>),
    Udp(UdpSocket),
}

impl Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.read(buf),
            Stream::Tls(s) => s.read(buf),
            Stream::Udp(s) => s.recv(buf),
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.write(buf),
            Stream::Tls(s) => s.write(buf),
            Stream::Udp(s) => s.send(buf),
        }
    }

    fn shutdown_write(&mut self) -> io::Result<()> {
        match self {
            Stream::Tcp(s) => s.shutdown(Shutdown::Write),
            Stream::Tls(s) => s.get_ref().shutdown(Shutdown::Write),
            Stream::Udp(_) => Ok(()),
        }
    }
}

struct IoState {
    stream: Option<Stream>,
    // bytes pulled off the wire by a liveness probe, served to the next read
    pushback: VecDeque<u8>,
}

enum ReadOutcome {
    Data(Vec<u8>),
    WouldBlock,
    Eof,
    Failed(io::Error),
}

fn read_stream(stream: &mut Stream, max: usize) -> ReadOutcome {
    let mut buf = vec![0u8; max];
    match stream.read(&mut buf) {
        Ok(0) => ReadOutcome::Eof,
        Ok(n) => {
            buf.truncate(n);
            ReadOutcome::Data(buf)
        }
        Err(e)
            if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::Interrupted =>
        {
            ReadOutcome::WouldBlock
        }
        Err(e) => ReadOutcome::Failed(e),
    }
}

/// A client connection to one named endpoint: TCP or UDP, optionally
/// wrapped in TLS.
///
/// At most one connection is active at a time. Mutators are serialized
/// internally, the timeout is atomic so it can be flipped mid-operation,
/// and `poll` never takes a lock, so one thread may wait for readiness
/// while another performs I/O.
pub struct Transport {
    config: Mutex<Config>,
    io: Mutex<IoState>,
    fd: AtomicI32,
    connected: AtomicBool,
    timeout: AtomicI32,
}

impl Transport {
    /// New, unconnected transport.
    pub fn new(hostname: &str, port: u16, use_tls: bool, use_udp: bool) -> Self {
        Self {
            config: Mutex::new(Config {
                hostname: hostname.to_string(),
                port,
                use_tls,
                use_udp,
                verify_certs: true,
            }),
            io: Mutex::new(IoState {
                stream: None,
                pushback: VecDeque::new(),
            }),
            fd: AtomicI32::new(sys::INVALID_FD),
            connected: AtomicBool::new(false),
            timeout: AtomicI32::new(-1),
        }
    }

    /// Whether the peer is still believed reachable. Cleared the first
    /// time a read observes end-of-stream.
    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Current timeout in milliseconds (-1 blocks forever, 0 never waits).
    pub fn timeout(&self) -> i32 {
        self.timeout.load(Ordering::Acquire)
    }

    pub fn set_timeout(&self, milliseconds: i32) {
        self.timeout.store(milliseconds, Ordering::Release);
    }

    /// Blocking maps to a -1 timeout, non-blocking to 0.
    pub fn set_blocking(&self, blocking: bool) {
        self.set_timeout(if blocking { -1 } else { 0 });
    }

    pub fn set_hostname(&self, hostname: &str) {
        self.config.lock().unwrap().hostname = hostname.to_string();
    }

    pub fn set_port(&self, port: u16) {
        self.config.lock().unwrap().port = port;
    }

    pub fn set_use_tls(&self, use_tls: bool) {
        self.config.lock().unwrap().use_tls = use_tls;
    }

    pub fn set_verify_certs(&self, verify: bool) {
        self.config.lock().unwrap().verify_certs = verify;
    }

    /// Connect to the configured endpoint.
    ///
    /// Returns `Ok(false)` when there is nothing to do (no endpoint
    /// configured, or already connected). Resolution, connect, TLS
    /// handshake and certificate verification failures are errors.
    pub fn connect(&self) -> Result<bool, Error> {
        sys::ignore_sigpipe();

        let cfg = self.config.lock().unwrap().clone();
        if cfg.hostname.is_empty() || cfg.port == 0 || self.connected() {
            return Ok(false);
        }
        if cfg.use_udp && cfg.use_tls {
            return Err(TransportError::DtlsUnsupported.into());
        }

        let addrs = (cfg.hostname.as_str(), cfg.port)
            .to_socket_addrs()
            .map_err(TransportError::Resolve)?;

        let mut fd = sys::INVALID_FD;
        for addr in addrs {
            match sys::connect_start(&addr, cfg.use_udp) {
                Ok(f) => {
                    fd = f;
                    break;
                }
                Err(e) => log::debug!("connect candidate {} failed: {}", addr, e),
            }
        }
        if fd < 0 {
            return Err(TransportError::NoUsableAddress.into());
        }

        if !cfg.use_udp {
            // wait for the background connect to settle, then read its verdict
            sys::wait_ready(fd, false, true, -1);
            if let Err(e) = sys::take_socket_error(fd) {
                unsafe { libc::close(fd) };
                return Err(TransportError::ConnectFailed(e).into());
            }
        }

        let stream = if cfg.use_udp {
            Stream::Udp(unsafe { UdpSocket::from_raw_fd(fd) })
        } else {
            let tcp = unsafe { TcpStream::from_raw_fd(fd) };
            if cfg.use_tls {
                Stream::Tls(self.tls_handshake(&cfg, fd, tcp)?)
            } else {
                Stream::Tcp(tcp)
            }
        };

        let mut io = self.io.lock().unwrap();
        io.stream = Some(stream);
        io.pushback.clear();
        self.fd.store(fd, Ordering::Release);
        self.connected.store(true, Ordering::Release);

        log::debug!("connected to {}:{}", cfg.hostname, cfg.port);
        Ok(true)
    }

    fn tls_handshake(
        &self,
        cfg: &Config,
        fd: i32,
        tcp: TcpStream,
    ) -> Result<TlsStream<TcpStream>, Error> {
        let connector = TlsConnector::builder()
            .min_protocol_version(Some(Protocol::Tlsv12))
            .danger_accept_invalid_certs(!cfg.verify_certs)
            .danger_accept_invalid_hostnames(!cfg.verify_certs)
            .build()
            .map_err(TransportError::Tls)?;

        // SNI and hostname identity checking both key off `cfg.hostname`
        let mut pending = match connector.connect(&cfg.hostname, tcp) {
            Ok(tls) => return Ok(tls),
            Err(HandshakeError::Failure(e)) => return Err(TransportError::Tls(e).into()),
            Err(HandshakeError::WouldBlock(mid)) => mid,
        };

        // the socket is non-blocking; retry while the handshake wants I/O
        loop {
            sys::wait_ready(fd, true, true, self.timeout());
            match pending.handshake() {
                Ok(tls) => return Ok(tls),
                Err(HandshakeError::Failure(e)) => return Err(TransportError::Tls(e).into()),
                Err(HandshakeError::WouldBlock(mid)) => pending = mid,
            }
        }
    }

    /// Send as much of `data` as the socket accepts right now.
    ///
    /// Waits for writability up to the timeout and returns 0 when it
    /// expires; partial writes are expected, callers loop re-submitting
    /// the unsent tail.
    pub fn send(&self, data: &[u8]) -> Result<usize, Error> {
        if data.len() > i32::MAX as usize {
            return Err(TransportError::PayloadTooLarge.into());
        }
        if !self.connected() {
            return Err(TransportError::NotConnected.into());
        }
        if data.is_empty() || !self.poll(false, true) {
            return Ok(0);
        }

        let mut io = self.io.lock().unwrap();
        let stream = match io.stream.as_mut() {
            Some(s) => s,
            None => return Err(TransportError::NotConnected.into()),
        };

        match stream.write(data) {
            Ok(0) => {
                self.connected.store(false, Ordering::Release);
                Ok(0)
            }
            Ok(n) => Ok(n),
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                Ok(0)
            }
            Err(e) => {
                self.connected.store(false, Ordering::Release);
                Err(e.into())
            }
        }
    }

    /// Receive up to `max` bytes (an empty result is a timeout or a
    /// transient retry condition, not an error).
    ///
    /// Bytes already decrypted and buffered inside the TLS layer are
    /// surfaced by a first non-blocking read before any readiness wait.
    /// End-of-stream clears `connected` and returns whatever arrived.
    ///
    /// `receive(0)` is a liveness probe: it still performs the readiness
    /// check and a probe read, so a silent disconnect is discovered.
    pub fn receive(&self, max: usize) -> Result<Vec<u8>, Error> {
        if max > i32::MAX as usize {
            return Err(TransportError::BufferTooLarge.into());
        }
        if !self.connected() {
            return Err(TransportError::NotConnected.into());
        }

        let timeout = self.timeout();
        let mut io = self.io.lock().unwrap();

        if max == 0 {
            self.probe(&mut io, timeout);
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        while out.len() < max {
            match io.pushback.pop_front() {
                Some(b) => out.push(b),
                None => break,
            }
        }
        if out.len() == max {
            return Ok(out);
        }

        match io.stream.as_mut() {
            Some(stream) => match read_stream(stream, max - out.len()) {
                ReadOutcome::Data(mut chunk) => {
                    out.append(&mut chunk);
                    return Ok(out);
                }
                ReadOutcome::WouldBlock => {}
                ReadOutcome::Eof => {
                    self.connected.store(false, Ordering::Release);
                    return Ok(out);
                }
                ReadOutcome::Failed(e) => return Err(e.into()),
            },
            None => return Err(TransportError::NotConnected.into()),
        }
        if !out.is_empty() {
            return Ok(out);
        }

        // nothing buffered anywhere; wait for the socket, then read once
        drop(io);
        sys::wait_ready(self.fd.load(Ordering::Acquire), true, false, timeout);
        let mut io = self.io.lock().unwrap();

        match io.stream.as_mut() {
            Some(stream) => match read_stream(stream, max) {
                ReadOutcome::Data(chunk) => Ok(chunk),
                ReadOutcome::WouldBlock => Ok(Vec::new()),
                ReadOutcome::Eof => {
                    self.connected.store(false, Ordering::Release);
                    Ok(Vec::new())
                }
                ReadOutcome::Failed(e) => Err(e.into()),
            },
            None => Ok(Vec::new()),
        }
    }

    /// Return already-read bytes to the front of the receive path; the
    /// next `receive` serves them before touching the socket.
    pub(crate) fn unread(&self, bytes: &[u8]) {
        self.io.lock().unwrap().pushback.extend(bytes.iter().copied());
    }

    fn probe(&self, io: &mut IoState, timeout: i32) {
        let fd = self.fd.load(Ordering::Acquire);
        if sys::wait_ready(fd, true, false, timeout) == 0 {
            return;
        }
        if matches!(io.stream, Some(Stream::Udp(_))) {
            // datagrams have no end-of-stream to discover
            return;
        }
        if let Some(stream) = io.stream.as_mut() {
            match read_stream(stream, 1) {
                ReadOutcome::Data(bytes) => io.pushback.extend(bytes),
                ReadOutcome::WouldBlock => {}
                ReadOutcome::Eof | ReadOutcome::Failed(_) => {
                    self.connected.store(false, Ordering::Release);
                }
            }
        }
    }

    /// Wait for the requested readiness with the current timeout.
    ///
    /// True only when every requested bit is set and none of the
    /// error/hang-up bits are. Requesting nothing returns false.
    pub fn poll(&self, want_read: bool, want_write: bool) -> bool {
        self.poll_ready(want_read, want_write, self.timeout())
    }

    pub(crate) fn poll_ready(&self, want_read: bool, want_write: bool, timeout_ms: i32) -> bool {
        if !want_read && !want_write {
            return false;
        }
        let fd = self.fd.load(Ordering::Acquire);
        if fd < 0 {
            return false;
        }

        let revents = sys::wait_ready(fd, want_read, want_write, timeout_ms);
        if revents == 0 {
            return false;
        }

        (!want_read || revents & libc::POLLIN != 0)
            && (!want_write || revents & libc::POLLOUT != 0)
            && revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) == 0
    }

    /// Tear the connection down.
    ///
    /// TCP connections get a graceful close: write-half shutdown, then a
    /// bounded linger-on-read draining until the peer closes its side.
    /// UDP close is immediate.
    pub fn close(&self) {
        let use_udp = self.config.lock().unwrap().use_udp;
        let fd = self.fd.load(Ordering::Acquire);
        let mut io = self.io.lock().unwrap();

        if self.connected() && !use_udp {
            if let Some(stream) = io.stream.as_mut() {
                let _ = stream.shutdown_write();

                let deadline = Instant::now() + CLOSE_LINGER;
                while Instant::now() < deadline {
                    if sys::wait_ready(fd, true, false, 100) == 0 {
                        continue;
                    }
                    match read_stream(stream, DEFAULT_RECV_SIZE) {
                        ReadOutcome::Data(_) | ReadOutcome::WouldBlock => continue,
                        // peer finished its half, or gave up
                        ReadOutcome::Eof | ReadOutcome::Failed(_) => break,
                    }
                }
            }
        }

        io.stream = None;
        io.pushback.clear();
        self.fd.store(sys::INVALID_FD, Ordering::Release);
        self.connected.store(false, Ordering::Release);
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn poll_nothing_is_false() {
        let t = Transport::new("localhost", 1, false, false);
        assert!(!t.poll(false, false));
        assert!(!t.poll(true, false));
    }

    #[test]
    fn unconfigured_connect_is_noop() {
        let t = Transport::new("", 0, false, false);
        assert!(!t.connect().unwrap());
        assert!(!t.connected());
    }

    #[test]
    fn dtls_is_rejected() {
        let t = Transport::new("localhost", 1, true, true);
        assert!(matches!(
            t.connect(),
            Err(Error::Transport(TransportError::DtlsUnsupported))
        ));
    }

    #[test]
    fn send_when_closed_errors() {
        let t = Transport::new("localhost", 1, false, false);
        assert!(matches!(
            t.send(b"hello"),
            Err(Error::Transport(TransportError::NotConnected))
        ));
    }

    #[test]
    fn oversized_receive_is_rejected() {
        let t = Transport::new("localhost", 1, false, false);
        assert!(matches!(
            t.receive(i32::MAX as usize + 1),
            Err(Error::Transport(TransportError::BufferTooLarge))
        ));
    }

    #[test]
    fn blocking_maps_to_timeout() {
        let t = Transport::new("localhost", 1, false, false);
        assert_eq!(t.timeout(), -1);
        t.set_blocking(false);
        assert_eq!(t.timeout(), 0);
        t.set_timeout(250);
        assert_eq!(t.timeout(), 250);
        t.set_blocking(true);
        assert_eq!(t.timeout(), -1);
    }
}
