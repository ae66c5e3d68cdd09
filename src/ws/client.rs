use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::error::{Error, WsError};
use crate::http;
use crate::transport::{Transport, DEFAULT_RECV_SIZE};
use crate::uri::Uri;

use super::frame::{self, mask, FrameHead, OpCode};
use super::handshake;
use super::{Message, MessageCallback, MessageKind, Status};

/// Interval between keep-alive pings.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Close handshake grace period before a unilateral disconnect.
const CLOSE_GRACE: Duration = Duration::from_secs(120);

/// Consecutive unanswered pings that force a disconnect.
const MAX_MISSED_HEARTBEATS: u8 = 3;

/// Payload carried by keep-alive pings. A pong echoing it is consumed
/// silently instead of being delivered.
const HEARTBEAT_PAYLOAD: &[u8] = b"--heartbeat--";

/// How long the main loop idles before re-checking deadlines.
const IDLE_TICK: Duration = Duration::from_millis(500);

/// Reader thread poll slice; keeps shutdown responsive.
const READ_POLL_MS: i32 = 1000;

/// Worker-to-worker signal: set-and-notify with at most one pending
/// token, so repeated sets coalesce.
struct Signal {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl Signal {
    fn new() -> Self {
        let (tx, rx) = bounded(1);
        Self { tx, rx }
    }

    fn set(&self) {
        let _ = self.tx.try_send(());
    }

    /// Wait for a token up to `timeout`; true when signaled.
    fn wait(&self, timeout: Duration) -> bool {
        self.rx.recv_timeout(timeout).is_ok()
    }

    fn drain(&self) {
        while self.rx.try_recv().is_ok() {}
    }
}

#[derive(Default)]
struct ConnState {
    // partial multi-frame message being reassembled
    read_buffer: Vec<u8>,
    fragment_kind: Option<MessageKind>,
    // a lone byte left over from the previous parse; too short to hold a head
    carry: Option<u8>,
    // fully framed octet strings awaiting the wire, FIFO
    write_queue: VecDeque<Vec<u8>>,
    client_sent_close: bool,
    server_sent_close: bool,
    close_deadline: Option<Instant>,
    // the peer's close, stored for delivery at disconnect time
    close_message: Option<Message>,
}

struct Inner {
    http: http::Client,
    transport: Arc<Transport>,
    status: AtomicU8,
    reconnect: AtomicBool,
    missed_heartbeats: AtomicU8,
    url: Mutex<String>,
    callback: Mutex<Option<MessageCallback>>,
    state: Mutex<ConnState>,

    // reader/heartbeat only ever signal; the main loop is the sole I/O actor
    activity: Signal,
    read_resume: Signal,
    heartbeat_sent: Signal,
    heartbeat_wake: Signal,
}

impl Inner {
    fn new(url: &str) -> Self {
        let http = http::Client::new();
        let transport = http.transport().clone();
        Self {
            http,
            transport,
            status: AtomicU8::new(Status::Closed as u8),
            reconnect: AtomicBool::new(true),
            missed_heartbeats: AtomicU8::new(0),
            url: Mutex::new(url.to_string()),
            callback: Mutex::new(None),
            state: Mutex::new(ConnState::default()),
            activity: Signal::new(),
            read_resume: Signal::new(),
            heartbeat_sent: Signal::new(),
            heartbeat_wake: Signal::new(),
        }
    }

    fn status(&self) -> Status {
        Status::from_u8(self.status.load(Ordering::Acquire))
    }

    fn set_status(&self, status: Status) {
        self.status.store(status as u8, Ordering::Release);
    }

    /// Invoke the message callback, if any. The callback is cloned out
    /// of its lock first, so it may freely re-enter `send` or `close`.
    fn dispatch(&self, message: &Message) {
        let cb = self.callback.lock().unwrap().clone();
        if let Some(cb) = cb {
            cb(message);
        }
    }

    /// The blocking connect-and-pump loop; re-entered by the reconnect
    /// supervisor for as long as reconnection stays enabled.
    fn run(&self) -> Result<(), Error> {
        loop {
            if !self.connect()? {
                return Ok(());
            }

            thread::scope(|s| {
                s.spawn(|| self.heartbeat_loop());
                s.spawn(|| self.reader_loop());

                let url = self.url.lock().unwrap().clone();
                self.dispatch(&Message {
                    kind: MessageKind::Open,
                    data: format!("Connected to: {}", url).into_bytes(),
                    code: 0,
                });

                while self.status() != Status::Closed {
                    self.activity.wait(IDLE_TICK);
                    self.pump();
                }
            });

            if !self.reconnect.load(Ordering::Acquire) {
                return Ok(());
            }
            log::debug!("connection closed, reconnecting");
        }
    }

    fn connect(&self) -> Result<bool, Error> {
        if matches!(self.status(), Status::Connecting | Status::Open) {
            return Ok(false);
        }

        let url = self.url.lock().unwrap().clone();
        if url.is_empty() {
            return Err(WsError::UrlNotSet.into());
        }

        let mut uri = Uri::parse(&url);
        if uri.scheme != "ws" && uri.scheme != "wss" {
            return Err(WsError::InvalidScheme(uri.scheme).into());
        }

        self.set_status(Status::Connecting);
        // the upgrade response must be waited for, not drained
        self.transport.set_blocking(true);

        match self.upgrade(&mut uri) {
            Ok(true) => {
                self.activity.drain();
                self.read_resume.drain();
                self.heartbeat_sent.drain();
                self.heartbeat_wake.drain();
                self.state.lock().unwrap().carry = None;
                self.missed_heartbeats.store(0, Ordering::Release);

                // from here on the main loop drains instead of blocking;
                // the reader thread supplies the waiting
                self.transport.set_timeout(0);
                self.set_status(Status::Open);
                log::debug!("websocket open: {}", url);
                Ok(true)
            }
            Ok(false) => {
                self.set_status(Status::Closed);
                Ok(false)
            }
            Err(e) => {
                self.set_status(Status::Closed);
                Err(e)
            }
        }
    }

    /// Issue the upgrade GET and validate the 101 response.
    fn upgrade(&self, uri: &mut Uri) -> Result<bool, Error> {
        uri.scheme = if uri.scheme == "ws" { "http" } else { "https" }.to_string();

        let key = handshake::new_sec_key();
        let headers: http::Headers = [
            ("Connection", "Upgrade"),
            ("Upgrade", "websocket"),
            ("Sec-WebSocket-Version", "13"),
            ("Sec-WebSocket-Key", key.as_str()),
        ]
        .into_iter()
        .collect();

        let res = self.http.get(&uri.to_string(), &headers, b"", false, None)?;

        if res.status_code != 101 {
            log::warn!("upgrade refused with status {}", res.status_code);
            return Ok(false);
        }

        let upgrade_ok = res
            .headers
            .get("Upgrade")
            .map(|v| v.eq_ignore_ascii_case("websocket"))
            .unwrap_or(false);
        let connection_ok = res
            .headers
            .get("Connection")
            .map(|v| v.eq_ignore_ascii_case("upgrade"))
            .unwrap_or(false);
        let accept = handshake::derive_accept_key(&key);
        let accept_ok = res.headers.get("Sec-WebSocket-Accept") == Some(accept.as_str());

        if !upgrade_ok || !connection_ok || !accept_ok {
            log::warn!("upgrade response failed validation");
            return Ok(false);
        }
        Ok(true)
    }

    /// One main-loop turn: drain inbound frames, settle the close
    /// handshake, flush outbound frames.
    fn pump(&self) {
        if self.status() == Status::Closed {
            return;
        }

        loop {
            match self.transport.receive(DEFAULT_RECV_SIZE) {
                Ok(data) if data.is_empty() => break,
                Ok(data) => {
                    if !self.process_data(data) {
                        return;
                    }
                }
                Err(e) => {
                    log::warn!("receive failed: {}", e);
                    self.disconnect(Message::close_with_reason(
                        "No longer connected to the socket.",
                    ));
                    return;
                }
            }
        }

        let trigger = {
            let st = self.state.lock().unwrap();
            if st.client_sent_close && st.server_sent_close {
                Some("Mutual disconnection.")
            } else if st.client_sent_close
                && st.close_deadline.map(|d| Instant::now() > d).unwrap_or(false)
            {
                Some("Connection closed because server took too long to send close frame.")
            } else if !self.transport.connected() {
                Some("No longer connected to the socket.")
            } else {
                None
            }
        };
        if let Some(reason) = trigger {
            let stored = self.state.lock().unwrap().close_message.take();
            self.disconnect(stored.unwrap_or_else(|| Message::close_with_reason(reason)));
            return;
        }

        loop {
            let frame = {
                let mut st = self.state.lock().unwrap();
                if st.client_sent_close {
                    // nothing enqueued after a sent close may leave
                    st.write_queue.clear();
                    break;
                }
                st.write_queue.pop_front()
            };
            let Some(frame) = frame else { break };

            let mut sent = 0;
            while sent < frame.len() {
                match self.transport.send(&frame[sent..]) {
                    Ok(0) => {
                        self.transport.poll_ready(false, true, 50);
                    }
                    Ok(n) => sent += n,
                    Err(e) => {
                        log::warn!("send failed: {}", e);
                        self.disconnect(Message::close_with_reason(
                            "No longer connected to the socket.",
                        ));
                        return;
                    }
                }
            }

            let opcode = frame.first().map(|b| b & 0x0f);
            if opcode == Some(OpCode::Close as u8) {
                // nothing queued behind a close may ever be sent
                let mut st = self.state.lock().unwrap();
                st.client_sent_close = true;
                st.close_deadline = Some(Instant::now() + CLOSE_GRACE);
                st.write_queue.clear();
            } else if opcode == Some(OpCode::Ping as u8) {
                self.heartbeat_sent.set();
            }
        }

        self.read_resume.set();
    }

    /// Parse frames out of a receive buffer, fetching the tail of an
    /// incomplete frame from the transport. False means the connection
    /// died mid-frame and has been torn down.
    fn process_data(&self, data: Vec<u8>) -> bool {
        let mut data = match self.state.lock().unwrap().carry.take() {
            Some(b) => {
                let mut v = Vec::with_capacity(data.len() + 1);
                v.push(b);
                v.extend_from_slice(&data);
                v
            }
            None => data,
        };

        loop {
            if data.len() < 2 {
                if data.len() == 1 {
                    self.state.lock().unwrap().carry = Some(data[0]);
                }
                return true;
            }

            let header_len = FrameHead::header_len([data[0], data[1]]);
            while data.len() < header_len {
                let need = header_len - data.len();
                if !self.fetch_more(&mut data, need) {
                    return false;
                }
            }
            let Some((head, header_len)) = FrameHead::decode(&data) else {
                return true;
            };

            let total = header_len + head.payload_len as usize;
            while data.len() < total {
                let need = total - data.len();
                if !self.fetch_more(&mut data, need) {
                    return false;
                }
            }

            let mut payload = data[header_len..total].to_vec();
            if let Some(key) = head.mask {
                mask::apply_mask(key, &mut payload);
            }

            self.handle_frame(&head, payload);

            data.drain(..total);
            if data.len() == 1 {
                self.state.lock().unwrap().carry = Some(data[0]);
                return true;
            }
            if data.is_empty() {
                return true;
            }
        }
    }

    fn fetch_more(&self, data: &mut Vec<u8>, needed: usize) -> bool {
        loop {
            match self.transport.receive(needed) {
                Ok(chunk) if chunk.is_empty() => {
                    if !self.transport.connected() {
                        self.disconnect(Message::close_with_reason(
                            "No longer connected to the socket.",
                        ));
                        return false;
                    }
                    self.transport.poll_ready(true, false, READ_POLL_MS);
                }
                Ok(mut chunk) => {
                    data.append(&mut chunk);
                    return true;
                }
                Err(e) => {
                    log::warn!("receive failed: {}", e);
                    self.disconnect(Message::close_with_reason(
                        "No longer connected to the socket.",
                    ));
                    return false;
                }
            }
        }
    }

    fn handle_frame(&self, head: &FrameHead, payload: Vec<u8>) {
        match OpCode::from_u4(head.opcode) {
            Some(OpCode::Text) | Some(OpCode::Binary) | Some(OpCode::Continuation) => {
                let complete = {
                    let mut st = self.state.lock().unwrap();
                    if head.opcode == OpCode::Text as u8 {
                        st.fragment_kind = Some(MessageKind::Text);
                    } else if head.opcode == OpCode::Binary as u8 {
                        st.fragment_kind = Some(MessageKind::Binary);
                    }
                    st.read_buffer.extend_from_slice(&payload);

                    if head.fin {
                        let kind = st.fragment_kind.take().unwrap_or(MessageKind::Continuation);
                        Some(Message {
                            kind,
                            data: std::mem::take(&mut st.read_buffer),
                            code: 0,
                        })
                    } else {
                        None
                    }
                };
                if let Some(message) = complete {
                    self.dispatch(&message);
                }
            }
            Some(OpCode::Ping) => {
                // echo the payload back, then surface the ping
                self.send_data(OpCode::Pong, &payload);
                self.dispatch(&Message {
                    kind: MessageKind::Ping,
                    data: payload,
                    code: 0,
                });
            }
            Some(OpCode::Pong) => {
                if payload == HEARTBEAT_PAYLOAD {
                    self.missed_heartbeats.store(0, Ordering::Release);
                } else {
                    self.dispatch(&Message {
                        kind: MessageKind::Pong,
                        data: payload,
                        code: 0,
                    });
                }
            }
            Some(OpCode::Close) => {
                {
                    let mut st = self.state.lock().unwrap();
                    st.server_sent_close = true;
                    if payload.len() >= 2 {
                        let code = u16::from_be_bytes([payload[0], payload[1]]);
                        st.close_message = Some(Message {
                            kind: MessageKind::Close,
                            data: payload[2..].to_vec(),
                            code,
                        });
                    }
                }
                // delivered at disconnect time, via the stored message
                self.close(1000, "");
            }
            None => {
                self.close(1000, "");
                self.dispatch(&Message {
                    kind: MessageKind::Bad,
                    data: format!("Received unknown opcode: {}", head.opcode).into_bytes(),
                    code: 0,
                });
            }
        }
    }

    /// Ping the server every interval; three unanswered pings in a row
    /// mean the connection is dead.
    fn heartbeat_loop(&self) {
        while self.status() == Status::Open && self.send_data(OpCode::Ping, HEARTBEAT_PAYLOAD) {
            self.missed_heartbeats.fetch_add(1, Ordering::AcqRel);

            // wait until the main loop has put the ping on the wire
            self.heartbeat_sent.wait(HEARTBEAT_INTERVAL);
            if self.status() != Status::Open {
                break;
            }

            self.heartbeat_wake.wait(HEARTBEAT_INTERVAL);

            if self.missed_heartbeats.load(Ordering::Acquire) >= MAX_MISSED_HEARTBEATS {
                self.disconnect(Message::close_with_reason("Too many missed heartbeats."));
                return;
            }
        }
    }

    /// Block until the socket turns readable, then hand the turn to the
    /// main loop. Never reads itself.
    fn reader_loop(&self) {
        loop {
            if self.status() == Status::Closed {
                return;
            }

            let started = Instant::now();
            if self.transport.poll_ready(true, false, READ_POLL_MS) {
                self.activity.set();
                self.read_resume.wait(Duration::from_secs(1));
            } else if started.elapsed() < Duration::from_millis(10) {
                // an error/hang-up returns instantly; let the main loop
                // notice instead of spinning on it
                self.activity.set();
                thread::sleep(Duration::from_millis(50));
            }
        }
    }

    /// Unilateral teardown: close the transport, clear per-connection
    /// state, deliver the close message, wake every worker.
    fn disconnect(&self, close_message: Message) {
        loop {
            let current = self.status.load(Ordering::Acquire);
            if current != Status::Open as u8 && current != Status::Closing as u8 {
                return;
            }
            if self
                .status
                .compare_exchange(
                    current,
                    Status::Closed as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                break;
            }
        }

        self.transport.close();
        *self.state.lock().unwrap() = ConnState::default();

        log::debug!(
            "disconnected: {}",
            String::from_utf8_lossy(&close_message.data)
        );
        self.dispatch(&close_message);

        self.activity.set();
        self.read_resume.set();
        self.heartbeat_sent.set();
        self.heartbeat_wake.set();
    }

    /// Frame a payload and queue it. Frames leave the socket in queue
    /// order, and only from the main loop.
    fn send_data(&self, opcode: OpCode, payload: &[u8]) -> bool {
        if !matches!(self.status(), Status::Open | Status::Closing) {
            return false;
        }

        let frame = frame::build_client_frame(true, opcode, payload);
        self.state.lock().unwrap().write_queue.push_back(frame);
        self.activity.set();
        true
    }

    /// Begin the close handshake. Idempotent; callable from any thread,
    /// including from inside the message callback.
    fn close(&self, code: u16, reason: &str) {
        if matches!(self.status(), Status::Closing | Status::Closed) {
            return;
        }
        self.set_status(Status::Closing);

        let mut data = Vec::with_capacity(2 + reason.len());
        data.extend_from_slice(&code.to_be_bytes());
        data.extend_from_slice(reason.as_bytes());
        self.send_data(OpCode::Close, &data);
    }
}

/// A websocket client.
///
/// `start` runs the connection on the calling thread; `start_async`
/// moves the same loop onto a worker. Messages arrive through the
/// callback set with [`set_on_message`](Self::set_on_message). With
/// automatic reconnect on (the default), a dropped connection delivers
/// its CLOSE and then dials the current URL again.
pub struct Client {
    inner: Arc<Inner>,
    runner: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Client {
    pub fn new(url: &str) -> Self {
        Self {
            inner: Arc::new(Inner::new(url)),
            runner: Mutex::new(None),
        }
    }

    /// The URL the client connects to.
    pub fn url(&self) -> String {
        self.inner.url.lock().unwrap().clone()
    }

    /// Change the URL; takes effect on the next connect.
    pub fn set_url(&self, url: &str) {
        *self.inner.url.lock().unwrap() = url.to_string();
    }

    pub fn automatic_reconnect(&self) -> bool {
        self.inner.reconnect.load(Ordering::Acquire)
    }

    pub fn set_automatic_reconnect(&self, reconnect: bool) {
        self.inner.reconnect.store(reconnect, Ordering::Release);
    }

    /// Install the message callback.
    pub fn set_on_message(&self, cb: impl Fn(&Message) + Send + Sync + 'static) {
        *self.inner.callback.lock().unwrap() = Some(Arc::new(cb));
    }

    /// Queue a text message. False when the connection is not open.
    pub fn send(&self, message: &str) -> bool {
        self.inner.send_data(OpCode::Text, message.as_bytes())
    }

    /// Connect and run the message loop on the calling thread; returns
    /// once the connection is closed and reconnection is off.
    pub fn start(&self) -> Result<(), Error> {
        self.inner.run()
    }

    /// Run the same loop on a dedicated worker thread.
    pub fn start_async(&self) {
        let mut runner = self.runner.lock().unwrap();
        if runner.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            return;
        }

        let inner = self.inner.clone();
        *runner = Some(thread::spawn(move || {
            if let Err(e) = inner.run() {
                log::error!("websocket loop failed: {}", e);
            }
        }));
    }

    /// Begin the close handshake with the given code and reason.
    pub fn close(&self, code: u16, reason: &str) {
        self.inner.close(code, reason);
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.set_automatic_reconnect(false);
        self.close(1000, "");
        if let Some(handle) = self.runner.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}
