//! Minimal RFC 6455 client: `ws://` only, text frames out, text frames in.
//!
//! Each socket runs on two threads. `ws-reader` connects, performs the
//! handshake, then turns inbound frames into [`SocketEvent`]s. `ws-writer`
//! drains the outbound queue; the bytes still queued there are the socket's
//! backlog as reported by [`Transport::buffered_amount`].

use crate::connection::{Connector, Transport};
use crate::types::{SessionEvent, SocketEvent, SocketTag};
use base64::{engine::general_purpose, Engine as _};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, info, warn};
use sha1_smol::Sha1;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);
/// Upper bound on a single inbound message.
const MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

pub const OP_CONTINUATION: u8 = 0x0;
pub const OP_TEXT: u8 = 0x1;
pub const OP_BINARY: u8 = 0x2;
pub const OP_CLOSE: u8 = 0x8;
pub const OP_PING: u8 = 0x9;
pub const OP_PONG: u8 = 0xA;

#[derive(Debug, thiserror::Error)]
pub enum WsError {
    #[error("invalid detector url: {0}")]
    Url(String),
    #[error("i/o: {0}")]
    Io(#[from] io::Error),
    #[error("handshake rejected: {0}")]
    Handshake(String),
    #[error("protocol violation: {0}")]
    Protocol(String),
}

// ─── Framing ────────────────────────────────────────────────────────────────

/// `Sec-WebSocket-Accept` value for a client key.
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(format!("{}{}", key, GUID).as_bytes());
    general_purpose::STANDARD.encode(hasher.digest().bytes())
}

/// Encode one final frame. Client frames must be masked; server frames
/// must not.
pub fn encode_frame(opcode: u8, payload: &[u8], mask: Option<[u8; 4]>) -> Vec<u8> {
    let len = payload.len();
    let mut frame = Vec::with_capacity(14 + len);
    frame.push(0x80 | opcode); // FIN + opcode
    let mask_bit = if mask.is_some() { 0x80 } else { 0x00 };
    if len < 126 {
        frame.push(mask_bit | len as u8);
    } else if len < 65536 {
        frame.push(mask_bit | 126);
        let _ = frame.write_u16::<BigEndian>(len as u16);
    } else {
        frame.push(mask_bit | 127);
        let _ = frame.write_u64::<BigEndian>(len as u64);
    }
    match mask {
        Some(key) => {
            frame.extend_from_slice(&key);
            frame.extend(payload.iter().enumerate().map(|(i, b)| b ^ key[i % 4]));
        }
        None => frame.extend_from_slice(payload),
    }
    frame
}

/// One decoded frame, mask already removed.
#[derive(Debug, Clone, PartialEq)]
pub struct WsFrame {
    pub fin: bool,
    pub opcode: u8,
    pub payload: Vec<u8>,
}

pub fn read_frame<R: Read>(r: &mut R) -> Result<WsFrame, WsError> {
    let b0 = r.read_u8()?;
    let b1 = r.read_u8()?;
    let fin = b0 & 0x80 != 0;
    let opcode = b0 & 0x0F;
    let masked = b1 & 0x80 != 0;
    let len = match b1 & 0x7F {
        126 => r.read_u16::<BigEndian>()? as usize,
        127 => {
            let len = r.read_u64::<BigEndian>()?;
            usize::try_from(len).map_err(|_| WsError::Protocol("frame too large".into()))?
        }
        n => n as usize,
    };
    if len > MAX_MESSAGE_BYTES {
        return Err(WsError::Protocol(format!("frame of {} bytes", len)));
    }
    let key = if masked {
        let mut key = [0u8; 4];
        r.read_exact(&mut key)?;
        Some(key)
    } else {
        None
    };
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)?;
    if let Some(key) = key {
        for (i, b) in payload.iter_mut().enumerate() {
            *b ^= key[i % 4];
        }
    }
    Ok(WsFrame {
        fin,
        opcode,
        payload,
    })
}

/// Reassembled application-level message.
#[derive(Debug, Clone, PartialEq)]
pub enum WsMessage {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong,
    Close,
}

/// Reads whole messages, joining continuation frames. Control frames may
/// arrive between fragments and are returned immediately.
pub struct MessageReader<R: Read> {
    inner: R,
    partial: Option<(u8, Vec<u8>)>,
}

impl<R: Read> MessageReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            partial: None,
        }
    }

    pub fn next_message(&mut self) -> Result<WsMessage, WsError> {
        loop {
            let frame = read_frame(&mut self.inner)?;
            match frame.opcode {
                OP_PING => return Ok(WsMessage::Ping(frame.payload)),
                OP_PONG => return Ok(WsMessage::Pong),
                OP_CLOSE => return Ok(WsMessage::Close),
                OP_TEXT | OP_BINARY => {
                    if self.partial.is_some() {
                        return Err(WsError::Protocol("new message inside fragment".into()));
                    }
                    if frame.fin {
                        return finish(frame.opcode, frame.payload);
                    }
                    self.partial = Some((frame.opcode, frame.payload));
                }
                OP_CONTINUATION => {
                    let Some((opcode, mut buf)) = self.partial.take() else {
                        return Err(WsError::Protocol("continuation without start".into()));
                    };
                    buf.extend_from_slice(&frame.payload);
                    if buf.len() > MAX_MESSAGE_BYTES {
                        return Err(WsError::Protocol("message too large".into()));
                    }
                    if frame.fin {
                        return finish(opcode, buf);
                    }
                    self.partial = Some((opcode, buf));
                }
                other => return Err(WsError::Protocol(format!("opcode {:#x}", other))),
            }
        }
    }
}

fn finish(opcode: u8, payload: Vec<u8>) -> Result<WsMessage, WsError> {
    if opcode == OP_TEXT {
        String::from_utf8(payload)
            .map(WsMessage::Text)
            .map_err(|_| WsError::Protocol("text frame is not utf-8".into()))
    } else {
        Ok(WsMessage::Binary(payload))
    }
}

// ─── Handshake ──────────────────────────────────────────────────────────────

/// Target of a `ws://` URL.
#[derive(Debug, Clone, PartialEq)]
pub struct WsTarget {
    pub host: String,
    pub port: u16,
    pub resource: String,
}

impl WsTarget {
    pub fn parse(raw: &str) -> Result<Self, WsError> {
        let url = url::Url::parse(raw).map_err(|e| WsError::Url(format!("{}: {}", raw, e)))?;
        if url.scheme() != "ws" {
            return Err(WsError::Url(format!("unsupported scheme {}", url.scheme())));
        }
        let host = url
            .host_str()
            .ok_or_else(|| WsError::Url(format!("{}: missing host", raw)))?
            .to_string();
        let port = url.port_or_known_default().unwrap_or(80);
        let mut resource = url.path().to_string();
        if let Some(q) = url.query() {
            resource.push('?');
            resource.push_str(q);
        }
        Ok(Self {
            host,
            port,
            resource,
        })
    }

    fn host_header(&self) -> String {
        if self.port == 80 {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Open the TCP connection only. Split from [`handshake`] so the stream can
/// be published for [`Transport::close`] before the upgrade blocks on reads.
pub fn dial(target: &WsTarget) -> Result<TcpStream, WsError> {
    use std::net::ToSocketAddrs;

    let addr = (target.host.as_str(), target.port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| WsError::Url(format!("{} did not resolve", target.host)))?;
    let stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)?;
    let _ = stream.set_nodelay(true);
    Ok(stream)
}

/// Perform the HTTP upgrade on a dialed stream. The returned reader may
/// already hold bytes of the first server frame, so it must be the one used
/// for reading afterwards.
pub fn handshake(
    mut stream: TcpStream,
    target: &WsTarget,
) -> Result<(TcpStream, BufReader<TcpStream>), WsError> {
    // A peer that accepts but never answers must not hold the reader forever.
    stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;

    let key = general_purpose::STANDARD.encode(rand::random::<[u8; 16]>());
    let request = format!(
        "GET {} HTTP/1.1\r\n\
         Host: {}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         \r\n",
        target.resource,
        target.host_header(),
        key
    );
    stream.write_all(request.as_bytes())?;

    let mut reader = BufReader::new(stream.try_clone()?);
    let mut status = String::new();
    if reader.read_line(&mut status)? == 0 {
        return Err(WsError::Handshake("connection closed during upgrade".into()));
    }
    if status.split_whitespace().nth(1) != Some("101") {
        return Err(WsError::Handshake(status.trim().to_string()));
    }

    let mut accept = None;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Err(WsError::Handshake("connection closed during upgrade".into()));
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            break;
        }
        if let Some((name, value)) = trimmed.split_once(':') {
            if name.trim().eq_ignore_ascii_case("sec-websocket-accept") {
                accept = Some(value.trim().to_string());
            }
        }
    }
    if accept.as_deref() != Some(accept_key(&key).as_str()) {
        return Err(WsError::Handshake("bad Sec-WebSocket-Accept".into()));
    }

    // Socket options are shared with the reader's clone.
    stream.set_read_timeout(None)?;
    Ok((stream, reader))
}

// ─── Transport ──────────────────────────────────────────────────────────────

enum Outbound {
    /// Application data, counted in the backlog.
    Frame(Vec<u8>),
    /// Protocol replies such as pongs. Never counted.
    Control(Vec<u8>),
    Close,
}

type StreamSlot = Arc<Mutex<Option<TcpStream>>>;

/// Handle to one live socket. Dropping it does not close the socket; the
/// session closes explicitly.
pub struct WsTransport {
    outbound: Sender<Outbound>,
    buffered: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
    stream: StreamSlot,
}

impl Transport for WsTransport {
    fn send_text(&mut self, text: String) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        let frame = encode_frame(OP_TEXT, text.as_bytes(), Some(rand::random()));
        let len = frame.len();
        self.buffered.fetch_add(len, Ordering::AcqRel);
        if self.outbound.send(Outbound::Frame(frame)).is_err() {
            self.buffered.fetch_sub(len, Ordering::AcqRel);
            return false;
        }
        true
    }

    fn buffered_amount(&self) -> usize {
        self.buffered.load(Ordering::Acquire)
    }

    fn close(&mut self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.outbound.send(Outbound::Close);
        // Wake the reader wherever it is blocked: mid-handshake or waiting
        // on the next frame. The writer still gets to send its close frame.
        if let Ok(slot) = self.stream.lock() {
            if let Some(stream) = slot.as_ref() {
                let _ = stream.shutdown(Shutdown::Read);
            }
        }
    }
}

/// Opens real sockets against one detector URL and posts their callbacks
/// into the session loop.
pub struct WsConnector {
    url: String,
    events: Sender<SessionEvent>,
}

impl WsConnector {
    pub fn new(url: String, events: Sender<SessionEvent>) -> Self {
        Self { url, events }
    }
}

impl Connector for WsConnector {
    fn open(&mut self, tag: SocketTag) -> Box<dyn Transport> {
        let (tx, rx) = unbounded::<Outbound>();
        let buffered = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicBool::new(false));
        let stream: StreamSlot = Arc::new(Mutex::new(None));

        let io = SocketIo {
            tag,
            url: self.url.clone(),
            events: self.events.clone(),
            outbound_tx: tx.clone(),
            outbound_rx: rx,
            buffered: buffered.clone(),
            closed: closed.clone(),
            stream: stream.clone(),
        };
        let spawned = thread::Builder::new()
            .name("ws-reader".into())
            .spawn(move || io.run());
        if let Err(e) = spawned {
            let _ = self.events.send(SessionEvent::Socket {
                tag,
                event: SocketEvent::Error(format!("spawn ws-reader: {}", e)),
            });
            let _ = self.events.send(SessionEvent::Socket {
                tag,
                event: SocketEvent::Close,
            });
        }

        Box::new(WsTransport {
            outbound: tx,
            buffered,
            closed,
            stream,
        })
    }
}

struct SocketIo {
    tag: SocketTag,
    url: String,
    events: Sender<SessionEvent>,
    outbound_tx: Sender<Outbound>,
    outbound_rx: Receiver<Outbound>,
    buffered: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
    stream: StreamSlot,
}

impl SocketIo {
    fn emit(&self, event: SocketEvent) {
        let _ = self.events.send(SessionEvent::Socket {
            tag: self.tag,
            event,
        });
    }

    fn fail(&self, e: WsError) {
        if !self.closed.load(Ordering::Acquire) {
            debug!("WebSocket connect to {} failed: {}", self.url, e);
            self.emit(SocketEvent::Error(e.to_string()));
        }
        self.emit(SocketEvent::Close);
    }

    /// Make the stream reachable from [`WsTransport::close`]. Returns false
    /// when the transport was already closed.
    fn publish(&self, stream: &TcpStream) -> bool {
        if let (Ok(mut slot), Ok(clone)) = (self.stream.lock(), stream.try_clone()) {
            *slot = Some(clone);
        }
        !self.closed.load(Ordering::Acquire)
    }

    fn run(self) {
        let target = match WsTarget::parse(&self.url) {
            Ok(t) => t,
            Err(e) => return self.fail(e),
        };
        let stream = match dial(&target) {
            Ok(s) => s,
            Err(e) => return self.fail(e),
        };
        if !self.publish(&stream) {
            let _ = stream.shutdown(Shutdown::Both);
            self.emit(SocketEvent::Close);
            return;
        }
        let (stream, reader) = match handshake(stream, &target) {
            Ok(pair) => pair,
            Err(e) => return self.fail(e),
        };

        let writer_stream = match stream.try_clone() {
            Ok(s) => s,
            Err(e) => return self.fail(e.into()),
        };
        let _ = writer_stream.set_write_timeout(Some(WRITE_TIMEOUT));
        let rx = self.outbound_rx.clone();
        let buffered = self.buffered.clone();
        let writer = thread::Builder::new()
            .name("ws-writer".into())
            .spawn(move || write_loop(writer_stream, rx, buffered));
        let writer = match writer {
            Ok(handle) => handle,
            Err(e) => {
                self.emit(SocketEvent::Error(format!("spawn ws-writer: {}", e)));
                let _ = stream.shutdown(Shutdown::Both);
                self.emit(SocketEvent::Close);
                return;
            }
        };

        info!("WebSocket connected to {}", self.url);
        self.emit(SocketEvent::Open);

        let mut messages = MessageReader::new(reader);
        let server_closed = loop {
            match messages.next_message() {
                Ok(WsMessage::Text(text)) => self.emit(SocketEvent::Message(text)),
                Ok(WsMessage::Binary(bytes)) => debug!("Ignoring {} byte binary frame", bytes.len()),
                Ok(WsMessage::Ping(payload)) => {
                    let pong = encode_frame(OP_PONG, &payload, Some(rand::random()));
                    let _ = self.outbound_tx.send(Outbound::Control(pong));
                }
                Ok(WsMessage::Pong) => {}
                Ok(WsMessage::Close) => {
                    debug!("Server closed socket {}", self.tag.socket_id);
                    break true;
                }
                Err(WsError::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => break false,
                Err(e) => {
                    if !self.closed.load(Ordering::Acquire) {
                        warn!("WebSocket read failed: {}", e);
                        self.emit(SocketEvent::Error(e.to_string()));
                    }
                    break false;
                }
            }
        };

        // Server and local closes are answered before hanging up; a dropped
        // peer cuts the stream first so the writer cannot block on it.
        if !server_closed && !self.closed.load(Ordering::Acquire) {
            let _ = stream.shutdown(Shutdown::Both);
        }
        let _ = self.outbound_tx.send(Outbound::Close);
        let _ = writer.join();
        let _ = stream.shutdown(Shutdown::Both);
        self.emit(SocketEvent::Close);
    }
}

fn write_loop(mut stream: TcpStream, rx: Receiver<Outbound>, buffered: Arc<AtomicUsize>) {
    for msg in rx.iter() {
        match msg {
            Outbound::Frame(frame) => {
                let result = stream.write_all(&frame);
                buffered.fetch_sub(frame.len(), Ordering::AcqRel);
                if let Err(e) = result {
                    debug!("WebSocket write failed: {}", e);
                    break;
                }
            }
            Outbound::Control(frame) => {
                if let Err(e) = stream.write_all(&frame) {
                    debug!("WebSocket control write failed: {}", e);
                    break;
                }
            }
            Outbound::Close => {
                let close = encode_frame(OP_CLOSE, &[], Some(rand::random()));
                let _ = stream.write_all(&close);
                let _ = stream.shutdown(Shutdown::Both);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_accept_key_rfc_example() {
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_masked_frame_decodes() {
        let frame = encode_frame(OP_TEXT, b"hello", Some([1, 2, 3, 4]));
        assert_eq!(frame[0], 0x81);
        assert_eq!(frame[1], 0x80 | 5);
        let decoded = read_frame(&mut Cursor::new(frame)).unwrap();
        assert!(decoded.fin);
        assert_eq!(decoded.opcode, OP_TEXT);
        assert_eq!(decoded.payload, b"hello");
    }

    #[test]
    fn test_extended_lengths() {
        let medium = vec![b'a'; 300];
        let frame = encode_frame(OP_TEXT, &medium, None);
        assert_eq!(frame[1], 126);
        assert_eq!(frame.len(), 4 + 300);

        let large = vec![b'b'; 70_000];
        let frame = encode_frame(OP_BINARY, &large, None);
        assert_eq!(frame[1], 127);
        assert_eq!(frame.len(), 10 + 70_000);
        let decoded = read_frame(&mut Cursor::new(frame)).unwrap();
        assert_eq!(decoded.payload.len(), 70_000);
    }

    #[test]
    fn test_fragmented_text_with_interleaved_ping() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&[0x01, 3]);
        bytes.extend_from_slice(b"{\"a");
        bytes.extend_from_slice(&encode_frame(OP_PING, b"p", None));
        bytes.extend_from_slice(&[0x00, 3]);
        bytes.extend_from_slice(b"\":1");
        bytes.extend_from_slice(&encode_frame(OP_CONTINUATION, b"}", None));

        let mut reader = MessageReader::new(Cursor::new(bytes));
        assert_eq!(reader.next_message().unwrap(), WsMessage::Ping(b"p".to_vec()));
        assert_eq!(
            reader.next_message().unwrap(),
            WsMessage::Text("{\"a\":1}".into())
        );
    }

    #[test]
    fn test_target_parse() {
        let t = WsTarget::parse("ws://localhost:8000/ws/stream?x=1").unwrap();
        assert_eq!(t.host, "localhost");
        assert_eq!(t.port, 8000);
        assert_eq!(t.resource, "/ws/stream?x=1");
        assert_eq!(WsTarget::parse("ws://example.com").unwrap().port, 80);
        assert!(WsTarget::parse("wss://example.com").is_err());
        assert!(WsTarget::parse("nonsense").is_err());
    }
}
