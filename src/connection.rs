//! Connection lifecycle: socket ownership, reconnect policy, inbound decode.
//!
//! ```text
//!   start            open              close (active)
//! Disconnected ──► Connecting ──► Connected ──────────┐
//!                      ▲                               │
//!                      └─────── reconnect delay ◄──────┘
//!   stop: any state ──► Disconnected (no reconnect)
//! ```
//!
//! The manager never blocks. Sockets report back through events tagged with
//! a [`SocketTag`]; an event whose tag is not the live socket's is ignored,
//! which is what keeps a superseded socket's late close from scheduling a
//! second reconnect.

use crate::protocol::{decode_inbound, InboundMessage};
use crate::types::{ConnectionState, SocketEvent, SocketTag};
use log::{debug, info, warn};

// ─── Transport seam ─────────────────────────────────────────────────────────

/// One outbound socket, as seen by the session.
pub trait Transport {
    /// Queue a text message. Returns false when the socket is gone.
    fn send_text(&mut self, text: String) -> bool;
    /// Bytes queued but not yet flushed to the network.
    fn buffered_amount(&self) -> usize;
    /// Close without expecting any further events to matter.
    fn close(&mut self);
}

/// Opens sockets. Implementations deliver the socket's open, message,
/// error and close callbacks as events carrying `tag`.
pub trait Connector {
    fn open(&mut self, tag: SocketTag) -> Box<dyn Transport>;
}

/// What the session should do with a socket event after the manager has
/// applied it.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionUpdate {
    /// Stale socket, or a payload we drop.
    Ignored,
    StateChanged(ConnectionState),
    Message(InboundMessage),
    Error(String),
}

// ─── Manager ────────────────────────────────────────────────────────────────

pub struct ConnectionManager {
    session_epoch: u64,
    state: ConnectionState,
    socket: Option<(SocketTag, Box<dyn Transport>)>,
    next_socket_id: u64,
    reconnect_attempts: u32,
    reconnect_due_ms: Option<u64>,
    reconnect_delay_ms: u64,
    last_error: Option<String>,
    active: bool,
}

impl ConnectionManager {
    pub fn new(session_epoch: u64, reconnect_delay_ms: u64) -> Self {
        Self {
            session_epoch,
            state: ConnectionState::Disconnected,
            socket: None,
            next_socket_id: 0,
            reconnect_attempts: 0,
            reconnect_due_ms: None,
            reconnect_delay_ms,
            last_error: None,
            active: false,
        }
    }

    /// Disconnected → Connecting, opening the first socket.
    pub fn start(&mut self, connector: &mut dyn Connector) {
        if self.active {
            return;
        }
        self.active = true;
        self.open_socket(connector);
    }

    /// Explicit stop: close the socket without taking the reconnect path.
    pub fn stop(&mut self) {
        self.active = false;
        self.reconnect_due_ms = None;
        if let Some((tag, mut socket)) = self.socket.take() {
            debug!("Closing socket {} on stop", tag.socket_id);
            socket.close();
        }
        self.state = ConnectionState::Disconnected;
    }

    fn open_socket(&mut self, connector: &mut dyn Connector) {
        if let Some((_, mut old)) = self.socket.take() {
            old.close();
        }
        self.next_socket_id += 1;
        let tag = SocketTag {
            session_epoch: self.session_epoch,
            socket_id: self.next_socket_id,
        };
        info!("Opening socket {} (session {})", tag.socket_id, tag.session_epoch);
        let transport = connector.open(tag);
        self.socket = Some((tag, transport));
        self.state = ConnectionState::Connecting;
    }

    /// Opens the next socket once the reconnect delay has elapsed.
    /// Returns true if a new attempt was started.
    pub fn poll_reconnect(&mut self, connector: &mut dyn Connector, now_ms: u64) -> bool {
        match self.reconnect_due_ms {
            Some(due) if self.active && now_ms >= due => {
                self.reconnect_due_ms = None;
                self.open_socket(connector);
                true
            }
            _ => false,
        }
    }

    /// Apply a transport callback. Events from sockets other than the live
    /// one are ignored.
    pub fn handle_event(&mut self, tag: SocketTag, event: SocketEvent, now_ms: u64) -> ConnectionUpdate {
        if !self.is_current(tag) {
            debug!("Ignoring {:?} from stale socket {:?}", event, tag);
            return ConnectionUpdate::Ignored;
        }

        match event {
            SocketEvent::Open => {
                info!("Socket {} connected", tag.socket_id);
                self.state = ConnectionState::Connected;
                self.reconnect_attempts = 0;
                self.last_error = None;
                ConnectionUpdate::StateChanged(self.state)
            }
            SocketEvent::Close => {
                self.socket = None;
                if self.active {
                    self.reconnect_attempts += 1;
                    self.state = ConnectionState::Connecting;
                    self.reconnect_due_ms = Some(now_ms + self.reconnect_delay_ms);
                    let msg = format!(
                        "connection lost, reconnecting (attempt {})",
                        self.reconnect_attempts
                    );
                    warn!("Socket {} closed: {}", tag.socket_id, msg);
                    self.last_error = Some(msg);
                } else {
                    self.state = ConnectionState::Disconnected;
                }
                ConnectionUpdate::StateChanged(self.state)
            }
            SocketEvent::Error(msg) => {
                warn!("Socket {} error: {}", tag.socket_id, msg);
                self.last_error = Some(msg.clone());
                ConnectionUpdate::Error(msg)
            }
            SocketEvent::Message(text) => match decode_inbound(&text) {
                Some(InboundMessage::Error { message }) => {
                    self.last_error = Some(message.clone());
                    ConnectionUpdate::Message(InboundMessage::Error { message })
                }
                Some(msg) => {
                    self.last_error = None;
                    ConnectionUpdate::Message(msg)
                }
                None => {
                    debug!("Dropped malformed payload ({} bytes)", text.len());
                    ConnectionUpdate::Ignored
                }
            },
        }
    }

    fn is_current(&self, tag: SocketTag) -> bool {
        matches!(&self.socket, Some((live, _)) if *live == tag)
    }

    /// Sends on the live socket if it is connected.
    pub fn send_text(&mut self, text: String) -> bool {
        if self.state != ConnectionState::Connected {
            return false;
        }
        match &mut self.socket {
            Some((_, socket)) => socket.send_text(text),
            None => false,
        }
    }

    /// Outbound backlog of the live connected socket; `None` when there is
    /// no connected socket.
    pub fn buffered_amount(&self) -> Option<usize> {
        match (&self.socket, self.state) {
            (Some((_, socket)), ConnectionState::Connected) => Some(socket.buffered_amount()),
            _ => None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn reconnect_due_ms(&self) -> Option<u64> {
        self.reconnect_due_ms
    }

    pub fn current_tag(&self) -> Option<SocketTag> {
        self.socket.as_ref().map(|(tag, _)| *tag)
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.stop();
    }
}

// ─── Test doubles ───────────────────────────────────────────────────────────

/// In-memory connector for exercising the state machine without sockets.
/// Built for unit tests and behind the `test-util` feature for the
/// integration suite.
#[cfg(any(test, feature = "test-util"))]
pub mod mock {
    use super::{Connector, Transport};
    use crate::types::SocketTag;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug, Default)]
    pub struct MockSocketState {
        pub sent: Vec<String>,
        pub buffered: usize,
        pub closed: bool,
    }

    pub struct MockTransport {
        state: Rc<RefCell<MockSocketState>>,
    }

    impl Transport for MockTransport {
        fn send_text(&mut self, text: String) -> bool {
            let mut s = self.state.borrow_mut();
            if s.closed {
                return false;
            }
            s.sent.push(text);
            true
        }

        fn buffered_amount(&self) -> usize {
            self.state.borrow().buffered
        }

        fn close(&mut self) {
            self.state.borrow_mut().closed = true;
        }
    }

    /// Records every opened socket; tests reach into the shared state to
    /// inspect sends or fake a backlog.
    #[derive(Default)]
    pub struct MockConnector {
        pub opened: Vec<(SocketTag, Rc<RefCell<MockSocketState>>)>,
    }

    impl MockConnector {
        pub fn last(&self) -> Rc<RefCell<MockSocketState>> {
            match self.opened.last() {
                Some((_, state)) => state.clone(),
                None => Rc::new(RefCell::new(MockSocketState::default())),
            }
        }

        pub fn last_tag(&self) -> Option<SocketTag> {
            self.opened.last().map(|(tag, _)| *tag)
        }
    }

    impl Connector for MockConnector {
        fn open(&mut self, tag: SocketTag) -> Box<dyn Transport> {
            let state = Rc::new(RefCell::new(MockSocketState::default()));
            self.opened.push((tag, state.clone()));
            Box::new(MockTransport { state })
        }
    }

    /// Lets a test keep a handle on the connector after handing it over.
    impl Connector for Rc<RefCell<MockConnector>> {
        fn open(&mut self, tag: SocketTag) -> Box<dyn Transport> {
            self.borrow_mut().open(tag)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockConnector;
    use super::*;

    fn started() -> (ConnectionManager, MockConnector) {
        let mut conn = ConnectionManager::new(1, 1500);
        let mut connector = MockConnector::default();
        conn.start(&mut connector);
        (conn, connector)
    }

    #[test]
    fn test_start_then_open() {
        let (mut conn, connector) = started();
        assert_eq!(conn.state(), ConnectionState::Connecting);
        let tag = connector.last_tag().unwrap();
        let update = conn.handle_event(tag, SocketEvent::Open, 0);
        assert_eq!(update, ConnectionUpdate::StateChanged(ConnectionState::Connected));
        assert_eq!(conn.reconnect_attempts(), 0);
        assert!(conn.last_error().is_none());
    }

    #[test]
    fn test_close_while_active_schedules_reconnect() {
        let (mut conn, mut connector) = started();
        let tag = connector.last_tag().unwrap();
        conn.handle_event(tag, SocketEvent::Open, 0);

        conn.handle_event(tag, SocketEvent::Close, 10_000);
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert_eq!(conn.reconnect_attempts(), 1);
        assert!(conn.last_error().unwrap().contains("attempt 1"));
        assert_eq!(conn.reconnect_due_ms(), Some(11_500));

        assert!(!conn.poll_reconnect(&mut connector, 11_499));
        assert_eq!(connector.opened.len(), 1);
        assert!(conn.poll_reconnect(&mut connector, 11_500));
        assert_eq!(connector.opened.len(), 2);
        assert_ne!(connector.last_tag(), Some(tag));

        // A failed attempt keeps counting.
        let second = connector.last_tag().unwrap();
        conn.handle_event(second, SocketEvent::Close, 12_000);
        assert_eq!(conn.reconnect_attempts(), 2);
        assert!(conn.last_error().unwrap().contains("attempt 2"));
    }

    #[test]
    fn test_stale_socket_close_ignored() {
        let (mut conn, mut connector) = started();
        let first = connector.last_tag().unwrap();
        conn.handle_event(first, SocketEvent::Close, 0);
        conn.poll_reconnect(&mut connector, 1_500);
        let second = connector.last_tag().unwrap();
        conn.handle_event(second, SocketEvent::Open, 1_600);

        // Late duplicate close from the first socket must not touch state.
        let update = conn.handle_event(first, SocketEvent::Close, 1_700);
        assert_eq!(update, ConnectionUpdate::Ignored);
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert_eq!(conn.reconnect_due_ms(), None);
    }

    #[test]
    fn test_stop_disconnects_without_reconnect() {
        let (mut conn, mut connector) = started();
        let tag = connector.last_tag().unwrap();
        conn.handle_event(tag, SocketEvent::Open, 0);
        conn.stop();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(connector.last().borrow().closed);

        // The close callback that follows is a no-op.
        assert_eq!(conn.handle_event(tag, SocketEvent::Close, 5), ConnectionUpdate::Ignored);
        assert!(!conn.poll_reconnect(&mut connector, 100_000));
        assert_eq!(connector.opened.len(), 1);
    }

    #[test]
    fn test_error_event_keeps_state() {
        let (mut conn, connector) = started();
        let tag = connector.last_tag().unwrap();
        conn.handle_event(tag, SocketEvent::Open, 0);
        conn.handle_event(tag, SocketEvent::Error("reset by peer".into()), 1);
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert_eq!(conn.last_error(), Some("reset by peer"));

        let ok = r#"{"type":"detections","boxes":[],"width":1,"height":1}"#;
        conn.handle_event(tag, SocketEvent::Message(ok.into()), 2);
        assert!(conn.last_error().is_none());
    }

    #[test]
    fn test_malformed_message_leaves_error_text() {
        let (mut conn, connector) = started();
        let tag = connector.last_tag().unwrap();
        conn.handle_event(tag, SocketEvent::Open, 0);
        conn.handle_event(tag, SocketEvent::Error("flaky".into()), 1);
        let update = conn.handle_event(tag, SocketEvent::Message("{oops".into()), 2);
        assert_eq!(update, ConnectionUpdate::Ignored);
        assert_eq!(conn.last_error(), Some("flaky"));
        assert_eq!(conn.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_send_requires_connected() {
        let (mut conn, connector) = started();
        assert!(!conn.send_text("x".into()));
        assert_eq!(conn.buffered_amount(), None);
        let tag = connector.last_tag().unwrap();
        conn.handle_event(tag, SocketEvent::Open, 0);
        assert!(conn.send_text("x".into()));
        assert_eq!(connector.last().borrow().sent, vec!["x".to_string()]);
        assert_eq!(conn.buffered_amount(), Some(0));
    }
}
