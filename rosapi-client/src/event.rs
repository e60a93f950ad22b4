//! Observable states and the events published to the host.

use parking_lot::Mutex;
use rosapi_protocol::Sentence;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Transport state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Unconnected,
    HostLookup,
    Connecting,
    Connected,
    Closing,
}

/// Login progress, meaningful while [`ConnectionState::Connected`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LoginState {
    #[default]
    NoLogin,
    /// First `/login` sent, waiting for the challenge.
    LoginRequested,
    /// Challenge response sent, waiting for the verdict.
    CredentialsSent,
    LoggedIn,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Unconnected => write!(f, "unconnected"),
            ConnectionState::HostLookup => write!(f, "host lookup"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Closing => write!(f, "closing"),
        }
    }
}

impl fmt::Display for LoginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoginState::NoLogin => write!(f, "not logged in"),
            LoginState::LoginRequested => write!(f, "login requested"),
            LoginState::CredentialsSent => write!(f, "credentials sent"),
            LoginState::LoggedIn => write!(f, "logged in"),
        }
    }
}

/// Events delivered to the host, in the order they happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    StateChanged(ConnectionState),
    LoginStateChanged(LoginState),
    /// Human-readable advisory.
    Error(String),
    /// A sentence from the router, delivered only once logged in.
    SentenceReceived(Sentence),
}

/// Receiving end of a connection's event stream.
pub type EventReceiver = mpsc::UnboundedReceiver<ConnectionEvent>;

/// Sending end of a connection's event stream.
///
/// Sends never fail from the caller's point of view: a host that dropped its
/// receiver has opted out of events.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<ConnectionEvent>,
}

impl EventSink {
    pub fn channel() -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: ConnectionEvent) {
        tracing::trace!("event: {:?}", event);
        let _ = self.tx.send(event);
    }

    pub fn state_changed(&self, state: ConnectionState) {
        self.emit(ConnectionEvent::StateChanged(state));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(ConnectionEvent::Error(message.into()));
    }
}

/// Snapshot of the observable states of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Status {
    pub connection: ConnectionState,
    pub login: LoginState,
}

/// Status snapshot shared between a connection handle and its driver task.
pub type SharedStatus = Arc<Mutex<Status>>;

/// Keeps the status snapshot and the event stream in step.
///
/// Every state published here is stored before its event is sent, so a host
/// reacting to an event observes at least that state.
#[derive(Debug, Clone)]
pub struct Publisher {
    events: EventSink,
    status: SharedStatus,
}

impl Publisher {
    pub fn new(events: EventSink, status: SharedStatus) -> Self {
        Self { events, status }
    }

    pub fn status(&self) -> Status {
        *self.status.lock()
    }

    pub fn connection_state(&self, state: ConnectionState) {
        self.status.lock().connection = state;
        tracing::info!("connection state: {}", state);
        self.events.state_changed(state);
    }

    /// Publishes a login state, emitting an event only on transition.
    pub fn login_state(&self, state: LoginState) {
        {
            let mut status = self.status.lock();
            if status.login == state {
                return;
            }
            status.login = state;
        }
        tracing::info!("login state: {}", state);
        self.events.emit(ConnectionEvent::LoginStateChanged(state));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.events.error(message);
    }

    pub fn sentence(&self, sentence: Sentence) {
        self.events.emit(ConnectionEvent::SentenceReceived(sentence));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        assert_eq!(ConnectionState::default(), ConnectionState::Unconnected);
        assert_eq!(LoginState::default(), LoginState::NoLogin);
    }

    #[test]
    fn test_sink_after_receiver_dropped() {
        let (sink, rx) = EventSink::channel();
        drop(rx);
        // Must not panic
        sink.error("nobody listening");
    }

    #[test]
    fn test_login_state_only_on_transition() {
        let (sink, mut rx) = EventSink::channel();
        let publisher = Publisher::new(sink, SharedStatus::default());

        publisher.login_state(LoginState::NoLogin);
        publisher.login_state(LoginState::LoginRequested);
        publisher.login_state(LoginState::LoginRequested);

        assert_eq!(
            rx.try_recv().unwrap(),
            ConnectionEvent::LoginStateChanged(LoginState::LoginRequested)
        );
        assert!(rx.try_recv().is_err());
        assert_eq!(publisher.status().login, LoginState::LoginRequested);
    }

    #[test]
    fn test_status_stored_before_event() {
        let (sink, mut rx) = EventSink::channel();
        let status = SharedStatus::default();
        let publisher = Publisher::new(sink, status.clone());

        publisher.connection_state(ConnectionState::Connecting);
        assert_eq!(status.lock().connection, ConnectionState::Connecting);
        assert_eq!(
            rx.try_recv().unwrap(),
            ConnectionEvent::StateChanged(ConnectionState::Connecting)
        );
    }

    #[tokio::test]
    async fn test_sink_preserves_order() {
        let (sink, mut rx) = EventSink::channel();
        sink.state_changed(ConnectionState::Connected);
        sink.emit(ConnectionEvent::LoginStateChanged(LoginState::LoginRequested));
        sink.error("boom");

        assert_eq!(
            rx.recv().await,
            Some(ConnectionEvent::StateChanged(ConnectionState::Connected))
        );
        assert_eq!(
            rx.recv().await,
            Some(ConnectionEvent::LoginStateChanged(LoginState::LoginRequested))
        );
        assert_eq!(
            rx.recv().await,
            Some(ConnectionEvent::Error("boom".to_string()))
        );
    }
}
