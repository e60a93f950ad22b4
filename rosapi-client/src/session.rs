//! Protocol state of a single connection, independent of any socket.
//!
//! The driver task reports transport state changes and hands over received
//! bytes; the session reassembles sentences, runs the login machine,
//! publishes events and collects the bytes to write back.

use crate::credentials::CredentialsProvider;
use crate::error::ClientError;
use crate::event::{ConnectionState, LoginState, Publisher};
use crate::login::{Login, LoginStep};
use bytes::{Buf, BytesMut};
use rosapi_protocol::{Encoder, Reassembler, Sentence};
use std::sync::Arc;

pub struct Session {
    publisher: Publisher,
    credentials: Arc<dyn CredentialsProvider>,
    login: Login,
    reassembler: Reassembler,
    outbound: BytesMut,
}

impl Session {
    pub fn new(
        publisher: Publisher,
        credentials: Arc<dyn CredentialsProvider>,
        max_word_len: u32,
    ) -> Self {
        Self {
            publisher,
            credentials,
            login: Login::new(),
            reassembler: Reassembler::with_max_word_len(max_word_len),
            outbound: BytesMut::new(),
        }
    }

    pub fn login_state(&self) -> LoginState {
        self.login.state()
    }

    /// Publishes a transport state change and reacts to it.
    ///
    /// Reaching [`ConnectionState::Connected`] starts the login handshake;
    /// reaching [`ConnectionState::Unconnected`] drops all per-connection
    /// state.
    pub fn transport_state_changed(&mut self, state: ConnectionState) -> Result<(), ClientError> {
        self.publisher.connection_state(state);
        match state {
            ConnectionState::Connected => self.begin_login(),
            ConnectionState::Unconnected => {
                self.login.abort();
                self.publisher.login_state(LoginState::NoLogin);
                self.reassembler.reset();
                self.outbound.clear();
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn begin_login(&mut self) -> Result<(), ClientError> {
        self.publisher.login_state(LoginState::NoLogin);
        self.reassembler.reset();

        let credentials = self
            .credentials
            .credentials()
            .ok_or(ClientError::IllegalState("no credentials available"))?;
        tracing::debug!("logging in as '{}'", credentials.user);

        let request = self.login.begin(credentials);
        self.queue(&request, None)?;
        self.publisher.login_state(self.login.state());
        Ok(())
    }

    /// Consumes received bytes, dispatching every sentence they complete.
    ///
    /// Sentences completed before a failure are still dispatched. An error
    /// means the connection must be closed.
    pub fn receive<B: Buf + ?Sized>(&mut self, src: &mut B) -> Result<(), ClientError> {
        while let Some(sentence) = self.reassembler.next_sentence(src)? {
            self.dispatch(sentence)?;
        }
        Ok(())
    }

    fn dispatch(&mut self, sentence: Sentence) -> Result<(), ClientError> {
        if self.login.state() == LoginState::LoggedIn {
            self.publisher.sentence(sentence);
            return Ok(());
        }

        if sentence.is_empty() {
            tracing::debug!("skipping empty sentence during login");
            return Ok(());
        }

        let step = self.login.handle(&sentence);
        self.publisher.login_state(self.login.state());

        match step? {
            LoginStep::Send(reply) => self.queue(&reply, None),
            LoginStep::LoggedIn => Ok(()),
            LoginStep::Ignored => {
                tracing::debug!("ignoring sentence before login: {}", sentence);
                Ok(())
            }
        }
    }

    /// Appends an encoded sentence to the outbound buffer.
    pub fn queue(&mut self, sentence: &Sentence, tag: Option<&str>) -> Result<(), ClientError> {
        let encoded = Encoder::encode_sentence(sentence, tag)?;
        self.outbound.extend_from_slice(&encoded);
        Ok(())
    }

    /// Takes the bytes waiting to be written, if any.
    pub fn take_outbound(&mut self) -> Option<BytesMut> {
        if self.outbound.is_empty() {
            None
        } else {
            Some(self.outbound.split())
        }
    }

    /// Returns whether part of a sentence has been received.
    pub fn has_partial(&self) -> bool {
        self.reassembler.has_partial()
    }

    /// Reports a fatal error and drops the login.
    ///
    /// The caller closes the transport afterwards.
    pub fn fail(&mut self, error: &ClientError) {
        tracing::warn!("connection failed: {}", error);
        self.publisher.error(error.to_string());
        self.login.abort();
        self.publisher.login_state(LoginState::NoLogin);
        self.reassembler.reset();
        self.outbound.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{Credentials, OneShotCredentials};
    use crate::event::{ConnectionEvent, EventReceiver, EventSink, SharedStatus};
    use rosapi_protocol::{ProtocolError, MAX_WORD_LEN};

    const CHALLENGE: &str = "0123456789abcdef0123456789abcdef";

    fn session_with(
        credentials: Arc<dyn CredentialsProvider>,
    ) -> (Session, EventReceiver, SharedStatus) {
        let (sink, rx) = EventSink::channel();
        let status = SharedStatus::default();
        let publisher = Publisher::new(sink, status.clone());
        (Session::new(publisher, credentials, MAX_WORD_LEN), rx, status)
    }

    fn session(password: &'static str) -> (Session, EventReceiver, SharedStatus) {
        session_with(Arc::new(move || Some(Credentials::new("admin", password))))
    }

    fn drain(rx: &mut EventReceiver) -> Vec<ConnectionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn router(words: &[&str]) -> BytesMut {
        Encoder::encode_words(words).unwrap()
    }

    fn logged_in() -> (Session, EventReceiver, SharedStatus) {
        let (mut session, mut rx, status) = session("");
        session
            .transport_state_changed(ConnectionState::Connected)
            .unwrap();
        session
            .receive(&mut router(&["!done", &format!("=ret={}", CHALLENGE)]))
            .unwrap();
        session.receive(&mut router(&["!done"])).unwrap();
        session.take_outbound();
        drain(&mut rx);
        (session, rx, status)
    }

    #[test]
    fn test_connected_sends_login_request() {
        let (mut session, mut rx, status) = session("");
        session
            .transport_state_changed(ConnectionState::Connected)
            .unwrap();

        assert_eq!(
            session.take_outbound().unwrap(),
            Encoder::encode_words(["/login"]).unwrap()
        );
        assert!(session.take_outbound().is_none());
        assert_eq!(
            drain(&mut rx),
            [
                ConnectionEvent::StateChanged(ConnectionState::Connected),
                ConnectionEvent::LoginStateChanged(LoginState::LoginRequested),
            ]
        );
        assert_eq!(status.lock().login, LoginState::LoginRequested);
    }

    #[test]
    fn test_login_success() {
        let (mut session, mut rx, _status) = session("");
        session
            .transport_state_changed(ConnectionState::Connected)
            .unwrap();
        session.take_outbound();

        session
            .receive(&mut router(&["!done", &format!("=ret={}", CHALLENGE)]))
            .unwrap();
        assert_eq!(
            session.take_outbound().unwrap(),
            Encoder::encode_words([
                "/login",
                "=name=admin",
                "=response=00fcb4c16e4375c2590775f3dee281da6b",
            ])
            .unwrap()
        );

        session.receive(&mut router(&["!done"])).unwrap();
        assert_eq!(session.login_state(), LoginState::LoggedIn);

        let logged_in: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter(|e| *e == ConnectionEvent::LoginStateChanged(LoginState::LoggedIn))
            .collect();
        assert_eq!(logged_in.len(), 1);
    }

    #[test]
    fn test_login_failure() {
        let (mut session, mut rx, status) = session("wrong");
        session
            .transport_state_changed(ConnectionState::Connected)
            .unwrap();
        session
            .receive(&mut router(&["!done", &format!("=ret={}", CHALLENGE)]))
            .unwrap();
        drain(&mut rx);

        let err = session
            .receive(&mut router(&[
                "!trap",
                "=message=invalid user name or password",
            ]))
            .unwrap_err();
        assert!(matches!(err, ClientError::AuthenticationFailed(_)));
        session.fail(&err);

        let events = drain(&mut rx);
        assert_eq!(
            events,
            [
                ConnectionEvent::LoginStateChanged(LoginState::NoLogin),
                ConnectionEvent::Error(
                    "invalid username or password (remote msg: invalid user name or password)"
                        .to_string()
                ),
            ]
        );
        assert_eq!(status.lock().login, LoginState::NoLogin);
    }

    #[test]
    fn test_sentences_delivered_after_login_in_order() {
        let (mut session, mut rx, _status) = logged_in();

        let mut bytes = router(&["!re", "=name=ether1", ".tag=2"]);
        bytes.extend_from_slice(&router(&["!re", "=name=ether2", ".tag=2"]));
        bytes.extend_from_slice(&router(&["!done", ".tag=2"]));
        session.receive(&mut bytes).unwrap();

        let commands: Vec<_> = drain(&mut rx)
            .into_iter()
            .map(|e| match e {
                ConnectionEvent::SentenceReceived(s) => {
                    format!("{} {}", s.command(), s.attributes().attribute("name"))
                }
                other => panic!("unexpected event {:?}", other),
            })
            .collect();
        assert_eq!(commands, ["!re ether1", "!re ether2", "!done "]);
    }

    #[test]
    fn test_no_sentence_before_logged_in() {
        let (mut session, mut rx, _status) = session("");
        session
            .transport_state_changed(ConnectionState::Connected)
            .unwrap();

        // Challenge, verdict and a reply all in one read
        let mut bytes = router(&["!done", &format!("=ret={}", CHALLENGE)]);
        bytes.extend_from_slice(&router(&["!done"]));
        bytes.extend_from_slice(&router(&["!re", "=x=1"]));
        session.receive(&mut bytes).unwrap();

        let events = drain(&mut rx);
        let logged_in = events
            .iter()
            .position(|e| *e == ConnectionEvent::LoginStateChanged(LoginState::LoggedIn))
            .unwrap();
        let first_sentence = events
            .iter()
            .position(|e| matches!(e, ConnectionEvent::SentenceReceived(_)))
            .unwrap();
        assert!(logged_in < first_sentence);
    }

    #[test]
    fn test_empty_sentence_skipped_during_login() {
        let (mut session, _rx, _status) = session("");
        session
            .transport_state_changed(ConnectionState::Connected)
            .unwrap();

        session.receive(&mut &[0u8][..]).unwrap();
        assert_eq!(session.login_state(), LoginState::LoginRequested);
    }

    #[test]
    fn test_empty_sentence_delivered_after_login() {
        let (mut session, mut rx, _status) = logged_in();
        session.receive(&mut &[0u8][..]).unwrap();
        assert_eq!(
            drain(&mut rx),
            [ConnectionEvent::SentenceReceived(Sentence::default())]
        );
    }

    #[test]
    fn test_malformed_prefix_fails() {
        let (mut session, _rx, _status) = logged_in();
        let err = session.receive(&mut &[0xF1u8][..]).unwrap_err();
        assert!(matches!(
            err,
            ClientError::Protocol(ProtocolError::InvalidLengthPrefix(0xF1))
        ));
    }

    #[test]
    fn test_password_not_kept_after_login() {
        let provider = Arc::new(OneShotCredentials::new(Credentials::new("admin", "secret")));
        let (mut session, _rx, _status) = session_with(provider.clone());
        session
            .transport_state_changed(ConnectionState::Connected)
            .unwrap();
        session.take_outbound();
        session
            .receive(&mut router(&["!done", &format!("=ret={}", CHALLENGE)]))
            .unwrap();
        assert_eq!(
            session.take_outbound().unwrap(),
            Encoder::encode_words([
                "/login",
                "=name=admin",
                "=response=00ebbe7c3df6b3d902bfd1f355c6e63289",
            ])
            .unwrap()
        );
        session.receive(&mut router(&["!done"])).unwrap();

        assert_eq!(session.login_state(), LoginState::LoggedIn);
        assert!(provider.is_spent());
        assert!(session.credentials.credentials().is_none());
        assert!(!session.login.holds_credentials());
    }

    #[test]
    fn test_missing_credentials_fails() {
        let (mut session, _rx, _status) = session_with(Arc::new(|| None::<Credentials>));
        let err = session
            .transport_state_changed(ConnectionState::Connected)
            .unwrap_err();
        assert!(matches!(err, ClientError::IllegalState(_)));
        assert!(session.take_outbound().is_none());
    }

    #[test]
    fn test_unconnected_resets_login() {
        let (mut session, mut rx, status) = logged_in();
        session.receive(&mut &b"\x03!re"[..]).unwrap();
        assert!(session.has_partial());

        session
            .transport_state_changed(ConnectionState::Unconnected)
            .unwrap();
        assert!(!session.has_partial());
        assert_eq!(
            drain(&mut rx),
            [
                ConnectionEvent::StateChanged(ConnectionState::Unconnected),
                ConnectionEvent::LoginStateChanged(LoginState::NoLogin),
            ]
        );
        assert_eq!(*status.lock(), Default::default());
    }
}
