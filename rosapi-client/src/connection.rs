//! Connection management.
//!
//! A [`Connection`] is a handle; the socket, the reassembler and the login
//! machine live in a driver task spawned by [`Connection::connect`]. Host
//! calls reach the task through a command channel, and everything the task
//! observes comes back as [`ConnectionEvent`]s.
//!
//! [`ConnectionEvent`]: crate::event::ConnectionEvent

use crate::credentials::CredentialsProvider;
use crate::error::ClientError;
use crate::event::{
    ConnectionState, EventReceiver, EventSink, LoginState, Publisher, SharedStatus,
};
use crate::session::Session;
use bytes::BytesMut;
use parking_lot::Mutex;
use rosapi_protocol::{Encoder, Sentence, MAX_WORD_LEN};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Limit for host lookup and for the TCP connect, each.
    pub connect_timeout: Duration,
    /// Read buffer size for socket reads.
    pub read_buffer_size: usize,
    /// Longest word accepted from or sent to the router.
    pub max_word_len: u32,
}

impl ConnectionConfig {
    pub fn new() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_word_len: MAX_WORD_LEN,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }

    pub fn with_max_word_len(mut self, len: u32) -> Self {
        self.max_word_len = len.min(MAX_WORD_LEN);
        self
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Requests from the handle to its driver task.
#[derive(Debug)]
enum Command {
    /// Encoded sentence to write.
    Write(BytesMut),
    /// Flush and shut down gracefully.
    Disconnect,
}

struct Driver {
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

/// A connection to a router's API service.
pub struct Connection {
    config: ConnectionConfig,
    credentials: Arc<dyn CredentialsProvider>,
    publisher: Publisher,
    /// Next tag handed out by [`Connection::send`].
    next_tag: AtomicU64,
    driver: Mutex<Option<Driver>>,
}

impl Connection {
    /// Creates a new connection (not yet connected) and the receiver of its
    /// events.
    pub fn new(
        config: ConnectionConfig,
        credentials: impl CredentialsProvider + 'static,
    ) -> (Self, EventReceiver) {
        let (events, rx) = EventSink::channel();
        let connection = Self {
            config,
            credentials: Arc::new(credentials),
            publisher: Publisher::new(events, SharedStatus::default()),
            next_tag: AtomicU64::new(1),
            driver: Mutex::new(None),
        };
        (connection, rx)
    }

    /// Starts connecting to `host:port` and returns immediately.
    ///
    /// Progress is reported through state change events. Login starts on its
    /// own once the transport is connected. Must be called from within a
    /// tokio runtime.
    pub fn connect(&self, host: &str, port: u16) -> Result<(), ClientError> {
        let mut driver = self.driver.lock();

        if self.connection_state() != ConnectionState::Unconnected {
            let err = ClientError::AlreadyConnected;
            tracing::debug!("connect({}:{}) refused: {}", host, port, err);
            self.publisher.error(err.to_string());
            return Err(err);
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| ClientError::IllegalState("connect called outside a tokio runtime"))?;

        self.publisher.connection_state(ConnectionState::HostLookup);

        let (commands, commands_rx) = mpsc::unbounded_channel();
        let session = Session::new(
            self.publisher.clone(),
            Arc::clone(&self.credentials),
            self.config.max_word_len,
        );
        let task = runtime.spawn(drive(
            host.to_string(),
            port,
            self.config.clone(),
            session,
            commands_rx,
        ));

        *driver = Some(Driver { commands, task });
        Ok(())
    }

    /// Closes the connection. Does nothing unless connected or closing, so a
    /// lookup or connect in progress keeps running.
    ///
    /// With `force` the socket is dropped at once and unsent bytes are lost.
    /// Otherwise everything already sent is flushed before the write side is
    /// shut down. Either way the connection is unconnected on return.
    pub async fn close(&self, force: bool) {
        if !matches!(
            self.connection_state(),
            ConnectionState::Connected | ConnectionState::Closing
        ) {
            tracing::debug!("close ignored while {}", self.connection_state());
            return;
        }

        let driver = self.driver.lock().take();
        let Some(driver) = driver else {
            return;
        };

        if force {
            tracing::debug!("aborting connection");
            driver.task.abort();
            let _ = driver.task.await;

            if self.connection_state() != ConnectionState::Unconnected {
                self.publisher.connection_state(ConnectionState::Unconnected);
                self.publisher.login_state(LoginState::NoLogin);
                self.publisher.error("forced abort/close on socket");
            }
        } else {
            tracing::debug!("closing connection");
            let _ = driver.commands.send(Command::Disconnect);
            if let Err(e) = driver.task.await {
                tracing::warn!("connection task failed: {}", e);
            }
        }
    }

    /// Sends a sentence to the router and returns the tag it was sent with.
    ///
    /// With `add_tag` the sentence's own tag is used, or a fresh one if it
    /// has none. Without it no tag word is sent and the returned tag is
    /// empty. Only allowed once logged in. Words longer than the configured
    /// `max_word_len` are refused and nothing is sent.
    pub fn send(&self, sentence: &Sentence, add_tag: bool) -> Result<String, ClientError> {
        if !self.is_logged_in() {
            return Err(ClientError::IllegalState("not logged in"));
        }
        if sentence.command().is_empty() {
            return Err(ClientError::IllegalState("empty command"));
        }

        let tag = if !add_tag {
            String::new()
        } else if !sentence.tag().is_empty() {
            sentence.tag().to_string()
        } else {
            self.next_tag.fetch_add(1, Ordering::SeqCst).to_string()
        };

        let encoded = Encoder::encode_sentence_limited(
            sentence,
            add_tag.then_some(tag.as_str()),
            self.config.max_word_len,
        )?;
        tracing::debug!(
            "sending '{}' tag={:?} ({} bytes)",
            sentence.command(),
            tag,
            encoded.len()
        );

        let driver = self.driver.lock();
        driver
            .as_ref()
            .ok_or(ClientError::NotConnected)?
            .commands
            .send(Command::Write(encoded))
            .map_err(|_| ClientError::NotConnected)?;

        Ok(tag)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.publisher.status().connection
    }

    pub fn login_state(&self) -> LoginState {
        self.publisher.status().login
    }

    /// Returns whether the transport is connected, logged in or not.
    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    /// Returns whether the transport is connected and the router accepted
    /// the credentials.
    pub fn is_logged_in(&self) -> bool {
        self.is_connected() && self.login_state() == LoginState::LoggedIn
    }

    pub fn is_closing(&self) -> bool {
        self.connection_state() == ConnectionState::Closing
    }

    /// Returns whether a host lookup or TCP connect is in progress.
    pub fn is_connecting(&self) -> bool {
        matches!(
            self.connection_state(),
            ConnectionState::HostLookup | ConnectionState::Connecting
        )
    }
}

/// Body of the driver task. Ends with the connection unconnected.
async fn drive(
    host: String,
    port: u16,
    config: ConnectionConfig,
    mut session: Session,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    if let Err(e) = run(&host, port, &config, &mut session, &mut commands).await {
        session.fail(&e);
    }
    if let Err(e) = session.transport_state_changed(ConnectionState::Unconnected) {
        tracing::warn!("failed to reset connection: {}", e);
    }
}

async fn run(
    host: &str,
    port: u16,
    config: &ConnectionConfig,
    session: &mut Session,
    commands: &mut mpsc::UnboundedReceiver<Command>,
) -> Result<(), ClientError> {
    let stream = tokio::select! {
        stream = open(host, port, config, session) => stream?,
        _ = commands.recv() => {
            tracing::debug!("connection dropped while connecting to {}:{}", host, port);
            return Ok(());
        }
    };

    session.transport_state_changed(ConnectionState::Connected)?;

    let (mut reader, mut writer) = stream.into_split();
    let mut buf = vec![0u8; config.read_buffer_size];

    loop {
        if let Some(bytes) = session.take_outbound() {
            writer.write_all(&bytes).await?;
        }

        tokio::select! {
            read = reader.read(&mut buf) => {
                let n = read?;
                if n == 0 {
                    tracing::debug!("connection closed by {}:{}", host, port);
                    return Err(ClientError::TransportClosed);
                }
                tracing::debug!("received {} bytes", n);
                session.receive(&mut &buf[..n])?;
            }
            command = commands.recv() => match command {
                Some(Command::Write(bytes)) => {
                    writer.write_all(&bytes).await?;
                }
                Some(Command::Disconnect) | None => {
                    session.transport_state_changed(ConnectionState::Closing)?;
                    if let Some(bytes) = session.take_outbound() {
                        writer.write_all(&bytes).await?;
                    }
                    writer.shutdown().await?;
                    return Ok(());
                }
            },
        }
    }
}

/// Resolves `host` and connects to the first address that accepts.
async fn open(
    host: &str,
    port: u16,
    config: &ConnectionConfig,
    session: &mut Session,
) -> Result<TcpStream, ClientError> {
    tracing::debug!("looking up {}", host);
    let addrs: Vec<SocketAddr> =
        tokio::time::timeout(config.connect_timeout, tokio::net::lookup_host((host, port)))
            .await
            .map_err(|_| ClientError::Timeout)?
            .map_err(|e| ClientError::HostNotFound(format!("{}: {}", host, e)))?
            .collect();
    if addrs.is_empty() {
        return Err(ClientError::HostNotFound(host.to_string()));
    }

    session.transport_state_changed(ConnectionState::Connecting)?;
    tracing::debug!("connecting to {:?}", addrs);

    let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(&addrs[..]))
        .await
        .map_err(|_| {
            tracing::debug!("connection timeout");
            ClientError::Timeout
        })??;

    stream.set_nodelay(true).ok();
    Ok(stream)
}
