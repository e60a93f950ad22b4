//! Client error types.

use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] rosapi_protocol::ProtocolError),

    #[error("trying to connect an already opened connection")]
    AlreadyConnected,

    #[error("not connected")]
    NotConnected,

    #[error("connection closed by remote host")]
    TransportClosed,

    #[error("connection timeout")]
    Timeout,

    #[error("host lookup failed: {0}")]
    HostNotFound(String),

    #[error("unknown remote login sentence format: {0}")]
    InvalidLoginResponse(&'static str),

    #[error("invalid username or password{}", remote_message(.0))]
    AuthenticationFailed(Option<String>),

    #[error("illegal state: {0}")]
    IllegalState(&'static str),
}

fn remote_message(message: &Option<String>) -> String {
    match message {
        Some(msg) => format!(" (remote msg: {})", msg),
        None => String::new(),
    }
}

impl ClientError {
    /// Returns whether the error is a violation of the wire or login
    /// protocol by the peer.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            ClientError::Protocol(_) | ClientError::InvalidLoginResponse(_)
        )
    }

    /// Returns whether this error is a failure of the underlying transport.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_)
                | ClientError::TransportClosed
                | ClientError::Timeout
                | ClientError::HostNotFound(_)
        )
    }
}
