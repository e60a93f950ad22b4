//! # rosapi-client
//!
//! Client library for the router API service.
//!
//! This crate provides:
//! - Async TCP connection driven by a background task
//! - MD5 challenge/response login
//! - Tagged sentence sending and an ordered event stream of replies

pub mod connection;
pub mod credentials;
pub mod error;
pub mod event;
pub mod login;
pub mod session;

pub use connection::{Connection, ConnectionConfig};
pub use credentials::{Credentials, CredentialsProvider, OneShotCredentials};
pub use error::ClientError;
pub use event::{ConnectionEvent, ConnectionState, EventReceiver, LoginState};
pub use rosapi_protocol::{Attributes, ResultType, Sentence, DEFAULT_PORT};
