//! Crate-wide error type.
//!
//! Modeled on the error enums used throughout the reference corpus
//! (e.g. `rust-srec`'s `error::Error`, `twitch-irc-rs`'s `TCPTransportConnectError`):
//! one `thiserror`-derived enum with a `#[from]` per transport-level failure,
//! plus one variant per protocol-level failure named in the spec's error taxonomy.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// All ways a command or connection operation can fail.
#[derive(Debug, Error)]
pub enum Error {
    /// The underlying TCP socket failed to connect, read, or write.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS handshake or certificate validation failed.
    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),

    /// The configured server name could not be used as a TLS SNI host.
    #[error("invalid server name: {0}")]
    InvalidServerName(#[from] rustls_pki_types::InvalidDnsNameError),

    /// A wire line failed to parse. Logged and skipped by the reader loop
    /// (§7); never surfaced to a command caller.
    #[error("failed to parse line: {0}")]
    Parse(String),

    /// A command was issued while the connection was not `OPEN`.
    #[error("not connected")]
    NotConnected,

    /// A restricted command was issued by an anonymous (`justinfan`) identity.
    #[error("command not available for anonymous identity")]
    Anonymous,

    /// No correlated NOTICE/PONG/JOIN arrived within `command_timeout`.
    #[error("command timed out waiting for a server reply")]
    CommandTimeout,

    /// The server replied with a failure `msg-id` for a pending command.
    #[error("command failed in #{channel}: {msg_id}")]
    CommandFailed { msg_id: String, channel: String },

    /// Login NOTICE indicated invalid credentials.
    #[error("login authentication failed")]
    Authentication,

    /// `wait_for` timed out before a matching event was emitted.
    #[error("timed out waiting for event \"{0}\"")]
    WaitForTimeout(&'static str),

    /// The supervisor exhausted `max_reconnect_attempts`.
    #[error("maximum reconnection attempts reached")]
    MaxReconnectAttemptsReached,

    /// Configuration was missing a field required to perform an operation.
    #[error("configuration error: {0}")]
    Configuration(String),
}
