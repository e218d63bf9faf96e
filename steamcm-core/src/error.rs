//! Orchestrator-facing error type. Lower crates' errors fold into this one.

/// Everything that can go wrong driving a CM session.
#[derive(Debug)]
pub enum Error {
    /// TCP/DNS failure, or no healthy server found after a refetch.
    ConnectFailed,
    /// The server rejected the encryption handshake with this result code.
    HandshakeRejected(u32),
    /// Bad magic, a short frame, or a malformed header.
    ProtocolError,
    /// HMAC mismatch while decrypting a frame. Fatal to the session.
    IntegrityError,
    /// The peer closed the connection cleanly mid-session.
    ConnectionClosed,
    /// A `wait_for` call's timeout elapsed.
    Timeout,
    /// `send_protobuf` was called while not in the `Encrypted` state.
    NotConnected,
    /// A message id or body failed to decode; the raw bytes are still
    /// delivered to subscribers.
    DecodeError,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectFailed => write!(f, "failed to connect to any CM server"),
            Self::HandshakeRejected(code) => write!(f, "encryption handshake rejected (code {code})"),
            Self::ProtocolError => write!(f, "malformed frame or header"),
            Self::IntegrityError => write!(f, "frame failed integrity check"),
            Self::ConnectionClosed => write!(f, "connection closed"),
            Self::Timeout => write!(f, "timed out waiting for a matching packet"),
            Self::NotConnected => write!(f, "not connected"),
            Self::DecodeError => write!(f, "failed to decode message"),
        }
    }
}
impl std::error::Error for Error {}

impl From<steamcm_net::TransportError> for Error {
    fn from(e: steamcm_net::TransportError) -> Self {
        match e {
            steamcm_net::TransportError::Io(_) => Self::ConnectFailed,
            steamcm_net::TransportError::ConnectionClosed => Self::ConnectionClosed,
            steamcm_net::TransportError::ProtocolError => Self::ProtocolError,
            steamcm_net::TransportError::Integrity(_) => Self::IntegrityError,
        }
    }
}

/// Map a write failure on an already-`Encrypted` mid-session socket.
///
/// This is deliberately not [`From<steamcm_net::TransportError>`]: that
/// impl's `Io => ConnectFailed` mapping is for the initial-connect path,
/// where "retry the whole connect" is the right recovery. A write failing
/// mid-session means the socket under us is gone, not that server
/// selection needs to run again.
pub fn from_write_failure(e: steamcm_net::TransportError) -> Error {
    match e {
        steamcm_net::TransportError::Io(_) => Error::ConnectionClosed,
        steamcm_net::TransportError::ConnectionClosed => Error::ConnectionClosed,
        steamcm_net::TransportError::ProtocolError => Error::ProtocolError,
        steamcm_net::TransportError::Integrity(_) => Error::IntegrityError,
    }
}

impl From<steamcm_net::HandshakeError> for Error {
    fn from(e: steamcm_net::HandshakeError) -> Self {
        match e {
            steamcm_net::HandshakeError::Rejected(code) => Self::HandshakeRejected(code),
            steamcm_net::HandshakeError::Transport(inner) => inner.into(),
            steamcm_net::HandshakeError::UnexpectedMessage => Self::ProtocolError,
            steamcm_net::HandshakeError::KeyWrap(_) => Self::ConnectFailed,
            steamcm_net::HandshakeError::Timeout => Self::ConnectFailed,
        }
    }
}

impl From<steamcm_proto::DecodeError> for Error {
    fn from(_: steamcm_proto::DecodeError) -> Self {
        Self::DecodeError
    }
}
