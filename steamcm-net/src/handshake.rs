//! The encryption handshake state machine:
//! `Unconnected -> TcpConnected -> AwaitingEncryptRequest -> AwaitingEncryptResult -> Encrypted`.

use std::time::Duration;

use steamcm_crypto::generate_session_key;
use steamcm_proto::header::LegacyHeader;
use steamcm_proto::{message_id, packet};

use crate::transport::{FramedTransport, SessionCipher, TransportError};

/// The negotiated session key material on a successfully completed
/// handshake.
pub struct Handshake {
    /// AES-128 key for all subsequent frame encryption.
    pub aes_key: [u8; 16],
    /// HMAC-SHA1 secret bound into each frame's IV.
    pub hmac_secret: [u8; 16],
}

impl Handshake {
    pub(crate) fn cipher(&self) -> SessionCipher {
        SessionCipher { aes_key: self.aes_key, hmac_secret: self.hmac_secret }
    }
}

/// Failure during the encryption handshake.
#[derive(Debug)]
pub enum HandshakeError {
    /// Transport-level failure (I/O, bad magic, closed connection).
    Transport(TransportError),
    /// A frame didn't parse, or parsed to the wrong message id.
    UnexpectedMessage,
    /// RSA-wrapping the session key failed.
    KeyWrap(steamcm_crypto::rsa::WrapError),
    /// Server rejected the handshake with this result code.
    Rejected(u32),
    /// The handshake did not complete within its time budget.
    Timeout,
}

impl std::fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport error during handshake: {e}"),
            Self::UnexpectedMessage => write!(f, "handshake received an unexpected message"),
            Self::KeyWrap(e) => write!(f, "{e}"),
            Self::Rejected(code) => write!(f, "server rejected the encryption handshake (code {code})"),
            Self::Timeout => write!(f, "handshake did not complete within the connect timeout"),
        }
    }
}
impl std::error::Error for HandshakeError {}

impl From<TransportError> for HandshakeError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

const CHANNEL_ENCRYPT_RESULT_OK: u32 = 1;

/// Drive the handshake to completion over an already-connected
/// [`FramedTransport`], with each read bounded by `read_timeout`.
///
/// On success, installs the negotiated cipher on `transport` and returns
/// the key material for the caller to persist alongside the session.
pub async fn run(transport: &mut FramedTransport, read_timeout: Duration) -> Result<Handshake, HandshakeError> {
    let request_frame = tokio::time::timeout(read_timeout, transport.recv_plain())
        .await
        .map_err(|_| HandshakeError::Timeout)??;
    let request = packet::parse(&request_frame).map_err(|_| HandshakeError::UnexpectedMessage)?;
    if request.is_protobuf || request.message_id != message_id::CHANNEL_ENCRYPT_REQUEST {
        return Err(HandshakeError::UnexpectedMessage);
    }
    tracing::debug!("received ChannelEncryptRequest");
    let challenge = parse_encrypt_request_body(&request.body)?;

    let session_key = generate_session_key(Some(&challenge)).map_err(HandshakeError::KeyWrap)?;
    let crc = crc32fast::hash(&session_key.encrypted_blob);

    let response_body = build_encrypt_response_body(&session_key.encrypted_blob, crc);
    let response_header = LegacyHeader::new(message_id::CHANNEL_ENCRYPT_RESPONSE);
    let response_frame = packet::encode_legacy(response_header, &response_body);
    transport.send_plain(&response_frame).await?;
    tracing::debug!("sent ChannelEncryptResponse");

    let result_frame = tokio::time::timeout(read_timeout, transport.recv_plain())
        .await
        .map_err(|_| HandshakeError::Timeout)??;
    let result = packet::parse(&result_frame).map_err(|_| HandshakeError::UnexpectedMessage)?;
    if result.is_protobuf || result.message_id != message_id::CHANNEL_ENCRYPT_RESULT {
        return Err(HandshakeError::UnexpectedMessage);
    }
    let code = parse_encrypt_result_body(&result.body)?;
    if code != CHANNEL_ENCRYPT_RESULT_OK {
        tracing::warn!(code, "server rejected the encryption handshake");
        return Err(HandshakeError::Rejected(code));
    }

    let handshake =
        Handshake { aes_key: session_key.aes_key(), hmac_secret: session_key.hmac_secret() };
    transport.set_cipher(handshake.cipher());
    tracing::info!("encryption handshake complete");
    Ok(handshake)
}

/// `ChannelEncryptRequest` body: `protocol_version:u32 | universe:u32 | challenge:bytes`.
fn parse_encrypt_request_body(body: &[u8]) -> Result<Vec<u8>, HandshakeError> {
    if body.len() < 8 {
        return Err(HandshakeError::UnexpectedMessage);
    }
    Ok(body[8..].to_vec())
}

/// `ChannelEncryptResponse` body:
/// `protocol_version:u32=1 | key_size:u32=128 | key:bytes | crc:u32 | trailing_zero:u32=0`.
fn build_encrypt_response_body(encrypted_key: &[u8], crc: u32) -> Vec<u8> {
    let mut body = Vec::with_capacity(16 + encrypted_key.len());
    body.extend(1u32.to_le_bytes());
    body.extend((encrypted_key.len() as u32).to_le_bytes());
    body.extend(encrypted_key);
    body.extend(crc.to_le_bytes());
    body.extend(0u32.to_le_bytes());
    body
}

/// `ChannelEncryptResult` body: a single little-endian `u32` result code.
fn parse_encrypt_result_body(body: &[u8]) -> Result<u32, HandshakeError> {
    let bytes: [u8; 4] = body.get(0..4).ok_or(HandshakeError::UnexpectedMessage)?.try_into().unwrap();
    Ok(u32::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_response_body_reports_correct_key_size_and_crc() {
        let key = vec![0u8; 128];
        let crc = crc32fast::hash(&key);
        let body = build_encrypt_response_body(&key, crc);

        let protocol_version = u32::from_le_bytes(body[0..4].try_into().unwrap());
        let key_size = u32::from_le_bytes(body[4..8].try_into().unwrap());
        let embedded_crc = u32::from_le_bytes(body[body.len() - 8..body.len() - 4].try_into().unwrap());

        assert_eq!(protocol_version, 1);
        assert_eq!(key_size, 128);
        assert_eq!(embedded_crc, crc);
        assert_eq!(&body[8..8 + 128], key.as_slice());
    }

    #[test]
    fn parses_challenge_from_encrypt_request_body() {
        let mut body = Vec::new();
        body.extend(1u32.to_le_bytes());
        body.extend(1u32.to_le_bytes());
        body.extend([0u8; 16]);
        assert_eq!(parse_encrypt_request_body(&body).unwrap(), vec![0u8; 16]);
    }

    #[test]
    fn parses_ok_result_code() {
        assert_eq!(parse_encrypt_result_body(&1u32.to_le_bytes()).unwrap(), 1);
    }
}
