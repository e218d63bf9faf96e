//! `VT01`-framed transport, with in-band encryption once a session key has
//! been installed.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use steamcm_crypto::aes;

const MAGIC: [u8; 4] = *b"VT01";

/// Either side of a frame failed to read/write; or the magic was wrong.
#[derive(Debug)]
pub enum TransportError {
    /// Underlying socket error.
    Io(std::io::Error),
    /// The peer cleanly closed the connection mid-frame.
    ConnectionClosed,
    /// A frame's magic bytes weren't `VT01`.
    ProtocolError,
    /// A received frame failed to decrypt.
    Integrity(aes::IntegrityError),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "transport I/O error: {e}"),
            Self::ConnectionClosed => write!(f, "connection closed"),
            Self::ProtocolError => write!(f, "frame magic was not VT01"),
            Self::Integrity(e) => write!(f, "frame failed to decrypt: {e}"),
        }
    }
}
impl std::error::Error for TransportError {}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Self::ConnectionClosed
        } else {
            Self::Io(e)
        }
    }
}

/// Key material installed once the handshake completes. `hmac_secret` is
/// always set alongside `aes_key` on this wire (see
/// `steamcm_crypto::SessionKey`); the two AES helpers stay separate so a
/// transport that never completes the handshake never touches them.
#[derive(Clone)]
pub struct SessionCipher {
    /// AES-128 key used to encrypt/decrypt every frame after the handshake.
    pub aes_key: [u8; 16],
    /// HMAC-SHA1 secret bound into each frame's IV.
    pub hmac_secret: [u8; 16],
}

/// A `VT01`-framed TCP connection.
pub struct FramedTransport {
    stream: TcpStream,
    cipher: Option<SessionCipher>,
}

impl FramedTransport {
    /// Open a TCP connection to `addr` with no session key installed yet.
    pub async fn connect(addr: &str) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self { stream, cipher: None })
    }

    /// Install the session cipher negotiated by the handshake. All frames
    /// sent or received after this call are encrypted.
    pub fn set_cipher(&mut self, cipher: SessionCipher) {
        self.cipher = Some(cipher);
    }

    /// Whether a session cipher has been installed.
    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    /// Send `payload`, encrypting first if a session cipher is installed.
    pub async fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let wire_payload = match &self.cipher {
            Some(cipher) => aes::aes_encrypt_hmac(payload, &cipher.aes_key, &cipher.hmac_secret),
            None => payload.to_vec(),
        };

        self.stream.write_all(&(wire_payload.len() as u32).to_le_bytes()).await?;
        self.stream.write_all(&MAGIC).await?;
        self.stream.write_all(&wire_payload).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Receive one frame, decrypting if a session cipher is installed.
    pub async fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        let mut len_bytes = [0u8; 4];
        self.stream.read_exact(&mut len_bytes).await?;
        let len = u32::from_le_bytes(len_bytes) as usize;

        let mut magic = [0u8; 4];
        self.stream.read_exact(&mut magic).await?;
        if magic != MAGIC {
            return Err(TransportError::ProtocolError);
        }

        let mut payload = vec![0u8; len];
        self.stream.read_exact(&mut payload).await?;

        match &self.cipher {
            Some(cipher) => aes::aes_decrypt_hmac(&payload, &cipher.aes_key, &cipher.hmac_secret)
                .map_err(TransportError::Integrity),
            None => Ok(payload),
        }
    }

    /// Send a frame in the clear even if a cipher is installed (used only
    /// during the handshake, before `set_cipher`).
    pub async fn send_plain(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        self.stream.write_all(&(payload.len() as u32).to_le_bytes()).await?;
        self.stream.write_all(&MAGIC).await?;
        self.stream.write_all(payload).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Receive a frame in the clear, bypassing any installed cipher.
    pub async fn recv_plain(&mut self) -> Result<Vec<u8>, TransportError> {
        let mut len_bytes = [0u8; 4];
        self.stream.read_exact(&mut len_bytes).await?;
        let len = u32::from_le_bytes(len_bytes) as usize;

        let mut magic = [0u8; 4];
        self.stream.read_exact(&mut magic).await?;
        if magic != MAGIC {
            return Err(TransportError::ProtocolError);
        }

        let mut payload = vec![0u8; len];
        self.stream.read_exact(&mut payload).await?;
        Ok(payload)
    }

    /// Split into an owned read half and write half so a read loop and a
    /// sender can run on independent tasks without sharing a lock.
    pub fn into_split(self) -> (TransportReader, TransportWriter) {
        let (read_half, write_half) = self.stream.into_split();
        (
            TransportReader { half: read_half, cipher: self.cipher.clone() },
            TransportWriter { half: write_half, cipher: self.cipher },
        )
    }
}

/// The read half of a split [`FramedTransport`].
pub struct TransportReader {
    half: OwnedReadHalf,
    cipher: Option<SessionCipher>,
}

impl TransportReader {
    /// Receive one frame, decrypting if a session cipher is installed.
    pub async fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        let mut len_bytes = [0u8; 4];
        self.half.read_exact(&mut len_bytes).await?;
        let len = u32::from_le_bytes(len_bytes) as usize;

        let mut magic = [0u8; 4];
        self.half.read_exact(&mut magic).await?;
        if magic != MAGIC {
            return Err(TransportError::ProtocolError);
        }

        let mut payload = vec![0u8; len];
        self.half.read_exact(&mut payload).await?;

        match &self.cipher {
            Some(cipher) => aes::aes_decrypt_hmac(&payload, &cipher.aes_key, &cipher.hmac_secret)
                .map_err(TransportError::Integrity),
            None => Ok(payload),
        }
    }
}

/// The write half of a split [`FramedTransport`].
pub struct TransportWriter {
    half: OwnedWriteHalf,
    cipher: Option<SessionCipher>,
}

impl TransportWriter {
    /// Send `payload`, encrypting first if a session cipher is installed.
    pub async fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let wire_payload = match &self.cipher {
            Some(cipher) => aes::aes_encrypt_hmac(payload, &cipher.aes_key, &cipher.hmac_secret),
            None => payload.to_vec(),
        };

        self.half.write_all(&(wire_payload.len() as u32).to_le_bytes()).await?;
        self.half.write_all(&MAGIC).await?;
        self.half.write_all(&wire_payload).await?;
        self.half.flush().await?;
        Ok(())
    }
}
