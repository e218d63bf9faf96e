//! Framed transport and encryption handshake for the Steam CM wire
//! protocol: `VT01` length-prefixed framing plus the
//! `ChannelEncryptRequest -> ChannelEncryptResponse -> ChannelEncryptResult`
//! state machine that bootstraps the session cipher.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod handshake;
pub mod transport;

pub use handshake::{Handshake, HandshakeError};
pub use transport::{FramedTransport, SessionCipher, TransportError, TransportReader, TransportWriter};
