//! # steamcm — Steam Connection Manager client library
//!
//! `steamcm` is a modular Rust library for the Steam Connection Manager wire
//! protocol. It consists of four focused sub-crates wired together here for
//! convenience:
//!
//! | Sub-crate        | Role                                               |
//! |-------------------|---------------------------------------------------|
//! | `steamcm-crypto` | RSA bootstrap, AES-128-CBC + HMAC-SHA1 framing      |
//! | `steamcm-proto`  | Packet headers, message ids, Multi (de)compression  |
//! | `steamcm-net`    | `VT01` framed transport, the handshake state machine|
//! | `steamcm-core`   | Server registry, event bus, session orchestrator    |
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use steamcm::core::{Config, NoRetries, Session};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let session = Session::new(Config::default());
//! session.connect(&NoRetries, true).await?;
//! session.send_protobuf(steamcm::proto::message_id::CLIENT_HEART_BEAT, &[], None).await?;
//! session.disconnect().await;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Re-export of [`steamcm_crypto`] — RSA OAEP bootstrap, AES-CBC + HMAC framing.
pub use steamcm_crypto as crypto;

/// Re-export of [`steamcm_proto`] — packet headers, message ids, Multi handling.
pub use steamcm_proto as proto;

/// Re-export of [`steamcm_net`] — framed transport and the encryption handshake.
pub use steamcm_net as net;

/// Re-export of [`steamcm_core`] — server registry, event bus, session orchestrator.
pub use steamcm_core as core;

// ─── Convenience re-exports ───────────────────────────────────────────────────

pub use steamcm_core::{AutoSleep, Config, Error, EventBus, NoRetries, Registry, RetryPolicy, ServerEndpoint, Session, SubscriptionId};
pub use steamcm_proto::Packet;
