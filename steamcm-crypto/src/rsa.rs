//! RSA key wrap used to bootstrap the CM session key.
//!
//! Steam signs the session key handshake with the public universe key below
//! (1024-bit, public universe), decoded from the `SubjectPublicKeyInfo` PEM
//! blob Steam ships in its own clients. Unlike Telegram's RSA-PAD scheme
//! this uses plain OAEP/SHA-1 padding, so we lean on `rsa` rather than
//! hand-rolling the padding like [`steamcm_crypto`]'s sibling crates
//! hand-roll AES.

use rsa::{Oaep, RsaPublicKey, BigUint};
use sha1::Sha1;

/// Decimal modulus of the compiled-in public-universe RSA key (1024-bit),
/// decoded from the universe's `SubjectPublicKeyInfo` PEM.
const UNIVERSE_KEY_MODULUS: &str =
    "15724357561634927674730175476830986717783112215602592374684467606\
     04065883521072242173339019599191749864557739574256147305317512289\
     77954133934190386306482548943067736608585548911467384424773932642\
     57606729213705626300312183676821131208949827580269426791671110312\
     8551999842076575732754013467986241640244933837449";

const UNIVERSE_KEY_EXPONENT: &str = "17";

/// Load the compiled-in Steam public-universe RSA key.
pub fn universe_key() -> RsaPublicKey {
    let n = BigUint::parse_bytes(UNIVERSE_KEY_MODULUS.as_bytes(), 10)
        .expect("universe key modulus is a valid decimal literal");
    let e = BigUint::parse_bytes(UNIVERSE_KEY_EXPONENT.as_bytes(), 10)
        .expect("universe key exponent is a valid decimal literal");
    RsaPublicKey::new(n, e).expect("compiled-in universe key is well-formed")
}

/// RSA-OAEP/SHA-1 encrypt `data` under `key`.
///
/// `rng` supplies the randomness OAEP needs for its seed; callers pass
/// `&mut rand::rngs::OsRng` in production and a seeded RNG in tests.
pub fn encrypt_oaep(
    rng: &mut (impl rand::CryptoRng + rand::RngCore),
    key: &RsaPublicKey,
    data: &[u8],
) -> Result<Vec<u8>, rsa::Error> {
    key.encrypt(rng, Oaep::new::<Sha1>(), data)
}

/// RSA-OAEP encryption under the universe key failed, almost always because
/// the plaintext exceeds the key's maximum payload size.
#[derive(Debug)]
pub struct WrapError(pub rsa::Error);

impl std::fmt::Display for WrapError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RSA session key wrap failed: {}", self.0)
    }
}

impl std::error::Error for WrapError {}
