//! CURVE key handling: normalization, derivation, generation.
//!
//! Every key string entering the public surface passes through
//! [`cut_pad_key`] so that map lookups behave identically for user-supplied
//! strings of any length, while valid Z85 keys pass through unchanged.

use x25519_dalek::{PublicKey, StaticSecret};

use crate::consts::KEY_Z85_LEN;
use crate::error::{Result, RhizomeError};

/// Normalize a key string to exactly [`KEY_Z85_LEN`] characters.
///
/// Shorter strings are right-padded with ASCII spaces, longer ones are
/// truncated. Idempotent.
///
/// # Examples
///
/// ```
/// use rhizome_core::keys::cut_pad_key;
///
/// let k = cut_pad_key("abc");
/// assert_eq!(k.len(), 40);
/// assert_eq!(cut_pad_key(&k), k);
/// ```
#[must_use]
pub fn cut_pad_key(s: &str) -> String {
    let mut key: String = s.chars().take(KEY_Z85_LEN).collect();
    let n = key.chars().count();
    for _ in n..KEY_Z85_LEN {
        key.push(' ');
    }
    key
}

/// Derive the Z85 public key from a Z85 secret key.
///
/// Equivalent to libzmq's `zmq_curve_public`: decode the secret, multiply
/// the Curve25519 base point, re-encode.
///
/// # Errors
///
/// Fails when the normalized secret is not valid Z85.
pub fn derive_publickey(secretkey: &str) -> Result<String> {
    let secretkey = cut_pad_key(secretkey);
    let raw = zmq::z85_decode(&secretkey)
        .map_err(|_| RhizomeError::invalid_key("secret key is not valid Z85"))?;
    let raw: [u8; 32] = raw
        .try_into()
        .map_err(|_| RhizomeError::invalid_key("secret key must decode to 32 bytes"))?;
    let public = PublicKey::from(&StaticSecret::from(raw));
    zmq::z85_encode(public.as_bytes())
        .map_err(|_| RhizomeError::invalid_key("derived public key failed Z85 encoding"))
}

/// Generate a fresh `(public, secret)` CURVE keypair, Z85-encoded.
///
/// # Errors
///
/// Fails when libzmq was built without CURVE support.
pub fn generate_keypair() -> Result<(String, String)> {
    let pair = zmq::CurveKeyPair::new()?;
    let public = zmq::z85_encode(&pair.public_key)
        .map_err(|_| RhizomeError::invalid_key("generated public key failed Z85 encoding"))?;
    let secret = zmq::z85_encode(&pair.secret_key)
        .map_err(|_| RhizomeError::invalid_key("generated secret key failed Z85 encoding"))?;
    Ok((public, secret))
}
