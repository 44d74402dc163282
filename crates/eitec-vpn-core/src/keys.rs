// Copyright (C) 2025 Joseph Sacchini
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the Free
// Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License for more
// details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use x25519_dalek::{PublicKey, StaticSecret};

/// Length of a base64-encoded 32-byte key including padding.
pub const ENCODED_KEY_LEN: usize = 44;

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("invalid base64 key: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("invalid key length: expected 32 bytes, got {0}")]
    InvalidLength(usize),
}

/// A WireGuard Curve25519 keypair, both halves base64-encoded.
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub private_key: String,
    pub public_key: String,
}

impl KeyPair {
    /// Generate a fresh keypair from 32 random bytes.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);

        Self {
            private_key: BASE64.encode(secret.as_bytes()),
            public_key: BASE64.encode(public.as_bytes()),
        }
    }

    /// Rebuild a keypair from an existing base64 private key, deriving the
    /// public half via scalar-base-mult.
    pub fn from_private_key(private_key_b64: &str) -> Result<Self, KeyError> {
        let secret = StaticSecret::from(decode_key(private_key_b64)?);
        let public = PublicKey::from(&secret);

        Ok(Self {
            private_key: private_key_b64.to_string(),
            public_key: BASE64.encode(public.as_bytes()),
        })
    }
}

/// Generate a 32-byte preshared key, base64-encoded.
pub fn generate_preshared_key() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    BASE64.encode(bytes)
}

/// A valid WireGuard key is a 44-character base64 string decoding to
/// exactly 32 bytes.
pub fn validate_key(key: &str) -> bool {
    key.len() == ENCODED_KEY_LEN && decode_key(key).is_ok()
}

fn decode_key(b64: &str) -> Result<[u8; 32], KeyError> {
    let bytes = BASE64.decode(b64)?;
    let len = bytes.len();
    bytes.try_into().map_err(|_| KeyError::InvalidLength(len))
}
