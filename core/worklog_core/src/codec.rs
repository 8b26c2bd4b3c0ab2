//! Reversible per-owner transform applied to task content at rest.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{CoreError, CoreResult};

type HmacSha256 = Hmac<Sha256>;

const FORMAT_PREFIX: &str = "v1.";
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

pub trait ContentCodec: Send + Sync {
    fn encode(&self, plaintext: &str, owner_id: &str) -> CoreResult<String>;
    fn decode(&self, ciphertext: &str, owner_id: &str) -> CoreResult<String>;
}

/// AES-256-GCM under a per-owner key.
///
/// Layout: `v1.` + base64(nonce[12] | ciphertext | tag[16]). The owner key is
/// HMAC-SHA256(service secret, owner id), so text sealed for one owner fails
/// authentication under any other.
pub struct KeyedCodec {
    secret: Vec<u8>,
}

impl KeyedCodec {
    pub fn new(secret: impl AsRef<[u8]>) -> CoreResult<Self> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(CoreError::InvalidInput("content secret must not be empty"));
        }
        Ok(Self {
            secret: secret.to_vec(),
        })
    }

    fn owner_cipher(&self, owner_id: &str) -> CoreResult<Aes256Gcm> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.secret)
            .map_err(|_| CoreError::ContentCodec("invalid secret length".to_string()))?;
        mac.update(owner_id.as_bytes());
        let key = mac.finalize().into_bytes();
        Aes256Gcm::new_from_slice(&key)
            .map_err(|_| CoreError::ContentCodec("invalid key length".to_string()))
    }
}

impl ContentCodec for KeyedCodec {
    fn encode(&self, plaintext: &str, owner_id: &str) -> CoreResult<String> {
        let cipher = self.owner_cipher(owner_id)?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CoreError::ContentCodec("encrypt failed".to_string()))?;

        let mut raw = Vec::with_capacity(NONCE_LEN + sealed.len());
        raw.extend_from_slice(&nonce);
        raw.extend_from_slice(&sealed);
        Ok(format!("{FORMAT_PREFIX}{}", BASE64.encode(raw)))
    }

    fn decode(&self, ciphertext: &str, owner_id: &str) -> CoreResult<String> {
        let encoded = ciphertext
            .strip_prefix(FORMAT_PREFIX)
            .ok_or_else(|| CoreError::ContentCodec("unknown format".to_string()))?;
        let raw = BASE64
            .decode(encoded)
            .map_err(|e| CoreError::ContentCodec(format!("base64: {e}")))?;
        if raw.len() < NONCE_LEN + TAG_LEN {
            return Err(CoreError::ContentCodec("truncated".to_string()));
        }

        let (nonce, sealed) = raw.split_at(NONCE_LEN);
        let cipher = self.owner_cipher(owner_id)?;
        let plain = cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| CoreError::ContentCodec("authentication failed".to_string()))?;
        String::from_utf8(plain).map_err(|e| CoreError::ContentCodec(format!("utf-8: {e}")))
    }
}

/// Stores content as-is. Test double.
#[cfg(test)]
pub struct IdentityCodec;

#[cfg(test)]
impl ContentCodec for IdentityCodec {
    fn encode(&self, plaintext: &str, _owner_id: &str) -> CoreResult<String> {
        Ok(plaintext.to_string())
    }

    fn decode(&self, ciphertext: &str, _owner_id: &str) -> CoreResult<String> {
        Ok(ciphertext.to_string())
    }
}
