//! AES-256-GCM encryption of JSON documents at rest.
//!
//! The key is derived with scrypt from the machine's hostname and the current
//! OS user plus a fixed salt. It is never written anywhere, so a file
//! encrypted on one host/user cannot be opened on another.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Envelope format version written by [`Cipher::encrypt`].
pub const FORMAT_VERSION: u32 = 1;

/// IV length for AES-GCM (96 bits).
const IV_LEN: usize = 12;

/// GCM authentication tag length (128 bits).
const TAG_LEN: usize = 16;

const KEY_LEN: usize = 32;

const KEY_SALT: &[u8] = b"teams-session/at-rest/v1";

/// scrypt cost: N = 2^14, r = 8, p = 1.
const SCRYPT_LOG_N: u8 = 14;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;

/// On-disk envelope. All byte fields are standard base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedBlob {
    pub iv: String,
    pub content: String,
    pub tag: String,
    pub version: u32,
}

/// Tampering, a foreign machine and corruption all look the same here.
#[derive(Debug, Error)]
pub enum DecryptionError {
    #[error("unsupported encryption format version {0}")]
    UnsupportedVersion(u32),
    #[error("malformed encrypted field `{0}`")]
    Malformed(&'static str),
    #[error("authentication tag did not verify")]
    Authentication,
    #[error("decrypted payload is not UTF-8")]
    Utf8,
}

/// Symmetric cipher bound to one machine identity.
#[derive(Clone)]
pub struct Cipher {
    aead: Aes256Gcm,
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cipher").finish_non_exhaustive()
    }
}

impl Cipher {
    /// Derive the key for the current host and OS user.
    pub fn for_machine() -> Result<Self> {
        Self::from_identity(&machine_identity())
    }

    /// Derive the key from arbitrary identity material.
    pub fn from_identity(identity: &str) -> Result<Self> {
        let seed = Sha256::digest(identity.as_bytes());
        let params = scrypt::Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, KEY_LEN)
            .map_err(|e| anyhow!("invalid scrypt parameters: {}", e))?;
        let mut key = [0u8; KEY_LEN];
        scrypt::scrypt(&seed, KEY_SALT, &params, &mut key)
            .map_err(|e| anyhow!("scrypt key derivation failed: {}", e))?;
        let aead = Aes256Gcm::new_from_slice(&key)
            .map_err(|_| anyhow!("invalid AES-256 key length"))?;
        Ok(Self { aead })
    }

    /// Encrypt `plaintext` under a fresh random IV.
    pub fn encrypt(&self, plaintext: &str) -> Result<EncryptedBlob> {
        let mut iv = [0u8; IV_LEN];
        getrandom::getrandom(&mut iv).context("OS CSPRNG failed")?;

        let mut sealed = self
            .aead
            .encrypt(Nonce::from_slice(&iv), plaintext.as_bytes())
            .map_err(|_| anyhow!("AES-GCM encryption failed"))?;
        // aes-gcm appends the tag to the ciphertext
        let tag = sealed.split_off(sealed.len() - TAG_LEN);

        Ok(EncryptedBlob {
            iv: B64.encode(iv),
            content: B64.encode(sealed),
            tag: B64.encode(tag),
            version: FORMAT_VERSION,
        })
    }

    pub fn decrypt(&self, blob: &EncryptedBlob) -> Result<String, DecryptionError> {
        if blob.version != FORMAT_VERSION {
            return Err(DecryptionError::UnsupportedVersion(blob.version));
        }

        let iv = B64
            .decode(&blob.iv)
            .map_err(|_| DecryptionError::Malformed("iv"))?;
        if iv.len() != IV_LEN {
            return Err(DecryptionError::Malformed("iv"));
        }
        let mut sealed = B64
            .decode(&blob.content)
            .map_err(|_| DecryptionError::Malformed("content"))?;
        let tag = B64
            .decode(&blob.tag)
            .map_err(|_| DecryptionError::Malformed("tag"))?;
        if tag.len() != TAG_LEN {
            return Err(DecryptionError::Malformed("tag"));
        }
        sealed.extend_from_slice(&tag);

        let plaintext = self
            .aead
            .decrypt(Nonce::from_slice(&iv), sealed.as_slice())
            .map_err(|_| DecryptionError::Authentication)?;
        String::from_utf8(plaintext).map_err(|_| DecryptionError::Utf8)
    }
}

/// Structural check only: string `iv`, `content`, `tag` and numeric `version`.
pub fn is_encrypted_shape(value: &serde_json::Value) -> bool {
    let Some(obj) = value.as_object() else {
        return false;
    };
    ["iv", "content", "tag"]
        .iter()
        .all(|k| obj.get(*k).is_some_and(|v| v.is_string()))
        && obj.get("version").is_some_and(|v| v.is_number())
}

/// Hostname and OS user, the material the at-rest key is bound to.
fn machine_identity() -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown-host".to_string());
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown-user".to_string());
    format!("{}|{}", host, user)
}
