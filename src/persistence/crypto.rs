//! Passphrase encryption for story files.
//!
//! AES-256-GCM with a fresh 12-byte nonce per call and the 16-byte tag
//! appended to the ciphertext. The key is the SHA-256 digest of the
//! passphrase: one fast hash, no salt, no work factor. That is weak against
//! brute force, and it is kept only because existing encrypted files were
//! written that way. Plug a stronger [`KeyDerivation`] in through
//! [`CryptoBox::with_key_derivation`]; the envelope layout does not change.

use std::fmt;
use std::sync::Arc;

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use log::debug;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::error::{Result, StoryError};

pub const AES_GCM_NONCE_LEN: usize = 12;
pub const AES_GCM_TAG_LEN: usize = 16;

/// On-disk wrapper for an encrypted document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    /// Ciphertext followed by the authentication tag.
    pub encrypted: Vec<u8>,
    pub iv: Vec<u8>,
}

/// Turns a passphrase into a 256-bit cipher key.
pub trait KeyDerivation: Send + Sync {
    fn derive_key(&self, passphrase: &str) -> [u8; 32];
}

/// Single SHA-256 over the UTF-8 passphrase. Compatible with files written
/// by earlier editors, and offers no brute-force resistance.
#[derive(Clone, Copy, Debug, Default)]
pub struct Sha256KeyDerivation;

impl KeyDerivation for Sha256KeyDerivation {
    fn derive_key(&self, passphrase: &str) -> [u8; 32] {
        Sha256::digest(passphrase.as_bytes()).into()
    }
}

pub struct DerivedKey([u8; 32]);

impl DerivedKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DerivedKey(..)")
    }
}

/// Stateless encrypt/decrypt; every call stands alone.
#[derive(Clone)]
pub struct CryptoBox {
    kdf: Arc<dyn KeyDerivation>,
}

impl fmt::Debug for CryptoBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoBox").finish_non_exhaustive()
    }
}

impl CryptoBox {
    pub fn new() -> Result<Self> {
        Self::with_key_derivation(Arc::new(Sha256KeyDerivation))
    }

    /// Fails with `UnsupportedEnvironment` when there is no Tokio runtime to
    /// run cipher work on or the OS entropy source is unusable.
    pub fn with_key_derivation(kdf: Arc<dyn KeyDerivation>) -> Result<Self> {
        check_environment()?;
        Ok(Self { kdf })
    }

    pub async fn derive_key(&self, passphrase: &str) -> Result<DerivedKey> {
        let kdf = Arc::clone(&self.kdf);
        let passphrase = passphrase.to_owned();
        run_blocking(move || Ok(DerivedKey(kdf.derive_key(&passphrase)))).await
    }

    pub async fn encrypt(&self, plaintext: &[u8], passphrase: &str) -> Result<EncryptedEnvelope> {
        let kdf = Arc::clone(&self.kdf);
        let passphrase = passphrase.to_owned();
        let plaintext = plaintext.to_vec();
        let plaintext_len = plaintext.len();
        let envelope = run_blocking(move || {
            let key = kdf.derive_key(&passphrase);
            let cipher = Aes256Gcm::new_from_slice(&key)
                .map_err(|e| StoryError::UnsupportedEnvironment(format!("AES key init failed: {e}")))?;
            let mut nonce = [0u8; AES_GCM_NONCE_LEN];
            rand::rngs::OsRng
                .try_fill_bytes(&mut nonce)
                .map_err(|e| StoryError::UnsupportedEnvironment(format!("entropy source failed: {e}")))?;
            let encrypted = cipher
                .encrypt(Nonce::from_slice(&nonce), plaintext.as_ref())
                .map_err(|e| StoryError::Format(format!("AES-GCM encrypt failed: {e}")))?;
            Ok(EncryptedEnvelope { encrypted, iv: nonce.to_vec() })
        })
        .await?;
        debug!("encrypted {} byte(s) into {} byte(s)", plaintext_len, envelope.encrypted.len());
        Ok(envelope)
    }

    pub async fn decrypt(&self, envelope: &EncryptedEnvelope, passphrase: &str) -> Result<Vec<u8>> {
        if envelope.iv.len() != AES_GCM_NONCE_LEN {
            return Err(StoryError::Decryption(format!(
                "iv must be {AES_GCM_NONCE_LEN} bytes, got {}",
                envelope.iv.len()
            )));
        }
        let kdf = Arc::clone(&self.kdf);
        let passphrase = passphrase.to_owned();
        let envelope = envelope.clone();
        let plaintext = run_blocking(move || {
            let key = kdf.derive_key(&passphrase);
            let cipher = Aes256Gcm::new_from_slice(&key)
                .map_err(|e| StoryError::UnsupportedEnvironment(format!("AES key init failed: {e}")))?;
            cipher
                .decrypt(Nonce::from_slice(&envelope.iv), envelope.encrypted.as_ref())
                .map_err(|_| {
                    StoryError::Decryption("authentication failed (wrong passphrase or corrupted data)".to_string())
                })
        })
        .await?;
        debug!("decrypted {} byte(s)", plaintext.len());
        Ok(plaintext)
    }
}

fn check_environment() -> Result<()> {
    tokio::runtime::Handle::try_current()
        .map_err(|e| StoryError::UnsupportedEnvironment(format!("no async runtime: {e}")))?;
    let mut sample = [0u8; AES_GCM_NONCE_LEN];
    rand::rngs::OsRng
        .try_fill_bytes(&mut sample)
        .map_err(|e| StoryError::UnsupportedEnvironment(format!("entropy source unavailable: {e}")))
}

async fn run_blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => Err(StoryError::UnsupportedEnvironment(format!("crypto task cancelled: {e}"))),
    }
}
