//! Passphrase-derived key management and XChaCha20-Poly1305 envelope encryption.
//!
//! Every record at rest is sealed as one opaque blob:
//!
//! `[nonce (24 bytes)] + [ciphertext + tag (16 bytes)]`
//!
//! The 192-bit nonce is drawn fresh from the OS CSPRNG for every call, which
//! is large enough that random nonces never need a counter. There is no
//! stored password hash: a wrong passphrase derives a well-formed key that
//! fails authentication on the first decrypt.

use crate::{Result, TaskppError};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::RngCore;
use zeroize::Zeroizing;

/// Symmetric key length in bytes.
pub const KEY_SIZE: usize = 32;
/// XChaCha20-Poly1305 nonce length in bytes.
pub const NONCE_SIZE: usize = 24;
/// Length of a freshly generated salt.
pub const SALT_SIZE: usize = 16;

/// The encryption seam used by the task store and the facade.
pub trait Cipher {
    /// Returns `true` while a key is loaded.
    fn is_unlocked(&self) -> bool;

    /// Seals `plaintext` under the current key.
    ///
    /// # Errors
    ///
    /// Returns [`TaskppError::NotUnlocked`] if no key is loaded.
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Opens a blob produced by [`Cipher::encrypt`].
    ///
    /// # Errors
    ///
    /// Returns [`TaskppError::NotUnlocked`], [`TaskppError::CiphertextTooShort`],
    /// or [`TaskppError::AuthFailure`] for tampered data or a wrong key.
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>>;
}

/// scrypt cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// log2 of the CPU/memory cost `N`.
    pub log_n: u8,
    pub r: u32,
    pub p: u32,
}

impl Default for KdfParams {
    /// N = 32768, r = 8, p = 1.
    fn default() -> Self {
        Self {
            log_n: 15,
            r: 8,
            p: 1,
        }
    }
}

impl KdfParams {
    /// Cheap parameters for tests. Never use for real data.
    #[cfg(test)]
    pub(crate) fn for_test() -> Self {
        Self {
            log_n: 4,
            r: 8,
            p: 1,
        }
    }
}

/// Holds the session key in memory once unlocked; zeroed on drop or replacement.
pub struct KeyManager {
    key: Option<Zeroizing<[u8; KEY_SIZE]>>,
    params: KdfParams,
}

impl KeyManager {
    /// Creates a locked manager with the default scrypt parameters.
    #[must_use]
    pub fn new() -> Self {
        Self::with_params(KdfParams::default())
    }

    #[must_use]
    pub fn with_params(params: KdfParams) -> Self {
        Self { key: None, params }
    }

    /// Derives a key from `passphrase` and `salt` and makes it the live key,
    /// replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns [`TaskppError::EmptySalt`] for an empty salt, or
    /// [`TaskppError::KeyDerivation`] if scrypt rejects the parameters.
    pub fn derive_key(&mut self, passphrase: &str, salt: &[u8]) -> Result<()> {
        if salt.is_empty() {
            return Err(TaskppError::EmptySalt);
        }
        let params = scrypt::Params::new(self.params.log_n, self.params.r, self.params.p, KEY_SIZE)
            .map_err(|e| TaskppError::KeyDerivation(e.to_string()))?;
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        scrypt::scrypt(passphrase.as_bytes(), salt, &params, &mut key[..])
            .map_err(|e| TaskppError::KeyDerivation(e.to_string()))?;
        self.key = Some(key);
        Ok(())
    }

    /// Forgets the live key.
    pub fn lock(&mut self) {
        self.key = None;
    }

    /// Returns 16 bytes from the OS CSPRNG.
    #[must_use]
    pub fn new_salt() -> Vec<u8> {
        let mut salt = vec![0u8; SALT_SIZE];
        rand::rng().fill_bytes(&mut salt);
        salt
    }

    fn aead(&self) -> Result<XChaCha20Poly1305> {
        let key = self.key.as_ref().ok_or(TaskppError::NotUnlocked)?;
        Ok(XChaCha20Poly1305::new(Key::from_slice(&key[..])))
    }
}

impl Default for KeyManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Cipher for KeyManager {
    fn is_unlocked(&self) -> bool {
        self.key.is_some()
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let aead = self.aead()?;
        let mut nonce = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut nonce);

        let sealed = aead
            .encrypt(XNonce::from_slice(&nonce), plaintext)
            .map_err(|e| TaskppError::Encode(format!("encryption failed: {e}")))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let aead = self.aead()?;
        if ciphertext.len() < NONCE_SIZE {
            return Err(TaskppError::CiphertextTooShort);
        }
        let (nonce, sealed) = ciphertext.split_at(NONCE_SIZE);
        aead.decrypt(XNonce::from_slice(nonce), sealed)
            .map_err(|_| TaskppError::AuthFailure)
    }
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("unlocked", &self.is_unlocked())
            .field("params", &self.params)
            .finish()
    }
}
