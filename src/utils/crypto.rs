//! Pluggable payload encryption.
//!
//! A [`Cipher`] is bound to one connection's symmetric key, which comes from
//! the external handshake. The [`CipherRegistry`] maps the negotiated tag to a
//! factory that builds the cipher from that key.
//!
//! Both built-in ciphers are AEADs from `chacha20poly1305`. Every encryption
//! draws a fresh random nonce and prefixes it to the ciphertext:
//!
//! ```text
//! [nonce(24 or 12)] [ciphertext] [tag(16)]
//! ```

use crate::error::{constants, ProtocolError, Result};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce, XChaCha20Poly1305, XNonce};
use std::collections::HashMap;
use std::sync::Arc;
use zeroize::Zeroizing;

/// Tag of the built-in XChaCha20-Poly1305 cipher.
pub const XCHACHA20_POLY1305_TAG: u8 = 1;
/// Tag of the built-in ChaCha20-Poly1305 cipher.
pub const CHACHA20_POLY1305_TAG: u8 = 2;

/// Poly1305 authentication tag length.
const TAG_LEN: usize = 16;

/// 256-bit session key, wiped from memory on drop.
pub type SessionKey = Zeroizing<[u8; 32]>;

/// A payload cipher bound to one connection's key.
pub trait Cipher: Send + Sync {
    fn name(&self) -> &'static str;

    /// Encrypt `plaintext`.
    ///
    /// # Errors
    /// `ProtocolError::EncryptionError` if no nonce can be drawn or the AEAD fails.
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Decrypt and authenticate `ciphertext`, refusing plaintexts larger than `expected_size`.
    ///
    /// # Errors
    /// `ProtocolError::DecryptionError` on truncated input, failed authentication
    /// or an oversized plaintext.
    fn decrypt(&self, ciphertext: &[u8], expected_size: usize) -> Result<Vec<u8>>;
}

fn random_nonce<const N: usize>() -> Result<[u8; N]> {
    let mut nonce = [0u8; N];
    getrandom::fill(&mut nonce)
        .map_err(|_| ProtocolError::EncryptionError(constants::ERR_RANDOM_SOURCE))?;
    Ok(nonce)
}

fn split_sealed(sealed: &[u8], nonce_len: usize, expected_size: usize) -> Result<(&[u8], &[u8])> {
    if sealed.len() < nonce_len + TAG_LEN {
        return Err(ProtocolError::DecryptionError(
            constants::ERR_CIPHERTEXT_SHORT,
        ));
    }
    if sealed.len() - nonce_len - TAG_LEN > expected_size {
        return Err(ProtocolError::DecryptionError(
            constants::ERR_DECRYPTION_FAILED,
        ));
    }
    Ok(sealed.split_at(nonce_len))
}

/// XChaCha20-Poly1305 with a 24-byte random nonce.
pub struct XChaCha20Poly1305Cipher {
    aead: XChaCha20Poly1305,
}

impl XChaCha20Poly1305Cipher {
    const NONCE_LEN: usize = 24;

    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            aead: XChaCha20Poly1305::new(key.into()),
        }
    }
}

impl Cipher for XChaCha20Poly1305Cipher {
    fn name(&self) -> &'static str {
        "xchacha20-poly1305"
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = random_nonce::<24>()?;
        let ciphertext = self
            .aead
            .encrypt(XNonce::from_slice(&nonce), plaintext)
            .map_err(|_| ProtocolError::EncryptionError(constants::ERR_ENCRYPTION_FAILED))?;

        let mut sealed = Vec::with_capacity(Self::NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    fn decrypt(&self, ciphertext: &[u8], expected_size: usize) -> Result<Vec<u8>> {
        let (nonce, body) = split_sealed(ciphertext, Self::NONCE_LEN, expected_size)?;
        self.aead
            .decrypt(XNonce::from_slice(nonce), body)
            .map_err(|_| ProtocolError::DecryptionError(constants::ERR_DECRYPTION_FAILED))
    }
}

/// ChaCha20-Poly1305 (RFC 8439) with a 12-byte random nonce.
pub struct ChaCha20Poly1305Cipher {
    aead: ChaCha20Poly1305,
}

impl ChaCha20Poly1305Cipher {
    const NONCE_LEN: usize = 12;

    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            aead: ChaCha20Poly1305::new(key.into()),
        }
    }
}

impl Cipher for ChaCha20Poly1305Cipher {
    fn name(&self) -> &'static str {
        "chacha20-poly1305"
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = random_nonce::<12>()?;
        let ciphertext = self
            .aead
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| ProtocolError::EncryptionError(constants::ERR_ENCRYPTION_FAILED))?;

        let mut sealed = Vec::with_capacity(Self::NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    fn decrypt(&self, ciphertext: &[u8], expected_size: usize) -> Result<Vec<u8>> {
        let (nonce, body) = split_sealed(ciphertext, Self::NONCE_LEN, expected_size)?;
        self.aead
            .decrypt(Nonce::from_slice(nonce), body)
            .map_err(|_| ProtocolError::DecryptionError(constants::ERR_DECRYPTION_FAILED))
    }
}

type CipherFactory = dyn Fn(&[u8; 32]) -> Box<dyn Cipher> + Send + Sync;

/// Tag → cipher factory lookup shared by all connections.
#[derive(Clone, Default)]
pub struct CipherRegistry {
    factories: HashMap<u8, Arc<CipherFactory>>,
}

impl CipherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with both ChaCha20-Poly1305 variants installed.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(XCHACHA20_POLY1305_TAG, |key| {
            Box::new(XChaCha20Poly1305Cipher::new(key))
        });
        registry.register(CHACHA20_POLY1305_TAG, |key| {
            Box::new(ChaCha20Poly1305Cipher::new(key))
        });
        registry
    }

    /// Install or replace the factory for `tag`.
    pub fn register<F>(&mut self, tag: u8, factory: F)
    where
        F: Fn(&[u8; 32]) -> Box<dyn Cipher> + Send + Sync + 'static,
    {
        self.factories.insert(tag, Arc::new(factory));
    }

    /// Build a cipher for `tag` keyed with `key`.
    ///
    /// # Errors
    /// `ProtocolError::UnsupportedAlgorithm` if nothing is registered under `tag`.
    pub fn build(&self, tag: u8, key: &[u8; 32]) -> Result<Box<dyn Cipher>> {
        let factory = self
            .factories
            .get(&tag)
            .ok_or(ProtocolError::UnsupportedAlgorithm {
                family: "cipher",
                tag,
            })?;
        Ok(factory(key))
    }

    pub fn contains(&self, tag: u8) -> bool {
        self.factories.contains_key(&tag)
    }
}

impl std::fmt::Debug for CipherRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tags: Vec<_> = self.factories.keys().copied().collect();
        tags.sort_unstable();
        f.debug_struct("CipherRegistry").field("tags", &tags).finish()
    }
}
