// ABOUTME: Master encryption key loading and AES-256-GCM encryption of stored vendor credentials
// ABOUTME: Ciphertexts carry a random nonce and are bound to their connection, vendor, and column
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Credential encryption at rest.
//!
//! Each token column is encrypted separately with AES-256-GCM. The associated
//! data is `connection_id|vendor|column`, so a ciphertext copied into another
//! row or column fails authentication instead of decrypting to a valid token.

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::Aes256Gcm;
use base64::{engine::general_purpose::STANDARD, Engine};
use healthsync_core::constants::env_config;
use healthsync_core::errors::{AppError, AppResult};
use healthsync_core::models::VendorKind;
use rand::RngCore;
use tracing::{info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

const NONCE_LEN: usize = 12;

/// 32-byte key protecting every stored credential
pub struct MasterEncryptionKey {
    key: Zeroizing<[u8; 32]>,
}

impl MasterEncryptionKey {
    /// Key from raw bytes
    #[must_use]
    pub fn from_bytes(key: [u8; 32]) -> Self {
        Self {
            key: Zeroizing::new(key),
        }
    }

    /// Random key
    #[must_use]
    pub fn generate() -> Self {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        Self::from_bytes(key)
    }

    /// Decode a base64 key
    ///
    /// # Errors
    ///
    /// Returns a config error when the value is not base64 or not 32 bytes
    pub fn from_base64(encoded: &str) -> AppResult<Self> {
        let bytes = Zeroizing::new(STANDARD.decode(encoded.trim()).map_err(|e| {
            AppError::config(format!(
                "Invalid base64 encoding in {}: {e}",
                env_config::MASTER_ENCRYPTION_KEY
            ))
        })?);
        let key: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            AppError::config(format!(
                "Master encryption key must be exactly 32 bytes, got {} bytes",
                bytes.len()
            ))
        })?;
        Ok(Self::from_bytes(key))
    }

    /// Use the configured key, or generate a temporary one for development
    ///
    /// # Errors
    ///
    /// Returns a config error when a configured key is invalid
    pub fn load_or_generate(configured: Option<&str>) -> AppResult<Self> {
        if let Some(encoded) = configured {
            info!("Loading master encryption key from environment");
            return Self::from_base64(encoded);
        }

        warn!(
            "{} not set; generating a temporary key. Stored credentials will not survive a restart",
            env_config::MASTER_ENCRYPTION_KEY
        );
        Ok(Self::generate())
    }

    /// Base64 form, for provisioning a generated key
    #[must_use]
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.key.as_slice())
    }
}

/// Associated data binding a credential ciphertext to its row and column
#[must_use]
pub fn credential_aad(connection_id: Uuid, vendor: VendorKind, column: &str) -> String {
    format!("{connection_id}|{vendor}|{column}")
}

/// Encrypts and decrypts credential columns
#[derive(Clone)]
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl TokenCipher {
    /// Cipher keyed by the master key
    #[must_use]
    pub fn new(key: &MasterEncryptionKey) -> Self {
        Self {
            cipher: Aes256Gcm::new(GenericArray::from_slice(key.key.as_slice())),
        }
    }

    /// Encrypt `plaintext` bound to `aad`; returns base64(nonce || ciphertext)
    ///
    /// # Errors
    ///
    /// Returns an internal error if encryption fails
    pub fn encrypt(&self, plaintext: &str, aad: &str) -> AppResult<String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = GenericArray::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext.as_bytes(),
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|e| AppError::internal(format!("Encryption failed: {e}")))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(sealed))
    }

    /// Decrypt a value produced by [`Self::encrypt`] with the same `aad`
    ///
    /// # Errors
    ///
    /// Returns an internal error if the value is corrupt, was produced under a
    /// different key, or is bound to different associated data
    pub fn decrypt(&self, encoded: &str, aad: &str) -> AppResult<String> {
        let sealed = STANDARD
            .decode(encoded)
            .map_err(|e| AppError::internal(format!("Stored credential is not base64: {e}")))?;
        if sealed.len() <= NONCE_LEN {
            return Err(AppError::internal("Stored credential is truncated"));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);

        let plaintext = Zeroizing::new(
            self.cipher
                .decrypt(
                    GenericArray::from_slice(nonce),
                    Payload {
                        msg: ciphertext,
                        aad: aad.as_bytes(),
                    },
                )
                .map_err(|e| AppError::internal(format!("Decryption failed: {e}")))?,
        );
        String::from_utf8(plaintext.to_vec())
            .map_err(|_| AppError::internal("Stored credential is not UTF-8"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ciphertext_is_bound_to_its_row() {
        let cipher = TokenCipher::new(&MasterEncryptionKey::generate());
        let id = Uuid::new_v4();
        let aad = credential_aad(id, VendorKind::Fitbit, "access_token");

        let sealed = cipher.encrypt("token-value", &aad).unwrap();
        assert_ne!(sealed, "token-value");
        assert_eq!(cipher.decrypt(&sealed, &aad).unwrap(), "token-value");

        let other_row = credential_aad(Uuid::new_v4(), VendorKind::Fitbit, "access_token");
        assert!(cipher.decrypt(&sealed, &other_row).is_err());
        let other_column = credential_aad(id, VendorKind::Fitbit, "refresh_token");
        assert!(cipher.decrypt(&sealed, &other_column).is_err());
    }

    #[test]
    fn test_key_length_is_checked() {
        let short = STANDARD.encode([1u8; 16]);
        assert!(MasterEncryptionKey::from_base64(&short).is_err());
        let key = MasterEncryptionKey::generate();
        assert!(MasterEncryptionKey::from_base64(&key.to_base64()).is_ok());
    }
}
