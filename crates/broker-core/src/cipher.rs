// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Field-level encryption for provisioning parameters.
//!
//! Sensitive values are stored as `base64(nonce || ciphertext)` produced by
//! AES-256-GCM. The key is the SHA-256 digest of the configured secret.
//!
//! Reading is two-path: the value is decrypted first, and when that fails it
//! is taken as legacy plaintext and the result is flagged as degraded.
//! Writing never falls back; an encryption failure is an error.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::error::StorageError;
use crate::model::ProvisioningParameters;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Symmetric cipher for single string fields.
pub trait Cipher: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String, StorageError>;

    fn decrypt(&self, ciphertext: &str) -> Result<String, StorageError>;
}

/// AES-256-GCM cipher keyed from a shared secret.
#[derive(Clone)]
pub struct AesCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for AesCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesCipher").field("key", &"***").finish()
    }
}

impl AesCipher {
    /// Derive the key from `secret`. An empty secret is rejected.
    pub fn new(secret: &str) -> Result<Self, StorageError> {
        if secret.is_empty() {
            return Err(StorageError::Encryption(
                "encryption secret must not be empty".to_string(),
            ));
        }

        let mut key = [0u8; 32];
        key.copy_from_slice(&Sha256::digest(secret.as_bytes()));
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| StorageError::Encryption(format!("invalid key: {}", e)));
        key.zeroize();

        Ok(Self { cipher: cipher? })
    }
}

impl Cipher for AesCipher {
    fn encrypt(&self, plaintext: &str) -> Result<String, StorageError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| StorageError::Encryption(e.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(sealed))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String, StorageError> {
        let sealed = STANDARD
            .decode(ciphertext)
            .map_err(|e| StorageError::Encryption(format!("not base64: {}", e)))?;
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(StorageError::Encryption("ciphertext too short".to_string()));
        }

        let (nonce, body) = sealed.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), body)
            .map_err(|e| StorageError::Encryption(e.to_string()))?;

        String::from_utf8(plaintext).map_err(|e| StorageError::Encryption(e.to_string()))
    }
}

/// Result of a tolerant decrypt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decrypted {
    pub value: String,
    /// The value did not decrypt and was returned as stored.
    pub plaintext_fallback: bool,
}

/// Decrypt `stored`, falling back to the stored text when it is not valid
/// ciphertext. Empty values pass through untouched.
pub fn decrypt_or_plaintext(cipher: &dyn Cipher, stored: &str) -> Decrypted {
    if stored.is_empty() {
        return Decrypted {
            value: String::new(),
            plaintext_fallback: false,
        };
    }
    match cipher.decrypt(stored) {
        Ok(value) => Decrypted {
            value,
            plaintext_fallback: false,
        },
        Err(_) => Decrypted {
            value: stored.to_string(),
            plaintext_fallback: true,
        },
    }
}

fn encrypt_field(cipher: &dyn Cipher, field: &mut String) -> Result<(), StorageError> {
    if !field.is_empty() {
        *field = cipher.encrypt(field)?;
    }
    Ok(())
}

/// Encrypt every sensitive field of `parameters` in place.
pub fn encrypt_parameters(
    cipher: &dyn Cipher,
    parameters: &mut ProvisioningParameters,
) -> Result<(), StorageError> {
    if let Some(creds) = parameters.ers_context.sm_operator_credentials.as_mut() {
        encrypt_field(cipher, &mut creds.client_id)?;
        encrypt_field(cipher, &mut creds.client_secret)?;
    }
    encrypt_field(cipher, &mut parameters.parameters.kubeconfig)
}

/// Decrypt every sensitive field of `parameters` in place.
///
/// Returns the names of fields that were read as legacy plaintext.
pub fn decrypt_parameters(
    cipher: &dyn Cipher,
    parameters: &mut ProvisioningParameters,
) -> Vec<&'static str> {
    let mut degraded = Vec::new();
    let mut apply = |name: &'static str, field: &mut String| {
        let decrypted = decrypt_or_plaintext(cipher, field);
        if decrypted.plaintext_fallback {
            degraded.push(name);
        }
        *field = decrypted.value;
    };

    if let Some(creds) = parameters.ers_context.sm_operator_credentials.as_mut() {
        apply("client_id", &mut creds.client_id);
        apply("client_secret", &mut creds.client_secret);
    }
    apply("kubeconfig", &mut parameters.parameters.kubeconfig);

    degraded
}
