//! At-rest encryption for project file content.
//!
//! Stored blobs look like `v1:<base64(nonce || ciphertext)>`. The owning project id
//! is bound in as associated data, so a blob copied into another project's row
//! fails to open.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, bail, Result};
use base64::{engine::general_purpose, Engine as _};
use sha2::{Digest, Sha256};

use crate::models::ProjectId;

const FORMAT_PREFIX: &str = "v1:";
const NONCE_LEN: usize = 12;

pub struct EncryptionService {
    cipher: Aes256Gcm,
}

/// A 32-byte key is used as is; anything else is stretched with SHA-256.
fn derive_key(secret: &str) -> Vec<u8> {
    if secret.len() == 32 {
        return secret.as_bytes().to_vec();
    }
    Sha256::digest(secret.as_bytes()).to_vec()
}

fn associated_data(project_id: ProjectId) -> [u8; 8] {
    project_id.to_be_bytes()
}

impl EncryptionService {
    pub fn new(secret: &str) -> Result<Self> {
        if secret.is_empty() {
            bail!("Content encryption key cannot be empty");
        }
        let cipher = Aes256Gcm::new_from_slice(&derive_key(secret))
            .map_err(|_| anyhow!("Invalid key length - must be 32 bytes"))?;

        Ok(Self { cipher })
    }

    pub fn encrypt(&self, project_id: ProjectId, plaintext: &str) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let aad = associated_data(project_id);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, Payload { msg: plaintext.as_bytes(), aad: &aad })
            .map_err(|e| anyhow!("Encryption failed: {:?}", e))?;

        let mut sealed = nonce.to_vec();
        sealed.extend_from_slice(&ciphertext);
        Ok(format!("{FORMAT_PREFIX}{}", general_purpose::STANDARD.encode(sealed)))
    }

    pub fn decrypt(&self, project_id: ProjectId, stored: &str) -> Result<String> {
        let encoded = stored
            .strip_prefix(FORMAT_PREFIX)
            .ok_or_else(|| anyhow!("Unknown content encoding"))?;
        let sealed = general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| anyhow!("Failed to decode stored content: {:?}", e))?;
        if sealed.len() < NONCE_LEN {
            bail!("Stored content is truncated");
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let aad = associated_data(project_id);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad: &aad })
            .map_err(|e| anyhow!("Decryption failed: {:?}", e))?;

        String::from_utf8(plaintext).map_err(|e| anyhow!("Decrypted content is not UTF-8: {:?}", e))
    }
}
