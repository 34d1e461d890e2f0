// src/services/encryption.rs
//
// Field-level encryption for the sensitive userInfo subset, plus one-way
// hashing and the message sanitizer. One key is derived at startup and
// reused for the process lifetime.
use crate::models::chat::{EncryptedField, StoredUserInfo, UserInfo};
use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use lazy_static::lazy_static;
use rand::RngCore;
use regex::Regex;
use sha2::{Digest, Sha256};

// Associated data bound into every auth tag, so ciphertexts minted under a
// different label never verify here.
const ASSOCIATED_DATA: &[u8] = b"chatbot-auth";

// Domain salt mixed into key derivation.
const KDF_SALT: &[u8] = b"support-chat-field-key";

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// What a reader sees in place of a field that no longer decrypts.
pub const REDACTED_PLACEHOLDER: &str = "[Encrypted]";

lazy_static! {
    static ref SCRIPT_RE: Regex = Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").unwrap();
    static ref IFRAME_RE: Regex = Regex::new(r"(?is)<iframe\b[^>]*>.*?</iframe\s*>").unwrap();
    static ref JS_URI_RE: Regex = Regex::new(r"(?i)javascript:").unwrap();
    static ref EVENT_ATTR_RE: Regex = Regex::new(r"(?i)\bon\w+\s*=").unwrap();
}

#[derive(Debug, thiserror::Error)]
pub enum EncryptionError {
    #[error("Encryption failed")]
    EncryptionFailed,
    #[error("Malformed encrypted payload")]
    Malformed,
    #[error("Decryption failed")]
    DecryptionFailed,
}

pub struct EncryptionService {
    cipher: Aes256Gcm,
}

impl EncryptionService {
    /// Derives a fixed-size AES-256 key from the configured secret. Same
    /// secret, same key, for the whole process lifetime.
    pub fn new(secret: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(secret.as_bytes());
        hasher.update(KDF_SALT);
        let key_bytes = hasher.finalize();
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
        EncryptionService { cipher }
    }

    /// Seal one field: fresh random IV per call, tag bound to the fixed
    /// associated-data label, everything hex-encoded for storage.
    pub fn encrypt(&self, plaintext: &str) -> Result<EncryptedField, EncryptionError> {
        let mut iv = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut iv);

        let sealed = self
            .cipher
            .encrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: plaintext.as_bytes(),
                    aad: ASSOCIATED_DATA,
                },
            )
            .map_err(|_| EncryptionError::EncryptionFailed)?;

        // aes-gcm appends the tag to the ciphertext; store them separately.
        let split = sealed.len() - TAG_LEN;
        Ok(EncryptedField {
            encrypted: hex::encode(&sealed[..split]),
            iv: hex::encode(iv),
            auth_tag: hex::encode(&sealed[split..]),
        })
    }

    /// Open one field. Any structural problem or tag mismatch is an error;
    /// a wrong plaintext is never returned silently.
    pub fn decrypt(&self, field: &EncryptedField) -> Result<String, EncryptionError> {
        let ciphertext = hex::decode(&field.encrypted).map_err(|_| EncryptionError::Malformed)?;
        let iv = hex::decode(&field.iv).map_err(|_| EncryptionError::Malformed)?;
        let tag = hex::decode(&field.auth_tag).map_err(|_| EncryptionError::Malformed)?;
        if iv.len() != NONCE_LEN || tag.len() != TAG_LEN {
            return Err(EncryptionError::Malformed);
        }

        let mut sealed = ciphertext;
        sealed.extend_from_slice(&tag);

        let plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: &sealed,
                    aad: ASSOCIATED_DATA,
                },
            )
            .map_err(|_| EncryptionError::DecryptionFailed)?;

        String::from_utf8(plaintext).map_err(|_| EncryptionError::DecryptionFailed)
    }

    /// One-way SHA-256 hash, hex encoded.
    pub fn hash(&self, data: &str) -> String {
        hex::encode(Sha256::digest(data.as_bytes()))
    }

    /// Seal the sensitive subset (userAgent, ip, location) before persistence.
    pub fn encrypt_user_info(
        &self,
        user_info: &UserInfo,
    ) -> Result<StoredUserInfo, EncryptionError> {
        let seal = |value: &Option<String>| -> Result<Option<EncryptedField>, EncryptionError> {
            value.as_deref().map(|v| self.encrypt(v)).transpose()
        };
        Ok(StoredUserInfo {
            user_agent: seal(&user_info.user_agent)?,
            ip: seal(&user_info.ip)?,
            location: seal(&user_info.location)?,
            origin: user_info.origin.clone(),
            timestamp: user_info.timestamp,
        })
    }

    /// Open the sensitive subset for an entitled reader. A field that fails
    /// to decrypt is redacted, never surfaced as an error.
    pub fn decrypt_user_info(&self, stored: &StoredUserInfo) -> UserInfo {
        let open = |field: &Option<EncryptedField>, name: &str| -> Option<String> {
            field.as_ref().map(|f| match self.decrypt(f) {
                Ok(plaintext) => plaintext,
                Err(e) => {
                    tracing::warn!("Failed to decrypt userInfo field '{}': {}", name, e);
                    REDACTED_PLACEHOLDER.to_string()
                }
            })
        };
        UserInfo {
            user_agent: open(&stored.user_agent, "userAgent"),
            ip: open(&stored.ip, "ip"),
            location: open(&stored.location, "location"),
            origin: stored.origin.clone(),
            timestamp: stored.timestamp,
        }
    }

    /// Denylist filter over free text: script/iframe blocks, javascript:
    /// URIs and inline event-handler attributes, then trim. A filter, not a
    /// parser; rendering layers must still escape on output.
    pub fn sanitize_message(&self, message: &str) -> String {
        let cleaned = SCRIPT_RE.replace_all(message, "");
        let cleaned = IFRAME_RE.replace_all(&cleaned, "");
        let cleaned = JS_URI_RE.replace_all(&cleaned, "");
        let cleaned = EVENT_ATTR_RE.replace_all(&cleaned, "");
        cleaned.trim().to_string()
    }
}
