//! Token record encryption and key sourcing.
//!
//! Record layout:
//! ```text
//! ┌──────────────┬──────────────┬──────────────────────────────────┐
//! │ "CGTK0001"   │ nonce (12 B) │ AES-256-GCM(bincode(SessionToken))│
//! └──────────────┴──────────────┴──────────────────────────────────┘
//! ```

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use rand::RngCore;

use super::TokenStoreError;
use crate::session::SessionToken;

const RECORD_MAGIC: &[u8; 8] = b"CGTK0001";
const NONCE_LEN: usize = 12;
pub const KEY_LEN: usize = 32;

/// Supplies the 256-bit record key.
pub trait KeySource: Send + Sync {
    fn load_or_create(&self) -> Result<[u8; KEY_LEN], TokenStoreError>;
}

/// Key held in the OS keychain, hex-encoded, generated on first use.
#[derive(Debug, Clone)]
pub struct KeyringKeySource {
    service: String,
    account: String,
}

impl KeyringKeySource {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }
}

impl KeySource for KeyringKeySource {
    fn load_or_create(&self) -> Result<[u8; KEY_LEN], TokenStoreError> {
        let entry = keyring::Entry::new(&self.service, &self.account)
            .map_err(|e| TokenStoreError::Key(format!("failed to access keyring: {e}")))?;

        match entry.get_password() {
            Ok(encoded) => decode_key(&encoded),
            Err(keyring::Error::NoEntry) => {
                let key = random_key();
                entry.set_password(&hex::encode(key)).map_err(|e| {
                    TokenStoreError::Key(format!("failed to persist generated key: {e}"))
                })?;
                Ok(key)
            }
            Err(e) => Err(TokenStoreError::Key(format!("failed to read key: {e}"))),
        }
    }
}

/// A fixed key, for tests and for callers that manage keys themselves.
#[derive(Clone)]
pub struct StaticKeySource([u8; KEY_LEN]);

impl StaticKeySource {
    pub fn new(key: [u8; KEY_LEN]) -> Self {
        Self(key)
    }
}

impl KeySource for StaticKeySource {
    fn load_or_create(&self) -> Result<[u8; KEY_LEN], TokenStoreError> {
        Ok(self.0)
    }
}

fn decode_key(encoded: &str) -> Result<[u8; KEY_LEN], TokenStoreError> {
    hex::decode(encoded.trim())
        .ok()
        .and_then(|bytes| <[u8; KEY_LEN]>::try_from(bytes).ok())
        .ok_or_else(|| TokenStoreError::Key("stored key has invalid format".to_string()))
}

pub(crate) fn random_key() -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}

/// Seals and opens token records.
pub(crate) struct TokenCipher {
    key: [u8; KEY_LEN],
}

impl TokenCipher {
    pub(crate) fn new(key: [u8; KEY_LEN]) -> Self {
        Self { key }
    }

    fn aead(&self) -> Result<Aes256Gcm, TokenStoreError> {
        Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| TokenStoreError::Crypto(format!("AES key init failed: {e}")))
    }

    pub(crate) fn seal(&self, token: &SessionToken) -> Result<Vec<u8>, TokenStoreError> {
        let plaintext = bincode::serde::encode_to_vec(token, bincode::config::standard())
            .map_err(|e| TokenStoreError::Serialization(e.to_string()))?;

        let mut nonce = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce);
        let ciphertext = self
            .aead()?
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_ref())
            .map_err(|e| TokenStoreError::Crypto(format!("AES-GCM encrypt failed: {e}")))?;

        let mut out = Vec::with_capacity(RECORD_MAGIC.len() + NONCE_LEN + ciphertext.len());
        out.extend_from_slice(RECORD_MAGIC);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub(crate) fn open(&self, record: &[u8]) -> Result<SessionToken, TokenStoreError> {
        let body = record
            .strip_prefix(RECORD_MAGIC.as_slice())
            .ok_or_else(|| TokenStoreError::Format("missing record magic".to_string()))?;
        if body.len() < NONCE_LEN {
            return Err(TokenStoreError::Format("record too short".to_string()));
        }
        let (nonce, ciphertext) = body.split_at(NONCE_LEN);

        let plaintext = self
            .aead()?
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| TokenStoreError::Crypto(format!("AES-GCM decrypt failed: {e}")))?;
        let (token, _) =
            bincode::serde::decode_from_slice(&plaintext, bincode::config::standard())
                .map_err(|e| TokenStoreError::Serialization(e.to_string()))?;
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Permission;

    fn token() -> SessionToken {
        SessionToken::new("ws-1", "bearer-abc", Permission::Write, 1_700_000_000_000)
    }

    #[test]
    fn test_seal_open() {
        let cipher = TokenCipher::new([7u8; KEY_LEN]);
        let record = cipher.seal(&token()).unwrap();
        assert!(record.starts_with(RECORD_MAGIC));
        assert!(!record.windows(10).any(|w| w == b"bearer-abc"));
        assert_eq!(cipher.open(&record).unwrap(), token());
    }

    #[test]
    fn test_fresh_nonce_per_record() {
        let cipher = TokenCipher::new([7u8; KEY_LEN]);
        assert_ne!(cipher.seal(&token()).unwrap(), cipher.seal(&token()).unwrap());
    }

    #[test]
    fn test_wrong_key_rejected() {
        let record = TokenCipher::new([1u8; KEY_LEN]).seal(&token()).unwrap();
        let err = TokenCipher::new([2u8; KEY_LEN]).open(&record).unwrap_err();
        assert!(matches!(err, TokenStoreError::Crypto(_)));
    }

    #[test]
    fn test_bad_magic_and_truncation_rejected() {
        let cipher = TokenCipher::new([1u8; KEY_LEN]);
        assert!(matches!(
            cipher.open(b"plaintext"),
            Err(TokenStoreError::Format(_))
        ));
        assert!(matches!(
            cipher.open(b"CGTK0001short"),
            Err(TokenStoreError::Format(_))
        ));
    }

    #[test]
    fn test_key_decoding() {
        let key = [0xABu8; KEY_LEN];
        assert_eq!(decode_key(&hex::encode(key)).unwrap(), key);
        assert!(decode_key("abcd").is_err());
        assert!(decode_key("not hex").is_err());
    }
}
