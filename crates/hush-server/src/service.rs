use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::info;

use crate::crypto::{self, CryptoError};
use crate::store::{ConsumeResult, FetchResult, Store};

// ── Errors ───────────────────────────────────────────────────────────────────

/// Failure taxonomy for the message exchange operations. Display strings
/// double as the client-facing `error` payloads, except `Internal`, which
/// is logged server-side and replaced with a generic body.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Request is missing a required field.
    #[error("{0}")]
    Validation(String),
    /// No live record under the given id.
    #[error("Message not found or expired")]
    NotFound,
    /// The record's expiry time has passed.
    #[error("Message has expired")]
    Expired,
    /// Every allowed view has been consumed.
    #[error("Message has no views remaining")]
    Exhausted,
    /// The key failed to authenticate the ciphertext.
    #[error("Decryption failed: invalid key or corrupted message")]
    Authentication,
    /// A key or ciphertext failed to parse.
    #[error("{0}")]
    MalformedInput(String),
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl From<CryptoError> for ServiceError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Authentication => ServiceError::Authentication,
            CryptoError::Malformed(msg) => ServiceError::MalformedInput(msg),
            CryptoError::Encrypt => {
                ServiceError::Internal(anyhow::anyhow!("encryption backend failure"))
            }
        }
    }
}

// ── Operation outcomes ───────────────────────────────────────────────────────

/// A freshly encrypted and stored message.
#[derive(Debug)]
pub struct CreatedMessage {
    pub id: String,
    pub ciphertext: String,
    /// Effective expiry, with the default filled in when the caller
    /// omitted one.
    pub expiry_hours: u32,
    /// Effective view limit, default filled in likewise.
    pub max_views: u32,
}

/// Metadata view of a stored message. Produced without consuming a view.
#[derive(Debug)]
pub struct FetchedMessage {
    pub ciphertext: String,
    /// Views still available, before any decrement. `None` = unlimited.
    pub views_left: Option<u32>,
    /// Whole seconds until expiry. `None` = no expiry.
    pub expires_in: Option<i64>,
}

/// A successful decrypt.
#[derive(Debug)]
pub struct DecryptedMessage {
    pub plaintext: String,
    /// Views left after this one. `None` for unlimited records and for
    /// stateless decrypts.
    pub views_left: Option<u32>,
}

// ── MessageService ───────────────────────────────────────────────────────────

/// Orchestrates key issuance, the cipher, and the store behind the
/// request contract. Cheap to clone; shared across request handlers.
#[derive(Clone)]
pub struct MessageService {
    store: Store,
    default_expiry_hours: u32,
    default_max_views: u32,
}

impl MessageService {
    pub fn new(store: Store, default_expiry_hours: u32, default_max_views: u32) -> Self {
        Self {
            store,
            default_expiry_hours,
            default_max_views,
        }
    }

    /// Issue a fresh symmetric key, base64-encoded for transport. The key
    /// is returned to the caller and retained nowhere.
    pub fn generate_key(&self) -> String {
        crypto::encode_key(&crypto::generate_key())
    }

    /// Encrypt `message` under the caller's key and store the ciphertext.
    /// Omitted expiry/view parameters fall back to the service defaults.
    pub fn create_message(
        &self,
        message: &str,
        key_b64: &str,
        expiry_hours: Option<u32>,
        max_views: Option<u32>,
    ) -> Result<CreatedMessage, ServiceError> {
        if message.is_empty() || key_b64.is_empty() {
            return Err(ServiceError::Validation(
                "Message and key are required".into(),
            ));
        }
        let key = crypto::decode_key(key_b64)
            .map_err(|e| ServiceError::MalformedInput(format!("Invalid key format: {e}")))?;

        let expiry_hours = expiry_hours.unwrap_or(self.default_expiry_hours);
        let max_views = max_views.unwrap_or(self.default_max_views);

        let ciphertext = crypto::encrypt(&key, message)?;
        let id = self
            .store
            .put(&ciphertext, Some(expiry_hours), Some(max_views))?;

        info!(id = %id, expiry_hours, max_views, "created message");
        Ok(CreatedMessage {
            id,
            ciphertext,
            expiry_hours,
            max_views,
        })
    }

    /// Look up a message's ciphertext and lifecycle metadata. Never
    /// consumes a view.
    pub fn fetch_message(&self, id: &str) -> Result<FetchedMessage, ServiceError> {
        match self.store.fetch(id)? {
            FetchResult::Found(record) => {
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs() as i64;
                Ok(FetchedMessage {
                    views_left: record.views_remaining(),
                    expires_in: record.expires_in(now),
                    ciphertext: record.ciphertext,
                })
            }
            FetchResult::NotFound => Err(ServiceError::NotFound),
            FetchResult::Expired => Err(ServiceError::Expired),
            FetchResult::Exhausted => Err(ServiceError::Exhausted),
        }
    }

    /// Decrypt a message with the caller's key.
    ///
    /// With a `message_id`, the stored ciphertext is authoritative (any
    /// ciphertext supplied alongside is ignored) and a view is consumed,
    /// but only on success: the decrypt runs before `consume_view`, so a
    /// wrong key costs the caller nothing. A decrypt that loses the race
    /// for a record's final view returns `Exhausted` and the recovered
    /// plaintext is discarded.
    ///
    /// Without an id, this is a pure crypto operation: no store
    /// interaction, no view accounting.
    pub fn decrypt_message(
        &self,
        message_id: Option<&str>,
        ciphertext: Option<&str>,
        key_b64: &str,
    ) -> Result<DecryptedMessage, ServiceError> {
        let message_id = message_id.filter(|s| !s.is_empty());
        let ciphertext = ciphertext.filter(|s| !s.is_empty());

        if key_b64.is_empty() {
            return Err(ServiceError::Validation(
                "Encrypted message and key are required".into(),
            ));
        }
        let key = crypto::decode_key(key_b64)
            .map_err(|e| ServiceError::MalformedInput(format!("Invalid key format: {e}")))?;

        match (message_id, ciphertext) {
            (Some(id), _) => {
                let stored = match self.store.fetch(id)? {
                    FetchResult::Found(record) => record.ciphertext,
                    FetchResult::NotFound => return Err(ServiceError::NotFound),
                    FetchResult::Expired => return Err(ServiceError::Expired),
                    FetchResult::Exhausted => return Err(ServiceError::Exhausted),
                };

                let plaintext = crypto::decrypt(&stored, &key)?;

                match self.store.consume_view(id)? {
                    ConsumeResult::Consumed {
                        views_remaining, ..
                    } => {
                        info!(id, views_left = ?views_remaining, "decrypted stored message");
                        Ok(DecryptedMessage {
                            plaintext,
                            views_left: views_remaining,
                        })
                    }
                    ConsumeResult::NotFound => Err(ServiceError::NotFound),
                    ConsumeResult::Expired => Err(ServiceError::Expired),
                    ConsumeResult::Exhausted => Err(ServiceError::Exhausted),
                }
            }
            (None, Some(wire)) => {
                let plaintext = crypto::decrypt(wire, &key)?;
                Ok(DecryptedMessage {
                    plaintext,
                    views_left: None,
                })
            }
            (None, None) => Err(ServiceError::Validation(
                "Encrypted message and key are required".into(),
            )),
        }
    }

    /// Remove expired and exhausted messages. Returns the count removed.
    pub fn cleanup(&self) -> Result<usize, ServiceError> {
        Ok(self.store.cleanup()?)
    }

    pub fn store(&self) -> &Store {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_service() -> (MessageService, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("svc.db")).unwrap();
        (MessageService::new(store, 24, 1), dir)
    }

    #[test]
    fn generated_keys_decode_to_aes_256_length() {
        let (svc, _dir) = make_service();
        let key = svc.generate_key();
        assert!(crypto::decode_key(&key).is_ok());
        let again = svc.generate_key();
        assert_ne!(key, again);
    }

    #[test]
    fn two_view_message_counts_down_and_exhausts() {
        let (svc, _dir) = make_service();
        let key = svc.generate_key();
        let created = svc
            .create_message("hello", &key, Some(24), Some(2))
            .unwrap();

        let fetched = svc.fetch_message(&created.id).unwrap();
        assert_eq!(fetched.views_left, Some(2));
        let expires_in = fetched.expires_in.unwrap();
        assert!((86_398..=86_400).contains(&expires_in));

        let first = svc.decrypt_message(Some(created.id.as_str()), None, &key).unwrap();
        assert_eq!(first.plaintext, "hello");
        assert_eq!(first.views_left, Some(1));

        let second = svc.decrypt_message(Some(created.id.as_str()), None, &key).unwrap();
        assert_eq!(second.plaintext, "hello");
        assert_eq!(second.views_left, Some(0));

        let third = svc.decrypt_message(Some(created.id.as_str()), None, &key);
        assert!(matches!(third, Err(ServiceError::Exhausted)));
        assert!(matches!(
            svc.fetch_message(&created.id),
            Err(ServiceError::Exhausted)
        ));
    }

    #[test]
    fn wrong_key_decrypt_consumes_no_view() {
        let (svc, _dir) = make_service();
        let key = svc.generate_key();
        let wrong = svc.generate_key();
        let created = svc
            .create_message("guarded", &key, Some(24), Some(1))
            .unwrap();

        let attempt = svc.decrypt_message(Some(created.id.as_str()), None, &wrong);
        assert!(matches!(attempt, Err(ServiceError::Authentication)));

        // The failed attempt cost nothing; the single view is intact.
        assert_eq!(svc.fetch_message(&created.id).unwrap().views_left, Some(1));
        let ok = svc.decrypt_message(Some(created.id.as_str()), None, &key).unwrap();
        assert_eq!(ok.plaintext, "guarded");
        assert_eq!(ok.views_left, Some(0));
    }

    #[test]
    fn unknown_id_is_not_found() {
        let (svc, _dir) = make_service();
        let key = svc.generate_key();
        assert!(matches!(
            svc.fetch_message("no-such-id"),
            Err(ServiceError::NotFound)
        ));
        assert!(matches!(
            svc.decrypt_message(Some("no-such-id"), None, &key),
            Err(ServiceError::NotFound)
        ));
    }

    #[test]
    fn expired_message_is_rejected_everywhere() {
        let (svc, _dir) = make_service();
        let key = svc.generate_key();
        let created = svc.create_message("gone", &key, Some(0), None).unwrap();

        assert!(matches!(
            svc.fetch_message(&created.id),
            Err(ServiceError::Expired)
        ));
        assert!(matches!(
            svc.decrypt_message(Some(created.id.as_str()), None, &key),
            Err(ServiceError::Expired)
        ));
    }

    #[test]
    fn stateless_decrypt_touches_no_record() {
        let (svc, _dir) = make_service();
        let key = svc.generate_key();
        let created = svc
            .create_message("portable", &key, Some(24), Some(1))
            .unwrap();

        let out = svc
            .decrypt_message(None, Some(created.ciphertext.as_str()), &key)
            .unwrap();
        assert_eq!(out.plaintext, "portable");
        assert_eq!(out.views_left, None);

        // No store interaction happened; the stored view is unspent.
        assert_eq!(svc.fetch_message(&created.id).unwrap().views_left, Some(1));
    }

    #[test]
    fn defaults_fill_in_omitted_parameters() {
        let (svc, _dir) = make_service();
        let key = svc.generate_key();
        let created = svc.create_message("defaults", &key, None, None).unwrap();
        assert_eq!(created.expiry_hours, 24);
        assert_eq!(created.max_views, 1);
    }

    #[test]
    fn missing_fields_are_validation_errors() {
        let (svc, _dir) = make_service();
        let key = svc.generate_key();

        assert!(matches!(
            svc.create_message("", &key, None, None),
            Err(ServiceError::Validation(_))
        ));
        assert!(matches!(
            svc.create_message("msg", "", None, None),
            Err(ServiceError::Validation(_))
        ));
        assert!(matches!(
            svc.decrypt_message(None, None, &key),
            Err(ServiceError::Validation(_))
        ));
        assert!(matches!(
            svc.decrypt_message(None, Some("abc"), ""),
            Err(ServiceError::Validation(_))
        ));
    }

    #[test]
    fn malformed_key_reports_its_length() {
        use base64::{engine::general_purpose::STANDARD, Engine as _};

        let (svc, _dir) = make_service();
        let short = STANDARD.encode([0u8; 16]);
        let err = svc.create_message("msg", &short, None, None).unwrap_err();
        match err {
            ServiceError::MalformedInput(msg) => {
                assert!(msg.contains("Invalid key format"));
                assert!(msg.contains("got 16 bytes"));
            }
            other => panic!("expected MalformedInput, got {other:?}"),
        }
    }

    #[test]
    fn racing_decrypts_on_final_view_produce_one_winner() {
        let (svc, _dir) = make_service();
        let key = svc.generate_key();
        let created = svc
            .create_message("contested", &key, Some(24), Some(1))
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let svc = svc.clone();
            let id = created.id.clone();
            let key = key.clone();
            handles.push(std::thread::spawn(move || {
                svc.decrypt_message(Some(id.as_str()), None, &key)
            }));
        }

        let mut won = 0;
        let mut exhausted = 0;
        for handle in handles {
            match handle.join().unwrap() {
                Ok(out) => {
                    assert_eq!(out.plaintext, "contested");
                    assert_eq!(out.views_left, Some(0));
                    won += 1;
                }
                Err(ServiceError::Exhausted) => exhausted += 1,
                Err(other) => panic!("unexpected error {other:?}"),
            }
        }
        assert_eq!(won, 1);
        assert_eq!(exhausted, 7);
    }
}
