use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use rand::RngCore;
use thiserror::Error;
use zeroize::ZeroizeOnDrop;

/// AES-256 key length in bytes.
pub const KEY_LEN: usize = 32;
/// GCM nonce length in bytes.
const NONCE_LEN: usize = 12;
/// GCM authentication tag length in bytes.
const TAG_LEN: usize = 16;

/// Structural or cryptographic failure in the cipher layer.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Input is not structurally valid: bad base64, wrong key length,
    /// or an envelope too short to hold nonce + tag.
    #[error("{0}")]
    Malformed(String),
    /// GCM tag verification failed: wrong key or tampered ciphertext.
    /// No partial plaintext is ever returned.
    #[error("authentication failed: wrong key or corrupted message")]
    Authentication,
    /// The AEAD backend rejected the input (plaintext beyond the GCM
    /// length bound). Unreachable behind the request size cap.
    #[error("encryption failed")]
    Encrypt,
}

/// 32-byte symmetric message key. Held by the caller, never persisted;
/// zeroed on drop.
#[derive(ZeroizeOnDrop)]
pub struct MessageKey([u8; KEY_LEN]);

impl MessageKey {
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

/// Generate a fresh random key from the OS CSPRNG.
pub fn generate_key() -> MessageKey {
    let mut bytes = [0u8; KEY_LEN];
    OsRng.fill_bytes(&mut bytes);
    MessageKey(bytes)
}

/// Encode a key for transport (standard base64 with padding).
pub fn encode_key(key: &MessageKey) -> String {
    B64.encode(key.as_bytes())
}

/// Decode a transported key, enforcing the AES-256 length.
pub fn decode_key(encoded: &str) -> Result<MessageKey, CryptoError> {
    let bytes = B64
        .decode(encoded.trim())
        .map_err(|_| CryptoError::Malformed("key is not valid base64".into()))?;
    let len = bytes.len();
    let bytes: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
        CryptoError::Malformed(format!(
            "key must be {KEY_LEN} bytes for AES-256, got {len} bytes"
        ))
    })?;
    Ok(MessageKey(bytes))
}

/// Encrypt `plaintext` with `key` under AES-256-GCM.
///
/// A fresh random 12-byte nonce is drawn per call. The transport form is
/// `base64(nonce || tag || ciphertext)`, so `decrypt` is self-contained
/// given this string and the key.
pub fn encrypt(key: &MessageKey, plaintext: &str) -> Result<String, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from(nonce_bytes);

    // The AEAD backend emits ciphertext || tag; reorder for the wire.
    let sealed = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|_| CryptoError::Encrypt)?;
    let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);

    let mut wire = Vec::with_capacity(NONCE_LEN + sealed.len());
    wire.extend_from_slice(&nonce_bytes);
    wire.extend_from_slice(tag);
    wire.extend_from_slice(ciphertext);
    Ok(B64.encode(wire))
}

/// Decrypt a transport-form message with `key`, returning the plaintext.
pub fn decrypt(encoded: &str, key: &MessageKey) -> Result<String, CryptoError> {
    let raw = B64
        .decode(encoded.trim())
        .map_err(|_| CryptoError::Malformed("encrypted message is not valid base64".into()))?;
    if raw.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::Malformed(format!(
            "encrypted message too short: {} bytes, need at least {}",
            raw.len(),
            NONCE_LEN + TAG_LEN
        )));
    }

    let (nonce_bytes, rest) = raw.split_at(NONCE_LEN);
    let (tag, ciphertext) = rest.split_at(TAG_LEN);

    // Reassemble ciphertext || tag for the AEAD backend.
    let mut sealed = Vec::with_capacity(ciphertext.len() + TAG_LEN);
    sealed.extend_from_slice(ciphertext);
    sealed.extend_from_slice(tag);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), sealed.as_slice())
        .map_err(|_| CryptoError::Authentication)?;

    String::from_utf8(plaintext)
        .map_err(|_| CryptoError::Malformed("decrypted payload is not valid UTF-8".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let key = generate_key();
        let wire = encrypt(&key, "hello, hush!").unwrap();
        assert_eq!(decrypt(&wire, &key).unwrap(), "hello, hush!");
    }

    #[test]
    fn empty_plaintext_round_trip() {
        let key = generate_key();
        let wire = encrypt(&key, "").unwrap();
        assert_eq!(decrypt(&wire, &key).unwrap(), "");
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let key1 = generate_key();
        let key2 = generate_key();
        let wire = encrypt(&key1, "secret").unwrap();
        assert!(matches!(
            decrypt(&wire, &key2),
            Err(CryptoError::Authentication)
        ));
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let key = generate_key();
        let wire = encrypt(&key, "integrity matters").unwrap();
        let mut raw = B64.decode(&wire).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = B64.encode(raw);
        assert!(matches!(
            decrypt(&tampered, &key),
            Err(CryptoError::Authentication)
        ));
    }

    #[test]
    fn fresh_nonce_per_encryption() {
        let key = generate_key();
        let a = encrypt(&key, "same plaintext").unwrap();
        let b = encrypt(&key, "same plaintext").unwrap();
        assert_ne!(a, b);
        // Both still decrypt to the same plaintext.
        assert_eq!(decrypt(&a, &key).unwrap(), decrypt(&b, &key).unwrap());
    }

    #[test]
    fn wire_layout_is_nonce_tag_ciphertext() {
        let key = generate_key();
        let plaintext = "exactly 21 bytes long";
        let wire = encrypt(&key, plaintext).unwrap();
        let raw = B64.decode(&wire).unwrap();
        assert_eq!(raw.len(), NONCE_LEN + TAG_LEN + plaintext.len());
    }

    #[test]
    fn garbage_base64_is_malformed() {
        let key = generate_key();
        assert!(matches!(
            decrypt("not-base64!!!", &key),
            Err(CryptoError::Malformed(_))
        ));
    }

    #[test]
    fn truncated_envelope_is_malformed() {
        let key = generate_key();
        let short = B64.encode([0u8; NONCE_LEN + TAG_LEN - 1]);
        assert!(matches!(
            decrypt(&short, &key),
            Err(CryptoError::Malformed(_))
        ));
    }

    #[test]
    fn key_codec_round_trip() {
        let key = generate_key();
        let encoded = encode_key(&key);
        let decoded = decode_key(&encoded).unwrap();
        assert_eq!(decoded.as_bytes(), key.as_bytes());
    }

    #[test]
    fn decode_key_rejects_wrong_length() {
        let short = B64.encode([0u8; 16]);
        let err = match decode_key(&short) {
            Ok(_) => panic!("16-byte key must be rejected"),
            Err(e) => e,
        };
        assert!(err.to_string().contains("got 16"));
    }

    #[test]
    fn decode_key_rejects_bad_base64() {
        assert!(matches!(
            decode_key("!!not base64!!"),
            Err(CryptoError::Malformed(_))
        ));
    }
}
