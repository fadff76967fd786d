use serde::{Deserialize, Serialize};

/// Stored in redb as bincode-encoded bytes.
/// `ciphertext` is the base64 transport form (nonce || tag || ciphertext)
/// sealed under the caller's key; the server holds no key that opens it.
/// All metadata is plaintext so the background sweep can evict without one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// AES-256-GCM ciphertext in its transport encoding, served verbatim.
    pub ciphertext: String,
    /// Unix timestamp (seconds) when the record was created.
    pub created_at: i64,
    /// Optional Unix timestamp (seconds) after which the record is expired.
    pub expires_at: Option<i64>,
    /// Optional maximum number of successful decrypts; `None` is unlimited.
    pub max_views: Option<u32>,
    /// How many views have been consumed so far.
    pub view_count: u32,
}

impl MessageRecord {
    /// Returns true once the record is past its expiry time.
    pub fn is_expired(&self, now: i64) -> bool {
        matches!(self.expires_at, Some(exp) if now >= exp)
    }

    /// Returns true once every allowed view has been consumed.
    pub fn is_exhausted(&self) -> bool {
        matches!(self.max_views, Some(max) if self.view_count >= max)
    }

    /// Views left before exhaustion; `None` when unlimited.
    pub fn views_remaining(&self) -> Option<u32> {
        self.max_views.map(|max| max.saturating_sub(self.view_count))
    }

    /// Whole seconds until expiry as seen at `now`; `None` when the record
    /// never expires. Clamped at zero for already-expired records.
    pub fn expires_in(&self, now: i64) -> Option<i64> {
        self.expires_at.map(|exp| (exp - now).max(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_record(
        expires_at: Option<i64>,
        max_views: Option<u32>,
        view_count: u32,
    ) -> MessageRecord {
        MessageRecord {
            ciphertext: String::new(),
            created_at: 1000,
            expires_at,
            max_views,
            view_count,
        }
    }

    #[test]
    fn expiry_is_inclusive_at_the_boundary() {
        let r = make_record(Some(2000), None, 0);
        assert!(!r.is_expired(1999));
        assert!(r.is_expired(2000));
        assert!(r.is_expired(2001));
    }

    #[test]
    fn no_expiry_never_expires() {
        let r = make_record(None, None, u32::MAX);
        assert!(!r.is_expired(i64::MAX));
    }

    #[test]
    fn exhaustion_tracks_the_view_counter() {
        let mut r = make_record(None, Some(2), 0);
        assert!(!r.is_exhausted());
        assert_eq!(r.views_remaining(), Some(2));
        r.view_count = 2;
        assert!(r.is_exhausted());
        assert_eq!(r.views_remaining(), Some(0));
    }

    #[test]
    fn unlimited_views_never_exhaust() {
        let r = make_record(None, None, 1_000_000);
        assert!(!r.is_exhausted());
        assert_eq!(r.views_remaining(), None);
    }

    #[test]
    fn expires_in_clamps_at_zero() {
        let r = make_record(Some(2000), None, 0);
        assert_eq!(r.expires_in(1400), Some(600));
        assert_eq!(r.expires_in(2500), Some(0));
        assert_eq!(make_record(None, None, 0).expires_in(1400), None);
    }
}
