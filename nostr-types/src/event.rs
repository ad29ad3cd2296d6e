//! NIP-01 event model.
//!
//! Events are immutable once signed. The relay treats them as read-only
//! input; the only derived data is the canonical id hash and the kind
//! classification used to pick a storage strategy.

use secp256k1::{schnorr, Keypair, Message, XOnlyPublicKey, SECP256K1};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::EventError;

/// A single tag: an ordered list of strings whose first element is the name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(pub Vec<String>);

impl Tag {
    /// Build a tag from its parts.
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(parts.into_iter().map(Into::into).collect())
    }

    /// Tag name (first element), if any.
    pub fn name(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// Tag value (second element), if any.
    pub fn value(&self) -> Option<&str> {
        self.0.get(1).map(String::as_str)
    }
}

/// A signed Nostr event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Lowercase hex SHA-256 of the canonical serialization
    pub id: String,
    /// Lowercase hex x-only public key of the author
    pub pubkey: String,
    /// Unix timestamp in seconds
    pub created_at: u64,
    /// Event kind
    pub kind: u32,
    /// Ordered tags
    pub tags: Vec<Tag>,
    /// Arbitrary content
    pub content: String,
    /// Lowercase hex BIP-340 signature over `id`
    pub sig: String,
}

impl Event {
    /// Compute the id this event should carry.
    pub fn compute_id(&self) -> [u8; 32] {
        canonical_hash(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        )
    }

    /// Check that `id` matches the canonical serialization.
    pub fn verify_id(&self) -> Result<(), EventError> {
        let claimed = decode_hex_field::<32>("id", &self.id)?;
        if claimed != self.compute_id() {
            return Err(EventError::IdMismatch);
        }
        Ok(())
    }

    /// Check the schnorr signature over `id`.
    pub fn verify_signature(&self) -> Result<(), EventError> {
        let id = decode_hex_field::<32>("id", &self.id)?;
        let pubkey = decode_hex_field::<32>("pubkey", &self.pubkey)?;
        let sig = decode_hex_field::<64>("sig", &self.sig)?;

        let pubkey = XOnlyPublicKey::from_slice(&pubkey).map_err(|e| EventError::InvalidField {
            field: "pubkey",
            reason: e.to_string(),
        })?;
        let sig = schnorr::Signature::from_slice(&sig).map_err(|e| EventError::InvalidField {
            field: "sig",
            reason: e.to_string(),
        })?;

        SECP256K1
            .verify_schnorr(&sig, &Message::from_digest(id), &pubkey)
            .map_err(|_| EventError::BadSignature)
    }

    /// Verify both the id and the signature.
    pub fn verify(&self) -> Result<(), EventError> {
        self.verify_id()?;
        self.verify_signature()
    }

    /// Raw 32-byte id, if `id` is well-formed hex.
    pub fn id_bytes(&self) -> Option<[u8; 32]> {
        decode_hex_field::<32>("id", &self.id).ok()
    }

    /// Kinds 0, 3 and 10000..20000: only the latest per (pubkey, kind) is kept.
    pub fn is_replaceable(&self) -> bool {
        matches!(self.kind, 0 | 3 | 10_000..=19_999)
    }

    /// Kinds 20000..30000: broadcast but never stored.
    pub fn is_ephemeral(&self) -> bool {
        (20_000..30_000).contains(&self.kind)
    }

    /// Kinds 30000..40000: only the latest per (pubkey, kind, d-tag) is kept.
    pub fn is_parameterized_replaceable(&self) -> bool {
        (30_000..40_000).contains(&self.kind)
    }

    /// Value of the first `d` tag, or the empty string when absent.
    pub fn d_tag(&self) -> &str {
        self.tags
            .iter()
            .find(|t| t.name() == Some("d"))
            .and_then(Tag::value)
            .unwrap_or("")
    }

    /// NIP-40 expiration timestamp, if the event carries a parseable one.
    pub fn expiration(&self) -> Option<u64> {
        self.tags
            .iter()
            .find(|t| t.name() == Some("expiration"))
            .and_then(Tag::value)
            .and_then(|v| v.parse().ok())
    }

    /// Whether the event has expired at `now`.
    pub fn is_expired(&self, now: u64) -> bool {
        self.expiration().is_some_and(|exp| exp <= now)
    }

    /// Iterate over the values of every tag named `name`.
    pub fn tag_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.tags
            .iter()
            .filter(move |t| t.name() == Some(name))
            .filter_map(Tag::value)
    }
}

/// Event content before signing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedEvent {
    /// Unix timestamp in seconds
    pub created_at: u64,
    /// Event kind
    pub kind: u32,
    /// Ordered tags
    pub tags: Vec<Tag>,
    /// Arbitrary content
    pub content: String,
}

impl UnsignedEvent {
    /// Create an unsigned event with no tags.
    pub fn new(created_at: u64, kind: u32, content: impl Into<String>) -> Self {
        Self {
            created_at,
            kind,
            tags: Vec::new(),
            content: content.into(),
        }
    }

    /// Append a tag.
    pub fn tag(mut self, tag: Tag) -> Self {
        self.tags.push(tag);
        self
    }

    /// Hash and sign with the given keypair.
    pub fn sign(self, keys: &Keypair) -> Event {
        let (xonly, _) = keys.x_only_public_key();
        let pubkey = hex::encode(xonly.serialize());
        let id = canonical_hash(
            &pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        );
        let sig = SECP256K1.sign_schnorr_no_aux_rand(&Message::from_digest(id), keys);

        Event {
            id: hex::encode(id),
            pubkey,
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags,
            content: self.content,
            sig: sig.to_string(),
        }
    }
}

fn canonical_hash(pubkey: &str, created_at: u64, kind: u32, tags: &[Tag], content: &str) -> [u8; 32] {
    // A tuple of strings and integers always serializes.
    let canonical = serde_json::to_vec(&(0u8, pubkey, created_at, kind, tags, content))
        .unwrap_or_default();
    let digest = Sha256::digest(&canonical);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Decode exactly `N` bytes of lowercase hex. Uppercase is refused so that
/// one event has exactly one textual id.
fn decode_hex_field<const N: usize>(field: &'static str, value: &str) -> Result<[u8; N], EventError> {
    if value.len() != N * 2 {
        return Err(EventError::InvalidField {
            field,
            reason: format!("expected {} hex characters, got {}", N * 2, value.len()),
        });
    }
    if !value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        return Err(EventError::InvalidField {
            field,
            reason: "expected lowercase hex".into(),
        });
    }

    let mut out = [0u8; N];
    hex::decode_to_slice(value, &mut out).map_err(|e| EventError::InvalidField {
        field,
        reason: e.to_string(),
    })?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(byte: u8) -> Keypair {
        Keypair::from_seckey_slice(SECP256K1, &[byte; 32]).unwrap()
    }

    #[test]
    fn signed_event_verifies() {
        let event = UnsignedEvent::new(1_700_000_000, 1, "hello nostr")
            .tag(Tag::new(["t", "intro"]))
            .sign(&keys(0x11));

        assert_eq!(event.id.len(), 64);
        assert_eq!(event.pubkey.len(), 64);
        assert_eq!(event.sig.len(), 128);
        event.verify().unwrap();
    }

    #[test]
    fn tampered_content_fails_id_check() {
        let mut event = UnsignedEvent::new(1_700_000_000, 1, "original").sign(&keys(0x11));
        event.content = "edited".into();
        assert_eq!(event.verify(), Err(EventError::IdMismatch));
    }

    #[test]
    fn foreign_signature_fails() {
        let a = UnsignedEvent::new(1_700_000_000, 1, "a").sign(&keys(0x11));
        let mut b = UnsignedEvent::new(1_700_000_000, 1, "a").sign(&keys(0x22));
        b.sig = a.sig.clone();
        assert_eq!(b.verify_signature(), Err(EventError::BadSignature));
    }

    #[test]
    fn malformed_hex_is_reported_by_field() {
        let mut event = UnsignedEvent::new(1, 1, "x").sign(&keys(0x11));
        event.pubkey = "zz".into();
        let err = event.verify_signature().unwrap_err();
        assert!(matches!(err, EventError::InvalidField { field: "pubkey", .. }));
    }

    #[test]
    fn uppercase_hex_is_rejected() {
        let event = UnsignedEvent::new(1_700_000_000, 1, "case").sign(&keys(0x11));

        let mut upper_id = event.clone();
        upper_id.id = event.id.to_uppercase();
        assert!(matches!(
            upper_id.verify(),
            Err(EventError::InvalidField { field: "id", .. })
        ));
        assert_eq!(upper_id.id_bytes(), None);

        let mut upper_pubkey = event.clone();
        upper_pubkey.pubkey = event.pubkey.to_uppercase();
        assert!(matches!(
            upper_pubkey.verify_signature(),
            Err(EventError::InvalidField { field: "pubkey", .. })
        ));

        let mut upper_sig = event.clone();
        upper_sig.sig = event.sig.to_uppercase();
        assert!(matches!(
            upper_sig.verify_signature(),
            Err(EventError::InvalidField { field: "sig", .. })
        ));

        event.verify().unwrap();
    }

    #[test]
    fn wrong_length_hex_is_rejected() {
        let mut event = UnsignedEvent::new(1, 1, "short").sign(&keys(0x11));
        event.id.push_str("00");
        assert!(matches!(
            event.verify_id(),
            Err(EventError::InvalidField { field: "id", .. })
        ));
    }

    #[test]
    fn canonical_form_escapes_content() {
        let event = UnsignedEvent::new(1, 1, "line\n\"quoted\"\t\\").sign(&keys(0x33));
        event.verify_id().unwrap();
    }

    #[test]
    fn kind_classification() {
        let mut event = UnsignedEvent::new(1, 0, "").sign(&keys(0x11));
        assert!(event.is_replaceable());

        event.kind = 10_002;
        assert!(event.is_replaceable());

        event.kind = 20_001;
        assert!(event.is_ephemeral());
        assert!(!event.is_replaceable());

        event.kind = 30_023;
        assert!(event.is_parameterized_replaceable());

        event.kind = 1;
        assert!(!event.is_replaceable());
        assert!(!event.is_ephemeral());
        assert!(!event.is_parameterized_replaceable());
    }

    #[test]
    fn d_tag_and_expiration() {
        let event = UnsignedEvent::new(1, 30_023, "")
            .tag(Tag::new(["d", "article-1"]))
            .tag(Tag::new(["expiration", "1000"]))
            .sign(&keys(0x11));

        assert_eq!(event.d_tag(), "article-1");
        assert_eq!(event.expiration(), Some(1000));
        assert!(event.is_expired(1000));
        assert!(!event.is_expired(999));

        let plain = UnsignedEvent::new(1, 30_023, "").sign(&keys(0x11));
        assert_eq!(plain.d_tag(), "");
        assert_eq!(plain.expiration(), None);
    }

    #[test]
    fn event_json_roundtrip() {
        let event = UnsignedEvent::new(42, 1, "hi")
            .tag(Tag::new(["e", "abcd"]))
            .sign(&keys(0x11));
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"tags\":[[\"e\",\"abcd\"]]"));
        let restored: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, event);
    }
}
