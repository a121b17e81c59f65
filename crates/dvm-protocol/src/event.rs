//! Signed network events.
//!
//! Implements the event structure shared by every message on the relay
//! network: canonical serialization `[0, pubkey, created_at, kind, tags,
//! content]`, sha256 content addressing, and schnorr signatures. The
//! cryptography itself is delegated to the `bitcoin` crate; this module only
//! wires it to the event shape.

use std::time::{SystemTime, UNIX_EPOCH};

use bitcoin::hashes::{sha256, Hash};
use bitcoin::secp256k1::{schnorr, Keypair, Message, Secp256k1, SecretKey, XOnlyPublicKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while building, signing, or verifying events.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("invalid secret key: {0}")]
    InvalidSecretKey(String),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("event id mismatch: expected {expected}, got {actual}")]
    IdMismatch { expected: String, actual: String },

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// A signed event as it travels over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Lowercase hex sha256 of the canonical serialization
    pub id: String,
    /// Lowercase hex x-only public key of the author
    pub pubkey: String,
    /// Unix timestamp in seconds
    pub created_at: u64,
    /// Event kind
    pub kind: u16,
    /// Ordered list of tags, each an ordered list of strings
    pub tags: Vec<Vec<String>>,
    /// Arbitrary content
    pub content: String,
    /// Lowercase hex schnorr signature over the id
    pub sig: String,
}

impl Event {
    /// First value of the first tag named `name`, if any.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.first().map(String::as_str) == Some(name))
            .and_then(|t| t.get(1))
            .map(String::as_str)
    }

    /// All tags named `name`, in arrival order.
    pub fn tags_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Vec<String>> {
        self.tags
            .iter()
            .filter(move |t| t.first().map(String::as_str) == Some(name))
    }

    /// Recompute the id and check the schnorr signature.
    pub fn verify(&self) -> Result<(), EventError> {
        let expected = compute_id(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        )?;
        if expected != self.id {
            return Err(EventError::IdMismatch {
                expected,
                actual: self.id.clone(),
            });
        }

        let secp = Secp256k1::verification_only();
        let pubkey: XOnlyPublicKey = self
            .pubkey
            .parse()
            .map_err(|e| EventError::InvalidPublicKey(format!("{e}")))?;
        let sig_bytes =
            hex::decode(&self.sig).map_err(|e| EventError::InvalidSignature(e.to_string()))?;
        let sig = schnorr::Signature::from_slice(&sig_bytes)
            .map_err(|e| EventError::InvalidSignature(e.to_string()))?;
        let digest =
            hex::decode(&self.id).map_err(|e| EventError::InvalidSignature(e.to_string()))?;
        let digest: [u8; 32] = digest
            .try_into()
            .map_err(|_| EventError::InvalidSignature("id is not 32 bytes".into()))?;
        secp.verify_schnorr(&sig, &Message::from_digest(digest), &pubkey)
            .map_err(|e| EventError::InvalidSignature(e.to_string()))
    }
}

/// An unsigned event: everything but the author-derived fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTemplate {
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

impl EventTemplate {
    pub fn new(created_at: u64, kind: u16, tags: Vec<Vec<String>>, content: String) -> Self {
        Self {
            created_at,
            kind,
            tags,
            content,
        }
    }
}

/// A worker keypair: secret key plus derived x-only public key.
///
/// Immutable after construction; one per provider identity.
pub struct Keys {
    keypair: Keypair,
    public_hex: String,
}

impl Keys {
    /// Load from a 64-character lowercase hex secret key.
    pub fn from_hex(secret_hex: &str) -> Result<Self, EventError> {
        let bytes =
            hex::decode(secret_hex).map_err(|e| EventError::InvalidSecretKey(e.to_string()))?;
        let secret = SecretKey::from_slice(&bytes)
            .map_err(|e| EventError::InvalidSecretKey(e.to_string()))?;
        let secp = Secp256k1::new();
        let keypair = Keypair::from_secret_key(&secp, &secret);
        let (xonly, _parity) = XOnlyPublicKey::from_keypair(&keypair);
        Ok(Self {
            keypair,
            public_hex: hex::encode(xonly.serialize()),
        })
    }

    /// Generate a fresh random keypair.
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let secret = SecretKey::new(&mut rand::thread_rng());
        let keypair = Keypair::from_secret_key(&secp, &secret);
        let (xonly, _parity) = XOnlyPublicKey::from_keypair(&keypair);
        Self {
            keypair,
            public_hex: hex::encode(xonly.serialize()),
        }
    }

    /// Hex-encoded x-only public key.
    pub fn public_key(&self) -> &str {
        &self.public_hex
    }

    /// Sign a template, producing a complete wire event.
    pub fn sign(&self, template: EventTemplate) -> Result<Event, EventError> {
        let id = compute_id(
            &self.public_hex,
            template.created_at,
            template.kind,
            &template.tags,
            &template.content,
        )?;
        let digest: [u8; 32] = hex::decode(&id)
            .map_err(|e| EventError::Serialization(e.to_string()))?
            .try_into()
            .map_err(|_| EventError::Serialization("digest is not 32 bytes".into()))?;

        let secp = Secp256k1::new();
        let sig = secp.sign_schnorr(&Message::from_digest(digest), &self.keypair);

        Ok(Event {
            id,
            pubkey: self.public_hex.clone(),
            created_at: template.created_at,
            kind: template.kind,
            tags: template.tags,
            content: template.content,
            sig: hex::encode(sig.as_ref()),
        })
    }
}

impl std::fmt::Debug for Keys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the secret half.
        f.debug_struct("Keys")
            .field("public_key", &self.public_hex)
            .finish_non_exhaustive()
    }
}

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Canonical id: sha256 over `[0, pubkey, created_at, kind, tags, content]`.
fn compute_id(
    pubkey: &str,
    created_at: u64,
    kind: u16,
    tags: &[Vec<String>],
    content: &str,
) -> Result<String, EventError> {
    let serialized = serde_json::to_string(&(0, pubkey, created_at, kind, tags, content))
        .map_err(|e| EventError::Serialization(e.to_string()))?;
    let hash = sha256::Hash::hash(serialized.as_bytes());
    Ok(hex::encode(hash.to_byte_array()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_produces_verifiable_event() {
        let keys = Keys::generate();
        let template = EventTemplate::new(1_700_000_000, 1, vec![], "hello".to_string());
        let event = keys.sign(template).unwrap();

        assert_eq!(event.pubkey, keys.public_key());
        assert_eq!(event.id.len(), 64);
        assert_eq!(event.sig.len(), 128);
        event.verify().unwrap();
    }

    #[test]
    fn verify_rejects_tampered_content() {
        let keys = Keys::generate();
        let template = EventTemplate::new(1_700_000_000, 1, vec![], "hello".to_string());
        let mut event = keys.sign(template).unwrap();
        event.content = "tampered".to_string();

        assert!(matches!(
            event.verify(),
            Err(EventError::IdMismatch { .. })
        ));
    }

    #[test]
    fn keys_roundtrip_through_hex() {
        let keys = Keys::generate();
        let secret_hex = hex::encode(keys.keypair.secret_key().secret_bytes());
        let restored = Keys::from_hex(&secret_hex).unwrap();
        assert_eq!(restored.public_key(), keys.public_key());
    }

    #[test]
    fn from_hex_rejects_garbage() {
        assert!(Keys::from_hex("not hex").is_err());
        assert!(Keys::from_hex("abcd").is_err());
    }

    #[test]
    fn tag_helpers() {
        let event = Event {
            id: "00".repeat(32),
            pubkey: "11".repeat(32),
            created_at: 0,
            kind: 1,
            tags: vec![
                vec!["p".into(), "alice".into()],
                vec!["e".into(), "ev1".into()],
                vec!["p".into(), "bob".into()],
            ],
            content: String::new(),
            sig: String::new(),
        };

        assert_eq!(event.tag_value("p"), Some("alice"));
        assert_eq!(event.tag_value("e"), Some("ev1"));
        assert_eq!(event.tag_value("missing"), None);
        assert_eq!(event.tags_named("p").count(), 2);
    }

    #[test]
    fn event_serde_roundtrip() {
        let keys = Keys::generate();
        let event = keys
            .sign(EventTemplate::new(
                1_700_000_000,
                5301,
                vec![vec!["param".into(), "user".into(), "abc".into()]],
                String::new(),
            ))
            .unwrap();

        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
