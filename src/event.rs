//! Nostr event model.

use anyhow::{anyhow, Result};
use secp256k1::{schnorr::Signature, Keypair, Message, Secp256k1, XOnlyPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Addressable event kind carrying a form template.
pub const FORM_KIND: u32 = 30168;

/// Event kind of a single form submission.
pub const RESPONSE_KIND: u32 = 1069;

/// Wrapper for a Nostr tag expressed as an array of strings.
///
/// Tags appear as small arrays where the first element denotes the type and the
/// following elements hold data. The form protocol uses:
///
/// - `d` – form identifier of the template event
/// - `a` – `<kind>:<pubkey>:<identifier>` reference from a submission to its form
/// - `field` – `["field", id, type, label?, options?, meta?]` question definition
/// - `response` – `["response", id, value, metadata?]` answer to one question
///
/// Each tag is stored verbatim so uncommon or custom tags are preserved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tag(pub Vec<String>);

impl Tag {
    /// Build a tag from its parts.
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Tag(parts.into_iter().map(Into::into).collect())
    }

    /// Tag type, e.g. `d` or `response`.
    pub fn kind(&self) -> Option<&str> {
        self.get(0)
    }

    /// Element at `idx`; `0` is the tag type.
    pub fn get(&self, idx: usize) -> Option<&str> {
        self.0.get(idx).map(String::as_str)
    }
}

/// Core Nostr event as delivered by relays.
///
/// ```json
/// {
///   "id": "aa11",
///   "pubkey": "9f3c...",
///   "kind": 1069,
///   "created_at": 1700000000,
///   "tags": [["a", "30168:ab12...:invoice"], ["response", "q1", "Acme"]],
///   "content": "",
///   "sig": "deadbeef"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// Event identifier (hex of SHA-256 hash).
    pub id: String,
    /// Author public key (hex).
    pub pubkey: String,
    /// Kind number, e.g. `30168` or `1069`.
    pub kind: u32,
    /// Unix timestamp of creation.
    pub created_at: u64,
    /// Arbitrary tags.
    pub tags: Vec<Tag>,
    /// Event content body; NIP-44 payload for encrypted events.
    pub content: String,
    /// Schnorr signature over the event hash.
    pub sig: String,
}

impl Event {
    /// All tags of the given type, in order.
    pub fn tags_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Tag> + 'a {
        self.tags.iter().filter(move |t| t.kind() == Some(name))
    }

    /// First value of the first tag of the given type.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .filter(|t| t.kind() == Some(name))
            .find_map(|t| t.get(1))
    }
}

/// Compute the NIP-01 event hash from its fields.
pub fn hash_fields(
    pubkey: &str,
    created_at: u64,
    kind: u32,
    tags: &[Tag],
    content: &str,
) -> Result<[u8; 32]> {
    let arr = serde_json::json!([0, pubkey, created_at, kind, tags, content]);
    let data = serde_json::to_vec(&arr)?;
    let hash = Sha256::digest(&data);
    Ok(hash.into())
}

/// Recompute the Nostr event hash of an existing event.
pub fn event_hash(ev: &Event) -> Result<[u8; 32]> {
    hash_fields(&ev.pubkey, ev.created_at, ev.kind, &ev.tags, &ev.content)
}

/// Hash and sign event fields with `keys`, producing a complete event.
pub fn sign(
    keys: &Keypair,
    kind: u32,
    created_at: u64,
    tags: Vec<Tag>,
    content: String,
) -> Result<Event> {
    let secp = Secp256k1::new();
    let pubkey = hex::encode(keys.x_only_public_key().0.serialize());
    let hash = hash_fields(&pubkey, created_at, kind, &tags, &content)?;
    let msg = Message::from_digest(hash);
    let sig = secp.sign_schnorr_no_aux_rand(&msg, keys);
    Ok(Event {
        id: hex::encode(hash),
        pubkey,
        kind,
        created_at,
        tags,
        content,
        sig: hex::encode(sig.as_ref()),
    })
}

/// Verify an event's ID and Schnorr signature.
pub fn verify(ev: &Event) -> Result<()> {
    let hash = event_hash(ev)?;
    let calc_id = hex::encode(hash);
    if calc_id != ev.id {
        return Err(anyhow!("id mismatch"));
    }
    let sig = Signature::from_slice(&hex::decode(&ev.sig)?)?;
    let pk = XOnlyPublicKey::from_slice(&hex::decode(&ev.pubkey)?)?;
    let secp = Secp256k1::verification_only();
    let msg = Message::from_digest(hash);
    secp.verify_schnorr(&sig, &msg, &pk)?;
    Ok(())
}

/// Current Unix time in seconds.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
