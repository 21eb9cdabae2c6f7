//! NIP-44 v2 payload encryption.
//!
//! Payload layout (base64 encoded):
//!
//! ```text
//! version (1, = 0x02) | nonce (32) | ChaCha20(padded plaintext) | HMAC-SHA256 (32)
//! ```
//!
//! The conversation key is `HKDF-extract(salt = "nip44-v2", ikm = ECDH x)`
//! and per-message keys are `HKDF-expand(conversation_key, nonce, 76)`.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::ChaCha20;
use hmac::{Hmac, Mac};
use rand::RngCore;
use secp256k1::{ecdh, Parity, PublicKey, SecretKey, XOnlyPublicKey};
use sha2::Sha256;

use crate::error::DecryptError;

type HmacSha256 = Hmac<Sha256>;

const VERSION: u8 = 2;
const SALT: &[u8] = b"nip44-v2";
const MAX_PLAINTEXT: usize = 65535;

/// Symmetric key shared by two parties of a conversation.
#[derive(Clone, PartialEq, Eq)]
pub struct ConversationKey([u8; 32]);

impl std::fmt::Debug for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ConversationKey(..)")
    }
}

impl ConversationKey {
    /// Derive from a hex secret key and the peer's hex x-only public key.
    pub fn derive(secret_hex: &str, peer_pubkey_hex: &str) -> Result<Self, DecryptError> {
        let secret = parse_secret(secret_hex)?;
        let peer = parse_pubkey(peer_pubkey_hex)?;
        Self::from_keys(&secret, &peer)
    }

    /// Derive from parsed keys.
    pub fn from_keys(secret: &SecretKey, peer: &XOnlyPublicKey) -> Result<Self, DecryptError> {
        let point = PublicKey::from_x_only_public_key(*peer, Parity::Even);
        let shared = ecdh::shared_secret_point(&point, secret);
        Ok(Self(hmac_sha256(SALT, &[&shared[..32]])?))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Parse a 32-byte hex secret key.
pub fn parse_secret(secret_hex: &str) -> Result<SecretKey, DecryptError> {
    let bytes = hex::decode(secret_hex.trim()).map_err(|_| DecryptError::InvalidCredential)?;
    SecretKey::from_slice(&bytes).map_err(|_| DecryptError::InvalidCredential)
}

/// Parse a 32-byte hex x-only public key.
pub fn parse_pubkey(pubkey_hex: &str) -> Result<XOnlyPublicKey, DecryptError> {
    let bytes = hex::decode(pubkey_hex.trim())
        .map_err(|_| DecryptError::InvalidPublicKey(pubkey_hex.to_string()))?;
    XOnlyPublicKey::from_slice(&bytes)
        .map_err(|_| DecryptError::InvalidPublicKey(pubkey_hex.to_string()))
}

/// Hex x-only public key belonging to a hex secret key.
pub fn public_key_hex(secret_hex: &str) -> Result<String, DecryptError> {
    let secret = parse_secret(secret_hex)?;
    let secp = secp256k1::Secp256k1::signing_only();
    let (xonly, _) = secret.x_only_public_key(&secp);
    Ok(hex::encode(xonly.serialize()))
}

struct MessageKeys {
    chacha_key: [u8; 32],
    chacha_nonce: [u8; 12],
    hmac_key: [u8; 32],
}

impl MessageKeys {
    fn derive(key: &ConversationKey, nonce: &[u8; 32]) -> Result<Self, DecryptError> {
        // HKDF-expand to 76 bytes: three HMAC blocks.
        let mut okm = Vec::with_capacity(96);
        let mut prev: Vec<u8> = Vec::new();
        for counter in 1u8..=3 {
            let block = hmac_sha256(&key.0, &[prev.as_slice(), nonce.as_slice(), &[counter]])?;
            okm.extend_from_slice(&block);
            prev = block.to_vec();
        }
        let mut keys = MessageKeys {
            chacha_key: [0; 32],
            chacha_nonce: [0; 12],
            hmac_key: [0; 32],
        };
        keys.chacha_key.copy_from_slice(&okm[0..32]);
        keys.chacha_nonce.copy_from_slice(&okm[32..44]);
        keys.hmac_key.copy_from_slice(&okm[44..76]);
        Ok(keys)
    }

    fn apply_keystream(&self, buf: &mut [u8]) -> Result<(), DecryptError> {
        let mut cipher = ChaCha20::new_from_slices(&self.chacha_key, &self.chacha_nonce)
            .map_err(|_| DecryptError::InvalidPayloadLength(self.chacha_nonce.len()))?;
        cipher.apply_keystream(buf);
        Ok(())
    }
}

fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> Result<[u8; 32], DecryptError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| DecryptError::InvalidMac)?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().into())
}

/// Size of the padded plaintext for a message of `len` bytes.
pub fn padded_len(len: usize) -> usize {
    if len <= 32 {
        return 32;
    }
    let next_power = 1usize << (usize::BITS - (len - 1).leading_zeros());
    let chunk = if next_power <= 256 { 32 } else { next_power / 8 };
    chunk * ((len - 1) / chunk + 1)
}

fn pad(plaintext: &[u8]) -> Result<Vec<u8>, DecryptError> {
    let len = plaintext.len();
    if len == 0 || len > MAX_PLAINTEXT {
        return Err(DecryptError::PlaintextLength(len));
    }
    let mut out = Vec::with_capacity(2 + padded_len(len));
    out.extend_from_slice(&(len as u16).to_be_bytes());
    out.extend_from_slice(plaintext);
    out.resize(2 + padded_len(len), 0);
    Ok(out)
}

fn unpad(padded: &[u8]) -> Result<Vec<u8>, DecryptError> {
    if padded.len() < 2 {
        return Err(DecryptError::InvalidPadding);
    }
    let len = u16::from_be_bytes([padded[0], padded[1]]) as usize;
    if len == 0 || padded.len() != 2 + padded_len(len) {
        return Err(DecryptError::InvalidPadding);
    }
    Ok(padded[2..2 + len].to_vec())
}

/// Encrypt `plaintext` with a fresh random nonce.
pub fn encrypt(plaintext: &str, key: &ConversationKey) -> Result<String, DecryptError> {
    let mut nonce = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut nonce);
    encrypt_with_nonce(plaintext, key, &nonce)
}

/// Encrypt `plaintext` with a caller-chosen nonce.
pub fn encrypt_with_nonce(
    plaintext: &str,
    key: &ConversationKey,
    nonce: &[u8; 32],
) -> Result<String, DecryptError> {
    let keys = MessageKeys::derive(key, nonce)?;
    let mut ciphertext = pad(plaintext.as_bytes())?;
    keys.apply_keystream(&mut ciphertext)?;
    let mac = hmac_sha256(&keys.hmac_key, &[nonce.as_slice(), ciphertext.as_slice()])?;

    let mut payload = Vec::with_capacity(1 + 32 + ciphertext.len() + 32);
    payload.push(VERSION);
    payload.extend_from_slice(nonce);
    payload.extend_from_slice(&ciphertext);
    payload.extend_from_slice(&mac);
    Ok(BASE64.encode(payload))
}

/// Decrypt a base64 NIP-44 v2 payload.
pub fn decrypt(payload: &str, key: &ConversationKey) -> Result<String, DecryptError> {
    if payload.starts_with('#') {
        return Err(DecryptError::UnsupportedVersion);
    }
    if payload.len() < 132 || payload.len() > 87472 {
        return Err(DecryptError::InvalidPayloadLength(payload.len()));
    }
    let data = BASE64.decode(payload)?;
    if data.len() < 99 || data.len() > 65603 {
        return Err(DecryptError::InvalidPayloadLength(data.len()));
    }
    if data[0] != VERSION {
        return Err(DecryptError::UnsupportedVersion);
    }
    let mut nonce = [0u8; 32];
    nonce.copy_from_slice(&data[1..33]);
    let (ciphertext, mac) = data[33..].split_at(data.len() - 33 - 32);

    let keys = MessageKeys::derive(key, &nonce)?;
    let mut verifier =
        HmacSha256::new_from_slice(&keys.hmac_key).map_err(|_| DecryptError::InvalidMac)?;
    verifier.update(&nonce);
    verifier.update(ciphertext);
    verifier
        .verify_slice(mac)
        .map_err(|_| DecryptError::InvalidMac)?;

    let mut padded = ciphertext.to_vec();
    keys.apply_keystream(&mut padded)?;
    Ok(String::from_utf8(unpad(&padded)?)?)
}
