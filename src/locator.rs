//! Shareable form locators: a NIP-19 `naddr` plus the credential carried in
//! the URL fragment, e.g. `https://formstr.app/f/naddr1...#<hex key>`.
//!
//! Decoding also accepts a bare `naddr`, a `nostr:` URI and the legacy
//! `?viewKey=` query parameter.

use std::str::FromStr;

use url::Url;

use crate::{error::LocatorError, event::FORM_KIND};

const CHARSET: &[u8; 32] = b"qpzry9x8gf2tvdw0s3jn54khce6mua7l";
const GENERATOR: [u32; 5] = [0x3b6a57b2, 0x26508e6d, 0x1ea119fa, 0x3d4233dd, 0x2a1462b3];

const TLV_IDENTIFIER: u8 = 0;
const TLV_RELAY: u8 = 1;
const TLV_AUTHOR: u8 = 2;
const TLV_KIND: u8 = 3;

/// Everything needed to open a form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    /// Form owner public key (hex).
    pub owner: String,
    /// Form identifier (`d` tag).
    pub identifier: String,
    /// Relay hints embedded in the `naddr`.
    pub relays: Vec<String>,
    /// Secret key (hex) for decrypting submissions.
    pub credential: Option<String>,
}

impl Locator {
    pub fn new(owner: impl Into<String>, identifier: impl Into<String>) -> Self {
        Locator {
            owner: owner.into(),
            identifier: identifier.into(),
            relays: Vec::new(),
            credential: None,
        }
    }

    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }

    pub fn with_relays(mut self, relays: Vec<String>) -> Self {
        self.relays = relays;
        self
    }

    /// NIP-19 `naddr` of the form template.
    pub fn naddr(&self) -> Result<String, LocatorError> {
        let author = decode_hex_key(&self.owner)?;
        encode_naddr(&self.identifier, &author, &self.relays, FORM_KIND)
    }

    /// `<base>/f/<naddr>`, with `#<credential>` when one is set.
    pub fn to_url(&self, base: &str) -> Result<String, LocatorError> {
        let mut url = format!("{}/f/{}", base.trim_end_matches('/'), self.naddr()?);
        if let Some(credential) = &self.credential {
            url.push('#');
            url.push_str(credential);
        }
        Ok(url)
    }

    /// Parse any accepted locator form.
    pub fn parse(input: &str) -> Result<Self, LocatorError> {
        let input = input.trim();
        let (rest, fragment) = match input.split_once('#') {
            Some((rest, frag)) => (rest, Some(frag)),
            None => (input, None),
        };
        let mut credential = fragment.filter(|f| !f.is_empty()).map(str::to_string);

        let naddr = if rest.contains("://") {
            let url = Url::parse(rest).map_err(|e| LocatorError::Malformed(e.to_string()))?;
            if credential.is_none() {
                credential = legacy_view_key(url.query_pairs());
            }
            url.path_segments()
                .and_then(|mut segs| segs.rfind(|s| !s.is_empty()))
                .map(str::to_string)
                .ok_or(LocatorError::Missing("naddr"))?
        } else {
            let (bare, query) = match rest.split_once('?') {
                Some((bare, query)) => (bare, Some(query)),
                None => (rest, None),
            };
            if credential.is_none() {
                if let Some(query) = query {
                    credential = legacy_view_key(url::form_urlencoded::parse(query.as_bytes()));
                }
            }
            bare.to_string()
        };
        let naddr = naddr.strip_prefix("nostr:").unwrap_or(&naddr);
        if naddr.is_empty() {
            return Err(LocatorError::Missing("naddr"));
        }

        if let Some(credential) = &credential {
            if credential.len() != 64 || hex::decode(credential).is_err() {
                return Err(LocatorError::Malformed(
                    "credential is not a 32-byte hex key".into(),
                ));
            }
        }
        let mut locator = decode_naddr(naddr)?;
        locator.credential = credential;
        Ok(locator)
    }
}

impl FromStr for Locator {
    type Err = LocatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Locator::parse(s)
    }
}

/// Shareable URL for a form.
pub fn encode(
    owner: &str,
    identifier: &str,
    credential: Option<&str>,
    base: &str,
) -> Result<String, LocatorError> {
    let mut locator = Locator::new(owner, identifier);
    locator.credential = credential.map(str::to_string);
    locator.to_url(base)
}

/// Decode a shareable locator.
pub fn decode(input: &str) -> Result<Locator, LocatorError> {
    Locator::parse(input)
}

/// Accept a hex public key or an `npub`, returning hex.
pub fn decode_pubkey(input: &str) -> Result<String, LocatorError> {
    let input = input.trim();
    if input.len() == 64 && hex::decode(input).is_ok() {
        return Ok(input.to_lowercase());
    }
    let input = input.strip_prefix("nostr:").unwrap_or(input);
    let (hrp, data) = bech32_decode(input)?;
    if hrp != "npub" {
        return Err(LocatorError::Prefix {
            expected: "npub",
            actual: hrp,
        });
    }
    if data.len() != 32 {
        return Err(LocatorError::Malformed("public key must be 32 bytes".into()));
    }
    Ok(hex::encode(data))
}

fn legacy_view_key<'a>(
    pairs: impl Iterator<Item = (std::borrow::Cow<'a, str>, std::borrow::Cow<'a, str>)>,
) -> Option<String> {
    pairs
        .filter(|(k, _)| k == "viewKey")
        .map(|(_, v)| v.into_owned())
        .find(|v| !v.is_empty())
}

fn decode_hex_key(owner: &str) -> Result<[u8; 32], LocatorError> {
    hex::decode(owner)
        .ok()
        .and_then(|bytes| <[u8; 32]>::try_from(bytes).ok())
        .ok_or_else(|| LocatorError::Malformed(format!("owner `{owner}` is not a 32-byte hex key")))
}

fn encode_naddr(
    identifier: &str,
    author: &[u8; 32],
    relays: &[String],
    kind: u32,
) -> Result<String, LocatorError> {
    let mut tlv = Vec::new();
    push_tlv(&mut tlv, TLV_IDENTIFIER, identifier.as_bytes())?;
    for relay in relays {
        push_tlv(&mut tlv, TLV_RELAY, relay.as_bytes())?;
    }
    push_tlv(&mut tlv, TLV_AUTHOR, author)?;
    push_tlv(&mut tlv, TLV_KIND, &kind.to_be_bytes())?;
    Ok(bech32_encode("naddr", &tlv))
}

fn push_tlv(out: &mut Vec<u8>, t: u8, value: &[u8]) -> Result<(), LocatorError> {
    // TLV lengths are a single byte.
    let len = u8::try_from(value.len()).map_err(|_| {
        LocatorError::Malformed(format!(
            "TLV value of {} bytes exceeds {} bytes",
            value.len(),
            u8::MAX
        ))
    })?;
    out.push(t);
    out.push(len);
    out.extend_from_slice(value);
    Ok(())
}

fn decode_naddr(naddr: &str) -> Result<Locator, LocatorError> {
    let (hrp, data) = bech32_decode(naddr)?;
    if hrp != "naddr" {
        return Err(LocatorError::Prefix {
            expected: "naddr",
            actual: hrp,
        });
    }
    let mut identifier = None;
    let mut author = None;
    let mut kind = None;
    let mut relays = Vec::new();

    let mut rest = data.as_slice();
    while !rest.is_empty() {
        let [t, len, tail @ ..] = rest else {
            return Err(LocatorError::Malformed("truncated TLV".into()));
        };
        let len = *len as usize;
        if tail.len() < len {
            return Err(LocatorError::Malformed("truncated TLV".into()));
        }
        let (value, next) = tail.split_at(len);
        match *t {
            TLV_IDENTIFIER => {
                identifier = Some(
                    String::from_utf8(value.to_vec())
                        .map_err(|_| LocatorError::Malformed("identifier is not UTF-8".into()))?,
                )
            }
            TLV_RELAY => {
                if let Ok(relay) = String::from_utf8(value.to_vec()) {
                    relays.push(relay);
                }
            }
            TLV_AUTHOR => {
                if value.len() != 32 {
                    return Err(LocatorError::Malformed("author must be 32 bytes".into()));
                }
                author = Some(hex::encode(value));
            }
            TLV_KIND => {
                let bytes: [u8; 4] = value
                    .try_into()
                    .map_err(|_| LocatorError::Malformed("kind must be 4 bytes".into()))?;
                kind = Some(u32::from_be_bytes(bytes));
            }
            _ => {}
        }
        rest = next;
    }

    if let Some(kind) = kind {
        if kind != FORM_KIND {
            return Err(LocatorError::Kind(kind));
        }
    }
    Ok(Locator {
        owner: author.ok_or(LocatorError::Missing("author"))?,
        identifier: identifier.ok_or(LocatorError::Missing("identifier"))?,
        relays,
        credential: None,
    })
}

fn polymod(values: &[u8]) -> u32 {
    let mut chk: u32 = 1;
    for v in values {
        let top = chk >> 25;
        chk = ((chk & 0x1ff_ffff) << 5) ^ u32::from(*v);
        for (i, g) in GENERATOR.iter().enumerate() {
            if (top >> i) & 1 == 1 {
                chk ^= g;
            }
        }
    }
    chk
}

fn hrp_expand(hrp: &str) -> Vec<u8> {
    let mut out: Vec<u8> = hrp.bytes().map(|b| b >> 5).collect();
    out.push(0);
    out.extend(hrp.bytes().map(|b| b & 31));
    out
}

fn convert_bits(data: &[u8], from: u32, to: u32, pad: bool) -> Result<Vec<u8>, LocatorError> {
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;
    let maxv: u32 = (1 << to) - 1;
    let max_acc: u32 = (1 << (from + to - 1)) - 1;
    let mut out = Vec::new();
    for value in data {
        let v = u32::from(*value);
        if v >> from != 0 {
            return Err(LocatorError::Bech32("invalid data"));
        }
        acc = ((acc << from) | v) & max_acc;
        bits += from;
        while bits >= to {
            bits -= to;
            out.push(((acc >> bits) & maxv) as u8);
        }
    }
    if pad {
        if bits > 0 {
            out.push(((acc << (to - bits)) & maxv) as u8);
        }
    } else if bits >= from || ((acc << (to - bits)) & maxv) != 0 {
        return Err(LocatorError::Bech32("invalid padding"));
    }
    Ok(out)
}

/// Bech32-encode `data` under `hrp`.
pub fn bech32_encode(hrp: &str, data: &[u8]) -> String {
    // 8 -> 5 bit conversion with padding cannot fail
    let words = convert_bits(data, 8, 5, true).unwrap_or_default();
    let mut values = hrp_expand(hrp);
    values.extend(&words);
    values.extend([0u8; 6]);
    let pm = polymod(&values) ^ 1;

    let mut out = String::with_capacity(hrp.len() + 1 + words.len() + 6);
    out.push_str(hrp);
    out.push('1');
    for w in &words {
        out.push(CHARSET[*w as usize] as char);
    }
    for i in 0..6 {
        out.push(CHARSET[((pm >> (5 * (5 - i))) & 31) as usize] as char);
    }
    out
}

/// Decode a bech32 string into its prefix and payload bytes.
pub fn bech32_decode(input: &str) -> Result<(String, Vec<u8>), LocatorError> {
    let has_lower = input.bytes().any(|b| b.is_ascii_lowercase());
    let has_upper = input.bytes().any(|b| b.is_ascii_uppercase());
    if has_lower && has_upper {
        return Err(LocatorError::Bech32("mixed case"));
    }
    let input = input.to_ascii_lowercase();
    let sep = input.rfind('1').ok_or(LocatorError::Bech32("missing separator"))?;
    let (hrp, data) = (&input[..sep], &input[sep + 1..]);
    if hrp.is_empty() || data.len() < 6 {
        return Err(LocatorError::Bech32("too short"));
    }
    let words = data
        .bytes()
        .map(|c| {
            CHARSET
                .iter()
                .position(|&x| x == c)
                .map(|p| p as u8)
                .ok_or(LocatorError::Bech32("invalid character"))
        })
        .collect::<Result<Vec<u8>, _>>()?;
    let mut values = hrp_expand(hrp);
    values.extend(&words);
    if polymod(&values) != 1 {
        return Err(LocatorError::Bech32("checksum mismatch"));
    }
    let payload = convert_bits(&words[..words.len() - 6], 5, 8, false)?;
    Ok((hrp.to_string(), payload))
}
