//! NIP-19 shareable references.
//!
//! A replaceable event is addressed by its coordinate: kind, author and `d`
//! identifier. Coordinates are shared as bech32 `naddr1...` strings and
//! looked up locally by their query key `kind:pubkey:identifier`. Plain
//! events are shared as `note1...`/`nevent1...` or raw hex ids, and web
//! pages by URL. [`Reference`] accepts all of these interchangeably.

use std::fmt;

use bech32::{FromBase32, ToBase32, Variant};
use thiserror::Error;

const NADDR_HRP: &str = "naddr";
const NEVENT_HRP: &str = "nevent";
const NOTE_HRP: &str = "note";
const NPUB_HRP: &str = "npub";

/// TLV type carrying the `d` identifier (naddr) or event id (nevent).
const TLV_SPECIAL: u8 = 0;
/// TLV type carrying a relay hint.
const TLV_RELAY: u8 = 1;
/// TLV type carrying the 32-byte author key.
const TLV_AUTHOR: u8 = 2;
/// TLV type carrying the big-endian u32 kind.
const TLV_KIND: u8 = 3;

/// Error when a shareable reference cannot be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed reference {input:?}: {reason}")]
pub struct MalformedReference {
    /// The string that failed to decode.
    pub input: String,
    /// What was wrong with it.
    pub reason: String,
}

impl MalformedReference {
    fn new(input: &str, reason: impl Into<String>) -> Self {
        Self {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

/// The address of a parameterized replaceable event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Coordinate {
    /// Event kind.
    pub kind: u16,
    /// Author public key (lowercase hex).
    pub pubkey: String,
    /// The `d` tag identifier (may be empty).
    pub identifier: String,
    /// Relay hints carried by the encoded form.
    pub relays: Vec<String>,
}

impl Coordinate {
    /// Create a coordinate without relay hints.
    pub fn new(kind: u16, pubkey: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            kind,
            pubkey: pubkey.into(),
            identifier: identifier.into(),
            relays: Vec::new(),
        }
    }

    /// Add a relay hint.
    pub fn with_relay(mut self, relay: impl Into<String>) -> Self {
        self.relays.push(relay.into());
        self
    }

    /// The local lookup key: `kind:pubkey:identifier`.
    ///
    /// This is also the value of an `a` tag pointing at the coordinate.
    pub fn query_key(&self) -> String {
        format!("{}:{}:{}", self.kind, self.pubkey, self.identifier)
    }

    /// Parse a query key (`kind:pubkey:identifier`).
    ///
    /// The identifier is everything after the second colon and may itself
    /// contain colons.
    pub fn from_query_key(key: &str) -> Result<Self, MalformedReference> {
        let mut parts = key.splitn(3, ':');
        let (Some(kind), Some(pubkey), Some(identifier)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(MalformedReference::new(key, "expected kind:pubkey:identifier"));
        };

        let kind = kind
            .parse::<u16>()
            .map_err(|_| MalformedReference::new(key, "kind is not a number"))?;
        if !is_hex_key(pubkey) {
            return Err(MalformedReference::new(key, "pubkey is not 32 bytes of hex"));
        }

        Ok(Self::new(kind, pubkey.to_ascii_lowercase(), identifier))
    }

    /// Encode as a NIP-19 `naddr1...` string.
    ///
    /// # Example
    ///
    /// ```
    /// use glean_nostr::Coordinate;
    ///
    /// let pubkey = "7e7e9c42a91bfef19fa929e5fda1b72e0ebc1a4c1141673e2794234d86addf4e";
    /// let coordinate = Coordinate::new(30023, pubkey, "my-article");
    /// let naddr = coordinate.encode().unwrap();
    /// assert!(naddr.starts_with("naddr1"));
    /// assert_eq!(Coordinate::decode(&naddr).unwrap(), coordinate);
    /// ```
    pub fn encode(&self) -> Result<String, MalformedReference> {
        let author = decode_hex_key(&self.pubkey)
            .ok_or_else(|| MalformedReference::new(&self.pubkey, "pubkey is not 32 bytes of hex"))?;

        let mut tlv = Vec::new();
        push_tlv(&mut tlv, TLV_SPECIAL, self.identifier.as_bytes(), &self.pubkey)?;
        for relay in &self.relays {
            push_tlv(&mut tlv, TLV_RELAY, relay.as_bytes(), relay)?;
        }
        push_tlv(&mut tlv, TLV_AUTHOR, &author, &self.pubkey)?;
        push_tlv(&mut tlv, TLV_KIND, &u32::from(self.kind).to_be_bytes(), &self.pubkey)?;

        bech32::encode(NADDR_HRP, tlv.to_base32(), Variant::Bech32)
            .map_err(|e| MalformedReference::new(&self.query_key(), e.to_string()))
    }

    /// Decode a NIP-19 `naddr1...` string.
    pub fn decode(naddr: &str) -> Result<Self, MalformedReference> {
        let data = decode_bech32(naddr, NADDR_HRP)?;

        let mut identifier = None;
        let mut relays = Vec::new();
        let mut author = None;
        let mut kind = None;

        for (t, value) in parse_tlv(naddr, &data)? {
            match t {
                TLV_SPECIAL => {
                    let s = std::str::from_utf8(value)
                        .map_err(|_| MalformedReference::new(naddr, "identifier is not UTF-8"))?;
                    identifier = Some(s.to_string());
                }
                TLV_RELAY => {
                    if let Ok(s) = std::str::from_utf8(value) {
                        relays.push(s.to_string());
                    }
                }
                TLV_AUTHOR => {
                    if value.len() != 32 {
                        return Err(MalformedReference::new(naddr, "author is not 32 bytes"));
                    }
                    author = Some(hex::encode(value));
                }
                TLV_KIND => {
                    let bytes: [u8; 4] = value
                        .try_into()
                        .map_err(|_| MalformedReference::new(naddr, "kind is not 4 bytes"))?;
                    let k = u16::try_from(u32::from_be_bytes(bytes))
                        .map_err(|_| MalformedReference::new(naddr, "kind out of range"))?;
                    kind = Some(k);
                }
                // Unknown TLV types are ignored per NIP-19
                _ => {}
            }
        }

        Ok(Self {
            kind: kind.ok_or_else(|| MalformedReference::new(naddr, "missing kind"))?,
            pubkey: author.ok_or_else(|| MalformedReference::new(naddr, "missing author"))?,
            identifier: identifier
                .ok_or_else(|| MalformedReference::new(naddr, "missing identifier"))?,
            relays,
        })
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.query_key())
    }
}

/// A pointer to a single (non-replaceable) event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventPointer {
    /// Event id (lowercase hex).
    pub id: String,
    /// Author hint, when the encoded form carried one.
    pub author: Option<String>,
    /// Kind hint, when the encoded form carried one.
    pub kind: Option<u16>,
    /// Relay hints.
    pub relays: Vec<String>,
}

impl EventPointer {
    /// Decode a `nevent1...` or `note1...` string.
    pub fn decode(s: &str) -> Result<Self, MalformedReference> {
        if s.starts_with("note1") {
            let data = decode_bech32(s, NOTE_HRP)?;
            if data.len() != 32 {
                return Err(MalformedReference::new(s, "note id is not 32 bytes"));
            }
            return Ok(Self {
                id: hex::encode(data),
                author: None,
                kind: None,
                relays: Vec::new(),
            });
        }

        let data = decode_bech32(s, NEVENT_HRP)?;
        let mut id = None;
        let mut author = None;
        let mut kind = None;
        let mut relays = Vec::new();

        for (t, value) in parse_tlv(s, &data)? {
            match t {
                TLV_SPECIAL => {
                    if value.len() != 32 {
                        return Err(MalformedReference::new(s, "event id is not 32 bytes"));
                    }
                    id = Some(hex::encode(value));
                }
                TLV_RELAY => {
                    if let Ok(relay) = std::str::from_utf8(value) {
                        relays.push(relay.to_string());
                    }
                }
                TLV_AUTHOR if value.len() == 32 => author = Some(hex::encode(value)),
                TLV_KIND => {
                    if let Ok(bytes) = <[u8; 4]>::try_from(value) {
                        kind = u16::try_from(u32::from_be_bytes(bytes)).ok();
                    }
                }
                _ => {}
            }
        }

        Ok(Self {
            id: id.ok_or_else(|| MalformedReference::new(s, "missing event id"))?,
            author,
            kind,
            relays,
        })
    }

    /// Encode as a `nevent1...` string.
    pub fn encode(&self) -> Result<String, MalformedReference> {
        let id = decode_hex_key(&self.id)
            .ok_or_else(|| MalformedReference::new(&self.id, "event id is not 32 bytes of hex"))?;

        let mut tlv = Vec::new();
        push_tlv(&mut tlv, TLV_SPECIAL, &id, &self.id)?;
        for relay in &self.relays {
            push_tlv(&mut tlv, TLV_RELAY, relay.as_bytes(), relay)?;
        }
        if let Some(author) = &self.author {
            let bytes = decode_hex_key(author)
                .ok_or_else(|| MalformedReference::new(author, "author is not 32 bytes of hex"))?;
            push_tlv(&mut tlv, TLV_AUTHOR, &bytes, author)?;
        }
        if let Some(kind) = self.kind {
            push_tlv(&mut tlv, TLV_KIND, &u32::from(kind).to_be_bytes(), &self.id)?;
        }

        bech32::encode(NEVENT_HRP, tlv.to_base32(), Variant::Bech32)
            .map_err(|e| MalformedReference::new(&self.id, e.to_string()))
    }
}

/// Anything that can name a record: a coordinate, an event id, or a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// A replaceable-event coordinate.
    Coordinate(Coordinate),
    /// A plain event id (lowercase hex).
    EventId(String),
    /// A web page.
    Url(String),
}

impl Reference {
    /// Parse any supported reference form.
    ///
    /// Accepts `naddr1...`, `nevent1...`, `note1...`, a query key
    /// (`kind:pubkey:identifier`), a 64-character hex event id, or an
    /// `http(s)://` URL. A leading `nostr:` scheme is stripped.
    ///
    /// # Example
    ///
    /// ```
    /// use glean_nostr::Reference;
    ///
    /// let r = Reference::parse("https://example.com/post").unwrap();
    /// assert_eq!(r.query_key(), "https://example.com/post");
    /// assert!(Reference::parse("not-a-valid-reference").is_err());
    /// ```
    pub fn parse(input: &str) -> Result<Self, MalformedReference> {
        let s = input.trim();
        let s = s.strip_prefix("nostr:").unwrap_or(s);

        if s.starts_with("naddr1") {
            return Coordinate::decode(s).map(Reference::Coordinate);
        }
        if s.starts_with("nevent1") || s.starts_with("note1") {
            return EventPointer::decode(s).map(|p| Reference::EventId(p.id));
        }
        if s.starts_with("http://") || s.starts_with("https://") {
            return Ok(Reference::Url(s.to_string()));
        }
        if is_hex_key(s) {
            return Ok(Reference::EventId(s.to_ascii_lowercase()));
        }
        if s.contains(':') {
            return Coordinate::from_query_key(s).map(Reference::Coordinate);
        }

        Err(MalformedReference::new(input, "unrecognized reference format"))
    }

    /// The key this reference is stored and looked up under.
    pub fn query_key(&self) -> String {
        match self {
            Reference::Coordinate(c) => c.query_key(),
            Reference::EventId(id) => id.clone(),
            Reference::Url(url) => url.clone(),
        }
    }

    /// The single-letter tag that points at this reference (`a`, `e` or `r`).
    pub fn tag_letter(&self) -> char {
        match self {
            Reference::Coordinate(_) => 'a',
            Reference::EventId(_) => 'e',
            Reference::Url(_) => 'r',
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.query_key())
    }
}

/// Decode an `npub1...` string, or pass through a hex key.
pub fn decode_npub(s: &str) -> Result<String, MalformedReference> {
    let s = s.trim();
    if is_hex_key(s) {
        return Ok(s.to_ascii_lowercase());
    }
    let data = decode_bech32(s, NPUB_HRP)?;
    if data.len() != 32 {
        return Err(MalformedReference::new(s, "public key is not 32 bytes"));
    }
    Ok(hex::encode(data))
}

/// Encode a hex public key as `npub1...`.
pub fn encode_npub(pubkey: &str) -> Result<String, MalformedReference> {
    let bytes = decode_hex_key(pubkey)
        .ok_or_else(|| MalformedReference::new(pubkey, "public key is not 32 bytes of hex"))?;
    bech32::encode(NPUB_HRP, bytes.to_base32(), Variant::Bech32)
        .map_err(|e| MalformedReference::new(pubkey, e.to_string()))
}

fn is_hex_key(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

fn decode_hex_key(s: &str) -> Option<Vec<u8>> {
    if !is_hex_key(s) {
        return None;
    }
    hex::decode(s).ok()
}

fn decode_bech32(s: &str, expected_hrp: &str) -> Result<Vec<u8>, MalformedReference> {
    let (hrp, data, variant) =
        bech32::decode(s).map_err(|e| MalformedReference::new(s, format!("bech32: {e}")))?;

    if hrp != expected_hrp {
        return Err(MalformedReference::new(
            s,
            format!("expected {expected_hrp} prefix, found {hrp}"),
        ));
    }
    if variant != Variant::Bech32 {
        return Err(MalformedReference::new(s, "bech32m is not used by NIP-19"));
    }

    Vec::<u8>::from_base32(&data).map_err(|e| MalformedReference::new(s, format!("bech32: {e}")))
}

fn push_tlv(out: &mut Vec<u8>, t: u8, value: &[u8], context: &str) -> Result<(), MalformedReference> {
    let len = u8::try_from(value.len())
        .map_err(|_| MalformedReference::new(context, "TLV value longer than 255 bytes"))?;
    out.push(t);
    out.push(len);
    out.extend_from_slice(value);
    Ok(())
}

fn parse_tlv<'a>(input: &str, mut data: &'a [u8]) -> Result<Vec<(u8, &'a [u8])>, MalformedReference> {
    let mut entries = Vec::new();
    while !data.is_empty() {
        let [t, len, rest @ ..] = data else {
            return Err(MalformedReference::new(input, "truncated TLV header"));
        };
        let len = usize::from(*len);
        if rest.len() < len {
            return Err(MalformedReference::new(input, "truncated TLV value"));
        }
        entries.push((*t, &rest[..len]));
        data = &rest[len..];
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const PUBKEY: &str = "7e7e9c42a91bfef19fa929e5fda1b72e0ebc1a4c1141673e2794234d86addf4e";
    const EVENT_ID: &str = "b9f5441e45ca39179320e0031cfb18e34078673dcc3d3e3a3b3a981760aa5696";

    #[test]
    fn test_query_key_format() {
        let c = Coordinate::new(30023, PUBKEY, "slug");
        assert_eq!(c.query_key(), format!("30023:{PUBKEY}:slug"));
    }

    #[test]
    fn test_query_key_roundtrip_with_colons() {
        let c = Coordinate::new(30001, PUBKEY, "a:b:c");
        let parsed = Coordinate::from_query_key(&c.query_key()).unwrap();
        assert_eq!(parsed, c);
    }

    #[test]
    fn test_naddr_roundtrip() {
        let c = Coordinate::new(30023, PUBKEY, "my-article");
        let naddr = c.encode().unwrap();
        assert!(naddr.starts_with("naddr1"));
        let decoded = Coordinate::decode(&naddr).unwrap();
        assert_eq!(decoded, c);
        assert_eq!(decoded.query_key(), c.query_key());
    }

    #[test]
    fn test_naddr_with_relays() {
        let c = Coordinate::new(30023, PUBKEY, "x").with_relay("wss://relay.example.com");
        let decoded = Coordinate::decode(&c.encode().unwrap()).unwrap();
        assert_eq!(decoded.relays, vec!["wss://relay.example.com".to_string()]);
    }

    #[test]
    fn test_naddr_empty_identifier() {
        let c = Coordinate::new(30001, PUBKEY, "");
        let decoded = Coordinate::decode(&c.encode().unwrap()).unwrap();
        assert_eq!(decoded.identifier, "");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = Coordinate::decode("not-a-valid-reference").unwrap_err();
        assert_eq!(err.input, "not-a-valid-reference");
    }

    #[test]
    fn test_decode_rejects_wrong_prefix() {
        let npub = encode_npub(PUBKEY).unwrap();
        let err = Coordinate::decode(&npub).unwrap_err();
        assert!(err.reason.contains("expected naddr"));
    }

    #[test]
    fn test_decode_rejects_missing_kind() {
        let mut tlv = Vec::new();
        push_tlv(&mut tlv, TLV_SPECIAL, b"slug", "").unwrap();
        push_tlv(&mut tlv, TLV_AUTHOR, &hex::decode(PUBKEY).unwrap(), "").unwrap();
        let naddr = bech32::encode(NADDR_HRP, tlv.to_base32(), Variant::Bech32).unwrap();
        let err = Coordinate::decode(&naddr).unwrap_err();
        assert_eq!(err.reason, "missing kind");
    }

    #[test]
    fn test_decode_rejects_truncated_tlv() {
        let tlv = vec![TLV_SPECIAL, 10, b'a'];
        let naddr = bech32::encode(NADDR_HRP, tlv.to_base32(), Variant::Bech32).unwrap();
        let err = Coordinate::decode(&naddr).unwrap_err();
        assert_eq!(err.reason, "truncated TLV value");
    }

    #[test]
    fn test_encode_rejects_bad_pubkey() {
        assert!(Coordinate::new(30023, "abc", "x").encode().is_err());
    }

    #[test]
    fn test_nevent_roundtrip() {
        let pointer = EventPointer {
            id: EVENT_ID.to_string(),
            author: Some(PUBKEY.to_string()),
            kind: Some(9802),
            relays: vec!["wss://relay.example.com".to_string()],
        };
        let encoded = pointer.encode().unwrap();
        assert!(encoded.starts_with("nevent1"));
        assert_eq!(EventPointer::decode(&encoded).unwrap(), pointer);
    }

    #[test]
    fn test_note_decode() {
        let bytes = hex::decode(EVENT_ID).unwrap();
        let note = bech32::encode(NOTE_HRP, bytes.to_base32(), Variant::Bech32).unwrap();
        let pointer = EventPointer::decode(&note).unwrap();
        assert_eq!(pointer.id, EVENT_ID);
        assert!(pointer.author.is_none());
    }

    #[test]
    fn test_npub_roundtrip() {
        let npub = encode_npub(PUBKEY).unwrap();
        assert!(npub.starts_with("npub1"));
        assert_eq!(decode_npub(&npub).unwrap(), PUBKEY);
        assert_eq!(decode_npub(PUBKEY).unwrap(), PUBKEY);
    }

    #[test]
    fn test_reference_parse_forms() {
        let c = Coordinate::new(30023, PUBKEY, "slug");
        let naddr = c.encode().unwrap();

        assert_eq!(
            Reference::parse(&naddr).unwrap(),
            Reference::Coordinate(c.clone())
        );
        assert_eq!(
            Reference::parse(&format!("nostr:{naddr}")).unwrap(),
            Reference::Coordinate(c.clone())
        );
        assert_eq!(
            Reference::parse(&c.query_key()).unwrap(),
            Reference::Coordinate(c)
        );
        assert_eq!(
            Reference::parse(EVENT_ID).unwrap(),
            Reference::EventId(EVENT_ID.to_string())
        );
        assert_eq!(
            Reference::parse("https://example.com/a").unwrap(),
            Reference::Url("https://example.com/a".to_string())
        );
    }

    #[test]
    fn test_reference_tag_letters() {
        assert_eq!(Reference::parse(EVENT_ID).unwrap().tag_letter(), 'e');
        assert_eq!(Reference::parse("https://x.org").unwrap().tag_letter(), 'r');
        let key = Coordinate::new(30023, PUBKEY, "s").query_key();
        assert_eq!(Reference::parse(&key).unwrap().tag_letter(), 'a');
    }

    #[test]
    fn test_reference_rejects_garbage() {
        assert!(Reference::parse("not-a-valid-reference").is_err());
        assert!(Reference::parse("").is_err());
        assert!(Reference::parse("30023:short:slug").is_err());
        assert!(Reference::parse("naddr1qqqq").is_err());
    }

    proptest! {
        #[test]
        fn naddr_roundtrip_preserves_triple(
            kind in 30000u16..40000,
            key in proptest::collection::vec(any::<u8>(), 32),
            identifier in "[a-zA-Z0-9:_-]{0,64}",
        ) {
            let pubkey = hex::encode(key);
            let c = Coordinate::new(kind, pubkey, identifier);
            let decoded = Coordinate::decode(&c.encode().unwrap()).unwrap();
            prop_assert_eq!(decoded.query_key(), c.query_key());
            prop_assert_eq!(decoded, c);
        }
    }
}
