//! Bech32 pointer codec (NIP-19) for `npub`, `note`, `nevent`, `nprofile`
//! and `naddr` strings.
//!
//! Pointers are decoded into an [`Identifier`], one variant per pointer kind,
//! so callers match on them instead of probing prefixes. TLV layout:
//!
//! | type | meaning                                                |
//! |------|--------------------------------------------------------|
//! | 0    | event id / public key (32 bytes), or the `d` identifier |
//! | 1    | relay URL (ascii), repeatable                          |
//! | 2    | author public key (32 bytes)                           |
//! | 3    | kind (u32 big endian)                                  |

use bech32::{Bech32, Hrp};

use crate::{
    error::{Error, Result},
    event::{is_hex32, repository_address, REPOSITORY_ANNOUNCEMENT},
};

const TLV_SPECIAL: u8 = 0;
const TLV_RELAY: u8 = 1;
const TLV_AUTHOR: u8 = 2;
const TLV_KIND: u8 = 3;

/// Address of a repository announcement (`naddr`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryPointer {
    pub kind: u32,
    pub pubkey: String,
    /// The announcement's `d` value.
    pub identifier: String,
    pub relays: Vec<String>,
}

impl RepositoryPointer {
    /// `kind:pubkey:identifier`, as used in `a` tags and `#a` filters.
    pub fn address(&self) -> String {
        repository_address(self.kind, &self.pubkey, &self.identifier)
    }

    pub fn encode(&self) -> Result<String> {
        let pubkey = decode_hex32(&self.pubkey)?;
        let mut tlv = vec![];
        push_tlv(&mut tlv, TLV_SPECIAL, self.identifier.as_bytes())?;
        for relay in &self.relays {
            push_tlv(&mut tlv, TLV_RELAY, relay.as_bytes())?;
        }
        push_tlv(&mut tlv, TLV_AUTHOR, &pubkey)?;
        push_tlv(&mut tlv, TLV_KIND, &self.kind.to_be_bytes())?;
        to_bech32("naddr", &tlv)
    }
}

/// Pointer to a single event (`nevent`, `note`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventPointer {
    pub id: String,
    pub relays: Vec<String>,
    pub author: Option<String>,
    pub kind: Option<u32>,
}

impl EventPointer {
    pub fn encode(&self) -> Result<String> {
        let mut tlv = vec![];
        push_tlv(&mut tlv, TLV_SPECIAL, &decode_hex32(&self.id)?)?;
        for relay in &self.relays {
            push_tlv(&mut tlv, TLV_RELAY, relay.as_bytes())?;
        }
        if let Some(author) = &self.author {
            push_tlv(&mut tlv, TLV_AUTHOR, &decode_hex32(author)?)?;
        }
        if let Some(kind) = self.kind {
            push_tlv(&mut tlv, TLV_KIND, &kind.to_be_bytes())?;
        }
        to_bech32("nevent", &tlv)
    }
}

/// Pointer to a user with relays they can be found on (`nprofile`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfilePointer {
    pub pubkey: String,
    pub relays: Vec<String>,
}

impl ProfilePointer {
    pub fn encode(&self) -> Result<String> {
        let mut tlv = vec![];
        push_tlv(&mut tlv, TLV_SPECIAL, &decode_hex32(&self.pubkey)?)?;
        for relay in &self.relays {
            push_tlv(&mut tlv, TLV_RELAY, relay.as_bytes())?;
        }
        to_bech32("nprofile", &tlv)
    }
}

/// A human-given identifier after decoding. Exactly one variant is active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identifier {
    Repository(RepositoryPointer),
    Event(EventPointer),
    Profile(ProfilePointer),
    /// Hex public key, either decoded from `npub` or passed through verbatim
    /// when the input had no known prefix. Validity is checked by the consumer.
    PublicKey(String),
    /// The input failed to decode.
    Invalid { input: String, reason: String },
}

impl Identifier {
    /// Decode `text`, folding errors into [`Identifier::Invalid`].
    pub fn parse(text: &str, expected_kind: Option<u32>) -> Self {
        decode(text, expected_kind).unwrap_or_else(|e| match e {
            Error::InvalidIdentifier { input, reason } => Identifier::Invalid { input, reason },
            other => Identifier::Invalid {
                input: text.trim().to_string(),
                reason: other.to_string(),
            },
        })
    }

    /// Relay hints carried by the pointer.
    pub fn relays(&self) -> &[String] {
        match self {
            Identifier::Repository(p) => &p.relays,
            Identifier::Event(p) => &p.relays,
            Identifier::Profile(p) => &p.relays,
            Identifier::PublicKey(_) | Identifier::Invalid { .. } => &[],
        }
    }
}

/// Decode a pointer string.
///
/// `naddr` must carry the repository announcement kind. When `expected_kind`
/// is given, an `nevent` with a different non-zero kind is rejected. Input
/// without a known prefix is returned as [`Identifier::PublicKey`] untouched.
pub fn decode(text: &str, expected_kind: Option<u32>) -> Result<Identifier> {
    let text = text.trim();
    let text = text.strip_prefix("nostr:").unwrap_or(text);
    let lower = text.to_ascii_lowercase();

    if lower.starts_with("nsec1") {
        return Err(Error::invalid(text, "secret keys are not identifiers"));
    }
    let Some(hrp) = ["npub", "note", "nevent", "nprofile", "naddr"]
        .into_iter()
        .find(|hrp| lower.starts_with(&format!("{hrp}1")))
    else {
        return Ok(Identifier::PublicKey(text.to_string()));
    };

    let data = from_bech32(text, hrp)?;
    match hrp {
        "npub" => Ok(Identifier::PublicKey(hex::encode(exact32(text, &data)?))),
        "note" => Ok(Identifier::Event(EventPointer {
            id: hex::encode(exact32(text, &data)?),
            relays: vec![],
            author: None,
            kind: None,
        })),
        "nevent" => {
            let tlv = Tlv::parse(text, &data)?;
            let pointer = EventPointer {
                id: hex::encode(exact32(text, tlv.special(text)?)?),
                relays: tlv.relays,
                author: tlv.author.as_deref().map(hex::encode),
                kind: tlv.kind,
            };
            if let (Some(expected), Some(got)) = (expected_kind, pointer.kind) {
                if got != 0 && got != expected {
                    return Err(Error::KindMismatch { expected, got });
                }
            }
            Ok(Identifier::Event(pointer))
        }
        "nprofile" => {
            let tlv = Tlv::parse(text, &data)?;
            Ok(Identifier::Profile(ProfilePointer {
                pubkey: hex::encode(exact32(text, tlv.special(text)?)?),
                relays: tlv.relays,
            }))
        }
        _ => {
            let tlv = Tlv::parse(text, &data)?;
            let identifier = String::from_utf8(tlv.special(text)?.to_vec())
                .map_err(|_| Error::invalid(text, "identifier is not utf-8"))?;
            let author = tlv
                .author
                .ok_or_else(|| Error::invalid(text, "missing author"))?;
            let kind = tlv.kind.ok_or_else(|| Error::invalid(text, "missing kind"))?;
            if kind != REPOSITORY_ANNOUNCEMENT {
                return Err(Error::KindMismatch {
                    expected: REPOSITORY_ANNOUNCEMENT,
                    got: kind,
                });
            }
            Ok(Identifier::Repository(RepositoryPointer {
                kind,
                pubkey: hex::encode(exact32(text, &author)?),
                identifier,
                relays: tlv.relays,
            }))
        }
    }
}

/// Encode a hex public key as `npub`.
pub fn encode_npub(pubkey: &str) -> Result<String> {
    to_bech32("npub", &decode_hex32(pubkey)?)
}

/// Decode an `nsec` into its raw secret bytes. Only the signer calls this.
pub(crate) fn decode_nsec(text: &str) -> Result<[u8; 32]> {
    let data = from_bech32(text, "nsec")?;
    let bytes = exact32(text, &data)?;
    let mut out = [0u8; 32];
    out.copy_from_slice(bytes);
    Ok(out)
}

#[derive(Default)]
struct Tlv {
    special: Option<Vec<u8>>,
    relays: Vec<String>,
    author: Option<Vec<u8>>,
    kind: Option<u32>,
}

impl Tlv {
    fn parse(input: &str, mut data: &[u8]) -> Result<Self> {
        let mut tlv = Tlv::default();
        while !data.is_empty() {
            let [t, l, rest @ ..] = data else {
                return Err(Error::invalid(input, "truncated TLV header"));
            };
            let len = *l as usize;
            if rest.len() < len {
                return Err(Error::invalid(input, "truncated TLV value"));
            }
            let (value, rest) = rest.split_at(len);
            match *t {
                // Only the first occurrence of a singular field counts.
                TLV_SPECIAL if tlv.special.is_none() => tlv.special = Some(value.to_vec()),
                TLV_RELAY => {
                    let relay = String::from_utf8(value.to_vec())
                        .map_err(|_| Error::invalid(input, "relay is not utf-8"))?;
                    tlv.relays.push(relay);
                }
                TLV_AUTHOR if tlv.author.is_none() => tlv.author = Some(value.to_vec()),
                TLV_KIND if tlv.kind.is_none() => {
                    let bytes: [u8; 4] = value
                        .try_into()
                        .map_err(|_| Error::invalid(input, "kind must be 4 bytes"))?;
                    tlv.kind = Some(u32::from_be_bytes(bytes));
                }
                _ => {}
            }
            data = rest;
        }
        Ok(tlv)
    }

    fn special(&self, input: &str) -> Result<&[u8]> {
        self.special
            .as_deref()
            .ok_or_else(|| Error::invalid(input, "missing TLV entry 0"))
    }
}

fn push_tlv(out: &mut Vec<u8>, t: u8, value: &[u8]) -> Result<()> {
    let len = u8::try_from(value.len())
        .map_err(|_| Error::invalid(&String::from_utf8_lossy(value), "TLV value too long"))?;
    out.push(t);
    out.push(len);
    out.extend_from_slice(value);
    Ok(())
}

pub(crate) fn to_bech32(hrp: &str, data: &[u8]) -> Result<String> {
    let parsed = Hrp::parse(hrp).map_err(|e| Error::invalid(hrp, e))?;
    bech32::encode::<Bech32>(parsed, data).map_err(|e| Error::invalid(hrp, e))
}

fn from_bech32(text: &str, expected_hrp: &str) -> Result<Vec<u8>> {
    let (hrp, data) = bech32::decode(text).map_err(|e| Error::invalid(text, e))?;
    if hrp.to_string().to_ascii_lowercase() != expected_hrp {
        return Err(Error::invalid(
            text,
            format!("expected '{expected_hrp}' prefix, got '{hrp}'"),
        ));
    }
    Ok(data)
}

fn exact32<'a>(input: &str, bytes: &'a [u8]) -> Result<&'a [u8]> {
    if bytes.len() != 32 {
        return Err(Error::invalid(
            input,
            format!("expected 32 bytes, got {}", bytes.len()),
        ));
    }
    Ok(bytes)
}

fn decode_hex32(value: &str) -> Result<Vec<u8>> {
    if !is_hex32(value) {
        return Err(Error::invalid(value, "expected 64 hex characters"));
    }
    hex::decode(value).map_err(|e| Error::invalid(value, e))
}
