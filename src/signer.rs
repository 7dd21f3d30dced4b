//! Signing capability.

use secp256k1::{Keypair, Message, Secp256k1};

use crate::{
    error::{Error, Result},
    event::{is_hex32, Draft, Event},
    nip19,
};

/// Something that can seal a [`Draft`] into a signed [`Event`].
pub trait Signer {
    /// Hex x-only public key events are signed under.
    fn public_key(&self) -> String;

    /// Consume `draft`, assigning pubkey, id and signature.
    fn sign(&self, draft: Draft) -> Result<Event>;
}

/// Signs with an in-memory secp256k1 secret key.
pub struct KeySigner {
    keypair: Keypair,
    secp: Secp256k1<secp256k1::All>,
}

impl KeySigner {
    /// Accepts a 64-character hex secret or an `nsec1` string.
    pub fn from_secret(secret: &str) -> Result<Self> {
        let secret = secret.trim();
        let bytes: [u8; 32] = if is_hex32(secret) {
            let mut out = [0u8; 32];
            hex::decode_to_slice(secret, &mut out)
                .map_err(|e| Error::InvalidSecretKey(e.to_string()))?;
            out
        } else if secret.to_ascii_lowercase().starts_with("nsec1") {
            nip19::decode_nsec(secret).map_err(|e| Error::InvalidSecretKey(e.to_string()))?
        } else {
            return Err(Error::InvalidSecretKey(
                "expected 64 hex characters or nsec".into(),
            ));
        };
        let secp = Secp256k1::new();
        let keypair = Keypair::from_seckey_slice(&secp, &bytes)
            .map_err(|e| Error::InvalidSecretKey(e.to_string()))?;
        Ok(Self { keypair, secp })
    }
}

impl Signer for KeySigner {
    fn public_key(&self) -> String {
        hex::encode(self.keypair.x_only_public_key().0.serialize())
    }

    fn sign(&self, draft: Draft) -> Result<Event> {
        let pubkey = self.public_key();
        let hash = draft.hash(&pubkey)?;
        let msg = Message::from_digest(hash);
        let sig = self.secp.sign_schnorr_no_aux_rand(&msg, &self.keypair);
        Ok(Event {
            id: hex::encode(hash),
            pubkey,
            kind: draft.kind,
            created_at: draft.created_at,
            tags: draft.tags,
            content: draft.content,
            sig: hex::encode(sig.as_ref()),
        })
    }
}
