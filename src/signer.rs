//! Local Schnorr signer and event verification.
//!
//! [`KeySigner`] is one implementation of the [`Signer`] capability for
//! callers that hold a key themselves; browser-extension style signers live
//! outside this crate and only need to implement the trait.

use secp256k1::{schnorr::Signature, All, Keypair, Message, Secp256k1, XOnlyPublicKey};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::event::{Event, UnsignedEvent};
use crate::publish::Signer;

/// Canonical NIP-01 event hash: SHA-256 of
/// `[0, pubkey, created_at, kind, tags, content]`.
pub fn event_hash(
    pubkey: &str,
    created_at: u64,
    kind: u32,
    tags: &[crate::event::Tag],
    content: &str,
) -> Result<[u8; 32]> {
    let arr = serde_json::json!([0, pubkey, created_at, kind, tags, content]);
    let data = serde_json::to_vec(&arr)?;
    Ok(Sha256::digest(&data).into())
}

/// Verify an event's id and Schnorr signature.
pub fn verify_event(ev: &Event) -> Result<()> {
    let hash = event_hash(&ev.pubkey, ev.created_at, ev.kind, &ev.tags, &ev.content)?;
    if hex::encode(hash) != ev.id {
        return Err(Error::Signing("event id mismatch".into()));
    }
    let sig = Signature::from_slice(&hex::decode(&ev.sig).map_err(|e| Error::Signing(e.to_string()))?)
        .map_err(|e| Error::Signing(e.to_string()))?;
    let pk = XOnlyPublicKey::from_slice(
        &hex::decode(&ev.pubkey).map_err(|e| Error::Signing(e.to_string()))?,
    )
    .map_err(|e| Error::Signing(e.to_string()))?;
    let secp = Secp256k1::verification_only();
    let msg = Message::from_digest_slice(&hash).map_err(|e| Error::Signing(e.to_string()))?;
    secp.verify_schnorr(&sig, &msg, &pk)
        .map_err(|e| Error::Signing(e.to_string()))
}

/// Signer backed by a local secp256k1 keypair.
pub struct KeySigner {
    secp: Secp256k1<All>,
    keypair: Keypair,
}

impl KeySigner {
    /// Build a signer from a 32-byte hex secret key.
    pub fn from_hex(secret: &str) -> Result<Self> {
        let secp = Secp256k1::new();
        let bytes = hex::decode(secret).map_err(|e| Error::Signing(e.to_string()))?;
        let keypair = Keypair::from_seckey_slice(&secp, &bytes)
            .map_err(|e| Error::Signing(e.to_string()))?;
        Ok(Self { secp, keypair })
    }

    /// Generate a fresh random keypair.
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let keypair = Keypair::new(&secp, &mut rand::thread_rng());
        Self { secp, keypair }
    }

    /// Hex-encoded secret key, for persisting a generated key.
    pub fn secret_hex(&self) -> String {
        hex::encode(self.keypair.secret_bytes())
    }
}

impl Signer for KeySigner {
    fn public_key(&self) -> String {
        hex::encode(self.keypair.x_only_public_key().0.serialize())
    }

    async fn sign(&self, event: UnsignedEvent) -> Result<Event> {
        let pubkey = self.public_key();
        let hash = event_hash(
            &pubkey,
            event.created_at,
            event.kind,
            &event.tags,
            &event.content,
        )?;
        let msg = Message::from_digest_slice(&hash).map_err(|e| Error::Signing(e.to_string()))?;
        let sig = self.secp.sign_schnorr_no_aux_rand(&msg, &self.keypair);
        Ok(Event {
            id: hex::encode(hash),
            pubkey,
            kind: event.kind,
            created_at: event.created_at,
            tags: event.tags,
            content: event.content,
            sig: hex::encode(sig.as_ref()),
        })
    }
}
