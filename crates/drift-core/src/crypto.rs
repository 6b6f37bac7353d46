//! Cryptographic primitives for drift.
//!
//! Provides two things:
//!   1. Recoverable secp256k1 signatures — every chat frame is signed over
//!      the canonical `{recipient, payload, nonce}` tuple, and verification
//!      recovers the signer's public key and compares the derived identity
//!      against the claimed sender.
//!   2. Peer-to-peer payload encryption — a sealed-box construction over
//!      X25519 + ChaCha20-Poly1305, keyed per message with an ephemeral
//!      keypair. The public half is the `/key` material exchanged in-band.
//!
//! BLAKE3 is used for the signing digest and for identity derivation.
//! Exported private key bytes are wrapped in `Zeroizing`.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::identity::{PeerId, PEER_ID_LEN};

// ── Canonical signing encoding ────────────────────────────────────────────────

/// Digest of the canonical encoding of a signable frame:
///
///   digest = BLAKE3(recipient_id || nonce_le || payload)
///
/// Flipping any byte of recipient, nonce, or payload changes the digest,
/// so a signature over one tuple never verifies for another.
pub fn frame_digest(to: &PeerId, payload: &[u8], nonce: u64) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(to.as_bytes());
    hasher.update(&nonce.to_le_bytes());
    hasher.update(payload);
    *hasher.finalize().as_bytes()
}

/// Derive a peer identity from a secp256k1 verifying key.
///
/// The last 20 bytes of `BLAKE3(uncompressed point without the 0x04 tag)`.
pub fn peer_id_of(key: &VerifyingKey) -> PeerId {
    let point = key.to_encoded_point(false);
    let digest = blake3::hash(&point.as_bytes()[1..]);
    let mut id = [0u8; PEER_ID_LEN];
    id.copy_from_slice(&digest.as_bytes()[32 - PEER_ID_LEN..]);
    PeerId::from_bytes(id)
}

// ── Signing identity ──────────────────────────────────────────────────────────

/// A participant's long-term secp256k1 signing key.
///
/// Generated once per participant and stored persistently. The derived
/// [`PeerId`] is the participant's name on the wire; the private key never
/// leaves this struct except through [`SigningIdentity::to_bytes`].
pub struct SigningIdentity {
    key: SigningKey,
}

impl SigningIdentity {
    /// Generate a fresh random signing key.
    pub fn generate() -> Self {
        Self {
            key: SigningKey::random(&mut rand::thread_rng()),
        }
    }

    /// Reconstruct from stored private key bytes.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        let key = SigningKey::from_slice(bytes).map_err(|_| CryptoError::BadKey)?;
        Ok(Self { key })
    }

    /// Serialize the private key for persistent storage (mode 0600).
    pub fn to_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.key.to_bytes().into())
    }

    /// The identity this key speaks for.
    pub fn peer_id(&self) -> PeerId {
        peer_id_of(self.key.verifying_key())
    }

    /// Sign the canonical `{to, payload, nonce}` tuple.
    pub fn sign(
        &self,
        to: &PeerId,
        payload: &[u8],
        nonce: u64,
    ) -> Result<FrameSignature, CryptoError> {
        let digest = frame_digest(to, payload, nonce);
        let (sig, recovery) = self
            .key
            .sign_prehash_recoverable(&digest)
            .map_err(|_| CryptoError::Sign)?;
        let bytes = sig.to_bytes();
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..]);
        Ok(FrameSignature {
            v: recovery.to_byte(),
            r,
            s,
        })
    }
}

// ── Frame signature ───────────────────────────────────────────────────────────

/// The `{v, r, s}` signature fields carried by every signed frame.
///
/// `v` is the recovery id; `r` and `s` are the signature halves, hex-encoded
/// on the wire. Recovery rather than plain verification means a frame needs
/// no embedded public key: the signature plus the signed tuple yield the
/// signer's identity directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSignature {
    pub v: u8,
    #[serde(with = "hex32")]
    pub r: [u8; 32],
    #[serde(with = "hex32")]
    pub s: [u8; 32],
}

impl FrameSignature {
    /// Recover the identity that signed `{to, payload, nonce}`.
    ///
    /// Returns an error for malformed signature material. A *wrong* but
    /// well-formed signature recovers some other identity — callers must
    /// compare the result against the claimed sender.
    pub fn recover(
        &self,
        to: &PeerId,
        payload: &[u8],
        nonce: u64,
    ) -> Result<PeerId, CryptoError> {
        let digest = frame_digest(to, payload, nonce);
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(&self.r);
        bytes[32..].copy_from_slice(&self.s);
        let sig = Signature::from_slice(&bytes).map_err(|_| CryptoError::BadSignature)?;
        let recovery = RecoveryId::from_byte(self.v).ok_or(CryptoError::BadSignature)?;
        let key = VerifyingKey::recover_from_prehash(&digest, &sig, recovery)
            .map_err(|_| CryptoError::BadSignature)?;
        Ok(peer_id_of(&key))
    }

    /// Recover and compare against the claimed sender in one step.
    pub fn verify(
        &self,
        claimed: &PeerId,
        to: &PeerId,
        payload: &[u8],
        nonce: u64,
    ) -> Result<(), CryptoError> {
        let recovered = self.recover(to, payload, nonce)?;
        if &recovered == claimed {
            Ok(())
        } else {
            Err(CryptoError::WrongSigner {
                claimed: *claimed,
                recovered,
            })
        }
    }
}

mod hex32 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(deserializer)?;
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(&s, &mut bytes).map_err(serde::de::Error::custom)?;
        Ok(bytes)
    }
}

// ── Encryption identity ───────────────────────────────────────────────────────

/// Sealed-box overhead: ephemeral public key + AEAD nonce + Poly1305 tag.
const SEAL_OVERHEAD: usize = 32 + 12 + 16;

/// A participant's static X25519 keypair for payload encryption.
///
/// Distinct from the signing key: it exists only so peers who have
/// exchanged `/key` material can encrypt chat payloads to each other.
pub struct EncryptionIdentity {
    secret: StaticSecret,
    public: [u8; 32],
}

impl EncryptionIdentity {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(rand::thread_rng());
        let public = *PublicKey::from(&secret).as_bytes();
        Self { secret, public }
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = *PublicKey::from(&secret).as_bytes();
        Self { secret, public }
    }

    pub fn to_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.secret.to_bytes())
    }

    /// The shareable public half, hex-encoded — the `/key` material.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public)
    }

    /// Decrypt a sealed payload addressed to this identity.
    ///
    /// Fails opaquely when the sender used a key that does not match this
    /// one — a stale `/key` exchange is indistinguishable from tampering.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < SEAL_OVERHEAD {
            return Err(CryptoError::TooShort);
        }
        let mut eph_pub = [0u8; 32];
        eph_pub.copy_from_slice(&sealed[..32]);
        let nonce = &sealed[32..44];
        let ciphertext = &sealed[44..];

        let shared = self.secret.diffie_hellman(&PublicKey::from(eph_pub));
        let key = seal_key(shared.as_bytes(), &eph_pub, &self.public);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::Open)
    }
}

/// Encrypt `plaintext` so only the holder of `peer_public` can read it.
///
/// Wire layout: `eph_pub(32) || nonce(12) || ciphertext+tag`.
pub fn seal(peer_public: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let eph = EphemeralSecret::random_from_rng(rand::thread_rng());
    let eph_pub = *PublicKey::from(&eph).as_bytes();
    let shared = eph.diffie_hellman(&PublicKey::from(*peer_public));

    let key = seal_key(shared.as_bytes(), &eph_pub, peer_public);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));

    let mut nonce = [0u8; 12];
    use rand::RngCore;
    rand::thread_rng().fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::Seal)?;

    let mut out = Vec::with_capacity(SEAL_OVERHEAD + plaintext.len());
    out.extend_from_slice(&eph_pub);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Parse `/key` material: 64 hex chars naming an X25519 public key.
pub fn parse_public_key(material: &str) -> Result<[u8; 32], CryptoError> {
    let mut bytes = [0u8; 32];
    hex::decode_to_slice(material.trim(), &mut bytes).map_err(|_| CryptoError::BadKey)?;
    Ok(bytes)
}

///   key = BLAKE3(shared || eph_pub || recipient_pub)
///
/// Binding both public keys into the derivation ties the AEAD key to this
/// exact sender/recipient pairing.
fn seal_key(shared: &[u8; 32], eph_pub: &[u8; 32], recipient_pub: &[u8; 32]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(shared);
    hasher.update(eph_pub);
    hasher.update(recipient_pub);
    *hasher.finalize().as_bytes()
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("signing failed")]
    Sign,

    #[error("malformed signature material")]
    BadSignature,

    #[error("signature does not match claimed sender {claimed} (recovered {recovered})")]
    WrongSigner { claimed: PeerId, recovered: PeerId },

    #[error("invalid key material")]
    BadKey,

    #[error("encryption failed")]
    Seal,

    #[error("decryption failed — wrong or stale key, or tampered payload")]
    Open,

    #[error("sealed payload too short")]
    TooShort,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
