//! Threshold Schnorr primitives over secp256k1
//!
//! Nonce contributions are Shamir-shared like the signing key, so a cosigner's
//! signature share `s_i = k_i + e * x_i` interpolates to a full Schnorr
//! signature once any `threshold` shares computed over the same set of
//! contributions are combined.

use crate::hrs::Hrs;
use crate::types::CosignerId;
use crate::{Error, Result};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use k256::{
    elliptic_curve::{
        bigint::U256,
        ops::Reduce,
        sec1::{FromEncodedPoint, ToEncodedPoint},
        Field,
    },
    AffinePoint, EncodedPoint, ProjectivePoint, Scalar,
};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};

/// Compressed secp256k1 point length
pub const POINT_LEN: usize = 33;

/// `R || s` length for both shares and combined signatures
pub const SIGNATURE_LEN: usize = POINT_LEN + 32;

const NONCE_LEN: usize = 12;
const SHARE_KEY_CONTEXT: &str = "threshold-cosigner 2024 ephemeral share encryption";
const PART_DIGEST_TAG: &[u8] = b"threshold-cosigner/ephemeral-part/v1";

pub fn random_scalar() -> Scalar {
    Scalar::random(&mut OsRng)
}

pub fn scalar_from_bytes(bytes: &[u8]) -> Result<Scalar> {
    let array: [u8; 32] = bytes
        .try_into()
        .map_err(|_| Error::Deserialization("Invalid scalar length".into()))?;
    Ok(<Scalar as Reduce<U256>>::reduce_bytes(&array.into()))
}

pub fn point_to_bytes(point: &ProjectivePoint) -> Vec<u8> {
    point.to_affine().to_encoded_point(true).as_bytes().to_vec()
}

pub fn point_from_bytes(bytes: &[u8]) -> Result<ProjectivePoint> {
    let encoded =
        EncodedPoint::from_bytes(bytes).map_err(|e| Error::Deserialization(e.to_string()))?;
    let affine: AffinePoint = Option::<AffinePoint>::from(AffinePoint::from_encoded_point(&encoded))
        .ok_or_else(|| Error::Deserialization("Invalid curve point".into()))?;
    Ok(ProjectivePoint::from(affine))
}

/// Random polynomial whose constant term is the shared secret
pub struct Polynomial {
    coefficients: Vec<Scalar>,
}

impl Polynomial {
    /// Random polynomial of degree `threshold - 1`
    pub fn random(threshold: usize) -> Self {
        Self::with_secret(random_scalar(), threshold)
    }

    pub fn with_secret(secret: Scalar, threshold: usize) -> Self {
        let mut coefficients = Vec::with_capacity(threshold.max(1));
        coefficients.push(secret);
        for _ in 1..threshold {
            coefficients.push(random_scalar());
        }
        Self { coefficients }
    }

    pub fn evaluate(&self, id: CosignerId) -> Scalar {
        let x = Scalar::from(u64::from(id));
        self.coefficients
            .iter()
            .rev()
            .fold(Scalar::ZERO, |acc, coefficient| acc * x + coefficient)
    }

    /// `a0 * G`
    pub fn commitment(&self) -> ProjectivePoint {
        ProjectivePoint::GENERATOR * self.coefficients[0]
    }
}

/// Lagrange coefficient at zero for `id` within the signer set `ids`
pub fn lagrange_coefficient(id: CosignerId, ids: &[CosignerId]) -> Result<Scalar> {
    let i = Scalar::from(u64::from(id));
    let mut numerator = Scalar::ONE;
    let mut denominator = Scalar::ONE;

    for &other in ids {
        if other == id {
            continue;
        }
        let j = Scalar::from(u64::from(other));
        numerator *= j;
        denominator *= j - i;
    }

    let inverse = Option::<Scalar>::from(denominator.invert())
        .ok_or_else(|| Error::Crypto("duplicate cosigner id in signer set".into()))?;
    Ok(numerator * inverse)
}

/// Schnorr challenge `H(R || P || m)`
pub fn challenge(nonce_public: &[u8], group_public_key: &[u8], message: &[u8]) -> Scalar {
    let digest = Sha256::new()
        .chain_update(nonce_public)
        .chain_update(group_public_key)
        .chain_update(message)
        .finalize();
    <Scalar as Reduce<U256>>::reduce_bytes(&digest)
}

/// Digest signed by the source of an ephemeral part
pub fn part_digest(
    hrs: &Hrs,
    source_id: CosignerId,
    recipient_id: CosignerId,
    ephemeral_public_key: &[u8],
    ciphertext: &[u8],
) -> [u8; 32] {
    Sha256::new()
        .chain_update(PART_DIGEST_TAG)
        .chain_update(hrs.to_bytes())
        .chain_update(source_id.to_be_bytes())
        .chain_update(recipient_id.to_be_bytes())
        .chain_update((ephemeral_public_key.len() as u32).to_be_bytes())
        .chain_update(ephemeral_public_key)
        .chain_update(ciphertext)
        .finalize()
        .into()
}

fn share_aad(hrs: &Hrs, source_id: CosignerId, recipient_id: CosignerId) -> Vec<u8> {
    let mut aad = hrs.to_bytes().to_vec();
    aad.extend_from_slice(&source_id.to_be_bytes());
    aad.extend_from_slice(&recipient_id.to_be_bytes());
    aad
}

fn share_cipher(own_secret: &StaticSecret, peer_public: &[u8; 32]) -> ChaCha20Poly1305 {
    let shared = own_secret.diffie_hellman(&X25519Public::from(*peer_public));
    let key = blake3::derive_key(SHARE_KEY_CONTEXT, shared.as_bytes());
    ChaCha20Poly1305::new(Key::from_slice(&key))
}

/// Encrypt a nonce share for `recipient_id`; output is `nonce || ciphertext`
pub fn encrypt_share(
    own_secret: &StaticSecret,
    recipient_public: &[u8; 32],
    hrs: &Hrs,
    source_id: CosignerId,
    recipient_id: CosignerId,
    share: &Scalar,
) -> Result<Vec<u8>> {
    let cipher = share_cipher(own_secret, recipient_public);
    let nonce: [u8; NONCE_LEN] = rand::random();
    let aad = share_aad(hrs, source_id, recipient_id);
    let plaintext = share.to_bytes();

    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext.as_slice(),
                aad: &aad,
            },
        )
        .map_err(|e| Error::Crypto(format!("share encryption failed: {}", e)))?;

    let mut out = nonce.to_vec();
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

pub fn decrypt_share(
    own_secret: &StaticSecret,
    source_public: &[u8; 32],
    hrs: &Hrs,
    source_id: CosignerId,
    recipient_id: CosignerId,
    encrypted: &[u8],
) -> Result<Scalar> {
    if encrypted.len() <= NONCE_LEN {
        return Err(Error::Decoding("encrypted share part too short".into()));
    }
    let (nonce, ciphertext) = encrypted.split_at(NONCE_LEN);
    let cipher = share_cipher(own_secret, source_public);
    let aad = share_aad(hrs, source_id, recipient_id);

    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad: &aad,
            },
        )
        .map_err(|_| Error::Crypto("share decryption failed".into()))?;

    scalar_from_bytes(&plaintext)
}

/// Interpolate signature shares into a full `R || s` Schnorr signature.
///
/// All shares must be computed over the same nonce commitment `R`.
pub fn combine_signature_shares(shares: &[(CosignerId, Vec<u8>)]) -> Result<Vec<u8>> {
    let (_, first) = shares
        .first()
        .ok_or_else(|| Error::Crypto("no signature shares".into()))?;
    if first.len() != SIGNATURE_LEN {
        return Err(Error::Decoding("invalid signature share length".into()));
    }
    let nonce_public = &first[..POINT_LEN];
    let ids: Vec<CosignerId> = shares.iter().map(|(id, _)| *id).collect();

    let mut s = Scalar::ZERO;
    for (id, share) in shares {
        if share.len() != SIGNATURE_LEN || &share[..POINT_LEN] != nonce_public {
            return Err(Error::Crypto(format!(
                "signature share from cosigner {} uses a different nonce",
                id
            )));
        }
        s += lagrange_coefficient(*id, &ids)? * scalar_from_bytes(&share[POINT_LEN..])?;
    }

    let mut signature = nonce_public.to_vec();
    signature.extend_from_slice(&s.to_bytes());
    Ok(signature)
}

/// Check `s * G == R + e * P`
pub fn verify_signature(group_public_key: &[u8], message: &[u8], signature: &[u8]) -> Result<()> {
    if signature.len() != SIGNATURE_LEN {
        return Err(Error::Decoding("invalid signature length".into()));
    }
    let nonce_public = &signature[..POINT_LEN];
    let r = point_from_bytes(nonce_public)?;
    let p = point_from_bytes(group_public_key)?;
    let s = scalar_from_bytes(&signature[POINT_LEN..])?;
    let e = challenge(nonce_public, group_public_key, message);

    if ProjectivePoint::GENERATOR * s == r + p * e {
        Ok(())
    } else {
        Err(Error::Crypto("signature does not verify".into()))
    }
}
