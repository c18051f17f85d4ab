//! Chained secp256k1 key derivation and wallet-id computation.
//!
//! The linear chain mixes a 32-byte chaincode with the double SHA-256 of
//! the parent public key; the resulting scalar multiplies both the parent
//! point and the parent secret, so public-only chains stay in sync with
//! private ones.

use k256::ecdsa::SigningKey;
use k256::elliptic_curve::group::Group;
use k256::elliptic_curve::ops::Reduce;
use k256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use k256::elliptic_curve::{Field, PrimeField};
use k256::{AffinePoint, EncodedPoint, FieldBytes, ProjectivePoint, Scalar, U256};
use zeroize::Zeroizing;

use keel::hash::{double_sha256, hash160, hmac_sha256};

use crate::types::WalletId;
use crate::{Error, Result};

const CHAINCODE_TAG: &[u8] = b"Derive Chaincode from Root Key";

/// Compute the uncompressed and compressed SEC1 encodings of the public
/// key for a 32-byte secret.
pub fn public_key_pair(secret: &[u8]) -> Result<([u8; 65], [u8; 33])> {
    let signing =
        SigningKey::from_slice(secret).map_err(|_| Error::InvalidParameter("invalid secret key"))?;
    let verifying = signing.verifying_key();

    let uncompressed: [u8; 65] = verifying
        .to_encoded_point(false)
        .as_bytes()
        .try_into()
        .expect("uncompressed SEC1 point is 65 bytes");
    let compressed: [u8; 33] = verifying
        .to_encoded_point(true)
        .as_bytes()
        .try_into()
        .expect("compressed SEC1 point is 33 bytes");

    Ok((uncompressed, compressed))
}

/// Derive the wallet chaincode from the private root.
pub fn compute_chain_code(private_root: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
    let keyed = double_sha256(private_root);
    Ok(Zeroizing::new(hmac_sha256(&keyed, CHAINCODE_TAG)?))
}

/// The per-step chain multiplier: `chaincode XOR SHA256d(parent pubkey)`,
/// reduced to a scalar.
fn chain_scalar(pubkey_uncompressed: &[u8; 65], chaincode: &[u8; 32]) -> Result<Scalar> {
    let modifier = double_sha256(pubkey_uncompressed);

    let mut mixed = [0u8; 32];
    for (out, (a, b)) in mixed.iter_mut().zip(modifier.iter().zip(chaincode.iter())) {
        *out = a ^ b;
    }

    let scalar = <Scalar as Reduce<U256>>::reduce(U256::from_be_slice(&mixed));
    if bool::from(scalar.is_zero()) {
        return Err(Error::Corrupt("degenerate chain multiplier"));
    }
    Ok(scalar)
}

/// Derive the next public key in the chain from the parent public key.
pub fn chained_public_key(
    pubkey_uncompressed: &[u8; 65],
    chaincode: &[u8; 32],
) -> Result<([u8; 65], [u8; 33])> {
    let scalar = chain_scalar(pubkey_uncompressed, chaincode)?;

    let encoded = EncodedPoint::from_bytes(pubkey_uncompressed)
        .map_err(|_| Error::Corrupt("invalid public key encoding"))?;
    let parent = Option::<AffinePoint>::from(AffinePoint::from_encoded_point(&encoded))
        .ok_or(Error::Corrupt("public key not on curve"))?;

    let child = ProjectivePoint::from(parent) * scalar;
    if bool::from(child.is_identity()) {
        return Err(Error::Corrupt("degenerate chained public key"));
    }

    let affine = child.to_affine();
    let uncompressed: [u8; 65] = affine
        .to_encoded_point(false)
        .as_bytes()
        .try_into()
        .expect("uncompressed SEC1 point is 65 bytes");
    let compressed: [u8; 33] = affine
        .to_encoded_point(true)
        .as_bytes()
        .try_into()
        .expect("compressed SEC1 point is 33 bytes");

    Ok((uncompressed, compressed))
}

/// Derive the next private key in the chain from the parent private key.
pub fn chained_private_key(
    privkey: &[u8],
    chaincode: &[u8; 32],
    pubkey_uncompressed: &[u8; 65],
) -> Result<Zeroizing<[u8; 32]>> {
    if privkey.len() != 32 {
        return Err(Error::InvalidParameter("private key must be 32 bytes"));
    }

    let parent = Option::<Scalar>::from(Scalar::from_repr(*FieldBytes::from_slice(privkey)))
        .ok_or(Error::Corrupt("private key out of range"))?;
    let scalar = chain_scalar(pubkey_uncompressed, chaincode)?;

    let child = parent * scalar;
    if bool::from(child.is_zero()) {
        return Err(Error::Corrupt("degenerate chained private key"));
    }

    Ok(Zeroizing::new(child.to_bytes().into()))
}

/// Re-encode an uncompressed SEC1 public key in compressed form,
/// validating that it is a curve point.
pub fn compress_public_key(pubkey_uncompressed: &[u8; 65]) -> Result<[u8; 33]> {
    let encoded = EncodedPoint::from_bytes(pubkey_uncompressed)
        .map_err(|_| Error::Corrupt("invalid public key encoding"))?;
    let point = Option::<AffinePoint>::from(AffinePoint::from_encoded_point(&encoded))
        .ok_or(Error::Corrupt("public key not on curve"))?;

    Ok(point
        .to_encoded_point(true)
        .as_bytes()
        .try_into()
        .expect("compressed SEC1 point is 33 bytes"))
}

/// 20-byte wallet identifier over arbitrary input bytes.
#[must_use]
pub fn wallet_id(data: &[u8]) -> WalletId {
    WalletId::new(hash160(data))
}

/// Wallet identifier of a single wallet: a hash of its root public key.
#[must_use]
pub fn single_wallet_id(root_pubkey_uncompressed: &[u8; 65]) -> WalletId {
    wallet_id(root_pubkey_uncompressed)
}

/// Wallet identifier of an M-of-N multisig wallet.
pub fn multisig_wallet_id(
    root_pubkey_uncompressed: &[u8; 65],
    m: u32,
    n: u32,
) -> Result<WalletId> {
    let tag = format!("{m}_of_{n}");
    let long_id = hmac_sha256(root_pubkey_uncompressed, tag.as_bytes())?;
    Ok(wallet_id(&long_id))
}

/// Derive the private root of multisig sub-wallet `index`.
pub fn subwallet_root(private_root: &[u8], index: u32) -> Result<Zeroizing<[u8; 32]>> {
    let tag = format!("Subwallet-{index}");
    Ok(Zeroizing::new(hmac_sha256(private_root, tag.as_bytes())?))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEED: [u8; 32] = [0x11; 32];

    #[test]
    fn test_public_key_pair_encodings() {
        let (unc, cmp) = public_key_pair(&SEED).unwrap();
        assert_eq!(unc[0], 0x04);
        assert!(cmp[0] == 0x02 || cmp[0] == 0x03);
        // x-coordinate is shared between the encodings
        assert_eq!(&unc[1..33], &cmp[1..33]);
    }

    #[test]
    fn test_public_key_pair_rejects_zero_secret() {
        assert!(public_key_pair(&[0u8; 32]).is_err());
        assert!(public_key_pair(&[1u8; 16]).is_err());
    }

    #[test]
    fn test_chain_code_deterministic() {
        let a = compute_chain_code(&SEED).unwrap();
        let b = compute_chain_code(&SEED).unwrap();
        assert_eq!(*a, *b);

        let other = compute_chain_code(&[0x22; 32]).unwrap();
        assert_ne!(*a, *other);
    }

    #[test]
    fn test_chained_keys_stay_in_sync() {
        // Deriving the child secret and recomputing its public key must
        // match the public-only chain step.
        let chaincode = compute_chain_code(&SEED).unwrap();
        let (parent_pub, _) = public_key_pair(&SEED).unwrap();

        let child_priv = chained_private_key(&SEED, &chaincode, &parent_pub).unwrap();
        let (from_priv_unc, from_priv_cmp) = public_key_pair(child_priv.as_slice()).unwrap();

        let (from_pub_unc, from_pub_cmp) = chained_public_key(&parent_pub, &chaincode).unwrap();
        assert_eq!(from_priv_unc, from_pub_unc);
        assert_eq!(from_priv_cmp, from_pub_cmp);
    }

    #[test]
    fn test_chained_public_key_changes_per_step() {
        let chaincode = compute_chain_code(&SEED).unwrap();
        let (parent_pub, _) = public_key_pair(&SEED).unwrap();

        let (step1, _) = chained_public_key(&parent_pub, &chaincode).unwrap();
        let (step2, _) = chained_public_key(&step1, &chaincode).unwrap();
        assert_ne!(parent_pub, step1);
        assert_ne!(step1, step2);
    }

    #[test]
    fn test_wallet_ids_differ_by_scheme() {
        let (pubkey, _) = public_key_pair(&SEED).unwrap();
        let single = single_wallet_id(&pubkey);
        let ms23 = multisig_wallet_id(&pubkey, 2, 3).unwrap();
        let ms33 = multisig_wallet_id(&pubkey, 3, 3).unwrap();
        assert_ne!(single, ms23);
        assert_ne!(ms23, ms33);
    }

    #[test]
    fn test_subwallet_roots_distinct() {
        let r0 = subwallet_root(&SEED, 0).unwrap();
        let r1 = subwallet_root(&SEED, 1).unwrap();
        assert_ne!(*r0, *r1);
    }
}
