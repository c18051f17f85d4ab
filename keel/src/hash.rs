//! Cryptographic hash functions used by the wallet engine.

use hmac::{Hmac, Mac};
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

use crate::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Compute SHA-256 hash
#[inline]
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Compute double SHA-256 hash (used in Bitcoin)
#[inline]
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    sha256(&sha256(data))
}

/// Compute RIPEMD-160 hash
#[inline]
pub fn ripemd160(data: &[u8]) -> [u8; 20] {
    let mut hasher = Ripemd160::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Compute Hash160 (SHA-256 followed by RIPEMD-160, used in Bitcoin)
#[inline]
pub fn hash160(data: &[u8]) -> [u8; 20] {
    ripemd160(&sha256(data))
}

/// Compute HMAC-SHA256 over `msg` with the given key.
pub fn hmac_sha256(key: &[u8], msg: &[u8]) -> Result<[u8; 32]> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| Error::Mac)?;
    mac.update(msg);
    Ok(mac.finalize().into_bytes().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    mod sha256_tests {
        use super::*;

        #[test]
        fn test_sha256_empty() {
            let hash = sha256(b"");
            assert_eq!(
                hex::encode(hash),
                "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
            );
        }

        #[test]
        fn test_sha256_hello() {
            let hash = sha256(b"hello");
            assert_eq!(
                hex::encode(hash),
                "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
            );
        }
    }

    mod double_sha256_tests {
        use super::*;

        #[test]
        fn test_double_sha256_empty() {
            let hash = double_sha256(b"");
            assert_eq!(
                hex::encode(hash),
                "5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456"
            );
        }

        #[test]
        fn test_double_sha256_hello() {
            let hash = double_sha256(b"hello");
            let expected = sha256(&sha256(b"hello"));
            assert_eq!(hash, expected);
        }
    }

    mod hash160_tests {
        use super::*;

        #[test]
        fn test_ripemd160_empty() {
            let hash = ripemd160(b"");
            assert_eq!(hex::encode(hash), "9c1185a5c5e9fc54612808977ee8f548b2258d31");
        }

        #[test]
        fn test_hash160_hello() {
            let hash = hash160(b"hello");
            assert_eq!(hex::encode(hash), "b6a9c8c230722b7c748331a8b450f05566dc7d0f");
        }

        #[test]
        fn test_hash160_empty() {
            let hash = hash160(b"");
            assert_eq!(hex::encode(hash), "b472a266d0bd89c13706a4132ccfb16f7c3b9fcb");
        }
    }

    mod hmac_tests {
        use super::*;

        #[test]
        fn test_hmac_sha256_rfc4231_case1() {
            let key = [0x0bu8; 20];
            let mac = hmac_sha256(&key, b"Hi There").unwrap();
            assert_eq!(
                hex::encode(mac),
                "b0344c61d8db38535ca8afceaf0bf12b881dc200c9833da726e9376c2e32cff7"
            );
        }

        #[test]
        fn test_hmac_sha256_rfc4231_case2() {
            let mac = hmac_sha256(b"Jefe", b"what do ya want for nothing?").unwrap();
            assert_eq!(
                hex::encode(mac),
                "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
            );
        }

        #[test]
        fn test_hmac_sha256_deterministic() {
            let a = hmac_sha256(b"key", b"message").unwrap();
            let b = hmac_sha256(b"key", b"message").unwrap();
            assert_eq!(a, b);
        }
    }
}
