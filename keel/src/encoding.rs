//! Base58Check encoding for addresses and wallet ids.

use alloc::string::String;
use alloc::vec::Vec;

use crate::error::Error;
use crate::hash::double_sha256;
use crate::Result;

/// Encode bytes to Base58Check (used in Bitcoin)
pub fn base58check_encode(version: &[u8], payload: &[u8]) -> String {
    let mut data = Vec::with_capacity(version.len() + payload.len() + 4);
    data.extend_from_slice(version);
    data.extend_from_slice(payload);

    let checksum = double_sha256(&data);
    data.extend_from_slice(&checksum[..4]);

    bs58::encode(data).into_string()
}

/// Decode Base58Check encoded string
pub fn base58check_decode(encoded: &str) -> Result<(Vec<u8>, Vec<u8>)> {
    let data = bs58::decode(encoded)
        .into_vec()
        .map_err(|_| Error::InvalidEncoding)?;

    if data.len() < 5 {
        return Err(Error::InvalidLength {
            expected: 5,
            actual: data.len(),
        });
    }

    let (payload, checksum) = data.split_at(data.len() - 4);
    let computed_checksum = double_sha256(payload);

    if checksum != &computed_checksum[..4] {
        return Err(Error::InvalidChecksum);
    }

    Ok((payload[..1].to_vec(), payload[1..].to_vec()))
}
