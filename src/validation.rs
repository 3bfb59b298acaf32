//! Input validation for identifiers that end up in composed queries.
//!
//! Hashes and addresses are base58check strings; anything outside the
//! base58 alphabet is rejected before a query or an RPC call is built.

use thiserror::Error;

const BASE58_ALPHABET: &[u8] =
    b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

pub const MAX_LIST_LEN: usize = 100;
pub const MAX_LIMIT: u64 = 200;
pub const MAX_RAW_TRANSACTION_LEN: usize = 10_000;
pub const MAX_ATTRIBUTE_LEN: usize = 254;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("invalid character in address {0:?}")]
    InvalidAddress(String),

    #[error("invalid character in hash {0:?}")]
    InvalidHash(String),

    #[error("invalid raw transaction: {0}")]
    InvalidRawTransaction(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

fn is_base58(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| BASE58_ALPHABET.contains(&b))
}

pub fn validate_address(address: &str) -> Result<(), ValidationError> {
    if address.trim().is_empty() {
        return Err(ValidationError::MissingParameter("address"));
    }
    if !is_base58(address) {
        return Err(ValidationError::InvalidAddress(address.to_string()));
    }
    Ok(())
}

pub fn validate_addresses(addresses: &[String]) -> Result<(), ValidationError> {
    if addresses.is_empty() {
        return Err(ValidationError::MissingParameter("addresses"));
    }
    if addresses.len() >= MAX_LIST_LEN {
        return Err(ValidationError::InvalidParameter(format!(
            "at most {} addresses per request",
            MAX_LIST_LEN
        )));
    }
    for address in addresses {
        validate_address(address)?;
    }
    Ok(())
}

pub fn validate_hash(hash: &str) -> Result<(), ValidationError> {
    if hash.trim().is_empty() {
        return Err(ValidationError::MissingParameter("hash"));
    }
    if !is_base58(hash) {
        return Err(ValidationError::InvalidHash(hash.to_string()));
    }
    Ok(())
}

pub fn validate_hashes(hashes: &[String]) -> Result<(), ValidationError> {
    if hashes.is_empty() {
        return Err(ValidationError::MissingParameter("hashes"));
    }
    if hashes.len() >= MAX_LIST_LEN {
        return Err(ValidationError::InvalidParameter(format!(
            "at most {} hashes per request",
            MAX_LIST_LEN
        )));
    }
    for hash in hashes {
        validate_hash(hash)?;
    }
    Ok(())
}

/// Raw transactions arrive hex-encoded.
pub fn validate_raw_transaction(rawtx: &str) -> Result<(), ValidationError> {
    if rawtx.is_empty() {
        return Err(ValidationError::MissingParameter("raw_transaction"));
    }
    if rawtx.len() > MAX_RAW_TRANSACTION_LEN {
        return Err(ValidationError::InvalidRawTransaction(
            "raw transaction too large".to_string(),
        ));
    }
    if hex::decode(rawtx).is_err() {
        return Err(ValidationError::InvalidRawTransaction(
            "not a hex string".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_limit(limit: u64) -> Result<(), ValidationError> {
    if limit == 0 || limit >= MAX_LIMIT {
        return Err(ValidationError::InvalidParameter(format!(
            "limit must be between 1 and {}",
            MAX_LIMIT - 1
        )));
    }
    Ok(())
}

pub fn validate_attribute(key: &str, value: &str) -> Result<(), ValidationError> {
    if key.is_empty() {
        return Err(ValidationError::MissingParameter("attribute key"));
    }
    if key.len() > MAX_ATTRIBUTE_LEN || value.len() > MAX_ATTRIBUTE_LEN {
        return Err(ValidationError::InvalidParameter(format!(
            "attribute keys and values are capped at {} characters",
            MAX_ATTRIBUTE_LEN
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_base58_identifiers() {
        assert!(validate_address("tz3VEZ4k6a4Wx42iyev6i2aVAptTRLEAivNN").is_ok());
        assert!(validate_hash("ooV9NJ8uToUpaPV3ybvbF49gH8kFQ5E69XehwoMAPzeRVWmauba").is_ok());
    }

    #[test]
    fn rejects_non_alphabet_characters() {
        // 0, O, I and l are not in the base58 alphabet, neither are quotes.
        assert!(validate_address("tz0INVALID").is_err());
        assert!(validate_hash("oo'; DROP TABLE transactions;--").is_err());
        assert!(validate_address("").is_err());
    }

    #[test]
    fn raw_transaction_must_be_hex() {
        assert!(validate_raw_transaction("85a9ef47f6b1cc14").is_ok());
        assert!(validate_raw_transaction("not-hex").is_err());
        assert!(validate_raw_transaction("").is_err());
    }

    #[test]
    fn limit_bounds() {
        assert!(validate_limit(0).is_err());
        assert!(validate_limit(1).is_ok());
        assert!(validate_limit(199).is_ok());
        assert!(validate_limit(200).is_err());
    }
}
