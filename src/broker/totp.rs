//! Time-based one-time passwords (RFC 6238) for two-factor broker login.

use crate::error::{AutobuyError, Result};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use std::time::{SystemTime, UNIX_EPOCH};

const STEP_SECS: u64 = 30;
const DIGITS: u32 = 6;

/// Decode a base32 seed as shown by authenticator setup pages.
///
/// Whitespace, padding and lowercase letters are accepted.
pub fn decode_seed(seed: &str) -> Result<Vec<u8>> {
    let cleaned: String = seed
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '=')
        .map(|c| c.to_ascii_uppercase())
        .collect();

    data_encoding::BASE32_NOPAD
        .decode(cleaned.as_bytes())
        .map_err(|e| AutobuyError::Config(format!("invalid TOTP seed: {e}")))
}

/// Code for the 30 second window containing `unix_secs`.
pub fn code_at(secret: &[u8], unix_secs: u64) -> String {
    let counter = unix_secs / STEP_SECS;

    let mut mac =
        Hmac::<Sha1>::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    // Dynamic truncation
    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let binary = u32::from_be_bytes([
        digest[offset] & 0x7f,
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]);

    format!("{:0width$}", binary % 10u32.pow(DIGITS), width = DIGITS as usize)
}

/// Code for the current time.
pub fn current_code(seed: &str) -> Result<String> {
    let secret = decode_seed(seed)?;
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| AutobuyError::Broker(format!("system clock before epoch: {e}")))?
        .as_secs();
    Ok(code_at(&secret, now))
}
