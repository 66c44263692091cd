use alloy_primitives::U256;
use anyhow::{anyhow, Result};

/// Parse a hex quantity (with or without `0x` prefix) into a u64.
pub fn hex_to_u64(s: &str) -> Result<u64> {
    let digits = s.trim_start_matches("0x");
    u64::from_str_radix(digits, 16).map_err(|err| anyhow!("invalid hex quantity {s:?}: {err}"))
}

/// Parse a hex quantity into a 256-bit unsigned integer.
pub fn hex_to_u256(s: &str) -> Result<U256> {
    let digits = s.trim_start_matches("0x");
    U256::from_str_radix(digits, 16).map_err(|err| anyhow!("invalid hex quantity {s:?}: {err}"))
}

/// Minimal `0x`-prefixed hex encoding, no leading zeros.
pub fn u64_to_hex(n: u64) -> String {
    format!("0x{n:x}")
}

/// Lowercase an address and make sure it carries a `0x` prefix. Idempotent.
pub fn normalize_address(address: &str) -> String {
    let lower = address.trim().to_lowercase();
    if lower.starts_with("0x") {
        lower
    } else {
        format!("0x{lower}")
    }
}

/// Extract the 20-byte address right-aligned in a 32-byte topic.
pub fn topic_to_address(topic: &str) -> Option<String> {
    let digits = topic.strip_prefix("0x").unwrap_or(topic);
    if digits.len() != 64 {
        return None;
    }
    Some(format!("0x{}", digits[24..].to_lowercase()))
}
