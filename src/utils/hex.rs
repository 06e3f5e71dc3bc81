use alloy::primitives::{Address, U256};

const WEI_PER_MICRO_ETHER: u64 = 1_000_000_000_000;
const MICRO_PER_ETHER: u64 = 1_000_000;

/// Clean a hex string by removing "0x" prefix and whitespace
pub fn clean_hex(s: &str) -> &str {
    let s = s.trim();
    if let Some(stripped) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        stripped
    } else {
        s
    }
}

/// Canonical storage key for an address: lowercase hex with a `0x` prefix.
pub fn canonical_address(address: &Address) -> String {
    format!("0x{}", hex::encode(address.as_slice()))
}

/// Renders raw bytecode as `0x`-prefixed lowercase hex. Empty code renders as `0x`.
pub fn bytecode_hex(code: &[u8]) -> String {
    format!("0x{}", hex::encode(code))
}

/// True when `s` looks like a 20-byte hex address with a `0x` prefix.
pub fn is_address_literal(s: &str) -> bool {
    let s = s.trim();
    s.len() == 42
        && (s.starts_with("0x") || s.starts_with("0X"))
        && clean_hex(s).bytes().all(|b| b.is_ascii_hexdigit())
}

/// Formats a wei amount as ether with six fractional digits, rounding half up.
pub fn wei_to_ether_string(wei: U256) -> String {
    let step = U256::from(WEI_PER_MICRO_ETHER);
    let mut micro = wei / step;
    let remainder = wei % step;
    if remainder >= step - remainder {
        micro += U256::from(1u8);
    }
    let per_ether = U256::from(MICRO_PER_ETHER);
    let whole = micro / per_ether;
    let frac = (micro % per_ether).to::<u64>();
    format!("{whole}.{frac:06}")
}
