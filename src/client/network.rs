/// Resolves an x402 network name (`base-sepolia`) or CAIP-2 id (`eip155:84532`)
/// to its EVM chain id.
pub fn chain_id_for(network: &str) -> Option<u64> {
    match network.to_ascii_lowercase().as_str() {
        "base" => Some(8453),
        "base-sepolia" => Some(84532),
        "avalanche" => Some(43114),
        "avalanche-fuji" => Some(43113),
        other => other.strip_prefix("eip155:")?.parse().ok(),
    }
}

pub fn same_network(a: &str, b: &str) -> bool {
    match (chain_id_for(a), chain_id_for(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a.eq_ignore_ascii_case(b),
    }
}
