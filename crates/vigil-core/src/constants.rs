//! Protocol constants. All monetary values in satoshis (1 BTC = 10^8 sat).

use serde::{Deserialize, Serialize};

pub const COIN: u64 = 100_000_000;

/// Number of consecutive unused addresses scanned before a chain is
/// considered exhausted.
pub const GAP_LIMIT: u32 = 20;

/// Outputs at or below this value are not worth creating.
pub const DUST_THRESHOLD: u64 = 546;

/// First hardened child index (BIP-32).
pub const HARDENED_OFFSET: u32 = 0x8000_0000;

/// BIP-44 purpose for legacy P2PKH accounts.
pub const PURPOSE_LEGACY: u32 = 44;

/// BIP-49 purpose for P2SH-wrapped segwit accounts.
pub const PURPOSE_SEGWIT: u32 = 49;

/// Chain index for receive addresses.
pub const EXTERNAL_CHAIN: u32 = 0;

/// Chain index for change addresses.
pub const CHANGE_CHAIN: u32 = 1;

/// Bitcoin network selecting version bytes and the BIP-44 coin type.
///
/// # Examples
///
/// ```
/// use vigil_core::constants::Network;
/// let net = Network::default();
/// assert_eq!(net, Network::Mainnet);
/// assert_eq!(net.p2pkh_version(), 0x00);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// Production network.
    #[default]
    Mainnet,
    /// Public test network.
    Testnet,
}

impl Network {
    /// Base58Check version byte for P2PKH addresses.
    pub fn p2pkh_version(&self) -> u8 {
        match self {
            Self::Mainnet => 0x00,
            Self::Testnet => 0x6f,
        }
    }

    /// Base58Check version byte for P2SH addresses.
    pub fn p2sh_version(&self) -> u8 {
        match self {
            Self::Mainnet => 0x05,
            Self::Testnet => 0xc4,
        }
    }

    /// Four-byte version prefix of serialized extended public keys.
    ///
    /// # Examples
    ///
    /// ```
    /// use vigil_core::constants::Network;
    /// assert_eq!(Network::Mainnet.xpub_version(), [0x04, 0x88, 0xB2, 0x1E]);
    /// assert_eq!(Network::Testnet.xpub_version(), [0x04, 0x35, 0x87, 0xCF]);
    /// ```
    pub fn xpub_version(&self) -> [u8; 4] {
        match self {
            Self::Mainnet => [0x04, 0x88, 0xB2, 0x1E],
            Self::Testnet => [0x04, 0x35, 0x87, 0xCF],
        }
    }

    /// BIP-44 coin type.
    pub fn coin_type(&self) -> u32 {
        match self {
            Self::Mainnet => 0,
            Self::Testnet => 1,
        }
    }

    /// Bech32 human-readable part for native segwit addresses.
    pub fn bech32_hrp(&self) -> &'static str {
        match self {
            Self::Mainnet => "bc",
            Self::Testnet => "tb",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_bytes_differ_per_network() {
        assert_ne!(Network::Mainnet.p2pkh_version(), Network::Testnet.p2pkh_version());
        assert_ne!(Network::Mainnet.p2sh_version(), Network::Testnet.p2sh_version());
    }

    #[test]
    fn coin_types() {
        assert_eq!(Network::Mainnet.coin_type(), 0);
        assert_eq!(Network::Testnet.coin_type(), 1);
    }

    #[test]
    fn network_serde_lowercase() {
        let json = serde_json::to_string(&Network::Testnet).unwrap();
        assert_eq!(json, "\"testnet\"");
        let back: Network = serde_json::from_str("\"mainnet\"").unwrap();
        assert_eq!(back, Network::Mainnet);
    }

    #[test]
    fn hardened_offset_is_2_pow_31() {
        assert_eq!(HARDENED_OFFSET, 1u32 << 31);
    }
}
