//! Byte-size based fee estimation.
//!
//! Fees are `vbytes × rate`, with sizes fixed per script type:
//!
//! ```text
//! overhead = 4 version + 1 input count + 1 output count + 4 locktime + 1 marker
//! input    = 32 prevout hash + 4 prevout index + 1 script len + 4 sequence + unlock
//! output   = 8 amount + 1 script len + script
//! ```

use serde::{Deserialize, Serialize};
use vigil_core::address::script_pubkey;
use vigil_core::constants::COIN;

use crate::error::WalletError;

/// Fixed per-transaction overhead in bytes.
pub const TX_OVERHEAD: u64 = 11;

/// Input bytes excluding the unlocking script.
pub const INPUT_BASE_SIZE: u64 = 41;

/// Unlocking script of a P2SH-wrapped P2WPKH input.
pub const SEGWIT_UNLOCK_SIZE: u64 = 51;

/// Unlocking script of a P2PKH input.
pub const LEGACY_UNLOCK_SIZE: u64 = 109;

/// Output bytes excluding the locking script.
pub const OUTPUT_BASE_SIZE: u64 = 9;

/// Destination script type, resolved from an address string.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputType {
    P2pkh,
    P2sh,
    P2wpkh,
    P2wsh,
}

impl OutputType {
    /// Classify an address by the scriptPubKey it decodes to.
    ///
    /// Base58Check P2PKH/P2SH addresses of either network and bech32 v0
    /// programs are recognized. Bad checksums, unknown version bytes and
    /// anything else that does not decode are unrecognized.
    pub fn from_address(address: &str) -> Result<Self, WalletError> {
        let unrecognized = || WalletError::UnrecognizedOutput(address.to_string());
        let script = script_pubkey(address).map_err(|_| unrecognized())?;
        match script.len() {
            25 => Ok(Self::P2pkh),
            23 => Ok(Self::P2sh),
            22 => Ok(Self::P2wpkh),
            34 => Ok(Self::P2wsh),
            _ => Err(unrecognized()),
        }
    }

    /// Length of the locking script.
    pub fn script_len(&self) -> u64 {
        match self {
            Self::P2pkh => 25,
            Self::P2sh => 23,
            Self::P2wpkh => 22,
            Self::P2wsh => 34,
        }
    }
}

/// Serialized size of one input.
pub fn input_size(segwit: bool) -> u64 {
    INPUT_BASE_SIZE + if segwit { SEGWIT_UNLOCK_SIZE } else { LEGACY_UNLOCK_SIZE }
}

pub fn output_size(output: OutputType) -> u64 {
    OUTPUT_BASE_SIZE + output.script_len()
}

/// Resolve every destination, failing on the first unrecognized address.
pub fn output_types<'a, I>(addresses: I) -> Result<Vec<OutputType>, WalletError>
where
    I: IntoIterator<Item = &'a str>,
{
    addresses.into_iter().map(OutputType::from_address).collect()
}

/// Estimated size in bytes of a transaction spending `input_count` inputs.
pub fn estimate_size(input_count: usize, outputs: &[OutputType], segwit: bool) -> u64 {
    let inputs = (input_count as u64).saturating_mul(input_size(segwit));
    let outputs: u64 = outputs.iter().map(|o| output_size(*o)).sum();
    TX_OVERHEAD.saturating_add(inputs).saturating_add(outputs)
}

/// `(overhead + inputs + outputs) × fee_rate`, in satoshis.
pub fn estimate_fee(input_count: usize, outputs: &[OutputType], fee_rate: u64, segwit: bool) -> u64 {
    estimate_size(input_count, outputs, segwit).saturating_mul(fee_rate)
}

/// Size of the change output an account of this type would add.
pub fn change_output_size(segwit: bool) -> u64 {
    output_size(if segwit { OutputType::P2sh } else { OutputType::P2pkh })
}

/// Confirmation target used when asking the source for a fee rate.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum FeeLevel {
    High,
    Normal,
    Economy,
}

impl FeeLevel {
    pub const ALL: [FeeLevel; 3] = [FeeLevel::High, FeeLevel::Normal, FeeLevel::Economy];

    /// Blocks until expected confirmation.
    pub fn target_blocks(&self) -> u32 {
        match self {
            Self::High => 2,
            Self::Normal => 6,
            Self::Economy => 24,
        }
    }
}

/// Convert a BTC/kB estimate to satoshis per byte, rounding up, never below 1.
pub fn fee_rate_from_btc_per_kb(btc_per_kb: f64) -> u64 {
    if !btc_per_kb.is_finite() || btc_per_kb <= 0.0 {
        return 1;
    }
    // Round to whole satoshis per kB first so float noise cannot bump the ceiling.
    let sat_per_kb = (btc_per_kb * COIN as f64).round();
    if sat_per_kb >= u64::MAX as f64 {
        return u64::MAX / 1000;
    }
    (sat_per_kb as u64).div_ceil(1000).max(1)
}
