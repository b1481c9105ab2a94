//! Fee-aware coin selection.
//!
//! Strategies implement [`CoinSelect`]; [`SelectionStrategy`] enumerates the
//! available ones so callers pick by configuration rather than by type.
//! The only strategy today is FIFO: spend the oldest outputs first.

use serde::{Deserialize, Serialize};
use tracing::debug;
use vigil_core::constants::DUST_THRESHOLD;
use vigil_core::types::Utxo;

use crate::error::WalletError;
use crate::fee::{self, OutputType};

/// A payment destination and amount in satoshis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub address: String,
    pub amount: u64,
}

/// Result of coin selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Selected UTXOs, in spend order.
    pub utxos: Vec<Utxo>,
    /// Fee in satoshis, including the change output's cost when one is needed.
    pub fee: u64,
}

impl Selection {
    pub fn total_value(&self) -> u64 {
        self.utxos.iter().map(|u| u.value).fold(0, u64::saturating_add)
    }
}

/// A coin selection strategy.
pub trait CoinSelect: Send + Sync {
    /// Choose UTXOs from `utxos` (oldest first) to pay `recipients` at
    /// `fee_rate` sat/byte.
    fn select(
        &self,
        utxos: &[Utxo],
        recipients: &[Recipient],
        fee_rate: u64,
        segwit: bool,
    ) -> Result<Selection, WalletError>;
}

/// Configured selection strategy.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SelectionStrategy {
    #[default]
    Fifo,
}

impl SelectionStrategy {
    pub fn selector(&self, dust_threshold: u64) -> Box<dyn CoinSelect> {
        match self {
            Self::Fifo => Box::new(FifoSelector::new(dust_threshold)),
        }
    }
}

/// Oldest-first accumulation.
///
/// The fee is recomputed after every addition. When the leftover would
/// exceed the dust threshold, the change output's bytes are charged too,
/// which can pull in one more UTXO than strictly necessary.
#[derive(Debug, Clone, Copy)]
pub struct FifoSelector {
    dust_threshold: u64,
}

impl FifoSelector {
    pub fn new(dust_threshold: u64) -> Self {
        Self { dust_threshold }
    }
}

impl Default for FifoSelector {
    fn default() -> Self {
        Self::new(DUST_THRESHOLD)
    }
}

/// Validate recipients and return their total and output types.
pub(crate) fn payment_target(recipients: &[Recipient]) -> Result<(u64, Vec<OutputType>), WalletError> {
    if recipients.is_empty() {
        return Err(WalletError::BuildError("no recipients".into()));
    }
    let mut target: u64 = 0;
    for r in recipients {
        if r.amount == 0 {
            return Err(WalletError::InvalidAmount("recipient amount is zero".into()));
        }
        target = target
            .checked_add(r.amount)
            .ok_or_else(|| WalletError::InvalidAmount("total amount overflow".into()))?;
    }
    let types = fee::output_types(recipients.iter().map(|r| r.address.as_str()))?;
    Ok((target, types))
}

impl CoinSelect for FifoSelector {
    fn select(
        &self,
        utxos: &[Utxo],
        recipients: &[Recipient],
        fee_rate: u64,
        segwit: bool,
    ) -> Result<Selection, WalletError> {
        let (target, outputs) = payment_target(recipients)?;
        if utxos.is_empty() {
            return Err(WalletError::NoUtxos);
        }

        let change_fee = fee::change_output_size(segwit).saturating_mul(fee_rate);
        let mut selected = Vec::new();
        let mut accumulated: u64 = 0;
        let mut current_fee: u64 = 0;

        for utxo in utxos {
            selected.push(utxo.clone());
            accumulated = accumulated.saturating_add(utxo.value);

            current_fee = fee::estimate_fee(selected.len(), &outputs, fee_rate, segwit);
            let leftover = accumulated
                .saturating_sub(target)
                .saturating_sub(current_fee);
            if leftover > self.dust_threshold {
                current_fee = current_fee.saturating_add(change_fee);
            }

            if accumulated >= target.saturating_add(current_fee) {
                debug!(
                    inputs = selected.len(),
                    total = accumulated,
                    target,
                    fee = current_fee,
                    "fifo selection complete"
                );
                return Ok(Selection {
                    utxos: selected,
                    fee: current_fee,
                });
            }
        }

        Err(WalletError::InsufficientFunds {
            have: accumulated,
            need: target.saturating_add(current_fee),
        })
    }
}
