//! Unsigned transaction composition.
//!
//! Provides a builder for the descriptor handed to the signing device:
//! 1. Add recipients (address + amount)
//! 2. Select coins (see [`crate::coin_selection`])
//! 3. Compose the descriptor plus the previous-transaction map
//!
//! Change goes last, to the account's next unused change address, and only
//! when it exceeds the dust threshold. A smaller remainder is left to the
//! miner so that `Σ inputs == Σ outputs + fee` holds exactly.

use std::collections::HashMap;

use vigil_core::address::{encode_address, script_pubkey};
use vigil_core::constants::{CHANGE_CHAIN, DUST_THRESHOLD, Network};
use vigil_core::descriptor::{
    ChangeScriptType, InputScriptType, OutputDestination, PrevTxMap, SEQUENCE_FINAL,
    UnsignedInput, UnsignedOutput, UnsignedTransaction,
};
use vigil_core::types::{Account, Address, Tx, Txid};

use crate::coin_selection::{Recipient, Selection, payment_target};
use crate::error::WalletError;

/// Descriptor version.
pub const TX_VERSION: u32 = 1;

/// The change output added by the composer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeOutput {
    pub address: String,
    pub index: u32,
    pub amount: u64,
}

/// A composed, unsigned payment ready for the device.
#[derive(Debug, Clone)]
pub struct ComposedTransaction {
    pub unsigned: UnsignedTransaction,
    /// Full previous transaction of every input.
    pub prev_txs: PrevTxMap,
    /// Final fee, including any remainder too small for a change output.
    pub fee: u64,
    pub change: Option<ChangeOutput>,
    /// The coins spent, in input order.
    pub selection: Selection,
}

impl ComposedTransaction {
    pub fn input_value(&self) -> u64 {
        self.selection.total_value()
    }
}

/// First change index that has never received funds.
pub fn next_change_index(addresses: &[Address]) -> u32 {
    let mut change: Vec<&Address> = addresses.iter().filter(|a| a.is_change).collect();
    change.sort_by_key(|a| a.index);
    change
        .iter()
        .find(|a| a.total_received == 0)
        .map(|a| a.index)
        .unwrap_or_else(|| change.last().map_or(0, |a| a.index + 1))
}

/// Builder for unsigned transaction descriptors.
///
/// # Example
/// ```ignore
/// let mut composer = TransactionComposer::new(Network::Mainnet);
/// composer.add_recipient(address, 50_000);
/// let selection = selector.select(&utxos, composer.recipients(), rate, account.segwit())?;
/// let composed = composer.compose(&account, selection, &addresses, &history, change_index)?;
/// ```
pub struct TransactionComposer {
    network: Network,
    recipients: Vec<Recipient>,
    dust_threshold: u64,
    lock_time: u32,
}

impl TransactionComposer {
    pub fn new(network: Network) -> Self {
        Self {
            network,
            recipients: Vec::new(),
            dust_threshold: DUST_THRESHOLD,
            lock_time: 0,
        }
    }

    pub fn add_recipient(&mut self, address: impl Into<String>, amount: u64) -> &mut Self {
        self.recipients.push(Recipient {
            address: address.into(),
            amount,
        });
        self
    }

    /// Override the dust threshold (default: [`DUST_THRESHOLD`]).
    pub fn set_dust_threshold(&mut self, dust_threshold: u64) -> &mut Self {
        self.dust_threshold = dust_threshold;
        self
    }

    pub fn set_lock_time(&mut self, lock_time: u32) -> &mut Self {
        self.lock_time = lock_time;
        self
    }

    pub fn recipients(&self) -> &[Recipient] {
        &self.recipients
    }

    /// Compose the descriptor spending `selection`.
    ///
    /// `addresses` must contain every selected UTXO's address (it supplies
    /// the derivation path) and `history` every spent output's transaction.
    pub fn compose(
        &self,
        account: &Account,
        selection: Selection,
        addresses: &[Address],
        history: &[Tx],
        change_index: u32,
    ) -> Result<ComposedTransaction, WalletError> {
        let (target, _) = payment_target(&self.recipients)?;
        let input_value = selection.total_value();
        let need = target.saturating_add(selection.fee);
        let remainder = input_value
            .checked_sub(need)
            .ok_or(WalletError::InsufficientFunds {
                have: input_value,
                need,
            })?;

        let by_address: HashMap<&str, &Address> =
            addresses.iter().map(|a| (a.address.as_str(), a)).collect();
        let by_txid: HashMap<Txid, &Tx> = history.iter().map(|tx| (tx.txid, tx)).collect();

        let script_type = if account.legacy {
            InputScriptType::SpendAddress
        } else {
            InputScriptType::SpendP2shWitness
        };

        let mut inputs = Vec::with_capacity(selection.utxos.len());
        let mut prev_txs = PrevTxMap::new();
        for utxo in &selection.utxos {
            let owner = by_address.get(utxo.address.as_str()).ok_or_else(|| {
                WalletError::BuildError(format!("address {} not in account", utxo.address))
            })?;
            let prev = by_txid
                .get(&utxo.txid)
                .ok_or_else(|| WalletError::MissingPreviousTransaction(utxo.txid.to_string()))?;
            prev_txs.insert(utxo.txid, (*prev).clone());

            inputs.push(UnsignedInput {
                path: account.address_path(self.network, owner.is_change, owner.index),
                previous_output: utxo.outpoint(),
                amount: account.segwit().then_some(utxo.value),
                script_type,
                sequence: SEQUENCE_FINAL,
            });
        }

        let mut outputs = Vec::with_capacity(self.recipients.len() + 1);
        for r in &self.recipients {
            outputs.push(UnsignedOutput {
                destination: OutputDestination::Address {
                    address: r.address.clone(),
                    script_pubkey: script_pubkey(&r.address)?,
                },
                amount: r.amount,
            });
        }

        let (fee, change) = if remainder > self.dust_threshold {
            let key = account
                .extended_key()?
                .derive_path(&[CHANGE_CHAIN, change_index])?;
            let change_script = if account.legacy {
                ChangeScriptType::PayToAddress
            } else {
                ChangeScriptType::PayToP2shWitness
            };
            outputs.push(UnsignedOutput {
                destination: OutputDestination::Change {
                    path: account.address_path(self.network, true, change_index),
                    script_type: change_script,
                },
                amount: remainder,
            });
            let change = ChangeOutput {
                address: encode_address(&key, account.legacy, self.network),
                index: change_index,
                amount: remainder,
            };
            (selection.fee, Some(change))
        } else {
            (selection.fee.saturating_add(remainder), None)
        };

        let unsigned = UnsignedTransaction {
            version: TX_VERSION,
            lock_time: self.lock_time,
            inputs,
            outputs,
        };

        if unsigned.output_value().checked_add(fee) != Some(input_value) {
            return Err(WalletError::BuildError(format!(
                "value not conserved: inputs {input_value}, outputs {}, fee {fee}",
                unsigned.output_value()
            )));
        }

        Ok(ComposedTransaction {
            unsigned,
            prev_txs,
            fee,
            change,
            selection,
        })
    }
}
