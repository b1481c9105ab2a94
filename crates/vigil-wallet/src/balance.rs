//! Balance folding over an already-fetched transaction set.
//!
//! Everything here is pure: inputs are the account's transactions and
//! addresses, outputs are updated records. Nothing touches the network or
//! the store.

use std::collections::{HashMap, HashSet};

use vigil_core::types::{Address, OutPoint, Tx, Txid, Utxo};

/// How a transaction moves value relative to a set of own addresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxDirection {
    /// No own inputs, at least one own output.
    Received,
    /// At least one own input and some value leaves the wallet.
    Sent,
    /// Own inputs and own outputs only; only the fee leaves.
    SelfTransfer,
}

/// Lifetime totals of an account.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AccountSummary {
    pub received: u64,
    pub sent: u64,
}

fn is_own(address: &Option<String>, own: &HashSet<&str>) -> bool {
    address.as_deref().is_some_and(|a| own.contains(a))
}

/// Drop repeated transactions, keeping the first occurrence.
///
/// Histories of the external and change chains overlap whenever a
/// transaction touches both.
pub fn dedup_transactions(txs: Vec<Tx>) -> Vec<Tx> {
    let mut seen: HashSet<Txid> = HashSet::with_capacity(txs.len());
    txs.into_iter().filter(|tx| seen.insert(tx.txid)).collect()
}

/// Classify `tx`, or `None` if it touches none of `own`.
///
/// `SelfTransfer` is checked first since it is the intersection of the
/// other two cases.
pub fn classify(tx: &Tx, own: &HashSet<&str>) -> Option<TxDirection> {
    let own_inputs = tx.inputs.iter().filter(|i| is_own(&i.address, own)).count();
    let own_outputs = tx.outputs.iter().filter(|o| is_own(&o.address, own)).count();

    if own_inputs > 0 && own_inputs == tx.inputs.len() && own_outputs == tx.outputs.len() {
        Some(TxDirection::SelfTransfer)
    } else if own_inputs > 0 {
        Some(TxDirection::Sent)
    } else if own_outputs > 0 {
        Some(TxDirection::Received)
    } else {
        None
    }
}

/// Set each address's `total_received` to the sum of outputs paying it.
pub fn address_total_received(txs: &[Tx], addresses: &[Address]) -> Vec<Address> {
    let mut totals: HashMap<&str, u64> = HashMap::new();
    let mut seen: HashSet<Txid> = HashSet::new();
    for tx in txs.iter().filter(|tx| seen.insert(tx.txid)) {
        for output in &tx.outputs {
            if let Some(address) = output.address.as_deref() {
                let total = totals.entry(address).or_default();
                *total = total.saturating_add(output.value);
            }
        }
    }

    addresses
        .iter()
        .map(|a| Address {
            total_received: totals.get(a.address.as_str()).copied().unwrap_or(0),
            ..a.clone()
        })
        .collect()
}

/// Fold the account's history into received and sent totals.
pub fn account_summary(txs: &[Tx], own: &HashSet<&str>) -> AccountSummary {
    let mut summary = AccountSummary::default();
    let mut seen: HashSet<Txid> = HashSet::new();

    for tx in txs.iter().filter(|tx| seen.insert(tx.txid)) {
        let own_in: u64 = tx
            .inputs
            .iter()
            .filter(|i| is_own(&i.address, own))
            .map(|i| i.value)
            .fold(0, u64::saturating_add);
        let own_out: u64 = tx
            .outputs
            .iter()
            .filter(|o| is_own(&o.address, own))
            .map(|o| o.value)
            .fold(0, u64::saturating_add);

        match classify(tx, own) {
            Some(TxDirection::Received) => {
                summary.received = summary.received.saturating_add(own_out);
            }
            Some(TxDirection::Sent) => {
                summary.sent = summary.sent.saturating_add(own_in.saturating_sub(own_out));
            }
            Some(TxDirection::SelfTransfer) => {
                summary.sent = summary.sent.saturating_add(tx.fee().unwrap_or(0));
            }
            None => {}
        }
    }
    summary
}

/// Outputs paying one of `addresses` with no spending input in `txs`.
///
/// Ordered oldest first: confirmed by ascending height, mempool last.
pub fn unspent_outputs(account_id: &str, txs: &[Tx], addresses: &[Address]) -> Vec<Utxo> {
    let by_address: HashMap<&str, &Address> =
        addresses.iter().map(|a| (a.address.as_str(), a)).collect();
    let spent: HashSet<OutPoint> = txs
        .iter()
        .flat_map(|tx| tx.inputs.iter().map(|i| i.previous_output))
        .collect();

    let mut seen: HashSet<Txid> = HashSet::new();
    let mut ordered: Vec<&Tx> = txs.iter().filter(|tx| seen.insert(tx.txid)).collect();
    ordered.sort_by_key(|tx| tx.age_key());

    let mut utxos = Vec::new();
    for tx in ordered {
        for output in &tx.outputs {
            let Some(owner) = output.address.as_deref().and_then(|a| by_address.get(a)) else {
                continue;
            };
            let outpoint = OutPoint {
                txid: tx.txid,
                index: output.index,
            };
            if spent.contains(&outpoint) {
                continue;
            }
            utxos.push(Utxo {
                account_id: account_id.to_string(),
                txid: tx.txid,
                output_index: output.index,
                address: owner.address.clone(),
                value: output.value,
                is_mine: true,
                is_change: owner.is_change,
                label: None,
                block_height: tx.block_height,
            });
        }
    }
    utxos
}

/// Sum of unspent values.
pub fn account_balance(utxos: &[Utxo]) -> u64 {
    utxos.iter().map(|u| u.value).fold(0, u64::saturating_add)
}
