//! Unsigned transaction descriptor handed to the signing device.
//!
//! The descriptor names every input by derivation path and previous
//! outpoint and every output by destination script or change path. The
//! device rebuilds the scripts, signs, and returns the serialized result.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::crypto::DerivationPath;
use crate::types::{OutPoint, Tx, Txid};

/// Default input sequence (final, no RBF).
pub const SEQUENCE_FINAL: u32 = 0xFFFF_FFFF;

/// How the device should build the unlocking script of an input.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputScriptType {
    /// Legacy P2PKH spend.
    SpendAddress,
    /// P2SH-wrapped P2WPKH spend.
    SpendP2shWitness,
}

/// Script type of a change output, mirroring the account policy.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeScriptType {
    PayToAddress,
    PayToP2shWitness,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UnsignedInput {
    pub path: DerivationPath,
    pub previous_output: OutPoint,
    /// Spent amount; only carried for segwit inputs, which commit to it.
    pub amount: Option<u64>,
    pub script_type: InputScriptType,
    pub sequence: u32,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum OutputDestination {
    /// External payment to a decoded address.
    Address {
        address: String,
        script_pubkey: Vec<u8>,
    },
    /// Change back to the account, addressed by derivation path.
    Change {
        path: DerivationPath,
        script_type: ChangeScriptType,
    },
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UnsignedOutput {
    pub destination: OutputDestination,
    pub amount: u64,
}

impl UnsignedOutput {
    pub fn is_change(&self) -> bool {
        matches!(self.destination, OutputDestination::Change { .. })
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UnsignedTransaction {
    pub version: u32,
    pub lock_time: u32,
    pub inputs: Vec<UnsignedInput>,
    pub outputs: Vec<UnsignedOutput>,
}

impl UnsignedTransaction {
    pub fn output_value(&self) -> u64 {
        self.outputs.iter().map(|o| o.amount).fold(0u64, u64::saturating_add)
    }
}

/// Every input's full previous transaction, keyed by txid.
///
/// Legacy signing flows stream these to the device so it can verify the
/// spent amounts itself.
pub type PrevTxMap = BTreeMap<Txid, Tx>;
