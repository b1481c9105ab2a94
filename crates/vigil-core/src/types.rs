//! Core data model: accounts, addresses, transactions, UTXOs.
//!
//! All monetary values are in satoshis.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::constants::{CHANGE_CHAIN, EXTERNAL_CHAIN, Network, PURPOSE_LEGACY, PURPOSE_SEGWIT};
use crate::crypto::{DerivationPath, ExtendedKey};
use crate::error::KeyError;

/// A 32-byte transaction identifier, displayed as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Txid(pub [u8; 32]);

impl Txid {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Txid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Txid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Txid({self})")
    }
}

impl FromStr for Txid {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl From<[u8; 32]> for Txid {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl Serialize for Txid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Txid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Reference to a specific output of a previous transaction.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutPoint {
    pub txid: Txid,
    pub index: u32,
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.index)
    }
}

/// A transaction input as reported by the transaction source.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TxInput {
    pub previous_output: OutPoint,
    /// Address of the spent output, when the source could resolve it.
    pub address: Option<String>,
    /// Value of the spent output in satoshis.
    pub value: u64,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

/// A transaction output as reported by the transaction source.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TxOutput {
    pub index: u32,
    /// Decoded destination address; `None` for non-standard scripts.
    pub address: Option<String>,
    pub value: u64,
    pub script_pubkey: Vec<u8>,
}

/// A full transaction fetched from the transaction source.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Tx {
    pub txid: Txid,
    pub version: u32,
    pub lock_time: u32,
    /// Confirmation height; `None` while in the mempool.
    pub block_height: Option<u64>,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

impl Tx {
    /// Sum of all spent output values.
    pub fn input_value(&self) -> u64 {
        self.inputs.iter().map(|i| i.value).fold(0u64, u64::saturating_add)
    }

    /// Sum of all created output values.
    pub fn output_value(&self) -> u64 {
        self.outputs.iter().map(|o| o.value).fold(0u64, u64::saturating_add)
    }

    /// Miner fee, or `None` if the reported values are inconsistent.
    pub fn fee(&self) -> Option<u64> {
        self.input_value().checked_sub(self.output_value())
    }

    /// Sort key placing confirmed transactions by height and mempool last.
    pub fn age_key(&self) -> u64 {
        self.block_height.unwrap_or(u64::MAX)
    }
}

/// A discovered account, identified by its extended public key string.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Account {
    /// Deterministic identifier: the account's serialized xpub.
    pub id: String,
    /// Compressed public key of the account node.
    pub public_key: Vec<u8>,
    pub chain_code: [u8; 32],
    pub index: u32,
    /// Legacy P2PKH account when `true`, P2SH-wrapped segwit otherwise.
    pub legacy: bool,
    pub label: Option<String>,
    /// Sum of unspent outputs in satoshis.
    pub balance: u64,
}

impl Account {
    /// Create an account record from its xpub and derivation position.
    pub fn from_xpub(xpub: &str, index: u32, legacy: bool) -> Result<Self, KeyError> {
        let (_, key) = ExtendedKey::from_xpub(xpub)?;
        Ok(Self {
            id: xpub.to_string(),
            public_key: key.public_key_bytes().to_vec(),
            chain_code: *key.chain_code(),
            index,
            legacy,
            label: None,
            balance: 0,
        })
    }

    /// The serialized extended public key this account was created from.
    pub fn xpub(&self) -> &str {
        &self.id
    }

    /// Rebuild the account node from the stored bytes.
    pub fn extended_key(&self) -> Result<ExtendedKey, KeyError> {
        ExtendedKey::from_bytes(&self.public_key, self.chain_code)
    }

    pub fn segwit(&self) -> bool {
        !self.legacy
    }

    pub fn purpose(&self) -> u32 {
        if self.legacy { PURPOSE_LEGACY } else { PURPOSE_SEGWIT }
    }

    /// Hardened account path, e.g. `m/49'/0'/3'`.
    pub fn path(&self, network: Network) -> DerivationPath {
        DerivationPath::account(self.purpose(), network, self.index)
    }

    /// Full path of an address on this account.
    pub fn address_path(&self, network: Network, is_change: bool, index: u32) -> DerivationPath {
        let chain = if is_change { CHANGE_CHAIN } else { EXTERNAL_CHAIN };
        self.path(network).child(chain).child(index)
    }
}

/// An address derived for an account.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Address {
    pub address: String,
    pub account_id: String,
    pub is_change: bool,
    pub index: u32,
    pub label: Option<String>,
    pub total_received: u64,
}

/// An output paying one of the wallet's addresses.
///
/// Availability is not a field: an output is spendable iff no known
/// input references its outpoint.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Utxo {
    pub account_id: String,
    pub txid: Txid,
    pub output_index: u32,
    pub address: String,
    pub value: u64,
    pub is_mine: bool,
    pub is_change: bool,
    pub label: Option<String>,
    pub block_height: Option<u64>,
}

impl Utxo {
    pub fn outpoint(&self) -> OutPoint {
        OutPoint {
            txid: self.txid,
            index: self.output_index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const XPUB: &str = "xpub68Gmy5EdvgibQVfPdqkBBCHxA5htiqg55crXYuXoQRKfDBFA1WEjWgP6LHhwBZeNK1VTsfTFUHCdrfp1bgwQ9xv5ski8PX9rL2dZXvgGDnw";

    fn tx(inputs: &[u64], outputs: &[u64]) -> Tx {
        Tx {
            txid: Txid([1; 32]),
            version: 1,
            lock_time: 0,
            block_height: Some(10),
            inputs: inputs
                .iter()
                .enumerate()
                .map(|(i, &value)| TxInput {
                    previous_output: OutPoint {
                        txid: Txid([9; 32]),
                        index: i as u32,
                    },
                    address: None,
                    value,
                    script_sig: vec![],
                    sequence: u32::MAX,
                })
                .collect(),
            outputs: outputs
                .iter()
                .enumerate()
                .map(|(i, &value)| TxOutput {
                    index: i as u32,
                    address: None,
                    value,
                    script_pubkey: vec![],
                })
                .collect(),
        }
    }

    #[test]
    fn txid_hex_roundtrip() {
        let txid = Txid([0xab; 32]);
        let s = txid.to_string();
        assert_eq!(s.len(), 64);
        assert_eq!(s.parse::<Txid>().unwrap(), txid);
    }

    #[test]
    fn txid_rejects_short_hex() {
        assert!("abcd".parse::<Txid>().is_err());
    }

    #[test]
    fn txid_serde_as_string() {
        let txid = Txid([0x01; 32]);
        let json = serde_json::to_string(&txid).unwrap();
        assert_eq!(json, format!("\"{}\"", "01".repeat(32)));
        let back: Txid = serde_json::from_str(&json).unwrap();
        assert_eq!(back, txid);
    }

    #[test]
    fn tx_fee() {
        assert_eq!(tx(&[1000, 500], &[1200]).fee(), Some(300));
        assert_eq!(tx(&[100], &[200]).fee(), None);
    }

    #[test]
    fn mempool_sorts_last() {
        let confirmed = tx(&[1], &[1]);
        let mut pending = confirmed.clone();
        pending.block_height = None;
        assert!(confirmed.age_key() < pending.age_key());
    }

    #[test]
    fn account_from_xpub_roundtrips_key() {
        let account = Account::from_xpub(XPUB, 0, false).unwrap();
        let (_, key) = ExtendedKey::from_xpub(XPUB).unwrap();
        assert_eq!(account.extended_key().unwrap(), key);
        assert_eq!(account.xpub(), XPUB);
        assert!(account.segwit());
    }

    #[test]
    fn account_paths() {
        let segwit = Account::from_xpub(XPUB, 3, false).unwrap();
        assert_eq!(segwit.path(Network::Mainnet).to_string(), "m/49'/0'/3'");
        assert_eq!(
            segwit.address_path(Network::Mainnet, true, 7).to_string(),
            "m/49'/0'/3'/1/7"
        );
        let legacy = Account::from_xpub(XPUB, 0, true).unwrap();
        assert_eq!(legacy.path(Network::Testnet).to_string(), "m/44'/1'/0'");
    }

    #[test]
    fn outpoint_display() {
        let op = OutPoint {
            txid: Txid([0; 32]),
            index: 3,
        };
        assert!(op.to_string().ends_with(":3"));
    }
}
