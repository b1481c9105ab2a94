//! Trait interfaces for Vigil's external collaborators.
//!
//! - [`TransactionSource`]: blockchain data and broadcast (an indexer client implements)
//! - [`RemoteBlobStore`]: remote storage for encrypted label documents
//! - [`SigningDevice`]: the hardware wallet holding the private keys
//! - [`AccountRepository`], [`AddressRepository`], [`TransactionRepository`],
//!   [`MetadataRepository`]: local persistence
//!
//! Network-facing collaborators are asynchronous; every call is a
//! suspension point and dropping the future must abort the request.
//! Repositories are synchronous and every method is all-or-nothing.

use async_trait::async_trait;

use crate::crypto::DerivationPath;
use crate::descriptor::{PrevTxMap, UnsignedTransaction};
use crate::error::{BlobStoreError, DeviceError, SourceError, StoreError};
use crate::types::{Account, Address, OutPoint, Tx, Txid, Utxo};

/// Read access to blockchain history plus broadcast.
#[async_trait]
pub trait TransactionSource: Send + Sync {
    /// All transactions touching any of `addresses` confirmed within
    /// `from_height..=to_height` (`None` = up to the tip), or only
    /// unconfirmed ones when `mempool_only` is set.
    async fn get_address_history(
        &self,
        addresses: &[String],
        from_height: u64,
        to_height: Option<u64>,
        mempool_only: bool,
    ) -> Result<Vec<Tx>, SourceError>;

    /// Submit a signed, hex-encoded transaction. Returns its txid.
    async fn broadcast(&self, raw_tx_hex: &str) -> Result<Txid, SourceError>;

    /// Fee rate in BTC per kilobyte for confirmation within `target_blocks`.
    async fn estimate_fee_rate(&self, target_blocks: u32) -> Result<f64, SourceError>;
}

/// Remote storage for label documents, addressed by filename.
#[async_trait]
pub trait RemoteBlobStore: Send + Sync {
    async fn exists(&self, filename: &str) -> Result<bool, BlobStoreError>;

    async fn download(&self, filename: &str) -> Result<Vec<u8>, BlobStoreError>;

    /// Store `bytes` under `filename`. Without `overwrite` an existing blob
    /// fails with [`BlobStoreError::AlreadyExists`].
    async fn upload(&self, filename: &str, bytes: &[u8], overwrite: bool)
        -> Result<(), BlobStoreError>;
}

/// The hardware device. Private keys never leave it.
#[async_trait]
pub trait SigningDevice: Send + Sync {
    /// Serialized extended public key of the node at `path`.
    ///
    /// Hardened paths are resolved on the device; this is how account nodes
    /// enter the core.
    async fn get_public_node(&self, path: &DerivationPath) -> Result<String, DeviceError>;

    /// Sign `unsigned`, returning the serialized transaction as hex.
    async fn sign(
        &self,
        unsigned: &UnsignedTransaction,
        prev_txs: &PrevTxMap,
    ) -> Result<String, DeviceError>;
}

/// Persisted accounts.
pub trait AccountRepository: Send + Sync {
    /// All accounts, segwit before legacy, ascending index.
    fn accounts(&self) -> Result<Vec<Account>, StoreError>;

    fn account(&self, id: &str) -> Result<Option<Account>, StoreError>;

    /// Persist a freshly discovered account with its addresses and history
    /// in a single step. Either everything is stored or nothing is.
    fn save_discovered(
        &self,
        account: &Account,
        addresses: &[Address],
        txs: &[Tx],
    ) -> Result<(), StoreError>;

    fn set_account_label(&self, id: &str, label: Option<&str>) -> Result<(), StoreError>;

    fn set_account_balance(&self, id: &str, balance: u64) -> Result<(), StoreError>;

    /// Drop every account, address, transaction and UTXO.
    fn forget_all(&self) -> Result<(), StoreError>;
}

/// Persisted addresses.
pub trait AddressRepository: Send + Sync {
    /// Addresses of one chain, ordered by index.
    fn addresses(&self, account_id: &str, is_change: bool) -> Result<Vec<Address>, StoreError>;

    fn address(&self, address: &str) -> Result<Option<Address>, StoreError>;

    /// Insert new addresses or replace existing ones with the same string.
    fn upsert_addresses(&self, addresses: &[Address]) -> Result<(), StoreError>;

    fn set_address_label(&self, address: &str, label: Option<&str>) -> Result<(), StoreError>;
}

/// Persisted transaction history and derived UTXOs.
pub trait TransactionRepository: Send + Sync {
    fn save_transactions(&self, account_id: &str, txs: &[Tx]) -> Result<(), StoreError>;

    fn transactions(&self, account_id: &str) -> Result<Vec<Tx>, StoreError>;

    fn transaction(&self, txid: &Txid) -> Result<Option<Tx>, StoreError>;

    /// Replace the account's unspent set.
    fn replace_utxos(&self, account_id: &str, utxos: &[Utxo]) -> Result<(), StoreError>;

    /// Unspent outputs, oldest first.
    fn utxos(&self, account_id: &str) -> Result<Vec<Utxo>, StoreError>;

    /// Remove outpoints consumed by a transaction this wallet broadcast.
    fn mark_spent(&self, outpoints: &[OutPoint]) -> Result<(), StoreError>;

    fn set_output_label(
        &self,
        txid: &Txid,
        index: u32,
        label: Option<&str>,
    ) -> Result<(), StoreError>;
}

/// Local copies of encrypted label documents.
pub trait MetadataRepository: Send + Sync {
    fn load_document(&self, filename: &str) -> Result<Option<Vec<u8>>, StoreError>;

    fn save_document(&self, filename: &str, bytes: &[u8]) -> Result<(), StoreError>;

    fn delete_document(&self, filename: &str) -> Result<(), StoreError>;
}
