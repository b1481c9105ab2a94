//! Shared collaborators for the end-to-end tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use vigil_core::address::encode_address;
use vigil_core::constants::{HARDENED_OFFSET, Network, PURPOSE_LEGACY};
use vigil_core::crypto::{DerivationPath, ExtendedKey};
use vigil_core::descriptor::{PrevTxMap, UnsignedTransaction};
use vigil_core::error::{BlobStoreError, DeviceError, SourceError};
use vigil_core::traits::{RemoteBlobStore, SigningDevice, TransactionSource};
use vigil_core::types::{OutPoint, Tx, TxInput, TxOutput, Txid};
use vigil_wallet::{MemoryStore, Wallet, WalletConfig, WalletState};

/// Root node every test account hangs off.
pub const ROOT_XPUB: &str = "xpub68Gmy5EdvgibQVfPdqkBBCHxA5htiqg55crXYuXoQRKfDBFA1WEjWgP6LHhwBZeNK1VTsfTFUHCdrfp1bgwQ9xv5ski8PX9rL2dZXvgGDnw";

/// A native segwit destination outside the wallet.
pub const EXTERNAL_DEST: &str = "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4";

/// Txid the mock source assigns to every broadcast.
pub const BROADCAST_TXID: Txid = Txid([0xab; 32]);

/// Account node for `(purpose, index)`.
///
/// Hardened derivation needs the private key, so the mock device stands in
/// for it with a distinct public child per account path.
pub fn account_xpub(purpose: u32, index: u32) -> String {
    let (_, root) = ExtendedKey::from_xpub(ROOT_XPUB).unwrap();
    root.derive_child(purpose * 1000 + index)
        .unwrap()
        .to_xpub(Network::Mainnet, 3, [0; 4], index | HARDENED_OFFSET)
}

/// Address `i` on `chain` of account `(purpose, index)`.
pub fn address_of(purpose: u32, index: u32, chain: u32, i: u32) -> String {
    let (_, key) = ExtendedKey::from_xpub(&account_xpub(purpose, index)).unwrap();
    encode_address(
        &key.derive_path(&[chain, i]).unwrap(),
        purpose == PURPOSE_LEGACY,
        Network::Mainnet,
    )
}

/// Transaction paying `value` to `address` from outside the wallet.
pub fn funding_tx(id: u8, address: &str, value: u64, height: Option<u64>) -> Tx {
    Tx {
        txid: Txid([id; 32]),
        version: 1,
        lock_time: 0,
        block_height: height,
        inputs: vec![TxInput {
            previous_output: OutPoint {
                txid: Txid([0xee; 32]),
                index: id as u32,
            },
            address: None,
            value: value + 1_000,
            script_sig: vec![],
            sequence: u32::MAX,
        }],
        outputs: vec![TxOutput {
            index: 0,
            address: Some(address.to_string()),
            value,
            script_pubkey: vec![],
        }],
    }
}

/// Transaction source answering from an address index.
#[derive(Default)]
pub struct MockSource {
    history: Mutex<HashMap<String, Vec<Tx>>>,
    /// Requests touching these addresses never complete.
    stalled: Mutex<HashSet<String>>,
    broadcasts: Mutex<Vec<String>>,
    fee_rates: Mutex<HashMap<u32, f64>>,
    calls: AtomicUsize,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index `tx` under every address it pays or spends from.
    pub fn add_tx(&self, tx: Tx) {
        let mut touched: HashSet<String> = tx.outputs.iter().filter_map(|o| o.address.clone()).collect();
        touched.extend(tx.inputs.iter().filter_map(|i| i.address.clone()));
        let mut history = self.history.lock();
        for address in touched {
            history.entry(address).or_default().push(tx.clone());
        }
    }

    pub fn fund(&self, id: u8, address: &str, value: u64, height: u64) {
        self.add_tx(funding_tx(id, address, value, Some(height)));
    }

    pub fn stall(&self, address: &str) {
        self.stalled.lock().insert(address.to_string());
    }

    pub fn set_fee_rate(&self, target_blocks: u32, btc_per_kb: f64) {
        self.fee_rates.lock().insert(target_blocks, btc_per_kb);
    }

    pub fn broadcasts(&self) -> Vec<String> {
        self.broadcasts.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransactionSource for MockSource {
    async fn get_address_history(
        &self,
        addresses: &[String],
        _from_height: u64,
        _to_height: Option<u64>,
        mempool_only: bool,
    ) -> Result<Vec<Tx>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let stalled = {
            let stalled = self.stalled.lock();
            addresses.iter().any(|a| stalled.contains(a))
        };
        if stalled {
            std::future::pending::<()>().await;
        }

        let history = self.history.lock();
        let mut seen = HashSet::new();
        Ok(addresses
            .iter()
            .filter_map(|a| history.get(a))
            .flatten()
            .filter(|tx| tx.block_height.is_none() == mempool_only)
            .filter(|tx| seen.insert(tx.txid))
            .cloned()
            .collect())
    }

    async fn broadcast(&self, raw_tx_hex: &str) -> Result<Txid, SourceError> {
        self.broadcasts.lock().push(raw_tx_hex.to_string());
        Ok(BROADCAST_TXID)
    }

    async fn estimate_fee_rate(&self, target_blocks: u32) -> Result<f64, SourceError> {
        self.fee_rates
            .lock()
            .get(&target_blocks)
            .copied()
            .ok_or_else(|| SourceError::Fetch(format!("no estimate for {target_blocks} blocks")))
    }
}

/// Device exporting [`account_xpub`] nodes and recording what it signs.
#[derive(Default)]
pub struct MockDevice {
    signed: Mutex<Vec<(UnsignedTransaction, PrevTxMap)>>,
    reject: AtomicBool,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the user decline every signing request.
    pub fn reject_signing(&self) {
        self.reject.store(true, Ordering::SeqCst);
    }

    pub fn signed(&self) -> Vec<(UnsignedTransaction, PrevTxMap)> {
        self.signed.lock().clone()
    }
}

#[async_trait]
impl SigningDevice for MockDevice {
    async fn get_public_node(&self, path: &DerivationPath) -> Result<String, DeviceError> {
        match path.as_slice() {
            [purpose, _, account] => Ok(account_xpub(
                purpose - HARDENED_OFFSET,
                account - HARDENED_OFFSET,
            )),
            _ => Err(DeviceError::Failure(format!("unexpected path {path}"))),
        }
    }

    async fn sign(
        &self,
        unsigned: &UnsignedTransaction,
        prev_txs: &PrevTxMap,
    ) -> Result<String, DeviceError> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(DeviceError::Cancelled);
        }
        self.signed.lock().push((unsigned.clone(), prev_txs.clone()));
        Ok(format!("{:02x}{:02x}", unsigned.inputs.len(), unsigned.outputs.len()))
    }
}

/// Remote blob store shared between wallet instances.
#[derive(Default)]
pub struct MockBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    offline: AtomicBool,
    uploads: AtomicUsize,
}

impl MockBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn get(&self, filename: &str) -> Option<Vec<u8>> {
        self.blobs.lock().get(filename).cloned()
    }

    pub fn put(&self, filename: &str, bytes: Vec<u8>) {
        self.blobs.lock().insert(filename.to_string(), bytes);
    }

    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> Result<(), BlobStoreError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(BlobStoreError::Transport("offline".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteBlobStore for MockBlobStore {
    async fn exists(&self, filename: &str) -> Result<bool, BlobStoreError> {
        self.check_online()?;
        Ok(self.blobs.lock().contains_key(filename))
    }

    async fn download(&self, filename: &str) -> Result<Vec<u8>, BlobStoreError> {
        self.check_online()?;
        self.get(filename)
            .ok_or_else(|| BlobStoreError::NotFound(filename.to_string()))
    }

    async fn upload(&self, filename: &str, bytes: &[u8], overwrite: bool) -> Result<(), BlobStoreError> {
        self.check_online()?;
        let mut blobs = self.blobs.lock();
        if !overwrite && blobs.contains_key(filename) {
            return Err(BlobStoreError::AlreadyExists(filename.to_string()));
        }
        blobs.insert(filename.to_string(), bytes.to_vec());
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Wallet over a fresh [`MemoryStore`] and the given collaborators.
pub fn test_wallet(
    source: Arc<MockSource>,
    device: Arc<MockDevice>,
) -> (Wallet, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let wallet = Wallet::new(
        WalletConfig::default(),
        WalletState::default(),
        store.clone(),
        source,
        device,
    );
    (wallet, store)
}
