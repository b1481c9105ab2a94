//! Gap-limit account discovery.
//!
//! Accounts are probed in order `(0, segwit), (1, segwit), ...` until one
//! comes back empty, then the same for legacy. For each account both
//! chains are scanned concurrently in batches of `gap_limit` addresses,
//! each chain stopping at its first batch without history.
//!
//! An account is active when either chain has history; segwit account 0
//! is always active so that a fresh device still gets one account.
//!
//! Nothing is persisted until both chains of an account have finished, so
//! dropping the discovery future never leaves a half-scanned account
//! behind. Accounts that were already persisted stay.

use tracing::{debug, info, warn};
use vigil_core::address::encode_address;
use vigil_core::constants::{
    CHANGE_CHAIN, EXTERNAL_CHAIN, GAP_LIMIT, Network, PURPOSE_LEGACY, PURPOSE_SEGWIT,
};
use vigil_core::crypto::{DerivationPath, ExtendedKey};
use vigil_core::traits::{
    AccountRepository, SigningDevice, TransactionRepository, TransactionSource,
};
use vigil_core::types::{Account, Address, Tx, Utxo};

use crate::balance;
use crate::error::WalletError;
use crate::store::WalletStore;

/// Outcome of scanning one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountState {
    Active,
    Empty,
}

/// Everything learned about one account.
#[derive(Debug, Clone)]
pub struct DiscoveredAccount {
    /// Record with `balance` filled in.
    pub account: Account,
    /// Both chains, contiguous from index 0, with `total_received` filled in.
    pub addresses: Vec<Address>,
    pub transactions: Vec<Tx>,
    pub utxos: Vec<Utxo>,
}

impl DiscoveredAccount {
    pub fn has_history(&self) -> bool {
        !self.transactions.is_empty()
    }

    /// Highest confirmation height seen, if any.
    pub fn tip_height(&self) -> Option<u64> {
        self.transactions.iter().filter_map(|tx| tx.block_height).max()
    }
}

struct ChainScan {
    addresses: Vec<Address>,
    transactions: Vec<Tx>,
}

pub struct AccountDiscovery<'a> {
    source: &'a dyn TransactionSource,
    device: &'a dyn SigningDevice,
    network: Network,
    gap_limit: u32,
}

impl<'a> AccountDiscovery<'a> {
    pub fn new(
        source: &'a dyn TransactionSource,
        device: &'a dyn SigningDevice,
        network: Network,
    ) -> Self {
        Self {
            source,
            device,
            network,
            gap_limit: GAP_LIMIT,
        }
    }

    pub fn with_gap_limit(mut self, gap_limit: u32) -> Self {
        self.gap_limit = gap_limit.max(1);
        self
    }

    /// Discover and persist every active account, segwit first.
    ///
    /// Each active account is saved before the next index is probed.
    /// Device and transport errors abort discovery; derivation errors only
    /// end the current account type.
    pub async fn discover(&self, store: &dyn WalletStore) -> Result<Vec<DiscoveredAccount>, WalletError> {
        let mut active = Vec::new();
        for legacy in [false, true] {
            let mut index = 0u32;
            loop {
                let found = self.probe(index, legacy).await?;
                let Some(found) = found else { break };
                persist(store, &found)?;
                active.push(found);
                index += 1;
            }
        }
        info!(accounts = active.len(), "discovery complete");
        Ok(active)
    }

    /// Scan account `(index, legacy)`; `None` when it is empty or its keys
    /// cannot be derived.
    async fn probe(&self, index: u32, legacy: bool) -> Result<Option<DiscoveredAccount>, WalletError> {
        let purpose = if legacy { PURPOSE_LEGACY } else { PURPOSE_SEGWIT };
        let path = DerivationPath::account(purpose, self.network, index);
        let xpub = self.device.get_public_node(&path).await?;

        let account = match Account::from_xpub(&xpub, index, legacy) {
            Ok(account) => account,
            Err(e) => {
                warn!(%path, error = %e, "unusable account node, treating as empty");
                return Ok(None);
            }
        };

        let scanned = match self.scan(account).await {
            Ok(scanned) => scanned,
            Err(WalletError::Key(e)) => {
                warn!(%path, error = %e, "derivation failed, treating account as empty");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let state = if scanned.has_history() || (!legacy && index == 0) {
            AccountState::Active
        } else {
            AccountState::Empty
        };
        info!(
            %path,
            txs = scanned.transactions.len(),
            addresses = scanned.addresses.len(),
            ?state,
            "account scanned"
        );
        Ok((state == AccountState::Active).then_some(scanned))
    }

    /// Rescan both chains of a known account. Nothing is persisted.
    pub async fn scan(&self, account: Account) -> Result<DiscoveredAccount, WalletError> {
        let key = account.extended_key()?;
        let external = key.derive_child(EXTERNAL_CHAIN)?;
        let change = key.derive_child(CHANGE_CHAIN)?;

        let (external, change) = tokio::try_join!(
            self.scan_chain(&account, &external, false),
            self.scan_chain(&account, &change, true),
        )?;

        let mut addresses = external.addresses;
        addresses.extend(change.addresses);
        let mut transactions = external.transactions;
        transactions.extend(change.transactions);
        let mut transactions = balance::dedup_transactions(transactions);
        transactions.sort_by_key(|tx| tx.age_key());

        let addresses = balance::address_total_received(&transactions, &addresses);
        let utxos = balance::unspent_outputs(&account.id, &transactions, &addresses);
        let mut account = account;
        account.balance = balance::account_balance(&utxos);

        Ok(DiscoveredAccount {
            account,
            addresses,
            transactions,
            utxos,
        })
    }

    async fn scan_chain(
        &self,
        account: &Account,
        chain: &ExtendedKey,
        is_change: bool,
    ) -> Result<ChainScan, WalletError> {
        let mut addresses = Vec::new();
        let mut transactions = Vec::new();
        let mut start = 0u32;

        loop {
            let end = start.saturating_add(self.gap_limit);
            let mut batch = Vec::with_capacity(self.gap_limit as usize);
            for index in start..end {
                let key = chain.derive_child(index)?;
                batch.push(Address {
                    address: encode_address(&key, account.legacy, self.network),
                    account_id: account.id.clone(),
                    is_change,
                    index,
                    label: None,
                    total_received: 0,
                });
            }

            let strings: Vec<String> = batch.iter().map(|a| a.address.clone()).collect();
            let mut history = self.source.get_address_history(&strings, 0, None, false).await?;
            history.extend(self.source.get_address_history(&strings, 0, None, true).await?);
            debug!(
                account = %account.id,
                is_change,
                batch_start = start,
                count = history.len(),
                "fetched address batch"
            );

            addresses.extend(batch);
            if history.is_empty() {
                break;
            }
            transactions.extend(history);
            start = end;
        }

        Ok(ChainScan {
            addresses,
            transactions,
        })
    }
}

/// Store a scanned account: record, addresses and history in one call,
/// then its unspent set.
pub fn persist(store: &dyn WalletStore, found: &DiscoveredAccount) -> Result<(), WalletError> {
    store.save_discovered(&found.account, &found.addresses, &found.transactions)?;
    store.replace_utxos(&found.account.id, &found.utxos)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use vigil_core::constants::HARDENED_OFFSET;
    use vigil_core::descriptor::{PrevTxMap, UnsignedTransaction};
    use vigil_core::error::{DeviceError, SourceError};
    use vigil_core::traits::AddressRepository;
    use vigil_core::types::{OutPoint, TxInput, TxOutput, Txid};

    use crate::store::MemoryStore;

    const ROOT: &str = "xpub68Gmy5EdvgibQVfPdqkBBCHxA5htiqg55crXYuXoQRKfDBFA1WEjWgP6LHhwBZeNK1VTsfTFUHCdrfp1bgwQ9xv5ski8PX9rL2dZXvgGDnw";

    /// Stands in for hardened derivation by deriving a distinct
    /// non-hardened child per account path.
    struct Device;

    fn account_xpub(purpose: u32, index: u32) -> String {
        let (_, root) = ExtendedKey::from_xpub(ROOT).unwrap();
        root.derive_child(purpose * 1000 + index)
            .unwrap()
            .to_xpub(Network::Mainnet, 3, [0; 4], index | HARDENED_OFFSET)
    }

    #[async_trait]
    impl SigningDevice for Device {
        async fn get_public_node(&self, path: &DerivationPath) -> Result<String, DeviceError> {
            let p = path.as_slice();
            Ok(account_xpub(p[0] - HARDENED_OFFSET, p[2] - HARDENED_OFFSET))
        }

        async fn sign(&self, _: &UnsignedTransaction, _: &PrevTxMap) -> Result<String, DeviceError> {
            Err(DeviceError::Cancelled)
        }
    }

    #[derive(Default)]
    struct Source {
        history: HashMap<String, Vec<Tx>>,
        calls: AtomicUsize,
    }

    impl Source {
        fn fund(&mut self, address: &str, id: u8, value: u64) {
            let tx = Tx {
                txid: Txid([id; 32]),
                version: 1,
                lock_time: 0,
                block_height: Some(100 + id as u64),
                inputs: vec![TxInput {
                    previous_output: OutPoint {
                        txid: Txid([0xff; 32]),
                        index: id as u32,
                    },
                    address: None,
                    value: value + 500,
                    script_sig: vec![],
                    sequence: u32::MAX,
                }],
                outputs: vec![TxOutput {
                    index: 0,
                    address: Some(address.to_string()),
                    value,
                    script_pubkey: vec![],
                }],
            };
            self.history.entry(address.to_string()).or_default().push(tx);
        }
    }

    #[async_trait]
    impl TransactionSource for Source {
        async fn get_address_history(
            &self,
            addresses: &[String],
            _from: u64,
            _to: Option<u64>,
            mempool_only: bool,
        ) -> Result<Vec<Tx>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(addresses
                .iter()
                .filter_map(|a| self.history.get(a))
                .flatten()
                .filter(|tx| tx.block_height.is_none() == mempool_only)
                .cloned()
                .collect())
        }

        async fn broadcast(&self, _: &str) -> Result<Txid, SourceError> {
            Err(SourceError::Rejected("unused".into()))
        }

        async fn estimate_fee_rate(&self, _: u32) -> Result<f64, SourceError> {
            Ok(0.0001)
        }
    }

    fn address_of(purpose: u32, index: u32, chain: u32, i: u32) -> String {
        let (_, key) = ExtendedKey::from_xpub(&account_xpub(purpose, index)).unwrap();
        encode_address(&key.derive_path(&[chain, i]).unwrap(), purpose == 44, Network::Mainnet)
    }

    #[tokio::test]
    async fn fresh_device_gets_one_segwit_account() {
        let source = Source::default();
        let store = MemoryStore::new();
        let found = AccountDiscovery::new(&source, &Device, Network::Mainnet)
            .discover(&store)
            .await
            .unwrap();

        assert_eq!(found.len(), 1);
        assert!(!found[0].account.legacy);
        assert_eq!(found[0].account.index, 0);
        assert_eq!(found[0].addresses.len(), 40);
        assert_eq!(store.accounts().unwrap().len(), 1);
        assert_eq!(store.addresses(&found[0].account.id, false).unwrap().len(), 20);
        assert_eq!(store.addresses(&found[0].account.id, true).unwrap().len(), 20);
    }

    #[tokio::test]
    async fn history_extends_chain_by_batches() {
        let mut source = Source::default();
        // Used in the first and second batch; the third comes back empty.
        source.fund(&address_of(49, 0, 0, 5), 1, 10_000);
        source.fund(&address_of(49, 0, 0, 30), 2, 5_000);
        // Beyond the gap after index 30's batch, never reached.
        source.fund(&address_of(49, 0, 0, 65), 3, 7_000);
        let store = MemoryStore::new();
        let found = AccountDiscovery::new(&source, &Device, Network::Mainnet)
            .discover(&store)
            .await
            .unwrap();

        let account = &found[0];
        let external = store.addresses(&account.account.id, false).unwrap();
        assert_eq!(external.len(), 60);
        assert!(external.iter().enumerate().all(|(i, a)| a.index == i as u32));
        assert_eq!(external[5].total_received, 10_000);
        assert_eq!(external[30].total_received, 5_000);
        assert_eq!(account.account.balance, 15_000);
        assert_eq!(store.utxos(&account.account.id).unwrap().len(), 2);
        assert_eq!(store.addresses(&account.account.id, true).unwrap().len(), 20);
    }

    #[tokio::test]
    async fn walks_segwit_then_legacy() {
        let mut source = Source::default();
        source.fund(&address_of(49, 0, 0, 0), 1, 1_000);
        source.fund(&address_of(49, 1, 1, 3), 2, 2_000);
        source.fund(&address_of(44, 0, 0, 4), 3, 3_000);
        let store = MemoryStore::new();
        let found = AccountDiscovery::new(&source, &Device, Network::Mainnet)
            .discover(&store)
            .await
            .unwrap();

        let order: Vec<(bool, u32)> = found
            .iter()
            .map(|f| (f.account.legacy, f.account.index))
            .collect();
        assert_eq!(order, vec![(false, 0), (false, 1), (true, 0)]);
        assert_eq!(found[1].account.balance, 2_000);
        assert_eq!(found[2].account.balance, 3_000);
        assert_eq!(store.accounts().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn gap_limit_is_configurable() {
        let source = Source::default();
        let store = MemoryStore::new();
        let found = AccountDiscovery::new(&source, &Device, Network::Mainnet)
            .with_gap_limit(5)
            .discover(&store)
            .await
            .unwrap();
        assert_eq!(found[0].addresses.len(), 10);
    }

    #[tokio::test]
    async fn scan_queries_confirmed_and_mempool() {
        let source = Source::default();
        let account = Account::from_xpub(&account_xpub(49, 0), 0, false).unwrap();
        AccountDiscovery::new(&source, &Device, Network::Mainnet)
            .scan(account)
            .await
            .unwrap();
        // one empty batch per chain, two queries each
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
    }
}
