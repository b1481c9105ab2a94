//! Repository implementations.
//!
//! [`MemoryStore`] keeps everything behind one `RwLock`, so every write is
//! trivially all-or-nothing. [`FileMetadataStore`] keeps encrypted label
//! documents as files in a directory.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use vigil_core::error::StoreError;
use vigil_core::traits::{
    AccountRepository, AddressRepository, MetadataRepository, TransactionRepository,
};
use vigil_core::types::{Account, Address, OutPoint, Tx, Txid, Utxo};

/// Everything the wallet persists about accounts, addresses and history.
pub trait WalletStore: AccountRepository + AddressRepository + TransactionRepository {}

impl<T> WalletStore for T where T: AccountRepository + AddressRepository + TransactionRepository {}

#[derive(Default)]
struct Inner {
    accounts: Vec<Account>,
    addresses: BTreeMap<String, Address>,
    transactions: HashMap<String, Vec<Tx>>,
    utxos: HashMap<String, Vec<Utxo>>,
    output_labels: HashMap<OutPoint, String>,
    documents: HashMap<String, Vec<u8>>,
}

impl Inner {
    fn merge_transactions(&mut self, account_id: &str, txs: &[Tx]) {
        let stored = self.transactions.entry(account_id.to_string()).or_default();
        for tx in txs {
            match stored.iter_mut().find(|t| t.txid == tx.txid) {
                Some(existing) => *existing = tx.clone(),
                None => stored.push(tx.clone()),
            }
        }
        stored.sort_by_key(|t| t.age_key());
    }

    fn upsert_addresses(&mut self, addresses: &[Address]) {
        for address in addresses {
            let label = self
                .addresses
                .get(&address.address)
                .and_then(|a| a.label.clone());
            let mut next = address.clone();
            if next.label.is_none() {
                next.label = label;
            }
            self.addresses.insert(next.address.clone(), next);
        }
    }

    fn with_output_label(&self, mut utxo: Utxo) -> Utxo {
        if let Some(label) = self.output_labels.get(&utxo.outpoint()) {
            utxo.label = Some(label.clone());
        }
        utxo
    }
}

/// In-memory store implementing every repository trait.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AccountRepository for MemoryStore {
    fn accounts(&self) -> Result<Vec<Account>, StoreError> {
        let mut accounts = self.inner.read().accounts.clone();
        accounts.sort_by_key(|a| (a.legacy, a.index));
        Ok(accounts)
    }

    fn account(&self, id: &str) -> Result<Option<Account>, StoreError> {
        Ok(self.inner.read().accounts.iter().find(|a| a.id == id).cloned())
    }

    fn save_discovered(
        &self,
        account: &Account,
        addresses: &[Address],
        txs: &[Tx],
    ) -> Result<(), StoreError> {
        if let Some(stray) = addresses.iter().find(|a| a.account_id != account.id) {
            return Err(StoreError::Backend(format!(
                "address {} belongs to {}",
                stray.address, stray.account_id
            )));
        }

        let mut inner = self.inner.write();
        match inner.accounts.iter_mut().find(|a| a.id == account.id) {
            Some(existing) => {
                let label = existing.label.take();
                *existing = account.clone();
                existing.label = existing.label.clone().or(label);
            }
            None => inner.accounts.push(account.clone()),
        }
        inner.upsert_addresses(addresses);
        inner.merge_transactions(&account.id, txs);
        Ok(())
    }

    fn set_account_label(&self, id: &str, label: Option<&str>) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let account = inner
            .accounts
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("account {id}")))?;
        account.label = label.map(str::to_string);
        Ok(())
    }

    fn set_account_balance(&self, id: &str, balance: u64) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let account = inner
            .accounts
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("account {id}")))?;
        account.balance = balance;
        Ok(())
    }

    fn forget_all(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let documents = std::mem::take(&mut inner.documents);
        *inner = Inner {
            documents,
            ..Inner::default()
        };
        Ok(())
    }
}

impl AddressRepository for MemoryStore {
    fn addresses(&self, account_id: &str, is_change: bool) -> Result<Vec<Address>, StoreError> {
        let mut addresses: Vec<Address> = self
            .inner
            .read()
            .addresses
            .values()
            .filter(|a| a.account_id == account_id && a.is_change == is_change)
            .cloned()
            .collect();
        addresses.sort_by_key(|a| a.index);
        Ok(addresses)
    }

    fn address(&self, address: &str) -> Result<Option<Address>, StoreError> {
        Ok(self.inner.read().addresses.get(address).cloned())
    }

    fn upsert_addresses(&self, addresses: &[Address]) -> Result<(), StoreError> {
        self.inner.write().upsert_addresses(addresses);
        Ok(())
    }

    fn set_address_label(&self, address: &str, label: Option<&str>) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let record = inner
            .addresses
            .get_mut(address)
            .ok_or_else(|| StoreError::NotFound(format!("address {address}")))?;
        record.label = label.map(str::to_string);
        Ok(())
    }
}

impl TransactionRepository for MemoryStore {
    fn save_transactions(&self, account_id: &str, txs: &[Tx]) -> Result<(), StoreError> {
        self.inner.write().merge_transactions(account_id, txs);
        Ok(())
    }

    fn transactions(&self, account_id: &str) -> Result<Vec<Tx>, StoreError> {
        Ok(self
            .inner
            .read()
            .transactions
            .get(account_id)
            .cloned()
            .unwrap_or_default())
    }

    fn transaction(&self, txid: &Txid) -> Result<Option<Tx>, StoreError> {
        Ok(self
            .inner
            .read()
            .transactions
            .values()
            .flatten()
            .find(|tx| tx.txid == *txid)
            .cloned())
    }

    fn replace_utxos(&self, account_id: &str, utxos: &[Utxo]) -> Result<(), StoreError> {
        let mut sorted = utxos.to_vec();
        sorted.sort_by_key(|u| u.block_height.unwrap_or(u64::MAX));
        self.inner.write().utxos.insert(account_id.to_string(), sorted);
        Ok(())
    }

    fn utxos(&self, account_id: &str) -> Result<Vec<Utxo>, StoreError> {
        let inner = self.inner.read();
        Ok(inner
            .utxos
            .get(account_id)
            .map(|utxos| {
                utxos
                    .iter()
                    .map(|u| inner.with_output_label(u.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn mark_spent(&self, outpoints: &[OutPoint]) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        for utxos in inner.utxos.values_mut() {
            utxos.retain(|u| !outpoints.contains(&u.outpoint()));
        }
        Ok(())
    }

    fn set_output_label(
        &self,
        txid: &Txid,
        index: u32,
        label: Option<&str>,
    ) -> Result<(), StoreError> {
        let outpoint = OutPoint { txid: *txid, index };
        let mut inner = self.inner.write();
        match label {
            Some(label) => inner.output_labels.insert(outpoint, label.to_string()),
            None => inner.output_labels.remove(&outpoint),
        };
        Ok(())
    }
}

impl MetadataRepository for MemoryStore {
    fn load_document(&self, filename: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.inner.read().documents.get(filename).cloned())
    }

    fn save_document(&self, filename: &str, bytes: &[u8]) -> Result<(), StoreError> {
        self.inner
            .write()
            .documents
            .insert(filename.to_string(), bytes.to_vec());
        Ok(())
    }

    fn delete_document(&self, filename: &str) -> Result<(), StoreError> {
        self.inner.write().documents.remove(filename);
        Ok(())
    }
}

/// Label documents stored as files under one directory.
pub struct FileMetadataStore {
    dir: PathBuf,
}

impl FileMetadataStore {
    /// Open (and create if needed) the document directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| io_error(&dir, e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, filename: &str) -> Result<PathBuf, StoreError> {
        if filename.is_empty()
            || filename.contains(['/', '\\'])
            || filename == "."
            || filename == ".."
        {
            return Err(StoreError::Backend(format!("invalid document name: {filename:?}")));
        }
        Ok(self.dir.join(filename))
    }
}

fn io_error(path: &Path, e: io::Error) -> StoreError {
    StoreError::Backend(format!("{}: {e}", path.display()))
}

impl MetadataRepository for FileMetadataStore {
    fn load_document(&self, filename: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path(filename)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    fn save_document(&self, filename: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.path(filename)?;
        let tmp = path.with_extension("tmp");
        let mut file = fs::File::create(&tmp).map_err(|e| io_error(&tmp, e))?;
        file.write_all(bytes).map_err(|e| io_error(&tmp, e))?;
        file.sync_all().map_err(|e| io_error(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| io_error(&path, e))
    }

    fn delete_document(&self, filename: &str) -> Result<(), StoreError> {
        let path = self.path(filename)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&path, e)),
        }
    }
}
