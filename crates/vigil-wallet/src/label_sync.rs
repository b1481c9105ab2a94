//! Encrypted label synchronization.
//!
//! Each account has one encrypted [`AccountMetadata`] document, stored
//! locally through a [`MetadataRepository`] and remotely in a
//! [`RemoteBlobStore`] under a filename derived from the master key.
//!
//! The protocol is download-merge-upload with last writer wins:
//!
//! - [`LabelSync::enable`] downloads every account's document and
//!   overwrites the local label columns with it.
//! - Every edit loads the local document, applies one field change,
//!   re-encrypts and saves it, updates the label column, then uploads with
//!   overwrite. A failed save leaves both the document and the column as
//!   they were.
//!
//! Edits on the same account are serialized by a per-account lock. Two
//! devices editing the same account concurrently still lose one update:
//! whichever uploads last wins.
//!
//! Missing remote files, transport errors and undecryptable documents are
//! logged and treated as "no metadata". An unsupported document version
//! switches labeling off for that account until the next `enable`.

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use vigil_core::traits::{
    AccountRepository, AddressRepository, MetadataRepository, RemoteBlobStore,
    TransactionRepository,
};
use vigil_core::types::{Account, Txid};

use crate::encryption::{LabelKeys, MasterKey};
use crate::error::WalletError;
use crate::metadata::{AccountMetadata, LabelField, LabelPatch};
use crate::store::WalletStore;

/// What `enable` found for one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Remote document decrypted and written to the local labels.
    Applied,
    /// No remote document yet.
    Absent,
    /// Download, decryption or parsing failed; local labels untouched.
    Failed(String),
    /// Document version not supported; labeling is off for this account.
    Unavailable(String),
}

pub struct LabelSync {
    master_key: MasterKey,
    store: Arc<dyn WalletStore>,
    documents: Arc<dyn MetadataRepository>,
    remote: Arc<dyn RemoteBlobStore>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    /// Account id to the offending document version.
    unavailable: DashMap<String, String>,
}

impl LabelSync {
    pub fn new(
        master_key: MasterKey,
        store: Arc<dyn WalletStore>,
        documents: Arc<dyn MetadataRepository>,
        remote: Arc<dyn RemoteBlobStore>,
    ) -> Self {
        Self {
            master_key,
            store,
            documents,
            remote,
            locks: DashMap::new(),
            unavailable: DashMap::new(),
        }
    }

    pub fn keys(&self, account: &Account) -> LabelKeys {
        self.master_key.label_keys(account.xpub())
    }

    pub fn is_available(&self, account_id: &str) -> bool {
        !self.unavailable.contains_key(account_id)
    }

    fn lock_for(&self, account_id: &str) -> Arc<Mutex<()>> {
        self.locks.entry(account_id.to_string()).or_default().clone()
    }

    fn mark_unavailable(&self, account: &Account, version: &str) {
        error!(account = %account.id, version, "unsupported label document, labeling disabled");
        self.unavailable.insert(account.id.clone(), version.to_string());
    }

    /// Pull every account's remote document and overwrite local labels.
    ///
    /// Never fails as a whole; each account's result is reported.
    pub async fn enable(&self, accounts: &[Account]) -> Vec<(String, SyncOutcome)> {
        let mut report = Vec::with_capacity(accounts.len());
        for account in accounts {
            self.unavailable.remove(&account.id);
            let lock = self.lock_for(&account.id);
            let _guard = lock.lock().await;
            let outcome = self.pull(account).await;
            report.push((account.id.clone(), outcome));
        }
        info!(accounts = report.len(), "label sync enabled");
        report
    }

    async fn pull(&self, account: &Account) -> SyncOutcome {
        let keys = self.keys(account);
        let filename = keys.filename();

        match self.remote.exists(filename).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(account = %account.id, filename, "no remote label document");
                return SyncOutcome::Absent;
            }
            Err(e) => {
                warn!(account = %account.id, filename, error = %e, "label document lookup failed");
                return SyncOutcome::Failed(e.to_string());
            }
        }

        let sealed = match self.remote.download(filename).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(account = %account.id, filename, error = %e, "label download failed");
                return SyncOutcome::Failed(e.to_string());
            }
        };

        let doc = match keys.decrypt(&sealed).and_then(|plain| AccountMetadata::from_json(&plain)) {
            Ok(doc) => doc,
            Err(WalletError::MetadataVersionMismatch(version)) => {
                self.mark_unavailable(account, &version);
                return SyncOutcome::Unavailable(version);
            }
            Err(e) => {
                warn!(account = %account.id, filename, error = %e, "remote label document unreadable");
                return SyncOutcome::Failed(e.to_string());
            }
        };

        if let Err(e) = self.documents.save_document(filename, &sealed) {
            warn!(account = %account.id, error = %e, "failed to store label document");
            return SyncOutcome::Failed(e.to_string());
        }
        if let Err(e) = self.apply_document(account, &doc) {
            warn!(account = %account.id, error = %e, "failed to apply labels");
            return SyncOutcome::Failed(e.to_string());
        }
        debug!(
            account = %account.id,
            addresses = doc.address_labels.len(),
            transactions = doc.output_labels.len(),
            "remote labels applied"
        );
        SyncOutcome::Applied
    }

    /// Overwrite the local label columns with `doc`.
    ///
    /// Every known address and output of the account ends up with the
    /// document's label, or none when the document has no entry for it.
    fn apply_document(&self, account: &Account, doc: &AccountMetadata) -> Result<(), WalletError> {
        self.store
            .set_account_label(&account.id, doc.account_label.as_deref())?;

        for is_change in [false, true] {
            for record in self.store.addresses(&account.id, is_change)? {
                self.store
                    .set_address_label(&record.address, doc.address_label(&record.address))?;
            }
        }
        for address in doc.address_labels.keys() {
            if !matches!(self.store.address(address)?, Some(record) if record.account_id == account.id) {
                debug!(account = %account.id, address, "label for unknown address skipped");
            }
        }

        let mut outpoints: BTreeSet<(Txid, u32)> = BTreeSet::new();
        for tx in self.store.transactions(&account.id)? {
            outpoints.extend(tx.outputs.iter().map(|o| (tx.txid, o.index)));
        }
        for utxo in self.store.utxos(&account.id)? {
            outpoints.insert((utxo.txid, utxo.output_index));
        }
        for (txid, outputs) in &doc.output_labels {
            outpoints.extend(outputs.keys().map(|index| (*txid, *index)));
        }
        for (txid, index) in outpoints {
            self.store
                .set_output_label(&txid, index, doc.output_label(&txid, index))?;
        }
        Ok(())
    }

    /// The local document, or an empty one if absent or unreadable.
    fn read_local(&self, account: &Account, keys: &LabelKeys) -> Result<AccountMetadata, WalletError> {
        let Some(sealed) = self.documents.load_document(keys.filename())? else {
            return Ok(AccountMetadata::new());
        };
        match keys.decrypt(&sealed).and_then(|plain| AccountMetadata::from_json(&plain)) {
            Ok(doc) => Ok(doc),
            Err(WalletError::MetadataVersionMismatch(version)) => {
                self.mark_unavailable(account, &version);
                Err(WalletError::MetadataVersionMismatch(version))
            }
            Err(e) => {
                warn!(account = %account.id, error = %e, "local label document unreadable, starting empty");
                Ok(AccountMetadata::new())
            }
        }
    }

    /// The account's current local document, if it can be read.
    pub fn document(&self, account: &Account) -> Option<AccountMetadata> {
        self.read_local(account, &self.keys(account)).ok()
    }

    async fn edit(
        &self,
        account: &Account,
        field: LabelField,
        label: Option<String>,
    ) -> Result<LabelPatch, WalletError> {
        if !self.is_available(&account.id) {
            return Err(WalletError::LabelingUnavailable(account.id.clone()));
        }
        let lock = self.lock_for(&account.id);
        let _guard = lock.lock().await;

        let keys = self.keys(account);
        let current = self.read_local(account, &keys)?;
        let (next, patch) = current.with_label(field, label);

        // Column writes only follow a saved document.
        let sealed = keys.encrypt(&next.to_json()?)?;
        self.documents.save_document(keys.filename(), &sealed)?;

        match &patch.field {
            LabelField::Account => self
                .store
                .set_account_label(&account.id, patch.new.as_deref())?,
            LabelField::Address(address) => self
                .store
                .set_address_label(address, patch.new.as_deref())?,
            LabelField::Output { txid, index } => self
                .store
                .set_output_label(txid, *index, patch.new.as_deref())?,
        }

        if let Err(e) = self.remote.upload(keys.filename(), &sealed, true).await {
            warn!(account = %account.id, filename = keys.filename(), error = %e, "label upload failed");
        } else {
            debug!(account = %account.id, filename = keys.filename(), "label document uploaded");
        }
        Ok(patch)
    }

    pub async fn set_account_label(
        &self,
        account: &Account,
        label: Option<String>,
    ) -> Result<LabelPatch, WalletError> {
        self.edit(account, LabelField::Account, label).await
    }

    pub async fn set_address_label(
        &self,
        account: &Account,
        address: &str,
        label: Option<String>,
    ) -> Result<LabelPatch, WalletError> {
        self.edit(account, LabelField::Address(address.to_string()), label)
            .await
    }

    pub async fn set_output_label(
        &self,
        account: &Account,
        txid: Txid,
        index: u32,
        label: Option<String>,
    ) -> Result<LabelPatch, WalletError> {
        self.edit(account, LabelField::Output { txid, index }, label)
            .await
    }

    /// Delete the local documents of `accounts`. Remote copies stay.
    pub fn forget(&self, accounts: &[Account]) -> Result<(), WalletError> {
        for account in accounts {
            self.documents.delete_document(self.keys(account).filename())?;
            self.unavailable.remove(&account.id);
            self.locks.remove(&account.id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use vigil_core::error::{BlobStoreError, StoreError};
    use vigil_core::types::{Address, Utxo};

    use crate::store::MemoryStore;

    const MASTER_KEY: &str = "20c8bf0701213cdcf4c2f56fd0096c1772322d42fb9c4d0ddf6bb122d713d2f3";
    const XPUB: &str = "xpub6BiVtCpG9fQPxnPmHXG8PhtzQdWC2Su4qWu6XW9tpWFYhxydCLJGrWBJZ5H6qTAHdPQ7pQhtpjiYZVZARo14qHiay2fvrX996oEP42u8wZy";
    const FILENAME: &str = "08108c3a46882bb71a5df59f4962e02f89a63efb1cf5f32ded94694528be6cec.mtdt";
    const ADDR: &str = "3LtwqexYviExNmSPzZ9tJRNFAjPw4qBwZ2";

    #[derive(Default)]
    struct Blobs {
        files: parking_lot::Mutex<HashMap<String, Vec<u8>>>,
        offline: AtomicBool,
        /// When set, the next upload stalls before it lands.
        stall_next_upload: AtomicBool,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl Blobs {
        fn check(&self) -> Result<(), BlobStoreError> {
            if self.offline.load(Ordering::SeqCst) {
                return Err(BlobStoreError::Transport("offline".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl RemoteBlobStore for Blobs {
        async fn exists(&self, filename: &str) -> Result<bool, BlobStoreError> {
            self.check()?;
            Ok(self.files.lock().contains_key(filename))
        }

        async fn download(&self, filename: &str) -> Result<Vec<u8>, BlobStoreError> {
            self.check()?;
            self.files
                .lock()
                .get(filename)
                .cloned()
                .ok_or_else(|| BlobStoreError::NotFound(filename.into()))
        }

        async fn upload(&self, filename: &str, bytes: &[u8], overwrite: bool) -> Result<(), BlobStoreError> {
            self.check()?;
            let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(running, Ordering::SeqCst);
            if self.stall_next_upload.swap(false, Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            let result = {
                let mut files = self.files.lock();
                if !overwrite && files.contains_key(filename) {
                    Err(BlobStoreError::AlreadyExists(filename.into()))
                } else {
                    files.insert(filename.into(), bytes.to_vec());
                    Ok(())
                }
            };
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    /// Document store whose writes always fail.
    struct ReadOnlyDocuments;

    impl MetadataRepository for ReadOnlyDocuments {
        fn load_document(&self, _filename: &str) -> Result<Option<Vec<u8>>, StoreError> {
            Ok(None)
        }

        fn save_document(&self, filename: &str, _bytes: &[u8]) -> Result<(), StoreError> {
            Err(StoreError::Backend(format!("{filename}: read-only")))
        }

        fn delete_document(&self, _filename: &str) -> Result<(), StoreError> {
            Ok(())
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        blobs: Arc<Blobs>,
        sync: LabelSync,
        account: Account,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let blobs = Arc::new(Blobs::default());
        let account = Account::from_xpub(XPUB, 0, false).unwrap();
        let address = Address {
            address: ADDR.into(),
            account_id: account.id.clone(),
            is_change: true,
            index: 0,
            label: None,
            total_received: 0,
        };
        store.save_discovered(&account, &[address], &[]).unwrap();
        let sync = LabelSync::new(
            MasterKey::from_hex(MASTER_KEY).unwrap(),
            store.clone(),
            store.clone(),
            blobs.clone(),
        );
        Fixture {
            store,
            blobs,
            sync,
            account,
        }
    }

    fn seal(f: &Fixture, doc: &AccountMetadata) -> Vec<u8> {
        f.sync.keys(&f.account).encrypt(&doc.to_json().unwrap()).unwrap()
    }

    #[test]
    fn filename_matches_fixture() {
        let f = fixture();
        assert_eq!(f.sync.keys(&f.account).filename(), FILENAME);
    }

    #[tokio::test]
    async fn edit_writes_local_and_remote() {
        let f = fixture();
        let patch = f
            .sync
            .set_account_label(&f.account, Some("Savings".into()))
            .await
            .unwrap();
        assert_eq!(patch.old, None);
        assert_eq!(patch.new.as_deref(), Some("Savings"));

        let stored = f.store.account(&f.account.id).unwrap().unwrap();
        assert_eq!(stored.label.as_deref(), Some("Savings"));

        let remote = f.blobs.files.lock().get(FILENAME).cloned().unwrap();
        assert_eq!(f.store.load_document(FILENAME).unwrap(), Some(remote.clone()));
        let plain = f.sync.keys(&f.account).decrypt(&remote).unwrap();
        let doc = AccountMetadata::from_json(&plain).unwrap();
        assert_eq!(doc.account_label.as_deref(), Some("Savings"));
    }

    #[tokio::test]
    async fn edits_accumulate_in_document() {
        let f = fixture();
        f.sync
            .set_address_label(&f.account, ADDR, Some("rent".into()))
            .await
            .unwrap();
        f.sync
            .set_output_label(&f.account, Txid([7; 32]), 1, Some("".into()))
            .await
            .unwrap();

        let doc = f.sync.document(&f.account).unwrap();
        assert_eq!(doc.address_label(ADDR), Some("rent"));
        assert_eq!(doc.output_label(&Txid([7; 32]), 1), Some(""));
        assert_eq!(
            f.store.address(ADDR).unwrap().unwrap().label.as_deref(),
            Some("rent")
        );
    }

    #[tokio::test]
    async fn upload_failure_still_succeeds_locally() {
        let f = fixture();
        f.blobs.offline.store(true, Ordering::SeqCst);
        f.sync
            .set_account_label(&f.account, Some("Offline".into()))
            .await
            .unwrap();
        assert!(f.blobs.files.lock().is_empty());
        assert_eq!(
            f.sync.document(&f.account).unwrap().account_label.as_deref(),
            Some("Offline")
        );
    }

    #[tokio::test]
    async fn enable_applies_remote_labels() {
        let f = fixture();
        let (doc, _) = AccountMetadata::new().with_account_label(Some("Remote".into()));
        let (doc, _) = doc.with_address_label(ADDR, Some("from phone".into()));
        let (doc, _) = doc.with_address_label("1UnknownAddress", Some("ignored".into()));
        let (doc, _) = doc.with_output_label(Txid([3; 32]), 0, Some("coffee".into()));
        f.blobs.files.lock().insert(FILENAME.into(), seal(&f, &doc));
        f.store
            .replace_utxos(&f.account.id, &[Utxo {
                account_id: f.account.id.clone(),
                txid: Txid([3; 32]),
                output_index: 0,
                address: ADDR.into(),
                value: 1000,
                is_mine: true,
                is_change: true,
                label: None,
                block_height: Some(1),
            }])
            .unwrap();

        let report = f.sync.enable(std::slice::from_ref(&f.account)).await;
        assert_eq!(report, vec![(f.account.id.clone(), SyncOutcome::Applied)]);

        let stored = f.store.account(&f.account.id).unwrap().unwrap();
        assert_eq!(stored.label.as_deref(), Some("Remote"));
        assert_eq!(
            f.store.address(ADDR).unwrap().unwrap().label.as_deref(),
            Some("from phone")
        );
        assert_eq!(
            f.store.utxos(&f.account.id).unwrap()[0].label.as_deref(),
            Some("coffee")
        );
        assert_eq!(f.sync.document(&f.account), Some(doc));
    }

    #[tokio::test]
    async fn enable_without_remote_is_absent() {
        let f = fixture();
        let report = f.sync.enable(std::slice::from_ref(&f.account)).await;
        assert_eq!(report[0].1, SyncOutcome::Absent);
    }

    #[tokio::test]
    async fn tampered_remote_is_not_applied() {
        let f = fixture();
        let (doc, _) = AccountMetadata::new().with_account_label(Some("Remote".into()));
        let mut sealed = seal(&f, &doc);
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        f.blobs.files.lock().insert(FILENAME.into(), sealed);

        let report = f.sync.enable(std::slice::from_ref(&f.account)).await;
        assert!(matches!(report[0].1, SyncOutcome::Failed(_)));
        assert_eq!(f.store.account(&f.account.id).unwrap().unwrap().label, None);
        assert!(f.sync.is_available(&f.account.id));
    }

    #[tokio::test]
    async fn enable_survives_transport_errors() {
        let f = fixture();
        f.blobs.offline.store(true, Ordering::SeqCst);
        let report = f.sync.enable(std::slice::from_ref(&f.account)).await;
        assert!(matches!(report[0].1, SyncOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn version_mismatch_disables_account() {
        let f = fixture();
        let doc = AccountMetadata {
            version: "2.0.0".into(),
            ..AccountMetadata::new()
        };
        f.blobs.files.lock().insert(FILENAME.into(), seal(&f, &doc));

        let report = f.sync.enable(std::slice::from_ref(&f.account)).await;
        assert_eq!(report[0].1, SyncOutcome::Unavailable("2.0.0".into()));
        assert!(!f.sync.is_available(&f.account.id));

        let err = f
            .sync
            .set_account_label(&f.account, Some("x".into()))
            .await
            .unwrap_err();
        assert_eq!(err, WalletError::LabelingUnavailable(f.account.id.clone()));
        assert_eq!(f.store.account(&f.account.id).unwrap().unwrap().label, None);

        // Resolved remotely, then re-enabled.
        f.blobs.files.lock().clear();
        f.sync.enable(std::slice::from_ref(&f.account)).await;
        assert!(f.sync.is_available(&f.account.id));
    }

    #[tokio::test]
    async fn local_version_mismatch_fails_edit() {
        let f = fixture();
        let doc = AccountMetadata {
            version: "0.9.0".into(),
            ..AccountMetadata::new()
        };
        f.store.save_document(FILENAME, &seal(&f, &doc)).unwrap();
        let err = f
            .sync
            .set_account_label(&f.account, Some("x".into()))
            .await
            .unwrap_err();
        assert_eq!(err, WalletError::MetadataVersionMismatch("0.9.0".into()));
        assert!(!f.sync.is_available(&f.account.id));
    }

    #[tokio::test]
    async fn concurrent_edits_on_one_account_are_serialized() {
        let f = fixture();
        // The first edit's upload lands after the second edit would have
        // uploaded, so an unserialized pair leaves the stale document remote.
        f.blobs.stall_next_upload.store(true, Ordering::SeqCst);

        let (first, second) = tokio::join!(
            f.sync.set_address_label(&f.account, ADDR, Some("rent".into())),
            f.sync.set_output_label(&f.account, Txid([9; 32]), 0, Some("salary".into())),
        );
        first.unwrap();
        second.unwrap();

        assert_eq!(f.blobs.max_in_flight.load(Ordering::SeqCst), 1);
        let remote = f.blobs.files.lock().get(FILENAME).cloned().unwrap();
        let plain = f.sync.keys(&f.account).decrypt(&remote).unwrap();
        let doc = AccountMetadata::from_json(&plain).unwrap();
        assert_eq!(doc.address_label(ADDR), Some("rent"));
        assert_eq!(doc.output_label(&Txid([9; 32]), 0), Some("salary"));
    }

    #[tokio::test]
    async fn enable_clears_labels_missing_from_remote() {
        let f = fixture();
        let outpoint_txid = Txid([4; 32]);
        f.store
            .replace_utxos(&f.account.id, &[Utxo {
                account_id: f.account.id.clone(),
                txid: outpoint_txid,
                output_index: 1,
                address: ADDR.into(),
                value: 5000,
                is_mine: true,
                is_change: true,
                label: None,
                block_height: Some(2),
            }])
            .unwrap();
        f.store.set_account_label(&f.account.id, Some("LocalAcct")).unwrap();
        f.store.set_address_label(ADDR, Some("local only")).unwrap();
        f.store.set_output_label(&outpoint_txid, 1, Some("local out")).unwrap();
        f.blobs
            .files
            .lock()
            .insert(FILENAME.into(), seal(&f, &AccountMetadata::new()));

        let report = f.sync.enable(std::slice::from_ref(&f.account)).await;
        assert_eq!(report[0].1, SyncOutcome::Applied);

        assert_eq!(f.store.account(&f.account.id).unwrap().unwrap().label, None);
        assert_eq!(f.store.address(ADDR).unwrap().unwrap().label, None);
        assert_eq!(f.store.utxos(&f.account.id).unwrap()[0].label, None);
        assert_eq!(f.sync.document(&f.account), Some(AccountMetadata::new()));
    }

    #[tokio::test]
    async fn failed_document_save_leaves_label_untouched() {
        let f = fixture();
        let sync = LabelSync::new(
            MasterKey::from_hex(MASTER_KEY).unwrap(),
            f.store.clone(),
            Arc::new(ReadOnlyDocuments),
            f.blobs.clone(),
        );

        let err = sync
            .set_address_label(&f.account, ADDR, Some("rent".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::Store(StoreError::Backend(_))));
        assert_eq!(f.store.address(ADDR).unwrap().unwrap().label, None);
        assert!(f.blobs.files.lock().is_empty());
    }

    #[tokio::test]
    async fn forget_deletes_local_documents() {
        let f = fixture();
        f.sync
            .set_account_label(&f.account, Some("Savings".into()))
            .await
            .unwrap();
        f.sync.forget(std::slice::from_ref(&f.account)).unwrap();
        assert_eq!(f.store.load_document(FILENAME).unwrap(), None);
        assert!(f.blobs.files.lock().contains_key(FILENAME));
    }
}
