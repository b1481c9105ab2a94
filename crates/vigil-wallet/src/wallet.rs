//! Wallet composition: discovery, balances, payments, labels.
//!
//! The [`Wallet`] ties the store, the transaction source, the signing
//! device and the configuration together. It owns the [`WalletState`]
//! record for the duration of a session; callers load it at start and
//! save it (see [`Wallet::save_state`]) on shutdown.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};
use vigil_core::error::StoreError;
use vigil_core::traits::{
    AccountRepository, AddressRepository, MetadataRepository, RemoteBlobStore, SigningDevice,
    TransactionRepository, TransactionSource,
};
use vigil_core::types::{Account, Address, Txid};

use crate::balance::{self, AccountSummary};
use crate::builder::{ComposedTransaction, TransactionComposer, next_change_index};
use crate::coin_selection::Recipient;
use crate::config::{WalletConfig, WalletState};
use crate::discovery::{AccountDiscovery, DiscoveredAccount, persist};
use crate::encryption::MasterKey;
use crate::error::WalletError;
use crate::fee::{FeeLevel, fee_rate_from_btc_per_kb};
use crate::label_sync::{LabelSync, SyncOutcome};
use crate::store::WalletStore;

/// Watch-only wallet over a hardware signing device.
pub struct Wallet {
    config: WalletConfig,
    state: WalletState,
    store: Arc<dyn WalletStore>,
    source: Arc<dyn TransactionSource>,
    device: Arc<dyn SigningDevice>,
    labels: Option<LabelSync>,
}

impl Wallet {
    pub fn new(
        config: WalletConfig,
        state: WalletState,
        store: Arc<dyn WalletStore>,
        source: Arc<dyn TransactionSource>,
        device: Arc<dyn SigningDevice>,
    ) -> Self {
        Self {
            config,
            state,
            store,
            source,
            device,
            labels: None,
        }
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    pub fn state(&self) -> &WalletState {
        &self.state
    }

    /// Persist the session state to `path`.
    pub fn save_state(&self, path: &Path) -> Result<(), WalletError> {
        self.state.save(path)
    }

    pub fn accounts(&self) -> Result<Vec<Account>, WalletError> {
        Ok(self.store.accounts()?)
    }

    fn account(&self, account_id: &str) -> Result<Account, WalletError> {
        self.store
            .account(account_id)?
            .ok_or_else(|| StoreError::NotFound(format!("account {account_id}")).into())
    }

    fn all_addresses(&self, account_id: &str) -> Result<Vec<Address>, WalletError> {
        let mut addresses = self.store.addresses(account_id, false)?;
        addresses.extend(self.store.addresses(account_id, true)?);
        Ok(addresses)
    }

    fn discovery(&self) -> AccountDiscovery<'_> {
        AccountDiscovery::new(self.source.as_ref(), self.device.as_ref(), self.config.network)
            .with_gap_limit(self.config.gap_limit)
    }

    fn note_height(&mut self, found: &DiscoveredAccount) {
        if let Some(height) = found.tip_height() {
            self.state.sync_height = self.state.sync_height.max(height);
        }
    }

    /// Run account discovery and persist every active account.
    ///
    /// With labeling enabled, remote labels of the discovered accounts are
    /// pulled afterwards.
    pub async fn discover(&mut self) -> Result<Vec<Account>, WalletError> {
        let found = self.discovery().discover(self.store.as_ref()).await?;
        for account in &found {
            self.note_height(account);
        }
        let accounts: Vec<Account> = found.into_iter().map(|f| f.account).collect();

        if let Some(labels) = &self.labels {
            labels.enable(&accounts).await;
        }
        info!(accounts = accounts.len(), sync_height = self.state.sync_height, "wallet discovered");
        Ok(accounts)
    }

    /// Rescan one known account from scratch and replace its history.
    pub async fn refresh_account(&mut self, account_id: &str) -> Result<Account, WalletError> {
        let account = self.account(account_id)?;
        let found = self.discovery().scan(account).await?;
        persist(self.store.as_ref(), &found)?;
        self.note_height(&found);
        info!(account = %account_id, balance = found.account.balance, "account refreshed");
        Ok(found.account)
    }

    /// Fetch and cache a fee rate for every [`FeeLevel`], in sat/byte.
    pub async fn refresh_fee_rates(&mut self) -> Result<BTreeMap<FeeLevel, u64>, WalletError> {
        for level in FeeLevel::ALL {
            let btc_per_kb = self.source.estimate_fee_rate(level.target_blocks()).await?;
            self.state
                .fee_rates
                .insert(level, fee_rate_from_btc_per_kb(btc_per_kb));
        }
        Ok(self.state.fee_rates.clone())
    }

    /// Cached rate for `level`, if [`refresh_fee_rates`](Self::refresh_fee_rates) ran.
    pub fn fee_rate(&self, level: FeeLevel) -> Option<u64> {
        self.state.fee_rate(level)
    }

    /// Received and sent totals of an account.
    pub fn account_summary(&self, account_id: &str) -> Result<AccountSummary, WalletError> {
        let txs = self.store.transactions(account_id)?;
        let addresses = self.all_addresses(account_id)?;
        let own: HashSet<&str> = addresses.iter().map(|a| a.address.as_str()).collect();
        Ok(balance::account_summary(&txs, &own))
    }

    /// Select coins and compose an unsigned payment from one account.
    pub fn compose_payment(
        &self,
        account_id: &str,
        recipients: &[Recipient],
        fee_rate: u64,
    ) -> Result<ComposedTransaction, WalletError> {
        let account = self.account(account_id)?;
        let utxos = self.store.utxos(account_id)?;

        let mut composer = TransactionComposer::new(self.config.network);
        composer.set_dust_threshold(self.config.dust_threshold);
        for r in recipients {
            composer.add_recipient(r.address.clone(), r.amount);
        }

        let selector = self
            .config
            .selection_strategy
            .selector(self.config.dust_threshold);
        let selection = selector.select(&utxos, composer.recipients(), fee_rate, account.segwit())?;

        let addresses = self.all_addresses(account_id)?;
        let history = self.store.transactions(account_id)?;
        composer.compose(
            &account,
            selection,
            &addresses,
            &history,
            next_change_index(&addresses),
        )
    }

    /// Compose, sign on the device and broadcast a payment.
    ///
    /// Spent outputs are removed from the local unspent set once the
    /// source accepts the transaction.
    pub async fn send(
        &mut self,
        account_id: &str,
        recipients: &[Recipient],
        fee_rate: u64,
    ) -> Result<Txid, WalletError> {
        let composed = self.compose_payment(account_id, recipients, fee_rate)?;
        let signed = self
            .device
            .sign(&composed.unsigned, &composed.prev_txs)
            .await?;
        let txid = self.source.broadcast(&signed).await?;

        let spent: Vec<_> = composed.selection.utxos.iter().map(|u| u.outpoint()).collect();
        self.store.mark_spent(&spent)?;
        let remaining = balance::account_balance(&self.store.utxos(account_id)?);
        self.store.set_account_balance(account_id, remaining)?;

        info!(
            account = %account_id,
            %txid,
            fee = composed.fee,
            inputs = spent.len(),
            "payment broadcast"
        );
        Ok(txid)
    }

    /// Turn on label sync and pull remote labels for every account.
    pub async fn enable_labeling(
        &mut self,
        master_key: MasterKey,
        documents: Arc<dyn MetadataRepository>,
        remote: Arc<dyn RemoteBlobStore>,
    ) -> Result<Vec<(String, SyncOutcome)>, WalletError> {
        let accounts = self.store.accounts()?;
        let labels = LabelSync::new(master_key, self.store.clone(), documents, remote);
        let report = labels.enable(&accounts).await;
        self.labels = Some(labels);
        self.state.labeling_enabled = true;
        Ok(report)
    }

    pub fn labeling_enabled(&self) -> bool {
        self.labels.is_some()
    }

    pub async fn set_account_label(
        &self,
        account_id: &str,
        label: Option<String>,
    ) -> Result<(), WalletError> {
        match &self.labels {
            Some(labels) => {
                let account = self.account(account_id)?;
                labels.set_account_label(&account, label).await?;
            }
            None => self.store.set_account_label(account_id, label.as_deref())?,
        }
        Ok(())
    }

    pub async fn set_address_label(
        &self,
        address: &str,
        label: Option<String>,
    ) -> Result<(), WalletError> {
        let record = self
            .store
            .address(address)?
            .ok_or_else(|| StoreError::NotFound(format!("address {address}")))?;
        match &self.labels {
            Some(labels) => {
                let account = self.account(&record.account_id)?;
                labels.set_address_label(&account, address, label).await?;
            }
            None => self.store.set_address_label(address, label.as_deref())?,
        }
        Ok(())
    }

    pub async fn set_output_label(
        &self,
        account_id: &str,
        txid: Txid,
        index: u32,
        label: Option<String>,
    ) -> Result<(), WalletError> {
        match &self.labels {
            Some(labels) => {
                let account = self.account(account_id)?;
                labels.set_output_label(&account, txid, index, label).await?;
            }
            None => self.store.set_output_label(&txid, index, label.as_deref())?,
        }
        Ok(())
    }

    /// Drop every account, local label document and device-bound state.
    pub fn forget_device(&mut self) -> Result<(), WalletError> {
        let accounts = self.store.accounts()?;
        if let Some(labels) = self.labels.take() {
            if let Err(e) = labels.forget(&accounts) {
                warn!(error = %e, "failed to delete local label documents");
            }
        }
        self.store.forget_all()?;
        self.state.forget_device();
        info!(accounts = accounts.len(), "device forgotten");
        Ok(())
    }
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet")
            .field("network", &self.config.network)
            .field("sync_height", &self.state.sync_height)
            .field("labeling", &self.labels.is_some())
            .finish_non_exhaustive()
    }
}
