//! # vigil-wallet: watch-only wallet core for a hardware signing device.
//!
//! Discovers accounts from public keys exported by the device, tracks their
//! history and balances, selects coins and composes unsigned transactions
//! for the device to sign, and keeps user labels in sync with an encrypted
//! remote copy.
//!
//! # Modules
//!
//! - [`error`]: `WalletError` enum
//! - [`fee`]: Size-based fee estimation and fee levels
//! - [`balance`]: Transaction classification, UTXOs and balances
//! - [`coin_selection`]: FIFO UTXO selection
//! - [`builder`]: Unsigned transaction composition with change
//! - [`discovery`]: Gap-limit account and address discovery
//! - [`encryption`]: Label key derivation and AES-256-GCM sealing
//! - [`metadata`]: Versioned label documents
//! - [`label_sync`]: Local/remote label synchronisation
//! - [`store`]: In-memory repositories and on-disk label documents
//! - [`config`]: Layered configuration and persisted wallet state
//! - [`wallet`]: High-level wallet composition

pub mod balance;
pub mod builder;
pub mod coin_selection;
pub mod config;
pub mod discovery;
pub mod encryption;
pub mod error;
pub mod fee;
pub mod label_sync;
pub mod metadata;
pub mod store;
pub mod wallet;

// Re-exports for convenient access
pub use balance::{AccountSummary, TxDirection};
pub use builder::{ChangeOutput, ComposedTransaction, TransactionComposer};
pub use coin_selection::{CoinSelect, FifoSelector, Recipient, Selection, SelectionStrategy};
pub use crate::config::{WalletConfig, WalletState};
pub use discovery::{AccountDiscovery, AccountState, DiscoveredAccount};
pub use encryption::{LabelKeys, MasterKey, decrypt, encrypt};
pub use error::WalletError;
pub use fee::{FeeLevel, OutputType};
pub use label_sync::{LabelSync, SyncOutcome};
pub use metadata::{AccountMetadata, LabelField, LabelPatch};
pub use store::{FileMetadataStore, MemoryStore, WalletStore};
pub use wallet::Wallet;
