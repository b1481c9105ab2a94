//! Wallet error types.

use vigil_core::error::{
    AddressError, BlobStoreError, DeviceError, KeyError, SourceError, StoreError,
};
use thiserror::Error;

/// Errors that can occur in wallet operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    /// Insufficient funds to cover the payment amount plus fees.
    #[error("insufficient funds: have {have}, need {need}")]
    InsufficientFunds {
        /// Available value in satoshis.
        have: u64,
        /// Required amount in satoshis.
        need: u64,
    },

    /// No UTXOs available for spending.
    #[error("no UTXOs available")]
    NoUtxos,

    /// Invalid monetary amount.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Destination address whose output size cannot be determined.
    #[error("unrecognized output address: {0}")]
    UnrecognizedOutput(String),

    /// A selected input's previous transaction is not in local history.
    #[error("previous transaction missing: {0}")]
    MissingPreviousTransaction(String),

    /// Label document written by an unsupported format version.
    #[error("unsupported metadata version: {0}")]
    MetadataVersionMismatch(String),

    /// Labeling is switched off for this account after a fatal document error.
    #[error("labeling unavailable for account {0}")]
    LabelingUnavailable(String),

    /// Encryption failure.
    #[error("encryption: {0}")]
    Encryption(String),

    /// Authentication tag mismatch or malformed ciphertext.
    #[error("decryption: {0}")]
    Decryption(String),

    /// Transaction composition error.
    #[error("build error: {0}")]
    BuildError(String),

    /// Serialization error.
    #[error("serialization: {0}")]
    Serialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    IoError(String),

    /// Configuration could not be loaded.
    #[error("config: {0}")]
    Config(String),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Address(#[from] AddressError),

    /// Transport failure from the transaction source; never retried here.
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    BlobStore(#[from] BlobStoreError),

    #[error(transparent)]
    Device(#[from] DeviceError),
}
