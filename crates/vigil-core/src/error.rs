//! Error types for the Vigil core.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("hardened derivation not supported for index {0:#x}")] HardenedNotSupported(u32),
    #[error("derived scalar is not below the curve order")] ScalarTooLarge,
    #[error("derived point is the point at infinity")] PointAtInfinity,
    #[error("invalid public key bytes")] InvalidPublicKey,
    #[error("invalid extended key: {0}")] InvalidExtendedKey(String),
    #[error("invalid derivation path: {0}")] InvalidPath(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid base58: {0}")] InvalidBase58(String),
    #[error("invalid checksum")] InvalidChecksum,
    #[error("invalid length: {0}")] InvalidLength(usize),
    #[error("unknown version byte: {0:#04x}")] UnknownVersion(u8),
    #[error("invalid bech32: {0}")] InvalidBech32(String),
    #[error("unsupported witness version: {0}")] UnsupportedWitnessVersion(u8),
}

/// Failure reported by a [`TransactionSource`](crate::traits::TransactionSource).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("fetch failed: {0}")] Fetch(String),
    #[error("broadcast rejected: {0}")] Rejected(String),
    #[error("malformed response: {0}")] Malformed(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("not found: {0}")] NotFound(String),
    #[error("storage: {0}")] Backend(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlobStoreError {
    #[error("blob not found: {0}")] NotFound(String),
    #[error("blob already exists: {0}")] AlreadyExists(String),
    #[error("transport: {0}")] Transport(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("device disconnected")] Disconnected,
    #[error("action cancelled on device")] Cancelled,
    #[error("device failure: {0}")] Failure(String),
}
