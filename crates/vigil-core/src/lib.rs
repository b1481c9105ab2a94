//! # vigil-core
//! Foundation types, key derivation, and collaborator traits for Vigil.

pub mod address;
pub mod constants;
pub mod crypto;
pub mod descriptor;
pub mod error;
pub mod traits;
pub mod types;
