//! End-to-end test suite for Vigil.
//!
//! Drives the wallet through scripted collaborators: a device that hands out
//! deterministic account nodes, a transaction source backed by an in-memory
//! address index, and a remote blob store shared between wallet instances.

pub mod helpers;
