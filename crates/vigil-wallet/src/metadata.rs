//! Per-account label document.
//!
//! The plaintext of a `.mtdt` file:
//! ```json
//! {"version":"1.0.0","accountLabel":null,
//!  "addressLabels":{"3Ltw...":"rent"},
//!  "outputLabels":{"<txid>":{"0":"coffee"}}}
//! ```
//! Values are immutable; every edit returns the new document and a
//! [`LabelPatch`] describing what changed. An empty-string label is a
//! label, distinct from `null`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use vigil_core::types::Txid;

use crate::error::WalletError;

/// The only document version this wallet reads or writes.
pub const METADATA_VERSION: &str = "1.0.0";

/// Which label a patch touches.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LabelField {
    Account,
    Address(String),
    Output { txid: Txid, index: u32 },
}

/// A single-field change, kept so that merge strategies other than
/// last-writer-wins can be layered on later.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelPatch {
    pub field: LabelField,
    pub old: Option<String>,
    pub new: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AccountMetadata {
    pub version: String,
    #[serde(default)]
    pub account_label: Option<String>,
    #[serde(default)]
    pub address_labels: BTreeMap<String, Option<String>>,
    #[serde(default)]
    pub output_labels: BTreeMap<Txid, BTreeMap<u32, Option<String>>>,
}

#[derive(Deserialize)]
struct VersionProbe {
    version: String,
}

impl Default for AccountMetadata {
    fn default() -> Self {
        Self {
            version: METADATA_VERSION.to_string(),
            account_label: None,
            address_labels: BTreeMap::new(),
            output_labels: BTreeMap::new(),
        }
    }
}

impl AccountMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to_json(&self) -> Result<Vec<u8>, WalletError> {
        serde_json::to_vec(self).map_err(|e| WalletError::Serialization(e.to_string()))
    }

    /// Parse a document, rejecting any version other than [`METADATA_VERSION`]
    /// before looking at the rest of it.
    pub fn from_json(bytes: &[u8]) -> Result<Self, WalletError> {
        let probe: VersionProbe =
            serde_json::from_slice(bytes).map_err(|e| WalletError::Serialization(e.to_string()))?;
        if probe.version != METADATA_VERSION {
            return Err(WalletError::MetadataVersionMismatch(probe.version));
        }
        serde_json::from_slice(bytes).map_err(|e| WalletError::Serialization(e.to_string()))
    }

    pub fn address_label(&self, address: &str) -> Option<&str> {
        self.address_labels.get(address).and_then(|l| l.as_deref())
    }

    pub fn output_label(&self, txid: &Txid, index: u32) -> Option<&str> {
        self.output_labels
            .get(txid)
            .and_then(|outputs| outputs.get(&index))
            .and_then(|l| l.as_deref())
    }

    pub fn label(&self, field: &LabelField) -> Option<&str> {
        match field {
            LabelField::Account => self.account_label.as_deref(),
            LabelField::Address(address) => self.address_label(address),
            LabelField::Output { txid, index } => self.output_label(txid, *index),
        }
    }

    /// Set `field` to `label`, returning the edited document and its patch.
    pub fn with_label(&self, field: LabelField, label: Option<String>) -> (Self, LabelPatch) {
        let patch = LabelPatch {
            old: self.label(&field).map(str::to_string),
            new: label,
            field,
        };
        (self.apply(&patch), patch)
    }

    pub fn with_account_label(&self, label: Option<String>) -> (Self, LabelPatch) {
        self.with_label(LabelField::Account, label)
    }

    pub fn with_address_label(&self, address: &str, label: Option<String>) -> (Self, LabelPatch) {
        self.with_label(LabelField::Address(address.to_string()), label)
    }

    pub fn with_output_label(&self, txid: Txid, index: u32, label: Option<String>) -> (Self, LabelPatch) {
        self.with_label(LabelField::Output { txid, index }, label)
    }

    /// A copy of this document with `patch.new` written to `patch.field`.
    /// `patch.old` is not checked.
    pub fn apply(&self, patch: &LabelPatch) -> Self {
        let mut next = self.clone();
        match &patch.field {
            LabelField::Account => next.account_label = patch.new.clone(),
            LabelField::Address(address) => {
                next.address_labels.insert(address.clone(), patch.new.clone());
            }
            LabelField::Output { txid, index } => {
                next.output_labels
                    .entry(*txid)
                    .or_default()
                    .insert(*index, patch.new.clone());
            }
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ADDR: &str = "3LtwqexYviExNmSPzZ9tJRNFAjPw4qBwZ2";

    #[test]
    fn empty_document_json() {
        let json = String::from_utf8(AccountMetadata::new().to_json().unwrap()).unwrap();
        assert_eq!(
            json,
            r#"{"version":"1.0.0","accountLabel":null,"addressLabels":{},"outputLabels":{}}"#
        );
    }

    #[test]
    fn output_labels_keyed_by_txid_and_index() {
        let txid = Txid([0xab; 32]);
        let (doc, _) = AccountMetadata::new().with_output_label(txid, 3, Some("coffee".into()));
        let json = String::from_utf8(doc.to_json().unwrap()).unwrap();
        assert!(json.contains(&format!(r#""outputLabels":{{"{}":{{"3":"coffee"}}}}"#, "ab".repeat(32))));
        assert_eq!(AccountMetadata::from_json(json.as_bytes()).unwrap(), doc);
    }

    #[test]
    fn parses_standard_document() {
        let json = format!(
            r#"{{"version":"1.0.0","accountLabel":"Savings","addressLabels":{{"{ADDR}":null}},"outputLabels":{{"{}":{{"0":""}}}}}}"#,
            "01".repeat(32)
        );
        let doc = AccountMetadata::from_json(json.as_bytes()).unwrap();
        assert_eq!(doc.account_label.as_deref(), Some("Savings"));
        assert_eq!(doc.address_labels.get(ADDR), Some(&None));
        assert_eq!(doc.output_label(&Txid([1; 32]), 0), Some(""));
    }

    #[test]
    fn missing_maps_default_to_empty() {
        let doc = AccountMetadata::from_json(br#"{"version":"1.0.0"}"#).unwrap();
        assert_eq!(doc, AccountMetadata::new());
    }

    #[test]
    fn unsupported_version_fails_hard() {
        let err = AccountMetadata::from_json(br#"{"version":"2.0.0","addressLabels":[]}"#).unwrap_err();
        assert_eq!(err, WalletError::MetadataVersionMismatch("2.0.0".into()));
    }

    #[test]
    fn garbage_is_serialization_error() {
        assert!(matches!(
            AccountMetadata::from_json(b"not json"),
            Err(WalletError::Serialization(_))
        ));
    }

    #[test]
    fn edits_do_not_mutate_original() {
        let original = AccountMetadata::new();
        let (edited, patch) = original.with_account_label(Some("Savings".into()));
        assert_eq!(original.account_label, None);
        assert_eq!(edited.account_label.as_deref(), Some("Savings"));
        assert_eq!(
            patch,
            LabelPatch {
                field: LabelField::Account,
                old: None,
                new: Some("Savings".into()),
            }
        );
    }

    #[test]
    fn patch_records_old_value() {
        let (doc, _) = AccountMetadata::new().with_address_label(ADDR, Some("rent".into()));
        let (doc, patch) = doc.with_address_label(ADDR, None);
        assert_eq!(patch.old.as_deref(), Some("rent"));
        assert_eq!(patch.new, None);
        assert_eq!(doc.address_label(ADDR), None);
    }

    #[test]
    fn apply_replays_patch() {
        let (edited, patch) =
            AccountMetadata::new().with_output_label(Txid([2; 32]), 1, Some("salary".into()));
        assert_eq!(AccountMetadata::new().apply(&patch), edited);
    }

    fn label() -> impl Strategy<Value = Option<String>> {
        prop_oneof![Just(None), Just(Some(String::new())), ".{0,12}".prop_map(Some)]
    }

    fn document() -> impl Strategy<Value = AccountMetadata> {
        (
            label(),
            proptest::collection::btree_map("[a-zA-Z0-9]{1,34}", label(), 0..6),
            proptest::collection::btree_map(
                any::<[u8; 32]>().prop_map(Txid),
                proptest::collection::btree_map(any::<u32>(), label(), 0..4),
                0..4,
            ),
        )
            .prop_map(|(account_label, address_labels, output_labels)| AccountMetadata {
                version: METADATA_VERSION.to_string(),
                account_label,
                address_labels,
                output_labels,
            })
    }

    proptest! {
        #[test]
        fn json_roundtrip(doc in document()) {
            let bytes = doc.to_json().unwrap();
            prop_assert_eq!(AccountMetadata::from_json(&bytes).unwrap(), doc);
        }
    }
}
