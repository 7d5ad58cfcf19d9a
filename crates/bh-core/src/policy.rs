//! Default policy bundle handling.
//!
//! The default invariants and role playbooks ship as a read-only JSON asset
//! compiled into the binary. A deployment can override it by pointing
//! `POLICY_ASSET_DIR` at a directory containing `default_policy.json`; the
//! reload endpoint re-reads that file from disk.

use std::path::Path;

use crate::error::{Error, Result};
use crate::types::PolicyBundle;

/// Embedded default bundle.
pub const DEFAULT_POLICY_JSON: &str = include_str!("../assets/default_policy.json");

/// File name looked up inside `POLICY_ASSET_DIR`.
pub const DEFAULT_POLICY_FILE: &str = "default_policy.json";

/// Load the default bundle: from `asset_dir` when provided and readable,
/// otherwise the embedded copy.
pub fn load_defaults(asset_dir: Option<&Path>) -> Result<PolicyBundle> {
    if let Some(dir) = asset_dir {
        let path = dir.join(DEFAULT_POLICY_FILE);
        match std::fs::read_to_string(&path) {
            Ok(text) => {
                return serde_json::from_str(&text).map_err(|e| {
                    Error::Internal(format!("invalid policy asset {}: {e}", path.display()))
                });
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "policy asset dir set but unreadable, using embedded defaults"
                );
            }
        }
    }
    serde_json::from_str(DEFAULT_POLICY_JSON)
        .map_err(|e| Error::Internal(format!("embedded default policy is invalid: {e}")))
}

/// Canonical byte form used for the idempotent-create comparison. Key order
/// is stable (BTreeMap roles, Vec invariants), so equal bundles serialise
/// identically.
pub fn canonical_bytes(bundle: &PolicyBundle) -> Result<Vec<u8>> {
    serde_json::to_vec(bundle).map_err(Error::internal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_defaults_parse() {
        let bundle = load_defaults(None).unwrap();
        assert!(!bundle.invariants.is_empty());
        assert!(bundle.roles.contains_key("implementer"));
    }

    #[test]
    fn asset_dir_overrides_embedded() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(DEFAULT_POLICY_FILE),
            r#"{"invariants":[{"id":"inv-custom","title":"t","body":"b"}],"roles":{},"adapters":null}"#,
        )
        .unwrap();
        let bundle = load_defaults(Some(dir.path())).unwrap();
        assert_eq!(bundle.invariants.len(), 1);
        assert_eq!(bundle.invariants[0].id, "inv-custom");
    }

    #[test]
    fn unreadable_dir_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        // No file written.
        let bundle = load_defaults(Some(dir.path())).unwrap();
        assert!(!bundle.invariants.is_empty());
    }

    #[test]
    fn canonical_bytes_stable_for_equal_bundles() {
        let a = load_defaults(None).unwrap();
        let b = load_defaults(None).unwrap();
        assert_eq!(canonical_bytes(&a).unwrap(), canonical_bytes(&b).unwrap());
    }
}
