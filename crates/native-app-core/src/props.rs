//! Briefcase identity and version selection.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identity of a briefcase as exchanged with the host.
///
/// `key` is allocated by the host when a download begins and is empty
/// on requests the client builds itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BriefcaseProps {
    /// Host-allocated key for the local copy.
    #[serde(default)]
    pub key: String,
    /// Project/context the dataset belongs to.
    pub context_id: String,
    /// Dataset identifier.
    pub imodel_id: String,
    /// Concrete revision the copy was taken at.
    #[serde(default)]
    pub changeset_id: String,

    /// Additional properties reported by the host (name, extents, ...).
    #[serde(default, flatten)]
    pub metadata: HashMap<String, Value>,
}

impl BriefcaseProps {
    /// Build a request for a dataset at a resolved revision.
    #[must_use]
    pub fn new(
        context_id: impl Into<String>,
        imodel_id: impl Into<String>,
        changeset_id: impl Into<String>,
    ) -> Self {
        Self {
            key: String::new(),
            context_id: context_id.into(),
            imodel_id: imodel_id.into(),
            changeset_id: changeset_id.into(),
            metadata: HashMap::new(),
        }
    }

    /// Get a metadata value by key.
    #[must_use]
    pub fn get_metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Set a metadata value.
    pub fn set_metadata(&mut self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
    }

    /// Overlay `identity` on top of `self`.
    ///
    /// Identity fields always come from `identity`; metadata is merged with
    /// keys from `identity` taking precedence.
    #[must_use]
    pub fn overlaid_with(mut self, identity: &Self) -> Self {
        self.key.clone_from(&identity.key);
        self.context_id.clone_from(&identity.context_id);
        self.imodel_id.clone_from(&identity.imodel_id);
        self.changeset_id.clone_from(&identity.changeset_id);
        for (k, v) in &identity.metadata {
            self.metadata.insert(k.clone(), v.clone());
        }
        self
    }
}

/// A briefcase present in the host's local cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalBriefcase {
    #[serde(flatten)]
    pub props: BriefcaseProps,
    /// Size of the local file in bytes.
    #[serde(default)]
    pub file_size: u64,
}

/// Logical pointer to a revision, resolved by the host before download.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum VersionSelector {
    /// Most recent revision.
    #[default]
    Latest,
    /// Revision before any changeset was applied.
    First,
    /// State after the given changeset.
    AsOfChangeSet(String),
    /// A named version.
    Named(String),
}

impl VersionSelector {
    #[must_use]
    pub fn as_of(changeset_id: impl Into<String>) -> Self {
        Self::AsOfChangeSet(changeset_id.into())
    }

    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_prefers_caller_identity() {
        let mut remote = BriefcaseProps::new("ctx-remote", "im-remote", "");
        remote.key = "remote-key".into();
        remote.set_metadata("name", Value::from("Bridge"));
        remote.set_metadata("readonly", Value::from(false));

        let mut token = BriefcaseProps::new("ctx", "im", "cs1");
        token.key = "k1".into();
        token.set_metadata("readonly", Value::from(true));

        let merged = remote.overlaid_with(&token);
        assert_eq!(merged.key, "k1");
        assert_eq!(merged.context_id, "ctx");
        assert_eq!(merged.imodel_id, "im");
        assert_eq!(merged.changeset_id, "cs1");
        assert_eq!(merged.get_metadata("name"), Some(&Value::from("Bridge")));
        assert_eq!(merged.get_metadata("readonly"), Some(&Value::from(true)));
    }

    #[test]
    fn props_use_camel_case_with_flattened_metadata() {
        let mut props = BriefcaseProps::new("ctx", "im", "cs");
        props.set_metadata("name", Value::from("site"));
        let json = serde_json::to_value(&props).unwrap();
        assert_eq!(json["contextId"], "ctx");
        assert_eq!(json["imodelId"], "im");
        assert_eq!(json["changesetId"], "cs");
        assert_eq!(json["name"], "site");
    }

    #[test]
    fn default_selector_is_latest() {
        assert_eq!(VersionSelector::default(), VersionSelector::Latest);
        assert_eq!(VersionSelector::as_of("cs9"), VersionSelector::AsOfChangeSet("cs9".into()));
    }
}
