//! Internet connectivity vocabulary shared with the host.

use serde::{Deserialize, Serialize};

/// Online/offline state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityStatus {
    #[default]
    Online,
    Offline,
}

impl ConnectivityStatus {
    #[must_use]
    pub const fn is_online(self) -> bool {
        matches!(self, Self::Online)
    }

    #[must_use]
    pub const fn from_online(online: bool) -> Self {
        if online { Self::Online } else { Self::Offline }
    }
}

/// Who last set the connectivity status.
///
/// Forwarded to the host so it can apply its own precedence policy;
/// locally the last writer wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityOverrideSource {
    /// The platform's online/offline signal.
    SystemSignal,
    /// An explicit user override.
    UserOverride,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_from_bool() {
        assert_eq!(ConnectivityStatus::from_online(true), ConnectivityStatus::Online);
        assert_eq!(ConnectivityStatus::from_online(false), ConnectivityStatus::Offline);
        assert!(!ConnectivityStatus::Offline.is_online());
    }

    #[test]
    fn status_wire_names() {
        let json = serde_json::to_string(&ConnectivityStatus::Offline).unwrap();
        assert_eq!(json, "\"offline\"");
        let parsed: ConnectivityOverrideSource =
            serde_json::from_str("\"user_override\"").unwrap();
        assert_eq!(parsed, ConnectivityOverrideSource::UserOverride);
    }
}
