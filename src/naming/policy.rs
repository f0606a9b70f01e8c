//! Construction of artificial names for device resources seen for the
//! first time.
use serde::{Deserialize, Serialize};

use super::key::DeviceKey;

fn default_separator() -> String {
    "_".to_string()
}

/// How a scope names a device resource that has no mapping yet.
///
/// Every policy except [`Counter`](Self::Counter) is a pure function of the
/// key, so a resource gets the same name again after a restart even if the
/// mapping was never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ArtificialNamePolicy {
    /// Key values joined with `separator`: `5_10.0.0.1_10.0.0.2`.
    Composed {
        /// Separator between values.
        #[serde(default = "default_separator")]
        separator: String,
    },
    /// `prefix` followed by the key values: `local0`.
    Indexed {
        /// Name prefix.
        #[serde(default)]
        prefix: String,
    },
    /// First key value with a prefix length appended: `loc1/64`.
    PrefixLength {
        /// Length appended when the value has none.
        default_length: u8,
    },
    /// `prefix` followed by the next unused number, starting at 1.
    Counter {
        /// Name prefix.
        #[serde(default)]
        prefix: String,
    },
}

impl Default for ArtificialNamePolicy {
    fn default() -> Self {
        Self::Composed {
            separator: default_separator(),
        }
    }
}

impl ArtificialNamePolicy {
    /// Name for `key`, given the names already present in the scope.
    ///
    /// # Examples
    ///
    /// ```
    /// use treeconf::naming::{ArtificialNamePolicy, DeviceKey};
    ///
    /// let key = DeviceKey::composite([("vni", "5"), ("local", "10.0.0.1"), ("remote", "10.0.0.2")]);
    /// let name = ArtificialNamePolicy::default().name(&key, &[]);
    /// assert_eq!(name, "5_10.0.0.1_10.0.0.2");
    /// ```
    #[must_use]
    pub fn name(&self, key: &DeviceKey, existing: &[String]) -> String {
        match self {
            Self::Composed { separator } => key.values().join(separator),
            Self::Indexed { prefix } => format!("{prefix}{}", key.values().join("_")),
            Self::PrefixLength { default_length } => {
                let base = key.values().into_iter().next().unwrap_or_default();
                if base.contains('/') {
                    base
                } else {
                    format!("{base}/{default_length}")
                }
            }
            Self::Counter { prefix } => {
                let next = existing
                    .iter()
                    .filter_map(|name| name.strip_prefix(prefix.as_str()))
                    .filter_map(|suffix| suffix.parse::<u64>().ok())
                    .max()
                    .map_or(1, |max| max.saturating_add(1));
                format!("{prefix}{next}")
            }
        }
    }
}
