//! Device keys and the equivalence used to match them.
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use serde::{Deserialize, Serialize};

/// Handle or identifying tuple of a device resource.
///
/// Serialized untagged: an index is a JSON number, text a string, and a
/// composite key an array of `{name, value}` objects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeviceKey {
    /// Numeric handle assigned by the device.
    Index(u32),
    /// Textual identifier.
    Text(String),
    /// Ordered tuple of named fields.
    Composite(Vec<KeyField>),
}

/// One named field of a composite [`DeviceKey`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyField {
    /// Field name.
    pub name: String,
    /// Field value as text.
    pub value: String,
}

impl DeviceKey {
    /// Composite key from `(name, value)` pairs, keeping their order.
    ///
    /// # Examples
    ///
    /// ```
    /// use treeconf::naming::DeviceKey;
    ///
    /// let key = DeviceKey::composite([("vni", "5"), ("local", "10.0.0.1")]);
    /// assert_eq!(key.field("vni"), Some("5"));
    /// assert_eq!(key.to_string(), "{vni=5, local=10.0.0.1}");
    /// ```
    #[must_use]
    pub fn composite<I, N, V>(fields: I) -> Self
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<String>,
        V: Into<String>,
    {
        Self::Composite(
            fields
                .into_iter()
                .map(|(name, value)| KeyField {
                    name: name.into(),
                    value: value.into(),
                })
                .collect(),
        )
    }

    /// Value of a composite field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        match self {
            Self::Composite(fields) => fields
                .iter()
                .find(|f| f.name == name)
                .map(|f| f.value.as_str()),
            Self::Index(_) | Self::Text(_) => None,
        }
    }

    /// The key's values as text, in order.
    #[must_use]
    pub fn values(&self) -> Vec<String> {
        match self {
            Self::Index(index) => vec![index.to_string()],
            Self::Text(text) => vec![text.clone()],
            Self::Composite(fields) => fields.iter().map(|f| f.value.clone()).collect(),
        }
    }
}

impl From<u32> for DeviceKey {
    fn from(index: u32) -> Self {
        Self::Index(index)
    }
}

impl From<&str> for DeviceKey {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(index) => write!(f, "{index}"),
            Self::Text(text) => f.write_str(text),
            Self::Composite(fields) => {
                f.write_str("{")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}={}", field.name, field.value)?;
                }
                f.write_str("}")
            }
        }
    }
}

/// How a device-observed key is matched against stored keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyEquivalence {
    /// Keys must be equal.
    #[default]
    Exact,
    /// Values written as `address/length` are compared after masking the
    /// address to its prefix, so `10.0.0.7/24` matches `10.0.0.0/24`.
    SameSubnet,
}

impl KeyEquivalence {
    /// `true` when `stored` and `observed` denote the same resource.
    #[must_use]
    pub fn matches(self, stored: &DeviceKey, observed: &DeviceKey) -> bool {
        match self {
            Self::Exact => stored == observed,
            Self::SameSubnet => normalize_key(stored) == normalize_key(observed),
        }
    }
}

fn normalize_key(key: &DeviceKey) -> DeviceKey {
    match key {
        DeviceKey::Index(_) => key.clone(),
        DeviceKey::Text(text) => DeviceKey::Text(normalize_prefix(text)),
        DeviceKey::Composite(fields) => DeviceKey::Composite(
            fields
                .iter()
                .map(|f| KeyField {
                    name: f.name.clone(),
                    value: normalize_prefix(&f.value),
                })
                .collect(),
        ),
    }
}

/// Mask `addr/len` to its network address; other text is returned as is.
fn normalize_prefix(text: &str) -> String {
    let Some((addr, len)) = text.split_once('/') else {
        return text.to_string();
    };
    let (Ok(addr), Ok(len)) = (addr.parse::<IpAddr>(), len.parse::<u32>()) else {
        return text.to_string();
    };
    let masked = match addr {
        IpAddr::V4(v4) if len <= 32 => {
            let mask = u32::MAX.checked_shl(32 - len).unwrap_or(0);
            IpAddr::V4(Ipv4Addr::from(u32::from(v4) & mask))
        }
        IpAddr::V6(v6) if len <= 128 => {
            let mask = u128::MAX.checked_shl(128 - len).unwrap_or(0);
            IpAddr::V6(Ipv6Addr::from(u128::from(v6) & mask))
        }
        IpAddr::V4(_) | IpAddr::V6(_) => return text.to_string(),
    };
    format!("{masked}/{len}")
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn display_forms() {
        assert_eq!(DeviceKey::Index(7).to_string(), "7");
        assert_eq!(DeviceKey::from("loc1").to_string(), "loc1");
        assert_eq!(
            DeviceKey::composite([("a", "1"), ("b", "2")]).to_string(),
            "{a=1, b=2}"
        );
    }

    #[test]
    fn serde_is_untagged() {
        let key = DeviceKey::composite([("vni", "5")]);
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, r#"[{"name":"vni","value":"5"}]"#);
        assert_eq!(serde_json::from_str::<DeviceKey>(&json).unwrap(), key);
        assert_eq!(serde_json::from_str::<DeviceKey>("3").unwrap(), DeviceKey::Index(3));
        assert_eq!(
            serde_json::from_str::<DeviceKey>(r#""x""#).unwrap(),
            DeviceKey::from("x")
        );
    }

    #[test]
    fn exact_equivalence_compares_everything() {
        let a = DeviceKey::from("10.0.0.7/24");
        let b = DeviceKey::from("10.0.0.0/24");
        assert!(!KeyEquivalence::Exact.matches(&a, &b));
        assert!(KeyEquivalence::Exact.matches(&a, &a));
    }

    #[test]
    fn same_subnet_masks_ipv4_prefixes() {
        let a = DeviceKey::composite([("vni", "5"), ("eid", "10.0.0.7/24")]);
        let b = DeviceKey::composite([("vni", "5"), ("eid", "10.0.0.0/24")]);
        let c = DeviceKey::composite([("vni", "5"), ("eid", "10.0.1.0/24")]);
        assert!(KeyEquivalence::SameSubnet.matches(&a, &b));
        assert!(!KeyEquivalence::SameSubnet.matches(&a, &c));
    }

    #[test]
    fn same_subnet_masks_ipv6_prefixes() {
        let a = DeviceKey::from("2001:db8::1/64");
        let b = DeviceKey::from("2001:db8::/64");
        assert!(KeyEquivalence::SameSubnet.matches(&a, &b));
    }

    #[test]
    fn prefix_normalization_leaves_other_text_alone() {
        assert_eq!(normalize_prefix("eth0"), "eth0");
        assert_eq!(normalize_prefix("a/b"), "a/b");
        assert_eq!(normalize_prefix("10.0.0.1/40"), "10.0.0.1/40");
        assert_eq!(normalize_prefix("10.1.2.3/0"), "0.0.0.0/0");
    }
}
