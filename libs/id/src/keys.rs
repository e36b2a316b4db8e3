//! Fleet, replica and revision names.

use std::fmt;
use std::str::FromStr;

use crate::IdError;

/// Maximum length of a DNS label.
pub const MAX_LABEL_LEN: usize = 63;

/// Maximum length of a fleet name.
///
/// Leaves room for the `-{ordinal}` replica suffix and the `-{hash}` revision
/// suffix inside a single DNS label.
pub const MAX_FLEET_NAME_LEN: usize = 52;

fn validate_label(value: &str, max: usize) -> Result<(), IdError> {
    if value.is_empty() {
        return Err(IdError::Empty);
    }
    if value.len() > max {
        return Err(IdError::TooLong {
            value: value.to_string(),
            len: value.len(),
            max,
        });
    }

    let bytes = value.as_bytes();
    let valid_chars = bytes
        .iter()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-');
    let alnum_edges =
        bytes[0].is_ascii_alphanumeric() && bytes[bytes.len() - 1].is_ascii_alphanumeric();

    if !valid_chars || !alnum_edges {
        return Err(IdError::InvalidLabel(value.to_string()));
    }

    Ok(())
}

// =============================================================================
// Fleet Key
// =============================================================================

/// Identity of one fleet: `{namespace}/{name}`.
///
/// This is the key of the reconcile work queue; at most one pass per key runs
/// at any time.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FleetKey {
    namespace: String,
    name: String,
}

impl FleetKey {
    /// Creates a validated fleet key.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Result<Self, IdError> {
        let namespace = namespace.into();
        let name = name.into();
        validate_label(&namespace, MAX_LABEL_LEN)?;
        validate_label(&name, MAX_FLEET_NAME_LEN)?;
        Ok(Self { namespace, name })
    }

    /// Parses `{namespace}/{name}`.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        if s.is_empty() {
            return Err(IdError::Empty);
        }
        let Some((namespace, name)) = s.split_once('/') else {
            return Err(IdError::MissingSeparator);
        };
        Self::new(namespace, name)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Key of the replica at `ordinal` in this fleet.
    #[must_use]
    pub fn replica(&self, ordinal: u32) -> ReplicaKey {
        ReplicaKey {
            fleet: self.clone(),
            ordinal,
        }
    }
}

impl fmt::Display for FleetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for FleetKey {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl serde::Serialize for FleetKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for FleetKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Replica Key
// =============================================================================

/// Identity of one replica: the owning fleet plus an explicit ordinal.
///
/// Ordering is by fleet, then ordinal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReplicaKey {
    fleet: FleetKey,
    ordinal: u32,
}

impl ReplicaKey {
    pub fn fleet(&self) -> &FleetKey {
        &self.fleet
    }

    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    /// Object name of the replica: `{fleet-name}-{ordinal}`.
    #[must_use]
    pub fn name(&self) -> String {
        format!("{}-{}", self.fleet.name, self.ordinal)
    }

    /// Parses a replica object name that must belong to `fleet`.
    ///
    /// The ordinal must be a canonical decimal number: no sign, no leading
    /// zeros, no surrounding whitespace.
    pub fn parse_name(fleet: &FleetKey, name: &str) -> Result<Self, IdError> {
        let suffix = name
            .strip_prefix(fleet.name())
            .and_then(|rest| rest.strip_prefix('-'))
            .ok_or_else(|| IdError::FleetMismatch {
                fleet: fleet.to_string(),
                actual: name.to_string(),
            })?;

        let canonical = !suffix.is_empty()
            && suffix.bytes().all(|b| b.is_ascii_digit())
            && (suffix == "0" || !suffix.starts_with('0'));
        if !canonical {
            return Err(IdError::InvalidOrdinal(name.to_string()));
        }

        let ordinal = suffix
            .parse::<u32>()
            .map_err(|_| IdError::InvalidOrdinal(name.to_string()))?;

        Ok(fleet.replica(ordinal))
    }

    /// Parses the display form `{namespace}/{fleet-name}-{ordinal}`.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        if s.is_empty() {
            return Err(IdError::Empty);
        }
        let Some((namespace, name)) = s.split_once('/') else {
            return Err(IdError::MissingSeparator);
        };
        let Some((fleet_name, _)) = name.rsplit_once('-') else {
            return Err(IdError::InvalidOrdinal(name.to_string()));
        };
        let fleet = FleetKey::new(namespace, fleet_name)?;
        Self::parse_name(&fleet, name)
    }
}

impl fmt::Display for ReplicaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}-{}", self.fleet.namespace, self.fleet.name, self.ordinal)
    }
}

impl FromStr for ReplicaKey {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl serde::Serialize for ReplicaKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for ReplicaKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Revision Name
// =============================================================================

/// Name of an immutable template revision: `{fleet-name}-{hash}`.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct RevisionName(String);

impl RevisionName {
    /// Wraps an existing revision name as read back from storage.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Derives the name of a revision of `fleet` with the given template hash.
    #[must_use]
    pub fn derive(fleet: &FleetKey, hash: &str) -> Self {
        Self(format!("{}-{}", fleet.name(), hash))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RevisionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
