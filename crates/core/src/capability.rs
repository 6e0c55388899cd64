//! Capability tags: what kind of job a worker can execute (e.g. a model type).

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::OrchestrationError;
use crate::value_object::ValueObject;

/// Longest accepted capability tag.
pub const MAX_CAPABILITY_LEN: usize = 128;

/// A single capability tag.
///
/// Tags are trimmed, non-empty, at most [`MAX_CAPABILITY_LEN`] bytes and made
/// of ASCII alphanumerics plus `-`, `_`, `.`, `:` and `/`. Matching is exact
/// (case-sensitive).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Capability(String);

impl Capability {
    pub fn new(tag: impl Into<String>) -> Result<Self, OrchestrationError> {
        let tag = tag.into();
        let tag = tag.trim();
        if tag.is_empty() {
            return Err(OrchestrationError::invalid_payload("capability tag is empty"));
        }
        if tag.len() > MAX_CAPABILITY_LEN {
            return Err(OrchestrationError::invalid_payload(format!(
                "capability tag exceeds {MAX_CAPABILITY_LEN} bytes"
            )));
        }
        if !tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':' | '/'))
        {
            return Err(OrchestrationError::invalid_payload(format!(
                "capability tag '{tag}' contains unsupported characters"
            )));
        }
        Ok(Self(tag.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ValueObject for Capability {}

impl TryFrom<String> for Capability {
    type Error = OrchestrationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Capability> for String {
    fn from(value: Capability) -> Self {
        value.0
    }
}

impl core::fmt::Display for Capability {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An ordered set of capability tags.
///
/// Used both as a worker's declared capabilities and as a job's requirement
/// (a single tag is a one-element set). Ordering makes the set usable as a
/// stable "capability class" key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a list of raw tags.
    pub fn parse<I, S>(tags: I) -> Result<Self, OrchestrationError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        tags.into_iter()
            .map(Capability::new)
            .collect::<Result<BTreeSet<_>, _>>()
            .map(Self)
    }

    pub fn single(capability: Capability) -> Self {
        Self(BTreeSet::from([capability]))
    }

    pub fn insert(&mut self, capability: Capability) -> bool {
        self.0.insert(capability)
    }

    pub fn contains(&self, capability: &Capability) -> bool {
        self.0.contains(capability)
    }

    /// True when every tag of `requirement` is offered by `self`.
    pub fn satisfies(&self, requirement: &CapabilitySet) -> bool {
        requirement.0.is_subset(&self.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.0.iter()
    }

    /// Canonical comma-joined form, used as a storage key for the class.
    pub fn canonical(&self) -> String {
        self.0
            .iter()
            .map(Capability::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Inverse of [`CapabilitySet::canonical`].
    pub fn from_canonical(s: &str) -> Result<Self, OrchestrationError> {
        if s.is_empty() {
            return Ok(Self::new());
        }
        Self::parse(s.split(','))
    }
}

impl ValueObject for CapabilitySet {}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<T: IntoIterator<Item = Capability>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl core::fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{{{}}}", self.canonical())
    }
}
