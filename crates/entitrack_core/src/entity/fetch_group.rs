//! Fetch groups attached to partially loaded instances.

use std::collections::BTreeSet;

/// Origin of a fetch group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchGroupKind {
    /// Created by the ORM itself, e.g. when the shared cache served the instance.
    Native,
    /// Wrapped by the tracking layer; unfetched attribute access is checked
    /// against the instance's identity state.
    Tracked,
}

/// Declared subset of attributes that are loaded on an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchGroup {
    attributes: BTreeSet<String>,
    kind: FetchGroupKind,
}

impl FetchGroup {
    /// Creates an ORM-native fetch group over the given attributes.
    pub fn native<I, S>(attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            attributes: attributes.into_iter().map(Into::into).collect(),
            kind: FetchGroupKind::Native,
        }
    }

    /// Returns the origin of this fetch group.
    #[must_use]
    pub fn kind(&self) -> FetchGroupKind {
        self.kind
    }

    /// Returns true if this fetch group is already tracked.
    #[must_use]
    pub fn is_tracked(&self) -> bool {
        self.kind == FetchGroupKind::Tracked
    }

    /// Returns true if the attribute is loaded.
    #[must_use]
    pub fn contains(&self, attribute: &str) -> bool {
        self.attributes.contains(attribute)
    }

    /// Returns the loaded attribute names.
    pub fn attributes(&self) -> impl Iterator<Item = &str> {
        self.attributes.iter().map(String::as_str)
    }

    /// Wraps a native fetch group; tracked groups are returned unchanged.
    #[must_use]
    pub fn into_tracked(self) -> Self {
        Self {
            attributes: self.attributes,
            kind: FetchGroupKind::Tracked,
        }
    }
}
