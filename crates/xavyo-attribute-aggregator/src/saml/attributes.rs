//! Attribute sets and the multi-source merge algorithm

use crate::models::filter_config::{AttributeRequestList, MultiSourcePolicy};
use std::collections::hash_map::Entry;
use std::collections::HashMap;

/// Attribute set of an authenticated principal: name to ordered values
pub type Attributes = HashMap<String, Vec<String>>;

/// Attributes returned by the Attribute Authority, in document order.
///
/// A name that appears more than once has its values combined under its
/// first position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReturnedAttributes {
    entries: Vec<(String, Vec<String>)>,
}

impl ReturnedAttributes {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add values for `name`, appending to an earlier occurrence if any
    pub fn push(&mut self, name: impl Into<String>, values: Vec<String>) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => existing.extend(values),
            None => self.entries.push((name, values)),
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IntoIterator for ReturnedAttributes {
    type Item = (String, Vec<String>);
    type IntoIter = std::vec::IntoIter<(String, Vec<String>)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<N: Into<String>> FromIterator<(N, Vec<String>)> for ReturnedAttributes {
    fn from_iter<T: IntoIterator<Item = (N, Vec<String>)>>(iter: T) -> Self {
        let mut attrs = Self::new();
        for (name, values) in iter {
            attrs.push(name, values);
        }
        attrs
    }
}

/// Fold attributes returned by the AA into `attributes`.
///
/// Attributes are processed in the order the AA returned them. A name that is
/// not yet present is set to the returned values. For a name that is present,
/// the configured `MultiSourcePolicy` of the requested attribute decides;
/// unrequested attributes and requested ones without a policy are merged.
/// Merging appends without deduplication.
pub fn merge_attributes(
    attributes: &mut Attributes,
    returned: ReturnedAttributes,
    requested: &AttributeRequestList,
) {
    for (name, values) in returned {
        let policy = requested
            .get(&name)
            .and_then(|spec| spec.multi_source_policy)
            .unwrap_or(MultiSourcePolicy::Merge);

        match attributes.entry(name) {
            Entry::Vacant(slot) => {
                slot.insert(values);
            }
            Entry::Occupied(mut slot) => match policy {
                MultiSourcePolicy::Override => {
                    tracing::trace!(attribute = %slot.key(), "Overriding attribute values");
                    *slot.get_mut() = values;
                }
                MultiSourcePolicy::Keep => {
                    tracing::trace!(attribute = %slot.key(), "Keeping existing attribute values");
                    continue;
                }
                MultiSourcePolicy::Merge => slot.get_mut().extend(values),
            },
        }
    }
}
