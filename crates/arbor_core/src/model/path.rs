//! Materialized path codec.
//!
//! # Responsibility
//! - Encode a root-to-self id chain into one sortable string key.
//! - Provide prefix/ancestry tests and range bounds for subtree queries.
//!
//! # Invariants
//! - Segments are UUIDs with `-` written as `_`; the separator `.` can never
//!   appear inside a segment, so encoding is injective.
//! - Byte order of encoded paths is a pre-order of the tree: a node sorts
//!   directly before its descendants.

use crate::model::item::ItemId;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Separator between path segments.
pub const PATH_SEPARATOR: char = '.';
/// Character that sorts immediately after [`PATH_SEPARATOR`]; upper bound of
/// the descendant key range.
const PATH_RANGE_END: char = '/';
const SEGMENT_LEN: usize = 36;

/// Encoded ancestor chain of one item, root first, ending with the item itself.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ItemPath(String);

/// Path parse errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    Empty,
    InvalidSegment(String),
}

impl Display for PathError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "item path must not be empty"),
            Self::InvalidSegment(segment) => write!(f, "invalid item path segment `{segment}`"),
        }
    }
}

impl Error for PathError {}

impl ItemPath {
    /// Encodes an id chain. The chain must be non-empty.
    pub fn encode(chain: &[ItemId]) -> Result<Self, PathError> {
        if chain.is_empty() {
            return Err(PathError::Empty);
        }
        let encoded = chain
            .iter()
            .map(|id| encode_segment(*id))
            .collect::<Vec<_>>()
            .join(".");
        Ok(Self(encoded))
    }

    /// Path of a root item.
    pub fn root(id: ItemId) -> Self {
        Self(encode_segment(id))
    }

    /// Path of a direct child of `self`.
    pub fn child(&self, id: ItemId) -> Self {
        Self(format!("{}{PATH_SEPARATOR}{}", self.0, encode_segment(id)))
    }

    /// Validates a stored path string.
    pub fn parse(value: &str) -> Result<Self, PathError> {
        if value.is_empty() {
            return Err(PathError::Empty);
        }
        for segment in value.split(PATH_SEPARATOR) {
            decode_segment(segment)?;
        }
        Ok(Self(value.to_string()))
    }

    /// Decodes the id chain, root first.
    pub fn decode(&self) -> Result<Vec<ItemId>, PathError> {
        self.0.split(PATH_SEPARATOR).map(decode_segment).collect()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of segments; a root has depth 1.
    pub fn depth(&self) -> usize {
        self.0.split(PATH_SEPARATOR).count()
    }

    /// Id encoded by the last segment.
    pub fn leaf_id(&self) -> Result<ItemId, PathError> {
        let segment = self
            .0
            .rsplit(PATH_SEPARATOR)
            .next()
            .ok_or(PathError::Empty)?;
        decode_segment(segment)
    }

    /// Parent path, or `None` for a root.
    pub fn parent(&self) -> Option<Self> {
        self.0
            .rfind(PATH_SEPARATOR)
            .map(|index| Self(self.0[..index].to_string()))
    }

    /// All prefixes of this path, root first, including the path itself.
    pub fn ancestors_or_self(&self) -> Vec<Self> {
        let mut result = Vec::with_capacity(self.depth());
        for (index, ch) in self.0.char_indices() {
            if ch == PATH_SEPARATOR {
                result.push(Self(self.0[..index].to_string()));
            }
        }
        result.push(self.clone());
        result
    }

    /// True iff `self == ancestor` or `self` lies below `ancestor`.
    pub fn is_descendant_or_self(&self, ancestor: &ItemPath) -> bool {
        self == ancestor || self.is_strict_descendant(ancestor)
    }

    /// True iff `self` lies strictly below `ancestor`.
    pub fn is_strict_descendant(&self, ancestor: &ItemPath) -> bool {
        self.0.len() > ancestor.0.len()
            && self.0.starts_with(ancestor.0.as_str())
            && self.0[ancestor.0.len()..].starts_with(PATH_SEPARATOR)
    }

    /// Replaces the `old_prefix` of this path with `new_prefix`.
    ///
    /// Returns `None` when `self` is not at or below `old_prefix`.
    pub fn rebase(&self, old_prefix: &ItemPath, new_prefix: &ItemPath) -> Option<Self> {
        if !self.is_descendant_or_self(old_prefix) {
            return None;
        }
        Some(Self(format!(
            "{}{}",
            new_prefix.0,
            &self.0[old_prefix.0.len()..]
        )))
    }

    /// Exclusive lower and upper bounds of the strict-descendant key range.
    ///
    /// Every strict descendant `d` satisfies `lower < d < upper` under binary
    /// collation.
    pub fn descendant_range(&self) -> (String, String) {
        (
            format!("{}{PATH_SEPARATOR}", self.0),
            format!("{}{PATH_RANGE_END}", self.0),
        )
    }
}

impl Display for ItemPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ItemPath {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ItemPath> for String {
    fn from(value: ItemPath) -> Self {
        value.0
    }
}

fn encode_segment(id: ItemId) -> String {
    id.hyphenated().to_string().replace('-', "_")
}

fn decode_segment(segment: &str) -> Result<ItemId, PathError> {
    let invalid = || PathError::InvalidSegment(segment.to_string());
    if segment.len() != SEGMENT_LEN {
        return Err(invalid());
    }
    let id = Uuid::parse_str(&segment.replace('_', "-")).map_err(|_| invalid())?;
    // Only the canonical lowercase spelling round-trips.
    if encode_segment(id) != segment {
        return Err(invalid());
    }
    Ok(id)
}
