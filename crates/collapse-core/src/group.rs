//! Group identities and grouped result sets.

use crate::sort::{SortKey, SortSpec, SortValue};
use crate::types::RankedHit;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

/// The value a group is keyed on.
///
/// Equality and hashing treat floats by bit pattern so group values can key
/// hash maps. Ordering ranks by tag first (`Null`, numbers, text, bytes),
/// comparing numbers across `Long`/`Double` by magnitude.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GroupValue {
    /// Documents with no value for the group key.
    Null,
    Long(i64),
    Double(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl GroupValue {
    fn tag_rank(&self) -> u8 {
        match self {
            GroupValue::Null => 0,
            GroupValue::Long(_) | GroupValue::Double(_) => 1,
            GroupValue::Text(_) => 2,
            GroupValue::Bytes(_) => 3,
        }
    }

    fn variant_rank(&self) -> u8 {
        match self {
            GroupValue::Null => 0,
            GroupValue::Long(_) => 1,
            GroupValue::Double(_) => 2,
            GroupValue::Text(_) => 3,
            GroupValue::Bytes(_) => 4,
        }
    }
}

impl PartialEq for GroupValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (GroupValue::Null, GroupValue::Null) => true,
            (GroupValue::Long(a), GroupValue::Long(b)) => a == b,
            (GroupValue::Double(a), GroupValue::Double(b)) => a.to_bits() == b.to_bits(),
            (GroupValue::Text(a), GroupValue::Text(b)) => a == b,
            (GroupValue::Bytes(a), GroupValue::Bytes(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for GroupValue {}

impl Hash for GroupValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.variant_rank().hash(state);
        match self {
            GroupValue::Null => {}
            GroupValue::Long(v) => v.hash(state),
            GroupValue::Double(v) => v.to_bits().hash(state),
            GroupValue::Text(v) => v.hash(state),
            GroupValue::Bytes(v) => v.hash(state),
        }
    }
}

impl Ord for GroupValue {
    fn cmp(&self, other: &Self) -> Ordering {
        let by_value = match (self, other) {
            (GroupValue::Long(a), GroupValue::Long(b)) => a.cmp(b),
            (GroupValue::Double(a), GroupValue::Double(b)) => a.total_cmp(b),
            (GroupValue::Long(a), GroupValue::Double(b)) => (*a as f64).total_cmp(b),
            (GroupValue::Double(a), GroupValue::Long(b)) => a.total_cmp(&(*b as f64)),
            (GroupValue::Text(a), GroupValue::Text(b)) => a.cmp(b),
            (GroupValue::Bytes(a), GroupValue::Bytes(b)) => a.cmp(b),
            _ => self.tag_rank().cmp(&other.tag_rank()),
        };
        by_value.then_with(|| self.variant_rank().cmp(&other.variant_rank()))
    }
}

impl PartialOrd for GroupValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<&str> for GroupValue {
    fn from(value: &str) -> Self {
        GroupValue::Text(value.to_string())
    }
}

impl From<String> for GroupValue {
    fn from(value: String) -> Self {
        GroupValue::Text(value)
    }
}

impl From<i64> for GroupValue {
    fn from(value: i64) -> Self {
        GroupValue::Long(value)
    }
}

impl std::fmt::Display for GroupValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GroupValue::Null => write!(f, "<null>"),
            GroupValue::Long(v) => write!(f, "{}", v),
            GroupValue::Double(v) => write!(f, "{}", v),
            GroupValue::Text(v) => write!(f, "{}", v),
            GroupValue::Bytes(v) => write!(f, "{:02x?}", v),
        }
    }
}

/// A group key plus the values that order it among other groups.
///
/// Two identities are equal when their group values are equal; sort values
/// only influence ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupIdentity {
    pub value: GroupValue,
    pub sort_values: Vec<SortValue>,
}

impl GroupIdentity {
    pub fn new(value: impl Into<GroupValue>, sort_values: Vec<SortValue>) -> Self {
        Self {
            value: value.into(),
            sort_values,
        }
    }
}

impl PartialEq for GroupIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl Eq for GroupIdentity {}

impl Hash for GroupIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

/// One group and its locally sorted top hits.
#[derive(Debug, Clone)]
pub struct GroupResult {
    pub identity: GroupIdentity,
    pub max_score: f32,
    pub score: f32,
    pub total_hits: u64,
    pub hits: Vec<RankedHit>,
}

impl GroupResult {
    pub fn new(identity: GroupIdentity, score: f32, total_hits: u64, hits: Vec<RankedHit>) -> Self {
        let max_score = hits
            .iter()
            .map(|h| h.score)
            .filter(|s| !s.is_nan())
            .fold(f32::NAN, f32::max);
        Self {
            identity,
            max_score,
            score,
            total_hits,
            hits,
        }
    }

    pub fn sort_key(&self) -> SortKey<'_> {
        SortKey {
            values: Some(&self.identity.sort_values),
            score: self.score,
            doc: None,
        }
    }
}

impl PartialEq for GroupResult {
    fn eq(&self, other: &Self) -> bool {
        self.identity.value == other.identity.value
            && self.identity.sort_values == other.identity.sort_values
            && self.max_score.to_bits() == other.max_score.to_bits()
            && self.score.to_bits() == other.score.to_bits()
            && self.total_hits == other.total_hits
            && self.hits == other.hits
    }
}

/// A shard's (or the coordinator's) top groups.
#[derive(Debug, Clone)]
pub struct GroupedResultSet {
    /// Orders groups.
    pub group_sort: SortSpec,
    /// Orders hits inside each group.
    pub within_group_sort: SortSpec,
    pub total_hit_count: u64,
    pub total_grouped_hit_count: u64,
    /// Distinct group count when the engine tracked it.
    pub total_group_count: Option<u64>,
    pub max_score: f32,
    pub groups: Vec<GroupResult>,
}

impl GroupedResultSet {
    /// A result with no groups; max score is undefined.
    pub fn empty(group_sort: SortSpec, within_group_sort: SortSpec, total_hit_count: u64) -> Self {
        Self {
            group_sort,
            within_group_sort,
            total_hit_count,
            total_grouped_hit_count: 0,
            total_group_count: None,
            max_score: f32::NAN,
            groups: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

impl PartialEq for GroupedResultSet {
    fn eq(&self, other: &Self) -> bool {
        self.group_sort == other.group_sort
            && self.within_group_sort == other.within_group_sort
            && self.total_hit_count == other.total_hit_count
            && self.total_grouped_hit_count == other.total_grouped_hit_count
            && self.total_group_count == other.total_group_count
            && self.max_score.to_bits() == other.max_score.to_bits()
            && self.groups == other.groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_identity_equality_ignores_sort_values() {
        let a = GroupIdentity::new("bond", vec![SortValue::Float(0.9)]);
        let b = GroupIdentity::new("bond", vec![SortValue::Float(0.1)]);
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_group_value_order() {
        let mut values = vec![
            GroupValue::Text("b".into()),
            GroupValue::Double(2.5),
            GroupValue::Null,
            GroupValue::Long(3),
            GroupValue::Text("a".into()),
            GroupValue::Long(2),
        ];
        values.sort();
        assert_eq!(
            values,
            vec![
                GroupValue::Null,
                GroupValue::Long(2),
                GroupValue::Double(2.5),
                GroupValue::Long(3),
                GroupValue::Text("a".into()),
                GroupValue::Text("b".into()),
            ]
        );
    }

    #[test]
    fn test_long_and_double_with_same_magnitude_are_distinct() {
        let long = GroupValue::Long(1);
        let double = GroupValue::Double(1.0);
        assert_ne!(long, double);
        assert_eq!(long.cmp(&double), Ordering::Less);
    }

    #[test]
    fn test_group_result_max_score_from_hits() {
        let group = GroupResult::new(
            GroupIdentity::new("option", vec![]),
            0.8,
            2,
            vec![RankedHit::new(1, 0.8), RankedHit::new(2, 0.3)],
        );
        assert_eq!(group.max_score, 0.8);
    }

    #[test]
    fn test_empty_grouped_set_has_nan_max_score() {
        let set = GroupedResultSet::empty(SortSpec::relevance(), SortSpec::relevance(), 5);
        assert!(set.max_score.is_nan());
        assert_eq!(set.total_hit_count, 5);
        assert!(set.is_empty());
    }
}
