//! Typed sort values, sort descriptors and the ordering rules shared by
//! shards and the coordinator.
//!
//! Every comparison here is total: floats use `total_cmp`, `Null` sorts
//! before any value in ascending order, and values of different kinds are
//! ranked by kind so heterogeneous tuples still compare deterministically.

use crate::types::DocId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A single typed sort value as produced by a shard's local sort.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SortValue {
    /// Missing value for this field.
    Null,
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Text(String),
    Bytes(Vec<u8>),
    Bool(bool),
    /// Value produced by a custom comparator. Comparable locally, never encodable.
    Custom(String),
}

impl SortValue {
    fn kind_rank(&self) -> u8 {
        match self {
            SortValue::Null => 0,
            SortValue::Bool(_) => 1,
            SortValue::Int(_) | SortValue::Long(_) | SortValue::Float(_) | SortValue::Double(_) => 2,
            SortValue::Text(_) => 3,
            SortValue::Bytes(_) => 4,
            SortValue::Custom(_) => 5,
        }
    }

    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SortValue::Int(v) => Some(*v as f64),
            SortValue::Long(v) => Some(*v as f64),
            SortValue::Float(v) => Some(*v as f64),
            SortValue::Double(v) => Some(*v),
            _ => None,
        }
    }
}

impl PartialEq for SortValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (SortValue::Null, SortValue::Null) => true,
            (SortValue::Int(a), SortValue::Int(b)) => a == b,
            (SortValue::Long(a), SortValue::Long(b)) => a == b,
            (SortValue::Float(a), SortValue::Float(b)) => a.to_bits() == b.to_bits(),
            (SortValue::Double(a), SortValue::Double(b)) => a.to_bits() == b.to_bits(),
            (SortValue::Text(a), SortValue::Text(b)) => a == b,
            (SortValue::Bytes(a), SortValue::Bytes(b)) => a == b,
            (SortValue::Bool(a), SortValue::Bool(b)) => a == b,
            (SortValue::Custom(a), SortValue::Custom(b)) => a == b,
            _ => false,
        }
    }
}

/// Ascending total order over sort values.
pub fn compare_values(a: &SortValue, b: &SortValue) -> Ordering {
    match (a, b) {
        (SortValue::Int(x), SortValue::Int(y)) => x.cmp(y),
        (SortValue::Long(x), SortValue::Long(y)) => x.cmp(y),
        (SortValue::Float(x), SortValue::Float(y)) => x.total_cmp(y),
        (SortValue::Double(x), SortValue::Double(y)) => x.total_cmp(y),
        (SortValue::Text(x), SortValue::Text(y)) => x.cmp(y),
        (SortValue::Bytes(x), SortValue::Bytes(y)) => x.cmp(y),
        (SortValue::Bool(x), SortValue::Bool(y)) => x.cmp(y),
        (SortValue::Custom(x), SortValue::Custom(y)) => x.cmp(y),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            _ => a.kind_rank().cmp(&b.kind_rank()),
        },
    }
}

/// Relevance order: higher scores first, NaN after every real score.
pub fn compare_scores_desc(a: f32, b: f32) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.total_cmp(&a),
    }
}

/// What a sort field orders by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortFieldKind {
    /// Relevance score, descending unless reversed.
    Score,
    /// Shard-local document id, ascending unless reversed.
    Doc,
    Int,
    Long,
    Float,
    Double,
    Text,
    /// Named custom comparator. Cannot travel on the wire.
    Custom(String),
}

/// One level of a sort.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortField {
    /// Field name; `None` for score and doc order.
    pub field: Option<String>,
    pub kind: SortFieldKind,
    pub reverse: bool,
}

impl SortField {
    pub fn score() -> Self {
        Self {
            field: None,
            kind: SortFieldKind::Score,
            reverse: false,
        }
    }

    pub fn doc() -> Self {
        Self {
            field: None,
            kind: SortFieldKind::Doc,
            reverse: false,
        }
    }

    pub fn field(name: impl Into<String>, kind: SortFieldKind) -> Self {
        Self {
            field: Some(name.into()),
            kind,
            reverse: false,
        }
    }

    /// The same field with the direction flipped.
    pub fn reversed(mut self) -> Self {
        self.reverse = !self.reverse;
        self
    }
}

/// An ordered list of sort fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortSpec(pub Vec<SortField>);

impl SortSpec {
    pub fn new(fields: Vec<SortField>) -> Self {
        Self(fields)
    }

    /// Plain relevance order.
    pub fn relevance() -> Self {
        Self(vec![SortField::score()])
    }

    /// Whether this spec orders by score alone.
    pub fn is_relevance(&self) -> bool {
        self.0.len() == 1 && self.0[0] == SortField::score()
    }

    pub fn fields(&self) -> &[SortField] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for SortSpec {
    fn default() -> Self {
        Self::relevance()
    }
}

/// The values an ordering looks at for one hit or one group.
#[derive(Debug, Clone, Copy)]
pub struct SortKey<'a> {
    pub values: Option<&'a [SortValue]>,
    pub score: f32,
    pub doc: Option<DocId>,
}

fn score_at(key: &SortKey<'_>, index: usize) -> f32 {
    match key.values.and_then(|v| v.get(index)) {
        Some(SortValue::Float(s)) => *s,
        Some(SortValue::Double(s)) => *s as f32,
        _ => key.score,
    }
}

fn doc_at(key: &SortKey<'_>, index: usize) -> Option<i64> {
    match key.values.and_then(|v| v.get(index)) {
        Some(SortValue::Int(d)) => Some(*d as i64),
        Some(SortValue::Long(d)) => Some(*d),
        _ => key.doc.map(i64::from),
    }
}

static NULL_VALUE: SortValue = SortValue::Null;

/// Compare two keys on the declared sort fields only.
pub fn compare_primary(spec: &SortSpec, a: &SortKey<'_>, b: &SortKey<'_>) -> Ordering {
    for (index, field) in spec.fields().iter().enumerate() {
        let ord = match &field.kind {
            SortFieldKind::Score => compare_scores_desc(score_at(a, index), score_at(b, index)),
            SortFieldKind::Doc => doc_at(a, index).cmp(&doc_at(b, index)),
            _ => {
                let x = a.values.and_then(|v| v.get(index)).unwrap_or(&NULL_VALUE);
                let y = b.values.and_then(|v| v.get(index)).unwrap_or(&NULL_VALUE);
                compare_values(x, y)
            }
        };
        let ord = if field.reverse { ord.reverse() } else { ord };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Compare on the declared fields, falling back to relevance.
pub fn compare_keys(spec: &SortSpec, a: &SortKey<'_>, b: &SortKey<'_>) -> Ordering {
    compare_primary(spec, a, b).then_with(|| compare_scores_desc(a.score, b.score))
}
