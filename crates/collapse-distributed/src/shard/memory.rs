//! In-memory local search engine.
//!
//! `MemoryIndex` holds JSON documents, matches them with a simple term
//! tokenizer and supports field sorts and field or function grouping. It is
//! the engine behind tests and the demo cluster, not a full-text index.

use super::{GroupSpec, LocalSearchEngine};
use crate::error::EngineError;
use crate::types::{GroupBy, Query, StoredDocument};
use collapse_core::group::{GroupIdentity, GroupResult, GroupValue, GroupedResultSet};
use collapse_core::sort::{compare_keys, SortField, SortFieldKind, SortSpec, SortValue};
use collapse_core::types::{DocId, RankedHit, RankedResultSet};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// Computes a group value from a document's fields.
pub type GroupFunction = Arc<dyn Fn(&Map<String, Value>) -> GroupValue + Send + Sync>;

/// Default field holding the searchable text.
pub const DEFAULT_TEXT_FIELD: &str = "body";

/// Case-insensitive tokenization with stopword removal and a minimum token
/// length of three characters.
pub fn tokenize(text: &str) -> Vec<String> {
    let stopwords: HashSet<&str> = [
        "the", "a", "an", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had",
        "do", "does", "did", "will", "would", "could", "should", "may", "might", "shall", "can",
        "need", "to", "of", "in", "for", "on", "with", "at", "by", "from", "as", "into", "through",
        "during", "before", "after", "above", "below", "between", "out", "off", "over", "under",
        "again", "further", "then", "once", "and", "but", "or", "if", "while", "what", "which",
        "who", "this", "that", "these", "those", "it", "its", "how",
    ]
    .iter()
    .cloned()
    .collect();

    text.to_lowercase()
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|w| w.len() >= 3 && !stopwords.contains(w.as_str()))
        .collect()
}

struct IndexedDocument {
    fields: Map<String, Value>,
    term_freqs: HashMap<String, u32>,
    length: usize,
    source: String,
}

/// Documents held in memory, addressed by insertion order.
pub struct MemoryIndex {
    docs: Vec<IndexedDocument>,
    functions: HashMap<String, GroupFunction>,
}

/// Builder for [`MemoryIndex`].
pub struct MemoryIndexBuilder {
    text_field: String,
    sources: Vec<String>,
    functions: HashMap<String, GroupFunction>,
}

impl MemoryIndexBuilder {
    /// Field whose text is tokenized for matching.
    pub fn text_field(mut self, name: impl Into<String>) -> Self {
        self.text_field = name.into();
        self
    }

    /// Add one document given as a JSON object.
    pub fn document(mut self, json: impl Into<String>) -> Self {
        self.sources.push(json.into());
        self
    }

    /// Add every object of a JSON array.
    pub fn json_array(mut self, json: &str) -> Result<Self, EngineError> {
        let values: Vec<Value> = serde_json::from_str(json)
            .map_err(|e| EngineError::new(format!("invalid document array: {}", e)))?;
        self.sources
            .extend(values.into_iter().map(|v| v.to_string()));
        Ok(self)
    }

    /// Register a named grouping function.
    pub fn function(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&Map<String, Value>) -> GroupValue + Send + Sync + 'static,
    ) -> Self {
        self.functions.insert(name.into(), Arc::new(f));
        self
    }

    pub fn build(self) -> Result<MemoryIndex, EngineError> {
        let mut docs = Vec::with_capacity(self.sources.len());
        for (position, source) in self.sources.into_iter().enumerate() {
            let fields = match serde_json::from_str::<Value>(&source) {
                Ok(Value::Object(fields)) => fields,
                Ok(_) => {
                    return Err(EngineError::new(format!(
                        "document {} is not a JSON object",
                        position
                    )))
                }
                Err(e) => {
                    return Err(EngineError::new(format!(
                        "document {} is not valid JSON: {}",
                        position, e
                    )))
                }
            };
            let tokens = fields
                .get(&self.text_field)
                .and_then(Value::as_str)
                .map(tokenize)
                .unwrap_or_default();
            let mut term_freqs = HashMap::new();
            for token in &tokens {
                *term_freqs.entry(token.clone()).or_insert(0) += 1;
            }
            docs.push(IndexedDocument {
                fields,
                term_freqs,
                length: tokens.len().max(1),
                source,
            });
        }
        Ok(MemoryIndex {
            docs,
            functions: self.functions,
        })
    }
}

impl MemoryIndex {
    pub fn builder() -> MemoryIndexBuilder {
        MemoryIndexBuilder {
            text_field: DEFAULT_TEXT_FIELD.to_string(),
            sources: Vec::new(),
            functions: HashMap::new(),
        }
    }

    /// Build an index from a JSON array of documents.
    pub fn from_json_array(json: &str) -> Result<Self, EngineError> {
        Self::builder().json_array(json)?.build()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Matching documents with their scores, in doc order.
    fn matches(&self, query: &Query) -> Vec<(DocId, f32)> {
        let terms = tokenize(&query.text);
        self.docs
            .iter()
            .enumerate()
            .filter_map(|(id, doc)| {
                if terms.is_empty() {
                    return Some((id as DocId, 1.0));
                }
                let tf: u32 = terms
                    .iter()
                    .map(|t| doc.term_freqs.get(t).copied().unwrap_or(0))
                    .sum();
                if tf == 0 {
                    return None;
                }
                Some((id as DocId, tf as f32 / (doc.length as f32).sqrt()))
            })
            .collect()
    }

    fn field_sort_value(&self, doc_id: DocId, score: f32, field: &SortField) -> SortValue {
        let raw = field
            .field
            .as_deref()
            .and_then(|name| self.docs[doc_id as usize].fields.get(name));
        match (&field.kind, raw) {
            (SortFieldKind::Score, _) => SortValue::Float(score),
            (SortFieldKind::Doc, _) => SortValue::Int(doc_id as i32),
            (_, None) | (_, Some(Value::Null)) => SortValue::Null,
            (SortFieldKind::Int, Some(v)) => v
                .as_i64()
                .and_then(|n| i32::try_from(n).ok())
                .map(SortValue::Int)
                .unwrap_or(SortValue::Null),
            (SortFieldKind::Long, Some(v)) => v.as_i64().map(SortValue::Long).unwrap_or(SortValue::Null),
            (SortFieldKind::Float, Some(v)) => v
                .as_f64()
                .map(|n| SortValue::Float(n as f32))
                .unwrap_or(SortValue::Null),
            (SortFieldKind::Double, Some(v)) => {
                v.as_f64().map(SortValue::Double).unwrap_or(SortValue::Null)
            }
            (SortFieldKind::Text, Some(Value::String(s))) => SortValue::Text(s.clone()),
            (SortFieldKind::Text, Some(v)) => SortValue::Text(v.to_string()),
            (SortFieldKind::Custom(_), Some(v)) => SortValue::Custom(v.to_string()),
        }
    }

    fn hit(&self, doc_id: DocId, score: f32, sort: &SortSpec) -> RankedHit {
        let hit = RankedHit::new(doc_id, score);
        if sort.is_relevance() {
            return hit;
        }
        hit.with_sort_values(
            sort.fields()
                .iter()
                .map(|f| self.field_sort_value(doc_id, score, f))
                .collect(),
        )
    }

    fn group_value(&self, doc_id: DocId, group_by: &GroupBy) -> Result<GroupValue, EngineError> {
        let fields = &self.docs[doc_id as usize].fields;
        match group_by {
            GroupBy::Field(name) => Ok(match fields.get(name) {
                None | Some(Value::Null) => GroupValue::Null,
                Some(Value::String(s)) => GroupValue::Text(s.clone()),
                Some(Value::Number(n)) => match n.as_i64() {
                    Some(v) => GroupValue::Long(v),
                    None => GroupValue::Double(n.as_f64().unwrap_or(f64::NAN)),
                },
                Some(other) => GroupValue::Text(other.to_string()),
            }),
            GroupBy::Function(name) => self
                .functions
                .get(name)
                .map(|f| f(fields))
                .ok_or_else(|| EngineError::new(format!("unknown group function '{}'", name))),
        }
    }

    fn sort_hits(hits: &mut [RankedHit], sort: &SortSpec) {
        hits.sort_by(|a, b| {
            compare_keys(sort, &a.sort_key(), &b.sort_key()).then(a.doc_id.cmp(&b.doc_id))
        });
    }
}

fn max_score(scores: impl Iterator<Item = f32>) -> f32 {
    scores.filter(|s| !s.is_nan()).fold(f32::NAN, f32::max)
}

impl LocalSearchEngine for MemoryIndex {
    fn search(
        &self,
        query: &Query,
        sort: &SortSpec,
        limit: usize,
    ) -> Result<RankedResultSet, EngineError> {
        let matches = self.matches(query);
        let mut hits: Vec<RankedHit> = matches
            .iter()
            .map(|&(doc, score)| self.hit(doc, score, sort))
            .collect();
        Self::sort_hits(&mut hits, sort);
        hits.truncate(limit);
        Ok(RankedResultSet::new(
            matches.len() as u64,
            max_score(matches.iter().map(|m| m.1)),
            hits,
        ))
    }

    fn search_grouped(
        &self,
        query: &Query,
        spec: &GroupSpec,
    ) -> Result<GroupedResultSet, EngineError> {
        let matches = self.matches(query);
        let allowed: Option<HashSet<&GroupValue>> =
            spec.restrict_to.as_ref().map(|groups| groups.iter().collect());

        let mut members: HashMap<GroupValue, Vec<(DocId, f32)>> = HashMap::new();
        for &(doc, score) in &matches {
            let value = self.group_value(doc, &spec.group_by)?;
            if allowed.as_ref().map_or(true, |a| a.contains(&value)) {
                members.entry(value).or_default().push((doc, score));
            }
        }
        let distinct_groups = members.len() as u64;

        let mut groups = Vec::with_capacity(members.len());
        for (value, docs) in members {
            // The group ranks where its best document ranks under the group sort.
            let mut by_group_sort: Vec<RankedHit> = docs
                .iter()
                .map(|&(doc, score)| {
                    RankedHit::new(doc, score).with_sort_values(
                        spec.group_sort
                            .fields()
                            .iter()
                            .map(|f| self.field_sort_value(doc, score, f))
                            .collect(),
                    )
                })
                .collect();
            Self::sort_hits(&mut by_group_sort, &spec.group_sort);
            let top = &by_group_sort[0];

            let mut hits: Vec<RankedHit> = docs
                .iter()
                .map(|&(doc, score)| self.hit(doc, score, &spec.within_group_sort))
                .collect();
            Self::sort_hits(&mut hits, &spec.within_group_sort);
            hits.truncate(spec.hits_per_group);

            let best = max_score(docs.iter().map(|d| d.1));
            groups.push(GroupResult {
                identity: GroupIdentity {
                    value,
                    sort_values: top.sort_values.clone().unwrap_or_default(),
                },
                max_score: best,
                score: top.score,
                total_hits: docs.len() as u64,
                hits,
            });
        }

        groups.sort_by(|a, b| {
            compare_keys(&spec.group_sort, &a.sort_key(), &b.sort_key())
                .then_with(|| a.identity.value.cmp(&b.identity.value))
        });
        groups.truncate(spec.num_groups);

        Ok(GroupedResultSet {
            group_sort: spec.group_sort.clone(),
            within_group_sort: spec.within_group_sort.clone(),
            total_hit_count: matches.len() as u64,
            total_grouped_hit_count: groups.iter().map(|g| g.total_hits).sum(),
            total_group_count: spec.track_group_count.then_some(distinct_groups),
            max_score: max_score(groups.iter().map(|g| g.max_score)),
            groups,
        })
    }

    fn fetch(&self, doc_ids: &[DocId]) -> Result<Vec<StoredDocument>, EngineError> {
        doc_ids
            .iter()
            .map(|&doc_id| {
                self.docs
                    .get(doc_id as usize)
                    .map(|doc| StoredDocument {
                        doc_id,
                        source: doc.source.clone(),
                    })
                    .ok_or_else(|| EngineError::new(format!("no document {}", doc_id)))
            })
            .collect()
    }

    fn count(&self, query: &Query) -> Result<u64, EngineError> {
        Ok(self.matches(query).len() as u64)
    }

    fn facets(&self, query: &Query, fields: &[String]) -> Result<Option<Vec<u8>>, EngineError> {
        let matches = self.matches(query);
        let mut counts: BTreeMap<&str, BTreeMap<String, u64>> = BTreeMap::new();
        for field in fields {
            let per_value = counts.entry(field.as_str()).or_default();
            for &(doc, _) in &matches {
                let key = match self.docs[doc as usize].fields.get(field) {
                    None | Some(Value::Null) => continue,
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                };
                *per_value.entry(key).or_insert(0) += 1;
            }
        }
        serde_json::to_vec(&counts)
            .map(Some)
            .map_err(|e| EngineError::new(format!("facet encoding failed: {}", e)))
    }

    fn suggest(&self, prefix: &str) -> Result<Option<Vec<u8>>, EngineError> {
        let prefix = prefix.to_lowercase();
        let mut frequencies: HashMap<&str, usize> = HashMap::new();
        for doc in &self.docs {
            for term in doc.term_freqs.keys() {
                if term.starts_with(&prefix) {
                    *frequencies.entry(term.as_str()).or_insert(0) += 1;
                }
            }
        }
        if frequencies.is_empty() {
            return Ok(None);
        }
        let mut terms: Vec<(&str, usize)> = frequencies.into_iter().collect();
        terms.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        terms.truncate(5);
        let terms: Vec<&str> = terms.into_iter().map(|t| t.0).collect();
        serde_json::to_vec(&terms)
            .map(Some)
            .map_err(|e| EngineError::new(format!("suggest encoding failed: {}", e)))
    }

    fn doc_count(&self) -> usize {
        self.docs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> MemoryIndex {
        MemoryIndex::from_json_array(
            r#"[
                {"body": "treasury bond yields rise", "kind": "bond", "price": 101},
                {"body": "corporate bond spreads", "kind": "bond", "price": 97},
                {"body": "equity option volatility", "kind": "option", "price": 12},
                {"body": "bond option pricing", "kind": "option"},
                {"body": "unrelated cooking recipe"}
            ]"#,
        )
        .unwrap()
    }

    fn spec(group_sort: SortSpec) -> GroupSpec {
        GroupSpec {
            group_by: GroupBy::field("kind"),
            group_sort,
            within_group_sort: SortSpec::relevance(),
            num_groups: 10,
            hits_per_group: 10,
            restrict_to: None,
            track_group_count: true,
        }
    }

    #[test]
    fn test_tokenize_basic() {
        let tokens = tokenize("The cell membrane");
        assert!(tokens.contains(&"cell".to_string()));
        assert!(tokens.contains(&"membrane".to_string()));
        assert!(!tokens.contains(&"the".to_string()));
    }

    #[test]
    fn test_tokenize_trims_punctuation() {
        let tokens = tokenize("cell, membrane.");
        assert_eq!(tokens, vec!["cell".to_string(), "membrane".to_string()]);
    }

    #[test]
    fn test_search_counts_all_matches() {
        let index = index();
        let set = index
            .search(&Query::new("bond"), &SortSpec::relevance(), 1)
            .unwrap();
        assert_eq!(set.total_hits, 3);
        assert_eq!(set.hits.len(), 1);
        assert!(set.hits[0].sort_values.is_none());
        assert_eq!(set.max_score, set.hits[0].score);
    }

    #[test]
    fn test_empty_query_matches_everything() {
        let index = index();
        assert_eq!(index.count(&Query::match_all()).unwrap(), 5);
    }

    #[test]
    fn test_field_sort_with_missing_value_first() {
        let index = index();
        let sort = SortSpec::new(vec![SortField::field("price", SortFieldKind::Long)]);
        let set = index.search(&Query::new("bond"), &sort, 10).unwrap();
        let ids: Vec<DocId> = set.hits.iter().map(|h| h.doc_id).collect();
        assert_eq!(ids, vec![3, 1, 0]);
        assert_eq!(set.hits[0].sort_values, Some(vec![SortValue::Null]));
    }

    #[test]
    fn test_grouped_search_by_field() {
        let index = index();
        let set = index
            .search_grouped(&Query::new("bond option"), &spec(SortSpec::relevance()))
            .unwrap();
        assert_eq!(set.total_hit_count, 4);
        assert_eq!(set.total_group_count, Some(2));
        assert_eq!(set.total_grouped_hit_count, 4);
        let values: Vec<String> = set.groups.iter().map(|g| g.identity.value.to_string()).collect();
        assert_eq!(values.len(), 2);
        assert!(set.groups[0].score >= set.groups[1].score);
    }

    #[test]
    fn test_grouped_search_restricted() {
        let index = index();
        let mut spec = spec(SortSpec::relevance());
        spec.restrict_to = Some(vec![GroupValue::from("option")]);
        spec.hits_per_group = 1;
        let set = index.search_grouped(&Query::new("bond option"), &spec).unwrap();
        assert_eq!(set.groups.len(), 1);
        assert_eq!(set.groups[0].identity.value, GroupValue::from("option"));
        assert_eq!(set.groups[0].total_hits, 2);
        assert_eq!(set.groups[0].hits.len(), 1);
    }

    #[test]
    fn test_group_by_function() {
        let index = MemoryIndex::builder()
            .document(r#"{"body": "alpha", "price": 5}"#)
            .document(r#"{"body": "alpha", "price": 500}"#)
            .function("price_band", |fields| {
                match fields.get("price").and_then(Value::as_i64) {
                    Some(p) if p >= 100 => GroupValue::from("high"),
                    Some(_) => GroupValue::from("low"),
                    None => GroupValue::Null,
                }
            })
            .build()
            .unwrap();
        let mut spec = spec(SortSpec::relevance());
        spec.group_by = GroupBy::function("price_band");
        let set = index.search_grouped(&Query::new("alpha"), &spec).unwrap();
        assert_eq!(set.groups.len(), 2);

        spec.group_by = GroupBy::function("missing");
        assert!(index.search_grouped(&Query::new("alpha"), &spec).is_err());
    }

    #[test]
    fn test_fetch_unknown_document_fails() {
        let index = index();
        assert_eq!(index.fetch(&[0, 2]).unwrap().len(), 2);
        assert!(index.fetch(&[99]).is_err());
    }

    #[test]
    fn test_facets_and_suggest_payloads() {
        let index = index();
        let facets = index
            .facets(&Query::new("bond"), &["kind".to_string()])
            .unwrap()
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&facets).unwrap();
        assert_eq!(parsed["kind"]["bond"], 2);
        assert_eq!(parsed["kind"]["option"], 1);

        let suggest = index.suggest("bo").unwrap().unwrap();
        let parsed: Vec<String> = serde_json::from_slice(&suggest).unwrap();
        assert_eq!(parsed[0], "bond");
        assert!(index.suggest("zzz").unwrap().is_none());
    }

    #[test]
    fn test_invalid_documents_rejected() {
        assert!(MemoryIndex::builder().document("[1, 2]").build().is_err());
        assert!(MemoryIndex::builder().document("{oops").build().is_err());
    }
}
