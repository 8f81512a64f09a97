//! Scroll ids: which context each shard keeps open for a scrolling search.
//!
//! Plain form is `<search type>;<count>;<context>:<shard>:<node>;...`,
//! carried as URL-safe base64 without padding.

use crate::error::SearchError;
use crate::types::{NodeId, SearchType};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use collapse_core::types::ShardId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrollContext {
    pub shard_id: ShardId,
    pub node: NodeId,
    pub context_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrollId {
    pub search_type: SearchType,
    pub contexts: Vec<ScrollContext>,
}

impl ScrollId {
    pub fn encode(&self) -> String {
        let mut plain = format!("{};{}", self.search_type.as_str(), self.contexts.len());
        for ctx in &self.contexts {
            plain.push_str(&format!(";{}:{}:{}", ctx.context_id, ctx.shard_id.as_u32(), ctx.node));
        }
        URL_SAFE_NO_PAD.encode(plain)
    }

    pub fn parse(scroll_id: &str) -> Result<Self, SearchError> {
        let invalid = |detail: &str| SearchError::InvalidRequest(format!("scroll id: {}", detail));

        let raw = URL_SAFE_NO_PAD
            .decode(scroll_id)
            .map_err(|_| invalid("not base64"))?;
        let plain = String::from_utf8(raw).map_err(|_| invalid("not UTF-8"))?;
        let mut parts = plain.split(';');

        let search_type = parts
            .next()
            .and_then(SearchType::parse)
            .ok_or_else(|| invalid("unknown search type"))?;
        let count: usize = parts
            .next()
            .and_then(|c| c.parse().ok())
            .ok_or_else(|| invalid("missing context count"))?;

        let mut contexts = Vec::with_capacity(count);
        for part in parts {
            let mut fields = part.splitn(3, ':');
            let context_id = fields.next().and_then(|v| v.parse().ok());
            let shard = fields.next().and_then(|v| v.parse().ok());
            let node = fields.next();
            match (context_id, shard, node) {
                (Some(context_id), Some(shard), Some(node)) => contexts.push(ScrollContext {
                    shard_id: ShardId::new(shard),
                    node: NodeId::new(node),
                    context_id,
                }),
                _ => return Err(invalid("malformed context entry")),
            }
        }
        if contexts.len() != count {
            return Err(invalid("context count mismatch"));
        }
        Ok(Self {
            search_type,
            contexts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scroll_id_is_url_safe_and_parses_back() {
        let scroll = ScrollId {
            search_type: SearchType::QueryThenFetch,
            contexts: vec![
                ScrollContext {
                    shard_id: ShardId::new(0),
                    node: NodeId::new("10.0.0.1:7400"),
                    context_id: 42,
                },
                ScrollContext {
                    shard_id: ShardId::new(3),
                    node: NodeId::new("local"),
                    context_id: 7,
                },
            ],
        };
        let encoded = scroll.encode();
        assert!(encoded
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_eq!(ScrollId::parse(&encoded).unwrap(), scroll);
    }

    #[test]
    fn test_bad_scroll_ids() {
        assert!(ScrollId::parse("!!!").is_err());
        let wrong_count = URL_SAFE_NO_PAD.encode("count;2;1:0:a");
        assert!(ScrollId::parse(&wrong_count).is_err());
    }
}
