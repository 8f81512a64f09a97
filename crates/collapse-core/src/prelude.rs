//! Collapse Core Prelude — convenient imports for common usage.
//!
//! ```rust
//! use collapse_core::prelude::*;
//! ```

pub use crate::codec;
pub use crate::error::{CodecError, CodecErrorKind, CodecResult};
pub use crate::group::{GroupIdentity, GroupResult, GroupValue, GroupedResultSet};
pub use crate::sort::{compare_scores_desc, SortField, SortFieldKind, SortSpec, SortValue};
pub use crate::types::{
    AuxiliaryPayloads, DocId, RankedHit, RankedResultSet, ResultPhase, ShardId, ShardPayload,
    ShardQueryResult,
};
