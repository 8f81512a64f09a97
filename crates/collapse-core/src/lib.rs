//! # Collapse Core
//!
//! Shared result model for field-collapsing search over independently
//! indexed shards, plus the binary codec used between shards and the
//! coordinator.
//!
//! - [`types`] — ranked hits, ranked result sets and the per-shard envelope
//! - [`group`] — group identities and grouped result sets
//! - [`sort`] — typed sort values, sort descriptors and their total order
//! - [`codec`] — versioned, tagged binary encoding of all of the above
//! - [`error`] — codec errors
//!
//! ## Quick Start
//!
//! ```rust
//! use collapse_core::prelude::*;
//!
//! let set = RankedResultSet::new(2, 0.9, vec![
//!     RankedHit::new(1, 0.9),
//!     RankedHit::new(2, 0.5),
//! ]);
//! let bytes = codec::encode_ranked(&set).unwrap();
//! assert_eq!(codec::decode_ranked(&bytes).unwrap(), set);
//! ```

pub mod codec;
pub mod error;
pub mod group;
pub mod prelude;
pub mod sort;
pub mod types;
