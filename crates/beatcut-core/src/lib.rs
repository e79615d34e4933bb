// crates/beatcut-core/src/lib.rs
//
// No ffmpeg dependency: pure edit data, scheduling and filter-chain
// assembly. Everything here is deterministic and testable without
// touching real media; the beatcut-media crate drives it.

pub mod edit;
pub mod error;
pub mod filter;
pub mod info;
pub mod schedule;
pub mod segment;

// Re-export the main public API so downstream imports are simple.
pub use edit::{EditFlags, EditSpec};
pub use error::{EditError, EditResult};
pub use info::{AudioParams, EditInfo, IntroRange, VideoParams};
pub use schedule::{plan_segments, ClipCut, PlannedSegment, SegmentBody};
