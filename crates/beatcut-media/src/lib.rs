// crates/beatcut-media/src/lib.rs
//
// FFmpeg-backed render pipeline. Everything that touches libav lives
// here; scheduling and chain assembly stay in beatcut-core.

pub mod editor;
pub mod filtergraph;
pub mod frame;
pub mod grabber;
pub mod helpers;
pub mod pump;
pub mod recorder;
pub mod worker;

// Re-export the main public API so front ends get one import path.
pub use editor::{BeatEditor, RenderOutcome};
pub use frame::{Frame, FrameKind};
pub use grabber::MediaGrabber;
pub use recorder::{MediaRecorder, RecorderSettings};
pub use worker::{EditEvent, EditWorker};
pub use beatcut_core::edit::{EditFlags, EditSpec};
pub use beatcut_core::error::{EditError, EditResult};
