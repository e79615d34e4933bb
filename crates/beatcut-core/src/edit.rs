// crates/beatcut-core/src/edit.rs
//
// The persisted description of one edit job: which clip to cut, which
// track drives the beat, where the segments and the final render land.
// Pure project data with no ffmpeg or runtime handles, so a spec can
// be written by any front end and replayed later.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{EditError, EditResult};
use crate::filter::FilterSpec;
use crate::info::IntroRange;
use crate::schedule::ClipCut;

/// Behaviour toggles, all off by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EditFlags {
    /// Raise the native log level to verbose for this process.
    pub debug_log:        bool,
    /// Shuffle the clip cut order before scheduling.
    pub shuffle_clips:    bool,
    /// Run per-segment export filters while composing the final video.
    pub process_segments: bool,
    /// Hint hardware decoders (CUVID) when opening inputs.
    pub hardware_decode:  bool,
}

/// One edit job, start to finish.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EditSpec {
    /// Clip the segments are cut from.
    pub source:            PathBuf,
    /// Track mixed under every segment in the final pass.
    pub backing_track:     PathBuf,
    /// Final render target.
    pub output:            PathBuf,
    /// Scratch directory for intermediate segment files.
    pub working_directory: PathBuf,
    /// Time between consecutive cuts, in milliseconds.
    pub beat_gaps:         Vec<f64>,
    /// Points in the source to cut to, consumed in order.
    pub cuts:              Vec<ClipCut>,
    /// Optional intro window rendered before the beat-driven segments.
    pub intro:             Option<IntroRange>,
    pub flags:             EditFlags,
    /// Filters applied during rendering, grouped by range and medium.
    pub filters:           Vec<FilterSpec>,
}

impl EditSpec {
    /// Rejects parameter combinations no schedule can be built from.
    /// Empty `beat_gaps` and empty `cuts` are both allowed; they yield
    /// an empty render rather than an error.
    pub fn validate(&self) -> EditResult<()> {
        for (i, gap) in self.beat_gaps.iter().enumerate() {
            if !gap.is_finite() || *gap < 0.0 {
                return Err(EditError::Schedule(format!(
                    "beat gap {i} is {gap}, expected a finite non-negative duration"
                )));
            }
        }
        for (i, cut) in self.cuts.iter().enumerate() {
            if cut.timestamp_micros < 0 {
                return Err(EditError::Schedule(format!(
                    "cut {i} points at {}us, before the start of the clip",
                    cut.timestamp_micros
                )));
            }
        }
        if let Some(intro) = &self.intro {
            if intro.end_micros < intro.start_micros {
                return Err(EditError::Schedule(format!(
                    "intro ends at {}us before it starts at {}us",
                    intro.end_micros, intro.start_micros
                )));
            }
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> EditResult<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| EditError::Sink(format!("encode spec: {e}")))?;
        fs::write(path, json)
            .map_err(|e| EditError::Sink(format!("write spec {}: {e}", path.display())))
    }

    pub fn load(path: &Path) -> EditResult<Self> {
        let json = fs::read_to_string(path)
            .map_err(|e| EditError::Source(format!("read spec {}: {e}", path.display())))?;
        serde_json::from_str(&json)
            .map_err(|e| EditError::Source(format!("parse spec {}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec_with_gaps(gaps: Vec<f64>) -> EditSpec {
        EditSpec { beat_gaps: gaps, ..EditSpec::default() }
    }

    #[test]
    fn empty_spec_is_valid() {
        assert!(EditSpec::default().validate().is_ok());
    }

    #[test]
    fn rejects_nan_gap() {
        let spec = spec_with_gaps(vec![480.0, f64::NAN]);
        assert!(matches!(spec.validate(), Err(EditError::Schedule(_))));
    }

    #[test]
    fn rejects_negative_gap() {
        let spec = spec_with_gaps(vec![-1.0]);
        assert!(matches!(spec.validate(), Err(EditError::Schedule(_))));
    }

    #[test]
    fn rejects_negative_cut() {
        let spec = EditSpec {
            cuts: vec![ClipCut { timestamp_micros: -5, mute: false }],
            ..EditSpec::default()
        };
        assert!(matches!(spec.validate(), Err(EditError::Schedule(_))));
    }

    #[test]
    fn rejects_inverted_intro() {
        let spec = EditSpec {
            intro: Some(IntroRange { start_micros: 9_000_000, end_micros: 3_000_000 }),
            ..EditSpec::default()
        };
        assert!(matches!(spec.validate(), Err(EditError::Schedule(_))));
    }

    #[test]
    fn round_trips_through_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("edit.json");

        let spec = EditSpec {
            source:    PathBuf::from("clip.mp4"),
            beat_gaps: vec![480.0, 520.5],
            cuts:      vec![ClipCut { timestamp_micros: 1_000_000, mute: true }],
            intro:     Some(IntroRange { start_micros: 0, end_micros: 2_000_000 }),
            ..EditSpec::default()
        };
        spec.save(&path).unwrap();

        assert_eq!(EditSpec::load(&path).unwrap(), spec);
    }

    #[test]
    fn load_reports_missing_file_as_source_error() {
        let err = EditSpec::load(Path::new("/nonexistent/edit.json")).unwrap_err();
        assert!(matches!(err, EditError::Source(_)));
    }
}
