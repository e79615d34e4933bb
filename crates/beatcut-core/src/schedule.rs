// crates/beatcut-core/src/schedule.rs
//
// Turns beat gaps and clip cuts into an ordered segment plan:
//   • one optional intro segment rendered ahead of the beat cuts
//   • one interval segment per beat gap, budgeted in milliseconds
//   • cuts are consumed front to back; each consumed cut seeks the
//     source and its mute flag stays in force until the next cut
//     overrides it
// The plan is pure data. Rendering it is the media crate's job.

use std::collections::VecDeque;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::info::IntroRange;

/// A point in the source to cut to when the next beat lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipCut {
    /// Seek target in microseconds of source time.
    pub timestamp_micros: i64,
    /// Whether the segment cut here keeps its own audio.
    pub mute:             bool,
}

/// What one segment renders.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SegmentBody {
    /// Fixed window of the source, played through without filtering.
    Intro {
        start_micros: i64,
        end_micros:   i64,
    },
    /// Beat-budgeted run of frames, optionally after a seek.
    Interval {
        seek_micros: Option<i64>,
        mute:        bool,
        duration_ms: f64,
    },
}

/// One entry of the render plan. `index` names the segment file,
/// `start_offset_ms` is where the segment lands in the final timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlannedSegment {
    pub index:           usize,
    pub body:            SegmentBody,
    pub start_offset_ms: f64,
}

impl PlannedSegment {
    pub fn planned_duration_ms(&self) -> f64 {
        match self.body {
            SegmentBody::Intro { start_micros, end_micros } => {
                (end_micros - start_micros) as f64 / 1000.0
            }
            SegmentBody::Interval { duration_ms, .. } => duration_ms,
        }
    }
}

/// Ordered cut consumer. Starts muted; once a cut is consumed its mute
/// flag carries forward, including past the end of the list.
#[derive(Debug, Clone)]
pub struct CutSequence {
    cuts: VecDeque<ClipCut>,
    mute: bool,
}

impl CutSequence {
    pub fn new(cuts: &[ClipCut]) -> Self {
        Self { cuts: cuts.iter().copied().collect(), mute: true }
    }

    /// Seek target and mute state for the next segment. `None` once the
    /// cuts run out; later segments then continue from wherever the
    /// source was left.
    pub fn advance(&mut self) -> (Option<i64>, bool) {
        match self.cuts.pop_front() {
            Some(cut) => {
                self.mute = cut.mute;
                (Some(cut.timestamp_micros), self.mute)
            }
            None => (None, self.mute),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.cuts.is_empty()
    }
}

/// Builds the full segment plan. With an intro the beat segments start
/// at index 1, otherwise at 0. Shuffling permutes the cut list only;
/// the beat gaps keep their order so the cuts still land on the beats.
pub fn plan_segments(
    beat_gaps: &[f64],
    cuts: &[ClipCut],
    intro: Option<IntroRange>,
    shuffle: bool,
    rng: &mut impl Rng,
) -> Vec<PlannedSegment> {
    let mut cuts = cuts.to_vec();
    if shuffle {
        cuts.shuffle(rng);
    }

    let mut segments = Vec::with_capacity(beat_gaps.len() + usize::from(intro.is_some()));
    let mut offset_ms = 0.0;

    if let Some(range) = intro {
        segments.push(PlannedSegment {
            index:           0,
            body:            SegmentBody::Intro {
                start_micros: range.start_micros,
                end_micros:   range.end_micros,
            },
            start_offset_ms: 0.0,
        });
        offset_ms += range.duration_micros() as f64 / 1000.0;
    }

    let base = segments.len();
    let mut cursor = CutSequence::new(&cuts);
    for (n, gap) in beat_gaps.iter().enumerate() {
        let (seek_micros, mute) = cursor.advance();
        segments.push(PlannedSegment {
            index:           base + n,
            body:            SegmentBody::Interval { seek_micros, mute, duration_ms: *gap },
            start_offset_ms: offset_ms,
        });
        offset_ms += *gap;
    }

    segments
}
