// crates/beatcut-core/src/info.rs
//
// Stream property snapshots. Pure data probed from the source clip once
// per run, with no ffmpeg types or runtime handles, so the scheduling
// and filter layers can be exercised without touching real media.

use serde::{Deserialize, Serialize};

/// Properties of the video stream being cut.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoParams {
    pub frame_rate:   f64,
    pub width:        u32,
    pub height:       u32,
    pub aspect_ratio: f64,
    pub bit_rate:     usize,
    pub pixel_format: String,
    pub codec_name:   String,
}

impl Default for VideoParams {
    fn default() -> Self {
        Self {
            frame_rate:   30.0,
            width:        0,
            height:       0,
            aspect_ratio: 1.0,
            bit_rate:     0,
            pixel_format: String::from("none"),
            codec_name:   String::from("none"),
        }
    }
}

/// Properties of the source audio stream, absent for silent clips.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioParams {
    pub channels:      u16,
    pub bit_rate:      usize,
    pub sample_rate:   u32,
    pub sample_format: String,
    pub codec_name:    String,
}

impl Default for AudioParams {
    fn default() -> Self {
        Self {
            channels:      0,
            bit_rate:      0,
            sample_rate:   0,
            sample_format: String::from("none"),
            codec_name:    String::from("none"),
        }
    }
}

/// Half-open intro window in source timestamps. Both ends in
/// microseconds of stream time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntroRange {
    pub start_micros: i64,
    pub end_micros:   i64,
}

impl IntroRange {
    pub fn duration_micros(&self) -> i64 {
        self.end_micros - self.start_micros
    }
}

/// Everything downstream stages need to know about the source clip.
#[derive(Debug, Clone, PartialEq)]
pub struct EditInfo {
    pub video:         VideoParams,
    pub audio:         Option<AudioParams>,
    pub length_micros: i64,
    pub intro:         Option<IntroRange>,
}

impl EditInfo {
    pub fn frame_time_ms(&self) -> f64 {
        1000.0 / self.video.frame_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intro_duration_subtracts_endpoints() {
        let intro = IntroRange { start_micros: 2_000_000, end_micros: 5_500_000 };
        assert_eq!(intro.duration_micros(), 3_500_000);
    }

    #[test]
    fn frame_time_follows_frame_rate() {
        let info = EditInfo {
            video:         VideoParams { frame_rate: 25.0, ..VideoParams::default() },
            audio:         None,
            length_micros: 0,
            intro:         None,
        };
        assert!((info.frame_time_ms() - 40.0).abs() < 1e-9);
    }
}
