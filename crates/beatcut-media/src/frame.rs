// crates/beatcut-media/src/frame.rs
//
// Decoded frame envelope. Grabbers hand these out, the pump routes
// them by kind, recorders and filter graphs consume the inner ffmpeg
// frame. `micros` is the source timestamp in microseconds, the one
// unit the whole pipeline schedules in.

use ffmpeg_the_third as ffmpeg;

use ffmpeg::frame;

pub enum Frame {
    Video { picture: frame::Video, micros: i64 },
    Audio { samples: frame::Audio, micros: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Video,
    Audio,
}

impl Frame {
    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::Video { .. } => FrameKind::Video,
            Frame::Audio { .. } => FrameKind::Audio,
        }
    }

    pub fn micros(&self) -> i64 {
        match self {
            Frame::Video { micros, .. } => *micros,
            Frame::Audio { micros, .. } => *micros,
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, Frame::Video { .. })
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, Frame::Audio { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_and_timestamp_follow_the_variant() {
        let video = Frame::Video { picture: frame::Video::empty(), micros: 40_000 };
        assert_eq!(video.kind(), FrameKind::Video);
        assert_eq!(video.micros(), 40_000);
        assert!(video.is_video());
        assert!(!video.is_audio());

        let audio = Frame::Audio { samples: frame::Audio::empty(), micros: 23_220 };
        assert_eq!(audio.kind(), FrameKind::Audio);
        assert_eq!(audio.micros(), 23_220);
        assert!(audio.is_audio());
    }
}
