// crates/beatcut-media/src/pump.rs
//
// The audio/video frame pump for the composition pass. Walks a segment
// source and the single shared backing source in lock-step and routes
// every frame to the recorder:
//   • one backing frame is pulled per loop iteration, whatever kind
//     the segment frame turned out to be; the backing track is the
//     authoritative clock of the final mux
//   • segment audio is ducked against the backing frame through the
//     mixer; segment video goes through the per-segment filter chain
//     while the backing frame is recorded as-is
//   • when the segment runs out the loop ends without touching the
//     backing source again, so the next segment resumes the backing
//     track exactly where this one left it
// The pump only talks to traits. Real grabbers, graphs and recorders
// implement them; tests drive the pump with scripted frames.

use beatcut_core::error::EditResult;

use crate::frame::Frame;

/// Pull side of a decoder.
pub trait FrameSource {
    fn grab(&mut self) -> EditResult<Option<Frame>>;
}

/// Push side of an encoder.
pub trait FrameSink {
    fn write(&mut self, frame: &Frame) -> EditResult<()>;
}

/// Per-segment video filter chain. `process` may emit zero or more
/// frames into the sink; `finish` drains whatever the stages buffered.
/// Frames are taken by value so stages can restamp timestamps without
/// copying pixel data.
pub trait VideoChain {
    fn process(&mut self, frame: Frame, sink: &mut dyn FrameSink) -> EditResult<()>;
    fn finish(&mut self, sink: &mut dyn FrameSink) -> EditResult<()>;
}

/// Sidechain duck of the backing track under a segment's own audio.
pub trait BackingMixer {
    fn duck(&mut self, segment: Frame, backing: Frame, sink: &mut dyn FrameSink)
        -> EditResult<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStats {
    pub video_frames: u64,
    pub audio_frames: u64,
}

/// Drains `segment` to exhaustion. Every iteration decodes one segment
/// frame and one backing frame, then routes:
///   segment audio + backing frame  -> mixer (duck and record)
///   segment video + backing frame  -> backing recorded unmodified,
///                                     video through the chain
///   segment video, backing spent   -> video through the chain only
///   segment audio, backing spent   -> dropped; without the backing
///                                     clock there is nothing to mix
///                                     against
pub fn run(
    segment: &mut dyn FrameSource,
    backing: &mut dyn FrameSource,
    chain: &mut dyn VideoChain,
    mixer: &mut dyn BackingMixer,
    sink: &mut dyn FrameSink,
) -> EditResult<PumpStats> {
    let mut stats = PumpStats::default();

    while let Some(frame) = segment.grab()? {
        let backing_frame = backing.grab()?;

        match (frame, backing_frame) {
            (frame @ Frame::Audio { .. }, Some(backing_frame)) => {
                mixer.duck(frame, backing_frame, sink)?;
                stats.audio_frames += 1;
            }
            (frame @ Frame::Video { .. }, Some(backing_frame)) => {
                sink.write(&backing_frame)?;
                chain.process(frame, sink)?;
                stats.video_frames += 1;
            }
            (frame @ Frame::Video { .. }, None) => {
                chain.process(frame, sink)?;
                stats.video_frames += 1;
            }
            (Frame::Audio { .. }, None) => {
                stats.audio_frames += 1;
            }
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameKind;
    use ffmpeg_the_third::frame;
    use std::collections::VecDeque;

    fn video(micros: i64) -> Frame {
        Frame::Video { picture: frame::Video::empty(), micros }
    }

    fn audio(micros: i64) -> Frame {
        Frame::Audio { samples: frame::Audio::empty(), micros }
    }

    struct Scripted {
        frames: VecDeque<Frame>,
    }

    impl Scripted {
        fn new(frames: Vec<Frame>) -> Self {
            Self { frames: frames.into_iter().collect() }
        }

        fn remaining(&self) -> usize {
            self.frames.len()
        }
    }

    impl FrameSource for Scripted {
        fn grab(&mut self) -> EditResult<Option<Frame>> {
            Ok(self.frames.pop_front())
        }
    }

    #[derive(Default)]
    struct Tape {
        written: Vec<(FrameKind, i64)>,
    }

    impl FrameSink for Tape {
        fn write(&mut self, frame: &Frame) -> EditResult<()> {
            self.written.push((frame.kind(), frame.micros()));
            Ok(())
        }
    }

    /// Chain that forwards every frame unchanged, tagging nothing.
    #[derive(Default)]
    struct Forward {
        processed: Vec<i64>,
    }

    impl VideoChain for Forward {
        fn process(&mut self, frame: Frame, sink: &mut dyn FrameSink) -> EditResult<()> {
            self.processed.push(frame.micros());
            sink.write(&frame)
        }

        fn finish(&mut self, _sink: &mut dyn FrameSink) -> EditResult<()> {
            Ok(())
        }
    }

    /// Mixer that logs each (segment, backing) pair it was asked to duck.
    #[derive(Default)]
    struct DuckLog {
        pairs: Vec<(i64, i64)>,
    }

    impl BackingMixer for DuckLog {
        fn duck(
            &mut self,
            segment: Frame,
            backing: Frame,
            sink: &mut dyn FrameSink,
        ) -> EditResult<()> {
            self.pairs.push((segment.micros(), backing.micros()));
            sink.write(&segment)
        }
    }

    #[test]
    fn routes_by_segment_frame_kind() {
        let mut segment = Scripted::new(vec![video(0), audio(10), video(33)]);
        let mut backing = Scripted::new(vec![audio(100), audio(110), audio(121)]);
        let mut chain = Forward::default();
        let mut mixer = DuckLog::default();
        let mut tape = Tape::default();

        let stats =
            run(&mut segment, &mut backing, &mut chain, &mut mixer, &mut tape).unwrap();

        assert_eq!(stats, PumpStats { video_frames: 2, audio_frames: 1 });
        assert_eq!(chain.processed, vec![0, 33]);
        assert_eq!(mixer.pairs, vec![(10, 110)]);
        // backing frames paired with video land in the output unmodified
        assert_eq!(
            tape.written,
            vec![
                (FrameKind::Audio, 100),
                (FrameKind::Video, 0),
                (FrameKind::Audio, 10),
                (FrameKind::Audio, 121),
                (FrameKind::Video, 33),
            ]
        );
    }

    #[test]
    fn muted_segments_never_touch_the_mixer() {
        let mut segment = Scripted::new(vec![video(0), video(33), video(66)]);
        let mut backing = Scripted::new(vec![audio(0), audio(23), audio(46)]);
        let mut chain = Forward::default();
        let mut mixer = DuckLog::default();
        let mut tape = Tape::default();

        run(&mut segment, &mut backing, &mut chain, &mut mixer, &mut tape).unwrap();

        assert!(mixer.pairs.is_empty());
    }

    #[test]
    fn backing_consumption_resumes_across_segments() {
        // one shared backing source, two segment sources run in sequence
        let mut backing =
            Scripted::new(vec![audio(0), audio(1), audio(2), audio(3), audio(4)]);
        let mut mixer = DuckLog::default();
        let mut tape = Tape::default();

        let mut first = Scripted::new(vec![audio(100), audio(101)]);
        let mut chain = Forward::default();
        run(&mut first, &mut backing, &mut chain, &mut mixer, &mut tape).unwrap();

        let mut second = Scripted::new(vec![audio(200), audio(201), audio(202)]);
        let mut chain = Forward::default();
        run(&mut second, &mut backing, &mut chain, &mut mixer, &mut tape).unwrap();

        // no backing frame skipped or replayed at the boundary
        let backing_order: Vec<i64> = mixer.pairs.iter().map(|(_, b)| *b).collect();
        assert_eq!(backing_order, vec![0, 1, 2, 3, 4]);
        assert_eq!(backing.remaining(), 0);
    }

    #[test]
    fn segment_eof_leaves_backing_untouched() {
        let mut segment = Scripted::new(vec![video(0)]);
        let mut backing = Scripted::new(vec![audio(0), audio(23), audio(46)]);
        let mut chain = Forward::default();
        let mut mixer = DuckLog::default();
        let mut tape = Tape::default();

        run(&mut segment, &mut backing, &mut chain, &mut mixer, &mut tape).unwrap();

        assert_eq!(backing.remaining(), 2);
    }

    #[test]
    fn spent_backing_drops_segment_audio_but_keeps_video() {
        let mut segment = Scripted::new(vec![video(0), audio(10), video(33)]);
        let mut backing = Scripted::new(vec![audio(0)]);
        let mut chain = Forward::default();
        let mut mixer = DuckLog::default();
        let mut tape = Tape::default();

        let stats =
            run(&mut segment, &mut backing, &mut chain, &mut mixer, &mut tape).unwrap();

        assert_eq!(stats, PumpStats { video_frames: 2, audio_frames: 1 });
        assert!(mixer.pairs.is_empty());
        assert_eq!(
            tape.written,
            vec![(FrameKind::Audio, 0), (FrameKind::Video, 0), (FrameKind::Video, 33)]
        );
    }
}
