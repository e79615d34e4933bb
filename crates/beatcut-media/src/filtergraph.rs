// crates/beatcut-media/src/filtergraph.rs
//
// Filter-graph plumbing on top of ffmpeg's avfilter:
//   • GraphFilter: one parsed graph with named buffer inputs and a
//     single "out" sink; push frames in, pull zero-or-more out
//   • ChainFilter: a segment's chain plan realised as one graph per
//     stage, cascaded in order; an empty plan creates no graphs
//   • AudioMixer:  the convert -> effects -> sidechain-duck path the
//     pump feeds segment/backing audio pairs through
//
// Expression labels double as context names: the duck graph's abuffer
// contexts are literally named "0:a" and "1:a" so the parser links
// them to the matching labels. Timestamps pushed into audio inputs
// are running sample counts against a 1/sample_rate time base; video
// inputs run on 1/1_000_000 so pts equals micros.

use tracing::warn;

use ffmpeg_the_third as ffmpeg;

use ffmpeg::filter;
use ffmpeg::format::Pixel;
use ffmpeg::frame;
use ffmpeg::Rational;

use beatcut_core::error::{EditError, EditResult};
use beatcut_core::filter::{ChainPlan, FilterStage};
use beatcut_core::info::AudioParams;

use crate::frame::Frame;
use crate::helpers;
use crate::pump::{BackingMixer, FrameSink, VideoChain};

// ── Graph parameters ──────────────────────────────────────────────────────────

/// Buffer-source description for a video graph input.
#[derive(Debug, Clone, Copy)]
pub struct VideoGraphParams {
    pub width:        u32,
    pub height:       u32,
    pub format:       Pixel,
    pub time_base:    Rational,
    pub pixel_aspect: Rational,
}

/// Buffer-source description for an audio graph input. The time base
/// is implied as 1/sample_rate; callers stamp pts in sample counts.
#[derive(Debug, Clone)]
pub struct AudioGraphParams {
    pub sample_rate:   u32,
    pub sample_format: String,
    pub channels:      u16,
}

impl AudioGraphParams {
    pub fn from_params(params: &AudioParams) -> Self {
        Self {
            sample_rate:   params.sample_rate,
            sample_format: params.sample_format.clone(),
            channels:      params.channels,
        }
    }
}

// ── GraphFilter ───────────────────────────────────────────────────────────────

pub struct GraphFilter {
    label:  String,
    graph:  filter::Graph,
    inputs: Vec<String>,
}

impl std::fmt::Debug for GraphFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphFilter")
            .field("label", &self.label)
            .field("inputs", &self.inputs)
            .finish_non_exhaustive()
    }
}

fn add_filter(
    graph: &mut filter::Graph,
    label: &str,
    filter_name: &str,
    ctx_name: &str,
    args: &str,
) -> EditResult<()> {
    let found = filter::find(filter_name).ok_or_else(|| {
        EditError::Filter(format!("[{label}] ffmpeg has no '{filter_name}' filter"))
    })?;
    graph
        .add(&found, ctx_name, args)
        .map(|_| ())
        .map_err(|e| EditError::Filter(format!("[{label}] create {ctx_name}: {e}")))
}

impl GraphFilter {
    /// Single-input video graph: "in" buffer, `expression`, "out" sink.
    pub fn video(label: &str, expression: &str, params: &VideoGraphParams) -> EditResult<Self> {
        let mut graph = filter::Graph::new();

        let args = format!(
            "video_size={}x{}:pix_fmt={}:time_base={}/{}:pixel_aspect={}/{}",
            params.width,
            params.height,
            helpers::pixel_format_name(params.format),
            params.time_base.numerator(),
            params.time_base.denominator(),
            params.pixel_aspect.numerator(),
            params.pixel_aspect.denominator(),
        );
        add_filter(&mut graph, label, "buffer", "in", &args)?;
        add_filter(&mut graph, label, "buffersink", "out", "")?;

        graph
            .output("in", 0)
            .and_then(|p| p.input("out", 0))
            .and_then(|p| p.parse(expression))
            .map_err(|e| EditError::Filter(format!("[{label}] parse '{expression}': {e}")))?;
        graph
            .validate()
            .map_err(|e| EditError::Filter(format!("[{label}] validate '{expression}': {e}")))?;

        Ok(Self { label: label.into(), graph, inputs: vec![String::from("in")] })
    }

    /// Multi-input audio graph. Each `(name, params)` pair becomes an
    /// abuffer context under that name; the expression refers to the
    /// names as input labels. The sink is always "out".
    pub fn audio(
        label: &str,
        expression: &str,
        inputs: &[(String, AudioGraphParams)],
    ) -> EditResult<Self> {
        if inputs.is_empty() {
            return Err(EditError::Filter(format!(
                "[{label}] audio graph needs at least one input"
            )));
        }

        let mut graph = filter::Graph::new();
        for (name, params) in inputs {
            let args = format!(
                "time_base=1/{rate}:sample_rate={rate}:sample_fmt={fmt}:channel_layout={layout}",
                rate = params.sample_rate,
                fmt = params.sample_format,
                layout = helpers::channel_layout_name(params.channels),
            );
            add_filter(&mut graph, label, "abuffer", name, &args)?;
        }
        add_filter(&mut graph, label, "abuffersink", "out", "")?;

        let mut parser = graph
            .output(&inputs[0].0, 0)
            .map_err(|e| EditError::Filter(format!("[{label}] register {}: {e}", inputs[0].0)))?;
        for (name, _) in &inputs[1..] {
            parser = parser
                .output(name, 0)
                .map_err(|e| EditError::Filter(format!("[{label}] register {name}: {e}")))?;
        }
        parser
            .input("out", 0)
            .and_then(|p| p.parse(expression))
            .map_err(|e| EditError::Filter(format!("[{label}] parse '{expression}': {e}")))?;
        graph
            .validate()
            .map_err(|e| EditError::Filter(format!("[{label}] validate '{expression}': {e}")))?;

        Ok(Self {
            label:  label.into(),
            graph,
            inputs: inputs.iter().map(|(name, _)| name.clone()).collect(),
        })
    }

    pub fn push_video(&mut self, input: &str, picture: &frame::Video) -> EditResult<()> {
        let mut ctx = self
            .graph
            .get(input)
            .ok_or_else(|| EditError::Filter(format!("[{}] no input named {input}", self.label)))?;
        ctx.source()
            .add(picture)
            .map_err(|e| EditError::Filter(format!("[{}] push into {input}: {e}", self.label)))
    }

    pub fn push_audio(&mut self, input: &str, samples: &frame::Audio) -> EditResult<()> {
        let mut ctx = self
            .graph
            .get(input)
            .ok_or_else(|| EditError::Filter(format!("[{}] no input named {input}", self.label)))?;
        ctx.source()
            .add(samples)
            .map_err(|e| EditError::Filter(format!("[{}] push into {input}: {e}", self.label)))
    }

    /// Next filtered video frame, `None` when the graph has nothing
    /// ready yet.
    pub fn pull_video(&mut self) -> Option<frame::Video> {
        let mut ctx = self.graph.get("out")?;
        let mut out = frame::Video::empty();
        ctx.sink().frame(&mut out).ok()?;
        Some(out)
    }

    /// Next filtered audio frame, `None` when the graph has nothing
    /// ready yet.
    pub fn pull_audio(&mut self) -> Option<frame::Audio> {
        let mut ctx = self.graph.get("out")?;
        let mut out = frame::Audio::empty();
        ctx.sink().frame(&mut out).ok()?;
        Some(out)
    }

    /// Signals end-of-stream on every input so buffered frames can be
    /// pulled out.
    pub fn flush(&mut self) -> EditResult<()> {
        let names = self.inputs.clone();
        for name in names {
            if let Some(mut ctx) = self.graph.get(&name) {
                ctx.source()
                    .flush()
                    .map_err(|e| EditError::Filter(format!("[{}] flush {name}: {e}", self.label)))?;
            }
        }
        Ok(())
    }
}

// ── ChainFilter ───────────────────────────────────────────────────────────────

/// A segment's chain plan realised against real graphs, one per stage.
/// Frames cascade through the stages in plan order; a stage may hold
/// frames back (transitions buffer context) so `finish` flushes each
/// stage into the next before the recorder is closed.
pub struct ChainFilter {
    stages: Vec<ChainStage>,
}

struct ChainStage {
    name:  String,
    graph: GraphFilter,
}

impl ChainFilter {
    pub fn new(plan: &ChainPlan, params: &VideoGraphParams) -> EditResult<Self> {
        let mut stages = Vec::with_capacity(plan.stages().len());
        for stage in plan.stages() {
            let graph = GraphFilter::video(&stage.name, &stage.expression, params)?;
            stages.push(ChainStage { name: stage.name.clone(), graph });
        }
        Ok(Self { stages })
    }

    pub fn is_pass_through(&self) -> bool {
        self.stages.is_empty()
    }

    fn drain_stage(&mut self, idx: usize, into: &mut Vec<frame::Video>) {
        while let Some(out) = self.stages[idx].graph.pull_video() {
            into.push(out);
        }
    }
}

impl VideoChain for ChainFilter {
    fn process(&mut self, frame: Frame, sink: &mut dyn FrameSink) -> EditResult<()> {
        let Frame::Video { mut picture, micros } = frame else { return Ok(()) };
        if self.stages.is_empty() {
            return sink.write(&Frame::Video { picture, micros });
        }

        picture.set_pts(Some(micros));
        let mut current = vec![picture];
        for idx in 0..self.stages.len() {
            let mut next = Vec::new();
            for f in current {
                self.stages[idx].graph.push_video("in", &f)?;
                self.drain_stage(idx, &mut next);
            }
            current = next;
        }

        for f in current {
            let micros = f.pts().unwrap_or(micros);
            sink.write(&Frame::Video { picture: f, micros })?;
        }
        Ok(())
    }

    fn finish(&mut self, sink: &mut dyn FrameSink) -> EditResult<()> {
        let mut carried: Vec<frame::Video> = Vec::new();
        for idx in 0..self.stages.len() {
            let incoming = std::mem::take(&mut carried);
            for f in incoming {
                self.stages[idx].graph.push_video("in", &f)?;
                self.drain_stage(idx, &mut carried);
            }
            if let Err(e) = self.stages[idx].graph.flush() {
                warn!("[chain] flushing stage '{}' failed: {e}", self.stages[idx].name);
            }
            self.drain_stage(idx, &mut carried);
        }

        for f in carried {
            let micros = f.pts().unwrap_or(0);
            sink.write(&Frame::Video { picture: f, micros })?;
        }
        Ok(())
    }
}

// ── AudioMixer ────────────────────────────────────────────────────────────────

/// Duck graph: split the backing track, sidechain-compress it against
/// the segment's own audio, merge the compressed bed back with the
/// untouched half, then pin the output format the encoder expects.
fn duck_expression(out_rate: u32, out_format: &str) -> String {
    format!(
        "[1:a]asplit=2[sc][mix];\
         [0:a][sc]sidechaincompress=threshold=0.003:ratio=20[duck];\
         [duck][mix]amerge[merged];\
         [merged]aformat=sample_fmts={out_format}:sample_rates={out_rate}:channel_layouts=stereo[out]"
    )
}

fn stamp(samples: &mut frame::Audio, counter: &mut i64) {
    samples.set_pts(Some(*counter));
    *counter += samples.samples() as i64;
}

/// The composition pass's audio path. Segment audio enters the duck
/// graph raw; the backing frame is first resampled to the encoder's
/// rate/format, then run through the persistent audio effects when any
/// are registered, and finally ducked under the segment audio.
pub struct AudioMixer {
    convert:    GraphFilter,
    effects:    Option<GraphFilter>,
    duck:       GraphFilter,
    convert_in: i64,
    effects_in: i64,
    segment_in: i64,
    backing_in: i64,
}

impl AudioMixer {
    pub fn new(
        segment_audio: &AudioParams,
        backing_audio: &AudioParams,
        out_rate: u32,
        out_format: &str,
        effects: Option<&FilterStage>,
    ) -> EditResult<Self> {
        let convert = GraphFilter::audio(
            "convert",
            &format!("aformat=sample_fmts={out_format}:sample_rates={out_rate}"),
            &[(String::from("in"), AudioGraphParams::from_params(backing_audio))],
        )?;

        // everything past the converter runs at the output rate/format
        let converted = AudioGraphParams {
            sample_rate:   out_rate,
            sample_format: String::from(out_format),
            channels:      backing_audio.channels,
        };

        let effects = match effects {
            Some(stage) => Some(GraphFilter::audio(
                &stage.name,
                &stage.expression,
                &[(String::from("in"), converted.clone())],
            )?),
            None => None,
        };

        let duck = GraphFilter::audio(
            "duck",
            &duck_expression(out_rate, out_format),
            &[
                (String::from("0:a"), AudioGraphParams::from_params(segment_audio)),
                (String::from("1:a"), converted),
            ],
        )?;

        Ok(Self {
            convert,
            effects,
            duck,
            convert_in: 0,
            effects_in: 0,
            segment_in: 0,
            backing_in: 0,
        })
    }
}

impl BackingMixer for AudioMixer {
    fn duck(&mut self, segment: Frame, backing: Frame, sink: &mut dyn FrameSink) -> EditResult<()> {
        let clock_micros = backing.micros();
        let (Frame::Audio { samples: mut seg, .. }, Frame::Audio { samples: mut bak, .. }) =
            (segment, backing)
        else {
            return Ok(());
        };

        stamp(&mut seg, &mut self.segment_in);
        self.duck.push_audio("0:a", &seg)?;

        stamp(&mut bak, &mut self.convert_in);
        self.convert.push_audio("in", &bak)?;

        // the converter is polled once per pair; whatever it buffers
        // surfaces on the next call
        if let Some(mut converted) = self.convert.pull_audio() {
            match self.effects.as_mut() {
                Some(effects) => {
                    stamp(&mut converted, &mut self.effects_in);
                    effects.push_audio("in", &converted)?;
                    while let Some(mut polished) = effects.pull_audio() {
                        stamp(&mut polished, &mut self.backing_in);
                        self.duck.push_audio("1:a", &polished)?;
                    }
                }
                None => {
                    stamp(&mut converted, &mut self.backing_in);
                    self.duck.push_audio("1:a", &converted)?;
                }
            }
        }

        while let Some(mixed) = self.duck.pull_audio() {
            sink.write(&Frame::Audio { samples: mixed, micros: clock_micros })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameKind;
    use ffmpeg::format::Sample;
    use ffmpeg::util::channel_layout::ChannelLayoutMask;

    fn video_params() -> VideoGraphParams {
        VideoGraphParams {
            width:        64,
            height:       36,
            format:       Pixel::YUV420P,
            time_base:    Rational::new(1, 1_000_000),
            pixel_aspect: Rational::new(1, 1),
        }
    }

    fn stereo() -> AudioParams {
        AudioParams {
            channels:      2,
            sample_rate:   44100,
            sample_format: String::from("fltp"),
            ..AudioParams::default()
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

    #[test]
    fn builds_a_null_video_graph() {
        let mut graph = GraphFilter::video("noop", "null", &video_params()).unwrap();
        assert!(graph.pull_video().is_none());
    }

    #[test]
    fn rejects_a_bad_expression() {
        let err = GraphFilter::video("broken", "nosuchfilter=1", &video_params()).unwrap_err();
        assert!(matches!(err, EditError::Filter(_)));
    }

    #[test]
    fn null_graph_forwards_a_frame_with_its_pts() {
        let mut graph = GraphFilter::video("noop", "null", &video_params()).unwrap();

        let mut picture = frame::Video::new(Pixel::YUV420P, 64, 36);
        picture.set_pts(Some(40_000));
        graph.push_video("in", &picture).unwrap();

        let out = graph.pull_video().expect("null forwards frames synchronously");
        assert_eq!(out.width(), 64);
        assert_eq!(out.height(), 36);
        assert_eq!(out.pts(), Some(40_000));
        assert!(graph.pull_video().is_none());
    }

    #[test]
    fn anull_audio_graph_round_trips_samples() {
        let inputs = [(String::from("in"), AudioGraphParams::from_params(&stereo()))];
        let mut graph = GraphFilter::audio("noop", "anull", &inputs).unwrap();

        let mut samples =
            frame::Audio::new(Sample::F32(ffmpeg::format::sample::Type::Planar), 1024, ChannelLayoutMask::STEREO);
        samples.set_rate(44100);
        samples.set_pts(Some(0));
        graph.push_audio("in", &samples).unwrap();

        let out = graph.pull_audio().expect("anull forwards frames synchronously");
        assert_eq!(out.samples(), 1024);
    }

    #[test]
    fn pass_through_chain_builds_no_graphs_and_forwards() {
        let mut chain = ChainFilter::new(&ChainPlan::PassThrough, &video_params()).unwrap();
        assert!(chain.is_pass_through());

        let mut tape = Tape::default();
        let frame = Frame::Video { picture: frame::Video::new(Pixel::YUV420P, 64, 36), micros: 33_000 };
        chain.process(frame, &mut tape).unwrap();
        chain.finish(&mut tape).unwrap();

        assert_eq!(tape.written, vec![(FrameKind::Video, 33_000)]);
    }

    #[test]
    fn single_null_stage_forwards_with_timestamps() {
        let plan = ChainPlan::Stages(vec![FilterStage {
            name:       String::from("noop"),
            expression: String::from("null"),
        }]);
        let mut chain = ChainFilter::new(&plan, &video_params()).unwrap();
        assert!(!chain.is_pass_through());

        let mut tape = Tape::default();
        let frame = Frame::Video { picture: frame::Video::new(Pixel::YUV420P, 64, 36), micros: 40_000 };
        chain.process(frame, &mut tape).unwrap();
        chain.finish(&mut tape).unwrap();

        assert_eq!(tape.written, vec![(FrameKind::Video, 40_000)]);
    }

    #[test]
    fn duck_mixer_builds_and_accepts_a_pair() {
        let mut mixer = AudioMixer::new(&stereo(), &stereo(), 44100, "fltp", None).unwrap();
        let mut tape = Tape::default();

        let planar = Sample::F32(ffmpeg::format::sample::Type::Planar);
        let mut seg = frame::Audio::new(planar, 1024, ChannelLayoutMask::STEREO);
        seg.set_rate(44100);
        let mut bak = frame::Audio::new(planar, 1024, ChannelLayoutMask::STEREO);
        bak.set_rate(44100);

        let result = mixer.duck(
            Frame::Audio { samples: seg, micros: 0 },
            Frame::Audio { samples: bak, micros: 0 },
            &mut tape,
        );
        assert!(result.is_ok());
        assert!(tape.written.iter().all(|(kind, _)| *kind == FrameKind::Audio));
    }

    #[test]
    fn mixer_with_effects_stage_builds() {
        let stage = FilterStage {
            name:       String::from("volume"),
            expression: String::from("volume=0.8"),
        };
        assert!(AudioMixer::new(&stereo(), &stereo(), 44100, "fltp", Some(&stage)).is_ok());
    }
}
