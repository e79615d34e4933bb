// crates/beatcut-media/src/editor.rs
//
// BeatEditor: the two-pass beat-cut render.
//
//   Pass 1 (render_segments): plan the schedule, walk it against the
//   source clip and cut one `segment {index}.mp4` per entry. Muted
//   intervals are decoded image-only so the segment carries no audio
//   of its own.
//
//   Pass 2 (compose_final): re-read the segment files in numeric
//   order, run each through its transition + effects chain, duck the
//   backing track under any segment audio and mux everything into the
//   output file.
//
// The source grabber lives on the editor and is restarted per pass;
// `stop` wipes its configuration, so each pass applies its own codec
// hint and pixel format. Every other handle (segment grabbers, the
// backing grabber, recorders, graphs) is owned by the pass that opens
// it and is released by drop on both exit paths.
//
// Failure policy: the first decode/encode/filter error aborts the
// render. Pass 1 removes the partial segment file, pass 2 removes the
// partial output, and the error is returned unchanged.

use std::fs;
use std::path::{Path, PathBuf};

use crossbeam_channel::Sender;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ffmpeg_the_third as ffmpeg;

use ffmpeg::format::Pixel;
use ffmpeg::Rational;

use beatcut_core::edit::EditSpec;
use beatcut_core::error::{EditError, EditResult};
use beatcut_core::filter::{
    assemble_audio_chain, assemble_export_chain, assemble_video_chain, ChainPlan, FilterContext,
    SegmentPosition,
};
use beatcut_core::info::EditInfo;
use beatcut_core::schedule::{plan_segments, PlannedSegment, SegmentBody};
use beatcut_core::segment::{collect_segments, segment_path};

use crate::filtergraph::{AudioMixer, ChainFilter, VideoGraphParams};
use crate::frame::Frame;
use crate::grabber::MediaGrabber;
use crate::pump::{self, BackingMixer, FrameSink, FrameSource, VideoChain};
use crate::recorder::{MediaRecorder, RecorderSettings, AUDIO_RATE};
use crate::worker::EditEvent;

/// Decoder tried for the source clip when hardware decode is on.
const SOURCE_DECODER_HINT: &str = "hevc_cuvid";
/// Decoder tried for segment re-reads when hardware decode is on;
/// segments are always written as H.264.
const SEGMENT_DECODER_HINT: &str = "h264_cuvid";
/// Sample format the mixed audio leaves the graphs in, matching what
/// the recorder's AAC encoder takes without another conversion.
const MIX_SAMPLE_FORMAT: &str = "fltp";

/// What a finished render produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
    /// The output file, after any collision redirect.
    Completed(PathBuf),
    /// The schedule was empty; no file was written.
    Empty,
}

// ── Editor ────────────────────────────────────────────────────────────────────

pub struct BeatEditor {
    spec:   EditSpec,
    /// Render target, redirected away from `spec.output` when that file
    /// already existed at construction.
    output: PathBuf,
    source: MediaGrabber,
    events: Option<Sender<EditEvent>>,
}

impl BeatEditor {
    /// Validates the spec, prepares the working directory and resolves
    /// the output path. No media file is opened yet.
    pub fn new(spec: EditSpec) -> EditResult<Self> {
        ffmpeg::init().map_err(|e| EditError::Sink(format!("ffmpeg init: {e}")))?;
        if spec.flags.debug_log {
            unsafe {
                ffmpeg::ffi::av_log_set_level(ffmpeg::ffi::AV_LOG_VERBOSE);
            }
        }

        spec.validate()?;
        fs::create_dir_all(&spec.working_directory).map_err(|e| {
            EditError::Sink(format!(
                "create working directory '{}': {e}",
                spec.working_directory.display()
            ))
        })?;

        let output = resolve_output(&spec);
        let source = MediaGrabber::new(spec.source.clone());
        Ok(Self { spec, output, source, events: None })
    }

    /// Streams progress events to `events` while rendering.
    pub fn with_events(mut self, events: Sender<EditEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// The resolved render target.
    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn spec(&self) -> &EditSpec {
        &self.spec
    }

    /// Runs both passes. An empty schedule is a valid render that
    /// produces nothing.
    pub fn edit(&mut self, reuse: bool) -> EditResult<RenderOutcome> {
        let segments = self.render_segments(reuse)?;
        if segments.is_empty() {
            info!("[edit] nothing scheduled, no output produced");
            return Ok(RenderOutcome::Empty);
        }
        let output = self.compose_final(&segments)?;
        Ok(RenderOutcome::Completed(output))
    }

    /// Pass 1: cut the source into segment files.
    ///
    /// With `reuse` set, segment files already present in the working
    /// directory short-circuit the pass. Returns the segment paths in
    /// composition order; an empty plan yields an empty vec without
    /// touching the source.
    pub fn render_segments(&mut self, reuse: bool) -> EditResult<Vec<PathBuf>> {
        if reuse {
            let existing = collect_segments(&self.spec.working_directory)?;
            if !existing.is_empty() {
                info!(
                    "[edit] reusing {} segment files in '{}'",
                    existing.len(),
                    self.spec.working_directory.display()
                );
                return Ok(existing);
            }
        }

        let mut rng = rand::thread_rng();
        let plan = plan_segments(
            &self.spec.beat_gaps,
            &self.spec.cuts,
            self.spec.intro,
            self.spec.flags.shuffle_clips,
            &mut rng,
        );
        if plan.is_empty() {
            return Ok(Vec::new());
        }

        if self.source.is_started() {
            self.source.stop();
        }
        let hint = self.spec.flags.hardware_decode.then_some(SOURCE_DECODER_HINT);
        self.source.configure(hint, Some(Pixel::YUV420P));
        self.source.start()?;

        let info = self.source_info();
        let settings = RecorderSettings::from_info(&info);
        info!(
            "[edit] rendering {} segments from '{}' at {}x{} {}fps",
            plan.len(),
            self.spec.source.display(),
            settings.width,
            settings.height,
            settings.frame_rate
        );

        let mut written = Vec::with_capacity(plan.len());
        for planned in &plan {
            let path = segment_path(&self.spec.working_directory, planned.index);
            if let Err(e) = self.write_one_segment(planned, &path, &info, settings) {
                // a half-written segment must not poison a later reuse run
                if path.exists() {
                    if let Err(rm) = fs::remove_file(&path) {
                        warn!("[edit] removing partial '{}' failed: {rm}", path.display());
                    }
                }
                self.source.stop();
                return Err(e);
            }
            debug!("[edit] wrote '{}'", path.display());
            self.emit(EditEvent::SegmentWritten { index: planned.index, path: path.clone() });
            written.push(path);
        }

        self.source.stop();
        Ok(written)
    }

    fn write_one_segment(
        &mut self,
        planned: &PlannedSegment,
        path: &Path,
        info: &EditInfo,
        settings: RecorderSettings,
    ) -> EditResult<()> {
        let mut recorder = MediaRecorder::create(path, settings)?;

        match planned.body {
            SegmentBody::Intro { start_micros, end_micros } => {
                // the intro plays through unfiltered, audio included; the
                // first frame stamped at or past the end mark is decoded
                // and dropped
                self.source.seek(start_micros)?;
                while let Some(frame) = self.source.grab()? {
                    if frame.micros() >= end_micros {
                        break;
                    }
                    recorder.record(&frame)?;
                }
            }
            SegmentBody::Interval { seek_micros, mute, duration_ms } => {
                if let Some(target) = seek_micros {
                    self.source.seek(target)?;
                }

                let mut chain = self.segment_chain(planned, info)?;
                let frame_time_ms = info.frame_time_ms();
                let mut local_ms = 0.0;

                loop {
                    let grabbed =
                        if mute { self.source.grab_image()? } else { self.source.grab()? };
                    let Some(frame) = grabbed else { break };

                    if frame.is_video() {
                        // the frame that crosses the budget is dropped;
                        // the decode position still advances with it
                        if local_ms >= duration_ms {
                            break;
                        }
                        chain.process(frame, &mut recorder)?;
                        local_ms += frame_time_ms;
                    } else {
                        recorder.record(&frame)?;
                    }
                }
                chain.finish(&mut recorder)?;
            }
        }

        recorder.close()?;
        Ok(())
    }

    /// Pass-1 chain for one interval. Without the process-segments flag
    /// this is a pass-through and no graph is built; with it, the
    /// export video stages run against a narrow snapshot that hides the
    /// source audio from expansion.
    fn segment_chain(&self, planned: &PlannedSegment, info: &EditInfo) -> EditResult<ChainFilter> {
        let plan = if self.spec.flags.process_segments {
            let narrow = EditInfo {
                video:         info.video.clone(),
                audio:         None,
                length_micros: info.length_micros,
                intro:         info.intro,
            };
            let ctx = FilterContext {
                info:     &narrow,
                position: SegmentPosition {
                    index:           planned.index,
                    start_offset_ms: planned.start_offset_ms,
                    duration_ms:     planned.planned_duration_ms(),
                },
            };
            assemble_export_chain(&self.spec.filters, &ctx)
        } else {
            ChainPlan::PassThrough
        };
        ChainFilter::new(&plan, &graph_params(info))
    }

    /// Pass 2: compose the segment files and the backing track into the
    /// output. The partial output is removed on any error.
    pub fn compose_final(&mut self, segments: &[PathBuf]) -> EditResult<PathBuf> {
        if segments.is_empty() {
            return Err(EditError::Schedule(String::from("no segment files to compose")));
        }

        info!(
            "[edit] composing {} segments into '{}'",
            segments.len(),
            self.output.display()
        );

        match self.run_compose(segments) {
            Ok(path) => Ok(path),
            Err(e) => {
                if self.output.exists() {
                    if let Err(rm) = fs::remove_file(&self.output) {
                        warn!(
                            "[edit] removing partial output '{}' failed: {rm}",
                            self.output.display()
                        );
                    }
                }
                Err(e)
            }
        }
    }

    fn run_compose(&mut self, segments: &[PathBuf]) -> EditResult<PathBuf> {
        let mut backing = MediaGrabber::new(self.spec.backing_track.clone());
        backing.start()?;

        let segment_hint = self.spec.flags.hardware_decode.then_some(SEGMENT_DECODER_HINT);

        // pass-2 snapshot: video properties come from the first segment,
        // audio from the backing track (segment audio only feeds the
        // duck input)
        let mut first = MediaGrabber::new(segments[0].clone());
        first.configure(segment_hint, Some(Pixel::YUV420P));
        first.start()?;

        let segment_audio = first.audio_params().cloned();
        let backing_audio = backing.audio_params().cloned();

        let info = EditInfo {
            video:         first.video_params().cloned().unwrap_or_default(),
            audio:         backing_audio.clone().or_else(|| segment_audio.clone()),
            length_micros: backing.length_micros(),
            intro:         self.spec.intro,
        };
        let params = graph_params(&info);

        let settings = RecorderSettings::from_info(&info);
        let mut recorder = MediaRecorder::create(&self.output, settings)?;

        let mut mixer: Box<dyn BackingMixer> = match (&segment_audio, &backing_audio) {
            (Some(seg), Some(bak)) => {
                let effects = assemble_audio_chain(
                    &self.spec.filters,
                    &FilterContext {
                        info:     &info,
                        position: SegmentPosition {
                            index:           0,
                            start_offset_ms: 0.0,
                            duration_ms:     0.0,
                        },
                    },
                );
                Box::new(AudioMixer::new(
                    seg,
                    bak,
                    AUDIO_RATE as u32,
                    MIX_SAMPLE_FORMAT,
                    effects.as_ref(),
                )?)
            }
            _ => {
                debug!("[edit] no duckable audio pair, segment audio passes through");
                Box::new(NullMixer)
            }
        };

        let mut offset_ms = 0.0;
        let mut first = Some(first);

        for (ordinal, segment) in segments.iter().enumerate() {
            let mut seg = match first.take() {
                Some(open) => open,
                None => {
                    let mut g = MediaGrabber::new(segment.clone());
                    g.configure(segment_hint, Some(Pixel::YUV420P));
                    g.start()?;
                    g
                }
            };

            let duration_ms = seg.length_micros() as f64 / 1000.0;
            let ctx = FilterContext {
                info:     &info,
                position: SegmentPosition {
                    index:           ordinal,
                    start_offset_ms: offset_ms,
                    duration_ms,
                },
            };
            let plan = assemble_video_chain(&self.spec.filters, &ctx);
            let mut chain = ChainFilter::new(&plan, &params)?;

            debug!(
                "[edit] segment {ordinal}: '{}' {duration_ms}ms at +{offset_ms}ms, {} stage(s)",
                segment.display(),
                plan.stages().len()
            );

            let stats = pump::run(
                &mut seg,
                &mut SamplesOnly { grabber: &mut backing },
                &mut chain,
                mixer.as_mut(),
                &mut recorder,
            )?;
            chain.finish(&mut recorder)?;

            debug!(
                "[edit] segment {ordinal}: {} video / {} audio frames",
                stats.video_frames, stats.audio_frames
            );
            offset_ms += duration_ms;
        }

        recorder.close()
    }

    fn source_info(&self) -> EditInfo {
        EditInfo {
            video:         self.source.video_params().cloned().unwrap_or_default(),
            audio:         self.source.audio_params().cloned(),
            length_micros: self.source.length_micros(),
            intro:         self.spec.intro,
        }
    }

    fn emit(&self, event: EditEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

/// Graph inputs are described from the probed snapshot only, never from
/// a live decoder, so identical snapshots build identical graphs.
fn graph_params(info: &EditInfo) -> VideoGraphParams {
    VideoGraphParams {
        width:        info.video.width,
        height:       info.video.height,
        format:       Pixel::YUV420P,
        time_base:    Rational::new(1, 1_000_000),
        pixel_aspect: Rational::new(1, 1),
    }
}

/// Keeps an existing file at the output path instead of overwriting it:
/// the render is redirected once, at construction, to a uuid-prefixed
/// sibling of the working directory.
fn resolve_output(spec: &EditSpec) -> PathBuf {
    if !spec.output.exists() {
        return spec.output.clone();
    }

    let file_name = spec
        .output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| String::from("render.mp4"));
    let parent = spec.working_directory.parent().unwrap_or_else(|| Path::new("."));
    let redirected = parent.join(format!("{}{}", Uuid::new_v4(), file_name));

    warn!(
        "[edit] output '{}' already exists, rendering to '{}' instead",
        spec.output.display(),
        redirected.display()
    );
    redirected
}

// ── Pump adapters ─────────────────────────────────────────────────────────────

/// Restricts the backing grabber to its audio stream so cover art in a
/// music file cannot masquerade as timeline video.
struct SamplesOnly<'a> {
    grabber: &'a mut MediaGrabber,
}

impl FrameSource for SamplesOnly<'_> {
    fn grab(&mut self) -> EditResult<Option<Frame>> {
        self.grabber.grab_samples()
    }
}

/// Mixer for renders where ducking is impossible because either side
/// has no audio stream. Segment audio is recorded as-is; the backing
/// frame is dropped.
struct NullMixer;

impl BackingMixer for NullMixer {
    fn duck(&mut self, segment: Frame, _backing: Frame, sink: &mut dyn FrameSink) -> EditResult<()> {
        sink.write(&segment)
    }
}
