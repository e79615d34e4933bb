// crates/beatcut-media/src/grabber.rs
//
// MediaGrabber: stateful demux+decode front end for one input file.
// One instance serves a whole render; it is stopped and restarted
// between the segment-writing pass and the composition pass, and a
// stop wipes the configuration (codec hint, target pixel format) so
// each pass states its own requirements explicitly.
//
//   • grab():         next frame of any kind, container order
//   • grab_image():   next video frame, discarding audio on the way
//   • grab_samples(): next audio frame, discarding video on the way
//   • seek():         backward container seek plus decode-and-discard
//                     up to the target, so the first delivered video
//                     frame sits exactly at the cut
//
// Audio problems degrade the clip to silent with a warning; video
// problems abort the render.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use tracing::warn;

use ffmpeg_the_third as ffmpeg;

use ffmpeg::codec;
use ffmpeg::decoder;
use ffmpeg::format::{self, input, Pixel};
use ffmpeg::frame;
use ffmpeg::media::Type;
use ffmpeg::software::scaling::{context::Context as SwsContext, flag::Flags};
use ffmpeg::{Packet, Rational};

use beatcut_core::error::{EditError, EditResult};
use beatcut_core::info::{AudioParams, VideoParams};

use crate::frame::{Frame, FrameKind};
use crate::helpers;
use crate::helpers::seek::seek_to_micros;
use crate::pump::FrameSource;

// ── Grabber ───────────────────────────────────────────────────────────────────

pub struct MediaGrabber {
    path:         PathBuf,
    codec_hint:   Option<String>,
    target_pixel: Option<Pixel>,
    state:        Option<GrabberState>,
}

impl MediaGrabber {
    /// Binds a path. No file access happens until `start`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), codec_hint: None, target_pixel: None, state: None }
    }

    /// Sets the decoder name to try first and the pixel format frames
    /// are converted to on the way out. Takes effect at the next
    /// `start`; `stop` clears both, so restarts must re-configure.
    pub fn configure(&mut self, codec_hint: Option<&str>, target_pixel: Option<Pixel>) {
        self.codec_hint = codec_hint.map(String::from);
        self.target_pixel = target_pixel;
    }

    /// Opens the container and decoders and probes stream properties.
    /// Calling `start` on a started grabber is a no-op.
    pub fn start(&mut self) -> EditResult<()> {
        if self.state.is_some() {
            return Ok(());
        }

        let ictx = input(&self.path)
            .map_err(|e| EditError::Source(format!("open {}: {e}", self.path.display())))?;

        let video_stream = ictx.streams().best(Type::Video).map(|s| s.index());
        let audio_stream = ictx.streams().best(Type::Audio).map(|s| s.index());

        let video_decoder = match video_stream {
            Some(idx) => Some(open_video_decoder(&ictx, idx, self.codec_hint.as_deref())?),
            None => None,
        };
        let audio_decoder = match audio_stream {
            Some(idx) => match open_audio_decoder(&ictx, idx) {
                Ok(dec) => Some(dec),
                Err(e) => {
                    warn!("[grabber] audio stream unusable, treating {} as silent: {e}",
                          self.path.display());
                    None
                }
            },
            None => None,
        };

        let video_tb = stream_time_base(&ictx, video_stream);
        let audio_tb = stream_time_base(&ictx, audio_stream);
        let props = probe_streams(
            &ictx,
            video_stream,
            video_decoder.as_ref(),
            audio_stream,
            audio_decoder.as_ref(),
        );

        self.state = Some(GrabberState {
            ictx,
            video_stream,
            audio_stream,
            video_decoder,
            audio_decoder,
            video_tb,
            audio_tb,
            props,
            scaler:          None,
            pending:         VecDeque::new(),
            position_micros: 0,
            flushed:         false,
        });
        Ok(())
    }

    /// Releases every native context and wipes the configuration.
    pub fn stop(&mut self) {
        self.state = None;
        self.codec_hint = None;
        self.target_pixel = None;
    }

    pub fn is_started(&self) -> bool {
        self.state.is_some()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Timestamp of the most recently delivered frame, microseconds.
    pub fn position_micros(&self) -> i64 {
        self.state.as_ref().map_or(0, |s| s.position_micros)
    }

    pub fn length_micros(&self) -> i64 {
        self.state.as_ref().map_or(0, |s| s.props.length_micros)
    }

    pub fn video_params(&self) -> Option<&VideoParams> {
        self.state.as_ref().and_then(|s| s.props.video.as_ref())
    }

    pub fn audio_params(&self) -> Option<&AudioParams> {
        self.state.as_ref().and_then(|s| s.props.audio.as_ref())
    }

    /// Seeks to `target_micros` and rolls the decoder forward so the
    /// next grabbed video frame is the first one at or past the
    /// target. Pre-roll frames from the keyframe before the target are
    /// decoded and discarded here.
    pub fn seek(&mut self, target_micros: i64) -> EditResult<()> {
        let target_pixel = self.target_pixel;
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| EditError::Source(String::from("seek on a stopped grabber")))?;

        seek_to_micros(&mut state.ictx, target_micros, "grabber")?;
        if let Some(dec) = state.video_decoder.as_mut() {
            dec.flush();
        }
        if let Some(dec) = state.audio_decoder.as_mut() {
            dec.flush();
        }
        state.pending.clear();
        state.flushed = false;
        state.position_micros = target_micros.max(0);

        while let Some(frame) = state.next_frame(GrabMode::Any, target_pixel)? {
            if frame.is_video() && frame.micros() >= target_micros {
                state.pending.push_front(frame);
                break;
            }
        }
        Ok(())
    }

    /// Next frame in container order.
    pub fn grab(&mut self) -> EditResult<Option<Frame>> {
        self.next(GrabMode::Any)
    }

    /// Next video frame; audio frames encountered on the way are
    /// dropped.
    pub fn grab_image(&mut self) -> EditResult<Option<Frame>> {
        self.next(GrabMode::ImageOnly)
    }

    /// Next audio frame; video frames (cover art and the like) are
    /// dropped.
    pub fn grab_samples(&mut self) -> EditResult<Option<Frame>> {
        self.next(GrabMode::SamplesOnly)
    }

    fn next(&mut self, mode: GrabMode) -> EditResult<Option<Frame>> {
        let target_pixel = self.target_pixel;
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| EditError::Source(String::from("grab on a stopped grabber")))?;
        state.next_frame(mode, target_pixel)
    }
}

impl FrameSource for MediaGrabber {
    fn grab(&mut self) -> EditResult<Option<Frame>> {
        MediaGrabber::grab(self)
    }
}

// ── Decode state ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GrabMode {
    Any,
    ImageOnly,
    SamplesOnly,
}

impl GrabMode {
    fn accepts(self, kind: FrameKind) -> bool {
        match self {
            GrabMode::Any => true,
            GrabMode::ImageOnly => kind == FrameKind::Video,
            GrabMode::SamplesOnly => kind == FrameKind::Audio,
        }
    }
}

#[derive(Default)]
struct StreamProps {
    video:         Option<VideoParams>,
    audio:         Option<AudioParams>,
    length_micros: i64,
}

struct GrabberState {
    ictx:            format::context::Input,
    video_stream:    Option<usize>,
    audio_stream:    Option<usize>,
    video_decoder:   Option<decoder::Video>,
    audio_decoder:   Option<decoder::Audio>,
    video_tb:        Rational,
    audio_tb:        Rational,
    props:           StreamProps,
    scaler:          Option<SwsContext>,
    pending:         VecDeque<Frame>,
    position_micros: i64,
    flushed:         bool,
}

impl GrabberState {
    fn next_frame(&mut self, mode: GrabMode, target: Option<Pixel>) -> EditResult<Option<Frame>> {
        loop {
            while let Some(frame) = self.pending.pop_front() {
                if mode.accepts(frame.kind()) {
                    self.position_micros = frame.micros();
                    return Ok(Some(frame));
                }
            }
            if self.flushed {
                return Ok(None);
            }

            let pulled: Option<(usize, Packet)> = match self.ictx.packets().next() {
                Some(Ok((stream, packet))) => Some((stream.index(), packet)),
                Some(Err(e)) => {
                    return Err(EditError::Source(format!("read packet: {e}")));
                }
                None => None,
            };

            match pulled {
                Some((idx, packet)) if Some(idx) == self.video_stream => {
                    if let Some(dec) = self.video_decoder.as_mut() {
                        dec.send_packet(&packet)
                            .map_err(|e| EditError::Source(format!("decode video: {e}")))?;
                    }
                    self.collect_video(target)?;
                }
                Some((idx, packet)) if Some(idx) == self.audio_stream => {
                    let accepted = match self.audio_decoder.as_mut() {
                        Some(dec) => dec.send_packet(&packet).is_ok(),
                        None => true,
                    };
                    if !accepted {
                        warn!("[grabber] dropped an undecodable audio packet");
                    }
                    self.collect_audio();
                }
                Some(_) => {}
                None => {
                    if let Some(dec) = self.video_decoder.as_mut() {
                        dec.send_eof().ok();
                    }
                    if let Some(dec) = self.audio_decoder.as_mut() {
                        dec.send_eof().ok();
                    }
                    self.collect_video(target)?;
                    self.collect_audio();
                    self.flushed = true;
                }
            }
        }
    }

    fn collect_video(&mut self, target: Option<Pixel>) -> EditResult<()> {
        loop {
            let mut decoded = frame::Video::empty();
            let received = match self.video_decoder.as_mut() {
                Some(dec) => dec.receive_frame(&mut decoded).is_ok(),
                None => false,
            };
            if !received {
                return Ok(());
            }

            let micros = match decoded.timestamp() {
                Some(ts) => (ts as f64 * f64::from(self.video_tb) * 1_000_000.0) as i64,
                None => self.position_micros,
            };
            let picture = self.convert_pixels(decoded, target)?;
            self.pending.push_back(Frame::Video { picture, micros });
        }
    }

    fn collect_audio(&mut self) {
        loop {
            let mut samples = frame::Audio::empty();
            let received = match self.audio_decoder.as_mut() {
                Some(dec) => dec.receive_frame(&mut samples).is_ok(),
                None => false,
            };
            if !received {
                return;
            }

            let micros = match samples.timestamp() {
                Some(ts) => (ts as f64 * f64::from(self.audio_tb) * 1_000_000.0) as i64,
                None => self.position_micros,
            };
            self.pending.push_back(Frame::Audio { samples, micros });
        }
    }

    fn convert_pixels(
        &mut self,
        decoded: frame::Video,
        target: Option<Pixel>,
    ) -> EditResult<frame::Video> {
        let Some(want) = target else { return Ok(decoded) };
        if decoded.format() == want {
            return Ok(decoded);
        }

        if self.scaler.is_none() {
            self.scaler = Some(
                SwsContext::get(
                    decoded.format(),
                    decoded.width(),
                    decoded.height(),
                    want,
                    decoded.width(),
                    decoded.height(),
                    Flags::BILINEAR,
                )
                .map_err(|e| EditError::Source(format!("pixel conversion setup: {e}")))?,
            );
        }

        let mut converted = frame::Video::empty();
        if let Some(scaler) = self.scaler.as_mut() {
            scaler
                .run(&decoded, &mut converted)
                .map_err(|e| EditError::Source(format!("pixel conversion: {e}")))?;
        }
        converted.set_pts(decoded.pts());
        Ok(converted)
    }
}

// ── Decoder opening ───────────────────────────────────────────────────────────

fn stream_at(
    ictx: &format::context::Input,
    stream_idx: usize,
) -> EditResult<format::stream::Stream<'_>> {
    ictx.stream(stream_idx)
        .ok_or_else(|| EditError::Source(format!("stream {stream_idx} vanished")))
}

fn open_video_decoder(
    ictx: &format::context::Input,
    stream_idx: usize,
    hint: Option<&str>,
) -> EditResult<decoder::Video> {
    if let Some(name) = hint {
        match decoder::find_by_name(name) {
            Some(hinted) => {
                let ctx = codec::context::Context::from_parameters(stream_at(ictx, stream_idx)?.parameters())
                    .map_err(|e| EditError::Source(format!("decoder context: {e}")))?;
                match ctx.decoder().open_as(hinted) {
                    Ok(opened) => {
                        return opened.video().map_err(|e| {
                            EditError::Source(format!("{name} is not a video decoder: {e}"))
                        });
                    }
                    Err(e) => {
                        warn!("[grabber] {name} failed to open, using the default decoder: {e}");
                    }
                }
            }
            None => warn!("[grabber] no decoder named {name}, using the default"),
        }
    }

    codec::context::Context::from_parameters(stream_at(ictx, stream_idx)?.parameters())
        .map_err(|e| EditError::Source(format!("decoder context: {e}")))?
        .decoder()
        .video()
        .map_err(|e| EditError::Source(format!("open video decoder: {e}")))
}

fn open_audio_decoder(
    ictx: &format::context::Input,
    stream_idx: usize,
) -> EditResult<decoder::Audio> {
    codec::context::Context::from_parameters(stream_at(ictx, stream_idx)?.parameters())
        .map_err(|e| EditError::Source(format!("decoder context: {e}")))?
        .decoder()
        .audio()
        .map_err(|e| EditError::Source(format!("open audio decoder: {e}")))
}

fn stream_time_base(ictx: &format::context::Input, stream_idx: Option<usize>) -> Rational {
    stream_idx
        .and_then(|idx| ictx.stream(idx))
        .map(|s| s.time_base())
        .unwrap_or_else(|| Rational::new(1, 1_000_000))
}

// ── Stream probing ────────────────────────────────────────────────────────────

/// The declared average frame rate, or the default when the stream
/// declares none.
fn frame_rate_or_default(stream_idx: usize, avg: f64) -> f64 {
    if avg.is_finite() && avg > 0.0 {
        avg
    } else {
        let fallback = VideoParams::default().frame_rate;
        warn!("[grabber] stream {stream_idx} declares frame rate {avg}, assuming {fallback} fps");
        fallback
    }
}

fn probe_streams(
    ictx: &format::context::Input,
    video_stream: Option<usize>,
    video_decoder: Option<&decoder::Video>,
    audio_stream: Option<usize>,
    audio_decoder: Option<&decoder::Audio>,
) -> StreamProps {
    let mut props = StreamProps { length_micros: ictx.duration().max(0), ..StreamProps::default() };

    if let (Some(idx), Some(dec)) = (video_stream, video_decoder) {
        if let Some(stream) = ictx.stream(idx) {
            let frame_rate = frame_rate_or_default(idx, f64::from(stream.avg_frame_rate()));
            let params = stream.parameters();
            let bit_rate = unsafe { (*params.as_ptr()).bit_rate.max(0) as usize };
            let (width, height) = (dec.width(), dec.height());
            let aspect_ratio =
                if height > 0 { f64::from(width) / f64::from(height) } else { 1.0 };

            props.video = Some(VideoParams {
                frame_rate,
                width,
                height,
                aspect_ratio,
                bit_rate,
                pixel_format: helpers::pixel_format_name(dec.format()),
                codec_name: helpers::codec_name(params.id()),
            });
        }
    }

    if let (Some(idx), Some(dec)) = (audio_stream, audio_decoder) {
        if let Some(stream) = ictx.stream(idx) {
            let params = stream.parameters();
            let bit_rate = unsafe { (*params.as_ptr()).bit_rate.max(0) as usize };

            props.audio = Some(AudioParams {
                channels: dec.ch_layout().channels() as u16,
                bit_rate,
                sample_rate: dec.rate(),
                sample_format: helpers::sample_format_name(dec.format()),
                codec_name: helpers::codec_name(params.id()),
            });
        }
    }

    props
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_touches_no_files() {
        let grabber = MediaGrabber::new("/definitely/not/here.mp4");
        assert!(!grabber.is_started());
        assert_eq!(grabber.position_micros(), 0);
        assert_eq!(grabber.length_micros(), 0);
        assert!(grabber.video_params().is_none());
    }

    #[test]
    fn start_on_missing_file_is_a_source_error() {
        let mut grabber = MediaGrabber::new("/definitely/not/here.mp4");
        assert!(matches!(grabber.start(), Err(EditError::Source(_))));
    }

    #[test]
    fn grabbing_while_stopped_is_a_source_error() {
        let mut grabber = MediaGrabber::new("/definitely/not/here.mp4");
        assert!(matches!(grabber.grab(), Err(EditError::Source(_))));
        assert!(matches!(grabber.seek(1_000), Err(EditError::Source(_))));
    }

    #[test]
    fn stop_wipes_the_configuration() {
        let mut grabber = MediaGrabber::new("/definitely/not/here.mp4");
        grabber.configure(Some("h264_cuvid"), Some(Pixel::YUV420P));
        assert_eq!(grabber.codec_hint.as_deref(), Some("h264_cuvid"));
        assert_eq!(grabber.target_pixel, Some(Pixel::YUV420P));

        grabber.stop();
        assert_eq!(grabber.codec_hint, None);
        assert_eq!(grabber.target_pixel, None);
    }

    #[test]
    fn grab_modes_filter_by_kind() {
        assert!(GrabMode::Any.accepts(FrameKind::Video));
        assert!(GrabMode::Any.accepts(FrameKind::Audio));
        assert!(GrabMode::ImageOnly.accepts(FrameKind::Video));
        assert!(!GrabMode::ImageOnly.accepts(FrameKind::Audio));
        assert!(GrabMode::SamplesOnly.accepts(FrameKind::Audio));
        assert!(!GrabMode::SamplesOnly.accepts(FrameKind::Video));
    }

    #[test]
    fn unusable_declared_frame_rates_fall_back_to_the_default() {
        let fallback = VideoParams::default().frame_rate;
        assert_eq!(frame_rate_or_default(0, f64::NAN), fallback);
        assert_eq!(frame_rate_or_default(0, 0.0), fallback);
        assert_eq!(frame_rate_or_default(0, -24.0), fallback);
        assert_eq!(frame_rate_or_default(0, f64::INFINITY), fallback);
        assert_eq!(frame_rate_or_default(0, 29.97), 29.97);
    }
}
