// crates/beatcut-media/src/recorder.rs
//
// MediaRecorder: H.264 + AAC MP4 mux target for one output file.
// Both render passes write through it, the first once per segment,
// the second once for the final cut.
//
// Stream layout in the output MP4:
//   Stream 0: H.264 video (YUV420P, CRF 18, preset fast)
//   Stream 1: AAC audio (FLTP stereo, 44100 Hz, 128 kbps), present only
//             when the settings ask for audio
//
// PTS strategy:
//   Video: monotonically increasing frame counter in 1/fps.
//   Audio: monotonically increasing sample counter in 1/44100.
//   Incoming frame timestamps are ignored, so seeks and shuffled source
//   material cannot leak discontinuities into the output.
//
// Audio FIFO:
//   AAC wants exactly `encoder.frame_size()` samples per input frame
//   while decoded or mixed audio arrives in whatever chunk size the
//   upstream produced. All incoming PCM is resampled to stereo FLTP
//   44100 and drained through a ring buffer; full frames are popped off
//   the front and the tail is zero padded on close.

use std::path::{Path, PathBuf};

use tracing::warn;

use ffmpeg_the_third as ffmpeg;

use ffmpeg::codec::{self, Id as CodecId};
use ffmpeg::encoder;
use ffmpeg::format::sample::Type as SampleType;
use ffmpeg::format::{self, output, Pixel, Sample};
use ffmpeg::frame;
use ffmpeg::software::resampling;
use ffmpeg::software::scaling::{context::Context as SwsContext, flag::Flags};
use ffmpeg::util::channel_layout::{ChannelLayout, ChannelLayoutMask};
use ffmpeg::{Dictionary, Packet, Rational};

use beatcut_core::error::{EditError, EditResult};
use beatcut_core::info::EditInfo;

use crate::frame::Frame;
use crate::pump::FrameSink;

/// Output audio sample rate for every file this recorder writes.
pub const AUDIO_RATE: i32 = 44_100;

// ── Settings ──────────────────────────────────────────────────────────────────

/// Geometry and stream layout for one recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecorderSettings {
    pub width:      u32,
    pub height:     u32,
    /// Integer output frame rate; fractional rates are rounded when the
    /// settings are derived from a probed source.
    pub frame_rate: u32,
    pub with_audio: bool,
}

impl RecorderSettings {
    /// Derives settings from a probed media snapshot. The audio stream
    /// is carried whenever the snapshot has audio properties.
    pub fn from_info(info: &EditInfo) -> Self {
        Self {
            width:      info.video.width,
            height:     info.video.height,
            frame_rate: info.video.frame_rate.round().max(1.0) as u32,
            with_audio: info.audio.is_some(),
        }
    }
}

// ── Audio FIFO ────────────────────────────────────────────────────────────────

/// Stereo FLTP (float planar) sample ring buffer between the upstream
/// audio path and the AAC encoder.
///
/// Left channel samples live in `left`, right in `right`. Mono input
/// fills both planes from channel 0 so the output is always proper
/// stereo.
struct AudioFifo {
    left:  Vec<f32>,
    right: Vec<f32>,
}

impl AudioFifo {
    fn new() -> Self {
        Self { left: Vec::new(), right: Vec::new() }
    }

    /// How many samples are currently buffered (per channel).
    fn len(&self) -> usize {
        self.left.len()
    }

    /// Append one FLTP audio frame, stereo or mono.
    fn push(&mut self, pcm: &frame::Audio) {
        let n = pcm.samples();
        if n == 0 {
            return;
        }
        unsafe {
            let l_bytes = pcm.data(0);
            let l_f32 = std::slice::from_raw_parts(l_bytes.as_ptr() as *const f32, n);
            self.left.extend_from_slice(l_f32);

            // Stereo frames use plane 1; mono duplicates plane 0.
            let r_bytes = if pcm.ch_layout().channels() >= 2 { pcm.data(1) } else { pcm.data(0) };
            let r_f32 = std::slice::from_raw_parts(r_bytes.as_ptr() as *const f32, n);
            self.right.extend_from_slice(r_f32);
        }
    }

    /// Pop one encoder-sized frame from the front of the FIFO.
    ///
    /// If fewer than `n` samples remain the tail is zero padded (only
    /// the final flush frame does this, so the AAC encoder always gets
    /// a full fixed-size input). The returned frame carries
    /// `sample_idx` as its PTS in the 1/44100 timebase.
    fn pop_frame(&mut self, n: usize, sample_idx: i64) -> frame::Audio {
        let available = self.left.len().min(n);

        let mut pcm = frame::Audio::new(
            Sample::F32(SampleType::Planar),
            n,
            ChannelLayoutMask::STEREO,
        );
        pcm.set_rate(AUDIO_RATE as u32);
        pcm.set_pts(Some(sample_idx));

        unsafe {
            let ldata = pcm.data_mut(0);
            let ldst  = std::slice::from_raw_parts_mut(ldata.as_mut_ptr() as *mut f32, n);
            ldst[..available].copy_from_slice(&self.left[..available]);
            if available < n { ldst[available..].fill(0.0); }

            let rdata = pcm.data_mut(1);
            let rdst  = std::slice::from_raw_parts_mut(rdata.as_mut_ptr() as *mut f32, n);
            rdst[..available].copy_from_slice(&self.right[..available]);
            if available < n { rdst[available..].fill(0.0); }
        }

        self.left.drain(..available);
        self.right.drain(..available);

        pcm
    }
}

// ── Audio pipe ────────────────────────────────────────────────────────────────

/// Everything needed to drive the AAC encoder for one recording.
struct AudioPipe {
    encoder:        encoder::Audio,
    /// Next output frame's PTS in samples (stream timebase 1/44100).
    out_sample_idx: i64,
    /// AAC frame size in samples (typically 1024).
    frame_size:     usize,
    fifo:           AudioFifo,
    /// Built on the first frame that differs from the target format,
    /// then reused for the rest of the recording.
    resampler:      Option<resampling::Context>,
    /// 1/AUDIO_RATE, used for PTS rescaling when writing packets.
    audio_tb:       Rational,
    /// The muxer-assigned timebase for stream 1 (may differ from audio_tb).
    ost_audio_tb:   Rational,
}

impl AudioPipe {
    /// Resample `pcm` to stereo FLTP 44100 if needed and append it to
    /// the FIFO. Frames already in the target format skip the swr pass.
    fn push(&mut self, pcm: &frame::Audio) -> EditResult<()> {
        let target = Sample::F32(SampleType::Planar);
        let needs_resample = pcm.format() != target
            || pcm.rate() != AUDIO_RATE as u32
            || pcm.ch_layout().channels() != 2;

        if !needs_resample {
            self.fifo.push(pcm);
            return Ok(());
        }

        if self.resampler.is_none() {
            // Mono sources must be declared MONO or swr misreads the
            // channel layout.
            let src_layout = if pcm.ch_layout().channels() >= 2 {
                pcm.ch_layout()
            } else {
                ChannelLayout::MONO
            };
            self.resampler = Some(
                resampling::Context::get2(
                    pcm.format(), src_layout,            pcm.rate(),
                    target,       ChannelLayout::STEREO, AUDIO_RATE as u32,
                )
                .map_err(|e| EditError::Sink(format!("create audio resampler: {e}")))?,
            );
        }

        if let Some(rs) = self.resampler.as_mut() {
            let mut resampled = frame::Audio::empty();
            rs.run(pcm, &mut resampled)
                .map_err(|e| EditError::Sink(format!("resample audio frame: {e}")))?;
            if resampled.samples() > 0 {
                self.fifo.push(&resampled);
            }
        }
        Ok(())
    }

    /// Drain buffered samples, encode and write interleaved to `octx`.
    ///
    /// In normal operation (`flush = false`) only full frames are sent.
    /// On close (`flush = true`) a partial tail frame is zero padded and
    /// flushed so no PCM is lost.
    fn drain_fifo(&mut self, octx: &mut format::context::Output, flush: bool) -> EditResult<()> {
        while self.fifo.len() >= self.frame_size || (flush && self.fifo.len() > 0) {
            let pcm = self.fifo.pop_frame(self.frame_size, self.out_sample_idx);
            self.out_sample_idx += self.frame_size as i64;

            self.encoder
                .send_frame(&pcm)
                .map_err(|e| EditError::Sink(format!("send audio frame to encoder: {e}")))?;

            self.drain_packets(octx)?;
        }
        Ok(())
    }

    /// Receive all available encoded packets and write them to the muxer.
    fn drain_packets(&mut self, octx: &mut format::context::Output) -> EditResult<()> {
        let mut pkt = Packet::empty();
        while self.encoder.receive_packet(&mut pkt).is_ok() {
            pkt.set_stream(1);
            pkt.rescale_ts(self.audio_tb, self.ost_audio_tb);
            pkt.write_interleaved(octx)
                .map_err(|e| EditError::Sink(format!("write audio packet: {e}")))?;
        }
        Ok(())
    }

    /// Send EOF to the AAC encoder and flush any remaining packets.
    fn flush_encoder(&mut self, octx: &mut format::context::Output) -> EditResult<()> {
        self.encoder
            .send_eof()
            .map_err(|e| EditError::Sink(format!("send EOF to audio encoder: {e}")))?;
        self.drain_packets(octx)
    }
}

// ── Recorder ──────────────────────────────────────────────────────────────────

pub struct MediaRecorder {
    path:          PathBuf,
    octx:          format::context::Output,
    video_encoder: encoder::Video,
    settings:      RecorderSettings,
    /// 1/fps, the video stream's nominal timebase.
    frame_tb:      Rational,
    /// The muxer-assigned timebase for stream 0, read back after the
    /// header is written.
    ost_video_tb:  Rational,
    /// Built on the first video frame once its real input format is
    /// known; every frame runs through it so the output geometry and
    /// pixel format are uniform regardless of what the chain emits.
    scaler:        Option<SwsContext>,
    audio:         Option<AudioPipe>,
    out_frame_idx: i64,
    finished:      bool,
}

impl MediaRecorder {
    /// Opens `path` for writing and sets up the encoders. The container
    /// header is written here; the file exists on disk from this point
    /// and stays unplayable until `close` writes the trailer.
    pub fn create(path: impl Into<PathBuf>, settings: RecorderSettings) -> EditResult<Self> {
        let path = path.into();

        let mut octx = output(&path)
            .map_err(|e| EditError::Sink(format!("create '{}': {e}", path.display())))?;

        // ── Video encoder (stream 0) ──────────────────────────────────
        let frame_tb = Rational::new(1, settings.frame_rate as i32);

        let h264 = encoder::find(CodecId::H264)
            .ok_or_else(|| EditError::Sink("H.264 encoder not found (is libx264 available?)".into()))?;

        let mut ost_video = octx
            .add_stream(h264)
            .map_err(|e| EditError::Sink(format!("add video stream: {e}")))?;
        ost_video.set_time_base(frame_tb);

        let video_enc_ctx = codec::context::Context::new_with_codec(h264);
        let mut video_enc = video_enc_ctx
            .encoder()
            .video()
            .map_err(|e| EditError::Sink(format!("create video encoder context: {e}")))?;

        video_enc.set_width(settings.width);
        video_enc.set_height(settings.height);
        video_enc.set_format(Pixel::YUV420P);
        video_enc.set_time_base(frame_tb);
        video_enc.set_frame_rate(Some(Rational::new(settings.frame_rate as i32, 1)));
        video_enc.set_bit_rate(0); // CRF controls quality; bit_rate 0 signals VBR

        let mut opts = Dictionary::new();
        opts.set("crf",    "18");
        opts.set("preset", "fast");

        let mut video_encoder = video_enc
            .open_as_with(h264, opts)
            .map_err(|e| EditError::Sink(format!("open H.264 encoder: {e}")))?;

        // Square pixels must be forced on the OPENED context: libavcodec
        // resets sample_aspect_ratio during codec initialisation, and
        // avcodec_parameters_from_context reads from the post-open
        // context, so nothing set before the open sticks.
        video_encoder.set_aspect_ratio(Rational::new(1, 1));

        // Copy encoder params into the stream's codecpar so the muxer has
        // resolution, format and codec private data. set_parameters()
        // requires AsPtr<AVCodecParameters>, which encoder::Video does not
        // implement, so use FFI directly.
        unsafe {
            let ret = ffmpeg::ffi::avcodec_parameters_from_context(
                (**(*octx.as_mut_ptr()).streams.add(0)).codecpar,
                video_encoder.as_ptr() as *mut ffmpeg::ffi::AVCodecContext,
            );
            if ret < 0 {
                return Err(EditError::Sink(format!(
                    "avcodec_parameters_from_context (video) failed: {ret}"
                )));
            }
        }

        // ── Audio encoder (stream 1, optional) ────────────────────────
        // Target format: 44100 Hz stereo FLTP, which the native AAC
        // encoder accepts without transcoding on the encoder side.
        let audio_tb = Rational::new(1, AUDIO_RATE);
        let mut opened_audio: Option<(encoder::Audio, usize)> = None;

        if settings.with_audio {
            let aac = encoder::find(CodecId::AAC)
                .ok_or_else(|| EditError::Sink("AAC encoder not found".into()))?;

            let mut ost_audio = octx
                .add_stream(aac)
                .map_err(|e| EditError::Sink(format!("add audio stream: {e}")))?;
            ost_audio.set_time_base(audio_tb);

            let audio_enc_ctx = codec::context::Context::new_with_codec(aac);
            let mut audio_enc = audio_enc_ctx
                .encoder()
                .audio()
                .map_err(|e| EditError::Sink(format!("create audio encoder context: {e}")))?;

            audio_enc.set_rate(AUDIO_RATE);
            audio_enc.set_ch_layout(ChannelLayout::STEREO);
            audio_enc.set_format(Sample::F32(SampleType::Planar));
            audio_enc.set_bit_rate(128_000);

            let audio_encoder = audio_enc
                .open_as_with(aac, Dictionary::new())
                .map_err(|e| EditError::Sink(format!("open AAC encoder: {e}")))?;

            // Guard against a codec reporting 0 (should not happen with AAC).
            let frame_size = (audio_encoder.frame_size() as usize).max(1024);

            unsafe {
                let ret = ffmpeg::ffi::avcodec_parameters_from_context(
                    (**(*octx.as_mut_ptr()).streams.add(1)).codecpar,
                    audio_encoder.as_ptr() as *mut ffmpeg::ffi::AVCodecContext,
                );
                if ret < 0 {
                    return Err(EditError::Sink(format!(
                        "avcodec_parameters_from_context (audio) failed: {ret}"
                    )));
                }
            }

            opened_audio = Some((audio_encoder, frame_size));
        }

        // ── Write output header ───────────────────────────────────────
        octx.write_header()
            .map_err(|e| EditError::Sink(format!("write header for '{}': {e}", path.display())))?;

        // The muxer may rewrite stream timebases during write_header;
        // read them back for packet rescaling.
        let ost_video_tb = octx.stream(0).map(|s| s.time_base()).unwrap_or(frame_tb);
        let ost_audio_tb = octx.stream(1).map(|s| s.time_base()).unwrap_or(audio_tb);

        let audio = opened_audio.map(|(encoder, frame_size)| AudioPipe {
            encoder,
            out_sample_idx: 0,
            frame_size,
            fifo: AudioFifo::new(),
            resampler: None,
            audio_tb,
            ost_audio_tb,
        });

        Ok(Self {
            path,
            octx,
            video_encoder,
            settings,
            frame_tb,
            ost_video_tb,
            scaler: None,
            audio,
            out_frame_idx: 0,
            finished: false,
        })
    }

    /// Encode and mux one frame. Video frames are restamped with the
    /// output frame counter; audio frames go through the FIFO. Audio
    /// arriving at a recorder created without an audio stream is
    /// dropped.
    pub fn record(&mut self, frame: &Frame) -> EditResult<()> {
        match frame {
            Frame::Video { picture, .. } => self.record_video(picture),
            Frame::Audio { samples, .. } => match self.audio.as_mut() {
                Some(pipe) => {
                    pipe.push(samples)?;
                    pipe.drain_fifo(&mut self.octx, false)
                }
                None => Ok(()),
            },
        }
    }

    fn record_video(&mut self, picture: &frame::Video) -> EditResult<()> {
        if self.scaler.is_none() {
            self.scaler = Some(
                SwsContext::get(
                    picture.format(),
                    picture.width(),
                    picture.height(),
                    Pixel::YUV420P,
                    self.settings.width,
                    self.settings.height,
                    Flags::BILINEAR,
                )
                .map_err(|e| EditError::Sink(format!("create output scaler: {e}")))?,
            );
        }

        let mut yuv = frame::Video::empty();
        if let Some(scaler) = self.scaler.as_mut() {
            scaler
                .run(picture, &mut yuv)
                .map_err(|e| EditError::Sink(format!("scale output frame: {e}")))?;
        }

        yuv.set_pts(Some(self.out_frame_idx));
        // swscale copies the source aspect onto the output frame; force
        // square pixels so players do not letterbox. Frames have no safe
        // setter, write the AVFrame field directly.
        unsafe {
            (*yuv.as_mut_ptr()).sample_aspect_ratio =
                ffmpeg::ffi::AVRational { num: 1, den: 1 };
        }

        self.video_encoder
            .send_frame(&yuv)
            .map_err(|e| EditError::Sink(format!("send video frame to encoder: {e}")))?;
        self.out_frame_idx += 1;

        self.drain_video_packets()
    }

    fn drain_video_packets(&mut self) -> EditResult<()> {
        let mut pkt = Packet::empty();
        while self.video_encoder.receive_packet(&mut pkt).is_ok() {
            pkt.set_stream(0);
            pkt.rescale_ts(self.frame_tb, self.ost_video_tb);
            pkt.write_interleaved(&mut self.octx)
                .map_err(|e| EditError::Sink(format!("write video packet: {e}")))?;
        }
        Ok(())
    }

    /// Flush both encoders, write the trailer and hand back the output
    /// path. Consumes the recorder; a recorder that is dropped instead
    /// leaves a truncated file behind.
    pub fn close(mut self) -> EditResult<PathBuf> {
        self.video_encoder
            .send_eof()
            .map_err(|e| EditError::Sink(format!("send EOF to video encoder: {e}")))?;
        self.drain_video_packets()?;

        if let Some(pipe) = self.audio.as_mut() {
            // flush=true zero pads the tail and sends the final partial frame.
            pipe.drain_fifo(&mut self.octx, true)?;
            pipe.flush_encoder(&mut self.octx)?;
        }

        self.octx
            .write_trailer()
            .map_err(|e| EditError::Sink(format!("write trailer for '{}': {e}", self.path.display())))?;

        self.finished = true;
        Ok(self.path.clone())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Video frames written so far, which is also the next output PTS.
    pub fn video_frames_written(&self) -> i64 {
        self.out_frame_idx
    }
}

impl FrameSink for MediaRecorder {
    fn write(&mut self, frame: &Frame) -> EditResult<()> {
        self.record(frame)
    }
}

impl Drop for MediaRecorder {
    fn drop(&mut self) {
        if !self.finished {
            warn!(
                "[record] '{}' dropped without close, the trailer was never written",
                self.path.display()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beatcut_core::info::{AudioParams, VideoParams};

    fn info(frame_rate: f64, with_audio: bool) -> EditInfo {
        EditInfo {
            video: VideoParams { frame_rate, width: 1280, height: 720, ..VideoParams::default() },
            audio: with_audio.then(AudioParams::default),
            length_micros: 0,
            intro: None,
        }
    }

    #[test]
    fn settings_follow_the_probed_snapshot() {
        let s = RecorderSettings::from_info(&info(29.97, true));
        assert_eq!(s.width, 1280);
        assert_eq!(s.height, 720);
        assert_eq!(s.frame_rate, 30);
        assert!(s.with_audio);

        let silent = RecorderSettings::from_info(&info(0.0, false));
        assert_eq!(silent.frame_rate, 1);
        assert!(!silent.with_audio);
    }

    #[test]
    fn fifo_pops_fixed_frames_and_zero_pads_the_tail() {
        let mut fifo = AudioFifo::new();

        let mut pcm = frame::Audio::new(
            Sample::F32(SampleType::Planar),
            1500,
            ChannelLayoutMask::STEREO,
        );
        pcm.set_rate(AUDIO_RATE as u32);
        unsafe {
            let l = std::slice::from_raw_parts_mut(pcm.data_mut(0).as_mut_ptr() as *mut f32, 1500);
            l.fill(0.25);
            let r = std::slice::from_raw_parts_mut(pcm.data_mut(1).as_mut_ptr() as *mut f32, 1500);
            r.fill(-0.5);
        }

        fifo.push(&pcm);
        assert_eq!(fifo.len(), 1500);

        let full = fifo.pop_frame(1024, 0);
        assert_eq!(full.samples(), 1024);
        assert_eq!(full.pts(), Some(0));
        assert_eq!(fifo.len(), 476);

        let tail = fifo.pop_frame(1024, 1024);
        assert_eq!(tail.pts(), Some(1024));
        assert_eq!(fifo.len(), 0);
        unsafe {
            let l = std::slice::from_raw_parts(tail.data(0).as_ptr() as *const f32, 1024);
            assert_eq!(l[475], 0.25);
            assert_eq!(l[476], 0.0);
            let r = std::slice::from_raw_parts(tail.data(1).as_ptr() as *const f32, 1024);
            assert_eq!(r[0], -0.5);
            assert_eq!(r[1023], 0.0);
        }
    }

    #[test]
    fn mono_input_fills_both_planes() {
        let mut fifo = AudioFifo::new();

        let mut pcm = frame::Audio::new(
            Sample::F32(SampleType::Planar),
            64,
            ChannelLayoutMask::MONO,
        );
        pcm.set_rate(AUDIO_RATE as u32);
        unsafe {
            let m = std::slice::from_raw_parts_mut(pcm.data_mut(0).as_mut_ptr() as *mut f32, 64);
            m.fill(0.125);
        }

        fifo.push(&pcm);
        let out = fifo.pop_frame(64, 0);
        unsafe {
            let l = std::slice::from_raw_parts(out.data(0).as_ptr() as *const f32, 64);
            let r = std::slice::from_raw_parts(out.data(1).as_ptr() as *const f32, 64);
            assert_eq!(l[10], 0.125);
            assert_eq!(r[10], 0.125);
        }
    }
}
