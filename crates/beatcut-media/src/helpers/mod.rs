// crates/beatcut-media/src/helpers/mod.rs
//
// Small ffmpeg naming shims shared by the grabber, recorder and filter
// graph. Filter-graph arguments and the edit snapshot both want string
// names for formats the safe API only exposes as enums, so the lookups
// go through the FFI name tables here, in one place.

pub mod seek;

use std::ffi::CStr;

use ffmpeg_the_third as ffmpeg;

use ffmpeg::format::{Pixel, Sample};

/// ffmpeg's canonical name for a sample format, e.g. "fltp".
pub fn sample_format_name(format: Sample) -> String {
    unsafe {
        let ptr = ffmpeg::ffi::av_get_sample_fmt_name(format.into());
        if ptr.is_null() {
            String::from("none")
        } else {
            CStr::from_ptr(ptr).to_string_lossy().into_owned()
        }
    }
}

/// ffmpeg's canonical name for a pixel format, e.g. "yuv420p".
pub fn pixel_format_name(format: Pixel) -> String {
    match format.descriptor() {
        Some(desc) => desc.name().to_string(),
        None => String::from("none"),
    }
}

/// Channel layout spelling accepted by abuffer args. Beyond stereo the
/// count syntax ("6c") picks ffmpeg's default ordering for that count.
pub fn channel_layout_name(channels: u16) -> String {
    match channels {
        1 => String::from("mono"),
        2 => String::from("stereo"),
        n => format!("{n}c"),
    }
}

/// Short codec name, "unknown_codec" when the id has no registered name.
pub fn codec_name(id: ffmpeg::codec::Id) -> String {
    unsafe {
        let ptr = ffmpeg::ffi::avcodec_get_name(id.into());
        CStr::from_ptr(ptr).to_string_lossy().into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ffmpeg::format::sample::Type;

    #[test]
    fn names_match_ffmpeg_spellings() {
        assert_eq!(sample_format_name(Sample::F32(Type::Planar)), "fltp");
        assert_eq!(sample_format_name(Sample::I16(Type::Packed)), "s16");
        assert_eq!(pixel_format_name(Pixel::YUV420P), "yuv420p");
        assert_eq!(codec_name(ffmpeg::codec::Id::H264), "h264");
    }

    #[test]
    fn channel_layouts_spell_mono_and_stereo() {
        assert_eq!(channel_layout_name(1), "mono");
        assert_eq!(channel_layout_name(2), "stereo");
        assert_eq!(channel_layout_name(6), "6c");
    }
}
