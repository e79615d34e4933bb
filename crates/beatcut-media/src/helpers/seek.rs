// crates/beatcut-media/src/helpers/seek.rs
//
// Container seek wrapper. All grabber seeks route through here so the
// skip-at-zero guard and the backward-seek range live in one place;
// whether a failure aborts the render is the caller's policy, not this
// module's.

use ffmpeg_the_third as ffmpeg;

use beatcut_core::error::{EditError, EditResult};

/// Seek `ictx` to `target_micros` from the start of the file. Micros
/// are already `AV_TIME_BASE` units, so the target is the seek ts.
///
/// Returns `Ok(false)` when the seek was skipped because the target is
/// at or before zero; a freshly-opened context already sits there, and
/// `avformat_seek_file(max_ts=0)` is rejected on some platforms.
///
/// # Why backward seek (`..=seek_ts`)
/// A forward seek lands on the keyframe AT OR AFTER the target. When
/// the target falls mid-GOP, which is the normal case for a clip cut,
/// every frame between the target and that keyframe is missing from
/// the decode stream and the segment opens with a visible jump. A
/// backward seek lands on the keyframe BEFORE the target; the caller
/// decodes and discards the pre-roll, so the first delivered frame is
/// exactly at the cut.
pub fn seek_to_micros(
    ictx: &mut ffmpeg::format::context::Input,
    target_micros: i64,
    label: &str,
) -> EditResult<bool> {
    if target_micros <= 0 {
        return Ok(false);
    }

    ictx.seek(target_micros, ..=target_micros)
        .map_err(|e| EditError::Source(format!("[{label}] seek to {target_micros}us: {e}")))?;
    Ok(true)
}
