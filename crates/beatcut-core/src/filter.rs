// crates/beatcut-core/src/filter.rs
//
// Filter-chain assembly. Users register filters as expression templates
// grouped by range (transition vs export) and medium (video vs audio);
// this module expands the templates against the edit snapshot and a
// segment's position, then orders them into a per-segment chain plan:
//   • transition stages come first and are skipped for the first
//     segment, which has nothing to blend into
//   • export video stages follow on every segment
//   • an empty plan is an explicit PassThrough variant so the render
//     loop can skip filter-graph setup entirely
// Expansion reads only the snapshot, never live codec state, so the
// same inputs always produce the same plan.

use serde::{Deserialize, Serialize};

use crate::info::EditInfo;

/// When a filter applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterRange {
    /// Between segments, while composing the final video.
    Transition,
    /// On every segment of the final video (and optionally during
    /// segment rendering).
    Export,
}

/// What a filter applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterMedium {
    Video,
    Audio,
}

/// One user-registered filter: a named filter-graph expression template.
/// Templates may use `{width}`, `{height}`, `{fps}`, `{pixel_format}`,
/// `{sample_rate}`, `{sample_format}`, `{offset_ms}`, `{offset_s}` and
/// `{duration_ms}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub name:       String,
    pub range:      FilterRange,
    pub medium:     FilterMedium,
    pub expression: String,
}

/// A filter with its expression fully expanded, ready to hand to the
/// filter-graph layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterStage {
    pub name:       String,
    pub expression: String,
}

/// Ordered stages for one segment, or an explicit pass-through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainPlan {
    PassThrough,
    Stages(Vec<FilterStage>),
}

impl ChainPlan {
    pub fn is_pass_through(&self) -> bool {
        matches!(self, ChainPlan::PassThrough)
    }

    pub fn stages(&self) -> &[FilterStage] {
        match self {
            ChainPlan::PassThrough => &[],
            ChainPlan::Stages(stages) => stages,
        }
    }
}

/// Where a segment sits in the final timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentPosition {
    pub index:           usize,
    pub start_offset_ms: f64,
    pub duration_ms:     f64,
}

/// Everything expansion may read from.
#[derive(Debug, Clone, Copy)]
pub struct FilterContext<'a> {
    pub info:     &'a EditInfo,
    pub position: SegmentPosition,
}

/// Replaces every placeholder in `expr` with its value from the
/// context. Unknown braces are left untouched.
pub fn expand_expression(expr: &str, ctx: &FilterContext<'_>) -> String {
    let video = &ctx.info.video;
    let (sample_rate, sample_format) = match &ctx.info.audio {
        Some(audio) => (audio.sample_rate, audio.sample_format.as_str()),
        None => (0, "none"),
    };

    expr.replace("{width}", &video.width.to_string())
        .replace("{height}", &video.height.to_string())
        .replace("{fps}", &video.frame_rate.to_string())
        .replace("{pixel_format}", &video.pixel_format)
        .replace("{sample_rate}", &sample_rate.to_string())
        .replace("{sample_format}", sample_format)
        .replace("{offset_ms}", &ctx.position.start_offset_ms.to_string())
        .replace("{offset_s}", &(ctx.position.start_offset_ms / 1000.0).to_string())
        .replace("{duration_ms}", &ctx.position.duration_ms.to_string())
}

fn stages_of(
    filters: &[FilterSpec],
    range: FilterRange,
    medium: FilterMedium,
    ctx: &FilterContext<'_>,
) -> Vec<FilterStage> {
    filters
        .iter()
        .filter(|f| f.range == range && f.medium == medium)
        .map(|f| FilterStage {
            name:       f.name.clone(),
            expression: expand_expression(&f.expression, ctx),
        })
        .collect()
}

/// Chain for one segment of the composition pass: transitions first
/// (except on the first segment), then the persistent video effects.
/// Must be re-assembled per segment since transition expressions embed
/// timeline offsets.
pub fn assemble_video_chain(filters: &[FilterSpec], ctx: &FilterContext<'_>) -> ChainPlan {
    let mut stages = Vec::new();
    if ctx.position.index > 0 {
        stages.extend(stages_of(filters, FilterRange::Transition, FilterMedium::Video, ctx));
    }
    stages.extend(stages_of(filters, FilterRange::Export, FilterMedium::Video, ctx));

    if stages.is_empty() {
        ChainPlan::PassThrough
    } else {
        ChainPlan::Stages(stages)
    }
}

/// Chain for one segment of the rendering pass: persistent video
/// effects only, no transitions.
pub fn assemble_export_chain(filters: &[FilterSpec], ctx: &FilterContext<'_>) -> ChainPlan {
    let stages = stages_of(filters, FilterRange::Export, FilterMedium::Video, ctx);
    if stages.is_empty() {
        ChainPlan::PassThrough
    } else {
        ChainPlan::Stages(stages)
    }
}

/// Persistent audio effects collapsed into a single filter-graph
/// expression, comma-joined in registration order. `None` when no
/// export audio filter is registered.
pub fn assemble_audio_chain(filters: &[FilterSpec], ctx: &FilterContext<'_>) -> Option<FilterStage> {
    let stages = stages_of(filters, FilterRange::Export, FilterMedium::Audio, ctx);
    if stages.is_empty() {
        return None;
    }

    let name = stages.iter().map(|s| s.name.as_str()).collect::<Vec<_>>().join(" + ");
    let expression = stages.iter().map(|s| s.expression.as_str()).collect::<Vec<_>>().join(",");
    Some(FilterStage { name, expression })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::info::{AudioParams, VideoParams};

    fn info() -> EditInfo {
        EditInfo {
            video:         VideoParams {
                frame_rate:   30.0,
                width:        1920,
                height:       1080,
                pixel_format: String::from("yuv420p"),
                ..VideoParams::default()
            },
            audio:         Some(AudioParams {
                sample_rate:   44100,
                sample_format: String::from("fltp"),
                ..AudioParams::default()
            }),
            length_micros: 60_000_000,
            intro:         None,
        }
    }

    fn position(index: usize) -> SegmentPosition {
        SegmentPosition { index, start_offset_ms: 2500.0, duration_ms: 480.0 }
    }

    fn filter(name: &str, range: FilterRange, medium: FilterMedium, expr: &str) -> FilterSpec {
        FilterSpec {
            name:       String::from(name),
            range,
            medium,
            expression: String::from(expr),
        }
    }

    fn registered() -> Vec<FilterSpec> {
        vec![
            filter("fade", FilterRange::Transition, FilterMedium::Video, "fade=st={offset_s}"),
            filter("grain", FilterRange::Export, FilterMedium::Video, "noise=alls=8"),
            filter("bass", FilterRange::Export, FilterMedium::Audio, "bass=g=4"),
            filter("treble", FilterRange::Export, FilterMedium::Audio, "treble=g=-2"),
        ]
    }

    #[test]
    fn expands_every_placeholder() {
        let info = info();
        let ctx = FilterContext { info: &info, position: position(3) };
        let out = expand_expression(
            "scale={width}:{height},fps={fps},fmt={pixel_format},\
             ar={sample_rate},af={sample_format},\
             o={offset_ms}/{offset_s},d={duration_ms}",
            &ctx,
        );
        assert_eq!(
            out,
            "scale=1920:1080,fps=30,fmt=yuv420p,ar=44100,af=fltp,o=2500/2.5,d=480"
        );
    }

    #[test]
    fn missing_audio_expands_to_placeholders_defaults() {
        let mut info = info();
        info.audio = None;
        let ctx = FilterContext { info: &info, position: position(0) };
        assert_eq!(expand_expression("{sample_rate}:{sample_format}", &ctx), "0:none");
    }

    #[test]
    fn first_segment_gets_no_transition() {
        let info = info();
        let ctx = FilterContext { info: &info, position: position(0) };
        let plan = assemble_video_chain(&registered(), &ctx);

        let names: Vec<&str> = plan.stages().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["grain"]);
    }

    #[test]
    fn later_segments_put_transition_before_effects() {
        let info = info();
        let ctx = FilterContext { info: &info, position: position(2) };
        let plan = assemble_video_chain(&registered(), &ctx);

        let names: Vec<&str> = plan.stages().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["fade", "grain"]);
    }

    #[test]
    fn no_registered_video_filters_means_pass_through() {
        let info = info();
        let ctx = FilterContext { info: &info, position: position(1) };
        let audio_only = vec![filter("bass", FilterRange::Export, FilterMedium::Audio, "bass=g=4")];
        assert!(assemble_video_chain(&audio_only, &ctx).is_pass_through());
        assert_eq!(assemble_video_chain(&audio_only, &ctx).stages().len(), 0);
    }

    #[test]
    fn export_chain_never_includes_transitions() {
        let info = info();
        let ctx = FilterContext { info: &info, position: position(5) };
        let plan = assemble_export_chain(&registered(), &ctx);

        let names: Vec<&str> = plan.stages().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["grain"]);
    }

    #[test]
    fn transition_offset_tracks_segment_position() {
        let info = info();
        let ctx = FilterContext { info: &info, position: position(2) };
        let plan = assemble_video_chain(&registered(), &ctx);
        assert_eq!(plan.stages()[0].expression, "fade=st=2.5");
    }

    #[test]
    fn same_inputs_assemble_the_same_chain() {
        let info = info();
        let ctx = FilterContext { info: &info, position: position(4) };
        assert_eq!(
            assemble_video_chain(&registered(), &ctx),
            assemble_video_chain(&registered(), &ctx)
        );
    }

    #[test]
    fn audio_chain_joins_in_registration_order() {
        let info = info();
        let ctx = FilterContext { info: &info, position: position(0) };
        let stage = assemble_audio_chain(&registered(), &ctx).unwrap();
        assert_eq!(stage.name, "bass + treble");
        assert_eq!(stage.expression, "bass=g=4,treble=g=-2");
    }

    #[test]
    fn audio_chain_absent_without_audio_filters() {
        let info = info();
        let ctx = FilterContext { info: &info, position: position(0) };
        let video_only = vec![filter("grain", FilterRange::Export, FilterMedium::Video, "noise")];
        assert!(assemble_audio_chain(&video_only, &ctx).is_none());
    }
}
