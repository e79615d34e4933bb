// crates/beatcut-core/src/segment.rs
//
// Naming scheme for intermediate segment files and discovery of the
// ones a previous run left in the working directory. Ordering is by
// the numeric index embedded in the name, not lexicographic, so
// "segment 10" sorts after "segment 2".

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{EditError, EditResult};

pub const SEGMENT_PREFIX: &str = "segment ";

pub fn segment_file_name(index: usize) -> String {
    format!("{SEGMENT_PREFIX}{index}.mp4")
}

pub fn segment_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(segment_file_name(index))
}

/// Index embedded in a segment file name, `None` for anything else in
/// the directory.
pub fn parse_segment_index(file_name: &str) -> Option<usize> {
    let rest = file_name.strip_prefix(SEGMENT_PREFIX)?;
    let (stem, _ext) = rest.rsplit_once('.')?;
    stem.parse().ok()
}

/// All segment files under `dir`, sorted by index. Files that do not
/// follow the naming scheme are skipped.
pub fn collect_segments(dir: &Path) -> EditResult<Vec<PathBuf>> {
    let entries = fs::read_dir(dir)
        .map_err(|e| EditError::Source(format!("list segments in {}: {e}", dir.display())))?;

    let mut found: Vec<(usize, PathBuf)> = Vec::new();
    for entry in entries {
        let entry = entry
            .map_err(|e| EditError::Source(format!("list segments in {}: {e}", dir.display())))?;
        let name = entry.file_name();
        if let Some(index) = name.to_str().and_then(parse_segment_index) {
            found.push((index, entry.path()));
        }
    }

    found.sort_by_key(|(index, _)| *index);
    Ok(found.into_iter().map(|(_, path)| path).collect())
}
