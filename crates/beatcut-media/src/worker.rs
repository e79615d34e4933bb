// crates/beatcut-media/src/worker.rs
//
// EditWorker: runs one render on a dedicated thread and streams
// progress events back to the caller. There is no cancellation
// surface; a render that has started runs to completion or to its
// first error.

use std::path::PathBuf;
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender};

use beatcut_core::edit::EditSpec;
use beatcut_core::error::{EditError, EditResult};

use crate::editor::{BeatEditor, RenderOutcome};

/// Progress reports from a running render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditEvent {
    Started,
    /// One segment file landed on disk during pass 1.
    SegmentWritten { index: usize, path: PathBuf },
    Completed { outcome: RenderOutcome },
    Failed { error: String },
}

pub struct EditWorker {
    /// Event stream; drain it live or after `join`.
    pub rx: Receiver<EditEvent>,
    handle: thread::JoinHandle<EditResult<RenderOutcome>>,
}

impl EditWorker {
    /// Renders `spec` on its own thread. Either drain `rx` while the
    /// render runs or `join` for the final result; event sends never
    /// block, so the render cannot stall behind a caller that joins
    /// without draining.
    pub fn spawn(spec: EditSpec, reuse: bool) -> Self {
        let (tx, rx) = unbounded();
        let handle = thread::spawn(move || run_edit(spec, reuse, tx));
        Self { rx, handle }
    }

    /// Blocks until the render finishes.
    pub fn join(self) -> EditResult<RenderOutcome> {
        self.handle
            .join()
            .unwrap_or_else(|_| Err(EditError::Sink(String::from("render thread panicked"))))
    }
}

fn run_edit(spec: EditSpec, reuse: bool, tx: Sender<EditEvent>) -> EditResult<RenderOutcome> {
    let _ = tx.send(EditEvent::Started);

    let result = BeatEditor::new(spec).and_then(|editor| {
        let mut editor = editor.with_events(tx.clone());
        editor.edit(reuse)
    });

    match &result {
        Ok(outcome) => {
            let _ = tx.send(EditEvent::Completed { outcome: outcome.clone() });
        }
        Err(e) => {
            let _ = tx.send(EditEvent::Failed { error: e.to_string() });
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec_in(dir: &std::path::Path) -> EditSpec {
        EditSpec {
            source:            dir.join("missing-source.mp4"),
            backing_track:     dir.join("missing-track.mp3"),
            output:            dir.join("out.mp4"),
            working_directory: dir.join("work"),
            ..EditSpec::default()
        }
    }

    #[test]
    fn empty_render_reports_started_then_completed() {
        let dir = tempfile::tempdir().unwrap();
        let worker = EditWorker::spawn(spec_in(dir.path()), false);
        let rx = worker.rx.clone();

        assert_eq!(worker.join().unwrap(), RenderOutcome::Empty);

        let events: Vec<EditEvent> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                EditEvent::Started,
                EditEvent::Completed { outcome: RenderOutcome::Empty },
            ]
        );
    }

    #[test]
    fn invalid_spec_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let spec = EditSpec { beat_gaps: vec![-1.0], ..spec_in(dir.path()) };
        let worker = EditWorker::spawn(spec, false);
        let rx = worker.rx.clone();

        assert!(matches!(worker.join(), Err(EditError::Schedule(_))));

        let events: Vec<EditEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], EditEvent::Failed { .. }));
    }

    #[test]
    fn join_is_not_blocked_by_an_undrained_event_stream() {
        // a render with many segments emits far more events than the
        // caller has read by the time it joins
        let (tx, rx) = unbounded();
        let handle = thread::spawn(move || -> EditResult<RenderOutcome> {
            for index in 0..4096 {
                let _ = tx.send(EditEvent::SegmentWritten {
                    index,
                    path: PathBuf::from(format!("segment {index}.mp4")),
                });
            }
            Ok(RenderOutcome::Empty)
        });
        let worker = EditWorker { rx, handle };
        let rx = worker.rx.clone();

        assert_eq!(worker.join().unwrap(), RenderOutcome::Empty);
        assert_eq!(rx.try_iter().count(), 4096);
    }
}
