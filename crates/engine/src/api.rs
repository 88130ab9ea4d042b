use std::sync::Arc;

use crate::machine::{Context, MachineEvent, Mode};
use crate::timeline::{ClipId, PRIMARY_TRACK, TakeId};

/// Commands accepted from the editing surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    RecordStart,
    RecordStop,
    Play,
    Pause,
    /// Moves the playhead to `t_tl` in timeline ticks.
    ///
    /// Positions past the end clamp to the last tick. Ignored while recording.
    Seek {
        t_tl: i64,
    },
    /// Splits `clip_id` at the global timeline position `at_tl`.
    ///
    /// `at_tl` must lie strictly inside the clip; a split on either boundary
    /// is rejected with `SplitOutsideClip` and nothing changes. The left half
    /// keeps `clip_id` and becomes the only selected clip.
    ///
    /// # Example
    /// ```
    /// use engine::{Command, Machine, MachineEvent, Take};
    ///
    /// let mut machine = Machine::new();
    /// machine
    ///     .handle(MachineEvent::RecordingCompleted {
    ///         take: Take { id: 1, url: "blob:a".into(), duration_tl: 4_000_000 },
    ///     })
    ///     .expect("ingest");
    /// machine
    ///     .handle(Command::Split { clip_id: 1, at_tl: 1_000_000 }.into())
    ///     .expect("split");
    /// assert_eq!(machine.context().timeline.clips.len(), 2);
    /// ```
    Split {
        clip_id: ClipId,
        at_tl: i64,
    },
    /// Removes clips and closes the gaps. Fails when `clip_ids` is empty or
    /// names an unknown clip.
    Delete {
        clip_ids: Vec<ClipId>,
    },
    /// Selects `clip_id`; with `multi` it toggles membership instead of replacing.
    Select {
        clip_id: ClipId,
        multi: bool,
    },
    /// Rearranges the playback track. `order` must be a permutation of its clips.
    Reorder {
        order: Vec<ClipId>,
    },
    /// Leaves the error state.
    Reset,
}

impl From<Command> for MachineEvent {
    fn from(command: Command) -> Self {
        match command {
            Command::RecordStart => Self::RecordStart,
            Command::RecordStop => Self::RecordStop,
            Command::Play => Self::Play,
            Command::Pause => Self::Pause,
            Command::Seek { t_tl } => Self::Seek { t_tl },
            Command::Split { clip_id, at_tl } => Self::Split { clip_id, at_tl },
            Command::Delete { clip_ids } => Self::Delete { clip_ids },
            Command::Select { clip_id, multi } => Self::Select { clip_id, multi },
            Command::Reorder { order } => Self::Reorder { order },
            Command::Reset => Self::Reset,
        }
    }
}

/// Clip summary for timeline rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipView {
    pub id: ClipId,
    pub take_id: TakeId,
    pub track: u32,
    pub timeline_start: i64,
    pub duration_tl: i64,
    pub source_in: i64,
    pub source_out: i64,
    pub selected: bool,
    pub active: bool,
}

/// Read-only projections over one snapshot.
#[derive(Debug, Clone)]
pub struct QueryView {
    context: Arc<Context>,
}

impl QueryView {
    pub fn new(context: Arc<Context>) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn mode(&self) -> Mode {
        self.context.mode()
    }

    pub fn scrubber_position(&self) -> i64 {
        self.context.playback.global_position
    }

    pub fn timeline_duration(&self) -> i64 {
        self.context.timeline.duration_tl()
    }

    pub fn selected_clips(&self) -> Vec<ClipId> {
        self.context.selection.ids().collect()
    }

    pub fn active_clip(&self) -> Option<ClipId> {
        self.context.active_clip().map(|clip| clip.id)
    }

    pub fn can_record(&self) -> bool {
        self.context.recording.is_none()
            && !matches!(self.mode(), Mode::Recording | Mode::Error)
    }

    pub fn can_play(&self) -> bool {
        matches!(self.mode(), Mode::Idle | Mode::Paused)
            && self.context.timeline.track_duration(PRIMARY_TRACK) > 0
    }

    pub fn clips(&self) -> Vec<ClipView> {
        let active = self.context.playback.current_clip_id;
        self.context
            .timeline
            .clips
            .iter()
            .map(|clip| ClipView {
                id: clip.id,
                take_id: clip.take_id,
                track: clip.track,
                timeline_start: clip.timeline_start,
                duration_tl: clip.duration_tl(),
                source_in: clip.source_in,
                source_out: clip.source_out,
                selected: self.context.selection.contains(clip.id),
                active: active == Some(clip.id),
            })
            .collect()
    }
}
