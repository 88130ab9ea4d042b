use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use crate::error::{EngineError, Result};
use crate::pending::{ClipTransition, PendingAction, PendingBatch};
use crate::project::ProjectDocument;
use crate::time::{clip_end, global_to_source, normalize_playhead, source_to_global};
use crate::timeline::{Clip, ClipId, PRIMARY_TRACK, Take, TakeId, Timeline};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mode {
    #[default]
    Idle,
    Loading,
    Playing,
    Paused,
    Recording,
    Error,
}

/// What the machine believes the media element currently holds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaMirror {
    pub loaded_url: Option<String>,
    pub native_time: i64,
    /// `None` until the element reports a definitive duration.
    pub native_duration: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackContext {
    pub mode: Mode,
    pub current_clip_id: Option<ClipId>,
    pub global_position: i64,
    pub pending: Option<PendingBatch>,
    pub media: MediaMirror,
    /// Bumped on every emitted batch; never decreases.
    pub generation: u64,
    pub last_error: Option<String>,
}

impl PlaybackContext {
    pub fn pending_clip_transition(&self) -> Option<&ClipTransition> {
        self.pending.as_ref().and_then(PendingBatch::clip_transition)
    }

    pub fn pending_seek(&self) -> Option<i64> {
        self.pending.as_ref().and_then(PendingBatch::seek)
    }

    /// Playing, or on the way to playing.
    pub fn is_playing(&self) -> bool {
        matches!(self.mode, Mode::Playing | Mode::Loading)
    }
}

/// Ordered set of selected clip ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    ids: BTreeSet<ClipId>,
}

impl Selection {
    /// Replaces the selection, or toggles `clip_id` when `multi` is set.
    pub fn select(&mut self, clip_id: ClipId, multi: bool) {
        if !multi {
            self.only(clip_id);
        } else if !self.ids.remove(&clip_id) {
            self.ids.insert(clip_id);
        }
    }

    pub fn only(&mut self, clip_id: ClipId) {
        self.ids.clear();
        self.ids.insert(clip_id);
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    pub fn contains(&self, clip_id: ClipId) -> bool {
        self.ids.contains(&clip_id)
    }

    pub fn ids(&self) -> impl Iterator<Item = ClipId> + '_ {
        self.ids.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn retain(&mut self, keep: impl FnMut(&ClipId) -> bool) {
        self.ids.retain(keep);
    }
}

/// Machine-side view of an active recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingContext {
    /// Assigned once the recorder confirms the start.
    pub take_id: Option<TakeId>,
    pub stopping: bool,
    /// Mode restored if the recorder fails.
    pub resume_mode: Mode,
}

/// Complete session state, published as immutable snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Context {
    pub timeline: Timeline,
    pub takes: BTreeMap<TakeId, Take>,
    pub playback: PlaybackContext,
    pub selection: Selection,
    pub recording: Option<RecordingContext>,
}

impl Context {
    pub fn mode(&self) -> Mode {
        self.playback.mode
    }

    pub fn active_clip(&self) -> Option<&Clip> {
        self.playback
            .current_clip_id
            .and_then(|clip_id| self.timeline.clip(clip_id))
    }

    pub fn url_for(&self, clip: &Clip) -> Option<&str> {
        self.takes.get(&clip.take_id).map(|take| take.url.as_str())
    }

    /// End of the sequence playback walks through.
    pub fn playable_duration(&self) -> i64 {
        self.timeline.track_duration(PRIMARY_TRACK)
    }
}

/// Inputs to the machine: user commands plus orchestration and media feedback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MachineEvent {
    RecordStart,
    RecordStop,
    Play,
    Pause,
    Seek { t_tl: i64 },
    Split { clip_id: ClipId, at_tl: i64 },
    Delete { clip_ids: Vec<ClipId> },
    Select { clip_id: ClipId, multi: bool },
    Reorder { order: Vec<ClipId> },
    Reset,
    ActionsProcessed { generation: u64 },
    RecordingStarted { take_id: TakeId },
    RecordingCompleted { take: Take },
    RecordingFailed { reason: String },
    MediaLoadFailed {
        generation: u64,
        url: String,
        reason: String,
    },
    TimeUpdate { url: String, source_tl: i64 },
    MetadataLoaded { url: String, duration_tl: Option<i64> },
    VideoEnded { clip_id: ClipId },
}

impl MachineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RecordStart => "RECORD.START",
            Self::RecordStop => "RECORD.STOP",
            Self::Play => "PLAY",
            Self::Pause => "PAUSE",
            Self::Seek { .. } => "SEEK",
            Self::Split { .. } => "SPLIT",
            Self::Delete { .. } => "DELETE",
            Self::Select { .. } => "SELECT",
            Self::Reorder { .. } => "REORDER",
            Self::Reset => "RESET",
            Self::ActionsProcessed { .. } => "ACTIONS.PROCESSED",
            Self::RecordingStarted { .. } => "RECORDING.STARTED",
            Self::RecordingCompleted { .. } => "RECORDING.COMPLETED",
            Self::RecordingFailed { .. } => "RECORDING.FAILED",
            Self::MediaLoadFailed { .. } => "MEDIA.LOAD_FAILED",
            Self::TimeUpdate { .. } => "TIME.UPDATE",
            Self::MetadataLoaded { .. } => "METADATA.LOADED",
            Self::VideoEnded { .. } => "VIDEO.ENDED",
        }
    }

    /// High-frequency media feedback that should not be logged per event.
    pub fn is_media_feedback(&self) -> bool {
        matches!(self, Self::TimeUpdate { .. } | Self::MetadataLoaded { .. })
    }
}

/// Outcome of an event that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    Applied,
    /// A guard did not pass; the context is unchanged.
    Ignored,
}

/// Sole writer of timeline, playback, recording and selection state.
///
/// Transitions are synchronous. When the outside world must change, a
/// generation-tagged [`PendingBatch`] is published for the orchestrator.
#[derive(Debug, Clone)]
pub struct Machine {
    context: Context,
    next_clip_id: ClipId,
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

impl Machine {
    pub fn new() -> Self {
        Self {
            context: Context::default(),
            next_clip_id: 1,
        }
    }

    /// Rehydrates an idle session from a saved project.
    pub fn restore(document: ProjectDocument) -> Result<Self> {
        let (timeline, takes) = document.into_parts()?;
        let next_clip_id = timeline
            .clips
            .iter()
            .map(|clip| clip.id)
            .max()
            .map_or(1, |id| id + 1);
        info!(
            clips = timeline.clips.len(),
            takes = takes.len(),
            duration_tl = timeline.duration_tl(),
            "session restored"
        );
        Ok(Self {
            context: Context {
                timeline,
                takes,
                ..Context::default()
            },
            next_clip_id,
        })
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn snapshot(&self) -> Arc<Context> {
        Arc::new(self.context.clone())
    }

    pub fn to_document(&self) -> ProjectDocument {
        ProjectDocument::from_context(&self.context)
    }

    /// Applies one event. Rejected edits return `Err` and leave the context untouched.
    pub fn handle(&mut self, event: MachineEvent) -> Result<Handled> {
        let name = event.name();
        let quiet = event.is_media_feedback();
        let mode = self.context.playback.mode;

        let handled = match event {
            MachineEvent::RecordStart => self.record_start(),
            MachineEvent::RecordStop => self.record_stop(),
            MachineEvent::Play => self.play(),
            MachineEvent::Pause => self.pause(),
            MachineEvent::Seek { t_tl } => self.seek(t_tl),
            MachineEvent::Split { clip_id, at_tl } => self.split(clip_id, at_tl),
            MachineEvent::Delete { clip_ids } => self.delete(&clip_ids),
            MachineEvent::Select { clip_id, multi } => self.select(clip_id, multi),
            MachineEvent::Reorder { order } => self.reorder(&order),
            MachineEvent::Reset => self.reset(),
            MachineEvent::ActionsProcessed { generation } => self.actions_processed(generation),
            MachineEvent::RecordingStarted { take_id } => self.recording_started(take_id),
            MachineEvent::RecordingCompleted { take } => self.recording_completed(take),
            MachineEvent::RecordingFailed { reason } => self.recording_failed(reason),
            MachineEvent::MediaLoadFailed {
                generation,
                url,
                reason,
            } => self.media_load_failed(generation, url, reason),
            MachineEvent::TimeUpdate { url, source_tl } => self.time_update(url, source_tl),
            MachineEvent::MetadataLoaded { url, duration_tl } => {
                self.metadata_loaded(url, duration_tl)
            }
            MachineEvent::VideoEnded { clip_id } => self.video_ended(clip_id),
        }?;

        if !quiet {
            debug!(
                event = name,
                from = ?mode,
                to = ?self.context.playback.mode,
                ?handled,
                "event handled"
            );
        }
        Ok(handled)
    }

    fn emit(&mut self, actions: Vec<PendingAction>) {
        let playback = &mut self.context.playback;
        let actions = match playback.pending.take() {
            Some(previous) => {
                debug!(generation = previous.generation, "pending batch superseded");
                previous.supersede(actions)
            }
            None => actions,
        };
        playback.generation += 1;
        debug!(generation = playback.generation, ?actions, "pending actions emitted");
        playback.pending = Some(PendingBatch {
            generation: playback.generation,
            actions,
        });
    }

    fn url_of(&self, clip: &Clip) -> Result<String> {
        self.context
            .url_for(clip)
            .map(str::to_owned)
            .ok_or(EngineError::TakeNotFound {
                take_id: clip.take_id,
            })
    }

    fn transition_to(&self, clip: &Clip, t_tl: i64, play: bool) -> Result<PendingAction> {
        Ok(PendingAction::ClipTransition(ClipTransition {
            clip_id: clip.id,
            url: self.url_of(clip)?,
            seek_source: global_to_source(clip, t_tl),
            play,
        }))
    }

    fn record_start(&mut self) -> Result<Handled> {
        let mode = self.context.playback.mode;
        if self.context.recording.is_some() || matches!(mode, Mode::Recording | Mode::Error) {
            return Ok(Handled::Ignored);
        }

        let was_playing = self.context.playback.is_playing();
        let mut actions = Vec::with_capacity(2);
        if was_playing {
            actions.push(PendingAction::Pause);
        }
        actions.push(PendingAction::StartRecording);

        self.context.recording = Some(RecordingContext {
            take_id: None,
            stopping: false,
            resume_mode: if was_playing { Mode::Paused } else { mode },
        });
        self.context.playback.mode = Mode::Recording;
        self.emit(actions);
        info!(auto_paused = was_playing, "recording requested");
        Ok(Handled::Applied)
    }

    fn record_stop(&mut self) -> Result<Handled> {
        if self.context.playback.mode != Mode::Recording {
            return Ok(Handled::Ignored);
        }
        let started = match self.context.recording.as_mut() {
            Some(recording) if !recording.stopping => {
                recording.stopping = true;
                recording.take_id.is_some()
            }
            _ => return Ok(Handled::Ignored),
        };
        if started {
            self.emit(vec![PendingAction::StopRecording]);
            info!("recording stop requested");
        } else {
            info!("recording stop deferred until the recorder starts");
        }
        Ok(Handled::Applied)
    }

    fn recording_started(&mut self, take_id: TakeId) -> Result<Handled> {
        if self.context.playback.mode != Mode::Recording {
            return Ok(Handled::Ignored);
        }
        let stopping = match self.context.recording.as_mut() {
            Some(recording) => {
                recording.take_id = Some(take_id);
                recording.stopping
            }
            None => return Ok(Handled::Ignored),
        };
        if stopping {
            self.emit(vec![PendingAction::StopRecording]);
            info!(take_id, "deferred recording stop issued");
        }
        Ok(Handled::Applied)
    }

    fn recording_completed(&mut self, take: Take) -> Result<Handled> {
        let mut handled = Handled::Ignored;
        if self.context.playback.mode == Mode::Recording {
            self.context.recording = None;
            self.context.playback.mode = Mode::Paused;
            handled = Handled::Applied;
        }

        let take_id = take.id;
        let clip_id = self.next_clip_id;
        let context = &mut self.context;
        match context
            .timeline
            .ingest_take(&mut context.takes, take, clip_id)
        {
            Ok(clip) => {
                self.next_clip_id += 1;
                info!(
                    take_id,
                    clip_id,
                    timeline_start = clip.timeline_start,
                    duration_tl = clip.duration_tl(),
                    "take appended to timeline"
                );
                Ok(Handled::Applied)
            }
            Err(EngineError::DuplicateTake { .. }) => {
                warn!(take_id, "duplicate recording completion ignored");
                Ok(handled)
            }
            Err(err @ EngineError::InvalidTakeDuration { .. }) => {
                warn!(take_id, error = %err, "recorded take dropped");
                Ok(handled)
            }
            Err(err) => Err(err),
        }
    }

    fn recording_failed(&mut self, reason: String) -> Result<Handled> {
        if self.context.playback.mode != Mode::Recording {
            return Ok(Handled::Ignored);
        }
        let Some(recording) = self.context.recording.take() else {
            return Ok(Handled::Ignored);
        };
        warn!(%reason, resume = ?recording.resume_mode, "recording aborted");
        self.context.playback.mode = recording.resume_mode;
        self.context.playback.last_error = Some(reason);
        Ok(Handled::Applied)
    }

    fn play(&mut self) -> Result<Handled> {
        if !matches!(self.context.playback.mode, Mode::Idle | Mode::Paused) {
            return Ok(Handled::Ignored);
        }
        let end = self.context.playable_duration();
        if end == 0 {
            debug!("play ignored: nothing on the primary track");
            return Ok(Handled::Ignored);
        }

        let position = self.context.playback.global_position;
        let position = if position >= end { 0 } else { position.max(0) };
        let Some(clip) = self
            .context
            .timeline
            .clips_from(PRIMARY_TRACK, position)
            .first()
            .map(|clip| (*clip).clone())
        else {
            return Ok(Handled::Ignored);
        };
        let position = position.max(clip.timeline_start);
        let action = self.transition_to(&clip, position, true)?;

        let playback = &mut self.context.playback;
        playback.mode = Mode::Loading;
        playback.current_clip_id = Some(clip.id);
        playback.global_position = position;
        self.emit(vec![action]);
        info!(clip_id = clip.id, position, "playback requested");
        Ok(Handled::Applied)
    }

    fn pause(&mut self) -> Result<Handled> {
        if !self.context.playback.is_playing() {
            return Ok(Handled::Ignored);
        }
        self.context.playback.mode = Mode::Paused;
        self.emit(vec![PendingAction::Pause]);
        Ok(Handled::Applied)
    }

    fn seek(&mut self, t_tl: i64) -> Result<Handled> {
        let mode = self.context.playback.mode;
        if matches!(mode, Mode::Recording | Mode::Error) {
            return Ok(Handled::Ignored);
        }
        let end = self.context.playable_duration();
        if end == 0 {
            return Ok(Handled::Ignored);
        }

        let target = normalize_playhead(t_tl, end);
        let Some(clip) = self.context.timeline.clip_at(PRIMARY_TRACK, target).cloned() else {
            return Ok(Handled::Ignored);
        };
        let url = self.url_of(&clip)?;
        let playing = self.context.playback.is_playing();
        let source_loaded = self.context.playback.pending_clip_transition().is_none()
            && self.context.playback.media.loaded_url.as_deref() == Some(url.as_str());

        let action = if source_loaded {
            PendingAction::Seek {
                clip_id: clip.id,
                url,
                source_tl: global_to_source(&clip, target),
            }
        } else {
            self.transition_to(&clip, target, playing)?
        };

        let playback = &mut self.context.playback;
        playback.mode = match mode {
            Mode::Playing | Mode::Loading => Mode::Loading,
            _ => Mode::Paused,
        };
        playback.current_clip_id = Some(clip.id);
        playback.global_position = target;
        self.emit(vec![action]);
        debug!(
            t_tl,
            target,
            clip_id = clip.id,
            seek_only = source_loaded,
            "seek accepted"
        );
        Ok(Handled::Applied)
    }

    fn select(&mut self, clip_id: ClipId, multi: bool) -> Result<Handled> {
        if !self.context.timeline.contains(clip_id) {
            return Err(EngineError::ClipNotFound { clip_id });
        }
        self.context.selection.select(clip_id, multi);
        Ok(Handled::Applied)
    }

    fn split(&mut self, clip_id: ClipId, at_tl: i64) -> Result<Handled> {
        let right_id = self.next_clip_id;
        self.context.timeline.split_clip(clip_id, at_tl, right_id)?;
        self.next_clip_id += 1;
        self.context.selection.only(clip_id);

        let boundary_source = self
            .context
            .timeline
            .clip(clip_id)
            .map(|left| left.source_out)
            .ok_or(EngineError::ClipNotFound { clip_id })?;
        let playback = &mut self.context.playback;
        if playback.current_clip_id == Some(clip_id) && playback.global_position >= at_tl {
            playback.current_clip_id = Some(right_id);
        }
        if let Some(batch) = playback.pending.as_mut() {
            batch.retarget(clip_id, right_id, boundary_source);
        }

        info!(clip_id, right_id, at_tl, "clip split");
        Ok(Handled::Applied)
    }

    fn delete(&mut self, clip_ids: &[ClipId]) -> Result<Handled> {
        let before = self.context.timeline.clone();
        let removed = self.context.timeline.delete_clips(clip_ids)?;
        let removed: HashSet<ClipId> = removed.iter().map(|clip| clip.id).collect();
        self.context.selection.retain(|id| !removed.contains(id));

        let active = self.context.playback.current_clip_id;
        let pending_target = self
            .context
            .playback
            .pending
            .as_ref()
            .and_then(PendingBatch::target_clip);
        let anchor = active
            .filter(|id| removed.contains(id))
            .or(pending_target.filter(|id| removed.contains(id)));
        if let Some(batch) = self.context.playback.pending.as_mut() {
            batch.forget_clips(&removed);
        }

        match anchor {
            Some(anchor) => self.relocate_after_delete(&before, anchor, &removed)?,
            None => self.follow_active_clip(&before),
        }

        info!(
            removed = removed.len(),
            duration_tl = self.context.timeline.duration_tl(),
            "clips deleted"
        );
        Ok(Handled::Applied)
    }

    /// Moves the playhead off a deleted clip onto its first surviving successor.
    fn relocate_after_delete(
        &mut self,
        before: &Timeline,
        anchor: ClipId,
        removed: &HashSet<ClipId>,
    ) -> Result<()> {
        let mode = self.context.playback.mode;
        let media_allowed = !matches!(mode, Mode::Recording | Mode::Error);
        let playing = self.context.playback.is_playing();

        let successor = before.clip(anchor).and_then(|anchor_clip| {
            before
                .track_clips(anchor_clip.track)
                .filter(|clip| clip.order > anchor_clip.order && !removed.contains(&clip.id))
                .find_map(|clip| self.context.timeline.clip(clip.id))
                .cloned()
        });
        let last = self
            .context
            .timeline
            .track_clips(PRIMARY_TRACK)
            .last()
            .cloned();

        match (successor, last) {
            (Some(next), _) => {
                let action = self.transition_to(&next, next.timeline_start, playing)?;
                let playback = &mut self.context.playback;
                playback.current_clip_id = Some(next.id);
                playback.global_position = next.timeline_start;
                if media_allowed {
                    self.emit(vec![action]);
                }
                debug!(anchor, next = next.id, "playhead moved to successor");
            }
            (None, Some(last)) => {
                let end = clip_end(&last);
                let action = self.transition_to(&last, end, false)?;
                let playback = &mut self.context.playback;
                playback.current_clip_id = Some(last.id);
                playback.global_position = end;
                if playing {
                    playback.mode = Mode::Paused;
                    self.emit(vec![PendingAction::Pause]);
                } else if media_allowed {
                    self.emit(vec![action]);
                }
                debug!(anchor, last = last.id, "playhead parked at timeline end");
            }
            (None, None) => {
                let had_pending = self.context.playback.pending.is_some();
                let playback = &mut self.context.playback;
                playback.current_clip_id = None;
                playback.global_position = 0;
                if media_allowed {
                    playback.mode = Mode::Idle;
                    if playing || had_pending {
                        self.emit(vec![PendingAction::Pause]);
                    }
                }
                debug!(anchor, "timeline emptied");
            }
        }
        Ok(())
    }

    /// Keeps the playhead on the same frame of the active clip after a re-layout.
    fn follow_active_clip(&mut self, before: &Timeline) {
        let timeline = &self.context.timeline;
        let shift = self.context.playback.current_clip_id.and_then(|clip_id| {
            let old = before.clip(clip_id)?.timeline_start;
            let new = timeline.clip(clip_id)?.timeline_start;
            Some(new - old)
        });
        let end = timeline.track_duration(PRIMARY_TRACK);
        let playback = &mut self.context.playback;
        match shift {
            Some(shift) => playback.global_position += shift,
            None => playback.global_position = playback.global_position.clamp(0, end),
        }
    }

    fn reorder(&mut self, order: &[ClipId]) -> Result<Handled> {
        let before = self.context.timeline.clone();
        self.context.timeline.reorder(PRIMARY_TRACK, order)?;
        self.follow_active_clip(&before);
        info!(
            clips = order.len(),
            position = self.context.playback.global_position,
            "timeline reordered"
        );
        Ok(Handled::Applied)
    }

    fn reset(&mut self) -> Result<Handled> {
        if self.context.playback.mode != Mode::Error {
            return Ok(Handled::Ignored);
        }
        let generation = self.context.playback.generation;
        self.context.playback = PlaybackContext {
            generation,
            ..PlaybackContext::default()
        };
        info!("session reset after error");
        Ok(Handled::Applied)
    }

    fn actions_processed(&mut self, generation: u64) -> Result<Handled> {
        let playback = &mut self.context.playback;
        match playback.pending.as_ref() {
            Some(batch) if batch.generation == generation => {}
            Some(batch) => {
                debug!(
                    acknowledged = generation,
                    pending = batch.generation,
                    "stale acknowledgement ignored"
                );
                return Ok(Handled::Ignored);
            }
            None => return Ok(Handled::Ignored),
        }
        let Some(batch) = playback.pending.take() else {
            return Ok(Handled::Ignored);
        };

        for action in batch.actions {
            match action {
                PendingAction::ClipTransition(transition) => {
                    if playback.media.loaded_url.as_deref() != Some(transition.url.as_str()) {
                        playback.media.native_duration = None;
                    }
                    playback.media.loaded_url = Some(transition.url);
                    playback.media.native_time = transition.seek_source;
                }
                PendingAction::Seek { url, source_tl, .. } => {
                    playback.media.loaded_url = Some(url);
                    playback.media.native_time = source_tl;
                }
                PendingAction::Pause
                | PendingAction::StartRecording
                | PendingAction::StopRecording => {}
            }
        }
        if playback.mode == Mode::Loading {
            playback.mode = Mode::Playing;
        }
        Ok(Handled::Applied)
    }

    fn media_load_failed(&mut self, generation: u64, url: String, reason: String) -> Result<Handled> {
        let playback = &mut self.context.playback;
        if generation != playback.generation || playback.mode == Mode::Recording {
            debug!(generation, latest = playback.generation, %url, "stale load failure ignored");
            return Ok(Handled::Ignored);
        }
        warn!(%url, %reason, "media load failed");
        playback.mode = Mode::Error;
        playback.pending = None;
        playback.media = MediaMirror::default();
        playback.last_error = Some(EngineError::MediaLoad { url, reason }.to_string());
        Ok(Handled::Applied)
    }

    fn time_update(&mut self, url: String, source_tl: i64) -> Result<Handled> {
        if self.context.playback.media.loaded_url.as_deref() != Some(url.as_str()) {
            return Ok(Handled::Ignored);
        }
        self.context.playback.media.native_time = source_tl;

        let playback = &self.context.playback;
        if playback.mode == Mode::Playing && playback.pending.is_none() {
            let position = self
                .context
                .active_clip()
                .filter(|clip| self.context.url_for(clip) == Some(url.as_str()))
                .map(|clip| source_to_global(clip, source_tl));
            if let Some(position) = position {
                self.context.playback.global_position = position;
            }
        }
        Ok(Handled::Applied)
    }

    fn metadata_loaded(&mut self, url: String, duration_tl: Option<i64>) -> Result<Handled> {
        let media = &mut self.context.playback.media;
        media.loaded_url = Some(url);
        media.native_duration = duration_tl;
        Ok(Handled::Applied)
    }

    fn video_ended(&mut self, clip_id: ClipId) -> Result<Handled> {
        let playback = &self.context.playback;
        if playback.mode != Mode::Playing || playback.current_clip_id != Some(clip_id) {
            return Ok(Handled::Ignored);
        }
        let Some(ended) = self.context.timeline.clip(clip_id).cloned() else {
            return Ok(Handled::Ignored);
        };

        let Some(next) = self.context.timeline.next_clip(clip_id).cloned() else {
            let end = clip_end(&ended);
            let playback = &mut self.context.playback;
            playback.mode = Mode::Paused;
            playback.global_position = end;
            self.emit(vec![PendingAction::Pause]);
            info!(clip_id, position = end, "playback reached timeline end");
            return Ok(Handled::Applied);
        };

        let next_url = self.url_of(&next)?;
        let contiguous = next.take_id == ended.take_id
            && next.source_in == ended.source_out
            && self.context.playback.media.loaded_url.as_deref() == Some(next_url.as_str());
        let action = self.transition_to(&next, next.timeline_start, true)?;

        let playback = &mut self.context.playback;
        playback.current_clip_id = Some(next.id);
        playback.global_position = next.timeline_start;
        if contiguous {
            debug!(from = clip_id, to = next.id, "contiguous continuation");
        } else {
            self.emit(vec![action]);
            debug!(from = clip_id, to = next.id, "clip transition emitted");
        }
        Ok(Handled::Applied)
    }
}
