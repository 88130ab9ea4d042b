use std::collections::HashSet;

use crate::timeline::ClipId;

/// Load `url` when it differs from the loaded source, seek, then play if requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipTransition {
    pub clip_id: ClipId,
    pub url: String,
    pub seek_source: i64,
    pub play: bool,
}

/// One side effect computed by the machine and executed by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingAction {
    ClipTransition(ClipTransition),
    /// Seek inside the source that is already loaded.
    Seek {
        clip_id: ClipId,
        url: String,
        source_tl: i64,
    },
    Pause,
    StartRecording,
    StopRecording,
}

impl PendingAction {
    fn moves_playhead(&self) -> bool {
        matches!(self, Self::ClipTransition(_) | Self::Seek { .. })
    }

    fn starts_playback(&self) -> bool {
        matches!(self, Self::ClipTransition(transition) if transition.play)
    }
}

/// Actions emitted by one transition, tagged with the generation that produced them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingBatch {
    pub generation: u64,
    pub actions: Vec<PendingAction>,
}

impl PendingBatch {
    pub fn clip_transition(&self) -> Option<&ClipTransition> {
        self.actions.iter().find_map(|action| match action {
            PendingAction::ClipTransition(transition) => Some(transition),
            _ => None,
        })
    }

    /// Source time of a pending seek-only action.
    pub fn seek(&self) -> Option<i64> {
        self.actions.iter().find_map(|action| match action {
            PendingAction::Seek { source_tl, .. } => Some(*source_tl),
            _ => None,
        })
    }

    /// Clip the batch will put under the playhead, if any.
    pub fn target_clip(&self) -> Option<ClipId> {
        self.actions.iter().find_map(|action| match action {
            PendingAction::ClipTransition(transition) => Some(transition.clip_id),
            PendingAction::Seek { clip_id, .. } => Some(*clip_id),
            _ => None,
        })
    }

    pub fn contains(&self, wanted: &PendingAction) -> bool {
        self.actions.iter().any(|action| action == wanted)
    }

    /// Merges what this batch still owes the media element into `actions`,
    /// the batch replacing it.
    ///
    /// A `Pause` survives unless `actions` start playback. A playhead move
    /// survives, without playing, unless `actions` move the playhead too.
    /// Surviving actions run first.
    pub(crate) fn supersede(self, actions: Vec<PendingAction>) -> Vec<PendingAction> {
        let plays = actions.iter().any(PendingAction::starts_playback);
        let moves = actions.iter().any(PendingAction::moves_playhead);
        let pauses = actions.contains(&PendingAction::Pause);

        let mut merged = Vec::with_capacity(self.actions.len() + actions.len());
        for action in self.actions {
            match action {
                PendingAction::Pause if !plays && !pauses => merged.push(PendingAction::Pause),
                PendingAction::ClipTransition(mut transition) if !moves => {
                    transition.play = false;
                    merged.push(PendingAction::ClipTransition(transition));
                }
                PendingAction::Seek { .. } if !moves => merged.push(action),
                _ => {}
            }
        }
        merged.extend(actions);
        merged
    }

    /// Drops playhead moves onto clips that no longer exist.
    pub(crate) fn forget_clips(&mut self, removed: &HashSet<ClipId>) {
        self.actions.retain(|action| match action {
            PendingAction::ClipTransition(transition) => !removed.contains(&transition.clip_id),
            PendingAction::Seek { clip_id, .. } => !removed.contains(clip_id),
            _ => true,
        });
    }

    /// Points actions that seek at or past `boundary_source` inside `from` at `to`.
    ///
    /// Used after a split: the source position is unchanged, only the clip
    /// identity that owns it moves to the right half.
    pub(crate) fn retarget(&mut self, from: ClipId, to: ClipId, boundary_source: i64) {
        for action in &mut self.actions {
            match action {
                PendingAction::ClipTransition(transition)
                    if transition.clip_id == from && transition.seek_source >= boundary_source =>
                {
                    transition.clip_id = to;
                }
                PendingAction::Seek {
                    clip_id, source_tl, ..
                } if *clip_id == from && *source_tl >= boundary_source => {
                    *clip_id = to;
                }
                _ => {}
            }
        }
    }
}
