use std::collections::{BTreeMap, HashSet};

use crate::error::{EngineError, Result};
use crate::time::{clip_duration, clip_end, is_strictly_inside, relayout};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Opaque identifier for timeline clips.
pub type ClipId = u64;
/// Opaque identifier for recorded takes.
pub type TakeId = u64;

/// Track that playback sequences.
pub const PRIMARY_TRACK: u32 = 0;

/// Immutable raw recording referenced by one or more clips.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Take {
    pub id: TakeId,
    pub url: String,
    pub duration_tl: i64,
}

/// A placement of a take's sub-range on the timeline.
///
/// `timeline_start` is derived by [`relayout`]; `order` ranks clips within a track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clip {
    pub id: ClipId,
    pub take_id: TakeId,
    pub source_in: i64,
    pub source_out: i64,
    pub track: u32,
    pub timeline_start: i64,
    pub order: u32,
}

impl Clip {
    /// Creates a clip on the primary track at timeline position zero.
    pub fn new(id: ClipId, take_id: TakeId, source_in: i64, source_out: i64) -> Self {
        Self {
            id,
            take_id,
            source_in,
            source_out,
            track: PRIMARY_TRACK,
            timeline_start: 0,
            order: 0,
        }
    }

    /// Exclusive end on the global timeline.
    pub fn timeline_end(&self) -> i64 {
        clip_end(self)
    }

    pub fn duration_tl(&self) -> i64 {
        clip_duration(self)
    }
}

/// Clip collection kept sorted by `(track, timeline_start)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeline {
    pub clips: Vec<Clip>,
}

impl Timeline {
    /// Builds a timeline from arbitrary clips and lays it out.
    pub fn from_clips(mut clips: Vec<Clip>) -> Self {
        relayout(&mut clips);
        Self { clips }
    }

    /// Returns the maximum clip end across all tracks.
    pub fn duration_tl(&self) -> i64 {
        self.clips.iter().map(clip_end).max().unwrap_or(0)
    }

    /// End of the last clip on `track`.
    pub fn track_duration(&self, track: u32) -> i64 {
        self.track_clips(track).map(clip_end).max().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }

    pub fn clip(&self, clip_id: ClipId) -> Option<&Clip> {
        self.clips.iter().find(|clip| clip.id == clip_id)
    }

    pub fn contains(&self, clip_id: ClipId) -> bool {
        self.clip(clip_id).is_some()
    }

    /// Iterates one track in timeline order.
    pub fn track_clips(&self, track: u32) -> impl Iterator<Item = &Clip> {
        self.clips.iter().filter(move |clip| clip.track == track)
    }

    /// Finds the clip on `track` covering `t_tl` (start inclusive, end exclusive).
    pub fn clip_at(&self, track: u32, t_tl: i64) -> Option<&Clip> {
        self.track_clips(track)
            .find(|clip| clip.timeline_start <= t_tl && t_tl < clip_end(clip))
    }

    /// Ordered clips on `track` that are still ahead of or under `t_tl`.
    pub fn clips_from(&self, track: u32, t_tl: i64) -> Vec<&Clip> {
        self.track_clips(track)
            .filter(|clip| clip_end(clip) > t_tl)
            .collect()
    }

    /// Returns the clip that plays after `clip_id` on the same track.
    pub fn next_clip(&self, clip_id: ClipId) -> Option<&Clip> {
        let current = self.clip(clip_id)?;
        self.track_clips(current.track)
            .find(|clip| clip.order == current.order + 1)
    }

    /// Appends a clip covering the whole take at the end of the primary track.
    ///
    /// Ingestion is idempotent per take id: a take already present in `takes` is
    /// rejected with [`EngineError::DuplicateTake`] and nothing changes.
    pub fn ingest_take(
        &mut self,
        takes: &mut BTreeMap<TakeId, Take>,
        take: Take,
        clip_id: ClipId,
    ) -> Result<Clip> {
        if takes.contains_key(&take.id) {
            warn!(take_id = take.id, "ingestion skipped: duplicate take");
            return Err(EngineError::DuplicateTake { take_id: take.id });
        }
        if take.duration_tl <= 0 {
            return Err(EngineError::InvalidTakeDuration {
                take_id: take.id,
                duration_tl: take.duration_tl,
            });
        }

        let order = self
            .track_clips(PRIMARY_TRACK)
            .map(|clip| clip.order + 1)
            .max()
            .unwrap_or(0);
        let clip = Clip {
            order,
            ..Clip::new(clip_id, take.id, 0, take.duration_tl)
        };

        debug!(
            take_id = take.id,
            clip_id,
            duration_tl = take.duration_tl,
            order,
            "take ingested"
        );

        takes.insert(take.id, take);
        self.clips.push(clip);
        relayout(&mut self.clips);
        self.clip(clip_id)
            .cloned()
            .ok_or(EngineError::ClipNotFound { clip_id })
    }

    /// Splits `clip_id` at global time `at_tl` into two clips sharing the take.
    ///
    /// The left half keeps the original id and start; the right half receives
    /// `right_id` and starts at the split point. `at_tl` must lie strictly inside
    /// the clip.
    pub fn split_clip(&mut self, clip_id: ClipId, at_tl: i64, right_id: ClipId) -> Result<()> {
        let index = self
            .clips
            .iter()
            .position(|clip| clip.id == clip_id)
            .ok_or(EngineError::ClipNotFound { clip_id })?;
        let current = self.clips[index].clone();
        if !is_strictly_inside(&current, at_tl) {
            warn!(clip_id, at_tl, "split rejected: outside clip interior");
            return Err(EngineError::SplitOutsideClip { clip_id, at_tl });
        }

        let split_source = current.source_in + (at_tl - current.timeline_start);
        let left = Clip {
            source_out: split_source,
            ..current.clone()
        };
        let right = Clip {
            id: right_id,
            source_in: split_source,
            timeline_start: at_tl,
            ..current
        };

        debug!(
            clip_id,
            right_id,
            at_tl,
            split_source,
            left_duration = clip_duration(&left),
            right_duration = clip_duration(&right),
            "split accepted"
        );

        self.clips[index] = left;
        self.clips.insert(index + 1, right);
        relayout(&mut self.clips);
        Ok(())
    }

    /// Removes every clip in `clip_ids` and closes the gaps they leave.
    ///
    /// Fails without touching the timeline when the list is empty or names a
    /// clip that does not exist.
    pub fn delete_clips(&mut self, clip_ids: &[ClipId]) -> Result<Vec<Clip>> {
        if clip_ids.is_empty() {
            return Err(EngineError::EmptyDelete);
        }
        if let Some(missing) = clip_ids.iter().find(|id| !self.contains(**id)) {
            warn!(clip_id = *missing, "delete rejected: unknown clip");
            return Err(EngineError::ClipNotFound { clip_id: *missing });
        }

        let targets: HashSet<ClipId> = clip_ids.iter().copied().collect();
        let (removed, kept): (Vec<Clip>, Vec<Clip>) = self
            .clips
            .drain(..)
            .partition(|clip| targets.contains(&clip.id));
        self.clips = kept;
        relayout(&mut self.clips);

        debug!(
            removed = removed.len(),
            remaining = self.clips.len(),
            duration_tl = self.duration_tl(),
            "delete accepted"
        );
        Ok(removed)
    }

    /// Reorders `track` to follow `order`, which must list each of its clips once.
    pub fn reorder(&mut self, track: u32, order: &[ClipId]) -> Result<()> {
        let current: HashSet<ClipId> = self.track_clips(track).map(|clip| clip.id).collect();
        let requested: HashSet<ClipId> = order.iter().copied().collect();
        if requested.len() != order.len() {
            return Err(EngineError::InvalidReorder {
                reason: String::from("order lists a clip more than once"),
            });
        }
        if requested != current {
            if let Some(unknown) = order.iter().find(|id| !current.contains(*id)) {
                return Err(EngineError::ClipNotFound { clip_id: *unknown });
            }
            return Err(EngineError::InvalidReorder {
                reason: format!(
                    "order names {} of {} clips on track {track}",
                    requested.len(),
                    current.len()
                ),
            });
        }

        for clip in self.clips.iter_mut().filter(|clip| clip.track == track) {
            if let Some(rank) = order.iter().position(|id| *id == clip.id) {
                clip.order = rank as u32;
            }
        }
        relayout(&mut self.clips);
        debug!(track, clips = order.len(), "reorder accepted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{Clip, PRIMARY_TRACK, Take, Timeline};
    use crate::error::EngineError;

    fn take(id: u64, seconds: i64) -> Take {
        Take {
            id,
            url: format!("blob:take-{id}"),
            duration_tl: seconds * 1_000_000,
        }
    }

    fn three_clip_timeline() -> (Timeline, BTreeMap<u64, Take>) {
        let mut timeline = Timeline::default();
        let mut takes = BTreeMap::new();
        for (index, seconds) in [5, 3, 4].into_iter().enumerate() {
            let id = index as u64 + 1;
            timeline
                .ingest_take(&mut takes, take(id, seconds), id)
                .expect("ingest should succeed");
        }
        (timeline, takes)
    }

    #[test]
    fn ingest_appends_at_timeline_end() {
        let (timeline, takes) = three_clip_timeline();

        assert_eq!(takes.len(), 3);
        let starts: Vec<i64> = timeline.clips.iter().map(|c| c.timeline_start).collect();
        assert_eq!(starts, vec![0, 5_000_000, 8_000_000]);
        assert_eq!(timeline.duration_tl(), 12_000_000);
    }

    #[test]
    fn ingest_rejects_duplicate_take_without_mutation() {
        let (mut timeline, mut takes) = three_clip_timeline();
        let before = timeline.clone();

        let result = timeline.ingest_take(&mut takes, take(2, 9), 10);

        assert!(matches!(result, Err(EngineError::DuplicateTake { take_id: 2 })));
        assert_eq!(timeline, before);
        assert_eq!(takes.len(), 3);
    }

    #[test]
    fn split_keeps_left_id_and_start() {
        let (mut timeline, _) = three_clip_timeline();

        timeline
            .split_clip(2, 6_000_000, 9)
            .expect("split should succeed");

        let left = timeline.clip(2).expect("left exists");
        let right = timeline.clip(9).expect("right exists");
        assert_eq!(left.timeline_start, 5_000_000);
        assert_eq!(left.source_out, 1_000_000);
        assert_eq!(right.timeline_start, 6_000_000);
        assert_eq!(right.source_in, 1_000_000);
        assert_eq!(right.source_out, 3_000_000);
        assert_eq!(right.take_id, left.take_id);
        assert_eq!(timeline.next_clip(2).map(|c| c.id), Some(9));
        assert_eq!(timeline.next_clip(9).map(|c| c.id), Some(3));
        assert_eq!(timeline.duration_tl(), 12_000_000);
    }

    #[test]
    fn split_at_clip_boundary_is_rejected() {
        let (mut timeline, _) = three_clip_timeline();
        let before = timeline.clone();

        let start = timeline.split_clip(2, 5_000_000, 9);
        let end = timeline.split_clip(2, 8_000_000, 9);

        assert!(matches!(start, Err(EngineError::SplitOutsideClip { .. })));
        assert!(matches!(end, Err(EngineError::SplitOutsideClip { .. })));
        assert_eq!(timeline, before);
    }

    #[test]
    fn split_then_delete_right_half_matches_trimmed_layout() {
        let (mut timeline, _) = three_clip_timeline();
        let ids_before: Vec<u64> = timeline.clips.iter().map(|c| c.id).collect();

        timeline.split_clip(1, 2_000_000, 9).expect("split");
        timeline.delete_clips(&[9]).expect("delete");

        let ids_after: Vec<u64> = timeline.clips.iter().map(|c| c.id).collect();
        assert_eq!(ids_before, ids_after);
        let trimmed = timeline.clip(1).expect("left half survives");
        assert_eq!((trimmed.source_in, trimmed.source_out), (0, 2_000_000));
        assert_eq!(timeline.clip(2).map(|c| c.timeline_start), Some(2_000_000));
        assert_eq!(timeline.duration_tl(), 12_000_000 - 3_000_000);
    }

    #[test]
    fn delete_shifts_following_clips_left() {
        let (mut timeline, _) = three_clip_timeline();

        let removed = timeline.delete_clips(&[2]).expect("delete");

        assert_eq!(removed.len(), 1);
        assert_eq!(timeline.clip(3).map(|c| c.timeline_start), Some(5_000_000));
        assert_eq!(timeline.duration_tl(), 9_000_000);
    }

    #[test]
    fn delete_with_unknown_id_leaves_timeline_untouched() {
        let (mut timeline, _) = three_clip_timeline();
        let before = timeline.clone();

        let result = timeline.delete_clips(&[1, 42]);

        assert!(matches!(result, Err(EngineError::ClipNotFound { clip_id: 42 })));
        assert_eq!(timeline, before);
        assert!(matches!(
            timeline.delete_clips(&[]),
            Err(EngineError::EmptyDelete)
        ));
    }

    #[test]
    fn reorder_requires_full_permutation() {
        let (mut timeline, _) = three_clip_timeline();

        assert!(matches!(
            timeline.reorder(PRIMARY_TRACK, &[3, 1]),
            Err(EngineError::InvalidReorder { .. })
        ));
        assert!(matches!(
            timeline.reorder(PRIMARY_TRACK, &[3, 1, 1]),
            Err(EngineError::InvalidReorder { .. })
        ));
        assert!(matches!(
            timeline.reorder(PRIMARY_TRACK, &[3, 1, 7]),
            Err(EngineError::ClipNotFound { clip_id: 7 })
        ));

        timeline
            .reorder(PRIMARY_TRACK, &[3, 1, 2])
            .expect("reorder should succeed");
        let layout: Vec<(u64, i64)> = timeline
            .clips
            .iter()
            .map(|c| (c.id, c.timeline_start))
            .collect();
        assert_eq!(layout, vec![(3, 0), (1, 4_000_000), (2, 9_000_000)]);
    }

    #[test]
    fn clips_from_returns_clip_under_playhead_first() {
        let (timeline, _) = three_clip_timeline();

        let ids: Vec<u64> = timeline
            .clips_from(PRIMARY_TRACK, 6_000_000)
            .iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(timeline.clip_at(PRIMARY_TRACK, 8_000_000).map(|c| c.id), Some(3));
        assert!(timeline.clip_at(PRIMARY_TRACK, 12_000_000).is_none());
    }

    #[test]
    fn from_clips_lays_out_unsorted_input() {
        let mut late = Clip::new(2, 1, 0, 2_000);
        late.order = 1;
        let timeline = Timeline::from_clips(vec![late, Clip::new(1, 1, 0, 1_000)]);

        assert_eq!(timeline.clips[0].id, 1);
        assert_eq!(timeline.clips[1].timeline_start, 1_000);
    }
}
