use crate::timeline::Clip;

/// Ticks per second. Global, clip-local and source positions are all `i64`
/// microsecond counts.
pub const TICKS_PER_SECOND: i64 = 1_000_000;

/// Ticks per millisecond.
pub const TICKS_PER_MILLI: i64 = 1_000;

/// Converts native media seconds into ticks.
///
/// Returns `None` for non-finite or negative input. Media elements report an
/// infinite duration for freshly recorded blobs until metadata settles.
///
/// # Example
/// ```
/// use engine::time::seconds_to_ticks;
///
/// assert_eq!(seconds_to_ticks(1.5), Some(1_500_000));
/// assert_eq!(seconds_to_ticks(f64::INFINITY), None);
/// ```
pub fn seconds_to_ticks(seconds: f64) -> Option<i64> {
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    let ticks = (seconds * TICKS_PER_SECOND as f64).round();
    if ticks > i64::MAX as f64 {
        return None;
    }
    Some(ticks as i64)
}

/// Converts ticks into native media seconds.
pub fn ticks_to_seconds(ticks: i64) -> f64 {
    ticks as f64 / TICKS_PER_SECOND as f64
}

/// Converts milliseconds into ticks.
pub fn millis_to_ticks(millis: u64) -> i64 {
    i64::try_from(millis)
        .unwrap_or(i64::MAX / TICKS_PER_MILLI)
        .saturating_mul(TICKS_PER_MILLI)
}

/// Duration a clip occupies on the timeline.
pub fn clip_duration(clip: &Clip) -> i64 {
    clip.source_out - clip.source_in
}

/// Exclusive end of a clip on the global timeline.
pub fn clip_end(clip: &Clip) -> i64 {
    clip.timeline_start + clip_duration(clip)
}

/// Maps a global timestamp into the clip's local time, clamped to the clip span.
pub fn global_to_clip_local(clip: &Clip, t_tl: i64) -> i64 {
    (t_tl - clip.timeline_start).clamp(0, clip_duration(clip))
}

/// Maps clip-local time to source media time.
pub fn clip_local_to_source(clip: &Clip, local_tl: i64) -> i64 {
    clip.source_in + local_tl
}

/// Maps source media time to clip-local time.
///
/// Inverse of [`clip_local_to_source`]:
///
/// ```
/// use engine::time::{clip_local_to_source, source_to_clip_local};
/// use engine::timeline::Clip;
///
/// let clip = Clip::new(1, 7, 2_000_000, 5_000_000);
/// let source = clip_local_to_source(&clip, 1_250_000);
/// assert_eq!(source_to_clip_local(&clip, source), 1_250_000);
/// ```
pub fn source_to_clip_local(clip: &Clip, source_tl: i64) -> i64 {
    source_tl - clip.source_in
}

/// Maps a global timestamp to the source time that must be shown for it.
pub fn global_to_source(clip: &Clip, t_tl: i64) -> i64 {
    clip_local_to_source(clip, global_to_clip_local(clip, t_tl))
}

/// Maps source media time back onto the global timeline, clamped to the clip span.
pub fn source_to_global(clip: &Clip, source_tl: i64) -> i64 {
    let local = source_to_clip_local(clip, source_tl).clamp(0, clip_duration(clip));
    clip.timeline_start + local
}

/// Returns true when `t_tl` lies in the open interval `(start, end)` of the clip.
pub fn is_strictly_inside(clip: &Clip, t_tl: i64) -> bool {
    clip.timeline_start < t_tl && t_tl < clip_end(clip)
}

/// Clamps a playhead into `[0, duration - 1]`.
pub fn normalize_playhead(t_tl: i64, duration_tl: i64) -> i64 {
    if duration_tl <= 0 {
        return 0;
    }

    let max_tick = duration_tl - 1;
    t_tl.clamp(0, max_tick)
}

/// Reassigns `timeline_start` and `order` on every track from clip durations.
///
/// Clips are ordered by `(track, order)`; ties keep their current relative
/// position. Afterwards each track starts at zero and clip `i + 1` starts exactly
/// where clip `i` ends.
pub fn relayout(clips: &mut [Clip]) {
    clips.sort_by_key(|clip| (clip.track, clip.order));

    let mut current_track = None;
    let mut cursor = 0;
    let mut order = 0;
    for clip in clips.iter_mut() {
        if current_track != Some(clip.track) {
            current_track = Some(clip.track);
            cursor = 0;
            order = 0;
        }
        clip.timeline_start = cursor;
        clip.order = order;
        cursor += clip_duration(clip);
        order += 1;
    }
}
