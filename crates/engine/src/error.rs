use std::fmt::{Display, Formatter};
use std::path::PathBuf;

use crate::timeline::{ClipId, TakeId};

/// Result type used by the engine crate.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors produced by machine transitions, timeline edits and services.
#[derive(Debug)]
pub enum EngineError {
    ClipNotFound {
        clip_id: ClipId,
    },
    TakeNotFound {
        take_id: TakeId,
    },
    SplitOutsideClip {
        clip_id: ClipId,
        at_tl: i64,
    },
    InvalidClipRange {
        clip_id: ClipId,
        source_in: i64,
        source_out: i64,
    },
    InvalidTakeDuration {
        take_id: TakeId,
        duration_tl: i64,
    },
    EmptyDelete,
    InvalidReorder {
        reason: String,
    },
    DuplicateTake {
        take_id: TakeId,
    },
    MediaLoad {
        url: String,
        reason: String,
    },
    Playback {
        operation: &'static str,
        reason: String,
    },
    Recording {
        reason: String,
    },
    ProjectIo {
        context: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    ProjectSerialization {
        path: PathBuf,
        source: serde_json::Error,
    },
    InvalidProjectFile {
        reason: String,
    },
    ConfigIo {
        path: PathBuf,
        source: std::io::Error,
    },
    ConfigParse {
        path: PathBuf,
        source: serde_json::Error,
    },
    SessionClosed,
    Media(media_ffmpeg::MediaFfmpegError),
}

impl Display for EngineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ClipNotFound { clip_id } => write!(f, "clip not found: {clip_id}"),
            Self::TakeNotFound { take_id } => write!(f, "take not found: {take_id}"),
            Self::SplitOutsideClip { clip_id, at_tl } => {
                write!(f, "split point {at_tl} is not strictly inside clip {clip_id}")
            }
            Self::InvalidClipRange {
                clip_id,
                source_in,
                source_out,
            } => write!(
                f,
                "invalid source range in clip {clip_id}: {source_in}..{source_out}"
            ),
            Self::InvalidTakeDuration {
                take_id,
                duration_tl,
            } => write!(f, "take {take_id} has unusable duration {duration_tl}"),
            Self::EmptyDelete => write!(f, "delete requires at least one clip id"),
            Self::InvalidReorder { reason } => write!(f, "invalid reorder: {reason}"),
            Self::DuplicateTake { take_id } => {
                write!(f, "take {take_id} was already ingested")
            }
            Self::MediaLoad { url, reason } => write!(f, "failed to load {url}: {reason}"),
            Self::Playback { operation, reason } => {
                write!(f, "playback {operation} failed: {reason}")
            }
            Self::Recording { reason } => write!(f, "recording failed: {reason}"),
            Self::ProjectIo {
                context,
                path,
                source,
            } => write!(f, "{context}: {} ({source})", path.display()),
            Self::ProjectSerialization { path, source } => {
                write!(
                    f,
                    "project serialization/deserialization failed at {} ({source})",
                    path.display()
                )
            }
            Self::InvalidProjectFile { reason } => write!(f, "invalid project file: {reason}"),
            Self::ConfigIo { path, source } => {
                write!(f, "failed to read config {} ({source})", path.display())
            }
            Self::ConfigParse { path, source } => {
                write!(f, "failed to parse config {} ({source})", path.display())
            }
            Self::SessionClosed => write!(f, "editing session is closed"),
            Self::Media(err) => write!(f, "media backend error: {err}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ProjectIo { source, .. } => Some(source),
            Self::ProjectSerialization { source, .. } => Some(source),
            Self::ConfigIo { source, .. } => Some(source),
            Self::ConfigParse { source, .. } => Some(source),
            Self::Media(err) => Some(err),
            _ => None,
        }
    }
}

impl From<media_ffmpeg::MediaFfmpegError> for EngineError {
    fn from(value: media_ffmpeg::MediaFfmpegError) -> Self {
        Self::Media(value)
    }
}

/// Error taxonomy surfaced to command issuers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorKind {
    /// Structural edit rejected at the boundary; state is untouched.
    InvalidEdit,
    /// A take id was ingested twice; the second ingestion was skipped.
    DuplicateIngestion,
    MediaLoad,
    Recording,
    Other,
}

impl From<&EngineError> for EngineErrorKind {
    fn from(value: &EngineError) -> Self {
        match value {
            EngineError::ClipNotFound { .. }
            | EngineError::SplitOutsideClip { .. }
            | EngineError::InvalidClipRange { .. }
            | EngineError::EmptyDelete
            | EngineError::InvalidReorder { .. } => Self::InvalidEdit,
            EngineError::DuplicateTake { .. } => Self::DuplicateIngestion,
            EngineError::MediaLoad { .. } | EngineError::Playback { .. } => Self::MediaLoad,
            EngineError::Recording { .. } | EngineError::InvalidTakeDuration { .. } => {
                Self::Recording
            }
            _ => Self::Other,
        }
    }
}

/// User-facing error payload published by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineErrorEvent {
    pub kind: EngineErrorKind,
    pub message: String,
}

impl EngineErrorEvent {
    pub fn from_error(error: &EngineError) -> Self {
        Self {
            kind: EngineErrorKind::from(error),
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{EngineError, EngineErrorEvent, EngineErrorKind};

    #[test]
    fn edit_errors_map_to_invalid_edit_kind() {
        let error = EngineError::SplitOutsideClip {
            clip_id: 3,
            at_tl: 0,
        };
        assert_eq!(EngineErrorKind::from(&error), EngineErrorKind::InvalidEdit);
        assert_eq!(
            EngineErrorKind::from(&EngineError::ClipNotFound { clip_id: 9 }),
            EngineErrorKind::InvalidEdit
        );
    }

    #[test]
    fn error_event_carries_display_message() {
        let event = EngineErrorEvent::from_error(&EngineError::DuplicateTake { take_id: 4 });
        assert_eq!(event.kind, EngineErrorKind::DuplicateIngestion);
        assert_eq!(event.message, "take 4 was already ingested");
    }
}
