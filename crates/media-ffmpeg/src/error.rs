use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::process::ExitStatus;

pub type Result<T> = std::result::Result<T, MediaFfmpegError>;

/// Failures of the `ffmpeg` capture and `ffprobe` probe processes.
#[derive(Debug)]
pub enum MediaFfmpegError {
    InvalidCaptureRequest {
        reason: &'static str,
    },
    /// The tool process could not be spawned, signalled or reaped.
    Process {
        tool: &'static str,
        action: &'static str,
        source: std::io::Error,
    },
    ToolFailed {
        tool: &'static str,
        path: PathBuf,
        status: ExitStatus,
        stderr: String,
    },
    UnreadableDuration {
        value: String,
    },
}

impl Display for MediaFfmpegError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidCaptureRequest { reason } => {
                write!(f, "invalid capture request: {reason}")
            }
            Self::Process {
                tool,
                action,
                source,
            } => write!(f, "failed to {action} {tool}: {source}"),
            Self::ToolFailed {
                tool,
                path,
                status,
                stderr,
            } => write!(
                f,
                "{tool} exited with {status} for {}: {}",
                path.display(),
                stderr.trim()
            ),
            Self::UnreadableDuration { value } => {
                write!(f, "ffprobe reported an unreadable duration: {value}")
            }
        }
    }
}

impl std::error::Error for MediaFfmpegError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Process { source, .. } => Some(source),
            _ => None,
        }
    }
}
