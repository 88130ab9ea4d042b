use std::path::Path;
use std::process::Command;

use crate::error::{MediaFfmpegError, Result};

/// Reads the container-level duration of a media file via `ffprobe`.
///
/// Returns `Ok(None)` when the container does not declare a duration. Streamed
/// captures often report `N/A` until they are remuxed, so callers must not treat
/// the value as authoritative.
///
/// # Example
/// ```no_run
/// use media_ffmpeg::probe_duration_seconds;
///
/// let duration = probe_duration_seconds("take-1.mkv").expect("probe should succeed");
/// println!("{duration:?}");
/// ```
pub fn probe_duration_seconds(path: impl AsRef<Path>) -> Result<Option<f64>> {
    let path = path.as_ref();
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=nokey=1:noprint_wrappers=1",
        ])
        .arg(path)
        .output()
        .map_err(|source| MediaFfmpegError::Process {
            tool: "ffprobe",
            action: "run",
            source,
        })?;

    if !output.status.success() {
        return Err(MediaFfmpegError::ToolFailed {
            tool: "ffprobe",
            path: path.to_path_buf(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    parse_duration(&String::from_utf8_lossy(&output.stdout))
}

fn parse_duration(stdout: &str) -> Result<Option<f64>> {
    let value = stdout.trim();
    if value.is_empty() || value == "N/A" {
        return Ok(None);
    }
    let duration = value
        .parse::<f64>()
        .map_err(|_| MediaFfmpegError::UnreadableDuration {
            value: value.to_string(),
        })?;
    if !duration.is_finite() || duration < 0.0 {
        return Ok(None);
    }
    Ok(Some(duration))
}

#[cfg(test)]
mod tests {
    use super::parse_duration;
    use crate::MediaFfmpegError;

    #[test]
    fn parse_duration_treats_missing_values_as_unknown() {
        assert_eq!(parse_duration("N/A\n").expect("n/a"), None);
        assert_eq!(parse_duration("").expect("empty"), None);
        assert_eq!(parse_duration("inf").expect("inf"), None);
        assert_eq!(parse_duration("1.250000\n").expect("value"), Some(1.25));
    }

    #[test]
    fn parse_duration_rejects_garbage() {
        let err = parse_duration("twelve").expect_err("garbage duration");

        assert!(matches!(err, MediaFfmpegError::UnreadableDuration { .. }));
        assert_eq!(
            err.to_string(),
            "ffprobe reported an unreadable duration: twelve"
        );
    }
}
