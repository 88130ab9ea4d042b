use std::io::Write;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use crate::error::{MediaFfmpegError, Result};

/// Request payload for a live capture into a single media file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    /// FFmpeg input device or filter format, e.g. `v4l2`, `avfoundation`, `lavfi`.
    pub input_format: String,
    pub input: String,
    pub output_path: PathBuf,
}

/// Finished capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedMedia {
    pub path: PathBuf,
    /// Wall-clock time between start and stop.
    pub elapsed: Duration,
}

/// A running `ffmpeg` capture process.
///
/// Stopping sends `q` on stdin so ffmpeg finalizes the container instead of
/// being killed mid-write.
#[derive(Debug)]
pub struct CaptureSession {
    child: Child,
    started: Instant,
    output_path: PathBuf,
}

impl CaptureSession {
    /// Spawns ffmpeg for `request`.
    ///
    /// # Example
    /// ```no_run
    /// use media_ffmpeg::{CaptureRequest, CaptureSession};
    ///
    /// let session = CaptureSession::start(&CaptureRequest {
    ///     input_format: "lavfi".into(),
    ///     input: "testsrc=size=160x90:rate=30".into(),
    ///     output_path: "take-1.mkv".into(),
    /// })
    /// .expect("capture should start");
    /// let captured = session.stop().expect("capture should finalize");
    /// assert!(captured.path.exists());
    /// ```
    pub fn start(request: &CaptureRequest) -> Result<Self> {
        validate_request(request)?;

        let child = Command::new("ffmpeg")
            .args(["-hide_banner", "-nostats", "-v", "error", "-y", "-f"])
            .arg(&request.input_format)
            .arg("-i")
            .arg(&request.input)
            .arg(&request.output_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| MediaFfmpegError::Process {
                tool: "ffmpeg",
                action: "spawn",
                source,
            })?;

        Ok(Self {
            child,
            started: Instant::now(),
            output_path: request.output_path.clone(),
        })
    }

    pub fn output_path(&self) -> &PathBuf {
        &self.output_path
    }

    /// Asks ffmpeg to finish writing and waits for it to exit.
    pub fn stop(mut self) -> Result<CapturedMedia> {
        let elapsed = self.started.elapsed();
        if let Some(mut stdin) = self.child.stdin.take() {
            // ffmpeg may already be gone; its exit status reports why.
            if let Err(source) = stdin.write_all(b"q") {
                if source.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(MediaFfmpegError::Process {
                        tool: "ffmpeg",
                        action: "signal",
                        source,
                    });
                }
            }
        }

        let output = self
            .child
            .wait_with_output()
            .map_err(|source| MediaFfmpegError::Process {
                tool: "ffmpeg",
                action: "wait for",
                source,
            })?;
        if !output.status.success() {
            return Err(MediaFfmpegError::ToolFailed {
                tool: "ffmpeg",
                path: self.output_path,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        Ok(CapturedMedia {
            path: self.output_path,
            elapsed,
        })
    }

    /// Kills ffmpeg without finalizing the output.
    pub fn abort(mut self) -> Result<()> {
        self.child.kill().map_err(|source| MediaFfmpegError::Process {
            tool: "ffmpeg",
            action: "kill",
            source,
        })?;
        self.child.wait().map_err(|source| MediaFfmpegError::Process {
            tool: "ffmpeg",
            action: "reap",
            source,
        })?;
        Ok(())
    }
}

fn validate_request(request: &CaptureRequest) -> Result<()> {
    if request.input_format.trim().is_empty() {
        return Err(MediaFfmpegError::InvalidCaptureRequest {
            reason: "capture input format is empty",
        });
    }
    if request.input.trim().is_empty() {
        return Err(MediaFfmpegError::InvalidCaptureRequest {
            reason: "capture input is empty",
        });
    }
    if request.output_path.as_os_str().is_empty() {
        return Err(MediaFfmpegError::InvalidCaptureRequest {
            reason: "capture output path is empty",
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::{CaptureRequest, validate_request};
    use crate::MediaFfmpegError;

    fn request() -> CaptureRequest {
        CaptureRequest {
            input_format: String::from("lavfi"),
            input: String::from("testsrc"),
            output_path: PathBuf::from("take.mkv"),
        }
    }

    #[test]
    fn validate_request_rejects_missing_input() {
        let mut blank_input = request();
        blank_input.input = String::from("  ");
        let mut blank_output = request();
        blank_output.output_path = PathBuf::new();

        assert!(validate_request(&request()).is_ok());
        assert!(matches!(
            validate_request(&blank_input),
            Err(MediaFfmpegError::InvalidCaptureRequest {
                reason: "capture input is empty"
            })
        ));
        assert!(matches!(
            validate_request(&blank_output),
            Err(MediaFfmpegError::InvalidCaptureRequest { .. })
        ));
    }
}
