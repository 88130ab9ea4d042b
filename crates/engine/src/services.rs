use std::path::PathBuf;

use async_trait::async_trait;
use media_ffmpeg::{CaptureRequest, CaptureSession, probe_duration_seconds};
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::time::{TICKS_PER_SECOND, seconds_to_ticks, ticks_to_seconds};
use crate::timeline::{Take, TakeId};

/// Native notifications from the media element, in source time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    TimeUpdate { url: String, source_tl: i64 },
    Ended { url: String },
    /// `duration_tl` is `None` while the element reports an indefinite duration.
    MetadataLoaded { url: String, duration_tl: Option<i64> },
    Error { url: String, reason: String },
}

/// Single media element. Calls are serialized by the orchestrator.
#[async_trait]
pub trait PlaybackService: Send {
    /// Replaces the current source; resolves once metadata is available.
    async fn load(&mut self, url: &str) -> Result<()>;
    async fn seek(&mut self, source_tl: i64) -> Result<()>;
    async fn play(&mut self) -> Result<()>;
    async fn pause(&mut self) -> Result<()>;
}

/// A stopped recording ready for ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedRecording {
    pub take_id: TakeId,
    pub url: String,
    /// Measured by the recorder's own clock.
    pub duration_tl: i64,
}

impl FinishedRecording {
    pub fn into_take(self) -> Take {
        Take {
            id: self.take_id,
            url: self.url,
            duration_tl: self.duration_tl,
        }
    }
}

#[async_trait]
pub trait RecordingService: Send {
    async fn start(&mut self) -> Result<TakeId>;
    async fn stop(&mut self) -> Result<FinishedRecording>;
}

/// Where the ffmpeg recorder captures from and writes takes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FfmpegRecorderSettings {
    pub input_format: String,
    pub input: String,
    pub output_dir: PathBuf,
    /// Container extension of written takes.
    pub extension: String,
}

/// Records takes by running an `ffmpeg` capture process per take.
pub struct FfmpegRecordingService {
    settings: FfmpegRecorderSettings,
    next_take_id: TakeId,
    active: Option<(TakeId, CaptureSession)>,
}

impl FfmpegRecordingService {
    pub fn new(settings: FfmpegRecorderSettings, first_take_id: TakeId) -> Self {
        Self {
            settings,
            next_take_id: first_take_id,
            active: None,
        }
    }

    /// Kills a running capture without finalizing its file. Returns whether one was running.
    pub fn abort(&mut self) -> Result<bool> {
        let Some((take_id, session)) = self.active.take() else {
            return Ok(false);
        };
        session.abort()?;
        warn!(take_id, path = %self.take_path(take_id).display(), "capture aborted");
        Ok(true)
    }

    fn take_path(&self, take_id: TakeId) -> PathBuf {
        self.settings
            .output_dir
            .join(format!("take-{take_id}.{}", self.settings.extension))
    }
}

impl Drop for FfmpegRecordingService {
    fn drop(&mut self) {
        if let Err(err) = self.abort() {
            warn!(error = %err, "failed to abort capture on shutdown");
        }
    }
}

#[async_trait]
impl RecordingService for FfmpegRecordingService {
    async fn start(&mut self) -> Result<TakeId> {
        if self.active.is_some() {
            return Err(EngineError::Recording {
                reason: String::from("a capture is already running"),
            });
        }

        let take_id = self.next_take_id;
        let request = CaptureRequest {
            input_format: self.settings.input_format.clone(),
            input: self.settings.input.clone(),
            output_path: self.take_path(take_id),
        };
        let session = tokio::task::spawn_blocking(move || CaptureSession::start(&request))
            .await
            .map_err(|err| EngineError::Recording {
                reason: err.to_string(),
            })??;

        info!(take_id, path = %session.output_path().display(), "capture started");
        self.next_take_id += 1;
        self.active = Some((take_id, session));
        Ok(take_id)
    }

    async fn stop(&mut self) -> Result<FinishedRecording> {
        let (take_id, session) = self.active.take().ok_or_else(|| EngineError::Recording {
            reason: String::from("no capture is running"),
        })?;

        let captured = tokio::task::spawn_blocking(move || session.stop())
            .await
            .map_err(|err| EngineError::Recording {
                reason: err.to_string(),
            })??;
        let duration_tl = i64::try_from(captured.elapsed.as_micros()).unwrap_or(i64::MAX);

        let probe_path = captured.path.clone();
        match tokio::task::spawn_blocking(move || probe_duration_seconds(&probe_path)).await {
            Ok(Ok(Some(seconds))) => debug!(
                take_id,
                container_seconds = seconds,
                clock_seconds = ticks_to_seconds(duration_tl),
                drift_tl = seconds_to_ticks(seconds).map(|probed| probed - duration_tl),
                "container duration probed"
            ),
            Ok(Ok(None)) => debug!(take_id, "container does not declare a duration"),
            Ok(Err(err)) => warn!(take_id, error = %err, "container probe failed"),
            Err(err) => warn!(take_id, error = %err, "container probe task failed"),
        }

        info!(
            take_id,
            seconds = duration_tl / TICKS_PER_SECOND,
            path = %captured.path.display(),
            "capture finished"
        );
        Ok(FinishedRecording {
            take_id,
            url: format!("file://{}", captured.path.display()),
            duration_tl,
        })
    }
}
