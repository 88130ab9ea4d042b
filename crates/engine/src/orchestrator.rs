use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::machine::{Context, MachineEvent, Mode};
use crate::pending::{ClipTransition, PendingAction, PendingBatch};
use crate::services::{MediaEvent, PlaybackService, RecordingService};
use crate::timeline::ClipId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Continue,
    /// Stop the batch without acknowledging it.
    Abandon,
}

/// Only caller of the media services.
///
/// Watches machine snapshots, runs each new batch once and serially, and reports
/// completions back as machine events. A batch whose generation is overtaken
/// while it runs is abandoned without acknowledgement.
pub struct Orchestrator<P, R> {
    player: P,
    recorder: R,
    config: EngineConfig,
    snapshots: watch::Receiver<Arc<Context>>,
    events: mpsc::Sender<MachineEvent>,
    media: mpsc::UnboundedReceiver<MediaEvent>,
    media_open: bool,
    loaded_url: Option<String>,
    last_executed: u64,
    ended_sent: Option<(ClipId, u64)>,
}

impl<P, R> Orchestrator<P, R>
where
    P: PlaybackService,
    R: RecordingService,
{
    pub fn new(
        player: P,
        media: mpsc::UnboundedReceiver<MediaEvent>,
        recorder: R,
        config: EngineConfig,
        snapshots: watch::Receiver<Arc<Context>>,
        events: mpsc::Sender<MachineEvent>,
    ) -> Self {
        Self {
            player,
            recorder,
            config,
            snapshots,
            events,
            media,
            media_open: true,
            loaded_url: None,
            last_executed: 0,
            ended_sent: None,
        }
    }

    /// Runs until the session stops publishing snapshots.
    pub async fn run(mut self) {
        info!("orchestrator started");
        loop {
            let snapshot = Arc::clone(&self.snapshots.borrow_and_update());
            if let Some(batch) = snapshot.playback.pending.clone() {
                if batch.generation > self.last_executed {
                    self.last_executed = batch.generation;
                    self.execute(batch).await;
                    continue;
                }
            }

            tokio::select! {
                changed = self.snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                media = self.media.recv(), if self.media_open => match media {
                    Some(event) => self.on_media_event(event).await,
                    None => self.media_open = false,
                },
            }
        }
        info!("orchestrator stopped");
    }

    fn latest(&self) -> Arc<Context> {
        Arc::clone(&self.snapshots.borrow())
    }

    fn superseded(&self, generation: u64) -> bool {
        self.snapshots.borrow().playback.generation > generation
    }

    async fn send(&mut self, event: MachineEvent) {
        if self.events.send(event).await.is_err() {
            debug!("session closed; machine event dropped");
        }
    }

    async fn execute(&mut self, batch: PendingBatch) {
        let generation = batch.generation;
        debug!(generation, actions = ?batch.actions, "executing pending batch");

        for action in batch.actions {
            if self.superseded(generation) {
                debug!(generation, "batch superseded before completion");
                return;
            }

            let url = match &action {
                PendingAction::ClipTransition(transition) => Some(transition.url.clone()),
                PendingAction::Seek { url, .. } => Some(url.clone()),
                _ => None,
            };
            let step = match action {
                PendingAction::ClipTransition(transition) => {
                    self.clip_transition(generation, transition).await
                }
                PendingAction::Seek { url, source_tl, .. } => {
                    self.seek_loaded(generation, &url, source_tl).await
                }
                PendingAction::Pause => self.pause().await,
                PendingAction::StartRecording => Ok(self.start_recording().await),
                PendingAction::StopRecording => Ok(self.stop_recording().await),
            };

            match step {
                Ok(Step::Continue) => {}
                Ok(Step::Abandon) => return,
                Err(err) => {
                    let url = url.or_else(|| self.loaded_url.clone()).unwrap_or_default();
                    warn!(generation, %url, error = %err, "playback step failed");
                    self.loaded_url = None;
                    self.send(MachineEvent::MediaLoadFailed {
                        generation,
                        url,
                        reason: err.to_string(),
                    })
                    .await;
                    return;
                }
            }
        }

        if self.superseded(generation) {
            debug!(generation, "batch superseded before acknowledgement");
            return;
        }
        self.send(MachineEvent::ActionsProcessed { generation }).await;
    }

    async fn clip_transition(
        &mut self,
        generation: u64,
        transition: ClipTransition,
    ) -> Result<Step> {
        if !transition.play {
            self.player.pause().await?;
        }
        if self.loaded_url.as_deref() != Some(transition.url.as_str()) {
            if self.load_with_retry(generation, &transition.url).await? == Step::Abandon {
                return Ok(Step::Abandon);
            }
            if self.superseded(generation) {
                return Ok(Step::Abandon);
            }
        }

        self.player.seek(transition.seek_source).await?;
        self.discard_stale_media().await;
        if self.superseded(generation) {
            return Ok(Step::Abandon);
        }

        if transition.play && self.latest().playback.is_playing() {
            self.player.play().await?;
        }
        debug!(
            generation,
            clip_id = transition.clip_id,
            url = %transition.url,
            seek_source = transition.seek_source,
            play = transition.play,
            "clip transition executed"
        );
        Ok(Step::Continue)
    }

    async fn seek_loaded(&mut self, generation: u64, url: &str, source_tl: i64) -> Result<Step> {
        if self.loaded_url.as_deref() != Some(url)
            && self.load_with_retry(generation, url).await? == Step::Abandon
        {
            return Ok(Step::Abandon);
        }
        self.player.seek(source_tl).await?;
        self.discard_stale_media().await;
        Ok(Step::Continue)
    }

    async fn pause(&mut self) -> Result<Step> {
        if let Err(err) = self.player.pause().await {
            warn!(error = %err, "pause failed");
        }
        Ok(Step::Continue)
    }

    /// Loads `url`, retrying with a fixed backoff. Exhausted retries are reported
    /// to the machine and abandon the batch.
    async fn load_with_retry(&mut self, generation: u64, url: &str) -> Result<Step> {
        let mut attempt = 0;
        loop {
            match self.player.load(url).await {
                Ok(()) => {
                    self.loaded_url = Some(url.to_owned());
                    return Ok(Step::Continue);
                }
                Err(err) if attempt < self.config.load_retry_limit => {
                    attempt += 1;
                    warn!(%url, attempt, error = %err, "source load failed; retrying");
                    tokio::time::sleep(self.config.load_retry_backoff()).await;
                    if self.superseded(generation) {
                        return Ok(Step::Abandon);
                    }
                }
                Err(err) => {
                    self.loaded_url = None;
                    warn!(%url, attempts = attempt + 1, error = %err, "source load failed");
                    self.send(MachineEvent::MediaLoadFailed {
                        generation,
                        url: url.to_owned(),
                        reason: err.to_string(),
                    })
                    .await;
                    return Ok(Step::Abandon);
                }
            }
        }
    }

    async fn start_recording(&mut self) -> Step {
        match self.recorder.start().await {
            Ok(take_id) => self.send(MachineEvent::RecordingStarted { take_id }).await,
            Err(err) => self.report_recording_failure(err).await,
        }
        Step::Continue
    }

    async fn stop_recording(&mut self) -> Step {
        match self.recorder.stop().await {
            Ok(finished) => {
                info!(
                    take_id = finished.take_id,
                    duration_tl = finished.duration_tl,
                    "recording finished"
                );
                self.send(MachineEvent::RecordingCompleted {
                    take: finished.into_take(),
                })
                .await;
            }
            Err(err) => self.report_recording_failure(err).await,
        }
        Step::Continue
    }

    async fn report_recording_failure(&mut self, err: EngineError) {
        warn!(error = %err, "recording service failed");
        self.send(MachineEvent::RecordingFailed {
            reason: err.to_string(),
        })
        .await;
    }

    /// Drops position reports that were queued before the last seek resolved.
    async fn discard_stale_media(&mut self) {
        let mut kept = Vec::new();
        while let Ok(event) = self.media.try_recv() {
            match event {
                MediaEvent::TimeUpdate { .. } | MediaEvent::Ended { .. } => {}
                other => kept.push(other),
            }
        }
        for event in kept {
            self.on_media_event(event).await;
        }
    }

    async fn on_media_event(&mut self, event: MediaEvent) {
        match event {
            MediaEvent::TimeUpdate { url, source_tl } => {
                self.send(MachineEvent::TimeUpdate {
                    url: url.clone(),
                    source_tl,
                })
                .await;
                self.check_boundary(&url, source_tl, false).await;
            }
            MediaEvent::Ended { url } => self.check_boundary(&url, i64::MAX, true).await,
            MediaEvent::MetadataLoaded { url, duration_tl } => {
                self.send(MachineEvent::MetadataLoaded { url, duration_tl })
                    .await;
            }
            MediaEvent::Error { url, reason } => {
                if self.loaded_url.as_deref() != Some(url.as_str()) {
                    debug!(%url, "error from replaced source ignored");
                    return;
                }
                self.loaded_url = None;
                let generation = self.latest().playback.generation;
                warn!(%url, %reason, "media element reported an error");
                self.send(MachineEvent::MediaLoadFailed {
                    generation,
                    url,
                    reason,
                })
                .await;
            }
        }
    }

    /// Raises VIDEO.ENDED once per clip and generation when the active clip's
    /// out-point is reached.
    async fn check_boundary(&mut self, url: &str, source_tl: i64, ended: bool) {
        let snapshot = self.latest();
        let playback = &snapshot.playback;
        if playback.mode != Mode::Playing || playback.pending.is_some() {
            return;
        }
        let Some(clip) = snapshot.active_clip() else {
            return;
        };
        if snapshot.url_for(clip) != Some(url) {
            return;
        }
        let reached = ended || source_tl >= clip.source_out - self.config.boundary_epsilon_tl();
        if !reached {
            return;
        }

        let key = (clip.id, playback.generation);
        if self.ended_sent == Some(key) {
            return;
        }
        self.ended_sent = Some(key);
        debug!(
            clip_id = clip.id,
            source_tl,
            source_out = clip.source_out,
            ended,
            "clip boundary reached"
        );
        self.send(MachineEvent::VideoEnded { clip_id: clip.id }).await;
    }
}
