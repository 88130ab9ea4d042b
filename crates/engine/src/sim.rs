use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::{EngineError, Result};
use crate::services::{FinishedRecording, MediaEvent, PlaybackService, RecordingService};
use crate::timeline::TakeId;

/// Shared url to duration table of media the simulated player can open.
#[derive(Debug, Clone, Default)]
pub struct MediaLibrary {
    sources: Arc<Mutex<HashMap<String, i64>>>,
}

impl MediaLibrary {
    pub fn insert(&self, url: impl Into<String>, duration_tl: i64) {
        self.sources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.into(), duration_tl);
    }

    pub fn duration(&self, url: &str) -> Option<i64> {
        self.sources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .copied()
    }
}

#[derive(Debug, Default)]
struct ElementState {
    url: Option<String>,
    time: i64,
    duration: i64,
    playing: bool,
}

/// Media element that advances source time on a fixed tick.
pub struct SimulatedPlayer {
    library: MediaLibrary,
    events: mpsc::UnboundedSender<MediaEvent>,
    state: Arc<Mutex<ElementState>>,
    ticker: Option<JoinHandle<()>>,
    tick: Duration,
    rate: f64,
}

impl SimulatedPlayer {
    /// Creates a player and the receiver for its native events.
    pub fn new(
        library: MediaLibrary,
        tick: Duration,
        rate: f64,
    ) -> (Self, mpsc::UnboundedReceiver<MediaEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let player = Self {
            library,
            events,
            state: Arc::default(),
            ticker: None,
            tick,
            rate: if rate.is_finite() && rate > 0.0 { rate } else { 1.0 },
        };
        (player, receiver)
    }

    fn stop_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }

    fn loaded_url(&self) -> Option<String> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .url
            .clone()
    }

    fn spawn_ticker(&self) -> JoinHandle<()> {
        let state = Arc::clone(&self.state);
        let events = self.events.clone();
        let tick = self.tick;
        let step = (tick.as_micros() as f64 * self.rate).round() as i64;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + tick, tick);
            loop {
                interval.tick().await;
                let (emitted, finished) = {
                    let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
                    let Some(url) = state.url.clone() else {
                        return;
                    };
                    if !state.playing {
                        return;
                    }
                    state.time = (state.time + step).min(state.duration);
                    let finished = state.time >= state.duration;
                    if finished {
                        state.playing = false;
                    }
                    (
                        MediaEvent::TimeUpdate {
                            url: url.clone(),
                            source_tl: state.time,
                        },
                        finished.then_some(MediaEvent::Ended { url }),
                    )
                };
                trace!(?emitted, "simulated timeupdate");
                if events.send(emitted).is_err() {
                    return;
                }
                if let Some(ended) = finished {
                    let _ = events.send(ended);
                    return;
                }
            }
        })
    }
}

impl Drop for SimulatedPlayer {
    fn drop(&mut self) {
        self.stop_ticker();
    }
}

#[async_trait]
impl PlaybackService for SimulatedPlayer {
    async fn load(&mut self, url: &str) -> Result<()> {
        self.stop_ticker();
        let duration = self.library.duration(url).ok_or_else(|| EngineError::MediaLoad {
            url: url.to_owned(),
            reason: String::from("source not found"),
        })?;

        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = ElementState {
            url: Some(url.to_owned()),
            time: 0,
            duration,
            playing: false,
        };
        debug!(url, duration_tl = duration, "simulated source loaded");
        let _ = self.events.send(MediaEvent::MetadataLoaded {
            url: url.to_owned(),
            duration_tl: Some(duration),
        });
        Ok(())
    }

    async fn seek(&mut self, source_tl: i64) -> Result<()> {
        let event = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(url) = state.url.clone() else {
                return Err(EngineError::Playback {
                    operation: "seek",
                    reason: String::from("no source loaded"),
                });
            };
            state.time = source_tl.clamp(0, state.duration);
            MediaEvent::TimeUpdate {
                url,
                source_tl: state.time,
            }
        };
        let _ = self.events.send(event);
        Ok(())
    }

    async fn play(&mut self) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.url.is_none() {
                return Err(EngineError::Playback {
                    operation: "play",
                    reason: String::from("no source loaded"),
                });
            }
            if state.time >= state.duration {
                state.time = 0;
            }
            state.playing = true;
        }
        let running = self
            .ticker
            .as_ref()
            .is_some_and(|ticker| !ticker.is_finished());
        if !running {
            self.ticker = Some(self.spawn_ticker());
        }
        debug!(url = ?self.loaded_url(), "simulated playback started");
        Ok(())
    }

    async fn pause(&mut self) -> Result<()> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .playing = false;
        self.stop_ticker();
        Ok(())
    }
}

/// Recorder that measures takes on the tokio clock and registers them in a library.
pub struct SimulatedRecorder {
    library: MediaLibrary,
    next_take_id: TakeId,
    started: Option<(TakeId, Instant)>,
}

impl SimulatedRecorder {
    pub fn new(library: MediaLibrary, first_take_id: TakeId) -> Self {
        Self {
            library,
            next_take_id: first_take_id,
            started: None,
        }
    }
}

#[async_trait]
impl RecordingService for SimulatedRecorder {
    async fn start(&mut self) -> Result<TakeId> {
        if self.started.is_some() {
            return Err(EngineError::Recording {
                reason: String::from("a recording is already running"),
            });
        }
        let take_id = self.next_take_id;
        self.next_take_id += 1;
        self.started = Some((take_id, Instant::now()));
        Ok(take_id)
    }

    async fn stop(&mut self) -> Result<FinishedRecording> {
        let (take_id, started) = self.started.take().ok_or_else(|| EngineError::Recording {
            reason: String::from("no recording is running"),
        })?;
        let duration_tl = i64::try_from(started.elapsed().as_micros()).unwrap_or(i64::MAX);
        let url = format!("sim://take-{take_id}");
        self.library.insert(url.clone(), duration_tl);
        Ok(FinishedRecording {
            take_id,
            url,
            duration_tl,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{MediaLibrary, SimulatedPlayer, SimulatedRecorder};
    use crate::error::EngineError;
    use crate::services::{MediaEvent, PlaybackService, RecordingService};

    #[tokio::test(start_paused = true)]
    async fn player_emits_time_updates_then_ended() {
        let library = MediaLibrary::default();
        library.insert("sim://a", 200_000);
        let (mut player, mut events) =
            SimulatedPlayer::new(library, Duration::from_millis(50), 1.0);

        player.load("sim://a").await.expect("load");
        player.seek(100_000).await.expect("seek");
        player.play().await.expect("play");

        let mut received = Vec::new();
        while let Some(event) = events.recv().await {
            let ended = matches!(event, MediaEvent::Ended { .. });
            received.push(event);
            if ended {
                break;
            }
        }

        assert!(matches!(
            received.first(),
            Some(MediaEvent::MetadataLoaded {
                duration_tl: Some(200_000),
                ..
            })
        ));
        assert!(received.contains(&MediaEvent::TimeUpdate {
            url: String::from("sim://a"),
            source_tl: 150_000,
        }));
        assert_eq!(
            received.last(),
            Some(&MediaEvent::Ended {
                url: String::from("sim://a")
            })
        );
    }

    #[tokio::test]
    async fn player_rejects_unknown_source() {
        let (mut player, _events) =
            SimulatedPlayer::new(MediaLibrary::default(), Duration::from_millis(50), 1.0);

        assert!(matches!(
            player.load("sim://missing").await,
            Err(EngineError::MediaLoad { .. })
        ));
        assert!(matches!(
            player.play().await,
            Err(EngineError::Playback { operation: "play", .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn recorder_measures_duration_on_tokio_clock() {
        let library = MediaLibrary::default();
        let mut recorder = SimulatedRecorder::new(library.clone(), 5);

        let take_id = recorder.start().await.expect("start");
        tokio::time::sleep(Duration::from_secs(3)).await;
        let finished = recorder.stop().await.expect("stop");

        assert_eq!(take_id, 5);
        assert_eq!(finished.duration_tl, 3_000_000);
        assert_eq!(library.duration(&finished.url), Some(3_000_000));
        assert!(recorder.stop().await.is_err());
    }
}
