use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result, bail};
use clap::{Parser, Subcommand};
use engine::time::{seconds_to_ticks, ticks_to_seconds};
use engine::{
    Command, Context, EngineConfig, FfmpegRecorderSettings, FfmpegRecordingService, Machine,
    MachineEvent, MediaLibrary, Mode, ProjectDocument, QueryView, SessionHandle, SimulatedPlayer,
    SimulatedRecorder, Take, spawn_session,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Headless driver for recording and timeline playback sessions.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON engine config; defaults apply to missing fields
    #[arg(short = 'c', long = "config", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Subcommands,
}

#[derive(Subcommand, Debug)]
enum Subcommands {
    /// Print the clips of a saved project
    Inspect {
        #[arg(value_name = "PROJECT")]
        project: PathBuf,
    },
    /// Play a saved project through the simulated player
    Play {
        #[arg(value_name = "PROJECT")]
        project: PathBuf,
        /// Start position in seconds
        #[arg(long = "from", value_name = "SECONDS", default_value_t = 0.0)]
        from: f64,
        /// Simulated playback speed multiplier
        #[arg(long = "rate", default_value_t = 1.0)]
        rate: f64,
    },
    /// Build a timeline from simulated takes and play it
    Demo {
        /// Take length in seconds (repeat for several takes)
        #[arg(long = "clip", value_name = "SECONDS", required = true)]
        clips: Vec<f64>,
        /// Split every take in half before playing
        #[arg(long = "split")]
        split: bool,
        #[arg(long = "rate", default_value_t = 1.0)]
        rate: f64,
        /// Write the resulting project here
        #[arg(long = "save", value_name = "FILE")]
        save: Option<PathBuf>,
    },
    /// Capture one take with ffmpeg and append it to a project
    Record {
        #[arg(value_name = "PROJECT")]
        project: PathBuf,
        /// ffmpeg input format, e.g. v4l2, avfoundation, lavfi
        #[arg(long = "format")]
        format: String,
        /// ffmpeg input device or filter graph
        #[arg(long = "input")]
        input: String,
        #[arg(long = "seconds", default_value_t = 5)]
        seconds: u64,
        #[arg(long = "output-dir", value_name = "DIR")]
        output_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };

    match args.command {
        Subcommands::Inspect { project } => inspect(&project),
        Subcommands::Play {
            project,
            from,
            rate,
        } => play_project(&project, from, rate, config).await,
        Subcommands::Demo {
            clips,
            split,
            rate,
            save,
        } => demo(&clips, split, rate, save.as_deref(), config).await,
        Subcommands::Record {
            project,
            format,
            input,
            seconds,
            output_dir,
        } => record(&project, format, input, seconds, output_dir, config).await,
    }
}

fn inspect(path: &Path) -> Result<()> {
    let document = ProjectDocument::load(path)?;
    let machine = Machine::restore(document)?;
    print_timeline(&QueryView::new(machine.snapshot()));
    Ok(())
}

fn print_timeline(view: &QueryView) {
    println!(
        "{} clip(s), {:.3}s",
        view.clips().len(),
        ticks_to_seconds(view.timeline_duration())
    );
    for clip in view.clips() {
        println!(
            "  clip {:>3}  take {:>3}  track {}  start {:>8.3}s  length {:>8.3}s  source {:.3}..{:.3}",
            clip.id,
            clip.take_id,
            clip.track,
            ticks_to_seconds(clip.timeline_start),
            ticks_to_seconds(clip.duration_tl),
            ticks_to_seconds(clip.source_in),
            ticks_to_seconds(clip.source_out),
        );
    }
}

fn simulated_session(
    machine: Machine,
    library: MediaLibrary,
    rate: f64,
    config: EngineConfig,
) -> SessionHandle {
    let (player, media) = SimulatedPlayer::new(library.clone(), config.simulated_tick(), rate);
    let first_take_id = next_take_id(machine.context());
    let recorder = SimulatedRecorder::new(library, first_take_id);
    spawn_session(machine, player, media, recorder, config)
}

fn next_take_id(context: &Context) -> u64 {
    context.takes.keys().max().map_or(1, |id| id + 1)
}

async fn play_project(path: &Path, from: f64, rate: f64, config: EngineConfig) -> Result<()> {
    let document = ProjectDocument::load(path)?;
    let library = MediaLibrary::default();
    for take in &document.takes {
        library.insert(take.url.clone(), take.duration_tl);
    }
    let machine = Machine::restore(document)?;
    let session = simulated_session(machine, library, rate, config);

    let from_tl = seconds_to_ticks(from).context("--from must be a finite, non-negative time")?;
    if from_tl > 0 {
        session.dispatch(Command::Seek { t_tl: from_tl }).await?;
    }
    play_to_end(&session, rate).await?;
    session.shutdown().await?;
    Ok(())
}

async fn demo(
    clips: &[f64],
    split: bool,
    rate: f64,
    save: Option<&Path>,
    config: EngineConfig,
) -> Result<()> {
    let library = MediaLibrary::default();
    let mut machine = Machine::new();
    for (index, seconds) in clips.iter().enumerate() {
        let duration_tl = seconds_to_ticks(*seconds)
            .filter(|ticks| *ticks > 0)
            .with_context(|| format!("--clip {seconds} is not a positive length"))?;
        let id = index as u64 + 1;
        let url = format!("sim://demo-{id}");
        library.insert(url.clone(), duration_tl);
        machine.handle(MachineEvent::RecordingCompleted {
            take: Take {
                id,
                url,
                duration_tl,
            },
        })?;
    }
    if split {
        // Splitting never moves other clips, so midpoints computed up front stay valid.
        let midpoints: Vec<(u64, i64)> = machine
            .context()
            .timeline
            .clips
            .iter()
            .filter(|clip| clip.duration_tl() > 1)
            .map(|clip| (clip.id, clip.timeline_start + clip.duration_tl() / 2))
            .collect();
        for (clip_id, at_tl) in midpoints {
            machine.handle(Command::Split { clip_id, at_tl }.into())?;
        }
    }

    let session = simulated_session(machine, library, rate, config);
    print_timeline(&session.query());
    play_to_end(&session, rate).await?;
    let machine = session.shutdown().await?;
    if let Some(path) = save {
        machine.to_document().save(path)?;
        info!(path = %path.display(), "demo project saved");
    }
    Ok(())
}

async fn record(
    path: &Path,
    format: String,
    input: String,
    seconds: u64,
    output_dir: PathBuf,
    config: EngineConfig,
) -> Result<()> {
    let machine = if path.exists() {
        Machine::restore(ProjectDocument::load(path)?)?
    } else {
        Machine::new()
    };
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("creating {}", output_dir.display()))?;

    let first_take_id = next_take_id(machine.context());
    let clips_before = machine.context().timeline.clips.len();
    let recorder = FfmpegRecordingService::new(
        FfmpegRecorderSettings {
            input_format: format,
            input,
            output_dir,
            extension: String::from("mkv"),
        },
        first_take_id,
    );
    let (player, media) =
        SimulatedPlayer::new(MediaLibrary::default(), config.simulated_tick(), 1.0);
    let session = spawn_session(machine, player, media, recorder, config);
    let mut errors = session.errors();

    session.dispatch(Command::RecordStart).await?;
    let started = session
        .wait_for(Duration::from_secs(10), |context| {
            context.mode() != Mode::Recording
                || context
                    .recording
                    .as_ref()
                    .is_some_and(|recording| recording.take_id.is_some())
        })
        .await
        .context("recorder did not start")?;
    if started.mode() != Mode::Recording {
        bail!(
            "recording failed: {}",
            started.playback.last_error.as_deref().unwrap_or("unknown error")
        );
    }
    info!(seconds, "recording");
    tokio::time::sleep(Duration::from_secs(seconds)).await;

    session.dispatch(Command::RecordStop).await?;
    let finished = session
        .wait_for(Duration::from_secs(30), |context| {
            context.mode() != Mode::Recording && context.playback.pending.is_none()
        })
        .await
        .context("recorder did not stop")?;
    if let Ok(error) = errors.try_recv() {
        bail!("{}", error.message);
    }
    if finished.timeline.clips.len() == clips_before {
        bail!(
            "no take was added: {}",
            finished.playback.last_error.as_deref().unwrap_or("unknown error")
        );
    }

    let machine = session.shutdown().await?;
    machine.to_document().save(path)?;
    print_timeline(&QueryView::new(machine.snapshot()));
    Ok(())
}

/// Plays from the current position and prints the playhead until playback pauses.
async fn play_to_end(session: &SessionHandle, rate: f64) -> Result<()> {
    let duration = session.query().timeline_duration();
    if duration == 0 {
        bail!("the timeline is empty");
    }
    let budget = Duration::from_secs_f64(ticks_to_seconds(duration) / rate.max(0.01)) * 2
        + Duration::from_secs(5);

    session.dispatch(Command::Play).await?;
    let mut snapshots = session.subscribe();
    let mut last_second = -1;
    let finished = tokio::time::timeout(budget, async {
        loop {
            if snapshots.changed().await.is_err() {
                return None;
            }
            let snapshot: Arc<Context> = Arc::clone(&snapshots.borrow_and_update());
            let second = snapshot.playback.global_position / 1_000_000;
            if second != last_second {
                last_second = second;
                println!(
                    "{:>8.3}s  clip {:?}  {:?}",
                    ticks_to_seconds(snapshot.playback.global_position),
                    snapshot.playback.current_clip_id,
                    snapshot.mode()
                );
            }
            match snapshot.mode() {
                Mode::Paused | Mode::Idle if snapshot.playback.pending.is_none() => {
                    return Some(snapshot);
                }
                Mode::Error => return Some(snapshot),
                _ => {}
            }
        }
    })
    .await
    .context("playback did not finish in time")?
    .context("session closed during playback")?;

    if finished.mode() == Mode::Error {
        bail!(
            "playback failed: {}",
            finished.playback.last_error.as_deref().unwrap_or("unknown error")
        );
    }
    println!(
        "finished at {:.3}s of {:.3}s",
        ticks_to_seconds(finished.playback.global_position),
        ticks_to_seconds(duration)
    );
    Ok(())
}
