//! Orchestration core for a multi-clip recording and editing session.
//!
//! A [`Machine`] owns all editing and playback state; an [`Orchestrator`] turns
//! the machine's pending actions into calls on the media services.

pub mod api;
pub mod bridge;
pub mod config;
pub mod error;
pub mod machine;
pub mod orchestrator;
pub mod pending;
pub mod project;
pub mod services;
pub mod sim;
pub mod time;
pub mod timeline;

pub use api::{ClipView, Command, QueryView};
pub use bridge::{SessionHandle, spawn_session};
pub use config::EngineConfig;
pub use error::{EngineError, EngineErrorEvent, EngineErrorKind, Result};
pub use machine::{Context, Handled, Machine, MachineEvent, Mode, PlaybackContext};
pub use orchestrator::Orchestrator;
pub use pending::{ClipTransition, PendingAction, PendingBatch};
pub use project::{ClipRecord, ProjectDocument};
pub use services::{
    FfmpegRecorderSettings, FfmpegRecordingService, FinishedRecording, MediaEvent,
    PlaybackService, RecordingService,
};
pub use sim::{MediaLibrary, SimulatedPlayer, SimulatedRecorder};
pub use timeline::{Clip, ClipId, Take, TakeId, Timeline};
