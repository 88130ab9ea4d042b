use std::sync::Arc;
use std::time::Duration;

use engine::{
    Command, Context, EngineConfig, EngineErrorKind, Machine, MediaLibrary, Mode,
    ProjectDocument, SessionHandle, SimulatedPlayer, SimulatedRecorder, spawn_session,
};

const SECOND: i64 = 1_000_000;
const WAIT: Duration = Duration::from_secs(120);

fn start(machine: Machine, library: MediaLibrary) -> SessionHandle {
    let config = EngineConfig::default();
    let (player, media) = SimulatedPlayer::new(library.clone(), config.simulated_tick(), 1.0);
    let recorder = SimulatedRecorder::new(library, 1);
    spawn_session(machine, player, media, recorder, config)
}

fn settled(context: &Arc<Context>) -> bool {
    context.playback.pending.is_none()
}

async fn record(session: &SessionHandle, seconds: u64) {
    let clips_before = session.snapshot().timeline.clips.len();
    session
        .dispatch(Command::RecordStart)
        .await
        .expect("dispatch record start");
    session
        .wait_for(WAIT, |context| {
            context
                .recording
                .as_ref()
                .is_some_and(|recording| recording.take_id.is_some())
        })
        .await
        .expect("recorder should start");

    tokio::time::sleep(Duration::from_secs(seconds)).await;

    session
        .dispatch(Command::RecordStop)
        .await
        .expect("dispatch record stop");
    session
        .wait_for(WAIT, |context| {
            context.timeline.clips.len() == clips_before + 1
                && context.mode() == Mode::Paused
                && settled(context)
        })
        .await
        .expect("take should be appended");
}

#[tokio::test(start_paused = true)]
async fn recorded_takes_play_back_as_one_timeline() {
    let session = start(Machine::new(), MediaLibrary::default());
    for seconds in [5, 3, 4] {
        record(&session, seconds).await;
    }
    assert_eq!(session.query().timeline_duration(), 12 * SECOND);

    session.dispatch(Command::Play).await.expect("dispatch play");
    let finished = session
        .wait_for(WAIT, |context| {
            context.mode() == Mode::Paused
                && context.playback.global_position == 12 * SECOND
                && settled(context)
        })
        .await
        .expect("playback should reach the end");

    assert_eq!(finished.playback.current_clip_id, Some(3));
    let machine = session.shutdown().await.expect("shutdown");
    assert_eq!(machine.to_document().clips.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn split_during_playback_continues_into_right_half() {
    let session = start(Machine::new(), MediaLibrary::default());
    record(&session, 6).await;

    session.dispatch(Command::Play).await.expect("dispatch play");
    session
        .wait_for(WAIT, |context| {
            context.mode() == Mode::Playing && context.playback.global_position >= SECOND
        })
        .await
        .expect("playback should start");
    session
        .dispatch(Command::Split {
            clip_id: 1,
            at_tl: 3 * SECOND,
        })
        .await
        .expect("dispatch split");

    let finished = session
        .wait_for(WAIT, |context| {
            context.mode() == Mode::Paused && settled(context)
        })
        .await
        .expect("playback should finish");

    assert_eq!(finished.timeline.clips.len(), 2);
    assert_eq!(finished.playback.current_clip_id, Some(2));
    assert_eq!(finished.playback.global_position, 6 * SECOND);
    session.shutdown().await.expect("shutdown");
}

#[tokio::test(start_paused = true)]
async fn rejected_edits_are_published_on_the_error_stream() {
    let session = start(Machine::new(), MediaLibrary::default());
    record(&session, 2).await;
    let mut errors = session.errors();
    let before = session.snapshot();

    session
        .dispatch(Command::Split {
            clip_id: 1,
            at_tl: 2 * SECOND,
        })
        .await
        .expect("dispatch split");

    let error = errors.recv().await.expect("error event");
    assert_eq!(error.kind, EngineErrorKind::InvalidEdit);
    assert_eq!(session.snapshot().timeline, before.timeline);
    session.shutdown().await.expect("shutdown");
}

#[tokio::test(start_paused = true)]
async fn restored_project_with_missing_media_enters_error_and_resets() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("project.json");
    let library = MediaLibrary::default();
    {
        let session = start(Machine::new(), library.clone());
        record(&session, 2).await;
        let machine = session.shutdown().await.expect("shutdown");
        machine.to_document().save(&path).expect("save project");
    }

    let document = ProjectDocument::load(&path).expect("load project");
    let session = start(
        Machine::restore(document).expect("restore"),
        MediaLibrary::default(),
    );
    session.dispatch(Command::Play).await.expect("dispatch play");
    let failed = session
        .wait_for(WAIT, |context| context.mode() == Mode::Error)
        .await
        .expect("load should fail");
    assert!(failed.playback.last_error.is_some());

    session.dispatch(Command::Reset).await.expect("dispatch reset");
    session
        .wait_for(WAIT, |context| context.mode() == Mode::Idle)
        .await
        .expect("reset should return to idle");
    assert!(session.query().can_play());
    session.shutdown().await.expect("shutdown");
}

#[tokio::test(start_paused = true)]
async fn record_stop_queued_behind_record_start_closes_the_session() {
    let session = start(Machine::new(), MediaLibrary::default());

    session
        .try_dispatch(Command::RecordStart)
        .expect("queue record start");
    session
        .try_dispatch(Command::RecordStop)
        .expect("queue record stop");

    let finished = session
        .wait_for(WAIT, |context| {
            context.playback.generation >= 2
                && context.mode() != Mode::Recording
                && settled(context)
        })
        .await
        .expect("recording should close");

    assert_eq!(finished.mode(), Mode::Paused);
    assert!(finished.recording.is_none());
    assert_eq!(finished.playback.last_error, None);
    session.shutdown().await.expect("shutdown");
}
