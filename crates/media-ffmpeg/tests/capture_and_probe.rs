use std::process::Command;
use std::time::Duration;

use media_ffmpeg::{CaptureRequest, CaptureSession, probe_duration_seconds};

fn ffmpeg_available() -> bool {
    ["ffmpeg", "ffprobe"].iter().all(|tool| {
        Command::new(tool)
            .arg("-version")
            .output()
            .is_ok_and(|output| output.status.success())
    })
}

#[test]
fn capture_from_test_source_finalizes_a_probeable_file() {
    if !ffmpeg_available() {
        eprintln!("skipping: ffmpeg/ffprobe not installed");
        return;
    }
    let dir = tempfile::tempdir().expect("create temp dir");
    let output_path = dir.path().join("take-1.mkv");

    let session = CaptureSession::start(&CaptureRequest {
        input_format: String::from("lavfi"),
        input: String::from("testsrc=size=160x90:rate=30"),
        output_path: output_path.clone(),
    })
    .expect("capture should start");
    std::thread::sleep(Duration::from_millis(600));
    let captured = session.stop().expect("capture should finalize");

    assert_eq!(captured.path, output_path);
    assert!(captured.elapsed >= Duration::from_millis(600));
    assert!(output_path.exists());

    let probed = probe_duration_seconds(&output_path).expect("probe should succeed");
    if let Some(seconds) = probed {
        assert!(seconds > 0.0);
    }
}

#[test]
fn capture_with_unknown_format_fails_on_stop() {
    if !ffmpeg_available() {
        eprintln!("skipping: ffmpeg/ffprobe not installed");
        return;
    }
    let dir = tempfile::tempdir().expect("create temp dir");

    let session = CaptureSession::start(&CaptureRequest {
        input_format: String::from("definitely-not-a-format"),
        input: String::from("nothing"),
        output_path: dir.path().join("broken.mkv"),
    })
    .expect("spawn itself should succeed");

    assert!(session.stop().is_err());
}
