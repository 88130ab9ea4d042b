mod capture;
mod error;
mod probe;

pub use capture::{CaptureRequest, CaptureSession, CapturedMedia};
pub use error::{MediaFfmpegError, Result};
pub use probe::probe_duration_seconds;
