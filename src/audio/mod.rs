use std::path::Path;

use hound::WavReader;

use crate::error::{SyncError, SyncResult};

/// Length of a WAV file in seconds, from its header.
pub fn wav_duration(path: &Path) -> SyncResult<f64> {
    let reader = WavReader::open(path).map_err(|e| SyncError::unavailable(path, e))?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return Err(SyncError::unavailable(path, "WAV header declares a zero sample rate"));
    }
    // duration() counts samples per channel.
    let seconds = reader.duration() as f64 / spec.sample_rate as f64;
    tracing::debug!(
        path = %path.display(),
        sample_rate = spec.sample_rate,
        channels = spec.channels,
        seconds,
        "Read WAV header"
    );
    Ok(seconds)
}

/// Picks the video length: the audio when known, else the declared end of
/// the performance, else the last cursor time plus `tail`.
pub fn resolve_duration(audio: Option<f64>, declared_end: Option<f64>, last_waypoint: f64, tail: f64) -> f64 {
    let usable = |v: &f64| v.is_finite() && *v > 0.0;
    audio
        .filter(usable)
        .or(declared_end.filter(usable))
        .unwrap_or(last_waypoint + tail.max(0.0))
}
