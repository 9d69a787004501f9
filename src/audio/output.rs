//! Live audio output through the default device.

use crate::audio::bus::{Bus, BusSource};
use crate::error::EngineError;
use rodio::{OutputStream, OutputStreamHandle};
use tracing::info;

/// Keeps the output stream open; dropping it silences the bus.
pub struct AudioOutput {
    /// Audio output stream (must be kept alive).
    _stream: OutputStream,
    /// Audio output handle for playback.
    _stream_handle: OutputStreamHandle,
}

impl AudioOutput {
    /// Opens the default output device and starts pulling from `bus`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Unsupported`] if no output device can be
    /// opened or the stream refuses the bus format.
    pub fn open(bus: &Bus) -> Result<Self, EngineError> {
        let (stream, stream_handle) = OutputStream::try_default()
            .map_err(|e| EngineError::Unsupported(format!("failed to open audio output: {e}")))?;

        stream_handle
            .play_raw(BusSource::new(bus.clone()))
            .map_err(|e| EngineError::Unsupported(format!("failed to start playback: {e}")))?;

        let format = bus.format();
        info!(
            sample_rate = format.sample_rate,
            channels = format.channels,
            "Audio output started"
        );
        Ok(Self {
            _stream: stream,
            _stream_handle: stream_handle,
        })
    }
}
