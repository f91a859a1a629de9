//! Audio playback to speakers

use std::collections::VecDeque;
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use super::{AudioSink, pcm16_to_f32};
use crate::{Error, Result};

type SampleBuffer = Arc<Mutex<VecDeque<f32>>>;

/// Streams PCM16 chunks to the default output device
///
/// Chunks are appended to a device buffer drained by the output callback,
/// so consecutive chunks play back to back. Dropping the playback stops the
/// stream and joins its thread.
pub struct SpeakerPlayback {
    buffer: SampleBuffer,
    max_buffered: usize,
    stop: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl SpeakerPlayback {
    /// Open the default output device at `sample_rate`
    ///
    /// # Errors
    ///
    /// Returns error if no output device supports the requested rate
    pub fn start(sample_rate: u32) -> Result<Self> {
        let buffer: SampleBuffer = Arc::new(Mutex::new(VecDeque::new()));
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<()>>(1);

        let device_buffer = Arc::clone(&buffer);
        let thread = std::thread::Builder::new()
            .name("roomey-speaker".to_string())
            .spawn(move || {
                let stream = match open_stream(sample_rate, device_buffer) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                let _ = stop_rx.recv();
                drop(stream);
                tracing::debug!("audio playback stopped");
            })?;

        ready_rx
            .recv()
            .map_err(|_| Error::Audio("playback thread exited during startup".to_string()))??;

        Ok(Self {
            buffer,
            // About half a second ahead of the speaker
            max_buffered: usize::try_from(sample_rate / 2).unwrap_or(12_000),
            stop: Some(stop_tx),
            thread: Some(thread),
        })
    }

    fn buffered(&self) -> usize {
        self.buffer.lock().map(|b| b.len()).unwrap_or(0)
    }

    /// Wait until everything queued has been played
    pub async fn drain(&self) {
        while self.buffered() > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

fn open_stream(sample_rate: u32, buffer: SampleBuffer) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

    let rate = SampleRate(sample_rate);
    let supported = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .filter(|c| c.min_sample_rate() <= rate && c.max_sample_rate() >= rate)
        .min_by_key(cpal::SupportedStreamConfigRange::channels)
        .ok_or_else(|| Error::Audio(format!("no output config supports {sample_rate} Hz")))?;

    let config: StreamConfig = supported.with_sample_rate(rate).config();
    let channels = usize::from(config.channels);

    tracing::debug!(
        device = %device.name().unwrap_or_default(),
        sample_rate,
        channels,
        "audio playback initialized"
    );

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let Ok(mut samples) = buffer.lock() else {
                    data.fill(0.0);
                    return;
                };
                for frame in data.chunks_mut(channels) {
                    // Silence on underrun
                    let sample = samples.pop_front().unwrap_or(0.0);
                    frame.fill(sample);
                }
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;
    Ok(stream)
}

#[async_trait]
impl AudioSink for SpeakerPlayback {
    async fn play(&mut self, pcm: Vec<u8>) -> Result<()> {
        while self.buffered() > self.max_buffered {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let samples = pcm16_to_f32(&pcm);
        let count = samples.len();
        self.buffer
            .lock()
            .map_err(|_| Error::Audio("playback buffer poisoned".to_string()))?
            .extend(samples);

        tracing::trace!(samples = count, "queued audio chunk");
        Ok(())
    }

    fn clear(&mut self) {
        if let Ok(mut samples) = self.buffer.lock() {
            let dropped = samples.len();
            samples.clear();
            tracing::debug!(dropped, "cleared playback buffer");
        }
    }
}

impl Drop for SpeakerPlayback {
    fn drop(&mut self) {
        drop(self.stop.take());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
