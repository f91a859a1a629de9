//! Audio capture from microphone

use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use tokio::sync::mpsc;

use super::{FrameSource, f32_to_pcm16};
use crate::{Error, Result};

/// Frames buffered between the device thread and the session
const FRAME_QUEUE: usize = 64;

/// Captures PCM16 frames from the default input device
///
/// Dropping the capture stops the stream and joins its thread.
pub struct MicCapture {
    frames: mpsc::Receiver<Vec<u8>>,
    stop: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl MicCapture {
    /// Open the default input device and start streaming
    ///
    /// Each frame holds `chunk_size` mono samples at `sample_rate`.
    ///
    /// # Errors
    ///
    /// Returns error if no input device supports the requested rate
    pub fn start(sample_rate: u32, chunk_size: usize) -> Result<Self> {
        let (frame_tx, frames) = mpsc::channel(FRAME_QUEUE);
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<()>>(1);

        let thread = std::thread::Builder::new()
            .name("roomey-mic".to_string())
            .spawn(move || {
                let stream = match open_stream(sample_rate, chunk_size.max(1), frame_tx) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                // Blocks until the capture is dropped
                let _ = stop_rx.recv();
                drop(stream);
                tracing::debug!("audio capture stopped");
            })?;

        ready_rx
            .recv()
            .map_err(|_| Error::Audio("capture thread exited during startup".to_string()))??;

        Ok(Self {
            frames,
            stop: Some(stop_tx),
            thread: Some(thread),
        })
    }
}

fn open_stream(
    sample_rate: u32,
    chunk_size: usize,
    frames: mpsc::Sender<Vec<u8>>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

    let rate = SampleRate(sample_rate);
    let supports_rate =
        |c: &cpal::SupportedStreamConfigRange| c.min_sample_rate() <= rate && c.max_sample_rate() >= rate;

    // Prefer mono; otherwise downmix
    let supported = device
        .supported_input_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .filter(|c| supports_rate(c))
        .min_by_key(cpal::SupportedStreamConfigRange::channels)
        .ok_or_else(|| {
            Error::Audio(format!("no input config supports {sample_rate} Hz"))
        })?;

    let config: StreamConfig = supported.with_sample_rate(rate).config();
    let channels = usize::from(config.channels);

    tracing::debug!(
        device = %device.name().unwrap_or_default(),
        sample_rate,
        channels,
        chunk_size,
        "audio capture initialized"
    );

    let mut pending: Vec<f32> = Vec::with_capacity(chunk_size);
    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                for frame in data.chunks(channels) {
                    #[allow(clippy::cast_precision_loss)]
                    let mono = frame.iter().sum::<f32>() / frame.len() as f32;
                    pending.push(mono);

                    if pending.len() == chunk_size {
                        // A full queue means the session is behind; drop the frame
                        if frames.try_send(f32_to_pcm16(&pending)).is_err() {
                            tracing::trace!("capture queue full, frame dropped");
                        }
                        pending.clear();
                    }
                }
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;
    tracing::debug!("audio capture started");
    Ok(stream)
}

#[async_trait]
impl FrameSource for MicCapture {
    async fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.frames.recv().await)
    }
}

impl Drop for MicCapture {
    fn drop(&mut self) {
        drop(self.stop.take());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
