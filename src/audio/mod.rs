//! Microphone capture and speaker playback
//!
//! cpal streams are `!Send`, so each device lives on its own OS thread.
//! The session only sees the [`FrameSource`] and [`AudioSink`] seams,
//! which carry PCM16 little-endian mono bytes.

mod capture;
mod playback;

use async_trait::async_trait;

use crate::Result;

pub use capture::MicCapture;
pub use playback::SpeakerPlayback;

/// Produces microphone frames
#[async_trait]
pub trait FrameSource: Send {
    /// Next frame, or `None` once the device has stopped
    async fn next_frame(&mut self) -> Result<Option<Vec<u8>>>;
}

/// Plays model audio
#[async_trait]
pub trait AudioSink: Send {
    /// Queue a chunk behind anything already playing
    ///
    /// Waits while the device buffer is full.
    async fn play(&mut self, pcm: Vec<u8>) -> Result<()>;

    /// Drop audio that is buffered but not yet heard
    fn clear(&mut self) {}
}

/// Source for runs without a microphone; never yields a frame
pub struct NoInput;

#[async_trait]
impl FrameSource for NoInput {
    async fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        std::future::pending().await
    }
}

/// Sink for runs without a speaker; discards audio
pub struct NoOutput;

#[async_trait]
impl AudioSink for NoOutput {
    async fn play(&mut self, _pcm: Vec<u8>) -> Result<()> {
        Ok(())
    }
}

/// Convert float samples to PCM16 little-endian bytes
#[must_use]
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&s| {
            #[allow(clippy::cast_possible_truncation)]
            let v = (s * 32767.0).clamp(-32768.0, 32767.0) as i16;
            v.to_le_bytes()
        })
        .collect()
}

/// Convert PCM16 little-endian bytes to float samples
///
/// A trailing odd byte is ignored.
#[must_use]
pub fn pcm16_to_f32(pcm: &[u8]) -> Vec<f32> {
    pcm.chunks_exact(2)
        .map(|b| f32::from(i16::from_le_bytes([b[0], b[1]])) / 32768.0)
        .collect()
}

/// Peak absolute level of a PCM16 frame, 0.0 to 1.0
#[must_use]
pub fn peak_level(pcm: &[u8]) -> f32 {
    pcm16_to_f32(pcm)
        .into_iter()
        .map(f32::abs)
        .fold(0.0, f32::max)
}

/// A sine tone as PCM16, for speaker checks
#[must_use]
pub fn tone(frequency: f32, millis: u32, sample_rate: u32) -> Vec<u8> {
    let count = u64::from(sample_rate) * u64::from(millis) / 1000;
    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..count)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            0.3 * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect();
    f32_to_pcm16(&samples)
}
