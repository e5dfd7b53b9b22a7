//! RIFF/WAVE envelope for audio whose length is unknown up front.

use bytes::Bytes;
use futures_core::Stream;
use futures_util::stream::{self, StreamExt};

pub const HEADER_LEN: usize = 44;

/// Size value declaring "unknown length" in the RIFF and data chunk headers.
pub const STREAMING_SIZE: u32 = u32::MAX;

/// PCM layout declared in the stream header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl AudioFormat {
    /// Mono 16-bit PCM at `native_rate` scaled by `speed`.
    ///
    /// The engine output is not resampled. Declaring a higher rate makes the
    /// same samples play back faster.
    pub fn for_voice(native_rate: u32, speed: f64) -> Self {
        Self {
            sample_rate: (native_rate as f64 * speed) as u32,
            channels: 1,
            bits_per_sample: 16,
        }
    }

    pub fn byte_rate(&self) -> u32 {
        byte_rate(self.sample_rate, self.channels, self.bits_per_sample)
    }

    pub fn block_align(&self) -> u16 {
        block_align(self.channels, self.bits_per_sample)
    }

    pub fn header(&self) -> [u8; HEADER_LEN] {
        streaming_header(self.sample_rate, self.channels, self.bits_per_sample)
    }
}

// Both derived fields saturate; a very high speed cannot overflow them.
fn byte_rate(sample_rate: u32, channels: u16, bits_per_sample: u16) -> u32 {
    let rate = sample_rate as u64 * channels as u64 * bits_per_sample as u64 / 8;
    rate.min(u32::MAX as u64) as u32
}

fn block_align(channels: u16, bits_per_sample: u16) -> u16 {
    let align = channels as u32 * bits_per_sample as u32 / 8;
    align.min(u16::MAX as u32) as u16
}

/// Build the 44-byte canonical PCM WAV header with both size fields set to
/// [`STREAMING_SIZE`].
pub fn streaming_header(sample_rate: u32, channels: u16, bits_per_sample: u16) -> [u8; HEADER_LEN] {
    let byte_rate = byte_rate(sample_rate, channels, bits_per_sample);
    let block_align = block_align(channels, bits_per_sample);

    let mut out = Vec::<u8>::with_capacity(HEADER_LEN);

    // RIFF header
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&STREAMING_SIZE.to_le_bytes());
    out.extend_from_slice(b"WAVE");

    // fmt chunk
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes()); // fmt chunk size
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&bits_per_sample.to_le_bytes());

    // data chunk
    out.extend_from_slice(b"data");
    out.extend_from_slice(&STREAMING_SIZE.to_le_bytes());

    let mut header = [0u8; HEADER_LEN];
    header.copy_from_slice(&out);
    header
}

/// Emit `header` as its own chunk, followed by every audio chunk unchanged.
pub fn with_header<S>(header: [u8; HEADER_LEN], audio: S) -> impl Stream<Item = Bytes> + Send
where
    S: Stream<Item = Bytes> + Send,
{
    stream::once(async move { Bytes::copy_from_slice(&header) }).chain(audio)
}
