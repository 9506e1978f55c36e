use base64::Engine;
use std::time::Duration;

/// Sample rate of raw PCM16 returned by OpenAI's speech endpoint.
pub const OPENAI_SPEECH_PCM16_SAMPLE_RATE: u32 = 24000;

/// Base64-encodes raw audio bytes for JSON transport.
pub fn encode_base64(audio: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(audio)
}

/// Playback length of mono PCM16 audio at `sample_rate`.
pub fn pcm16_duration(byte_len: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    let samples = (byte_len / 2) as u64;
    Duration::from_micros(samples * 1_000_000 / u64::from(sample_rate))
}

/// Wraps mono PCM16 little-endian samples in a minimal RIFF/WAVE container,
/// which transcription endpoints accept where they reject headerless audio.
pub fn pcm16_to_wav(pcm: &[u8], sample_rate: u32) -> Vec<u8> {
    const CHANNELS: u16 = 1;
    const BITS_PER_SAMPLE: u16 = 16;
    let block_align = CHANNELS * BITS_PER_SAMPLE / 8;
    let byte_rate = sample_rate * u32::from(block_align);
    // An odd trailing byte is not a sample.
    let data = &pcm[..pcm.len() - pcm.len() % 2];
    let data_len = data.len() as u32;

    let mut wav = Vec::with_capacity(44 + data.len());
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + data_len).to_le_bytes());
    wav.extend_from_slice(b"WAVE");
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
    wav.extend_from_slice(&CHANNELS.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&block_align.to_le_bytes());
    wav.extend_from_slice(&BITS_PER_SAMPLE.to_le_bytes());
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());
    wav.extend_from_slice(data);
    wav
}
