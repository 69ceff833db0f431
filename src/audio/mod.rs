//! Audio transcoding: µ-law/PCM16 decode, resampling, RMS, gain, pre-emphasis.

pub mod codec;

pub use codec::{auto_gain, decode_mulaw, decode_pcm16, pre_emphasis, resample, rms};
