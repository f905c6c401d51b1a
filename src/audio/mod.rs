//! Audio mixing into the single PCM bed handed to the encoder.

mod mix;

pub use mix::{
    AudioSegment, MixedAudio, gather_segments, has_audio_elements, mix_segments, mix_timeline,
};
