//! sound font (.sf2) loading, note resolution, and per-note voices with
//! scheduled envelopes, plus an offline renderer to hear them with.
pub mod automation;
pub mod channel;
pub mod error;
pub mod generator;
pub mod render;
pub mod resolver;
pub mod riff;
pub mod soundfont;
pub mod stream;
pub mod synth;
pub mod voice;

#[cfg(test)]
mod fixture;

pub use automation::{AudioClock, Automation, Curve, SampleClock};
pub use channel::Channel;
pub use error::{OpenError, ResolveError};
pub use generator::{GeneratorSet, GeneratorType, RangeValue};
pub use render::{write_wav, Renderer};
pub use resolver::{NotFound, NoteParameters, Resolution};
pub use soundfont::SoundFont;
pub use synth::Synthesizer;
pub use voice::{AudioSink, InstrumentState, NoteVoice};
