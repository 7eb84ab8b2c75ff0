/// offline rendering.
/// `Renderer` is an `AudioSink` that mixes every connected voice into interleaved
/// stereo `f32`, reading each voice's curves as snapshots once per block.
use std::f64::consts::PI;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::automation::SampleClock;
use crate::voice::{AudioSink, VoiceGraph};

/// frames rendered between filter/pan/snapshot updates
pub const BLOCK_FRAMES: usize = 64;

/// resonant low-pass, direct form II transposed
#[derive(Clone, Copy, Debug, Default)]
struct Biquad {
	b0: f64,
	b1: f64,
	b2: f64,
	a1: f64,
	a2: f64,
	z1: f64,
	z2: f64,
}

impl Biquad {
	fn set_lowpass(&mut self, freq: f64, q: f64, sample_rate: f64) {
		let freq = freq.clamp(10.0, sample_rate / 2.0 - 1.0);
		let q = q.max(0.01);
		let omega = 2.0 * PI * freq / sample_rate;
		let (sin_omega, cos_omega) = omega.sin_cos();
		let alpha = sin_omega / (2.0 * q);

		let a0 = 1.0 + alpha;
		self.b0 = (1.0 - cos_omega) / 2.0 / a0;
		self.b1 = (1.0 - cos_omega) / a0;
		self.b2 = self.b0;
		self.a1 = -2.0 * cos_omega / a0;
		self.a2 = (1.0 - alpha) / a0;
	}

	fn process(&mut self, input: f64) -> f64 {
		let output = self.b0 * input + self.z1;
		self.z1 = self.b1 * input - self.a1 * output + self.z2;
		self.z2 = self.b2 * input - self.a2 * output;
		output
	}
}

struct RenderVoice {
	graph: Arc<VoiceGraph>,
	/// position in the sample data, in sample points
	position: f64,
	started: bool,
	filter: Biquad,
}

/// equal-power gains from the voice's (x, z) pan position
fn pan_gains(x: f64, z: f64) -> (f64, f64) {
	let pan = (f64::atan2(x, z) / (PI / 2.0)).clamp(-1.0, 1.0);
	let x01 = (pan + 1.0) * 0.5;
	(f64::cos(x01 * PI / 2.0), f64::sin(x01 * PI / 2.0))
}

impl RenderVoice {
	fn new(graph: Arc<VoiceGraph>) -> Self {
		Self {
			graph,
			position: 0.0,
			started: false,
			filter: Biquad::default(),
		}
	}

	/// mix one block into `out` (interleaved stereo), starting at clock time `t0`.
	fn render_block(&mut self, out: &mut [f32], t0: f64, output_rate: f64, master_volume: f64) {
		let graph = Arc::clone(&self.graph);
		if graph.is_finished() {
			return;
		}
		let playback = graph.playback();
		let Some(started_at) = playback.started_at else {
			return;
		};
		if graph.sample_rate == 0 {
			graph.release();
			return;
		}

		let tmul = graph.sample_rate as f64;
		let data = &graph.sample[..graph.data_end];
		let len = data.len();
		let mut startloop = (playback.loop_start * tmul).round() as usize;
		if startloop > len {
			// loop points outside the sample
			startloop = 0;
		}
		let mut endloop = (playback.loop_end * tmul).round() as usize;
		if endloop > len {
			endloop = len;
		}
		if endloop <= startloop {
			startloop = 0;
			endloop = len;
		}

		let rate = graph.playback_rate.snapshot();
		let output_gain = graph.output_gain.snapshot();
		let expression_gain = graph.expression_gain.snapshot();
		self.filter.set_lowpass(
			graph.filter_frequency.value_at(t0),
			graph.filter_q.value_at(t0),
			output_rate,
		);
		let (left, right) = pan_gains(graph.pan_x.value_at(t0), graph.pan_z.value_at(t0));

		for (i, frame) in out.chunks_exact_mut(2).enumerate() {
			let t = t0 + i as f64 / output_rate;
			if t < started_at {
				continue;
			}
			if !self.started {
				self.position = playback.offset * tmul;
				self.started = true;
			}
			if playback.stop_at.map_or(false, |stop| t >= stop) {
				graph.release();
				return;
			}
			if playback.looping && self.position >= endloop as f64 {
				// a fast voice can step over more than one loop per frame
				let looplen = (endloop - startloop) as f64;
				self.position = startloop as f64 + (self.position - startloop as f64) % looplen;
			}
			let s = self.position as usize;
			let s_frac = self.position - s as f64;
			if s + 1 >= len {
				graph.release();
				return;
			}
			// interpolate between one sample and the next
			let sample1 = data[s] as f64;
			let sample2 = data[s + 1] as f64;
			let sample = (sample1 + (sample2 - sample1) * s_frac) * (1.0 / 32768.0);

			let filtered = self.filter.process(sample);
			let gain = output_gain.value_at(t) * expression_gain.value_at(t) * master_volume;
			frame[0] += (filtered * gain * left) as f32;
			frame[1] += (filtered * gain * right) as f32;
			self.position += rate.value_at(t) * tmul / output_rate;
		}
	}
}

pub struct Renderer {
	clock: Arc<SampleClock>,
	voices: Mutex<Vec<RenderVoice>>,
	master_volume: Mutex<f64>,
}

impl Renderer {
	pub fn new(sample_rate: u32) -> Self {
		Self {
			clock: Arc::new(SampleClock::new(sample_rate)),
			voices: Mutex::new(vec![]),
			master_volume: Mutex::new(1.0),
		}
	}

	pub fn clock(&self) -> Arc<SampleClock> {
		Arc::clone(&self.clock)
	}

	pub fn sample_rate(&self) -> u32 {
		self.clock.sample_rate()
	}

	/// voices connected and not yet finished
	pub fn active_voices(&self) -> usize {
		self.voices.lock().iter().filter(|v| !v.graph.is_finished()).count()
	}

	/// mix `frames` stereo frames and move the clock past them.
	pub fn render(&self, frames: usize) -> Vec<f32> {
		let mut out = vec![0.0; frames * 2];
		self.render_into(&mut out);
		out
	}

	/// mix into `out` (interleaved stereo). `out` is added to, not overwritten.
	pub fn render_into(&self, out: &mut [f32]) {
		let output_rate = self.clock.sample_rate() as f64;
		let first_frame = self.clock.frames();
		let master_volume = *self.master_volume.lock();
		let frames = out.len() / 2;
		{
			let mut voices = self.voices.lock();
			for (block, chunk) in out.chunks_mut(BLOCK_FRAMES * 2).enumerate() {
				let t0 = (first_frame + (block * BLOCK_FRAMES) as u64) as f64 / output_rate;
				for voice in voices.iter_mut() {
					voice.render_block(chunk, t0, output_rate, master_volume);
				}
				voices.retain(|v| !v.graph.is_finished());
			}
		}
		self.clock.advance(frames as u64);
	}
}

impl AudioSink for Renderer {
	fn connect(&self, voice: Arc<VoiceGraph>) {
		self.voices.lock().push(RenderVoice::new(voice));
	}

	fn set_master_volume(&self, volume: f64) {
		*self.master_volume.lock() = volume;
	}
}

/// save interleaved stereo frames as a 16-bit WAV file.
pub fn write_wav(path: impl AsRef<Path>, frames: &[f32], sample_rate: u32) -> Result<(), hound::Error> {
	let spec = hound::WavSpec {
		channels: 2,
		sample_rate,
		bits_per_sample: 16,
		sample_format: hound::SampleFormat::Int,
	};
	let mut writer = hound::WavWriter::create(path, spec)?;
	for &s in frames {
		writer.write_sample((s.clamp(-1.0, 1.0) * 32767.0) as i16)?;
	}
	writer.finalize()
}
