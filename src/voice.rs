/// NOTE VOICES.
/// one `NoteVoice` per sounding note. it never touches audio itself: it writes
/// breakpoints into the `VoiceGraph` it shares with whatever is rendering, and the
/// renderer plays the sample through those curves.
use std::f64::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::automation::{AudioClock, Automation, Curve};
use crate::resolver::{amp_to_freq, NoteParameters};

/// how quickly expression and the initial cutoff settle, in seconds
pub const EXPRESSION_TIME_CONSTANT: f64 = 0.015;

/// live controller values for the voice's channel
#[derive(Clone, Debug, PartialEq)]
pub struct InstrumentState {
	pub channel: u8,
	pub key: u8,
	pub velocity: u8,
	/// 0..1
	pub volume: f64,
	/// -1 (left) ..1 (right)
	pub panpot: f64,
	/// -8192..8191
	pub pitch_bend: i16,
	/// semitones at full bend
	pub pitch_bend_sensitivity: f64,
	/// 0..127
	pub expression: u8,
	pub mute: bool,
	/// 0..127, 64 = as written in the sound font
	pub release_time: u8,
}

impl Default for InstrumentState {
	fn default() -> Self {
		Self {
			channel: 0,
			key: 60,
			velocity: 100,
			volume: 100.0 / 127.0,
			panpot: 0.0,
			pitch_bend: 0,
			pitch_bend_sensitivity: 2.0,
			expression: 127,
			mute: false,
			release_time: 64,
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleMode {
	NoLoop,
	/// loop while held, fade out on release
	Loop,
	/// reserved by the format
	Unused,
	/// loop while held, then play the rest of the sample
	LoopUntilRelease,
}

impl SampleMode {
	pub fn from_generator(value: u16) -> Self {
		match value {
			0 => SampleMode::NoLoop,
			1 => SampleMode::Loop,
			2 => SampleMode::Unused,
			_ => SampleMode::LoopUntilRelease,
		}
	}

	pub fn loops(self) -> bool {
		self != SampleMode::NoLoop
	}
}

/// buffer playback settings, in seconds
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Playback {
	/// clock time playback began. `None` until note-on.
	pub started_at: Option<f64>,
	/// where in the buffer playback begins
	pub offset: f64,
	pub looping: bool,
	pub loop_start: f64,
	pub loop_end: f64,
	/// clock time playback is cut off
	pub stop_at: Option<f64>,
}

/// the part of a voice the renderer sees.
/// sample → lowpass(filter_frequency, filter_q) → pan(x, z) → expression_gain → output_gain
#[derive(Debug)]
pub struct VoiceGraph {
	pub channel: u8,
	pub key: u8,
	pub sample: Arc<[i16]>,
	/// playback never reads past this index
	pub data_end: usize,
	pub sample_rate: u32,
	pub playback_rate: Automation,
	pub filter_frequency: Automation,
	pub filter_q: Automation,
	pub pan_x: Automation,
	pub pan_z: Automation,
	pub expression_gain: Automation,
	pub output_gain: Automation,
	playback: ArcSwap<Playback>,
	finished: AtomicBool,
}

impl VoiceGraph {
	pub fn playback(&self) -> Arc<Playback> {
		self.playback.load_full()
	}

	fn update_playback(&self, edit: impl FnOnce(&mut Playback)) {
		let mut playback = **self.playback.load();
		edit(&mut playback);
		self.playback.store(Arc::new(playback));
	}

	/// tear the voice down. only the first call does anything; returns whether it was this one.
	pub fn release(&self) -> bool {
		let first = !self.finished.swap(true, Ordering::AcqRel);
		if first {
			log::debug!("voice ch {} key {} finished", self.channel, self.key);
		}
		first
	}

	pub fn is_finished(&self) -> bool {
		self.finished.load(Ordering::Acquire)
	}
}

/// wherever voices end up being heard
pub trait AudioSink: Send + Sync {
	fn connect(&self, voice: Arc<VoiceGraph>);
	fn set_master_volume(&self, volume: f64);
}

pub struct NoteVoice {
	params: NoteParameters,
	state: InstrumentState,
	mode: SampleMode,
	graph: Arc<VoiceGraph>,
	clock: Arc<dyn AudioClock>,
	/// rate for the key, before pitch bend
	playback_rate: f64,
	/// rate with pitch bend applied
	computed_playback_rate: f64,
	start_time: f64,
}

/// 2^(semitones / 12)
fn semitones(amount: f64) -> f64 {
	f64::powf(2.0, amount / 12.0)
}

impl NoteVoice {
	pub fn new(params: NoteParameters, state: InstrumentState, clock: Arc<dyn AudioClock>) -> Self {
		let now = clock.now();
		let playback_rate = params.playback_rate(state.key);
		let base_freq = amp_to_freq(params.initial_filter_fc);
		let len = params.sample.len() as i64;
		let data_end = (len + params.end).clamp(0, len) as usize;
		let graph = Arc::new(VoiceGraph {
			channel: state.channel,
			key: state.key,
			sample: Arc::clone(&params.sample),
			data_end,
			sample_rate: params.sample_rate,
			playback_rate: Automation::new(playback_rate),
			filter_frequency: Automation::new(base_freq),
			filter_q: Automation::new(1.0),
			pan_x: Automation::new(0.0),
			pan_z: Automation::new(1.0),
			expression_gain: Automation::new(1.0),
			output_gain: Automation::new(0.0),
			playback: ArcSwap::from_pointee(Playback {
				started_at: None,
				offset: 0.0,
				looping: false,
				loop_start: 0.0,
				loop_end: 0.0,
				stop_at: None,
			}),
			finished: AtomicBool::new(false),
		});
		let mut voice = Self {
			mode: SampleMode::from_generator(params.sample_modes),
			params,
			state,
			graph,
			clock,
			playback_rate,
			computed_playback_rate: playback_rate,
			start_time: now,
		};
		let expression = voice.state.expression as f64 / 127.0;
		voice.graph.expression_gain.update(|c| {
			c.set_target_at(expression, now, EXPRESSION_TIME_CONSTANT);
		});
		voice.graph.filter_frequency.update(|c| {
			c.set_target_at(base_freq, now, EXPRESSION_TIME_CONSTANT);
		});
		voice.update_pitch_bend(voice.state.pitch_bend);
		voice
	}

	pub fn channel(&self) -> u8 {
		self.state.channel
	}

	pub fn key(&self) -> u8 {
		self.state.key
	}

	pub fn sample_mode(&self) -> SampleMode {
		self.mode
	}

	pub fn graph(&self) -> &Arc<VoiceGraph> {
		&self.graph
	}

	pub fn start_time(&self) -> f64 {
		self.start_time
	}

	/// 0 means none
	pub fn exclusive_class(&self) -> i16 {
		self.params.exclusive_class.unwrap_or(0)
	}

	pub fn computed_playback_rate(&self) -> f64 {
		self.computed_playback_rate
	}

	pub fn is_finished(&self) -> bool {
		self.graph.is_finished()
	}

	fn filter_bounds(&self) -> (f64, f64) {
		let base = amp_to_freq(self.params.initial_filter_fc);
		let peak = amp_to_freq(self.params.initial_filter_fc + self.params.mod_env_to_filter_fc);
		(base, peak)
	}

	pub fn note_on(&mut self, sink: &dyn AudioSink) {
		let now = self.clock.now();
		let params = &self.params;

		let pan = match params.pan {
			Some(pan) => pan as f64 / 120.0,
			None => self.state.panpot,
		};
		self.graph.pan_x.update(|c| {
			c.set_value_at(f64::sin(pan * PI / 2.0), now);
		});
		self.graph.pan_z.update(|c| {
			c.set_value_at(f64::cos(pan * PI / 2.0), now);
		});

		let attack_volume = f64::max(
			0.0,
			self.state.volume
				* (self.state.velocity as f64 / 127.0)
				* (1.0 - params.initial_attenuation / 1000.0),
		);

		// volume envelope
		let vol = params.volume;
		let vol_delay = now + vol.delay;
		let vol_hold = vol_delay + vol.attack + vol.hold;
		let vol_decay = vol_hold + vol.decay;
		self.graph.output_gain.update(|c| {
			c.set_value_at(0.0, now)
				.set_value_at(0.0, vol_delay)
				.set_target_at(attack_volume, vol_delay, vol.attack)
				.set_value_at(attack_volume, vol_hold)
				.linear_ramp_to(attack_volume * (1.0 - vol.sustain), vol_decay);
		});

		// modulation envelope
		let modulation = params.modulation;
		let (base_freq, peak_freq) = self.filter_bounds();
		let sustain_freq = base_freq + (peak_freq - base_freq) * (1.0 - modulation.sustain);
		let mod_delay = now + modulation.delay;
		let mod_hold = mod_delay + modulation.attack + modulation.hold;
		let mod_decay = mod_hold + modulation.decay;
		let q = f64::powf(10.0, params.initial_filter_q / 200.0);
		self.graph.filter_q.update(|c| {
			c.set_value_at(q, now);
		});
		self.graph.filter_frequency.update(|c| {
			c.set_value_at(base_freq, now)
				.set_value_at(base_freq, mod_delay)
				.set_target_at(peak_freq, mod_delay, modulation.attack)
				.set_value_at(peak_freq, mod_hold)
				.linear_ramp_to(sustain_freq, mod_decay);
		});

		let rate = params.sample_rate.max(1) as f64;
		let offset = params.start.max(0) as f64 / rate;
		let looping = self.mode.loops();
		let (loop_start, loop_end) = (params.loop_start as f64 / rate, params.loop_end as f64 / rate);
		self.graph.update_playback(|p| {
			p.started_at = Some(now);
			p.offset = offset;
			p.looping = looping;
			p.loop_start = loop_start;
			p.loop_end = loop_end;
		});

		log::debug!(
			"note on: ch {} key {} vel {} sample {:?}",
			self.state.channel,
			self.state.key,
			self.state.velocity,
			params.sample_name
		);
		if self.state.mute {
			// nothing will render it, so nothing would ever end it
			self.graph.release();
		} else {
			sink.connect(Arc::clone(&self.graph));
		}
	}

	pub fn note_off(&mut self) {
		let now = self.clock.now();
		let params = &self.params;
		let release = self.state.release_time as f64 - 64.0;
		let release_factor = 1.0 + release / if release < 0.0 { 64.0 } else { 63.0 };

		let gain = self.graph.output_gain.value_at(now);
		let vol_end = now + params.volume.release * gain * release_factor;

		let (base_freq, peak_freq) = self.filter_bounds();
		let freq = self.graph.filter_frequency.value_at(now);
		let position = if base_freq == peak_freq {
			1.0
		} else {
			f64::max(0.0, (freq - base_freq) / (peak_freq - base_freq))
		};
		let mod_end = now + params.modulation.release * position;

		match self.mode {
			SampleMode::NoLoop => {}
			SampleMode::Loop => {
				self.graph.output_gain.update(|c| {
					c.cancel_and_hold(now).linear_ramp_to(0.0, vol_end);
				});
				self.graph.filter_frequency.update(|c| {
					c.cancel_and_hold(now).linear_ramp_to(base_freq, mod_end);
				});
				let computed = self.computed_playback_rate;
				self.graph.playback_rate.update(|c| {
					c.cancel_and_hold(now).linear_ramp_to(computed, mod_end);
				});
				self.graph.update_playback(|p| p.stop_at = Some(vol_end));
				log::debug!(
					"note off: ch {} key {} stops at {:.3}s",
					self.state.channel,
					self.state.key,
					vol_end
				);
			}
			SampleMode::Unused => {
				log::info!("sample mode 2 (unused) on key {}", self.state.key);
			}
			SampleMode::LoopUntilRelease => {
				self.graph.update_playback(|p| p.looping = false);
			}
		}
	}

	/// stop right away, no release
	pub fn stop(&self) {
		self.graph.release();
	}

	pub fn update_expression(&mut self, expression: u8) {
		self.state.expression = expression;
		let now = self.clock.now();
		self.graph.expression_gain.update(|c| {
			c.cancel_and_hold(now)
				.set_target_at(expression as f64 / 127.0, now, EXPRESSION_TIME_CONSTANT)
				.prune_before(now);
		});
	}

	pub fn update_pitch_bend(&mut self, pitch_bend: i16) {
		self.state.pitch_bend = pitch_bend;
		let bend = pitch_bend as f64 / if pitch_bend < 0 { 8192.0 } else { 8191.0 };
		self.computed_playback_rate = self.playback_rate
			* semitones(self.state.pitch_bend_sensitivity * bend * self.params.scale_tuning);
		self.schedule_playback_rate();
	}

	pub fn update_pitch_bend_sensitivity(&mut self, sensitivity: f64) {
		self.state.pitch_bend_sensitivity = sensitivity;
		self.update_pitch_bend(self.state.pitch_bend);
	}

	fn schedule_playback_rate(&self) {
		let modulation = self.params.modulation;
		let computed = self.computed_playback_rate;
		let start = self.start_time;
		let mod_attack = start + modulation.attack;
		let mod_decay = mod_attack + modulation.decay;
		let peak = computed * semitones(self.params.mod_env_to_pitch * self.params.scale_tuning);
		let sustain = computed + (peak - computed) * (1.0 - modulation.sustain);
		self.graph.playback_rate.update(|c: &mut Curve| {
			c.cancel_scheduled_values(start)
				.set_value_at(computed, start)
				.linear_ramp_to(peak, mod_attack)
				.linear_ramp_to(sustain, mod_decay);
		});
	}
}
