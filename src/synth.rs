/// sixteen MIDI-style channels in front of a sound font.
use std::sync::Arc;

use crate::automation::AudioClock;
use crate::channel::Channel;
use crate::error::ResolveError;
use crate::resolver::Resolution;
use crate::soundfont::SoundFont;
use crate::voice::{AudioSink, NoteVoice};

pub const CHANNEL_COUNT: usize = 16;

pub struct Synthesizer {
	soundfont: Option<Arc<SoundFont>>,
	channels: Vec<Channel>,
	master_volume: f64,
	sink: Arc<dyn AudioSink>,
	clock: Arc<dyn AudioClock>,
}

fn channel_index(channel: usize) -> Option<usize> {
	if channel < CHANNEL_COUNT {
		Some(channel)
	} else {
		log::warn!("channel {} out of range", channel);
		None
	}
}

/// 7-bit controller value → 0..1
fn controller_fraction(value: u8) -> f64 {
	value.min(127) as f64 / 127.0
}

impl Synthesizer {
	pub fn new(sink: Arc<dyn AudioSink>, clock: Arc<dyn AudioClock>) -> Self {
		Self {
			soundfont: None,
			channels: (0..CHANNEL_COUNT as u8).map(Channel::new).collect(),
			master_volume: 1.0,
			sink,
			clock,
		}
	}

	pub fn load_soundfont(&mut self, soundfont: Arc<SoundFont>) {
		for channel in self.channels.iter_mut() {
			channel.all_sound_off();
		}
		self.soundfont = Some(soundfont);
	}

	pub fn soundfont(&self) -> Option<&Arc<SoundFont>> {
		self.soundfont.as_ref()
	}

	pub fn channel(&self, channel: usize) -> Option<&Channel> {
		self.channels.get(channel)
	}

	fn channel_mut(&mut self, channel: usize) -> Option<&mut Channel> {
		let index = channel_index(channel)?;
		self.channels.get_mut(index)
	}

	pub fn master_volume(&self) -> f64 {
		self.master_volume
	}

	pub fn set_master_volume(&mut self, volume: f64) {
		self.master_volume = volume;
		self.sink.set_master_volume(volume);
	}

	/// start a note. a sound font that doesn't have the note isn't an error, the note's just dropped.
	pub fn note_on(&mut self, channel: usize, key: u8, velocity: u8) -> Result<(), ResolveError> {
		let Some(index) = channel_index(channel) else {
			return Ok(());
		};
		let Some(soundfont) = self.soundfont.clone() else {
			log::warn!("note on with no sound font loaded");
			return Ok(());
		};
		let ch = &mut self.channels[index];
		let bank = ch.effective_bank();
		let mut resolution = soundfont.resolve(bank, ch.program, key, velocity)?;
		if matches!(resolution, Resolution::NotFound(_)) && !ch.percussion && bank != 0 {
			log::info!("falling back to bank 0 for program {}", ch.program);
			resolution = soundfont.resolve(0, ch.program, key, velocity)?;
		}
		let Some(params) = resolution.found() else {
			return Ok(());
		};
		let voice = NoteVoice::new(params, ch.instrument_state(key, velocity), Arc::clone(&self.clock));
		ch.note_on(voice, self.sink.as_ref());
		Ok(())
	}

	pub fn note_off(&mut self, channel: usize, key: u8) {
		if let Some(ch) = self.channel_mut(channel) {
			ch.note_off(key);
		}
	}

	pub fn hold(&mut self, channel: usize, down: bool) {
		if let Some(ch) = self.channel_mut(channel) {
			ch.set_hold(down);
		}
	}

	pub fn bank_select(&mut self, channel: usize, bank: u16) {
		if let Some(ch) = self.channel_mut(channel) {
			ch.bank = bank;
		}
	}

	pub fn program_change(&mut self, channel: usize, program: u16) {
		if let Some(ch) = self.channel_mut(channel) {
			ch.program = program;
		}
	}

	pub fn set_percussion(&mut self, channel: usize, percussion: bool) {
		if let Some(ch) = self.channel_mut(channel) {
			ch.percussion = percussion;
		}
	}

	pub fn volume_change(&mut self, channel: usize, volume: u8) {
		if let Some(ch) = self.channel_mut(channel) {
			ch.volume = controller_fraction(volume);
		}
	}

	/// 64 is centre
	pub fn panpot_change(&mut self, channel: usize, panpot: u8) {
		if let Some(ch) = self.channel_mut(channel) {
			ch.panpot = (panpot.min(127) as f64 - 64.0) / 64.0;
		}
	}

	pub fn expression(&mut self, channel: usize, expression: u8) {
		if let Some(ch) = self.channel_mut(channel) {
			ch.set_expression(expression.min(127));
		}
	}

	pub fn pitch_bend(&mut self, channel: usize, pitch_bend: i16) {
		if let Some(ch) = self.channel_mut(channel) {
			ch.set_pitch_bend(pitch_bend.clamp(-8192, 8191));
		}
	}

	pub fn pitch_bend_sensitivity(&mut self, channel: usize, semitones: f64) {
		if let Some(ch) = self.channel_mut(channel) {
			ch.set_pitch_bend_sensitivity(semitones);
		}
	}

	pub fn release_time(&mut self, channel: usize, release_time: u8) {
		if let Some(ch) = self.channel_mut(channel) {
			ch.release_time = release_time.min(127);
		}
	}

	pub fn mute(&mut self, channel: usize, mute: bool) {
		if let Some(ch) = self.channel_mut(channel) {
			ch.mute = mute;
		}
	}

	pub fn all_sound_off(&mut self, channel: usize) {
		if let Some(ch) = self.channel_mut(channel) {
			ch.all_sound_off();
		}
	}

	pub fn reset_all_controllers(&mut self, channel: usize) {
		if let Some(ch) = self.channel_mut(channel) {
			ch.reset_all_controllers();
		}
	}

	/// number of voices still sounding (or releasing) across all channels
	pub fn active_voice_count(&mut self) -> usize {
		self.channels
			.iter_mut()
			.map(|ch| {
				ch.prune();
				ch.active_notes().len()
			})
			.sum()
	}
}
