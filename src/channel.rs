/// per-channel controller state and the notes sounding on it.
use crate::voice::{AudioSink, InstrumentState, NoteVoice};

/// bank used for percussion channels
pub const PERCUSSION_BANK: u16 = 128;

pub struct ActiveNote {
	pub voice: NoteVoice,
	/// false once the key's been let go (the note may still be held by the pedal)
	pub key_down: bool,
	// note-off has been sent to the voice
	released: bool,
}

pub struct Channel {
	pub index: u8,
	pub bank: u16,
	pub program: u16,
	/// 0..1
	pub volume: f64,
	/// -1..1
	pub panpot: f64,
	pub pitch_bend: i16,
	/// semitones
	pub pitch_bend_sensitivity: f64,
	pub expression: u8,
	pub release_time: u8,
	pub hold: bool,
	pub mute: bool,
	pub percussion: bool,
	notes: Vec<ActiveNote>,
}

impl Channel {
	pub fn new(index: u8) -> Self {
		Self {
			index,
			bank: 0,
			program: 0,
			volume: 100.0 / 127.0,
			panpot: 0.0,
			pitch_bend: 0,
			pitch_bend_sensitivity: 2.0,
			expression: 127,
			release_time: 64,
			hold: false,
			mute: false,
			percussion: index == 9,
			notes: vec![],
		}
	}

	/// the bank presets are looked up in
	pub fn effective_bank(&self) -> u16 {
		if self.percussion {
			PERCUSSION_BANK
		} else {
			self.bank
		}
	}

	pub fn instrument_state(&self, key: u8, velocity: u8) -> InstrumentState {
		InstrumentState {
			channel: self.index,
			key,
			velocity,
			volume: self.volume,
			panpot: self.panpot,
			pitch_bend: self.pitch_bend,
			pitch_bend_sensitivity: self.pitch_bend_sensitivity,
			expression: self.expression,
			mute: self.mute,
			release_time: self.release_time,
		}
	}

	pub fn active_notes(&self) -> &[ActiveNote] {
		&self.notes
	}

	/// forget voices that have finished playing
	pub fn prune(&mut self) {
		self.notes.retain(|n| !n.voice.is_finished());
	}

	/// a voice with an exclusive class cuts off whatever else of that class is sounding here
	pub fn note_on(&mut self, mut voice: NoteVoice, sink: &dyn AudioSink) {
		let class = voice.exclusive_class();
		if class != 0 {
			for note in self.notes.iter().filter(|n| n.voice.exclusive_class() == class) {
				note.voice.stop();
			}
		}
		self.prune();
		voice.note_on(sink);
		self.notes.push(ActiveNote {
			voice,
			key_down: true,
			released: false,
		});
	}

	pub fn note_off(&mut self, key: u8) {
		self.prune();
		let hold = self.hold;
		for note in self.notes.iter_mut() {
			if note.voice.key() == key && note.key_down {
				note.key_down = false;
				if !hold {
					note.voice.note_off();
					note.released = true;
				}
			}
		}
	}

	pub fn set_hold(&mut self, down: bool) {
		self.hold = down;
		if down {
			return;
		}
		// release everything that was only being held by the pedal
		for note in self.notes.iter_mut() {
			if !note.key_down && !note.released {
				note.voice.note_off();
				note.released = true;
			}
		}
	}

	pub fn set_expression(&mut self, expression: u8) {
		self.expression = expression;
		for note in self.notes.iter_mut() {
			note.voice.update_expression(expression);
		}
	}

	pub fn set_pitch_bend(&mut self, pitch_bend: i16) {
		self.pitch_bend = pitch_bend;
		for note in self.notes.iter_mut() {
			note.voice.update_pitch_bend(pitch_bend);
		}
	}

	pub fn set_pitch_bend_sensitivity(&mut self, semitones: f64) {
		self.pitch_bend_sensitivity = semitones;
		for note in self.notes.iter_mut() {
			note.voice.update_pitch_bend_sensitivity(semitones);
		}
	}

	/// cut every voice off now, with no release
	pub fn all_sound_off(&mut self) {
		for note in self.notes.drain(..) {
			note.voice.stop();
		}
	}

	pub fn reset_all_controllers(&mut self) {
		self.set_expression(127);
		self.set_pitch_bend(0);
		self.set_hold(false);
	}
}
