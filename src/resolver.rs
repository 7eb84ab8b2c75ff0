/// ZONE RESOLUTION.
/// walks preset → instrument → sample for one (bank, program, key, velocity)
/// and folds the generators it passes into the parameters of a single note.
use std::fmt;
use std::sync::Arc;

use crate::error::ResolveError;
use crate::generator::{GenAmount, Generator, GeneratorSet, GeneratorType, RangeValue};
use crate::soundfont::{Bag, SoundFont};

use GeneratorType::*;

/// the velocity used when the caller doesn't have one
pub const DEFAULT_VELOCITY: u8 = 100;

/// 440 × 2^((v − 6900)/1200): absolute cents to Hz
pub fn amp_to_freq(value: f64) -> f64 {
	440.0 * f64::powf(2.0, (value - 6900.0) / 1200.0)
}

pub fn timecents_to_seconds(timecents: f64) -> f64 {
	f64::powf(2.0, timecents / 1200.0)
}

/// the request was fine, the bank just doesn't have it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotFound {
	Preset {
		bank: u16,
		program: u16,
	},
	Zone {
		bank: u16,
		program: u16,
		key: u8,
		velocity: u8,
	},
}

impl fmt::Display for NotFound {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			NotFound::Preset { bank, program } => {
				write!(f, "preset not found: bank={} program={}", bank, program)
			}
			NotFound::Zone {
				bank,
				program,
				key,
				velocity,
			} => write!(
				f,
				"instrument zone not found: bank={} program={} key={} velocity={}",
				bank, program, key, velocity
			),
		}
	}
}

#[derive(Clone, Debug)]
pub enum Resolution {
	Found(Box<NoteParameters>),
	NotFound(NotFound),
}

impl Resolution {
	pub fn found(self) -> Option<NoteParameters> {
		match self {
			Resolution::Found(params) => Some(*params),
			Resolution::NotFound(_) => None,
		}
	}
}

/// delay/attack/hold/decay/release in seconds, sustain as a fraction (generator/1000)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Envelope {
	pub delay: f64,
	pub attack: f64,
	pub hold: f64,
	pub decay: f64,
	pub sustain: f64,
	pub release: f64,
}

impl Envelope {
	fn from_generators(
		gens: &GeneratorSet,
		[delay, attack, hold, decay, sustain, release]: [GeneratorType; 6],
	) -> Self {
		let seconds = |ty| timecents_to_seconds(int(gens, ty));
		Self {
			delay: seconds(delay),
			attack: seconds(attack),
			hold: seconds(hold),
			decay: seconds(decay),
			sustain: int(gens, sustain) / 1000.0,
			release: seconds(release),
		}
	}
}

/// everything needed to play one note. built fresh for each lookup.
#[derive(Clone, Debug)]
pub struct NoteParameters {
	pub sample_id: u16,
	pub sample_name: String,
	pub sample: Arc<[i16]>,
	pub sample_rate: u32,
	pub key_range: RangeValue,
	pub vel_range: RangeValue,
	/// semitones to add to the key before converting to a rate
	pub base_pitch: f64,
	/// scaleTuning / 100
	pub scale_tuning: f64,
	/// sample point offsets; `end` is relative to the end of the sample data
	pub start: i64,
	pub end: i64,
	/// relative to the start of the sample
	pub loop_start: i64,
	pub loop_end: i64,
	pub sample_modes: u16,
	pub volume: Envelope,
	pub modulation: Envelope,
	/// semitones
	pub mod_env_to_pitch: f64,
	/// cents
	pub mod_env_to_filter_fc: f64,
	/// absolute cents
	pub initial_filter_fc: f64,
	/// centibels
	pub initial_filter_q: f64,
	pub initial_attenuation: f64,
	/// raw generator value, −500..500 = left..right
	pub pan: Option<i16>,
	/// Hz
	pub freq_vib_lfo: Option<f64>,
	pub exclusive_class: Option<i16>,
}

impl NoteParameters {
	/// 2^((key + basePitch) × scaleTuning / 12)
	pub fn playback_rate(&self, key: u8) -> f64 {
		f64::powf(2.0, (key as f64 + self.base_pitch) * self.scale_tuning / 12.0)
	}
}

fn int(gens: &GeneratorSet, ty: GeneratorType) -> f64 {
	gens.int(ty).unwrap_or(0) as f64
}

// coarse × 32768 + fine
fn address(gens: &GeneratorSet, coarse: GeneratorType, fine: GeneratorType) -> i64 {
	gens.int(coarse).unwrap_or(0) as i64 * 32768 + gens.int(fine).unwrap_or(0) as i64
}

/// the generators of zone `index` of a bag table. a zone runs up to the next zone's
/// first generator, or to the end of the table for the last one.
fn zone_generators<'a>(bags: &[Bag], generators: &'a [Generator], index: usize) -> Result<&'a [Generator], ResolveError> {
	let bag = bags.get(index).ok_or_else(|| {
		ResolveError::BadReference(format!("zone {} out of range ({} zones)", index, bags.len()))
	})?;
	let start = bag.generator_index as usize;
	let end = match bags.get(index + 1) {
		Some(next) => next.generator_index as usize,
		None => generators.len(),
	};
	generators.get(start..end).ok_or_else(|| {
		ResolveError::BadReference(format!(
			"generators {}..{} out of range ({} generators)",
			start,
			end,
			generators.len()
		))
	})
}

fn instrument_id(gens: &[Generator], bank: u16, program: u16) -> Result<u16, ResolveError> {
	match gens.last() {
		Some(Generator {
			kind: Instrument,
			amount: GenAmount::Int(id),
			..
		}) => Ok(*id as u16),
		_ => Err(ResolveError::NotInstrumentTerminated { bank, program }),
	}
}

fn zone_matches(zone: &GeneratorSet, key: u8, velocity: u8) -> bool {
	// a zone with no key range never matches
	let in_key_range = zone.range(KeyRange).map_or(false, |r| r.contains(key));
	let in_vel_range = zone.range(VelRange).map_or(true, |r| r.contains(velocity));
	in_key_range && in_vel_range
}

impl SoundFont {
	fn preset_generators_of(&self, header: usize) -> Result<&[Generator], ResolveError> {
		let bag_of = |h: usize| {
			let bag_index = self.preset_headers[h].bag_index as usize;
			self.preset_bags.get(bag_index).map(|b| b.generator_index as usize).ok_or_else(|| {
				ResolveError::BadReference(format!(
					"preset {} refers to zone {}, but there are only {} zones",
					h,
					bag_index,
					self.preset_bags.len()
				))
			})
		};
		let start = bag_of(header)?;
		let end = if header + 1 < self.preset_headers.len() {
			bag_of(header + 1)?
		} else {
			self.preset_generators.len()
		};
		self.preset_generators.get(start..end).ok_or_else(|| {
			ResolveError::BadReference(format!("preset generators {}..{} out of range", start, end))
		})
	}

	fn instrument_zones(&self, instrument: u16) -> Result<Vec<GeneratorSet>, ResolveError> {
		let id = instrument as usize;
		let header = self.instruments.get(id).ok_or_else(|| {
			ResolveError::BadReference(format!(
				"preset refers to instrument {}, but there are only {} instruments",
				id,
				self.instruments.len()
			))
		})?;
		let start = header.bag_index as usize;
		let end = match self.instruments.get(id + 1) {
			Some(next) => next.bag_index as usize,
			None => self.instrument_bags.len(),
		};
		(start..end)
			.map(|i| {
				zone_generators(&self.instrument_bags, &self.instrument_generators, i)
					.map(GeneratorSet::from_generators)
			})
			.collect()
	}

	/// find the parameters for playing `key` at `velocity` on a preset.
	/// a bank that simply doesn't cover the request gives `Resolution::NotFound`;
	/// `Err` means the file itself is broken.
	pub fn resolve(&self, bank: u16, program: u16, key: u8, velocity: u8) -> Result<Resolution, ResolveError> {
		let Some(header) = self
			.preset_headers
			.iter()
			.position(|p| p.bank == bank && p.preset == program)
		else {
			let not_found = NotFound::Preset { bank, program };
			log::warn!("{}", not_found);
			return Ok(Resolution::NotFound(not_found));
		};

		let instrument = instrument_id(self.preset_generators_of(header)?, bank, program)?;
		let zones = self.instrument_zones(instrument)?;

		let global = zones.first().filter(|z| !z.contains(SampleId));
		let candidates = &zones[global.map_or(0, |_| 1)..];
		let Some(zone) = candidates.iter().find(|z| zone_matches(z, key, velocity)) else {
			let not_found = NotFound::Zone {
				bank,
				program,
				key,
				velocity,
			};
			log::warn!("{}", not_found);
			return Ok(Resolution::NotFound(not_found));
		};

		let sample_id = zone
			.get(SampleId)
			.and_then(GenAmount::as_u16)
			.ok_or(ResolveError::MissingSampleId { instrument })?;

		let gens = GeneratorSet::merge(&GeneratorSet::defaults(), global, zone);
		self.note_parameters(&gens, sample_id).map(|p| Resolution::Found(Box::new(p)))
	}

	fn note_parameters(&self, gens: &GeneratorSet, sample_id: u16) -> Result<NoteParameters, ResolveError> {
		let id = sample_id as usize;
		let (header, sample) = match (self.sample_headers.get(id), self.samples.get(id)) {
			(Some(header), Some(sample)) => (header, sample),
			_ => {
				return Err(ResolveError::BadReference(format!(
					"zone refers to sample {}, but there are only {} samples",
					id,
					self.sample_headers.len()
				)))
			}
		};

		let root_key = match gens.int(OverridingRootKey) {
			Some(k) if (0..=127).contains(&k) => k as f64,
			_ => header.original_pitch as f64,
		};
		let tune = int(gens, CoarseTune) + int(gens, FineTune) / 100.0;
		let base_pitch = tune + header.pitch_correction as f64 / 100.0 - root_key;

		Ok(NoteParameters {
			sample_id,
			sample_name: header.name.clone(),
			sample: Arc::clone(sample),
			sample_rate: header.sample_rate,
			key_range: gens.range(KeyRange).unwrap_or(RangeValue::FULL),
			vel_range: gens.range(VelRange).unwrap_or(RangeValue::FULL),
			base_pitch,
			scale_tuning: int(gens, ScaleTuning) / 100.0,
			start: address(gens, StartAddrsCoarseOffset, StartAddrsOffset),
			end: address(gens, EndAddrsCoarseOffset, EndAddrsOffset),
			loop_start: header.loop_start as i64
				+ address(gens, StartloopAddrsCoarseOffset, StartloopAddrsOffset),
			loop_end: header.loop_end as i64 + address(gens, EndloopAddrsCoarseOffset, EndloopAddrsOffset),
			sample_modes: gens.int(SampleModes).unwrap_or(0) as u16,
			volume: Envelope::from_generators(
				gens,
				[DelayVolEnv, AttackVolEnv, HoldVolEnv, DecayVolEnv, SustainVolEnv, ReleaseVolEnv],
			),
			modulation: Envelope::from_generators(
				gens,
				[DelayModEnv, AttackModEnv, HoldModEnv, DecayModEnv, SustainModEnv, ReleaseModEnv],
			),
			mod_env_to_pitch: int(gens, ModEnvToPitch) / 100.0,
			mod_env_to_filter_fc: int(gens, ModEnvToFilterFc),
			initial_filter_fc: int(gens, InitialFilterFc),
			initial_filter_q: int(gens, InitialFilterQ),
			initial_attenuation: int(gens, InitialAttenuation),
			pan: gens.int(Pan),
			freq_vib_lfo: gens
				.int(FreqVibLfo)
				.map(|v| timecents_to_seconds(v as f64) * 8.176),
			exclusive_class: gens.int(ExclusiveClass),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::fixture::{gen, minimal_bank, ramp_sample, range, FixtureBank, FixtureSample};
	use approx::assert_relative_eq;

	fn found(sf: &SoundFont, bank: u16, program: u16, key: u8, velocity: u8) -> NoteParameters {
		match sf.resolve(bank, program, key, velocity).unwrap() {
			Resolution::Found(p) => *p,
			Resolution::NotFound(n) => panic!("{}", n),
		}
	}

	fn two_sample_bank() -> FixtureBank {
		FixtureBank::new("split")
			.preset("Split", 0, 0, vec![vec![gen(Instrument, 0)]])
			.instrument(
				"Split",
				vec![
					vec![gen(AttackVolEnv, -1200), gen(Pan, 250)],
					vec![range(KeyRange, 60, 72), gen(SampleId, 1)],
					vec![range(KeyRange, 0, 127), range(VelRange, 0, 63), gen(SampleId, 0)],
				],
			)
			.sample(ramp_sample("low", 32, 44100))
			.sample(ramp_sample("high", 32, 44100))
	}

	#[test]
	fn resolves_minimal_bank() {
		let sf = SoundFont::parse(&minimal_bank().build()).unwrap();
		let p = found(&sf, 0, 0, 60, DEFAULT_VELOCITY);
		assert_eq!(p.sample_id, 0);
		assert_eq!(p.sample_name, "ramp");
		assert_eq!(p.sample.len(), 64);
		assert_eq!(p.sample_rate, 44100);
		assert_eq!(p.loop_start, 8);
		assert_eq!(p.loop_end, 56);
		assert_eq!(p.start, 0);
		assert_eq!(p.end, 0);
		assert_eq!(p.sample_modes, 0);
		assert_eq!(p.pan, None);
		assert_eq!(p.freq_vib_lfo, None);
		assert_relative_eq!(p.scale_tuning, 1.0);
		assert_relative_eq!(p.initial_filter_fc, 13500.0);
		assert_relative_eq!(p.volume.attack, timecents_to_seconds(-12000.0));
		assert_relative_eq!(p.volume.sustain, 0.0);
	}

	#[test]
	fn playback_rate_is_one_at_the_root_key() {
		let sf = SoundFont::parse(&minimal_bank().build()).unwrap();
		let p = found(&sf, 0, 0, 60, 100);
		assert_relative_eq!(p.playback_rate(60), 1.0);
		assert_relative_eq!(p.playback_rate(72), 2.0, epsilon = 1e-12);
		assert_relative_eq!(p.playback_rate(48), 0.5, epsilon = 1e-12);
	}

	#[test]
	fn tuning_generators_shift_the_base_pitch() {
		let mut sample = ramp_sample("tuned", 32, 44100);
		sample.original_pitch = 64;
		sample.pitch_correction = -50;
		let bytes = FixtureBank::new("tuned")
			.preset("t", 0, 0, vec![vec![gen(Instrument, 0)]])
			.instrument(
				"t",
				vec![vec![
					range(KeyRange, 0, 127),
					gen(CoarseTune, 2),
					gen(FineTune, 25),
					gen(ScaleTuning, 50),
					gen(SampleId, 0),
				]],
			)
			.sample(sample)
			.build();
		let sf = SoundFont::parse(&bytes).unwrap();
		let p = found(&sf, 0, 0, 64, 100);
		assert_relative_eq!(p.base_pitch, 2.25 - 0.5 - 64.0);
		assert_relative_eq!(p.scale_tuning, 0.5);
		assert_relative_eq!(p.playback_rate(64), f64::powf(2.0, 1.75 * 0.5 / 12.0));
	}

	#[test]
	fn overriding_root_key_replaces_original_pitch() {
		let bytes = FixtureBank::new("root")
			.preset("r", 0, 0, vec![vec![gen(Instrument, 0)]])
			.instrument(
				"r",
				vec![vec![range(KeyRange, 0, 127), gen(OverridingRootKey, 69), gen(SampleId, 0)]],
			)
			.sample(ramp_sample("s", 32, 44100))
			.build();
		let sf = SoundFont::parse(&bytes).unwrap();
		let p = found(&sf, 0, 0, 69, 100);
		assert_relative_eq!(p.playback_rate(69), 1.0);
	}

	#[test]
	fn key_range_bounds_are_inclusive() {
		let sf = SoundFont::parse(&two_sample_bank().build()).unwrap();
		assert_eq!(found(&sf, 0, 0, 60, 100).sample_id, 1);
		assert_eq!(found(&sf, 0, 0, 72, 100).sample_id, 1);
		// 59 and 73 fall through to the low zone, which only takes soft notes
		assert_eq!(found(&sf, 0, 0, 59, 40).sample_id, 0);
		assert_eq!(found(&sf, 0, 0, 73, 40).sample_id, 0);
		for key in [59, 73] {
			assert!(matches!(
				sf.resolve(0, 0, key, 100).unwrap(),
				Resolution::NotFound(NotFound::Zone { .. })
			));
		}
	}

	#[test]
	fn absent_vel_range_matches_any_velocity() {
		let sf = SoundFont::parse(&two_sample_bank().build()).unwrap();
		for velocity in [0, 1, 64, 127] {
			assert_eq!(found(&sf, 0, 0, 65, velocity).sample_id, 1);
		}
	}

	#[test]
	fn global_zone_is_an_overlay_not_a_candidate() {
		let sf = SoundFont::parse(&two_sample_bank().build()).unwrap();
		let p = found(&sf, 0, 0, 65, 100);
		assert_eq!(p.pan, Some(250));
		assert_relative_eq!(p.volume.attack, 0.5);
		// keys outside both local zones don't pick up the global zone
		assert!(matches!(
			sf.resolve(0, 0, 100, 100).unwrap(),
			Resolution::NotFound(NotFound::Zone { key: 100, .. })
		));
	}

	#[test]
	fn local_zone_overrides_global_zone() {
		let bytes = FixtureBank::new("layers")
			.preset("l", 0, 0, vec![vec![gen(Instrument, 0)]])
			.instrument(
				"l",
				vec![
					vec![gen(InitialFilterFc, 8000), gen(ReleaseVolEnv, 0)],
					vec![range(KeyRange, 0, 127), gen(InitialFilterFc, 9000), gen(SampleId, 0)],
				],
			)
			.sample(ramp_sample("s", 32, 44100))
			.build();
		let sf = SoundFont::parse(&bytes).unwrap();
		let p = found(&sf, 0, 0, 60, 100);
		assert_relative_eq!(p.initial_filter_fc, 9000.0);
		assert_relative_eq!(p.volume.release, 1.0);
		assert_relative_eq!(p.initial_filter_q, 1.0);
	}

	#[test]
	fn addresses_combine_coarse_and_fine_offsets() {
		let bytes = FixtureBank::new("offsets")
			.preset("o", 0, 0, vec![vec![gen(Instrument, 0)]])
			.instrument(
				"o",
				vec![vec![
					range(KeyRange, 0, 127),
					gen(StartAddrsOffset, 4),
					gen(StartAddrsCoarseOffset, 1),
					gen(EndAddrsOffset, -2),
					gen(StartloopAddrsOffset, 1),
					gen(EndloopAddrsOffset, -3),
					gen(EndloopAddrsCoarseOffset, 0),
					gen(SampleModes, 1),
					gen(SampleId, 0),
				]],
			)
			.sample(ramp_sample("s", 32, 44100))
			.build();
		let sf = SoundFont::parse(&bytes).unwrap();
		let p = found(&sf, 0, 0, 60, 100);
		assert_eq!(p.start, 32768 + 4);
		assert_eq!(p.end, -2);
		assert_eq!(p.loop_start, 8 + 1);
		assert_eq!(p.loop_end, 24 - 3);
		assert_eq!(p.sample_modes, 1);
	}

	#[test]
	fn converts_time_and_frequency_generators() {
		let bytes = FixtureBank::new("lfo")
			.preset("l", 0, 0, vec![vec![gen(Instrument, 0)]])
			.instrument(
				"l",
				vec![vec![
					range(KeyRange, 0, 127),
					gen(FreqVibLfo, 1200),
					gen(SustainVolEnv, 250),
					gen(DecayModEnv, 2400),
					gen(ModEnvToPitch, 1200),
					gen(SampleId, 0),
				]],
			)
			.sample(ramp_sample("s", 32, 44100))
			.build();
		let sf = SoundFont::parse(&bytes).unwrap();
		let p = found(&sf, 0, 0, 60, 100);
		assert_relative_eq!(p.freq_vib_lfo.unwrap(), 2.0 * 8.176);
		assert_relative_eq!(p.volume.sustain, 0.25);
		assert_relative_eq!(p.modulation.decay, 4.0);
		assert_relative_eq!(p.mod_env_to_pitch, 12.0);
	}

	#[test]
	fn amp_to_freq_anchors() {
		assert_relative_eq!(amp_to_freq(6900.0), 440.0);
		assert_relative_eq!(amp_to_freq(8100.0), 880.0, epsilon = 1e-9);
		assert_relative_eq!(amp_to_freq(13500.0), 440.0 * f64::powf(2.0, 5.5));
	}

	#[test]
	fn missing_preset_is_not_found() {
		let sf = SoundFont::parse(&minimal_bank().build()).unwrap();
		match sf.resolve(0, 1, 60, 100).unwrap() {
			Resolution::NotFound(n) => {
				assert_eq!(n, NotFound::Preset { bank: 0, program: 1 });
				assert_eq!(n.to_string(), "preset not found: bank=0 program=1");
			}
			Resolution::Found(_) => panic!("program 1 shouldn't exist"),
		}
		assert!(sf.resolve(1, 0, 60, 100).unwrap().found().is_none());
	}

	#[test]
	fn zone_without_key_range_never_matches() {
		let bytes = FixtureBank::new("nokey")
			.preset("n", 0, 0, vec![vec![gen(Instrument, 0)]])
			.instrument("n", vec![vec![gen(SampleId, 0)]])
			.sample(ramp_sample("s", 32, 44100))
			.build();
		let sf = SoundFont::parse(&bytes).unwrap();
		assert!(matches!(
			sf.resolve(0, 0, 60, 100).unwrap(),
			Resolution::NotFound(NotFound::Zone { .. })
		));
	}

	#[test]
	fn preset_not_ending_in_instrument_is_corrupt() {
		let bytes = FixtureBank::new("bad")
			.preset("b", 0, 0, vec![vec![gen(Instrument, 0), gen(Pan, 10)]])
			.instrument("i", vec![vec![range(KeyRange, 0, 127), gen(SampleId, 0)]])
			.sample(ramp_sample("s", 32, 44100))
			.build();
		let sf = SoundFont::parse(&bytes).unwrap();
		assert_eq!(
			sf.resolve(0, 0, 60, 100).unwrap_err(),
			ResolveError::NotInstrumentTerminated { bank: 0, program: 0 }
		);
	}

	#[test]
	fn selected_zone_without_sample_is_corrupt() {
		// the first zone has a sample, so the second one isn't global
		let bytes = FixtureBank::new("bad")
			.preset("b", 0, 0, vec![vec![gen(Instrument, 0)]])
			.instrument(
				"i",
				vec![
					vec![range(KeyRange, 0, 10), gen(SampleId, 0)],
					vec![range(KeyRange, 11, 127)],
				],
			)
			.sample(ramp_sample("s", 32, 44100))
			.build();
		let sf = SoundFont::parse(&bytes).unwrap();
		assert_eq!(found(&sf, 0, 0, 5, 100).sample_id, 0);
		assert_eq!(
			sf.resolve(0, 0, 60, 100).unwrap_err(),
			ResolveError::MissingSampleId { instrument: 0 }
		);
	}

	#[test]
	fn last_preset_runs_to_the_end_of_the_generator_table() {
		let bytes = FixtureBank::new("two")
			.preset("first", 0, 0, vec![vec![gen(Instrument, 0)]])
			.preset("second", 0, 1, vec![vec![gen(CoarseTune, 1), gen(Instrument, 1)]])
			.instrument("a", vec![vec![range(KeyRange, 0, 127), gen(SampleId, 0)]])
			.instrument("b", vec![vec![range(KeyRange, 0, 127), gen(SampleId, 1)]])
			.sample(ramp_sample("a", 32, 44100))
			.sample(FixtureSample {
				name: "b".to_string(),
				data: vec![1; 20],
				loop_start: 2,
				loop_end: 18,
				sample_rate: 32000,
				original_pitch: 60,
				pitch_correction: 0,
			})
			.build();
		let sf = SoundFont::parse(&bytes).unwrap();
		assert_eq!(found(&sf, 0, 0, 60, 100).sample_id, 0);
		let p = found(&sf, 0, 1, 60, 100);
		assert_eq!(p.sample_id, 1);
		assert_eq!(p.sample_rate, 32000);
	}
}
