/// generators: the typed parameters attached to preset and instrument zones.
/// a generator record is a 16-bit code plus a 16-bit amount, which is either a signed
/// integer or (for key/velocity ranges) a pair of bytes.
use crate::error::OpenError;
use crate::stream::Stream;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum GeneratorType {
	StartAddrsOffset = 0,
	EndAddrsOffset = 1,
	StartloopAddrsOffset = 2,
	EndloopAddrsOffset = 3,
	StartAddrsCoarseOffset = 4,
	ModLfoToPitch = 5,
	VibLfoToPitch = 6,
	ModEnvToPitch = 7,
	InitialFilterFc = 8,
	InitialFilterQ = 9,
	ModLfoToFilterFc = 10,
	ModEnvToFilterFc = 11,
	EndAddrsCoarseOffset = 12,
	ModLfoToVolume = 13,
	ChorusEffectsSend = 15,
	ReverbEffectsSend = 16,
	Pan = 17,
	DelayModLfo = 21,
	FreqModLfo = 22,
	DelayVibLfo = 23,
	FreqVibLfo = 24,
	DelayModEnv = 25,
	AttackModEnv = 26,
	HoldModEnv = 27,
	DecayModEnv = 28,
	SustainModEnv = 29,
	ReleaseModEnv = 30,
	KeynumToModEnvHold = 31,
	KeynumToModEnvDecay = 32,
	DelayVolEnv = 33,
	AttackVolEnv = 34,
	HoldVolEnv = 35,
	DecayVolEnv = 36,
	SustainVolEnv = 37,
	ReleaseVolEnv = 38,
	KeynumToVolEnvHold = 39,
	KeynumToVolEnvDecay = 40,
	Instrument = 41,
	KeyRange = 43,
	VelRange = 44,
	StartloopAddrsCoarseOffset = 45,
	Keynum = 46,
	Velocity = 47,
	InitialAttenuation = 48,
	EndloopAddrsCoarseOffset = 50,
	CoarseTune = 51,
	FineTune = 52,
	SampleId = 53,
	SampleModes = 54,
	ScaleTuning = 56,
	ExclusiveClass = 57,
	OverridingRootKey = 58,
	/// unused/reserved codes, and anything past the end of the table.
	/// these are carried through parsing but never stored in a `GeneratorSet`.
	Unknown = u16::MAX,
}

/// number of codes covered by the table (0 through 58)
pub const GENERATOR_CODES: usize = 59;

use GeneratorType::*;

// index = generator code. `None` slots are the unused/reserved codes.
const GENERATOR_TABLE: [Option<GeneratorType>; GENERATOR_CODES] = [
	Some(StartAddrsOffset),
	Some(EndAddrsOffset),
	Some(StartloopAddrsOffset),
	Some(EndloopAddrsOffset),
	Some(StartAddrsCoarseOffset),
	Some(ModLfoToPitch),
	Some(VibLfoToPitch),
	Some(ModEnvToPitch),
	Some(InitialFilterFc),
	Some(InitialFilterQ),
	Some(ModLfoToFilterFc),
	Some(ModEnvToFilterFc),
	Some(EndAddrsCoarseOffset),
	Some(ModLfoToVolume),
	None, // unused1
	Some(ChorusEffectsSend),
	Some(ReverbEffectsSend),
	Some(Pan),
	None, // unused2
	None, // unused3
	None, // unused4
	Some(DelayModLfo),
	Some(FreqModLfo),
	Some(DelayVibLfo),
	Some(FreqVibLfo),
	Some(DelayModEnv),
	Some(AttackModEnv),
	Some(HoldModEnv),
	Some(DecayModEnv),
	Some(SustainModEnv),
	Some(ReleaseModEnv),
	Some(KeynumToModEnvHold),
	Some(KeynumToModEnvDecay),
	Some(DelayVolEnv),
	Some(AttackVolEnv),
	Some(HoldVolEnv),
	Some(DecayVolEnv),
	Some(SustainVolEnv),
	Some(ReleaseVolEnv),
	Some(KeynumToVolEnvHold),
	Some(KeynumToVolEnvDecay),
	Some(Instrument),
	None, // reserved1
	Some(KeyRange),
	Some(VelRange),
	Some(StartloopAddrsCoarseOffset),
	Some(Keynum),
	Some(Velocity),
	Some(InitialAttenuation),
	None, // reserved2
	Some(EndloopAddrsCoarseOffset),
	Some(CoarseTune),
	Some(FineTune),
	Some(SampleId),
	Some(SampleModes),
	None, // reserved3
	Some(ScaleTuning),
	Some(ExclusiveClass),
	Some(OverridingRootKey),
];

impl GeneratorType {
	pub fn from_code(code: u16) -> Self {
		GENERATOR_TABLE
			.get(code as usize)
			.copied()
			.flatten()
			.unwrap_or(Unknown)
	}

	pub fn code(self) -> Option<u16> {
		match self {
			Unknown => None,
			other => Some(other as u16),
		}
	}

	/// whether the amount is a (lo, hi) byte pair rather than a signed integer
	pub fn is_range(self) -> bool {
		matches!(self, KeyRange | VelRange)
	}
}

/// inclusive range of keys or velocities
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RangeValue {
	pub lo: u8,
	pub hi: u8,
}

impl RangeValue {
	pub const FULL: RangeValue = RangeValue { lo: 0, hi: 127 };

	pub fn new(lo: u8, hi: u8) -> Self {
		Self { lo, hi }
	}

	pub fn contains(&self, value: u8) -> bool {
		value >= self.lo && value <= self.hi
	}

	fn read(stream: &mut Stream) -> Result<Self, OpenError> {
		let a = stream.read_u8()?;
		let b = stream.read_u8()?;
		// "LS byte indicates the highest and the MS byte the lowest valid key." (soundfont § 8.1.2)
		// but "TimGM6mb.sf2" seems to disagree. maybe something something endianness.
		Ok(Self::new(u8::min(a, b), u8::max(a, b)))
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GenAmount {
	Int(i16),
	Range(RangeValue),
}

impl GenAmount {
	pub fn as_int(self) -> Option<i16> {
		match self {
			GenAmount::Int(i) => Some(i),
			GenAmount::Range(_) => None,
		}
	}

	/// for sample and instrument indices, which are unsigned
	pub fn as_u16(self) -> Option<u16> {
		self.as_int().map(|i| i as u16)
	}

	pub fn as_range(self) -> Option<RangeValue> {
		match self {
			GenAmount::Range(r) => Some(r),
			GenAmount::Int(_) => None,
		}
	}

	fn read(stream: &mut Stream, ty: GeneratorType) -> Result<Self, OpenError> {
		if ty.is_range() {
			Ok(GenAmount::Range(RangeValue::read(stream)?))
		} else {
			Ok(GenAmount::Int(stream.read_i16()?))
		}
	}
}

/// one pgen/igen record
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Generator {
	pub code: u16,
	pub kind: GeneratorType,
	pub amount: GenAmount,
}

impl Generator {
	pub const SIZE: usize = 4;

	pub fn new(kind: GeneratorType, amount: GenAmount) -> Self {
		Self {
			code: kind.code().unwrap_or(u16::MAX),
			kind,
			amount,
		}
	}

	pub fn read(stream: &mut Stream) -> Result<Self, OpenError> {
		let code = stream.read_u16()?;
		let kind = GeneratorType::from_code(code);
		let amount = GenAmount::read(stream, kind)?;
		Ok(Self { code, kind, amount })
	}
}

/// one pmod/imod record. these are decoded, but nothing plays them yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Modulator {
	pub source: u16,
	pub destination: GeneratorType,
	pub amount: GenAmount,
	pub amount_source: u16,
	pub transform: u16,
}

impl Modulator {
	pub const SIZE: usize = 10;

	pub fn read(stream: &mut Stream) -> Result<Self, OpenError> {
		let source = stream.read_u16()?;
		let destination = GeneratorType::from_code(stream.read_u16()?);
		let amount = GenAmount::read(stream, destination)?;
		let amount_source = stream.read_u16()?;
		let transform = stream.read_u16()?;
		Ok(Self {
			source,
			destination,
			amount,
			amount_source,
			transform,
		})
	}
}

/// the generators of one zone, with an explicit "not set" for each type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneratorSet {
	values: [Option<GenAmount>; GENERATOR_CODES],
}

impl Default for GeneratorSet {
	fn default() -> Self {
		Self::new()
	}
}

impl GeneratorSet {
	pub fn new() -> Self {
		Self {
			values: [None; GENERATOR_CODES],
		}
	}

	/// fold a zone's generator list into a set. later records win;
	/// unknown codes are dropped.
	pub fn from_generators(generators: &[Generator]) -> Self {
		let mut set = Self::new();
		for gen in generators {
			set.set(gen.kind, gen.amount);
		}
		set
	}

	/// built-in values for everything a sounding zone needs.
	/// sampleID, instrument, pan, overridingRootKey, freqVibLFO etc. stay unset.
	pub fn defaults() -> Self {
		let mut set = Self::new();
		set.set(KeyRange, GenAmount::Range(RangeValue::FULL));
		set.set(VelRange, GenAmount::Range(RangeValue::FULL));
		for ty in [
			DelayVolEnv,
			AttackVolEnv,
			HoldVolEnv,
			DecayVolEnv,
			ReleaseVolEnv,
			DelayModEnv,
			AttackModEnv,
			HoldModEnv,
			DecayModEnv,
			ReleaseModEnv,
		] {
			set.set(ty, GenAmount::Int(-12000));
		}
		for ty in [
			SustainVolEnv,
			SustainModEnv,
			ModEnvToPitch,
			ModEnvToFilterFc,
			ModLfoToFilterFc,
			ModLfoToPitch,
			ModLfoToVolume,
			VibLfoToPitch,
			ChorusEffectsSend,
			ReverbEffectsSend,
			DelayModLfo,
			FreqModLfo,
			DelayVibLfo,
			KeynumToModEnvDecay,
			KeynumToModEnvHold,
			KeynumToVolEnvDecay,
			KeynumToVolEnvHold,
			CoarseTune,
			FineTune,
			StartAddrsOffset,
			StartAddrsCoarseOffset,
			EndAddrsOffset,
			EndAddrsCoarseOffset,
			StartloopAddrsOffset,
			StartloopAddrsCoarseOffset,
			EndloopAddrsOffset,
			EndloopAddrsCoarseOffset,
			InitialAttenuation,
			SampleModes,
		] {
			set.set(ty, GenAmount::Int(0));
		}
		set.set(ScaleTuning, GenAmount::Int(100));
		set.set(InitialFilterQ, GenAmount::Int(1));
		set.set(InitialFilterFc, GenAmount::Int(13500));
		set
	}

	pub fn set(&mut self, ty: GeneratorType, amount: GenAmount) {
		if let Some(code) = ty.code() {
			self.values[code as usize] = Some(amount);
		}
	}

	pub fn get(&self, ty: GeneratorType) -> Option<GenAmount> {
		ty.code().and_then(|code| self.values[code as usize])
	}

	pub fn contains(&self, ty: GeneratorType) -> bool {
		self.get(ty).is_some()
	}

	pub fn int(&self, ty: GeneratorType) -> Option<i16> {
		self.get(ty).and_then(GenAmount::as_int)
	}

	pub fn range(&self, ty: GeneratorType) -> Option<RangeValue> {
		self.get(ty).and_then(GenAmount::as_range)
	}

	pub fn len(&self) -> usize {
		self.values.iter().filter(|v| v.is_some()).count()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// every set value of `top` replaces the one in `self`
	pub fn overlay(&self, top: &GeneratorSet) -> GeneratorSet {
		let mut merged = self.clone();
		for (slot, value) in merged.values.iter_mut().zip(top.values.iter()) {
			if value.is_some() {
				*slot = *value;
			}
		}
		merged
	}

	/// defaults ⊑ global ⊑ local
	pub fn merge(
		defaults: &GeneratorSet,
		global: Option<&GeneratorSet>,
		local: &GeneratorSet,
	) -> GeneratorSet {
		match global {
			Some(global) => defaults.overlay(global).overlay(local),
			None => defaults.overlay(local),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn table_maps_codes() {
		assert_eq!(GeneratorType::from_code(0), StartAddrsOffset);
		assert_eq!(GeneratorType::from_code(8), InitialFilterFc);
		assert_eq!(GeneratorType::from_code(41), Instrument);
		assert_eq!(GeneratorType::from_code(43), KeyRange);
		assert_eq!(GeneratorType::from_code(53), SampleId);
		assert_eq!(GeneratorType::from_code(58), OverridingRootKey);
		for code in 0..GENERATOR_CODES as u16 {
			let ty = GeneratorType::from_code(code);
			if ty != Unknown {
				assert_eq!(ty.code(), Some(code));
			}
		}
	}

	#[test]
	fn unmapped_codes_are_unknown() {
		for code in [14, 18, 19, 20, 42, 49, 55, 59, 60, 1000, u16::MAX] {
			assert_eq!(GeneratorType::from_code(code), Unknown, "code {}", code);
		}
		let mut set = GeneratorSet::new();
		set.set(Unknown, GenAmount::Int(5));
		assert!(set.is_empty());
	}

	#[test]
	fn reads_ranges_and_ints() {
		let data = [43, 0, 60, 72, 17, 0, 0x38, 0xff, 14, 0, 1, 0];
		let mut stream = Stream::new(&data, 0);
		let key_range = Generator::read(&mut stream).unwrap();
		assert_eq!(key_range.kind, KeyRange);
		assert_eq!(key_range.amount, GenAmount::Range(RangeValue::new(60, 72)));
		let pan = Generator::read(&mut stream).unwrap();
		assert_eq!(pan.amount, GenAmount::Int(-200));
		let unknown = Generator::read(&mut stream).unwrap();
		assert_eq!(unknown.kind, Unknown);
		assert_eq!(unknown.code, 14);
	}

	#[test]
	fn inverted_range_is_normalized() {
		let data = [44, 0, 100, 20];
		let gen = Generator::read(&mut Stream::new(&data, 0)).unwrap();
		assert_eq!(gen.amount.as_range(), Some(RangeValue::new(20, 100)));
	}

	#[test]
	fn range_bounds_are_inclusive() {
		let range = RangeValue::new(60, 72);
		assert!(range.contains(60));
		assert!(range.contains(72));
		assert!(!range.contains(59));
		assert!(!range.contains(73));
	}

	#[test]
	fn merge_with_disjoint_keys() {
		let defaults = GeneratorSet::from_generators(&[Generator::new(FineTune, GenAmount::Int(1))]);
		let global = GeneratorSet::from_generators(&[Generator::new(CoarseTune, GenAmount::Int(2))]);
		let local = GeneratorSet::from_generators(&[Generator::new(SampleId, GenAmount::Int(3))]);
		let merged = GeneratorSet::merge(&defaults, Some(&global), &local);
		assert_eq!(merged, defaults.overlay(&global).overlay(&local));
		assert_eq!(merged.int(FineTune), Some(1));
		assert_eq!(merged.int(CoarseTune), Some(2));
		assert_eq!(merged.int(SampleId), Some(3));
		assert_eq!(merged.len(), 3);
	}

	#[test]
	fn merge_local_wins_on_collision() {
		let defaults = GeneratorSet::defaults();
		let global = GeneratorSet::from_generators(&[
			Generator::new(InitialFilterFc, GenAmount::Int(8000)),
			Generator::new(AttackVolEnv, GenAmount::Int(-1200)),
		]);
		let local = GeneratorSet::from_generators(&[Generator::new(InitialFilterFc, GenAmount::Int(6000))]);
		let merged = GeneratorSet::merge(&defaults, Some(&global), &local);
		assert_eq!(merged.int(InitialFilterFc), Some(6000));
		assert_eq!(merged.int(AttackVolEnv), Some(-1200));
		assert_eq!(merged.int(ScaleTuning), Some(100));

		let no_global = GeneratorSet::merge(&defaults, None, &local);
		assert_eq!(no_global.int(AttackVolEnv), Some(-12000));
	}

	#[test]
	fn later_generators_win_within_a_zone() {
		let set = GeneratorSet::from_generators(&[
			Generator::new(Pan, GenAmount::Int(100)),
			Generator::new(Pan, GenAmount::Int(-100)),
		]);
		assert_eq!(set.int(Pan), Some(-100));
	}

	#[test]
	fn defaults_leave_references_unset() {
		let defaults = GeneratorSet::defaults();
		assert!(!defaults.contains(SampleId));
		assert!(!defaults.contains(Instrument));
		assert!(!defaults.contains(Pan));
		assert!(!defaults.contains(OverridingRootKey));
		assert!(!defaults.contains(FreqVibLfo));
		assert_eq!(defaults.range(KeyRange), Some(RangeValue::FULL));
		assert_eq!(defaults.int(InitialFilterQ), Some(1));
		assert_eq!(defaults.int(ReleaseModEnv), Some(-12000));
	}
}
