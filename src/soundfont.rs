/// SOUNDFONT PARSER.
/// supports .sf2 files, as detailed in the SoundFont 2 spec: <http://www.synthfont.com/sfspec24.pdf>
/*
IMPORTANT SOUNDFONT TERMINOLOGY:
 a PRESET is a source you can play from, e.g. "Piano", "Harpsichord", "Choir"
 an INSTRUMENT is an internal group of samples which presets refer to
 (the idea here is that you could, e.g., have presets "Piano 1" and "Piano 2" which use the
  same underlying "Piano" instrument, but different settings like pitch correction, etc.)
 a ZONE (or BAG) is a specially designated interval of keys and velocities.
 the zone controls various settings about how a sample should be played.
 both presets and instruments have zones.
	 a preset zone refers to an instrument
	 an instrument zone refers to a sample
 a SAMPLE is a block of audio data with some properties of how it should be played

the file is kept as the flat tables it's stored as; `resolver` walks them for each note.
*/
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::{bad_sound_font, OpenError};
use crate::generator::{GeneratorType, Generator, Modulator};
use crate::riff::{fourcc, parse_chunks, sub_chunks, Chunk, FourCC, WalkOptions, LIST, RIFF};
use crate::stream::Stream;

const SFBK: FourCC = fourcc("sfbk");
const INFO: FourCC = fourcc("INFO");
const SDTA: FourCC = fourcc("sdta");
const PDTA: FourCC = fourcc("pdta");
const SMPL: FourCC = fourcc("smpl");
const SM24: FourCC = fourcc("sm24");

const PDTA_ORDER: [FourCC; 9] = [
	fourcc("phdr"),
	fourcc("pbag"),
	fourcc("pmod"),
	fourcc("pgen"),
	fourcc("inst"),
	fourcc("ibag"),
	fourcc("imod"),
	fourcc("igen"),
	fourcc("shdr"),
];

/// samples below this rate are doubled until they reach it
pub const MIN_SAMPLE_RATE: u32 = 22050;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VersionTag {
	pub major: u16,
	pub minor: u16,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Info {
	pub name: Option<String>,
	pub version: Option<VersionTag>,
	pub sound_engine: Option<String>,
	pub rom_name: Option<String>,
	pub rom_version: Option<VersionTag>,
	pub creation_date: Option<String>,
	pub engineer: Option<String>,
	pub product: Option<String>,
	pub copyright: Option<String>,
	pub comment: Option<String>,
	pub software: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PresetHeader {
	pub name: String,
	pub preset: u16,
	pub bank: u16,
	pub bag_index: u16,
	pub library: u32,
	pub genre: u32,
	pub morphology: u32,
}

/// pbag/ibag record: where a zone's generators and modulators start
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Bag {
	pub generator_index: u16,
	pub modulator_index: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstrumentHeader {
	pub name: String,
	pub bag_index: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SampleHeader {
	pub name: String,
	pub start: u32,
	pub end: u32,
	/// relative to `start`
	pub loop_start: u32,
	/// relative to `start`
	pub loop_end: u32,
	pub sample_rate: u32,
	pub original_pitch: u8,
	/// in cents
	pub pitch_correction: i8,
	pub sample_link: u16,
	pub sample_type: u16,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SoundFont {
	pub info: Info,
	pub preset_headers: Vec<PresetHeader>,
	pub preset_bags: Vec<Bag>,
	pub preset_modulators: Vec<Modulator>,
	pub preset_generators: Vec<Generator>,
	pub instruments: Vec<InstrumentHeader>,
	pub instrument_bags: Vec<Bag>,
	pub instrument_modulators: Vec<Modulator>,
	pub instrument_generators: Vec<Generator>,
	pub sample_headers: Vec<SampleHeader>,
	/// decoded PCM, one per sample header (after upsampling)
	pub samples: Vec<Arc<[i16]>>,
}

impl PresetHeader {
	const SIZE: usize = 38;

	fn read(stream: &mut Stream) -> Result<Self, OpenError> {
		Ok(Self {
			name: stream.read_string(20)?,
			preset: stream.read_u16()?,
			bank: stream.read_u16()?,
			bag_index: stream.read_u16()?,
			library: stream.read_u32()?,
			genre: stream.read_u32()?,
			morphology: stream.read_u32()?,
		})
	}
}

impl Bag {
	const SIZE: usize = 4;

	fn read(stream: &mut Stream) -> Result<Self, OpenError> {
		Ok(Self {
			generator_index: stream.read_u16()?,
			modulator_index: stream.read_u16()?,
		})
	}
}

impl InstrumentHeader {
	const SIZE: usize = 22;

	fn read(stream: &mut Stream) -> Result<Self, OpenError> {
		Ok(Self {
			name: stream.read_string(20)?,
			bag_index: stream.read_u16()?,
		})
	}
}

impl SampleHeader {
	const SIZE: usize = 46;

	fn read(stream: &mut Stream) -> Result<Self, OpenError> {
		let name = stream.read_string(20)?;
		let start = stream.read_u32()?;
		let end = stream.read_u32()?;
		let loop_start = stream.read_u32()?;
		let loop_end = stream.read_u32()?;
		let sample_rate = stream.read_u32()?;
		let mut original_pitch = stream.read_u8()?;
		if original_pitch == 255 {
			// unpitched instrument
			original_pitch = 60;
		}
		let pitch_correction = stream.read_i8()?;
		let sample_link = stream.read_u16()?;
		let sample_type = stream.read_u16()?;
		Ok(Self {
			name,
			start,
			end,
			loop_start: loop_start.saturating_sub(start),
			loop_end: loop_end.saturating_sub(start),
			sample_rate,
			original_pitch,
			pitch_correction,
			sample_link,
			sample_type,
		})
	}
}

// a terminal record is named EOP/EOI/EOS.
// oddly, musescore's sf3 file has an empty name for the terminal record.
fn is_terminal(name: &str, index: usize, count: usize, terminal: &str) -> bool {
	name == terminal || (index + 1 == count && name.is_empty())
}

/// read fixed-size records until a terminal one (which is returned separately, if found).
fn read_records<T>(
	data: &[u8],
	chunk: &Chunk,
	size: usize,
	read: impl Fn(&mut Stream) -> Result<T, OpenError>,
	is_end: impl Fn(&T, usize, usize) -> bool,
) -> Result<(Vec<T>, Option<T>), OpenError> {
	if chunk.size as usize % size != 0 {
		return Err(OpenError::BadSoundFont(format!(
			"bad {} chunk size ({}) -- should be a multiple of {}",
			chunk.tag, chunk.size, size
		)));
	}
	let count = chunk.size as usize / size;
	let mut stream = Stream::new(data, chunk.offset);
	let mut records = Vec::with_capacity(count);
	for i in 0..count {
		let record = read(&mut stream)?;
		if is_end(&record, i, count) {
			return Ok((records, Some(record)));
		}
		records.push(record);
	}
	Ok((records, None))
}

fn read_all<T>(
	data: &[u8],
	chunk: &Chunk,
	size: usize,
	read: impl Fn(&mut Stream) -> Result<T, OpenError>,
) -> Result<Vec<T>, OpenError> {
	Ok(read_records(data, chunk, size, read, |_, _, _| false)?.0)
}

/// drop the terminal bag and the generator/modulator records it points at,
/// so the last zone of the last preset/instrument runs to the end of the tables.
fn trim_terminal(
	bags: &mut Vec<Bag>,
	generators: &mut Vec<Generator>,
	modulators: &mut Vec<Modulator>,
	terminal_bag: Option<u16>,
) {
	let Some(end) = terminal_bag else {
		return;
	};
	let end = end as usize;
	if let Some(terminal) = bags.get(end).copied() {
		generators.truncate(terminal.generator_index as usize);
		modulators.truncate(terminal.modulator_index as usize);
	}
	bags.truncate(end);
}

fn check_bags(what: &str, headers: impl Iterator<Item = u16>, bags: &[Bag], generators: usize) -> Result<(), OpenError> {
	for bag_index in headers {
		if bag_index as usize > bags.len() {
			return Err(OpenError::BadSoundFont(format!(
				"{} refers to zone {}, but there are only {} zones.",
				what,
				bag_index,
				bags.len()
			)));
		}
	}
	for bag in bags {
		if bag.generator_index as usize > generators {
			return Err(OpenError::BadSoundFont(format!(
				"{} zone refers to generator {}, but there are only {} generators.",
				what, bag.generator_index, generators
			)));
		}
	}
	Ok(())
}

fn parse_info(data: &[u8], chunks: &[Chunk]) -> Result<Info, OpenError> {
	let find = |tag: &str| chunks.iter().find(|c| c.tag == fourcc(tag));
	let string = |tag: &str| -> Result<Option<String>, OpenError> {
		match find(tag) {
			Some(c) => Ok(Some(Stream::new(data, c.offset).read_string(c.size as usize)?)),
			None => Ok(None),
		}
	};
	let version = |tag: &str| -> Result<Option<VersionTag>, OpenError> {
		match find(tag) {
			Some(c) => {
				let mut stream = Stream::new(data, c.offset);
				Ok(Some(VersionTag {
					major: stream.read_u16()?,
					minor: stream.read_u16()?,
				}))
			}
			None => Ok(None),
		}
	};
	Ok(Info {
		name: string("INAM")?,
		version: version("ifil")?,
		sound_engine: string("isng")?,
		rom_name: string("irom")?,
		rom_version: version("iver")?,
		creation_date: string("ICRD")?,
		engineer: string("IENG")?,
		product: string("IPRD")?,
		copyright: string("ICOP")?,
		comment: string("ICMT")?,
		software: string("ISFT")?,
	})
}

fn find_smpl(chunks: &[Chunk]) -> Result<Chunk, OpenError> {
	match chunks {
		[smpl] | [smpl, _] if smpl.tag != SMPL => Err(OpenError::ChunkType {
			expected: SMPL,
			found: smpl.tag,
		}),
		[smpl] => Ok(*smpl),
		[smpl, sm24] if sm24.tag == SM24 => Ok(*smpl),
		[_, other] => Err(OpenError::ChunkType {
			expected: SM24,
			found: other.tag,
		}),
		_ => Err(OpenError::ChunkCount {
			list: SDTA,
			expected: 1,
			found: chunks.len(),
		}),
	}
}

/// double every sample until the rate reaches `MIN_SAMPLE_RATE`.
/// returns the new data and the factor the rate was multiplied by.
pub fn upsample(mut data: Vec<i16>, sample_rate: u32) -> (Vec<i16>, u32) {
	let mut multiply = 1;
	while sample_rate * multiply < MIN_SAMPLE_RATE {
		let mut doubled = Vec::with_capacity(data.len() * 2);
		for s in data {
			doubled.push(s);
			doubled.push(s);
		}
		data = doubled;
		multiply *= 2;
	}
	(data, multiply)
}

fn load_sample(smpl: &[u8], header: &mut SampleHeader) -> Result<Vec<i16>, OpenError> {
	let start = header.start as usize * 2;
	let end = header.end as usize * 2;
	if end < start {
		return Err(OpenError::BadSoundFont(format!(
			"sample {} starts at {}, and ends before then (at {})",
			header.name, header.start, header.end
		)));
	}
	if end > smpl.len() {
		return Err(OpenError::BadSoundFont(format!(
			"sample {} ends at {}, but there are only {} sample points.",
			header.name,
			header.end,
			smpl.len() / 2
		)));
	}
	let data: Vec<i16> = smpl[start..end]
		.chunks_exact(2)
		.map(|b| i16::from_le_bytes([b[0], b[1]]))
		.collect();
	if header.sample_rate == 0 {
		log::warn!("sample {} has a sample rate of 0", header.name);
		return Ok(data);
	}
	let (data, multiply) = upsample(data, header.sample_rate);
	let scale = |value: u32, what: &str| {
		value.checked_mul(multiply).ok_or_else(|| {
			OpenError::BadSoundFont(format!(
				"sample {} has a {} of {}, too big to upsample by {}",
				header.name, what, value, multiply
			))
		})
	};
	let sample_rate = scale(header.sample_rate, "sample rate")?;
	let loop_start = scale(header.loop_start, "loop start")?;
	let loop_end = scale(header.loop_end, "loop end")?;
	header.sample_rate = sample_rate;
	header.loop_start = loop_start;
	header.loop_end = loop_end;
	Ok(data)
}

impl SoundFont {
	/// read a whole .sf2 file into memory and parse it.
	pub fn open(filename: impl AsRef<Path>) -> Result<Self, OpenError> {
		let data = std::fs::read(filename)?;
		Self::parse(&data)
	}

	pub fn parse(data: &[u8]) -> Result<Self, OpenError> {
		Self::parse_with(data, WalkOptions::default())
	}

	pub fn parse_with(data: &[u8], options: WalkOptions) -> Result<Self, OpenError> {
		let top = parse_chunks(data, 0, data.len(), options)?;
		if top.len() != 1 {
			return Err(OpenError::ChunkCount {
				list: RIFF,
				expected: 1,
				found: top.len(),
			});
		}

		let lists = sub_chunks(data, &top[0], RIFF, SFBK, options)?;
		if lists.len() != 3 {
			return Err(OpenError::ChunkCount {
				list: SFBK,
				expected: 3,
				found: lists.len(),
			});
		}

		let info = parse_info(data, &sub_chunks(data, &lists[0], LIST, INFO, options)?)?;
		let smpl = find_smpl(&sub_chunks(data, &lists[1], LIST, SDTA, options)?)?;

		let pdta = sub_chunks(data, &lists[2], LIST, PDTA, options)?;
		if pdta.len() != PDTA_ORDER.len() {
			return Err(OpenError::ChunkCount {
				list: PDTA,
				expected: PDTA_ORDER.len(),
				found: pdta.len(),
			});
		}
		for (chunk, expected) in pdta.iter().zip(PDTA_ORDER) {
			if chunk.tag != expected {
				return Err(OpenError::ChunkType {
					expected,
					found: chunk.tag,
				});
			}
		}
		let [phdr, pbag, pmod, pgen, inst, ibag, imod, igen, shdr] = [
			&pdta[0], &pdta[1], &pdta[2], &pdta[3], &pdta[4], &pdta[5], &pdta[6], &pdta[7], &pdta[8],
		];

		let (preset_headers, eop) = read_records(data, phdr, PresetHeader::SIZE, PresetHeader::read, |p, i, n| {
			is_terminal(&p.name, i, n, "EOP")
		})?;
		let mut preset_bags = read_all(data, pbag, Bag::SIZE, Bag::read)?;
		let mut preset_modulators = read_all(data, pmod, Modulator::SIZE, Modulator::read)?;
		let mut preset_generators = read_all(data, pgen, Generator::SIZE, Generator::read)?;
		trim_terminal(
			&mut preset_bags,
			&mut preset_generators,
			&mut preset_modulators,
			eop.map(|p| p.bag_index),
		);

		let (instruments, eoi) =
			read_records(data, inst, InstrumentHeader::SIZE, InstrumentHeader::read, |i, idx, n| {
				is_terminal(&i.name, idx, n, "EOI")
			})?;
		let mut instrument_bags = read_all(data, ibag, Bag::SIZE, Bag::read)?;
		let mut instrument_modulators = read_all(data, imod, Modulator::SIZE, Modulator::read)?;
		let mut instrument_generators = read_all(data, igen, Generator::SIZE, Generator::read)?;
		trim_terminal(
			&mut instrument_bags,
			&mut instrument_generators,
			&mut instrument_modulators,
			eoi.map(|i| i.bag_index),
		);

		let (mut sample_headers, _) = read_records(data, shdr, SampleHeader::SIZE, SampleHeader::read, |s, i, n| {
			is_terminal(&s.name, i, n, "EOS")
		})?;

		check_bags(
			"preset",
			preset_headers.iter().map(|p| p.bag_index),
			&preset_bags,
			preset_generators.len(),
		)?;
		check_bags(
			"instrument",
			instruments.iter().map(|i| i.bag_index),
			&instrument_bags,
			instrument_generators.len(),
		)?;

		// check instrument & sample indices
		for gen in preset_generators.iter() {
			if gen.kind == GeneratorType::Instrument {
				let inst = gen.amount.as_u16().ok_or_else(|| bad_sound_font("bad instrument generator"))?;
				if inst as usize >= instruments.len() {
					return Err(OpenError::BadSoundFont(format!(
						"preset zone references instrument {}, but there are only {} instruments.",
						inst,
						instruments.len()
					)));
				}
			}
		}
		for gen in instrument_generators.iter() {
			if gen.kind == GeneratorType::SampleId {
				let sample = gen.amount.as_u16().ok_or_else(|| bad_sound_font("bad sampleID generator"))?;
				if sample as usize >= sample_headers.len() {
					return Err(OpenError::BadSoundFont(format!(
						"instrument zone references sample {}, but there are only {} samples.",
						sample,
						sample_headers.len()
					)));
				}
			}
		}

		let smpl_data = smpl.payload(data);
		let mut samples = Vec::with_capacity(sample_headers.len());
		for header in sample_headers.iter_mut() {
			samples.push(Arc::from(load_sample(smpl_data, header)?));
		}

		log::info!(
			"loaded sound font {:?}: {} presets, {} instruments, {} samples",
			info.name.as_deref().unwrap_or(""),
			preset_headers.len(),
			instruments.len(),
			sample_headers.len()
		);

		Ok(SoundFont {
			info,
			preset_headers,
			preset_bags,
			preset_modulators,
			preset_generators,
			instruments,
			instrument_bags,
			instrument_modulators,
			instrument_generators,
			sample_headers,
			samples,
		})
	}

	/// `names[bank][program] = preset name`
	pub fn preset_names(&self) -> BTreeMap<u16, BTreeMap<u16, String>> {
		let mut names: BTreeMap<u16, BTreeMap<u16, String>> = BTreeMap::new();
		for preset in self.preset_headers.iter() {
			names
				.entry(preset.bank)
				.or_default()
				.insert(preset.preset, preset.name.clone());
		}
		names
	}

	/// get the number of presets in this soundfont.
	pub fn preset_count(&self) -> usize {
		self.preset_headers.len()
	}

	/// get the name of the given preset.
	pub fn preset_name(&self, idx: usize) -> Option<&str> {
		self.preset_headers.get(idx).map(|p| p.name.as_str())
	}
}
