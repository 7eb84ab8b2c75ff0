// builds small sf2 files in memory for tests.
use crate::generator::{GenAmount, Generator, GeneratorType, RangeValue};

pub(crate) fn chunk(tag: &str, payload: &[u8]) -> Vec<u8> {
	let mut out = Vec::with_capacity(payload.len() + 9);
	out.extend_from_slice(tag.as_bytes());
	out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
	out.extend_from_slice(payload);
	if payload.len() % 2 == 1 {
		out.push(0);
	}
	out
}

pub(crate) fn list(tag: &str, form: &str, children: &[Vec<u8>]) -> Vec<u8> {
	let mut payload = form.as_bytes().to_vec();
	for child in children {
		payload.extend_from_slice(child);
	}
	chunk(tag, &payload)
}

pub(crate) fn gen(ty: GeneratorType, amount: i16) -> Generator {
	Generator::new(ty, GenAmount::Int(amount))
}

pub(crate) fn range(ty: GeneratorType, lo: u8, hi: u8) -> Generator {
	Generator::new(ty, GenAmount::Range(RangeValue::new(lo, hi)))
}

fn name20(name: &str) -> [u8; 20] {
	let mut bytes = [0; 20];
	for (dst, src) in bytes.iter_mut().zip(name.bytes()) {
		*dst = src;
	}
	bytes
}

fn write_generator(out: &mut Vec<u8>, gen: &Generator) {
	out.extend_from_slice(&gen.code.to_le_bytes());
	match gen.amount {
		GenAmount::Int(i) => out.extend_from_slice(&i.to_le_bytes()),
		GenAmount::Range(r) => out.extend_from_slice(&[r.lo, r.hi]),
	}
}

pub(crate) struct FixtureSample {
	pub name: String,
	pub data: Vec<i16>,
	/// relative to the start of the sample
	pub loop_start: u32,
	pub loop_end: u32,
	pub sample_rate: u32,
	pub original_pitch: u8,
	pub pitch_correction: i8,
}

pub(crate) struct FixturePreset {
	pub name: String,
	pub preset: u16,
	pub bank: u16,
	pub zones: Vec<Vec<Generator>>,
}

pub(crate) struct FixtureInstrument {
	pub name: String,
	pub zones: Vec<Vec<Generator>>,
}

pub(crate) struct FixtureBank {
	pub name: String,
	pub presets: Vec<FixturePreset>,
	pub instruments: Vec<FixtureInstrument>,
	pub samples: Vec<FixtureSample>,
}

impl FixtureBank {
	pub fn new(name: &str) -> Self {
		Self {
			name: name.to_string(),
			presets: vec![],
			instruments: vec![],
			samples: vec![],
		}
	}

	pub fn preset(mut self, name: &str, bank: u16, preset: u16, zones: Vec<Vec<Generator>>) -> Self {
		self.presets.push(FixturePreset {
			name: name.to_string(),
			preset,
			bank,
			zones,
		});
		self
	}

	pub fn instrument(mut self, name: &str, zones: Vec<Vec<Generator>>) -> Self {
		self.instruments.push(FixtureInstrument {
			name: name.to_string(),
			zones,
		});
		self
	}

	pub fn sample(mut self, sample: FixtureSample) -> Self {
		self.samples.push(sample);
		self
	}

	pub fn info_list(&self) -> Vec<u8> {
		let mut inam = self.name.as_bytes().to_vec();
		inam.push(0);
		list(
			"LIST",
			"INFO",
			&[
				chunk("ifil", &[2, 0, 1, 0]),
				chunk("isng", b"EMU8000\0"),
				chunk("INAM", &inam),
			],
		)
	}

	/// smpl payload and the (start, end) of each sample in sample points
	fn sample_data(&self) -> (Vec<u8>, Vec<(u32, u32)>) {
		let mut smpl = vec![];
		let mut bounds = vec![];
		for sample in &self.samples {
			let start = (smpl.len() / 2) as u32;
			for s in &sample.data {
				smpl.extend_from_slice(&s.to_le_bytes());
			}
			bounds.push((start, start + sample.data.len() as u32));
			// the format wants 46 zero points after every sample
			smpl.extend_from_slice(&[0; 92]);
		}
		(smpl, bounds)
	}

	pub fn sdta_list(&self) -> Vec<u8> {
		list("LIST", "sdta", &[chunk("smpl", &self.sample_data().0)])
	}

	pub fn pdta_chunks(&self) -> Vec<Vec<u8>> {
		let (phdr, pbag, pmod, pgen) = {
			let mut phdr = vec![];
			let mut pbag = vec![];
			let mut pgen = vec![];
			let mut bag_count = 0u16;
			let mut gen_count = 0u16;
			for p in &self.presets {
				phdr.extend_from_slice(&name20(&p.name));
				phdr.extend_from_slice(&p.preset.to_le_bytes());
				phdr.extend_from_slice(&p.bank.to_le_bytes());
				phdr.extend_from_slice(&bag_count.to_le_bytes());
				phdr.extend_from_slice(&[0; 12]);
				for zone in &p.zones {
					pbag.extend_from_slice(&gen_count.to_le_bytes());
					pbag.extend_from_slice(&0u16.to_le_bytes());
					for g in zone {
						write_generator(&mut pgen, g);
						gen_count += 1;
					}
					bag_count += 1;
				}
			}
			phdr.extend_from_slice(&name20("EOP"));
			phdr.extend_from_slice(&[0; 4]);
			phdr.extend_from_slice(&bag_count.to_le_bytes());
			phdr.extend_from_slice(&[0; 12]);
			pbag.extend_from_slice(&gen_count.to_le_bytes());
			pbag.extend_from_slice(&0u16.to_le_bytes());
			pgen.extend_from_slice(&[0; 4]);
			(phdr, pbag, vec![0; 10], pgen)
		};

		let (inst, ibag, imod, igen) = {
			let mut inst = vec![];
			let mut ibag = vec![];
			let mut igen = vec![];
			let mut bag_count = 0u16;
			let mut gen_count = 0u16;
			for i in &self.instruments {
				inst.extend_from_slice(&name20(&i.name));
				inst.extend_from_slice(&bag_count.to_le_bytes());
				for zone in &i.zones {
					ibag.extend_from_slice(&gen_count.to_le_bytes());
					ibag.extend_from_slice(&0u16.to_le_bytes());
					for g in zone {
						write_generator(&mut igen, g);
						gen_count += 1;
					}
					bag_count += 1;
				}
			}
			inst.extend_from_slice(&name20("EOI"));
			inst.extend_from_slice(&bag_count.to_le_bytes());
			ibag.extend_from_slice(&gen_count.to_le_bytes());
			ibag.extend_from_slice(&0u16.to_le_bytes());
			igen.extend_from_slice(&[0; 4]);
			(inst, ibag, vec![0; 10], igen)
		};

		let mut shdr = vec![];
		let (_, bounds) = self.sample_data();
		for (sample, (start, end)) in self.samples.iter().zip(bounds) {
			shdr.extend_from_slice(&name20(&sample.name));
			shdr.extend_from_slice(&start.to_le_bytes());
			shdr.extend_from_slice(&end.to_le_bytes());
			shdr.extend_from_slice(&(start + sample.loop_start).to_le_bytes());
			shdr.extend_from_slice(&(start + sample.loop_end).to_le_bytes());
			shdr.extend_from_slice(&sample.sample_rate.to_le_bytes());
			shdr.push(sample.original_pitch);
			shdr.push(sample.pitch_correction as u8);
			shdr.extend_from_slice(&0u16.to_le_bytes());
			shdr.extend_from_slice(&1u16.to_le_bytes());
		}
		shdr.extend_from_slice(&name20("EOS"));
		shdr.extend_from_slice(&[0; 26]);

		vec![
			chunk("phdr", &phdr),
			chunk("pbag", &pbag),
			chunk("pmod", &pmod),
			chunk("pgen", &pgen),
			chunk("inst", &inst),
			chunk("ibag", &ibag),
			chunk("imod", &imod),
			chunk("igen", &igen),
			chunk("shdr", &shdr),
		]
	}

	pub fn pdta_list(&self) -> Vec<u8> {
		list("LIST", "pdta", &self.pdta_chunks())
	}

	pub fn build(&self) -> Vec<u8> {
		list(
			"RIFF",
			"sfbk",
			&[self.info_list(), self.sdta_list(), self.pdta_list()],
		)
	}
}

pub(crate) fn ramp_sample(name: &str, len: usize, sample_rate: u32) -> FixtureSample {
	FixtureSample {
		name: name.to_string(),
		data: (0..len as i16).map(|i| i * 100).collect(),
		loop_start: 8,
		loop_end: len as u32 - 8,
		sample_rate,
		original_pitch: 60,
		pitch_correction: 0,
	}
}

/// one preset (bank 0, program 0) → one instrument → one zone covering everything
pub(crate) fn minimal_bank() -> FixtureBank {
	use GeneratorType::*;
	FixtureBank::new("Minimal")
		.preset("Piano", 0, 0, vec![vec![gen(Instrument, 0)]])
		.instrument(
			"Piano",
			vec![vec![range(KeyRange, 0, 127), range(VelRange, 0, 127), gen(SampleId, 0)]],
		)
		.sample(ramp_sample("ramp", 64, 44100))
}
