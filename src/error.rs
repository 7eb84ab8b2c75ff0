use crate::riff::FourCC;

/// the file violates the soundfont format, or couldn't be read at all.
/// parsing stops at the first one of these; no partial document is returned.
#[derive(Debug, thiserror::Error)]
pub enum OpenError {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	#[error("truncated data: needed {needed} bytes at offset {offset}")]
	Truncated { offset: usize, needed: usize },
	#[error("invalid chunk type: expected {expected}, found {found}")]
	ChunkType { expected: FourCC, found: FourCC },
	#[error("invalid signature: expected {expected}, found {found}")]
	Signature { expected: FourCC, found: FourCC },
	#[error("{list} list should contain {expected} chunks, not {found}")]
	ChunkCount {
		list: FourCC,
		expected: usize,
		found: usize,
	},
	#[error("bad sound font file: {0}")]
	BadSoundFont(String),
}

/// a lookup ran into data that can't be right.
/// (running into data that just isn't there is `resolver::NotFound`, not this.)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
	#[error("invalid preset generator for bank {bank} program {program}: expected instrument")]
	NotInstrumentTerminated { bank: u16, program: u16 },
	#[error("instrument {instrument} has a zone with no sampleID")]
	MissingSampleId { instrument: u16 },
	#[error("bad reference: {0}")]
	BadReference(String),
}

pub(crate) fn bad_sound_font(s: &str) -> OpenError {
	OpenError::BadSoundFont(s.to_string())
}
