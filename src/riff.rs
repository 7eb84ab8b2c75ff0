/// RIFF chunk walking.
/// a chunk is a 4-byte tag, a 4-byte size, and then `size` bytes of payload.
/// RIFF and LIST chunks contain a 4-byte form type followed by more chunks.
use crate::error::OpenError;
use crate::stream::Stream;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCC(pub [u8; 4]);

impl std::fmt::Debug for FourCC {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
		write!(f, "FourCC({})", self)
	}
}

impl std::fmt::Display for FourCC {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
		write!(f, "{}", String::from_utf8_lossy(&self.0))
	}
}

pub const fn fourcc(s: &str) -> FourCC {
	let bytes = s.as_bytes();
	if bytes.len() != 4 {
		panic!("bad fourcc");
	}
	FourCC([bytes[0], bytes[1], bytes[2], bytes[3]])
}

pub const RIFF: FourCC = fourcc("RIFF");
pub const LIST: FourCC = fourcc("LIST");

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Chunk {
	pub tag: FourCC,
	pub size: u32,
	/// where the payload starts in the buffer that was walked
	pub offset: usize,
}

impl Chunk {
	pub fn end(&self) -> usize {
		self.offset + self.size as usize
	}

	pub fn payload<'a>(&self, data: &'a [u8]) -> &'a [u8] {
		&data[self.offset..self.end()]
	}
}

#[derive(Clone, Copy, Debug)]
pub struct WalkOptions {
	/// skip the pad byte after odd-sized chunks
	pub padding: bool,
	/// chunk sizes are big-endian (RIFX)
	pub big_endian: bool,
}

impl Default for WalkOptions {
	fn default() -> Self {
		Self {
			padding: true,
			big_endian: false,
		}
	}
}

/// split `data[offset..offset + length]` into consecutive chunks.
/// this does not descend into containers; use `sub_chunks` for that.
pub fn parse_chunks(
	data: &[u8],
	offset: usize,
	length: usize,
	options: WalkOptions,
) -> Result<Vec<Chunk>, OpenError> {
	let end = offset + length;
	if end > data.len() {
		return Err(OpenError::Truncated {
			offset,
			needed: length,
		});
	}
	let data = &data[..end];
	let mut chunks = vec![];
	let mut pos = offset;
	while pos < end {
		let mut stream = Stream::new(data, pos);
		let tag = stream.read_fourcc()?;
		let size = if options.big_endian {
			stream.read_u32_be()?
		} else {
			stream.read_u32()?
		};
		let chunk = Chunk {
			tag,
			size,
			offset: stream.pos(),
		};
		if chunk.end() > end {
			return Err(OpenError::Truncated {
				offset: chunk.offset,
				needed: size as usize,
			});
		}
		pos = chunk.end();
		// the header is 8 bytes, so the chunk's total size is odd iff its payload size is
		if options.padding && size % 2 == 1 {
			pos += 1;
		}
		chunks.push(chunk);
	}
	Ok(chunks)
}

/// check that `chunk` is a `tag` container of form type `form`, and walk its contents.
pub fn sub_chunks(
	data: &[u8],
	chunk: &Chunk,
	tag: FourCC,
	form: FourCC,
	options: WalkOptions,
) -> Result<Vec<Chunk>, OpenError> {
	if chunk.tag != tag {
		return Err(OpenError::ChunkType {
			expected: tag,
			found: chunk.tag,
		});
	}
	let mut stream = Stream::new(data, chunk.offset);
	let signature = stream.read_fourcc()?;
	if signature != form {
		return Err(OpenError::Signature {
			expected: form,
			found: signature,
		});
	}
	if chunk.size < 4 {
		return Err(OpenError::Truncated {
			offset: chunk.offset,
			needed: 4,
		});
	}
	parse_chunks(data, stream.pos(), chunk.size as usize - 4, options)
}
