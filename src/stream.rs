//! little-endian reads off a byte slice.
//! every read is bounds-checked; running off the end is `OpenError::Truncated`.
use crate::error::OpenError;
use crate::riff::FourCC;

pub struct Stream<'a> {
	data: &'a [u8],
	pos: usize,
}

impl<'a> Stream<'a> {
	pub fn new(data: &'a [u8], pos: usize) -> Self {
		Self { data, pos }
	}

	pub fn pos(&self) -> usize {
		self.pos
	}

	fn take(&mut self, len: usize) -> Result<&'a [u8], OpenError> {
		let end = self.pos.checked_add(len).filter(|&end| end <= self.data.len());
		match end {
			Some(end) => {
				let bytes = &self.data[self.pos..end];
				self.pos = end;
				Ok(bytes)
			}
			None => Err(OpenError::Truncated {
				offset: self.pos,
				needed: len,
			}),
		}
	}

	fn take_array<const N: usize>(&mut self) -> Result<[u8; N], OpenError> {
		let mut bytes = [0; N];
		bytes.copy_from_slice(self.take(N)?);
		Ok(bytes)
	}

	pub fn read_u8(&mut self) -> Result<u8, OpenError> {
		Ok(self.take_array::<1>()?[0])
	}

	pub fn read_i8(&mut self) -> Result<i8, OpenError> {
		Ok(self.read_u8()? as i8)
	}

	pub fn read_u16(&mut self) -> Result<u16, OpenError> {
		Ok(u16::from_le_bytes(self.take_array()?))
	}

	pub fn read_i16(&mut self) -> Result<i16, OpenError> {
		Ok(self.read_u16()? as i16)
	}

	pub fn read_u32(&mut self) -> Result<u32, OpenError> {
		Ok(u32::from_le_bytes(self.take_array()?))
	}

	pub fn read_u32_be(&mut self) -> Result<u32, OpenError> {
		Ok(u32::from_be_bytes(self.take_array()?))
	}

	pub fn read_fourcc(&mut self) -> Result<FourCC, OpenError> {
		Ok(FourCC(self.take_array()?))
	}

	/// reads `len` bytes and keeps everything before the first NUL.
	pub fn read_string(&mut self, len: usize) -> Result<String, OpenError> {
		let bytes = self.take(len)?;
		let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
		Ok(String::from_utf8_lossy(&bytes[..end]).to_string())
	}
}
