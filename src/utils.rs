//! Little-endian byte codec for the fixed-layout records and the random
//! source used for the placeholder key material.
//!
//! Every record is encoded field by field with its declared width, so the
//! result does not depend on host struct layout or pointer width.

use crate::error::Error;

/// Builds a fresh random generator for key-material placeholders.
///
/// The values only need to be unpredictable enough to look like key data,
/// a later signing stage replaces them.
#[track_caller]
pub fn rand() -> rapidhash::RapidRng {
    use core::hash::BuildHasher;

    let hc64 = std::hash::RandomState::new().hash_one(core::panic::Location::caller());

    let mut seed = [0u8; 24];
    let (head, tail) = seed.split_at_mut(8);
    head.copy_from_slice(&hc64.to_le_bytes());
    for (i, b) in tail.iter_mut().enumerate() {
        *b = i as u8;
    }
    rand::SeedableRng::from_seed(seed)
}

/// Cursor reading little-endian values out of a byte slice.
pub struct ByteReader<'a> {
    src: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(src: &'a [u8]) -> Self {
        Self { src, pos: 0 }
    }

    /// Current offset from the start of the slice.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn array<const N: usize>(&mut self) -> Result<[u8; N], Error> {
        let end = self.pos + N;
        let bytes = self.src.get(self.pos..end).ok_or(Error::FromBytes {
            input_len: self.src.len(),
            expected_len: end,
        })?;
        self.pos = end;

        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, Error> {
        let [b] = self.array::<1>()?;
        Ok(b)
    }

    pub fn u16(&mut self) -> Result<u16, Error> {
        self.array().map(u16::from_le_bytes)
    }

    pub fn u32(&mut self) -> Result<u32, Error> {
        self.array().map(u32::from_le_bytes)
    }

    pub fn u16s<const N: usize>(&mut self) -> Result<[u16; N], Error> {
        let mut out = [0u16; N];
        for v in out.iter_mut() {
            *v = self.u16()?;
        }
        Ok(out)
    }

    pub fn u32s<const N: usize>(&mut self) -> Result<[u32; N], Error> {
        let mut out = [0u32; N];
        for v in out.iter_mut() {
            *v = self.u32()?;
        }
        Ok(out)
    }
}

/// Cursor writing little-endian values into a byte slice.
pub struct ByteWriter<'a> {
    dst: &'a mut [u8],
    pos: usize,
}

impl<'a> ByteWriter<'a> {
    pub fn new(dst: &'a mut [u8]) -> Self {
        Self { dst, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn bytes(&mut self, src: &[u8]) -> Result<(), Error> {
        let end = self.pos + src.len();
        let input_len = self.dst.len();
        let dst = self.dst.get_mut(self.pos..end).ok_or(Error::FromBytes {
            input_len,
            expected_len: end,
        })?;
        dst.copy_from_slice(src);
        self.pos = end;
        Ok(())
    }

    pub fn u8(&mut self, v: u8) -> Result<(), Error> {
        self.bytes(&[v])
    }

    pub fn u16(&mut self, v: u16) -> Result<(), Error> {
        self.bytes(&v.to_le_bytes())
    }

    pub fn u32(&mut self, v: u32) -> Result<(), Error> {
        self.bytes(&v.to_le_bytes())
    }

    pub fn u16s(&mut self, vs: &[u16]) -> Result<(), Error> {
        vs.iter().try_for_each(|&v| self.u16(v))
    }

    pub fn u32s(&mut self, vs: &[u32]) -> Result<(), Error> {
        vs.iter().try_for_each(|&v| self.u32(v))
    }
}

/// A fixed-size record that can be decoded from its on-disk form.
pub trait TryFromBytes: Sized {
    /// Encoded size of the record in bytes.
    const SIZE: usize;

    /// Decodes the record fields in declaration order.
    fn read_fields(reader: &mut ByteReader<'_>) -> Result<Self, Error>;

    /// Rejects records whose content is not acceptable (wrong magic, etc).
    fn validate(src: &Self) -> Result<&Self, Error> {
        Ok(src)
    }

    #[inline]
    #[must_use = "has no side effects"]
    fn from_bytes(src: &[u8]) -> Result<Self, Error> {
        let (head, _rest) = split_bytes(src, Self::SIZE)?;
        let res = Self::read_fields(&mut ByteReader::new(head))?;
        Self::validate(&res)?;
        Ok(res)
    }

    #[inline]
    #[must_use = "has no side effects"]
    fn from_bytes_with_elems(src: &[u8], count: usize) -> Result<Box<[Self]>, Error> {
        let (head, _rest) = split_bytes(src, Self::SIZE * count)?;

        head.chunks_exact(Self::SIZE).map(Self::from_bytes).collect()
    }
}

/// A fixed-size record that can be encoded into its on-disk form.
pub trait AsBytes: TryFromBytes {
    /// Encodes the record fields in declaration order.
    fn write_fields(&self, writer: &mut ByteWriter<'_>) -> Result<(), Error>;

    /// Writes the record at the start of `dst`, leaving the rest untouched.
    #[inline]
    fn write_bytes(&self, dst: &mut [u8]) -> Result<(), Error> {
        let input_len = dst.len();
        let head = dst.get_mut(..Self::SIZE).ok_or(Error::FromBytes {
            input_len,
            expected_len: Self::SIZE,
        })?;
        self.write_fields(&mut ByteWriter::new(head))
    }

    #[inline]
    #[must_use = "has no side effects"]
    fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        let mut out = vec![0; Self::SIZE];
        self.write_bytes(&mut out)?;
        Ok(out)
    }
}

fn split_bytes(bytes: &[u8], expected_byte_len: usize) -> Result<(&[u8], &[u8]), Error> {
    bytes.split_at_checked(expected_byte_len).ok_or(Error::FromBytes {
        input_len: bytes.len(),
        expected_len: expected_byte_len,
    })
}
