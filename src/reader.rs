use crate::{Error, ErrorDetails, Result};

/// Random-access cursor over two concatenated byte slices.
///
/// Broadcast subtitle data frequently arrives as a primary buffer plus a short
/// secondary continuation (e.g. a PES payload split across the tail of one host
/// buffer and the head of the next). Modeling the reader as a pair of slices lets
/// every parser treat the two as one contiguous stream without a copy up front.
///
/// # Example
///
/// ```
/// use subtitle_decoder::reader::ByteReader;
/// let a = [0x12, 0x34];
/// let b = [0x56];
/// let mut reader = ByteReader::new(&a, &b);
/// assert_eq!(reader.read_u8()?, 0x12);
/// assert_eq!(reader.read_u16_be()?, 0x3456);
/// # Ok::<(), subtitle_decoder::Error>(())
/// ```
#[derive(Debug, Clone, Copy)]
pub struct ByteReader<'a> {
    primary: &'a [u8],
    secondary: &'a [u8],
    location: usize,
}

impl<'a> ByteReader<'a> {
    /// Builds a reader over `primary` followed by `secondary`.
    pub fn new(primary: &'a [u8], secondary: &'a [u8]) -> Self {
        Self {
            primary,
            secondary,
            location: 0,
        }
    }

    /// Builds a reader over a single contiguous slice.
    pub fn single(slice: &'a [u8]) -> Self {
        Self::new(slice, &[])
    }

    /// Creates an [`Error`] anchored at the reader's current location.
    pub fn make_error(&self, details: ErrorDetails) -> Error {
        Error {
            location: self.location,
            details,
        }
    }

    /// Number of bytes remaining across both chunks.
    pub fn remaining_len(&self) -> usize {
        self.primary.len() + self.secondary.len()
    }

    /// Advances `n` bytes without returning them.
    pub fn skip_n(&mut self, n: usize) -> Result<()> {
        if n > self.remaining_len() {
            return Err(self.make_error(ErrorDetails::ReaderExhausted(n)));
        }
        if n <= self.primary.len() {
            self.primary = &self.primary[n..];
        } else {
            let from_secondary = n - self.primary.len();
            self.primary = &[];
            self.secondary = &self.secondary[from_secondary..];
        }
        self.location += n;
        Ok(())
    }

    /// Carves a fixed `length` sub-reader at the current position and advances
    /// past it. The sub-reader may itself straddle the primary/secondary boundary.
    pub fn new_sub_reader(&mut self, length: usize) -> Result<ByteReader<'a>> {
        if length > self.remaining_len() {
            return Err(self.make_error(ErrorDetails::ReaderExhausted(length)));
        }
        let location = self.location;
        let out = if length <= self.primary.len() {
            let (left, right) = self.primary.split_at(length);
            self.primary = right;
            ByteReader {
                primary: left,
                secondary: &[],
                location,
            }
        } else {
            let primary_part = self.primary;
            let from_secondary = length - primary_part.len();
            self.primary = &[];
            let (left, right) = self.secondary.split_at(from_secondary);
            self.secondary = right;
            ByteReader {
                primary: primary_part,
                secondary: left,
                location,
            }
        };
        self.location += length;
        Ok(out)
    }

    /// Reads one byte without advancing.
    pub fn peek_u8(&self) -> Result<u8> {
        if let Some(b) = self.primary.first() {
            Ok(*b)
        } else if let Some(b) = self.secondary.first() {
            Ok(*b)
        } else {
            Err(self.make_error(ErrorDetails::ReaderExhausted(1)))
        }
    }

    /// Reads a fixed-size byte array, copying across the chunk boundary if needed.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        if N > self.remaining_len() {
            return Err(self.make_error(ErrorDetails::ReaderExhausted(N)));
        }
        let mut out = [0_u8; N];
        let from_primary = N.min(self.primary.len());
        out[..from_primary].copy_from_slice(&self.primary[..from_primary]);
        self.primary = &self.primary[from_primary..];
        if from_primary < N {
            let remaining = N - from_primary;
            out[from_primary..].copy_from_slice(&self.secondary[..remaining]);
            self.secondary = &self.secondary[remaining..];
        }
        self.location += N;
        Ok(out)
    }

    /// Reads one byte interpreted as [`u8`].
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    /// Reads two bytes interpreted as big-endian [`u16`].
    pub fn read_u16_be(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.read_array::<2>()?))
    }

    /// Reads three bytes interpreted as big-endian `u24`, returned widened to [`u32`].
    pub fn read_u24_be(&mut self) -> Result<u32> {
        let b = self.read_array::<3>()?;
        Ok(u32::from_be_bytes([0, b[0], b[1], b[2]]))
    }

    /// Reads the remainder of the reader into one contiguous owned buffer.
    pub fn read_to_end(&mut self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.remaining_len());
        out.extend_from_slice(self.primary);
        out.extend_from_slice(self.secondary);
        self.primary = &[];
        self.secondary = &[];
        out
    }

    /// Byte offset of the next unread byte, relative to the reader's origin.
    pub fn location(&self) -> usize {
        self.location
    }
}

/// Convenience macro reading a `modular_bitfield_msb` bitfield from a [`ByteReader`].
///
/// Expands to a `read_array::<N>()?` call sized to the bitfield's byte width, feeding
/// the result to `from_bytes`. Must be expanded in a function returning [`Result`].
#[macro_export]
macro_rules! read_bitfield {
    ($reader:expr, $type:ty) => {
        <$type>::from_bytes($reader.read_array::<{ std::mem::size_of::<$type>() }>()?)
    };
}

/// MSB-first bit-level cursor layered on a [`ByteReader`].
///
/// Reads 1 to 8 bits per call, refilling its 32-bit staging buffer from the
/// underlying byte reader only when a read would underflow it. Never consumes a
/// byte it does not end up returning bits from.
pub struct BitReader<'a> {
    bytes: ByteReader<'a>,
    staging: u32,
    bit_count: u32,
}

impl<'a> BitReader<'a> {
    /// Builds a bit reader over the given byte reader.
    pub fn new(bytes: ByteReader<'a>) -> Self {
        Self {
            bytes,
            staging: 0,
            bit_count: 0,
        }
    }

    /// Number of whole bits remaining, counting both staged and unread bytes.
    pub fn remaining_bits(&self) -> usize {
        self.bit_count as usize + self.bytes.remaining_len() * 8
    }

    fn refill(&mut self) -> Result<()> {
        while self.bit_count <= 24 && self.bytes.remaining_len() > 0 {
            let byte = self.bytes.read_u8()?;
            self.staging |= (byte as u32) << (24 - self.bit_count);
            self.bit_count += 8;
        }
        Ok(())
    }

    /// Reads `width` bits (1..=8) MSB-first and returns them right-aligned.
    pub fn read_bits(&mut self, width: u32) -> Result<u8> {
        debug_assert!((1..=8).contains(&width));
        if self.bit_count < width {
            self.refill()?;
            if self.bit_count < width {
                return Err(self
                    .bytes
                    .make_error(ErrorDetails::ReaderExhausted(width as usize)));
            }
        }
        let value = (self.staging >> (32 - width)) as u8;
        self.staging <<= width;
        self.bit_count -= width;
        Ok(value)
    }

    /// Reads a single bit as a [`bool`].
    pub fn read_bit(&mut self) -> Result<bool> {
        Ok(self.read_bits(1)? != 0)
    }

    /// Discards any partially-read byte and returns the underlying byte reader,
    /// positioned at the next whole byte boundary.
    pub fn into_byte_reader(self) -> ByteReader<'a> {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_reader_crosses_chunk_boundary() {
        let a = [0x01, 0x02];
        let b = [0x03, 0x04, 0x05];
        let mut reader = ByteReader::new(&a, &b);
        assert_eq!(reader.read_array::<4>().unwrap(), [0x01, 0x02, 0x03, 0x04]);
        assert_eq!(reader.read_u8().unwrap(), 0x05);
        assert!(reader.read_u8().is_err());
    }

    #[test]
    fn sub_reader_spans_boundary() {
        let a = [0xAA, 0xBB];
        let b = [0xCC, 0xDD];
        let mut reader = ByteReader::new(&a, &b);
        let mut sub = reader.new_sub_reader(3).unwrap();
        assert_eq!(sub.read_array::<3>().unwrap(), [0xAA, 0xBB, 0xCC]);
        assert_eq!(reader.read_u8().unwrap(), 0xDD);
    }

    #[test]
    fn skip_n_advances_across_chunks() {
        let a = [0u8; 2];
        let b = [1u8, 2];
        let mut reader = ByteReader::new(&a, &b);
        reader.skip_n(3).unwrap();
        assert_eq!(reader.read_u8().unwrap(), 2);
    }

    #[test]
    fn bit_reader_msb_first() {
        // 0b1011_0010
        let data = [0xB2];
        let mut bits = BitReader::new(ByteReader::single(&data));
        assert_eq!(bits.read_bits(2).unwrap(), 0b10);
        assert_eq!(bits.read_bits(3).unwrap(), 0b110);
        assert_eq!(bits.read_bits(3).unwrap(), 0b010);
    }

    #[test]
    fn bit_reader_refills_lazily() {
        let data = [0xFF, 0x00, 0xFF];
        let mut bits = BitReader::new(ByteReader::single(&data));
        assert_eq!(bits.read_bits(4).unwrap(), 0xF);
        assert_eq!(bits.remaining_bits(), 20);
        for _ in 0..4 {
            assert_eq!(bits.read_bits(4).unwrap(), 0xF);
        }
        for _ in 0..2 {
            assert_eq!(bits.read_bits(4).unwrap(), 0x0);
        }
    }

    #[test]
    fn bit_reader_exhausted() {
        let data = [0x00];
        let mut bits = BitReader::new(ByteReader::single(&data));
        bits.read_bits(8).unwrap();
        assert!(bits.read_bits(1).is_err());
    }
}
