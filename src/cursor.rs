use byteorder::{BigEndian, ByteOrder, LittleEndian};

/// Forward-only reader over a frame. Every read checks the remaining
/// length first and returns `None` instead of indexing past the end.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        ByteCursor { data, pos: 0 }
    }

    pub fn at(data: &'a [u8], pos: usize) -> Option<Self> {
        if pos > data.len() {
            return None;
        }
        Some(ByteCursor { data, pos })
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn skip(&mut self, n: usize) -> Option<()> {
        self.take(n).map(|_| ())
    }

    pub fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if n > self.remaining() {
            return None;
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Some(slice)
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    pub fn read_u16_le(&mut self) -> Option<u16> {
        self.take(2).map(LittleEndian::read_u16)
    }

    pub fn read_u16_be(&mut self) -> Option<u16> {
        self.take(2).map(BigEndian::read_u16)
    }

    pub fn read_array<const N: usize>(&mut self) -> Option<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Some(out)
    }
}
