/// Bounds-checked big-endian reader over a byte slice.
#[derive(Debug, Clone, Copy)]
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn with_pos(data: &'a [u8], pos: usize) -> Option<Self> {
        if pos > data.len() {
            return None;
        }
        Some(Self { data, pos })
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn advance(&mut self, bytes: usize) -> Option<()> {
        if bytes > self.remaining() {
            return None;
        }
        self.pos += bytes;
        Some(())
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        let byte = *self.data.get(self.pos)?;
        self.pos += 1;
        Some(byte)
    }

    pub fn read_u16_be(&mut self) -> Option<u16> {
        let bytes = self.read_array::<2>()?;
        Some(u16::from_be_bytes(bytes))
    }

    pub fn read_u24_be(&mut self) -> Option<u32> {
        let [a, b, c] = self.read_array::<3>()?;
        Some(u32::from_be_bytes([0, a, b, c]))
    }

    pub fn read_u32_be(&mut self) -> Option<u32> {
        let bytes = self.read_array::<4>()?;
        Some(u32::from_be_bytes(bytes))
    }

    pub fn read_u64_be(&mut self) -> Option<u64> {
        let bytes = self.read_array::<8>()?;
        Some(u64::from_be_bytes(bytes))
    }

    pub fn read_exact(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(len)?;
        let out = self.data.get(self.pos..end)?;
        self.pos = end;
        Some(out)
    }

    pub fn peek_u8_at(&self, offset: usize) -> Option<u8> {
        self.data.get(self.pos.checked_add(offset)?).copied()
    }

    fn read_array<const N: usize>(&mut self) -> Option<[u8; N]> {
        self.read_exact(N)?.try_into().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::Cursor;

    #[test]
    fn reads_big_endian_fields_and_stops_at_end() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07];
        let mut cursor = Cursor::new(&data);
        assert_eq!(cursor.read_u16_be(), Some(0x0102));
        assert_eq!(cursor.read_u24_be(), Some(0x03_0405));
        assert_eq!(cursor.remaining(), 2);
        assert_eq!(cursor.read_u32_be(), None);
        assert_eq!(cursor.peek_u8_at(1), Some(0x07));
        assert_eq!(cursor.advance(2), Some(()));
        assert_eq!(cursor.advance(1), None);
    }
}
