//! # Big-Endian Primitive Encoding
//!
//! `BinaryRead` and `BinaryWrite` provide fixed-width primitive encode and
//! decode on top of two required methods: an exact read and a full write.
//! `VirtualFile` and both transport endpoints implement them, so a value
//! written through one can be read back through any other.
//!
//! ## Formats
//!
//! | Type      | Bytes | Encoding                                  |
//! |-----------|-------|-------------------------------------------|
//! | `bool`    | 1     | `0` or `1` (any non-zero reads as true)   |
//! | `i8/u8`   | 1     | raw                                       |
//! | `i16/u16` | 2     | big-endian                                |
//! | `char`    | 2     | big-endian UTF-16 code unit               |
//! | `i32`     | 4     | big-endian                                |
//! | `i64`     | 8     | big-endian                                |
//! | `f32`     | 4     | big-endian IEEE 754 bit pattern           |
//! | `f64`     | 8     | big-endian IEEE 754 bit pattern           |
//! | text      | 2 + n | modified UTF-8, see [`super::modified_utf8`] |

use eyre::Result;

use super::modified_utf8;

pub trait BinaryRead {
    /// Fills `buf` completely or fails with an end-of-stream error.
    fn read_fully(&mut self, buf: &mut [u8]) -> Result<()>;

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.read_fully(&mut buf)?;
        Ok(buf)
    }

    fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    fn read_i16(&mut self) -> Result<i16> {
        Ok(i16::from_be_bytes(self.read_array()?))
    }

    fn read_char(&mut self) -> Result<u16> {
        self.read_u16()
    }

    fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.read_array()?))
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.read_array()?))
    }

    fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.read_array()?))
    }

    fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(u32::from_be_bytes(self.read_array()?)))
    }

    fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(u64::from_be_bytes(self.read_array()?)))
    }

    fn read_utf(&mut self) -> Result<String> {
        let len = self.read_u16()? as usize;
        let mut bytes = vec![0u8; len];
        self.read_fully(&mut bytes)?;
        modified_utf8::decode(&bytes)
    }
}

pub trait BinaryWrite {
    fn write_fully(&mut self, buf: &[u8]) -> Result<()>;

    fn write_bool(&mut self, v: bool) -> Result<()> {
        self.write_u8(v as u8)
    }

    fn write_u8(&mut self, v: u8) -> Result<()> {
        self.write_fully(&[v])
    }

    fn write_i8(&mut self, v: i8) -> Result<()> {
        self.write_u8(v as u8)
    }

    fn write_u16(&mut self, v: u16) -> Result<()> {
        self.write_fully(&v.to_be_bytes())
    }

    fn write_i16(&mut self, v: i16) -> Result<()> {
        self.write_fully(&v.to_be_bytes())
    }

    fn write_char(&mut self, v: u16) -> Result<()> {
        self.write_u16(v)
    }

    fn write_i32(&mut self, v: i32) -> Result<()> {
        self.write_fully(&v.to_be_bytes())
    }

    fn write_u32(&mut self, v: u32) -> Result<()> {
        self.write_fully(&v.to_be_bytes())
    }

    fn write_i64(&mut self, v: i64) -> Result<()> {
        self.write_fully(&v.to_be_bytes())
    }

    fn write_u64(&mut self, v: u64) -> Result<()> {
        self.write_fully(&v.to_be_bytes())
    }

    fn write_f32(&mut self, v: f32) -> Result<()> {
        self.write_fully(&v.to_bits().to_be_bytes())
    }

    fn write_f64(&mut self, v: f64) -> Result<()> {
        self.write_fully(&v.to_bits().to_be_bytes())
    }

    fn write_utf(&mut self, text: &str) -> Result<()> {
        let bytes = modified_utf8::to_bytes(text)?;
        self.write_fully(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eyre::ensure;

    #[derive(Default)]
    struct Buffer {
        data: Vec<u8>,
        pos: usize,
    }

    impl BinaryRead for Buffer {
        fn read_fully(&mut self, buf: &mut [u8]) -> Result<()> {
            ensure!(self.pos + buf.len() <= self.data.len(), "end of buffer");
            buf.copy_from_slice(&self.data[self.pos..self.pos + buf.len()]);
            self.pos += buf.len();
            Ok(())
        }
    }

    impl BinaryWrite for Buffer {
        fn write_fully(&mut self, buf: &[u8]) -> Result<()> {
            self.data.extend_from_slice(buf);
            Ok(())
        }
    }

    #[test]
    fn integers_are_big_endian() {
        let mut buf = Buffer::default();
        buf.write_i32(0x12345678).unwrap();
        buf.write_i16(-2).unwrap();

        assert_eq!(buf.data, vec![0x12, 0x34, 0x56, 0x78, 0xFF, 0xFE]);
    }

    #[test]
    fn floats_use_bit_patterns() {
        let mut buf = Buffer::default();
        buf.write_f64(1.0).unwrap();
        buf.write_f32(-0.5).unwrap();

        assert_eq!(&buf.data[..8], &1.0f64.to_bits().to_be_bytes());
        assert_eq!(buf.read_f64().unwrap(), 1.0);
        assert_eq!(buf.read_f32().unwrap(), -0.5);
    }

    #[test]
    fn mixed_values_read_back_in_order() {
        let mut buf = Buffer::default();
        buf.write_bool(true).unwrap();
        buf.write_i8(-7).unwrap();
        buf.write_char(0x20AC).unwrap();
        buf.write_i64(i64::MIN).unwrap();
        buf.write_utf("flux").unwrap();

        assert!(buf.read_bool().unwrap());
        assert_eq!(buf.read_i8().unwrap(), -7);
        assert_eq!(buf.read_char().unwrap(), 0x20AC);
        assert_eq!(buf.read_i64().unwrap(), i64::MIN);
        assert_eq!(buf.read_utf().unwrap(), "flux");
        assert!(buf.read_u8().is_err());
    }
}
