//! All IO functionality needed for TIFF reading and writing.

use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::pixel::EndianType;

/// Byte order of a TIFF file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ByteOrder {
    /// little endian byte order
    LittleEndian,
    /// big endian byte order
    BigEndian,
}

impl ByteOrder {
    /// The order of the host.
    pub fn native() -> ByteOrder {
        if cfg!(target_endian = "little") {
            ByteOrder::LittleEndian
        } else {
            ByteOrder::BigEndian
        }
    }

    pub fn endian_type(self) -> EndianType {
        match self {
            ByteOrder::LittleEndian => EndianType::Little,
            ByteOrder::BigEndian => EndianType::Big,
        }
    }
}

impl From<EndianType> for ByteOrder {
    fn from(endian: EndianType) -> ByteOrder {
        match endian.resolve() {
            EndianType::Little => ByteOrder::LittleEndian,
            _ => ByteOrder::BigEndian,
        }
    }
}

/// Reader that is aware of the byte order.
#[derive(Debug)]
pub struct EndianReader<R> {
    reader: R,
    pub(crate) byte_order: ByteOrder,
}

macro_rules! read_fn {
    ($name:ident, $ty:ty, $bytes:expr) => {
        #[inline(always)]
        pub fn $name(&mut self) -> Result<$ty, io::Error> {
            let mut n = [0u8; $bytes];
            self.reader.read_exact(&mut n)?;
            Ok(match self.byte_order {
                ByteOrder::LittleEndian => <$ty>::from_le_bytes(n),
                ByteOrder::BigEndian => <$ty>::from_be_bytes(n),
            })
        }
    };
}

impl<R: Read> EndianReader<R> {
    pub fn new(reader: R, byte_order: ByteOrder) -> Self {
        Self { reader, byte_order }
    }

    pub fn inner(&mut self) -> &mut R {
        &mut self.reader
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn goto_offset(&mut self, offset: u64) -> io::Result<()>
    where
        R: Seek,
    {
        self.reader.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    #[inline(always)]
    pub fn read_u8(&mut self) -> Result<u8, io::Error> {
        let mut n = [0u8; 1];
        self.reader.read_exact(&mut n)?;
        Ok(n[0])
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.reader.read_exact(buf)
    }

    read_fn!(read_i8, i8, 1);
    read_fn!(read_u16, u16, 2);
    read_fn!(read_i16, i16, 2);
    read_fn!(read_u32, u32, 4);
    read_fn!(read_i32, i32, 4);
    read_fn!(read_u64, u64, 8);
    read_fn!(read_i64, i64, 8);

    #[inline(always)]
    pub fn read_f32(&mut self) -> Result<f32, io::Error> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    #[inline(always)]
    pub fn read_f64(&mut self) -> Result<f64, io::Error> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    /// Reads a NUL-terminated ASCII string of `length` bytes including the
    /// terminator.
    pub fn read_string(&mut self, length: usize) -> Result<String, io::Error> {
        let mut out = vec![0; length];
        self.reader.read_exact(&mut out)?;
        // Strip the trailing NUL (and any padding after it).
        if let Some(terminator) = out.iter().position(|&b| b == 0) {
            out.truncate(terminator);
        }
        String::from_utf8(out)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "string is not ASCII"))
    }
}

/// Writer that is aware of the byte order and tracks its file offset.
pub struct EndianWriter<W> {
    writer: W,
    byte_order: ByteOrder,
    offset: u64,
}

macro_rules! write_fn {
    ($name:ident, $ty:ty) => {
        #[inline(always)]
        pub fn $name(&mut self, n: $ty) -> Result<(), io::Error> {
            let bytes = match self.byte_order {
                ByteOrder::LittleEndian => n.to_le_bytes(),
                ByteOrder::BigEndian => n.to_be_bytes(),
            };
            self.writer.write_all(&bytes)?;
            self.offset += bytes.len() as u64;
            Ok(())
        }
    };
}

impl<W: Write> EndianWriter<W> {
    pub fn new(writer: W, byte_order: ByteOrder) -> Self {
        Self {
            writer,
            byte_order,
            offset: 0,
        }
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    /// Current file offset in bytes.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), io::Error> {
        self.writer.write_all(bytes)?;
        self.offset += bytes.len() as u64;
        Ok(())
    }

    #[inline(always)]
    pub fn write_u8(&mut self, n: u8) -> Result<(), io::Error> {
        self.writer.write_all(&[n])?;
        self.offset += 1;
        Ok(())
    }

    write_fn!(write_u16, u16);
    write_fn!(write_i16, i16);
    write_fn!(write_u32, u32);
    write_fn!(write_i32, i32);
    write_fn!(write_u64, u64);
    write_fn!(write_i64, i64);

    #[inline(always)]
    pub fn write_f32(&mut self, n: f32) -> Result<(), io::Error> {
        self.write_u32(n.to_bits())
    }

    #[inline(always)]
    pub fn write_f64(&mut self, n: f64) -> Result<(), io::Error> {
        self.write_u64(n.to_bits())
    }

    /// Pad the stream to the next word boundary.
    pub fn pad_word_boundary(&mut self) -> Result<(), io::Error> {
        if self.offset % 4 != 0 {
            let padding = [0, 0, 0];
            let padd_len = 4 - (self.offset % 4);
            self.writer.write_all(&padding[..padd_len as usize])?;
            self.offset += padd_len;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), io::Error> {
        self.writer.flush()
    }
}

impl<W: Write + Seek> EndianWriter<W> {
    pub fn goto_offset(&mut self, offset: u64) -> Result<(), io::Error> {
        self.offset = offset;
        self.writer.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    pub fn goto_end(&mut self) -> Result<(), io::Error> {
        self.offset = self.writer.seek(SeekFrom::End(0))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reader_respects_byte_order() {
        let data = [0x01u8, 0x02, 0x03, 0x04];
        let mut le = EndianReader::new(Cursor::new(data), ByteOrder::LittleEndian);
        assert_eq!(le.read_u32().unwrap(), 0x0403_0201);
        let mut be = EndianReader::new(Cursor::new(data), ByteOrder::BigEndian);
        assert_eq!(be.read_u32().unwrap(), 0x0102_0304);
    }

    #[test]
    fn writer_round_trips_reader() {
        let mut out = Vec::new();
        {
            let mut w = EndianWriter::new(Cursor::new(&mut out), ByteOrder::BigEndian);
            w.write_u16(0x2A).unwrap();
            w.write_u64(0x1122_3344_5566_7788).unwrap();
            assert_eq!(w.offset(), 10);
        }
        let mut r = EndianReader::new(Cursor::new(&out), ByteOrder::BigEndian);
        assert_eq!(r.read_u16().unwrap(), 0x2A);
        assert_eq!(r.read_u64().unwrap(), 0x1122_3344_5566_7788);
    }

    #[test]
    fn string_reads_stop_at_nul() {
        let data = b"OME-TIFF\0\0\0";
        let mut r = EndianReader::new(Cursor::new(data), ByteOrder::LittleEndian);
        assert_eq!(r.read_string(data.len()).unwrap(), "OME-TIFF");
    }
}
