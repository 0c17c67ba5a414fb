//! Chunk compression codecs.
//!
//! OME-TIFF carries pixel data uncompressed or behind one of the lossless
//! TIFF schemes. Each codec here implements both directions; the decoder
//! additionally tolerates the `OldDeflate` tag value.

use std::io::Write;

use crate::error::{FormatError, OmeTiffResult, UnsupportedError};
use crate::tags::CompressionMethod;

#[cfg(feature = "deflate")]
use std::io::Read;

/// A compression scheme applied to strip and tile data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Codec {
    #[default]
    None,
    #[cfg(feature = "deflate")]
    Deflate,
    #[cfg(feature = "lzw")]
    Lzw,
    PackBits,
}

impl Codec {
    /// Codecs available for writing, in the order reported to callers.
    pub fn supported() -> Vec<Codec> {
        vec![
            Codec::None,
            #[cfg(feature = "deflate")]
            Codec::Deflate,
            #[cfg(feature = "lzw")]
            Codec::Lzw,
            Codec::PackBits,
        ]
    }

    pub fn name(self) -> &'static str {
        match self {
            Codec::None => "Uncompressed",
            #[cfg(feature = "deflate")]
            Codec::Deflate => "Zlib",
            #[cfg(feature = "lzw")]
            Codec::Lzw => "LZW",
            Codec::PackBits => "PackBits",
        }
    }

    /// Look a codec up by its user-facing name, case-insensitively.
    pub fn from_name(name: &str) -> OmeTiffResult<Codec> {
        let wanted = name.to_ascii_lowercase();
        Codec::supported()
            .into_iter()
            .find(|c| c.name().to_ascii_lowercase() == wanted)
            .ok_or_else(|| UnsupportedError::UnknownCompressionMethod(name.to_string()).into())
    }

    pub fn method(self) -> CompressionMethod {
        match self {
            Codec::None => CompressionMethod::None,
            #[cfg(feature = "deflate")]
            Codec::Deflate => CompressionMethod::Deflate,
            #[cfg(feature = "lzw")]
            Codec::Lzw => CompressionMethod::LZW,
            Codec::PackBits => CompressionMethod::PackBits,
        }
    }

    pub fn from_method(method: CompressionMethod) -> OmeTiffResult<Codec> {
        match method {
            CompressionMethod::None => Ok(Codec::None),
            #[cfg(feature = "deflate")]
            CompressionMethod::Deflate | CompressionMethod::OldDeflate => Ok(Codec::Deflate),
            #[cfg(feature = "lzw")]
            CompressionMethod::LZW => Ok(Codec::Lzw),
            CompressionMethod::PackBits => Ok(Codec::PackBits),
            other => Err(UnsupportedError::UnsupportedCompressionMethod(other).into()),
        }
    }

    /// Compress one chunk of raw data.
    pub fn compress(self, bytes: &[u8]) -> OmeTiffResult<Vec<u8>> {
        match self {
            Codec::None => Ok(bytes.to_vec()),
            #[cfg(feature = "deflate")]
            Codec::Deflate => {
                let mut encoder = flate2::write::ZlibEncoder::new(
                    Vec::new(),
                    flate2::Compression::default(),
                );
                encoder.write_all(bytes)?;
                Ok(encoder.finish()?)
            }
            #[cfg(feature = "lzw")]
            Codec::Lzw => {
                let mut out = Vec::new();
                let mut encoder =
                    weezl::encode::Encoder::with_tiff_size_switch(weezl::BitOrder::Msb, 8);
                let result = encoder.into_stream(&mut out).encode_all(bytes);
                result.status?;
                Ok(out)
            }
            Codec::PackBits => Ok(packbits_compress(bytes)),
        }
    }

    /// Decompress one chunk; `expected` is the raw size implied by the
    /// chunk geometry and is verified.
    pub fn decompress(self, bytes: &[u8], expected: usize) -> OmeTiffResult<Vec<u8>> {
        let out = match self {
            Codec::None => bytes.to_vec(),
            #[cfg(feature = "deflate")]
            Codec::Deflate => {
                let mut out = Vec::with_capacity(expected);
                flate2::read::ZlibDecoder::new(bytes).read_to_end(&mut out)?;
                out
            }
            #[cfg(feature = "lzw")]
            Codec::Lzw => {
                let mut out = Vec::with_capacity(expected);
                let mut decoder =
                    weezl::decode::Decoder::with_tiff_size_switch(weezl::BitOrder::Msb, 8);
                let result = decoder.into_stream(&mut out).decode_all(bytes);
                result.status?;
                out
            }
            Codec::PackBits => packbits_decompress(bytes, expected)?,
        };
        if out.len() != expected {
            return Err(FormatError::UnexpectedCompressedData {
                actual_bytes: out.len(),
                required_bytes: expected,
            }
            .into());
        }
        Ok(out)
    }
}

/// PackBits run-length encoding: literal chunks of up to 128 bytes and
/// runs of 2..=128 repeated bytes.
fn packbits_compress(src: &[u8]) -> Vec<u8> {
    const MAX_CHUNK: usize = 128;

    let mut out = Vec::with_capacity(src.len() + src.len() / MAX_CHUNK + 1);
    let mut i = 0;
    while i < src.len() {
        let mut run = 1;
        while run < MAX_CHUNK && i + run < src.len() && src[i + run] == src[i] {
            run += 1;
        }
        if run >= 2 {
            out.push((1i16 - run as i16) as u8);
            out.push(src[i]);
            i += run;
            continue;
        }

        // Literal until the next worthwhile run or the chunk limit.
        let start = i;
        i += 1;
        while i < src.len() && i - start < MAX_CHUNK {
            if i + 2 < src.len() && src[i] == src[i + 1] && src[i] == src[i + 2] {
                break;
            }
            i += 1;
        }
        out.push((i - start - 1) as u8);
        out.extend_from_slice(&src[start..i]);
    }
    out
}

fn packbits_decompress(src: &[u8], expected: usize) -> OmeTiffResult<Vec<u8>> {
    let truncated = || {
        FormatError::UnexpectedCompressedData {
            actual_bytes: src.len(),
            required_bytes: expected,
        }
    };

    let mut out = Vec::with_capacity(expected);
    let mut i = 0;
    while i < src.len() && out.len() < expected {
        let header = src[i] as i8;
        i += 1;
        if header == -128 {
            // no-op
        } else if header < 0 {
            let count = 1 - header as isize;
            let value = *src.get(i).ok_or_else(truncated)?;
            i += 1;
            out.extend(std::iter::repeat(value).take(count as usize));
        } else {
            let count = header as usize + 1;
            let literal = src.get(i..i + count).ok_or_else(truncated)?;
            out.extend_from_slice(literal);
            i += count;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_DATA: &[u8] = b"This is a string for checking various compression algorithms.";

    #[test]
    fn codecs_round_trip() {
        for codec in Codec::supported() {
            let compressed = codec.compress(TEST_DATA).unwrap();
            let restored = codec.decompress(&compressed, TEST_DATA.len()).unwrap();
            assert_eq!(restored, TEST_DATA, "codec {:?}", codec);
        }
    }

    #[test]
    fn packbits_known_encodings() {
        // A lone byte becomes a one-byte literal.
        assert_eq!(packbits_compress(&[0x3F]), vec![0x00, 0x3F]);
        // A run compresses to (header, value).
        assert_eq!(packbits_compress(&[7, 7, 7, 7]), vec![0xFD, 7]);
    }

    #[test]
    fn packbits_decodes_reference_stream() {
        let encoded = [
            0xFEu8, 0xAA, 0x02, 0x80, 0x00, 0x2A, 0xFD, 0xAA, 0x03, 0x80, 0x00, 0x2A, 0x22,
            0xF7, 0xAA,
        ];
        let expected = [
            0xAAu8, 0xAA, 0xAA, 0x80, 0x00, 0x2A, 0xAA, 0xAA, 0xAA, 0xAA, 0x80, 0x00, 0x2A,
            0x22, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA,
        ];
        let decoded = packbits_decompress(&encoded, expected.len()).unwrap();
        assert_eq!(decoded, expected);
    }

    #[test]
    fn name_lookup_is_case_insensitive() {
        assert_eq!(Codec::from_name("packbits").unwrap(), Codec::PackBits);
        assert!(Codec::from_name("jpeg").is_err());
    }

    #[test]
    fn method_round_trip() {
        for codec in Codec::supported() {
            assert_eq!(Codec::from_method(codec.method()).unwrap(), codec);
        }
    }
}
