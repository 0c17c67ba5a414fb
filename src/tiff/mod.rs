//! Low-level TIFF container access: header and IFD parsing, the typed tag
//! codec, chunk compression, and strip/tile region I/O.

use crate::error::{FormatError, OmeTiffResult, UnsupportedError};
use crate::pixel::PixelType;
use crate::tags::{PhotometricInterpretation, PlanarConfiguration, SampleFormat, Tag, Type};

pub mod compression;
pub mod decoder;
pub mod encoder;
pub mod ifd;
pub mod stream;

pub use self::compression::Codec;
pub use self::decoder::TiffDecoder;
pub use self::encoder::{PendingIfd, TiffEncoder};
pub use self::ifd::{field_shape, Entry, FieldCount, FieldShape, Ifd};
pub use self::stream::ByteOrder;

/// Classic TIFF or BigTIFF.
///
/// The choice is runtime state rather than a type parameter: an OME-TIFF
/// writer decides it per file from the expected pixel footprint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TiffVariant {
    Classic,
    Big,
}

impl TiffVariant {
    /// Byte size of an offset field.
    pub fn offset_size(self) -> usize {
        match self {
            TiffVariant::Classic => 4,
            TiffVariant::Big => 8,
        }
    }

    /// Byte size of one directory entry.
    pub fn entry_size(self) -> usize {
        match self {
            TiffVariant::Classic => 12,
            TiffVariant::Big => 20,
        }
    }

    /// The entry type used for offset arrays.
    pub fn offset_type(self) -> Type {
        match self {
            TiffVariant::Classic => Type::LONG,
            TiffVariant::Big => Type::LONG8,
        }
    }

    /// Largest representable file offset.
    pub fn max_offset(self) -> u64 {
        match self {
            TiffVariant::Classic => u64::from(u32::MAX),
            TiffVariant::Big => u64::MAX,
        }
    }
}

/// Decoding limits.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct Limits {
    /// The maximum size of any decoded chunk or plane buffer in bytes.
    pub decoding_buffer_size: usize,
    /// The maximum size of any IFD value in bytes. OME-TIFF stores a whole
    /// XML document in `ImageDescription`, so this is far larger than a
    /// plain TIFF reader would use.
    pub ifd_value_size: usize,
}

impl Default for Limits {
    fn default() -> Limits {
        Limits {
            decoding_buffer_size: 256 * 1024 * 1024,
            ifd_value_size: 64 * 1024 * 1024,
        }
    }
}

impl Limits {
    /// A configuration that does not impose any limits.
    pub fn unlimited() -> Limits {
        Limits {
            decoding_buffer_size: usize::MAX,
            ifd_value_size: usize::MAX,
        }
    }
}

/// Byte size of one scalar component of a pixel type; complex types swap
/// per component, not per element.
pub(crate) fn component_size(pixel_type: PixelType) -> usize {
    match pixel_type {
        PixelType::ComplexFloat => 4,
        PixelType::ComplexDouble => 8,
        other => other.size(),
    }
}

/// Strip or tile organisation of one raster.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChunkKind {
    Strips { rows_per_strip: u32 },
    Tiles { width: u32, height: u32 },
}

/// The raster geometry of one IFD, as needed for chunk I/O.
#[derive(Clone, Debug)]
pub struct PlaneLayout {
    pub width: u32,
    pub height: u32,
    pub samples: u16,
    pub pixel_type: PixelType,
    /// Significant bits per sample; 1 for packed bilevel data.
    pub bits: u16,
    pub planar: PlanarConfiguration,
    pub photometric: PhotometricInterpretation,
    pub compression: Codec,
    pub chunks: ChunkKind,
}

impl PlaneLayout {
    /// Derive the layout from a directory's tags.
    pub fn from_ifd(ifd: &Ifd) -> OmeTiffResult<PlaneLayout> {
        let width = ifd.require_u32(Tag::ImageWidth)?;
        let height = ifd.require_u32(Tag::ImageLength)?;
        if width == 0 || height == 0 {
            return Err(FormatError::InvalidDimensions(width, height).into());
        }

        let samples = ifd.get_u16(Tag::SamplesPerPixel)?.unwrap_or(1);
        if samples == 0 {
            return Err(FormatError::RequiredTagEmpty(Tag::SamplesPerPixel).into());
        }

        let bits_list = ifd.get_u16s(Tag::BitsPerSample)?.unwrap_or_else(|| vec![1]);
        let bits = bits_list[0];
        if bits_list.iter().any(|&b| b != bits) {
            return Err(UnsupportedError::UnsupportedBitsPerSample(bits_list).into());
        }

        let format = ifd
            .get_u16(Tag::SampleFormat)?
            .map(SampleFormat::from_u16_exhaustive)
            .unwrap_or(SampleFormat::Uint);
        let pixel_type = PixelType::from_sample_format(format, bits)?;
        // Chunk decode handles packed bilevel rows and whole-element widths
        // only; narrower data is stored widened by every supported writer.
        if bits != pixel_type.significant_bits() {
            return Err(UnsupportedError::UnsupportedBitsPerSample(bits_list).into());
        }

        let planar = match ifd.get_u16(Tag::PlanarConfiguration)? {
            None => PlanarConfiguration::Chunky,
            Some(v) => PlanarConfiguration::from_u16(v)
                .ok_or(UnsupportedError::UnsupportedPlanarConfiguration(v))?,
        };

        let photometric = ifd
            .get_u16(Tag::PhotometricInterpretation)?
            .and_then(PhotometricInterpretation::from_u16)
            .unwrap_or(PhotometricInterpretation::BlackIsZero);

        let compression = ifd
            .get_u16(Tag::Compression)?
            .map(crate::tags::CompressionMethod::from_u16_exhaustive)
            .map(Codec::from_method)
            .transpose()?
            .unwrap_or(Codec::None);

        let tiled = ifd.contains(Tag::TileWidth) || ifd.contains(Tag::TileOffsets);
        let stripped = ifd.contains(Tag::StripOffsets);
        let chunks = match (tiled, stripped) {
            (true, false) => ChunkKind::Tiles {
                width: ifd.require_u32(Tag::TileWidth)?,
                height: ifd.require_u32(Tag::TileLength)?,
            },
            (false, true) => ChunkKind::Strips {
                rows_per_strip: ifd
                    .get_u32(Tag::RowsPerStrip)?
                    .unwrap_or(height)
                    .min(height)
                    .max(1),
            },
            _ => return Err(FormatError::StripTileTagConflict.into()),
        };
        if let ChunkKind::Tiles { width: w, height: h } = chunks {
            if w == 0 || h == 0 {
                return Err(FormatError::InvalidDimensions(w, h).into());
            }
        }

        Ok(PlaneLayout {
            width,
            height,
            samples,
            pixel_type,
            bits,
            planar,
            photometric,
            compression,
            chunks,
        })
    }

    pub fn is_tiled(&self) -> bool {
        matches!(self.chunks, ChunkKind::Tiles { .. })
    }

    /// Nominal chunk dimensions (strips span the full width).
    pub fn chunk_dims(&self) -> (u32, u32) {
        match self.chunks {
            ChunkKind::Strips { rows_per_strip } => (self.width, rows_per_strip),
            ChunkKind::Tiles { width, height } => (width, height),
        }
    }

    pub fn chunks_across(&self) -> u32 {
        let (cw, _) = self.chunk_dims();
        self.width.div_ceil(cw)
    }

    pub fn chunks_down(&self) -> u32 {
        let (_, ch) = self.chunk_dims();
        self.height.div_ceil(ch)
    }

    pub fn chunks_per_plane(&self) -> u32 {
        self.chunks_across() * self.chunks_down()
    }

    /// Number of separately stored sample planes.
    pub fn sample_planes(&self) -> u16 {
        match self.planar {
            PlanarConfiguration::Chunky => 1,
            PlanarConfiguration::Planar => self.samples,
            _ => 1,
        }
    }

    /// Samples interleaved within one chunk pixel.
    pub fn samples_per_chunk_pixel(&self) -> u16 {
        match self.planar {
            PlanarConfiguration::Planar => 1,
            _ => self.samples,
        }
    }

    /// Total chunk count across all sample planes.
    pub fn chunk_count(&self) -> u32 {
        self.chunks_per_plane() * u32::from(self.sample_planes())
    }

    /// Top-left corner of a chunk within its sample plane.
    pub fn chunk_origin(&self, index: u32) -> (u32, u32) {
        let within_plane = index % self.chunks_per_plane();
        let (cw, ch) = self.chunk_dims();
        let col = within_plane % self.chunks_across();
        let row = within_plane / self.chunks_across();
        (col * cw, row * ch)
    }

    /// The sample plane a chunk belongs to.
    pub fn chunk_plane(&self, index: u32) -> u16 {
        (index / self.chunks_per_plane()) as u16
    }

    /// The pixel dimensions a chunk's data covers. Tile data is padded to
    /// the full tile size; the final strip is clipped to the image.
    pub fn chunk_data_dims(&self, index: u32) -> (u32, u32) {
        match self.chunks {
            ChunkKind::Tiles { width, height } => (width, height),
            ChunkKind::Strips { rows_per_strip } => {
                let (_, y0) = self.chunk_origin(index);
                (self.width, rows_per_strip.min(self.height - y0))
            }
        }
    }

    /// Unpacked (in-memory) byte size of one chunk.
    pub fn chunk_unpacked_size(&self, index: u32) -> usize {
        let (dw, dh) = self.chunk_data_dims(index);
        dw as usize
            * dh as usize
            * self.samples_per_chunk_pixel() as usize
            * self.pixel_type.size()
    }

    /// On-disk byte size of one uncompressed chunk; bilevel rows are
    /// packed eight samples per byte.
    pub fn chunk_packed_size(&self, index: u32) -> usize {
        let (dw, dh) = self.chunk_data_dims(index);
        let samples_per_row = dw as usize * self.samples_per_chunk_pixel() as usize;
        if self.bits == 1 {
            samples_per_row.div_ceil(8) * dh as usize
        } else {
            samples_per_row * self.pixel_type.size() * dh as usize
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(width: u32, height: u32, chunks: ChunkKind) -> PlaneLayout {
        PlaneLayout {
            width,
            height,
            samples: 1,
            pixel_type: PixelType::UInt8,
            bits: 8,
            planar: PlanarConfiguration::Chunky,
            photometric: PhotometricInterpretation::BlackIsZero,
            compression: Codec::None,
            chunks,
        }
    }

    #[test]
    fn strip_geometry() {
        let l = layout(100, 25, ChunkKind::Strips { rows_per_strip: 10 });
        assert_eq!(l.chunks_per_plane(), 3);
        assert_eq!(l.chunk_data_dims(0), (100, 10));
        assert_eq!(l.chunk_data_dims(2), (100, 5));
        assert_eq!(l.chunk_unpacked_size(2), 500);
    }

    #[test]
    fn tile_geometry_pads_edges() {
        let l = layout(100, 100, ChunkKind::Tiles { width: 64, height: 64 });
        assert_eq!(l.chunks_across(), 2);
        assert_eq!(l.chunks_down(), 2);
        assert_eq!(l.chunk_origin(3), (64, 64));
        assert_eq!(l.chunk_data_dims(3), (64, 64));
    }

    #[test]
    fn bilevel_rows_pack_per_row() {
        let mut l = layout(10, 4, ChunkKind::Strips { rows_per_strip: 4 });
        l.pixel_type = PixelType::Bit;
        l.bits = 1;
        assert_eq!(l.chunk_packed_size(0), 8);
        assert_eq!(l.chunk_unpacked_size(0), 40);
    }
}
