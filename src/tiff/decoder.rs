//! TIFF container reading: header, IFD chain, and region decode.

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use crate::error::{FormatError, OmeTiffResult, UsageError};
use crate::pixel::VariantPixelBuffer;
use crate::tags::{IfdPointer, Tag, Type};
use crate::tiff::ifd::{Entry, Ifd};
use crate::tiff::stream::{ByteOrder, EndianReader};
use crate::tags::PlanarConfiguration;
use crate::tiff::{component_size, Limits, PlaneLayout, TiffVariant};

/// A TIFF container opened for reading.
///
/// The main IFD chain is enumerated once at construction; directories are
/// parsed on demand with all entry values loaded eagerly, so an [`Ifd`]
/// never refers back into the file.
#[derive(Debug)]
pub struct TiffDecoder<R> {
    reader: EndianReader<R>,
    variant: TiffVariant,
    ifd_offsets: Vec<IfdPointer>,
    limits: Limits,
}

impl TiffDecoder<BufReader<File>> {
    /// Open a TIFF file from disk.
    pub fn open<P: AsRef<Path>>(path: P) -> OmeTiffResult<TiffDecoder<BufReader<File>>> {
        TiffDecoder::new(BufReader::new(File::open(path)?))
    }
}

impl<R: Read + Seek> TiffDecoder<R> {
    /// Create a decoder, parsing the header and enumerating the main IFD
    /// chain.
    pub fn new(mut r: R) -> OmeTiffResult<TiffDecoder<R>> {
        let mut endianness = [0u8; 2];
        r.read_exact(&mut endianness)
            .map_err(|_| FormatError::TiffSignatureNotFound)?;
        let byte_order = match &endianness {
            b"II" => ByteOrder::LittleEndian,
            b"MM" => ByteOrder::BigEndian,
            _ => return Err(FormatError::TiffSignatureInvalid.into()),
        };

        let mut reader = EndianReader::new(r, byte_order);
        let variant = match reader.read_u16()? {
            42 => TiffVariant::Classic,
            43 => {
                // Offset byte size, always 8, and a reserved zero word.
                let offset_size = reader.read_u16()?;
                if offset_size != 8 {
                    return Err(FormatError::OffsetSizeInvalid(offset_size).into());
                }
                reader.read_u16()?;
                TiffVariant::Big
            }
            version => return Err(FormatError::VersionNotSupported(version).into()),
        };

        let first = match variant {
            TiffVariant::Classic => u64::from(reader.read_u32()?),
            TiffVariant::Big => reader.read_u64()?,
        };

        let mut decoder = TiffDecoder {
            reader,
            variant,
            ifd_offsets: Vec::new(),
            limits: Limits::default(),
        };
        decoder.walk_chain(IfdPointer(first))?;
        Ok(decoder)
    }

    pub fn with_limits(mut self, limits: Limits) -> TiffDecoder<R> {
        self.limits = limits;
        self
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.reader.byte_order()
    }

    pub fn variant(&self) -> TiffVariant {
        self.variant
    }

    pub fn is_big(&self) -> bool {
        self.variant == TiffVariant::Big
    }

    /// Number of directories in the main chain.
    pub fn ifd_count(&self) -> usize {
        self.ifd_offsets.len()
    }

    pub fn ifd_offsets(&self) -> &[IfdPointer] {
        &self.ifd_offsets
    }

    /// Enumerate the main chain, rejecting pointer cycles.
    fn walk_chain(&mut self, first: IfdPointer) -> OmeTiffResult<()> {
        if first.0 == 0 {
            return Err(FormatError::ImageFileDirectoryNotFound.into());
        }
        let mut seen = HashSet::new();
        let mut next = Some(first);
        while let Some(ptr) = next {
            if !seen.insert(ptr.0) {
                return Err(FormatError::CycleInOffsets.into());
            }
            self.ifd_offsets.push(ptr);
            next = self.peek_next(ptr)?;
        }
        Ok(())
    }

    /// Read only a directory's entry count and next pointer.
    fn peek_next(&mut self, ptr: IfdPointer) -> OmeTiffResult<Option<IfdPointer>> {
        self.reader.goto_offset(ptr.0)?;
        let count = self.read_entry_count()?;
        let skip = count
            .checked_mul(self.variant.entry_size() as u64)
            .ok_or(FormatError::ImageFileDirectoryNotFound)?;
        self.reader.goto_offset(
            ptr.0
                + self.entry_count_size() as u64
                + skip,
        )?;
        let next = self.read_offset_value()?;
        Ok((next != 0).then_some(IfdPointer(next)))
    }

    fn entry_count_size(&self) -> usize {
        match self.variant {
            TiffVariant::Classic => 2,
            TiffVariant::Big => 8,
        }
    }

    fn read_entry_count(&mut self) -> OmeTiffResult<u64> {
        Ok(match self.variant {
            TiffVariant::Classic => u64::from(self.reader.read_u16()?),
            TiffVariant::Big => self.reader.read_u64()?,
        })
    }

    fn read_offset_value(&mut self) -> OmeTiffResult<u64> {
        Ok(match self.variant {
            TiffVariant::Classic => u64::from(self.reader.read_u32()?),
            TiffVariant::Big => self.reader.read_u64()?,
        })
    }

    /// Read the directory at `index` of the main chain.
    pub fn read_main_ifd(&mut self, index: usize) -> OmeTiffResult<Ifd> {
        let ptr = *self.ifd_offsets.get(index).ok_or(UsageError::IndexOutOfRange {
            index: index as u64,
            count: self.ifd_offsets.len() as u64,
        })?;
        self.read_ifd(ptr)
    }

    /// Read a directory at an arbitrary file position, e.g. a `SubIfd`
    /// offset. All entry values are loaded.
    pub fn read_ifd(&mut self, ptr: IfdPointer) -> OmeTiffResult<Ifd> {
        self.reader.goto_offset(ptr.0)?;
        let count = self.read_entry_count()?;
        if count.checked_mul(self.variant.entry_size() as u64).is_none() {
            return Err(FormatError::ImageFileDirectoryNotFound.into());
        }

        let inline_size = self.variant.offset_size();
        struct RawEntry {
            tag: u16,
            type_: Type,
            count: u64,
            inline: [u8; 8],
        }

        let mut raw = Vec::with_capacity(count.min(4096) as usize);
        for _ in 0..count {
            let tag = self.reader.read_u16()?;
            let type_raw = self.reader.read_u16()?;
            let value_count = match self.variant {
                TiffVariant::Classic => u64::from(self.reader.read_u32()?),
                TiffVariant::Big => self.reader.read_u64()?,
            };
            let mut inline = [0u8; 8];
            self.reader.read_exact(&mut inline[..inline_size])?;
            // Unknown value types cannot be sized; skip the entry.
            let Some(type_) = Type::from_u16(type_raw) else {
                tracing::warn!(tag, type_raw, "skipping entry of unknown value type");
                continue;
            };
            raw.push(RawEntry {
                tag,
                type_,
                count: value_count,
                inline,
            });
        }
        let next = self.read_offset_value()?;

        let mut entries = BTreeMap::new();
        for e in raw {
            let byte_len = (e.type_.size() as u64)
                .checked_mul(e.count)
                .ok_or(FormatError::InvalidTag)?;
            if byte_len > self.limits.ifd_value_size as u64 {
                return Err(FormatError::InvalidTag.into());
            }
            let data = if byte_len as usize <= inline_size {
                e.inline[..byte_len as usize].to_vec()
            } else {
                let offset = {
                    let mut cursor = EndianReader::new(
                        std::io::Cursor::new(&e.inline[..inline_size]),
                        self.byte_order(),
                    );
                    match self.variant {
                        TiffVariant::Classic => u64::from(cursor.read_u32()?),
                        TiffVariant::Big => cursor.read_u64()?,
                    }
                };
                self.reader.goto_offset(offset)?;
                let mut data = vec![0; byte_len as usize];
                self.reader.read_exact(&mut data)?;
                data
            };
            entries.insert(e.tag, Entry::new(e.type_, e.count, data));
        }

        Ok(Ifd::from_parts(
            self.byte_order(),
            entries,
            ptr,
            (next != 0).then_some(IfdPointer(next)),
        ))
    }

    /// Decode the rectangle `(x, y, w, h)` of the raster described by
    /// `ifd` into `buf`.
    ///
    /// The buffer must match the raster's pixel type and hold
    /// `w × h × samples` elements; its physical layout must be
    /// sample-interleaved for chunky files and plane-separated for planar
    /// files, which is what [`StorageOrder::for_plane`] produces.
    ///
    /// [`StorageOrder::for_plane`]: crate::pixel::StorageOrder::for_plane
    pub fn read_region(
        &mut self,
        ifd: &Ifd,
        x: u32,
        y: u32,
        w: u32,
        h: u32,
        buf: &mut VariantPixelBuffer<'_>,
    ) -> OmeTiffResult<()> {
        let layout = PlaneLayout::from_ifd(ifd)?;
        self.read_region_with_layout(ifd, &layout, x, y, w, h, buf)
    }

    pub(crate) fn read_region_with_layout(
        &mut self,
        ifd: &Ifd,
        layout: &PlaneLayout,
        x: u32,
        y: u32,
        w: u32,
        h: u32,
        buf: &mut VariantPixelBuffer<'_>,
    ) -> OmeTiffResult<()> {
        if w == 0
            || h == 0
            || x.checked_add(w).map_or(true, |right| right > layout.width)
            || y.checked_add(h).map_or(true, |bottom| bottom > layout.height)
        {
            return Err(UsageError::RegionOutOfRange.into());
        }
        if buf.pixel_type() != layout.pixel_type {
            return Err(crate::error::UnsupportedError::WrongPixelType {
                expected: layout.pixel_type,
                actual: buf.pixel_type(),
            }
            .into());
        }
        let el = layout.pixel_type.size();
        let spp = layout.samples as usize;
        let region_bytes = w as usize * h as usize * spp * el;
        if buf.size_bytes() != region_bytes {
            return Err(UsageError::RegionOutOfRange.into());
        }
        if region_bytes > self.limits.decoding_buffer_size {
            return Err(FormatError::InvalidDimensions(w, h).into());
        }

        let (offset_tag, count_tag) = if layout.is_tiled() {
            (Tag::TileOffsets, Tag::TileByteCounts)
        } else {
            (Tag::StripOffsets, Tag::StripByteCounts)
        };
        let offsets = ifd.require_u64s(offset_tag)?;
        let counts = ifd.require_u64s(count_tag)?;

        let (cw, ch) = layout.chunk_dims();
        let spc = layout.samples_per_chunk_pixel() as usize;
        let col0 = x / cw;
        let col1 = (x + w - 1) / cw;
        let row0 = y / ch;
        let row1 = (y + h - 1) / ch;

        let out = buf.data_mut();
        for plane in 0..layout.sample_planes() as u32 {
            for crow in row0..=row1 {
                for ccol in col0..=col1 {
                    let index = plane * layout.chunks_per_plane()
                        + crow * layout.chunks_across()
                        + ccol;
                    let data = self.read_chunk(layout, &offsets, &counts, index)?;
                    let (dw, dh) = layout.chunk_data_dims(index);
                    let cx0 = ccol * cw;
                    let cy0 = crow * ch;

                    // Intersection of the chunk's valid pixels with the
                    // requested region.
                    let ix0 = x.max(cx0);
                    let ix1 = (x + w).min((cx0 + dw).min(layout.width));
                    let iy0 = y.max(cy0);
                    let iy1 = (y + h).min((cy0 + dh).min(layout.height));
                    if ix0 >= ix1 || iy0 >= iy1 {
                        continue;
                    }

                    let seg = (ix1 - ix0) as usize * spc * el;
                    for iy in iy0..iy1 {
                        let src = ((iy - cy0) as usize * dw as usize
                            + (ix0 - cx0) as usize)
                            * spc
                            * el;
                        let dst = match layout.planar {
                            PlanarConfiguration::Planar => {
                                (plane as usize * w as usize * h as usize
                                    + (iy - y) as usize * w as usize
                                    + (ix0 - x) as usize)
                                    * el
                            }
                            _ => ((iy - y) as usize * w as usize + (ix0 - x) as usize)
                                * spp
                                * el,
                        };
                        out[dst..dst + seg].copy_from_slice(&data[src..src + seg]);
                    }
                }
            }
        }
        Ok(())
    }

    /// Fetch one chunk: read, decompress, unpack bilevel rows, and fix
    /// endianness to the host order.
    pub(crate) fn read_chunk(
        &mut self,
        layout: &PlaneLayout,
        offsets: &[u64],
        counts: &[u64],
        index: u32,
    ) -> OmeTiffResult<Vec<u8>> {
        let i = index as usize;
        if i >= offsets.len() || i >= counts.len() {
            return Err(FormatError::InconsistentSizesEncountered.into());
        }
        let compressed_len = usize::try_from(counts[i])?;
        if compressed_len > self.limits.decoding_buffer_size {
            return Err(FormatError::InvalidTag.into());
        }

        self.reader.goto_offset(offsets[i])?;
        let mut compressed = vec![0; compressed_len];
        self.reader.read_exact(&mut compressed)?;

        let packed_size = layout.chunk_packed_size(index);
        let mut data = layout.compression.decompress(&compressed, packed_size)?;

        if layout.bits == 1 {
            data = unpack_bits(&data, layout, index);
        }

        let component = component_size(layout.pixel_type);
        if component > 1 && self.byte_order() != ByteOrder::native() {
            for chunk in data.chunks_exact_mut(component) {
                chunk.reverse();
            }
        }
        Ok(data)
    }
}

/// Expand packed bilevel rows (MSB first) to one byte per sample.
fn unpack_bits(packed: &[u8], layout: &PlaneLayout, index: u32) -> Vec<u8> {
    let (dw, dh) = layout.chunk_data_dims(index);
    let samples_per_row = dw as usize * layout.samples_per_chunk_pixel() as usize;
    let packed_row = samples_per_row.div_ceil(8);

    let mut out = vec![0u8; samples_per_row * dh as usize];
    for row in 0..dh as usize {
        let src = &packed[row * packed_row..(row + 1) * packed_row];
        let dst = &mut out[row * samples_per_row..(row + 1) * samples_per_row];
        for (i, v) in dst.iter_mut().enumerate() {
            *v = (src[i / 8] >> (7 - i % 8)) & 1;
        }
    }
    out
}

/// Pack one byte per sample into bilevel rows (MSB first); inverse of
/// [`unpack_bits`], used by the encoder.
pub(crate) fn pack_bits(unpacked: &[u8], samples_per_row: usize, rows: usize) -> Vec<u8> {
    let packed_row = samples_per_row.div_ceil(8);
    let mut out = vec![0u8; packed_row * rows];
    for row in 0..rows {
        let src = &unpacked[row * samples_per_row..(row + 1) * samples_per_row];
        let dst = &mut out[row * packed_row..(row + 1) * packed_row];
        for (i, &v) in src.iter().enumerate() {
            if v != 0 {
                dst[i / 8] |= 0x80 >> (i % 8);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixel::PixelType;
    use crate::tags::PhotometricInterpretation;
    use crate::tiff::{ChunkKind, Codec};

    #[test]
    fn signature_errors() {
        let empty: &[u8] = &[];
        match TiffDecoder::new(std::io::Cursor::new(empty)) {
            Err(crate::OmeTiffError::Format(FormatError::TiffSignatureNotFound)) => {}
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
        match TiffDecoder::new(std::io::Cursor::new(b"XX\x2a\x00".to_vec())) {
            Err(crate::OmeTiffError::Format(FormatError::TiffSignatureInvalid)) => {}
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn bad_version_is_rejected() {
        match TiffDecoder::new(std::io::Cursor::new(b"II\x2c\x00\x08\x00\x00\x00".to_vec())) {
            Err(crate::OmeTiffError::Format(FormatError::VersionNotSupported(0x2c))) => {}
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn bit_packing_round_trip() {
        let layout = PlaneLayout {
            width: 10,
            height: 3,
            samples: 1,
            pixel_type: PixelType::Bit,
            bits: 1,
            planar: PlanarConfiguration::Chunky,
            photometric: PhotometricInterpretation::BlackIsZero,
            compression: Codec::None,
            chunks: ChunkKind::Strips { rows_per_strip: 3 },
        };
        let mut samples = vec![0u8; 30];
        for (i, v) in samples.iter_mut().enumerate() {
            *v = (i % 3 == 0) as u8;
        }
        let packed = pack_bits(&samples, 10, 3);
        assert_eq!(packed.len(), 6);
        let unpacked = unpack_bits(&packed, &layout, 0);
        assert_eq!(unpacked, samples);
    }
}
