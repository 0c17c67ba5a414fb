//! TIFF container writing: header, staged directory construction, and
//! chunked region encode.
//!
//! A directory under construction stages its chunk data in memory so that
//! regions may arrive in any order; flushing writes data first and the
//! directory after it, then links the directory into the main chain.
//! Sub-resolution directories are written before their parent so the
//! parent's `SubIfd` entry carries real offsets and nothing needs patching.

use std::fs::File;
use std::io::{Seek, Write};
use std::path::Path;

use crate::error::{OmeTiffResult, UsageError};
use crate::pixel::VariantPixelBuffer;
use crate::tags::{PlanarConfiguration, Tag};
use crate::tiff::decoder::pack_bits;
use crate::tiff::ifd::Ifd;
use crate::tiff::stream::{ByteOrder, EndianWriter};
use crate::tiff::{ChunkKind, PlaneLayout, TiffVariant};

/// A directory under construction: its tag entries, raster geometry, and
/// staged chunk data.
pub struct PendingIfd {
    ifd: Ifd,
    layout: Option<PlaneLayout>,
    chunks: Vec<Option<Vec<u8>>>,
}

impl PendingIfd {
    fn new(byte_order: ByteOrder) -> PendingIfd {
        PendingIfd {
            ifd: Ifd::new(byte_order),
            layout: None,
            chunks: Vec::new(),
        }
    }

    /// Direct access to the directory's entries.
    pub fn ifd_mut(&mut self) -> &mut Ifd {
        &mut self.ifd
    }

    pub fn ifd(&self) -> &Ifd {
        &self.ifd
    }

    pub fn layout(&self) -> Option<&PlaneLayout> {
        self.layout.as_ref()
    }

    /// Describe the raster and set the geometry tags. Must run before any
    /// region write.
    pub fn describe_raster(&mut self, layout: PlaneLayout) {
        let ifd = &mut self.ifd;
        ifd.set_u32(Tag::ImageWidth, layout.width);
        ifd.set_u32(Tag::ImageLength, layout.height);
        let bits = vec![layout.bits; layout.samples as usize];
        ifd.set_u16s(Tag::BitsPerSample, &bits);
        let formats = vec![layout.pixel_type.sample_format().to_u16(); layout.samples as usize];
        ifd.set_u16s(Tag::SampleFormat, &formats);
        ifd.set_u16(Tag::SamplesPerPixel, layout.samples);
        ifd.set_u16(Tag::PhotometricInterpretation, layout.photometric.to_u16());
        ifd.set_u16(Tag::PlanarConfiguration, layout.planar.to_u16());
        ifd.set_u16(Tag::Compression, layout.compression.method().to_u16());
        match layout.chunks {
            ChunkKind::Strips { rows_per_strip } => {
                ifd.set_u32(Tag::RowsPerStrip, rows_per_strip);
            }
            ChunkKind::Tiles { width, height } => {
                ifd.set_u32(Tag::TileWidth, width);
                ifd.set_u32(Tag::TileLength, height);
            }
        }
        self.chunks = vec![None; layout.chunk_count() as usize];
        self.layout = Some(layout);
    }

    /// Stage the rectangle `(x, y, w, h)` from `buf` into the chunk
    /// buffers.
    ///
    /// The buffer holds `w × h × samples` elements in native byte order,
    /// sample-interleaved for chunky rasters and plane-separated for
    /// planar ones.
    pub fn write_region(
        &mut self,
        x: u32,
        y: u32,
        w: u32,
        h: u32,
        buf: &VariantPixelBuffer<'_>,
    ) -> OmeTiffResult<()> {
        let layout = self
            .layout
            .as_ref()
            .ok_or(UsageError::NotOpen)?
            .clone();
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
        let spc = layout.samples_per_chunk_pixel() as usize;
        if buf.size_bytes() != w as usize * h as usize * spp * el {
            return Err(UsageError::RegionOutOfRange.into());
        }

        let src = buf.data();
        let (cw, ch) = layout.chunk_dims();
        let col0 = x / cw;
        let col1 = (x + w - 1) / cw;
        let row0 = y / ch;
        let row1 = (y + h - 1) / ch;

        for plane in 0..layout.sample_planes() as u32 {
            for crow in row0..=row1 {
                for ccol in col0..=col1 {
                    let index = plane * layout.chunks_per_plane()
                        + crow * layout.chunks_across()
                        + ccol;
                    let (dw, dh) = layout.chunk_data_dims(index);
                    let chunk = self.chunks[index as usize]
                        .get_or_insert_with(|| vec![0; layout.chunk_unpacked_size(index)]);

                    let cx0 = ccol * cw;
                    let cy0 = crow * ch;
                    let ix0 = x.max(cx0);
                    let ix1 = (x + w).min((cx0 + dw).min(layout.width));
                    let iy0 = y.max(cy0);
                    let iy1 = (y + h).min((cy0 + dh).min(layout.height));
                    if ix0 >= ix1 || iy0 >= iy1 {
                        continue;
                    }

                    let seg = (ix1 - ix0) as usize * spc * el;
                    for iy in iy0..iy1 {
                        let dst = ((iy - cy0) as usize * dw as usize
                            + (ix0 - cx0) as usize)
                            * spc
                            * el;
                        let src_off = match layout.planar {
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
                        chunk[dst..dst + seg].copy_from_slice(&src[src_off..src_off + seg]);
                    }
                }
            }
        }
        Ok(())
    }
}

/// A TIFF container opened for writing.
pub struct TiffEncoder<W> {
    writer: EndianWriter<W>,
    variant: TiffVariant,
    /// File position of the slot that receives the next main-chain
    /// directory offset: the header slot, then each directory's next
    /// field.
    pointer_pos: u64,
    main: Option<PendingIfd>,
    subs: Vec<PendingIfd>,
    staging_sub: bool,
}

impl TiffEncoder<File> {
    /// Create (truncating) a TIFF file on disk, in native byte order.
    pub fn create<P: AsRef<Path>>(
        path: P,
        variant: TiffVariant,
    ) -> OmeTiffResult<TiffEncoder<File>> {
        TiffEncoder::new(File::create(path)?, variant)
    }
}

impl<W: Write + Seek> TiffEncoder<W> {
    /// Write the header and prepare for directory construction.
    pub fn new(writer: W, variant: TiffVariant) -> OmeTiffResult<TiffEncoder<W>> {
        let byte_order = ByteOrder::native();
        let mut writer = EndianWriter::new(writer, byte_order);

        match byte_order {
            ByteOrder::LittleEndian => writer.write_bytes(b"II")?,
            ByteOrder::BigEndian => writer.write_bytes(b"MM")?,
        }
        match variant {
            TiffVariant::Classic => writer.write_u16(42)?,
            TiffVariant::Big => {
                writer.write_u16(43)?;
                // bytesize of offsets (pointer size)
                writer.write_u16(8)?;
                // always 0
                writer.write_u16(0)?;
            }
        }
        let pointer_pos = writer.offset();
        match variant {
            TiffVariant::Classic => writer.write_u32(0)?,
            TiffVariant::Big => writer.write_u64(0)?,
        }

        Ok(TiffEncoder {
            writer,
            variant,
            pointer_pos,
            main: None,
            subs: Vec::new(),
            staging_sub: false,
        })
    }

    pub fn variant(&self) -> TiffVariant {
        self.variant
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.writer.byte_order()
    }

    /// Begin a new main-chain directory. Any directory in progress is
    /// flushed first.
    pub fn start_ifd(&mut self) -> OmeTiffResult<()> {
        if self.main.is_some() {
            self.flush_ifd()?;
        }
        self.main = Some(PendingIfd::new(self.byte_order()));
        self.staging_sub = false;
        Ok(())
    }

    /// Begin a sub-resolution directory of the current main directory.
    /// Subsequent staging targets it until the next `start_ifd` or
    /// `start_sub_ifd`.
    pub fn start_sub_ifd(&mut self) -> OmeTiffResult<()> {
        if self.main.is_none() {
            return Err(UsageError::NotOpen.into());
        }
        self.subs.push(PendingIfd::new(self.byte_order()));
        self.staging_sub = true;
        Ok(())
    }

    /// The directory currently receiving tags and pixel data.
    pub fn current(&mut self) -> OmeTiffResult<&mut PendingIfd> {
        let pending = if self.staging_sub {
            self.subs.last_mut()
        } else {
            self.main.as_mut()
        };
        pending.ok_or_else(|| UsageError::NotOpen.into())
    }

    /// Whether a directory is currently under construction.
    pub fn has_pending(&self) -> bool {
        self.main.is_some()
    }

    /// Whether staging currently targets a sub-resolution directory.
    pub fn is_staging_sub(&self) -> bool {
        self.staging_sub
    }

    /// Point staging back at the main directory.
    pub fn resume_main(&mut self) {
        self.staging_sub = false;
    }

    /// Write the pending directory (and its sub-directories) to the file
    /// and link it into the main chain. Returns the directory offset.
    pub fn flush_ifd(&mut self) -> OmeTiffResult<u64> {
        let mut main = self.main.take().ok_or(UsageError::NotOpen)?;
        let subs = std::mem::take(&mut self.subs);
        self.staging_sub = false;

        // Children first, so the parent's SubIfd entry carries final
        // offsets.
        let mut sub_offsets = Vec::with_capacity(subs.len());
        for mut sub in subs {
            self.write_chunk_data(&mut sub)?;
            let offset = self.write_directory(&mut sub.ifd, false)?;
            sub_offsets.push(offset);
        }
        if !sub_offsets.is_empty() {
            main.ifd.set_offsets(Tag::SubIfd, &sub_offsets, self.variant)?;
        }

        self.write_chunk_data(&mut main)?;
        self.write_directory(&mut main.ifd, true)
    }

    /// Flush any pending directory and the underlying stream.
    pub fn finish(&mut self) -> OmeTiffResult<()> {
        if self.main.is_some() {
            self.flush_ifd()?;
        }
        self.writer.flush()?;
        Ok(())
    }

    /// Compress and write the staged chunks, recording offsets and byte
    /// counts in the directory. Chunks never written stay zero-filled.
    fn write_chunk_data(&mut self, pending: &mut PendingIfd) -> OmeTiffResult<()> {
        let Some(layout) = pending.layout.clone() else {
            return Ok(());
        };
        let mut offsets = Vec::with_capacity(pending.chunks.len());
        let mut counts = Vec::with_capacity(pending.chunks.len());
        for (index, chunk) in pending.chunks.iter().enumerate() {
            let index = index as u32;
            let zeroes;
            let data: &[u8] = match chunk {
                Some(data) => data,
                None => {
                    zeroes = vec![0u8; layout.chunk_unpacked_size(index)];
                    &zeroes
                }
            };
            let packed;
            let data = if layout.bits == 1 {
                let (dw, dh) = layout.chunk_data_dims(index);
                let samples_per_row = dw as usize * layout.samples_per_chunk_pixel() as usize;
                packed = pack_bits(data, samples_per_row, dh as usize);
                &packed[..]
            } else {
                data
            };
            let compressed = layout.compression.compress(data)?;

            self.writer.pad_word_boundary()?;
            let offset = self.writer.offset();
            if offset > self.variant.max_offset() {
                return Err(crate::OmeTiffError::IntSize);
            }
            self.writer.write_bytes(&compressed)?;
            offsets.push(offset);
            counts.push(u32::try_from(compressed.len())?);
        }

        let (offset_tag, count_tag) = if layout.is_tiled() {
            (Tag::TileOffsets, Tag::TileByteCounts)
        } else {
            (Tag::StripOffsets, Tag::StripByteCounts)
        };
        pending.ifd.set_offsets(offset_tag, &offsets, self.variant)?;
        pending.ifd.set_u32s(count_tag, &counts);
        Ok(())
    }

    /// Serialise a directory at the current end of file. External values
    /// are written first; `link` inserts the directory into the main
    /// chain.
    fn write_directory(&mut self, ifd: &mut Ifd, link: bool) -> OmeTiffResult<u64> {
        let inline_size = self.variant.offset_size();

        // First pass: externalise values that do not fit the entry.
        let mut external = Vec::new();
        for (&tag, entry) in ifd.iter() {
            if entry.data.len() > inline_size {
                self.writer.pad_word_boundary()?;
                let offset = self.writer.offset();
                if offset > self.variant.max_offset() {
                    return Err(crate::OmeTiffError::IntSize);
                }
                self.writer.write_bytes(&entry.data)?;
                external.push((tag, offset));
            }
        }
        let external: std::collections::HashMap<u16, u64> = external.into_iter().collect();

        self.writer.pad_word_boundary()?;
        let dir_offset = self.writer.offset();
        if dir_offset > self.variant.max_offset() {
            return Err(crate::OmeTiffError::IntSize);
        }

        match self.variant {
            TiffVariant::Classic => self.writer.write_u16(u16::try_from(ifd.len())?)?,
            TiffVariant::Big => self.writer.write_u64(ifd.len() as u64)?,
        }
        for (&tag, entry) in ifd.iter() {
            self.writer.write_u16(tag)?;
            self.writer.write_u16(entry.type_.to_u16())?;
            match self.variant {
                TiffVariant::Classic => self.writer.write_u32(u32::try_from(entry.count)?)?,
                TiffVariant::Big => self.writer.write_u64(entry.count)?,
            }
            match external.get(&tag) {
                Some(&offset) => match self.variant {
                    TiffVariant::Classic => self.writer.write_u32(u32::try_from(offset)?)?,
                    TiffVariant::Big => self.writer.write_u64(offset)?,
                },
                None => {
                    let mut inline = entry.data.clone();
                    inline.resize(inline_size, 0);
                    self.writer.write_bytes(&inline)?;
                }
            }
        }
        // The next-directory pointer; zero until a successor is linked.
        let next_pos = self.writer.offset();
        match self.variant {
            TiffVariant::Classic => self.writer.write_u32(0)?,
            TiffVariant::Big => self.writer.write_u64(0)?,
        }
        let end = self.writer.offset();

        if link {
            self.writer.goto_offset(self.pointer_pos)?;
            match self.variant {
                TiffVariant::Classic => self.writer.write_u32(u32::try_from(dir_offset)?)?,
                TiffVariant::Big => self.writer.write_u64(dir_offset)?,
            }
            self.writer.goto_offset(end)?;
            self.pointer_pos = next_pos;
        }
        Ok(dir_offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixel::{PixelType, StorageOrder, VariantPixelBuffer};
    use crate::tags::PhotometricInterpretation;
    use crate::tiff::{Codec, TiffDecoder};
    use std::io::Cursor;

    fn gray_layout(width: u32, height: u32) -> PlaneLayout {
        PlaneLayout {
            width,
            height,
            samples: 1,
            pixel_type: PixelType::UInt8,
            bits: 8,
            planar: PlanarConfiguration::Chunky,
            photometric: PhotometricInterpretation::BlackIsZero,
            compression: Codec::None,
            chunks: ChunkKind::Strips { rows_per_strip: 2 },
        }
    }

    fn gray_plane(width: usize, height: usize) -> VariantPixelBuffer<'static> {
        let mut buf = VariantPixelBuffer::with_order(
            PixelType::UInt8,
            crate::pixel::plane_extents(width, height, 1),
            StorageOrder::for_plane(true),
            crate::pixel::EndianType::Native,
        );
        for (i, v) in buf.data_mut().iter_mut().enumerate() {
            *v = i as u8;
        }
        buf
    }

    #[test]
    fn encode_decode_single_ifd() {
        let mut file = Cursor::new(Vec::new());
        {
            let mut enc = TiffEncoder::new(&mut file, TiffVariant::Classic).unwrap();
            enc.start_ifd().unwrap();
            enc.current().unwrap().describe_raster(gray_layout(4, 4));
            enc.current()
                .unwrap()
                .write_region(0, 0, 4, 4, &gray_plane(4, 4))
                .unwrap();
            enc.finish().unwrap();
        }

        file.set_position(0);
        let mut dec = TiffDecoder::new(file).unwrap();
        assert_eq!(dec.ifd_count(), 1);
        let ifd = dec.read_main_ifd(0).unwrap();
        assert_eq!(ifd.get_u32(Tag::ImageWidth).unwrap(), Some(4));

        let mut out = gray_plane(4, 4);
        out.data_mut().fill(0);
        dec.read_region(&ifd, 0, 0, 4, 4, &mut out).unwrap();
        assert_eq!(out.data(), gray_plane(4, 4).data());
    }

    #[test]
    fn chained_ifds_link_in_order() {
        let mut file = Cursor::new(Vec::new());
        {
            let mut enc = TiffEncoder::new(&mut file, TiffVariant::Classic).unwrap();
            for _ in 0..3 {
                enc.start_ifd().unwrap();
                enc.current().unwrap().describe_raster(gray_layout(2, 2));
                enc.current()
                    .unwrap()
                    .write_region(0, 0, 2, 2, &gray_plane(2, 2))
                    .unwrap();
            }
            enc.finish().unwrap();
        }
        file.set_position(0);
        let mut dec = TiffDecoder::new(file).unwrap();
        assert_eq!(dec.ifd_count(), 3);
        for i in 0..3 {
            let ifd = dec.read_main_ifd(i).unwrap();
            assert_eq!(ifd.get_u32(Tag::ImageLength).unwrap(), Some(2));
        }
    }

    #[test]
    fn sub_ifds_attach_to_parent() {
        let mut file = Cursor::new(Vec::new());
        {
            let mut enc = TiffEncoder::new(&mut file, TiffVariant::Classic).unwrap();
            enc.start_ifd().unwrap();
            enc.current().unwrap().describe_raster(gray_layout(4, 4));
            enc.current()
                .unwrap()
                .write_region(0, 0, 4, 4, &gray_plane(4, 4))
                .unwrap();
            enc.start_sub_ifd().unwrap();
            enc.current().unwrap().describe_raster(gray_layout(2, 2));
            enc.current()
                .unwrap()
                .write_region(0, 0, 2, 2, &gray_plane(2, 2))
                .unwrap();
            enc.finish().unwrap();
        }
        file.set_position(0);
        let mut dec = TiffDecoder::new(file).unwrap();
        assert_eq!(dec.ifd_count(), 1);
        let parent = dec.read_main_ifd(0).unwrap();
        let subs = parent.get_u64s(Tag::SubIfd).unwrap().unwrap();
        assert_eq!(subs.len(), 1);
        let child = dec.read_ifd(crate::tags::IfdPointer(subs[0])).unwrap();
        assert_eq!(child.get_u32(Tag::ImageWidth).unwrap(), Some(2));
    }

    #[test]
    fn bigtiff_round_trip() {
        let mut file = Cursor::new(Vec::new());
        {
            let mut enc = TiffEncoder::new(&mut file, TiffVariant::Big).unwrap();
            enc.start_ifd().unwrap();
            enc.current().unwrap().describe_raster(gray_layout(4, 4));
            enc.current()
                .unwrap()
                .write_region(0, 0, 4, 4, &gray_plane(4, 4))
                .unwrap();
            enc.finish().unwrap();
        }
        file.set_position(0);
        let mut dec = TiffDecoder::new(file).unwrap();
        assert!(dec.is_big());
        let ifd = dec.read_main_ifd(0).unwrap();
        let mut out = gray_plane(4, 4);
        out.data_mut().fill(0);
        dec.read_region(&ifd, 0, 0, 4, 4, &mut out).unwrap();
        assert_eq!(out.data(), gray_plane(4, 4).data());
    }

    #[test]
    fn partial_region_writes_compose() {
        let mut file = Cursor::new(Vec::new());
        {
            let mut enc = TiffEncoder::new(&mut file, TiffVariant::Classic).unwrap();
            enc.start_ifd().unwrap();
            enc.current().unwrap().describe_raster(gray_layout(4, 4));
            // Write the raster in two horizontal halves.
            let top = gray_plane(4, 2);
            enc.current().unwrap().write_region(0, 0, 4, 2, &top).unwrap();
            enc.current().unwrap().write_region(0, 2, 4, 2, &top).unwrap();
            enc.finish().unwrap();
        }
        file.set_position(0);
        let mut dec = TiffDecoder::new(file).unwrap();
        let ifd = dec.read_main_ifd(0).unwrap();
        let mut out = gray_plane(4, 4);
        out.data_mut().fill(0);
        dec.read_region(&ifd, 0, 0, 4, 4, &mut out).unwrap();
        let expected: Vec<u8> = (0..8).chain(0..8).collect();
        assert_eq!(out.data(), &expected[..]);
    }
}
