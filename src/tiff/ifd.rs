//! Image file directories and the typed tag codec.
//!
//! A [`Ifd`] is a self-contained map of tag entries with their raw value
//! bytes; external values are loaded when the directory is read, so typed
//! accessors are short-lived views over borrowed entry data and never reach
//! back into the file.
//!
//! The accessors normalise the historical variance of tag storage: scalars
//! stored wider or narrower than their definition, offset fields stored as
//! any of `SHORT`/`LONG`/`LONG8`/`IFD`/`IFD8`, string lists joined on NUL,
//! and the `ColorMap`/`TransferFunction` multi-array layouts.

use std::collections::btree_map;
use std::collections::BTreeMap;
use std::io::Cursor;

use crate::error::{FormatError, OmeTiffResult};
use crate::tags::{IfdPointer, Tag, Type};
use crate::tiff::stream::{ByteOrder, EndianReader, EndianWriter};
use crate::tiff::TiffVariant;

/// How many values a tag's field carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldCount {
    /// The definition fixes the count.
    Fixed(u64),
    /// The count is free, given by the entry.
    Variable,
    /// The count is free and self-describing in the data (ImageJ pair).
    Variable2,
    /// One value per sample (`SamplesPerPixel`).
    SamplesPerPixel,
    /// One value per strip or tile, derived from the raster geometry.
    ChunkTable,
    /// `3 * 2^BitsPerSample` (`ColorMap`), or collapsing to one array
    /// (`TransferFunction`).
    BitsPerSampleDerived,
}

/// The value shape class of a tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldShape {
    Ascii,
    /// NUL-separated string list.
    AsciiArray,
    Short,
    Long,
    Rational,
    ShortArray,
    LongArray,
    /// 64-bit offsets (`LONG8`/`IFD8` under BigTIFF).
    Long8Array,
    ByteArray,
    /// A 16-bit value mapped onto an external enum.
    Enum16,
}

/// Classify a tag by value shape and count policy.
///
/// Unknown tags read and write as raw byte blobs.
pub fn field_shape(tag: Tag) -> (FieldShape, FieldCount) {
    use FieldCount::*;
    use FieldShape::*;
    match tag {
        Tag::ImageDescription | Tag::Software | Tag::DateTime => (Ascii, Variable),
        Tag::ImageWidth | Tag::ImageLength | Tag::RowsPerStrip | Tag::TileWidth
        | Tag::TileLength => (Long, Fixed(1)),
        Tag::NewSubfileType | Tag::SubfileType => (Long, Fixed(1)),
        Tag::BitsPerSample | Tag::SampleFormat | Tag::MinSampleValue | Tag::MaxSampleValue => {
            (ShortArray, SamplesPerPixel)
        }
        Tag::Compression
        | Tag::PhotometricInterpretation
        | Tag::PlanarConfiguration
        | Tag::Predictor
        | Tag::ResolutionUnit
        | Tag::FillOrder
        | Tag::Orientation => (Enum16, Fixed(1)),
        Tag::SamplesPerPixel => (Short, Fixed(1)),
        Tag::PageNumber => (Short, Fixed(2)),
        Tag::ExtraSamples => (ShortArray, Variable),
        Tag::StripOffsets | Tag::StripByteCounts | Tag::TileOffsets | Tag::TileByteCounts => {
            (LongArray, ChunkTable)
        }
        Tag::SubIfd => (Long8Array, Variable),
        Tag::XResolution | Tag::YResolution => (Rational, Fixed(1)),
        Tag::ColorMap | Tag::TransferFunction => (ShortArray, BitsPerSampleDerived),
        Tag::ImageJMetaData | Tag::ImageJMetaDataByteCounts => (ByteArray, Variable2),
        _ => (ByteArray, Variable),
    }
}

/// One directory entry: its declared type, count, and raw value bytes in
/// the file's byte order.
#[derive(Clone, PartialEq)]
pub struct Entry {
    pub type_: Type,
    pub count: u64,
    pub data: Vec<u8>,
}

impl std::fmt::Debug for Entry {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> Result<(), std::fmt::Error> {
        write!(
            fmt,
            "Entry {{ type_: {:?}, count: {:?}, {} bytes }}",
            self.type_,
            self.count,
            self.data.len()
        )
    }
}

impl Entry {
    pub fn new(type_: Type, count: u64, data: Vec<u8>) -> Entry {
        Entry { type_, count, data }
    }

    fn reader(&self, byte_order: ByteOrder) -> EndianReader<Cursor<&[u8]>> {
        EndianReader::new(Cursor::new(self.data.as_slice()), byte_order)
    }

    fn shape_error(&self, tag: Tag) -> FormatError {
        FormatError::FieldShapeMismatch {
            tag,
            ty: self.type_,
            count: self.count,
        }
    }

    /// Unsigned integer values at any declared width.
    ///
    /// This is the width-probing read: a field defined as `SHORT` is
    /// accepted when stored as `LONG` or `LONG8`, and the `IFD`/`IFD8`
    /// offset types read interchangeably with their `LONG` counterparts.
    pub fn unsigned_values(&self, tag: Tag, byte_order: ByteOrder) -> OmeTiffResult<Vec<u64>> {
        let mut r = self.reader(byte_order);
        let mut out = Vec::with_capacity(self.count as usize);
        for _ in 0..self.count {
            let v = match self.type_ {
                Type::BYTE | Type::UNDEFINED => u64::from(r.read_u8()?),
                Type::SHORT => u64::from(r.read_u16()?),
                Type::LONG | Type::IFD => u64::from(r.read_u32()?),
                Type::LONG8 | Type::IFD8 => r.read_u64()?,
                _ => return Err(self.shape_error(tag).into()),
            };
            out.push(v);
        }
        Ok(out)
    }

    /// Signed integer values at any declared width.
    pub fn signed_values(&self, tag: Tag, byte_order: ByteOrder) -> OmeTiffResult<Vec<i64>> {
        let mut r = self.reader(byte_order);
        let mut out = Vec::with_capacity(self.count as usize);
        for _ in 0..self.count {
            let v = match self.type_ {
                Type::SBYTE => i64::from(r.read_i8()?),
                Type::SSHORT => i64::from(r.read_i16()?),
                Type::SLONG => i64::from(r.read_i32()?),
                Type::SLONG8 => r.read_i64()?,
                _ => return Err(self.shape_error(tag).into()),
            };
            out.push(v);
        }
        Ok(out)
    }

    /// Floating point values, accepting rationals.
    pub fn float_values(&self, tag: Tag, byte_order: ByteOrder) -> OmeTiffResult<Vec<f64>> {
        let mut r = self.reader(byte_order);
        let mut out = Vec::with_capacity(self.count as usize);
        for _ in 0..self.count {
            let v = match self.type_ {
                Type::FLOAT => f64::from(r.read_f32()?),
                Type::DOUBLE => r.read_f64()?,
                Type::RATIONAL => {
                    let n = r.read_u32()?;
                    let d = r.read_u32()?;
                    f64::from(n) / f64::from(d.max(1))
                }
                Type::SRATIONAL => {
                    let n = r.read_i32()?;
                    let d = r.read_i32()?;
                    f64::from(n) / f64::from(if d == 0 { 1 } else { d })
                }
                _ => return Err(self.shape_error(tag).into()),
            };
            out.push(v);
        }
        Ok(out)
    }

    /// The NUL-terminated string of an `ASCII` entry; extra padding after
    /// the terminator is tolerated.
    pub fn string_value(&self, tag: Tag) -> OmeTiffResult<String> {
        if self.type_ != Type::ASCII {
            return Err(self.shape_error(tag).into());
        }
        let end = self
            .data
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.data.len());
        Ok(std::str::from_utf8(&self.data[..end])?.to_string())
    }

    /// All NUL-separated strings of an `ASCII` entry.
    pub fn string_values(&self, tag: Tag) -> OmeTiffResult<Vec<String>> {
        if self.type_ != Type::ASCII {
            return Err(self.shape_error(tag).into());
        }
        self.data
            .split(|&b| b == 0)
            .filter(|s| !s.is_empty())
            .map(|s| Ok(std::str::from_utf8(s)?.to_string()))
            .collect()
    }

    /// Raw bytes of a `BYTE`/`UNDEFINED` blob.
    pub fn byte_values(&self, tag: Tag) -> OmeTiffResult<Vec<u8>> {
        match self.type_ {
            Type::BYTE | Type::UNDEFINED | Type::ASCII => Ok(self.data.clone()),
            _ => Err(self.shape_error(tag).into()),
        }
    }
}

/// An image file directory: tag entries in ascending tag order, plus the
/// byte order the raw entry data is stored in.
#[derive(Clone, Debug)]
pub struct Ifd {
    byte_order: ByteOrder,
    entries: BTreeMap<u16, Entry>,
    /// Where the directory was read from; `None` for directories under
    /// construction.
    offset: Option<IfdPointer>,
    /// The chained next-directory pointer, zero meaning end of chain.
    next: Option<IfdPointer>,
}

impl Ifd {
    pub fn new(byte_order: ByteOrder) -> Ifd {
        Ifd {
            byte_order,
            entries: BTreeMap::new(),
            offset: None,
            next: None,
        }
    }

    pub(crate) fn from_parts(
        byte_order: ByteOrder,
        entries: BTreeMap<u16, Entry>,
        offset: IfdPointer,
        next: Option<IfdPointer>,
    ) -> Ifd {
        Ifd {
            byte_order,
            entries,
            offset: Some(offset),
            next,
        }
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    /// File position this directory was read from, if any.
    pub fn offset(&self) -> Option<IfdPointer> {
        self.offset
    }

    /// Pointer to the next directory in the main chain.
    pub fn next(&self) -> Option<IfdPointer> {
        self.next
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, tag: Tag) -> bool {
        self.entries.contains_key(&tag.to_u16())
    }

    pub fn entry(&self, tag: Tag) -> Option<&Entry> {
        self.entries.get(&tag.to_u16())
    }

    pub fn insert(&mut self, tag: Tag, entry: Entry) {
        self.entries.insert(tag.to_u16(), entry);
    }

    pub fn remove(&mut self, tag: Tag) -> Option<Entry> {
        self.entries.remove(&tag.to_u16())
    }

    /// Entries in ascending tag order.
    pub fn iter(&self) -> btree_map::Iter<'_, u16, Entry> {
        self.entries.iter()
    }

    //
    // Typed getters
    //

    pub fn get_string(&self, tag: Tag) -> OmeTiffResult<Option<String>> {
        self.entry(tag).map(|e| e.string_value(tag)).transpose()
    }

    pub fn require_string(&self, tag: Tag) -> OmeTiffResult<String> {
        self.get_string(tag)?
            .ok_or_else(|| FormatError::RequiredTagNotFound(tag).into())
    }

    pub fn get_string_array(&self, tag: Tag) -> OmeTiffResult<Option<Vec<String>>> {
        self.entry(tag).map(|e| e.string_values(tag)).transpose()
    }

    /// Scalar unsigned value at any width.
    ///
    /// Some historical writers store the wrong count for the broken
    /// scalar-short tags; the first value is used and the excess ignored.
    pub fn get_u64(&self, tag: Tag) -> OmeTiffResult<Option<u64>> {
        match self.entry(tag) {
            None => Ok(None),
            Some(e) => {
                let values = e.unsigned_values(tag, self.byte_order)?;
                match values.first() {
                    Some(&v) => Ok(Some(v)),
                    None => Err(FormatError::RequiredTagEmpty(tag).into()),
                }
            }
        }
    }

    pub fn get_u32(&self, tag: Tag) -> OmeTiffResult<Option<u32>> {
        match self.get_u64(tag)? {
            None => Ok(None),
            Some(v) => Ok(Some(u32::try_from(v)?)),
        }
    }

    pub fn get_u16(&self, tag: Tag) -> OmeTiffResult<Option<u16>> {
        match self.get_u64(tag)? {
            None => Ok(None),
            Some(v) => Ok(Some(u16::try_from(v)?)),
        }
    }

    pub fn require_u32(&self, tag: Tag) -> OmeTiffResult<u32> {
        self.get_u32(tag)?
            .ok_or_else(|| FormatError::RequiredTagNotFound(tag).into())
    }

    pub fn get_u16s(&self, tag: Tag) -> OmeTiffResult<Option<Vec<u16>>> {
        match self.entry(tag) {
            None => Ok(None),
            Some(e) => {
                let values = e.unsigned_values(tag, self.byte_order)?;
                let narrowed = values
                    .into_iter()
                    .map(u16::try_from)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Some(narrowed))
            }
        }
    }

    /// Unsigned array at any width, widened to `u64`.
    pub fn get_u64s(&self, tag: Tag) -> OmeTiffResult<Option<Vec<u64>>> {
        self.entry(tag)
            .map(|e| e.unsigned_values(tag, self.byte_order))
            .transpose()
    }

    pub fn require_u64s(&self, tag: Tag) -> OmeTiffResult<Vec<u64>> {
        self.get_u64s(tag)?
            .ok_or_else(|| FormatError::RequiredTagNotFound(tag).into())
    }

    pub fn get_f64s(&self, tag: Tag) -> OmeTiffResult<Option<Vec<f64>>> {
        self.entry(tag)
            .map(|e| e.float_values(tag, self.byte_order))
            .transpose()
    }

    pub fn get_bytes(&self, tag: Tag) -> OmeTiffResult<Option<Vec<u8>>> {
        self.entry(tag).map(|e| e.byte_values(tag)).transpose()
    }

    /// The `ColorMap` triple: three arrays of `2^BitsPerSample` values.
    pub fn colormap(&self) -> OmeTiffResult<Option<[Vec<u16>; 3]>> {
        let Some(values) = self.get_u16s(Tag::ColorMap)? else {
            return Ok(None);
        };
        let per_channel = values.len() / 3;
        if per_channel == 0 || values.len() != per_channel * 3 {
            return Err(FormatError::FieldShapeMismatch {
                tag: Tag::ColorMap,
                ty: Type::SHORT,
                count: values.len() as u64,
            }
            .into());
        }
        let mut it = values.chunks_exact(per_channel);
        let red = it.next().unwrap_or_default().to_vec();
        let green = it.next().unwrap_or_default().to_vec();
        let blue = it.next().unwrap_or_default().to_vec();
        Ok(Some([red, green, blue]))
    }

    pub fn set_colormap(&mut self, channels: &[Vec<u16>; 3]) {
        let mut joined =
            Vec::with_capacity(channels[0].len() + channels[1].len() + channels[2].len());
        for channel in channels {
            joined.extend_from_slice(channel);
        }
        self.set_u16s(Tag::ColorMap, &joined);
    }

    /// The `TransferFunction` arrays: one per channel, collapsing to a
    /// single array shared by all channels when `channels == 1` or the
    /// stored count covers only one.
    pub fn transfer_function(&self, channels: u16) -> OmeTiffResult<Option<Vec<Vec<u16>>>> {
        let Some(values) = self.get_u16s(Tag::TransferFunction)? else {
            return Ok(None);
        };
        let per_channel_count = usize::from(channels.max(1));
        if values.len() % per_channel_count == 0 {
            let per_channel = values.len() / per_channel_count;
            if per_channel > 0 {
                return Ok(Some(
                    values.chunks_exact(per_channel).map(<[u16]>::to_vec).collect(),
                ));
            }
        }
        // A single shared array.
        Ok(Some(vec![values]))
    }

    pub fn set_transfer_function(&mut self, channels: &[Vec<u16>]) {
        let joined: Vec<u16> = channels.iter().flatten().copied().collect();
        self.set_u16s(Tag::TransferFunction, &joined);
    }

    //
    // Typed setters. Values are encoded in the directory's byte order at
    // the canonical width for the tag's shape; `set_offsets` widens to
    // `LONG8` under BigTIFF.
    //

    fn build<F>(&self, write: F) -> Vec<u8>
    where
        F: FnOnce(&mut EndianWriter<&mut Vec<u8>>) -> std::io::Result<()>,
    {
        let mut data = Vec::new();
        let mut w = EndianWriter::new(&mut data, self.byte_order);
        // Writing to a Vec cannot fail.
        write(&mut w).unwrap();
        data
    }

    pub fn set_u16(&mut self, tag: Tag, value: u16) {
        self.set_u16s(tag, &[value]);
    }

    pub fn set_u16s(&mut self, tag: Tag, values: &[u16]) {
        let data = self.build(|w| {
            for &v in values {
                w.write_u16(v)?;
            }
            Ok(())
        });
        self.insert(tag, Entry::new(Type::SHORT, values.len() as u64, data));
    }

    pub fn set_u32(&mut self, tag: Tag, value: u32) {
        self.set_u32s(tag, &[value]);
    }

    pub fn set_u32s(&mut self, tag: Tag, values: &[u32]) {
        let data = self.build(|w| {
            for &v in values {
                w.write_u32(v)?;
            }
            Ok(())
        });
        self.insert(tag, Entry::new(Type::LONG, values.len() as u64, data));
    }

    /// Offset values at the variant's width. Fails on a classic file when
    /// any offset exceeds 32 bits.
    pub fn set_offsets(
        &mut self,
        tag: Tag,
        values: &[u64],
        variant: TiffVariant,
    ) -> OmeTiffResult<()> {
        match variant {
            TiffVariant::Classic => {
                let narrowed = values
                    .iter()
                    .map(|&v| u32::try_from(v))
                    .collect::<Result<Vec<_>, _>>()?;
                self.set_u32s(tag, &narrowed);
            }
            TiffVariant::Big => {
                let data = self.build(|w| {
                    for &v in values {
                        w.write_u64(v)?;
                    }
                    Ok(())
                });
                self.insert(tag, Entry::new(Type::LONG8, values.len() as u64, data));
            }
        }
        Ok(())
    }

    /// NUL-terminated string.
    pub fn set_string(&mut self, tag: Tag, value: &str) {
        let mut data = value.as_bytes().to_vec();
        data.push(0);
        let count = data.len() as u64;
        self.insert(tag, Entry::new(Type::ASCII, count, data));
    }

    /// NUL-joined string list.
    pub fn set_string_array(&mut self, tag: Tag, values: &[String]) {
        let mut data = Vec::new();
        for v in values {
            data.extend_from_slice(v.as_bytes());
            data.push(0);
        }
        let count = data.len() as u64;
        self.insert(tag, Entry::new(Type::ASCII, count, data));
    }

    pub fn set_bytes(&mut self, tag: Tag, type_: Type, values: &[u8]) {
        debug_assert!(matches!(type_, Type::BYTE | Type::UNDEFINED));
        self.insert(tag, Entry::new(type_, values.len() as u64, values.to_vec()));
    }

    pub fn set_rational(&mut self, tag: Tag, numerator: u32, denominator: u32) {
        let data = self.build(|w| {
            w.write_u32(numerator)?;
            w.write_u32(denominator)
        });
        self.insert(tag, Entry::new(Type::RATIONAL, 1, data));
    }

    /// The count the field ought to have given the directory's other
    /// entries, for the count policies that derive it. `None` when the
    /// policy is free or the needed context is missing.
    pub fn expected_count(&self, tag: Tag) -> OmeTiffResult<Option<u64>> {
        let (_, count) = field_shape(tag);
        Ok(match count {
            FieldCount::Fixed(n) => Some(n),
            FieldCount::SamplesPerPixel => {
                Some(u64::from(self.get_u16(Tag::SamplesPerPixel)?.unwrap_or(1)))
            }
            FieldCount::ChunkTable => {
                let layout = crate::tiff::PlaneLayout::from_ifd(self);
                layout.ok().map(|l| u64::from(l.chunk_count()))
            }
            FieldCount::BitsPerSampleDerived => {
                let bits = self.get_u16(Tag::BitsPerSample)?.unwrap_or(1);
                match tag {
                    Tag::ColorMap => Some(3 * (1u64 << bits.min(16))),
                    _ => None,
                }
            }
            FieldCount::Variable | FieldCount::Variable2 => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ifd() -> Ifd {
        Ifd::new(ByteOrder::LittleEndian)
    }

    #[test]
    fn scalar_setters_read_back() {
        let mut d = ifd();
        d.set_u16(Tag::SamplesPerPixel, 3);
        d.set_u32(Tag::ImageWidth, 70000);
        assert_eq!(d.get_u16(Tag::SamplesPerPixel).unwrap(), Some(3));
        assert_eq!(d.get_u32(Tag::ImageWidth).unwrap(), Some(70000));
        // Width probing: a SHORT-defined tag reads through the u64 path.
        assert_eq!(d.get_u64(Tag::SamplesPerPixel).unwrap(), Some(3));
    }

    #[test]
    fn string_setters_read_back() {
        let mut d = ifd();
        d.set_string(Tag::ImageDescription, "OME-TIFF");
        let entry = d.entry(Tag::ImageDescription).unwrap();
        assert_eq!(entry.type_, Type::ASCII);
        assert_eq!(entry.count, 9);
        assert_eq!(
            d.get_string(Tag::ImageDescription).unwrap().as_deref(),
            Some("OME-TIFF")
        );
    }

    #[test]
    fn string_array_splits_on_nul() {
        let mut d = ifd();
        d.set_string_array(
            Tag::Software,
            &["one".to_string(), "two".to_string()],
        );
        assert_eq!(
            d.get_string_array(Tag::Software).unwrap().unwrap(),
            vec!["one".to_string(), "two".to_string()]
        );
        // The scalar accessor sees the first string.
        assert_eq!(d.get_string(Tag::Software).unwrap().as_deref(), Some("one"));
    }

    #[test]
    fn offsets_widen_under_bigtiff() {
        let mut d = ifd();
        let big = [u64::from(u32::MAX) + 10];
        assert!(d.set_offsets(Tag::SubIfd, &big, TiffVariant::Classic).is_err());
        d.set_offsets(Tag::SubIfd, &big, TiffVariant::Big).unwrap();
        assert_eq!(d.entry(Tag::SubIfd).unwrap().type_, Type::LONG8);
        assert_eq!(d.get_u64s(Tag::SubIfd).unwrap().unwrap(), big);
    }

    #[test]
    fn shape_mismatch_is_reported() {
        let mut d = ifd();
        d.set_string(Tag::ImageWidth, "not a number");
        match d.get_u32(Tag::ImageWidth) {
            Err(crate::OmeTiffError::Format(FormatError::FieldShapeMismatch {
                tag, ..
            })) => assert_eq!(tag, Tag::ImageWidth),
            other => panic!("expected shape mismatch, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn colormap_round_trip() {
        let mut d = ifd();
        d.set_u16(Tag::BitsPerSample, 2);
        let channels = [vec![0, 1, 2, 3], vec![4, 5, 6, 7], vec![8, 9, 10, 11]];
        d.set_colormap(&channels);
        assert_eq!(d.colormap().unwrap().unwrap(), channels);
        assert_eq!(d.expected_count(Tag::ColorMap).unwrap(), Some(12));
    }

    #[test]
    fn transfer_function_collapses_for_single_channel() {
        let mut d = ifd();
        let shared = vec![0u16, 100, 200, 300];
        d.set_transfer_function(std::slice::from_ref(&shared));
        let tables = d.transfer_function(1).unwrap().unwrap();
        assert_eq!(tables, vec![shared.clone()]);
        let three = d.transfer_function(2).unwrap().unwrap();
        assert_eq!(three.len(), 2);
    }

    #[test]
    fn broken_scalar_counts_are_tolerated() {
        let mut d = ifd();
        // A writer that stored Compression with count 2.
        d.set_u16s(Tag::Compression, &[5, 5]);
        assert_eq!(d.get_u16(Tag::Compression).unwrap(), Some(5));
    }

    #[test]
    fn field_shapes_classify_known_tags() {
        assert_eq!(
            field_shape(Tag::StripOffsets),
            (FieldShape::LongArray, FieldCount::ChunkTable)
        );
        assert_eq!(
            field_shape(Tag::ImageJMetaData),
            (FieldShape::ByteArray, FieldCount::Variable2)
        );
        assert_eq!(
            field_shape(Tag::ColorMap),
            (FieldShape::ShortArray, FieldCount::BitsPerSampleDerived)
        );
    }
}
