use std::error::Error;
use std::fmt;
use std::io;
use std::str;
use std::string;

use crate::pixel::PixelType;
use crate::tags::{CompressionMethod, Tag, Type};

/// OME-TIFF error kinds.
#[derive(Debug)]
pub enum OmeTiffError {
    /// A TIFF file or the embedded OME-XML is not formatted properly.
    Format(FormatError),

    /// The codec does not support features required by the data.
    Unsupported(UnsupportedError),

    /// An operation was invoked outside of its allowed handler state or
    /// with out-of-bounds arguments.
    Usage(UsageError),

    /// Required metadata was absent or inconsistent.
    Metadata(MetadataError),

    /// An I/O error occurred while reading or writing a file.
    Io(io::Error),

    /// An integer conversion to or from a platform size failed, either due to
    /// limits of the platform size or limits of the format.
    IntSize,
}

/// The file is not formatted properly.
///
/// This indicates that the producer of the file might behave incorrectly or
/// that the input file has been corrupted.
///
/// The list of variants may grow. Matching against this exhaustively is not
/// covered by interface stability guarantees.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum FormatError {
    TiffSignatureNotFound,
    TiffSignatureInvalid,
    VersionNotSupported(u16),
    OffsetSizeInvalid(u16),
    ImageFileDirectoryNotFound,
    CycleInOffsets,
    InvalidTag,
    InvalidTypeForTag(Tag, Type),
    RequiredTagNotFound(Tag),
    RequiredTagEmpty(Tag),
    FieldShapeMismatch {
        tag: Tag,
        ty: Type,
        count: u64,
    },
    InvalidDimensions(u32, u32),
    InconsistentSizesEncountered,
    UnexpectedCompressedData {
        actual_bytes: usize,
        required_bytes: usize,
    },
    StripTileTagConflict,
    ImageDescriptionMissing,
    ImageDescriptionNotAscii,
    ImageDescriptionNotFound,
    InconsistentUuid(String),
    MalformedOmeXml(String),
    CorruptCompressedData(String),
    InconsistentSubResolution {
        series: usize,
        resolution: usize,
    },
}

impl fmt::Display for FormatError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        use self::FormatError::*;
        match *self {
            TiffSignatureNotFound => write!(fmt, "TIFF signature not found."),
            TiffSignatureInvalid => write!(fmt, "TIFF signature invalid."),
            VersionNotSupported(version) => {
                write!(fmt, "TIFF version {:#06x} is not supported.", version)
            }
            OffsetSizeInvalid(size) => {
                write!(fmt, "BigTIFF offset size {} is not supported.", size)
            }
            ImageFileDirectoryNotFound => write!(fmt, "Image file directory not found."),
            CycleInOffsets => write!(fmt, "File contained a cycle in the list of IFDs."),
            InvalidTag => write!(fmt, "File contains an invalid tag."),
            InvalidTypeForTag(ref tag, ty) => {
                write!(fmt, "Tag `{:?}` did not have the expected type {:?}.", tag, ty)
            }
            RequiredTagNotFound(ref tag) => write!(fmt, "Required tag `{:?}` not found.", tag),
            RequiredTagEmpty(ref tag) => write!(fmt, "Required tag `{:?}` was empty.", tag),
            FieldShapeMismatch { ref tag, ty, count } => write!(
                fmt,
                "Tag `{:?}` has type {:?} and count {}, which does not match its field shape.",
                tag, ty, count
            ),
            InvalidDimensions(width, height) => {
                write!(fmt, "Invalid dimensions: {}x{}.", width, height)
            }
            InconsistentSizesEncountered => write!(fmt, "Inconsistent sizes encountered."),
            UnexpectedCompressedData {
                actual_bytes,
                required_bytes,
            } => write!(
                fmt,
                "Decompression returned different amount of bytes than expected: got {}, expected {}.",
                actual_bytes, required_bytes
            ),
            StripTileTagConflict => write!(
                fmt,
                "File should contain either (StripByteCounts and StripOffsets) or (TileByteCounts and TileOffsets), other combination was found."
            ),
            ImageDescriptionMissing => {
                write!(fmt, "First IFD has no ImageDescription tag to hold OME-XML.")
            }
            ImageDescriptionNotAscii => {
                write!(fmt, "ImageDescription tag is not of ASCII type.")
            }
            ImageDescriptionNotFound => write!(
                fmt,
                "ImageDescription entry not found while patching the first directory."
            ),
            InconsistentUuid(ref detail) => {
                write!(fmt, "Inconsistent UUID to file mapping: {}.", detail)
            }
            MalformedOmeXml(ref detail) => write!(fmt, "Malformed OME-XML: {}.", detail),
            CorruptCompressedData(ref detail) => {
                write!(fmt, "Compressed data corrupted: {}.", detail)
            }
            InconsistentSubResolution { series, resolution } => write!(
                fmt,
                "Sub-resolution {} of series {} is inconsistent with the full resolution image.",
                resolution, series
            ),
        }
    }
}

/// The codec does not support features required by the data.
///
/// The list of variants may grow. Matching against this exhaustively is not
/// covered by interface stability guarantees.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum UnsupportedError {
    /// A sample format and bit depth combination without a pixel type.
    UnsupportedPixelType(String),
    /// Typed access to a variant buffer holding a different pixel type.
    WrongPixelType {
        expected: PixelType,
        actual: PixelType,
    },
    UnknownCompressionMethod(String),
    UnsupportedCompressionMethod(CompressionMethod),
    UnsupportedPlanarConfiguration(u16),
    UnsupportedBitsPerSample(Vec<u16>),
}

impl fmt::Display for UnsupportedError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        use self::UnsupportedError::*;
        match *self {
            UnsupportedPixelType(ref what) => {
                write!(fmt, "Pixel type {} is unsupported.", what)
            }
            WrongPixelType { expected, actual } => write!(
                fmt,
                "Buffer holds pixel type {:?}, access requested {:?}.",
                actual, expected
            ),
            UnknownCompressionMethod(ref name) => {
                write!(fmt, "Unknown compression method \"{}\".", name)
            }
            UnsupportedCompressionMethod(method) => {
                write!(fmt, "Compression method {:?} is unsupported.", method)
            }
            UnsupportedPlanarConfiguration(config) => {
                write!(fmt, "Unknown planar configuration {} encountered.", config)
            }
            UnsupportedBitsPerSample(ref bits) => {
                write!(fmt, "Inconsistent bits per sample: {:?}.", bits)
            }
        }
    }
}

/// An operation was used in a way that is incompatible with the handler's
/// current state or declared bounds.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum UsageError {
    /// An accessor other than the `set_*` entry points ran before `set_id`.
    NotOpen,
    /// `set_id` on a handler that already has a different id.
    AlreadyOpen,
    /// The writer was asked to open output without a metadata retrieve.
    NoMetadataStore,
    /// Series moved backwards or skipped ahead.
    NonMonotonicSeries { from: usize, to: usize },
    /// Plane moved backwards or skipped ahead.
    NonMonotonicPlane { from: usize, to: usize },
    SeriesOutOfRange { index: usize, count: usize },
    ResolutionOutOfRange { index: usize, count: usize },
    PlaneOutOfRange { index: usize, count: usize },
    CoordsOutOfRange { z: usize, c: usize, t: usize },
    IndexOutOfRange { index: u64, count: u64 },
    BufferIndexOutOfRange { axis: usize, index: i64, extent: usize },
    RegionOutOfRange,
    /// `close` on a writer with planes never written.
    IncompletePlanes(usize),
}

impl fmt::Display for UsageError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use self::UsageError::*;
        match *self {
            NotOpen => write!(fmt, "Operation requires set_id to have been called."),
            AlreadyOpen => write!(fmt, "set_id called twice with different ids."),
            NoMetadataStore => {
                write!(fmt, "Writer requires a metadata retrieve before set_id.")
            }
            NonMonotonicSeries { from, to } => write!(
                fmt,
                "Series may only advance contiguously, attempted {} -> {}.",
                from, to
            ),
            NonMonotonicPlane { from, to } => write!(
                fmt,
                "Plane may only advance contiguously, attempted {} -> {}.",
                from, to
            ),
            SeriesOutOfRange { index, count } => {
                write!(fmt, "Series {} out of range ({} series).", index, count)
            }
            ResolutionOutOfRange { index, count } => {
                write!(fmt, "Resolution {} out of range ({} tiers).", index, count)
            }
            PlaneOutOfRange { index, count } => {
                write!(fmt, "Plane {} out of range ({} planes).", index, count)
            }
            CoordsOutOfRange { z, c, t } => {
                write!(fmt, "ZCT coordinates ({}, {}, {}) out of range.", z, c, t)
            }
            IndexOutOfRange { index, count } => {
                write!(fmt, "Index {} out of range ({} elements).", index, count)
            }
            BufferIndexOutOfRange {
                axis,
                index,
                extent,
            } => write!(
                fmt,
                "Index {} on axis {} out of range (extent {}).",
                index, axis, extent
            ),
            RegionOutOfRange => write!(fmt, "Requested region exceeds the image bounds."),
            IncompletePlanes(count) => {
                write!(fmt, "Writer closed with {} planes never written.", count)
            }
        }
    }
}

/// Required metadata was absent or did not validate.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum MetadataError {
    /// A required attribute has no value in the metadata store.
    Missing(&'static str),
    /// A value is present but outside its valid domain.
    Invalid(String),
}

impl fmt::Display for MetadataError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            MetadataError::Missing(what) => {
                write!(fmt, "Required metadata attribute {} is unset.", what)
            }
            MetadataError::Invalid(ref detail) => {
                write!(fmt, "Invalid metadata: {}.", detail)
            }
        }
    }
}

impl fmt::Display for OmeTiffError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        match *self {
            OmeTiffError::Format(ref e) => write!(fmt, "Format error: {}", e),
            OmeTiffError::Unsupported(ref e) => write!(fmt, "Unsupported: {}", e),
            OmeTiffError::Usage(ref e) => write!(fmt, "Usage error: {}", e),
            OmeTiffError::Metadata(ref e) => write!(fmt, "Metadata error: {}", e),
            OmeTiffError::Io(ref e) => e.fmt(fmt),
            OmeTiffError::IntSize => write!(fmt, "Platform or format size limits exceeded"),
        }
    }
}

impl Error for OmeTiffError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match *self {
            OmeTiffError::Io(ref e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for OmeTiffError {
    fn from(err: io::Error) -> OmeTiffError {
        OmeTiffError::Io(err)
    }
}

impl From<FormatError> for OmeTiffError {
    fn from(err: FormatError) -> OmeTiffError {
        OmeTiffError::Format(err)
    }
}

impl From<UnsupportedError> for OmeTiffError {
    fn from(err: UnsupportedError) -> OmeTiffError {
        OmeTiffError::Unsupported(err)
    }
}

impl From<UsageError> for OmeTiffError {
    fn from(err: UsageError) -> OmeTiffError {
        OmeTiffError::Usage(err)
    }
}

impl From<MetadataError> for OmeTiffError {
    fn from(err: MetadataError) -> OmeTiffError {
        OmeTiffError::Metadata(err)
    }
}

impl From<str::Utf8Error> for OmeTiffError {
    fn from(_err: str::Utf8Error) -> OmeTiffError {
        OmeTiffError::Format(FormatError::InvalidTag)
    }
}

impl From<string::FromUtf8Error> for OmeTiffError {
    fn from(_err: string::FromUtf8Error) -> OmeTiffError {
        OmeTiffError::Format(FormatError::InvalidTag)
    }
}

impl From<std::num::TryFromIntError> for OmeTiffError {
    fn from(_err: std::num::TryFromIntError) -> OmeTiffError {
        OmeTiffError::IntSize
    }
}

impl From<quick_xml::DeError> for OmeTiffError {
    fn from(err: quick_xml::DeError) -> OmeTiffError {
        OmeTiffError::Format(FormatError::MalformedOmeXml(err.to_string()))
    }
}

impl From<quick_xml::SeError> for OmeTiffError {
    fn from(err: quick_xml::SeError) -> OmeTiffError {
        OmeTiffError::Format(FormatError::MalformedOmeXml(err.to_string()))
    }
}

#[cfg(feature = "lzw")]
impl From<weezl::LzwError> for OmeTiffError {
    fn from(err: weezl::LzwError) -> OmeTiffError {
        match err {
            weezl::LzwError::InvalidCode => OmeTiffError::Format(
                FormatError::CorruptCompressedData(String::from("invalid LZW code")),
            ),
        }
    }
}

/// Result of a decoding/encoding process.
pub type OmeTiffResult<T> = Result<T, OmeTiffError>;
