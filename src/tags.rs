//! TIFF tag, type, and enumeration value definitions.

/// Generates a TIFF enumeration backed by a 16-bit on-disk value.
///
/// The second rule takes a trailing `.. Variant,` declaration and appends
/// it as a catch-all carrying the raw value, so private and extension
/// values survive a round trip; such enums additionally get a total
/// `from_u16_exhaustive` mapping.
macro_rules! tiff_enum {
    (
        $( #[$meta:meta] )*
        $vis:vis enum $name:ident {
            $( $( #[$var_meta:meta] )* $variant:ident = $value:expr, )*
        }
    ) => {
        $( #[$meta] )*
        #[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
        #[non_exhaustive]
        $vis enum $name {
            $( $( #[$var_meta] )* $variant, )*
        }

        impl $name {
            /// The value as stored on disk.
            #[inline]
            pub fn to_u16(self) -> u16 {
                match self {
                    $( $name::$variant => $value, )*
                }
            }

            /// Look a known value up; `None` for anything else.
            #[inline]
            pub fn from_u16(raw: u16) -> Option<Self> {
                match raw {
                    $( $value => Some($name::$variant), )*
                    _ => None,
                }
            }
        }
    };
    (
        $( #[$meta:meta] )*
        $vis:vis enum $name:ident {
            $( $( #[$var_meta:meta] )* $variant:ident = $value:expr, )*
            ..
            $( #[$catch_meta:meta] )*
            $catch:ident,
        }
    ) => {
        $( #[$meta] )*
        #[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
        #[non_exhaustive]
        $vis enum $name {
            $( $( #[$var_meta] )* $variant, )*
            $( #[$catch_meta] )*
            $catch(u16),
        }

        impl $name {
            /// The value as stored on disk.
            #[inline]
            pub fn to_u16(self) -> u16 {
                match self {
                    $( $name::$variant => $value, )*
                    $name::$catch(raw) => raw,
                }
            }

            /// Look a known value up; `None` for anything else.
            #[inline]
            pub fn from_u16(raw: u16) -> Option<Self> {
                match raw {
                    $( $value => Some($name::$variant), )*
                    _ => None,
                }
            }

            /// Total mapping; values outside the known set land in the
            /// catch-all variant.
            #[inline]
            pub fn from_u16_exhaustive(raw: u16) -> Self {
                Self::from_u16(raw).unwrap_or($name::$catch(raw))
            }
        }
    };
}

// Note: These tags appear in the order of their numeric value
tiff_enum! {
/// TIFF tags
pub enum Tag {
    SubfileType = 255,
    ImageWidth = 256,
    ImageLength = 257,
    BitsPerSample = 258,
    Compression = 259,
    PhotometricInterpretation = 262,
    FillOrder = 266,
    ImageDescription = 270,
    StripOffsets = 273,
    Orientation = 274,
    SamplesPerPixel = 277,
    RowsPerStrip = 278,
    StripByteCounts = 279,
    MinSampleValue = 280,
    MaxSampleValue = 281,
    XResolution = 282,
    YResolution = 283,
    PlanarConfiguration = 284,
    ResolutionUnit = 296,
    PageNumber = 297,
    TransferFunction = 301,
    Software = 305,
    DateTime = 306,
    Predictor = 317,
    ColorMap = 320,
    TileWidth = 322,
    TileLength = 323,
    TileOffsets = 324,
    TileByteCounts = 325,
    SubIfd = 330,
    ExtraSamples = 338,
    SampleFormat = 339,
    // The subfile classification of modern readers
    NewSubfileType = 254,
    // ImageJ writes its display metadata into a private pair; their counts
    // are self-describing rather than tag-defined.
    ImageJMetaDataByteCounts = 50838,
    ImageJMetaData = 50839,
    ..
    /// A private or extension tag
    Unknown,
}
}

/// Identifies the offset of an IFD.
///
/// This is represented as a 64-bit integer but only BigTIFF can utilize the bits. It is encoded
/// as 32-bit unsigned value ([`Type::LONG`]) in regular TIFF files and as 64-bit unsigned value
/// ([`Type::IFD8`]) in BigTIFF files.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub struct IfdPointer(pub u64);

tiff_enum! {
/// The type of an IFD entry (a 2 byte field).
pub enum Type {
    /// 8-bit unsigned integer
    BYTE = 1,
    /// 8-bit byte that contains a 7-bit ASCII code; the last byte must be zero
    ASCII = 2,
    /// 16-bit unsigned integer
    SHORT = 3,
    /// 32-bit unsigned integer
    LONG = 4,
    /// Fraction stored as two 32-bit unsigned integers
    RATIONAL = 5,
    /// 8-bit signed integer
    SBYTE = 6,
    /// 8-bit byte that may contain anything, depending on the field
    UNDEFINED = 7,
    /// 16-bit signed integer
    SSHORT = 8,
    /// 32-bit signed integer
    SLONG = 9,
    /// Fraction stored as two 32-bit signed integers
    SRATIONAL = 10,
    /// 32-bit IEEE floating point
    FLOAT = 11,
    /// 64-bit IEEE floating point
    DOUBLE = 12,
    /// 32-bit unsigned integer (offset)
    IFD = 13,
    /// BigTIFF 64-bit unsigned integer
    LONG8 = 16,
    /// BigTIFF 64-bit signed integer
    SLONG8 = 17,
    /// BigTIFF 64-bit unsigned integer (offset)
    IFD8 = 18,
}
}

impl Type {
    /// Size in bytes of one value of this type.
    pub fn size(self) -> usize {
        match self {
            Type::BYTE | Type::ASCII | Type::SBYTE | Type::UNDEFINED => 1,
            Type::SHORT | Type::SSHORT => 2,
            Type::LONG | Type::SLONG | Type::FLOAT | Type::IFD => 4,
            Type::RATIONAL
            | Type::SRATIONAL
            | Type::DOUBLE
            | Type::LONG8
            | Type::SLONG8
            | Type::IFD8 => 8,
        }
    }
}

tiff_enum! {
/// See [TIFF compression tags](https://www.awaresystems.be/imaging/tiff/tifftags/compression.html)
/// for reference.
pub enum CompressionMethod {
    None = 1,
    Huffman = 2,
    Fax3 = 3,
    Fax4 = 4,
    LZW = 5,
    JPEG = 6,
    // "Extended JPEG" or "new JPEG" style
    ModernJPEG = 7,
    Deflate = 8,
    OldDeflate = 0x80B2,
    PackBits = 0x8005,
    ..
    /// A custom compression method
    Unknown,
}
}

tiff_enum! {
pub enum PhotometricInterpretation {
    WhiteIsZero = 0,
    BlackIsZero = 1,
    RGB = 2,
    RGBPalette = 3,
    TransparencyMask = 4,
    CMYK = 5,
    YCbCr = 6,
    CIELab = 8,
}
}

tiff_enum! {
pub enum PlanarConfiguration {
    Chunky = 1,
    Planar = 2,
}
}

tiff_enum! {
pub enum Predictor {
    None = 1,
    Horizontal = 2,
    FloatingPoint = 3,
}
}

tiff_enum! {
/// Type to represent resolution units
pub enum ResolutionUnit {
    None = 1,
    Inch = 2,
    Centimeter = 3,
}
}

tiff_enum! {
pub enum SampleFormat {
    Uint = 1,
    Int = 2,
    IEEEFP = 3,
    Void = 4,
    ComplexInt = 5,
    ComplexIEEEFP = 6,
    ..
    /// An unknown extension sample format
    Unknown,
}
}

/// Bit flags of the `NewSubfileType` tag.
///
/// OME-TIFF marks every full-resolution plane as a page of a multi-page
/// document and every pyramid level additionally as a reduced image.
pub mod subfile {
    /// The raster is a reduced-resolution version of another image.
    pub const REDUCED_IMAGE: u32 = 0x1;
    /// The raster is one page of a multi-page document.
    pub const PAGE: u32 = 0x2;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_tags_round_trip() {
        assert_eq!(Tag::from_u16(256), Some(Tag::ImageWidth));
        assert_eq!(Tag::from_u16(65000), None);
        let t = Tag::from_u16_exhaustive(65000);
        assert_eq!(t, Tag::Unknown(65000));
        assert_eq!(t.to_u16(), 65000);
    }

    #[test]
    fn closed_enums_reject_unknown_values() {
        assert_eq!(Type::from_u16(3), Some(Type::SHORT));
        assert_eq!(Type::from_u16(200), None);
        assert_eq!(PlanarConfiguration::Planar.to_u16(), 2);
    }

    #[test]
    fn type_sizes() {
        assert_eq!(Type::SHORT.size(), 2);
        assert_eq!(Type::RATIONAL.size(), 8);
        assert_eq!(Type::IFD8.size(), 8);
    }
}
