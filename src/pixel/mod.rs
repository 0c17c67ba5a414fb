//! Typed pixel storage for multi-dimensional image data.
//!
//! The pixel model is a fixed set of eleven numeric pixel types, a 9-D
//! [`PixelBuffer`] parameterised over the in-memory element type, and a
//! [`VariantPixelBuffer`] holding exactly one of the eleven buffer
//! specializations.

use bytemuck::{Pod, Zeroable};

use crate::error::{OmeTiffResult, UnsupportedError};
use crate::tags::SampleFormat;

mod buffer;
mod variant;

pub use self::buffer::{plane_extents, Dimension, PixelBuffer, StorageOrder, DIMENSIONS};
pub use self::variant::{PixelVisitor, PixelVisitorMut, VariantPixelBuffer};

/// The pixel types a plane may be stored as.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum PixelType {
    /// 8-bit signed integer
    Int8,
    /// 16-bit signed integer
    Int16,
    /// 32-bit signed integer
    Int32,
    /// 8-bit unsigned integer
    UInt8,
    /// 16-bit unsigned integer
    UInt16,
    /// 32-bit unsigned integer
    UInt32,
    /// 32-bit IEEE floating point
    Float,
    /// 64-bit IEEE floating point
    Double,
    /// Single bit, packed on disk, one byte per sample in memory
    Bit,
    /// Two 32-bit IEEE floating point values
    ComplexFloat,
    /// Two 64-bit IEEE floating point values
    ComplexDouble,
}

impl PixelType {
    /// All pixel types, in declaration order.
    pub const ALL: [PixelType; 11] = [
        PixelType::Int8,
        PixelType::Int16,
        PixelType::Int32,
        PixelType::UInt8,
        PixelType::UInt16,
        PixelType::UInt32,
        PixelType::Float,
        PixelType::Double,
        PixelType::Bit,
        PixelType::ComplexFloat,
        PixelType::ComplexDouble,
    ];

    /// Byte footprint of one in-memory element.
    pub fn size(self) -> usize {
        match self {
            PixelType::Int8 | PixelType::UInt8 | PixelType::Bit => 1,
            PixelType::Int16 | PixelType::UInt16 => 2,
            PixelType::Int32 | PixelType::UInt32 | PixelType::Float => 4,
            PixelType::Double | PixelType::ComplexFloat => 8,
            PixelType::ComplexDouble => 16,
        }
    }

    /// Number of significant bits per sample as stored on disk.
    ///
    /// `Bit` is packed to a single bit; all other types use their full
    /// element width.
    pub fn significant_bits(self) -> u16 {
        match self {
            PixelType::Bit => 1,
            other => (other.size() * 8) as u16,
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            PixelType::Int8
                | PixelType::Int16
                | PixelType::Int32
                | PixelType::Float
                | PixelType::Double
                | PixelType::ComplexFloat
                | PixelType::ComplexDouble
        )
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            PixelType::Int8
                | PixelType::Int16
                | PixelType::Int32
                | PixelType::UInt8
                | PixelType::UInt16
                | PixelType::UInt32
                | PixelType::Bit
        )
    }

    pub fn is_complex(self) -> bool {
        matches!(self, PixelType::ComplexFloat | PixelType::ComplexDouble)
    }

    /// The TIFF `SampleFormat` describing this pixel type on disk.
    pub fn sample_format(self) -> SampleFormat {
        match self {
            PixelType::UInt8 | PixelType::UInt16 | PixelType::UInt32 | PixelType::Bit => {
                SampleFormat::Uint
            }
            PixelType::Int8 | PixelType::Int16 | PixelType::Int32 => SampleFormat::Int,
            PixelType::Float | PixelType::Double => SampleFormat::IEEEFP,
            PixelType::ComplexFloat | PixelType::ComplexDouble => SampleFormat::ComplexIEEEFP,
        }
    }

    /// Select a pixel type from a TIFF `(SampleFormat, BitsPerSample)` pair.
    pub fn from_sample_format(
        format: SampleFormat,
        bits: u16,
    ) -> OmeTiffResult<PixelType> {
        let ty = match (format, bits) {
            (SampleFormat::Uint, 1) => Some(PixelType::Bit),
            (SampleFormat::Uint, 2..=8) => Some(PixelType::UInt8),
            (SampleFormat::Uint, 9..=16) => Some(PixelType::UInt16),
            (SampleFormat::Uint, 17..=32) => Some(PixelType::UInt32),
            (SampleFormat::Int, 1..=8) => Some(PixelType::Int8),
            (SampleFormat::Int, 9..=16) => Some(PixelType::Int16),
            (SampleFormat::Int, 17..=32) => Some(PixelType::Int32),
            (SampleFormat::IEEEFP, 32) => Some(PixelType::Float),
            (SampleFormat::IEEEFP, 64) => Some(PixelType::Double),
            (SampleFormat::ComplexIEEEFP, 64) => Some(PixelType::ComplexFloat),
            (SampleFormat::ComplexIEEEFP, 128) => Some(PixelType::ComplexDouble),
            // Many writers leave the tag unset; Void is its defined default.
            (SampleFormat::Void, b) => {
                return PixelType::from_sample_format(SampleFormat::Uint, b)
            }
            _ => None,
        };
        ty.ok_or_else(|| {
            UnsupportedError::UnsupportedPixelType(format!("{:?}/{} bits", format, bits)).into()
        })
    }

    /// The OME-XML `Pixels/@Type` interchange name.
    pub fn interchange_name(self) -> &'static str {
        match self {
            PixelType::Int8 => "int8",
            PixelType::Int16 => "int16",
            PixelType::Int32 => "int32",
            PixelType::UInt8 => "uint8",
            PixelType::UInt16 => "uint16",
            PixelType::UInt32 => "uint32",
            PixelType::Float => "float",
            PixelType::Double => "double",
            PixelType::Bit => "bit",
            PixelType::ComplexFloat => "complex",
            PixelType::ComplexDouble => "double-complex",
        }
    }

    /// Parse an OME-XML `Pixels/@Type` interchange name.
    pub fn from_interchange_name(name: &str) -> OmeTiffResult<PixelType> {
        let ty = match name {
            "int8" => PixelType::Int8,
            "int16" => PixelType::Int16,
            "int32" => PixelType::Int32,
            "uint8" => PixelType::UInt8,
            "uint16" => PixelType::UInt16,
            "uint32" => PixelType::UInt32,
            "float" => PixelType::Float,
            "double" => PixelType::Double,
            "bit" => PixelType::Bit,
            "complex" => PixelType::ComplexFloat,
            "double-complex" => PixelType::ComplexDouble,
            other => {
                return Err(
                    UnsupportedError::UnsupportedPixelType(other.to_string()).into(),
                )
            }
        };
        Ok(ty)
    }
}

impl std::fmt::Display for PixelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.interchange_name())
    }
}

/// Endianness of multi-byte pixel data.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Hash)]
pub enum EndianType {
    Big,
    Little,
    /// Whatever the host uses; resolves to [`Big`](EndianType::Big) or
    /// [`Little`](EndianType::Little).
    #[default]
    Native,
}

impl EndianType {
    /// Collapse `Native` onto the concrete host order.
    pub fn resolve(self) -> EndianType {
        match self {
            EndianType::Native => {
                if cfg!(target_endian = "little") {
                    EndianType::Little
                } else {
                    EndianType::Big
                }
            }
            other => other,
        }
    }

    /// Whether data of this endianness must be byte-swapped on this host.
    pub fn needs_swap(self) -> bool {
        self.resolve() != EndianType::Native.resolve()
    }
}

/// A single bit sample, stored one byte per sample in memory.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct Bit(pub u8);

impl From<bool> for Bit {
    fn from(v: bool) -> Bit {
        Bit(v as u8)
    }
}

/// A complex number of two 32-bit IEEE floating point components.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ComplexF32 {
    pub re: f32,
    pub im: f32,
}

/// A complex number of two 64-bit IEEE floating point components.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ComplexF64 {
    pub re: f64,
    pub im: f64,
}

mod private {
    pub trait Sealed {}
}

/// In-memory element of one of the eleven pixel types.
///
/// Sealed: exactly the eleven element types implement it.
pub trait PixelElement:
    Copy + Default + PartialEq + std::fmt::Debug + Pod + private::Sealed + 'static
{
    /// The tag of the pixel type this element represents.
    const PIXEL_TYPE: PixelType;

    /// Byte size of one scalar component; differs from the element size for
    /// complex types, which byte-swap per component.
    const COMPONENT_SIZE: usize;

    #[doc(hidden)]
    fn variant_ref<'v, 'd>(
        variant: &'v VariantPixelBuffer<'d>,
    ) -> Option<&'v PixelBuffer<'d, Self>>;

    #[doc(hidden)]
    fn variant_mut<'v, 'd>(
        variant: &'v mut VariantPixelBuffer<'d>,
    ) -> Option<&'v mut PixelBuffer<'d, Self>>;
}

macro_rules! pixel_elements {
    ($($elem:ty => ($pixel:ident, $component:expr),)*) => {
        $(
            impl private::Sealed for $elem {}

            impl PixelElement for $elem {
                const PIXEL_TYPE: PixelType = PixelType::$pixel;
                const COMPONENT_SIZE: usize = $component;

                fn variant_ref<'v, 'd>(
                    variant: &'v VariantPixelBuffer<'d>,
                ) -> Option<&'v PixelBuffer<'d, Self>> {
                    match variant {
                        VariantPixelBuffer::$pixel(buf) => Some(buf),
                        _ => None,
                    }
                }

                fn variant_mut<'v, 'd>(
                    variant: &'v mut VariantPixelBuffer<'d>,
                ) -> Option<&'v mut PixelBuffer<'d, Self>> {
                    match variant {
                        VariantPixelBuffer::$pixel(buf) => Some(buf),
                        _ => None,
                    }
                }
            }
        )*
    };
}

pixel_elements! {
    i8 => (Int8, 1),
    i16 => (Int16, 2),
    i32 => (Int32, 4),
    u8 => (UInt8, 1),
    u16 => (UInt16, 2),
    u32 => (UInt32, 4),
    f32 => (Float, 4),
    f64 => (Double, 8),
    Bit => (Bit, 1),
    ComplexF32 => (ComplexFloat, 4),
    ComplexF64 => (ComplexDouble, 8),
}
