//! The tagged union over the eleven pixel buffer specializations.

use std::io::{Read, Write};

use crate::error::{OmeTiffResult, UnsupportedError};
use crate::pixel::buffer::{PixelBuffer, StorageOrder, DIMENSIONS};
use crate::pixel::{Bit, ComplexF32, ComplexF64, EndianType, PixelElement, PixelType};

/// Dispatches a visitor to the resident arm of a [`VariantPixelBuffer`].
///
/// Algorithms parameterised over pixel type are written once against this
/// trait and compiled per specialization; there is no virtual dispatch.
pub trait PixelVisitor {
    type Output;

    fn visit<T: PixelElement>(self, buffer: &PixelBuffer<'_, T>) -> Self::Output;
}

/// Mutable counterpart of [`PixelVisitor`].
pub trait PixelVisitorMut {
    type Output;

    fn visit<T: PixelElement>(self, buffer: &mut PixelBuffer<'_, T>) -> Self::Output;
}

/// A pixel buffer of any of the eleven pixel types.
///
/// Exactly one specialization is resident. `Clone` deep-copies the resident
/// buffer.
#[derive(Clone, Debug)]
pub enum VariantPixelBuffer<'d> {
    Int8(PixelBuffer<'d, i8>),
    Int16(PixelBuffer<'d, i16>),
    Int32(PixelBuffer<'d, i32>),
    UInt8(PixelBuffer<'d, u8>),
    UInt16(PixelBuffer<'d, u16>),
    UInt32(PixelBuffer<'d, u32>),
    Float(PixelBuffer<'d, f32>),
    Double(PixelBuffer<'d, f64>),
    Bit(PixelBuffer<'d, Bit>),
    ComplexFloat(PixelBuffer<'d, ComplexF32>),
    ComplexDouble(PixelBuffer<'d, ComplexF64>),
}

macro_rules! each_arm {
    ($value:expr, $buf:ident => $body:expr) => {
        match $value {
            VariantPixelBuffer::Int8($buf) => $body,
            VariantPixelBuffer::Int16($buf) => $body,
            VariantPixelBuffer::Int32($buf) => $body,
            VariantPixelBuffer::UInt8($buf) => $body,
            VariantPixelBuffer::UInt16($buf) => $body,
            VariantPixelBuffer::UInt32($buf) => $body,
            VariantPixelBuffer::Float($buf) => $body,
            VariantPixelBuffer::Double($buf) => $body,
            VariantPixelBuffer::Bit($buf) => $body,
            VariantPixelBuffer::ComplexFloat($buf) => $body,
            VariantPixelBuffer::ComplexDouble($buf) => $body,
        }
    };
}

impl VariantPixelBuffer<'static> {
    /// An owned, zero-filled buffer of the given pixel type with the
    /// default storage order.
    pub fn new(pixel_type: PixelType, extents: [usize; DIMENSIONS]) -> VariantPixelBuffer<'static> {
        Self::with_order(pixel_type, extents, StorageOrder::default(), EndianType::Native)
    }

    /// An owned, zero-filled buffer with an explicit storage order.
    pub fn with_order(
        pixel_type: PixelType,
        extents: [usize; DIMENSIONS],
        order: StorageOrder,
        endian: EndianType,
    ) -> VariantPixelBuffer<'static> {
        match pixel_type {
            PixelType::Int8 => {
                VariantPixelBuffer::Int8(PixelBuffer::with_order(extents, order, endian))
            }
            PixelType::Int16 => {
                VariantPixelBuffer::Int16(PixelBuffer::with_order(extents, order, endian))
            }
            PixelType::Int32 => {
                VariantPixelBuffer::Int32(PixelBuffer::with_order(extents, order, endian))
            }
            PixelType::UInt8 => {
                VariantPixelBuffer::UInt8(PixelBuffer::with_order(extents, order, endian))
            }
            PixelType::UInt16 => {
                VariantPixelBuffer::UInt16(PixelBuffer::with_order(extents, order, endian))
            }
            PixelType::UInt32 => {
                VariantPixelBuffer::UInt32(PixelBuffer::with_order(extents, order, endian))
            }
            PixelType::Float => {
                VariantPixelBuffer::Float(PixelBuffer::with_order(extents, order, endian))
            }
            PixelType::Double => {
                VariantPixelBuffer::Double(PixelBuffer::with_order(extents, order, endian))
            }
            PixelType::Bit => {
                VariantPixelBuffer::Bit(PixelBuffer::with_order(extents, order, endian))
            }
            PixelType::ComplexFloat => {
                VariantPixelBuffer::ComplexFloat(PixelBuffer::with_order(extents, order, endian))
            }
            PixelType::ComplexDouble => {
                VariantPixelBuffer::ComplexDouble(PixelBuffer::with_order(extents, order, endian))
            }
        }
    }
}

impl<'d> VariantPixelBuffer<'d> {
    /// The pixel type of the resident buffer.
    pub fn pixel_type(&self) -> PixelType {
        each_arm!(self, buf => buf.pixel_type())
    }

    pub fn endian_type(&self) -> EndianType {
        each_arm!(self, buf => buf.endian_type())
    }

    pub fn extents(&self) -> &[usize; DIMENSIONS] {
        each_arm!(self, buf => buf.extents())
    }

    /// Total number of elements.
    pub fn len(&self) -> usize {
        each_arm!(self, buf => buf.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Byte span of the storage.
    pub fn size_bytes(&self) -> usize {
        each_arm!(self, buf => buf.size_bytes())
    }

    /// Untyped byte span of the storage in physical order.
    pub fn data(&self) -> &[u8] {
        each_arm!(self, buf => buf.as_bytes())
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        each_arm!(self, buf => buf.as_bytes_mut())
    }

    /// Typed projection; fails when `T` is not the resident element type.
    pub fn buffer<T: PixelElement>(&self) -> OmeTiffResult<&PixelBuffer<'d, T>> {
        T::variant_ref(self).ok_or_else(|| {
            UnsupportedError::WrongPixelType {
                expected: T::PIXEL_TYPE,
                actual: self.pixel_type(),
            }
            .into()
        })
    }

    /// Mutable typed projection; fails when `T` is not the resident
    /// element type.
    pub fn buffer_mut<T: PixelElement>(&mut self) -> OmeTiffResult<&mut PixelBuffer<'d, T>> {
        let actual = self.pixel_type();
        T::variant_mut(self).ok_or_else(|| {
            UnsupportedError::WrongPixelType {
                expected: T::PIXEL_TYPE,
                actual,
            }
            .into()
        })
    }

    /// Invoke `visitor` on the resident specialization and return its
    /// result.
    pub fn visit<V: PixelVisitor>(&self, visitor: V) -> V::Output {
        each_arm!(self, buf => visitor.visit(buf))
    }

    /// Invoke `visitor` on the resident specialization mutably.
    pub fn visit_mut<V: PixelVisitorMut>(&mut self, visitor: V) -> V::Output {
        each_arm!(self, buf => visitor.visit(buf))
    }

    /// Logical assignment from another variant of the same pixel type and
    /// extents, re-packing between storage orders.
    pub fn assign(&mut self, other: &VariantPixelBuffer<'_>) -> OmeTiffResult<()> {
        each_arm!(self, buf => buf.assign(other.buffer()?))
    }

    /// Stream the resident buffer in physical order.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> OmeTiffResult<()> {
        each_arm!(self, buf => buf.write_to(writer))
    }

    /// Fill the resident buffer in physical order.
    pub fn read_from<R: Read>(&mut self, reader: &mut R) -> OmeTiffResult<()> {
        each_arm!(self, buf => buf.read_from(reader))
    }
}

impl PartialEq for VariantPixelBuffer<'_> {
    fn eq(&self, other: &Self) -> bool {
        each_arm!(self, buf => match other.buffer() {
            Ok(theirs) => buf == theirs,
            Err(_) => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixel::buffer::plane_extents;

    /// Visitor returning the byte span length of any specialization.
    struct ByteLen;

    impl PixelVisitor for ByteLen {
        type Output = usize;

        fn visit<T: PixelElement>(self, buffer: &PixelBuffer<'_, T>) -> usize {
            buffer.size_bytes()
        }
    }

    /// Visitor filling every element with its default value.
    struct Clear;

    impl PixelVisitorMut for Clear {
        type Output = ();

        fn visit<T: PixelElement>(self, buffer: &mut PixelBuffer<'_, T>) {
            for v in buffer.data_mut() {
                *v = T::default();
            }
        }
    }

    #[test]
    fn resident_type_is_tracked() {
        for ty in PixelType::ALL {
            let buf = VariantPixelBuffer::new(ty, plane_extents(2, 2, 1));
            assert_eq!(buf.pixel_type(), ty);
            assert_eq!(buf.size_bytes(), 4 * ty.size());
        }
    }

    #[test]
    fn typed_projection_checks_type() {
        let mut buf = VariantPixelBuffer::new(PixelType::UInt16, plane_extents(2, 2, 1));
        assert!(buf.buffer::<u16>().is_ok());
        assert!(buf.buffer::<u8>().is_err());
        assert!(buf.buffer_mut::<f32>().is_err());
    }

    #[test]
    fn visitors_dispatch_to_resident_arm() {
        let mut buf = VariantPixelBuffer::new(PixelType::Double, plane_extents(3, 1, 1));
        assert_eq!(buf.visit(ByteLen), 24);
        buf.buffer_mut::<f64>().unwrap().data_mut()[0] = 1.5;
        buf.visit_mut(Clear);
        assert_eq!(buf.buffer::<f64>().unwrap().data()[0], 0.0);
    }

    #[test]
    fn assign_requires_matching_type() {
        let src = VariantPixelBuffer::new(PixelType::UInt8, plane_extents(2, 2, 1));
        let mut dst = VariantPixelBuffer::new(PixelType::Int8, plane_extents(2, 2, 1));
        assert!(dst.assign(&src).is_err());
        let mut dst = VariantPixelBuffer::new(PixelType::UInt8, plane_extents(2, 2, 1));
        dst.assign(&src).unwrap();
        assert_eq!(dst, src);
    }
}
