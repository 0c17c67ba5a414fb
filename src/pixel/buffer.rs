//! The 9-D typed pixel container.

use std::io::{Read, Write};
use std::ops::{Deref, DerefMut};

use crate::error::{OmeTiffResult, UsageError};
use crate::pixel::{EndianType, PixelElement, PixelType};

/// Number of logical axes of a pixel buffer.
pub const DIMENSIONS: usize = 9;

/// Logical axes of a pixel buffer, in logical order.
///
/// Current use keeps the three Modulo axes at extent 1.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum Dimension {
    X,
    Y,
    Z,
    Sample,
    Time,
    Channel,
    ModuloZ,
    ModuloT,
    ModuloC,
}

impl Dimension {
    pub const ALL: [Dimension; DIMENSIONS] = [
        Dimension::X,
        Dimension::Y,
        Dimension::Z,
        Dimension::Sample,
        Dimension::Time,
        Dimension::Channel,
        Dimension::ModuloZ,
        Dimension::ModuloT,
        Dimension::ModuloC,
    ];

    /// Position of this axis in logical order.
    pub fn index(self) -> usize {
        match self {
            Dimension::X => 0,
            Dimension::Y => 1,
            Dimension::Z => 2,
            Dimension::Sample => 3,
            Dimension::Time => 4,
            Dimension::Channel => 5,
            Dimension::ModuloZ => 6,
            Dimension::ModuloT => 7,
            Dimension::ModuloC => 8,
        }
    }
}

/// Physical layout of a pixel buffer: the nine axes ordered from
/// fastest-varying to slowest, each ascending or descending.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct StorageOrder {
    axes: [(Dimension, bool); DIMENSIONS],
}

impl StorageOrder {
    /// Build an order from axes listed fastest-first with per-axis
    /// ascending flags. Must name each axis exactly once.
    pub fn new(axes: [(Dimension, bool); DIMENSIONS]) -> OmeTiffResult<StorageOrder> {
        let mut seen = [false; DIMENSIONS];
        for (dim, _) in axes {
            let idx = dim.index();
            if seen[idx] {
                return Err(UsageError::RegionOutOfRange.into());
            }
            seen[idx] = true;
        }
        Ok(StorageOrder { axes })
    }

    /// Row-major plane layout with samples interleaved per pixel
    /// (`Sample` fastest) or planar (`Sample` after `Y`).
    pub fn for_plane(interleaved: bool) -> StorageOrder {
        let axes = if interleaved {
            [
                (Dimension::Sample, true),
                (Dimension::X, true),
                (Dimension::Y, true),
                (Dimension::Z, true),
                (Dimension::Time, true),
                (Dimension::Channel, true),
                (Dimension::ModuloZ, true),
                (Dimension::ModuloT, true),
                (Dimension::ModuloC, true),
            ]
        } else {
            [
                (Dimension::X, true),
                (Dimension::Y, true),
                (Dimension::Sample, true),
                (Dimension::Z, true),
                (Dimension::Time, true),
                (Dimension::Channel, true),
                (Dimension::ModuloZ, true),
                (Dimension::ModuloT, true),
                (Dimension::ModuloC, true),
            ]
        };
        StorageOrder { axes }
    }

    /// Axes fastest-first with their ascending flags.
    pub fn axes(&self) -> &[(Dimension, bool); DIMENSIONS] {
        &self.axes
    }
}

impl Default for StorageOrder {
    /// Logical order, `X` fastest, all axes ascending.
    fn default() -> StorageOrder {
        StorageOrder {
            axes: Dimension::ALL.map(|d| (d, true)),
        }
    }
}

enum Storage<'d, T> {
    Owned(Vec<T>),
    Borrowed(&'d mut [T]),
}

impl<T: Clone> Clone for Storage<'_, T> {
    fn clone(&self) -> Self {
        match self {
            Storage::Owned(v) => Storage::Owned(v.clone()),
            Storage::Borrowed(s) => Storage::Owned(s.to_vec()),
        }
    }
}

impl<T> Deref for Storage<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        match self {
            Storage::Owned(v) => v,
            Storage::Borrowed(s) => s,
        }
    }
}

impl<T> DerefMut for Storage<'_, T> {
    fn deref_mut(&mut self) -> &mut [T] {
        match self {
            Storage::Owned(v) => v,
            Storage::Borrowed(s) => s,
        }
    }
}

/// A 9-D hyper-volume of pixel elements.
///
/// Storage is either owned or borrows caller memory; the lifetime parameter
/// is `'static` for owned buffers. The physical element sequence is governed
/// by the [`StorageOrder`]; all index arithmetic is in logical coordinates.
pub struct PixelBuffer<'d, T: PixelElement> {
    extents: [usize; DIMENSIONS],
    bases: [i64; DIMENSIONS],
    order: StorageOrder,
    endian: EndianType,
    // Derived from `order` and `extents`: element stride per logical axis
    // and the element offset of the logical origin corner.
    strides: [isize; DIMENSIONS],
    origin: usize,
    storage: Storage<'d, T>,
}

fn element_count(extents: &[usize; DIMENSIONS]) -> usize {
    extents.iter().product()
}

fn derive_strides(
    extents: &[usize; DIMENSIONS],
    order: &StorageOrder,
) -> ([isize; DIMENSIONS], usize) {
    let mut strides = [0isize; DIMENSIONS];
    let mut origin = 0usize;
    let mut magnitude = 1usize;
    for &(dim, ascending) in order.axes() {
        let extent = extents[dim.index()];
        if ascending {
            strides[dim.index()] = magnitude as isize;
        } else {
            strides[dim.index()] = -(magnitude as isize);
            origin += magnitude * extent.saturating_sub(1);
        }
        magnitude *= extent.max(1);
    }
    (strides, origin)
}

impl<T: PixelElement> PixelBuffer<'static, T> {
    /// An owned, zero-filled buffer with the default storage order and
    /// native endianness.
    pub fn new(extents: [usize; DIMENSIONS]) -> PixelBuffer<'static, T> {
        Self::with_order(extents, StorageOrder::default(), EndianType::Native)
    }

    /// An owned, zero-filled buffer with an explicit storage order.
    pub fn with_order(
        extents: [usize; DIMENSIONS],
        order: StorageOrder,
        endian: EndianType,
    ) -> PixelBuffer<'static, T> {
        let (strides, origin) = derive_strides(&extents, &order);
        PixelBuffer {
            extents,
            bases: [0; DIMENSIONS],
            order,
            endian,
            strides,
            origin,
            storage: Storage::Owned(vec![T::default(); element_count(&extents)]),
        }
    }
}

impl<'d, T: PixelElement> PixelBuffer<'d, T> {
    /// A buffer over caller-managed memory. The slice length must equal the
    /// product of the extents.
    pub fn from_slice(
        extents: [usize; DIMENSIONS],
        order: StorageOrder,
        endian: EndianType,
        data: &'d mut [T],
    ) -> OmeTiffResult<PixelBuffer<'d, T>> {
        if data.len() != element_count(&extents) {
            return Err(UsageError::IndexOutOfRange {
                index: data.len() as u64,
                count: element_count(&extents) as u64,
            }
            .into());
        }
        let (strides, origin) = derive_strides(&extents, &order);
        Ok(PixelBuffer {
            extents,
            bases: [0; DIMENSIONS],
            order,
            endian,
            strides,
            origin,
            storage: Storage::Borrowed(data),
        })
    }

    pub fn pixel_type(&self) -> PixelType {
        T::PIXEL_TYPE
    }

    pub fn endian_type(&self) -> EndianType {
        self.endian
    }

    pub fn storage_order(&self) -> &StorageOrder {
        &self.order
    }

    pub fn extents(&self) -> &[usize; DIMENSIONS] {
        &self.extents
    }

    /// Signed index base per axis; indexing is relative to these.
    pub fn index_bases(&self) -> &[i64; DIMENSIONS] {
        &self.bases
    }

    pub fn set_index_bases(&mut self, bases: [i64; DIMENSIONS]) {
        self.bases = bases;
    }

    /// Total number of elements.
    pub fn len(&self) -> usize {
        element_count(&self.extents)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Byte span of the storage.
    pub fn size_bytes(&self) -> usize {
        self.len() * std::mem::size_of::<T>()
    }

    /// Elements in physical storage order.
    pub fn data(&self) -> &[T] {
        &self.storage
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.storage
    }

    /// Raw bytes of the storage in physical order.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.storage)
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        bytemuck::cast_slice_mut(&mut self.storage)
    }

    /// Element offset in storage of a logical index tuple.
    pub fn offset(&self, index: [i64; DIMENSIONS]) -> OmeTiffResult<usize> {
        let mut offset = self.origin as isize;
        for d in 0..DIMENSIONS {
            let rel = index[d] - self.bases[d];
            if rel < 0 || rel as usize >= self.extents[d] {
                return Err(UsageError::BufferIndexOutOfRange {
                    axis: d,
                    index: index[d],
                    extent: self.extents[d],
                }
                .into());
            }
            offset += self.strides[d] * rel as isize;
        }
        Ok(offset as usize)
    }

    /// Element at a logical index tuple.
    pub fn at(&self, index: [i64; DIMENSIONS]) -> OmeTiffResult<&T> {
        let offset = self.offset(index)?;
        Ok(&self.storage[offset])
    }

    pub fn at_mut(&mut self, index: [i64; DIMENSIONS]) -> OmeTiffResult<&mut T> {
        let offset = self.offset(index)?;
        Ok(&mut self.storage[offset])
    }

    /// Walk all logical index tuples, first axis fastest.
    fn logical_indices(&self) -> LogicalIndices {
        LogicalIndices {
            extents: self.extents,
            bases: self.bases,
            next: self.bases,
            remaining: self.len(),
        }
    }

    /// Copy every element of `other` into `self` addressed by logical
    /// index, re-packing between the two storage orders. Extents must
    /// match; index bases need not.
    pub fn assign(&mut self, other: &PixelBuffer<'_, T>) -> OmeTiffResult<()> {
        if self.extents != other.extents {
            return Err(UsageError::RegionOutOfRange.into());
        }
        let base_shift: [i64; DIMENSIONS] =
            std::array::from_fn(|d| other.bases[d] - self.bases[d]);
        for index in self.logical_indices() {
            let theirs: [i64; DIMENSIONS] =
                std::array::from_fn(|d| index[d] + base_shift[d]);
            let value = *other.at(theirs)?;
            *self.at_mut(index)? = value;
        }
        Ok(())
    }

    /// Stream elements to `writer` in physical storage order, applying the
    /// buffer's endianness per scalar component.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> OmeTiffResult<()> {
        if !self.endian.needs_swap() {
            writer.write_all(self.as_bytes())?;
            return Ok(());
        }
        let mut swapped = self.as_bytes().to_vec();
        swap_components(&mut swapped, T::COMPONENT_SIZE);
        writer.write_all(&swapped)?;
        Ok(())
    }

    /// Fill the storage from `reader` in physical storage order, applying
    /// the buffer's endianness per scalar component.
    pub fn read_from<R: Read>(&mut self, reader: &mut R) -> OmeTiffResult<()> {
        let needs_swap = self.endian.needs_swap();
        let bytes = self.as_bytes_mut();
        reader.read_exact(bytes)?;
        if needs_swap {
            swap_components(bytes, T::COMPONENT_SIZE);
        }
        Ok(())
    }

    /// Minimum and maximum element value in logical order, `None` when
    /// empty.
    pub fn min_max(&self) -> Option<(T, T)>
    where
        T: PartialOrd,
    {
        let mut iter = self.data().iter();
        let first = *iter.next()?;
        let mut min = first;
        let mut max = first;
        for &v in iter {
            if v < min {
                min = v;
            }
            if v > max {
                max = v;
            }
        }
        Some((min, max))
    }
}

fn swap_components(bytes: &mut [u8], component_size: usize) {
    if component_size > 1 {
        for chunk in bytes.chunks_exact_mut(component_size) {
            chunk.reverse();
        }
    }
}

struct LogicalIndices {
    extents: [usize; DIMENSIONS],
    bases: [i64; DIMENSIONS],
    next: [i64; DIMENSIONS],
    remaining: usize,
}

impl Iterator for LogicalIndices {
    type Item = [i64; DIMENSIONS];

    fn next(&mut self) -> Option<[i64; DIMENSIONS]> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let current = self.next;
        for d in 0..DIMENSIONS {
            self.next[d] += 1;
            if (self.next[d] - self.bases[d]) < self.extents[d].max(1) as i64 {
                break;
            }
            self.next[d] = self.bases[d];
        }
        Some(current)
    }
}

impl<T: PixelElement> Clone for PixelBuffer<'_, T> {
    /// Deep copy; borrowed storage clones into owned storage.
    fn clone(&self) -> Self {
        PixelBuffer {
            extents: self.extents,
            bases: self.bases,
            order: self.order,
            endian: self.endian,
            strides: self.strides,
            origin: self.origin,
            storage: Storage::Owned(self.storage.to_vec()),
        }
    }
}

impl<T: PixelElement> PartialEq for PixelBuffer<'_, T> {
    /// Compares endianness, extents, and the element sequence addressed in
    /// logical order; the physical storage orders may differ.
    fn eq(&self, other: &Self) -> bool {
        if self.endian.resolve() != other.endian.resolve() || self.extents != other.extents {
            return false;
        }
        let base_shift: [i64; DIMENSIONS] =
            std::array::from_fn(|d| other.bases[d] - self.bases[d]);
        self.logical_indices().all(|index| {
            let theirs: [i64; DIMENSIONS] =
                std::array::from_fn(|d| index[d] + base_shift[d]);
            match (self.at(index), other.at(theirs)) {
                (Ok(a), Ok(b)) => a == b,
                _ => false,
            }
        })
    }
}

impl<T: PixelElement> std::fmt::Debug for PixelBuffer<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("pixel_type", &T::PIXEL_TYPE)
            .field("extents", &self.extents)
            .field("endian", &self.endian)
            .finish()
    }
}

/// Extents for a single 2-D plane region with `samples` values per pixel.
pub fn plane_extents(width: usize, height: usize, samples: usize) -> [usize; DIMENSIONS] {
    [width, height, 1, samples, 1, 1, 1, 1, 1]
}
