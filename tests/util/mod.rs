//! Shared helpers for the integration tests.

use ometiff::pixel::{plane_extents, EndianType, StorageOrder};
use ometiff::{
    DimensionOrder, MetadataStore, OmeXmlMetadata, PixelType, VariantPixelBuffer,
};

/// A metadata store describing one grayscale-style series at image 0.
pub fn gray_series(
    x: u32,
    y: u32,
    z: u32,
    c: u32,
    t: u32,
    pixel_type: PixelType,
    order: DimensionOrder,
) -> OmeXmlMetadata {
    let mut meta = OmeXmlMetadata::new();
    meta.set_pixels_size_x(0, x);
    meta.set_pixels_size_y(0, y);
    meta.set_pixels_size_z(0, z);
    meta.set_pixels_size_c(0, c);
    meta.set_pixels_size_t(0, t);
    meta.set_pixels_type(0, pixel_type);
    meta.set_pixels_dimension_order(0, order);
    meta
}

/// An interleaved `u8` plane buffer filled with a seeded pattern.
pub fn plane_u8(w: usize, h: usize, samples: usize, seed: u8) -> VariantPixelBuffer<'static> {
    let mut buf = VariantPixelBuffer::with_order(
        PixelType::UInt8,
        plane_extents(w, h, samples),
        StorageOrder::for_plane(true),
        EndianType::Native,
    );
    for (i, v) in buf.data_mut().iter_mut().enumerate() {
        *v = (i as u8).wrapping_mul(31).wrapping_add(seed);
    }
    buf
}
