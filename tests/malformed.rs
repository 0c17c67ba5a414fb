//! Failure semantics and tolerated anomalies.

use ometiff::pixel::plane_extents;
use ometiff::pixel::{EndianType, StorageOrder};
use ometiff::tags::{Tag, Type};
use ometiff::tiff::{ChunkKind, Codec, PlaneLayout, TiffEncoder, TiffVariant};
use ometiff::{
    DimensionOrder, FormatError, MetadataStore, OmeTiffError, OmeTiffReader, OmeTiffWriter,
    OmeXmlMetadata, PixelType, PlaneStatus, UsageError, VariantPixelBuffer,
};
use std::path::Path;

mod util;
use util::{gray_series, plane_u8};

fn gray_layout(width: u32, height: u32) -> PlaneLayout {
    PlaneLayout {
        width,
        height,
        samples: 1,
        pixel_type: PixelType::UInt8,
        bits: 8,
        planar: ometiff::tags::PlanarConfiguration::Chunky,
        photometric: ometiff::tags::PhotometricInterpretation::BlackIsZero,
        compression: Codec::None,
        chunks: ChunkKind::Strips { rows_per_strip: 4 },
    }
}

fn filled_plane(w: usize, h: usize, seed: u8) -> VariantPixelBuffer<'static> {
    let mut buf = VariantPixelBuffer::with_order(
        PixelType::UInt8,
        plane_extents(w, h, 1),
        StorageOrder::for_plane(true),
        EndianType::Native,
    );
    for (i, v) in buf.data_mut().iter_mut().enumerate() {
        *v = (i as u8).wrapping_add(seed);
    }
    buf
}

/// Write a hand-crafted two-IFD TIFF whose first directory carries the
/// given description entry.
fn craft_two_plane_tiff<F>(path: &Path, set_description: F)
where
    F: Fn(&mut ometiff::tiff::Ifd),
{
    let mut enc = TiffEncoder::create(path, TiffVariant::Classic).unwrap();
    for plane in 0..2u8 {
        enc.start_ifd().unwrap();
        let pending = enc.current().unwrap();
        pending.describe_raster(gray_layout(4, 4));
        if plane == 0 {
            set_description(pending.ifd_mut());
        }
        pending
            .write_region(0, 0, 4, 4, &filled_plane(4, 4, plane * 100))
            .unwrap();
    }
    enc.finish().unwrap();
}

fn two_plane_xml<F>(customise: F) -> String
where
    F: FnOnce(&mut OmeXmlMetadata),
{
    let mut meta = gray_series(4, 4, 1, 1, 2, PixelType::UInt8, DimensionOrder::XYZCT);
    meta.sanitise();
    customise(&mut meta);
    meta.to_xml().unwrap()
}

#[test]
fn byte_typed_description_fails_the_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.ome.tif");
    craft_two_plane_tiff(&path, |ifd| {
        ifd.set_bytes(Tag::ImageDescription, Type::BYTE, b"not ascii");
    });

    let mut reader = OmeTiffReader::new();
    match reader.set_id(&path) {
        Err(OmeTiffError::Format(FormatError::ImageDescriptionNotAscii)) => {}
        other => panic!("expected ImageDescriptionNotAscii, got {:?}", other),
    }
}

#[test]
fn missing_description_fails_the_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("plain.ome.tif");
    craft_two_plane_tiff(&path, |_| {});

    let mut reader = OmeTiffReader::new();
    match reader.set_id(&path) {
        Err(OmeTiffError::Format(FormatError::ImageDescriptionMissing)) => {}
        other => panic!("expected ImageDescriptionMissing, got {:?}", other),
    }
}

#[test]
fn inconsistent_sub_resolution_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("badpyramid.ome.tif");

    let mut meta = gray_series(4, 4, 1, 1, 1, PixelType::UInt8, DimensionOrder::XYZCT);
    meta.sanitise();
    let xml = meta.to_xml().unwrap();

    let mut enc = TiffEncoder::create(&path, TiffVariant::Classic).unwrap();
    enc.start_ifd().unwrap();
    let pending = enc.current().unwrap();
    pending.describe_raster(gray_layout(4, 4));
    pending.ifd_mut().set_string(Tag::ImageDescription, &xml);
    pending
        .write_region(0, 0, 4, 4, &filled_plane(4, 4, 0))
        .unwrap();

    // A reduced level of a different pixel type.
    enc.start_sub_ifd().unwrap();
    let sub = enc.current().unwrap();
    let mut layout = gray_layout(2, 2);
    layout.pixel_type = PixelType::UInt16;
    layout.bits = 16;
    sub.describe_raster(layout);
    let mut pixels = VariantPixelBuffer::with_order(
        PixelType::UInt16,
        plane_extents(2, 2, 1),
        StorageOrder::for_plane(true),
        EndianType::Native,
    );
    pixels.buffer_mut::<u16>().unwrap().data_mut().fill(7);
    sub.write_region(0, 0, 2, 2, &pixels).unwrap();
    enc.finish().unwrap();

    let mut reader = OmeTiffReader::new();
    match reader.set_id(&path) {
        Err(OmeTiffError::Format(FormatError::InconsistentSubResolution {
            series: 0,
            resolution: 1,
        })) => {}
        other => panic!("expected InconsistentSubResolution, got {:?}", other),
    }
}

#[test]
fn close_with_unwritten_planes_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("incomplete.ome.tif");

    let meta = gray_series(4, 4, 1, 1, 4, PixelType::UInt8, DimensionOrder::XYZCT);
    let mut writer = OmeTiffWriter::new();
    writer.set_metadata_retrieve(&meta).unwrap();
    writer.set_id(&path).unwrap();
    for plane in 0..3 {
        writer.save_plane(plane, &plane_u8(4, 4, 1, plane as u8)).unwrap();
    }
    match writer.close() {
        Err(OmeTiffError::Usage(UsageError::IncompletePlanes(1))) => {}
        other => panic!("expected IncompletePlanes(1), got {:?}", other),
    }
}

#[test]
fn one_based_tiff_data_indices_are_compensated() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("onebased.ome.tif");

    let xml = two_plane_xml(|meta| {
        for plane in 0..2u64 {
            meta.set_tiff_data_first_z(0, plane as usize, 1);
            meta.set_tiff_data_first_c(0, plane as usize, 1);
            // Numbered from one instead of zero.
            meta.set_tiff_data_first_t(0, plane as usize, plane + 1);
            meta.set_tiff_data_ifd(0, plane as usize, plane);
            meta.set_tiff_data_plane_count(0, plane as usize, 1);
        }
    });
    craft_two_plane_tiff(&path, |ifd| ifd.set_string(Tag::ImageDescription, &xml));

    let mut reader = OmeTiffReader::new();
    reader.set_id(&path).unwrap();
    reader.set_series(0).unwrap();
    assert_eq!(reader.image_count().unwrap(), 2);
    assert_eq!(reader.open_plane(0).unwrap().data(), filled_plane(4, 4, 0).data());
    assert_eq!(
        reader.open_plane(1).unwrap().data(),
        filled_plane(4, 4, 100).data()
    );
}

#[test]
fn absent_uuid_means_the_file_owns_its_planes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("selfowned.ome.tif");

    let xml = two_plane_xml(|meta| {
        for plane in 0..2 {
            meta.set_tiff_data_first_t(0, plane, plane as u64);
            meta.set_tiff_data_ifd(0, plane, plane as u64);
            meta.set_tiff_data_plane_count(0, plane, 1);
        }
    });
    craft_two_plane_tiff(&path, |ifd| ifd.set_string(Tag::ImageDescription, &xml));

    let mut reader = OmeTiffReader::new();
    reader.set_id(&path).unwrap();
    reader.set_series(0).unwrap();
    let info = reader.plane_info(0).unwrap();
    assert_eq!(info.status, PlaneStatus::Present);
    assert!(info.certain);
    assert!(info.file.ends_with("selfowned.ome.tif"));
}

#[test]
fn fill_forward_covers_unlabelled_planes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fillforward.ome.tif");

    // A single TiffData with no PlaneCount claims the rest of the series.
    let xml = two_plane_xml(|meta| {
        meta.set_tiff_data_ifd(0, 0, 0);
    });
    craft_two_plane_tiff(&path, |ifd| ifd.set_string(Tag::ImageDescription, &xml));

    let mut reader = OmeTiffReader::new();
    reader.set_id(&path).unwrap();
    reader.set_series(0).unwrap();
    assert_eq!(reader.image_count().unwrap(), 2);
    assert_eq!(reader.plane_info(0).unwrap().ifd, 0);
    assert_eq!(reader.plane_info(1).unwrap().ifd, 1);
    assert_eq!(
        reader.open_plane(1).unwrap().data(),
        filled_plane(4, 4, 100).data()
    );
}

#[test]
fn unmapped_series_falls_back_to_consecutive_ifds() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fallback.ome.tif");

    // No TiffData at all.
    let xml = two_plane_xml(|_| {});
    craft_two_plane_tiff(&path, |ifd| ifd.set_string(Tag::ImageDescription, &xml));

    let mut reader = OmeTiffReader::new();
    reader.set_id(&path).unwrap();
    reader.set_series(0).unwrap();
    assert_eq!(reader.image_count().unwrap(), 2);
    let info = reader.plane_info(1).unwrap();
    assert!(!info.certain);
    assert_eq!(info.status, PlaneStatus::Present);
    assert_eq!(info.ifd, 1);
    assert_eq!(
        reader.open_plane(1).unwrap().data(),
        filled_plane(4, 4, 100).data()
    );
}

#[test]
fn cursor_misuse_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cursor.ome.tif");

    let meta = gray_series(4, 4, 1, 1, 2, PixelType::UInt8, DimensionOrder::XYZCT);
    let mut writer = OmeTiffWriter::new();
    writer.set_metadata_retrieve(&meta).unwrap();
    writer.set_id(&path).unwrap();
    writer.save_plane(0, &plane_u8(4, 4, 1, 0)).unwrap();
    writer.save_plane(1, &plane_u8(4, 4, 1, 1)).unwrap();
    writer.close().unwrap();

    let mut reader = OmeTiffReader::new();
    assert!(matches!(
        reader.series(),
        Err(OmeTiffError::Usage(UsageError::NotOpen))
    ));
    reader.set_id(&path).unwrap();
    reader.set_plane(1).unwrap();
    // Planes may not move backwards or skip.
    assert!(reader.set_plane(0).is_err());
    assert!(matches!(
        reader.set_series(5),
        Err(OmeTiffError::Usage(UsageError::SeriesOutOfRange { .. }))
    ));
}

#[test]
fn writer_without_metadata_cannot_open() {
    let dir = tempfile::tempdir().unwrap();
    let mut writer = OmeTiffWriter::new();
    match writer.set_id(dir.path().join("x.ome.tif")) {
        Err(OmeTiffError::Usage(UsageError::NoMetadataStore)) => {}
        other => panic!("expected NoMetadataStore, got {:?}", other),
    }
}
