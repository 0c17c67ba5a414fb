//! Write-then-read round trips over real files.

use ometiff::metadata::MetadataRetrieve;
use ometiff::pixel::{plane_extents, EndianType, StorageOrder};
use ometiff::tags::Tag;
use ometiff::tiff::TiffDecoder;
use ometiff::{
    DimensionOrder, MetadataStore, OmeTiffReader, OmeTiffWriter, PixelType, VariantPixelBuffer,
};

mod util;
use util::{gray_series, plane_u8};

#[test]
fn single_series_two_timepoints() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("s1.ome.tif");

    let meta = gray_series(16, 16, 1, 1, 2, PixelType::UInt8, DimensionOrder::XYZCT);
    let plane0 = plane_u8(16, 16, 1, 10);
    let plane1 = plane_u8(16, 16, 1, 200);

    let mut writer = OmeTiffWriter::new();
    writer.set_metadata_retrieve(&meta).unwrap();
    writer.set_id(&path).unwrap();
    writer.save_plane(0, &plane0).unwrap();
    writer.save_plane(1, &plane1).unwrap();
    writer.close().unwrap();

    let mut reader = OmeTiffReader::new();
    reader.set_id(&path).unwrap();
    assert_eq!(reader.series_count(), 1);
    reader.set_series(0).unwrap();
    assert_eq!(reader.image_count().unwrap(), 2);

    let core = reader.core_metadata().unwrap().clone();
    assert_eq!((core.size_x, core.size_y), (16, 16));
    assert_eq!((core.size_z, core.size_t), (1, 2));
    assert_eq!(core.effective_size_c(), 1);
    assert_eq!(core.pixel_type, PixelType::UInt8);
    assert_eq!(core.dimension_order, DimensionOrder::XYZCT);

    let read0 = reader.open_plane(0).unwrap();
    let read1 = reader.open_plane(1).unwrap();
    assert_eq!(read0.data(), plane0.data());
    assert_eq!(read1.data(), plane1.data());
    assert_eq!(reader.get_zct_coords(1).unwrap(), (0, 0, 1));
}

#[test]
fn two_series_share_one_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("s2.ome.tif");

    let mut meta = gray_series(8, 8, 1, 1, 1, PixelType::UInt8, DimensionOrder::XYZCT);
    meta.set_pixels_size_x(1, 8);
    meta.set_pixels_size_y(1, 8);
    meta.set_pixels_size_z(1, 1);
    meta.set_pixels_size_c(1, 1);
    meta.set_pixels_size_t(1, 1);
    meta.set_pixels_type(1, PixelType::UInt8);
    meta.set_pixels_dimension_order(1, DimensionOrder::XYZCT);

    let plane0 = plane_u8(8, 8, 1, 1);
    let plane1 = plane_u8(8, 8, 1, 2);

    let mut writer = OmeTiffWriter::new();
    writer.set_metadata_retrieve(&meta).unwrap();
    writer.set_id(&path).unwrap();
    writer.save_plane(0, &plane0).unwrap();
    writer.set_series(1).unwrap();
    writer.save_plane(0, &plane1).unwrap();
    writer.close().unwrap();

    // The file holds two main-chain IFDs in write order.
    let mut decoder = TiffDecoder::open(&path).unwrap();
    assert_eq!(decoder.ifd_count(), 2);

    let mut reader = OmeTiffReader::new();
    reader.set_id(&path).unwrap();
    assert_eq!(reader.series_count(), 2);

    let store = reader.metadata_store();
    assert_eq!(store.tiff_data_count(0), 1);
    assert_eq!(store.tiff_data_ifd(0, 0), Some(0));
    assert_eq!(store.tiff_data_ifd(1, 0), Some(1));
    assert_eq!(store.tiff_data_plane_count(0, 0), Some(1));
    assert_eq!(store.uuid_file_name(0, 0).as_deref(), Some("s2.ome.tif"));
    assert_eq!(store.uuid_file_name(1, 0).as_deref(), Some("s2.ome.tif"));

    let read0 = reader.open_plane(0).unwrap();
    assert_eq!(read0.data(), plane0.data());
    reader.set_series(1).unwrap();
    let read1 = reader.open_plane(0).unwrap();
    assert_eq!(read1.data(), plane1.data());
}

#[test]
fn description_entry_is_patched_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("patched.ome.tif");

    let meta = gray_series(8, 8, 1, 1, 1, PixelType::UInt8, DimensionOrder::XYZCT);
    let mut writer = OmeTiffWriter::new();
    writer.set_metadata_retrieve(&meta).unwrap();
    writer.set_id(&path).unwrap();
    writer.save_plane(0, &plane_u8(8, 8, 1, 0)).unwrap();
    writer.close().unwrap();

    let mut decoder = TiffDecoder::open(&path).unwrap();
    let ifd = decoder.read_main_ifd(0).unwrap();
    let entry = ifd.entry(Tag::ImageDescription).unwrap();
    assert_eq!(entry.type_, ometiff::tags::Type::ASCII);
    // The count covers the document plus its NUL terminator, and the blob
    // is an XML document.
    assert_eq!(entry.count as usize, entry.data.len());
    assert_eq!(entry.data.first(), Some(&b'<'));
    assert_eq!(entry.data.last(), Some(&0));
    let text = ifd.get_string(Tag::ImageDescription).unwrap().unwrap();
    assert!(text.starts_with("<?xml"));
    assert!(text.contains("TiffData"));
    assert!(text.contains("urn:uuid:"));
}

#[test]
fn multi_file_dataset_reads_from_either_file() {
    let dir = tempfile::tempdir().unwrap();
    let path_a = dir.path().join("a.ome.tif");
    let path_b = dir.path().join("b.ome.tif");

    let meta = gray_series(8, 8, 1, 1, 2, PixelType::UInt8, DimensionOrder::XYZCT);
    let plane0 = plane_u8(8, 8, 1, 11);
    let plane1 = plane_u8(8, 8, 1, 22);

    let mut writer = OmeTiffWriter::new();
    writer.set_metadata_retrieve(&meta).unwrap();
    writer.set_id(&path_a).unwrap();
    writer.save_plane(0, &plane0).unwrap();
    writer.change_output_file(&path_b).unwrap();
    writer.save_plane(1, &plane1).unwrap();
    writer.close().unwrap();

    for start in [&path_a, &path_b] {
        let mut reader = OmeTiffReader::new();
        reader.set_id(start).unwrap();
        reader.set_series(0).unwrap();
        assert_eq!(reader.image_count().unwrap(), 2);

        let file0 = reader.plane_info(0).unwrap().file.clone();
        let file1 = reader.plane_info(1).unwrap().file.clone();
        assert_ne!(file0, file1);
        assert!(file0.ends_with("a.ome.tif"));
        assert!(file1.ends_with("b.ome.tif"));

        assert_eq!(reader.open_plane(0).unwrap().data(), plane0.data());
        assert_eq!(reader.open_plane(1).unwrap().data(), plane1.data());

        // Each file's XML names both files.
        let store = reader.metadata_store();
        assert_eq!(store.uuid_file_name(0, 0).as_deref(), Some("a.ome.tif"));
        assert_eq!(store.uuid_file_name(0, 1).as_deref(), Some("b.ome.tif"));
        assert_ne!(store.uuid_value(0, 0), store.uuid_value(0, 1));
    }
}

#[test]
fn interleaved_rgb_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rgb.ome.tif");

    let mut meta = gray_series(12, 10, 1, 3, 1, PixelType::UInt8, DimensionOrder::XYCZT);
    meta.set_channel_count(0, 1);
    meta.set_channel_samples_per_pixel(0, 0, 3);

    let pixels = plane_u8(12, 10, 3, 90);
    let mut writer = OmeTiffWriter::new();
    writer.options_mut().interleaved = Some(true);
    writer.set_metadata_retrieve(&meta).unwrap();
    writer.set_id(&path).unwrap();
    writer.save_plane(0, &pixels).unwrap();
    writer.close().unwrap();

    let mut reader = OmeTiffReader::new();
    reader.set_id(&path).unwrap();
    let core = reader.core_metadata().unwrap().clone();
    assert_eq!(core.effective_size_c(), 1);
    assert_eq!(core.total_samples(), 3);
    assert_eq!(reader.image_count().unwrap(), 1);
    assert_eq!(reader.open_plane(0).unwrap().data(), pixels.data());
}

#[test]
fn planar_layout_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("planar.ome.tif");

    let mut meta = gray_series(6, 4, 1, 2, 1, PixelType::UInt8, DimensionOrder::XYCZT);
    meta.set_channel_count(0, 1);
    meta.set_channel_samples_per_pixel(0, 0, 2);

    let mut pixels = VariantPixelBuffer::with_order(
        PixelType::UInt8,
        plane_extents(6, 4, 2),
        StorageOrder::for_plane(false),
        EndianType::Native,
    );
    for (i, v) in pixels.data_mut().iter_mut().enumerate() {
        *v = i as u8;
    }

    let mut writer = OmeTiffWriter::new();
    writer.options_mut().interleaved = Some(false);
    writer.set_metadata_retrieve(&meta).unwrap();
    writer.set_id(&path).unwrap();
    writer.save_plane(0, &pixels).unwrap();
    writer.close().unwrap();

    let mut reader = OmeTiffReader::new();
    reader.set_id(&path).unwrap();
    assert_eq!(reader.open_plane(0).unwrap().data(), pixels.data());
}

#[test]
fn uint16_pixels_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("u16.ome.tif");

    let meta = gray_series(9, 7, 1, 1, 1, PixelType::UInt16, DimensionOrder::XYZCT);
    let mut pixels = VariantPixelBuffer::with_order(
        PixelType::UInt16,
        plane_extents(9, 7, 1),
        StorageOrder::for_plane(true),
        EndianType::Native,
    );
    for (i, v) in pixels
        .buffer_mut::<u16>()
        .unwrap()
        .data_mut()
        .iter_mut()
        .enumerate()
    {
        *v = (i * 521) as u16;
    }

    let mut writer = OmeTiffWriter::new();
    writer.set_metadata_retrieve(&meta).unwrap();
    writer.set_id(&path).unwrap();
    writer.save_plane(0, &pixels).unwrap();
    writer.close().unwrap();

    let mut reader = OmeTiffReader::new();
    reader.set_id(&path).unwrap();
    let read = reader.open_plane(0).unwrap();
    assert_eq!(read.pixel_type(), PixelType::UInt16);
    assert_eq!(read.data(), pixels.data());
}

#[cfg(feature = "deflate")]
#[test]
fn zlib_compressed_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("zlib.ome.tif");

    let meta = gray_series(32, 32, 1, 1, 1, PixelType::UInt8, DimensionOrder::XYZCT);
    let pixels = plane_u8(32, 32, 1, 5);

    let mut writer = OmeTiffWriter::new();
    writer.options_mut().compression = Some("Zlib".to_string());
    writer.set_metadata_retrieve(&meta).unwrap();
    writer.set_id(&path).unwrap();
    writer.save_plane(0, &pixels).unwrap();
    writer.close().unwrap();

    let mut reader = OmeTiffReader::new();
    reader.set_id(&path).unwrap();
    assert_eq!(reader.open_plane(0).unwrap().data(), pixels.data());
}

#[test]
fn companion_document_redirects_to_the_binary_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("set.ome.tif");
    let companion = dir.path().join("set.companion.ome");

    let meta = gray_series(8, 8, 1, 1, 1, PixelType::UInt8, DimensionOrder::XYZCT);
    let pixels = plane_u8(8, 8, 1, 3);
    let mut writer = OmeTiffWriter::new();
    writer.set_metadata_retrieve(&meta).unwrap();
    writer.set_id(&path).unwrap();
    writer.save_plane(0, &pixels).unwrap();
    writer.close().unwrap();

    // A standalone metadata document naming the binary file.
    let mut doc = gray_series(8, 8, 1, 1, 1, PixelType::UInt8, DimensionOrder::XYZCT);
    doc.sanitise();
    doc.set_tiff_data_ifd(0, 0, 0);
    doc.set_tiff_data_plane_count(0, 0, 1);
    doc.set_uuid_file_name(0, 0, "set.ome.tif");
    std::fs::write(&companion, doc.to_xml().unwrap()).unwrap();

    let mut reader = OmeTiffReader::new();
    reader.set_id(&companion).unwrap();
    assert_eq!(reader.series_count(), 1);
    assert!(reader
        .used_files()
        .unwrap()
        .iter()
        .any(|f| f.ends_with("set.ome.tif")));
    assert_eq!(reader.open_plane(0).unwrap().data(), pixels.data());
}

#[test]
fn forced_bigtiff_output() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("big.ome.btf");

    let meta = gray_series(8, 8, 1, 1, 1, PixelType::UInt8, DimensionOrder::XYZCT);
    let pixels = plane_u8(8, 8, 1, 40);

    let mut writer = OmeTiffWriter::new();
    writer.options_mut().big_tiff = Some(true);
    writer.set_metadata_retrieve(&meta).unwrap();
    writer.set_id(&path).unwrap();
    writer.save_plane(0, &pixels).unwrap();
    writer.close().unwrap();

    let mut decoder = TiffDecoder::open(&path).unwrap();
    assert!(decoder.is_big());
    let ifd = decoder.read_main_ifd(0).unwrap();
    let text = ifd.get_string(Tag::ImageDescription).unwrap().unwrap();
    assert!(text.starts_with("<?xml"));

    let mut reader = OmeTiffReader::new();
    reader.set_id(&path).unwrap();
    assert_eq!(reader.open_plane(0).unwrap().data(), pixels.data());
}

#[test]
fn reader_identifies_its_format() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ident.ome.tif");

    let meta = gray_series(4, 4, 1, 1, 1, PixelType::UInt8, DimensionOrder::XYZCT);
    let mut writer = OmeTiffWriter::new();
    writer.set_metadata_retrieve(&meta).unwrap();
    writer.set_id(&path).unwrap();
    writer.save_plane(0, &plane_u8(4, 4, 1, 0)).unwrap();
    writer.close().unwrap();

    assert!(OmeTiffReader::is_this_type(&path));
    assert!(!OmeTiffReader::is_this_type(dir.path().join("missing.png")));

    let mut reader = OmeTiffReader::new();
    reader.set_id(&path).unwrap();
    assert_eq!(reader.format_name(), "OME-TIFF");
    let used = reader.used_files().unwrap();
    assert_eq!(used.len(), 1);
    assert!(used[0].ends_with("ident.ome.tif"));
}
