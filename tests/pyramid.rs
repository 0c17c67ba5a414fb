//! Sub-resolution pyramid write and read-back.

use ometiff::metadata::MetadataRetrieve;
use ometiff::tags::{subfile, IfdPointer, Tag};
use ometiff::tiff::TiffDecoder;
use ometiff::{DimensionOrder, OmeTiffReader, OmeTiffWriter, PixelType};

mod util;
use util::{gray_series, plane_u8};

#[test]
fn three_tier_pyramid_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pyramid.ome.tif");

    let mut meta = gray_series(1024, 1024, 1, 1, 1, PixelType::UInt8, DimensionOrder::XYZCT);
    meta.set_resolution_tiers(0, &[(512, 512), (256, 256)]);
    assert_eq!(meta.resolution_count(0), 3);

    let full = plane_u8(1024, 1024, 1, 0);
    let half = plane_u8(512, 512, 1, 60);
    let quarter = plane_u8(256, 256, 1, 120);

    let mut writer = OmeTiffWriter::new();
    writer.options_mut().tile_size_x = Some(256);
    writer.options_mut().tile_size_y = Some(256);
    writer.set_metadata_retrieve(&meta).unwrap();
    writer.set_id(&path).unwrap();
    assert_eq!(writer.resolution_count(0).unwrap(), 3);

    writer.save_plane(0, &full).unwrap();
    writer.set_resolution(1).unwrap();
    writer.save_bytes(0, &half, 0, 0, 512, 512).unwrap();
    writer.set_resolution(2).unwrap();
    writer.save_bytes(0, &quarter, 0, 0, 256, 256).unwrap();
    writer.close().unwrap();

    // The container carries one main IFD with two reduced-image children.
    let mut decoder = TiffDecoder::open(&path).unwrap();
    assert_eq!(decoder.ifd_count(), 1);
    let parent = decoder.read_main_ifd(0).unwrap();
    assert_eq!(
        parent.get_u32(Tag::NewSubfileType).unwrap(),
        Some(subfile::PAGE)
    );
    assert_eq!(parent.get_u32(Tag::TileWidth).unwrap(), Some(256));
    let subs = parent.get_u64s(Tag::SubIfd).unwrap().unwrap();
    assert_eq!(subs.len(), 2);
    for (offset, expected_size) in subs.iter().zip([512u32, 256]) {
        let child = decoder.read_ifd(IfdPointer(*offset)).unwrap();
        assert_eq!(child.get_u32(Tag::ImageWidth).unwrap(), Some(expected_size));
        assert_eq!(
            child.get_u32(Tag::NewSubfileType).unwrap(),
            Some(subfile::PAGE | subfile::REDUCED_IMAGE)
        );
    }

    let mut reader = OmeTiffReader::new();
    reader.set_id(&path).unwrap();
    reader.set_series(0).unwrap();
    assert_eq!(reader.resolution_count().unwrap(), 3);

    for (level, (size, pixels)) in [(1024, &full), (512, &half), (256, &quarter)]
        .into_iter()
        .enumerate()
    {
        reader.set_resolution(level).unwrap();
        let core = reader.core_metadata().unwrap().clone();
        assert_eq!((core.size_x, core.size_y), (size, size));
        assert_eq!(core.size_z, 1);
        assert_eq!(core.pixel_type, PixelType::UInt8);
        let read = reader.open_plane(0).unwrap();
        assert_eq!(read.data(), pixels.data(), "tier {}", level);
    }
}

#[test]
fn tile_size_accessors_follow_the_layout() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tiles.ome.tif");

    let meta = gray_series(300, 200, 1, 1, 1, PixelType::UInt8, DimensionOrder::XYZCT);
    let mut writer = OmeTiffWriter::new();
    writer.set_metadata_retrieve(&meta).unwrap();

    // Before set_id the hints fall back to the image's own dimensions.
    assert_eq!(writer.tile_size_x().unwrap(), 300);
    assert_eq!(writer.tile_size_y().unwrap(), 200);

    writer.set_id(&path).unwrap();
    writer.save_plane(0, &plane_u8(300, 200, 1, 7)).unwrap();
    // Narrow images use strips aiming at 64 KiB chunks.
    assert_eq!(writer.tile_size_x().unwrap(), 300);
    assert_eq!(writer.tile_size_y().unwrap(), 65536 / 300);
    writer.close().unwrap();

    let mut reader = OmeTiffReader::new();
    reader.set_id(&path).unwrap();
    assert_eq!(reader.optimal_tile_width().unwrap(), 300);
    assert_eq!(reader.optimal_tile_height().unwrap(), 1);
}
