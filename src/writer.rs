//! The OME-TIFF writer: opens one TIFF per output path, configures an IFD
//! per `(series, resolution, plane)`, stages pixel regions, and finalises
//! the embedded OME-XML after every plane of every file is known.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::{FormatError, MetadataError, OmeTiffResult, UsageError};
use crate::format::{
    canonical_path, get_zct_coords, suffixes, FormatHandler, WriterOptions,
};
use crate::metadata::{
    convert_metadata, CoreMetadata, MetadataRetrieve, MetadataStore, OmeXmlMetadata, Resolution,
};
use crate::pixel::VariantPixelBuffer;
use crate::tags::{subfile, PhotometricInterpretation, PlanarConfiguration, Tag};
use crate::tiff::{ChunkKind, Codec, PlaneLayout, TiffEncoder, TiffVariant};

/// Pixel footprints at or beyond this select BigTIFF automatically; a
/// margin under the classic 32-bit offset ceiling leaves room for
/// directory overhead.
const BIG_TIFF_THRESHOLD: u64 = u64::pow(2, 32) - (1 << 25);

/// The sentinel reserved in the first IFD and patched at close.
const DESCRIPTION_PLACEHOLDER: &str = "OME-TIFF";

/// One open output file.
struct TiffState {
    path: PathBuf,
    uuid: String,
    encoder: TiffEncoder<std::fs::File>,
    /// Index of the main-chain IFD currently under construction.
    current_index: usize,
    next_index: usize,
}

/// Where one full-resolution plane landed.
#[derive(Clone, Debug)]
struct PlaneRecord {
    file: PathBuf,
    ifd: usize,
}

/// Writes OME-TIFF datasets.
pub struct OmeTiffWriter {
    handler: FormatHandler,
    options: WriterOptions,
    store: Option<OmeXmlMetadata>,
    /// Per-series core metadata of the full tier, cached at `set_id`.
    series_core: Vec<CoreMetadata>,
    /// Per-series tiers, full resolution first.
    resolutions: Vec<Vec<Resolution>>,
    /// Per-series, per-plane destinations; `None` until written.
    plane_records: Vec<Vec<Option<PlaneRecord>>>,
    tiffs: Vec<TiffState>,
    current_tiff: usize,
    variant: Option<TiffVariant>,
}

impl Default for OmeTiffWriter {
    fn default() -> OmeTiffWriter {
        OmeTiffWriter::new()
    }
}

impl OmeTiffWriter {
    pub fn new() -> OmeTiffWriter {
        OmeTiffWriter {
            handler: FormatHandler::new(),
            options: WriterOptions::default(),
            store: None,
            series_core: Vec::new(),
            resolutions: Vec::new(),
            plane_records: Vec::new(),
            tiffs: Vec::new(),
            current_tiff: 0,
            variant: None,
        }
    }

    pub fn format_name(&self) -> &'static str {
        "OME-TIFF"
    }

    pub fn suffixes(&self) -> &'static [&'static str] {
        suffixes::OME_TIFF
    }

    /// Codec names accepted for any pixel type, in preference order.
    pub fn supported_compressions(&self) -> Vec<&'static str> {
        Codec::supported().into_iter().map(Codec::name).collect()
    }

    pub fn options(&self) -> &WriterOptions {
        &self.options
    }

    /// Writer options must be set before `set_id`.
    pub fn options_mut(&mut self) -> &mut WriterOptions {
        &mut self.options
    }

    /// Snapshot the metadata describing the dataset to be written. Must
    /// run before `set_id`.
    pub fn set_metadata_retrieve(
        &mut self,
        retrieve: &dyn MetadataRetrieve,
    ) -> OmeTiffResult<()> {
        self.store = Some(convert_metadata(retrieve)?);
        Ok(())
    }

    /// Open (or switch to) an output file.
    pub fn set_id<P: AsRef<Path>>(&mut self, path: P) -> OmeTiffResult<()> {
        let path = canonical_path(path)?;
        if self.handler.is_open() {
            if self.handler.current_id()? == path {
                return Ok(());
            }
            self.handler.swap_id(path.clone())?;
        } else {
            self.prepare_dataset()?;
            self.handler.open(path.clone())?;
        }
        self.switch_file(path)
    }

    /// Redirect subsequent planes to another output file.
    pub fn change_output_file<P: AsRef<Path>>(&mut self, path: P) -> OmeTiffResult<()> {
        self.handler.current_id()?;
        self.set_id(path)
    }

    /// First-open work: validate the model, expand the resolution lists,
    /// allocate the plane tables, and fix the TIFF variant.
    fn prepare_dataset(&mut self) -> OmeTiffResult<()> {
        let store = self.store.as_mut().ok_or(UsageError::NoMetadataStore)?;
        store.validate()?;

        self.series_core.clear();
        self.resolutions.clear();
        self.plane_records.clear();
        for series in 0..store.image_count() {
            let core = store.core_metadata(series)?;
            let mut tiers = vec![Resolution {
                size_x: core.size_x,
                size_y: core.size_y,
                size_z: core.size_z,
            }];
            for (size_x, size_y) in store.resolution_tiers(series) {
                tiers.push(Resolution {
                    size_x,
                    size_y,
                    size_z: core.size_z,
                });
            }
            self.plane_records.push(vec![None; core.image_count()]);
            self.series_core.push(core);
            self.resolutions.push(tiers);
        }
        store.strip_resolution_annotations();

        let variant = match self.options.big_tiff {
            Some(true) => TiffVariant::Big,
            Some(false) => TiffVariant::Classic,
            None => {
                if self.expected_pixel_bytes() >= BIG_TIFF_THRESHOLD {
                    TiffVariant::Big
                } else {
                    TiffVariant::Classic
                }
            }
        };
        self.variant = Some(variant);
        tracing::debug!(?variant, "prepared OME-TIFF dataset");
        Ok(())
    }

    /// Expected pixel payload across all series and tiers.
    fn expected_pixel_bytes(&self) -> u64 {
        self.series_core
            .iter()
            .map(|core| {
                u64::from(core.size_x)
                    * u64::from(core.size_y)
                    * u64::from(core.size_z)
                    * u64::from(core.size_t)
                    * u64::from(core.total_samples())
                    * core.pixel_type.size() as u64
            })
            .sum()
    }

    /// Open a fresh TIFF for `path` or switch the cursor to its already
    /// open state. Directory construction is deferred until pixel data
    /// arrives, so switching files never strands an empty IFD.
    fn switch_file(&mut self, path: PathBuf) -> OmeTiffResult<()> {
        if let Some(index) = self.tiffs.iter().position(|t| t.path == path) {
            self.current_tiff = index;
            return Ok(());
        }

        let variant = self.variant.ok_or(UsageError::NoMetadataStore)?;
        let encoder = TiffEncoder::create(&path, variant)?;
        self.tiffs.push(TiffState {
            path,
            uuid: Uuid::new_v4().to_string(),
            encoder,
            current_index: 0,
            next_index: 0,
        });
        self.current_tiff = self.tiffs.len() - 1;
        Ok(())
    }

    //
    // Cursor
    //

    pub fn series_count(&self) -> usize {
        self.series_core.len()
    }

    pub fn series(&self) -> OmeTiffResult<usize> {
        self.handler.series()
    }

    pub fn resolution(&self) -> OmeTiffResult<usize> {
        self.handler.resolution()
    }

    pub fn plane(&self) -> OmeTiffResult<usize> {
        self.handler.plane()
    }

    /// Planes of one series at full resolution.
    pub fn image_count(&self, series: usize) -> OmeTiffResult<usize> {
        self.series_core
            .get(series)
            .map(CoreMetadata::image_count)
            .ok_or_else(|| {
                UsageError::SeriesOutOfRange {
                    index: series,
                    count: self.series_core.len(),
                }
                .into()
            })
    }

    pub fn resolution_count(&self, series: usize) -> OmeTiffResult<usize> {
        self.resolutions
            .get(series)
            .map(Vec::len)
            .ok_or_else(|| {
                UsageError::SeriesOutOfRange {
                    index: series,
                    count: self.resolutions.len(),
                }
                .into()
            })
    }

    pub fn set_series(&mut self, series: usize) -> OmeTiffResult<()> {
        let changed = self.handler.set_series(series, self.series_core.len())?;
        if changed {
            self.next_ifd()?;
        }
        Ok(())
    }

    pub fn set_resolution(&mut self, resolution: usize) -> OmeTiffResult<()> {
        let count = self.resolution_count(self.handler.series()?)?;
        let changed = self.handler.set_resolution(resolution, count)?;
        if changed {
            if resolution > 0 {
                self.next_sub_ifd()?;
            } else {
                self.state()?.encoder.resume_main();
            }
        }
        Ok(())
    }

    pub fn set_plane(&mut self, plane: usize) -> OmeTiffResult<()> {
        let count = self.image_count(self.handler.series()?)?;
        let changed = self.handler.set_plane(plane, count)?;
        if changed {
            self.next_ifd()?;
        }
        Ok(())
    }

    /// Tile width hint: the configured tile size before `set_id`, falling
    /// back to the first image's width; the current layout after.
    pub fn tile_size_x(&self) -> OmeTiffResult<u32> {
        if let Some(size) = self.options.tile_size_x {
            return Ok(size);
        }
        match self.current_layout() {
            Ok(layout) => Ok(layout.chunk_dims().0),
            Err(_) => {
                let store = self.store.as_ref().ok_or(UsageError::NoMetadataStore)?;
                store.pixels_size_x(0)
            }
        }
    }

    /// Tile height hint; the fallback uses the first image's height (the
    /// relevant dimension, not its width).
    pub fn tile_size_y(&self) -> OmeTiffResult<u32> {
        if let Some(size) = self.options.tile_size_y {
            return Ok(size);
        }
        match self.current_layout() {
            Ok(layout) => Ok(layout.chunk_dims().1),
            Err(_) => {
                let store = self.store.as_ref().ok_or(UsageError::NoMetadataStore)?;
                store.pixels_size_y(0)
            }
        }
    }

    fn current_layout(&self) -> OmeTiffResult<PlaneLayout> {
        self.handler.current_id()?;
        let series = self.handler.series()?;
        let resolution = self.handler.resolution()?;
        let plane = self.handler.plane()?;
        self.layout_for(series, resolution, plane)
    }

    //
    // IFD lifecycle
    //

    fn state(&mut self) -> OmeTiffResult<&mut TiffState> {
        self.tiffs
            .get_mut(self.current_tiff)
            .ok_or_else(|| UsageError::NotOpen.into())
    }

    /// Flush the current main-chain IFD, if one is under construction.
    /// The successor is created lazily by the next write.
    fn next_ifd(&mut self) -> OmeTiffResult<()> {
        let state = self.state()?;
        if state.encoder.has_pending() {
            state.encoder.flush_ifd()?;
        }
        Ok(())
    }

    /// Open the next pyramid directory under the current main IFD,
    /// creating the full-resolution parent first when none exists yet.
    fn next_sub_ifd(&mut self) -> OmeTiffResult<()> {
        self.ensure_main_ifd()?;
        let resolution = self.handler.resolution()?;
        self.state()?.encoder.start_sub_ifd()?;
        self.setup_ifd(resolution)
    }

    /// Make sure the current file has a main-chain IFD under
    /// construction, configured for the cursor's full-resolution raster.
    fn ensure_main_ifd(&mut self) -> OmeTiffResult<()> {
        let state = self.state()?;
        if state.encoder.has_pending() {
            return Ok(());
        }
        state.encoder.start_ifd()?;
        state.current_index = state.next_index;
        state.next_index += 1;
        self.setup_ifd(0)
    }

    /// Make sure the cursor's target directory exists: the main IFD for
    /// resolution zero, a staged sub-IFD otherwise.
    fn ensure_current_ifd(&mut self) -> OmeTiffResult<()> {
        let resolution = self.handler.resolution()?;
        self.ensure_main_ifd()?;
        if resolution > 0 && !self.state()?.encoder.is_staging_sub() {
            self.state()?.encoder.start_sub_ifd()?;
            self.setup_ifd(resolution)?;
        }
        Ok(())
    }

    /// The raster layout of one `(series, resolution, plane)`.
    fn layout_for(
        &self,
        series: usize,
        resolution: usize,
        plane: usize,
    ) -> OmeTiffResult<PlaneLayout> {
        let core = self
            .series_core
            .get(series)
            .ok_or(UsageError::SeriesOutOfRange {
                index: series,
                count: self.series_core.len(),
            })?;
        let tier = self.resolutions[series]
            .get(resolution)
            .ok_or(UsageError::ResolutionOutOfRange {
                index: resolution,
                count: self.resolutions[series].len(),
            })?;

        let (_, channel, _) = get_zct_coords(
            core.dimension_order,
            core.size_z as usize,
            core.effective_size_c(),
            core.size_t as usize,
            plane,
        )?;
        let samples = core.size_c[channel] as u16;

        let interleaved = self.options.interleaved.unwrap_or(core.interleaved);
        let planar = if interleaved || samples == 1 {
            PlanarConfiguration::Chunky
        } else {
            PlanarConfiguration::Planar
        };
        let photometric = if samples == 3 {
            PhotometricInterpretation::RGB
        } else {
            PhotometricInterpretation::BlackIsZero
        };
        let compression = match &self.options.compression {
            Some(name) => Codec::from_name(name)?,
            None => Codec::None,
        };
        let chunks = self.chunk_policy(tier.size_x);

        Ok(PlaneLayout {
            width: tier.size_x,
            height: tier.size_y,
            samples,
            pixel_type: core.pixel_type,
            bits: core.pixel_type.significant_bits(),
            planar,
            photometric,
            compression,
            chunks,
        })
    }

    /// Tile/strip policy: an explicit tile height alone selects strips of
    /// that height; a full tile size selects tiles; otherwise narrow
    /// images use strips aiming at 64 KiB chunks and wide images 256×256
    /// tiles.
    fn chunk_policy(&self, size_x: u32) -> ChunkKind {
        match (self.options.tile_size_x, self.options.tile_size_y) {
            (None, Some(rows)) => ChunkKind::Strips {
                rows_per_strip: rows.max(1),
            },
            (Some(w), Some(h)) if w > 0 && h > 0 => ChunkKind::Tiles {
                width: w,
                height: h,
            },
            _ => {
                if size_x < 2048 {
                    ChunkKind::Strips {
                        rows_per_strip: (65536 / size_x.max(1)).max(1),
                    }
                } else {
                    ChunkKind::Tiles {
                        width: 256,
                        height: 256,
                    }
                }
            }
        }
    }

    /// Configure the freshly started directory for the cursor position at
    /// the given resolution tier.
    fn setup_ifd(&mut self, resolution: usize) -> OmeTiffResult<()> {
        let series = self.handler.series()?;
        let plane = self.handler.plane()?;
        let layout = self.layout_for(series, resolution, plane)?;

        let state = self
            .tiffs
            .get_mut(self.current_tiff)
            .ok_or(UsageError::NotOpen)?;
        let is_first_ifd = state.current_index == 0 && resolution == 0;
        let pending = state.encoder.current()?;
        pending.describe_raster(layout);

        let ifd = pending.ifd_mut();
        if resolution == 0 {
            ifd.set_u32(Tag::NewSubfileType, subfile::PAGE);
        } else {
            ifd.set_u32(
                Tag::NewSubfileType,
                subfile::PAGE | subfile::REDUCED_IMAGE,
            );
        }
        if is_first_ifd {
            // Reserved placeholder; the count and offset of this entry are
            // rewritten once the final OME-XML is known.
            ifd.set_string(Tag::ImageDescription, DESCRIPTION_PLACEHOLDER);
        }
        Ok(())
    }

    /// Write the rectangle `(x, y, w, h)` of `plane` from `buf`.
    pub fn save_bytes(
        &mut self,
        plane: usize,
        buf: &VariantPixelBuffer<'_>,
        x: u32,
        y: u32,
        w: u32,
        h: u32,
    ) -> OmeTiffResult<()> {
        self.set_plane(plane)?;
        self.ensure_current_ifd()?;
        let series = self.handler.series()?;
        let resolution = self.handler.resolution()?;

        let state = self
            .tiffs
            .get_mut(self.current_tiff)
            .ok_or(UsageError::NotOpen)?;
        state.encoder.current()?.write_region(x, y, w, h, buf)?;

        if resolution == 0 {
            self.plane_records[series][plane] = Some(PlaneRecord {
                file: state.path.clone(),
                ifd: state.current_index,
            });
        }
        Ok(())
    }

    /// Write a whole plane at once.
    pub fn save_plane(
        &mut self,
        plane: usize,
        buf: &VariantPixelBuffer<'_>,
    ) -> OmeTiffResult<()> {
        let series = self.handler.series()?;
        let resolution = self.handler.resolution()?;
        let tier = self.resolutions[series][resolution];
        self.save_bytes(plane, buf, 0, 0, tier.size_x, tier.size_y)
    }

    /// Finalise every output file: flush the last IFD, regenerate the
    /// OME-XML plane map, and patch each file's reserved
    /// `ImageDescription` to point at its document.
    pub fn close(&mut self) -> OmeTiffResult<()> {
        if !self.handler.is_open() {
            return Ok(());
        }

        for state in &mut self.tiffs {
            state.encoder.finish()?;
        }

        let missing: usize = self
            .plane_records
            .iter()
            .map(|planes| planes.iter().filter(|p| p.is_none()).count())
            .sum();
        if missing > 0 {
            return Err(UsageError::IncompletePlanes(missing).into());
        }

        let document = self.final_document()?;
        let files: Vec<(PathBuf, String)> = self
            .tiffs
            .drain(..)
            .map(|state| (state.path, state.uuid))
            .collect();
        for (path, uuid) in files {
            let mut per_file = document.clone();
            per_file.set_document_uuid(&format!("urn:uuid:{}", uuid));
            let xml = per_file.to_xml()?;
            patch_image_description(&path, xml.as_bytes())?;
        }

        self.reset();
        Ok(())
    }

    /// Build the shared OME-XML document with the recorded plane map.
    fn final_document(&self) -> OmeTiffResult<OmeXmlMetadata> {
        let mut store = self
            .store
            .clone()
            .ok_or(UsageError::NoMetadataStore)?;
        store.set_creator(concat!("ometiff ", env!("CARGO_PKG_VERSION")));

        let uuid_by_file: HashMap<&PathBuf, &String> =
            self.tiffs.iter().map(|t| (&t.path, &t.uuid)).collect();

        for (series, planes) in self.plane_records.iter().enumerate() {
            let core = &self.series_core[series];
            store.set_pixels_big_endian(series, cfg!(target_endian = "big"));
            store.set_pixels_interleaved(
                series,
                self.options.interleaved.unwrap_or(core.interleaved),
            );
            store.clear_tiff_data(series);

            if planes.is_empty() {
                store.set_tiff_data_plane_count(series, 0, 0);
                continue;
            }
            for (plane, record) in planes.iter().enumerate() {
                let record = record.as_ref().ok_or_else(|| {
                    UsageError::IncompletePlanes(1)
                })?;
                let (z, c, t) = get_zct_coords(
                    core.dimension_order,
                    core.size_z as usize,
                    core.effective_size_c(),
                    core.size_t as usize,
                    plane,
                )?;
                let uuid = uuid_by_file.get(&record.file).ok_or_else(|| {
                    MetadataError::Invalid(format!(
                        "plane recorded against unknown file {}",
                        record.file.display()
                    ))
                })?;
                let file_name = record
                    .file
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or_default();

                store.set_tiff_data_first_z(series, plane, z as u64);
                store.set_tiff_data_first_c(series, plane, c as u64);
                store.set_tiff_data_first_t(series, plane, t as u64);
                store.set_tiff_data_ifd(series, plane, record.ifd as u64);
                store.set_tiff_data_plane_count(series, plane, 1);
                store.set_uuid_file_name(series, plane, file_name);
                store.set_uuid_value(series, plane, &format!("urn:uuid:{}", uuid));
            }
        }
        Ok(store)
    }

    fn reset(&mut self) {
        self.handler.reset();
        self.store = None;
        self.series_core.clear();
        self.resolutions.clear();
        self.plane_records.clear();
        self.tiffs.clear();
        self.current_tiff = 0;
        self.variant = None;
    }
}

impl Drop for OmeTiffWriter {
    fn drop(&mut self) {
        if self.handler.is_open() {
            if let Err(error) = self.close() {
                tracing::warn!(%error, "close failed during drop");
            }
        }
    }
}

/// Rewrite a finished file's first-IFD `ImageDescription` entry to point
/// at `xml`, appended to the end of the file with a NUL terminator.
fn patch_image_description(path: &Path, xml: &[u8]) -> OmeTiffResult<()> {
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;

    let mut marker = [0u8; 2];
    file.read_exact(&mut marker)?;
    let little = match &marker {
        b"II" => true,
        b"MM" => false,
        _ => return Err(FormatError::TiffSignatureInvalid.into()),
    };
    let read_u16 = |file: &mut std::fs::File| -> OmeTiffResult<u16> {
        let mut b = [0u8; 2];
        file.read_exact(&mut b)?;
        Ok(if little {
            u16::from_le_bytes(b)
        } else {
            u16::from_be_bytes(b)
        })
    };
    let read_u32 = |file: &mut std::fs::File| -> OmeTiffResult<u32> {
        let mut b = [0u8; 4];
        file.read_exact(&mut b)?;
        Ok(if little {
            u32::from_le_bytes(b)
        } else {
            u32::from_be_bytes(b)
        })
    };
    let read_u64 = |file: &mut std::fs::File| -> OmeTiffResult<u64> {
        let mut b = [0u8; 8];
        file.read_exact(&mut b)?;
        Ok(if little {
            u64::from_le_bytes(b)
        } else {
            u64::from_be_bytes(b)
        })
    };

    let big = match read_u16(&mut file)? {
        42 => false,
        43 => {
            let offset_size = read_u16(&mut file)?;
            if offset_size != 8 {
                return Err(FormatError::OffsetSizeInvalid(offset_size).into());
            }
            read_u16(&mut file)?;
            true
        }
        version => return Err(FormatError::VersionNotSupported(version).into()),
    };

    let first_ifd = if big {
        read_u64(&mut file)?
    } else {
        u64::from(read_u32(&mut file)?)
    };

    // Append the document, NUL terminated, at end of file.
    let blob_offset = file.seek(SeekFrom::End(0))?;
    file.write_all(xml)?;
    file.write_all(&[0])?;

    // Scan the first directory for the reserved entry.
    file.seek(SeekFrom::Start(first_ifd))?;
    let entry_count = if big {
        read_u64(&mut file)?
    } else {
        u64::from(read_u16(&mut file)?)
    };
    let entry_size = if big { 20 } else { 12 };
    let entries_start = file.stream_position()?;

    for index in 0..entry_count {
        file.seek(SeekFrom::Start(entries_start + index * entry_size))?;
        let tag = read_u16(&mut file)?;
        if tag != Tag::ImageDescription.to_u16() {
            continue;
        }
        let type_ = read_u16(&mut file)?;
        if type_ != crate::tags::Type::ASCII.to_u16() {
            return Err(FormatError::ImageDescriptionNotAscii.into());
        }
        let count = if big {
            read_u64(&mut file)?
        } else {
            u64::from(read_u32(&mut file)?)
        };
        if count != DESCRIPTION_PLACEHOLDER.len() as u64 + 1 {
            return Err(FormatError::ImageDescriptionMissing.into());
        }

        // Overwrite the count and offset slots in place.
        let count_pos = entries_start + index * entry_size + 4;
        file.seek(SeekFrom::Start(count_pos))?;
        let new_count = xml.len() as u64 + 1;
        if big {
            let bytes = if little {
                new_count.to_le_bytes()
            } else {
                new_count.to_be_bytes()
            };
            file.write_all(&bytes)?;
            let bytes = if little {
                blob_offset.to_le_bytes()
            } else {
                blob_offset.to_be_bytes()
            };
            file.write_all(&bytes)?;
        } else {
            let new_count = u32::try_from(new_count)?;
            let offset = u32::try_from(blob_offset)?;
            let bytes = if little {
                new_count.to_le_bytes()
            } else {
                new_count.to_be_bytes()
            };
            file.write_all(&bytes)?;
            let bytes = if little {
                offset.to_le_bytes()
            } else {
                offset.to_be_bytes()
            };
            file.write_all(&bytes)?;
        }
        file.flush()?;
        return Ok(());
    }

    Err(FormatError::ImageDescriptionNotFound.into())
}
