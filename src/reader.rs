//! The OME-TIFF reader: discovers the files of a dataset through the
//! embedded OME-XML, maps every plane to its `(file, IFD)` tuple, derives
//! per-series core metadata, and decodes plane regions.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::error::{FormatError, OmeTiffResult, UsageError};
use crate::format::{
    canonical_path, get_index, get_zct_coords, suffixes, DimensionOrder, FormatHandler,
};
use crate::metadata::{parse_description, CoreMetadata, MetadataRetrieve, OmeXmlMetadata};
use crate::pixel::{EndianType, StorageOrder, VariantPixelBuffer};
use crate::tags::{IfdPointer, PhotometricInterpretation, PlanarConfiguration, Tag};
use crate::tiff::{PlaneLayout, TiffDecoder};

/// Mapping state of one plane.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PlaneStatus {
    /// Declared by the metadata but its file is missing.
    Absent,
    /// Mapped to a readable `(file, IFD)` tuple.
    Present,
    /// Not mapped by any `TiffData`.
    #[default]
    Unknown,
}

/// The `(file, IFD)` tuple of one full-resolution plane.
#[derive(Clone, Debug, Default)]
pub struct OmeTiffPlane {
    pub file: PathBuf,
    /// Index into the owning file's main IFD chain.
    pub ifd: usize,
    /// Whether the mapping came from an explicit `TiffData`.
    pub certain: bool,
    pub status: PlaneStatus,
}

#[derive(Debug, Default)]
struct SeriesState {
    /// Core metadata per resolution tier, full resolution first.
    core: Vec<CoreMetadata>,
    planes: Vec<OmeTiffPlane>,
    /// Total planes declared by the series' `TiffData` elements.
    declared_planes: usize,
    /// Set when a `TiffData` invalidated the mapping.
    invalid: bool,
}

/// Reads OME-TIFF datasets.
#[derive(Debug, Default)]
pub struct OmeTiffReader {
    handler: FormatHandler,
    metadata: OmeXmlMetadata,
    series: Vec<SeriesState>,
    tiffs: HashMap<PathBuf, TiffDecoder<BufReader<File>>>,
    used_files: Vec<PathBuf>,
}

impl OmeTiffReader {
    pub fn new() -> OmeTiffReader {
        OmeTiffReader::default()
    }

    pub fn format_name(&self) -> &'static str {
        "OME-TIFF"
    }

    pub fn suffixes(&self) -> &'static [&'static str] {
        suffixes::OME_TIFF
    }

    /// Whether `path` looks like an OME-TIFF dataset: an OME suffix, or a
    /// plain TIFF whose first description parses as OME-XML.
    pub fn is_this_type<P: AsRef<Path>>(path: P) -> bool {
        let path = path.as_ref();
        if suffixes::matches_any(path, suffixes::OME_TIFF)
            || suffixes::matches_any(path, suffixes::COMPANION)
        {
            return true;
        }
        if !suffixes::matches_any(path, suffixes::TIFF) {
            return false;
        }
        let Ok(mut tiff) = TiffDecoder::open(path) else {
            return false;
        };
        let Ok(ifd) = tiff.read_main_ifd(0) else {
            return false;
        };
        matches!(
            ifd.get_string(Tag::ImageDescription),
            Ok(Some(text)) if parse_description(&text).is_ok()
        )
    }

    /// Initialise the reader on a dataset file.
    pub fn set_id<P: AsRef<Path>>(&mut self, path: P) -> OmeTiffResult<()> {
        let path = canonical_path(path)?;

        // A companion metadata document redirects to the binary file named
        // by its first TiffData.
        if suffixes::matches_any(&path, suffixes::COMPANION) {
            let text = std::fs::read_to_string(&path)?;
            let companion = parse_description(&text)?;
            let first = (0..companion.image_count())
                .flat_map(|i| (0..companion.tiff_data_count(i)).map(move |td| (i, td)))
                .find_map(|(i, td)| companion.uuid_file_name(i, td))
                .ok_or_else(|| {
                    FormatError::MalformedOmeXml(
                        "companion file names no TiffData file".to_string(),
                    )
                })?;
            let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();
            self.close();
            return self.set_id(parent.join(first));
        }

        if self.handler.is_open() {
            return if self.handler.current_id()? == path {
                Ok(())
            } else {
                Err(UsageError::AlreadyOpen.into())
            };
        }
        if let Err(error) = self.initialize(path) {
            // A failed open leaves no partial state behind.
            self.close();
            return Err(error);
        }
        Ok(())
    }

    fn initialize(&mut self, path: PathBuf) -> OmeTiffResult<()> {
        self.handler.open(path.clone())?;
        tracing::debug!(id = %path.display(), "initialising OME-TIFF reader");

        let description = {
            let tiff = open_tiff(&mut self.tiffs, &path)?;
            let first = tiff.read_main_ifd(0)?;
            match first.entry(Tag::ImageDescription) {
                None => return Err(FormatError::ImageDescriptionMissing.into()),
                Some(entry) if entry.type_ != crate::tags::Type::ASCII => {
                    return Err(FormatError::ImageDescriptionNotAscii.into())
                }
                Some(_) => first.require_string(Tag::ImageDescription)?,
            }
        };
        let mut metadata = parse_description(&description)?;

        // A binary-only document defers to its metadata file, unless that
        // points straight back at a TIFF.
        if let Some(metadata_file) = metadata.binary_only_metadata_file() {
            let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();
            let companion = canonical_path(parent.join(&metadata_file))?;
            if !suffixes::matches_any(&companion, suffixes::TIFF) {
                let text = std::fs::read_to_string(&companion)?;
                metadata = parse_description(&text)?;
            }
        }

        metadata.sanitise();
        self.metadata = metadata;

        self.build_series()?;
        self.check_first_ifd_dimensions(&path);
        self.find_tiff_data(&path)?;
        self.fix_image_counts();
        self.fix_dimensions();
        self.fix_omero_metadata();
        self.apply_fallbacks(&path)?;
        self.add_sub_resolutions()?;
        self.collect_used_files(&path);
        Ok(())
    }

    /// Release every open file and reset the cursor.
    pub fn close(&mut self) {
        self.handler.reset();
        self.series.clear();
        self.tiffs.clear();
        self.used_files.clear();
        self.metadata = OmeXmlMetadata::new();
    }

    fn build_series(&mut self) -> OmeTiffResult<()> {
        self.series.clear();
        for image in 0..self.metadata.image_count() {
            let core = self.metadata.core_metadata(image)?;
            let planes = vec![OmeTiffPlane::default(); core.image_count()];
            self.series.push(SeriesState {
                core: vec![core],
                planes,
                declared_planes: 0,
                invalid: false,
            });
        }
        if self.series.is_empty() {
            return Err(FormatError::MalformedOmeXml("document declares no Image".into()).into());
        }
        Ok(())
    }

    /// Warn when the model and the first IFD disagree on the plane size.
    fn check_first_ifd_dimensions(&mut self, path: &PathBuf) {
        let Some(core) = self.series.first().map(|s| &s.core[0]) else {
            return;
        };
        let (size_x, size_y) = (core.size_x, core.size_y);
        let Ok(tiff) = open_tiff(&mut self.tiffs, path) else {
            return;
        };
        let Ok(first) = tiff.read_main_ifd(0) else {
            return;
        };
        if let Ok(layout) = PlaneLayout::from_ifd(&first) {
            if layout.width != size_x || layout.height != size_y {
                tracing::warn!(
                    model_x = size_x,
                    model_y = size_y,
                    ifd_x = layout.width,
                    ifd_y = layout.height,
                    "OME-XML plane size disagrees with the first IFD"
                );
            }
        }
    }

    /// Map the UUIDs referenced by `TiffData` elements onto file paths.
    fn find_used_files(&self, current: &Path) -> OmeTiffResult<HashMap<String, PathBuf>> {
        let parent = current.parent().map(Path::to_path_buf).unwrap_or_default();
        let mut files: HashMap<String, PathBuf> = HashMap::new();
        for image in 0..self.metadata.image_count() {
            for td in 0..self.metadata.tiff_data_count(image) {
                let Some(uuid) = self.metadata.uuid_value(image, td) else {
                    // No UUID element: the current file owns the planes.
                    continue;
                };
                let file = match self.metadata.uuid_file_name(image, td) {
                    Some(name) => canonical_path(parent.join(name))?,
                    None => current.to_path_buf(),
                };
                if let Some(existing) = files.get(&uuid) {
                    if *existing != file {
                        return Err(FormatError::InconsistentUuid(format!(
                            "{} maps to both {} and {}",
                            uuid,
                            existing.display(),
                            file.display()
                        ))
                        .into());
                    }
                } else {
                    files.insert(uuid.clone(), file);
                }
            }
        }
        Ok(files)
    }

    /// Per-series minimum `FirstZ`/`FirstC`/`FirstT`, compensating files
    /// that number their planes from one.
    fn series_index_start(&self, image: usize) -> (u64, u64, u64) {
        let count = self.metadata.tiff_data_count(image);
        if count == 0 {
            return (0, 0, 0);
        }
        let mut min_z = u64::MAX;
        let mut min_c = u64::MAX;
        let mut min_t = u64::MAX;
        for td in 0..count {
            min_z = min_z.min(self.metadata.tiff_data_first_z(image, td).unwrap_or(0));
            min_c = min_c.min(self.metadata.tiff_data_first_c(image, td).unwrap_or(0));
            min_t = min_t.min(self.metadata.tiff_data_first_t(image, td).unwrap_or(0));
        }
        if min_z > 0 || min_c > 0 || min_t > 0 {
            tracing::warn!(
                image,
                min_z,
                min_c,
                min_t,
                "TiffData indices do not start at zero, compensating"
            );
        }
        (min_z, min_c, min_t)
    }

    /// Fill the per-plane `(file, IFD)` table from the `TiffData`
    /// elements.
    fn find_tiff_data(&mut self, current: &PathBuf) -> OmeTiffResult<()> {
        let files_by_uuid = self.find_used_files(current)?;

        for image in 0..self.metadata.image_count() {
            let (base_z, base_c, base_t) = self.series_index_start(image);
            let core = self.series[image].core[0].clone();
            let order = core.dimension_order;
            let (size_z, eff_c, size_t) = (
                core.size_z as usize,
                core.effective_size_c(),
                core.size_t as usize,
            );

            // Explicit plane runs first; fill-forward entries after, so
            // they stop at planes already certain.
            let mut deferred = Vec::new();
            for td in 0..self.metadata.tiff_data_count(image) {
                let file = match self.metadata.uuid_value(image, td) {
                    Some(uuid) => files_by_uuid.get(&uuid).cloned().unwrap_or_else(|| {
                        // Unreferenced UUID: the current file owns it.
                        current.clone()
                    }),
                    None => current.clone(),
                };
                let ifd = self.metadata.tiff_data_ifd(image, td);
                let plane_count = self.metadata.tiff_data_plane_count(image, td);
                let z = self
                    .metadata
                    .tiff_data_first_z(image, td)
                    .unwrap_or(0)
                    .saturating_sub(base_z) as usize;
                let c = self
                    .metadata
                    .tiff_data_first_c(image, td)
                    .unwrap_or(0)
                    .saturating_sub(base_c) as usize;
                let t = self
                    .metadata
                    .tiff_data_first_t(image, td)
                    .unwrap_or(0)
                    .saturating_sub(base_t) as usize;
                let index = match get_index(order, size_z, eff_c, size_t, z, c, t) {
                    Ok(index) => index,
                    Err(_) => {
                        tracing::warn!(image, td, "TiffData coordinates out of range, skipping");
                        continue;
                    }
                };

                let count = match (plane_count, ifd) {
                    (Some(0), Some(_)) => 1,
                    (Some(0), None) => {
                        tracing::warn!(image, td, "TiffData with zero planes and no IFD");
                        self.series[image].invalid = true;
                        continue;
                    }
                    (Some(n), _) => n as usize,
                    (None, _) => {
                        deferred.push((index, file.clone(), ifd.unwrap_or(0) as usize));
                        continue;
                    }
                };

                let status = if file.exists() {
                    PlaneStatus::Present
                } else {
                    tracing::warn!(file = %file.display(), "referenced file is missing");
                    PlaneStatus::Absent
                };
                let ifd_start = ifd.unwrap_or(0) as usize;
                let mut filled = 0;
                let planes = &mut self.series[image].planes;
                for k in 0..count {
                    let Some(slot) = planes.get_mut(index + k) else {
                        tracing::warn!(image, td, "TiffData overruns the series plane count");
                        break;
                    };
                    *slot = OmeTiffPlane {
                        file: file.clone(),
                        ifd: ifd_start + k,
                        certain: true,
                        status,
                    };
                    filled += 1;
                }
                self.series[image].declared_planes += filled;
            }

            // Fill forward until the next certain plane.
            for (index, file, ifd_start) in deferred {
                let status = if file.exists() {
                    PlaneStatus::Present
                } else {
                    PlaneStatus::Absent
                };
                let mut filled = 0;
                let planes = &mut self.series[image].planes;
                for (k, slot) in planes[index..].iter_mut().enumerate() {
                    if slot.certain {
                        break;
                    }
                    *slot = OmeTiffPlane {
                        file: file.clone(),
                        ifd: ifd_start + k,
                        certain: true,
                        status,
                    };
                    filled += 1;
                }
                self.series[image].declared_planes += filled;
            }
        }
        Ok(())
    }

    /// A series declaring one plane collapses to single Z, C and T.
    fn fix_image_counts(&mut self) {
        for series in &mut self.series {
            let core = &mut series.core[0];
            if series.declared_planes == 1
                && (core.size_z != 1 || core.size_t != 1 || core.effective_size_c() != 1)
            {
                tracing::warn!("single-plane series declares extra dimensions, collapsing");
                core.size_z = 1;
                core.size_t = 1;
                core.size_c.truncate(1);
                series.planes.truncate(1);
            }
        }
    }

    /// Reconcile dimensions that multiply out beyond the mapped plane
    /// count.
    fn fix_dimensions(&mut self) {
        for series in &mut self.series {
            let declared = series.declared_planes;
            if declared == 0 {
                continue;
            }
            let core = &mut series.core[0];
            let z = core.size_z as usize;
            let t = core.size_t as usize;
            let c = core.total_samples() as usize;
            let has_multi_sample = core.size_c.iter().any(|&s| s > 1);
            if z * t * c > declared && !has_multi_sample {
                if z == declared {
                    core.size_t = 1;
                    core.size_c = vec![1];
                } else if t == declared {
                    core.size_z = 1;
                    core.size_c = vec![1];
                } else if c == declared {
                    core.size_z = 1;
                    core.size_t = 1;
                } else {
                    core.size_z = 1;
                    core.size_c = vec![1];
                    core.size_t = declared as u32;
                }
                tracing::warn!(
                    declared,
                    "dimensions exceed the mapped plane count, reconciling"
                );
                series.planes.truncate(core.image_count());
            }
        }
    }

    /// OMERO exports carry a marker in their file table and use `XYZCT`
    /// regardless of what the document claims.
    fn fix_omero_metadata(&mut self) {
        if !self.metadata.has_omero_export_marker() {
            return;
        }
        for image in 0..self.series.len() {
            if self.metadata.channel_name(image, 0).is_some() {
                tracing::warn!(image, "OMERO export detected, forcing XYZCT");
                self.series[image].core[0].dimension_order = DimensionOrder::XYZCT;
                self.metadata
                    .override_dimension_order(image, DimensionOrder::XYZCT);
            }
        }
    }

    /// Series with unmapped planes fall back to consecutive IFDs of the
    /// current file.
    fn apply_fallbacks(&mut self, current: &PathBuf) -> OmeTiffResult<()> {
        let available = open_tiff(&mut self.tiffs, current)?.ifd_count();
        for series in &mut self.series {
            let unmapped = series.invalid
                || series
                    .planes
                    .iter()
                    .any(|p| p.status == PlaneStatus::Unknown);
            if !unmapped {
                continue;
            }
            tracing::warn!("plane mapping incomplete, assigning consecutive IFDs");
            for (index, plane) in series.planes.iter_mut().enumerate() {
                *plane = OmeTiffPlane {
                    file: current.clone(),
                    ifd: index,
                    certain: false,
                    status: if index < available {
                        PlaneStatus::Present
                    } else {
                        PlaneStatus::Absent
                    },
                };
            }
            series.declared_planes = series.planes.len();
            series.invalid = false;
        }
        Ok(())
    }

    /// Discover pyramid tiers through the first plane's `SubIfd` offsets.
    ///
    /// Every tier must agree with the full resolution on Z, T, the channel
    /// sample layout, pixel type, indexing, and interleaving; only X and Y
    /// may shrink.
    fn add_sub_resolutions(&mut self) -> OmeTiffResult<()> {
        for index in 0..self.series.len() {
            let Some(plane) = self.series[index]
                .planes
                .first()
                .filter(|p| p.status == PlaneStatus::Present)
                .cloned()
            else {
                continue;
            };
            let tiff = open_tiff(&mut self.tiffs, &plane.file)?;
            let ifd = tiff.read_main_ifd(plane.ifd)?;
            let Some(offsets) = ifd.get_u64s(Tag::SubIfd)? else {
                continue;
            };

            // Tier zero's on-disk layout settles the flags the model does
            // not always carry.
            let full_layout = PlaneLayout::from_ifd(&ifd)?;
            {
                let core = &mut self.series[index].core[0];
                core.indexed =
                    full_layout.photometric == PhotometricInterpretation::RGBPalette;
                if full_layout.samples > 1 {
                    core.interleaved = full_layout.planar != PlanarConfiguration::Planar;
                }
            }

            let full = self.series[index].core[0].clone();
            // The channel whose samples every tier of this plane must carry.
            let (_, channel, _) = get_zct_coords(
                full.dimension_order,
                full.size_z as usize,
                full.effective_size_c(),
                full.size_t as usize,
                0,
            )?;

            let mut tiers = Vec::with_capacity(offsets.len());
            for offset in offsets {
                let sub = tiff.read_ifd(IfdPointer(offset))?;
                let layout = PlaneLayout::from_ifd(&sub)?;

                // Refill the tier's core metadata from the reduced IFD.
                let mut core = full.clone();
                core.size_x = layout.width;
                core.size_y = layout.height;
                core.pixel_type = layout.pixel_type;
                if let Some(samples) = core.size_c.get_mut(channel) {
                    *samples = u32::from(layout.samples);
                }
                core.indexed = layout.photometric == PhotometricInterpretation::RGBPalette;
                // A single-sample raster looks the same either way on disk.
                core.interleaved = if layout.samples > 1 {
                    layout.planar != PlanarConfiguration::Planar
                } else {
                    full.interleaved
                };

                if core.size_x > full.size_x
                    || core.size_y > full.size_y
                    || core.size_z != full.size_z
                    || core.size_t != full.size_t
                    || core.size_c != full.size_c
                    || core.pixel_type != full.pixel_type
                    || core.indexed != full.indexed
                    || core.interleaved != full.interleaved
                {
                    return Err(FormatError::InconsistentSubResolution {
                        series: index,
                        resolution: tiers.len() + 1,
                    }
                    .into());
                }
                tiers.push(core);
            }
            tiers.sort_by(|a, b| b.size_x.cmp(&a.size_x));
            self.series[index].core.extend(tiers);
        }
        Ok(())
    }

    fn collect_used_files(&mut self, current: &PathBuf) {
        let mut files = vec![current.clone()];
        for series in &self.series {
            for plane in &series.planes {
                if !plane.file.as_os_str().is_empty() && !files.contains(&plane.file) {
                    files.push(plane.file.clone());
                }
            }
        }
        self.used_files = files;
    }

    //
    // Cursor and metadata accessors
    //

    pub fn series_count(&self) -> usize {
        self.series.len()
    }

    pub fn set_series(&mut self, series: usize) -> OmeTiffResult<()> {
        self.handler.set_series(series, self.series.len())?;
        Ok(())
    }

    pub fn series(&self) -> OmeTiffResult<usize> {
        self.handler.series()
    }

    pub fn resolution_count(&self) -> OmeTiffResult<usize> {
        Ok(self.series[self.handler.series()?].core.len())
    }

    pub fn set_resolution(&mut self, resolution: usize) -> OmeTiffResult<()> {
        let count = self.resolution_count()?;
        self.handler.set_resolution(resolution, count)?;
        Ok(())
    }

    pub fn resolution(&self) -> OmeTiffResult<usize> {
        self.handler.resolution()
    }

    /// Planes of the current series.
    pub fn image_count(&self) -> OmeTiffResult<usize> {
        Ok(self.series[self.handler.series()?].planes.len())
    }

    pub fn set_plane(&mut self, plane: usize) -> OmeTiffResult<()> {
        let count = self.image_count()?;
        self.handler.set_plane(plane, count)?;
        Ok(())
    }

    pub fn plane(&self) -> OmeTiffResult<usize> {
        self.handler.plane()
    }

    /// Core metadata of the current `(series, resolution)` cursor.
    pub fn core_metadata(&self) -> OmeTiffResult<&CoreMetadata> {
        let series = self.handler.series()?;
        Ok(&self.series[series].core[self.handler.resolution()?])
    }

    pub fn core_metadata_at(
        &self,
        series: usize,
        resolution: usize,
    ) -> OmeTiffResult<&CoreMetadata> {
        self.series
            .get(series)
            .and_then(|s| s.core.get(resolution))
            .ok_or_else(|| {
                UsageError::SeriesOutOfRange {
                    index: series,
                    count: self.series.len(),
                }
                .into()
            })
    }

    /// The plane table entry of a full-resolution plane of the current
    /// series.
    pub fn plane_info(&self, plane: usize) -> OmeTiffResult<&OmeTiffPlane> {
        let series = self.handler.series()?;
        self.series[series].planes.get(plane).ok_or_else(|| {
            UsageError::PlaneOutOfRange {
                index: plane,
                count: self.series[series].planes.len(),
            }
            .into()
        })
    }

    /// Every file of the dataset, the initialising file first.
    pub fn used_files(&self) -> OmeTiffResult<&[PathBuf]> {
        self.handler.current_id()?;
        Ok(&self.used_files)
    }

    /// The parsed metadata store.
    pub fn metadata_store(&self) -> &OmeXmlMetadata {
        &self.metadata
    }

    pub fn get_zct_coords(&self, plane: usize) -> OmeTiffResult<(usize, usize, usize)> {
        let core = self.core_metadata()?;
        get_zct_coords(
            core.dimension_order,
            core.size_z as usize,
            core.effective_size_c(),
            core.size_t as usize,
            plane,
        )
    }

    pub fn get_index(&self, z: usize, c: usize, t: usize) -> OmeTiffResult<usize> {
        let core = self.core_metadata()?;
        get_index(
            core.dimension_order,
            core.size_z as usize,
            core.effective_size_c(),
            core.size_t as usize,
            z,
            c,
            t,
        )
    }

    /// Resolve the cursor and `plane` to the IFD that holds its raster,
    /// descending into `SubIfd` offsets for reduced resolutions.
    fn resolve_ifd(&mut self, plane: usize) -> OmeTiffResult<(PathBuf, crate::tiff::Ifd)> {
        let series = self.handler.series()?;
        let resolution = self.handler.resolution()?;
        let info = self.series[series]
            .planes
            .get(plane)
            .ok_or(UsageError::PlaneOutOfRange {
                index: plane,
                count: self.series[series].planes.len(),
            })?
            .clone();
        let tiff = open_tiff(&mut self.tiffs, &info.file)?;
        let mut ifd = tiff.read_main_ifd(info.ifd)?;
        if resolution > 0 {
            let offsets = ifd
                .get_u64s(Tag::SubIfd)?
                .ok_or(FormatError::RequiredTagNotFound(Tag::SubIfd))?;
            let offset = *offsets.get(resolution - 1).ok_or(
                UsageError::ResolutionOutOfRange {
                    index: resolution,
                    count: offsets.len() + 1,
                },
            )?;
            ifd = tiff.read_ifd(IfdPointer(offset))?;
        }
        Ok((info.file, ifd))
    }

    /// Allocate a buffer shaped for a region of the current cursor's
    /// raster.
    pub fn allocate_buffer(
        &mut self,
        plane: usize,
        w: u32,
        h: u32,
    ) -> OmeTiffResult<VariantPixelBuffer<'static>> {
        let (_, ifd) = self.resolve_ifd(plane)?;
        let layout = PlaneLayout::from_ifd(&ifd)?;
        Ok(VariantPixelBuffer::with_order(
            layout.pixel_type,
            crate::pixel::plane_extents(w as usize, h as usize, layout.samples as usize),
            StorageOrder::for_plane(layout.planar != PlanarConfiguration::Planar),
            EndianType::Native,
        ))
    }

    /// Decode a rectangle of a plane into `buf`.
    ///
    /// Absent planes yield zero bytes and a warning rather than an error.
    pub fn open_bytes(
        &mut self,
        plane: usize,
        x: u32,
        y: u32,
        w: u32,
        h: u32,
        buf: &mut VariantPixelBuffer<'_>,
    ) -> OmeTiffResult<()> {
        self.set_plane(plane)?;
        let info = self.plane_info(plane)?.clone();
        if info.status == PlaneStatus::Absent {
            tracing::warn!(plane, "reading an absent plane, returning blank data");
            buf.data_mut().fill(0);
            return Ok(());
        }
        let (file, ifd) = self.resolve_ifd(plane)?;
        let tiff = open_tiff(&mut self.tiffs, &file)?;
        tiff.read_region(&ifd, x, y, w, h, buf)
    }

    /// Decode a full plane into a freshly allocated buffer.
    pub fn open_plane(&mut self, plane: usize) -> OmeTiffResult<VariantPixelBuffer<'static>> {
        let (w, h) = {
            let core = self.core_metadata()?;
            (core.size_x, core.size_y)
        };
        let mut buf = self.allocate_buffer(plane, w, h)?;
        self.open_bytes(plane, 0, 0, w, h, &mut buf)?;
        Ok(buf)
    }

    /// Tile width of the current raster; full width for stripped files.
    pub fn optimal_tile_width(&mut self) -> OmeTiffResult<u32> {
        let plane = self.handler.plane()?;
        let (_, ifd) = self.resolve_ifd(plane)?;
        let layout = PlaneLayout::from_ifd(&ifd)?;
        Ok(layout.chunk_dims().0)
    }

    /// Tile height of the current raster; one row for stripped files.
    pub fn optimal_tile_height(&mut self) -> OmeTiffResult<u32> {
        let plane = self.handler.plane()?;
        let (_, ifd) = self.resolve_ifd(plane)?;
        let layout = PlaneLayout::from_ifd(&ifd)?;
        if layout.is_tiled() {
            Ok(layout.chunk_dims().1)
        } else {
            Ok(1)
        }
    }
}

/// Open (or reuse) the TIFF handle of a canonical path.
fn open_tiff<'m>(
    tiffs: &'m mut HashMap<PathBuf, TiffDecoder<BufReader<File>>>,
    path: &Path,
) -> OmeTiffResult<&'m mut TiffDecoder<BufReader<File>>> {
    match tiffs.entry(path.to_path_buf()) {
        std::collections::hash_map::Entry::Occupied(entry) => Ok(entry.into_mut()),
        std::collections::hash_map::Entry::Vacant(entry) => {
            Ok(entry.insert(TiffDecoder::open(path)?))
        }
    }
}
