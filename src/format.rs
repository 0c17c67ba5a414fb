//! Shared format-handler machinery: the `set_id → … → close` cursor state
//! machine, dimension-order plane indexing, writer options, and filename
//! suffix tables.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{MetadataError, OmeTiffResult, UsageError};

/// The permutation of `ZCT` that governs plane indexing; `X` and `Y` are
/// always innermost.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, Default)]
pub enum DimensionOrder {
    #[default]
    XYZCT,
    XYZTC,
    XYCTZ,
    XYCZT,
    XYTCZ,
    XYTZC,
}

impl DimensionOrder {
    pub const ALL: [DimensionOrder; 6] = [
        DimensionOrder::XYZCT,
        DimensionOrder::XYZTC,
        DimensionOrder::XYCTZ,
        DimensionOrder::XYCZT,
        DimensionOrder::XYTCZ,
        DimensionOrder::XYTZC,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DimensionOrder::XYZCT => "XYZCT",
            DimensionOrder::XYZTC => "XYZTC",
            DimensionOrder::XYCTZ => "XYCTZ",
            DimensionOrder::XYCZT => "XYCZT",
            DimensionOrder::XYTCZ => "XYTCZ",
            DimensionOrder::XYTZC => "XYTZC",
        }
    }

    pub fn from_str(value: &str) -> OmeTiffResult<DimensionOrder> {
        Self::ALL
            .into_iter()
            .find(|o| o.as_str() == value)
            .ok_or_else(|| {
                MetadataError::Invalid(format!("unknown dimension order \"{}\"", value)).into()
            })
    }
}

impl fmt::Display for DimensionOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Linear plane index of the `(z, c, t)` coordinates under a dimension
/// order. `size_c` is the effective channel count.
pub fn get_index(
    order: DimensionOrder,
    size_z: usize,
    size_c: usize,
    size_t: usize,
    z: usize,
    c: usize,
    t: usize,
) -> OmeTiffResult<usize> {
    if z >= size_z.max(1) || c >= size_c.max(1) || t >= size_t.max(1) {
        return Err(UsageError::CoordsOutOfRange { z, c, t }.into());
    }
    Ok(match order {
        DimensionOrder::XYZCT => z + size_z * (c + size_c * t),
        DimensionOrder::XYZTC => z + size_z * (t + size_t * c),
        DimensionOrder::XYCTZ => c + size_c * (t + size_t * z),
        DimensionOrder::XYCZT => c + size_c * (z + size_z * t),
        DimensionOrder::XYTCZ => t + size_t * (c + size_c * z),
        DimensionOrder::XYTZC => t + size_t * (z + size_z * c),
    })
}

/// The `(z, c, t)` coordinates of a linear plane index; inverse of
/// [`get_index`].
pub fn get_zct_coords(
    order: DimensionOrder,
    size_z: usize,
    size_c: usize,
    size_t: usize,
    index: usize,
) -> OmeTiffResult<(usize, usize, usize)> {
    let size_z = size_z.max(1);
    let size_c = size_c.max(1);
    let size_t = size_t.max(1);
    let count = size_z * size_c * size_t;
    if index >= count {
        return Err(UsageError::PlaneOutOfRange {
            index,
            count,
        }
        .into());
    }
    Ok(match order {
        DimensionOrder::XYZCT => (
            index % size_z,
            (index / size_z) % size_c,
            index / (size_z * size_c),
        ),
        DimensionOrder::XYZTC => (
            index % size_z,
            index / (size_z * size_t),
            (index / size_z) % size_t,
        ),
        DimensionOrder::XYCTZ => (
            index / (size_c * size_t),
            index % size_c,
            (index / size_c) % size_t,
        ),
        DimensionOrder::XYCZT => (
            (index / size_c) % size_z,
            index % size_c,
            index / (size_c * size_z),
        ),
        DimensionOrder::XYTCZ => (
            index / (size_t * size_c),
            (index / size_t) % size_c,
            index % size_t,
        ),
        DimensionOrder::XYTZC => (
            (index / size_t) % size_z,
            index / (size_t * size_z),
            index % size_t,
        ),
    })
}

/// Options recognised by the writer.
#[derive(Clone, Debug, Default)]
pub struct WriterOptions {
    /// Codec name as reported by [`Codec::name`]; `None` means no
    /// compression.
    ///
    /// [`Codec::name`]: crate::tiff::Codec::name
    pub compression: Option<String>,
    /// Contiguous (`true`) vs planar (`false`) sample layout.
    pub interleaved: Option<bool>,
    pub tile_size_x: Option<u32>,
    pub tile_size_y: Option<u32>,
    /// Advisory hint for one-pass output.
    pub write_sequentially: bool,
    /// Force classic (`Some(false)`) or BigTIFF (`Some(true)`); `None`
    /// selects from the expected pixel footprint.
    pub big_tiff: Option<bool>,
    /// Stored for movie-capable downstream formats.
    pub frames_per_second: u32,
}

/// The cursor state shared by readers and writers.
///
/// States are `Fresh → Open → Fresh` (close returns the handler to a
/// reusable fresh state). `series` and `plane` may only stay or advance by
/// one; changing `series` resets `resolution` and `plane`, changing
/// `resolution` resets `plane`.
#[derive(Debug, Default)]
pub struct FormatHandler {
    current_id: Option<PathBuf>,
    series: usize,
    resolution: usize,
    plane: usize,
}

impl FormatHandler {
    pub fn new() -> FormatHandler {
        FormatHandler::default()
    }

    pub fn is_open(&self) -> bool {
        self.current_id.is_some()
    }

    /// The canonical id, failing before `set_id`.
    pub fn current_id(&self) -> OmeTiffResult<&Path> {
        self.current_id
            .as_deref()
            .ok_or_else(|| UsageError::NotOpen.into())
    }

    /// Record the canonical id. Fails when a different id is already set.
    pub fn open(&mut self, id: PathBuf) -> OmeTiffResult<()> {
        match &self.current_id {
            Some(existing) if *existing != id => Err(UsageError::AlreadyOpen.into()),
            _ => {
                self.current_id = Some(id);
                Ok(())
            }
        }
    }

    /// Swap the id of an already-open handler; used by writers when the
    /// output moves to another file of the same dataset.
    pub fn swap_id(&mut self, id: PathBuf) -> OmeTiffResult<()> {
        self.current_id()?;
        self.current_id = Some(id);
        Ok(())
    }

    /// Reset to the fresh state.
    pub fn reset(&mut self) {
        if let Some(id) = self.current_id.take() {
            tracing::debug!(id = %id.display(), "closing handler");
        }
        self.series = 0;
        self.resolution = 0;
        self.plane = 0;
    }

    pub fn series(&self) -> OmeTiffResult<usize> {
        self.current_id()?;
        Ok(self.series)
    }

    pub fn resolution(&self) -> OmeTiffResult<usize> {
        self.current_id()?;
        Ok(self.resolution)
    }

    pub fn plane(&self) -> OmeTiffResult<usize> {
        self.current_id()?;
        Ok(self.plane)
    }

    /// Move the series cursor; returns whether it changed. Enforces range
    /// and contiguous advance, and resets resolution and plane.
    pub fn set_series(&mut self, series: usize, count: usize) -> OmeTiffResult<bool> {
        self.current_id()?;
        if series >= count {
            return Err(UsageError::SeriesOutOfRange {
                index: series,
                count,
            }
            .into());
        }
        if series != self.series && series != self.series + 1 {
            return Err(UsageError::NonMonotonicSeries {
                from: self.series,
                to: series,
            }
            .into());
        }
        let changed = series != self.series;
        self.series = series;
        if changed {
            self.resolution = 0;
            self.plane = 0;
        }
        Ok(changed)
    }

    /// Move the resolution cursor; returns whether it changed. Resets the
    /// plane but not the series.
    pub fn set_resolution(&mut self, resolution: usize, count: usize) -> OmeTiffResult<bool> {
        self.current_id()?;
        if resolution >= count {
            return Err(UsageError::ResolutionOutOfRange {
                index: resolution,
                count,
            }
            .into());
        }
        let changed = resolution != self.resolution;
        self.resolution = resolution;
        if changed {
            self.plane = 0;
        }
        Ok(changed)
    }

    /// Move the plane cursor; returns whether it changed. Enforces range
    /// and contiguous advance.
    pub fn set_plane(&mut self, plane: usize, count: usize) -> OmeTiffResult<bool> {
        self.current_id()?;
        if plane >= count {
            return Err(UsageError::PlaneOutOfRange {
                index: plane,
                count,
            }
            .into());
        }
        if plane != self.plane && plane != self.plane + 1 {
            return Err(UsageError::NonMonotonicPlane {
                from: self.plane,
                to: plane,
            }
            .into());
        }
        let changed = plane != self.plane;
        self.plane = plane;
        Ok(changed)
    }
}

/// Canonicalise a path that may not exist yet: existing paths resolve
/// fully, otherwise the parent resolves and the file name is appended.
pub fn canonical_path<P: AsRef<Path>>(path: P) -> OmeTiffResult<PathBuf> {
    let path = path.as_ref();
    if path.exists() {
        return Ok(path.canonicalize()?);
    }
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.canonicalize()?,
        _ => std::env::current_dir()?,
    };
    let name = path
        .file_name()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty file name"))?;
    Ok(parent.join(name))
}

/// Filename suffix conventions.
pub mod suffixes {
    use std::path::Path;

    /// Plain TIFF suffixes.
    pub const TIFF: &[&str] = &["tif", "tiff", "tf2", "tf8", "btf"];
    /// OME-TIFF suffixes.
    pub const OME_TIFF: &[&str] = &["ome.tif", "ome.tiff", "ome.tf2", "ome.tf8", "ome.btf"];
    /// Companion metadata suffix.
    pub const COMPANION: &[&str] = &["companion.ome"];

    /// Case-insensitive multi-dot suffix test.
    pub fn has_suffix(path: &Path, suffix: &str) -> bool {
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n.to_ascii_lowercase(),
            None => return false,
        };
        name.ends_with(&format!(".{}", suffix.to_ascii_lowercase()))
    }

    pub fn matches_any(path: &Path, suffixes: &[&str]) -> bool {
        suffixes.iter().any(|s| has_suffix(path, s))
    }
}
