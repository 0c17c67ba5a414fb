//! Reading and writing of OME-TIFF datasets
//!
//! OME-TIFF stores multi-dimensional microscopy images as one or more TIFF
//! files whose structure is described by an OME-XML document embedded in
//! the first IFD's `ImageDescription`. This crate maps a 5-D logical image
//! model (series × Z × C × T × sample, plus a sub-resolution pyramid axis)
//! onto TIFF directories scattered across those files, linked by UUIDs.
//!
//! # Related Links
//! * <https://docs.openmicroscopy.org/ome-model/6.0.0/ome-tiff/> - The OME-TIFF specification
//! * <https://web.archive.org/web/20210108073850/https://www.adobe.io/open/standards/TIFF.html> - The TIFF specification
//!
//! # Reading
//!
//! ```no_run
//! use ometiff::OmeTiffReader;
//!
//! let mut reader = OmeTiffReader::new();
//! reader.set_id("dataset.ome.tif")?;
//! reader.set_series(0)?;
//! let plane = reader.open_plane(0)?;
//! # Ok::<(), ometiff::OmeTiffError>(())
//! ```
//!
//! # Writing
//!
//! ```no_run
//! use ometiff::{OmeTiffWriter, OmeXmlMetadata};
//!
//! let metadata = OmeXmlMetadata::new();
//! // ... describe images through the MetadataStore trait ...
//! let mut writer = OmeTiffWriter::new();
//! writer.set_metadata_retrieve(&metadata)?;
//! writer.set_id("output.ome.tif")?;
//! # Ok::<(), ometiff::OmeTiffError>(())
//! ```

mod error;
pub mod format;
pub mod metadata;
pub mod pixel;
mod reader;
pub mod tags;
pub mod tiff;
mod writer;

pub use self::error::{
    FormatError, MetadataError, OmeTiffError, OmeTiffResult, UnsupportedError, UsageError,
};
pub use self::format::{DimensionOrder, WriterOptions};
pub use self::metadata::{
    CoreMetadata, MetadataRetrieve, MetadataStore, OmeXmlMetadata, Resolution,
};
pub use self::pixel::{EndianType, PixelBuffer, PixelType, VariantPixelBuffer};
pub use self::reader::{OmeTiffPlane, OmeTiffReader, PlaneStatus};
pub use self::writer::OmeTiffWriter;
