//! Metadata interchange: the `MetadataRetrieve`/`MetadataStore` traits,
//! the concrete OME-XML backed store, per-series core metadata, and the
//! sanitisation helpers shared by reader and writer.

pub mod model;

use crate::error::{FormatError, MetadataError, OmeTiffResult};
use crate::format::DimensionOrder;
use crate::pixel::PixelType;

use self::model::{
    AnnotationValue, Channel, Image, Ome, Pixels, ResolutionList, ResolutionTier,
    StructuredAnnotations, TiffData, UuidRef, XmlAnnotation, OME_WARNING_COMMENT, OME_XMLNS,
    RESOLUTION_NAMESPACE,
};


/// One pyramid tier of one series.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub size_x: u32,
    pub size_y: u32,
    pub size_z: u32,
}

/// A modulo sub-dimension (start/end/step along an existing axis).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Modulo {
    pub start: f64,
    pub step: f64,
    pub end: f64,
}

impl Default for Modulo {
    fn default() -> Modulo {
        Modulo {
            start: 0.0,
            step: 1.0,
            end: 0.0,
        }
    }
}

impl Modulo {
    /// Number of positions along the sub-dimension, never below one.
    pub fn size(&self) -> usize {
        if self.step <= 0.0 || self.end < self.start {
            1
        } else {
            ((self.end - self.start) / self.step) as usize + 1
        }
    }
}

/// The core dimensional metadata of one series at one resolution tier.
#[derive(Clone, Debug, PartialEq)]
pub struct CoreMetadata {
    pub size_x: u32,
    pub size_y: u32,
    pub size_z: u32,
    pub size_t: u32,
    /// Samples per pixel of each effective channel; the effective channel
    /// count is the length, the total sample count the sum.
    pub size_c: Vec<u32>,
    pub pixel_type: PixelType,
    /// Significant bits; at most the pixel type's full width.
    pub bits_per_pixel: u16,
    pub dimension_order: DimensionOrder,
    pub order_certain: bool,
    pub little_endian: bool,
    pub interleaved: bool,
    pub indexed: bool,
    pub false_color: bool,
    pub metadata_complete: bool,
    pub thumbnail: bool,
    pub modulo_z: Modulo,
    pub modulo_t: Modulo,
    pub modulo_c: Modulo,
}

impl Default for CoreMetadata {
    fn default() -> CoreMetadata {
        CoreMetadata {
            size_x: 1,
            size_y: 1,
            size_z: 1,
            size_t: 1,
            size_c: vec![1],
            pixel_type: PixelType::UInt8,
            bits_per_pixel: 8,
            dimension_order: DimensionOrder::XYZCT,
            order_certain: true,
            little_endian: true,
            interleaved: false,
            indexed: false,
            false_color: false,
            metadata_complete: true,
            thumbnail: false,
            modulo_z: Modulo::default(),
            modulo_t: Modulo::default(),
            modulo_c: Modulo::default(),
        }
    }
}

impl CoreMetadata {
    /// The number of effective channels.
    pub fn effective_size_c(&self) -> usize {
        self.size_c.len()
    }

    /// The total number of samples across all channels.
    pub fn total_samples(&self) -> u32 {
        self.size_c.iter().sum()
    }

    /// The number of 2-D planes: `Z × T × effectiveC`.
    pub fn image_count(&self) -> usize {
        self.size_z as usize * self.size_t as usize * self.effective_size_c()
    }

    /// Whether a channel carries multiple samples per pixel.
    pub fn is_rgb(&self, channel: usize) -> bool {
        self.size_c.get(channel).is_some_and(|&s| s > 1)
    }
}

/// Read access to the metadata store, in the shape the TIFF assembly
/// layer consumes.
///
/// Optional attributes return `None` when unset; required attributes fail
/// with [`MetadataError::Missing`] through the `OmeTiffResult` methods.
pub trait MetadataRetrieve {
    fn image_count(&self) -> usize;
    fn image_name(&self, image: usize) -> Option<String>;
    fn pixels_size_x(&self, image: usize) -> OmeTiffResult<u32>;
    fn pixels_size_y(&self, image: usize) -> OmeTiffResult<u32>;
    fn pixels_size_z(&self, image: usize) -> OmeTiffResult<u32>;
    fn pixels_size_c(&self, image: usize) -> OmeTiffResult<u32>;
    fn pixels_size_t(&self, image: usize) -> OmeTiffResult<u32>;
    fn pixels_type(&self, image: usize) -> OmeTiffResult<PixelType>;
    fn pixels_significant_bits(&self, image: usize) -> Option<u32>;
    fn pixels_dimension_order(&self, image: usize) -> OmeTiffResult<DimensionOrder>;
    fn pixels_big_endian(&self, image: usize) -> Option<bool>;
    fn pixels_interleaved(&self, image: usize) -> Option<bool>;
    fn channel_count(&self, image: usize) -> usize;
    fn channel_samples_per_pixel(&self, image: usize, channel: usize) -> OmeTiffResult<u32>;
    fn channel_name(&self, image: usize, channel: usize) -> Option<String>;
    fn tiff_data_count(&self, image: usize) -> usize;
    fn tiff_data_ifd(&self, image: usize, tiff_data: usize) -> Option<u64>;
    fn tiff_data_plane_count(&self, image: usize, tiff_data: usize) -> Option<u64>;
    fn tiff_data_first_z(&self, image: usize, tiff_data: usize) -> Option<u64>;
    fn tiff_data_first_c(&self, image: usize, tiff_data: usize) -> Option<u64>;
    fn tiff_data_first_t(&self, image: usize, tiff_data: usize) -> Option<u64>;
    fn uuid_file_name(&self, image: usize, tiff_data: usize) -> Option<String>;
    fn uuid_value(&self, image: usize, tiff_data: usize) -> Option<String>;
    fn binary_only_metadata_file(&self) -> Option<String>;
    fn document_uuid(&self) -> Option<String>;

    /// Pyramid tiers of a series including the full resolution; `1` when
    /// the store carries no resolution annotation.
    fn resolution_count(&self, image: usize) -> usize {
        let _ = image;
        1
    }

    /// Size of a sub-resolution tier (`level >= 1`).
    fn resolution_size(&self, image: usize, level: usize) -> Option<(u32, u32)> {
        let _ = (image, level);
        None
    }
}

/// Write access to the metadata store; the mirror image of
/// [`MetadataRetrieve`]. Indexed setters grow the underlying collections
/// as needed.
pub trait MetadataStore {
    fn set_image_count(&mut self, count: usize);
    fn set_image_name(&mut self, image: usize, name: &str);
    fn set_pixels_size_x(&mut self, image: usize, value: u32);
    fn set_pixels_size_y(&mut self, image: usize, value: u32);
    fn set_pixels_size_z(&mut self, image: usize, value: u32);
    fn set_pixels_size_c(&mut self, image: usize, value: u32);
    fn set_pixels_size_t(&mut self, image: usize, value: u32);
    fn set_pixels_type(&mut self, image: usize, value: PixelType);
    fn set_pixels_significant_bits(&mut self, image: usize, value: u32);
    fn set_pixels_dimension_order(&mut self, image: usize, value: DimensionOrder);
    fn set_pixels_big_endian(&mut self, image: usize, value: bool);
    fn set_pixels_interleaved(&mut self, image: usize, value: bool);
    fn set_channel_count(&mut self, image: usize, count: usize);
    fn set_channel_samples_per_pixel(&mut self, image: usize, channel: usize, value: u32);
    fn set_channel_name(&mut self, image: usize, channel: usize, name: &str);
    fn clear_tiff_data(&mut self, image: usize);
    fn set_tiff_data_ifd(&mut self, image: usize, tiff_data: usize, value: u64);
    fn set_tiff_data_plane_count(&mut self, image: usize, tiff_data: usize, value: u64);
    fn set_tiff_data_first_z(&mut self, image: usize, tiff_data: usize, value: u64);
    fn set_tiff_data_first_c(&mut self, image: usize, tiff_data: usize, value: u64);
    fn set_tiff_data_first_t(&mut self, image: usize, tiff_data: usize, value: u64);
    fn set_uuid_file_name(&mut self, image: usize, tiff_data: usize, value: &str);
    fn set_uuid_value(&mut self, image: usize, tiff_data: usize, value: &str);
    fn set_document_uuid(&mut self, value: &str);
}

/// The OME-XML backed metadata store.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OmeXmlMetadata {
    ome: Ome,
}

impl OmeXmlMetadata {
    pub fn new() -> OmeXmlMetadata {
        OmeXmlMetadata::default()
    }

    /// Parse an OME-XML document.
    pub fn from_xml(text: &str) -> OmeTiffResult<OmeXmlMetadata> {
        let ome: Ome = quick_xml::de::from_str(text)?;
        Ok(OmeXmlMetadata { ome })
    }

    /// Serialise to OME-XML with the declaration and the customary
    /// warning comment.
    pub fn to_xml(&self) -> OmeTiffResult<String> {
        let mut ome = self.ome.clone();
        if ome.xmlns.is_none() {
            ome.xmlns = Some(OME_XMLNS.to_string());
        }
        let body = quick_xml::se::to_string(&ome)?;
        Ok(format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>{}{}",
            OME_WARNING_COMMENT, body
        ))
    }

    fn ensure_image(&mut self, image: usize) -> &mut Image {
        while self.ome.images.len() <= image {
            let index = self.ome.images.len();
            self.ome.images.push(Image {
                id: format!("Image:{}", index),
                name: None,
                pixels: Pixels {
                    id: format!("Pixels:{}", index),
                    dimension_order: DimensionOrder::XYZCT.as_str().to_string(),
                    pixel_type: PixelType::UInt8.interchange_name().to_string(),
                    size_x: 1,
                    size_y: 1,
                    size_z: 1,
                    size_c: 1,
                    size_t: 1,
                    ..Pixels::default()
                },
            });
        }
        &mut self.ome.images[image]
    }

    fn ensure_tiff_data(&mut self, image: usize, tiff_data: usize) -> &mut TiffData {
        let pixels = &mut self.ensure_image(image).pixels;
        while pixels.tiff_data.len() <= tiff_data {
            pixels.tiff_data.push(TiffData::default());
        }
        &mut pixels.tiff_data[tiff_data]
    }

    fn ensure_uuid(&mut self, image: usize, tiff_data: usize) -> &mut UuidRef {
        self.ensure_tiff_data(image, tiff_data)
            .uuid
            .get_or_insert_with(UuidRef::default)
    }

    fn pixels(&self, image: usize) -> OmeTiffResult<&Pixels> {
        self.ome
            .images
            .get(image)
            .map(|i| &i.pixels)
            .ok_or_else(|| MetadataError::Missing("Image").into())
    }

    /// Whether any UUID file-name entry carries the OMERO export marker.
    pub fn has_omero_export_marker(&self) -> bool {
        self.ome.images.iter().any(|image| {
            image.pixels.tiff_data.iter().any(|td| {
                td.uuid
                    .as_ref()
                    .and_then(|u| u.file_name.as_deref())
                    .is_some_and(|name| name.contains("__omero_export"))
            })
        })
    }

    /// Replace a series' dimension order in place.
    pub fn override_dimension_order(&mut self, image: usize, order: DimensionOrder) {
        self.ensure_image(image).pixels.dimension_order = order.as_str().to_string();
    }

    /// The sub-resolution tiers recorded for a series, full resolution
    /// excluded.
    pub fn resolution_tiers(&self, image: usize) -> Vec<(u32, u32)> {
        let Some(annotations) = &self.ome.structured_annotations else {
            return Vec::new();
        };
        annotations
            .xml_annotations
            .iter()
            .filter(|a| a.namespace.as_deref() == Some(RESOLUTION_NAMESPACE))
            .filter_map(|a| a.value.resolutions.as_ref())
            .find(|r| r.image == image)
            .map(|r| r.tiers.iter().map(|t| (t.size_x, t.size_y)).collect())
            .unwrap_or_default()
    }

    /// Record a series' sub-resolution tiers.
    pub fn set_resolution_tiers(&mut self, image: usize, tiers: &[(u32, u32)]) {
        self.remove_resolution_tiers(image);
        if tiers.is_empty() {
            return;
        }
        let annotations = self
            .ome
            .structured_annotations
            .get_or_insert_with(StructuredAnnotations::default);
        annotations.xml_annotations.push(XmlAnnotation {
            id: format!("Annotation:Resolution:{}", image),
            namespace: Some(RESOLUTION_NAMESPACE.to_string()),
            value: AnnotationValue {
                resolutions: Some(ResolutionList {
                    image,
                    tiers: tiers
                        .iter()
                        .map(|&(size_x, size_y)| ResolutionTier {
                            size_x,
                            size_y,
                            size_z: None,
                        })
                        .collect(),
                }),
            },
        });
    }

    fn remove_resolution_tiers(&mut self, image: usize) {
        if let Some(annotations) = &mut self.ome.structured_annotations {
            annotations.xml_annotations.retain(|a| {
                !(a.namespace.as_deref() == Some(RESOLUTION_NAMESPACE)
                    && a.value.resolutions.as_ref().is_some_and(|r| r.image == image))
            });
        }
    }

    /// Strip every resolution annotation from the document.
    pub fn strip_resolution_annotations(&mut self) {
        if let Some(annotations) = &mut self.ome.structured_annotations {
            annotations
                .xml_annotations
                .retain(|a| a.namespace.as_deref() != Some(RESOLUTION_NAMESPACE));
            if annotations.xml_annotations.is_empty() {
                self.ome.structured_annotations = None;
            }
        }
    }

    pub fn set_creator(&mut self, creator: &str) {
        self.ome.creator = Some(creator.to_string());
    }

    /// Insert 1-sample channels until the channel list accounts for
    /// `SizeC` samples, and reconcile `SizeC` when the channels already
    /// exceed it.
    pub fn sanitise(&mut self) {
        for index in 0..self.ome.images.len() {
            let pixels = &mut self.ome.images[index].pixels;
            let declared = pixels.size_c.max(1);
            let present: u32 = pixels
                .channels
                .iter()
                .map(|c| c.samples_per_pixel.unwrap_or(1))
                .sum();
            if present < declared {
                let missing = declared - present;
                tracing::warn!(
                    image = index,
                    missing,
                    "channel list does not cover SizeC, inserting single-sample channels"
                );
                for _ in 0..missing {
                    let id = format!("Channel:{}:{}", index, pixels.channels.len());
                    pixels.channels.push(Channel {
                        id: Some(id),
                        name: None,
                        samples_per_pixel: Some(1),
                    });
                }
            } else if present > declared {
                tracing::warn!(
                    image = index,
                    declared,
                    present,
                    "channel samples exceed SizeC, widening SizeC"
                );
                pixels.size_c = present;
            }
        }
    }

    /// Validate the model ahead of writing.
    pub fn validate(&self) -> OmeTiffResult<()> {
        if self.ome.images.is_empty() {
            return Err(MetadataError::Missing("Image").into());
        }
        for (index, image) in self.ome.images.iter().enumerate() {
            let pixels = &image.pixels;
            if pixels.size_x == 0
                || pixels.size_y == 0
                || pixels.size_z == 0
                || pixels.size_c == 0
                || pixels.size_t == 0
            {
                return Err(MetadataError::Invalid(format!(
                    "image {} has a zero dimension",
                    index
                ))
                .into());
            }
            PixelType::from_interchange_name(&pixels.pixel_type)?;
            DimensionOrder::from_str(&pixels.dimension_order)?;
            let samples: u32 = pixels
                .channels
                .iter()
                .map(|c| c.samples_per_pixel.unwrap_or(1))
                .sum();
            if !pixels.channels.is_empty() && samples != pixels.size_c {
                return Err(MetadataError::Invalid(format!(
                    "image {} declares SizeC {} but its channels carry {} samples",
                    index, pixels.size_c, samples
                ))
                .into());
            }
        }
        Ok(())
    }

    /// Derive the full-resolution core metadata of a series.
    pub fn core_metadata(&self, image: usize) -> OmeTiffResult<CoreMetadata> {
        let pixels = self.pixels(image)?;
        let pixel_type = PixelType::from_interchange_name(&pixels.pixel_type)?;
        let size_c = if pixels.channels.is_empty() {
            vec![pixels.size_c.max(1)]
        } else {
            pixels
                .channels
                .iter()
                .map(|c| c.samples_per_pixel.unwrap_or(1))
                .collect()
        };
        let bits = pixels
            .significant_bits
            .map(|b| b.min(u32::from(pixel_type.significant_bits())) as u16)
            .unwrap_or_else(|| pixel_type.significant_bits());
        Ok(CoreMetadata {
            size_x: pixels.size_x,
            size_y: pixels.size_y,
            size_z: pixels.size_z.max(1),
            size_t: pixels.size_t.max(1),
            size_c,
            pixel_type,
            bits_per_pixel: bits,
            dimension_order: DimensionOrder::from_str(&pixels.dimension_order)?,
            order_certain: true,
            little_endian: !pixels.big_endian.unwrap_or(false),
            interleaved: pixels.interleaved.unwrap_or(false),
            ..CoreMetadata::default()
        })
    }
}

macro_rules! pixels_getter {
    ($name:ident, $field:ident) => {
        fn $name(&self, image: usize) -> OmeTiffResult<u32> {
            Ok(self.pixels(image)?.$field)
        }
    };
}

impl MetadataRetrieve for OmeXmlMetadata {
    fn image_count(&self) -> usize {
        self.ome.images.len()
    }

    fn image_name(&self, image: usize) -> Option<String> {
        self.ome.images.get(image)?.name.clone()
    }

    pixels_getter!(pixels_size_x, size_x);
    pixels_getter!(pixels_size_y, size_y);
    pixels_getter!(pixels_size_z, size_z);
    pixels_getter!(pixels_size_c, size_c);
    pixels_getter!(pixels_size_t, size_t);

    fn pixels_type(&self, image: usize) -> OmeTiffResult<PixelType> {
        PixelType::from_interchange_name(&self.pixels(image)?.pixel_type)
    }

    fn pixels_significant_bits(&self, image: usize) -> Option<u32> {
        self.ome.images.get(image)?.pixels.significant_bits
    }

    fn pixels_dimension_order(&self, image: usize) -> OmeTiffResult<DimensionOrder> {
        DimensionOrder::from_str(&self.pixels(image)?.dimension_order)
    }

    fn pixels_big_endian(&self, image: usize) -> Option<bool> {
        self.ome.images.get(image)?.pixels.big_endian
    }

    fn pixels_interleaved(&self, image: usize) -> Option<bool> {
        self.ome.images.get(image)?.pixels.interleaved
    }

    fn channel_count(&self, image: usize) -> usize {
        self.ome
            .images
            .get(image)
            .map_or(0, |i| i.pixels.channels.len())
    }

    fn channel_samples_per_pixel(&self, image: usize, channel: usize) -> OmeTiffResult<u32> {
        self.ome
            .images
            .get(image)
            .and_then(|i| i.pixels.channels.get(channel))
            .and_then(|c| c.samples_per_pixel)
            .ok_or_else(|| MetadataError::Missing("Channel.SamplesPerPixel").into())
    }

    fn channel_name(&self, image: usize, channel: usize) -> Option<String> {
        self.ome
            .images
            .get(image)?
            .pixels
            .channels
            .get(channel)?
            .name
            .clone()
    }

    fn tiff_data_count(&self, image: usize) -> usize {
        self.ome
            .images
            .get(image)
            .map_or(0, |i| i.pixels.tiff_data.len())
    }

    fn tiff_data_ifd(&self, image: usize, tiff_data: usize) -> Option<u64> {
        self.ome.images.get(image)?.pixels.tiff_data.get(tiff_data)?.ifd
    }

    fn tiff_data_plane_count(&self, image: usize, tiff_data: usize) -> Option<u64> {
        self.ome
            .images
            .get(image)?
            .pixels
            .tiff_data
            .get(tiff_data)?
            .plane_count
    }

    fn tiff_data_first_z(&self, image: usize, tiff_data: usize) -> Option<u64> {
        self.ome.images.get(image)?.pixels.tiff_data.get(tiff_data)?.first_z
    }

    fn tiff_data_first_c(&self, image: usize, tiff_data: usize) -> Option<u64> {
        self.ome.images.get(image)?.pixels.tiff_data.get(tiff_data)?.first_c
    }

    fn tiff_data_first_t(&self, image: usize, tiff_data: usize) -> Option<u64> {
        self.ome.images.get(image)?.pixels.tiff_data.get(tiff_data)?.first_t
    }

    fn uuid_file_name(&self, image: usize, tiff_data: usize) -> Option<String> {
        self.ome
            .images
            .get(image)?
            .pixels
            .tiff_data
            .get(tiff_data)?
            .uuid
            .as_ref()?
            .file_name
            .clone()
    }

    fn uuid_value(&self, image: usize, tiff_data: usize) -> Option<String> {
        self.ome
            .images
            .get(image)?
            .pixels
            .tiff_data
            .get(tiff_data)?
            .uuid
            .as_ref()?
            .value
            .clone()
    }

    fn binary_only_metadata_file(&self) -> Option<String> {
        self.ome.binary_only.as_ref().map(|b| b.metadata_file.clone())
    }

    fn document_uuid(&self) -> Option<String> {
        self.ome.uuid.clone()
    }

    fn resolution_count(&self, image: usize) -> usize {
        1 + self.resolution_tiers(image).len()
    }

    fn resolution_size(&self, image: usize, level: usize) -> Option<(u32, u32)> {
        if level == 0 {
            let pixels = self.ome.images.get(image).map(|i| &i.pixels)?;
            return Some((pixels.size_x, pixels.size_y));
        }
        self.resolution_tiers(image).get(level - 1).copied()
    }
}

impl MetadataStore for OmeXmlMetadata {
    fn set_image_count(&mut self, count: usize) {
        if count > 0 {
            self.ensure_image(count - 1);
        }
        self.ome.images.truncate(count);
    }

    fn set_image_name(&mut self, image: usize, name: &str) {
        self.ensure_image(image).name = Some(name.to_string());
    }

    fn set_pixels_size_x(&mut self, image: usize, value: u32) {
        self.ensure_image(image).pixels.size_x = value;
    }

    fn set_pixels_size_y(&mut self, image: usize, value: u32) {
        self.ensure_image(image).pixels.size_y = value;
    }

    fn set_pixels_size_z(&mut self, image: usize, value: u32) {
        self.ensure_image(image).pixels.size_z = value;
    }

    fn set_pixels_size_c(&mut self, image: usize, value: u32) {
        self.ensure_image(image).pixels.size_c = value;
    }

    fn set_pixels_size_t(&mut self, image: usize, value: u32) {
        self.ensure_image(image).pixels.size_t = value;
    }

    fn set_pixels_type(&mut self, image: usize, value: PixelType) {
        self.ensure_image(image).pixels.pixel_type = value.interchange_name().to_string();
    }

    fn set_pixels_significant_bits(&mut self, image: usize, value: u32) {
        self.ensure_image(image).pixels.significant_bits = Some(value);
    }

    fn set_pixels_dimension_order(&mut self, image: usize, value: DimensionOrder) {
        self.ensure_image(image).pixels.dimension_order = value.as_str().to_string();
    }

    fn set_pixels_big_endian(&mut self, image: usize, value: bool) {
        self.ensure_image(image).pixels.big_endian = Some(value);
    }

    fn set_pixels_interleaved(&mut self, image: usize, value: bool) {
        self.ensure_image(image).pixels.interleaved = Some(value);
    }

    fn set_channel_count(&mut self, image: usize, count: usize) {
        let index = image;
        let pixels = &mut self.ensure_image(image).pixels;
        while pixels.channels.len() < count {
            let id = format!("Channel:{}:{}", index, pixels.channels.len());
            pixels.channels.push(Channel {
                id: Some(id),
                name: None,
                samples_per_pixel: Some(1),
            });
        }
        pixels.channels.truncate(count);
    }

    fn set_channel_samples_per_pixel(&mut self, image: usize, channel: usize, value: u32) {
        if self.channel_count(image) <= channel {
            self.set_channel_count(image, channel + 1);
        }
        self.ensure_image(image).pixels.channels[channel].samples_per_pixel = Some(value);
    }

    fn set_channel_name(&mut self, image: usize, channel: usize, name: &str) {
        if self.channel_count(image) <= channel {
            self.set_channel_count(image, channel + 1);
        }
        self.ensure_image(image).pixels.channels[channel].name = Some(name.to_string());
    }

    fn clear_tiff_data(&mut self, image: usize) {
        self.ensure_image(image).pixels.tiff_data.clear();
    }

    fn set_tiff_data_ifd(&mut self, image: usize, tiff_data: usize, value: u64) {
        self.ensure_tiff_data(image, tiff_data).ifd = Some(value);
    }

    fn set_tiff_data_plane_count(&mut self, image: usize, tiff_data: usize, value: u64) {
        self.ensure_tiff_data(image, tiff_data).plane_count = Some(value);
    }

    fn set_tiff_data_first_z(&mut self, image: usize, tiff_data: usize, value: u64) {
        self.ensure_tiff_data(image, tiff_data).first_z = Some(value);
    }

    fn set_tiff_data_first_c(&mut self, image: usize, tiff_data: usize, value: u64) {
        self.ensure_tiff_data(image, tiff_data).first_c = Some(value);
    }

    fn set_tiff_data_first_t(&mut self, image: usize, tiff_data: usize, value: u64) {
        self.ensure_tiff_data(image, tiff_data).first_t = Some(value);
    }

    fn set_uuid_file_name(&mut self, image: usize, tiff_data: usize, value: &str) {
        self.ensure_uuid(image, tiff_data).file_name = Some(value.to_string());
    }

    fn set_uuid_value(&mut self, image: usize, tiff_data: usize, value: &str) {
        self.ensure_uuid(image, tiff_data).value = Some(value.to_string());
    }

    fn set_document_uuid(&mut self, value: &str) {
        self.ome.uuid = Some(value.to_string());
    }
}

/// Snapshot a metadata retrieve into a mutable OME-XML store.
///
/// Plane maps (`TiffData`) are not copied; the writer regenerates them at
/// close. Resolution annotations are carried over.
pub fn convert_metadata(retrieve: &dyn MetadataRetrieve) -> OmeTiffResult<OmeXmlMetadata> {
    let mut store = OmeXmlMetadata::new();
    if let Some(uuid) = retrieve.document_uuid() {
        store.set_document_uuid(&uuid);
    }
    for image in 0..retrieve.image_count() {
        if let Some(name) = retrieve.image_name(image) {
            store.set_image_name(image, &name);
        }
        store.set_pixels_size_x(image, retrieve.pixels_size_x(image)?);
        store.set_pixels_size_y(image, retrieve.pixels_size_y(image)?);
        store.set_pixels_size_z(image, retrieve.pixels_size_z(image)?);
        store.set_pixels_size_c(image, retrieve.pixels_size_c(image)?);
        store.set_pixels_size_t(image, retrieve.pixels_size_t(image)?);
        store.set_pixels_type(image, retrieve.pixels_type(image)?);
        store.set_pixels_dimension_order(image, retrieve.pixels_dimension_order(image)?);
        if let Some(bits) = retrieve.pixels_significant_bits(image) {
            store.set_pixels_significant_bits(image, bits);
        }
        if let Some(big) = retrieve.pixels_big_endian(image) {
            store.set_pixels_big_endian(image, big);
        }
        if let Some(interleaved) = retrieve.pixels_interleaved(image) {
            store.set_pixels_interleaved(image, interleaved);
        }
        let channels = retrieve.channel_count(image);
        store.set_channel_count(image, channels);
        for channel in 0..channels {
            if let Ok(samples) = retrieve.channel_samples_per_pixel(image, channel) {
                store.set_channel_samples_per_pixel(image, channel, samples);
            }
            if let Some(name) = retrieve.channel_name(image, channel) {
                store.set_channel_name(image, channel, &name);
            }
        }
        let tiers: Vec<(u32, u32)> = (1..retrieve.resolution_count(image))
            .filter_map(|level| retrieve.resolution_size(image, level))
            .collect();
        if !tiers.is_empty() {
            store.set_resolution_tiers(image, &tiers);
        }
    }
    store.sanitise();
    Ok(store)
}

/// Parse the ImageDescription text of an OME-TIFF, mapping XML errors to
/// the format error the reader reports.
pub fn parse_description(text: &str) -> OmeTiffResult<OmeXmlMetadata> {
    if !text.trim_start().starts_with('<') {
        return Err(
            FormatError::MalformedOmeXml("description does not start with '<'".to_string()).into(),
        );
    }
    OmeXmlMetadata::from_xml(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_channel_store() -> OmeXmlMetadata {
        let mut store = OmeXmlMetadata::new();
        store.set_pixels_size_x(0, 64);
        store.set_pixels_size_y(0, 48);
        store.set_pixels_size_z(0, 2);
        store.set_pixels_size_c(0, 2);
        store.set_pixels_size_t(0, 3);
        store.set_pixels_type(0, PixelType::UInt16);
        store.set_pixels_dimension_order(0, DimensionOrder::XYZCT);
        store
    }

    #[test]
    fn sanitise_inserts_missing_channels() {
        let mut store = two_channel_store();
        assert_eq!(store.channel_count(0), 0);
        store.sanitise();
        assert_eq!(store.channel_count(0), 2);
        assert_eq!(store.channel_samples_per_pixel(0, 0).unwrap(), 1);
        store.validate().unwrap();
    }

    #[test]
    fn sanitise_widens_undersized_size_c() {
        let mut store = two_channel_store();
        store.set_channel_count(0, 1);
        store.set_channel_samples_per_pixel(0, 0, 3);
        store.sanitise();
        assert_eq!(store.pixels_size_c(0).unwrap(), 3);
        store.validate().unwrap();
    }

    #[test]
    fn core_metadata_reflects_channels() {
        let mut store = two_channel_store();
        store.sanitise();
        let core = store.core_metadata(0).unwrap();
        assert_eq!(core.effective_size_c(), 2);
        assert_eq!(core.total_samples(), 2);
        assert_eq!(core.image_count(), 2 * 3 * 2);
        assert_eq!(core.pixel_type, PixelType::UInt16);
        assert!(core.little_endian);
    }

    #[test]
    fn validate_rejects_zero_dimensions() {
        let mut store = two_channel_store();
        store.set_pixels_size_x(0, 0);
        assert!(store.validate().is_err());
    }

    #[test]
    fn snapshot_copies_shape_not_plane_map() {
        let mut source = two_channel_store();
        source.sanitise();
        source.set_tiff_data_ifd(0, 0, 3);
        source.set_resolution_tiers(0, &[(32, 24)]);
        let copy = convert_metadata(&source).unwrap();
        assert_eq!(copy.pixels_size_x(0).unwrap(), 64);
        assert_eq!(copy.tiff_data_count(0), 0);
        assert_eq!(copy.resolution_count(0), 2);
        assert_eq!(copy.resolution_size(0, 1), Some((32, 24)));
    }

    #[test]
    fn xml_round_trip_keeps_uuid() {
        let mut store = two_channel_store();
        store.sanitise();
        store.set_document_uuid("urn:uuid:123");
        let text = store.to_xml().unwrap();
        assert!(text.starts_with("<?xml"));
        let again = OmeXmlMetadata::from_xml(&text).unwrap();
        assert_eq!(again.document_uuid().as_deref(), Some("urn:uuid:123"));
    }
}
