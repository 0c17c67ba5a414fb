//! Serde model of the OME-XML subset the codec owns.
//!
//! Only the elements the TIFF assembly layer reads and writes are
//! modelled: `Image`/`Pixels`/`Channel` shapes, the `TiffData` plane map
//! with its `UUID` cross-references, `BinaryOnly` redirects, and the
//! structured annotation carrying per-series resolution tiers. Everything
//! else in a document is dropped on parse; the full object model belongs
//! to a dedicated metadata library.

use serde::{Deserialize, Serialize};

/// The OME 2016-06 schema namespace.
pub const OME_XMLNS: &str = "http://www.openmicroscopy.org/Schemas/OME/2016-06";

/// Namespace of the resolution annotation.
pub const RESOLUTION_NAMESPACE: &str = "ometiff.rs/resolutions";

/// The comment OME-TIFF embeds ahead of the root element.
pub const OME_WARNING_COMMENT: &str = "<!-- Warning: this comment is an OME-XML metadata block, \
which contains crucial dimensional parameters and other important metadata. Please edit \
cautiously (if at all), and back up the original data before doing so. For more information, \
see the OME-TIFF documentation. -->";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename = "OME")]
pub struct Ome {
    #[serde(rename = "@xmlns", skip_serializing_if = "Option::is_none")]
    pub xmlns: Option<String>,
    #[serde(rename = "@UUID", skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(rename = "@Creator", skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    #[serde(rename = "BinaryOnly", skip_serializing_if = "Option::is_none")]
    pub binary_only: Option<BinaryOnly>,
    #[serde(rename = "Image", default)]
    pub images: Vec<Image>,
    #[serde(
        rename = "StructuredAnnotations",
        skip_serializing_if = "Option::is_none"
    )]
    pub structured_annotations: Option<StructuredAnnotations>,
}

/// Redirect to a companion metadata document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BinaryOnly {
    #[serde(rename = "@MetadataFile")]
    pub metadata_file: String,
    #[serde(rename = "@UUID", skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Image {
    #[serde(rename = "@ID")]
    pub id: String,
    #[serde(rename = "@Name", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "Pixels")]
    pub pixels: Pixels,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Pixels {
    #[serde(rename = "@ID")]
    pub id: String,
    #[serde(rename = "@DimensionOrder")]
    pub dimension_order: String,
    #[serde(rename = "@Type")]
    pub pixel_type: String,
    #[serde(rename = "@SizeX")]
    pub size_x: u32,
    #[serde(rename = "@SizeY")]
    pub size_y: u32,
    #[serde(rename = "@SizeZ")]
    pub size_z: u32,
    #[serde(rename = "@SizeC")]
    pub size_c: u32,
    #[serde(rename = "@SizeT")]
    pub size_t: u32,
    #[serde(rename = "@BigEndian", skip_serializing_if = "Option::is_none")]
    pub big_endian: Option<bool>,
    #[serde(rename = "@Interleaved", skip_serializing_if = "Option::is_none")]
    pub interleaved: Option<bool>,
    #[serde(rename = "@SignificantBits", skip_serializing_if = "Option::is_none")]
    pub significant_bits: Option<u32>,
    #[serde(rename = "Channel", default, skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<Channel>,
    #[serde(rename = "TiffData", default, skip_serializing_if = "Vec::is_empty")]
    pub tiff_data: Vec<TiffData>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Channel {
    #[serde(rename = "@ID", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "@Name", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "@SamplesPerPixel", skip_serializing_if = "Option::is_none")]
    pub samples_per_pixel: Option<u32>,
}

/// One run of planes mapped onto consecutive IFDs of one file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TiffData {
    #[serde(rename = "@IFD", skip_serializing_if = "Option::is_none")]
    pub ifd: Option<u64>,
    #[serde(rename = "@PlaneCount", skip_serializing_if = "Option::is_none")]
    pub plane_count: Option<u64>,
    #[serde(rename = "@FirstZ", skip_serializing_if = "Option::is_none")]
    pub first_z: Option<u64>,
    #[serde(rename = "@FirstC", skip_serializing_if = "Option::is_none")]
    pub first_c: Option<u64>,
    #[serde(rename = "@FirstT", skip_serializing_if = "Option::is_none")]
    pub first_t: Option<u64>,
    #[serde(rename = "UUID", skip_serializing_if = "Option::is_none")]
    pub uuid: Option<UuidRef>,
}

/// The `UUID` child of `TiffData`: the owning file's identity, optionally
/// with its file name for multi-file datasets.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UuidRef {
    #[serde(rename = "@FileName", skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(rename = "$text", default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StructuredAnnotations {
    #[serde(rename = "XMLAnnotation", default)]
    pub xml_annotations: Vec<XmlAnnotation>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct XmlAnnotation {
    #[serde(rename = "@ID")]
    pub id: String,
    #[serde(rename = "@Namespace", skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(rename = "Value")]
    pub value: AnnotationValue,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AnnotationValue {
    #[serde(rename = "Resolutions", skip_serializing_if = "Option::is_none")]
    pub resolutions: Option<ResolutionList>,
}

/// Per-series pyramid tiers, full resolution excluded.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResolutionList {
    #[serde(rename = "@Image")]
    pub image: usize,
    #[serde(rename = "Resolution", default)]
    pub tiers: Vec<ResolutionTier>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResolutionTier {
    #[serde(rename = "@SizeX")]
    pub size_x: u32,
    #[serde(rename = "@SizeY")]
    pub size_y: u32,
    #[serde(rename = "@SizeZ", skip_serializing_if = "Option::is_none")]
    pub size_z: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SINGLE_CHANNEL: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<OME xmlns="http://www.openmicroscopy.org/Schemas/OME/2016-06" UUID="urn:uuid:2bc2aa39-30d2-44ee-8399-c513492dd5de">
  <Image ID="Image:0" Name="single-channel.ome.tif">
    <Pixels BigEndian="true" DimensionOrder="XYZCT" ID="Pixels:0" SizeC="1" SizeT="1" SizeX="439" SizeY="167" SizeZ="1" Type="int8">
      <Channel ID="Channel:0:0" SamplesPerPixel="1"/>
      <TiffData FirstC="0" FirstT="0" FirstZ="0" IFD="0" PlaneCount="1">
        <UUID FileName="single-channel.ome.tif">urn:uuid:2bc2aa39-30d2-44ee-8399-c513492dd5de</UUID>
      </TiffData>
    </Pixels>
  </Image>
</OME>"#;

    #[test]
    fn parses_reference_document() {
        let ome: Ome = quick_xml::de::from_str(SINGLE_CHANNEL).unwrap();
        assert_eq!(ome.images.len(), 1);
        let pixels = &ome.images[0].pixels;
        assert_eq!(pixels.size_x, 439);
        assert_eq!(pixels.pixel_type, "int8");
        assert_eq!(pixels.big_endian, Some(true));
        assert_eq!(pixels.channels.len(), 1);
        let td = &pixels.tiff_data[0];
        assert_eq!(td.ifd, Some(0));
        assert_eq!(td.plane_count, Some(1));
        let uuid = td.uuid.as_ref().unwrap();
        assert_eq!(uuid.file_name.as_deref(), Some("single-channel.ome.tif"));
        assert_eq!(
            uuid.value.as_deref(),
            Some("urn:uuid:2bc2aa39-30d2-44ee-8399-c513492dd5de")
        );
    }

    #[test]
    fn serialises_and_reparses() {
        let mut ome: Ome = quick_xml::de::from_str(SINGLE_CHANNEL).unwrap();
        ome.creator = Some("ometiff test".to_string());
        let text = quick_xml::se::to_string(&ome).unwrap();
        let again: Ome = quick_xml::de::from_str(&text).unwrap();
        assert_eq!(ome, again);
    }

    #[test]
    fn binary_only_redirect_parses() {
        let doc = r#"<OME xmlns="http://www.openmicroscopy.org/Schemas/OME/2016-06">
            <BinaryOnly MetadataFile="set.companion.ome" UUID="urn:uuid:0"/>
        </OME>"#;
        let ome: Ome = quick_xml::de::from_str(doc).unwrap();
        assert_eq!(
            ome.binary_only.unwrap().metadata_file,
            "set.companion.ome"
        );
        assert!(ome.images.is_empty());
    }

    #[test]
    fn resolution_annotation_round_trips() {
        let ome = Ome {
            structured_annotations: Some(StructuredAnnotations {
                xml_annotations: vec![XmlAnnotation {
                    id: "Annotation:Resolutions:0".to_string(),
                    namespace: Some(RESOLUTION_NAMESPACE.to_string()),
                    value: AnnotationValue {
                        resolutions: Some(ResolutionList {
                            image: 0,
                            tiers: vec![
                                ResolutionTier {
                                    size_x: 512,
                                    size_y: 512,
                                    size_z: None,
                                },
                                ResolutionTier {
                                    size_x: 256,
                                    size_y: 256,
                                    size_z: None,
                                },
                            ],
                        }),
                    },
                }],
            }),
            ..Ome::default()
        };
        let text = quick_xml::se::to_string(&ome).unwrap();
        let again: Ome = quick_xml::de::from_str(&text).unwrap();
        let list = &again.structured_annotations.unwrap().xml_annotations[0];
        let tiers = &list.value.resolutions.as_ref().unwrap().tiers;
        assert_eq!(tiers.len(), 2);
        assert_eq!(tiers[1].size_x, 256);
    }
}
