//! Job descriptor construction and its canonical XML form.
//!
//! A descriptor is built once per request, rendered once, and never changed
//! afterwards. Optional fields are plain `None` in memory; the `N/A` sentinel
//! only exists on the wire:
//!
//! ```text
//! <YOLO_CIANNA>
//!   <USER_ID>2443424</USER_ID>
//!   <Timestamp>2025-01-25T10:00:00.123456Z</Timestamp>
//!   <Coordinates><RA>12.5</RA><DEC>-30.25</DEC><H>128</H><W>96</W></Coordinates>
//!   <Image><Path>images/RACS-DR1_0000+12A.fits</Path></Image>
//!   <YOLO_Model><Name>net0_s1800.dat</Name></YOLO_Model>
//!   <Quantization>FP32C_FP32A</Quantization>
//! </YOLO_CIANNA>
//! ```

use std::fmt::Display;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{JobError, JobResult};

/// Wire rendering of an absent field.
pub const NOT_AVAILABLE: &str = "N/A";

/// Sky region and crop size of a request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Region {
    /// Right ascension in degrees
    pub ra: f64,
    /// Declination in degrees
    pub dec: f64,
    pub height: u32,
    pub width: u32,
}

impl Region {
    pub fn new(ra: f64, dec: f64, height: u32, width: u32) -> Self {
        Self { ra, dec, height, width }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobDescriptor {
    user_id: Option<String>,
    submitted_at: DateTime<Utc>,
    region: Region,
    image_path: Option<String>,
    model_name: Option<String>,
    quantization: Option<String>,
}

impl JobDescriptor {
    pub fn builder(region: Region) -> JobDescriptorBuilder {
        JobDescriptorBuilder {
            user_id: None,
            submitted_at: None,
            region,
            image_path: None,
            model_name: None,
            quantization: None,
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }

    pub fn region(&self) -> Region {
        self.region
    }

    pub fn image_path(&self) -> Option<&Path> {
        self.image_path.as_deref().map(Path::new)
    }

    pub fn model_name(&self) -> Option<&str> {
        self.model_name.as_deref()
    }

    pub fn quantization(&self) -> Option<&str> {
        self.quantization.as_deref()
    }

    /// Render the canonical XML document sent as the `xml` upload part.
    pub fn to_xml(&self) -> JobResult<String> {
        let doc = DescriptorXml {
            user_id: render(&self.user_id),
            timestamp: self
                .submitted_at
                .to_rfc3339_opts(SecondsFormat::AutoSi, true),
            coordinates: CoordinatesXml {
                ra: self.region.ra.to_string(),
                dec: self.region.dec.to_string(),
                height: self.region.height.to_string(),
                width: self.region.width.to_string(),
            },
            image: ImageXml {
                path: render(&self.image_path),
            },
            model: ModelXml {
                name: render(&self.model_name),
            },
            quantization: render(&self.quantization),
        };

        quick_xml::se::to_string(&doc)
            .map_err(|e| JobError::MalformedDescriptor(format!("failed to render XML: {}", e)))
    }

    /// Parse a descriptor previously produced by [`JobDescriptor::to_xml`].
    pub fn from_xml(xml: &str) -> JobResult<Self> {
        let doc: DescriptorXml = quick_xml::de::from_str(xml)
            .map_err(|e| JobError::MalformedDescriptor(format!("failed to parse XML: {}", e)))?;

        let submitted_at = DateTime::parse_from_rfc3339(doc.timestamp.trim())
            .map_err(|e| {
                JobError::MalformedDescriptor(format!("bad Timestamp {:?}: {}", doc.timestamp, e))
            })?
            .with_timezone(&Utc);

        let region = Region {
            ra: parse_field("RA", &doc.coordinates.ra)?,
            dec: parse_field("DEC", &doc.coordinates.dec)?,
            height: parse_field("H", &doc.coordinates.height)?,
            width: parse_field("W", &doc.coordinates.width)?,
        };

        Ok(Self {
            user_id: present(&doc.user_id),
            submitted_at,
            region,
            image_path: present(&doc.image.path),
            model_name: present(&doc.model.name),
            quantization: present(&doc.quantization),
        })
    }
}

/// Consuming builder; the descriptor has no setters once built.
#[derive(Debug, Clone)]
pub struct JobDescriptorBuilder {
    user_id: Option<String>,
    submitted_at: Option<DateTime<Utc>>,
    region: Region,
    image_path: Option<String>,
    model_name: Option<String>,
    quantization: Option<String>,
}

impl JobDescriptorBuilder {
    pub fn user_id(mut self, user_id: impl Display) -> Self {
        self.user_id = present(&user_id.to_string());
        self
    }

    pub fn image_path(mut self, path: impl AsRef<Path>) -> Self {
        self.image_path = present(&path.as_ref().to_string_lossy());
        self
    }

    pub fn model_name(mut self, name: impl Display) -> Self {
        self.model_name = present(&name.to_string());
        self
    }

    /// Quantization tag, e.g. `FP32C_FP32A`.
    pub fn quantization(mut self, tag: impl Display) -> Self {
        self.quantization = present(&tag.to_string());
        self
    }

    /// Pin the submission timestamp instead of taking the current time.
    pub fn submitted_at(mut self, at: DateTime<Utc>) -> Self {
        self.submitted_at = Some(at);
        self
    }

    pub fn build(self) -> JobDescriptor {
        JobDescriptor {
            user_id: self.user_id,
            submitted_at: self.submitted_at.unwrap_or_else(Utc::now),
            region: self.region,
            image_path: self.image_path,
            model_name: self.model_name,
            quantization: self.quantization,
        }
    }
}

// Empty strings and the sentinel both mean "absent"
fn present(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() || value == NOT_AVAILABLE {
        None
    } else {
        Some(value.to_string())
    }
}

fn render(value: &Option<String>) -> String {
    value.clone().unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

fn parse_field<T>(name: &str, raw: &str) -> JobResult<T>
where
    T: std::str::FromStr,
    T::Err: Display,
{
    raw.trim()
        .parse()
        .map_err(|e| JobError::MalformedDescriptor(format!("bad {} value {:?}: {}", name, raw, e)))
}

// Wire layout. Every leaf is text, numbers included.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename = "YOLO_CIANNA")]
struct DescriptorXml {
    #[serde(rename = "USER_ID")]
    user_id: String,
    #[serde(rename = "Timestamp")]
    timestamp: String,
    #[serde(rename = "Coordinates")]
    coordinates: CoordinatesXml,
    #[serde(rename = "Image")]
    image: ImageXml,
    #[serde(rename = "YOLO_Model")]
    model: ModelXml,
    #[serde(rename = "Quantization")]
    quantization: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct CoordinatesXml {
    #[serde(rename = "RA")]
    ra: String,
    #[serde(rename = "DEC")]
    dec: String,
    #[serde(rename = "H")]
    height: String,
    #[serde(rename = "W")]
    width: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ImageXml {
    #[serde(rename = "Path")]
    path: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ModelXml {
    #[serde(rename = "Name")]
    name: String,
}
