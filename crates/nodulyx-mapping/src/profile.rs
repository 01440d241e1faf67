//! Declarative mapping profiles.
//!
//! A profile is the reusable specification that projects one structural case
//! (or several) into the canonical schema: an ordered list of field mappings
//! plus an entity-extraction spec for the repeated session/nodule/ROI
//! groups. Profiles are authored in TOML or JSON; the string form is
//! compiled once, parsing every source path into its AST, before any
//! document is resolved against it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use nodulyx_common::{NodulyxError, Result};

use crate::coerce::DataType;
use crate::path::SourcePath;

/// One compiled field mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub source_path: SourcePath,
    pub target_path: String,
    pub data_type: DataType,
    #[serde(default)]
    pub default_value: Option<String>,
    /// Read this attribute of the resolved element instead of its text.
    #[serde(default)]
    pub source_attribute: Option<String>,
    #[serde(default)]
    pub transformations: Vec<String>,
}

/// Repeated-group extraction vocabulary.
///
/// Element names default to the annotation schema shared by both collection
/// eras; a case-specific profile overrides only what differs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityExtractionSpec {
    #[serde(default = "default_session_elements")]
    pub session_elements: Vec<String>,
    #[serde(default = "default_read_elements")]
    pub read_elements: Vec<String>,
    #[serde(default = "default_nodule_id_element")]
    pub nodule_id_element: String,
    #[serde(default = "default_characteristic_container")]
    pub characteristic_container: String,
    /// Characteristic field name to declared type. Fields not listed here
    /// are not extracted.
    #[serde(default = "default_characteristic_types")]
    pub characteristic_types: BTreeMap<String, DataType>,
    #[serde(default = "default_roi_element")]
    pub roi_element: String,
    #[serde(default = "default_edge_element")]
    pub edge_element: String,
    #[serde(default = "default_coord_x")]
    pub coord_x: String,
    #[serde(default = "default_coord_y")]
    pub coord_y: String,
    #[serde(default = "default_image_sop_element")]
    pub image_sop_element: String,
    #[serde(default = "default_z_position_element")]
    pub z_position_element: String,
    #[serde(default = "default_inclusion_element")]
    pub inclusion_element: String,
    #[serde(default = "default_annotation_version_element")]
    pub annotation_version_element: String,
}

fn default_session_elements() -> Vec<String> {
    vec!["readingSession".to_string(), "CXRreadingSession".to_string()]
}
fn default_read_elements() -> Vec<String> {
    vec!["unblindedReadNodule".to_string(), "unblindedRead".to_string()]
}
fn default_nodule_id_element() -> String { "noduleID".to_string() }
fn default_characteristic_container() -> String { "characteristics".to_string() }
fn default_roi_element() -> String { "roi".to_string() }
fn default_edge_element() -> String { "edgeMap".to_string() }
fn default_coord_x() -> String { "xCoord".to_string() }
fn default_coord_y() -> String { "yCoord".to_string() }
fn default_image_sop_element() -> String { "imageSOP_UID".to_string() }
fn default_z_position_element() -> String { "imageZposition".to_string() }
fn default_inclusion_element() -> String { "inclusion".to_string() }
fn default_annotation_version_element() -> String { "annotationVersion".to_string() }

fn default_characteristic_types() -> BTreeMap<String, DataType> {
    let mut types = BTreeMap::new();
    for f in [
        "subtlety",
        "internalStructure",
        "calcification",
        "sphericity",
        "margin",
        "lobulation",
        "spiculation",
        "texture",
        "malignancy",
        "confidence",
        "obscuration",
    ] {
        types.insert(f.to_string(), DataType::Integer);
    }
    types.insert("reason".to_string(), DataType::Text);
    types
}

impl Default for EntityExtractionSpec {
    fn default() -> Self {
        Self {
            session_elements: default_session_elements(),
            read_elements: default_read_elements(),
            nodule_id_element: default_nodule_id_element(),
            characteristic_container: default_characteristic_container(),
            characteristic_types: default_characteristic_types(),
            roi_element: default_roi_element(),
            edge_element: default_edge_element(),
            coord_x: default_coord_x(),
            coord_y: default_coord_y(),
            image_sop_element: default_image_sop_element(),
            z_position_element: default_z_position_element(),
            inclusion_element: default_inclusion_element(),
            annotation_version_element: default_annotation_version_element(),
        }
    }
}

/// Authoring form of a field mapping: source path still a plain string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMappingSpec {
    pub source_path: String,
    pub target_path: String,
    pub data_type: DataType,
    #[serde(default)]
    pub default_value: Option<String>,
    #[serde(default)]
    pub source_attribute: Option<String>,
    #[serde(default)]
    pub transformations: Vec<String>,
}

/// Authoring form of a profile, as read from a TOML or JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileSpec {
    pub id: String,
    #[serde(default)]
    pub case_names: Vec<String>,
    #[serde(default)]
    pub field_mappings: Vec<FieldMappingSpec>,
    #[serde(default)]
    pub entity_spec: Option<EntityExtractionSpec>,
}

impl ProfileSpec {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| NodulyxError::Profile(format!("bad TOML profile: {e}")))
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| NodulyxError::Profile(format!("bad JSON profile: {e}")))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            NodulyxError::Profile(format!("cannot read profile {}: {e}", path.display()))
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&raw),
            _ => Self::from_toml_str(&raw),
        }
    }
}

/// A compiled, reusable mapping profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingProfile {
    pub id: String,
    /// Structural cases this profile serves; one profile may cover several.
    pub case_names: Vec<String>,
    pub field_mappings: Vec<FieldMapping>,
    pub entity_spec: EntityExtractionSpec,
}

impl MappingProfile {
    /// Compile the authoring form, parsing every source path once.
    pub fn compile(spec: ProfileSpec) -> Result<Self> {
        let mut field_mappings = Vec::with_capacity(spec.field_mappings.len());
        for m in spec.field_mappings {
            field_mappings.push(FieldMapping {
                source_path: SourcePath::parse(&m.source_path)?,
                target_path: m.target_path,
                data_type: m.data_type,
                default_value: m.default_value,
                source_attribute: m.source_attribute,
                transformations: m.transformations,
            });
        }
        Ok(Self {
            id: spec.id,
            case_names: spec.case_names,
            field_mappings,
            entity_spec: spec.entity_spec.unwrap_or_default(),
        })
    }

    /// The comprehensive fallback profile: every header field the canonical
    /// schema knows, plus the default entity vocabulary. Always available,
    /// so a case without a registered profile still maps.
    pub fn generic() -> Self {
        let header = |src: &str, target: &str, dtype: DataType| FieldMapping {
            source_path: SourcePath::parse(src).expect("static path"),
            target_path: target.to_string(),
            data_type: dtype,
            default_value: None,
            source_attribute: None,
            transformations: vec!["trim".to_string()],
        };
        Self {
            id: "generic".to_string(),
            case_names: Vec::new(),
            field_mappings: vec![
                header("ResponseHeader/StudyInstanceUID", "header.study_instance_uid", DataType::Text),
                header("ResponseHeader/SeriesInstanceUID", "header.series_instance_uid", DataType::Text),
                header("ResponseHeader/Modality", "header.modality", DataType::Text),
                header("ResponseHeader/Version", "header.version", DataType::Text),
                header("ResponseHeader/TaskDescription", "header.task_description", DataType::Text),
                header("ResponseHeader/DateService", "header.date_service", DataType::Date),
            ],
            entity_spec: EntityExtractionSpec::default(),
        }
    }
}
