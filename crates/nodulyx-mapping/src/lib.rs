//! nodulyx-mapping — Declarative projection of classified documents into the
//! canonical representation.
//!
//! One reusable field-mapping specification per structural case replaces one
//! parser per format variant. Paths are parsed once at profile load, values
//! are coerced and transformed per mapping, and repeated nodule/ROI/session
//! groups are extracted into canonical entities.

pub mod canonical;
pub mod coerce;
pub mod engine;
pub mod flatten;
pub mod path;
pub mod profile;
pub mod store;
pub mod transform;

pub use canonical::{
    CanonicalDocument, DocumentMetadata, NoduleEntity, RoiEntity, SessionEntity,
};
pub use coerce::DataType;
pub use engine::{ProfileMappingEngine, ResolveContext};
pub use flatten::{flatten, FlatRecord};
pub use path::{PathSegment, SourcePath};
pub use profile::{EntityExtractionSpec, FieldMapping, MappingProfile, ProfileSpec};
pub use store::{ProfileStore, StaticProfileStore};
