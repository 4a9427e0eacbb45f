//! Versioned, immutable description of a graph's vertex and edge labels. Shared by the
//! diff engine, the migration planner and the batch loader.

mod model;
mod version;

pub use model::{
    Constraints, EdgeLabel, LabelKind, LabelRef, PropertyDefinition, RESERVED_PROPERTY_NAMES,
    SchemaDefinition, VertexLabel,
};
pub use version::SchemaVersion;
