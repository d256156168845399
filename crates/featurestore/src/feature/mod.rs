//! Feature contract, registry and workflow status

mod definition;
mod registry;
mod status;

pub use definition::{
    output_schema, Feature, FeatureDefinition, FeatureDescriptor, FeatureError, FitContext,
    KeyGroup,
};
pub use registry::{FeatureRegistry, RegistryError};
pub use status::WorkflowStatus;
