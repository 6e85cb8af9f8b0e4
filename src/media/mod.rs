//! Media request model and artifact resolution.

mod formats;
mod request;
mod resolver;

pub use crate::catalog::ArtifactDescriptor;
pub use formats::{IiifFormats, CONVERT_ACTION, CONVERT_PARAMS};
pub use request::{MediaRequest, IIIF_ACTION, MASTER_ACTION};
pub use resolver::{ArtifactResolver, Resolution};
