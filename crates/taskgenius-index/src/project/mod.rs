//! Project resolution and the project data manager

mod manager;
mod resolver;

pub use manager::{EnhancedMetadata, ProjectDataManager};
pub use resolver::{MetadataMap, ProjectConfigResolver, VaultProjectResolver};
