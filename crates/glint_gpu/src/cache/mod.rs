//! Cross-frame GPU object caches

pub mod programs;
pub mod resources;

pub use programs::{ProgramCache, MAX_PROGRAM_COUNT};
pub use resources::{ResourceCache, ResourceCacheOptions, ResourceId, ResourceRef};
