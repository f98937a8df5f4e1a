pub mod model;

pub use model::{BackendKind, MountOptions, MountRequest};
