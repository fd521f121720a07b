mod types;

pub use types::{BackoffConfig, DeletionConfig, GtoConfig};
