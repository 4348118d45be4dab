//! Staged-row review engine: staging, selection, viewport windows and commit.

pub mod commit;
pub mod error;
pub mod mapping;
pub mod model;
pub mod pipeline;
pub mod selection;
pub mod session;
pub mod viewport;
