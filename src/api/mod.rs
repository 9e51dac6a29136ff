//! Management API: record types, REST client and cached resource handles.

pub mod cache;
pub mod client;
pub mod error;
#[cfg(test)]
mod mock;
pub mod resources;
pub mod types;

pub use client::ApiClient;
pub use error::{ApiError, ApiErrorKind};
pub use resources::{EntityApi, MutationStatus, Resource, ResourceHandle, ResourcePolicy};
