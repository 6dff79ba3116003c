pub mod client;
pub mod models;

pub use client::{extension_from_url, stream_id_from_url, ApiClient, ApiError};
pub use models::CatalogConfig;
