//! WebAPI - HTTP surfaces of the three roles
//!
//! ## Responsibilities
//!
//! - Search backend: multimodal and image search, target features
//! - File backend: health probes, frame info, thumbnails, video ranges
//! - Core: probe-and-redirect dispatch to the backends
//! - Query parameter parsing and response formatting

mod core_routes;
mod file_routes;
mod params;
mod search_routes;

pub use core_routes::core_router;
pub use file_routes::file_router;
pub use search_routes::search_router;
