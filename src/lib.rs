//! framesearch Library
//!
//! Multimodal retrieval over keyframes extracted from a video corpus.
//!
//! ## Architecture (3 services, 8 components)
//!
//! 1. QueryParser - Query string to multi-step intent
//! 2. ResultCache - Content-addressed memoization of search results
//! 3. VectorStore - Hybrid ANN capability (in-memory implementation bundled)
//! 4. Embedding - Text/image embedders per feature modality
//! 5. SearchEngine - Similarity, temporal and listing search
//! 6. RequestPool - Bounded fan-out with first-success racing
//! 7. ProxyRouter - Health-probe failover and capability sync
//! 8. FileStore - Thumbnails, video byte ranges, fps
//!
//! The `search` and `file` roles serve data; the `core` role redirects
//! clients to a healthy backend of either kind.

pub mod embedding;
pub mod error;
pub mod file_store;
pub mod models;
pub mod proxy_router;
pub mod query_parser;
pub mod request_pool;
pub mod result_cache;
pub mod search_engine;
pub mod state;
pub mod vector_store;
pub mod web_api;

pub use error::{Error, Result};
