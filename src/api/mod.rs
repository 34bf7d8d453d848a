//! Purpose: Define the public Rust API boundary for lnkstream.
//! Exports: Cache, talker, catalog and request-shaping types plus core channel types.
//! Role: Public, additive-only surface used by the CLI, the server and tests.
//! Invariants: Callers reach buffered channels only through this module's re-exports.

pub mod cache;
pub mod catalog;
pub mod headers;
pub mod params;
pub mod talker;

pub use crate::config::{CacheConfig, TalkerConfig};
pub use crate::core::active::ActiveTransfer;
pub use crate::core::buffered::{BufferedRw, DEFAULT_CHUNK_SIZE, OverrunPolicy, copy_chunked};
#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::mime::{find_mime_type_by_ext, mime_type_for};
pub use cache::{ResourceCache, normalize_name};
pub use catalog::{AssetCatalog, StaticCatalog};
pub use headers::{Headers, canonical_header_key};
pub use params::Parameters;
pub use talker::Talker;
