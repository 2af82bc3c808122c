#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Bounded fan-out scheduling and an incremental, cursor-paginated build catalog.

pub mod catalog;
pub mod error;
pub mod filter;
pub mod model;
pub mod pool;

pub use catalog::{LinkLookup, RecordSource, RemoteCatalog, ResolvedLink};
pub use error::{CatalogError, PoolError};
pub use filter::{BuildFilter, RecordFilter};
pub use model::{Build, BuildStatus, CatalogRecord, Cursor, ImageDescriptor, LinkSlot, Page, Platform};
pub use pool::{TaskFuture, TaskPool};
