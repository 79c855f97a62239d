//! Concurrent package loading.
//!
//! Given a main module, its selected requirements, and a set of root import
//! paths, the loader walks the import graph with a bounded worker pool and
//! produces a [`Packages`] object holding every reachable package, its
//! load-time flags, and any errors. Errors attach to packages rather than
//! aborting the load; callers walk the graph and decide what is fatal.

pub mod error;
pub mod fs;
pub mod load;
pub mod pkg;
pub mod queue;
pub mod tags;

pub use error::LoadError;
pub use fs::{DirEntry, OsFs, SourceFs};
pub use load::{load, resolve_import, FixedLocator, LoadConfig, MainModule, ModuleLocator,
    Resolution};
pub use pkg::{Flags, Package, Packages};
pub use queue::CancelToken;
pub use tags::TagFilter;
