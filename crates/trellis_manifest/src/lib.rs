//! The module manifest: every module and file a build covers.
//!
//! [`ManifestBuilder`] discovers the modules reachable from the target
//! module, scans their role folders, fingerprints each file, and diffs the
//! result against the previous manifest to produce a [`ManifestDelta`]. The
//! [`store`] module persists manifests as JSON for the runtime layers.

#![warn(missing_docs)]

pub mod builder;
pub mod delta;
pub mod error;
pub mod graph;
pub mod model;
pub mod scan;
pub mod store;

pub use builder::{ManifestBuilder, ManifestScan};
pub use delta::{Invalidation, InvalidationHint, ManifestDelta, ModuleDelta};
pub use error::ManifestError;
pub use graph::{DiscoveredModule, ModuleGraph};
pub use model::{
    output_path_for, FileRole, FileType, ManifestFile, ManifestModule, ModuleManifest,
};
pub use scan::{scan_module, ScannedFile};
pub use store::{load_manifest, load_previous, persist, strip_for_prod, write_manifest};
