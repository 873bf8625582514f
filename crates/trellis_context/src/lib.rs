//! Workspace discovery and the resolved build context.
//!
//! [`PathResolver`] walks the filesystem to find the workspace root for a
//! starting directory. [`resolve_context`] turns that workspace plus the
//! build settings and environment into a [`ManifestContext`]: the
//! workspace identity, the on-disk layout, the compiler server URL, and the
//! module being built.

#![warn(missing_docs)]

pub mod context;
pub mod endpoint;
pub mod resolver;

pub use context::{
    load_context, resolve_context, BuildLayout, MainModule, ManifestContext, WorkspaceInfo,
};
pub use endpoint::{compiler_port, compiler_url, port_from_url, stable_hash};
pub use resolver::{find_descriptor_dir, PackageManager, PathResolver, Workspace};
