//! Parsing and validation of package descriptors, `trellis.toml` build
//! settings, and environment overrides.
//!
//! Package descriptors (`package.json`) identify modules and their
//! dependencies. The optional `trellis.toml` at the workspace root tunes the
//! on-disk layout, the external toolchain, `exec`, and watch mode.

#![warn(missing_docs)]

pub mod descriptor;
pub mod env;
pub mod error;
pub mod loader;
pub mod settings;

pub use descriptor::{
    ModuleType, PackageDescriptor, Profile, TrellisMeta, WorkspaceGlobs, DESCRIPTOR_FILE,
};
pub use env::{EnvOverrides, LogLevel, ENV_BUILD_LOG, ENV_CACHE_DIR, ENV_MODULE};
pub use error::ConfigError;
pub use loader::{
    load_descriptor, load_descriptor_from_str, load_settings, load_settings_from_str,
    SETTINGS_FILE,
};
pub use settings::{
    BuildSettings, ExecSettings, LayoutSettings, PreprocessMode, ToolchainSettings, WatchSettings,
};
