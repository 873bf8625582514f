//! Descriptor and settings file loading and validation.

use crate::descriptor::{PackageDescriptor, DESCRIPTOR_FILE};
use crate::error::ConfigError;
use crate::settings::BuildSettings;
use std::path::Path;

/// File name of the optional build settings file at the workspace root.
pub const SETTINGS_FILE: &str = "trellis.toml";

/// Loads and validates `trellis.toml` from a workspace directory.
///
/// A missing file is not an error: the defaults apply.
pub fn load_settings(workspace_dir: &Path) -> Result<BuildSettings, ConfigError> {
    let path = workspace_dir.join(SETTINGS_FILE);
    if !path.is_file() {
        return Ok(BuildSettings::default());
    }
    let content = std::fs::read_to_string(&path)?;
    load_settings_from_str(&content)
}

/// Parses and validates build settings from a string.
pub fn load_settings_from_str(content: &str) -> Result<BuildSettings, ConfigError> {
    let settings: BuildSettings = toml::from_str(content).map_err(|e| ConfigError::ParseError {
        file: SETTINGS_FILE.to_string(),
        reason: e.to_string(),
    })?;
    validate_settings(&settings)?;
    Ok(settings)
}

/// Checks that the layout folders are usable and distinct.
fn validate_settings(settings: &BuildSettings) -> Result<(), ConfigError> {
    let layout = &settings.build;
    for (field, value) in [
        ("build.compiler_folder", &layout.compiler_folder),
        ("build.output_folder", &layout.output_folder),
        ("build.tool_folder", &layout.tool_folder),
        ("build.compiler_module", &layout.compiler_module),
    ] {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(field.to_string()));
        }
    }
    for (field, value) in [
        ("build.compiler_folder", &layout.compiler_folder),
        ("build.output_folder", &layout.output_folder),
        ("build.tool_folder", &layout.tool_folder),
    ] {
        let p = Path::new(value);
        if p.is_absolute() || p.components().any(|c| c.as_os_str() == "..") {
            return Err(ConfigError::ValidationError(format!(
                "{field} must be a relative path inside the workspace, got '{value}'"
            )));
        }
    }
    if layout.output_folder == layout.compiler_folder
        || layout.output_folder == layout.tool_folder
        || layout.compiler_folder == layout.tool_folder
    {
        return Err(ConfigError::ValidationError(
            "build folders must be distinct".to_string(),
        ));
    }
    if settings.exec.runtime.trim().is_empty() {
        return Err(ConfigError::MissingField("exec.runtime".to_string()));
    }
    Ok(())
}

/// Loads `package.json` from a directory.
pub fn load_descriptor(dir: &Path) -> Result<PackageDescriptor, ConfigError> {
    let path = dir.join(DESCRIPTOR_FILE);
    let content = std::fs::read_to_string(&path)?;
    load_descriptor_from_str(&content).map_err(|e| match e {
        ConfigError::ParseError { reason, .. } => ConfigError::ParseError {
            file: path.display().to_string(),
            reason,
        },
        other => other,
    })
}

/// Parses and validates a package descriptor from a string.
pub fn load_descriptor_from_str(content: &str) -> Result<PackageDescriptor, ConfigError> {
    let descriptor: PackageDescriptor =
        serde_json::from_str(content).map_err(|e| ConfigError::ParseError {
            file: DESCRIPTOR_FILE.to_string(),
            reason: e.to_string(),
        })?;
    if descriptor.name.trim().is_empty() {
        return Err(ConfigError::MissingField("name".to_string()));
    }
    Ok(descriptor)
}
