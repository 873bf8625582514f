//! Output folder maintenance and the compiler state file.

use std::path::Path;

use serde::{Deserialize, Serialize};
use trellis_common::{ContentHash, ContentHasher, InternalError, TRELLIS_VERSION};
use trellis_config::BuildSettings;
use trellis_context::ManifestContext;

use crate::error::BuildError;
use crate::toolchain::Toolchain;

/// Contents of `<compilerFolder>/compiler.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompilerState {
    /// Trellis version that wrote the file.
    pub version: String,
    /// Toolchain identity.
    pub toolchain: String,
    /// Fingerprint over everything that affects compiled output.
    pub fingerprint: ContentHash,
}

/// Computes the compiler fingerprint: Trellis version, toolchain identity and
/// the serialized build settings.
pub fn compiler_fingerprint(
    toolchain: &dyn Toolchain,
    settings: &BuildSettings,
) -> Result<ContentHash, BuildError> {
    let settings_json = serde_json::to_string(settings)
        .map_err(|e| InternalError::new(format!("serializing build settings: {e}")))?;
    Ok(ContentHasher::new()
        .update(TRELLIS_VERSION.as_bytes())
        .update(toolchain.identity().as_bytes())
        .update(settings_json.as_bytes())
        .finish())
}

/// Writes the compiler state file. Returns `true` if the fingerprint differs
/// from the one on disk, or there was none.
#[tracing::instrument(skip_all)]
pub fn prepare_compiler(
    ctx: &ManifestContext,
    settings: &BuildSettings,
    toolchain: &dyn Toolchain,
) -> Result<bool, BuildError> {
    let state = CompilerState {
        version: TRELLIS_VERSION.to_string(),
        toolchain: toolchain.identity(),
        fingerprint: compiler_fingerprint(toolchain, settings)?,
    };
    let path = ctx.compiler_state_path();
    let previous: Option<CompilerState> = std::fs::read_to_string(&path)
        .ok()
        .and_then(|text| serde_json::from_str(&text).ok());
    if previous.as_ref() == Some(&state) {
        return Ok(false);
    }

    let mut json = serde_json::to_string_pretty(&state)
        .map_err(|e| InternalError::new(format!("serializing compiler state: {e}")))?;
    json.push('\n');
    std::fs::create_dir_all(&ctx.build.compiler_folder).map_err(|e| io_error(&ctx.build.compiler_folder, e))?;
    std::fs::write(&path, json).map_err(|e| io_error(&path, e))?;
    tracing::info!(toolchain = %state.toolchain, first = previous.is_none(), "compiler changed");
    Ok(true)
}

/// Copies a non-source file to its output location.
pub fn copy_resource(source: &Path, output: &Path) -> Result<(), BuildError> {
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
    }
    std::fs::copy(source, output).map_err(|e| io_error(source, e))?;
    Ok(())
}

/// Deletes an output file. A missing file is not an error.
pub fn remove_output(output: &Path) -> Result<bool, BuildError> {
    match std::fs::remove_file(output) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(io_error(output, e)),
    }
}

/// Removes a folder and everything below it. A missing folder is not an error.
pub fn clear_dir(dir: &Path) -> Result<(), BuildError> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_error(dir, e)),
    }
}

fn io_error(path: &Path, source: std::io::Error) -> BuildError {
    BuildError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolchain::{CommandToolchain, PassthroughToolchain};
    use trellis_config::{EnvOverrides, PreprocessMode};
    use trellis_context::{resolve_context, PathResolver};

    fn context(root: &Path) -> (ManifestContext, BuildSettings) {
        std::fs::write(root.join("package.json"), r#"{"name": "app", "version": "1.0.0"}"#).unwrap();
        let settings = BuildSettings::default();
        let ctx = resolve_context(
            &PathResolver::new(),
            Some(root),
            &EnvOverrides::default(),
            &settings,
        )
        .unwrap();
        (ctx, settings)
    }

    #[test]
    fn first_prepare_reports_change_then_stable() {
        let tmp = tempfile::tempdir().unwrap();
        let (ctx, settings) = context(tmp.path());
        assert!(prepare_compiler(&ctx, &settings, &PassthroughToolchain).unwrap());
        assert!(ctx.compiler_state_path().exists());
        assert!(!prepare_compiler(&ctx, &settings, &PassthroughToolchain).unwrap());
    }

    #[test]
    fn toolchain_or_settings_change_is_detected() {
        let tmp = tempfile::tempdir().unwrap();
        let (ctx, mut settings) = context(tmp.path());
        prepare_compiler(&ctx, &settings, &PassthroughToolchain).unwrap();

        let tc = CommandToolchain::new("tsc-stdio", vec![]);
        assert!(prepare_compiler(&ctx, &settings, &tc).unwrap());

        settings.toolchain.preprocess = PreprocessMode::LogMarkers;
        assert!(prepare_compiler(&ctx, &settings, &tc).unwrap());
        assert!(!prepare_compiler(&ctx, &settings, &tc).unwrap());
    }

    #[test]
    fn corrupt_state_counts_as_change() {
        let tmp = tempfile::tempdir().unwrap();
        let (ctx, settings) = context(tmp.path());
        std::fs::create_dir_all(&ctx.build.compiler_folder).unwrap();
        std::fs::write(ctx.compiler_state_path(), "not json").unwrap();
        assert!(prepare_compiler(&ctx, &settings, &PassthroughToolchain).unwrap());
    }

    #[test]
    fn output_helpers() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("logo.svg");
        std::fs::write(&src, "<svg/>").unwrap();
        let out = tmp.path().join("out/resources/logo.svg");
        copy_resource(&src, &out).unwrap();
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "<svg/>");

        assert!(remove_output(&out).unwrap());
        assert!(!remove_output(&out).unwrap());

        clear_dir(&tmp.path().join("out")).unwrap();
        assert!(!tmp.path().join("out").exists());
        clear_dir(&tmp.path().join("out")).unwrap();
    }
}
