//! Type definitions for the optional `trellis.toml` build settings.

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};

use crate::descriptor::Profile;

/// Top-level build settings parsed from `trellis.toml`.
///
/// Every section is optional; a workspace without the file builds with
/// [`BuildSettings::default`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BuildSettings {
    /// On-disk layout of the compiler, output, and tool folders.
    #[serde(default)]
    pub build: LayoutSettings,
    /// External transpiler configuration.
    #[serde(default)]
    pub toolchain: ToolchainSettings,
    /// Runtime used by `trellis exec`.
    #[serde(default)]
    pub exec: ExecSettings,
    /// Watch-mode tuning.
    #[serde(default)]
    pub watch: WatchSettings,
}

/// The `[build]` section.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LayoutSettings {
    /// Workspace-relative folder holding compiler state.
    pub compiler_folder: String,
    /// Workspace-relative folder receiving compiled output.
    pub output_folder: String,
    /// Workspace-relative folder for tool state (cache, lock files).
    pub tool_folder: String,
    /// Package name of the compiler module.
    pub compiler_module: String,
    /// Build purpose selecting which modules are included.
    pub profile: Profile,
}

impl Default for LayoutSettings {
    fn default() -> Self {
        Self {
            compiler_folder: ".trellis_compiler".to_string(),
            output_folder: ".trellis_output".to_string(),
            tool_folder: ".trellis_tool".to_string(),
            compiler_module: "@trellis/compiler".to_string(),
            profile: Profile::Build,
        }
    }
}

/// The `[toolchain]` section.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ToolchainSettings {
    /// Transpiler command and arguments. Empty selects the passthrough toolchain.
    #[serde(default, deserialize_with = "deserialize_string_or_vec")]
    pub command: Vec<String>,
    /// Source preprocessing mode.
    #[serde(default)]
    pub preprocess: PreprocessMode,
}

/// Deserializes a field that can be either a single string or a list of strings.
///
/// Accepts both `command = "tsc-stdio"` and `command = ["tsc-stdio", "--strict"]`.
fn deserialize_string_or_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct StringOrVec;

    impl<'de> Visitor<'de> for StringOrVec {
        type Value = Vec<String>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            formatter.write_str("a string or a list of strings")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            Ok(v.split_whitespace().map(str::to_string).collect())
        }

        fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut vec = Vec::new();
            while let Some(val) = seq.next_element::<String>()? {
                vec.push(val);
            }
            Ok(vec)
        }
    }

    deserializer.deserialize_any(StringOrVec)
}

/// How source text is rewritten before it reaches the toolchain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PreprocessMode {
    /// Source passes through unchanged.
    #[default]
    None,
    /// `console.<level>(` calls are tagged with their file and line.
    LogMarkers,
}

/// The `[exec]` section.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecSettings {
    /// Program that runs compiled output.
    pub runtime: String,
    /// Arguments inserted before the compiled file path.
    pub args: Vec<String>,
}

impl Default for ExecSettings {
    fn default() -> Self {
        Self {
            runtime: "node".to_string(),
            args: Vec::new(),
        }
    }
}

/// The `[watch]` section.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WatchSettings {
    /// Quiet period after a file event before a rebuild starts.
    pub debounce_ms: u64,
    /// Extra path segments to ignore, in addition to the build folders.
    pub ignore: Vec<String>,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            debounce_ms: 100,
            ignore: Vec::new(),
        }
    }
}
