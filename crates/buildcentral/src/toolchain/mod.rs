//! Toolchain profiles
//!
//! Each architecture owns one [`ToolchainProfile`], assembled by applying rc
//! layers in increasing precedence through the key table in [`merge`]. Per
//! package (and per package-and-architecture) layers are applied on a copy
//! when a build command is synthesized.

mod env_script;
mod generator;
mod merge;

use std::collections::BTreeMap;

use camino::Utf8PathBuf;

use crate::{Error, Result};

pub use env_script::script_environment;
pub use generator::{Generator, NativeTool};
pub use merge::{MERGE_TABLE, MergeRule, is_toolchain_key};

/// Macro or make-variable definitions; `None` is a bare `NAME` definition
pub type Definitions = BTreeMap<String, Option<String>>;

/// Compiler, flags and environment for one architecture
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolchainProfile {
    pub toolchain_root: Option<Utf8PathBuf>,
    pub c_compiler: Option<Utf8PathBuf>,
    pub cxx_compiler: Option<Utf8PathBuf>,
    pub asm_compiler: Option<Utf8PathBuf>,
    pub archiver: Option<Utf8PathBuf>,
    /// CMake toolchain file, relative to the rule directory
    pub toolchain_file: Option<String>,
    pub sysroots: Vec<Utf8PathBuf>,
    pub compiler_type: Option<String>,
    pub target_arch: Option<String>,
    pub target_os: Option<String>,
    pub generator: Option<Generator>,
    pub c_flags: String,
    pub cxx_flags: String,
    pub asm_flags: String,
    pub release_flags: String,
    pub debug_flags: String,
    pub shared_ld_flags: String,
    pub exe_ld_flags: String,
    pub macros: Definitions,
    pub make_vars: Definitions,
    pub lib_paths: Vec<Utf8PathBuf>,
    pub include_paths: Vec<Utf8PathBuf>,
    pub env: BTreeMap<String, String>,
    /// Script whose exported variables are injected into every build command
    pub env_script: Option<Utf8PathBuf>,
    /// Overrides the computed stage (install prefix) directory
    pub stage_dir: Option<Utf8PathBuf>,
}

impl ToolchainProfile {
    /// Apply one configuration layer on top of this profile.
    ///
    /// `origin` names the layer in diagnostics. Keys outside the merge table
    /// are reported with a warning and otherwise ignored.
    pub fn apply_layer(
        &mut self,
        layer: &serde_json::Map<String, serde_json::Value>,
        origin: &str,
    ) -> Result<()> {
        for (key, value) in layer {
            match MERGE_TABLE.iter().find(|(name, _)| *name == key.as_str()) {
                Some((_, rule)) => rule.apply(self, key, value, origin)?,
                None => tracing::warn!("{}: ignoring unknown toolchain key {}", origin, key),
            }
        }
        Ok(())
    }

    /// Check the fields every declared architecture must resolve
    pub fn check_required(&self, arch: &str) -> Result<()> {
        if self.target_arch.as_deref().unwrap_or_default().is_empty() {
            return Err(Error::toolchain(arch, "TARGET_ARCH is not defined"));
        }
        if self.target_os.as_deref().unwrap_or_default().is_empty() {
            return Err(Error::toolchain(arch, "TARGET_OS is not defined"));
        }
        Ok(())
    }

    /// Flags for the selected build type
    pub fn build_type_flags(&self, debug: bool) -> &str {
        if debug {
            &self.debug_flags
        } else {
            &self.release_flags
        }
    }
}

/// Render definitions as `NAME` / `NAME=VALUE` items
pub fn definition_items(definitions: &Definitions) -> impl Iterator<Item = String> + '_ {
    definitions.iter().map(|(name, value)| match value {
        Some(value) => format!("{}={}", name, value),
        None => name.clone(),
    })
}

/// Parse a `NAME[=VALUE]` item
pub fn parse_definition(item: &str) -> (String, Option<String>) {
    match item.split_once('=') {
        Some((name, value)) => (name.trim().to_string(), Some(value.to_string())),
        None => (item.trim().to_string(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn layer(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_required_fields() {
        let mut profile = ToolchainProfile::default();
        assert!(matches!(
            profile.check_required("arm"),
            Err(Error::Toolchain { .. })
        ));

        profile
            .apply_layer(
                &layer(json!({"TARGET_ARCH": "armv7", "TARGET_OS": "linux"})),
                "test",
            )
            .unwrap();
        profile.check_required("arm").unwrap();
    }

    #[test]
    fn test_unknown_key_is_ignored() {
        let mut profile = ToolchainProfile::default();
        profile
            .apply_layer(&layer(json!({"NOT_A_KEY": 1})), "test")
            .unwrap();
        assert_eq!(profile, ToolchainProfile::default());
    }

    #[test]
    fn test_definition_items() {
        let mut defs = Definitions::new();
        defs.insert("A".into(), Some("1".into()));
        defs.insert("B".into(), None);
        let items: Vec<_> = definition_items(&defs).collect();
        assert_eq!(items, vec!["A=1", "B"]);
        assert_eq!(parse_definition("X=y=z"), ("X".into(), Some("y=z".into())));
    }
}
