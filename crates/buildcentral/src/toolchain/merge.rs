//! Key table for layering toolchain configuration
//!
//! Every recognized rc key maps to exactly one field and one merge rule:
//! path-like scalars are replaced, flag strings are appended, maps are
//! updated key-wise and search-path lists are appended in order.

use camino::Utf8PathBuf;
use serde_json::Value;

use crate::config::expand_home;
use crate::{Error, Result};

use super::{Definitions, Generator, ToolchainProfile, parse_definition};

type Field<T> = fn(&mut ToolchainProfile) -> &mut T;

/// How a layer value is folded into a profile field
#[derive(Clone, Copy)]
pub enum MergeRule {
    /// Replace a path (`~` expanded); an empty string unsets it
    ReplacePath(Field<Option<Utf8PathBuf>>),
    /// Replace a text value; an empty string unsets it
    ReplaceText(Field<Option<String>>),
    /// Replace a whole path list (string or array)
    ReplacePathList(Field<Vec<Utf8PathBuf>>),
    /// Replace the generator after validating its id
    ReplaceGenerator,
    /// Append to a space-separated flag string
    AppendFlags(Field<String>),
    /// Update definitions key-wise (object, or array of `NAME[=VALUE]`)
    UpdateDefinitions(Field<Definitions>),
    /// Update the environment map key-wise
    UpdateEnv,
    /// Append search paths, keeping order and duplicates
    AppendPaths(Field<Vec<Utf8PathBuf>>),
}

/// The complete set of recognized toolchain keys
pub const MERGE_TABLE: &[(&str, MergeRule)] = &[
    ("TOOLCHAIN", MergeRule::ReplacePath(|p| &mut p.toolchain_root)),
    ("TOOLCHAIN_CC", MergeRule::ReplacePath(|p| &mut p.c_compiler)),
    ("TOOLCHAIN_CXX", MergeRule::ReplacePath(|p| &mut p.cxx_compiler)),
    ("TOOLCHAIN_ASM", MergeRule::ReplacePath(|p| &mut p.asm_compiler)),
    ("TOOLCHAIN_AR", MergeRule::ReplacePath(|p| &mut p.archiver)),
    ("TOOLCHAIN_FILE", MergeRule::ReplaceText(|p| &mut p.toolchain_file)),
    ("SYSROOT", MergeRule::ReplacePathList(|p| &mut p.sysroots)),
    ("COMPILER_TYPE", MergeRule::ReplaceText(|p| &mut p.compiler_type)),
    ("TARGET_ARCH", MergeRule::ReplaceText(|p| &mut p.target_arch)),
    ("TARGET_OS", MergeRule::ReplaceText(|p| &mut p.target_os)),
    ("CMAKE_GENERATOR", MergeRule::ReplaceGenerator),
    ("C_FLAGS", MergeRule::AppendFlags(|p| &mut p.c_flags)),
    ("CXX_FLAGS", MergeRule::AppendFlags(|p| &mut p.cxx_flags)),
    ("ASM_FLAGS", MergeRule::AppendFlags(|p| &mut p.asm_flags)),
    ("REL_FLAGS", MergeRule::AppendFlags(|p| &mut p.release_flags)),
    ("DBG_FLAGS", MergeRule::AppendFlags(|p| &mut p.debug_flags)),
    ("SHA_LD_FLAGS", MergeRule::AppendFlags(|p| &mut p.shared_ld_flags)),
    ("EXE_LD_FLAGS", MergeRule::AppendFlags(|p| &mut p.exe_ld_flags)),
    ("MACRO_DEF", MergeRule::UpdateDefinitions(|p| &mut p.macros)),
    ("MAKE_VAR", MergeRule::UpdateDefinitions(|p| &mut p.make_vars)),
    ("ENV", MergeRule::UpdateEnv),
    ("OTHER_LIB_PATH", MergeRule::AppendPaths(|p| &mut p.lib_paths)),
    ("OTHER_INC_PATH", MergeRule::AppendPaths(|p| &mut p.include_paths)),
    ("ENV_SCRIPT", MergeRule::ReplacePath(|p| &mut p.env_script)),
    ("STAGE_DIR", MergeRule::ReplacePath(|p| &mut p.stage_dir)),
];

/// Whether `key` is handled by the merge table
pub fn is_toolchain_key(key: &str) -> bool {
    MERGE_TABLE.iter().any(|(name, _)| *name == key)
}

impl MergeRule {
    /// Fold `value` (found under `key` in `origin`) into `profile`
    pub fn apply(
        self,
        profile: &mut ToolchainProfile,
        key: &str,
        value: &Value,
        origin: &str,
    ) -> Result<()> {
        let mismatch = |expected: &str| {
            Error::config(
                format!("{}: {} must be {}", origin, key, expected),
                "Fix the value type in the configuration file",
            )
        };

        match self {
            MergeRule::ReplacePath(field) => {
                let text = value.as_str().ok_or_else(|| mismatch("a string"))?;
                *field(profile) = non_empty(text).map(expand_home);
            }
            MergeRule::ReplaceText(field) => {
                let text = value.as_str().ok_or_else(|| mismatch("a string"))?;
                *field(profile) = non_empty(text).map(str::to_string);
            }
            MergeRule::ReplacePathList(field) => {
                let items = string_list(value).ok_or_else(|| mismatch("a string or a list"))?;
                *field(profile) = items.iter().map(|s| expand_home(s)).collect();
            }
            MergeRule::ReplaceGenerator => {
                let text = value.as_str().ok_or_else(|| mismatch("a string"))?;
                profile.generator = match non_empty(text) {
                    Some(id) => Some(id.parse::<Generator>().map_err(|_| {
                        Error::config(
                            format!("{}: unknown generator {}", origin, id),
                            "Run with --info to list the supported generators",
                        )
                    })?),
                    None => None,
                };
            }
            MergeRule::AppendFlags(field) => {
                let text = value.as_str().ok_or_else(|| mismatch("a string"))?;
                let flags = field(profile);
                if let Some(text) = non_empty(text) {
                    if !flags.is_empty() {
                        flags.push(' ');
                    }
                    flags.push_str(text);
                }
            }
            MergeRule::UpdateDefinitions(field) => {
                let definitions = field(profile);
                match value {
                    Value::Object(map) => {
                        for (name, value) in map {
                            let value = match value {
                                Value::Null => None,
                                Value::String(s) => Some(s.clone()),
                                other => Some(other.to_string()),
                            };
                            definitions.insert(name.clone(), value);
                        }
                    }
                    _ => {
                        let items =
                            string_list(value).ok_or_else(|| mismatch("an object or a list"))?;
                        for item in items.iter().filter_map(|s| non_empty(s)) {
                            let (name, value) = parse_definition(item);
                            definitions.insert(name, value);
                        }
                    }
                }
            }
            MergeRule::UpdateEnv => {
                let map = value.as_object().ok_or_else(|| mismatch("an object"))?;
                for (name, value) in map {
                    let value = match value {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    profile.env.insert(name.clone(), value);
                }
            }
            MergeRule::AppendPaths(field) => {
                let items = string_list(value).ok_or_else(|| mismatch("a string or a list"))?;
                field(profile).extend(
                    items
                        .iter()
                        .filter_map(|s| non_empty(s))
                        .map(expand_home),
                );
            }
        }
        Ok(())
    }
}

fn non_empty(text: &str) -> Option<&str> {
    let text = text.trim();
    (!text.is_empty()).then_some(text)
}

/// Accept a single string (split on `;`) or an array of strings
fn string_list(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::String(s) => Some(
            s.split(';')
                .filter(|item| !item.trim().is_empty())
                .map(|item| item.trim().to_string())
                .collect(),
        ),
        Value::Array(items) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string))
            .collect(),
        _ => None,
    }
}
