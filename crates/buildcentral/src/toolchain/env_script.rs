//! Environment captured from toolchain setup scripts
//!
//! A script is sourced once per process; the variables it changes are cached
//! by script path. Values are deterministic, so a racing duplicate load is
//! harmless and the first insert wins.

use std::collections::{BTreeMap, HashMap};
use std::process::Command;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

use camino::{Utf8Path, Utf8PathBuf};

use crate::{Error, Result};

type ScriptEnv = Arc<BTreeMap<String, String>>;

static CACHE: LazyLock<RwLock<HashMap<Utf8PathBuf, ScriptEnv>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// Variables set or changed by sourcing `script`
pub fn script_environment(script: &Utf8Path) -> Result<ScriptEnv> {
    if let Some(env) = CACHE
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(script)
    {
        return Ok(Arc::clone(env));
    }

    tracing::debug!("Loading environment from {}", script);
    let env = Arc::new(load(script)?);

    let mut cache = CACHE.write().unwrap_or_else(PoisonError::into_inner);
    Ok(Arc::clone(cache.entry(script.to_path_buf()).or_insert(env)))
}

fn load(script: &Utf8Path) -> Result<BTreeMap<String, String>> {
    if !script.is_file() {
        return Err(Error::config(
            format!("environment script {} does not exist", script),
            "Fix ENV_SCRIPT in the toolchain configuration",
        ));
    }

    let output = dump_command(script).output()?;
    if !output.status.success() {
        return Err(Error::config(
            format!("sourcing environment script {} failed", script),
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ));
    }

    let base: HashMap<String, String> = std::env::vars().collect();
    let dump = String::from_utf8_lossy(&output.stdout);
    Ok(parse_dump(&dump, DUMP_SEPARATOR, &base))
}

#[cfg(unix)]
const DUMP_SEPARATOR: char = '\0';
#[cfg(not(unix))]
const DUMP_SEPARATOR: char = '\n';

#[cfg(unix)]
fn dump_command(script: &Utf8Path) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(r#". "$1" >/dev/null 2>&1 && env -0"#)
        .arg("sh")
        .arg(absolute(script));
    cmd
}

#[cfg(not(unix))]
fn dump_command(script: &Utf8Path) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C")
        .arg(format!(r#"call "{}" >nul 2>&1 && set"#, absolute(script)));
    cmd
}

/// `.` searches `PATH` for bare names, so always hand it a path with a separator
fn absolute(script: &Utf8Path) -> Utf8PathBuf {
    if script.is_absolute() {
        script.to_path_buf()
    } else {
        Utf8Path::new(".").join(script)
    }
}

/// Keep only the entries that differ from `base`
fn parse_dump(dump: &str, separator: char, base: &HashMap<String, String>) -> BTreeMap<String, String> {
    dump.split(separator)
        .filter_map(|entry| entry.trim_end_matches('\r').split_once('='))
        .filter(|(name, value)| !name.is_empty() && base.get(*name).map(String::as_str) != Some(*value))
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}
