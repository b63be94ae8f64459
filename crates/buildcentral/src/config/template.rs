//! Project-root placeholder substitution and project-root discovery

use camino::{Utf8Path, Utf8PathBuf};

use crate::{Error, Result};

/// Name of the only placeholder recognized in configuration text
pub const PROJECT_ROOT_PLACEHOLDER: &str = "PROOT";

/// Directories whose joint presence marks a project root
const ROOT_SIGNATURE: &[&str] = &["external", "workspace", "project", "tools"];

/// Substitute `$PROOT` / `${PROOT}` with the project root.
///
/// `$$` yields a literal `$`. A `$` that does not start an identifier is kept
/// as is; any other `$identifier` is rejected so typos surface at load time
/// instead of as a broken path deep inside a build.
pub fn substitute(text: &str, project_root: &Utf8Path, origin: &Utf8Path) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(stripped) = after.strip_prefix('$') {
            out.push('$');
            rest = stripped;
            continue;
        }

        let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => {
                    return Err(Error::Placeholder {
                        path: origin.to_path_buf(),
                        name: format!("{{{}", braced.chars().take(16).collect::<String>()),
                    });
                }
            }
        } else {
            let end = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            (&after[..end], end)
        };

        if name.is_empty() {
            out.push('$');
            rest = after;
            continue;
        }

        if name != PROJECT_ROOT_PLACEHOLDER {
            return Err(Error::Placeholder {
                path: origin.to_path_buf(),
                name: name.to_string(),
            });
        }

        out.push_str(project_root.as_str());
        rest = &after[consumed..];
    }

    out.push_str(rest);
    Ok(out)
}

/// Walk up from `start` looking for the project root signature.
///
/// Falls back to `start` itself when the filesystem root is reached.
pub fn guess_project_root(start: &Utf8Path) -> Utf8PathBuf {
    for dir in start.ancestors() {
        let is_root = ROOT_SIGNATURE.iter().all(|name| dir.join(name).is_dir());
        if is_root {
            return dir.to_path_buf();
        }
    }

    tracing::warn!(
        "Cannot find project root above {}, using it as the project root",
        start
    );
    start.to_path_buf()
}

/// Expand a leading `~` to `$HOME`
pub fn expand_home(path: &str) -> Utf8PathBuf {
    if path == "~" || path.starts_with("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return Utf8PathBuf::from(format!("{}{}", home, &path[1..]));
        }
    }
    Utf8PathBuf::from(path)
}
