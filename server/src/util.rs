//! Small helpers shared across modules.

use std::borrow::Cow;
use std::path::PathBuf;

/// The current user's home directory, from `$HOME`.
pub fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .filter(|h| !h.is_empty())
        .map(PathBuf::from)
}

/// Expand a leading `~` to `$HOME`.
///
/// - `"~"` → `"/home/user"`
/// - `"~/foo"` → `"/home/user/foo"`
/// - Anything else passes through unchanged, as does everything when `$HOME`
///   is unset.
pub fn expand_tilde(path: &str) -> Cow<'_, str> {
    let rest = match path {
        "~" => "",
        _ => match path.strip_prefix("~/") {
            Some(rest) => rest,
            None => return Cow::Borrowed(path),
        },
    };
    match home_dir() {
        Some(home) if rest.is_empty() => Cow::Owned(home.display().to_string()),
        Some(home) => Cow::Owned(home.join(rest).display().to_string()),
        None => Cow::Borrowed(path),
    }
}
