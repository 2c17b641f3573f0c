//! Helpers for names this client puts on the bus.

use uuid::Uuid;

/// Replaces every character that is not an ASCII letter or digit with `_`.
///
/// The result is usable as a single D-Bus object path element.
pub(crate) fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn process_name() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "connline".to_string())
}

/// Name unique to this process and call: `<process>_<pid>_<random>`.
pub(crate) fn unique_session_name() -> String {
    sanitize(&format!(
        "{}_{}_{}",
        process_name(),
        std::process::id(),
        Uuid::new_v4().simple()
    ))
}
