//! Project path helpers
//!
//! File maps arrive keyed by absolute paths inside the web container's
//! project root; everything shown to the model or the client is relative.

/// Path relative to `project_root`, with forward slashes and no leading `./` or `/`
pub fn relative_to_root(path: &str, project_root: &str) -> String {
    let path = path.replace('\\', "/");
    let root = project_root.trim_end_matches('/');

    let relative = match path.strip_prefix(root) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
        _ => path.as_str(),
    };

    relative
        .trim_start_matches("./")
        .trim_start_matches('/')
        .to_string()
}

/// Get the file name of a path
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
