//! Virtual id paths
//!
//! Module and package ids are `/`-rooted strings that never touch a real
//! filesystem. These helpers behave exactly like their counterparts in
//! `js/runtime.js`.

/// Id prefix of every record coming from the core polyfill directory.
pub const CORE_BASE: &str = "/[core]";

/// Parent of an id, `None` for `/`.
pub fn dirname(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(index) if index > 0 => Some(&trimmed[..index]),
        _ => Some("/"),
    }
}

/// Appends relative parts to a base id. A leading `./`, a lone `.` and
/// surrounding slashes of each part are dropped.
pub fn join(base: &str, parts: &[&str]) -> String {
    let mut joined = base.to_string();

    for part in parts {
        let part = if let Some(rest) = part.strip_prefix("./") {
            rest
        } else if *part == "." {
            ""
        } else {
            part
        };
        let part = part.trim_matches('/');
        if part.is_empty() {
            continue;
        }
        if !joined.ends_with('/') {
            joined.push('/');
        }
        joined.push_str(part);
    }

    joined
}

/// Lexically removes `.` segments and `<segment>/..` pairs. Leading `..`
/// segments are kept, as is a leading `.`.
pub fn collapse_dots(path: &str) -> String {
    let mut parts: Vec<&str> = path
        .split('/')
        .enumerate()
        .filter(|(index, part)| *index == 0 || *part != ".")
        .map(|(_, part)| part)
        .collect();

    let mut i = 1;
    while i < parts.len() {
        if parts[i] != ".." || parts[i - 1] == ".." {
            i += 1;
            continue;
        }

        if parts[i - 1] == "." {
            parts.remove(i - 1);
        } else if !parts[i - 1].is_empty() || i > 1 {
            parts.drain(i - 1..=i);
            i = (i - 1).max(1);
        } else {
            // `/..` stays, there is nothing above the root
            i += 1;
        }
    }

    parts.join("/")
}

/// Extracts the package name at the start of a bare specifier: `name` or
/// `@scope/name`. Returns `None` for relative or absolute specifiers.
pub fn package_name(path: &str) -> Option<&str> {
    fn segment_end(path: &str, from: usize) -> Option<usize> {
        let rest = &path[from..];
        let first = rest.chars().next()?;
        if matches!(first, '@' | '.' | '/') {
            return None;
        }
        let len = rest.find(['@', '/']).unwrap_or(rest.len());
        Some(from + len)
    }

    if let Some(scoped) = path.strip_prefix('@') {
        let scope_end = segment_end(path, 1)?;
        if !scoped[scope_end - 1..].starts_with('/') {
            return None;
        }
        let name_end = segment_end(path, scope_end + 1)?;
        Some(&path[..name_end])
    } else {
        let end = segment_end(path, 0)?;
        Some(&path[..end])
    }
}

/// Where the bare-specifier ancestor walk stops for a requesting directory.
pub fn namespace_base(directory: &str) -> &'static str {
    if is_core(directory) {
        CORE_BASE
    } else {
        "/"
    }
}

pub fn is_core(id: &str) -> bool {
    id == CORE_BASE || id.starts_with("/[core]/")
}

pub fn is_relative(specifier: &str) -> bool {
    specifier == "."
        || specifier == ".."
        || specifier.starts_with("./")
        || specifier.starts_with("../")
}
