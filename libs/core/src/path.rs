//! Diagnostic paths into a value tree.
//!
//! Keys are joined with `.` and list positions are written as `[i]`, so a
//! string nested in a message reads as `args.kCBMsgArgName` or
//! `args.items[2]`. The empty path is the root.

/// Path of the entry `key` inside the mapping at `parent`.
pub fn join_key(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

/// Path of the element `index` inside the list at `parent`.
pub fn join_index(parent: &str, index: usize) -> String {
    format!("{parent}[{index}]")
}

/// Human-readable form of a path, naming the root explicitly.
pub fn display(path: &str) -> &str {
    if path.is_empty() {
        "<root>"
    } else {
        path
    }
}
