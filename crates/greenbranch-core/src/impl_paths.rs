//! Locate the implementation file behind a failing test file.
//!
//! Best-effort and pure: the fix flow reads each candidate in order and keeps
//! the first one that exists.

/// Whether `path` looks like a test file.
pub fn is_test_path(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    ["test", "spec", "__test__"]
        .iter()
        .any(|marker| lower.contains(marker))
}

/// Ordered, de-duplicated candidate implementation paths for `test_path`.
///
/// Relative imports found in `test_content` come first, then the path with
/// its test markers stripped.
pub fn guess_implementation_paths(test_path: &str, test_content: &str) -> Vec<String> {
    let mut candidates = Vec::new();

    if test_content.contains("../index") {
        candidates.push("src/index.ts".to_string());
        candidates.push("src/index.js".to_string());
    }

    for line in test_content.lines() {
        let Some(import) = relative_import(line) else {
            continue;
        };
        let rel = import.replace("../", "src/");
        candidates.push(format!("{rel}.ts"));
        candidates.push(format!("{rel}.js"));
    }

    let stripped = test_path
        .replace("/tests/", "/")
        .replace(".test.", ".")
        .replace(".spec.", ".");
    if stripped != test_path {
        candidates.push(stripped);
    }

    let mut seen = std::collections::HashSet::new();
    candidates.retain(|c| seen.insert(c.clone()));
    candidates
}

/// `"../x"` out of `import { a } from "../x";`.
fn relative_import(line: &str) -> Option<&str> {
    let (_, rest) = line.split_once("from \"")?;
    let (import, _) = rest.split_once('"')?;
    import.starts_with("../").then_some(import)
}
