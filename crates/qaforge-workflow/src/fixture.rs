//! Markdown step-list fixtures.
//!
//! A fixture holds one instruction per list item: a bullet (`-`, `*`, `>`)
//! or a number with `.` or `)`. The marker must be followed by whitespace,
//! so `1.5 kg` or `**bold**` are not items. Anything else (headings, prose,
//! blank lines) is ignored.

use std::path::{Path, PathBuf};

use qaforge_core::error::{QaforgeError, Result};

use crate::pipeline::context::UNKNOWN_TEST_NAME;

/// Extract trimmed instructions from fixture text.
pub fn parse_steps(content: &str) -> Vec<String> {
    content
        .lines()
        .filter_map(|line| list_item(line.trim()))
        .filter(|step| !step.is_empty())
        .map(str::to_string)
        .collect()
}

fn list_item(line: &str) -> Option<&str> {
    let mut chars = line.chars();
    let rest = match chars.next()? {
        '-' | '*' | '>' => chars.as_str(),
        c if c.is_ascii_digit() => {
            let digits_end = line
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(line.len());
            let rest = &line[digits_end..];
            rest.strip_prefix('.').or_else(|| rest.strip_prefix(')'))?
        }
        _ => return None,
    };
    if rest.is_empty() || rest.starts_with(char::is_whitespace) {
        Some(rest.trim())
    } else {
        None
    }
}

/// Read and parse a fixture file.
pub fn read_steps(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        QaforgeError::Fixture(format!("cannot read {}: {}", path.display(), e))
    })?;
    Ok(parse_steps(&content))
}

/// File stem with every non-alphanumeric character replaced by `_`.
pub fn test_name_from_path(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    if stem.is_empty() {
        return UNKNOWN_TEST_NAME.to_string();
    }
    stem.chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

/// Markdown fixtures in `dir`, sorted by path.
pub fn list_fixtures(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        QaforgeError::Fixture(format!("cannot list {}: {}", dir.display(), e))
    })?;

    let mut fixtures = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_md = path
            .extension()
            .map_or(false, |ext| ext.eq_ignore_ascii_case("md"));
        if path.is_file() && is_md {
            fixtures.push(path);
        }
    }
    fixtures.sort();
    Ok(fixtures)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mixed_markers() {
        let content = "# Login test\n\
            Some intro prose.\n\
            \n\
            - Open https://shop.test\n\
            * Click the login button\n\
            > Fill the username with bob\n\
            1. Press Enter\n\
            2) Check the greeting\n";
        assert_eq!(
            parse_steps(content),
            vec![
                "Open https://shop.test",
                "Click the login button",
                "Fill the username with bob",
                "Press Enter",
                "Check the greeting",
            ]
        );
    }

    #[test]
    fn test_parse_ignores_rules_and_empty_items() {
        let content = "---\n-\n**bold**\n  -   indented step  \n3.\n";
        assert_eq!(parse_steps(content), vec!["indented step"]);
    }

    #[test]
    fn test_number_without_marker_is_not_a_step() {
        assert!(parse_steps("2024 was a good year").is_empty());
    }

    #[test]
    fn test_markers_need_whitespace_after() {
        let content = "1.Open the shop
2)Click
1.5 kg of apples
-dash
3. Add to cart
";
        assert_eq!(parse_steps(content), vec!["Add to cart"]);
    }

    #[test]
    fn test_test_name_from_path() {
        assert_eq!(test_name_from_path(Path::new("fixtures/login flow.md")), "login_flow");
        assert_eq!(test_name_from_path(Path::new("checkout-v2.md")), "checkout_v2");
        assert_eq!(test_name_from_path(Path::new("")), UNKNOWN_TEST_NAME);
    }

    #[test]
    fn test_read_steps_missing_file() {
        let err = read_steps(Path::new("/nonexistent/qaforge.md")).unwrap_err();
        assert!(matches!(err, QaforgeError::Fixture(_)));
    }

    #[test]
    fn test_list_fixtures_sorted_markdown_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.md"), "- x").unwrap();
        std::fs::write(dir.path().join("a.md"), "- y").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "- z").unwrap();

        let names: Vec<_> = list_fixtures(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.md", "b.md"]);
    }
}
