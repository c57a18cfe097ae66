//! Pure helpers for building work queues.
//!
//! Task files follow a strict naming convention (`0001-some-title.md`), and the
//! project token lives in the `## PROJECT` section of a notes document.

use std::sync::LazyLock;

use regex::Regex;

/// File names that never count as tasks, even when they match the pattern.
pub const EXCLUDED_FILE_NAMES: [&str; 2] = ["README.md", "done.md"];

static TASK_FILE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-.*\.md$").expect("task file regex is valid"));
static PROJECT_HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^##\s*PROJECT\b").expect("project heading regex is valid"));
static NEXT_HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^##\s+\S").expect("heading regex is valid"));
static LIST_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[*-]\s*").expect("list marker regex is valid"));

/// True if `name` is a task file (`NNNN-*.md`) and not an excluded name.
pub fn is_task_file_name(name: &str) -> bool {
    !EXCLUDED_FILE_NAMES.contains(&name) && TASK_FILE_RE.is_match(name)
}

/// Keep task file names and sort them lexicographically.
///
/// Zero-padded prefixes make lexicographic order numeric order.
pub fn select_task_files<I, S>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut selected: Vec<String> = names
        .into_iter()
        .filter(|name| is_task_file_name(name.as_ref()))
        .map(|name| name.as_ref().to_string())
        .collect();
    selected.sort();
    selected
}

/// Extract the project token from a notes document.
///
/// Returns the first usable line under the `## PROJECT` heading. Blank lines,
/// `//` comments and `todo` placeholders are skipped; a leading list marker and
/// a `key:` prefix are stripped. The section ends at the next `## ` heading.
pub fn parse_project_token(contents: &str) -> Option<String> {
    let mut in_section = false;
    for line in contents.lines() {
        if PROJECT_HEADING_RE.is_match(line) {
            in_section = true;
            continue;
        }
        if !in_section {
            continue;
        }
        if NEXT_HEADING_RE.is_match(line) {
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty()
            || trimmed.starts_with("//")
            || trimmed.to_lowercase().starts_with("todo")
        {
            continue;
        }
        let mut value = LIST_MARKER_RE.replace(trimmed, "").into_owned();
        if let Some((_, rest)) = value.split_once(':') {
            value = rest.trim().to_string();
        }
        if !value.is_empty() {
            return Some(value);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_numbered_markdown_files_in_order() {
        let names = ["0002-b.md", "readme.md", "done.md", "abc-x.md", "0001-a.md"];
        assert_eq!(select_task_files(names), vec!["0001-a.md", "0002-b.md"]);
    }

    #[test]
    fn excluded_names_are_dropped() {
        assert!(!is_task_file_name("README.md"));
        assert!(!is_task_file_name("done.md"));
    }

    #[test]
    fn rejects_near_misses() {
        assert!(!is_task_file_name("001-short.md"));
        assert!(!is_task_file_name("0001_underscore.md"));
        assert!(!is_task_file_name("0001-notes.txt"));
        assert!(!is_task_file_name("x0001-prefixed.md"));
        assert!(!is_task_file_name("00010-five-digits.md"));
        assert!(is_task_file_name("9999-.md"));
    }

    #[test]
    fn project_token_plain_line() {
        let doc = "# Notes\n\n## PROJECT\n\nBackend Rewrite\n\n## OTHER\nx\n";
        assert_eq!(parse_project_token(doc).as_deref(), Some("Backend Rewrite"));
    }

    #[test]
    fn project_token_strips_list_marker_and_key() {
        let doc = "## PROJECT\n- name: Backend Rewrite\n";
        assert_eq!(parse_project_token(doc).as_deref(), Some("Backend Rewrite"));

        let doc = "## PROJECT\n* PRJ-42\n";
        assert_eq!(parse_project_token(doc).as_deref(), Some("PRJ-42"));
    }

    #[test]
    fn project_token_skips_comments_and_todo() {
        let doc = "## PROJECT\n// fill this in\nTODO: set project\ntodo\n- id: abc123\n";
        assert_eq!(parse_project_token(doc).as_deref(), Some("abc123"));
    }

    #[test]
    fn project_token_stops_at_next_heading() {
        let doc = "## PROJECT\n// nothing yet\n## NEXT\nNot a project\n";
        assert_eq!(parse_project_token(doc), None);
    }

    #[test]
    fn project_token_missing_section() {
        assert_eq!(parse_project_token("# Title\nsomething\n"), None);
    }

    #[test]
    fn project_heading_is_a_word_match() {
        let doc = "## PROJECTS\nnope\n## PROJECT notes\nyes\n";
        assert_eq!(parse_project_token(doc).as_deref(), Some("yes"));
    }

    #[test]
    fn empty_value_after_key_keeps_searching() {
        let doc = "## PROJECT\n- name:\nfallback\n";
        assert_eq!(parse_project_token(doc).as_deref(), Some("fallback"));
    }
}
