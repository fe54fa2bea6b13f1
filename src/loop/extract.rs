//! Code block extraction from generated text.
//!
//! A response is scanned for fenced blocks. Each non-empty block becomes a
//! [`GeneratedFile`] whose path is resolved by a fixed sequence of rules:
//!
//! 1. marker prefix in the fence specifier (`file:`, `path:`, `create:`, ...)
//! 2. a specifier that looks like a path and is not a language tag
//! 3. an inline hint near the top of the block (`# file: x`, `@file x`, ...)
//! 4. `generated_<index>.<ext>` with the extension inferred
//!
//! Every resolved path is sanitized before it leaves this module. Confining
//! it to the project root is the writer's job.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Known fence language tags. A bare tag is never a path.
const LANGUAGE_TAGS: &[(&str, &str)] = &[
    ("python", "py"),
    ("javascript", "js"),
    ("js", "js"),
    ("typescript", "ts"),
    ("ts", "ts"),
    ("java", "java"),
    ("cpp", "cpp"),
    ("c++", "cpp"),
    ("c", "c"),
    ("go", "go"),
    ("rust", "rs"),
    ("ruby", "rb"),
    ("php", "php"),
    ("swift", "swift"),
    ("kotlin", "kt"),
    ("scala", "scala"),
    ("r", "r"),
    ("sql", "sql"),
    ("html", "html"),
    ("css", "css"),
    ("json", "json"),
    ("yaml", "yaml"),
    ("yml", "yml"),
    ("xml", "xml"),
    ("markdown", "md"),
    ("md", "md"),
    ("bash", "sh"),
    ("sh", "sh"),
    ("shell", "sh"),
    ("powershell", "ps1"),
    ("ps1", "ps1"),
    ("dockerfile", "dockerfile"),
    ("makefile", "mk"),
    ("cmake", "cmake"),
    ("txt", "txt"),
    ("plaintext", "txt"),
];

/// Specifier prefixes that announce a path explicitly.
const PATH_MARKERS: [&str; 5] = ["file:", "path:", "create:", "save:", "write:"];

/// Only this many characters of a block are searched for inline hints.
const HINT_WINDOW: usize = 500;

const MAX_PATH_LEN: usize = 200;
const MAX_KEPT_EXTENSION: usize = 10;

static FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```([^`\n]*)\n(.*?)```").expect("Failed to compile fence regex")
});

static HTML_HINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<!--\s*file\s*:\s*(.+?)\s*-->").expect("Failed to compile html hint regex")
});

static LINE_HINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[ \t]*(?:#|//|--)?[ \t]*(?:file|path)[ \t]*:[ \t]*(\S[^\n]*?)[ \t]*$")
        .expect("Failed to compile line hint regex")
});

static AT_FILE_HINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)@file[ \t]+(\S+)").expect("Failed to compile @file hint regex")
});

/// A file parsed out of generated text. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedFile {
    pub path: String,
    pub content: String,
}

/// A path rule sees the fence specifier and the start of the block content.
pub type PathRule = fn(&str, &str) -> Option<String>;

/// Rules tried in order before falling back to a synthesized name.
pub const PATH_RULES: [PathRule; 3] = [path_from_marker, path_from_specifier, path_from_content_hint];

/// Extract every non-empty fenced block as a file.
#[must_use]
pub fn extract_files(text: &str) -> Vec<GeneratedFile> {
    let mut files: Vec<GeneratedFile> = Vec::new();

    for caps in FENCE.captures_iter(text) {
        let specifier = caps.get(1).map_or("", |m| m.as_str()).trim();
        let content = clean_content(caps.get(2).map_or("", |m| m.as_str()));
        if content.trim().is_empty() {
            continue;
        }

        let path = resolve_path(specifier, &content, files.len());
        files.push(GeneratedFile {
            path: sanitize_path(&path),
            content,
        });
    }

    files
}

/// Resolve a path for one block (before sanitization).
#[must_use]
pub fn resolve_path(specifier: &str, content: &str, index: usize) -> String {
    let window: String = content.chars().take(HINT_WINDOW).collect();
    PATH_RULES
        .iter()
        .find_map(|rule| rule(specifier, &window))
        .unwrap_or_else(|| format!("generated_{}.{}", index, infer_extension(specifier, content)))
}

/// Rule 1: `file: src/a.py`, `Save: "x.txt"`, ...
pub fn path_from_marker(specifier: &str, _content: &str) -> Option<String> {
    PATH_MARKERS.iter().find_map(|marker| {
        let head = specifier.get(..marker.len())?;
        if !head.eq_ignore_ascii_case(marker) {
            return None;
        }
        let path = strip_quotes(specifier[marker.len()..].trim());
        (!path.is_empty()).then(|| path.to_string())
    })
}

/// Rule 2: the specifier itself is a path.
pub fn path_from_specifier(specifier: &str, _content: &str) -> Option<String> {
    if specifier.is_empty() || is_language_tag(specifier) {
        return None;
    }

    let has_separator = specifier.contains('/') || specifier.contains('\\');
    if !has_separator && !has_short_extension(specifier) {
        return None;
    }

    match urlencoding::decode(specifier) {
        Ok(decoded) if decoded != specifier => Some(decoded.into_owned()),
        _ => Some(specifier.to_string()),
    }
}

/// Rule 3: a hint inside the block.
pub fn path_from_content_hint(_specifier: &str, content: &str) -> Option<String> {
    [&*HTML_HINT, &*LINE_HINT, &*AT_FILE_HINT]
        .iter()
        .find_map(|re| re.captures(content))
        .and_then(|caps| caps.get(1))
        .map(|m| strip_quotes(m.as_str().trim()).to_string())
        .filter(|path| !path.is_empty())
}

/// Whether the specifier is a known fence language tag.
#[must_use]
pub fn is_language_tag(specifier: &str) -> bool {
    language_extension(specifier).is_some()
}

fn language_extension(specifier: &str) -> Option<&'static str> {
    let lower = specifier.trim().to_lowercase();
    LANGUAGE_TAGS
        .iter()
        .find(|(tag, _)| *tag == lower)
        .map(|(_, ext)| *ext)
}

/// `name.ext` where ext is 1 to 5 alphanumeric characters.
fn has_short_extension(specifier: &str) -> bool {
    specifier.rsplit_once('.').is_some_and(|(stem, ext)| {
        !stem.is_empty()
            && (1..=5).contains(&ext.chars().count())
            && ext.chars().all(|c| c.is_ascii_alphanumeric())
    })
}

fn strip_quotes(s: &str) -> &str {
    s.trim_matches(|c| c == '"' || c == '\'' || c == '`')
}

/// Extension for a synthesized name: the language tag wins, otherwise the
/// content is sniffed.
#[must_use]
pub fn infer_extension(specifier: &str, content: &str) -> &'static str {
    if let Some(ext) = language_extension(specifier) {
        return ext;
    }

    let trimmed = content.trim_start();
    let lower = content.to_lowercase();

    if let Some(first_line) = trimmed.lines().next().filter(|l| l.starts_with("#!")) {
        return if first_line.contains("python") {
            "py"
        } else if first_line.contains("node") {
            "js"
        } else {
            "sh"
        };
    }

    if (trimmed.starts_with('{') || trimmed.starts_with('['))
        && serde_json::from_str::<serde_json::Value>(trimmed).is_ok()
    {
        return "json";
    }

    if lower.contains("<!doctype html") || lower.contains("<html") || lower.contains("<body") {
        return "html";
    }

    if content.contains('{') && ["color:", "margin:", "padding:"].iter().any(|p| lower.contains(p)) {
        return "css";
    }

    if ["interface ", ": string", ": number", "import type "]
        .iter()
        .any(|p| content.contains(p))
    {
        return "ts";
    }

    if ["require(", "function ", "const ", "export "]
        .iter()
        .any(|p| content.contains(p))
    {
        return "js";
    }

    if ["def ", "import ", "class ", "print("]
        .iter()
        .any(|p| content.contains(p))
    {
        return "py";
    }

    if content.lines().any(|l| {
        let l = l.trim_start();
        l.starts_with("# ") || l.starts_with("## ") || l.starts_with("- ") || l.starts_with("* ")
    }) {
        return "md";
    }

    "py"
}

/// Make a resolved path safe to hand to the filesystem layer.
#[must_use]
pub fn sanitize_path(path: &str) -> String {
    let cleaned: String = path
        .chars()
        .filter(|c| *c != '\n' && *c != '\r')
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '|' | '?' | '*' | '\\' => '_',
            other => other,
        })
        .collect();

    let truncated = truncate_keeping_extension(&cleaned);
    let trimmed = truncated.trim_matches(|c| c == '.' || c == ' ');

    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed.to_string()
    }
}

fn truncate_keeping_extension(path: &str) -> String {
    if path.chars().count() <= MAX_PATH_LEN {
        return path.to_string();
    }

    match path.rsplit_once('.') {
        Some((stem, ext)) if !ext.is_empty() && ext.chars().count() <= MAX_KEPT_EXTENSION => {
            let keep = MAX_PATH_LEN - ext.chars().count() - 1;
            let stem: String = stem.chars().take(keep).collect();
            format!("{stem}.{ext}")
        }
        _ => path.chars().take(MAX_PATH_LEN).collect(),
    }
}

/// Drop leading blank lines and trailing whitespace, keeping the first
/// line's indentation.
fn clean_content(raw: &str) -> String {
    let body: String = raw
        .split_inclusive('\n')
        .skip_while(|line| line.trim().is_empty())
        .collect();
    body.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_tag_is_never_a_path() {
        let files = extract_files("```python\nprint('hi')\n```");
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "generated_0.py");
        assert_eq!(files[0].content, "print('hi')");
    }

    #[test]
    fn test_specifier_path() {
        let files = extract_files("Here:\n```src/main.py\ndef main():\n    pass\n```\n");
        assert_eq!(files[0].path, "src/main.py");
        assert_eq!(files[0].content, "def main():\n    pass");
    }

    #[test]
    fn test_marker_with_spaces() {
        let files = extract_files("```file: src/a b.py\nx = 1\n```");
        assert_eq!(files[0].path, "src/a b.py");
    }

    #[test]
    fn test_marker_case_and_quotes() {
        assert_eq!(
            path_from_marker("SAVE: \"docs/notes.md\"", ""),
            Some("docs/notes.md".to_string())
        );
        assert_eq!(path_from_marker("file:", ""), None);
        assert_eq!(path_from_marker("python", ""), None);
    }

    #[test]
    fn test_empty_blocks_do_not_consume_index() {
        let text = "```\n   \n```\n```js\nconst a = 1;\n```";
        let files = extract_files(text);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "generated_0.js");
    }

    #[test]
    fn test_specifier_with_backtick_is_not_a_fence_line() {
        assert!(extract_files("```a`b\nnot code\n```").is_empty());
    }

    #[test]
    fn test_url_encoded_specifier() {
        assert_eq!(
            path_from_specifier("src/my%20file.py", ""),
            Some("src/my file.py".to_string())
        );
    }

    #[test]
    fn test_specifier_requires_path_shape() {
        assert_eq!(path_from_specifier("json", ""), None);
        assert_eq!(path_from_specifier("some words", ""), None);
        assert_eq!(path_from_specifier("version 1.2.345678", ""), None);
        assert_eq!(path_from_specifier("Makefile.am", ""), Some("Makefile.am".to_string()));
    }

    #[test]
    fn test_content_hints() {
        assert_eq!(
            path_from_content_hint("", "# file: app/models.py\nclass A: pass"),
            Some("app/models.py".to_string())
        );
        assert_eq!(
            path_from_content_hint("", "// path: web/index.js\nconst a = 1;"),
            Some("web/index.js".to_string())
        );
        assert_eq!(
            path_from_content_hint("", "<!-- file: site/index.html -->\n<html></html>"),
            Some("site/index.html".to_string())
        );
        assert_eq!(
            path_from_content_hint("", "/**\n * @file lib/util.js\n */"),
            Some("lib/util.js".to_string())
        );
        assert_eq!(path_from_content_hint("", "x = 1\ny = 2"), None);
    }

    #[test]
    fn test_specifier_beats_content_hint() {
        let files = extract_files("```src/real.py\n# file: src/other.py\nx = 1\n```");
        assert_eq!(files[0].path, "src/real.py");
    }

    #[test]
    fn test_hint_outside_window_ignored() {
        let filler = "print(1)\n".repeat(100);
        let text = format!("```\n{filler}# file: late.py\n```");
        let files = extract_files(&text);
        assert_eq!(files[0].path, "generated_0.py");
    }

    #[test]
    fn test_infer_extension() {
        assert_eq!(infer_extension("", "#!/usr/bin/env python3\nprint(1)"), "py");
        assert_eq!(infer_extension("", "#!/usr/bin/env node\nconsole.log(1)"), "js");
        assert_eq!(infer_extension("", "#!/bin/bash\necho hi"), "sh");
        assert_eq!(infer_extension("", "{\"a\": [1, 2]}"), "json");
        assert_eq!(infer_extension("", "<!DOCTYPE html>\n<html></html>"), "html");
        assert_eq!(infer_extension("", "body {\n  margin: 0;\n}"), "css");
        assert_eq!(infer_extension("", "interface A { x: number }"), "ts");
        assert_eq!(infer_extension("", "const x = require('fs');"), "js");
        assert_eq!(infer_extension("", "import os\n"), "py");
        assert_eq!(infer_extension("", "# Title\n\nSome text"), "md");
        assert_eq!(infer_extension("", "just words"), "py");
        assert_eq!(infer_extension("rust", "fn main() {}"), "rs");
    }

    #[test]
    fn test_sanitize_path() {
        assert_eq!(sanitize_path("src/a<b>.py"), "src/a_b_.py");
        assert_eq!(sanitize_path("dir\\file.py"), "dir_file.py");
        assert_eq!(sanitize_path("  .hidden. "), "hidden");
        assert_eq!(sanitize_path("a\nb.py\r"), "ab.py");
        assert_eq!(sanitize_path("..."), "file");
        assert_eq!(sanitize_path(""), "file");
    }

    #[test]
    fn test_sanitize_truncates_keeping_extension() {
        let long = format!("{}.py", "a".repeat(300));
        let sanitized = sanitize_path(&long);
        assert_eq!(sanitized.chars().count(), 200);
        assert!(sanitized.ends_with(".py"));

        let no_ext = "b".repeat(250);
        assert_eq!(sanitize_path(&no_ext).len(), 200);
    }

    #[test]
    fn test_clean_content_preserves_indentation() {
        assert_eq!(clean_content("\n\n    indented\n  \n"), "    indented");
    }

    #[test]
    fn test_multiple_files_in_order() {
        let text = "```src/a.py\na = 1\n```\ntext\n```tests/test_a.py\nimport a\n```";
        let paths: Vec<_> = extract_files(text).into_iter().map(|f| f.path).collect();
        assert_eq!(paths, vec!["src/a.py", "tests/test_a.py"]);
    }
}
