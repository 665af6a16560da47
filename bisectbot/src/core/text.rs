//! Pure text transforms applied to toolchain output.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::CommitId;

static INSTRUMENTATION_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^==\d+== ").expect("valid instrumentation regex"));
static BLOCK_COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)/\*.*?\*/").expect("valid comment regex"));
static LEADING_INDENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[ \t]+").expect("valid indent regex"));
static SEMVER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d+\.\d+(\.\d+)?)\b").expect("valid semver regex"));

/// Strip memcheck's `==PID== ` line prefixes so output is comparable across runs.
pub fn scrub_instrumentation(output: &str) -> String {
    INSTRUMENTATION_PREFIX_RE
        .replace_all(output, "")
        .trim()
        .to_string()
}

/// Compact generated C/C++/JS: drop block comments, blank lines and `#undef`
/// lines, and collapse leading indentation to one space per level.
pub fn clean_ir(input: &str) -> String {
    let without_comments = BLOCK_COMMENT_RE.replace_all(input.trim(), "");
    without_comments
        .lines()
        .filter(|line| !line.trim().is_empty() && !line.starts_with("#undef "))
        .map(|line| match LEADING_INDENT_RE.find(line) {
            Some(indent) => {
                let raw = indent.as_str();
                let level = if raw.contains('\t') {
                    raw.len()
                } else {
                    raw.len() / 4
                };
                format!("{}{}", " ".repeat(level), &line[indent.end()..])
            }
            None => line.to_string(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// First `x.y[.z]` on the first line of a `--version` banner, `0.0.0` otherwise.
pub fn parse_semver(banner: &str) -> String {
    let first_line = banner.lines().next().unwrap_or_default();
    SEMVER_RE
        .captures(first_line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| "0.0.0".to_string())
}

/// Prefix every line with `count` spaces.
pub fn indent(text: &str, count: usize) -> String {
    let pad = " ".repeat(count);
    text.lines()
        .map(|line| format!("{pad}{line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Extract the commit a toolchain was built from out of its version banner.
///
/// `marker` is the line prefix carrying the hash, e.g. `git hash:`.
pub fn commit_from_build_info(banner: &str, marker: &str) -> Option<CommitId> {
    let marker = marker.trim().to_lowercase();
    banner
        .lines()
        .map(|line| line.trim().to_lowercase())
        .find_map(|line| line.strip_prefix(&marker).map(str::to_string))
        .and_then(|hash| CommitId::parse(&hash))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scrub_removes_pid_prefixes_only_at_line_start() {
        let raw = "==1234== HEAP SUMMARY:\n==1234==   in use: 0\nkeep ==1== this";
        assert_eq!(
            scrub_instrumentation(raw),
            "HEAP SUMMARY:\n  in use: 0\nkeep ==1== this"
        );
    }

    #[test]
    fn clean_ir_strips_comments_undefs_and_reindents() {
        let raw = "/* generated */\n#undef LANGUAGE_C\nint main() {\n        return 0;\n\t\tfoo();\n\n}\n";
        assert_eq!(clean_ir(raw), "int main() {\n  return 0;\n  foo();\n}");
    }

    #[test]
    fn semver_from_first_line() {
        assert_eq!(
            parse_semver("gcc (Ubuntu 11.4.0-1ubuntu1~22.04) 11.4.0\nCopyright"),
            "11.4.0"
        );
        assert_eq!(parse_semver("Ubuntu clang version 14.0.0-1ubuntu1"), "14.0.0");
        assert_eq!(parse_semver(""), "0.0.0");
    }

    #[test]
    fn commit_from_nim_version_banner() {
        let banner = "Nim Compiler Version 2.1.1 [Linux: amd64]\nCompiled at 2023-10-01\nCopyright (c) 2006-2023 by Andreas Rumpf\n\ngit hash: 5a6d1d1d7a5a4b1ad2f2b7e5f8c34e3e0c8b2d11\nactive boot switches: -d:release\n";
        let commit = commit_from_build_info(banner, "git hash:").expect("commit");
        assert_eq!(commit.as_str(), "5a6d1d1d7a5a4b1ad2f2b7e5f8c34e3e0c8b2d11");
    }

    #[test]
    fn commit_missing_from_banner_is_none() {
        assert!(commit_from_build_info("Nim Compiler Version 2.0.0", "git hash:").is_none());
    }

    #[test]
    fn indent_prefixes_each_line() {
        assert_eq!(indent("a\nb", 2), "  a\n  b");
    }
}
