//! Turn a free-text request comment into a command template and a snippet.
//!
//! The first line is the command (`!nim c ...`), fenced code blocks carry the
//! snippet and any auxiliary files. Parsing is pure; writing the auxiliary files
//! is the sandbox's job.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::IntakeError;

/// Command prefixes accepted on the first line.
pub const COMMAND_PREFIXES: [&str; 3] = ["!nim c", "!nim cpp", "!nim js"];
/// Shell syntax that would let a request chain, redirect or substitute commands.
///
/// The command line reaches `sh -c` unquoted. Longer tokens come first so the
/// rejection names the token the requester actually wrote.
pub const BANNED_SHELL_TOKENS: [&str; 9] = ["&&", "||", ";", "&", "|", "`", "$(", ">", "<"];
/// Fence languages copied verbatim next to the input as `temp.<lang>`.
pub const AUXILIARY_LANGS: [&str; 8] = ["c", "cpp", "c++", "h", "hpp", "js", "json", "txt"];
/// Associations allowed to trigger a run when access is locked down.
pub const TRUSTED_ASSOCIATIONS: [&str; 3] = ["owner", "collaborator", "member"];

const JS_FLAGS: &str = "-d:nodejs -d:nimExperimentalAsyncjsThen -d:nimExperimentalJsfetch";
const ARC_FLAGS: &str = "-d:nimArcDebug -d:nimArcIds";
const VALGRIND_FLAGS: &str = "-d:nimAllocPagesViaMalloc -d:useSysAssert -d:useGcAssert -d:nimLeakDetector --debugger:native --debuginfo:on";
const FIXED_FLAGS: &str = "-d:nimDebug -d:nimDebugDlOpen -d:ssl -d:nimDisableCertificateValidation --forceBuild:on --colors:off --verbosity:0 --hints:off --lineTrace:off --nimcache:{workdir} --out:{output} {input}";

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?ms)^[ \t]*```([^\s`]*)[^\n]*\n(.*?)^[ \t]*```").expect("valid fence regex")
});

/// Extra file that must sit next to the main input artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuxiliaryFile {
    pub file_name: String,
    pub contents: String,
}

/// Command line derived from the request's first line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    /// Template with `{input}`, `{output}` and `{workdir}` placeholders.
    pub template: String,
    /// Whether the binary runs under memcheck (output needs scrubbing).
    pub instrumented: bool,
}

/// Everything the core needs from a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriageRequest {
    pub command: ParsedCommand,
    pub snippet: String,
    pub auxiliary: Vec<AuxiliaryFile>,
}

/// Parse a whole request body.
///
/// `input_file` is the main artifact name (e.g. `temp.nim`), used to derive the
/// names of auxiliary files. `windows` disables memcheck instrumentation.
pub fn parse_request(
    body: &str,
    input_file: &str,
    windows: bool,
) -> Result<TriageRequest, IntakeError> {
    let command = parse_command(body, windows)?;
    let (snippet, auxiliary) = extract_code_blocks(body, input_file);
    if snippet.is_empty() {
        return Err(IntakeError::MissingSnippet);
    }
    Ok(TriageRequest {
        command,
        snippet,
        auxiliary,
    })
}

/// Validate the first line and expand it into a full command template.
pub fn parse_command(body: &str, windows: bool) -> Result<ParsedCommand, IntakeError> {
    let first = body.trim().lines().next().unwrap_or_default().trim();
    if first.is_empty() {
        return Err(IntakeError::EmptyCommand);
    }
    if let Some(token) = BANNED_SHELL_TOKENS.iter().find(|token| first.contains(*token)) {
        return Err(IntakeError::BannedShellToken((*token).to_string()));
    }
    if !COMMAND_PREFIXES.iter().any(|prefix| first.starts_with(prefix)) {
        return Err(IntakeError::UnsupportedCommand(first.to_string()));
    }

    let mut parts = vec![first.trim_start_matches('!').to_string()];
    if first.starts_with("!nim js") {
        parts.push(JS_FLAGS.to_string());
    }
    let arc = uses_arc(first);
    let instrumented = arc && uses_malloc(first) && !windows;
    if arc {
        parts.push(ARC_FLAGS.to_string());
    }
    if instrumented {
        parts.push(VALGRIND_FLAGS.to_string());
    } else {
        parts.push("--run".to_string());
    }
    parts.push(FIXED_FLAGS.to_string());
    if instrumented {
        parts.push("&& valgrind {output}".to_string());
    }

    Ok(ParsedCommand {
        template: parts.join(" "),
        instrumented,
    })
}

/// Split fenced blocks into the snippet (first `nim` block) and auxiliary files.
///
/// The snippet is trimmed with blank lines removed. Only the first block for a
/// given auxiliary file name is kept.
pub fn extract_code_blocks(body: &str, input_file: &str) -> (String, Vec<AuxiliaryFile>) {
    let stem = input_file.strip_suffix(".nim").unwrap_or(input_file);
    let mut snippet: Option<String> = None;
    let mut extra_nim = 0usize;
    let mut auxiliary: Vec<AuxiliaryFile> = Vec::new();

    for caps in FENCE_RE.captures_iter(body) {
        let lang = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let text = caps.get(2).map(|m| m.as_str().trim()).unwrap_or_default();
        if lang.is_empty() || text.is_empty() {
            continue;
        }
        let file_name = match lang {
            "nim" if snippet.is_none() => {
                snippet = Some(drop_blank_lines(text));
                continue;
            }
            "nim" => {
                extra_nim += 1;
                format!("{stem}{extra_nim}.nim")
            }
            "cfg" | "ini" => format!("{input_file}.cfg"),
            other if AUXILIARY_LANGS.contains(&other) => format!("{stem}.{other}"),
            _ => continue,
        };
        if auxiliary.iter().any(|file| file.file_name == file_name) {
            continue;
        }
        auxiliary.push(AuxiliaryFile {
            file_name,
            contents: text.to_string(),
        });
    }

    (snippet.unwrap_or_default(), auxiliary)
}

/// Whether the requester may trigger a run.
pub fn is_authorized(
    association: &str,
    login: &str,
    allow_all: bool,
    privileged: &[String],
) -> bool {
    if allow_all {
        return true;
    }
    let association = association.trim().to_lowercase();
    let login = login.trim().to_lowercase();
    TRUSTED_ASSOCIATIONS.contains(&association.as_str())
        || privileged.iter().any(|p| p.trim().eq_ignore_ascii_case(&login))
}

fn uses_arc(command: &str) -> bool {
    let s = command.trim().to_lowercase();
    ["--gc:", "--mm:"].iter().any(|flag| {
        ["arc", "orc", "atomicarc"]
            .iter()
            .any(|mode| s.contains(&format!("{flag}{mode}")))
    })
}

fn uses_malloc(command: &str) -> bool {
    let s = command.trim().to_lowercase();
    s.contains("-d:usemalloc") || s.contains("--define:usemalloc")
}

fn drop_blank_lines(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = "!nim c --mm:orc\n\n```nim\necho 1\n\necho 2\n```\n\n```nim\nproc helper() = discard\n```\n\n```c\nint x;\n```\n\n```cfg\n--threads:on\n```\n";

    #[test]
    fn parses_snippet_and_auxiliary_files() {
        let request = parse_request(BODY, "temp.nim", false).expect("parse");
        assert_eq!(request.snippet, "echo 1\necho 2");
        let names: Vec<&str> = request
            .auxiliary
            .iter()
            .map(|f| f.file_name.as_str())
            .collect();
        assert_eq!(names, vec!["temp1.nim", "temp.c", "temp.nim.cfg"]);
    }

    #[test]
    fn arc_command_gets_arc_debug_flags_and_run() {
        let cmd = parse_command("!nim c --mm:arc", false).expect("parse");
        assert!(cmd.template.starts_with("nim c --mm:arc -d:nimArcDebug -d:nimArcIds --run"));
        assert!(cmd.template.ends_with("--out:{output} {input}"));
        assert!(!cmd.instrumented);
    }

    #[test]
    fn arc_with_malloc_runs_under_valgrind() {
        let cmd = parse_command("!nim c --gc:orc -d:useMalloc", false).expect("parse");
        assert!(cmd.instrumented);
        assert!(cmd.template.ends_with("&& valgrind {output}"));
        assert!(!cmd.template.contains("--run"));
    }

    #[test]
    fn valgrind_disabled_on_windows() {
        let cmd = parse_command("!nim c --gc:orc -d:useMalloc", true).expect("parse");
        assert!(!cmd.instrumented);
        assert!(cmd.template.contains("--run"));
    }

    #[test]
    fn js_target_gets_node_flags() {
        let cmd = parse_command("!nim js", false).expect("parse");
        assert!(cmd.template.starts_with("nim js -d:nodejs"));
    }

    #[test]
    fn rejects_chained_commands() {
        let err = parse_command("!nim c && rm -rf /", false).unwrap_err();
        assert_eq!(err, IntakeError::BannedShellToken("&&".to_string()));
    }

    #[test]
    fn rejects_pipes_substitution_and_redirects() {
        for (line, token) in [
            ("!nim c | sh", "|"),
            ("!nim c -d:x=$(id)", "$("),
            ("!nim c -d:x=`id`", "`"),
            ("!nim c > /etc/passwd", ">"),
            ("!nim c < /dev/zero", "<"),
            ("!nim c & curl evil", "&"),
            ("!nim c; id", ";"),
        ] {
            let err = parse_command(line, false).unwrap_err();
            assert_eq!(err, IntakeError::BannedShellToken(token.to_string()), "{line}");
        }
        assert!(parse_command("!nim c -d:release --mm:orc", false).is_ok());
    }

    #[test]
    fn rejects_unknown_prefix() {
        let err = parse_command("!python run", false).unwrap_err();
        assert!(matches!(err, IntakeError::UnsupportedCommand(_)));
    }

    #[test]
    fn missing_snippet_is_an_error() {
        let err = parse_request("!nim c\nno code here", "temp.nim", false).unwrap_err();
        assert_eq!(err, IntakeError::MissingSnippet);
    }

    #[test]
    fn authorization_respects_allow_all_and_associations() {
        let privileged = vec!["araq".to_string()];
        assert!(is_authorized("none", "someone", true, &privileged));
        assert!(is_authorized("MEMBER", "someone", false, &privileged));
        assert!(is_authorized("none", "Araq", false, &privileged));
        assert!(!is_authorized("contributor", "someone", false, &privileged));
    }
}
