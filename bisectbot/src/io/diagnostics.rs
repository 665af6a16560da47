//! Best-effort supplementary diagnostics for failing versions.
//!
//! Nothing here may abort a sweep: every failure degrades to an empty string.

use std::fs;
use std::path::PathBuf;

use serde::Serialize;
use tracing::{debug, warn};

use crate::core::text::{clean_ir, indent, parse_semver};
use crate::io::config::TriageConfig;
use crate::io::exec::{Exec, shell_quote};
use crate::io::sandbox::SandboxPaths;

pub const DUMPER_FILE: &str = "dumper.nim";

/// Compiler-internal views of the snippet.
pub trait Diagnostics {
    /// Structural dump of the snippet's syntax tree.
    fn ast_dump(&self, snippet: &str) -> String;
    /// Cleaned intermediate code left behind by the last compile.
    fn intermediate(&self) -> String;
}

/// Diagnostics for the Nim toolchain: `dumpAstGen` and the nimcache C/C++/JS.
pub struct NimDiagnostics<E> {
    exec: E,
    dumper: PathBuf,
    ast_command: String,
    ir_candidates: Vec<PathBuf>,
}

impl<E: Exec> NimDiagnostics<E> {
    pub fn new(exec: E, paths: &SandboxPaths, cfg: &TriageConfig) -> Self {
        let mut ir_candidates = paths.generated_sources().to_vec();
        ir_candidates.push(paths.output.clone());
        Self {
            exec,
            dumper: paths.dumper(),
            ast_command: cfg.toolchain.ast_command.clone(),
            ir_candidates,
        }
    }
}

impl<E: Exec> Diagnostics for NimDiagnostics<E> {
    fn ast_dump(&self, snippet: &str) -> String {
        if snippet.trim().is_empty() {
            warn!("ast dump received an empty snippet");
            return String::new();
        }
        let source = format!("dumpAstGen:\n{}", indent(snippet, 2));
        if let Err(err) = fs::write(&self.dumper, source) {
            warn!(err = %err, path = %self.dumper.display(), "could not write dumper");
            return String::new();
        }
        let command = self
            .ast_command
            .replace("{dumper}", &shell_quote(&self.dumper.to_string_lossy()));
        match self.exec.exec(&command) {
            Ok(out) if out.ok => out.output.trim().to_string(),
            Ok(out) => {
                debug!(output = %out.output, "ast dump command failed");
                String::new()
            }
            Err(err) => {
                warn!(err = %err, "ast dump command could not run");
                String::new()
            }
        }
    }

    fn intermediate(&self) -> String {
        // C target first, then C++, then the JS output file itself.
        self.ir_candidates
            .iter()
            .find(|path| path.is_file())
            .and_then(|path| fs::read(path).ok())
            .map(|bytes| clean_ir(&String::from_utf8_lossy(&bytes)))
            .unwrap_or_default()
    }
}

/// Version of a host tool listed in the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolVersion {
    pub name: String,
    pub version: String,
}

/// `<tool> --version` for each tool; `0.0.0` when missing or unparseable.
pub fn host_tool_versions<E: Exec>(exec: &E, tools: &[String]) -> Vec<ToolVersion> {
    tools
        .iter()
        .map(|tool| {
            let banner = match exec.exec(&format!("{} --version", shell_quote(tool))) {
                Ok(out) if out.ok => out.output,
                Ok(_) | Err(_) => String::new(),
            };
            ToolVersion {
                name: tool.clone(),
                version: parse_semver(&banner),
            }
        })
        .collect()
}
