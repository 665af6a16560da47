//! Execution sandbox: materialize the snippet once, invoke the toolchain, and
//! fold every failure into a `SandboxRun { ok: false, .. }`.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, instrument, warn};

use crate::core::intake::{AUXILIARY_LANGS, AuxiliaryFile};
use crate::core::text::scrub_instrumentation;
use crate::core::types::SandboxRun;
use crate::io::diagnostics::DUMPER_FILE;
use crate::io::exec::{Exec, shell_quote};

/// Runs a snippet against whatever toolchain is currently active.
pub trait Sandbox {
    /// Never fails: build errors, non-zero exits and spawn errors are `ok=false`.
    fn run(&self, command_template: &str, snippet: &str) -> SandboxRun;
    /// Size of the compiled output artifact, 0 when missing.
    fn artifact_size(&self) -> u64;
}

/// Fixed artifact locations for one triage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxPaths {
    pub workdir: PathBuf,
    pub input: PathBuf,
    pub output: PathBuf,
}

impl SandboxPaths {
    pub fn new(workdir: impl Into<PathBuf>, input_file: &str, output_file: &str) -> Self {
        let workdir = workdir.into();
        Self {
            input: workdir.join(input_file),
            output: workdir.join(output_file),
            workdir,
        }
    }

    fn input_name(&self) -> String {
        self.input
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Scratch file for the syntax tree dump.
    pub fn dumper(&self) -> PathBuf {
        self.workdir.join(DUMPER_FILE)
    }

    /// C and C++ the compiler leaves in the nimcache for the input.
    pub fn generated_sources(&self) -> [PathBuf; 2] {
        let name = self.input_name();
        [
            self.workdir.join(format!("@m{name}.c")),
            self.workdir.join(format!("@m{name}.cpp")),
        ]
    }

    /// Everything one compile produces: the output artifact and the generated sources.
    pub fn build_products(&self) -> Vec<PathBuf> {
        let mut products = vec![self.output.clone()];
        products.extend(self.generated_sources());
        products
    }

    /// Whether `file_name` is one of the names intake gives auxiliary files.
    fn is_auxiliary_name(&self, file_name: &str) -> bool {
        let input = self.input_name();
        let stem = input.strip_suffix(".nim").unwrap_or(&input);
        if file_name == format!("{input}.cfg") {
            return true;
        }
        let Some(rest) = file_name.strip_prefix(stem) else {
            return false;
        };
        if let Some(lang) = rest.strip_prefix('.') {
            return AUXILIARY_LANGS.contains(&lang);
        }
        rest.strip_suffix(".nim")
            .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
    }
}

/// Sandbox that runs expanded command templates through an [`Exec`].
pub struct ShellSandbox<E> {
    exec: E,
    paths: SandboxPaths,
    instrumented: bool,
}

impl<E: Exec> ShellSandbox<E> {
    /// `instrumented` enables scrubbing of memcheck line prefixes.
    pub fn new(exec: E, paths: SandboxPaths, instrumented: bool) -> Self {
        Self {
            exec,
            paths,
            instrumented,
        }
    }

    pub fn paths(&self) -> &SandboxPaths {
        &self.paths
    }

    /// Substitute `{input}`, `{output}` and `{workdir}` with quoted paths.
    pub fn expand(&self, template: &str) -> String {
        template
            .replace("{input}", &quote_path(&self.paths.input))
            .replace("{output}", &quote_path(&self.paths.output))
            .replace("{workdir}", &quote_path(&self.paths.workdir))
    }

    /// Write the snippet to the input artifact unless it already exists.
    pub fn materialize_input(&self, snippet: &str) -> Result<bool> {
        write_once(&self.paths.input, snippet)
    }

    /// Remove whatever an earlier triage left in the workdir.
    ///
    /// The input artifact is write-once, so a leftover one would be compiled in
    /// place of this request's snippet. Call once before the first run.
    #[instrument(skip_all, fields(workdir = %self.paths.workdir.display()))]
    pub fn reset(&self) -> Result<()> {
        let mut stale = vec![self.paths.input.clone(), self.paths.dumper()];
        stale.extend(self.paths.build_products());
        match fs::read_dir(&self.paths.workdir) {
            Ok(entries) => {
                for entry in entries {
                    let entry = entry.with_context(|| {
                        format!("list {}", self.paths.workdir.display())
                    })?;
                    let name = entry.file_name();
                    if self.paths.is_auxiliary_name(&name.to_string_lossy()) {
                        stale.push(entry.path());
                    }
                }
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("list {}", self.paths.workdir.display()));
            }
        }
        for path in &stale {
            if remove_stale(path)? {
                debug!(path = %path.display(), "removed leftover artifact");
            }
        }
        Ok(())
    }

    /// Drop the previous compile's output so a failed build cannot report it.
    fn clear_build_products(&self) -> Result<()> {
        for path in self.paths.build_products() {
            remove_stale(&path)?;
        }
        Ok(())
    }

    /// Place auxiliary files next to the input artifact, write-once as well.
    pub fn write_auxiliary(&self, files: &[AuxiliaryFile]) -> Result<()> {
        for file in files {
            let path = self.paths.workdir.join(&file.file_name);
            if write_once(&path, &file.contents)? {
                debug!(path = %path.display(), "wrote auxiliary file");
            }
        }
        Ok(())
    }
}

impl<E: Exec> Sandbox for ShellSandbox<E> {
    #[instrument(skip_all, fields(instrumented = self.instrumented))]
    fn run(&self, command_template: &str, snippet: &str) -> SandboxRun {
        if command_template.trim().is_empty() || snippet.trim().is_empty() {
            warn!("sandbox received an empty command or snippet");
            return SandboxRun::failed("");
        }
        if let Err(err) = self.materialize_input(snippet) {
            warn!(err = %err, "could not materialize input");
            return SandboxRun::failed(format!("{err:#}"));
        }
        if let Err(err) = self.clear_build_products() {
            warn!(err = %err, "could not clear previous build output");
            return SandboxRun::failed(format!("{err:#}"));
        }
        let command_line = self.expand(command_template);
        match self.exec.exec(&command_line) {
            Ok(out) => {
                let output = if self.instrumented {
                    scrub_instrumentation(&out.output)
                } else {
                    out.output.trim().to_string()
                };
                SandboxRun { ok: out.ok, output }
            }
            Err(err) => {
                warn!(err = %err, "sandbox command could not run");
                SandboxRun::failed(format!("{err:#}"))
            }
        }
    }

    fn artifact_size(&self) -> u64 {
        file_size(&self.paths.output)
    }
}

/// Write `contents` to `path` and mark it read-only, unless the file exists.
///
/// Returns true when the file was written by this call.
pub fn write_once(path: &Path, contents: &str) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))?;
    let mut perms = fs::metadata(path)
        .with_context(|| format!("stat {}", path.display()))?
        .permissions();
    perms.set_readonly(true);
    fs::set_permissions(path, perms)
        .with_context(|| format!("make {} read-only", path.display()))?;
    Ok(true)
}

/// Delete `path`, clearing the read-only bit first. Returns false when it was absent.
pub fn remove_stale(path: &Path) -> Result<bool> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err).with_context(|| format!("stat {}", path.display())),
    };
    if meta.is_dir() {
        return Ok(false);
    }
    let mut perms = meta.permissions();
    if meta.is_file() && perms.readonly() {
        #[allow(clippy::permissions_set_readonly_false)]
        perms.set_readonly(false);
        fs::set_permissions(path, perms)
            .with_context(|| format!("make {} writable", path.display()))?;
    }
    fs::remove_file(path).with_context(|| format!("remove {}", path.display()))?;
    Ok(true)
}

/// Size in bytes, 0 when the file does not exist.
pub fn file_size(path: &Path) -> u64 {
    fs::metadata(path).map(|meta| meta.len()).unwrap_or(0)
}

fn quote_path(path: &Path) -> String {
    shell_quote(&path.to_string_lossy())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::exec::ExecOutput;
    use anyhow::anyhow;
    use std::cell::RefCell;

    struct CannedExec {
        result: Option<ExecOutput>,
        seen: RefCell<Vec<String>>,
    }

    impl Exec for CannedExec {
        fn exec(&self, command_line: &str) -> Result<ExecOutput> {
            self.seen.borrow_mut().push(command_line.to_string());
            self.result.clone().ok_or_else(|| anyhow!("spawn failed"))
        }
    }

    fn canned(result: Option<ExecOutput>) -> CannedExec {
        CannedExec {
            result,
            seen: RefCell::new(Vec::new()),
        }
    }

    #[test]
    fn input_artifact_is_written_once() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = SandboxPaths::new(temp.path(), "temp.nim", "temp");
        let sandbox = ShellSandbox::new(canned(None), paths.clone(), false);
        assert!(sandbox.materialize_input("echo 1").expect("first write"));
        assert!(!sandbox.materialize_input("echo 2").expect("second write"));
        assert_eq!(fs::read_to_string(&paths.input).expect("read"), "echo 1");
        assert!(fs::metadata(&paths.input).expect("stat").permissions().readonly());
    }

    #[test]
    fn run_expands_placeholders() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = SandboxPaths::new(temp.path(), "temp.nim", "temp");
        let exec = canned(Some(ExecOutput {
            ok: true,
            output: "1\n".to_string(),
        }));
        let sandbox = ShellSandbox::new(exec, paths.clone(), false);
        let run = sandbox.run("nim c --out:{output} {input}", "echo 1");
        assert_eq!(
            run,
            SandboxRun {
                ok: true,
                output: "1".to_string()
            }
        );
        let seen = sandbox.exec.seen.borrow();
        assert_eq!(
            seen[0],
            format!(
                "nim c --out:{} {}",
                quote_path(&paths.output),
                quote_path(&paths.input)
            )
        );
    }

    #[test]
    fn spawn_errors_become_failed_runs() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = SandboxPaths::new(temp.path(), "temp.nim", "temp");
        let sandbox = ShellSandbox::new(canned(None), paths, false);
        let run = sandbox.run("nim c {input}", "echo 1");
        assert!(!run.ok);
        assert!(run.output.contains("spawn failed"));
    }

    #[test]
    fn instrumented_output_is_scrubbed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = SandboxPaths::new(temp.path(), "temp.nim", "temp");
        let exec = canned(Some(ExecOutput {
            ok: false,
            output: "==42== Invalid read of size 8\n==42==    at 0x1: main".to_string(),
        }));
        let sandbox = ShellSandbox::new(exec, paths, true);
        let run = sandbox.run("nim c {input} && valgrind {output}", "echo 1");
        assert!(!run.ok);
        assert_eq!(run.output, "Invalid read of size 8\n   at 0x1: main");
    }

    #[test]
    fn empty_snippet_fails_without_exec() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = SandboxPaths::new(temp.path(), "temp.nim", "temp");
        let sandbox = ShellSandbox::new(canned(None), paths, false);
        assert_eq!(sandbox.run("nim c {input}", "  "), SandboxRun::failed(""));
        assert!(sandbox.exec.seen.borrow().is_empty());
    }

    #[test]
    fn reset_clears_leftovers_from_an_earlier_triage() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = SandboxPaths::new(temp.path(), "temp.nim", "temp");
        let sandbox = ShellSandbox::new(canned(None), paths.clone(), false);
        sandbox.materialize_input("echo 1").expect("write input");
        write_once(&temp.path().join("temp1.nim"), "proc f() = discard").expect("write nim");
        for name in ["temp.c", "temp.nim.cfg", "temp", "@mtemp.nim.c", "dumper.nim"] {
            fs::write(temp.path().join(name), "stale").expect("write stale");
        }
        fs::write(temp.path().join("notes.txt"), "keep").expect("write unrelated");

        sandbox.reset().expect("reset");

        let mut left: Vec<String> = fs::read_dir(temp.path())
            .expect("list")
            .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        left.sort();
        assert_eq!(left, vec!["notes.txt"]);
    }

    #[test]
    fn reset_tolerates_a_missing_workdir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = SandboxPaths::new(temp.path().join("absent"), "temp.nim", "temp");
        let sandbox = ShellSandbox::new(canned(None), paths, false);
        sandbox.reset().expect("reset");
    }

    #[cfg(unix)]
    fn shell(temp: &tempfile::TempDir) -> crate::io::exec::ShellExec {
        crate::io::exec::ShellExec::new(temp.path(), std::time::Duration::from_secs(10), 64 * 1024)
    }

    #[cfg(unix)]
    #[test]
    fn second_triage_in_same_workdir_compiles_its_own_snippet() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = SandboxPaths::new(temp.path(), "temp.nim", "temp");

        let first = ShellSandbox::new(shell(&temp), paths.clone(), false);
        first.reset().expect("reset first");
        let run = first.run("cat {input}", "echo \"first\"");
        assert_eq!(run.output, "echo \"first\"");

        let second = ShellSandbox::new(shell(&temp), paths.clone(), false);
        second.reset().expect("reset second");
        let run = second.run("cat {input}", "echo \"second\"");
        assert!(run.ok);
        assert_eq!(run.output, "echo \"second\"");
        // Still write-once within the triage.
        let again = second.run("cat {input}", "echo \"third\"");
        assert_eq!(again.output, "echo \"second\"");
    }

    #[cfg(unix)]
    #[test]
    fn failed_build_does_not_report_previous_artifacts() {
        use crate::io::config::TriageConfig;
        use crate::io::diagnostics::{Diagnostics, NimDiagnostics};

        let temp = tempfile::tempdir().expect("tempdir");
        let paths = SandboxPaths::new(temp.path(), "temp.nim", "temp");
        let sandbox = ShellSandbox::new(shell(&temp), paths.clone(), false);
        let diagnostics = NimDiagnostics::new(shell(&temp), &paths, &TriageConfig::default());

        let built = sandbox.run(
            "printf 'int x;' > {workdir}/@mtemp.nim.c && printf abcd > {output}",
            "echo 1",
        );
        assert!(built.ok);
        assert_eq!(sandbox.artifact_size(), 4);
        assert_eq!(diagnostics.intermediate(), "int x;");

        let broken = sandbox.run("exit 1", "echo 1");
        assert!(!broken.ok);
        assert_eq!(sandbox.artifact_size(), 0);
        assert_eq!(diagnostics.intermediate(), "");
    }

    #[test]
    fn artifact_size_is_zero_when_missing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = SandboxPaths::new(temp.path(), "temp.nim", "temp");
        let sandbox = ShellSandbox::new(canned(None), paths.clone(), false);
        assert_eq!(sandbox.artifact_size(), 0);
        fs::write(&paths.output, b"abcd").expect("write");
        assert_eq!(sandbox.artifact_size(), 4);
    }
}
