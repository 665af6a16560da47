//! Regression triage bot for the Nim toolchain.
//!
//! `bisectbot triage` reads a request comment, sweeps the configured version
//! matrix, bisects the toolchain history between the first passing and first
//! failing release, and prints a report.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use bisectbot::core::intake::{is_authorized, parse_request};
use bisectbot::error::IntakeError;
use bisectbot::exit_codes;
use bisectbot::io::config::{DEFAULT_CONFIG_FILE, TriageConfig, load_config, write_config};
use bisectbot::io::diagnostics::{NimDiagnostics, host_tool_versions};
use bisectbot::io::exec::ShellExec;
use bisectbot::io::git::Git;
use bisectbot::io::sandbox::{SandboxPaths, ShellSandbox};
use bisectbot::io::toolchain::{ActiveToolchain, ManagerSwitch};
use bisectbot::logging;
use bisectbot::report::ReportParts;
use bisectbot::resolve::Resolver;
use bisectbot::triage::Triage;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

#[derive(Parser)]
#[command(
    name = "bisectbot",
    version,
    about = "Regression triage and commit bisection for the Nim toolchain"
)]
struct Cli {
    /// Config file; defaults apply when it does not exist.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config file if missing.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Print the commit id a version label resolves to.
    Resolve { label: String },
    /// Run the matrix sweep and bisection for a request comment.
    Triage {
        /// Request body file, or `-` for stdin.
        #[arg(long)]
        request: String,
        /// Requester's association with the repository (owner, member, ...).
        #[arg(long)]
        association: Option<String>,
        /// Requester's login.
        #[arg(long)]
        login: Option<String>,
        /// Print the report as JSON instead of markdown.
        #[arg(long)]
        json: bool,
        /// Write the report to this file instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force } => cmd_init(&cli.config, force),
        Command::Resolve { label } => cmd_resolve(&load_config(&cli.config)?, &label),
        Command::Triage {
            request,
            association,
            login,
            json,
            out,
        } => cmd_triage(
            &load_config(&cli.config)?,
            &TriageArgs {
                request,
                association,
                login,
                json,
                out,
            },
        ),
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if !force && path.exists() {
        info!(path = %path.display(), "config already present");
        return Ok(exit_codes::OK);
    }
    write_config(path, &TriageConfig::default())?;
    Ok(exit_codes::OK)
}

fn cmd_resolve(cfg: &TriageConfig, raw: &str) -> Result<i32> {
    let label = cfg.label(raw);
    let resolver = Resolver::from_config(cfg);
    let shell = ShellExec::for_triage(cfg, Utc::now().timestamp());
    let git = Git::new(cfg.checkout_path());
    if !label.is_floating() && resolver.pinned(&label).is_none() {
        git.ensure_cloned(&cfg.source.repo_url, &cfg.source.default_branch)?;
    }
    let mut toolchain = ActiveToolchain::from_config(switch_for(&shell, cfg), cfg);
    let commit = resolver.resolve(&label, &mut toolchain, &git)?;
    println!("{commit}");
    Ok(exit_codes::OK)
}

struct TriageArgs {
    request: String,
    association: Option<String>,
    login: Option<String>,
    json: bool,
    out: Option<PathBuf>,
}

fn cmd_triage(cfg: &TriageConfig, args: &TriageArgs) -> Result<i32> {
    let association = args.association.clone().unwrap_or_default();
    let login = args.login.clone().unwrap_or_default();
    if !is_authorized(
        &association,
        &login,
        cfg.access.allow_all,
        &cfg.access.privileged_logins,
    ) {
        return Err(IntakeError::Unauthorized.into());
    }
    let body = read_request(&args.request)?;
    let request = parse_request(&body, &cfg.sandbox.input_file, cfg!(windows))?;

    let started_at = Utc::now();
    let shell = ShellExec::for_triage(cfg, started_at.timestamp());
    let paths = SandboxPaths::new(
        cfg.sandbox.workdir.clone(),
        &cfg.sandbox.input_file,
        &cfg.sandbox.output_file,
    );
    let sandbox = ShellSandbox::new(shell.clone(), paths.clone(), request.command.instrumented);
    sandbox.reset()?;
    sandbox.write_auxiliary(&request.auxiliary)?;
    let diagnostics = NimDiagnostics::new(shell.clone(), &paths, cfg);
    let mut toolchain = ActiveToolchain::from_config(switch_for(&shell, cfg), cfg);

    let git = Git::new(cfg.checkout_path());
    if let Err(err) = git.ensure_cloned(&cfg.source.repo_url, &cfg.source.default_branch) {
        warn!(err = %err, "source checkout unavailable; bisection may be inconclusive");
    }
    let host_tools = host_tool_versions(&shell, &cfg.toolchain.host_tools);

    let outcome = Triage {
        cfg,
        toolchain: &mut toolchain,
        history: &git,
        sandbox: &sandbox,
        diagnostics: &diagnostics,
    }
    .run(&request);

    let report = ReportParts {
        requester: args.login.clone(),
        association: args.association.as_deref().map(str::to_lowercase),
        command: request.command.template.clone(),
        started_at,
        host_tools,
        commit_url_prefix: cfg.source.commit_url_prefix.clone(),
    }
    .finish(outcome.sweep, outcome.bisect);
    eprintln!("{}", report.bisect.explanation());

    let rendered = if args.json {
        report.render_json()?
    } else {
        report.render_markdown()?
    };
    match &args.out {
        Some(path) => {
            fs::write(path, rendered).with_context(|| format!("write {}", path.display()))?;
        }
        None => print!("{rendered}"),
    }
    Ok(report.exit_code())
}

/// Switch primitive sharing the sandbox environment, with its own timeout.
fn switch_for(shell: &ShellExec, cfg: &TriageConfig) -> ManagerSwitch<ShellExec> {
    let exec = shell
        .clone()
        .with_timeout(Duration::from_secs(cfg.switch.timeout_secs));
    ManagerSwitch::new(exec, cfg)
}

fn read_request(source: &str) -> Result<String> {
    if source == "-" {
        let mut body = String::new();
        std::io::stdin()
            .read_to_string(&mut body)
            .context("read request from stdin")?;
        return Ok(body);
    }
    fs::read_to_string(source).with_context(|| format!("read request {source}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["bisectbot", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true }));
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_FILE));
    }

    #[test]
    fn parse_triage_with_global_config() {
        let cli = Cli::parse_from([
            "bisectbot",
            "triage",
            "--request",
            "-",
            "--login",
            "juan",
            "--json",
            "--config",
            "ci.toml",
        ]);
        assert_eq!(cli.config, PathBuf::from("ci.toml"));
        match cli.command {
            Command::Triage {
                request,
                login,
                json,
                out,
                ..
            } => {
                assert_eq!(request, "-");
                assert_eq!(login.as_deref(), Some("juan"));
                assert!(json);
                assert!(out.is_none());
            }
            _ => panic!("expected triage"),
        }
    }

    #[test]
    fn parse_resolve_label() {
        let cli = Cli::parse_from(["bisectbot", "resolve", "1.6.14"]);
        assert!(matches!(cli.command, Command::Resolve { ref label } if label == "1.6.14"));
    }

    #[test]
    fn init_writes_loadable_config() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("bisectbot.toml");
        assert_eq!(cmd_init(&path, false).expect("init"), exit_codes::OK);
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg, TriageConfig::default());
    }
}
