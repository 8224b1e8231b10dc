use crate::config::loader::load_request;
use crate::config::types::{ErrorCode, JudgeConfig};
use crate::judge::registry::PolicyRegistry;
use crate::judge::Judge;
use crate::kernel::process;
use crate::kernel::seccomp::{detect_confinement, is_seccomp_supported};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one request and print its result as JSON
    Run {
        /// Request file (JSON); `-` reads standard input
        #[arg(long, value_name = "FILE")]
        request: PathBuf,
        /// Directory of additional policy files
        #[arg(long, env = "JUDGEBOX_POLICY_DIR")]
        policy_dir: Option<PathBuf>,
        /// Pretty-print the result
        #[arg(long)]
        pretty: bool,
    },
    /// List the available syscall policies
    Policies {
        /// Directory of additional policy files
        #[arg(long, env = "JUDGEBOX_POLICY_DIR")]
        policy_dir: Option<PathBuf>,
    },
    /// Report what this host can enforce
    Check,
}

fn load_registry(policy_dir: Option<&Path>) -> Result<PolicyRegistry> {
    match policy_dir {
        Some(dir) => PolicyRegistry::load(dir)
            .with_context(|| format!("loading policies from {}", dir.display())),
        None => Ok(PolicyRegistry::builtin()),
    }
}

fn read_request(path: &Path) -> Result<JudgeConfig> {
    if path == Path::new("-") {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("reading request from stdin")?;
        return serde_json::from_str(&text).context("parsing request from stdin");
    }
    load_request(path).with_context(|| format!("loading request {}", path.display()))
}

fn run_request(request: &Path, policy_dir: Option<&Path>, pretty: bool) -> Result<()> {
    let config = read_request(request)?;
    let registry = Arc::new(load_registry(policy_dir)?);
    let judge = Judge::new(registry);
    let result = judge.launch(&config);

    let json = if pretty {
        serde_json::to_string_pretty(&result)?
    } else {
        serde_json::to_string(&result)?
    };
    println!("{}", json);

    if result.error != ErrorCode::Success {
        std::process::exit(1);
    }
    Ok(())
}

fn list_policies(policy_dir: Option<&Path>) -> Result<()> {
    let registry = load_registry(policy_dir)?;
    for policy in registry.iter() {
        println!(
            "{:<16} {:<10} {:>3} syscalls  read_only_open={} restrict_execve={}",
            policy.name,
            format!("{:?}", policy.mode).to_lowercase(),
            policy.syscalls.len(),
            policy.read_only_open,
            policy.restrict_execve
        );
    }
    Ok(())
}

/// Whether this process can reap orphaned descendants, setting the flag
/// if needed and reading it back
fn subreaper_status() -> String {
    if process::is_subreaper() {
        return "active".to_string();
    }
    match process::become_subreaper() {
        Ok(()) if process::is_subreaper() => "set for this process".to_string(),
        Ok(()) => "unsupported (flag did not stick)".to_string(),
        Err(e) => format!("unsupported ({})", e),
    }
}

fn check_host() -> Result<()> {
    let euid = nix::unistd::geteuid();
    println!("arch:            {}", std::env::consts::ARCH);
    println!("euid:            {}", euid);
    println!("seccomp:         {}", is_seccomp_supported());
    println!("confinement:     {}", detect_confinement().name());
    println!("subreaper:       {}", subreaper_status());
    if !euid.is_root() {
        println!("note: running as non-root, requests must use the caller's uid/gid");
    }
    Ok(())
}

pub fn run() -> Result<()> {
    env_logger::init();

    if !cfg!(target_os = "linux") {
        anyhow::bail!("judgebox requires Linux (seccomp, rlimits, /proc)");
    }

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            request,
            policy_dir,
            pretty,
        } => run_request(&request, policy_dir.as_deref(), pretty),
        Commands::Policies { policy_dir } => list_policies(policy_dir.as_deref()),
        Commands::Check => check_host(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_run_arguments() {
        let cli = Cli::try_parse_from([
            "judgebox",
            "run",
            "--request",
            "req.json",
            "--pretty",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                request, pretty, ..
            } => {
                assert_eq!(request, PathBuf::from("req.json"));
                assert!(pretty);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn run_requires_request() {
        assert!(Cli::try_parse_from(["judgebox", "run"]).is_err());
    }

    #[test]
    fn subreaper_status_reflects_the_flag() {
        let status = subreaper_status();
        if status.starts_with("unsupported") {
            return;
        }
        assert!(process::is_subreaper());
        assert_eq!(subreaper_status(), "active");
    }

    #[test]
    fn missing_policy_dir_is_an_error() {
        assert!(load_registry(Some(Path::new("/nonexistent-judgebox-policies"))).is_err());
    }
}
