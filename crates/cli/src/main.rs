//! mergestage command-line entry point.
//!
//! Rebuilds the integration branch from approved pull requests and reports
//! whether new integration content was pushed. Also generates and validates
//! configuration files and checks conflict-rule documents.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use mergestage_core::config::AppConfig;
use mergestage_core::conflict::RuleSet;
use mergestage_core::git::{GitClient, GitHubClient};
use mergestage_core::Integrator;

/// File the GitHub Actions runner collects step outputs from.
const GITHUB_OUTPUT_ENV: &str = "GITHUB_OUTPUT";

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Squash-merge approved pull requests into an integration branch.
#[derive(Parser, Debug)]
#[command(
    name = "mergestage",
    version,
    about = "Squash-merge approved pull requests into an integration branch"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, global = true, default_value = "mergestage.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Rebuild the integration branch and push it when it changed.
    Run(RunArgs),

    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./mergestage.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate,

    /// Parse a conflict-rules document and list its rules.
    CheckRules {
        /// Path to the rules document (TOML, or JSON by extension).
        path: PathBuf,
    },
}

/// Overrides for `run`; each one replaces the configured value.
#[derive(Args, Debug, Default)]
struct RunArgs {
    /// Repository as `owner/repo`.
    #[arg(long)]
    repository: Option<String>,

    #[arg(long)]
    base_branch: Option<String>,

    #[arg(long)]
    integration_branch: Option<String>,

    /// Label a pull request needs to be integrated.
    #[arg(long)]
    approve_label: Option<String>,

    /// Label applied to integrated pull requests.
    #[arg(long)]
    integrated_label: Option<String>,

    /// Conflict rules document, relative to the repository root.
    #[arg(long)]
    rules_file: Option<PathBuf>,

    /// Tracing filter, e.g. `debug` or `mergestage_core=trace`.
    #[arg(long)]
    log_level: Option<String>,
}

impl RunArgs {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(repo) = &self.repository {
            config.github.repo = repo.clone();
        }
        let integration = &mut config.integration;
        if let Some(branch) = &self.base_branch {
            integration.base_branch = branch.clone();
        }
        if let Some(branch) = &self.integration_branch {
            integration.integration_branch = branch.clone();
        }
        if let Some(label) = &self.approve_label {
            integration.approve_label = label.clone();
        }
        if let Some(label) = &self.integrated_label {
            integration.integrated_label = label.clone();
        }
        if let Some(path) = &self.rules_file {
            integration.rules_file = Some(path.clone());
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run(args) => cmd_run(&cli.config, &args).await,
        Commands::Init { output } => {
            init_tracing(None, "warn");
            cmd_init(&output)
        }
        Commands::Validate => {
            init_tracing(None, "warn");
            cmd_validate(&cli.config)
        }
        Commands::CheckRules { path } => {
            init_tracing(None, "warn");
            cmd_check_rules(&path)
        }
    }
}

/// An explicit level wins over `RUST_LOG`, which wins over `fallback`.
fn init_tracing(level: Option<&str>, fallback: &str) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

async fn cmd_run(config_path: &Path, args: &RunArgs) -> Result<()> {
    let mut config = if config_path.exists() {
        AppConfig::load_from_file(config_path).context("failed to load configuration file")?
    } else {
        AppConfig::default()
    };
    args.apply(&mut config);
    init_tracing(args.log_level.as_deref(), &config.logging.level);

    config
        .resolve_env_vars()
        .context("failed to resolve environment variables")?;
    config.validate().context("invalid configuration")?;

    let token = config
        .github
        .token
        .clone()
        .context("GitHub token is not set")?;
    let host = GitHubClient::new(&config.github.api_url, &config.github.repo, token)
        .context("failed to create GitHub client")?;
    let vcs = GitClient::new(
        config.integration.committer_name.clone(),
        config.integration.committer_email.clone(),
    );

    info!(repo = %config.github.repo, "starting integration");
    let integrator = Integrator::new(
        config.integration.clone(),
        config.github.clone_url(),
        Arc::new(vcs),
        Arc::new(host),
    );
    let report = integrator.run().await.context("integration failed")?;

    let have_updates = if report.has_updates() { "yes" } else { "no" };
    println!("haveUpdates: {}", have_updates);
    write_step_output("haveUpdates", have_updates)?;
    Ok(())
}

/// Append `name=value` to the step output file, when running under Actions.
fn write_step_output(name: &str, value: &str) -> Result<()> {
    let Some(path) = std::env::var_os(GITHUB_OUTPUT_ENV) else {
        return Ok(());
    };
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open {}", Path::new(&path).display()))?;
    writeln!(file, "{}={}", name, value).context("failed to write step output")?;
    Ok(())
}

fn cmd_init(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, AppConfig::default_toml()).context("failed to write config file")?;

    println!("Default configuration written to {}", output.display());
    println!();
    println!("Next steps:");
    println!("  1. Set github.repo and the integration branch names");
    println!("  2. Export the token variable named by github.token_env (GITHUB_TOKEN)");
    println!(
        "  3. Validate with: mergestage validate --config {}",
        output.display()
    );
    println!("  4. Run: mergestage run --config {}", output.display());

    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let mut config =
        AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    config
        .resolve_env_vars()
        .context("failed to resolve environment variables")?;
    println!("  [OK] Environment variable references processed");

    match config.validate() {
        Ok(()) => println!("  [OK] All required fields are valid"),
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            anyhow::bail!("configuration validation failed");
        }
    }

    let integration = &config.integration;
    println!();
    println!("Configuration summary:");
    println!("  GitHub repo        : {}", config.github.repo);
    println!(
        "  GitHub token       : {}",
        if config.github.token.is_some() {
            "set"
        } else {
            "NOT SET"
        }
    );
    println!("  Base branch        : {}", integration.base_branch);
    println!("  Integration branch : {}", integration.integration_branch);
    println!("  Approve label      : {}", integration.approve_label);
    println!("  Integrated label   : {}", integration.integrated_label);
    println!(
        "  Rules file         : {}",
        integration
            .rules_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "none".into())
    );
    println!("  Max proposals      : {}", integration.max_proposals);
    println!();
    println!("Configuration is valid.");

    Ok(())
}

fn cmd_check_rules(path: &Path) -> Result<()> {
    let rules = RuleSet::load(path)
        .with_context(|| format!("failed to load conflict rules from {}", path.display()))?;

    if rules.is_empty() {
        println!("No rules defined in {}.", path.display());
        return Ok(());
    }

    println!("{:<40} PATTERNS", "FILE");
    println!("{}", "-".repeat(80));
    for rule in rules.iter() {
        let patterns: Vec<&str> = rule.ignore_lines.iter().map(|re| re.as_str()).collect();
        let patterns = if patterns.is_empty() {
            "(three-way retry)".to_string()
        } else {
            patterns.join("  ")
        };
        println!("{:<40} {}", rule.target_file, patterns);
    }
    println!();
    println!("{} rule(s) loaded", rules.len());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_overrides_replace_config() {
        let mut config = AppConfig::default();
        let args = RunArgs {
            repository: Some("acme/webapp".into()),
            integration_branch: Some("preview".into()),
            approve_label: Some("Ready".into()),
            rules_file: Some(PathBuf::from(".github/rules.toml")),
            ..Default::default()
        };
        args.apply(&mut config);

        assert_eq!(config.github.repo, "acme/webapp");
        assert_eq!(config.integration.integration_branch, "preview");
        assert_eq!(config.integration.approve_label, "Ready");
        assert_eq!(config.integration.base_branch, "main");
        assert_eq!(
            config.integration.rules_file,
            Some(PathBuf::from(".github/rules.toml"))
        );
    }

    #[test]
    fn test_cli_parses_run_flags() {
        let cli = Cli::try_parse_from([
            "mergestage",
            "run",
            "--base-branch",
            "develop",
            "--integrated-label",
            "Staged",
        ])
        .unwrap();
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.base_branch.as_deref(), Some("develop"));
                assert_eq!(args.integrated_label.as_deref(), Some("Staged"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
        assert_eq!(cli.config, PathBuf::from("mergestage.toml"));
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mergestage.toml");
        cmd_init(&path).unwrap();
        assert!(AppConfig::load_from_file(&path).is_ok());
        assert!(cmd_init(&path).is_err());
    }

    #[test]
    fn test_check_rules_reports_invalid_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.toml");
        std::fs::write(&path, "[VERSION]\nignore_lines = [\"(\"]\n").unwrap();
        assert!(cmd_check_rules(&path).is_err());

        std::fs::write(&path, "[VERSION]\nignore_lines = [\"^version=.*\"]\n").unwrap();
        assert!(cmd_check_rules(&path).is_ok());
    }
}
