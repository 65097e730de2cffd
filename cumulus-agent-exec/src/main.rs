mod bootstrap;

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitCode};

use anyhow::{Context, Result, bail};
use cumulus_ssh_agent::{Agent, AgentConfig, AgentHost};
use serde::Deserialize;
use zeroize::Zeroizing;

const DEFAULT_PASSPHRASE_ENV: &str = "CUMULUS_KEY_PASSPHRASE";

const USAGE: &str = "\
Usage: cumulus-agent-exec [-c <config>] --key <path> [--passphrase-env <VAR>] -- <command> [args...]

Options:
  -c, --config <path>         TOML file with an [agent] table
  -k, --key <path>            Private key to serve
      --passphrase-env <VAR>  Variable holding the key passphrase (default: CUMULUS_KEY_PASSPHRASE)
  -h, --help                  Show this help message";

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    bootstrap::secure_bootstrap();

    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<ExitCode> {
    let args = match parse_args(std::env::args_os().skip(1))? {
        Parsed::Help => {
            eprintln!("{USAGE}");
            return Ok(ExitCode::SUCCESS);
        }
        Parsed::Run(args) => args,
    };

    let config = match &args.config {
        Some(path) => load_config(path)?.agent,
        None => AgentConfig::default(),
    };

    let passphrase = Zeroizing::new(
        std::env::var_os(&args.passphrase_env)
            .map(|v| v.into_encoded_bytes())
            .unwrap_or_default(),
    );
    let agent = Agent::with_config(&args.key, &passphrase, config)
        .with_context(|| format!("failed to load key {}", args.key.display()))?;
    drop(passphrase);

    let host = AgentHost::start(agent).context("failed to start SSH agent")?;
    tracing::info!(
        fingerprint = %host.agent().store().fingerprint_sha256(),
        socket = %host.socket_path().display(),
        "serving key"
    );

    let mut cmd = Command::new(&args.command[0]);
    cmd.args(&args.command[1..]).env_remove(&args.passphrase_env);
    let status = host
        .apply_to(&mut cmd)
        .status()
        .with_context(|| format!("failed to run {}", args.command[0].to_string_lossy()));
    host.shutdown();

    let status = status?;
    tracing::debug!(%status, "child exited");
    Ok(ExitCode::from(exit_code(status)))
}

/// Child's exit code, or 128 + signal as shells report it.
fn exit_code(status: std::process::ExitStatus) -> u8 {
    use std::os::unix::process::ExitStatusExt as _;

    let code = status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(1);
    u8::try_from(code).unwrap_or(1)
}

#[derive(Debug, PartialEq)]
struct Args {
    config: Option<PathBuf>,
    key: PathBuf,
    passphrase_env: OsString,
    command: Vec<OsString>,
}

#[derive(Debug, PartialEq)]
enum Parsed {
    Help,
    Run(Args),
}

fn parse_args(args: impl IntoIterator<Item = OsString>) -> Result<Parsed> {
    let mut args = args.into_iter();
    let mut config = None;
    let mut key = None;
    let mut passphrase_env = OsString::from(DEFAULT_PASSPHRASE_ENV);
    let mut command = Vec::new();

    while let Some(arg) = args.next() {
        let Some(flag) = arg.to_str() else {
            bail!("unexpected argument {}\n\n{USAGE}", arg.to_string_lossy());
        };
        match flag {
            "-c" | "--config" => config = Some(PathBuf::from(value(&mut args, flag)?)),
            "-k" | "--key" => key = Some(PathBuf::from(value(&mut args, flag)?)),
            "--passphrase-env" => passphrase_env = value(&mut args, flag)?,
            "-h" | "--help" => return Ok(Parsed::Help),
            "--" => {
                command.extend(args.by_ref());
                break;
            }
            other => {
                if let Some(path) = other.strip_prefix("--config=") {
                    config = Some(PathBuf::from(path));
                } else if let Some(path) = other.strip_prefix("--key=") {
                    key = Some(PathBuf::from(path));
                } else if let Some(var) = other.strip_prefix("--passphrase-env=") {
                    passphrase_env = OsString::from(var);
                } else {
                    bail!("unexpected argument {other}\n\n{USAGE}");
                }
            }
        }
    }

    let Some(key) = key else {
        bail!("--key is required\n\n{USAGE}");
    };
    if command.is_empty() {
        bail!("no command given after --\n\n{USAGE}");
    }
    Ok(Parsed::Run(Args {
        config,
        key,
        passphrase_env,
        command,
    }))
}

fn value(args: &mut impl Iterator<Item = OsString>, flag: &str) -> Result<OsString> {
    args.next()
        .with_context(|| format!("{flag} requires an argument"))
}

#[derive(Debug, Deserialize)]
struct LauncherConfig {
    #[serde(default)]
    agent: AgentConfig,
}

fn load_config(path: &Path) -> Result<LauncherConfig> {
    // The file may name key locations and socket directories; keep it 0600.
    {
        use std::os::unix::fs::MetadataExt;
        match std::fs::metadata(path) {
            Ok(meta) => {
                let mode = meta.mode();
                if mode & 0o077 != 0 {
                    tracing::warn!(
                        path = %path.display(),
                        mode = format!("{:o}", mode & 0o777),
                        "config file is readable by group or others; recommend: chmod 600 {}",
                        path.display()
                    );
                }
            }
            Err(e) => {
                tracing::warn!("could not check config file permissions: {e}");
            }
        }
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: LauncherConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse config {}", path.display()))?;
    tracing::info!("loaded config from {}", path.display());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cumulus_ssh_agent::SignaturePolicy;

    fn parse(args: &[&str]) -> Result<Parsed> {
        parse_args(args.iter().map(OsString::from))
    }

    #[test]
    fn parses_full_command_line() {
        let parsed = parse(&[
            "-c",
            "/etc/cumulus.toml",
            "--key=/keys/id_rsa",
            "--passphrase-env",
            "MY_PASS",
            "--",
            "ssh",
            "-T",
            "git@example.com",
        ])
        .unwrap();

        assert_eq!(
            parsed,
            Parsed::Run(Args {
                config: Some(PathBuf::from("/etc/cumulus.toml")),
                key: PathBuf::from("/keys/id_rsa"),
                passphrase_env: OsString::from("MY_PASS"),
                command: vec!["ssh".into(), "-T".into(), "git@example.com".into()],
            })
        );
    }

    #[test]
    fn flags_after_separator_belong_to_the_command() {
        let Parsed::Run(args) = parse(&["--key", "k", "--", "git", "--help"]).unwrap() else {
            panic!("expected a run");
        };
        assert_eq!(args.command, vec![OsString::from("git"), OsString::from("--help")]);
        assert_eq!(args.passphrase_env, OsString::from(DEFAULT_PASSPHRASE_ENV));
        assert_eq!(args.config, None);
    }

    #[test]
    fn help_short_circuits() {
        assert_eq!(parse(&["--key", "k", "-h"]).unwrap(), Parsed::Help);
    }

    #[test]
    fn rejects_incomplete_command_lines() {
        assert!(parse(&["--", "ssh"]).is_err());
        assert!(parse(&["--key", "k"]).is_err());
        assert!(parse(&["--key"]).is_err());
        assert!(parse(&["--bogus", "--key", "k", "--", "ssh"]).is_err());
    }

    #[test]
    fn config_file_agent_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[agent]\ncomment = \"deploy\"\nsignature_policy = \"honor-flags\"\n",
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.agent.comment, "deploy");
        assert_eq!(config.agent.signature_policy, SignaturePolicy::HonorFlags);

        std::fs::write(&path, "").unwrap();
        assert_eq!(load_config(&path).unwrap().agent, AgentConfig::default());
    }

    #[test]
    fn missing_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(&dir.path().join("absent.toml")).is_err());
    }

    #[test]
    fn signal_deaths_map_to_shell_codes() {
        use std::os::unix::process::ExitStatusExt as _;

        assert_eq!(exit_code(std::process::ExitStatus::from_raw(0)), 0);
        // raw wait status: exit code in the high byte, signal in the low bits
        assert_eq!(exit_code(std::process::ExitStatus::from_raw(3 << 8)), 3);
        assert_eq!(exit_code(std::process::ExitStatus::from_raw(9)), 137);
    }
}
