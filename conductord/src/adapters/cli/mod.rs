// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::PathBuf;

use clap::{CommandFactory, FromArgMatches, Parser};

#[derive(Parser, Debug)]
#[command(
    name = "conductord",
    version,
    about = "Job lifecycle orchestrator for HPC computation backends",
    long_about = None,
    after_help = "Configuration precedence: defaults < config file < command-line flags.\n\
Config path precedence: defaults < CONDUCTOR_CONFIG_PATH < command-line flags.\n\
If --config is omitted, conductord tries CONDUCTOR_CONFIG_PATH, then the default config file location; missing default config is OK.\n\
Paths in the config file are resolved relative to the config file directory; paths passed as flags are resolved relative to the current working directory."
)]
pub struct Opts {
    #[arg(
        short,
        long,
        value_name = "PATH",
        help = "Path to a TOML config file. When omitted, conductord uses CONDUCTOR_CONFIG_PATH if set, otherwise the default config file location if available."
    )]
    pub config: Option<PathBuf>,
    #[arg(
        long,
        value_name = "PATH",
        help = "Path to the SQLite database file. Overrides `database_path` from the config file."
    )]
    pub database_path: Option<PathBuf>,
    #[arg(
        long,
        value_name = "DIR",
        help = "Root directory of user file storage. Overrides `storage_root` from the config file."
    )]
    pub storage_root: Option<PathBuf>,
    #[arg(
        long,
        value_name = "PATH",
        help = "Path to the application catalog. Overrides `catalog_path` from the config file."
    )]
    pub catalog_path: Option<PathBuf>,
    #[arg(
        long,
        value_name = "NAME",
        help = "Backend used when a start request names none. Overrides `default_backend` from the config file."
    )]
    pub default_backend: Option<String>,
    #[arg(
        long,
        value_name = "SECS",
        help = "How often to poll the scheduler for job states. Overrides `poll_interval_secs` from the config file."
    )]
    pub poll_interval_secs: Option<u64>,
    #[arg(
        long,
        value_name = "SECS",
        help = "How often to fail jobs that exceeded the maximum age. Overrides `expiry_sweep_interval_secs` from the config file."
    )]
    pub expiry_sweep_interval_secs: Option<u64>,
    #[arg(
        long,
        value_name = "DIR",
        help = "Directory holding Slurm job workspaces. Overrides `slurm.workspace_root` from the config file."
    )]
    pub slurm_workspace_root: Option<PathBuf>,
    #[arg(
        short,
        long,
        action = clap::ArgAction::SetTrue,
        help = "Enable debug logging and include logs from dependencies. Overrides `verbose` from the config file."
    )]
    pub verbose: bool,
}

pub struct ParsedOpts {
    pub opts: Opts,
    pub verbose_override: Option<bool>,
}

const HELP_TEMPLATE: &str = "\
{name} {version}
{before-help}{about-with-newline}{usage-heading} {usage}
{after-help}

{all-args}
";

pub fn cli_command() -> clap::Command {
    Opts::command().help_template(HELP_TEMPLATE)
}

pub fn parse_opts() -> ParsedOpts {
    parse_from(std::env::args_os())
}

fn parse_from<I, T>(args: I) -> ParsedOpts
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let matches = cli_command().get_matches_from(args);
    // Absent flag means "not overridden", not "false".
    let verbose_override = matches.get_flag("verbose").then_some(true);
    let opts = Opts::from_arg_matches(&matches).unwrap_or_else(|err| err.exit());
    ParsedOpts {
        opts,
        verbose_override,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_definition_is_consistent() {
        cli_command().debug_assert();
    }

    #[test]
    fn verbose_is_only_an_override_when_given() {
        let parsed = parse_from(["conductord"]);
        assert_eq!(parsed.verbose_override, None);
        assert!(parsed.opts.config.is_none());

        let parsed = parse_from([
            "conductord",
            "-v",
            "--poll-interval-secs",
            "2",
            "--default-backend",
            "slurm",
            "--slurm-workspace-root",
            "/scratch/ws",
        ]);
        assert_eq!(parsed.verbose_override, Some(true));
        assert_eq!(parsed.opts.poll_interval_secs, Some(2));
        assert_eq!(parsed.opts.default_backend.as_deref(), Some("slurm"));
        assert_eq!(
            parsed.opts.slurm_workspace_root,
            Some(PathBuf::from("/scratch/ws"))
        );
    }
}
