// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

const APP_DIR_NAME: &str = "conductor";
const CONFIG_FILE_NAME: &str = "conductor.toml";
const CONFIG_ENV_VAR: &str = "CONDUCTOR_CONFIG_PATH";
const DATABASE_FILE_NAME: &str = "conductor.sqlite";
const STORAGE_DIR_NAME: &str = "storage";
const WORKSPACES_DIR_NAME: &str = "workspaces";
const CATALOG_FILE_NAME: &str = "applications.toml";
const DEFAULT_BACKEND: &str = "slurm";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
const DEFAULT_EXPIRY_SWEEP_INTERVAL_SECS: u64 = 300;
const DEFAULT_JOB_MAX_TIME_SECS: u64 = 200 * 60 * 60;
const DEFAULT_SLURM_PRINCIPAL: &str = "_slurm";

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    database_path: Option<String>,
    storage_root: Option<String>,
    catalog_path: Option<String>,
    default_backend: Option<String>,
    poll_interval_secs: Option<u64>,
    expiry_sweep_interval_secs: Option<u64>,
    job_max_time_secs: Option<u64>,
    verbose: Option<bool>,
    #[serde(default)]
    slurm: FileSlurmConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSlurmConfig {
    principal: Option<String>,
    workspace_root: Option<String>,
    partition: Option<String>,
    account: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SlurmConfig {
    pub principal: String,
    pub workspace_root: PathBuf,
    pub partition: Option<String>,
    pub account: Option<String>,
}

#[derive(Debug)]
pub struct Config {
    pub database_path: PathBuf,
    pub storage_root: PathBuf,
    pub catalog_path: PathBuf,
    pub default_backend: String,
    pub poll_interval_secs: u64,
    pub expiry_sweep_interval_secs: u64,
    pub job_max_time_secs: u64,
    pub verbose: bool,
    pub slurm: SlurmConfig,
    pub config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Override,
    Env,
    ConfigFile,
    Default,
}

impl ConfigSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfigSource::Override => "override",
            ConfigSource::Env => "env",
            ConfigSource::ConfigFile => "config",
            ConfigSource::Default => "default",
        }
    }
}

#[derive(Debug)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

#[derive(Debug)]
pub struct ConfigReport {
    pub config_path: Option<PathBuf>,
    pub config_path_source: Option<ConfigSource>,
    pub config_file_present: bool,
    pub database_path: ConfigValue<PathBuf>,
    pub storage_root: ConfigValue<PathBuf>,
    pub catalog_path: ConfigValue<PathBuf>,
    pub default_backend: ConfigValue<String>,
    pub poll_interval_secs: ConfigValue<u64>,
    pub expiry_sweep_interval_secs: ConfigValue<u64>,
    pub job_max_time_secs: ConfigValue<u64>,
    pub verbose: ConfigValue<bool>,
    pub slurm_principal: ConfigValue<String>,
    pub slurm_workspace_root: ConfigValue<PathBuf>,
}

#[derive(Debug)]
pub struct LoadResult {
    pub config: Config,
    pub report: ConfigReport,
}

#[derive(Debug, Default)]
pub struct Overrides {
    pub database_path: Option<PathBuf>,
    pub storage_root: Option<PathBuf>,
    pub catalog_path: Option<PathBuf>,
    pub default_backend: Option<String>,
    pub poll_interval_secs: Option<u64>,
    pub expiry_sweep_interval_secs: Option<u64>,
    pub slurm_workspace_root: Option<PathBuf>,
    pub verbose: Option<bool>,
}

pub fn load(config_path_override: Option<PathBuf>, overrides: Overrides) -> Result<Config> {
    Ok(load_with_report(config_path_override, overrides)?.config)
}

pub fn load_with_report(
    config_path_override: Option<PathBuf>,
    overrides: Overrides,
) -> Result<LoadResult> {
    let (config_path, config_path_source, required) = match config_path_override {
        Some(path) => (Some(expand_path(path)), Some(ConfigSource::Override), true),
        None => match config_path_from_env()? {
            Some(path) => (Some(expand_path(path)), Some(ConfigSource::Env), true),
            None => match default_config_path().ok() {
                Some(path) => (Some(path), Some(ConfigSource::Default), false),
                None => (None, None, false),
            },
        },
    };
    let config_file_present = config_path
        .as_deref()
        .map(|path| path.exists())
        .unwrap_or(false);

    let file_config = match config_path.as_deref() {
        Some(path) => read_config_file(path, required)?,
        None => FileConfig::default(),
    };
    let base_dir = config_path.as_deref().and_then(|path| path.parent());

    let database_path = layered_path(
        overrides.database_path,
        file_config.database_path,
        base_dir,
        || default_data_path(DATABASE_FILE_NAME),
        "database_path",
    )?;
    let storage_root = layered_path(
        overrides.storage_root,
        file_config.storage_root,
        base_dir,
        || default_data_path(STORAGE_DIR_NAME),
        "storage_root",
    )?;
    let catalog_path = layered_path(
        overrides.catalog_path,
        file_config.catalog_path,
        base_dir,
        || Ok(default_config_dir()?.join(CATALOG_FILE_NAME)),
        "catalog_path",
    )?;
    let slurm_workspace_root = layered_path(
        overrides.slurm_workspace_root,
        file_config.slurm.workspace_root,
        base_dir,
        || default_data_path(WORKSPACES_DIR_NAME),
        "slurm.workspace_root",
    )?;

    let default_backend = layered(
        overrides.default_backend,
        file_config.default_backend,
        DEFAULT_BACKEND.to_string(),
    );
    if default_backend.value.trim().is_empty() {
        anyhow::bail!("default_backend must not be empty");
    }
    let slurm_principal = layered(
        None,
        file_config.slurm.principal,
        DEFAULT_SLURM_PRINCIPAL.to_string(),
    );
    if slurm_principal.value.trim().is_empty() {
        anyhow::bail!("slurm.principal must not be empty");
    }

    let poll_interval_secs = layered(
        overrides.poll_interval_secs,
        file_config.poll_interval_secs,
        DEFAULT_POLL_INTERVAL_SECS,
    );
    let expiry_sweep_interval_secs = layered(
        overrides.expiry_sweep_interval_secs,
        file_config.expiry_sweep_interval_secs,
        DEFAULT_EXPIRY_SWEEP_INTERVAL_SECS,
    );
    let job_max_time_secs = layered(
        None,
        file_config.job_max_time_secs,
        DEFAULT_JOB_MAX_TIME_SECS,
    );
    for (name, value) in [
        ("poll_interval_secs", poll_interval_secs.value),
        ("expiry_sweep_interval_secs", expiry_sweep_interval_secs.value),
        ("job_max_time_secs", job_max_time_secs.value),
    ] {
        if value == 0 {
            anyhow::bail!("{name} must be greater than zero");
        }
    }
    let verbose = layered(overrides.verbose, file_config.verbose, false);

    let config = Config {
        database_path: database_path.value.clone(),
        storage_root: storage_root.value.clone(),
        catalog_path: catalog_path.value.clone(),
        default_backend: default_backend.value.clone(),
        poll_interval_secs: poll_interval_secs.value,
        expiry_sweep_interval_secs: expiry_sweep_interval_secs.value,
        job_max_time_secs: job_max_time_secs.value,
        verbose: verbose.value,
        slurm: SlurmConfig {
            principal: slurm_principal.value.clone(),
            workspace_root: slurm_workspace_root.value.clone(),
            partition: file_config.slurm.partition,
            account: file_config.slurm.account,
        },
        config_path: config_path.clone(),
    };

    let report = ConfigReport {
        config_path,
        config_path_source,
        config_file_present,
        database_path,
        storage_root,
        catalog_path,
        default_backend,
        poll_interval_secs,
        expiry_sweep_interval_secs,
        job_max_time_secs,
        verbose,
        slurm_principal,
        slurm_workspace_root,
    };

    Ok(LoadResult { config, report })
}

/// Creates the directories the daemon writes into.
pub fn ensure_dirs(config: &Config) -> Result<()> {
    if let Some(parent) = config
        .database_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create database directory {}", parent.display()))?;
    }
    for dir in [&config.storage_root, &config.slurm.workspace_root] {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create directory {}", dir.display()))?;
    }
    Ok(())
}

fn layered<T>(flag: Option<T>, file: Option<T>, default: T) -> ConfigValue<T> {
    match (flag, file) {
        (Some(value), _) => ConfigValue {
            value,
            source: ConfigSource::Override,
        },
        (None, Some(value)) => ConfigValue {
            value,
            source: ConfigSource::ConfigFile,
        },
        (None, None) => ConfigValue {
            value: default,
            source: ConfigSource::Default,
        },
    }
}

fn layered_path(
    flag: Option<PathBuf>,
    file: Option<String>,
    base_dir: Option<&Path>,
    default: impl FnOnce() -> Result<PathBuf>,
    key: &str,
) -> Result<ConfigValue<PathBuf>> {
    let resolved = match (flag, file) {
        (Some(path), _) => ConfigValue {
            value: expand_path(path),
            source: ConfigSource::Override,
        },
        (None, Some(raw)) => ConfigValue {
            value: resolve_path(&raw, base_dir),
            source: ConfigSource::ConfigFile,
        },
        (None, None) => ConfigValue {
            value: default().with_context(|| {
                format!("failed to resolve default {key}; set {key} in the config file")
            })?,
            source: ConfigSource::Default,
        },
    };
    Ok(resolved)
}

fn read_config_file(path: &Path, required: bool) -> Result<FileConfig> {
    if !path.exists() {
        if required {
            anyhow::bail!("config file not found at {}", path.display());
        }
        return Ok(FileConfig::default());
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

fn resolve_path(raw: &str, base_dir: Option<&Path>) -> PathBuf {
    let expanded = shellexpand::tilde(raw);
    let path = PathBuf::from(expanded.as_ref());
    if path.is_absolute() {
        return path;
    }
    match base_dir {
        Some(dir) => dir.join(path),
        None => path,
    }
}

fn expand_path(path: PathBuf) -> PathBuf {
    let path_string = path.to_string_lossy().to_string();
    let expanded = shellexpand::tilde(&path_string);
    PathBuf::from(expanded.as_ref())
}

fn config_path_from_env() -> Result<Option<PathBuf>> {
    match std::env::var_os(CONFIG_ENV_VAR) {
        Some(value) => {
            if value.is_empty() {
                anyhow::bail!("{CONFIG_ENV_VAR} is set but empty");
            }
            Ok(Some(PathBuf::from(value)))
        }
        None => Ok(None),
    }
}

fn default_config_path() -> Result<PathBuf> {
    Ok(default_config_dir()?.join(CONFIG_FILE_NAME))
}

fn default_data_path(name: &str) -> Result<PathBuf> {
    Ok(default_data_dir()?.join(name))
}

fn default_config_dir() -> Result<PathBuf> {
    let base = dirs::config_dir().context("failed to resolve config directory")?;
    Ok(base.join(APP_DIR_NAME))
}

fn default_data_dir() -> Result<PathBuf> {
    let base = dirs::data_dir().context("failed to resolve data directory")?;
    Ok(base.join(APP_DIR_NAME))
}
