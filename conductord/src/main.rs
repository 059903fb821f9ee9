// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::runtime::Handle;
use tokio::sync::watch;

use conductord::adapters::accounting::TracingAccounting;
use conductord::adapters::catalog::TomlCatalog;
use conductord::adapters::cli;
use conductord::adapters::clock::SystemClock;
use conductord::adapters::db::{JobStore, SqliteStoreAdapter};
use conductord::adapters::exec::LocalCommandRunner;
use conductord::adapters::slurm::{self, SlurmBackend, SlurmSettings};
use conductord::adapters::storage::LocalStorage;
use conductord::app::ports::{ApplicationCatalogPort, ClockPort, JobStorePort, StoragePort};
use conductord::app::types::JobState;
use conductord::app::usecases::{
    BackendRegistry, FileStagingService, Orchestrator, TransitionExecutor, VerificationService,
};
use conductord::timer::spawn_timer;
use conductord::{config, logging};

const EFFECT_WORKER_THREADS: usize = 2;
const EFFECT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

fn log_config_report(report: &config::ConfigReport) {
    match (&report.config_path, report.config_path_source) {
        (Some(path), Some(source)) => {
            tracing::info!(
                "config path: {} (source={}, present={})",
                path.display(),
                source.as_str(),
                report.config_file_present
            );
        }
        (Some(path), None) => {
            tracing::info!(
                "config path: {} (present={})",
                path.display(),
                report.config_file_present
            );
        }
        (None, _) => {
            tracing::info!("config path: (none)");
        }
    }
    for (key, value) in [
        ("database_path", &report.database_path),
        ("storage_root", &report.storage_root),
        ("catalog_path", &report.catalog_path),
        ("slurm.workspace_root", &report.slurm_workspace_root),
    ] {
        tracing::info!(
            "config {}: {} (source={})",
            key,
            value.value.display(),
            value.source.as_str()
        );
    }
    for (key, value) in [
        ("poll_interval_secs", &report.poll_interval_secs),
        ("expiry_sweep_interval_secs", &report.expiry_sweep_interval_secs),
        ("job_max_time_secs", &report.job_max_time_secs),
    ] {
        tracing::info!(
            "config {}: {} (source={})",
            key,
            value.value,
            value.source.as_str()
        );
    }
    tracing::info!(
        "config default_backend: {} (source={})",
        report.default_backend.value,
        report.default_backend.source.as_str()
    );
    tracing::info!(
        "config slurm.principal: {} (source={})",
        report.slurm_principal.value,
        report.slurm_principal.source.as_str()
    );
    tracing::info!(
        "config verbose: {} (source={})",
        report.verbose.value,
        report.verbose.source.as_str()
    );
}

fn load_catalog(path: &Path) -> anyhow::Result<TomlCatalog> {
    if !path.exists() {
        tracing::warn!(
            "application catalog {} not found; no application can be started",
            path.display()
        );
        return Ok(TomlCatalog::default());
    }
    TomlCatalog::load(path)
        .with_context(|| format!("failed to load application catalog {}", path.display()))
}

// Entry effects get a runtime of their own. Runtimes must be dropped outside
// async code.
fn main() -> anyhow::Result<()> {
    let parsed = cli::parse_opts();
    let effects_runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(EFFECT_WORKER_THREADS)
        .thread_name("conductor-effects")
        .enable_all()
        .build()
        .context("failed to build effect runtime")?;
    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build runtime")?
        .block_on(run(parsed, effects_runtime.handle().clone()));
    effects_runtime.shutdown_timeout(EFFECT_SHUTDOWN_TIMEOUT);
    result
}

async fn run(parsed: cli::ParsedOpts, effects: Handle) -> anyhow::Result<()> {
    let opts = parsed.opts;
    let config::LoadResult { config, report } = config::load_with_report(
        opts.config,
        config::Overrides {
            database_path: opts.database_path,
            storage_root: opts.storage_root,
            catalog_path: opts.catalog_path,
            default_backend: opts.default_backend,
            poll_interval_secs: opts.poll_interval_secs,
            expiry_sweep_interval_secs: opts.expiry_sweep_interval_secs,
            slurm_workspace_root: opts.slurm_workspace_root,
            verbose: parsed.verbose_override,
        },
    )?;
    logging::init(config.verbose);
    log_config_report(&report);
    config::ensure_dirs(&config)?;

    let store = JobStore::open(&config.database_path)
        .await
        .with_context(|| format!("failed to open job store {}", config.database_path.display()))?;
    let jobs: Arc<dyn JobStorePort> = Arc::new(SqliteStoreAdapter::new(store));
    let catalog: Arc<dyn ApplicationCatalogPort> = Arc::new(load_catalog(&config.catalog_path)?);
    let storage: Arc<dyn StoragePort> = Arc::new(LocalStorage::new(&config.storage_root));
    let clock: Arc<dyn ClockPort> = Arc::new(SystemClock);

    let slurm_backend = Arc::new(SlurmBackend::new(
        SlurmSettings {
            principal: config.slurm.principal.clone(),
            workspace_root: config.slurm.workspace_root.clone(),
            partition: config.slurm.partition.clone(),
            account: config.slurm.account.clone(),
        },
        Arc::new(LocalCommandRunner::new()),
    ));
    let mut backends = BackendRegistry::new();
    backends.register(slurm::BACKEND_NAME, slurm_backend.clone());

    let executor = TransitionExecutor::with_handle(effects);
    executor.start();

    let orchestrator = Orchestrator::new(
        jobs.clone(),
        VerificationService::new(
            catalog,
            storage.clone(),
            clock.clone(),
            config.default_backend.clone(),
        ),
        FileStagingService::new(storage),
        backends,
        Arc::new(TracingAccounting),
        clock,
        executor.clone(),
    )
    .with_job_max_age(Duration::from_secs(config.job_max_time_secs));
    slurm_backend.attach_callbacks(Arc::new(orchestrator.clone()));

    let submitted: Vec<_> = jobs
        .find_in_states(&[JobState::Scheduled, JobState::Running])
        .await?
        .into_iter()
        .map(|record| record.job)
        .filter(|job| job.backend == slurm::BACKEND_NAME)
        .collect();
    let resumed = slurm_backend.resume_tracking(&submitted);
    tracing::info!("resumed slurm tracking jobs={}", resumed);
    orchestrator.replay_lost_jobs().await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poller = {
        let backend = slurm_backend.clone();
        spawn_timer(
            "slurm poll",
            Duration::from_secs(config.poll_interval_secs),
            shutdown_rx.clone(),
            move || {
                let backend = backend.clone();
                async move {
                    backend.poll_once().await?;
                    Ok(())
                }
            },
        )
    };
    let sweeper = {
        let orchestrator = orchestrator.clone();
        spawn_timer(
            "expiry sweep",
            Duration::from_secs(config.expiry_sweep_interval_secs),
            shutdown_rx,
            move || {
                let orchestrator = orchestrator.clone();
                async move {
                    orchestrator.remove_expired_jobs().await?;
                    Ok(())
                }
            },
        )
    };

    tracing::info!(
        "conductord running backends={} default_backend={}",
        slurm::BACKEND_NAME,
        config.default_backend
    );
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutting down");

    let _ = shutdown_tx.send(true);
    for timer in [poller, sweeper] {
        if let Err(err) = timer.await {
            tracing::warn!("timer task ended abnormally: {err}");
        }
    }
    executor.stop();
    executor.wait_idle().await;
    Ok(())
}
