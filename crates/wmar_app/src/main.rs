use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use engine_logging::{engine_error, engine_info, engine_warn, LogDestination};
use log::LevelFilter;
use wmar_app::config::{HISTORY_FILENAME, LOG_FILENAME};
use wmar_app::{notify_config_failure, AppConfig, LogNotifier, OutboxNotifier};
use wmar_core::{ChangeTracker, Credentials, Notifier, Report, StepRecord};
use wmar_engine::persist::ensure_dir;
use wmar_engine::{
    DiagnosticSink, FileDiagnostics, FlowNavigator, JsonFileStore, Monitor, RunOutcome,
    WebDriverLauncher,
};

const EXIT_FLOW_FAILED: u8 = 1;
const EXIT_CONFIG: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            engine_logging::initialize(
                LevelFilter::Info,
                LogDestination::Terminal,
                Path::new(LOG_FILENAME),
            );
            engine_error!("Configuration error: {}", err);
            let message = format!("configuration error: {err}");
            if let Err(err) = notify_config_failure(|name| std::env::var(name).ok(), &message) {
                engine_warn!("{}", err);
            }
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    engine_logging::initialize(
        config.log_level,
        config.log_destination,
        Path::new(LOG_FILENAME),
    );

    let notifier: Arc<dyn Notifier> = match &config.outbox_dir {
        Some(dir) => Arc::new(OutboxNotifier::new(dir)),
        None => Arc::new(LogNotifier),
    };

    let (creds, monitor) = match prepare(&config, notifier.clone()) {
        Ok(prepared) => prepared,
        Err(err) => {
            engine_error!("Configuration error: {:#}", err);
            let report =
                Report::failure(&config.subject, &StepRecord::new(), &format!("{err:#}"));
            if let Err(err) = notifier.send(&report) {
                engine_warn!("{}", err);
            }
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    match monitor.run(&creds).await {
        Ok(RunOutcome::Reported { status, .. }) => {
            engine_info!("Done: {}", status.category);
            ExitCode::SUCCESS
        }
        Ok(RunOutcome::StoppedAfterFill { .. }) => ExitCode::SUCCESS,
        Err(err) => {
            engine_error!("{} ({})", err, err.steps);
            ExitCode::from(EXIT_FLOW_FAILED)
        }
    }
}

/// Everything that can fail before a browser is launched.
fn prepare(
    config: &AppConfig,
    notifier: Arc<dyn Notifier>,
) -> anyhow::Result<(Credentials, Monitor)> {
    let creds = config.credentials()?;

    ensure_dir(&config.artifact_dir).with_context(|| {
        format!(
            "artifact directory {} is unusable",
            config.artifact_dir.display()
        )
    })?;
    let diagnostics: Arc<dyn DiagnosticSink> =
        Arc::new(FileDiagnostics::new(&config.artifact_dir));

    let navigator = FlowNavigator::new(config.flow_settings(), diagnostics.clone());
    let launcher = Arc::new(WebDriverLauncher::new(config.driver_settings()));
    let mut monitor = Monitor::new(
        config.monitor_settings(),
        launcher,
        navigator,
        notifier,
        diagnostics,
    );

    match &config.state_path {
        Some(state_path) => {
            let history_path = config
                .history_path
                .clone()
                .unwrap_or_else(|| PathBuf::from(HISTORY_FILENAME));
            engine_info!(
                "Tracking changes in {} (history {})",
                state_path.display(),
                history_path.display()
            );
            let store = JsonFileStore::new(state_path, history_path);
            monitor = monitor.with_tracker(ChangeTracker::new(Arc::new(store)));
        }
        None => engine_info!("STATE_PATH not set; change tracking disabled"),
    }

    Ok((creds, monitor))
}
