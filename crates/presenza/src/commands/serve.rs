//! `presenza serve`: run the monitor and the HTTP API until interrupted.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use presenza_config::{
    FileSettings, StateFile, resolve_admin_token, state_path, to_monitor_config,
};
use presenza_core::{KeyValueStore, PresenceMonitor, TokenGate};

use crate::cli::{GlobalOpts, ServeArgs};
use crate::commands::{load, report_warnings};
use crate::error::{CliError, exit_code};
use crate::server::{self, AppState, ShutdownRestart};

/// Returns the process exit code: success, or
/// [`exit_code::RESTART`] after an admin restart request.
pub async fn handle(args: ServeArgs, global: &GlobalOpts) -> Result<i32, CliError> {
    let cfg = load(global)?;
    let monitor_config = to_monitor_config(&cfg)?;
    let bind = args.bind.unwrap_or_else(|| cfg.server.bind.clone());

    let gate = TokenGate::new(resolve_admin_token(&cfg.server));
    if !gate.is_configured() {
        warn!("no admin token configured, restart endpoint is disabled");
    }

    let store: Arc<dyn KeyValueStore> = Arc::new(StateFile::new(state_path(&cfg)));
    let settings = FileSettings::new(cfg);
    let monitor = PresenceMonitor::start_with_store(&settings, monitor_config, Some(store))?;
    report_warnings(monitor.warnings(), global.quiet);

    let stop = CancellationToken::new();
    let restart = Arc::new(ShutdownRestart::new(stop.clone()));
    let app = server::router(AppState {
        monitor: monitor.clone(),
        gate: Arc::new(gate),
        restart: restart.clone(),
    });

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .map_err(|e| CliError::Config {
            field: "server.bind".into(),
            reason: format!("cannot listen on {bind}: {e}"),
        })?;
    info!(address = %bind, channels = monitor.channels().len(), "serving presence API");

    let signal_stop = stop.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received, shutting down");
                signal_stop.cancel();
            }
            Err(e) => warn!(error = %e, "cannot listen for interrupts"),
        }
    });

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(stop.clone().cancelled_owned())
        .await;
    monitor.shutdown().await;
    served?;

    if restart.was_requested() {
        info!("exiting for restart");
        return Ok(exit_code::RESTART);
    }
    Ok(exit_code::SUCCESS)
}
