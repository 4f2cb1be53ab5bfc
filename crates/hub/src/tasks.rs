// Background loops spawned at startup: the idle-connection reaper and
// the liveness gauge reporter. Both log and swallow every error; neither
// loop is allowed to exit.

use tracing::{info, warn};

use crate::{config::HubConfig, metrics, ws, ws::HubState};

pub fn spawn_background_tasks(state: HubState, config: &HubConfig) {
    tokio::spawn(run_reaper(state.clone(), config.clone()));
    tokio::spawn(run_metrics_reporter(state, config.clone()));
}

/// Sweep for connections idle past the configured threshold and close
/// them through the same teardown path as a voluntary disconnect.
async fn run_reaper(state: HubState, config: HubConfig) {
    let mut ticker = tokio::time::interval(config.reaper_interval);
    ticker.tick().await; // immediate first tick

    loop {
        ticker.tick().await;

        let idle = state.presence.idle_users(config.idle_timeout).await;
        for user_id in idle {
            info!(user_id = %user_id, "closing idle websocket connection");
            ws::force_disconnect(&state, user_id, "idle_timeout").await;
        }
    }
}

/// Publish connection, room, and session counts to the in-process
/// registry and the durable store.
async fn run_metrics_reporter(state: HubState, config: HubConfig) {
    let mut ticker = tokio::time::interval(config.metrics_interval);
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let connections = state.registry.connection_count().await;
        let rooms = state.registry.room_count().await;
        let sessions = state.collab.session_count().await;

        metrics::set_active_connections(connections as u64);
        metrics::set_active_rooms(rooms as u64);
        metrics::set_active_sessions(sessions as u64);

        let samples = [
            ("active_connections", connections as i64),
            ("active_rooms", rooms as i64),
            ("active_sessions", sessions as i64),
        ];
        for (name, value) in samples {
            if let Err(error) = state.event_log.put_gauge(name, value).await {
                warn!(error = ?error, gauge = name, "failed to publish liveness gauge");
            }
        }
    }
}
