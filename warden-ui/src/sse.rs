//! Server-Sent Events stream, file watcher, and status broadcast.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use futures::stream::Stream;
use notify::{Event as NotifyEvent, EventKind, PollWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::routes;
use crate::state::{AppState, ChangeEvent};

/// Cadence of the status broadcast for badge rendering.
const STATUS_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Serialize)]
struct ChangePayload {
    #[serde(rename = "type")]
    event_type: &'static str,
}

/// SSE endpoint handler.
pub async fn events_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.event_tx.subscribe();

    let stream = async_stream::stream! {
        // Send initial connected event
        yield Ok(Event::default().event("connected").data("{}"));

        loop {
            match rx.recv().await {
                Ok(ChangeEvent::Status(payload)) => {
                    if let Ok(json) = serde_json::to_string(&payload) {
                        yield Ok(Event::default().event("status").data(json));
                    }
                }
                Ok(change_event) => {
                    let payload = ChangePayload { event_type: change_type(&change_event) };
                    if let Ok(json) = serde_json::to_string(&payload) {
                        yield Ok(Event::default().event("change").data(json));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "SSE client lagged, some events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

fn change_type(event: &ChangeEvent) -> &'static str {
    match event {
        ChangeEvent::StoreChanged => "store_changed",
        ChangeEvent::ConfigChanged => "config_changed",
        ChangeEvent::RulesChanged => "rules_changed",
        ChangeEvent::Status(_) => "status",
    }
}

/// Start the periodic status broadcast in a background task.
pub fn start_status_broadcast(state: AppState) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(STATUS_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tick.tick().await;
            match routes::status_payload(&state) {
                Ok(payload) => {
                    let _ = state.event_tx.send(ChangeEvent::Status(payload));
                }
                Err(err) => {
                    debug!(error = %format!("{err:#}"), "status broadcast skipped");
                }
            }
        }
    });
}

/// Start the file watcher in a background task.
pub fn start_file_watcher(state: AppState) {
    tokio::spawn(async move {
        if let Err(e) = run_file_watcher(state).await {
            warn!(error = %e, "file watcher failed");
        }
    });
}

async fn run_file_watcher(state: AppState) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::channel::<NotifyEvent>(100);

    let tx_clone = tx.clone();
    let mut watcher = PollWatcher::new(
        move |res: Result<NotifyEvent, notify::Error>| {
            if let Ok(event) = res {
                let _ = tx_clone.try_send(event);
            }
        },
        notify::Config::default().with_poll_interval(Duration::from_millis(100)),
    )?;

    let warden_dir = state.warden_dir();
    if warden_dir.exists() {
        watcher.watch(&warden_dir, RecursiveMode::NonRecursive)?;
        info!(path = %warden_dir.display(), "watching warden directory");
    } else {
        warn!(path = %warden_dir.display(), "warden directory missing, watcher idle");
    }

    // Process in batches at a fixed interval so a store written on every
    // poll tick cannot starve other updates.
    let mut pending_events: Vec<NotifyEvent> = Vec::new();
    let mut flush_tick = tokio::time::interval(Duration::from_millis(100));
    flush_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            Some(event) = rx.recv() => {
                pending_events.push(event);
            }
            _ = flush_tick.tick() => {
                if pending_events.is_empty() {
                    continue;
                }
                process_events(&state, &pending_events);
                pending_events.clear();
            }
        }
    }
}

fn process_events(state: &AppState, events: &[NotifyEvent]) {
    let mut store_changed = false;
    let mut config_changed = false;
    let mut rules_changed = false;

    let store_path = state.store_path();
    let config_path = state.config_path();
    let rules_path = state.rules_path();

    for event in events {
        // Only care about create/modify events
        if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
            continue;
        }

        for path in &event.paths {
            if path == &store_path {
                store_changed = true;
            } else if path == &config_path {
                config_changed = true;
            } else if path == &rules_path {
                rules_changed = true;
            }
            // Lock and temp files churn on every store operation and
            // deliberately match nothing here.
        }
    }

    if store_changed {
        debug!("broadcasting store change");
        let _ = state.event_tx.send(ChangeEvent::StoreChanged);
    }
    if config_changed {
        debug!("broadcasting config change");
        let _ = state.event_tx.send(ChangeEvent::ConfigChanged);
    }
    if rules_changed {
        debug!("broadcasting rules change");
        let _ = state.event_tx.send(ChangeEvent::RulesChanged);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn modify_event(path: std::path::PathBuf) -> NotifyEvent {
        NotifyEvent {
            kind: EventKind::Modify(notify::event::ModifyKind::Any),
            paths: vec![path],
            attrs: Default::default(),
        }
    }

    fn test_state() -> AppState {
        let project_dir = std::env::temp_dir()
            .join("warden-ui-tests")
            .join(format!("pid-{}", std::process::id()));
        AppState::new(project_dir)
    }

    #[test]
    fn store_write_broadcasts_store_changed() {
        let state = test_state();
        let mut rx = state.event_tx.subscribe();

        process_events(&state, &[modify_event(state.store_path())]);

        let event = rx.try_recv().expect("event");
        assert!(matches!(event, ChangeEvent::StoreChanged));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn config_and_rules_writes_broadcast_individually() {
        let state = test_state();
        let mut rx = state.event_tx.subscribe();

        process_events(
            &state,
            &[
                modify_event(state.config_path()),
                modify_event(state.rules_path()),
            ],
        );

        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], ChangeEvent::ConfigChanged));
        assert!(matches!(events[1], ChangeEvent::RulesChanged));
    }

    #[test]
    fn lock_file_churn_broadcasts_nothing() {
        let state = test_state();
        let mut rx = state.event_tx.subscribe();

        process_events(
            &state,
            &[
                modify_event(state.warden_dir().join("store.lock")),
                modify_event(state.warden_dir().join("store.json.tmp")),
            ],
        );

        assert!(rx.try_recv().is_err());
    }
}
