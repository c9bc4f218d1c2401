//! Cadenza - Music Player Session Core
//!
//! Headless driver: imports the music library, connects the simulated
//! player, logs a summary of the session and shuts down.
//!
//! Usage: `cadenza [FOLDER]`. A folder argument is persisted as the library
//! folder; without one the last used folder (or `$HOME/Music`) is imported.

use std::{
    env::{args_os, var_os},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use {
    anyhow::Result,
    tokio::{
        sync::broadcast::{Receiver, error::RecvError},
        time::timeout,
    },
    tracing::{info, warn},
    tracing_subscriber::EnvFilter,
};

use cadenza::{
    CoordinatorConfig, FolderImporter, JsonPreferenceStore, Preferences, SessionCoordinator,
    SessionDependencies, SessionEvent,
    error::ResultExt,
    playback::{NoArtworkColors, SimulatedConnector, SimulatedPlayer},
    state::ConnectionState,
};

/// Log filter used when `RUST_LOG` is unset.
const DEFAULT_LOG_FILTER: &str = "cadenza=info";

/// How long to wait for the import and the player handshake.
const STARTUP_TIMEOUT: Duration = Duration::from_secs(60);

/// Main entry point for the Cadenza driver.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let store = JsonPreferenceStore::new().add_context("Failed to open preference store")?;
    info!(path = ?store.get_config_path(), "Preferences opened");
    let preferences = Preferences::new(Arc::new(store));

    let (player, player_events) = SimulatedPlayer::new();
    let coordinator = SessionCoordinator::spawn(
        SessionDependencies {
            importer: Arc::new(FolderImporter::new(default_music_dir())),
            connector: Arc::new(SimulatedConnector::new(player, player_events)),
            preferences,
            colors: Arc::new(NoArtworkColors),
        },
        CoordinatorConfig::default(),
    );
    let mut events = coordinator.subscribe();

    if let Some(folder) = args_os().nth(1) {
        coordinator.update_folder(PathBuf::from(folder))?;
    }

    if timeout(STARTUP_TIMEOUT, wait_for_startup(&coordinator, &mut events))
        .await
        .is_err()
    {
        warn!("Timed out waiting for the library and player");
    }

    let snapshot = coordinator.snapshot().await?;
    info!(
        connection = ?snapshot.connection,
        tracks = snapshot.visible_tracks.len(),
        sort_order = %snapshot.sort_order,
        repeat_mode = %snapshot.repeat_mode,
        "Session ready"
    );
    for (name, value) in snapshot.stats.to_map() {
        info!("Stats {}: {}", name, value);
    }
    for (rank, track) in snapshot.daily_mix.iter().enumerate() {
        info!("Daily mix #{}: {} - {}", rank + 1, track.artist, track.title);
    }
    if let Some(track) = &snapshot.current_track {
        info!(
            position_ms = snapshot.position_ms,
            "Resuming {} - {}", track.artist, track.title
        );
    }

    coordinator.dispose()?;
    loop {
        match events.recv().await {
            Ok(SessionEvent::ConnectionStateChanged(ConnectionState::Disposed))
            | Err(RecvError::Closed) => break,
            Ok(_) | Err(RecvError::Lagged(_)) => {}
        }
    }
    Ok(())
}

/// Waits until the player is connected and an import has completed.
async fn wait_for_startup(coordinator: &SessionCoordinator, events: &mut Receiver<SessionEvent>) {
    let mut imported = false;
    let mut connected = coordinator
        .snapshot()
        .await
        .is_ok_and(|snapshot| snapshot.connection.is_ready());

    while !(imported && connected) {
        match events.recv().await {
            Ok(SessionEvent::LibraryChanged) => imported = true,
            Ok(SessionEvent::ConnectionStateChanged(ConnectionState::Ready)) => connected = true,
            Ok(SessionEvent::ConnectionStateChanged(ConnectionState::Failed { reason })) => {
                warn!("Player connection failed: {}", reason);
                return;
            }
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => return,
        }
    }
}

/// Default library folder, `$HOME/Music`.
fn default_music_dir() -> PathBuf {
    var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_default()
        .join("Music")
}
