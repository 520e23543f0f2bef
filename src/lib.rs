pub mod app;
pub mod auth;
pub mod catalog;
pub mod compression;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod fsutil;
pub mod hashing;
pub mod network;
pub mod pipeline;
pub mod reconciler;
pub mod remote;
pub mod sidecar;
pub mod watcher;

pub use app::App;
pub use error::{Error, Result};
pub use events::Event;

use tracing_subscriber::EnvFilter;

/// Default health-check target used to detect connectivity; any reachable endpoint
/// on the remote API works, the Network Monitor only looks at the HTTP status.
const DEFAULT_HEALTH_PATH: &str = "/health";

/// Bring the whole engine up: tracing, the application struct, watchers for every known Album,
/// the master-folder watcher (if configured), and the network monitor. Blocks draining the event
/// stream until the process is asked to exit, logging every event since there is no UI in this
/// crate to hand them to.
///
/// `hidden` mirrors the `--hidden` command-line flag: this crate has no window to
/// show or hide, so the flag is accepted and threaded through only so a caller embedding this
/// engine inside a UI shell can read it back.
pub fn run(hidden: bool) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    tracing::info!(hidden, "starting lumosnap-sync");

    let home = config::app_data_dir();
    let cfg = config::read_config(&home);
    let base_url = std::env::var("LUMOSNAP_API_BASE_URL").unwrap_or_else(|_| "https://api.lumosnap.app".to_string());

    let (app, events) = App::new(home, cfg.storage_location.clone(), base_url.clone())?;
    app.resume_on_startup()?;

    if let Some(master_folder) = &cfg.master_folder_path {
        if master_folder.is_dir() {
            app.start_master_watch(master_folder.clone())?;
        } else {
            tracing::warn!(path = %master_folder.display(), "configured master folder is missing, skipping watch");
        }
    }
    app.start_network_monitor(format!("{base_url}{DEFAULT_HEALTH_PATH}"));

    for event in events {
        tracing::debug!(?event, "core event");
    }

    app.shutdown();
    Ok(())
}
