mod app;
mod ui;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tv_downloads::config::AppConfig;
use tv_downloads::services::AppServices;

fn main() -> iced::Result {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tv_downloads=info")),
        )
        .init();

    let config = AppConfig::load().unwrap_or_else(|e| {
        error!("Failed to load config, using defaults: {}", e);
        AppConfig::default()
    });

    let services = match AppServices::from_config(config) {
        Ok(services) => services,
        Err(e) => {
            error!("Failed to initialise downloads: {}", e);
            std::process::exit(1);
        }
    };
    info!("Downloads stored in {}", services.downloads_root().display());

    iced::application(
        move || app::DownloadApp::new(services.clone()),
        app::update,
        app::view,
    )
    .title("TV Downloads")
    .run()
}
