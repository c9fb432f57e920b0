use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::Result;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use profile_pictures::infrastructure::{
    AppConfig, CliArgs, GraphPictureFetcher, ImageCache, StorageManager,
};
use profile_pictures::presentation::App;
use profile_pictures::presentation::widgets::ViewOptions;

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    if let Some(log_path) = config.effective_log_path() {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .init();

        info!(path = %log_path.display(), "Logging initialized");
    } else {
        tracing_subscriber::registry().with(filter).init();
    }

    Ok(())
}

fn load_config(args: &CliArgs) -> Result<AppConfig> {
    let storage = StorageManager::new()?;
    let mut config = storage.load_config(args.config.as_deref())?;
    config.merge_with_args(args);
    Ok(config)
}

fn create_app() -> Result<App> {
    let args = CliArgs::parse();
    let config = load_config(&args)?;

    init_logging(&config)?;

    info!(version = profile_pictures::VERSION, "Starting {}", profile_pictures::NAME);

    let fetcher = GraphPictureFetcher::new(&config.graph.base_url, config.graph.timeout())?;
    let cache = Arc::new(ImageCache::new(
        Arc::new(fetcher),
        config.cache.to_cache_config(),
    ));
    if ImageCache::install_global(Arc::clone(&cache)).is_err() {
        warn!("Process-wide picture cache was already initialized");
    }

    let options = ViewOptions {
        max_images_cached_beyond_lifetime: None,
        cropping: config.cropping,
        show_empty_image: config.show_empty_image,
        empty_image: None,
    };

    Ok(App::new(cache, args.profile_ids, &options))
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let app = create_app()?;

    let mut terminal = ratatui::init();

    let result = app.run(&mut terminal).await;

    ratatui::restore();

    result
}
