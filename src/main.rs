mod analyzer;
mod app;
mod cli;
mod color;
mod config;
mod player;
mod render;

use anyhow::Result;
use clap::Parser;

use app::App;
use cli::Cli;
use config::ConfigStore;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(level) = &cli.log_level {
        logger.parse_filters(level);
    }
    logger.format_timestamp_millis().init();

    let config_path = cli.config.clone().unwrap_or_else(config::default_config_path);
    let store = ConfigStore::open(config_path);

    let mut app = App::new(&cli, store)?;
    let result = app.run();
    app.shutdown();

    if let Err(err) = &result {
        log::error!("{:#}", err);
    }
    log::info!("Exit");
    result
}
