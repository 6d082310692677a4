use notice_grid::{app, config::Config};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::load();
    log::info!("starting notice-grid on {}", config.bind);

    app::run(config).await?;

    Ok(())
}
