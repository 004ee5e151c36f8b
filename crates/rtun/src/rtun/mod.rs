pub mod app;
pub mod config;
pub mod logging;
pub mod net;
pub mod tunnel;

pub async fn run(overrides: config::Overrides) -> anyhow::Result<()> {
    app::run(overrides).await
}
