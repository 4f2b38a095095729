use anyhow::Result;

use ciel_server::{config::Config, handlers, observability, server::Server, state::AppState};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    observability::init_tracing(&config)?;

    let state = AppState::build(config.clone()).await?;
    let app = handlers::router(state);

    Server::new(config).serve(app).await?;
    Ok(())
}
