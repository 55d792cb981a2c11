// ask-service-rs/src/main.rs
// Election Analytics Query Assistant - service entry point
// Port 8282 - HTTP/REST entry point for external clients

use std::sync::Arc;

use ask_service::{create_router, AppState, START_TIME};
use election_store::ElectionStore;
use llm_client::LlmClient;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file
    dotenv::dotenv().ok();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let _ = *START_TIME;

    let service_name = config_rs::get_formatted_service_name("ASK");
    log::info!("Starting {}", service_name);

    let dataset_dir = config_rs::get_dataset_dir();
    log::info!("Loading dataset from {}", dataset_dir.display());

    let store = match ElectionStore::open_from_dir(&dataset_dir) {
        Ok(store) => Arc::new(store),
        Err(err) => {
            log::error!("Failed to load election dataset: {}", err);
            std::process::exit(1);
        }
    };

    let generator = Arc::new(LlmClient::from_env());

    let state = Arc::new(AppState::new(generator, store));
    let app = create_router(state);

    let addr = config_rs::get_bind_address("ASK", 8282);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    log::info!("{} listening on {}", service_name, addr);
    println!("{} listening on {}", service_name, addr);

    axum::serve(listener, app).await?;

    Ok(())
}
