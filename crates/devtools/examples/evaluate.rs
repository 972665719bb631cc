//! Connect to the first page, print lifecycle events, evaluate an expression
//!
//! Usage: cargo run --example evaluate -- "document.title"

use devtools::{CDPClient, ClientConfig, DEFAULT_PORT};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let expression = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "document.title".to_string());

    let client = CDPClient::new(ClientConfig::new(DEFAULT_PORT))?;
    let mut events = client.connection_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            println!("Connection event: {event:?}");
        }
    });

    client.connect(None).await?;
    println!("Connected to {:?}", client.target_id().await);

    let value = client.evaluate(expression, true).await?;
    println!("{value}");

    client.disconnect().await;
    Ok(())
}
