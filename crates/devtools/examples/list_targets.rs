//! Find the debugging endpoint among candidate ports and list its targets
//!
//! Usage: cargo run --example list_targets -- 9222 9229

use devtools::{discover_targets, find_debug_port, DEFAULT_PORT};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let mut candidates: Vec<u16> = std::env::args()
        .skip(1)
        .filter_map(|arg| arg.parse().ok())
        .collect();
    if candidates.is_empty() {
        candidates.push(DEFAULT_PORT);
    }

    let port = find_debug_port(&candidates, None).await?;
    println!("Debugging endpoint on port {port}");

    for target in discover_targets(port, None).await? {
        let connectable = if target.web_socket_debugger_url.is_some() {
            ""
        } else {
            " (attached elsewhere)"
        };
        println!(
            "{:<16} {:<40} {} {}{}",
            target.target_type, target.id, target.title, target.url, connectable
        );
    }

    Ok(())
}
