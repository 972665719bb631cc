//! Discovery ignores proxy settings from the environment. Kept in its own
//! test binary since it mutates process-wide variables.

mod support;

use devtools::{discover_targets, find_debug_port, CDPClient};
use support::MockDebugger;

const DEAD_PROXY: &str = "http://127.0.0.1:1";

fn set_proxy_env() {
    for var in ["http_proxy", "HTTP_PROXY", "all_proxy", "ALL_PROXY"] {
        std::env::set_var(var, DEAD_PROXY);
    }
    std::env::remove_var("no_proxy");
    std::env::remove_var("NO_PROXY");
}

#[tokio::test]
async fn test_discovery_bypasses_environment_proxy() {
    set_proxy_env();
    let mut mock = MockDebugger::start().await;

    let targets = discover_targets(mock.port(), None).await.unwrap();
    assert_eq!(targets.len(), 1);
    assert_eq!(targets[0].id, "PAGE-1");

    assert_eq!(find_debug_port(&[mock.port()], None).await.unwrap(), mock.port());

    let client = CDPClient::new(mock.config()).unwrap();
    client.connect(None).await.unwrap();
    let _conn = mock.accept().await;
    assert!(client.is_connected());
}
