//! Shared HTTP client for all source locators.
//!
//! One client is built per run and handed to every locator, so connection
//! pools, TLS sessions and the DNS cache are shared across registries.
//! crates.io additionally rejects requests without a descriptive user agent.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;

const USER_AGENT: &str = concat!(
    "vexhub-crawler/",
    env!("CARGO_PKG_VERSION"),
    " (https://github.com/aquasecurity/vexhub-crawler)"
);

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub fn create_shared_client() -> anyhow::Result<Arc<Client>> {
    let client = Client::builder()
        .user_agent(USER_AGENT)
        .timeout(DEFAULT_TIMEOUT)
        .connect_timeout(CONNECT_TIMEOUT)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .pool_max_idle_per_host(10)
        .tcp_keepalive(Duration::from_secs(60))
        .build()?;

    Ok(Arc::new(client))
}
