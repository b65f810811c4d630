use crate::types::ProbeConfig;
use reqwest::{redirect::Policy, Client};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

/// Redirects are never followed by the client itself: the prober walks them
/// hop by hop so every hop's headers end up in the recorded block.
pub fn create_http_client(config: &ProbeConfig) -> Result<Client, ClientError> {
    let client = Client::builder()
        .connect_timeout(config.connect_timeout())
        .timeout(config.timeout())
        .redirect(Policy::none())
        .user_agent(config.user_agent.as_str())
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .tcp_nodelay(true)
        .use_rustls_tls()
        .build()?;

    Ok(client)
}
