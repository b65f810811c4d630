use hickory_resolver::{
    config::{ResolverConfig, ResolverOpts},
    error::{ResolveError, ResolveErrorKind},
    system_conf, TokioAsyncResolver,
};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
#[error("DNS lookup for {host} failed: {reason}")]
pub struct DnsError {
    pub host: String,
    pub reason: String,
}

impl DnsError {
    pub fn new(host: &str, reason: impl ToString) -> Self {
        Self {
            host: host.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// The two lookups a probe needs. An answer with no records is `Ok` and
/// empty; only a failed lookup is an error.
#[allow(async_fn_in_trait)]
pub trait Resolve {
    async fn ipv4(&self, host: &str) -> Result<Option<String>, DnsError>;
    async fn mx(&self, host: &str) -> Result<Vec<String>, DnsError>;
}

pub struct DnsResolver {
    inner: TokioAsyncResolver,
}

impl DnsResolver {
    /// Uses the system resolver configuration when it can be read, public
    /// defaults otherwise. Each query gets one attempt bounded by `timeout`.
    pub fn new(timeout: Duration) -> Self {
        let (config, mut opts) = system_conf::read_system_conf().unwrap_or_else(|e| {
            debug!("System resolver config unavailable ({}), using defaults", e);
            (ResolverConfig::default(), ResolverOpts::default())
        });
        opts.timeout = timeout;
        opts.attempts = 1;

        Self {
            inner: TokioAsyncResolver::tokio(config, opts),
        }
    }
}

fn is_empty_answer(err: &ResolveError) -> bool {
    matches!(err.kind(), ResolveErrorKind::NoRecordsFound { .. })
}

impl Resolve for DnsResolver {
    async fn ipv4(&self, host: &str) -> Result<Option<String>, DnsError> {
        match self.inner.ipv4_lookup(host).await {
            Ok(lookup) => Ok(lookup.iter().next().map(|a| a.to_string())),
            Err(e) if is_empty_answer(&e) => Ok(None),
            Err(e) => Err(DnsError::new(host, e)),
        }
    }

    async fn mx(&self, host: &str) -> Result<Vec<String>, DnsError> {
        match self.inner.mx_lookup(host).await {
            Ok(lookup) => Ok(lookup.iter().map(|mx| mx.exchange().to_string()).collect()),
            Err(e) if is_empty_answer(&e) => Ok(Vec::new()),
            Err(e) => Err(DnsError::new(host, e)),
        }
    }
}
