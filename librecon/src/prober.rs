use crate::{
    dns::{DnsResolver, Resolve},
    headers::{parse_header_block, render_header_block},
    http::{create_http_client, ClientError},
    types::{ProbeConfig, ProbeResult, Unit, Variant},
};
use reqwest::{header::LOCATION, Client, Response, Url};
use std::time::Instant;
use tracing::{debug, warn};

/// Anything that can turn a (unit, variant) pair into a result. The worker
/// loop only depends on this, so tests can swap in scripted probes.
#[allow(async_fn_in_trait)]
pub trait Probe {
    async fn probe(&self, unit: &Unit, variant: &Variant) -> ProbeResult;
}

pub struct Prober<R = DnsResolver> {
    client: Client,
    resolver: R,
    /// Redirect hops to follow; `None` when redirects are not followed.
    max_redirects: Option<usize>,
}

impl Prober {
    pub fn new(config: &ProbeConfig) -> Result<Self, ClientError> {
        Self::with_resolver(config, DnsResolver::new(config.dns_timeout()))
    }
}

impl<R: Resolve> Prober<R> {
    pub fn with_resolver(config: &ProbeConfig, resolver: R) -> Result<Self, ClientError> {
        Ok(Self {
            client: create_http_client(config)?,
            resolver,
            max_redirects: config.follow_redirects.then_some(config.max_redirects),
        })
    }

    /// Fetches the response headers for one variant of `unit`. A failed
    /// request yields an unreachable result; DNS failures only leave the
    /// corresponding fields empty.
    pub async fn probe_one(&self, unit: &Unit, variant: &Variant) -> ProbeResult {
        let start = Instant::now();
        let url = variant.url(&unit.domain);
        let host = variant.lookup_host(&unit.domain);

        debug!(rank = unit.rank, url = %url, "Requesting headers");

        let raw_headers = match self.fetch_header_chain(&url).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(rank = unit.rank, url = %url, error = %e, "HTTP header request failed");
                return ProbeResult::unreachable(unit, variant, start.elapsed());
            }
        };
        let parsed = parse_header_block(&raw_headers);
        let (resolved_ip, mx_records) = self.resolve_records(&host, variant.is_secure()).await;

        ProbeResult {
            rank: unit.rank,
            domain: unit.domain.clone(),
            variant_url: url,
            host,
            status: parsed.status,
            resolved_ip,
            headers: parsed.fields,
            cookies: parsed.cookies,
            raw_headers,
            mx_records,
            elapsed: start.elapsed(),
        }
    }

    /// HEADs `url` and walks the redirect chain one hop at a time, appending
    /// every hop's header block. The first block's status line is therefore
    /// the status of the original request. A failure anywhere in the chain
    /// fails the whole request.
    async fn fetch_header_chain(&self, url: &str) -> Result<String, reqwest::Error> {
        let mut response = self.client.head(url).send().await?;
        let mut raw = render_header_block(&response);
        let mut hops = 0;

        while let Some(next) = self.next_hop(&response, hops) {
            debug!(from = %response.url(), to = %next, hop = hops + 1, "Following redirect");
            response = self.client.head(next).send().await?;
            raw.push_str(&render_header_block(&response));
            hops += 1;
        }

        Ok(raw)
    }

    fn next_hop(&self, response: &Response, hops: usize) -> Option<Url> {
        let limit = self.max_redirects?;
        if !response.status().is_redirection() {
            return None;
        }
        if hops >= limit {
            debug!(url = %response.url(), limit, "Redirect limit reached");
            return None;
        }
        let location = response.headers().get(LOCATION)?.to_str().ok()?;
        response.url().join(location).ok()
    }

    /// A record always, MX only for secure variants.
    async fn resolve_records(&self, host: &str, secure: bool) -> (Option<String>, Vec<String>) {
        let ip = match self.resolver.ipv4(host).await {
            Ok(ip) => ip,
            Err(e) => {
                warn!(host, error = %e, "IP lookup failed");
                None
            }
        };

        if !secure {
            return (ip, Vec::new());
        }

        let mx = match self.resolver.mx(host).await {
            Ok(mx) => mx,
            Err(e) => {
                warn!(host, error = %e, "MX lookup failed");
                Vec::new()
            }
        };

        (ip, mx)
    }
}

impl<R: Resolve> Probe for Prober<R> {
    async fn probe(&self, unit: &Unit, variant: &Variant) -> ProbeResult {
        self.probe_one(unit, variant).await
    }
}
