use crate::config::ConfigError;
use serde::{ser::SerializeMap, Deserialize, Serialize, Serializer};
use std::{fmt, time::Duration};

/// One ranked domain from the input list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Unit {
    pub rank: u64,
    pub domain: String,
}

impl Unit {
    pub fn new(rank: u64, domain: impl Into<String>) -> Self {
        Self {
            rank,
            domain: domain.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

/// A scheme plus optional subdomain prefix, written the way it appears in
/// configuration: `http://`, `https://www.` and so on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Variant {
    scheme: Scheme,
    subdomain: String,
}

impl Variant {
    pub fn parse(prefix: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidVariant(prefix.to_string());

        let (scheme, rest) = prefix.split_once("://").ok_or_else(invalid)?;
        let scheme = match scheme.to_ascii_lowercase().as_str() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            _ => return Err(invalid()),
        };

        let subdomain = rest.to_ascii_lowercase();
        let well_formed = subdomain.is_empty()
            || (subdomain.ends_with('.')
                && !subdomain.starts_with('.')
                && !subdomain.contains("..")
                && subdomain
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.'));
        if !well_formed {
            return Err(invalid());
        }

        Ok(Self { scheme, subdomain })
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn is_secure(&self) -> bool {
        self.scheme == Scheme::Https
    }

    /// Host that A and MX lookups are made against. Only the `www.` prefix
    /// is carried over; any other subdomain resolves the bare domain.
    pub fn lookup_host(&self, domain: &str) -> String {
        if self.subdomain == "www." {
            format!("www.{}", domain)
        } else {
            domain.to_string()
        }
    }

    pub fn url(&self, domain: &str) -> String {
        format!("{}://{}{}", self.scheme.as_str(), self.subdomain, domain)
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme.as_str(), self.subdomain)
    }
}

impl TryFrom<String> for Variant {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Variant::parse(&value)
    }
}

impl From<Variant> for String {
    fn from(value: Variant) -> Self {
        value.to_string()
    }
}

/// The four probes of the reference run, in probe order.
pub fn default_variants() -> Vec<Variant> {
    ["http://", "http://www.", "https://", "https://www."]
        .iter()
        .filter_map(|p| Variant::parse(p).ok())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpStatus {
    /// Status code taken from the first header line.
    Code(u16),
    /// The server answered but the status line carried no code.
    Missing,
    /// The request never produced a response.
    Unreachable,
}

impl HttpStatus {
    pub fn code(&self) -> Option<u16> {
        match self {
            HttpStatus::Code(code) => Some(*code),
            _ => None,
        }
    }

    pub fn is_unreachable(&self) -> bool {
        matches!(self, HttpStatus::Unreachable)
    }
}

/// Header name/value pairs in first-seen order. Names are lower-cased and
/// unique; writing an existing name replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderFields {
    entries: Vec<(String, String)>,
}

impl HeaderFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        let name = name.to_ascii_lowercase();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for HeaderFields {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Outcome of probing one (unit, variant) pair.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub rank: u64,
    pub domain: String,
    pub variant_url: String,
    /// Host that DNS lookups were made against.
    pub host: String,
    pub status: HttpStatus,
    pub resolved_ip: Option<String>,
    pub headers: HeaderFields,
    pub cookies: Vec<String>,
    pub raw_headers: String,
    pub mx_records: Vec<String>,
    pub elapsed: Duration,
}

impl ProbeResult {
    /// A result for a probe that never got a response. Every optional field
    /// is left empty.
    pub fn unreachable(unit: &Unit, variant: &Variant, elapsed: Duration) -> Self {
        Self {
            rank: unit.rank,
            domain: unit.domain.clone(),
            variant_url: variant.url(&unit.domain),
            host: variant.lookup_host(&unit.domain),
            status: HttpStatus::Unreachable,
            resolved_ip: None,
            headers: HeaderFields::new(),
            cookies: Vec::new(),
            raw_headers: String::new(),
            mx_records: Vec::new(),
            elapsed,
        }
    }

    pub fn is_reachable(&self) -> bool {
        !self.status.is_unreachable()
    }

    /// Headers as a JSON object, with the cookie sequence under `set-cookie`.
    /// That name never appears among the fields, so nothing is shadowed.
    pub fn header_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (name, value) in self.headers.iter() {
            map.insert(name.to_string(), serde_json::Value::from(value));
        }
        map.insert(
            "set-cookie".to_string(),
            serde_json::Value::from(self.cookies.clone()),
        );
        serde_json::Value::Object(map)
    }
}

/// Network knobs shared by every probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub connect_timeout_secs: u64,
    pub timeout_secs: u64,
    pub follow_redirects: bool,
    pub max_redirects: usize,
    pub dns_timeout_secs: u64,
    pub user_agent: String,
}

impl ProbeConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn dns_timeout(&self) -> Duration {
        Duration::from_secs(self.dns_timeout_secs)
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            timeout_secs: 10,
            follow_redirects: true,
            max_redirects: 5,
            dns_timeout_secs: 5,
            user_agent: concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}
