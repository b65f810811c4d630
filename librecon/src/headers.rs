use crate::types::{HeaderFields, HttpStatus};
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::Response;

lazy_static! {
    static ref STATUS_CODE: Regex = Regex::new(r" (\d{3,})").unwrap();
}

const SET_COOKIE: &str = "set-cookie";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedHeaders {
    pub status: HttpStatus,
    pub fields: HeaderFields,
    pub cookies: Vec<String>,
}

/// Parses a raw header block line by line.
///
/// The status comes from the first line only: the first run of three or more
/// digits preceded by a space. Lines without a colon contribute nothing to the
/// structured view. `set-cookie` values accumulate instead of replacing each
/// other.
pub fn parse_header_block(raw: &str) -> ParsedHeaders {
    let mut lines = raw.split('\n').map(|line| line.trim_end_matches('\r'));

    let status = lines
        .next()
        .map(extract_status)
        .unwrap_or(HttpStatus::Missing);

    let mut fields = HeaderFields::new();
    let mut cookies = Vec::new();

    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim().to_ascii_lowercase();
        let value = value.trim();
        if name == SET_COOKIE {
            cookies.push(value.to_string());
        } else {
            fields.insert(&name, value);
        }
    }

    ParsedHeaders {
        status,
        fields,
        cookies,
    }
}

pub fn extract_status(first_line: &str) -> HttpStatus {
    STATUS_CODE
        .captures(first_line)
        .and_then(|caps| caps[1].parse::<u16>().ok())
        .map(HttpStatus::Code)
        .unwrap_or(HttpStatus::Missing)
}

/// Rebuilds the header block of one response from its parsed headers: the
/// status line carries the canonical reason phrase, names come out
/// lower-cased, and repeated headers are grouped. Values are decoded as
/// ISO-8859-1 so no byte is ever rejected.
pub fn render_header_block(response: &Response) -> String {
    let status = response.status();
    let mut raw = format!(
        "{:?} {} {}\r\n",
        response.version(),
        status.as_u16(),
        status.canonical_reason().unwrap_or("")
    );
    for (name, value) in response.headers() {
        raw.push_str(name.as_str());
        raw.push_str(": ");
        raw.extend(value.as_bytes().iter().map(|&b| b as char));
        raw.push_str("\r\n");
    }
    raw.push_str("\r\n");
    raw
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_status_fields_and_cookies() {
        let raw = "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nSet-Cookie: a=1\r\nSet-Cookie: b=2\r\n";
        let parsed = parse_header_block(raw);

        assert_eq!(parsed.status, HttpStatus::Code(200));
        assert_eq!(parsed.fields.get("content-type"), Some("text/html"));
        assert_eq!(parsed.cookies, vec!["a=1", "b=2"]);
        assert_eq!(parsed.fields.get("set-cookie"), None);
    }

    #[test]
    fn status_line_without_code_is_missing() {
        let parsed = parse_header_block("garbage line\r\nServer: x\r\n");
        assert_eq!(parsed.status, HttpStatus::Missing);
        assert_eq!(parsed.fields.get("server"), Some("x"));

        assert_eq!(parse_header_block("").status, HttpStatus::Missing);
        assert_eq!(extract_status("HTTP/1.1 20 OK"), HttpStatus::Missing);
        assert_eq!(extract_status("HTTP/2 301"), HttpStatus::Code(301));
    }

    #[test]
    fn oversized_status_run_is_missing() {
        assert_eq!(extract_status("HTTP/1.1 9999999 Weird"), HttpStatus::Missing);
    }

    #[test]
    fn lines_without_colon_are_ignored_and_values_split_on_first_colon() {
        let raw = "HTTP/1.1 302 Found\r\nno colon here\r\nLocation:  https://example.com:8443/x \r\n\r\n";
        let parsed = parse_header_block(raw);

        assert_eq!(parsed.status, HttpStatus::Code(302));
        assert_eq!(parsed.fields.len(), 1);
        assert_eq!(parsed.fields.get("location"), Some("https://example.com:8443/x"));
    }

    #[test]
    fn concatenated_hops_keep_first_status_and_all_cookies() {
        let raw = "HTTP/1.1 301 Moved Permanently\r\nlocation: /next\r\nset-cookie: hop=1\r\n\r\n\
                   HTTP/1.1 200 OK\r\nlocation: /ignored\r\nset-cookie: final=1\r\n\r\n";
        let parsed = parse_header_block(raw);

        assert_eq!(parsed.status, HttpStatus::Code(301));
        assert_eq!(parsed.cookies, vec!["hop=1", "final=1"]);
        assert_eq!(parsed.fields.get("location"), Some("/ignored"));
        assert_eq!(parsed.fields.len(), 1);
    }

    #[test]
    fn repeated_header_last_value_wins() {
        let raw = "HTTP/1.1 200 OK\r\nX-Id: one\r\nx-id: two\r\n";
        let parsed = parse_header_block(raw);
        assert_eq!(parsed.fields.get("x-id"), Some("two"));
        assert_eq!(parsed.fields.len(), 1);
    }
}
