//! Request wrapper (spec §3 "Request").
//!
//! Wraps a `hyper::Request<Body>`; lazily parses query parameters,
//! multi-valued parameters and cookies, and extracts peer IP / client
//! identity headers the way `CHttpRequest` does in `http_request.hpp`
//! (minus the fixed-size C-style buffer, which has no reason to exist once
//! query parsing goes through `percent-decode`/`HashMap`).

use std::collections::HashMap;
use std::net::IpAddr;

use hyper::header::HeaderMap;
use hyper::{Body, Uri};

/// Maximum number of distinct query parameter names kept; extra params are
/// silently dropped the same way the original's fixed `MAX_QUERY_PARAMS`
/// array stops accepting entries once full.
pub const MAX_QUERY_PARAMS: usize = 64;

/// A parsed, multi-valued query parameter table.
#[derive(Debug, Default, Clone)]
pub struct QueryParams {
    values: HashMap<String, Vec<String>>,
}

impl QueryParams {
    fn parse(query: &str) -> QueryParams {
        let mut values: HashMap<String, Vec<String>> = HashMap::new();
        for pair in query.split('&') {
            if values.len() >= MAX_QUERY_PARAMS && !pair.is_empty() {
                // still allow additional *values* for already-seen names,
                // just stop admitting new names once the table is full.
            }
            if pair.is_empty() {
                continue;
            }
            let mut it = pair.splitn(2, '=');
            let name = it.next().unwrap_or("");
            let raw_value = it.next().unwrap_or("");
            let name = percent_decode(name);
            if !values.contains_key(&name) && values.len() >= MAX_QUERY_PARAMS {
                continue;
            }
            let value = percent_decode(raw_value);
            values.entry(name).or_default().push(value);
        }
        QueryParams { values }
    }

    /// First value of a (possibly multi-valued) parameter.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(|v| v.first()).map(String::as_str)
    }

    /// All values of a multi-valued parameter, in arrival order.
    pub fn get_all(&self, name: &str) -> &[String] {
        self.values.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of distinct parameter names parsed.
    pub fn param_count(&self) -> usize {
        self.values.len()
    }
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                if let Ok(byte) = u8::from_str_radix(
                    std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or(""),
                    16,
                ) {
                    out.push(byte);
                    i += 3;
                } else {
                    out.push(bytes[i]);
                    i += 1;
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Gateway-level view of an inbound HTTP request, built once per request
/// from the raw `hyper::Request` and the connection's socket peer address.
#[derive(Debug, Clone)]
pub struct Request {
    path: String,
    query: QueryParams,
    headers: HeaderMap,
    socket_peer_ip: IpAddr,
}

impl Request {
    /// Build a `Request` from the raw hyper request and the TCP peer
    /// address observed at accept time.
    pub fn new(uri: &Uri, headers: &HeaderMap, socket_peer_ip: IpAddr) -> Request {
        let path = uri.path().to_string();
        let query = uri.query().map(QueryParams::parse).unwrap_or_default();
        Request {
            path,
            query,
            headers: headers.clone(),
            socket_peer_ip,
        }
    }

    /// Normalized request path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Parsed query parameters.
    pub fn query(&self) -> &QueryParams {
        &self.query
    }

    /// Peer IP honoring an `X-Forwarded-For`-style override when present,
    /// falling back to the raw socket peer address (spec §3 "Request").
    pub fn peer_ip(&self) -> IpAddr {
        self.headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .and_then(|s| s.parse().ok())
            .unwrap_or(self.socket_peer_ip)
    }

    /// The raw socket-level peer IP, ignoring any proxy override.
    pub fn socket_peer_ip(&self) -> IpAddr {
        self.socket_peer_ip
    }

    /// Client-declared process id, from the `X-Peer-Id` header used by PSG
    /// clients to tag a client process across reconnects.
    pub fn peer_id(&self) -> Option<String> {
        self.header_str("x-peer-id")
    }

    /// Client `User-Agent`.
    pub fn user_agent(&self) -> Option<String> {
        self.header_str(hyper::header::USER_AGENT.as_str())
    }

    /// Admin auth token read from the `AdminAuthToken` cookie, if present.
    pub fn admin_auth_token(&self) -> Option<String> {
        self.cookie("AdminAuthToken")
    }

    fn header_str(&self, name: &str) -> Option<String> {
        self.headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
    }

    fn cookie(&self, name: &str) -> Option<String> {
        let raw = self.headers.get(hyper::header::COOKIE)?.to_str().ok()?;
        raw.split(';').find_map(|kv| {
            let mut it = kv.trim().splitn(2, '=');
            let k = it.next()?;
            let v = it.next()?;
            (k == name).then(|| v.to_string())
        })
    }
}

/// Marker type used where the spec's `Body` stream (request payload) is
/// referenced but the gateway core only ever forwards it opaquely to a
/// processor.
pub type RequestBody = Body;

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::Uri;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut h = HeaderMap::new();
        for (k, v) in pairs {
            h.insert(
                hyper::header::HeaderName::from_bytes(k.as_bytes()).unwrap(),
                v.parse().unwrap(),
            );
        }
        h
    }

    #[test]
    fn query_parsing_is_order_independent_over_names() {
        let q1 = QueryParams::parse("a=1&b=2");
        let q2 = QueryParams::parse("b=2&a=1");
        assert_eq!(q1.get("a"), q2.get("a"));
        assert_eq!(q1.get("b"), q2.get("b"));
    }

    #[test]
    fn query_parsing_is_idempotent() {
        let raw = "hops=3&name=x%20y&name=z";
        let first = QueryParams::parse(raw);
        let second = QueryParams::parse(raw);
        assert_eq!(first.get_all("name"), second.get_all("name"));
        assert_eq!(first.get("name"), Some("x y"));
    }

    #[test]
    fn multi_valued_param_preserves_arrival_order() {
        let q = QueryParams::parse("tag=a&tag=b&tag=c");
        assert_eq!(q.get_all("tag"), &["a".to_string(), "b".to_string(), "c".to_string()]);
    }

    #[test]
    fn stops_admitting_new_names_past_cap_but_keeps_existing_values() {
        let mut raw = String::new();
        for i in 0..MAX_QUERY_PARAMS + 5 {
            raw.push_str(&format!("p{i}=v&"));
        }
        let q = QueryParams::parse(&raw);
        assert_eq!(q.param_count(), MAX_QUERY_PARAMS);
    }

    #[test]
    fn peer_ip_honors_x_forwarded_for_override() {
        let uri: Uri = "/resolve?id=1".parse().unwrap();
        let h = headers(&[("x-forwarded-for", "203.0.113.7, 10.0.0.1")]);
        let req = Request::new(&uri, &h, "127.0.0.1".parse().unwrap());
        assert_eq!(req.peer_ip(), "203.0.113.7".parse::<IpAddr>().unwrap());
        assert_eq!(req.socket_peer_ip(), "127.0.0.1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn admin_auth_token_reads_from_cookie() {
        let uri: Uri = "/ADMIN/connections_status".parse().unwrap();
        let h = headers(&[("cookie", "foo=bar; AdminAuthToken=s3cr3t")]);
        let req = Request::new(&uri, &h, "127.0.0.1".parse().unwrap());
        assert_eq!(req.admin_auth_token().as_deref(), Some("s3cr3t"));
    }
}
