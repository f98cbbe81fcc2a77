//! Destination rewriting: resolving a routing value against the configured
//! `host=target` table, and the precedence between cookie, header and cache
//! as sources of that value.

use crate::config::Config;
use crate::context::RoutingContextCache;
use crate::error::{Error, Result};
use http::HeaderMap;

/// Parses `routing_value` (a comma-separated list of `host=target` pairs)
/// and returns the target for `request_host`, or `original_dst` unchanged
/// if no entry matches.
///
/// A pair with fewer than two `=`-separated parts is a malformed-header
/// error. A pair whose key equals its value is a self-mapping and is
/// skipped rather than honored, so a routing table entry can never loop the
/// connection back to this proxy. A matching target with no `:` gets `:80`
/// appended.
pub fn resolve(routing_value: &str, request_host: &str, original_dst: &str) -> Result<String> {
    for pair in routing_value.split(',') {
        let (host, target) = pair
            .split_once('=')
            .ok_or_else(|| Error::MalformedRouting(routing_value.to_string()))?;

        if host == target {
            continue;
        }
        if host != request_host {
            continue;
        }

        return Ok(if target.contains(':') {
            target.to_string()
        } else {
            format!("{}:80", target)
        });
    }

    Ok(original_dst.to_string())
}

/// Extracts the routing value to apply to this request, in precedence order:
/// the configured cookie (if enabled and present), then the configured
/// header, then a cached value carried over from a sibling connection under
/// the request's id. Returns `None` if none of those sources have anything.
pub fn routing_value(
    headers: &HeaderMap,
    request_id: Option<&str>,
    config: &Config,
    cache: &RoutingContextCache,
) -> Option<String> {
    if config.routing_cookie_enabled {
        if let Some(value) = cookie_value(headers, &config.routing_cookie_name) {
            return Some(value);
        }
    }

    if let Some(value) = headers
        .get(&config.routing_header_name)
        .and_then(|v| v.to_str().ok())
    {
        return Some(value.to_string());
    }

    request_id.and_then(|id| cache.get(&id.to_string()))
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(http::header::COOKIE).and_then(|v| v.to_str().ok()).and_then(|raw| {
        raw.split(';').find_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let cookie_name = parts.next()?.trim();
            let value = parts.next()?.trim();
            (cookie_name == name).then(|| value.to_string())
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s1_port_defaulting() {
        let resolved = resolve("svc=canary,other=z:8080", "svc", "10.0.0.1:80").unwrap();
        assert_eq!(resolved, "canary:80");
    }

    #[test]
    fn s2_passthrough() {
        let resolved = resolve("foo=bar", "baz", "10.0.0.1:80").unwrap();
        assert_eq!(resolved, "10.0.0.1:80");
    }

    #[test]
    fn s3_malformed() {
        let err = resolve("foo", "foo", "x:1").unwrap_err();
        assert_eq!(err.to_string(), "malformed routing header: 'foo'");
    }

    #[test]
    fn s4_self_loop() {
        let resolved = resolve("a=a,b=c:9", "a", "o:1").unwrap();
        assert_eq!(resolved, "o:1");
    }

    #[test]
    fn explicit_target_port_overrides_default() {
        let resolved = resolve("svc-a=10.0.0.5:9090", "svc-a", "10.0.0.1:8080").unwrap();
        assert_eq!(resolved, "10.0.0.5:9090");
    }

    #[test]
    fn resolving_the_same_value_twice_is_idempotent() {
        let first = resolve("svc-a=10.0.0.5", "svc-a", "10.0.0.1:8080").unwrap();
        let second = resolve("svc-a=10.0.0.5", "svc-a", "10.0.0.1:8080").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn cookie_takes_precedence_over_header() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::COOKIE, "route-to=svc-a=10.0.0.5".parse().unwrap());
        headers.insert("x-route-to", "svc-b=10.0.0.9".parse().unwrap());
        let config = Config {
            routing_cookie_enabled: true,
            ..Config::default()
        };
        let cache = RoutingContextCache::new(std::time::Duration::from_secs(60));
        let value = routing_value(&headers, None, &config, &cache);
        assert_eq!(value.as_deref(), Some("svc-a=10.0.0.5"));
    }

    #[test]
    fn falls_back_to_cache_when_no_header_or_cookie() {
        let headers = HeaderMap::new();
        let config = Config::default();
        let cache = RoutingContextCache::new(std::time::Duration::from_secs(60));
        cache.insert("req-1".to_string(), "svc-a=10.0.0.5".to_string());
        let value = routing_value(&headers, Some("req-1"), &config, &cache);
        assert_eq!(value.as_deref(), Some("svc-a=10.0.0.5"));
    }
}
