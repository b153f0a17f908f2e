//! Outbound link screening.
//!
//! User-submitted links and URLs scraped from pages must point at the public
//! internet. Hostnames are checked by name only; no DNS lookup is made.

use reqwest::redirect::{Attempt, Policy};
use reqwest::Url;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Redirect hops followed before giving up.
const MAX_REDIRECTS: usize = 10;

/// Whether `url` targets a public host.
///
/// Loopback, private, link-local, unspecified, broadcast, shared (CGNAT) and
/// documentation addresses are refused, as are `localhost` and the `.local`,
/// `.localhost` and `.internal` suffixes.
#[must_use]
pub fn is_public_url(url: &Url) -> bool {
    let Some(host) = url.host_str() else {
        return false;
    };
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    match bare.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => is_public_v4(ip),
        Ok(IpAddr::V6(ip)) => is_public_v6(ip),
        Err(_) => is_public_domain(bare),
    }
}

fn is_public_domain(domain: &str) -> bool {
    let domain = domain.trim_end_matches('.').to_ascii_lowercase();
    !(domain.is_empty()
        || domain == "localhost"
        || domain.ends_with(".localhost")
        || domain.ends_with(".local")
        || domain.ends_with(".internal"))
}

fn is_public_v4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    let shared = a == 100 && (b & 0xc0) == 64;
    !(ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_documentation()
        || shared
        || a == 0)
}

fn is_public_v6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_public_v4(v4);
    }
    let first = ip.segments()[0];
    let unique_local = (first & 0xfe00) == 0xfc00;
    let link_local = (first & 0xffc0) == 0xfe80;
    !(ip.is_loopback() || ip.is_unspecified() || unique_local || link_local)
}

/// Redirect policy: a request that started on a public host may not be
/// bounced to a non-public one.
#[must_use]
pub fn redirect_policy() -> Policy {
    Policy::custom(|attempt: Attempt<'_>| {
        let started_public = attempt.previous().first().is_some_and(is_public_url);
        if attempt.previous().len() > MAX_REDIRECTS {
            attempt.error("too many redirects")
        } else if started_public && !is_public_url(attempt.url()) {
            attempt.error("redirect to a non-public address refused")
        } else {
            attempt.follow()
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn public(s: &str) -> bool {
        is_public_url(&s.parse().expect("url"))
    }

    #[test]
    fn test_public_hosts_pass() {
        assert!(public("https://www.instagram.com/p/abc/"));
        assert!(public("http://93.184.216.34/video.mp4"));
        assert!(public("https://[2606:4700::1111]/"));
    }

    #[test]
    fn test_local_and_private_hosts_refused() {
        for url in [
            "http://127.0.0.1:8080/admin",
            "http://localhost/",
            "http://api.localhost/",
            "http://printer.local/",
            "http://metadata.google.internal/",
            "http://10.0.0.5/",
            "http://172.16.3.4/",
            "http://192.168.1.1/",
            "http://169.254.169.254/latest/meta-data/",
            "http://0.0.0.0/",
            "http://100.64.0.1/",
            "http://[::1]/",
            "http://[fd00::1]/",
            "http://[fe80::1]/",
            "http://[::ffff:127.0.0.1]/",
        ] {
            assert!(!public(url), "{url} should be refused");
        }
    }

    #[test]
    fn test_numeric_host_forms_are_normalised() {
        // The URL parser turns these into dotted quads before the check.
        assert!(!public("http://2130706433/"));
        assert!(!public("http://0x7f.1/"));
    }
}
