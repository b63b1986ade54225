use std::net::IpAddr;

use url::{Host, Url};

/// Finds the registered redirect URI that `raw` refers to.
///
/// An empty `raw` selects the registered URI when exactly one is registered. Otherwise the
/// request must match a registered URI exactly as written, or, for `http` loopback
/// addresses, match it in everything but the port (native apps bind ephemeral ports).
pub fn match_redirect_uri(raw: &str, registered: &[String]) -> Option<Url> {
    if raw.is_empty() {
        return match registered {
            [only] => Url::parse(only).ok(),
            _ => None,
        };
    }

    let requested = Url::parse(raw).ok()?;
    for candidate in registered {
        if candidate == raw {
            return Some(requested);
        }
        if let Ok(candidate) = Url::parse(candidate) {
            if is_matching_as_loopback(&requested, &candidate) {
                return Some(requested);
            }
        }
    }
    None
}

fn is_matching_as_loopback(requested: &Url, registered: &Url) -> bool {
    requested.scheme() == "http"
        && registered.scheme() == requested.scheme()
        && is_loopback(requested)
        && registered.host() == requested.host()
        && registered.path() == requested.path()
        && registered.query() == requested.query()
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(Host::Ipv4(ip)) => IpAddr::V4(ip).is_loopback(),
        Some(Host::Ipv6(ip)) => IpAddr::V6(ip).is_loopback(),
        _ => false,
    }
}

/// A redirection endpoint must be an absolute, hierarchical URI without a fragment.
pub fn is_valid_redirect_uri(url: &Url) -> bool {
    !url.cannot_be_a_base() && url.fragment().is_none()
}
