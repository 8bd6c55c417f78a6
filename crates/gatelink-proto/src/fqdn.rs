//! Fully-qualified domain name helpers for links

/// Build the fqdn a link is reachable under.
///
/// An empty subdomain means the link sits directly on the domain.
pub fn link_fqdn(subdomain: &str, domain_uri: &str) -> String {
    if subdomain.is_empty() {
        domain_uri.to_string()
    } else {
        format!("{}.{}", subdomain, domain_uri)
    }
}

/// Split an fqdn into `(subdomain, domain)` given a known domain uri.
///
/// Returns `None` when `fqdn` is neither the domain itself nor one of its
/// subdomains.
pub fn split_fqdn<'a>(fqdn: &'a str, domain_uri: &str) -> Option<&'a str> {
    if fqdn == domain_uri {
        return Some("");
    }

    fqdn.strip_suffix(domain_uri)
        .and_then(|prefix| prefix.strip_suffix('.'))
        .filter(|subdomain| !subdomain.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fqdn_without_subdomain() {
        assert_eq!(link_fqdn("", "example.com"), "example.com");
    }

    #[test]
    fn test_fqdn_with_subdomain() {
        assert_eq!(link_fqdn("api", "example.com"), "api.example.com");
        assert_eq!(link_fqdn("a.b", "example.com"), "a.b.example.com");
    }

    #[test]
    fn test_split_fqdn() {
        assert_eq!(split_fqdn("example.com", "example.com"), Some(""));
        assert_eq!(split_fqdn("api.example.com", "example.com"), Some("api"));
        assert_eq!(split_fqdn("apiexample.com", "example.com"), None);
        assert_eq!(split_fqdn("example.org", "example.com"), None);
    }
}
