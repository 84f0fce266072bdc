use url::{Host, Url};

/// Scheme-less targets are probed over plain HTTP.
pub fn parse_target_url(input: &str) -> Option<Url> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }
    let url = if trimmed.contains("://") {
        Url::parse(trimmed).ok()?
    } else {
        Url::parse(&format!("http://{trimmed}")).ok()?
    };
    match url.scheme() {
        "http" | "https" if url.host().is_some() => Some(url),
        _ => None,
    }
}

/// Host name to resolve, or `None` when the URL already names an address.
pub fn domain_of(url: &Url) -> Option<&str> {
    match url.host()? {
        Host::Domain(domain) => Some(domain),
        Host::Ipv4(_) | Host::Ipv6(_) => None,
    }
}

/// Host as handed to a resolver: IPv6 literals lose their brackets.
pub fn lookup_name(url: &Url) -> Option<String> {
    match url.host()? {
        Host::Domain(domain) => Some(domain.to_string()),
        Host::Ipv4(addr) => Some(addr.to_string()),
        Host::Ipv6(addr) => Some(addr.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_target_url_defaults_to_http() {
        let url = parse_target_url("example.com:8080/health").expect("url");
        assert_eq!(url.scheme(), "http");
        assert_eq!(url.host_str(), Some("example.com"));
        assert_eq!(url.port(), Some(8080));
    }

    #[test]
    fn parse_target_url_keeps_https() {
        let url = parse_target_url(" https://example.com ").expect("url");
        assert_eq!(url.scheme(), "https");
    }

    #[test]
    fn parse_target_url_rejects_other_schemes_and_blanks() {
        assert!(parse_target_url("").is_none());
        assert!(parse_target_url("   ").is_none());
        assert!(parse_target_url("ftp://example.com").is_none());
    }

    #[test]
    fn domain_of_skips_literals() {
        let url = parse_target_url("http://127.0.0.1:9000").expect("url");
        assert_eq!(domain_of(&url), None);
        let url = parse_target_url("http://[::1]:9000").expect("url");
        assert_eq!(domain_of(&url), None);
        let url = parse_target_url("http://localhost:9000").expect("url");
        assert_eq!(domain_of(&url), Some("localhost"));
    }

    #[test]
    fn lookup_name_strips_brackets() {
        let url = parse_target_url("http://[::1]:9000/").expect("url");
        assert_eq!(lookup_name(&url).as_deref(), Some("::1"));
        let url = parse_target_url("example.com").expect("url");
        assert_eq!(lookup_name(&url).as_deref(), Some("example.com"));
    }
}
