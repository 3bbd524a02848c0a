use tracing::debug;
use url::Url;

/// Reasons a submitted link is rejected before any task is created
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("invalid URL '{url}': {source}")]
    Invalid {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("unsupported scheme '{0}': only http and https are allowed")]
    UnsupportedScheme(String),

    #[error("URL has no host: {0}")]
    MissingHost(String),
}

/// Validate and normalize a link submitted for crawling.
///
/// Only absolute http(s) URLs with a host are accepted. Host case and default
/// ports are normalized by the parser; the fragment is dropped.
pub fn parse_task_link(raw: &str) -> Result<Url, LinkError> {
    let mut link = Url::parse(raw.trim()).map_err(|source| LinkError::Invalid {
        url: raw.to_string(),
        source,
    })?;

    if link.scheme() != "http" && link.scheme() != "https" {
        return Err(LinkError::UnsupportedScheme(link.scheme().to_string()));
    }

    if link.host_str().map_or(true, str::is_empty) {
        return Err(LinkError::MissingHost(raw.to_string()));
    }

    if link.fragment().is_some() {
        debug!("Dropping fragment from {}", link);
        link.set_fragment(None);
    }

    Ok(link)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_http_and_https() {
        assert_eq!(
            parse_task_link("https://example.com/page").unwrap().as_str(),
            "https://example.com/page"
        );
        assert_eq!(parse_task_link("http://example.com").unwrap().as_str(), "http://example.com/");
    }

    #[test]
    fn test_normalizes_link() {
        // Host case and default ports
        assert_eq!(
            parse_task_link("https://EXAMPLE.com:443/path").unwrap().as_str(),
            "https://example.com/path"
        );

        // Fragment removal
        assert_eq!(
            parse_task_link("  https://example.com/page#section ").unwrap().as_str(),
            "https://example.com/page"
        );
    }

    #[test]
    fn test_rejects_other_schemes() {
        assert!(matches!(
            parse_task_link("ftp://example.com/file"),
            Err(LinkError::UnsupportedScheme(scheme)) if scheme == "ftp"
        ));
        assert!(matches!(
            parse_task_link("mailto:someone@example.com"),
            Err(LinkError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn test_rejects_malformed_links() {
        assert!(matches!(parse_task_link("not a url"), Err(LinkError::Invalid { .. })));
        assert!(matches!(parse_task_link("/relative/path"), Err(LinkError::Invalid { .. })));
        assert!(matches!(parse_task_link("http://"), Err(LinkError::Invalid { .. })));
    }
}
