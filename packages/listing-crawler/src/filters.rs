//! Outbound-link normalization and classification.

use url::Url;

use crate::config::SpiderConfig;

/// File extensions that are never worth visiting.
const ASSET_EXTENSIONS: [&str; 9] = [
    ".js", ".css", ".png", ".jpg", ".jpeg", ".gif", ".svg", ".ico", ".pdf",
];

/// What the traversal does with one extracted link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkClass {
    /// Off-domain, wrong pattern, excluded, or an asset: drop.
    Skip,
    /// Worth traversing but not a listing record.
    Follow,
    /// A listing URL: emit as a discovered record and traverse through it.
    Record,
}

/// Resolve `href` against `base` and normalize: strip query and fragment,
/// ensure a trailing slash on non-document paths.
pub fn normalize(base: &Url, href: &str) -> Option<Url> {
    let mut url = base.join(href).ok()?;
    url.set_query(None);
    url.set_fragment(None);

    let path = url.path();
    if !path.ends_with('/') && !path.ends_with(".html") {
        let with_slash = format!("{}/", path);
        url.set_path(&with_slash);
    }
    Some(url)
}

/// Classify a normalized URL against the spider configuration.
pub fn classify(url: &Url, config: &SpiderConfig) -> LinkClass {
    if url.scheme() != "http" && url.scheme() != "https" {
        return LinkClass::Skip;
    }

    let on_domain = url
        .host_str()
        .map(|host| host == config.allowed_domain || host.ends_with(&format!(".{}", config.allowed_domain)))
        .unwrap_or(false);
    if !on_domain {
        return LinkClass::Skip;
    }

    let text = url.as_str();
    // Normalization may have appended a trailing slash, so match extensions
    // on the trimmed form.
    let lower = text.to_lowercase();
    let lower = lower.trim_end_matches('/');
    if ASSET_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
        return LinkClass::Skip;
    }

    // Traversal stays inside the target pattern.
    if !text.contains(&config.target_url_pattern) {
        return LinkClass::Skip;
    }

    if config
        .excluded_url_patterns
        .iter()
        .any(|pattern| text.contains(pattern))
    {
        return LinkClass::Skip;
    }

    let trimmed = text.trim_end_matches('/');
    if config
        .excluded_url_endings
        .iter()
        .any(|ending| trimmed.ends_with(ending))
    {
        return LinkClass::Follow;
    }

    LinkClass::Record
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> SpiderConfig {
        SpiderConfig::from_value(json!({
            "allowed_domain": "example.com",
            "target_url_pattern": "/venta-viviendas/",
            "excluded_url_patterns": ["/mapa/"],
            "excluded_url_endings": ["/pagina-2"]
        }))
        .unwrap()
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn normalize_strips_query_fragment_and_adds_slash() {
        let base = url("https://www.example.com/venta-viviendas/");
        let normalized = normalize(&base, "/venta-viviendas/madrid?ordenado-por=fecha#top").unwrap();
        assert_eq!(
            normalized.as_str(),
            "https://www.example.com/venta-viviendas/madrid/"
        );
    }

    #[test]
    fn normalize_keeps_html_documents_unslashed() {
        let base = url("https://www.example.com/");
        let normalized = normalize(&base, "/venta-viviendas/piso.html").unwrap();
        assert_eq!(
            normalized.as_str(),
            "https://www.example.com/venta-viviendas/piso.html"
        );
    }

    #[test]
    fn off_domain_and_assets_are_skipped() {
        let c = config();
        assert_eq!(classify(&url("https://other.org/venta-viviendas/x/"), &c), LinkClass::Skip);
        assert_eq!(
            classify(&url("https://www.example.com/venta-viviendas/logo.png"), &c),
            LinkClass::Skip
        );
    }

    #[test]
    fn assets_are_skipped_after_normalization() {
        // normalize appends a trailing slash to extension-less documents and
        // assets alike; the asset filter must still catch the slashed form.
        let c = config();
        let base = url("https://www.example.com/venta-viviendas/");
        let normalized = normalize(&base, "/venta-viviendas/foto.jpg").unwrap();
        assert_eq!(
            normalized.as_str(),
            "https://www.example.com/venta-viviendas/foto.jpg/"
        );
        assert_eq!(classify(&normalized, &c), LinkClass::Skip);

        let normalized = normalize(&base, "/venta-viviendas/plano.PDF").unwrap();
        assert_eq!(classify(&normalized, &c), LinkClass::Skip);
    }

    #[test]
    fn subdomains_stay_on_domain() {
        let c = config();
        assert_eq!(
            classify(&url("https://m.example.com/venta-viviendas/piso/"), &c),
            LinkClass::Record
        );
    }

    #[test]
    fn wrong_pattern_and_exclusions_are_skipped() {
        let c = config();
        assert_eq!(classify(&url("https://www.example.com/alquiler/x/"), &c), LinkClass::Skip);
        assert_eq!(
            classify(&url("https://www.example.com/venta-viviendas/mapa/centro/"), &c),
            LinkClass::Skip
        );
    }

    #[test]
    fn excluded_endings_are_followed_not_recorded() {
        let c = config();
        assert_eq!(
            classify(&url("https://www.example.com/venta-viviendas/madrid/pagina-2/"), &c),
            LinkClass::Follow
        );
    }

    #[test]
    fn matching_listing_urls_are_recorded() {
        let c = config();
        assert_eq!(
            classify(&url("https://www.example.com/venta-viviendas/madrid/piso-123/"), &c),
            LinkClass::Record
        );
    }
}
