use std::fmt;

use serde::{Deserialize, Serialize};

/// One alternate set of upstream fetch parameters.
///
/// The cascade walks an ordered list of these until one returns a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Render the page in a real browser on the upstream side.
    pub browser: bool,
    /// Geographic egress for the upstream proxy (ISO country code).
    pub proxy_country: Option<String>,
    /// Enable the upstream's stealth/anti-detection mode.
    pub stealth_mode: bool,
    /// Ask for the rendered page source rather than the raw response.
    pub return_page_source: bool,
}

impl FetchConfig {
    /// Query parameters for the upstream API, excluding url and api key.
    pub fn query_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("browser", self.browser.to_string())];
        if let Some(country) = &self.proxy_country {
            params.push(("proxy_country", country.clone()));
        }
        if self.return_page_source {
            params.push(("return_page_source", "true".to_string()));
        }
        if self.stealth_mode {
            params.push(("stealth_mode", "true".to_string()));
        }
        params
    }

    /// The default cascade, ordered from most to least likely to get through:
    /// browser + stealth from Spain, then progressively cheaper variants and
    /// alternate egress countries, ending with a non-browser last resort.
    pub fn default_cascade() -> Vec<FetchConfig> {
        vec![
            FetchConfig {
                browser: true,
                proxy_country: Some("ES".into()),
                stealth_mode: true,
                return_page_source: true,
            },
            FetchConfig {
                browser: true,
                proxy_country: Some("ES".into()),
                stealth_mode: false,
                return_page_source: true,
            },
            FetchConfig {
                browser: true,
                proxy_country: Some("FR".into()),
                stealth_mode: true,
                return_page_source: true,
            },
            FetchConfig {
                browser: true,
                proxy_country: Some("GB".into()),
                stealth_mode: false,
                return_page_source: true,
            },
            FetchConfig {
                browser: false,
                proxy_country: Some("ES".into()),
                stealth_mode: false,
                return_page_source: true,
            },
        ]
    }
}

impl fmt::Display for FetchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "browser={} country={} stealth={}",
            self.browser,
            self.proxy_country.as_deref().unwrap_or("-"),
            self.stealth_mode
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_cascade_has_five_configs() {
        let cascade = FetchConfig::default_cascade();
        assert_eq!(cascade.len(), 5);
        // Last resort is the only non-browser config
        assert!(cascade[..4].iter().all(|c| c.browser));
        assert!(!cascade[4].browser);
    }

    #[test]
    fn query_params_include_optional_flags() {
        let config = FetchConfig {
            browser: true,
            proxy_country: Some("ES".into()),
            stealth_mode: true,
            return_page_source: true,
        };
        let params = config.query_params();
        assert!(params.contains(&("browser", "true".to_string())));
        assert!(params.contains(&("proxy_country", "ES".to_string())));
        assert!(params.contains(&("stealth_mode", "true".to_string())));
    }
}
