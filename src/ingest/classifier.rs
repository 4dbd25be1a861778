use crate::ingest::geoip::GeoReader;
use std::net::IpAddr;

/// Woothee's category for crawler user agents; the device type doubles as
/// the bot signal.
const BOT_CATEGORY: &str = "crawler";

/// Woothee's marker for fields it could not classify.
const UNKNOWN: &str = "UNKNOWN";

/// Maximum stored length for user-agent-derived fields.
const UA_FIELD_MAX: usize = 64;

/// Everything derived from request metadata: user-agent parsing plus
/// best-effort geolocation. Never persisted on its own — folded into the
/// normalized record downstream.
#[derive(Debug, Clone, Default)]
pub struct Classification {
    pub browser: Option<String>,
    pub os: Option<String>,
    pub device_type: Option<String>,
    pub is_bot: bool,
    pub continent: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
}

/// Derives browser/OS/device/bot-status and geolocation from request
/// metadata. Pure and total: malformed input yields absent fields, never
/// an error.
pub struct Classifier {
    geo: GeoReader,
}

impl Classifier {
    pub const fn new(geo: GeoReader) -> Self {
        Self { geo }
    }

    pub const fn geoip_loaded(&self) -> bool {
        self.geo.is_loaded()
    }

    pub fn classify(&self, user_agent: Option<&str>, ip: Option<IpAddr>) -> Classification {
        let mut result = user_agent.map(parse_user_agent).unwrap_or_default();

        if let Some(addr) = ip {
            let geo = self.geo.lookup(addr);
            result.continent = geo.continent;
            result.country = geo.country;
            result.city = geo.city;
        }

        result
    }
}

/// Parse a User-Agent string via woothee.
///
/// Woothee reports "UNKNOWN" for fields it cannot classify; those are
/// normalised to `None`. The device type is woothee's category verbatim,
/// so crawlers surface both as a device type and as the bot flag.
fn parse_user_agent(user_agent: &str) -> Classification {
    let Some(parsed) = woothee::parser::Parser::new().parse(user_agent) else {
        return Classification::default();
    };

    Classification {
        browser: known(parsed.name),
        os: known(parsed.os),
        device_type: known(parsed.category),
        is_bot: parsed.category == BOT_CATEGORY,
        ..Classification::default()
    }
}

/// Normalise a woothee field: drop unknown markers, clamp the length.
fn known(field: &str) -> Option<String> {
    if field.is_empty() || field == UNKNOWN {
        return None;
    }
    Some(field.chars().take(UA_FIELD_MAX).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::geoip::GeoReader;

    const CHROME_LINUX: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.6099.130 Safari/537.36";
    const SAFARI_IPHONE: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_2_1 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Mobile/15E148 Safari/604.1";
    const GOOGLEBOT: &str =
        "Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)";

    fn classifier() -> Classifier {
        Classifier::new(GeoReader::open(None))
    }

    #[test]
    fn test_classify_desktop_browser() {
        let c = classifier().classify(Some(CHROME_LINUX), None);
        assert_eq!(c.browser.as_deref(), Some("Chrome"));
        assert_eq!(c.os.as_deref(), Some("Linux"));
        assert_eq!(c.device_type.as_deref(), Some("pc"));
        assert!(!c.is_bot);
    }

    #[test]
    fn test_classify_mobile_browser() {
        let c = classifier().classify(Some(SAFARI_IPHONE), None);
        assert_eq!(c.browser.as_deref(), Some("Safari"));
        assert_eq!(c.device_type.as_deref(), Some("smartphone"));
        assert!(!c.is_bot);
    }

    #[test]
    fn test_classify_crawler() {
        let c = classifier().classify(Some(GOOGLEBOT), None);
        assert!(c.is_bot);
        assert_eq!(c.device_type.as_deref(), Some(BOT_CATEGORY));
    }

    #[test]
    fn test_classify_garbage_ua() {
        let c = classifier().classify(Some("definitely not a user agent"), None);
        assert!(c.browser.is_none());
        assert!(!c.is_bot);
    }

    #[test]
    fn test_classify_empty_ua() {
        let c = classifier().classify(Some(""), None);
        assert!(c.browser.is_none());
        assert!(c.device_type.is_none());
        assert!(!c.is_bot);
    }

    #[test]
    fn test_classify_missing_ua() {
        let c = classifier().classify(None, None);
        assert!(c.browser.is_none());
        assert!(!c.is_bot);
    }

    #[test]
    fn test_classify_without_geo_database() {
        let c = classifier().classify(Some(CHROME_LINUX), Some("8.8.8.8".parse().unwrap()));
        // Browser fields still parse; geo fields are simply absent.
        assert_eq!(c.browser.as_deref(), Some("Chrome"));
        assert!(c.country.is_none());
        assert!(c.continent.is_none());
        assert!(c.city.is_none());
    }

    #[test]
    fn test_known_normalises_unknown_marker() {
        assert_eq!(known("UNKNOWN"), None);
        assert_eq!(known(""), None);
        assert_eq!(known("Firefox").as_deref(), Some("Firefox"));
    }

    #[test]
    fn test_known_clamps_length() {
        let long = "x".repeat(200);
        assert_eq!(known(&long).unwrap().len(), UA_FIELD_MAX);
    }
}
