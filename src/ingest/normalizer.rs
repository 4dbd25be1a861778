use crate::ingest::classifier::Classification;
use crate::ingest::handler::{EventPayload, TrackRequest};
use crate::ingest::privacy::{self, QueryParam};
use crate::ingest::site::{normalize_domain, Site};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Timelike, Utc};

/// Maximum stored length for any free-text counter value.
pub const VALUE_MAX: usize = 255;

/// Maximum length for a custom event's unit segment.
const UNIT_MAX: usize = 32;

/// Maximum number of digits in a custom event's numeric value.
const EVENT_VALUE_DIGITS_MAX: usize = 10;

/// Languages are stored as a two-letter code.
pub const LANGUAGE_MAX: usize = 2;

/// Counter metric names produced by the pipeline. Hour and dimension
/// metrics carry their discriminating value in the counter's value column.
pub mod metric {
    pub const PAGEVIEWS: &str = "pageviews";
    pub const PAGEVIEWS_HOURS: &str = "pageviews_hours";
    pub const VISITORS: &str = "visitors";
    pub const VISITORS_HOURS: &str = "visitors_hours";
    pub const PAGE: &str = "page";
    pub const LANDING_PAGE: &str = "landing_page";
    pub const REFERRER: &str = "referrer";
    pub const CAMPAIGN: &str = "campaign";
    pub const CONTINENT: &str = "continent";
    pub const COUNTRY: &str = "country";
    pub const CITY: &str = "city";
    pub const BROWSER: &str = "browser";
    pub const OS: &str = "os";
    pub const DEVICE: &str = "device";
    pub const LANGUAGE: &str = "language";
    pub const RESOLUTION: &str = "resolution";
    pub const EVENT: &str = "event";
}

/// One (metric name, value) pair destined for an atomic counter upsert.
/// Scalar metrics like `pageviews` carry an empty value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metric {
    pub name: &'static str,
    pub value: String,
}

impl Metric {
    pub fn new(name: &'static str, value: &str) -> Self {
        Self {
            name,
            value: sanitize(value, VALUE_MAX),
        }
    }

    pub const fn scalar(name: &'static str) -> Self {
        Self {
            name,
            value: String::new(),
        }
    }
}

/// A validated, filtered, classified request in canonical form.
#[derive(Debug, Clone)]
pub enum NormalizedRecord {
    Pageview(PageviewRecord),
    Event(EventRecord),
}

impl NormalizedRecord {
    pub const fn date(&self) -> NaiveDate {
        match self {
            Self::Pageview(record) => record.date,
            Self::Event(record) => record.date,
        }
    }

    pub fn metrics(&self) -> Vec<Metric> {
        match self {
            Self::Pageview(record) => record.metrics(),
            Self::Event(record) => record.metrics(),
        }
    }
}

/// Canonical pageview. Dimension fields are populated only when the view
/// starts a new visit; repeat in-site navigation records just the pageview
/// counters and the page dimension.
#[derive(Debug, Clone)]
pub struct PageviewRecord {
    pub date: NaiveDate,
    pub hour: u32,
    pub timestamp: NaiveDateTime,
    pub path: String,
    pub is_new_visit: bool,
    pub referrer_host: Option<String>,
    pub campaign: Option<String>,
    pub landing_page: Option<String>,
    pub continent: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub browser: Option<String>,
    pub os: Option<String>,
    pub device: Option<String>,
    pub language: Option<String>,
    pub resolution: Option<String>,
}

impl PageviewRecord {
    pub fn metrics(&self) -> Vec<Metric> {
        let hour = self.hour.to_string();
        let mut metrics = vec![
            Metric::scalar(metric::PAGEVIEWS),
            Metric::new(metric::PAGEVIEWS_HOURS, &hour),
            Metric::new(metric::PAGE, &self.path),
        ];

        if self.is_new_visit {
            metrics.push(Metric::scalar(metric::VISITORS));
            metrics.push(Metric::new(metric::VISITORS_HOURS, &hour));

            let dimensions = [
                (metric::LANDING_PAGE, &self.landing_page),
                (metric::REFERRER, &self.referrer_host),
                (metric::CAMPAIGN, &self.campaign),
                (metric::CONTINENT, &self.continent),
                (metric::COUNTRY, &self.country),
                (metric::CITY, &self.city),
                (metric::BROWSER, &self.browser),
                (metric::OS, &self.os),
                (metric::DEVICE, &self.device),
                (metric::LANGUAGE, &self.language),
                (metric::RESOLUTION, &self.resolution),
            ];
            for (name, value) in dimensions {
                if let Some(value) = value {
                    metrics.push(Metric::new(name, value));
                }
            }
        }

        metrics
    }
}

/// Canonical custom event: just a date and the composite value string.
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub date: NaiveDate,
    pub composite: String,
}

impl EventRecord {
    pub fn metrics(&self) -> Vec<Metric> {
        vec![Metric::new(metric::EVENT, &self.composite)]
    }
}

/// Turn a validated, filtered, classified request into its canonical
/// record. `redacted_query` is the output of the privacy filter; `now` is
/// the single clock reading used for date, hour, and activity timestamp.
pub fn normalize(
    site: &Site,
    request: &TrackRequest,
    classification: &Classification,
    redacted_query: &[QueryParam],
    now: DateTime<Utc>,
) -> NormalizedRecord {
    if let Some(event) = &request.event {
        return NormalizedRecord::Event(EventRecord {
            date: now.date_naive(),
            composite: composite_value(event),
        });
    }

    NormalizedRecord::Pageview(build_pageview(
        site,
        request,
        classification,
        redacted_query,
        now,
    ))
}

fn build_pageview(
    site: &Site,
    request: &TrackRequest,
    classification: &Classification,
    redacted_query: &[QueryParam],
    now: DateTime<Utc>,
) -> PageviewRecord {
    let (path_component, _) = split_page_url(&request.page);
    let query = privacy::serialize_query(redacted_query);
    let path = if query.is_empty() {
        sanitize(&path_component, VALUE_MAX)
    } else {
        sanitize(&format!("{path_component}?{query}"), VALUE_MAX)
    };

    let referrer_host = request.referrer.as_deref().and_then(referrer_host);
    // A referrer on the site's own domain is in-site navigation, not the
    // start of a visit. No referrer at all means a direct entry.
    let is_new_visit = referrer_host
        .as_deref()
        .map_or(true, |host| host != site.domain);

    let mut record = PageviewRecord {
        date: now.date_naive(),
        hour: now.hour(),
        timestamp: now.naive_utc(),
        path,
        is_new_visit,
        referrer_host: None,
        campaign: None,
        landing_page: None,
        continent: None,
        country: None,
        city: None,
        browser: None,
        os: None,
        device: None,
        language: None,
        resolution: None,
    };

    if is_new_visit {
        record.referrer_host = referrer_host;
        record.campaign = privacy::param_value(redacted_query, "utm_campaign")
            .filter(|value| !value.is_empty())
            .map(|value| sanitize(value, VALUE_MAX));
        record.landing_page = Some(record.path.clone());
        record.continent = classification.continent.clone();
        record.country = classification.country.clone();
        record.city = classification.city.clone();
        record.browser = classification.browser.clone();
        record.os = classification.os.clone();
        record.device = classification.device_type.clone();
        record.language = request
            .language
            .as_deref()
            .map(|language| sanitize(language, LANGUAGE_MAX));
        record.resolution = request
            .screen_resolution
            .as_deref()
            .map(|resolution| sanitize(resolution, VALUE_MAX));
    }

    record
}

/// Split a page URL into its path component (default `/`) and raw query
/// string. Accepts both absolute URLs and bare paths; fragments are
/// dropped.
pub fn split_page_url(page: &str) -> (String, String) {
    let path_and_query = page
        .strip_prefix("https://")
        .or_else(|| page.strip_prefix("http://"))
        .map_or(page, |rest| rest.find('/').map_or("", |i| &rest[i..]));

    let path_and_query = path_and_query.split('#').next().unwrap_or("");
    let (path, query) = path_and_query
        .split_once('?')
        .unwrap_or((path_and_query, ""));

    let path = if path.is_empty() { "/" } else { path };
    (path.to_string(), query.to_string())
}

/// The normalized host component of a referrer URL, or `None` when the
/// referrer has no usable host.
fn referrer_host(referrer: &str) -> Option<String> {
    let host = normalize_domain(referrer);
    let host = host.split(':').next().unwrap_or(&host);
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

/// Build the stored composite value for a custom event: `name:value:unit`.
///
/// Colons in the name become spaces so the two delimiters stay
/// unambiguous. The value segment is kept only for finite positive
/// numbers of at most ten digits; the unit only when it fits 32 chars.
/// Segments that fail validation are left empty, never rejected.
fn composite_value(event: &EventPayload) -> String {
    let name = event.name.replace(':', " ");
    let value = event
        .value
        .and_then(format_event_value)
        .unwrap_or_default();
    let unit = event
        .unit
        .as_deref()
        .filter(|unit| unit.chars().count() <= UNIT_MAX)
        .unwrap_or_default();
    format!("{name}:{value}:{unit}")
}

fn format_event_value(value: f64) -> Option<String> {
    if !value.is_finite() || value <= 0.0 {
        return None;
    }
    let formatted = if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        value.to_string()
    };
    if formatted
        .chars()
        .filter(char::is_ascii_digit)
        .count()
        > EVENT_VALUE_DIGITS_MAX
    {
        return None;
    }
    Some(formatted)
}

/// Strip control characters and clamp to `max_len` characters.
pub fn sanitize(input: &str, max_len: usize) -> String {
    input
        .chars()
        .filter(|c| !c.is_control())
        .take(max_len)
        .collect()
}
