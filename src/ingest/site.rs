use crate::config::SiteConfig;
use crate::ingest::privacy;
use ipnet::IpNet;
use std::collections::HashMap;
use std::sync::Arc;

/// A tracked site with its owner-configured privacy settings.
///
/// Sites are loaded once at startup and never mutated afterwards, so a
/// request always sees a consistent snapshot of the configuration.
#[derive(Debug, Clone)]
pub struct Site {
    pub id: i64,
    /// Normalized domain: lower-case, no scheme, no leading `www.`.
    pub domain: String,
    pub tracking_enabled: bool,
    pub domain_key: Option<String>,
    pub excluded_networks: Vec<IpNet>,
    pub excluded_params: Vec<String>,
    pub exclude_bots: bool,
}

impl Site {
    pub fn from_config(config: &SiteConfig) -> Self {
        Self {
            id: config.id,
            domain: normalize_domain(&config.domain),
            tracking_enabled: config.tracking_enabled,
            domain_key: config.domain_key.clone(),
            excluded_networks: privacy::parse_ip_list(&config.excluded_ips),
            excluded_params: privacy::parse_param_list(&config.excluded_params),
            exclude_bots: config.exclude_bots,
        }
    }
}

/// Read-only registry of tracked sites keyed by normalized domain.
pub struct SiteRegistry {
    sites: HashMap<String, Arc<Site>>,
    require_domain_key: bool,
}

/// Why a request could not be matched to an authorized site.
#[derive(Debug, PartialEq, Eq)]
pub enum ResolveError {
    UnknownDomain,
    TrackingDisabled,
    InvalidDomainKey,
}

impl std::fmt::Display for ResolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownDomain => write!(f, "Unknown domain"),
            Self::TrackingDisabled => write!(f, "Tracking is disabled for this site"),
            Self::InvalidDomainKey => write!(f, "Missing or invalid domain key"),
        }
    }
}

impl std::error::Error for ResolveError {}

impl SiteRegistry {
    /// Build the registry from configuration.
    ///
    /// `require_domain_key` is the deployment-wide restriction flag: when
    /// set, every request must carry the site's domain key in the
    /// `X-Domain-Key` header.
    pub fn new(configs: &[SiteConfig], require_domain_key: bool) -> Self {
        let sites = configs
            .iter()
            .map(|c| {
                let site = Site::from_config(c);
                (site.domain.clone(), Arc::new(site))
            })
            .collect();
        Self {
            sites,
            require_domain_key,
        }
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    /// Map a request domain to its site and enforce authorization.
    ///
    /// Read-only, no side effects. The domain-key comparison is byte-exact.
    pub fn resolve(
        &self,
        domain: &str,
        domain_key: Option<&str>,
    ) -> Result<Arc<Site>, ResolveError> {
        let normalized = normalize_domain(domain);
        let site = self
            .sites
            .get(&normalized)
            .ok_or(ResolveError::UnknownDomain)?;

        if !site.tracking_enabled {
            return Err(ResolveError::TrackingDisabled);
        }

        if self.require_domain_key {
            let expected = site.domain_key.as_deref();
            if expected.is_none() || domain_key.map(str::as_bytes) != expected.map(str::as_bytes) {
                return Err(ResolveError::InvalidDomainKey);
            }
        }

        Ok(Arc::clone(site))
    }
}

/// Normalize a domain for lookup and comparison: lower-case, scheme and
/// leading `www.` stripped, anything after the first slash dropped.
pub fn normalize_domain(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    let host = lowered
        .strip_prefix("https://")
        .or_else(|| lowered.strip_prefix("http://"))
        .unwrap_or(&lowered);
    let host = host.split('/').next().unwrap_or(host);
    let host = host.strip_prefix("www.").unwrap_or(host);
    host.to_string()
}
