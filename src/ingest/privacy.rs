use ipnet::IpNet;
use std::net::IpAddr;

/// Reserved entry in a site's excluded-parameter list meaning
/// "strip the entire query string".
pub const STRIP_ALL_PARAMS: &str = "&";

/// One `key=value` pair from a page URL's query string, kept in its raw
/// (undecoded) form so redaction round-trips byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryParam {
    pub name: String,
    /// `None` when the original segment had no `=` at all.
    pub value: Option<String>,
}

/// Parse a newline-separated exclusion list into networks.
///
/// Entries may be single addresses (`203.0.113.9`) or CIDR blocks
/// (`10.0.0.0/8`, `2001:db8::/32`); single addresses become host networks.
/// Unparseable entries are skipped with a warning so one typo in the
/// dashboard does not disable the rest of the list.
pub fn parse_ip_list(raw: &str) -> Vec<IpNet> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            if let Ok(net) = line.parse::<IpNet>() {
                return Some(net);
            }
            if let Ok(addr) = line.parse::<IpAddr>() {
                return Some(IpNet::from(addr));
            }
            tracing::warn!(entry = line, "Skipping unparseable excluded-IP entry");
            None
        })
        .collect()
}

/// Parse a newline-separated excluded-parameter list.
pub fn parse_param_list(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

/// Whether the client IP matches any excluded address or block.
pub fn ip_excluded(networks: &[IpNet], ip: IpAddr) -> bool {
    networks.iter().any(|net| net.contains(&ip))
}

/// Parse a raw query string into ordered parameters.
fn parse_query(query: &str) -> Vec<QueryParam> {
    query
        .split('&')
        .filter(|segment| !segment.is_empty())
        .map(|segment| match segment.split_once('=') {
            Some((name, value)) => QueryParam {
                name: name.to_string(),
                value: Some(value.to_string()),
            },
            None => QueryParam {
                name: segment.to_string(),
                value: None,
            },
        })
        .collect()
}

/// Apply the site's parameter exclusions to a raw query string.
///
/// If the list contains the [`STRIP_ALL_PARAMS`] sentinel the whole query is
/// dropped; otherwise listed names are removed and the remaining parameters
/// keep their original order.
pub fn redact_query(query: &str, excluded: &[String]) -> Vec<QueryParam> {
    if excluded.iter().any(|entry| entry == STRIP_ALL_PARAMS) {
        return Vec::new();
    }
    parse_query(query)
        .into_iter()
        .filter(|param| !excluded.iter().any(|entry| *entry == param.name))
        .collect()
}

/// Re-serialize parameters in a stable form.
pub fn serialize_query(params: &[QueryParam]) -> String {
    params
        .iter()
        .map(|param| match &param.value {
            Some(value) => format!("{}={value}", param.name),
            None => param.name.clone(),
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Look up a parameter's value by name, for dimension extraction after
/// redaction.
pub fn param_value<'a>(params: &'a [QueryParam], name: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|param| param.name == name)
        .and_then(|param| param.value.as_deref())
}
