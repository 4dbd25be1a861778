use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

/// Geographic fields resolved from an IP address, as compound display
/// strings (`US:United States`, `EU:Europe`, `US:Chicago`) matching the
/// counter storage convention.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeoInfo {
    pub continent: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
}

/// Thread-safe wrapper around the MaxMind GeoLite2 database reader.
/// When the database is not available, all lookups return `GeoInfo::default()`.
pub struct GeoReader {
    reader: Option<Arc<maxminddb::Reader<Vec<u8>>>>,
}

impl GeoReader {
    /// Open a MaxMind .mmdb database file.
    ///
    /// Returns a reader that gracefully degrades: if the path is `None`,
    /// the file doesn't exist, or it fails to open, all lookups come back
    /// empty and ingestion proceeds without geo fields.
    pub fn open(path: Option<&Path>) -> Self {
        let reader = path.and_then(|p| {
            if !p.exists() {
                tracing::warn!(path = %p.display(), "GeoIP database not found, geolocation disabled");
                return None;
            }
            match maxminddb::Reader::open_readfile(p) {
                Ok(r) => {
                    tracing::info!(path = %p.display(), "GeoIP database loaded");
                    Some(Arc::new(r))
                }
                Err(e) => {
                    tracing::warn!(path = %p.display(), error = %e, "Failed to open GeoIP database, geolocation disabled");
                    None
                }
            }
        });
        Self { reader }
    }

    /// Returns `true` if a GeoIP database is loaded.
    pub const fn is_loaded(&self) -> bool {
        self.reader.is_some()
    }

    /// Look up geographic fields for an IP address. Best-effort: any
    /// failure along the way yields empty fields, never an error.
    pub fn lookup(&self, addr: IpAddr) -> GeoInfo {
        let Some(reader) = &self.reader else {
            return GeoInfo::default();
        };

        let Ok(lookup_result) = reader.lookup(addr) else {
            return GeoInfo::default();
        };

        let Ok(Some(record)) = lookup_result.decode::<maxminddb::geoip2::City>() else {
            return GeoInfo::default();
        };

        let country_code = record.country.iso_code;

        let continent = compound(record.continent.code, record.continent.names.english);
        let country = compound(country_code, record.country.names.english);
        let city = compound(country_code, record.city.names.english);

        GeoInfo {
            continent,
            country,
            city,
        }
    }
}

/// Join a code and a human-readable name into one display string,
/// falling back to whichever half is present.
fn compound(code: Option<&str>, name: Option<&str>) -> Option<String> {
    match (code, name) {
        (Some(code), Some(name)) => Some(format!("{code}:{name}")),
        (Some(code), None) => Some(code.to_string()),
        (None, Some(name)) => Some(name.to_string()),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_empty_without_reader() {
        let reader = GeoReader::open(None);
        let info = reader.lookup("192.168.1.1".parse().unwrap());
        assert_eq!(info, GeoInfo::default());
    }

    #[test]
    fn test_reader_missing_db_file() {
        let reader = GeoReader::open(Some(Path::new("/nonexistent/GeoLite2.mmdb")));
        assert!(!reader.is_loaded());
        let info = reader.lookup("8.8.8.8".parse().unwrap());
        assert!(info.country.is_none());
    }

    #[test]
    fn test_reader_corrupt_db_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.mmdb");
        std::fs::write(&path, b"definitely not a maxmind database").unwrap();

        let reader = GeoReader::open(Some(&path));
        assert!(!reader.is_loaded());
    }

    #[test]
    fn test_is_loaded_without_db() {
        assert!(!GeoReader::open(None).is_loaded());
    }

    #[test]
    fn test_compound_both_halves() {
        assert_eq!(
            compound(Some("US"), Some("United States")).as_deref(),
            Some("US:United States")
        );
    }

    #[test]
    fn test_compound_partial() {
        assert_eq!(compound(Some("US"), None).as_deref(), Some("US"));
        assert_eq!(compound(None, Some("Europe")).as_deref(), Some("Europe"));
        assert_eq!(compound(None, None), None);
    }
}
