//! IP geolocation with two interchangeable providers.
//!
//! A local MaxMind MMDB is preferred when configured; otherwise an external
//! HTTP lookup API is used with a short timeout. Lookups fail open: any
//! provider error yields an empty location, never a recording failure.
//! Private and loopback addresses skip the provider entirely and get the
//! configured fallback location. Provider results are cached per address
//! with a TTL so repeat visitors cost one lookup.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use maxminddb::{geoip2, Mmap, Reader};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::GeoIpSettings;

const HTTP_LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);
const LOOKUP_CACHE_CAPACITY: u64 = 10_000;
const LOOKUP_CACHE_TTL: Duration = Duration::from_secs(3_600);

/// Principal city and timezone per country, used when a lookup yields a
/// country but nothing finer so breakdowns stay populated.
const COUNTRY_CITIES: &[(&str, &str, &str)] = &[
    ("AE", "Dubai", "Asia/Dubai"),
    ("SA", "Riyadh", "Asia/Riyadh"),
    ("EG", "Cairo", "Africa/Cairo"),
    ("US", "New York", "America/New_York"),
    ("GB", "London", "Europe/London"),
    ("DE", "Berlin", "Europe/Berlin"),
    ("FR", "Paris", "Europe/Paris"),
    ("IN", "Mumbai", "Asia/Kolkata"),
    ("CN", "Shanghai", "Asia/Shanghai"),
    ("JP", "Tokyo", "Asia/Tokyo"),
];

fn enrich_from_country(info: &mut GeoInfo) {
    let Some(country) = info.country.as_deref() else {
        return;
    };
    if let Some((_, city, tz)) = COUNTRY_CITIES.iter().find(|(code, _, _)| *code == country) {
        if info.city.is_none() {
            info.city = Some(city.to_string());
        }
        if info.timezone.is_none() {
            info.timezone = Some(tz.to_string());
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeoInfo {
    pub country: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub timezone: Option<String>,
}

enum Provider {
    MaxMind(Arc<Reader<Mmap>>),
    Http { client: reqwest::Client, url: String },
    Disabled,
}

pub struct GeoResolver {
    provider: Provider,
    cache: moka::future::Cache<IpAddr, GeoInfo>,
    default_country: String,
    default_city: String,
}

impl GeoResolver {
    pub fn from_settings(geo_enabled: bool, settings: &GeoIpSettings) -> Result<Self> {
        let provider = if !geo_enabled {
            Provider::Disabled
        } else if let Some(path) = settings.mmdb_path.as_deref() {
            let reader = unsafe { Reader::open_mmap(path) }
                .with_context(|| format!("failed to open GeoIP database at {path}"))?;
            Provider::MaxMind(Arc::new(reader))
        } else {
            let client = reqwest::Client::builder()
                .timeout(HTTP_LOOKUP_TIMEOUT)
                .build()
                .context("failed to build geo lookup HTTP client")?;
            Provider::Http {
                client,
                url: settings.api_url.clone(),
            }
        };

        Ok(Self {
            provider,
            cache: moka::future::Cache::builder()
                .max_capacity(LOOKUP_CACHE_CAPACITY)
                .time_to_live(LOOKUP_CACHE_TTL)
                .build(),
            default_country: settings.default_country.clone(),
            default_city: settings.default_city.clone(),
        })
    }

    pub fn enabled(&self) -> bool {
        !matches!(self.provider, Provider::Disabled)
    }

    pub async fn lookup(&self, ip: IpAddr) -> GeoInfo {
        if matches!(self.provider, Provider::Disabled) {
            return GeoInfo::default();
        }

        if is_private(ip) {
            let mut info = GeoInfo {
                country: Some(self.default_country.clone()),
                city: Some(self.default_city.clone()),
                ..Default::default()
            };
            enrich_from_country(&mut info);
            return info;
        }

        if let Some(hit) = self.cache.get(&ip).await {
            return hit;
        }

        let mut info = match &self.provider {
            Provider::MaxMind(reader) => lookup_mmdb(reader, ip),
            Provider::Http { client, url } => lookup_http(client, url, ip).await,
            Provider::Disabled => GeoInfo::default(),
        };
        enrich_from_country(&mut info);

        self.cache.insert(ip, info.clone()).await;
        info
    }
}

fn lookup_mmdb(reader: &Reader<Mmap>, ip: IpAddr) -> GeoInfo {
    let mut info = GeoInfo::default();

    let Ok(result) = reader.lookup(ip) else {
        debug!(ip = %ip, "mmdb lookup failed");
        return info;
    };
    let Ok(Some(city)) = result.decode::<geoip2::City>() else {
        return info;
    };

    info.country = city.country.iso_code.map(|s| s.to_string());
    info.city = city.city.names.english.map(|s| s.to_string());
    if let Some(subdivision) = city.subdivisions.first() {
        info.region = subdivision.names.english.map(|s| s.to_string());
    }
    info.latitude = city.location.latitude;
    info.longitude = city.location.longitude;
    info.timezone = city.location.time_zone.map(|s| s.to_string());

    info
}

#[derive(Debug, Deserialize)]
struct HttpLookupResponse {
    status: String,
    #[serde(rename = "countryCode")]
    country_code: Option<String>,
    city: Option<String>,
    #[serde(rename = "regionName")]
    region_name: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    timezone: Option<String>,
}

async fn lookup_http(client: &reqwest::Client, url_template: &str, ip: IpAddr) -> GeoInfo {
    let url = url_template.replace("{ip}", &ip.to_string());

    let response = match client.get(&url).send().await {
        Ok(r) => r,
        Err(e) => {
            warn!(ip = %ip, error = %e, "geo lookup request failed");
            return GeoInfo::default();
        }
    };

    let body: HttpLookupResponse = match response.json().await {
        Ok(b) => b,
        Err(e) => {
            warn!(ip = %ip, error = %e, "geo lookup returned unparseable body");
            return GeoInfo::default();
        }
    };

    if body.status != "success" {
        debug!(ip = %ip, status = %body.status, "geo lookup unsuccessful");
        return GeoInfo::default();
    }

    GeoInfo {
        country: body.country_code,
        city: body.city,
        region: body.region_name,
        latitude: body.lat,
        longitude: body.lon,
        timezone: body.timezone,
    }
}

/// Addresses a public geo database can never resolve.
fn is_private(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback() || v6.is_unspecified() || (v6.segments()[0] & 0xfe00) == 0xfc00
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GeoIpSettings;

    fn resolver() -> GeoResolver {
        GeoResolver::from_settings(true, &GeoIpSettings::default()).unwrap()
    }

    #[tokio::test]
    async fn private_addresses_get_the_fallback_location() {
        let resolver = resolver();
        for ip in ["192.168.1.5", "10.0.0.1", "127.0.0.1", "fd00::1"] {
            let info = resolver.lookup(ip.parse().unwrap()).await;
            assert_eq!(info.country.as_deref(), Some("AE"), "for {ip}");
            assert_eq!(info.city.as_deref(), Some("Dubai"), "for {ip}");
            assert_eq!(info.timezone.as_deref(), Some("Asia/Dubai"), "for {ip}");
        }
    }

    #[tokio::test]
    async fn disabled_resolver_returns_empty() {
        let resolver = GeoResolver::from_settings(false, &GeoIpSettings::default()).unwrap();
        assert!(!resolver.enabled());
        let info = resolver.lookup("192.168.1.5".parse().unwrap()).await;
        assert_eq!(info, GeoInfo::default());
    }

    #[test]
    fn missing_mmdb_path_is_an_error() {
        let settings = GeoIpSettings {
            mmdb_path: Some("/nonexistent/geo.mmdb".to_string()),
            ..Default::default()
        };
        assert!(GeoResolver::from_settings(true, &settings).is_err());
    }
}
