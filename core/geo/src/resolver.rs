//! Resolving IPs and coordinates to country and city.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::math::haversine_distance_m;
use crate::types::{GeoCircle, GeoPoint};
use strongbox_common::{Error, Result};

/// Country and city of a location, as far as known.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResolvedPlace {
    pub country: Option<String>,
    pub city: Option<String>,
}

impl ResolvedPlace {
    pub fn new(country: impl Into<String>, city: impl Into<String>) -> Self {
        Self {
            country: Some(country.into()),
            city: Some(city.into()),
        }
    }
}

/// Source of place names for IP addresses and coordinates.
#[async_trait]
pub trait LocationResolver: Send + Sync {
    fn name(&self) -> &str;

    /// Look up the place an IP address is registered to.
    async fn resolve_ip(&self, ip: &str) -> Result<ResolvedPlace>;

    /// Look up the place containing a coordinate.
    async fn reverse_geocode(&self, point: GeoPoint) -> Result<ResolvedPlace>;
}

pub type SharedResolver = Arc<dyn LocationResolver>;

/// Endpoints for [`HttpLocationResolver`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResolverConfig {
    /// ip-api style service (`GET {url}/json/{ip}`).
    pub ip_api_url: String,
    /// Nominatim style service (`GET {url}/reverse?lat=..&lon=..`).
    pub reverse_geocode_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    5
}

impl Default for HttpResolverConfig {
    fn default() -> Self {
        Self {
            ip_api_url: "http://ip-api.com".to_string(),
            reverse_geocode_url: "https://nominatim.openstreetmap.org".to_string(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct IpApiResponse {
    status: String,
    message: Option<String>,
    country: Option<String>,
    city: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReverseResponse {
    error: Option<String>,
    address: Option<ReverseAddress>,
}

#[derive(Debug, Deserialize)]
struct ReverseAddress {
    country: Option<String>,
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
}

/// Resolver over public HTTP geolocation services.
pub struct HttpLocationResolver {
    client: Client,
    ip_api: Url,
    reverse: Url,
}

impl HttpLocationResolver {
    pub fn new(config: HttpResolverConfig) -> Result<Self> {
        let parse = |url: &str| {
            Url::parse(url).map_err(|e| Error::InvalidInput(format!("Invalid resolver URL: {}", e)))
        };
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("strongbox/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            ip_api: parse(&config.ip_api_url)?,
            reverse: parse(&config.reverse_geocode_url)?,
        })
    }

    fn join(base: &Url, path: &str) -> Result<Url> {
        base.join(path)
            .map_err(|e| Error::InvalidInput(format!("Invalid resolver endpoint: {}", e)))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<T> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::Network(format!("{} request failed: {}", what, e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Network(format!("{} returned {}", what, status)));
        }
        response
            .json()
            .await
            .map_err(|e| Error::Serialization(format!("Invalid {} response: {}", what, e)))
    }
}

#[async_trait]
impl LocationResolver for HttpLocationResolver {
    fn name(&self) -> &str {
        "http"
    }

    async fn resolve_ip(&self, ip: &str) -> Result<ResolvedPlace> {
        let url = Self::join(&self.ip_api, &format!("json/{}", ip))?;
        let request = self
            .client
            .get(url)
            .query(&[("fields", "status,message,country,city")]);
        let body: IpApiResponse = self.get_json(request, "IP lookup").await?;

        if body.status != "success" {
            return Err(Error::NotFound(format!(
                "IP lookup failed: {}",
                body.message.unwrap_or_else(|| body.status.clone())
            )));
        }

        debug!(country = ?body.country, city = ?body.city, "Resolved IP");
        Ok(ResolvedPlace {
            country: body.country,
            city: body.city,
        })
    }

    async fn reverse_geocode(&self, point: GeoPoint) -> Result<ResolvedPlace> {
        let url = Self::join(&self.reverse, "reverse")?;
        let request = self.client.get(url).query(&[
            ("format", "jsonv2".to_string()),
            ("lat", point.lat.to_string()),
            ("lon", point.lng.to_string()),
            ("zoom", "10".to_string()),
            ("accept-language", "en".to_string()),
        ]);
        let body: ReverseResponse = self.get_json(request, "Reverse geocode").await?;

        if let Some(error) = body.error {
            return Err(Error::NotFound(format!("Reverse geocode failed: {}", error)));
        }
        let address = body
            .address
            .ok_or_else(|| Error::NotFound("Reverse geocode returned no address".to_string()))?;

        debug!(country = ?address.country, "Reverse geocoded");
        Ok(ResolvedPlace {
            country: address.country,
            city: address.city.or(address.town).or(address.village),
        })
    }
}

/// In-memory resolver for tests and offline use.
#[derive(Debug, Default)]
pub struct StaticResolver {
    ips: HashMap<String, ResolvedPlace>,
    areas: Vec<(GeoCircle, ResolvedPlace)>,
    failing: AtomicBool,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ip(mut self, ip: impl Into<String>, place: ResolvedPlace) -> Self {
        self.ips.insert(ip.into(), place);
        self
    }

    /// Coordinates inside `area` resolve to `place`. First match wins.
    pub fn with_area(mut self, area: GeoCircle, place: ResolvedPlace) -> Self {
        self.areas.push((area, place));
        self
    }

    /// Make every lookup fail with a network error (or recover).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Network("Resolver unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LocationResolver for StaticResolver {
    fn name(&self) -> &str {
        "static"
    }

    async fn resolve_ip(&self, ip: &str) -> Result<ResolvedPlace> {
        self.check()?;
        self.ips
            .get(ip)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Unknown IP {}", ip)))
    }

    async fn reverse_geocode(&self, point: GeoPoint) -> Result<ResolvedPlace> {
        self.check()?;
        self.areas
            .iter()
            .find(|(area, _)| haversine_distance_m(area.center(), point) <= area.radius_meters)
            .map(|(_, place)| place.clone())
            .ok_or_else(|| Error::NotFound("No place at coordinates".to_string()))
    }
}
