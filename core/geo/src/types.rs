//! Locations, rules and verdicts.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A coordinate pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Latitude in [-90, 90] and longitude in [-180, 180], both finite.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// An allowed area: every point within `radius_meters` of the centre.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoCircle {
    pub lat: f64,
    pub lng: f64,
    pub radius_meters: f64,
}

impl GeoCircle {
    pub fn new(lat: f64, lng: f64, radius_meters: f64) -> Self {
        Self {
            lat,
            lng,
            radius_meters,
        }
    }

    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lng)
    }
}

/// Where a request comes from.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

impl GeoLocation {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            ..Default::default()
        }
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    pub fn with_city(mut self, city: impl Into<String>) -> Self {
        self.city = Some(city.into());
        self
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

/// Allow-lists checked against a location.
///
/// Lists are disjunctive: matching any entry passes that dimension. An empty
/// list does not restrict its dimension.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoFencingRule {
    pub is_enabled: bool,
    #[serde(default)]
    pub allowed_countries: Vec<String>,
    #[serde(default)]
    pub allowed_cities: Vec<String>,
    #[serde(default)]
    pub allowed_locations: Vec<GeoCircle>,
    #[serde(default)]
    pub allowed_polygons: Vec<Vec<GeoPoint>>,
}

impl GeoFencingRule {
    /// An enabled rule with no restrictions yet.
    pub fn enabled() -> Self {
        Self {
            is_enabled: true,
            ..Default::default()
        }
    }

    pub fn with_countries<I, S>(mut self, countries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_countries = countries.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_cities<I, S>(mut self, cities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_cities = cities.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_circle(mut self, circle: GeoCircle) -> Self {
        self.allowed_locations.push(circle);
        self
    }

    pub fn with_polygon(mut self, polygon: Vec<GeoPoint>) -> Self {
        self.allowed_polygons.push(polygon);
        self
    }

    /// Whether country or city must be known to evaluate this rule.
    pub fn needs_place(&self) -> bool {
        !self.allowed_countries.is_empty() || !self.allowed_cities.is_empty()
    }
}

/// Why a location was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DenialReason {
    InvalidCoordinates,
    LocationUnavailable,
    Country,
    City,
    Radius,
    Polygon,
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InvalidCoordinates => "invalid coordinates",
            Self::LocationUnavailable => "location could not be determined",
            Self::Country => "country not allowed",
            Self::City => "city not allowed",
            Self::Radius => "outside allowed areas",
            Self::Polygon => "outside allowed regions",
        };
        f.write_str(s)
    }
}

/// Outcome of a geo-fencing check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoVerdict {
    pub allowed: bool,
    /// Human-readable explanation. Never carries internal error text.
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denial: Option<DenialReason>,
    #[serde(default)]
    pub details: BTreeMap<String, String>,
}

impl GeoVerdict {
    pub fn allow(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
            denial: None,
            details: BTreeMap::new(),
        }
    }

    pub fn deny(denial: DenialReason, reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            denial: Some(denial),
            details: BTreeMap::new(),
        }
    }

    pub fn with_detail(mut self, key: &str, value: impl ToString) -> Self {
        self.details.insert(key.to_string(), value.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_wire_names() {
        let json = r#"{
            "isEnabled": true,
            "allowedCountries": ["Turkey"],
            "allowedLocations": [{"lat": 41.0, "lng": 29.0, "radiusMeters": 5000}],
            "allowedPolygons": [[{"lat": 0, "lng": 0}, {"lat": 1, "lng": 0}, {"lat": 1, "lng": 1}]]
        }"#;
        let rule: GeoFencingRule = serde_json::from_str(json).unwrap();
        assert!(rule.is_enabled);
        assert_eq!(rule.allowed_countries, vec!["Turkey"]);
        assert!(rule.allowed_cities.is_empty());
        assert_eq!(rule.allowed_locations[0].radius_meters, 5000.0);
        assert_eq!(rule.allowed_polygons[0].len(), 3);
        assert!(rule.needs_place());
    }

    #[test]
    fn test_point_validity() {
        assert!(GeoPoint::new(90.0, -180.0).is_valid());
        assert!(!GeoPoint::new(90.1, 0.0).is_valid());
        assert!(!GeoPoint::new(0.0, 181.0).is_valid());
        assert!(!GeoPoint::new(f64::NAN, 0.0).is_valid());
    }
}
