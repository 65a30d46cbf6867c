//! Rule evaluation.

use std::time::Duration;
use tracing::{debug, warn};

use crate::math::{haversine_distance_m, point_in_polygon};
use crate::resolver::{ResolvedPlace, SharedResolver};
use crate::types::{DenialReason, GeoFencingRule, GeoLocation, GeoVerdict};
use strongbox_common::{with_timeout, Result, RetryConfig, RetryExecutor};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Checks locations against geo-fencing rules.
///
/// Country and city missing from a location are looked up through the
/// resolver, and only when the rule restricts by them. Lookups are bounded
/// by a timeout and retried; if they still fail the location is denied.
pub struct GeoFencer {
    resolver: Option<SharedResolver>,
    timeout: Duration,
    retry: RetryExecutor,
}

impl Default for GeoFencer {
    fn default() -> Self {
        Self::offline()
    }
}

impl GeoFencer {
    pub fn new(resolver: SharedResolver, timeout: Duration, retry: RetryConfig) -> Self {
        Self {
            resolver: Some(resolver),
            timeout,
            retry: RetryExecutor::new(retry),
        }
    }

    /// A fencer without a resolver. Country and city must be supplied with
    /// the location.
    pub fn offline() -> Self {
        Self {
            resolver: None,
            timeout: DEFAULT_TIMEOUT,
            retry: RetryExecutor::new(RetryConfig::new(0)),
        }
    }

    /// Evaluate `location` against `rule`. Never fails; errors deny.
    pub async fn evaluate(&self, location: &GeoLocation, rule: &GeoFencingRule) -> GeoVerdict {
        if !rule.is_enabled {
            return GeoVerdict::allow("Geo-fencing disabled");
        }

        let point = location.point();
        if !point.is_valid() {
            return GeoVerdict::deny(
                DenialReason::InvalidCoordinates,
                "Coordinates are out of range",
            );
        }

        let mut place = ResolvedPlace {
            country: location.country.clone(),
            city: location.city.clone(),
        };
        let missing_country = !rule.allowed_countries.is_empty() && place.country.is_none();
        let missing_city = !rule.allowed_cities.is_empty() && place.city.is_none();
        if missing_country || missing_city {
            match self.lookup(location).await {
                Some(found) => {
                    place.country = place.country.or(found.country);
                    place.city = place.city.or(found.city);
                }
                None => {
                    return GeoVerdict::deny(
                        DenialReason::LocationUnavailable,
                        "Location could not be determined",
                    );
                }
            }
        }

        if !rule.allowed_countries.is_empty() {
            let country = place.country.as_deref().unwrap_or_default();
            if !matches_any(country, &rule.allowed_countries) {
                return GeoVerdict::deny(
                    DenialReason::Country,
                    format!("Country '{}' is not in the allowed list", country),
                )
                .with_detail("country", country);
            }
        }

        if !rule.allowed_cities.is_empty() {
            let city = place.city.as_deref().unwrap_or_default();
            if !matches_any(city, &rule.allowed_cities) {
                return GeoVerdict::deny(
                    DenialReason::City,
                    format!("City '{}' is not in the allowed list", city),
                )
                .with_detail("city", city);
            }
        }

        if !rule.allowed_locations.is_empty() {
            let nearest = rule
                .allowed_locations
                .iter()
                .map(|circle| (haversine_distance_m(circle.center(), point), circle.radius_meters))
                .fold(None::<(f64, f64)>, |best, candidate| match best {
                    Some(b) if b.0 - b.1 <= candidate.0 - candidate.1 => Some(b),
                    _ => Some(candidate),
                });
            if let Some((distance, radius)) = nearest {
                if distance > radius {
                    return GeoVerdict::deny(
                        DenialReason::Radius,
                        "Location is outside every allowed area",
                    )
                    .with_detail("nearestDistanceMeters", format!("{:.0}", distance));
                }
            }
        }

        if !rule.allowed_polygons.is_empty()
            && !rule
                .allowed_polygons
                .iter()
                .any(|polygon| point_in_polygon(point, polygon))
        {
            return GeoVerdict::deny(
                DenialReason::Polygon,
                "Location is outside every allowed region",
            );
        }

        let mut verdict = GeoVerdict::allow("Location satisfies all geo-fencing rules");
        if let Some(country) = place.country {
            verdict = verdict.with_detail("country", country);
        }
        if let Some(city) = place.city {
            verdict = verdict.with_detail("city", city);
        }
        verdict
    }

    async fn lookup(&self, location: &GeoLocation) -> Option<ResolvedPlace> {
        let resolver = match &self.resolver {
            Some(resolver) => resolver,
            None => {
                debug!("No resolver configured for place lookup");
                return None;
            }
        };

        let by_coordinates: Result<ResolvedPlace> = self
            .retry
            .execute(|| {
                with_timeout(
                    self.timeout,
                    "reverse geocode",
                    resolver.reverse_geocode(location.point()),
                )
            })
            .await;

        match by_coordinates {
            Ok(place) => return Some(place),
            Err(e) => warn!(resolver = resolver.name(), error = %e, "Reverse geocode failed"),
        }

        let ip = location.ip_address.as_deref()?;
        match self
            .retry
            .execute(|| with_timeout(self.timeout, "IP lookup", resolver.resolve_ip(ip)))
            .await
        {
            Ok(place) => Some(place),
            Err(e) => {
                warn!(resolver = resolver.name(), error = %e, "IP lookup failed");
                None
            }
        }
    }
}

fn matches_any(value: &str, allowed: &[String]) -> bool {
    let value = value.trim();
    !value.is_empty()
        && allowed
            .iter()
            .any(|candidate| candidate.trim().eq_ignore_ascii_case(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{LocationResolver, StaticResolver};
    use crate::types::{GeoCircle, GeoPoint};
    use async_trait::async_trait;
    use std::sync::Arc;

    fn istanbul() -> GeoLocation {
        GeoLocation::new(41.0, 29.0).with_country("Turkey").with_city("Istanbul")
    }

    fn berlin() -> GeoLocation {
        GeoLocation::new(52.52, 13.405).with_country("Germany").with_city("Berlin")
    }

    fn resolver() -> Arc<StaticResolver> {
        Arc::new(
            StaticResolver::new()
                .with_area(
                    GeoCircle::new(41.0, 29.0, 60_000.0),
                    ResolvedPlace::new("Turkey", "Istanbul"),
                )
                .with_ip("198.51.100.4", ResolvedPlace::new("Germany", "Berlin")),
        )
    }

    fn fencer(resolver: Arc<StaticResolver>) -> GeoFencer {
        GeoFencer::new(resolver, Duration::from_secs(1), RetryConfig::new(0))
    }

    #[tokio::test]
    async fn test_disabled_rule_allows() {
        let rule = GeoFencingRule {
            is_enabled: false,
            ..GeoFencingRule::enabled().with_countries(["Nowhere"])
        };
        assert!(GeoFencer::offline().evaluate(&berlin(), &rule).await.allowed);
    }

    #[tokio::test]
    async fn test_country_allow_list() {
        let rule = GeoFencingRule::enabled().with_countries(["Turkey"]);
        let fencer = GeoFencer::offline();

        assert!(fencer.evaluate(&istanbul(), &rule).await.allowed);

        let verdict = fencer.evaluate(&berlin(), &rule).await;
        assert!(!verdict.allowed);
        assert_eq!(verdict.denial, Some(DenialReason::Country));
        assert!(verdict.reason.contains("Country"));
        assert_eq!(verdict.details.get("country").map(String::as_str), Some("Germany"));
    }

    #[tokio::test]
    async fn test_matching_is_case_insensitive() {
        let rule = GeoFencingRule::enabled()
            .with_countries([" turkey "])
            .with_cities(["ISTANBUL"]);
        assert!(GeoFencer::offline().evaluate(&istanbul(), &rule).await.allowed);
    }

    #[tokio::test]
    async fn test_city_checked_after_country() {
        let rule = GeoFencingRule::enabled()
            .with_countries(["Germany"])
            .with_cities(["Munich"]);
        let verdict = GeoFencer::offline().evaluate(&berlin(), &rule).await;
        assert_eq!(verdict.denial, Some(DenialReason::City));
    }

    #[tokio::test]
    async fn test_radius() {
        let rule = GeoFencingRule::enabled()
            .with_circle(GeoCircle::new(52.52, 13.405, 1_000.0))
            .with_circle(GeoCircle::new(41.0, 29.0, 10_000.0));
        let fencer = GeoFencer::offline();

        assert!(fencer.evaluate(&istanbul(), &rule).await.allowed);

        let far = GeoLocation::new(48.85, 2.35);
        let verdict = fencer.evaluate(&far, &rule).await;
        assert_eq!(verdict.denial, Some(DenialReason::Radius));
        assert!(verdict.details.contains_key("nearestDistanceMeters"));
    }

    #[tokio::test]
    async fn test_polygon() {
        let rule = GeoFencingRule::enabled().with_polygon(vec![
            GeoPoint::new(40.0, 28.0),
            GeoPoint::new(42.0, 28.0),
            GeoPoint::new(42.0, 30.0),
            GeoPoint::new(40.0, 30.0),
        ]);
        let fencer = GeoFencer::offline();

        assert!(fencer.evaluate(&GeoLocation::new(41.0, 29.0), &rule).await.allowed);
        let verdict = fencer.evaluate(&GeoLocation::new(-33.9, 151.2), &rule).await;
        assert_eq!(verdict.denial, Some(DenialReason::Polygon));
    }

    #[tokio::test]
    async fn test_invalid_coordinates_deny() {
        let rule = GeoFencingRule::enabled();
        let verdict = GeoFencer::offline()
            .evaluate(&GeoLocation::new(123.0, 0.0), &rule)
            .await;
        assert_eq!(verdict.denial, Some(DenialReason::InvalidCoordinates));
    }

    #[tokio::test]
    async fn test_resolves_missing_country() {
        let rule = GeoFencingRule::enabled().with_countries(["Turkey"]);
        let fencer = fencer(resolver());

        let verdict = fencer.evaluate(&GeoLocation::new(41.02, 28.95), &rule).await;
        assert!(verdict.allowed);
        assert_eq!(verdict.details.get("city").map(String::as_str), Some("Istanbul"));
    }

    #[tokio::test]
    async fn test_falls_back_to_ip() {
        let rule = GeoFencingRule::enabled().with_countries(["Turkey"]);
        let fencer = fencer(resolver());

        let location = GeoLocation::new(10.0, 10.0).with_ip("198.51.100.4");
        let verdict = fencer.evaluate(&location, &rule).await;
        assert_eq!(verdict.denial, Some(DenialReason::Country));
    }

    #[tokio::test]
    async fn test_resolver_failure_denies() {
        let rule = GeoFencingRule::enabled().with_countries(["Turkey"]);
        let resolver = resolver();
        resolver.set_failing(true);
        let fencer = fencer(resolver);

        let verdict = fencer.evaluate(&GeoLocation::new(41.0, 29.0), &rule).await;
        assert!(!verdict.allowed);
        assert_eq!(verdict.denial, Some(DenialReason::LocationUnavailable));
        assert!(!verdict.reason.contains("unavailable"));
    }

    #[tokio::test]
    async fn test_no_lookup_without_place_restriction() {
        let resolver = resolver();
        resolver.set_failing(true);
        let rule = GeoFencingRule::enabled().with_circle(GeoCircle::new(41.0, 29.0, 1_000.0));

        assert!(fencer(resolver)
            .evaluate(&GeoLocation::new(41.0, 29.0), &rule)
            .await
            .allowed);
    }

    struct Stuck;

    #[async_trait]
    impl LocationResolver for Stuck {
        fn name(&self) -> &str {
            "stuck"
        }

        async fn resolve_ip(&self, _ip: &str) -> Result<ResolvedPlace> {
            std::future::pending().await
        }

        async fn reverse_geocode(&self, _point: GeoPoint) -> Result<ResolvedPlace> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_resolver_times_out_and_denies() {
        let fencer = GeoFencer::new(Arc::new(Stuck), Duration::from_millis(50), RetryConfig::new(1));
        let rule = GeoFencingRule::enabled().with_cities(["Istanbul"]);

        let verdict = fencer.evaluate(&GeoLocation::new(41.0, 29.0), &rule).await;
        assert_eq!(verdict.denial, Some(DenialReason::LocationUnavailable));
    }
}
