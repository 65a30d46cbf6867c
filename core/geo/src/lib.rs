//! Geographic access fencing for Strongbox.
//!
//! A [`GeoFencingRule`] restricts access by country, city, distance from a
//! set of centres, and containment in a set of polygons. [`GeoFencer`]
//! checks a [`GeoLocation`] against a rule in that order and denies on the
//! first violation. Any failure to resolve a location denies.
//!
//! Distances use a spherical earth (radius 6,371 km). That is good enough
//! for city and region sized fences, not for surveying.

pub mod fencer;
pub mod math;
pub mod resolver;
pub mod types;

pub use fencer::GeoFencer;
pub use math::{haversine_distance_m, point_in_polygon, EARTH_RADIUS_M};
pub use resolver::{
    HttpLocationResolver, HttpResolverConfig, LocationResolver, ResolvedPlace, SharedResolver,
    StaticResolver,
};
pub use types::{DenialReason, GeoCircle, GeoFencingRule, GeoLocation, GeoPoint, GeoVerdict};
