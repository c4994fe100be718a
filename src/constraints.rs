//! Post-match checks: geofence and shift window.

use chrono::{DateTime, FixedOffset, NaiveTime, Offset, Utc};
use serde::{Deserialize, Serialize};

const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Great-circle distance in metres (haversine).
    pub fn distance_m(&self, other: &GeoPoint) -> f64 {
        let (lat1, lat2) = (self.latitude.to_radians(), other.latitude.to_radians());
        let dlat = lat2 - lat1;
        let dlon = (other.longitude - self.longitude).to_radians();
        let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geofence {
    pub center: GeoPoint,
    pub radius_m: f64,
}

/// Daily working window in the site's local time. `end < start` wraps past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Shift {
    pub start: NaiveTime,
    pub end: NaiveTime,
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

impl Shift {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        let offset = FixedOffset::east_opt(self.utc_offset_minutes.saturating_mul(60))
            .unwrap_or_else(|| Utc.fix());
        let local = at.with_timezone(&offset).time();
        if self.start <= self.end {
            self.start <= local && local < self.end
        } else {
            local >= self.start || local < self.end
        }
    }
}

/// Per-identity rules held by the identity repository.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConstraints {
    pub geofence: Option<Geofence>,
    pub shift: Option<Shift>,
}

/// What the caller asks to be enforced for one verification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConstraints {
    pub location: Option<GeoPoint>,
    pub enforce_schedule: bool,
    /// Evaluation instant; defaults to now.
    pub at: Option<DateTime<Utc>>,
}

impl VerifyConstraints {
    /// Returns the reason for the first failed check.
    pub fn check(&self, rules: &IdentityConstraints) -> Result<(), String> {
        if let (Some(location), Some(fence)) = (self.location, rules.geofence) {
            if !location.is_valid() {
                return Err("location coordinates are missing or invalid".to_string());
            }
            let distance = location.distance_m(&fence.center);
            if distance > fence.radius_m {
                return Err(format!(
                    "location is {distance:.0} m from site, allowed {:.0} m",
                    fence.radius_m
                ));
            }
        }

        if self.enforce_schedule {
            if let Some(shift) = rules.shift {
                let at = self.at.unwrap_or_else(Utc::now);
                if !shift.contains(at) {
                    return Err("outside of scheduled hours".to_string());
                }
            }
        }

        Ok(())
    }
}
