// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of SolHash.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! Daily sunset time from geographic coordinates.
//!
//! Uses the sunrise equation (NOAA approximation, 0.833° solar depression for
//! refraction and disc radius). Accurate to a couple of minutes at temperate
//! latitudes, which is plenty for a "past sunset" gate.

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::{debug, warn};

const J2000: f64 = 2_451_545.0;
const UNIX_EPOCH_JD: f64 = 2_440_587.5;
const OBLIQUITY_DEG: f64 = 23.4397;
const SUNSET_ALTITUDE_DEG: f64 = -0.833;

/// Sunset in UTC for `date` at the given coordinates (east longitude positive).
///
/// Returns `None` during polar day or polar night.
pub fn solar_sunset_utc(date: NaiveDate, latitude: f64, longitude: f64) -> Option<DateTime<Utc>> {
    let epoch = NaiveDate::from_ymd_opt(2000, 1, 1)?;
    let n = (date - epoch).num_days() as f64;

    let mean_solar_noon = n - longitude / 360.0;
    let mean_anomaly = (357.5291 + 0.985_600_28 * mean_solar_noon).rem_euclid(360.0);
    let m = mean_anomaly.to_radians();
    let center = 1.9148 * m.sin() + 0.0200 * (2.0 * m).sin() + 0.0003 * (3.0 * m).sin();
    let ecliptic_longitude = (mean_anomaly + center + 180.0 + 102.9372).rem_euclid(360.0);
    let lambda = ecliptic_longitude.to_radians();

    let transit = J2000 + mean_solar_noon + 0.0053 * m.sin() - 0.0069 * (2.0 * lambda).sin();

    let sin_declination = lambda.sin() * OBLIQUITY_DEG.to_radians().sin();
    let cos_declination = sin_declination.asin().cos();
    let phi = latitude.to_radians();

    let cos_hour_angle = (SUNSET_ALTITUDE_DEG.to_radians().sin() - phi.sin() * sin_declination)
        / (phi.cos() * cos_declination);
    if !(-1.0..=1.0).contains(&cos_hour_angle) {
        return None;
    }

    let hour_angle_deg = cos_hour_angle.acos().to_degrees();
    let set_jd = transit + hour_angle_deg / 360.0;

    let unix_millis = ((set_jd - UNIX_EPOCH_JD) * 86_400_000.0).round() as i64;
    DateTime::<Utc>::from_timestamp_millis(unix_millis)
}

/// Per-day cached sunset for one location
#[derive(Debug, Clone)]
pub struct SunsetCalculator {
    latitude: f64,
    longitude: f64,
    timezone: Tz,
    fallback: NaiveTime,
    cached: Option<(NaiveDate, DateTime<Tz>)>,
}

impl SunsetCalculator {
    pub fn new(
        latitude: f64,
        longitude: f64,
        timezone: Tz,
        fallback_hour: u32,
        fallback_minute: u32,
    ) -> Self {
        let fallback = NaiveTime::from_hms_opt(fallback_hour, fallback_minute, 0)
            .or_else(|| NaiveTime::from_hms_opt(19, 0, 0))
            .unwrap_or(NaiveTime::MIN);
        Self {
            latitude,
            longitude,
            timezone,
            fallback,
            cached: None,
        }
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Local calendar date at `now`
    pub fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.timezone).date_naive()
    }

    /// Sunset for the local day containing `now`, computed once per day
    pub fn sunset(&mut self, now: DateTime<Utc>) -> DateTime<Tz> {
        let date = self.local_date(now);
        if let Some((cached_date, sunset)) = self.cached
            && cached_date == date
        {
            return sunset;
        }

        let sunset = match solar_sunset_utc(date, self.latitude, self.longitude) {
            Some(utc) => utc.with_timezone(&self.timezone),
            None => {
                warn!(
                    "⚠️ No astronomical sunset on {} at ({:.3}, {:.3}), using fallback {}",
                    date, self.latitude, self.longitude, self.fallback
                );
                self.fallback_on(date)
            }
        };

        debug!("🌇 Sunset for {}: {}", date, sunset.format("%H:%M:%S %Z"));
        self.cached = Some((date, sunset));
        sunset
    }

    pub fn is_past_sunset(&mut self, now: DateTime<Utc>) -> bool {
        now >= self.sunset(now).with_timezone(&Utc)
    }

    fn fallback_on(&self, date: NaiveDate) -> DateTime<Tz> {
        let local = date.and_time(self.fallback);
        self.timezone
            .from_local_datetime(&local)
            .earliest()
            .unwrap_or_else(|| self.timezone.from_utc_datetime(&local))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn minutes_of_day(t: DateTime<Tz>) -> i64 {
        i64::from(t.hour()) * 60 + i64::from(t.minute())
    }

    #[test]
    fn test_new_york_summer_solstice() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 21).unwrap();
        let utc = solar_sunset_utc(date, 40.7128, -74.0060).unwrap();
        let local = utc.with_timezone(&chrono_tz::America::New_York);

        // Published: 20:31 EDT
        assert_eq!(local.date_naive(), date);
        assert!((minutes_of_day(local) - (20 * 60 + 31)).abs() <= 10);
    }

    #[test]
    fn test_new_york_winter_solstice() {
        let date = NaiveDate::from_ymd_opt(2024, 12, 21).unwrap();
        let local = solar_sunset_utc(date, 40.7128, -74.0060)
            .unwrap()
            .with_timezone(&chrono_tz::America::New_York);

        // Published: 16:32 EST
        assert!((minutes_of_day(local) - (16 * 60 + 32)).abs() <= 10);
    }

    #[test]
    fn test_polar_day_has_no_sunset() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 21).unwrap();
        assert!(solar_sunset_utc(date, 78.22, 15.65).is_none());
    }

    #[test]
    fn test_polar_day_uses_fallback() {
        let tz: Tz = "Arctic/Longyearbyen".parse().unwrap();
        let mut calc = SunsetCalculator::new(78.22, 15.65, tz, 19, 30);
        let now = Utc.with_ymd_and_hms(2024, 6, 21, 12, 0, 0).unwrap();

        let sunset = calc.sunset(now);
        assert_eq!((sunset.hour(), sunset.minute()), (19, 30));
        assert!(!calc.is_past_sunset(now));
        assert!(calc.is_past_sunset(Utc.with_ymd_and_hms(2024, 6, 21, 18, 0, 0).unwrap()));
    }

    #[test]
    fn test_cached_per_local_day() {
        let mut calc = SunsetCalculator::new(40.7128, -74.006, chrono_tz::America::New_York, 19, 0);
        let morning = Utc.with_ymd_and_hms(2024, 6, 21, 12, 0, 0).unwrap();
        let evening = Utc.with_ymd_and_hms(2024, 6, 21, 23, 0, 0).unwrap();
        let next_day = Utc.with_ymd_and_hms(2024, 6, 22, 14, 0, 0).unwrap();

        let first = calc.sunset(morning);
        assert_eq!(calc.sunset(evening), first);
        assert_ne!(calc.sunset(next_day), first);

        assert!(!calc.is_past_sunset(evening));
        // 00:45 UTC on the 22nd is 20:45 EDT on the 21st
        assert!(calc.is_past_sunset(Utc.with_ymd_and_hms(2024, 6, 22, 0, 45, 0).unwrap()));
    }
}
