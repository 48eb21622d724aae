// Age-based compression policy
//
// Older media is kept at lower quality. The tier is a pure function of
// (age, settings), so re-running the policy for an unprocessed file always
// yields the same target.
//
//   age <= 1y        -> Original (1080p, JPEG untouched)
//   1y < age <= 5y   -> Medium   (720p, jpgQualityMedium)
//   age > 5y         -> Low      (640p, jpgQualityLow)
//
// A file exactly on a boundary stays in the newer, higher-quality bracket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{
    DAYS_PER_YEAR, TIER_LOW_HEIGHT, TIER_LOW_MIN_AGE_YEARS, TIER_MEDIUM_HEIGHT,
    TIER_MEDIUM_MIN_AGE_YEARS, TIER_ORIGINAL_HEIGHT,
};
use crate::settings::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierLevel {
    Original,
    Medium,
    Low,
}

impl TierLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            TierLevel::Original => "original",
            TierLevel::Medium => "medium",
            TierLevel::Low => "low",
        }
    }
}

/// Encoder targets for one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionTier {
    pub level: TierLevel,
    /// JPEG quality; None keeps the image as close to the original as possible.
    pub jpg_quality: Option<u8>,
    pub video_crf: u8,
    pub max_height: u32,
}

pub fn select_tier(age_years: f64, settings: &Settings) -> CompressionTier {
    if age_years <= TIER_MEDIUM_MIN_AGE_YEARS {
        CompressionTier {
            level: TierLevel::Original,
            jpg_quality: None,
            video_crf: settings.vid_crf_1080p,
            max_height: TIER_ORIGINAL_HEIGHT,
        }
    } else if age_years <= TIER_LOW_MIN_AGE_YEARS {
        CompressionTier {
            level: TierLevel::Medium,
            jpg_quality: Some(settings.jpg_quality_medium),
            video_crf: settings.vid_crf_720p,
            max_height: TIER_MEDIUM_HEIGHT,
        }
    } else {
        CompressionTier {
            level: TierLevel::Low,
            jpg_quality: Some(settings.jpg_quality_low),
            video_crf: settings.vid_crf_640p,
            max_height: TIER_LOW_HEIGHT,
        }
    }
}

/// Age in fractional years. Files dated in the future count as age 0.
pub fn file_age_years(created: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let seconds = (now - created).num_seconds().max(0) as f64;
    seconds / (DAYS_PER_YEAR * 24.0 * 60.0 * 60.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_brackets() {
        let settings = Settings::default();
        assert_eq!(select_tier(0.0, &settings).level, TierLevel::Original);
        assert_eq!(select_tier(0.5, &settings).level, TierLevel::Original);
        assert_eq!(select_tier(2.0, &settings).level, TierLevel::Medium);
        assert_eq!(select_tier(6.0, &settings).level, TierLevel::Low);
    }

    #[test]
    fn test_boundaries_stay_in_newer_bracket() {
        let settings = Settings::default();
        assert_eq!(select_tier(1.0, &settings).level, TierLevel::Original);
        assert_eq!(select_tier(1.0001, &settings).level, TierLevel::Medium);
        assert_eq!(select_tier(5.0, &settings).level, TierLevel::Medium);
        assert_eq!(select_tier(5.0001, &settings).level, TierLevel::Low);
    }

    #[test]
    fn test_knobs_come_from_settings() {
        let mut settings = Settings::default();
        settings.jpg_quality_medium = 81;
        settings.jpg_quality_low = 55;
        settings.vid_crf_1080p = 20;
        settings.vid_crf_720p = 27;
        settings.vid_crf_640p = 33;

        let original = select_tier(0.2, &settings);
        assert_eq!(original.jpg_quality, None);
        assert_eq!(original.video_crf, 20);
        assert_eq!(original.max_height, 1080);

        let medium = select_tier(3.0, &settings);
        assert_eq!(medium.jpg_quality, Some(81));
        assert_eq!(medium.video_crf, 27);
        assert_eq!(medium.max_height, 720);

        let low = select_tier(10.0, &settings);
        assert_eq!(low.jpg_quality, Some(55));
        assert_eq!(low.video_crf, 33);
        assert_eq!(low.max_height, 640);
    }

    #[test]
    fn test_selection_is_deterministic() {
        let settings = Settings::default();
        for age in [0.0, 0.99, 1.0, 3.3, 5.0, 12.0] {
            assert_eq!(select_tier(age, &settings), select_tier(age, &settings));
        }
    }

    #[test]
    fn test_file_age_years() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let two_years = now - Duration::seconds((2.0 * DAYS_PER_YEAR * 86_400.0) as i64);
        assert!((file_age_years(two_years, now) - 2.0).abs() < 1e-9);

        let future = now + Duration::days(3);
        assert_eq!(file_age_years(future, now), 0.0);
    }
}
