use super::stage::StageCode;
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Growth-duration parameters for one variety
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Recipe {
    pub id: i64,
    /// Variety label shown in alerts
    pub name: String,
    pub seed_soak_hours: f64,
    pub germination_days: f64,
    pub blackout_days: f64,
    pub light_days: f64,
    pub suspend_water_hours: f64,
}

impl Recipe {
    pub fn requires_soaking(&self) -> bool {
        self.seed_soak_hours > 0.0
    }

    pub fn skips_blackout(&self) -> bool {
        self.blackout_days <= 0.0
    }

    /// Expected time spent in a stage, in hours. Harvested has no duration.
    pub fn stage_duration_hours(&self, stage: StageCode) -> f64 {
        match stage {
            StageCode::Soaking => self.seed_soak_hours,
            StageCode::Germination => self.germination_days * 24.0,
            StageCode::Blackout => self.blackout_days * 24.0,
            StageCode::Light => self.light_days * 24.0,
            StageCode::Harvested => 0.0,
        }
    }

    /// `None` when the configured hours do not fit a chrono duration
    pub fn stage_duration(&self, stage: StageCode) -> Option<Duration> {
        hours_to_duration(self.stage_duration_hours(stage))
    }
}

/// Convert fractional hours to a chrono duration at second precision. `None` for
/// non-finite or out-of-range values.
pub fn hours_to_duration(hours: f64) -> Option<Duration> {
    let seconds = (hours * 3600.0).round();
    if !seconds.is_finite() || seconds.abs() >= i64::MAX as f64 {
        return None;
    }
    Duration::try_seconds(seconds as i64)
}

/// Elapsed hours of a chrono duration, fractional
pub fn duration_to_hours(duration: Duration) -> f64 {
    duration.num_seconds() as f64 / 3600.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipe() -> Recipe {
        Recipe {
            id: 1,
            name: "Sunflower".to_string(),
            seed_soak_hours: 8.0,
            germination_days: 2.0,
            blackout_days: 0.0,
            light_days: 6.5,
            suspend_water_hours: 12.0,
        }
    }

    #[test]
    fn test_stage_durations() {
        let recipe = recipe();
        assert_eq!(recipe.stage_duration_hours(StageCode::Soaking), 8.0);
        assert_eq!(recipe.stage_duration_hours(StageCode::Germination), 48.0);
        assert_eq!(recipe.stage_duration_hours(StageCode::Light), 156.0);
        assert_eq!(recipe.stage_duration_hours(StageCode::Harvested), 0.0);
        assert!(recipe.skips_blackout());
        assert!(recipe.requires_soaking());
    }

    #[test]
    fn test_hours_conversion() {
        assert_eq!(hours_to_duration(1.5), Some(Duration::minutes(90)));
        assert_eq!(duration_to_hours(Duration::minutes(45)), 0.75);
    }

    #[test]
    fn test_out_of_range_hours_have_no_duration() {
        assert_eq!(hours_to_duration(f64::INFINITY), None);
        assert_eq!(hours_to_duration(f64::NAN), None);
        assert_eq!(hours_to_duration(1e300), None);
        assert_eq!(hours_to_duration(-1e300), None);

        let mut recipe = recipe();
        recipe.light_days = 1e18;
        assert_eq!(recipe.stage_duration(StageCode::Light), None);
        assert_eq!(
            recipe.stage_duration(StageCode::Germination),
            Some(Duration::hours(48))
        );
    }
}
