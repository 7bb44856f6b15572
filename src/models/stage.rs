use serde::{Deserialize, Serialize};
use std::fmt;

/// Growth stage codes in lifecycle order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageCode {
    /// Seeds soaking before planting
    Soaking,
    /// Seeds germinating on trays
    Germination,
    /// Trays covered to force stem elongation
    Blackout,
    /// Trays under light until harvest
    Light,
    /// Crop cut and recorded
    Harvested,
}

impl StageCode {
    pub const ALL: [StageCode; 5] = [
        Self::Soaking,
        Self::Germination,
        Self::Blackout,
        Self::Light,
        Self::Harvested,
    ];

    /// Default catalog sort order
    pub fn default_sort_order(&self) -> i32 {
        match self {
            Self::Soaking => 1,
            Self::Germination => 2,
            Self::Blackout => 3,
            Self::Light => 4,
            Self::Harvested => 5,
        }
    }

    /// Stages reachable from this one by a forward transition
    pub fn forward_targets(&self) -> &'static [StageCode] {
        match self {
            Self::Soaking => &[Self::Germination],
            Self::Germination => &[Self::Blackout, Self::Light],
            Self::Blackout => &[Self::Light],
            Self::Light => &[Self::Harvested],
            Self::Harvested => &[],
        }
    }

    /// Stages reachable from this one by a revert
    pub fn backward_targets(&self) -> &'static [StageCode] {
        match self {
            Self::Soaking => &[],
            Self::Germination => &[Self::Soaking],
            Self::Blackout => &[Self::Germination],
            Self::Light => &[Self::Blackout, Self::Germination],
            Self::Harvested => &[Self::Light],
        }
    }

    /// Timestamps that must be populated for a crop to count as being in this stage
    pub fn required_timestamps(&self) -> &'static [StageCode] {
        match self {
            Self::Soaking => &[Self::Soaking],
            Self::Germination => &[Self::Germination],
            Self::Blackout => &[Self::Germination, Self::Blackout],
            Self::Light => &[Self::Germination, Self::Light],
            Self::Harvested => &[Self::Light, Self::Harvested],
        }
    }

    /// Name of the crop column holding this stage's entry timestamp
    pub fn timestamp_field(&self) -> &'static str {
        match self {
            Self::Soaking => "soaking_at",
            Self::Germination => "germination_at",
            Self::Blackout => "blackout_at",
            Self::Light => "light_at",
            Self::Harvested => "harvested_at",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Harvested)
    }
}

impl fmt::Display for StageCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Soaking => write!(f, "soaking"),
            Self::Germination => write!(f, "germination"),
            Self::Blackout => write!(f, "blackout"),
            Self::Light => write!(f, "light"),
            Self::Harvested => write!(f, "harvested"),
        }
    }
}

impl std::str::FromStr for StageCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "soaking" => Ok(Self::Soaking),
            "germination" => Ok(Self::Germination),
            "blackout" => Ok(Self::Blackout),
            "light" => Ok(Self::Light),
            "harvested" => Ok(Self::Harvested),
            _ => Err(format!("Invalid stage code: {s}")),
        }
    }
}

/// A row of the stage catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub id: i64,
    pub code: StageCode,
    pub sort_order: i32,
    pub is_active: bool,
}

impl Stage {
    /// The catalog seeded by the initial migration
    pub fn default_catalog() -> Vec<Stage> {
        StageCode::ALL
            .iter()
            .map(|code| Stage {
                id: i64::from(code.default_sort_order()),
                code: *code,
                sort_order: code.default_sort_order(),
                is_active: true,
            })
            .collect()
    }
}
