//! Scan parameters and tile geometry.
//!
//! [`ScanInput`] holds the raw text fields exactly as entered by the user.
//! [`ScanInput::parse`] turns them into [`ScanParameters`], converting the
//! two distances from millimetres into stage device units.

use scan_core::{Position, ScanError, ScanResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Stage device units per millimetre.
pub const DEVICE_UNITS_PER_MM: f64 = 10_000.0;

/// Raw scan fields as entered in the shell or the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanInput {
    /// X axis speed, mm/s
    pub x_speed: String,
    /// Y axis speed, mm/s
    pub y_speed: String,
    /// Trigger pulse frequency, Hz
    pub trigger_frequency: String,
    /// Y travel per tile, mm
    pub y_scan_distance: String,
    /// Number of tiles
    pub tile_count: String,
    /// X offset between tiles, mm
    pub x_tile_step: String,
}

impl Default for ScanInput {
    fn default() -> Self {
        Self {
            x_speed: "0.1".to_string(),
            y_speed: "0.2".to_string(),
            trigger_frequency: "10".to_string(),
            y_scan_distance: "8.0".to_string(),
            tile_count: "10".to_string(),
            x_tile_step: "0.7".to_string(),
        }
    }
}

impl ScanInput {
    /// Replace one field by name. Returns `false` for an unknown field.
    pub fn set(&mut self, field: &str, value: impl Into<String>) -> bool {
        let slot = match field {
            "x_speed" => &mut self.x_speed,
            "y_speed" => &mut self.y_speed,
            "trigger_frequency" | "frequency" => &mut self.trigger_frequency,
            "y_scan_distance" | "distance" => &mut self.y_scan_distance,
            "tile_count" | "tiles" => &mut self.tile_count,
            "x_tile_step" | "step" => &mut self.x_tile_step,
            _ => return false,
        };
        *slot = value.into();
        true
    }

    /// Parse every field, scaling distances to device units.
    ///
    /// # Errors
    /// Returns [`ScanError::Input`] naming the first field that is not a
    /// number of the expected type.
    pub fn parse(&self) -> ScanResult<ScanParameters> {
        Ok(ScanParameters {
            x_speed: parse_field("x_speed", &self.x_speed)?,
            y_speed: parse_field("y_speed", &self.y_speed)?,
            trigger_frequency: parse_field("trigger_frequency", &self.trigger_frequency)?,
            y_scan_distance: parse_field::<f64>("y_scan_distance", &self.y_scan_distance)?
                * DEVICE_UNITS_PER_MM,
            tile_count: parse_field("tile_count", &self.tile_count)?,
            x_tile_step: parse_field::<f64>("x_tile_step", &self.x_tile_step)?
                * DEVICE_UNITS_PER_MM,
        })
    }
}

fn parse_field<T: FromStr>(field: &'static str, raw: &str) -> ScanResult<T> {
    raw.trim().parse().map_err(|_| ScanError::Input {
        field,
        value: raw.to_string(),
    })
}

/// Validated, immutable parameters of one scan run.
///
/// Distances are in device units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanParameters {
    /// X axis speed, mm/s
    pub x_speed: f64,
    /// Y axis speed, mm/s
    pub y_speed: f64,
    /// Trigger pulse frequency, Hz
    pub trigger_frequency: f64,
    /// Y travel per tile, device units
    pub y_scan_distance: f64,
    /// Number of tiles
    pub tile_count: u32,
    /// X offset between tiles, device units
    pub x_tile_step: f64,
}

impl ScanParameters {
    /// Seconds needed to sweep the Y distance at the configured Y speed.
    pub fn total_time(&self) -> f64 {
        self.y_scan_distance / DEVICE_UNITS_PER_MM / self.y_speed
    }

    /// [`total_time`](Self::total_time) as a `Duration`, clamped to zero for
    /// non-finite or negative values.
    pub fn sweep_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.total_time()).unwrap_or(Duration::ZERO)
    }

    /// Y target for a tile: even tiles sweep out, odd tiles sweep back.
    pub fn target_y(&self, tile: u32, origin: &Position) -> f64 {
        if tile % 2 == 0 {
            origin.y + self.y_scan_distance
        } else {
            origin.y
        }
    }

    /// X position after finishing a tile.
    pub fn tile_x(&self, tile: u32, origin: &Position) -> f64 {
        origin.x + f64::from(tile + 1) * self.x_tile_step
    }

    /// True if `tile` is the final tile of the run.
    pub fn is_last_tile(&self, tile: u32) -> bool {
        tile + 1 >= self.tile_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_sweep_for_forty_seconds() {
        let params = ScanInput::default().parse().unwrap();
        assert_eq!(params.y_scan_distance, 80_000.0);
        assert_eq!(params.x_tile_step, 7_000.0);
        assert!((params.total_time() - 40.0).abs() < 1e-9);
        assert_eq!(params.sweep_duration(), Duration::from_secs(40));
    }

    #[test]
    fn y_targets_alternate_between_far_edge_and_origin() {
        let params = ScanInput::default().parse().unwrap();
        let origin = Position::new(0.0, 100.0, 0.0);

        for tile in 0..params.tile_count {
            let expected = if tile % 2 == 0 { 80_100.0 } else { 100.0 };
            assert_eq!(params.target_y(tile, &origin), expected, "tile {tile}");
        }
    }

    #[test]
    fn x_steps_increase_monotonically() {
        let params = ScanInput::default().parse().unwrap();
        let origin = Position::new(1_000.0, 0.0, 0.0);

        let xs: Vec<f64> = (0..params.tile_count)
            .map(|tile| params.tile_x(tile, &origin))
            .collect();
        assert_eq!(xs[0], 8_000.0);
        assert_eq!(xs[9], 71_000.0);
        assert!(xs.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn unparsable_field_names_the_field() {
        let mut input = ScanInput::default();
        input.trigger_frequency = "abc".to_string();

        match input.parse() {
            Err(ScanError::Input { field, value }) => {
                assert_eq!(field, "trigger_frequency");
                assert_eq!(value, "abc");
            }
            other => panic!("expected input error, got {other:?}"),
        }
    }

    #[test]
    fn tile_count_must_be_an_unsigned_integer() {
        let mut input = ScanInput::default();
        input.tile_count = "2.5".to_string();
        assert!(input.parse().is_err());

        input.tile_count = "-1".to_string();
        assert!(input.parse().is_err());
    }

    #[test]
    fn negative_distances_are_accepted() {
        let mut input = ScanInput::default();
        input.y_scan_distance = "-1.5".to_string();
        let params = input.parse().unwrap();
        assert_eq!(params.y_scan_distance, -15_000.0);
    }

    #[test]
    fn set_accepts_field_names_and_short_aliases() {
        let mut input = ScanInput::default();
        assert!(input.set("tiles", "3"));
        assert!(input.set("y_speed", "0.4"));
        assert!(!input.set("z_speed", "1"));
        assert_eq!(input.tile_count, "3");
        assert_eq!(input.y_speed, "0.4");
    }
}
