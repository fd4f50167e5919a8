//! Configuration types for the fluid simulation parameters.

use std::path::Path;

use serde::{Deserialize, Serialize};

fn default_iterations() -> u32 {
    32
}

fn default_mouse_force() -> f32 {
    10.0
}

fn default_cursor_size() -> f32 {
    1000.0
}

fn default_resolution_scale() -> f32 {
    1.0
}

fn default_timestep() -> f32 {
    1.0 / 60.0
}

/// Top-level simulation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FluidConfig {
    /// Jacobi iterations per pressure solve.
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    /// Scale applied to pointer-injected force.
    #[serde(default = "default_mouse_force")]
    pub mouse_force: f32,
    /// Radius of the force injection cursor, in surface pixels.
    #[serde(default = "default_cursor_size")]
    pub cursor_size: f32,
    /// Simulation grid size relative to the display surface, in (0, 1].
    #[serde(default = "default_resolution_scale")]
    pub resolution_scale: f32,
    /// Fixed timestep in seconds, used when no external dt is supplied.
    #[serde(default = "default_timestep")]
    pub timestep: f32,
}

impl Default for FluidConfig {
    fn default() -> Self {
        Self {
            iterations: default_iterations(),
            mouse_force: default_mouse_force(),
            cursor_size: default_cursor_size(),
            resolution_scale: default_resolution_scale(),
            timestep: default_timestep(),
        }
    }
}

impl FluidConfig {
    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.iterations == 0 {
            return Err(ConfigError::InvalidIterations);
        }
        if !(self.mouse_force.is_finite() && self.mouse_force > 0.0) {
            return Err(ConfigError::InvalidMouseForce);
        }
        if !(self.cursor_size.is_finite() && self.cursor_size > 0.0) {
            return Err(ConfigError::InvalidCursorSize);
        }
        if !(self.resolution_scale.is_finite()
            && self.resolution_scale > 0.0
            && self.resolution_scale <= 1.0)
        {
            return Err(ConfigError::InvalidResolutionScale);
        }
        if !(self.timestep.is_finite() && self.timestep > 0.0) {
            return Err(ConfigError::InvalidTimestep);
        }
        Ok(())
    }

    /// Load and validate a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Pressure solver iteration count must be at least 1")]
    InvalidIterations,
    #[error("Mouse force must be a positive finite number")]
    InvalidMouseForce,
    #[error("Cursor size must be a positive finite number")]
    InvalidCursorSize,
    #[error("Resolution scale must lie in (0, 1]")]
    InvalidResolutionScale,
    #[error("Timestep must be a positive finite number")]
    InvalidTimestep,
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(FluidConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_iterations() {
        let config = FluidConfig {
            iterations: 0,
            ..FluidConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidIterations)
        ));
    }

    #[test]
    fn rejects_out_of_range_resolution_scale() {
        for scale in [0.0, -0.5, 1.5, f32::NAN] {
            let config = FluidConfig {
                resolution_scale: scale,
                ..FluidConfig::default()
            };
            assert!(
                matches!(config.validate(), Err(ConfigError::InvalidResolutionScale)),
                "scale {scale} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_non_positive_timestep() {
        let config = FluidConfig {
            timestep: 0.0,
            ..FluidConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidTimestep)));
    }

    #[test]
    fn loads_config_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "iterations": 16, "mouse_force": 4.0 }}"#).unwrap();
        let config = FluidConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.iterations, 16);
        assert_eq!(config.mouse_force, 4.0);
        // Unspecified fields fall back to defaults.
        assert_eq!(config.timestep, 1.0 / 60.0);
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = FluidConfig {
            iterations: 48,
            mouse_force: 2.5,
            cursor_size: 512.0,
            resolution_scale: 0.5,
            timestep: 0.01,
        };
        let text = serde_json::to_string(&config).unwrap();
        let back: FluidConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(back.iterations, config.iterations);
        assert_eq!(back.resolution_scale, config.resolution_scale);
    }
}
