//! Predictor configuration.
//!
//! Tunables arrive from the host as a loosely-typed option table
//! ([`PredictorOptions`], PascalCase keys on the wire) and are validated into
//! immutable per-predictor-type configs. One config is shared by every
//! instance of that predictor type through an `Arc` owned by the
//! [`PredictorAsset`]; instances reference it, they never copy it.

use crate::converging::ConvergingInputPredictor;
use crate::linear::LinearPredictor;
use crate::physics::{ColliderShape, PhysicsQuery};
use crate::Predictor;
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use reckon_core::id::PropertyId;
use serde::{Deserialize, Serialize};

pub type Result<T> = core::result::Result<T, ConfigError>;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{option} must be strictly positive, got {value}")]
    NotPositive { option: &'static str, value: f32 },
    #[error("{option} must be at least 1, got {value}")]
    TooFewIterations { option: &'static str, value: u32 },
    #[error("{option} must be a valid angle in (0, pi], got {value}")]
    InvalidAngle { option: &'static str, value: f32 },
    #[error("WrapFloat for {property} needs min < max, got [{min}, {max}]")]
    InvalidWrapRange {
        property: PropertyId,
        min: f32,
        max: f32,
    },
}

/// How a single property id is predicted by the linear predictor.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum PropertyBehavior {
    /// Snap to the authoritative value.
    #[default]
    None,
    /// Extrapolate linearly and blend corrections, like the position channel.
    Linear,
    /// Angle-like scalar in radians; rates and corrections take the shortest
    /// angular path.
    Spherical,
    /// Value wraps cyclically between `min` and `max`; corrections take the
    /// shorter way around the wrap boundary.
    WrapFloat { min: f32, max: f32 },
}

/// Raw option table as submitted by the host. Unset options fall back to the
/// predictor defaults; unknown keys are rejected at deserialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "PascalCase")]
pub struct PredictorOptions {
    /// Blend decay time for corrections, seconds.
    pub correction_duration: Option<f32>,
    /// Units per second, rate-based position convergence.
    pub position_correction_rate: Option<f32>,
    /// Radians per second, rate-based rotation convergence.
    pub rotation_correction_rate: Option<f32>,
    /// Units per second, scale correction decay.
    pub scale_correction_rate: Option<f32>,
    pub sweep_and_slide_iterations: Option<u32>,
    /// Radians. Slides deviating more than this from the motion direction in
    /// a single iteration are rejected.
    pub max_slide_angle: Option<f32>,
    /// Radians. Cumulative deviation cap across all slide iterations.
    pub max_total_slide_angle: Option<f32>,
    /// Constant clearance kept from colliders, units.
    pub separation_offset: Option<f32>,
    /// Divergence beyond which reconciliation teleports through obstacles.
    /// Unset: derived from the collider's largest horizontal extent.
    pub tunnel_distance: Option<f32>,
    /// Linear velocity discrepancy that triggers a replay; `<= 0` disables
    /// the check. Unset: derived from the collider's largest horizontal
    /// extent.
    pub velocity_tolerance: Option<f32>,
    /// Angular velocity discrepancy (rad/s) that triggers a replay; `<= 0`
    /// disables the check.
    pub angular_velocity_tolerance: Option<f32>,
    /// Per-property prediction behavior table.
    pub predicted_properties: Option<BTreeMap<PropertyId, PropertyBehavior>>,
}

/// Immutable configuration for [`LinearPredictor`].
#[derive(Debug, Clone, PartialEq)]
pub struct LinearConfig {
    pub correction_duration: f32,
    pub scale_correction_rate: f32,
    pub predicted_properties: BTreeMap<PropertyId, PropertyBehavior>,
}

impl Default for LinearConfig {
    fn default() -> Self {
        Self {
            correction_duration: 0.25,
            scale_correction_rate: 1.0,
            predicted_properties: BTreeMap::new(),
        }
    }
}

impl LinearConfig {
    pub fn from_options(options: &PredictorOptions) -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            correction_duration: options
                .correction_duration
                .unwrap_or(defaults.correction_duration),
            scale_correction_rate: options
                .scale_correction_rate
                .unwrap_or(defaults.scale_correction_rate),
            predicted_properties: options.predicted_properties.clone().unwrap_or_default(),
        };
        ensure_positive("CorrectionDuration", config.correction_duration)?;
        ensure_positive("ScaleCorrectionRate", config.scale_correction_rate)?;
        for (property, behavior) in &config.predicted_properties {
            if let PropertyBehavior::WrapFloat { min, max } = behavior
                && min >= max
            {
                return Err(ConfigError::InvalidWrapRange {
                    property: *property,
                    min: *min,
                    max: *max,
                });
            }
        }
        Ok(config)
    }
}

/// Immutable configuration for [`ConvergingInputPredictor`].
#[derive(Debug, Clone, PartialEq)]
pub struct ConvergingConfig {
    pub sweep_and_slide_iterations: u32,
    pub max_slide_angle: f32,
    pub max_total_slide_angle: f32,
    pub separation_offset: f32,
    /// `None` derives the value from the entity collider at initialize.
    pub tunnel_distance: Option<f32>,
    /// `None` derives the value from the entity collider at initialize;
    /// an explicit value `<= 0` disables the replay check.
    pub velocity_tolerance: Option<f32>,
    pub angular_velocity_tolerance: f32,
    pub position_correction_rate: f32,
    pub rotation_correction_rate: f32,
}

impl Default for ConvergingConfig {
    fn default() -> Self {
        Self {
            sweep_and_slide_iterations: 3,
            max_slide_angle: core::f32::consts::FRAC_PI_3,
            max_total_slide_angle: core::f32::consts::FRAC_PI_2,
            separation_offset: 0.01,
            tunnel_distance: None,
            velocity_tolerance: None,
            angular_velocity_tolerance: core::f32::consts::PI,
            position_correction_rate: 3.0,
            rotation_correction_rate: core::f32::consts::PI,
        }
    }
}

impl ConvergingConfig {
    pub fn from_options(options: &PredictorOptions) -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            sweep_and_slide_iterations: options
                .sweep_and_slide_iterations
                .unwrap_or(defaults.sweep_and_slide_iterations),
            max_slide_angle: options.max_slide_angle.unwrap_or(defaults.max_slide_angle),
            max_total_slide_angle: options
                .max_total_slide_angle
                .unwrap_or(defaults.max_total_slide_angle),
            separation_offset: options
                .separation_offset
                .unwrap_or(defaults.separation_offset),
            tunnel_distance: options.tunnel_distance,
            velocity_tolerance: options.velocity_tolerance,
            angular_velocity_tolerance: options
                .angular_velocity_tolerance
                .unwrap_or(defaults.angular_velocity_tolerance),
            position_correction_rate: options
                .position_correction_rate
                .unwrap_or(defaults.position_correction_rate),
            rotation_correction_rate: options
                .rotation_correction_rate
                .unwrap_or(defaults.rotation_correction_rate),
        };
        if config.sweep_and_slide_iterations < 1 {
            return Err(ConfigError::TooFewIterations {
                option: "SweepAndSlideIterations",
                value: config.sweep_and_slide_iterations,
            });
        }
        ensure_angle("MaxSlideAngle", config.max_slide_angle)?;
        ensure_angle("MaxTotalSlideAngle", config.max_total_slide_angle)?;
        if config.separation_offset < 0.0 {
            return Err(ConfigError::NotPositive {
                option: "SeparationOffset",
                value: config.separation_offset,
            });
        }
        ensure_positive("PositionCorrectionRate", config.position_correction_rate)?;
        ensure_positive("RotationCorrectionRate", config.rotation_correction_rate)?;
        Ok(config)
    }
}

fn ensure_positive(option: &'static str, value: f32) -> Result<()> {
    if value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NotPositive { option, value })
    }
}

fn ensure_angle(option: &'static str, value: f32) -> Result<()> {
    if value > 0.0 && value <= core::f32::consts::PI {
        Ok(())
    } else {
        Err(ConfigError::InvalidAngle { option, value })
    }
}

/// The factory for predictor instances. Owns the shared config; instancing a
/// predictor hands out another reference to the same `Arc`, so per-entity
/// instantiation never reallocates configuration.
///
/// The input/non-input aliasing optimization is keyed on `Arc` identity: two
/// roles backed by the same asset may share one predictor instance.
#[derive(Debug, Clone)]
pub enum PredictorAsset {
    Linear(Arc<LinearConfig>),
    ConvergingInput(Arc<ConvergingConfig>),
}

impl PredictorAsset {
    pub fn linear(config: LinearConfig) -> Self {
        Self::Linear(Arc::new(config))
    }

    pub fn converging(config: ConvergingConfig) -> Self {
        Self::ConvergingInput(Arc::new(config))
    }

    /// Instantiate a predictor for one entity. `physics` and `shape` are only
    /// consumed by input predictors.
    pub fn instantiate(
        &self,
        physics: &Arc<dyn PhysicsQuery>,
        shape: ColliderShape,
    ) -> Box<dyn Predictor> {
        match self {
            PredictorAsset::Linear(config) => Box::new(LinearPredictor::new(config.clone())),
            PredictorAsset::ConvergingInput(config) => Box::new(ConvergingInputPredictor::new(
                config.clone(),
                physics.clone(),
                shape,
            )),
        }
    }

    /// Whether two assets share the same underlying config allocation.
    pub fn same_asset(&self, other: &PredictorAsset) -> bool {
        match (self, other) {
            (PredictorAsset::Linear(a), PredictorAsset::Linear(b)) => Arc::ptr_eq(a, b),
            (PredictorAsset::ConvergingInput(a), PredictorAsset::ConvergingInput(b)) => {
                Arc::ptr_eq(a, b)
            }
            _ => false,
        }
    }
}
