//! The default prediction strategy: linear/spherical extrapolation of the
//! last two authoritative samples, with corrective blending when new samples
//! arrive.
//!
//! Per predicted channel the predictor moves through three phases:
//! **Idle** (no recent server change) → **Extrapolating** (no new sample this
//! tick, a sync is still at least one frame away) → **Snapped** (a sample
//! just arrived). Velocity is captured once per confirmed sample pair and
//! held constant until the next pair; when a new sample lands, the offset
//! between the old prediction and the received value is blended out over
//! `correction_duration` instead of popping.

use crate::config::{LinearConfig, PropertyBehavior};
use crate::{Predictor, PredictorContext, ServerUpdate};
use alloc::sync::Arc;
use bevy_math::{Quat, Vec3};
use bevy_platform::collections::HashMap;
use reckon_core::correction::{PositionCorrection, RotationCorrection, CORRECTION_EPSILON_SQ};
use reckon_core::id::PropertyId;
use reckon_core::property::{PropertyMap, PropertyValue};
use reckon_core::time::FrameClock;
use reckon_core::transform::{TransformChannels, TransformState};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Extrapolating,
    Snapped,
}

/// Linear extrapolation state for one scalar property.
#[derive(Debug, Clone, Copy)]
struct PropertyChannel {
    behavior: PropertyBehavior,
    previous: Option<(f64, f32)>,
    latest: Option<(f64, f32)>,
    rate: f32,
    predicted: f32,
    correction: f32,
    correction_weight: f32,
}

impl PropertyChannel {
    fn new(behavior: PropertyBehavior) -> Self {
        Self {
            behavior,
            previous: None,
            latest: None,
            rate: 0.0,
            predicted: 0.0,
            correction: 0.0,
            correction_weight: 0.0,
        }
    }

    /// Signed difference `to - from` on this channel's topology.
    fn difference(&self, from: f32, to: f32) -> f32 {
        match self.behavior {
            PropertyBehavior::Spherical => {
                angle_delta(from, to)
            }
            PropertyBehavior::WrapFloat { min, max } => wrap_delta(from, to, min, max),
            _ => to - from,
        }
    }

    fn canonicalize(&self, value: f32) -> f32 {
        match self.behavior {
            PropertyBehavior::Spherical => wrap_value(value, -core::f32::consts::PI, core::f32::consts::PI),
            PropertyBehavior::WrapFloat { min, max } => wrap_value(value, min, max),
            _ => value,
        }
    }

    fn ingest(
        &mut self,
        server_time: f64,
        value: f32,
        frame_delta: f32,
        correction_duration: f32,
        was_extrapolating: bool,
    ) {
        if self.latest.is_some() && was_extrapolating {
            // restart from the current visual value so a correction landing
            // mid-blend stays continuous; shorter path on wrapped topologies
            let visual =
                self.canonicalize(self.predicted + self.correction * self.correction_weight);
            let offset = self.difference(value, visual);
            if offset * offset >= CORRECTION_EPSILON_SQ {
                self.correction = offset;
                self.correction_weight = (1.0 - frame_delta / correction_duration).clamp(0.0, 1.0);
            } else {
                self.correction = 0.0;
                self.correction_weight = 0.0;
            }
        }
        self.previous = self.latest;
        self.latest = Some((server_time, value));
        self.rate = match self.previous {
            Some((previous_time, previous_value)) if server_time > previous_time => {
                self.difference(previous_value, value) / (server_time - previous_time) as f32
            }
            _ => 0.0,
        };
        self.predicted = value;
    }

    fn advance(&mut self, clock: &FrameClock, extrapolate: bool, correction_duration: f32) -> f32 {
        if extrapolate {
            self.predicted = self.canonicalize(self.predicted + self.rate * clock.delta);
        }
        let rendered = self.canonicalize(self.predicted + self.correction * self.correction_weight);
        if self.correction_weight > 0.0 {
            self.correction_weight =
                (self.correction_weight - clock.delta / correction_duration).max(0.0);
        }
        rendered
    }

    fn snap(&mut self, value: f32) {
        self.predicted = value;
        self.rate = 0.0;
        self.correction = 0.0;
        self.correction_weight = 0.0;
    }
}

/// The default "non-input" predictor.
pub struct LinearPredictor {
    config: Arc<LinearConfig>,
    ctx: Option<PredictorContext>,
    phase: Phase,
    /// (server_time, transform) of the two retained samples.
    previous: Option<(f64, TransformState)>,
    latest: Option<(f64, TransformState)>,
    /// Captured once per confirmed pair, held until the next pair.
    linear_velocity: Vec3,
    angular_axis: Vec3,
    angular_rate: f32,
    /// Extrapolated state, before corrections are blended on top.
    predicted: TransformState,
    position_correction: PositionCorrection,
    rotation_correction: RotationCorrection,
    scale_correction: PositionCorrection,
    properties: HashMap<PropertyId, PropertyChannel>,
}

impl LinearPredictor {
    pub fn new(config: Arc<LinearConfig>) -> Self {
        Self {
            config,
            ctx: None,
            phase: Phase::Idle,
            previous: None,
            latest: None,
            linear_velocity: Vec3::ZERO,
            angular_axis: Vec3::Y,
            angular_rate: 0.0,
            predicted: TransformState::IDENTITY,
            position_correction: PositionCorrection::default(),
            rotation_correction: RotationCorrection::default(),
            scale_correction: PositionCorrection::default(),
            properties: HashMap::default(),
        }
    }

    fn clear_motion(&mut self) {
        self.linear_velocity = Vec3::ZERO;
        self.angular_rate = 0.0;
        self.position_correction.clear();
        self.rotation_correction.clear();
        self.scale_correction.clear();
    }

    /// Recompute the held velocity from the retained sample pair.
    fn capture_velocity(&mut self) {
        let (Some((previous_time, previous)), Some((latest_time, latest))) =
            (self.previous.as_ref(), self.latest.as_ref())
        else {
            return;
        };
        let interval = (latest_time - previous_time) as f32;
        if interval <= f32::EPSILON {
            return;
        }
        self.linear_velocity = (latest.position - previous.position) / interval;

        // delta quaternion over the sample interval, as axis-angle, on the
        // shortest arc
        let mut delta = latest.rotation * previous.rotation.inverse();
        if delta.w < 0.0 {
            delta = -delta;
        }
        let (axis, angle) = delta.to_axis_angle();
        self.angular_axis = axis;
        self.angular_rate = angle / interval;
    }

    fn ingest_transform(
        &mut self,
        clock: &FrameClock,
        update: &ServerUpdate<'_>,
        was_extrapolating: bool,
    ) {
        let Some(incoming) = update.transform else {
            return;
        };

        if update.teleport {
            trace!(entity = ?self.ctx.map(|c| c.entity), "teleport sample, snapping");
            self.predicted.apply(incoming, update.channels);
            self.previous = None;
            self.latest = Some((update.server_time, *incoming));
            self.clear_motion();
            return;
        }

        // a discrepancy only exists if extrapolation moved us away from the
        // last adopted sample; a sample adopted while snapped needs no blend
        if self.latest.is_some() && was_extrapolating {
            // a correction arriving while an older one is still blending
            // restarts from the current visual value, so the rendered state
            // stays continuous
            let visual_position = self.predicted.position + self.position_correction.current();
            let visual_rotation = self.rotation_correction.current() * self.predicted.rotation;
            self.position_correction.begin(
                visual_position - incoming.position,
                clock.delta,
                self.config.correction_duration,
            );
            self.rotation_correction.begin(
                visual_rotation * incoming.rotation.inverse(),
                clock.delta,
                self.config.correction_duration,
            );
            if update.channels.contains(TransformChannels::SCALE) {
                let visual_scale = self.predicted.scale + self.scale_correction.current();
                self.scale_correction.set(visual_scale - incoming.scale);
            }
        }

        self.previous = self.latest;
        self.latest = Some((update.server_time, *incoming));
        // velocity is recomputed from the new pair and held until the next
        // sample
        self.capture_velocity();
        self.predicted.apply(incoming, update.channels);
    }

    fn ingest_properties(
        &mut self,
        clock: &FrameClock,
        update: &ServerUpdate<'_>,
        was_extrapolating: bool,
    ) {
        let Some(delta) = update.properties else {
            return;
        };
        for (id, value) in delta {
            let Some(behavior) = self.config.predicted_properties.get(id).copied() else {
                continue;
            };
            if matches!(behavior, PropertyBehavior::None) {
                continue;
            }
            let Some(number) = value.as_number() else {
                continue;
            };
            let channel = self
                .properties
                .entry(*id)
                .or_insert_with(|| PropertyChannel::new(behavior));
            if update.teleport {
                channel.snap(number);
            } else {
                channel.ingest(
                    update.server_time,
                    number,
                    clock.delta,
                    self.config.correction_duration,
                    was_extrapolating,
                );
            }
        }
    }

    fn has_pending_corrections(&self) -> bool {
        self.position_correction.is_active()
            || self.rotation_correction.is_active()
            || self.scale_correction.is_active()
            || self
                .properties
                .values()
                .any(|channel| channel.correction_weight > 0.0)
    }
}

impl Predictor for LinearPredictor {
    fn initialize(&mut self, ctx: PredictorContext) -> bool {
        self.ctx = Some(ctx);
        true
    }

    fn server_update(&mut self, clock: &FrameClock, update: &ServerUpdate<'_>) -> bool {
        if update.idle {
            // the entity stopped changing: stop extrapolating, let any
            // pending correction finish
            self.linear_velocity = Vec3::ZERO;
            self.angular_rate = 0.0;
            self.phase = Phase::Idle;
            return self.has_pending_corrections();
        }
        let was_extrapolating = self.phase == Phase::Extrapolating;
        self.ingest_transform(clock, update, was_extrapolating);
        self.ingest_properties(clock, update, was_extrapolating);
        self.phase = Phase::Snapped;
        true
    }

    fn client_update(
        &mut self,
        clock: &FrameClock,
        transform: Option<&mut TransformState>,
        properties: Option<&mut PropertyMap>,
    ) -> bool {
        if self.phase == Phase::Idle && !self.has_pending_corrections() {
            return false;
        }

        // a sample is still at least one tick away: keep projecting forward
        let advancing = self.phase != Phase::Idle && clock.extrapolating();

        if let Some(transform) = transform
            && self.latest.is_some()
        {
            if advancing {
                self.predicted.position += self.linear_velocity * clock.delta;
                if self.angular_rate.abs() > f32::EPSILON {
                    self.predicted.rotation = Quat::from_axis_angle(
                        self.angular_axis,
                        self.angular_rate * clock.delta,
                    ) * self.predicted.rotation;
                }
            }

            transform.position = self.predicted.position + self.position_correction.current();
            transform.rotation = self.rotation_correction.current() * self.predicted.rotation;
            transform.scale = self.predicted.scale + self.scale_correction.current();
            transform.sanitize();

            // fail closed: a degenerate correction never escapes the tick,
            // we snap back to the last known-good authoritative value
            if !transform.position.is_finite() || !transform.rotation.is_finite() {
                if let Some((_, latest)) = self.latest {
                    self.predicted = latest;
                    self.clear_motion();
                    *transform = latest;
                }
            }

            self.position_correction
                .decay(clock.delta, self.config.correction_duration);
            self.rotation_correction
                .decay(clock.delta, self.config.correction_duration);
            self.scale_correction
                .decay_at_rate(clock.delta, self.config.scale_correction_rate);
        }

        if let Some(properties) = properties {
            for (id, channel) in self.properties.iter_mut() {
                if channel.latest.is_none() {
                    continue;
                }
                let rendered = channel.advance(clock, advancing, self.config.correction_duration);
                properties.set(*id, PropertyValue::Number(rendered));
            }
        }

        if advancing {
            self.phase = Phase::Extrapolating;
        }
        true
    }

    fn detached(&mut self) {
        self.ctx = None;
        self.previous = None;
        self.latest = None;
        self.clear_motion();
        self.properties.clear();
        self.phase = Phase::Idle;
    }

    fn context(&self) -> Option<&PredictorContext> {
        self.ctx.as_ref()
    }
}

/// Wrap `value` into `[min, max)`.
fn wrap_value(value: f32, min: f32, max: f32) -> f32 {
    min + (value - min).rem_euclid(max - min)
}

/// Shortest signed path `from -> to` on a cyclic range.
fn wrap_delta(from: f32, to: f32, min: f32, max: f32) -> f32 {
    let range = max - min;
    let mut delta = (to - from).rem_euclid(range);
    if delta > range * 0.5 {
        delta -= range;
    }
    delta
}

/// Shortest signed angular path, radians.
fn angle_delta(from: f32, to: f32) -> f32 {
    wrap_delta(from, to, -core::f32::consts::PI, core::f32::consts::PI)
}
