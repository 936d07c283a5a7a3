//! Prediction for the locally-controlled entity: the owning client applies
//! its own inputs immediately, simulating them against the physics query
//! surface, and reconciles with the authoritative state when it arrives.
//!
//! Reconciliation is deliberately lazy. Replaying every buffered input on
//! every server sample would re-introduce the jitter prediction exists to
//! hide, so the predictor only discards and re-simulates when the server's
//! velocity disagrees with the local one beyond a tolerance. Small residuals
//! are converged at a fixed rate instead of snapping; gaps beyond the tunnel
//! distance give up on smoothing entirely and teleport through whatever is in
//! between.

use crate::config::ConvergingConfig;
use crate::input_buffer::{InputBuffer, PredictedInput};
use crate::physics::{sweep_and_slide, ColliderShape, PhysicsQuery, SlideLimits};
use crate::{Predictor, PredictorContext, ServerUpdate};
use alloc::sync::Arc;
use alloc::vec::Vec;
use bevy_math::{Quat, Vec3};
use reckon_core::correction::{offset_angle, PositionCorrection, RotationCorrection};
use reckon_core::property::PropertyMap;
use reckon_core::time::FrameClock;
use reckon_core::transform::TransformState;
use tracing::{debug, trace};

/// Input predictor that re-simulates buffered local inputs against a server
/// baseline and converges toward the authoritative state.
pub struct ConvergingInputPredictor {
    config: Arc<ConvergingConfig>,
    physics: Arc<dyn PhysicsQuery>,
    shape: ColliderShape,
    ctx: Option<PredictorContext>,

    /// Resolved at initialize: explicit config value or collider-derived.
    velocity_tolerance: f32,
    tunnel_distance: f32,

    /// Local simulation copy of the transform, ahead of the server.
    sim: TransformState,
    sim_velocity: Vec3,
    sim_angular_rate: f32,
    seeded: bool,

    /// The two retained authoritative samples, oldest first.
    previous: Option<(f64, TransformState)>,
    latest: Option<(f64, TransformState)>,

    inputs: InputBuffer,

    /// Presentation-layer smoothing applied on top of the simulation after a
    /// replay re-seats it.
    position_correction: PositionCorrection,
    rotation_correction: RotationCorrection,

    /// Remaining in-tolerance drift to fold into the simulation, consumed at
    /// the configured correction rates.
    converge_position: Vec3,
    converge_rotation: Quat,
}

impl ConvergingInputPredictor {
    pub fn new(
        config: Arc<ConvergingConfig>,
        physics: Arc<dyn PhysicsQuery>,
        shape: ColliderShape,
    ) -> Self {
        let velocity_tolerance = config
            .velocity_tolerance
            .unwrap_or_else(|| shape.largest_horizontal_extent());
        let tunnel_distance = config
            .tunnel_distance
            .unwrap_or_else(|| 2.0 * shape.largest_horizontal_extent());
        Self {
            config,
            physics,
            shape,
            ctx: None,
            velocity_tolerance,
            tunnel_distance,
            sim: TransformState::IDENTITY,
            sim_velocity: Vec3::ZERO,
            sim_angular_rate: 0.0,
            seeded: false,
            previous: None,
            latest: None,
            inputs: InputBuffer::new(),
            position_correction: PositionCorrection::default(),
            rotation_correction: RotationCorrection::default(),
            converge_position: Vec3::ZERO,
            converge_rotation: Quat::IDENTITY,
        }
    }

    fn slide_limits(&self) -> SlideLimits {
        SlideLimits {
            iterations: self.config.sweep_and_slide_iterations,
            max_slide_angle: self.config.max_slide_angle,
            max_total_slide_angle: self.config.max_total_slide_angle,
            separation_offset: self.config.separation_offset,
        }
    }

    /// Advance the local simulation by one input frame.
    fn simulate(&mut self, input: &PredictedInput) {
        let start = self.sim.position;
        self.sim.position = sweep_and_slide(
            self.physics.as_ref(),
            &self.shape,
            start,
            input.translation,
            &self.slide_limits(),
        );
        if input.delta > f32::EPSILON {
            self.sim_velocity = (self.sim.position - start) / input.delta;
            let delta_rotation = input.rotation * self.sim.rotation.inverse();
            self.sim_angular_rate = offset_angle(delta_rotation) / input.delta;
        }
        self.sim.rotation = input.rotation;
        self.sim.sanitize();
    }

    /// Velocity the server observed over its last two samples.
    fn server_rates(&self) -> Option<(Vec3, f32)> {
        let ((previous_time, previous), (latest_time, latest)) =
            (self.previous.as_ref()?, self.latest.as_ref()?);
        let interval = (latest_time - previous_time) as f32;
        if interval <= f32::EPSILON {
            return None;
        }
        let velocity = (latest.position - previous.position) / interval;
        let delta = latest.rotation * previous.rotation.inverse();
        let angular = offset_angle(delta) / interval;
        Some((velocity, angular))
    }

    /// Whether the confirmed sample disagrees with the local simulation hard
    /// enough to warrant discarding it.
    fn needs_replay(&self) -> bool {
        let Some((server_velocity, server_angular)) = self.server_rates() else {
            return false;
        };
        if self.velocity_tolerance > 0.0
            && (server_velocity - self.sim_velocity).length() > self.velocity_tolerance
        {
            return true;
        }
        if self.config.angular_velocity_tolerance > 0.0
            && (server_angular - self.sim_angular_rate).abs()
                > self.config.angular_velocity_tolerance
        {
            return true;
        }
        false
    }

    /// Reseed from the sample and re-simulate every unconfirmed input.
    fn replay(&mut self, baseline: &TransformState) {
        let presented_position = self.sim.position + self.position_correction.current();
        let presented_rotation = self.rotation_correction.current() * self.sim.rotation;

        self.sim = *baseline;
        self.sim_velocity = Vec3::ZERO;
        self.sim_angular_rate = 0.0;
        let pending: Vec<PredictedInput> = self.inputs.iter().copied().collect();
        debug!(count = pending.len(), "replaying unconfirmed inputs");
        for input in &pending {
            self.simulate(input);
        }

        // smooth the re-seat: keep presenting from where we were and bleed
        // the difference out at the correction rates
        self.position_correction
            .set(presented_position - self.sim.position);
        self.rotation_correction
            .set(presented_rotation * self.sim.rotation.inverse());
        self.converge_position = Vec3::ZERO;
        self.converge_rotation = Quat::IDENTITY;
    }

    /// Fold the in-tolerance residual into the convergence budget.
    fn converge(&mut self, sample: &TransformState) {
        // approximate the prediction at the confirmation point by rewinding
        // the unconfirmed input displacement; only the two retained samples
        // exist, there is no position history to consult
        let unconfirmed: Vec3 = self.inputs.iter().map(|input| input.translation).sum();
        self.converge_position = sample.position - (self.sim.position - unconfirmed);
        // TODO: keep the predicted rotation at the confirmation point so
        // rotation can converge while inputs are still in flight
        if self.inputs.is_empty() {
            self.converge_rotation = sample.rotation * self.sim.rotation.inverse();
        }
    }

    fn teleport_to(&mut self, sample: &TransformState) {
        self.sim = *sample;
        self.sim_velocity = Vec3::ZERO;
        self.sim_angular_rate = 0.0;
        self.position_correction.clear();
        self.rotation_correction.clear();
        self.converge_position = Vec3::ZERO;
        self.converge_rotation = Quat::IDENTITY;
    }

    /// Consume the convergence budget at the configured rates.
    fn apply_convergence(&mut self, clock: &FrameClock) {
        let remaining = self.converge_position.length();
        if remaining > 0.0 {
            let step = self.config.position_correction_rate * clock.delta;
            if remaining <= step {
                self.sim.position += self.converge_position;
                self.converge_position = Vec3::ZERO;
            } else {
                let applied = self.converge_position * (step / remaining);
                self.sim.position += applied;
                self.converge_position -= applied;
            }
        }

        let angle = offset_angle(self.converge_rotation);
        if angle > 0.0 {
            let step = self.config.rotation_correction_rate * clock.delta;
            if angle <= step {
                self.sim.rotation = (self.converge_rotation * self.sim.rotation).normalize();
                self.converge_rotation = Quat::IDENTITY;
            } else {
                let partial = Quat::IDENTITY.slerp(self.converge_rotation, step / angle);
                self.sim.rotation = (partial * self.sim.rotation).normalize();
                self.converge_rotation =
                    (self.converge_rotation * partial.inverse()).normalize();
            }
        }
    }
}

impl Predictor for ConvergingInputPredictor {
    fn initialize(&mut self, ctx: PredictorContext) -> bool {
        // an input predictor without a controlling player cannot work;
        // report a configuration failure so the caller removes us
        if ctx.player.is_none() {
            debug!(entity = %ctx.entity, "no player controller, refusing to initialize");
            return false;
        }
        self.ctx = Some(ctx);
        true
    }

    fn server_update(&mut self, _clock: &FrameClock, update: &ServerUpdate<'_>) -> bool {
        let Some(incoming) = update.transform else {
            // prediction is driven by local inputs, not server samples
            return false;
        };

        if let Some(ack) = update.ack_client_time {
            let discarded = self.inputs.confirm(ack);
            trace!(discarded, remaining = self.inputs.len(), "confirmed inputs");
        }

        self.previous = self.latest;
        self.latest = Some((update.server_time, *incoming));

        if !self.seeded || update.teleport {
            self.seeded = true;
            self.teleport_to(incoming);
            return false;
        }

        let gap = (self.sim.position - incoming.position).length();
        if gap > self.tunnel_distance {
            // last-resort anti-desync: skip sweeps, go through obstacles
            debug!(gap, tunnel = self.tunnel_distance, "tunneling to server position");
            self.teleport_to(incoming);
            return false;
        }

        if self.needs_replay() {
            self.replay(incoming);
        } else {
            self.converge(incoming);
        }
        false
    }

    fn client_update(
        &mut self,
        clock: &FrameClock,
        transform: Option<&mut TransformState>,
        _properties: Option<&mut PropertyMap>,
    ) -> bool {
        let Some(transform) = transform else {
            return false;
        };
        if !self.seeded && self.inputs.is_empty() {
            return false;
        }

        self.apply_convergence(clock);

        transform.position = self.sim.position + self.position_correction.current();
        transform.rotation = self.rotation_correction.current() * self.sim.rotation;
        transform.scale = self.sim.scale;
        transform.sanitize();

        // fail closed on numerical degeneracy: snap to the last known-good
        // authoritative value and drop the broken correction state
        if !transform.position.is_finite() || !transform.rotation.is_finite() {
            if let Some((_, latest)) = self.latest {
                self.teleport_to(&latest);
                *transform = latest;
            }
        }

        self.position_correction
            .decay_at_rate(clock.delta, self.config.position_correction_rate);
        self.rotation_correction
            .decay_at_rate(clock.delta, self.config.rotation_correction_rate);
        true
    }

    fn input_update(&mut self, _clock: &FrameClock, input: &PredictedInput) {
        self.inputs.push(*input);
        self.simulate(input);
    }

    fn detached(&mut self) {
        self.ctx = None;
        self.previous = None;
        self.latest = None;
        self.inputs.clear();
        self.seeded = false;
        self.teleport_to(&TransformState::IDENTITY);
    }

    fn context(&self) -> Option<&PredictorContext> {
        self.ctx.as_ref()
    }
}
