//! Per-entity server transform authority.

use bevy_math::{Quat, Vec3};
use reckon_core::correction::{PositionCorrection, RotationCorrection, CORRECTION_EPSILON_SQ};
use reckon_core::id::{EntityId, PeerId};
use reckon_core::message::{ClientTransformMessage, ServerTransformMessage};
use reckon_core::time::FrameClock;
use reckon_core::transform::TransformState;
use alloc::sync::Arc;
use tracing::trace;

/// Authority-side tunables. One shared config per room, referenced by every
/// entity's authority.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthorityConfig {
    /// Blend decay time for corrections when a client submission disagrees
    /// with in-progress extrapolation, seconds.
    pub correction_duration: f32,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            correction_duration: 0.25,
        }
    }
}

/// One accepted client submission.
#[derive(Debug, Clone, Copy, PartialEq)]
struct AcceptedSample {
    position: Vec3,
    rotation: Quat,
    client_time: f32,
}

/// Server-side per-entity component holding the authoritative transform.
pub struct TransformAuthority {
    entity: EntityId,
    /// The registered owner; submissions from anyone else are dropped.
    owner: PeerId,
    config: Arc<AuthorityConfig>,

    previous: Option<AcceptedSample>,
    latest: Option<AcceptedSample>,

    /// Extrapolation velocity, recomputed whenever a new sample pair is
    /// adopted.
    velocity: Vec3,
    angular_axis: Vec3,
    angular_rate: f32,

    position_correction: PositionCorrection,
    rotation_correction: RotationCorrection,

    /// The authoritative value as of the last tick, corrections included.
    current: TransformState,
    /// True while `current` has been advanced past `latest` by
    /// extrapolation.
    extrapolating: bool,
    received_this_tick: bool,
    updated_since_sync: bool,
    /// Advances with every tick; stamped onto outgoing samples.
    server_time: f64,
}

impl TransformAuthority {
    pub fn new(entity: EntityId, owner: PeerId, config: Arc<AuthorityConfig>) -> Self {
        Self {
            entity,
            owner,
            config,
            previous: None,
            latest: None,
            velocity: Vec3::ZERO,
            angular_axis: Vec3::Y,
            angular_rate: 0.0,
            position_correction: PositionCorrection::default(),
            rotation_correction: RotationCorrection::default(),
            current: TransformState::IDENTITY,
            extrapolating: false,
            received_this_tick: false,
            updated_since_sync: false,
            server_time: 0.0,
        }
    }

    pub fn entity(&self) -> EntityId {
        self.entity
    }

    pub fn owner(&self) -> PeerId {
        self.owner
    }

    /// The authoritative transform as of the last tick.
    pub fn current(&self) -> &TransformState {
        &self.current
    }

    /// Whether a client submission has been folded in since the last sync
    /// frame.
    pub fn updated_since_sync(&self) -> bool {
        self.updated_since_sync
    }

    /// Process one client-submitted transform. Returns whether the message
    /// was accepted; authorization failures are dropped silently with no
    /// state change.
    pub fn receive(&mut self, clock: &FrameClock, message: &ClientTransformMessage) -> bool {
        if message.owner != self.owner {
            // silent drop: no state change, nothing reported to the sender
            trace!(
                entity = %self.entity,
                claimed = %message.owner,
                owner = %self.owner,
                "dropping transform from non-owner"
            );
            return false;
        }
        if let Some(latest) = &self.latest
            && message.client_time <= latest.client_time
        {
            trace!(entity = %self.entity, "dropping stale out-of-order submission");
            return false;
        }

        let incoming = TransformState::new(message.position, message.rotation, Vec3::ONE);

        // if extrapolation already advanced us away from the incoming value,
        // blend the difference out instead of stepping backwards
        if self.extrapolating {
            let offset = self.current.position - incoming.position;
            if offset.length_squared() >= CORRECTION_EPSILON_SQ {
                self.position_correction.begin(
                    offset,
                    clock.delta,
                    self.config.correction_duration,
                );
            }
            self.rotation_correction.begin(
                self.current.rotation * incoming.rotation.inverse(),
                clock.delta,
                self.config.correction_duration,
            );
        }

        self.previous = self.latest;
        self.latest = Some(AcceptedSample {
            position: incoming.position,
            rotation: incoming.rotation,
            client_time: message.client_time,
        });

        // the old extrapolation velocity is invalid now; recompute it from
        // the newly adopted pair
        self.velocity = Vec3::ZERO;
        self.angular_rate = 0.0;
        if let (Some(previous), Some(latest)) = (&self.previous, &self.latest) {
            let interval = latest.client_time - previous.client_time;
            if interval > f32::EPSILON {
                self.velocity = (latest.position - previous.position) / interval;
                let mut delta = latest.rotation * previous.rotation.inverse();
                if delta.w < 0.0 {
                    delta = -delta;
                }
                let (axis, angle) = delta.to_axis_angle();
                self.angular_axis = axis;
                self.angular_rate = angle / interval;
            }
        }

        self.extrapolating = false;
        self.received_this_tick = true;
        self.updated_since_sync = true;
        true
    }

    /// Advance one server tick. `sync_frame` marks the designated ticks on
    /// which observers receive a fresh authoritative sample.
    pub fn tick(&mut self, clock: &FrameClock, sync_frame: bool) -> &TransformState {
        self.server_time += clock.delta as f64;

        if !self.received_this_tick && !sync_frame {
            // cover the gap with the stored velocity, same math as the
            // client-side linear predictor
            if self.latest.is_some() {
                self.current.position += self.velocity * clock.delta;
                if self.angular_rate.abs() > f32::EPSILON {
                    self.current.rotation =
                        Quat::from_axis_angle(self.angular_axis, self.angular_rate * clock.delta)
                            * self.current.rotation;
                }
                self.extrapolating = true;
            }
        } else if let Some(latest) = &self.latest {
            self.current.position = latest.position;
            self.current.rotation = latest.rotation;
            self.extrapolating = false;
        }

        // any active correction rides on top of the result
        self.current.position += self.position_correction.current();
        self.current.rotation = self.rotation_correction.current() * self.current.rotation;
        self.current.sanitize();
        self.position_correction
            .decay(clock.delta, self.config.correction_duration);
        self.rotation_correction
            .decay(clock.delta, self.config.correction_duration);

        // fail closed on numerical degeneracy: back to the last accepted
        // sample
        if !self.current.position.is_finite() || !self.current.rotation.is_finite() {
            if let Some(latest) = &self.latest {
                self.current.position = latest.position;
                self.current.rotation = latest.rotation;
            } else {
                self.current = TransformState::IDENTITY;
            }
            self.velocity = Vec3::ZERO;
            self.angular_rate = 0.0;
            self.position_correction.clear();
            self.rotation_correction.clear();
        }

        self.received_this_tick = false;
        &self.current
    }

    /// Build the outgoing broadcast for a sync frame and clear the
    /// updated-since-sync flag.
    pub fn outgoing(&mut self, teleport: bool) -> ServerTransformMessage {
        self.updated_since_sync = false;
        ServerTransformMessage {
            entity: self.entity,
            position: self.current.position,
            rotation: self.current.rotation,
            scale: None,
            changed_properties: None,
            teleport,
            server_time: self.server_time,
            ack_client_time: self.latest.map(|sample| sample.client_time),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use test_log::test;

    fn authority() -> TransformAuthority {
        TransformAuthority::new(EntityId(1), PeerId(7), Arc::new(AuthorityConfig::default()))
    }

    fn submission(owner: u64, position: Vec3, client_time: f32) -> ClientTransformMessage {
        ClientTransformMessage {
            entity: EntityId(1),
            owner: PeerId(owner),
            position,
            rotation: Quat::IDENTITY,
            client_time,
        }
    }

    #[test]
    fn non_owner_submission_is_dropped_silently() {
        let mut authority = authority();
        let clock = FrameClock::from_delta(0.05, 2);
        assert!(authority.receive(&clock, &submission(7, Vec3::new(1.0, 0.0, 0.0), 0.1)));
        authority.tick(&clock, true);
        let before = *authority.current();

        // registered owner is 7, the submission claims 5
        assert!(!authority.receive(&clock, &submission(5, Vec3::new(9.0, 9.0, 9.0), 0.2)));
        authority.tick(&clock, true);
        assert_eq!(*authority.current(), before);
    }

    #[test]
    fn gaps_are_covered_by_extrapolation() {
        let mut authority = authority();
        let clock = FrameClock::from_delta(0.05, 2);
        authority.receive(&clock, &submission(7, Vec3::ZERO, 0.0));
        authority.tick(&clock, false);
        authority.receive(&clock, &submission(7, Vec3::new(1.0, 0.0, 0.0), 0.1));
        authority.tick(&clock, false);
        assert_relative_eq!(authority.current().position.x, 1.0, epsilon = 1e-5);

        // no submission arrives: velocity = 10 units/s carries us forward
        authority.tick(&clock, false);
        assert_relative_eq!(authority.current().position.x, 1.5, epsilon = 1e-4);
    }

    #[test]
    fn sync_frame_snaps_to_the_latest_sample() {
        let mut authority = authority();
        let clock = FrameClock::from_delta(0.05, 2);
        authority.receive(&clock, &submission(7, Vec3::ZERO, 0.0));
        authority.tick(&clock, false);
        authority.receive(&clock, &submission(7, Vec3::new(1.0, 0.0, 0.0), 0.1));
        authority.tick(&clock, false);
        authority.tick(&clock, false); // extrapolated to 1.5
        authority.tick(&clock, true); // sync frame: back to the confirmed 1.0
        assert_relative_eq!(authority.current().position.x, 1.0, epsilon = 1e-4);
    }

    #[test]
    fn late_submission_starts_a_decaying_correction() {
        let mut authority = authority();
        let clock = FrameClock::from_delta(0.05, 2);
        authority.receive(&clock, &submission(7, Vec3::ZERO, 0.0));
        authority.tick(&clock, false);
        authority.receive(&clock, &submission(7, Vec3::new(1.0, 0.0, 0.0), 0.1));
        authority.tick(&clock, false);
        // two missed ticks: extrapolated to 2.0
        authority.tick(&clock, false);
        authority.tick(&clock, false);
        assert_relative_eq!(authority.current().position.x, 2.0, epsilon = 1e-4);

        // the client finally reports it only reached 1.2: adopt it, but keep
        // presenting near the extrapolated value and blend the gap away
        authority.receive(&clock, &submission(7, Vec3::new(1.2, 0.0, 0.0), 0.2));
        let first = authority.tick(&clock, false).position.x;
        assert!(first > 1.2 && first < 2.0);

        // after the correction window the discrepancy is gone
        for _ in 0..10 {
            authority.tick(&clock, false);
        }
        let settled = authority.current().position.x;
        let expected = authority.latest.unwrap().position.x;
        // still extrapolating forward from the adopted sample, but the old
        // 0.8 gap no longer contributes
        assert!(settled >= expected);
    }

    #[test]
    fn updated_flag_tracks_sync_broadcasts() {
        let mut authority = authority();
        let clock = FrameClock::from_delta(0.05, 2);
        assert!(!authority.updated_since_sync());
        authority.receive(&clock, &submission(7, Vec3::X, 0.1));
        assert!(authority.updated_since_sync());
        authority.tick(&clock, true);
        let message = authority.outgoing(false);
        assert!(!authority.updated_since_sync());
        assert_eq!(message.ack_client_time, Some(0.1));
        assert_relative_eq!(message.position.x, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn stale_submissions_are_ignored() {
        let mut authority = authority();
        let clock = FrameClock::from_delta(0.05, 2);
        assert!(authority.receive(&clock, &submission(7, Vec3::X, 0.2)));
        assert!(!authority.receive(&clock, &submission(7, Vec3::ZERO, 0.1)));
    }
}
