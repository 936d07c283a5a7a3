//! Deterministic client/server stepper.
//!
//! One "server" (a list of per-entity transform authorities) and one
//! "client" (a `RoomSync`) advance in lockstep: the server ticks first, sync
//! frames broadcast through the real wire encoding, then the client renders.
//! Frame and tick durations are fixed so every test is reproducible.

use bevy_math::{Quat, Vec3};
use reckon::prelude::*;
use std::sync::Arc;

pub const FRAME_DELTA: f32 = 1.0 / 60.0;

/// Empty world: sweeps never hit anything.
pub struct OpenField;

impl PhysicsQuery for OpenField {
    fn sweep(
        &self,
        _shape: &ColliderShape,
        _origin: Vec3,
        _direction: Vec3,
        _distance: f32,
    ) -> Option<SweepHit> {
        None
    }
}

pub struct Stepper {
    /// Every Nth frame is a sync frame on which the server broadcasts.
    pub frames_per_sync: i32,
    pub frame: i64,
    pub server: Vec<TransformAuthority>,
    pub room: RoomSync,
    pub authority_config: Arc<AuthorityConfig>,
    pub linear_asset: PredictorAsset,
    pub converging_asset: PredictorAsset,
}

impl Stepper {
    pub fn new(frames_per_sync: i32) -> Self {
        Self {
            frames_per_sync,
            frame: 0,
            server: Vec::new(),
            room: RoomSync::new(RoomId(1), Arc::new(OpenField)),
            authority_config: Arc::new(AuthorityConfig::default()),
            linear_asset: PredictorAsset::linear(LinearConfig::default()),
            converging_asset: PredictorAsset::converging(ConvergingConfig::default()),
        }
    }

    /// Register an entity on both sides. A `local` entity is predicted with
    /// the converging input predictor in both roles (aliased); a remote one
    /// with the linear predictor.
    pub fn spawn(&mut self, entity: EntityId, owner: PeerId, local: bool) {
        self.server.push(TransformAuthority::new(
            entity,
            owner,
            self.authority_config.clone(),
        ));
        if local {
            let asset = self.converging_asset.clone();
            self.room.attach(
                entity,
                Some(owner),
                ColliderShape::default(),
                Some(&asset),
                Some(&asset),
            );
        } else {
            let asset = self.linear_asset.clone();
            self.room
                .attach(entity, None, ColliderShape::default(), Some(&asset), None);
        }
    }

    pub fn is_sync_frame(&self) -> bool {
        self.frame % self.frames_per_sync as i64 == 0
    }

    pub fn frames_until_sync(&self) -> i32 {
        let elapsed = (self.frame % self.frames_per_sync as i64) as i32;
        (self.frames_per_sync - elapsed) % self.frames_per_sync
    }

    pub fn clock(&self) -> FrameClock {
        FrameClock::from_delta(FRAME_DELTA, self.frames_until_sync())
    }

    pub fn authority_mut(&mut self, entity: EntityId) -> &mut TransformAuthority {
        self.server
            .iter_mut()
            .find(|authority| authority.entity() == entity)
            .expect("unknown entity")
    }

    pub fn authority(&self, entity: EntityId) -> &TransformAuthority {
        self.server
            .iter()
            .find(|authority| authority.entity() == entity)
            .expect("unknown entity")
    }

    pub fn rendered(&self, entity: EntityId) -> &TransformState {
        self.room.get(entity).expect("unknown entity").transform()
    }

    /// Submit an owner transform through the real wire encoding.
    pub fn submit_transform(
        &mut self,
        entity: EntityId,
        owner: PeerId,
        position: Vec3,
        rotation: Quat,
        client_time: f32,
    ) -> bool {
        let clock = self.clock();
        let message = ClientTransformMessage {
            entity,
            owner,
            position,
            rotation,
            client_time,
        };
        let bytes = reckon::core::message::encode(&message).expect("encode");
        let decoded: ClientTransformMessage =
            reckon::core::message::decode(&bytes).expect("decode");
        self.authority_mut(entity).receive(&clock, &decoded)
    }

    /// Feed one locally-generated input frame to the client room.
    pub fn local_input(&mut self, entity: EntityId, input: PredictedInput) {
        let clock = self.clock();
        self.room.input_frame(&clock, entity, &input);
    }

    /// Advance one frame: server tick, sync broadcast if due, client render.
    pub fn frame_step(&mut self) {
        let clock = self.clock();
        let sync = self.is_sync_frame();

        for authority in &mut self.server {
            authority.tick(&clock, sync);
        }

        if sync {
            let mut broadcasts = Vec::new();
            for authority in &mut self.server {
                let message = authority.outgoing(false);
                let bytes = reckon::core::message::encode(&message).expect("encode");
                broadcasts.push(bytes);
            }
            for bytes in broadcasts {
                let decoded: ServerTransformMessage =
                    reckon::core::message::decode(&bytes).expect("decode");
                let sample = ServerFrameSample::from(&decoded);
                self.room.server_frame(&clock, decoded.entity, &sample);
            }
        }

        self.room.client_frame(&clock);
        self.frame += 1;
    }

    pub fn frame_steps(&mut self, count: usize) {
        for _ in 0..count {
            self.frame_step();
        }
    }

    pub fn time(&self) -> f32 {
        self.frame as f32 * FRAME_DELTA
    }
}
