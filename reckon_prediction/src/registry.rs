//! Room-side bookkeeping: which predictors are attached to which entity, and
//! the deterministic per-frame drive order.
//!
//! There is no event subscription anywhere in this subsystem. The room
//! scheduler owns an explicit registration list, appended on attach and
//! removed on detach, and iterates it in attach order every frame. The host
//! drives three entry points, always in this order for a given frame:
//! [`RoomSync::server_frame`] for every arriving sample, then
//! [`RoomSync::input_frame`] for locally-generated inputs, then
//! [`RoomSync::client_frame`] once per render frame.

use crate::config::PredictorAsset;
use crate::input_buffer::PredictedInput;
use crate::physics::{ColliderShape, PhysicsQuery};
use crate::{Predictor, PredictorContext, ServerUpdate};
use alloc::boxed::Box;
use alloc::sync::Arc;
use reckon_core::id::{EntityId, PeerId, RoomId};
use reckon_core::message::ServerFrameSample;
use reckon_core::property::PropertyMap;
use reckon_core::time::FrameClock;
use reckon_core::transform::TransformState;
use tracing::{debug, trace};

/// The input-role slot of an entity.
///
/// When both roles are configured from the same [`PredictorAsset`], the
/// non-input instance serves both and the slot is `Aliased` (an optimization,
/// not a correctness requirement).
enum InputSlot {
    None,
    Aliased,
    Owned(Box<dyn Predictor>),
}

/// Per-entity sync state: the presented transform/properties and the
/// predictor slots.
pub struct EntitySync {
    entity: EntityId,
    player: Option<PeerId>,
    shape: ColliderShape,
    /// State presented to the renderer, mutated by predictors every frame.
    transform: TransformState,
    properties: PropertyMap,
    noninput: Option<Box<dyn Predictor>>,
    input: InputSlot,
    /// Transform of the most recently delivered sample, used to flag
    /// keep-alive samples as idle.
    last_delivered: Option<TransformState>,
    /// Last quiescence hint returned by the predictor. Diagnostic only; the
    /// scheduler never skips a predictor because of it.
    quiescent: bool,
}

impl EntitySync {
    pub fn entity(&self) -> EntityId {
        self.entity
    }

    pub fn transform(&self) -> &TransformState {
        &self.transform
    }

    pub fn properties(&self) -> &PropertyMap {
        &self.properties
    }

    pub fn is_quiescent(&self) -> bool {
        self.quiescent
    }

    pub fn has_noninput_predictor(&self) -> bool {
        self.noninput.is_some()
    }

    pub fn input_is_aliased(&self) -> bool {
        matches!(self.input, InputSlot::Aliased)
    }

    pub fn has_input_predictor(&self) -> bool {
        !matches!(self.input, InputSlot::None)
    }

    /// Raw fallback when no predictor is attached: snap to the sample.
    fn apply_raw(&mut self, sample: &ServerFrameSample) {
        self.transform.apply(&sample.transform, sample.channels);
    }
}

/// The explicit registration list for one room.
pub struct RoomSync {
    room: RoomId,
    physics: Arc<dyn PhysicsQuery>,
    /// Iterated in attach order, deterministically, every frame.
    entries: Vec<EntitySync>,
}

impl RoomSync {
    pub fn new(room: RoomId, physics: Arc<dyn PhysicsQuery>) -> Self {
        Self {
            room,
            physics,
            entries: Vec::new(),
        }
    }

    pub fn room(&self) -> RoomId {
        self.room
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, entity: EntityId) -> Option<&EntitySync> {
        self.entries.iter().find(|entry| entry.entity == entity)
    }

    fn get_mut(&mut self, entity: EntityId) -> Option<&mut EntitySync> {
        self.entries.iter_mut().find(|entry| entry.entity == entity)
    }

    /// Register an entity. `noninput`/`input` name the predictor assets for
    /// the two roles; the input role is only instantiated when the entity has
    /// a controlling player. A predictor whose `initialize` reports a
    /// configuration failure is discarded and that role falls back to raw
    /// authoritative snapping.
    pub fn attach(
        &mut self,
        entity: EntityId,
        player: Option<PeerId>,
        shape: ColliderShape,
        noninput: Option<&PredictorAsset>,
        input: Option<&PredictorAsset>,
    ) {
        debug_assert!(self.get(entity).is_none(), "entity attached twice");
        let ctx = PredictorContext {
            room: self.room,
            entity,
            player,
        };

        let noninput_instance = noninput.and_then(|asset| {
            let mut instance = asset.instantiate(&self.physics, shape);
            if instance.initialize(ctx) {
                instance.enabled();
                Some(instance)
            } else {
                debug!(%entity, "non-input predictor failed to initialize, falling back to raw snapping");
                None
            }
        });

        let input_slot = match (player, input) {
            (Some(_), Some(asset)) => {
                let aliased = noninput_instance.is_some()
                    && noninput.is_some_and(|other| asset.same_asset(other));
                if aliased {
                    trace!(%entity, "input role aliases the non-input predictor");
                    InputSlot::Aliased
                } else {
                    let mut instance = asset.instantiate(&self.physics, shape);
                    if instance.initialize(ctx) {
                        instance.enabled();
                        InputSlot::Owned(instance)
                    } else {
                        debug!(%entity, "input predictor failed to initialize");
                        InputSlot::None
                    }
                }
            }
            _ => InputSlot::None,
        };

        self.entries.push(EntitySync {
            entity,
            player,
            shape,
            transform: TransformState::IDENTITY,
            properties: PropertyMap::new(),
            noninput: noninput_instance,
            input: input_slot,
            last_delivered: None,
            quiescent: false,
        });
    }

    /// Unregister an entity, releasing its predictors. Safe to call for an
    /// entity that was never attached or was already detached.
    pub fn detach(&mut self, entity: EntityId) {
        let Some(index) = self.entries.iter().position(|entry| entry.entity == entity) else {
            return;
        };
        let mut entry = self.entries.remove(index);
        if let Some(predictor) = entry.noninput.as_mut() {
            predictor.disabled();
            predictor.detached();
        }
        if let InputSlot::Owned(predictor) = &mut entry.input {
            predictor.disabled();
            predictor.detached();
        }
    }

    /// Swap an entity's predictors for freshly configured ones. Predictors
    /// are replaced, never reconfigured in place: the old instances are
    /// detached and dropped.
    pub fn reconfigure(
        &mut self,
        entity: EntityId,
        noninput: Option<&PredictorAsset>,
        input: Option<&PredictorAsset>,
    ) {
        let Some(entry) = self.get_mut(entity) else {
            return;
        };
        let player = entry.player;
        let shape = entry.shape;
        let transform = entry.transform;
        let properties = entry.properties.clone();
        self.detach(entity);
        self.attach(entity, player, shape, noninput, input);
        // the replacement keeps presenting from the current state
        if let Some(entry) = self.get_mut(entity) {
            entry.transform = transform;
            entry.properties = properties;
        }
    }

    /// Toggle the enabled/disabled lifecycle hooks as the entity enters and
    /// leaves the locally-visible set.
    pub fn set_visible(&mut self, entity: EntityId, visible: bool) {
        let Some(entry) = self.get_mut(entity) else {
            return;
        };
        if let Some(predictor) = entry.noninput.as_mut() {
            if visible {
                predictor.enabled();
            } else {
                predictor.disabled();
            }
        }
        if let InputSlot::Owned(predictor) = &mut entry.input {
            if visible {
                predictor.enabled();
            } else {
                predictor.disabled();
            }
        }
    }

    /// Deliver one authoritative sample to an entity. Applied before any
    /// `client_frame` work for the same frame.
    pub fn server_frame(&mut self, clock: &FrameClock, entity: EntityId, sample: &ServerFrameSample) {
        let Some(entry) = self.get_mut(entity) else {
            trace!(%entity, "sample for unknown entity dropped");
            return;
        };

        // raw property changes land on the presented map immediately;
        // predicted ids are overridden by the predictor each render frame
        entry.properties.apply(&sample.properties);

        let idle = !sample.teleport
            && sample.properties.is_empty()
            && entry.last_delivered.as_ref() == Some(&sample.transform);
        entry.last_delivered = Some(sample.transform);

        match entry.noninput.as_mut() {
            Some(predictor) => {
                let update = ServerUpdate::from_sample(sample, idle);
                entry.quiescent = !predictor.server_update(clock, &update);
            }
            None => entry.apply_raw(sample),
        }

        if let InputSlot::Owned(predictor) = &mut entry.input {
            let update = ServerUpdate::from_sample(sample, idle);
            predictor.server_update(clock, &update);
        }
    }

    /// Route one locally-generated input frame to the entity's input
    /// predictor.
    pub fn input_frame(&mut self, clock: &FrameClock, entity: EntityId, input: &PredictedInput) {
        let Some(entry) = self.get_mut(entity) else {
            return;
        };
        match &mut entry.input {
            InputSlot::Owned(predictor) => predictor.input_update(clock, input),
            InputSlot::Aliased => {
                if let Some(predictor) = entry.noninput.as_mut() {
                    predictor.input_update(clock, input);
                }
            }
            InputSlot::None => {}
        }
    }

    /// Advance every entity's presented state by one render frame, in attach
    /// order.
    pub fn client_frame(&mut self, clock: &FrameClock) {
        for entry in &mut self.entries {
            let EntitySync {
                transform,
                properties,
                noninput,
                input,
                quiescent,
                ..
            } = entry;

            // the input predictor owns the transform of the locally
            // controlled entity; the non-input predictor then only covers
            // properties
            match input {
                InputSlot::Owned(predictor) => {
                    predictor.client_update(clock, Some(transform), None);
                    if let Some(predictor) = noninput.as_mut() {
                        *quiescent = !predictor.client_update(clock, None, Some(properties));
                    }
                }
                _ => {
                    if let Some(predictor) = noninput.as_mut() {
                        *quiescent =
                            !predictor.client_update(clock, Some(transform), Some(properties));
                    }
                }
            }
        }
    }

    /// Attach-ordered view of the registration list.
    pub fn iter(&self) -> impl Iterator<Item = &EntitySync> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConvergingConfig, LinearConfig};
    use crate::physics::SweepHit;
    use approx::assert_relative_eq;
    use bevy_math::{Quat, Vec3};
    use reckon_core::transform::TransformChannels;
    use smallvec::smallvec;
    use test_log::test;

    struct OpenField;

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

    fn room() -> RoomSync {
        RoomSync::new(RoomId(1), Arc::new(OpenField))
    }

    fn sample(position: Vec3, server_time: f64) -> ServerFrameSample {
        ServerFrameSample {
            transform: TransformState::from_position(position),
            channels: TransformChannels::POSITION | TransformChannels::ROTATION,
            properties: smallvec![],
            teleport: false,
            server_time,
            ack_client_time: None,
        }
    }

    #[test]
    fn raw_fallback_snaps_without_a_predictor() {
        let mut room = room();
        room.attach(EntityId(1), None, ColliderShape::default(), None, None);
        let clock = FrameClock::from_delta(0.02, 5);
        room.server_frame(&clock, EntityId(1), &sample(Vec3::new(3.0, 0.0, 0.0), 0.0));
        assert_eq!(
            room.get(EntityId(1)).unwrap().transform().position,
            Vec3::new(3.0, 0.0, 0.0)
        );
    }

    #[test]
    fn failing_input_initialize_falls_back() {
        let mut room = room();
        let asset = PredictorAsset::converging(ConvergingConfig::default());
        // no player controller: the converging predictor refuses to
        // initialize and the slot stays empty
        room.attach(
            EntityId(2),
            None,
            ColliderShape::default(),
            Some(&asset),
            Some(&asset),
        );
        let entry = room.get(EntityId(2)).unwrap();
        assert!(!entry.has_noninput_predictor());
        assert!(!entry.has_input_predictor());
    }

    #[test]
    fn identical_assets_alias_one_instance() {
        let mut room = room();
        let asset = PredictorAsset::converging(ConvergingConfig::default());
        room.attach(
            EntityId(3),
            Some(PeerId(9)),
            ColliderShape::default(),
            Some(&asset),
            Some(&asset),
        );
        let entry = room.get(EntityId(3)).unwrap();
        assert!(entry.input_is_aliased());

        // inputs reach the shared instance and move the presented transform
        let clock = FrameClock::from_delta(0.02, 5);
        room.server_frame(&clock, EntityId(3), &sample(Vec3::ZERO, 0.0));
        room.input_frame(
            &clock,
            EntityId(3),
            &PredictedInput {
                time: 0.1,
                translation: Vec3::new(0.4, 0.0, 0.0),
                rotation: Quat::IDENTITY,
                delta: 0.02,
            },
        );
        room.client_frame(&clock);
        assert_relative_eq!(
            room.get(EntityId(3)).unwrap().transform().position.x,
            0.4,
            epsilon = 1e-5
        );
    }

    #[test]
    fn distinct_assets_get_distinct_instances() {
        let mut room = room();
        let linear = PredictorAsset::linear(LinearConfig::default());
        let converging = PredictorAsset::converging(ConvergingConfig::default());
        room.attach(
            EntityId(4),
            Some(PeerId(9)),
            ColliderShape::default(),
            Some(&linear),
            Some(&converging),
        );
        let entry = room.get(EntityId(4)).unwrap();
        assert!(entry.has_noninput_predictor());
        assert!(entry.has_input_predictor());
        assert!(!entry.input_is_aliased());
    }

    #[test]
    fn detach_is_idempotent_and_removes_the_entry() {
        let mut room = room();
        let asset = PredictorAsset::linear(LinearConfig::default());
        room.attach(
            EntityId(5),
            None,
            ColliderShape::default(),
            Some(&asset),
            None,
        );
        assert_eq!(room.len(), 1);
        room.detach(EntityId(5));
        assert_eq!(room.len(), 0);
        // detaching again is a no-op
        room.detach(EntityId(5));
        assert_eq!(room.len(), 0);
    }

    #[test]
    fn reconfigure_replaces_but_keeps_presented_state() {
        let mut room = room();
        let asset = PredictorAsset::linear(LinearConfig::default());
        room.attach(
            EntityId(6),
            None,
            ColliderShape::default(),
            Some(&asset),
            None,
        );
        let clock = FrameClock::from_delta(0.02, 5);
        room.server_frame(&clock, EntityId(6), &sample(Vec3::new(2.0, 0.0, 0.0), 0.0));
        room.client_frame(&clock);

        let retuned = PredictorAsset::linear(LinearConfig {
            correction_duration: 0.5,
            ..LinearConfig::default()
        });
        room.reconfigure(EntityId(6), Some(&retuned), None);
        let entry = room.get(EntityId(6)).unwrap();
        assert!(entry.has_noninput_predictor());
        // the presented transform survives the swap
        assert_eq!(entry.transform().position, Vec3::new(2.0, 0.0, 0.0));
    }

    #[test]
    fn entries_iterate_in_attach_order() {
        let mut room = room();
        let asset = PredictorAsset::linear(LinearConfig::default());
        for id in [11, 7, 42] {
            room.attach(
                EntityId(id),
                None,
                ColliderShape::default(),
                Some(&asset),
                None,
            );
        }
        let order: Vec<u64> = room.iter().map(|entry| entry.entity().0).collect();
        assert_eq!(order, [11, 7, 42]);
    }
}
