//! Wire messages exchanged between clients and the transform authority, and
//! the per-entity sample the host hands to predictors.

use crate::error::Result;
use crate::id::{EntityId, PeerId};
use crate::property::PropertyDelta;
use crate::transform::{TransformChannels, TransformState};
use bevy_math::{Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Client-submitted transform for an entity the client owns.
///
/// The authority drops the message silently when `owner` does not match the
/// entity's registered owner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClientTransformMessage {
    pub entity: EntityId,
    pub owner: PeerId,
    pub position: Vec3,
    pub rotation: Quat,
    /// Timestamp on the submitting client's clock; echoed back in
    /// [`ServerTransformMessage::ack_client_time`] so the owner can discard
    /// confirmed inputs.
    pub client_time: f32,
}

/// Authoritative state broadcast to observers at the server's tick rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerTransformMessage {
    pub entity: EntityId,
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Option<Vec3>,
    pub changed_properties: Option<PropertyDelta>,
    /// Suppresses interpolation/correction on the receiving side and forces
    /// an immediate snap.
    pub teleport: bool,
    /// Server-frame timestamp of this sample, in seconds.
    pub server_time: f64,
    /// Newest client-submitted timestamp folded into this sample, if the
    /// entity is client-driven.
    pub ack_client_time: Option<f32>,
}

/// One authoritative sample as consumed by predictors. Only the two most
/// recent samples per entity are ever retained.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerFrameSample {
    pub transform: TransformState,
    pub channels: TransformChannels,
    pub properties: PropertyDelta,
    pub teleport: bool,
    pub server_time: f64,
    pub ack_client_time: Option<f32>,
}

impl From<&ServerTransformMessage> for ServerFrameSample {
    fn from(message: &ServerTransformMessage) -> Self {
        let mut channels = TransformChannels::POSITION | TransformChannels::ROTATION;
        let transform = TransformState::new(
            message.position,
            message.rotation,
            message.scale.unwrap_or(Vec3::ONE),
        );
        if message.scale.is_some() {
            channels.insert(TransformChannels::SCALE);
        }
        Self {
            transform,
            channels,
            properties: message.changed_properties.clone().unwrap_or_default(),
            teleport: message.teleport,
            server_time: message.server_time,
            ack_client_time: message.ack_client_time,
        }
    }
}

fn wire_config() -> bincode::config::Configuration {
    bincode::config::standard()
}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serde::encode_to_vec(value, wire_config())?)
}

pub fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, wire_config())?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::PropertyId;
    use crate::property::{PropertyMap, PropertyValue};
    use smallvec::smallvec;
    use test_log::test;

    #[test]
    fn client_message_round_trip() {
        let message = ClientTransformMessage {
            entity: EntityId(11),
            owner: PeerId(5),
            position: Vec3::new(1.0, 2.0, 3.0),
            rotation: Quat::from_rotation_y(0.3),
            client_time: 12.5,
        };
        let bytes = encode(&message).unwrap();
        let decoded: ClientTransformMessage = decode(&bytes).unwrap();
        assert_eq!(message, decoded);
    }

    #[test]
    fn property_delta_round_trip_leaves_other_ids_untouched() {
        let mut source = PropertyMap::new();
        source.set(PropertyId(1), 4.0);
        source.set(PropertyId(2), Vec3::new(0.0, 1.0, 0.0));

        // replicate a change to id 1 only
        let delta: PropertyDelta = smallvec![(PropertyId(1), PropertyValue::Number(9.0))];
        let bytes = encode(&delta).unwrap();
        let decoded: PropertyDelta = decode(&bytes).unwrap();

        let mut fresh = PropertyMap::new();
        fresh.set(PropertyId(2), Vec3::new(0.0, 1.0, 0.0));
        fresh.apply(&decoded);
        assert_eq!(fresh.get(PropertyId(1)), Some(&PropertyValue::Number(9.0)));
        assert_eq!(
            fresh.get(PropertyId(2)),
            Some(&PropertyValue::Vector(Vec3::new(0.0, 1.0, 0.0)))
        );
    }

    #[test]
    fn sample_from_message_marks_scale_channel() {
        let message = ServerTransformMessage {
            entity: EntityId(1),
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Some(Vec3::splat(2.0)),
            changed_properties: None,
            teleport: false,
            server_time: 1.0,
            ack_client_time: None,
        };
        let sample = ServerFrameSample::from(&message);
        assert!(sample.channels.contains(TransformChannels::SCALE));
        assert_eq!(sample.transform.scale, Vec3::splat(2.0));

        let no_scale = ServerTransformMessage {
            scale: None,
            ..message
        };
        let sample = ServerFrameSample::from(&no_scale);
        assert!(!sample.channels.contains(TransformChannels::SCALE));
    }
}
