//! Core types shared by the reckon crates: ids, the frame clock injected by
//! the host, transform/property state, correction primitives and the wire
//! messages exchanged between the client and the transform authority.

pub mod correction;
pub mod error;
pub mod id;
pub mod message;
pub mod property;
pub mod time;
pub mod transform;

pub mod prelude {
    pub use crate::correction::{PositionCorrection, RotationCorrection};
    pub use crate::error::SerializationError;
    pub use crate::id::{EntityId, PeerId, PropertyId, RoomId};
    pub use crate::message::{
        ClientTransformMessage, ServerFrameSample, ServerTransformMessage,
    };
    pub use crate::property::{PropertyDelta, PropertyMap, PropertyValue};
    pub use crate::time::FrameClock;
    pub use crate::transform::{TransformChannels, TransformState};
}
