//! Client-side prediction for networked transforms and properties.
//!
//! The server replicates authoritative state at a coarse, irregular rate; the
//! client renders every frame. A [`Predictor`] bridges the two: it receives
//! every authoritative sample (`server_update`), mutates the presented state
//! once per render frame (`client_update`), and, for the locally-controlled
//! entity, consumes locally generated inputs (`input_update`) ahead of server
//! confirmation.
//!
//! Two strategies are provided:
//! - [`linear::LinearPredictor`] extrapolates the last two samples and blends
//!   corrections when new samples arrive;
//! - [`converging::ConvergingInputPredictor`] re-simulates buffered local
//!   inputs against a server baseline with sweep-and-slide collision
//!   resolution and converges toward the server state instead of snapping.
//!
//! Predictors are plain trait objects: the host injects everything they need
//! ([`PredictorContext`], configs, the physics query surface) at construction
//! or initialize time. There is no ambient state and no event subscription;
//! the room-side scheduler ([`registry::RoomSync`]) owns an explicit
//! registration list and ticks it deterministically.

extern crate alloc;

pub mod config;
pub mod converging;
pub mod input_buffer;
pub mod linear;
pub mod physics;
pub mod registry;

use reckon_core::id::{EntityId, PeerId, RoomId};
use reckon_core::message::ServerFrameSample;
use reckon_core::property::{PropertyDelta, PropertyMap};
use reckon_core::time::FrameClock;
use reckon_core::transform::{TransformChannels, TransformState};

pub mod prelude {
    pub use crate::config::{
        ConfigError, ConvergingConfig, LinearConfig, PredictorAsset, PredictorOptions,
        PropertyBehavior,
    };
    pub use crate::converging::ConvergingInputPredictor;
    pub use crate::input_buffer::{InputBuffer, PredictedInput};
    pub use crate::linear::LinearPredictor;
    pub use crate::physics::{ColliderShape, PhysicsQuery, SweepHit};
    pub use crate::registry::{EntitySync, RoomSync};
    pub use crate::{Predictor, PredictorContext, ServerUpdate};
}

/// Everything a predictor may hold onto between initialize and detach.
///
/// Injected explicitly; predictors never read room state from globals. The
/// context is dropped on [`Predictor::detached`], after which
/// [`Predictor::context`] returns `None`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictorContext {
    pub room: RoomId,
    pub entity: EntityId,
    /// The controlling player, present only for player-controlled entities.
    pub player: Option<PeerId>,
}

/// View of one arriving authoritative sample, as passed to
/// [`Predictor::server_update`].
///
/// `transform`/`properties` are `None` when the predictor does not target
/// that channel.
#[derive(Debug, Clone, Copy)]
pub struct ServerUpdate<'a> {
    pub transform: Option<&'a TransformState>,
    /// Which transform fields this sample actually carries.
    pub channels: TransformChannels,
    pub properties: Option<&'a PropertyDelta>,
    /// Forces an immediate snap, suppressing extrapolation and correction.
    pub teleport: bool,
    /// True when the sample carries no real change (keep-alive).
    pub idle: bool,
    /// Server-frame timestamp of the sample, in seconds.
    pub server_time: f64,
    /// Newest client timestamp the authority folded into this sample.
    pub ack_client_time: Option<f32>,
}

impl<'a> ServerUpdate<'a> {
    /// Full-channel view of a sample, for predictors targeting both channels.
    pub fn from_sample(sample: &'a ServerFrameSample, idle: bool) -> Self {
        Self {
            transform: Some(&sample.transform),
            channels: sample.channels,
            properties: Some(&sample.properties),
            teleport: sample.teleport,
            idle,
            server_time: sample.server_time,
            ack_client_time: sample.ack_client_time,
        }
    }
}

/// A pluggable prediction strategy for one entity.
///
/// Lifecycle: `initialize` (once; `false` means the predictor must be
/// discarded), `enabled`/`disabled` as the entity enters and leaves the
/// visible set, then per-frame updates, then `detached` exactly once the
/// entity goes away (calling it again must be harmless).
///
/// The `bool` returned by `server_update`/`client_update` is a quiescence
/// hint: `false` while idle means the predictor has nothing to do until the
/// next real change. It is an optimization hint only; callers keep ticking
/// regardless and implementations are free to always return `true`.
pub trait Predictor {
    /// Bind the predictor to its entity. Returning `false` reports a
    /// configuration failure: the caller removes the predictor and the
    /// entity falls back to raw authoritative snapping.
    fn initialize(&mut self, ctx: PredictorContext) -> bool;

    /// The entity entered the locally-visible set.
    fn enabled(&mut self) {}

    /// The entity left the locally-visible set.
    fn disabled(&mut self) {}

    /// Called once per arriving server frame.
    fn server_update(&mut self, clock: &FrameClock, update: &ServerUpdate<'_>) -> bool;

    /// Called once per render frame to mutate the presented state.
    fn client_update(
        &mut self,
        clock: &FrameClock,
        transform: Option<&mut TransformState>,
        properties: Option<&mut PropertyMap>,
    ) -> bool;

    /// Called once per generated local-input frame for controller-driven
    /// entities.
    fn input_update(&mut self, _clock: &FrameClock, _input: &input_buffer::PredictedInput) {}

    /// Release all entity/room references. Idempotent; the instance must not
    /// be reused afterwards.
    fn detached(&mut self);

    /// The bound context, `None` before initialize and after detach.
    fn context(&self) -> Option<&PredictorContext>;
}
