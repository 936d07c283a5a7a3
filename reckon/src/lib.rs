//! Facade crate: one dependency pulling in the whole sync layer.
//!
//! The server holds a [`reckon_authority::transform_authority::TransformAuthority`]
//! per networked entity; each client drives a
//! [`reckon_prediction::registry::RoomSync`] per room. Between the two sit
//! the wire messages and samples from [`reckon_core`].

pub use reckon_authority as authority;
pub use reckon_core as core;
pub use reckon_prediction as prediction;

pub mod prelude {
    pub use reckon_authority::prelude::*;
    pub use reckon_core::prelude::*;
    pub use reckon_prediction::prelude::*;
}
