//! Server-side ground truth for networked transforms.
//!
//! Clients that own an entity submit timestamped transforms; the authority
//! verifies ownership, keeps the two most recent accepted samples, and covers
//! the gaps between client submissions by extrapolating with the same math
//! the client-side linear predictor uses, blending a decaying correction when
//! a late submission disagrees with what extrapolation produced.

extern crate alloc;

pub mod transform_authority;

pub mod prelude {
    pub use crate::transform_authority::{AuthorityConfig, TransformAuthority};
}
