//! Integration tests: a server room full of transform authorities wired to a
//! client-side [`reckon_prediction::registry::RoomSync`] through the bincode
//! wire messages, stepped deterministically.

pub mod stepper;

#[cfg(test)]
mod end_to_end;
