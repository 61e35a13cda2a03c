//! # parley-shared
//!
//! Types shared by the Parley store and server: identifier newtypes, the
//! realtime wire protocol, and the receiver-side typing tracker.

pub mod constants;
pub mod protocol;
pub mod types;
pub mod typing;
