//! Types broadcast to hosts such as the CLI or a UI bridge.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so a host can
//! forward them as JSON unchanged.

pub mod events;
