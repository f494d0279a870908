//! Domain services used by the relay and control routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own the registry, liveness, and scene-store logic so the
//! websocket route can stay focused on protocol translation.

pub mod heartbeat;
pub mod persistence;
pub mod registry;
pub mod scene;
