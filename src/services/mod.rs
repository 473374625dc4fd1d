//! Domain services used by websocket and HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! Coordinators own business logic and state so route handlers can stay
//! focused on protocol translation and fan-out plumbing.

pub mod presentation;
pub mod store;
pub mod whiteboard;
