//! capture-mux library crate.
//!
//! Multiplexes a single physical capture device across multiple independent
//! consumers (viewfinder, snapshot capture, frame analysis) with
//! reference-counted registrations, all-or-nothing binding, and a serialized
//! session actor. This module exposes the internal components for
//! integration testing.

pub mod config;
pub mod session;
