//! Integration tests for mixsim
//!
//! These tests drive the simulator through its public surface: complete
//! sweeps, cross-crate strategy wiring and the live driver. Style checks
//! run as part of the same test binary.

#[path = "style.rs"]
mod style;

#[path = "integration/batch_size_sweep.rs"]
mod batch_size_sweep;
#[path = "integration/live_cascade.rs"]
mod live_cascade;
#[path = "integration/run_properties.rs"]
mod run_properties;
#[path = "integration/strategy_timing.rs"]
mod strategy_timing;
