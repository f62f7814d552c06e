//! Cross-module tests for the Guard SDK
//!
//! Unit tests live next to the code; these exercise several components
//! together.

pub mod guard_scenario_tests;
