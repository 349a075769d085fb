// Test suite - fakes, fixtures, and scenario tests for the engine

pub mod helpers;
pub mod unit;
