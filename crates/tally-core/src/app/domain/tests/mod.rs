//! Domain tests module.
//!
//! - Property tests: randomized frame sequences checked against the
//!   streaming invariants
//! - Scenario tests: multi-step flows through the reducer
