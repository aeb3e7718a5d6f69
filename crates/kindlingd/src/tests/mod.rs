//! Test suites for the Kindling server.

mod pool_behaviour;
mod support;
