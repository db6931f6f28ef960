pub mod candidate;
pub mod coordinator;
pub mod registry;
pub mod round;
pub mod seed;
