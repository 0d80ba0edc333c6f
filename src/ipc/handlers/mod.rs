pub mod core;
pub mod events;
pub mod exchange;
pub mod roster;
pub mod schedule;
