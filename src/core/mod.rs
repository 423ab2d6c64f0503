pub mod artifacts;
pub mod clock;
pub mod error;
pub mod failures;
pub mod models;
pub mod planner;
pub mod settings;
