pub mod engine;
pub mod velocity;

pub use engine::RuleEngine;
pub use velocity::VelocityTracker;
