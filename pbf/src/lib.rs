mod boundary;
mod config;
mod particles;
mod simulation;

pub use boundary::*;
pub use config::*;
pub use particles::*;
pub use simulation::*;
