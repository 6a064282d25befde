//! INDI drivers built on `lodestar_indi`
//!
//! - [`robofocus`]: RoboFocus serial focuser
//! - [`simulator`]: in-process RoboFocus used by `--simulation`

pub mod robofocus;
pub mod simulator;

pub use robofocus::RoboFocus;
pub use simulator::SimulatedRoboFocus;
