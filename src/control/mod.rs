//! Piecewise control curves of voltage-controlled devices.

pub mod patch;
pub mod polyfix;
pub mod qv;
pub mod reg;
pub mod spline;

pub use qv::{setpoint_profile, QvCurve, QvRegion};
pub use reg::RatioControl;
