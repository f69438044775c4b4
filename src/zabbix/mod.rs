pub mod chart;
pub mod session;
