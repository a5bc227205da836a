pub mod booking;
pub mod fleet;
pub mod location;
pub mod pricing;
