pub mod capture;
pub mod display;
pub mod errors;
pub mod identity;
pub mod liveness;
pub mod sensor;
