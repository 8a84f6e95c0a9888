pub mod calibration;
pub mod cancellation;
pub mod capture;
pub mod constants;
pub mod timestamp;
