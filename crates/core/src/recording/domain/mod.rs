pub mod imu_sample;
pub mod record_configuration;
pub mod seek_origin;
