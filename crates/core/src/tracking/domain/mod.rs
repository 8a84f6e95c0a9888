pub mod body_tracker;
pub mod joint;
pub mod joint_smoother;
pub mod skeleton;
pub mod tracker_configuration;
