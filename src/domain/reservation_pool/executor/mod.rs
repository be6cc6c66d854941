pub mod trial;
pub mod trial_runner;
