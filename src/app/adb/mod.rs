pub mod locator;
pub mod logcat;
pub mod mirror;
pub mod recording;
pub mod runner;
pub mod scrcpy;
