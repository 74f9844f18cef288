//! Shared support code for the edgefab workspace: logging initialization,
//! the measurement saver used by the estimators, and test helpers.

pub mod logging;
pub mod saver;
pub mod test_utils;
