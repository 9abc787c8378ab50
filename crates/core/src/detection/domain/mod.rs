pub mod detection_failure;
pub mod happy_detector;
pub mod object_locator;
