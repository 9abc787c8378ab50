pub mod cascade_locator;
pub mod haar_cascade;
pub mod integral_image;
pub mod math;
pub mod model_loader;
pub mod model_registry;
pub mod model_resolver;
pub mod rect_grouping;
