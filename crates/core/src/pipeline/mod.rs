pub mod classify_images_use_case;
pub mod pipeline_logger;
