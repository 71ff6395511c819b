pub mod file_handler;

pub use file_handler::{
    is_zip_name,
    load_sample,
    sanitize_file_name,
    SampleSubmission,
    DEFAULT_ARCHIVE_PASSWORD,
    MAX_SAMPLE_SIZE,
};
