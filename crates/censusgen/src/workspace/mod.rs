pub mod preparer;
pub mod stability;

pub use preparer::{
    decode_census_file, list_directory, ClearSummary, StagedInput, WorkspacePreparer,
    EMAIL_INPUT_FILE_NAME, INPUT_FILE_NAME, MEDICAL_INPUT_FILE_NAME,
};
pub use stability::{await_stable, read_artifact, StabilitySettings};
