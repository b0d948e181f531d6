pub mod types;

pub use types::{AppError, AsrError, StatusError, VodError};
