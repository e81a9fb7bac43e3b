//! Result type alias for twinbuf operations

use crate::Error;

/// Result type alias for twinbuf operations
pub type Result<T> = std::result::Result<T, Error>;
