//! Typed `content` payloads for envelopes that carry an object.

use serde::{Deserialize, Serialize};

/// Content of `file_start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStart {
    pub filename: String,
    pub filesize: u64,
}

/// Content of `file_end`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEnd {
    pub filename: String,
}

/// Content sent with `filerequest` by the reference clients.
pub const FILE_REQUEST_ALL: &str = "all";
