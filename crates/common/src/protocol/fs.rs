use serde::{Deserialize, Serialize};

/// One entry of a `/v1/fs` directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub mode: u32,
    /// Unix seconds.
    pub modified: i64,
}
