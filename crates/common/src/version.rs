use std::fmt;

use serde::{Deserialize, Serialize};

/// Compile-time build metadata, reported on start-up and by `/_status/version`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildInfo {
    pub build_profile: String,
    pub build_timestamp: String,
    pub version: String,
}

impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "charm {} ({} build, {})",
            self.version, self.build_profile, self.build_timestamp
        )
    }
}

pub fn build_info() -> BuildInfo {
    BuildInfo {
        build_profile: env!("BUILD_PROFILE").to_string(),
        build_timestamp: env!("BUILD_TIMESTAMP").to_string(),
        version: env!("REPO_VERSION").to_string(),
    }
}
