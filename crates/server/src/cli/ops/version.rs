use clap::Args;

use common::prelude::build_info;

#[derive(Args, Debug, Clone)]
pub struct Version {
    /// Print the build info as JSON, as served by /_status/version
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum VersionError {
    #[error("could not encode build info: {0}")]
    Encode(#[from] serde_json::Error),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Version {
    type Error = VersionError;
    type Output = String;

    async fn execute(&self, _ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let info = build_info();
        if self.json {
            Ok(serde_json::to_string_pretty(&info)?)
        } else {
            Ok(info.to_string())
        }
    }
}
