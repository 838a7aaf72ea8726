use clap::Args;

use common::build_info;
use common::version::BuildInfo;

/// Print build details of this binary
#[derive(Args, Debug, Clone, Default)]
pub struct Version {
    /// Print only the version string
    #[arg(long, conflicts_with = "json")]
    pub short: bool,

    /// Print every build field as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum VersionError {
    #[error("failed to encode build info: {0}")]
    Encode(#[from] serde_json::Error),
}

impl Version {
    fn render(&self, info: &BuildInfo) -> Result<String, VersionError> {
        if self.short {
            return Ok(info.version.clone());
        }
        if self.json {
            return Ok(serde_json::to_string_pretty(info)?);
        }
        Ok(format!(
            "swarm-id {}\nprofile:  {}\nfeatures: {}\nbuilt:    {}\nrustc:    {}",
            info.version,
            info.build_profile,
            info.build_features,
            info.build_timestamp,
            info.rust_version
        ))
    }
}

#[async_trait::async_trait]
impl crate::op::Op for Version {
    type Error = VersionError;
    type Output = String;

    async fn execute(&self, _ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        self.render(&build_info!())
    }
}
