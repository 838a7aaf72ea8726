use clap::Args;

use broker::facade::FacadeError;

use crate::client::{Client, ClientError};
use crate::state::{AppState, StateError};

/// End the stored session; the next upload signs in again
#[derive(Args, Debug, Clone)]
pub struct Logout;

#[derive(Debug, thiserror::Error)]
pub enum LogoutError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("logout failed: {0}")]
    Facade(#[from] FacadeError),
}

#[async_trait::async_trait]
impl crate::op::Op for Logout {
    type Error = LogoutError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = AppState::load(ctx.config_path.clone())?;
        let client = Client::connect(&state, ctx.remote.as_ref()).await?;
        if !client.facade().is_authenticated() {
            return Ok(format!("{} is not signed in", state.config.app_origin));
        }
        client.facade().disconnect().await?;
        Ok(format!("Signed out {}", state.config.app_origin))
    }
}
