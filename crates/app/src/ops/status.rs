use std::fmt::Write;

use clap::Args;

use broker::session::{SessionError, SessionRecord};
use common::postage::{UtilizationError, UtilizationTracker};

use crate::state::{AppState, StateError};

/// Show the stored session and how full the postage batch is
#[derive(Args, Debug, Clone)]
pub struct Status;

#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error("failed to read session: {0}")]
    Session(#[from] SessionError),
    #[error("failed to read utilization: {0}")]
    Utilization(#[from] UtilizationError),
}

#[async_trait::async_trait]
impl crate::op::Op for Status {
    type Error = StatusError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = AppState::load(ctx.config_path.clone())?;
        let store = state.store();
        let origin = &state.config.app_origin;
        let session = SessionRecord::load(store.as_ref(), origin).await?;

        let mut output = format!("App origin: {}\n", origin);
        match &session {
            Some(record) => {
                let _ = writeln!(
                    output,
                    "Session: signed in since {}",
                    record.created_at.to_rfc3339()
                );
            }
            None => output.push_str("Session: signed out\n"),
        }

        // The session's grant wins over the local config once signed in
        let (batch_id, depth, self_signed) = match &session {
            Some(record) => (
                record.batch_id,
                record.depth.unwrap_or(state.depth()),
                record.signer_key.is_some(),
            ),
            None => (
                state.config.postage.batch_id,
                state.depth(),
                state.config.postage.self_signed,
            ),
        };

        let Some(batch_id) = batch_id else {
            output.push_str("Postage batch: none (read-only)");
            return Ok(output);
        };
        let _ = writeln!(output, "Postage batch: {} (depth {})", batch_id, depth);

        if self_signed {
            let tracker = UtilizationTracker::load_or_new(store.as_ref(), batch_id, depth).await?;
            let _ = write!(
                output,
                "Utilization: {:.2}% (last update {})",
                tracker.utilization_percent(),
                tracker.last_update().to_rfc3339()
            );
        } else {
            output.push_str("Utilization: tracked by the node");
        }

        Ok(output)
    }
}
