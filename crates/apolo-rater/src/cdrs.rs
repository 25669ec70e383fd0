//! CdrsV1 API: persistence of charged CDRs

use apolo_core::models::ChargedCdr;
use apolo_core::traits::CdrConnector;
use apolo_core::AppResult;
use async_trait::async_trait;
use tracing::{info, instrument};

use crate::client::{RaterClient, RaterError};
use crate::types::{methods, CDR_OK};

#[async_trait]
impl CdrConnector for RaterClient {
    #[instrument(skip(self, cdr), fields(origin_id = %cdr.origin_id, run_id = %cdr.run_id))]
    async fn process_cdr(&self, cdr: &ChargedCdr) -> AppResult<()> {
        let reply: String = self.call(methods::PROCESS_CDR, cdr).await?;
        if reply != CDR_OK {
            return Err(RaterError::UnexpectedReply(reply).into());
        }
        info!(usage_secs = cdr.usage.as_secs(), cost = %cdr.cost, "CDR processed");
        Ok(())
    }
}
