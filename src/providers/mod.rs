mod wash;

use crate::core::error::FetchError;
use async_trait::async_trait;
use serde_json::Value;

pub use wash::WashApiClient;

/// The two read-only endpoints the pipeline polls. Both calls are
/// side-effect free and safe to retry.
#[async_trait]
pub trait LocationApi: Send + Sync {
    fn name(&self) -> &'static str;

    /// Location payload for an external code; carries `location.uln`.
    async fn fetch_location(&self, code: &str) -> Result<Value, FetchError>;

    /// Machine status payload for a resolved ULN.
    async fn fetch_machine_status(&self, uln: &str) -> Result<Value, FetchError>;
}
