//! Mock platform sink for testing.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::sink::{PlatformSink, SinkError, SinkResult};

/// An archive handed to the sink.
#[derive(Debug, Clone)]
pub struct RecordedDelivery {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Mock implementation of the PlatformSink trait.
///
/// Records every delivery instead of touching the filesystem and can be told
/// to fail.
#[derive(Debug, Default)]
pub struct MockSink {
    deliveries: Arc<RwLock<Vec<RecordedDelivery>>>,
    fail: Arc<RwLock<bool>>,
}

impl MockSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn recorded_deliveries(&self) -> Vec<RecordedDelivery> {
        self.deliveries.read().await.clone()
    }

    pub async fn delivery_count(&self) -> usize {
        self.deliveries.read().await.len()
    }

    /// Make every following delivery fail with an I/O error.
    pub async fn set_fail(&self, fail: bool) {
        *self.fail.write().await = fail;
    }
}

#[async_trait]
impl PlatformSink for MockSink {
    fn name(&self) -> &str {
        "mock"
    }

    async fn save_or_share(
        &self,
        bytes: &[u8],
        suggested_name: &str,
    ) -> Result<SinkResult, SinkError> {
        if *self.fail.read().await {
            return Err(SinkError::Io(std::io::Error::other("mock sink failure")));
        }
        self.deliveries.write().await.push(RecordedDelivery {
            name: suggested_name.to_string(),
            bytes: bytes.to_vec(),
        });
        Ok(SinkResult {
            path: Some(PathBuf::from("/mock").join(suggested_name)),
            shared: false,
        })
    }
}
