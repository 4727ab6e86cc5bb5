//! Handler dispatcher contract.
//!
//! The dispatcher is the user's request-to-handler registry; this crate
//! only defines the seam the bridge invokes. Requests are addressed by a
//! `request_type` string and carry a JSON payload; the handler's return
//! value (JSON, `null` for commands without a response) travels back
//! through the coordinator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::Result;

/// A request shipped through the job engine to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Handler descriptor: which handler processes this request.
    pub request_type: String,

    /// Opaque request payload, deserialized by the handler.
    pub payload: serde_json::Value,
}

impl JobRequest {
    pub fn new(request_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            request_type: request_type.into(),
            payload,
        }
    }

    /// Build a request from any serializable value.
    pub fn from_typed<T: Serialize>(request_type: impl Into<String>, value: &T) -> Result<Self> {
        Ok(Self {
            request_type: request_type.into(),
            payload: serde_json::to_value(value)?,
        })
    }
}

/// User-handler registry invoked by the bridge on a worker.
#[async_trait]
pub trait RequestDispatcher: Send + Sync {
    /// Run the handler registered for the request. Returns the handler's
    /// result payload; handlers without a response return `null`.
    async fn dispatch(&self, request: &JobRequest) -> Result<serde_json::Value>;

    /// Fan a notification out to every handler registered for it. Any
    /// handler failure propagates.
    async fn publish(&self, notification: &JobRequest) -> Result<()>;
}
