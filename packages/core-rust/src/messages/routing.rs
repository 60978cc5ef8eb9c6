//! Route registration RPC payloads.

use serde::{Deserialize, Serialize};

use crate::descriptor::RouteBatch;
use crate::proto::GeneratedProto;

/// A module's full descriptor set plus its generated interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRoutesRequest {
    #[serde(flatten)]
    pub batch: RouteBatch,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proto: Option<GeneratedProto>,
}

/// A descriptor the compiler refused, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rejection {
    /// Human-readable descriptor identity, e.g. `GET /users/:id`.
    pub descriptor: String,
    pub reason: String,
}

/// Acknowledgement of a route registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRoutesResponse {
    pub module: String,
    pub accepted: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rejected: Vec<Rejection>,
    /// Routing table version that contains this batch.
    pub version: u64,
}

impl RegisterRoutesResponse {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}
