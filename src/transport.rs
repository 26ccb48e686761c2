//! Messages between the background worker and the session.
//!
//! The two sides share no memory: every message crosses as an [`Envelope`],
//! a serialized JSON body plus the request id it answers, kept outside the
//! body so stale results can be dropped without decoding them. 64-bit counts
//! inside the body go through [`Count`](crate::types::Count), which falls
//! back to decimal strings rather than losing precision.

use crate::error::TransportError;
use crate::types::{Count, QueryBundle};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
    /// The canonical view exists and queries may be sent.
    Ready {
        rows: Count,
    },
    /// Dataset discovery, fetch or view creation failed.
    LoadFailed {
        message: String,
    },
    QueryResult {
        #[serde(rename = "requestId")]
        request_id: u64,
        bundle: QueryBundle,
    },
    QueryFailed {
        #[serde(rename = "requestId")]
        request_id: u64,
        message: String,
    },
}

impl WorkerMessage {
    pub fn request_id(&self) -> Option<u64> {
        match self {
            WorkerMessage::QueryResult { request_id, .. }
            | WorkerMessage::QueryFailed { request_id, .. } => Some(*request_id),
            WorkerMessage::Ready { .. } | WorkerMessage::LoadFailed { .. } => None,
        }
    }
}

/// One atomic message on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    request_id: Option<u64>,
    body: String,
}

impl Envelope {
    pub fn encode(message: &WorkerMessage) -> Result<Self, TransportError> {
        let body = serde_json::to_string(message).map_err(TransportError::Encode)?;
        Ok(Self {
            request_id: message.request_id(),
            body,
        })
    }

    pub fn request_id(&self) -> Option<u64> {
        self.request_id
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Decode and type-check the body. A body whose own id disagrees with the
    /// envelope is rejected as malformed.
    pub fn decode(&self) -> Result<WorkerMessage, TransportError> {
        let message: WorkerMessage =
            serde_json::from_str(&self.body).map_err(TransportError::Decode)?;
        if message.request_id() != self.request_id {
            return Err(TransportError::Unrepresentable {
                value: format!(
                    "request id {:?} in body, {:?} on envelope",
                    message.request_id(),
                    self.request_id
                ),
            });
        }
        Ok(message)
    }

    #[cfg(test)]
    pub(crate) fn from_parts(request_id: Option<u64>, body: impl Into<String>) -> Self {
        Self {
            request_id,
            body: body.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{KpiRow, ReportRow, MAX_SAFE_INTEGER};
    use pretty_assertions::assert_eq;

    fn bundle_with_count(n: u64) -> QueryBundle {
        QueryBundle {
            kpis: KpiRow { avg_grp: 1.5, total_ots: 20.0, unique_surfaces: Count(n) },
            report_data: vec![ReportRow {
                city: "Москва".into(),
                format: "BB".into(),
                year: 2024,
                month: "янв".into(),
                avg_grp: 1.5,
                side_count: Count(n),
            }],
            ..QueryBundle::default()
        }
    }

    #[test]
    fn result_is_tagged_and_keeps_field_names() {
        let msg = WorkerMessage::QueryResult { request_id: 7, bundle: bundle_with_count(3) };
        let env = Envelope::encode(&msg).unwrap();
        assert_eq!(env.request_id(), Some(7));
        let json: serde_json::Value = serde_json::from_str(env.body()).unwrap();
        assert_eq!(json["type"], "QUERY_RESULT");
        assert_eq!(json["requestId"], 7);
        assert_eq!(json["bundle"]["kpis"]["uniqueSurfaces"], 3);
        assert_eq!(json["bundle"]["reportData"][0]["sideCount"], 3);
        assert_eq!(env.decode().unwrap(), msg);
    }

    #[test]
    fn oversized_counts_cross_as_strings() {
        let big = MAX_SAFE_INTEGER + 10;
        let msg = WorkerMessage::QueryResult { request_id: 1, bundle: bundle_with_count(big) };
        let env = Envelope::encode(&msg).unwrap();
        let json: serde_json::Value = serde_json::from_str(env.body()).unwrap();
        assert_eq!(json["bundle"]["kpis"]["uniqueSurfaces"], big.to_string());
        match env.decode().unwrap() {
            WorkerMessage::QueryResult { bundle, .. } => {
                assert_eq!(bundle.kpis.unique_surfaces, Count(big));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn malformed_bodies_are_rejected() {
        let env = Envelope::from_parts(Some(2), r#"{"type":"QUERY_RESULT","requestId":2,"bundle":{"kpis":1}}"#);
        assert!(matches!(env.decode(), Err(TransportError::Decode(_))));

        let mismatched = Envelope::from_parts(Some(3), r#"{"type":"QUERY_FAILED","requestId":2,"message":"x"}"#);
        assert!(mismatched.decode().is_err());
    }

    #[test]
    fn control_messages_carry_no_request_id() {
        let env = Envelope::encode(&WorkerMessage::Ready { rows: Count(0) }).unwrap();
        assert_eq!(env.request_id(), None);
        assert_eq!(env.body(), r#"{"type":"READY","rows":0}"#);
    }
}
