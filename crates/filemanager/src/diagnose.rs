use std::collections::HashMap;

use serde_json::json;
use tracing::{debug, warn};

use barge_broker::{Broker, Delivery};
use barge_protocol::{DIAGNOSE_EXCHANGE, DiagnoseMessage, DiagnoseResponse, DiagnoseStatus,
    diagnose_response_key};

use crate::server::SERVICE_NAME;

/// Answers one diagnose fan-out with a healthy status.
pub async fn handle<B: Broker>(broker: &B, delivery: Delivery) {
    let msg: DiagnoseMessage = match serde_json::from_slice(&delivery.body) {
        Ok(m) => m,
        Err(e) => {
            warn!(error = %e, "malformed diagnose message, dropping");
            let _ = delivery.acker.nack(false).await;
            return;
        }
    };
    debug!(operation = %msg.operation, transaction = %msg.transaction_id, "diagnose request");

    let response = DiagnoseResponse {
        transaction_id: msg.transaction_id,
        service_name: SERVICE_NAME.to_string(),
        operation: msg.operation,
        status: DiagnoseStatus::Processed,
        message: Some("filemanager is up".to_string()),
        data: Some(HashMap::from([("status".to_string(), json!("healthy"))])),
    };

    let body = match serde_json::to_vec(&response) {
        Ok(body) => body,
        Err(e) => {
            warn!(error = %e, "failed to encode diagnose response");
            let _ = delivery.acker.nack(false).await;
            return;
        }
    };

    let key = diagnose_response_key(SERVICE_NAME);
    match broker
        .publish(DIAGNOSE_EXCHANGE, &key, "application/json", body)
        .await
    {
        Ok(()) => {
            let _ = delivery.acker.ack().await;
        }
        Err(e) => {
            warn!(error = %e, "failed to publish diagnose response, requeueing");
            let _ = delivery.acker.nack(true).await;
        }
    }
}
