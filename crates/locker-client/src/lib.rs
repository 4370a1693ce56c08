//! Typed HTTP client for the Gateway API (§4.8), shared by the Kiosk
//! executor/intake and the Panel relay.

use std::time::Duration;

use locker_core::constants::DEFAULT_STAFF_HTTP_TIMEOUT_SECS;
use locker_core::error::{LockerError, Result};
use locker_core::types::{Command, CommandPayload, CommandType, KioskId, Locker};
use locker_core::wire::{
    CommandStatusResponse, EnqueueRequest, EnqueueResponse, ErrorResponse, FailRequest,
    HeartbeatRequest, KioskSummary, PulseResultRequest, RfidResultRequest, RfidScanRequest,
    RfidScanResponse,
};
use reqwest::{Response, StatusCode};

pub struct GatewayClient {
    http: reqwest::Client,
    base_url: String,
}

async fn error_from_response(response: Response) -> LockerError {
    let status = response.status();
    match response.json::<ErrorResponse>().await {
        Ok(body) => map_status(status, &body.message),
        Err(_) => map_status(status, status.canonical_reason().unwrap_or("request failed")),
    }
}

fn map_status(status: StatusCode, message: &str) -> LockerError {
    match status {
        StatusCode::NOT_FOUND => LockerError::CommandNotFound(message.to_string()),
        StatusCode::CONFLICT => LockerError::Conflict(message.to_string()),
        StatusCode::TOO_MANY_REQUESTS => LockerError::QueueDepthExceeded(message.to_string()),
        StatusCode::UNPROCESSABLE_ENTITY => LockerError::Conflict(message.to_string()),
        _ => LockerError::Other(format!("gateway returned {status}: {message}")),
    }
}

impl GatewayClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_timeout(base_url, Duration::from_secs(DEFAULT_STAFF_HTTP_TIMEOUT_SECS))
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client builder");
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn enqueue(
        &self,
        kiosk_id: &KioskId,
        payload: CommandPayload,
        command_id: Option<String>,
    ) -> Result<EnqueueResponse> {
        let request = EnqueueRequest {
            kiosk_id: kiosk_id.as_str().to_string(),
            command_type: payload.command_type(),
            payload,
            command_id,
        };
        let response = self
            .http
            .post(self.url("/commands"))
            .json(&request)
            .send()
            .await
            .map_err(|e| LockerError::Other(format!("enqueue request failed: {e}")))?;

        if response.status().is_success() {
            response
                .json()
                .await
                .map_err(|e| LockerError::Other(format!("decoding enqueue response: {e}")))
        } else if response.status() == StatusCode::CONFLICT {
            response
                .json()
                .await
                .map_err(|e| LockerError::Other(format!("decoding enqueue response: {e}")))
        } else {
            Err(error_from_response(response).await)
        }
    }

    pub async fn get_command(&self, command_id: &str) -> Result<CommandStatusResponse> {
        let response = self
            .http
            .get(self.url(&format!("/commands/{command_id}")))
            .send()
            .await
            .map_err(|e| LockerError::Other(format!("get_command failed: {e}")))?;
        self.decode_or_error(response).await
    }

    pub async fn cancel_command(&self, command_id: &str) -> Result<CommandStatusResponse> {
        let response = self
            .http
            .post(self.url(&format!("/commands/{command_id}/cancel")))
            .send()
            .await
            .map_err(|e| LockerError::Other(format!("cancel_command failed: {e}")))?;
        self.decode_or_error(response).await
    }

    /// `GET /kiosks/{kiosk_id}/commands?limit=N` — immediate or long-poll
    /// depending on the Gateway's handling; this call does not claim.
    pub async fn list_commands(&self, kiosk_id: &KioskId, limit: u32) -> Result<Vec<Command>> {
        let response = self
            .http
            .get(self.url(&format!(
                "/kiosks/{}/commands?limit={limit}",
                kiosk_id.as_str()
            )))
            .send()
            .await
            .map_err(|e| LockerError::Other(format!("list_commands failed: {e}")))?;
        self.decode_or_error(response).await
    }

    /// `POST /kiosks/{kiosk_id}/commands/claim` — runs `claimNext` server-side.
    pub async fn claim_next(&self, kiosk_id: &KioskId) -> Result<Option<Command>> {
        let response = self
            .http
            .post(self.url(&format!("/kiosks/{}/commands/claim", kiosk_id.as_str())))
            .send()
            .await
            .map_err(|e| LockerError::Other(format!("claim_next failed: {e}")))?;

        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if response.status().is_success() {
            return response
                .json()
                .await
                .map_err(|e| LockerError::Other(format!("decoding claim response: {e}")));
        }
        Err(error_from_response(response).await)
    }

    pub async fn complete_command(&self, kiosk_id: &KioskId, command_id: &str) -> Result<()> {
        let response = self
            .http
            .post(self.url(&format!(
                "/kiosks/{}/commands/{command_id}/complete",
                kiosk_id.as_str()
            )))
            .send()
            .await
            .map_err(|e| LockerError::Other(format!("complete_command failed: {e}")))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(error_from_response(response).await)
        }
    }

    pub async fn fail_command(
        &self,
        kiosk_id: &KioskId,
        command_id: &str,
        error: &str,
        retryable: bool,
    ) -> Result<()> {
        let body = FailRequest {
            error: error.to_string(),
            retryable,
        };
        let response = self
            .http
            .post(self.url(&format!(
                "/kiosks/{}/commands/{command_id}/fail",
                kiosk_id.as_str()
            )))
            .json(&body)
            .send()
            .await
            .map_err(|e| LockerError::Other(format!("fail_command failed: {e}")))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(error_from_response(response).await)
        }
    }

    /// Reports one locker's pulse outcome within a command, ahead of the
    /// command-level `complete`/`fail` call (needed so a partial `bulk_open`
    /// failure doesn't strand successfully-opened lockers in `Opening`).
    pub async fn report_pulse_result(
        &self,
        kiosk_id: &KioskId,
        locker_id: u32,
        command_id: &str,
        succeeded: bool,
        error: Option<String>,
        retryable: bool,
    ) -> Result<()> {
        let body = PulseResultRequest {
            command_id: command_id.to_string(),
            succeeded,
            error,
            retryable,
        };
        let response = self
            .http
            .post(self.url(&format!(
                "/kiosks/{}/lockers/{locker_id}/pulse-result",
                kiosk_id.as_str()
            )))
            .json(&body)
            .send()
            .await
            .map_err(|e| LockerError::Other(format!("report_pulse_result failed: {e}")))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(error_from_response(response).await)
        }
    }

    pub async fn send_heartbeat(&self, request: HeartbeatRequest) -> Result<()> {
        let response = self
            .http
            .post(self.url(&format!("/kiosks/{}/heartbeat", request.kiosk_id)))
            .json(&request)
            .send()
            .await
            .map_err(|e| LockerError::Other(format!("send_heartbeat failed: {e}")))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(error_from_response(response).await)
        }
    }

    pub async fn list_kiosks(&self) -> Result<Vec<KioskSummary>> {
        let response = self
            .http
            .get(self.url("/kiosks"))
            .send()
            .await
            .map_err(|e| LockerError::Other(format!("list_kiosks failed: {e}")))?;
        self.decode_or_error(response).await
    }

    /// `GET /kiosks/{kiosk_id}/lockers` — used by the Panel to resolve VIP
    /// exclusion when a bulk-open request carries `exclude_vip`.
    pub async fn list_lockers(&self, kiosk_id: &KioskId) -> Result<Vec<Locker>> {
        let response = self
            .http
            .get(self.url(&format!("/kiosks/{}/lockers", kiosk_id.as_str())))
            .send()
            .await
            .map_err(|e| LockerError::Other(format!("list_lockers failed: {e}")))?;
        self.decode_or_error(response).await
    }

    pub async fn rfid_scan(
        &self,
        kiosk_id: &KioskId,
        request: RfidScanRequest,
    ) -> Result<RfidScanResponse> {
        let response = self
            .http
            .post(self.url(&format!("/kiosks/{}/rfid/scan", kiosk_id.as_str())))
            .json(&request)
            .send()
            .await
            .map_err(|e| LockerError::Other(format!("rfid_scan failed: {e}")))?;
        self.decode_or_error(response).await
    }

    pub async fn rfid_result(
        &self,
        kiosk_id: &KioskId,
        request: RfidResultRequest,
    ) -> Result<()> {
        let response = self
            .http
            .post(self.url(&format!("/kiosks/{}/rfid/result", kiosk_id.as_str())))
            .json(&request)
            .send()
            .await
            .map_err(|e| LockerError::Other(format!("rfid_result failed: {e}")))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(error_from_response(response).await)
        }
    }

    async fn decode_or_error<T: serde::de::DeserializeOwned>(&self, response: Response) -> Result<T> {
        if response.status().is_success() {
            response
                .json()
                .await
                .map_err(|e| LockerError::Other(format!("decoding response: {e}")))
        } else {
            Err(error_from_response(response).await)
        }
    }
}

#[allow(dead_code)]
fn _unused_command_type_hint(_: CommandType) {}

#[cfg(test)]
mod tests {
    use super::*;
    use locker_core::types::CommandPayload;
    use locker_core::wire::RfidScanResponse;

    #[test]
    fn url_joins_base_and_path_without_double_slash() {
        let client = GatewayClient::new("http://127.0.0.1:3000");
        assert_eq!(client.url("/commands"), "http://127.0.0.1:3000/commands");
    }

    #[test]
    fn enqueue_request_serializes_with_command_type_matching_payload() {
        let payload = CommandPayload::OpenLocker {
            locker_id: 7,
            staff_user: "staff-1".into(),
            reason: "jam".into(),
            override_vip: false,
        };
        let request = EnqueueRequest {
            kiosk_id: "KIOSK-1".into(),
            command_type: payload.command_type(),
            payload,
            command_id: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["command_type"], "open_locker");
        assert_eq!(json["payload"]["locker_id"], 7);
    }

    #[test]
    fn command_status_response_round_trips_through_json() {
        let command = Command {
            command_id: "c-1".into(),
            kiosk_id: KioskId::new("KIOSK-1"),
            payload: CommandPayload::Block {
                locker_id: 3,
                staff_user: "staff-1".into(),
                reason: "maintenance".into(),
            },
            status: locker_core::types::CommandStatus::Pending,
            created_at: 1_700_000_000,
            next_attempt_at: 1_700_000_000,
            executed_at: None,
            completed_at: None,
            last_error: None,
            retry_count: 0,
            max_retries: 3,
        };
        let response = CommandStatusResponse::from(&command);
        let json = serde_json::to_string(&response).unwrap();
        let decoded: CommandStatusResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.command_id, "c-1");
        assert_eq!(decoded.locker_id, Some(3));
        assert!(decoded.locker_ids.is_none());
    }

    #[test]
    fn rfid_scan_response_with_no_coil_omits_the_field() {
        let response = RfidScanResponse {
            action: "reject".into(),
            coil: None,
            locker_id: None,
            reason: "already_owns".into(),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("coil").is_none());
    }

    #[test]
    fn map_status_classifies_conflict_and_not_found() {
        assert!(matches!(
            map_status(StatusCode::NOT_FOUND, "gone"),
            LockerError::CommandNotFound(_)
        ));
        assert!(matches!(
            map_status(StatusCode::CONFLICT, "dup"),
            LockerError::Conflict(_)
        ));
        assert!(matches!(
            map_status(StatusCode::TOO_MANY_REQUESTS, "busy"),
            LockerError::QueueDepthExceeded(_)
        ));
    }
}
