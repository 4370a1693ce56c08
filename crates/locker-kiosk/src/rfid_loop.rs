//! §4.7 RFID/QR intake: reads the attached reader on a dedicated blocking
//! thread, debounces and normalizes scans, and resolves each against the
//! Gateway. A successful scan pulses the returned coil through the same
//! [`PulseEngine`] the Command Executor uses — self-service opens never go
//! through the command queue (§3: "no queue entry is created for
//! self-service flows").

use std::sync::Arc;
use std::time::Duration;

use locker_client::GatewayClient;
use locker_core::types::KioskId;
use locker_core::wire::{RfidResultRequest, RfidScanRequest};
use locker_executor::PulseEngine;
use locker_intake::{normalize_uid, Debouncer, RfidReader};
use tokio::task::JoinHandle;

pub fn spawn(
    mut reader: Box<dyn RfidReader>,
    kiosk_id: KioskId,
    client: Arc<GatewayClient>,
    engine: Arc<PulseEngine>,
    debounce_ms: u64,
) -> JoinHandle<()> {
    let (tx, mut rx) = tokio::sync::mpsc::channel::<String>(16);

    std::thread::spawn(move || loop {
        match reader.read_scan() {
            Ok(raw) => {
                if tx.blocking_send(raw).is_err() {
                    break; // receiver dropped, process is shutting down
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "rfid reader error; retrying");
                std::thread::sleep(Duration::from_millis(500));
            }
        }
    });

    tokio::spawn(async move {
        let mut debouncer = Debouncer::new(debounce_ms);
        while let Some(raw) = rx.recv().await {
            let uid = normalize_uid(&raw);
            if uid.is_empty() {
                continue;
            }
            if !debouncer.accept(&uid, chrono::Utc::now().timestamp_millis()) {
                continue;
            }
            handle_scan(&kiosk_id, &client, &engine, uid).await;
        }
    })
}

async fn handle_scan(kiosk_id: &KioskId, client: &GatewayClient, engine: &PulseEngine, uid: String) {
    let request = RfidScanRequest {
        uid_or_device_hash: uid.clone(),
        owner_type: "rfid".to_string(),
    };
    let response = match client.rfid_scan(kiosk_id, request).await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, uid = %uid, "rfid scan request failed");
            return;
        }
    };

    if response.action != "pulse" {
        tracing::info!(uid = %uid, reason = %response.reason, "rfid scan rejected");
        return;
    }
    let Some(locker_id) = response.locker_id else {
        tracing::warn!(uid = %uid, "gateway accepted rfid scan without a locker_id");
        return;
    };

    let result = engine.pulse_one(locker_id).await;
    let succeeded = result.is_ok();
    if let Err(e) = &result {
        tracing::warn!(locker_id, error = %e, "rfid pulse failed");
    }

    let report = RfidResultRequest {
        locker_id,
        uid_or_device_hash: uid,
        succeeded,
    };
    if let Err(e) = client.rfid_result(kiosk_id, report).await {
        tracing::warn!(error = %e, locker_id, "failed to report rfid result to gateway");
    }
}
