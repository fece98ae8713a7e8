//! Per-operation request handlers.
//!
//! Each handler decodes its payload, calls into the [`Lane`] and returns the
//! response payload as JSON.

use chrono::Utc;
use pixie_protocol::ops::{
    names, BoardInfo, CompileRequest, CompileResponse, FlashRequest, FlashResponse,
    ProbeResponse, ReviewRequest, ReviewResponse, StatusResponse, ToolchainStatus,
};
use pixie_protocol::{RpcError, RpcRequest, LANE_VERSION, PROTOCOL_MAX, PROTOCOL_MIN};
use serde::Serialize;
use serde_json::Value;

use crate::advisory::{self, ReviewInput};
use crate::artifact::wire;
use crate::lane::Lane;
use crate::toolchain::ToolchainState;

type HandlerResult = Result<Value, RpcError>;

fn to_payload<T: Serialize>(response: &T) -> HandlerResult {
    serde_json::to_value(response)
        .map_err(|e| RpcError::internal(format!("failed to serialize response: {}", e)))
}

pub fn probe(lane: &Lane) -> HandlerResult {
    let config = lane.config();
    to_payload(&ProbeResponse {
        created_at: Utc::now(),
        lane_version: LANE_VERSION.to_string(),
        protocol_min: PROTOCOL_MIN,
        protocol_max: PROTOCOL_MAX,
        operations: [names::PROBE, names::STATUS, names::COMPILE, names::FLASH, names::REVIEW]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        board: BoardInfo {
            fqbn: config.toolchain.fqbn.clone(),
            chip: config.flasher.chip.clone(),
            flash_size: config.flasher.flash_size.clone(),
        },
    })
}

pub fn status(lane: &Lane) -> HandlerResult {
    let state = lane.toolchain().state();
    let toolchain = match &state {
        ToolchainState::Unchecked => ToolchainStatus::Unchecked,
        ToolchainState::Installing => ToolchainStatus::Installing,
        ToolchainState::Ready => ToolchainStatus::Ready,
        ToolchainState::Failed { .. } => ToolchainStatus::Failed,
    };
    to_payload(&StatusResponse {
        toolchain,
        ready: state.is_ready(),
        reason: state.reason().map(str::to_string),
    })
}

pub fn compile(request: &RpcRequest, lane: &Lane) -> HandlerResult {
    let payload: CompileRequest = request.parse_payload()?;
    let firmware = lane
        .builds()
        .compile(&payload.code)
        .map_err(|e| RpcError::from(&e))?;

    to_payload(&CompileResponse {
        message: format!("Compiled successfully ({} images)", firmware.artifacts.len()),
        artifacts: wire::encode(&firmware.artifacts),
        duration_ms: firmware.duration.as_millis() as u64,
        completed_at: Utc::now(),
        job_id: firmware.job_id,
    })
}

pub fn flash(request: &RpcRequest, lane: &Lane) -> HandlerResult {
    let payload: FlashRequest = request.parse_payload()?;
    let artifacts = wire::decode(&payload.artifacts).map_err(|e| RpcError::from(&e))?;
    let report = lane
        .flashes()
        .flash(&artifacts)
        .map_err(|e| RpcError::from(&e))?;

    to_payload(&FlashResponse {
        message: report.message,
        port: report.port,
        device_log: report.device_log,
    })
}

pub fn review(request: &RpcRequest, lane: &Lane) -> HandlerResult {
    let payload: ReviewRequest = request.parse_payload()?;
    let verdict = advisory::advise(
        lane.advisor(),
        &ReviewInput {
            code: payload.code,
            reference: payload.reference,
            instruction: payload.instruction,
        },
    );

    to_payload(&ReviewResponse {
        valid: verdict.valid,
        guidance: verdict.guidance,
        advisory_available: verdict.from_advisor,
    })
}
