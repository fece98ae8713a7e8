//! Lane RPC service
//!
//! JSON lines over a reader/writer pair (stdin/stdout for `pixie-lane
//! serve`). `probe` and `status` are answered on the reader thread. Other
//! requests run on their own threads, at most [`MAX_IN_FLIGHT`] at once, so
//! a long compile never stalls a status poll. Responses are written whole
//! under a lock and may come back out of order, correlated by `request_id`.

mod handlers;

use std::io::{self, BufRead, Write};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;

use pixie_protocol::{
    ops::names, RpcError, RpcRequest, RpcResponse, PROTOCOL_MAX, PROTOCOL_MIN,
    PROTOCOL_VERSION_PROBE,
};

use crate::lane::Lane;

/// Upper bound on request threads running at once. The reader stops
/// taking lines while the bound is reached.
pub const MAX_IN_FLIGHT: usize = 8;

/// Answers RPC requests against one [`Lane`].
pub struct RpcHandler<'a> {
    lane: &'a Lane,
}

impl<'a> RpcHandler<'a> {
    pub fn new(lane: &'a Lane) -> Self {
        Self { lane }
    }

    /// Serve until `reader` reaches EOF, then wait for in-flight requests.
    ///
    /// A line that is not UTF-8 gets an `INVALID_REQUEST` response; it does
    /// not end the session.
    pub fn serve<R: BufRead, W: Write + Send>(&self, mut reader: R, writer: W) -> io::Result<()> {
        let writer = Mutex::new(writer);
        let slots = Slots::new(MAX_IN_FLIGHT);
        thread::scope(|scope| {
            let mut buf = Vec::new();
            for index in 0.. {
                buf.clear();
                if reader.read_until(b'\n', &mut buf)? == 0 {
                    break;
                }
                let line = match std::str::from_utf8(&buf) {
                    Ok(line) => line.trim(),
                    Err(e) => {
                        log::warn!("line {}: request is not valid UTF-8", index);
                        let response = RpcResponse::error(
                            PROTOCOL_VERSION_PROBE,
                            String::new(),
                            RpcError::invalid_request(format!("request is not valid UTF-8: {}", e)),
                        );
                        send(&writer, &response);
                        continue;
                    }
                };
                if line.is_empty() {
                    continue;
                }

                let request = match parse_request(line) {
                    Ok(request) => request,
                    Err(response) => {
                        send(&writer, &response);
                        continue;
                    }
                };
                if answered_inline(&request.op) {
                    send(&writer, &self.dispatch(&request));
                    continue;
                }

                let slot = slots.acquire();
                let writer = &writer;
                thread::Builder::new()
                    .name(format!("rpc-{}", index))
                    .spawn_scoped(scope, move || {
                        send(writer, &self.dispatch(&request));
                        drop(slot);
                    })?;
            }
            Ok(())
        })
    }

    /// Handle one request line and produce its response.
    pub fn handle_line(&self, line: &str) -> RpcResponse {
        match parse_request(line) {
            Ok(request) => self.dispatch(&request),
            Err(response) => response,
        }
    }

    fn dispatch(&self, request: &RpcRequest) -> RpcResponse {
        log::debug!("[{}] {}", request.request_id, request.op);

        let result = match request.op.as_str() {
            names::PROBE => handlers::probe(self.lane),
            names::STATUS => handlers::status(self.lane),
            names::COMPILE => handlers::compile(request, self.lane),
            names::FLASH => handlers::flash(request, self.lane),
            names::REVIEW => handlers::review(request, self.lane),
            _ => Err(RpcError::unknown_operation(&request.op)),
        };

        match result {
            Ok(payload) => RpcResponse::success(request.protocol_version, request.request_id.clone(), payload),
            Err(e) => {
                log::info!("[{}] {} failed: {}", request.request_id, request.op, e.code);
                RpcResponse::error(request.protocol_version, request.request_id.clone(), e)
            }
        }
    }
}

/// Decode a request line and check its protocol version. A rejected line
/// comes back as the response to send.
fn parse_request(line: &str) -> Result<RpcRequest, RpcResponse> {
    let request: RpcRequest = serde_json::from_str(line).map_err(|e| {
        RpcResponse::error(
            PROTOCOL_VERSION_PROBE,
            String::new(),
            RpcError::invalid_request(format!("invalid JSON: {}", e)),
        )
    })?;

    if let Err(e) = validate_protocol_version(&request) {
        return Err(RpcResponse::error(request.protocol_version, request.request_id, e));
    }
    Ok(request)
}

/// Ops cheap enough to answer without a thread of their own.
fn answered_inline(op: &str) -> bool {
    op == names::PROBE || op == names::STATUS
}

/// Counting limit on concurrent request threads.
struct Slots {
    in_use: Mutex<usize>,
    freed: Condvar,
    limit: usize,
}

impl Slots {
    fn new(limit: usize) -> Self {
        Self {
            in_use: Mutex::new(0),
            freed: Condvar::new(),
            limit,
        }
    }

    /// Block until a slot is free and take it.
    fn acquire(&self) -> Slot<'_> {
        let mut in_use = self
            .freed
            .wait_while(self.lock(), |n| *n >= self.limit)
            .unwrap_or_else(PoisonError::into_inner);
        *in_use += 1;
        Slot { slots: self }
    }

    fn in_use(&self) -> usize {
        *self.lock()
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        self.in_use.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A taken slot; released on drop, including when the request panics.
struct Slot<'a> {
    slots: &'a Slots,
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        *self.slots.lock() -= 1;
        self.slots.freed.notify_one();
    }
}

/// Probe must use version 0; every other op must use a supported version.
fn validate_protocol_version(request: &RpcRequest) -> Result<(), RpcError> {
    if request.op == names::PROBE {
        if request.protocol_version != PROTOCOL_VERSION_PROBE {
            return Err(RpcError::unsupported_protocol(
                request.protocol_version,
                PROTOCOL_VERSION_PROBE,
                PROTOCOL_VERSION_PROBE,
            ));
        }
        return Ok(());
    }

    if request.protocol_version < PROTOCOL_MIN || request.protocol_version > PROTOCOL_MAX {
        return Err(RpcError::unsupported_protocol(
            request.protocol_version,
            PROTOCOL_MIN,
            PROTOCOL_MAX,
        ));
    }
    Ok(())
}

fn send<W: Write>(writer: &Mutex<W>, response: &RpcResponse) {
    if let Err(e) = write_response(writer, response) {
        log::error!("failed to write response {}: {}", response.request_id, e);
    }
}

fn write_response<W: Write>(writer: &Mutex<W>, response: &RpcResponse) -> io::Result<()> {
    let json = response
        .to_line()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let mut writer = writer.lock().unwrap_or_else(PoisonError::into_inner);
    writeln!(writer, "{}", json)?;
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LaneConfig;
    use crate::device::{PortInfo, StaticPorts};
    use crate::mock::MockRunner;
    use pixie_protocol::ErrorCode;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn lane(tmp: &TempDir) -> Lane {
        let config = LaneConfig {
            build_root: tmp.path().join("builds"),
            ..LaneConfig::default()
        };
        Lane::new(
            config,
            Arc::new(MockRunner::new()),
            Box::new(StaticPorts(vec![PortInfo::usb("/dev/ttyACM0", 0x303a, 0x1001)])),
        )
    }

    fn respond(lane: &Lane, line: &str) -> RpcResponse {
        RpcHandler::new(lane).handle_line(line)
    }

    #[test]
    fn test_probe_request() {
        let tmp = TempDir::new().unwrap();
        let lane = lane(&tmp);
        let response = respond(&lane, r#"{"protocol_version":0,"op":"probe","request_id":"p-1","payload":{}}"#);

        assert!(response.ok);
        assert_eq!(response.protocol_version, 0);
        assert_eq!(response.request_id, "p-1");
        let payload = response.payload.unwrap();
        assert_eq!(payload["board"]["chip"], "esp32s3");
        assert_eq!(payload["protocol_max"], PROTOCOL_MAX);
    }

    #[test]
    fn test_probe_with_wrong_version() {
        let tmp = TempDir::new().unwrap();
        let lane = lane(&tmp);
        let response = respond(&lane, r#"{"protocol_version":1,"op":"probe","request_id":"p-2"}"#);
        assert_eq!(response.error.unwrap().code, ErrorCode::UnsupportedProtocol);
    }

    #[test]
    fn test_non_probe_with_version_zero() {
        let tmp = TempDir::new().unwrap();
        let lane = lane(&tmp);
        let response = respond(&lane, r#"{"protocol_version":0,"op":"status","request_id":"s-0"}"#);
        assert_eq!(response.error.unwrap().code, ErrorCode::UnsupportedProtocol);
    }

    #[test]
    fn test_invalid_json() {
        let tmp = TempDir::new().unwrap();
        let lane = lane(&tmp);
        let response = respond(&lane, "not valid json");
        assert!(!response.ok);
        assert_eq!(response.error.unwrap().code, ErrorCode::InvalidRequest);
    }

    #[test]
    fn test_unknown_operation() {
        let tmp = TempDir::new().unwrap();
        let lane = lane(&tmp);
        let response = respond(&lane, r#"{"protocol_version":1,"op":"upload","request_id":"u-1"}"#);
        assert_eq!(response.error.unwrap().code, ErrorCode::UnknownOperation);
    }

    #[test]
    fn test_status_before_install() {
        let tmp = TempDir::new().unwrap();
        let lane = lane(&tmp);
        let response = respond(&lane, r#"{"protocol_version":1,"op":"status","request_id":"s-1"}"#);
        let payload = response.payload.unwrap();
        assert_eq!(payload["toolchain"], "unchecked");
        assert_eq!(payload["ready"], false);
    }

    #[test]
    fn test_compile_missing_code_field() {
        let tmp = TempDir::new().unwrap();
        let lane = lane(&tmp);
        let response = respond(&lane, r#"{"protocol_version":1,"op":"compile","request_id":"c-1","payload":{}}"#);
        assert_eq!(response.error.unwrap().code, ErrorCode::InvalidRequest);
    }

    #[test]
    fn test_review_without_advisor_is_valid() {
        let tmp = TempDir::new().unwrap();
        let lane = lane(&tmp);
        let response = respond(
            &lane,
            r#"{"protocol_version":1,"op":"review","request_id":"r-1","payload":{"code":"void setup(){}"}}"#,
        );
        let payload = response.payload.unwrap();
        assert_eq!(payload["valid"], true);
        assert_eq!(payload["advisory_available"], false);
    }

    #[test]
    fn test_serve_answers_every_line() {
        let tmp = TempDir::new().unwrap();
        let lane = lane(&tmp);
        let input = concat!(
            r#"{"protocol_version":0,"op":"probe","request_id":"a"}"#,
            "\n\n",
            r#"{"protocol_version":1,"op":"status","request_id":"b"}"#,
            "\n",
            "garbage\n",
        );
        let mut output = Vec::new();
        RpcHandler::new(&lane).serve(Cursor::new(input), &mut output).unwrap();

        let mut ids: Vec<String> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str::<RpcResponse>(l).unwrap().request_id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["", "a", "b"]);
    }

    #[test]
    fn test_serve_survives_invalid_utf8_line() {
        let tmp = TempDir::new().unwrap();
        let lane = lane(&tmp);
        let mut input = Vec::new();
        input.extend_from_slice(br#"{"protocol_version":1,"op":"status","request_id":"a"}"#);
        input.extend_from_slice(b"\n\xff\xfe garbage\n");
        input.extend_from_slice(br#"{"protocol_version":1,"op":"status","request_id":"b"}"#);
        input.extend_from_slice(b"\n");
        let mut output = Vec::new();
        RpcHandler::new(&lane).serve(Cursor::new(input), &mut output).unwrap();

        let responses: Vec<RpcResponse> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        // Inline ops keep input order.
        let ids: Vec<&str> = responses.iter().map(|r| r.request_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "", "b"]);
        let rejected = responses[1].error.as_ref().unwrap();
        assert_eq!(rejected.code, ErrorCode::InvalidRequest);
        assert!(rejected.message.contains("UTF-8"));
    }

    #[test]
    fn test_slots_block_at_limit() {
        let slots = Slots::new(2);
        let first = slots.acquire();
        let _second = slots.acquire();
        assert_eq!(slots.in_use(), 2);

        let taken = AtomicBool::new(false);
        thread::scope(|scope| {
            scope.spawn(|| {
                let _third = slots.acquire();
                taken.store(true, Ordering::SeqCst);
            });
            thread::sleep(Duration::from_millis(50));
            assert!(!taken.load(Ordering::SeqCst));
            drop(first);
        });
        assert!(taken.load(Ordering::SeqCst));
        assert_eq!(slots.in_use(), 1);
    }

    #[test]
    fn test_slot_released_on_panic() {
        let slots = Slots::new(1);
        let result = thread::scope(|scope| {
            scope
                .spawn(|| {
                    let _slot = slots.acquire();
                    panic!("request handler failed");
                })
                .join()
        });
        assert!(result.is_err());
        assert_eq!(slots.in_use(), 0);
        drop(slots.acquire());
    }
}
