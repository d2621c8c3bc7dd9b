//! Minimal stand-in for a provider process, used only by the integration
//! suite in `tests/scenarios.rs`. Speaks the ADPP frame + bincode wire
//! contract over stdin/stdout; a reader thread decodes frames onto an
//! `mpsc` channel and the main thread replies from the other end, the same
//! reader-thread/channel split `anolis_core::provider::session` uses on
//! the client side of this same protocol.
//!
//! Its first argument selects a canned scenario. Unrecognized scenarios
//! fall back to always-`OK` readings.

use std::collections::HashMap;
use std::io::{self};
use std::sync::mpsc;
use std::thread;

use anolis_core::model::{Quality, Value, ValueType};
use anolis_core::transport::frame;
use anolis_core::transport::proto::{
    self, DeviceSummary, Request, RequestBody, Response, ResponseBody, Status, StatusCode,
    WireFunctionSpec, WireSignalSpec, WireSignalValue,
};

fn main() {
    let scenario = std::env::args().nth(1).unwrap_or_else(|| "basic".to_string());

    let (tx, rx) = mpsc::channel();
    let reader = thread::spawn(move || {
        let mut stdin = io::stdin();
        loop {
            match frame::read_frame(&mut stdin) {
                Ok(bytes) => {
                    if tx.send(bytes).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    let mut read_signals_calls: u32 = 0;
    let mut stdout = io::stdout();

    while let Ok(bytes) = rx.recv() {
        let request: Request = match proto::decode(&bytes) {
            Ok(r) => r,
            Err(_) => break,
        };
        let response = handle_request(&scenario, request, &mut read_signals_calls);
        let payload = proto::encode(&response).expect("encode response");
        if frame::write_frame(&mut stdout, &payload).is_err() {
            break;
        }
    }

    let _ = reader.join();
}

fn handle_request(scenario: &str, request: Request, read_signals_calls: &mut u32) -> Response {
    let request_id = request.request_id;
    match request.body {
        RequestBody::Hello { .. } => Response {
            request_id,
            status: Status::ok(),
            body: ResponseBody::Hello {
                provider_name: "fake-provider".into(),
                provider_version: "0.0.0".into(),
            },
        },
        RequestBody::WaitReady => Response {
            request_id,
            status: Status::ok(),
            body: ResponseBody::WaitReady,
        },
        RequestBody::ListDevices => Response {
            request_id,
            status: Status::ok(),
            body: ResponseBody::ListDevices {
                devices: vec![DeviceSummary {
                    device_id: "dev1".into(),
                    label: "Fake Device".into(),
                }],
            },
        },
        RequestBody::DescribeDevice { device_id } => Response {
            request_id,
            status: Status::ok(),
            body: ResponseBody::DescribeDevice {
                device_id,
                label: "Fake Device".into(),
                signals: vec![WireSignalSpec {
                    signal_id: "temp".into(),
                    label: "Temperature".into(),
                    value_type: ValueType::Double,
                    poll_hint_hz: 1.0,
                    is_default: true,
                }],
                functions: vec![WireFunctionSpec {
                    function_id: 1,
                    name: "reset".into(),
                    description: "Resets the device".into(),
                    args: vec![],
                }],
            },
        },
        RequestBody::ReadSignals { .. } => {
            *read_signals_calls += 1;
            let quality = match (scenario, *read_signals_calls) {
                ("basic", 1) | ("basic", 2) => Quality::Ok,
                ("basic", _) => Quality::Stale,
                _ => Quality::Ok,
            };
            Response {
                request_id,
                status: Status::ok(),
                body: ResponseBody::ReadSignals {
                    values: vec![WireSignalValue {
                        signal_id: "temp".into(),
                        value: Value::Double(25.5),
                        quality,
                        timestamp_ms: 0,
                    }],
                },
            }
        }
        RequestBody::Call { function_name, .. } => {
            if function_name == "reset" {
                Response {
                    request_id,
                    status: Status::ok(),
                    body: ResponseBody::Call { results: HashMap::new() },
                }
            } else {
                Response {
                    request_id,
                    status: Status {
                        code: StatusCode::NotFound,
                        message: format!("unknown function: {function_name}"),
                    },
                    body: ResponseBody::Empty,
                }
            }
        }
    }
}
