//! Provider session: owns a child process and its two byte streams,
//! exposing a single blocking *exchange a request, get its response*
//! operation with a caller-supplied timeout (spec §4.2).
//!
//! Grounded on `original_source/core/provider/provider_handle.{hpp,cpp}`
//! and `provider_process.{hpp,cpp}`: spawn → hello → wait_ready → running
//! → shutdown, with one exclusive lock held for the duration of each
//! exchange so request/response pairs cannot interleave on the wire.

use std::io::Write;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, warn};

use crate::error::CoreError;
use crate::model::ProviderId;
use crate::transport::frame::{self, FrameError};
use crate::transport::proto::{self, Request, RequestBody, Response};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

enum ReaderEvent {
    Frame(Vec<u8>),
    Closed(FrameError),
}

struct Exclusive {
    stdin: Option<ChildStdin>,
    rx: Receiver<ReaderEvent>,
    next_request_id: u32,
}

/// A running child process plus its framed streams (spec glossary:
/// "Session").
pub struct ProviderSession {
    provider_id: ProviderId,
    child: Mutex<Child>,
    exclusive: Mutex<Exclusive>,
    reader_thread: Mutex<Option<JoinHandle<()>>>,
    healthy: AtomicBool,
    start_time: Instant,
}

impl ProviderSession {
    /// Spawns the child process with its standard streams redirected;
    /// stderr is inherited (spec §4.2 step 1, §6 "Provider process
    /// lifecycle").
    pub fn spawn(provider_id: ProviderId, command: &str, args: &[String]) -> Result<Self, CoreError> {
        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| CoreError::internal(format!("failed to spawn provider '{provider_id}': {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| CoreError::internal("child stdin not piped"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CoreError::internal("child stdout not piped"))?;

        let (tx, rx) = mpsc::channel();
        let reader_thread = spawn_reader_thread(stdout, tx);

        Ok(ProviderSession {
            provider_id,
            child: Mutex::new(child),
            exclusive: Mutex::new(Exclusive {
                stdin: Some(stdin),
                rx,
                next_request_id: 0,
            }),
            reader_thread: Mutex::new(Some(reader_thread)),
            healthy: AtomicBool::new(true),
            start_time: Instant::now(),
        })
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    pub fn start_time(&self) -> Instant {
        self.start_time
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire) && !self.has_exited()
    }

    fn has_exited(&self) -> bool {
        match self.child.lock().expect("child lock poisoned").try_wait() {
            Ok(Some(_)) => true,
            Ok(None) => false,
            Err(_) => true,
        }
    }

    /// First exchange: protocol-version/client-identification handshake
    /// (spec §4.2 step 2).
    pub fn hello(&self, client_name: &str, client_version: &str, timeout: Duration) -> Result<Response, CoreError> {
        self.exchange(
            RequestBody::Hello {
                protocol_version: "1.0".into(),
                client_name: client_name.into(),
                client_version: client_version.into(),
            },
            timeout,
        )
    }

    /// Optional second exchange bounded by a ready-timeout, covering slow
    /// hardware initialization (spec §4.2 step 3).
    pub fn wait_ready(&self, timeout: Duration) -> Result<Response, CoreError> {
        self.exchange(RequestBody::WaitReady, timeout)
    }

    /// Sends one request and blocks for its matching response, under an
    /// exclusive lock so concurrent callers cannot interleave on the wire
    /// (spec §4.2 "Concurrency").
    pub fn exchange(&self, body: RequestBody, timeout: Duration) -> Result<Response, CoreError> {
        if !self.healthy.load(Ordering::Acquire) {
            return Err(CoreError::unavailable(format!(
                "session for provider '{}' is unhealthy",
                self.provider_id
            )));
        }

        let mut guard = self.exclusive.lock().expect("session exclusive lock poisoned");
        let request_id = guard.next_request_id;
        guard.next_request_id = guard.next_request_id.wrapping_add(1);
        let request = Request { request_id, body };

        let payload = proto::encode(&request)
            .map_err(|e| self.mark_fatal(CoreError::internal(format!("encode failed: {e}"))))?;

        let Some(stdin) = guard.stdin.as_mut() else {
            return Err(self.mark_fatal(CoreError::unavailable(format!(
                "provider '{}' stdin already closed",
                self.provider_id
            ))));
        };
        if let Err(e) = frame::write_frame(stdin, &payload) {
            return Err(self.mark_fatal(CoreError::internal(format!(
                "write to provider '{}' failed: {e}",
                self.provider_id
            ))));
        }

        let event = match guard.rx.recv_timeout(timeout) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => {
                return Err(self.mark_fatal(CoreError::deadline_exceeded(format!(
                    "exchange with provider '{}' timed out after {timeout:?}",
                    self.provider_id
                ))));
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(self.mark_fatal(CoreError::internal(format!(
                    "provider '{}' exited during exchange",
                    self.provider_id
                ))));
            }
        };

        let bytes = match event {
            ReaderEvent::Frame(bytes) => bytes,
            ReaderEvent::Closed(e) => {
                return Err(self.mark_fatal(CoreError::internal(format!(
                    "provider '{}' stream closed: {e}",
                    self.provider_id
                ))));
            }
        };

        let response: Response = proto::decode(&bytes)
            .map_err(|e| self.mark_fatal(CoreError::internal(format!("decode failed: {e}"))))?;

        if response.request_id != request_id {
            return Err(self.mark_fatal(CoreError::internal(format!(
                "response id mismatch from provider '{}': expected {request_id}, got {}",
                self.provider_id, response.request_id
            ))));
        }

        Ok(response)
    }

    fn mark_fatal(&self, err: CoreError) -> CoreError {
        self.healthy.store(false, Ordering::Release);
        error!("[Session] provider '{}' marked unhealthy: {err}", self.provider_id);
        err
    }

    /// Closes the parent's write end, waits up to a grace window for the
    /// child to exit, then forcibly terminates and reaps (spec §4.2 step
    /// 5, §6 "Provider process lifecycle"). Safe to call more than once.
    pub fn shutdown(&self) {
        self.healthy.store(false, Ordering::Release);
        {
            let mut guard = self.exclusive.lock().expect("session exclusive lock poisoned");
            if let Some(mut stdin) = guard.stdin.take() {
                let _ = stdin.flush();
                drop(stdin); // closes the pipe, signalling EOF to the child
            }
        }
        if let Ok(mut child) = self.child.lock() {
            let deadline = Instant::now() + SHUTDOWN_GRACE;
            loop {
                match child.try_wait() {
                    Ok(Some(_)) => break,
                    Ok(None) => {
                        if Instant::now() >= deadline {
                            warn!(
                                "[Session] provider '{}' did not exit within grace window, killing",
                                self.provider_id
                            );
                            let _ = child.kill();
                            let _ = child.wait();
                            break;
                        }
                        thread::sleep(Duration::from_millis(20));
                    }
                    Err(_) => break,
                }
            }
        }
        if let Some(handle) = self.reader_thread.lock().expect("reader thread lock poisoned").take() {
            let _ = handle.join();
        }
        debug!("[Session] provider '{}' shut down", self.provider_id);
    }
}

impl Drop for ProviderSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_reader_thread(mut stdout: ChildStdout, tx: Sender<ReaderEvent>) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match frame::read_frame(&mut stdout) {
            Ok(bytes) => {
                if tx.send(ReaderEvent::Frame(bytes)).is_err() {
                    break;
                }
            }
            Err(e) => {
                let _ = tx.send(ReaderEvent::Closed(e));
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // `cat` simply reflects whatever ADPP frames it receives back at us;
    // it doesn't speak the protocol, but it's enough to exercise the
    // framing and timeout plumbing without requiring a real provider
    // binary on the test host.
    #[test]
    fn spawn_and_shutdown_a_trivial_child() {
        let session = ProviderSession::spawn("echo-test".into(), "cat", &[]).unwrap();
        assert!(session.is_healthy());
        session.shutdown();
    }

    #[test]
    fn exchange_against_a_dead_command_is_internal_error() {
        let result = ProviderSession::spawn("bad".into(), "/nonexistent-binary-xyz", &[]);
        assert!(result.is_err());
    }
}
