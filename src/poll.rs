//! Submit-then-poll state machine.
//!
//! A job starts as the raw response to its submission and is stepped until
//! it reaches a terminal state. Every non-terminal step checks the timeout,
//! sleeps for the polling interval and re-issues a GET for the job id.

use std::thread;
use std::time::{Duration, Instant};

use log::debug;

use crate::config::{ClientConfig, TimeoutBehavior};
use crate::error::{CuOptError, Result};
use crate::response::{decode_envelope, error_for_status, Envelope};
use crate::transport::{HttpRequest, RawResponse, Transport};

pub const MSGPACK_MIME: &str = "application/vnd.msgpack";

#[derive(Debug, Clone, PartialEq)]
pub enum PollState {
    /// Response that has not been decoded yet
    Submitted(RawResponse),
    /// Job still pending; holds a normalized `reqId`
    Polling(Envelope),
    Completed(Envelope),
    Failed(Envelope),
    /// Timeout elapsed while the job was pending
    Expired(Envelope),
}

impl PollState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PollState::Completed(_) | PollState::Failed(_) | PollState::Expired(_)
        )
    }
}

/// Final result of a submission or repoll
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// `response` or `result_file` present
    Completed(Envelope),
    /// The service reported an `error` for the job
    Failed(Envelope),
    /// Still running or cached; holds the `reqId` for a later repoll
    Pending(Envelope),
}

impl JobOutcome {
    pub fn envelope(&self) -> &Envelope {
        match self {
            JobOutcome::Completed(e) | JobOutcome::Failed(e) | JobOutcome::Pending(e) => e,
        }
    }

    pub fn into_envelope(self) -> Envelope {
        match self {
            JobOutcome::Completed(e) | JobOutcome::Failed(e) | JobOutcome::Pending(e) => e,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, JobOutcome::Completed(_))
    }

    /// Apply `f` to the held envelope, keeping the variant.
    pub fn map(self, f: impl FnOnce(Envelope) -> Envelope) -> Self {
        match self {
            JobOutcome::Completed(e) => JobOutcome::Completed(f(e)),
            JobOutcome::Failed(e) => JobOutcome::Failed(f(e)),
            JobOutcome::Pending(e) => JobOutcome::Pending(f(e)),
        }
    }
}

/// Drives one job to a terminal state
pub struct Poller<'a, T: Transport + ?Sized> {
    transport: &'a T,
    endpoint: &'a str,
    interval: Duration,
    timeout: Option<Duration>,
    behavior: TimeoutBehavior,
    started: Instant,
}

impl<'a, T: Transport + ?Sized> Poller<'a, T> {
    /// The timeout clock starts here.
    pub fn new(transport: &'a T, endpoint: &'a str, config: &ClientConfig) -> Self {
        Self {
            transport,
            endpoint,
            interval: config.polling_interval(),
            timeout: config.polling_timeout(),
            behavior: config.timeout_behavior(),
            started: Instant::now(),
        }
    }

    fn expired(&self) -> bool {
        match self.timeout {
            Some(timeout) => self.started.elapsed() >= timeout,
            None => false,
        }
    }

    fn classify(mut envelope: Envelope) -> PollState {
        if envelope.is_completed() {
            PollState::Completed(envelope)
        } else if envelope.is_failed() {
            PollState::Failed(envelope)
        } else {
            envelope.normalize_request_id();
            PollState::Polling(envelope)
        }
    }

    fn fetch(&self, req_id: &str) -> Result<RawResponse> {
        let url = format!("{}/{}", self.endpoint, req_id);
        debug!("GET {}", url);
        let response = self
            .transport
            .send(HttpRequest::get(url).header("Accept", MSGPACK_MIME))?;
        error_for_status(&response)?;
        Ok(response)
    }

    /// Advance by one transition. Terminal states are returned unchanged.
    pub fn step(&self, state: PollState) -> Result<PollState> {
        match state {
            PollState::Submitted(response) => Ok(Self::classify(decode_envelope(&response)?)),
            PollState::Polling(envelope) => {
                if self.expired() {
                    return Ok(PollState::Expired(envelope));
                }
                let req_id = envelope.request_id().ok_or_else(|| {
                    CuOptError::Decode(format!("pending response has no reqId: {}", envelope))
                })?;
                thread::sleep(self.interval);
                let response = self.fetch(req_id)?;
                Ok(Self::classify(decode_envelope(&response)?))
            }
            terminal => Ok(terminal),
        }
    }

    /// Step from `response` until the job completes, fails or expires.
    pub fn run(&self, response: RawResponse) -> Result<JobOutcome> {
        let mut state = PollState::Submitted(response);
        loop {
            state = match self.step(state)? {
                PollState::Completed(e) => return Ok(JobOutcome::Completed(e)),
                PollState::Failed(e) => return Ok(JobOutcome::Failed(e)),
                PollState::Expired(e) => {
                    return match self.behavior {
                        TimeoutBehavior::Raise => Err(CuOptError::PollTimeout(e)),
                        TimeoutBehavior::Return => Ok(JobOutcome::Pending(e)),
                    }
                }
                pending => pending,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Method;
    use serde_json::{json, Value};
    use std::cell::RefCell;
    use std::collections::VecDeque;

    const ENDPOINT: &str = "http://localhost:5000/cuopt/request";

    struct Scripted {
        responses: RefCell<VecDeque<RawResponse>>,
        sent: RefCell<Vec<HttpRequest>>,
    }

    impl Scripted {
        fn new(responses: Vec<RawResponse>) -> Self {
            Self {
                responses: RefCell::new(responses.into()),
                sent: RefCell::new(Vec::new()),
            }
        }
    }

    impl Transport for Scripted {
        fn send(&self, request: HttpRequest) -> Result<RawResponse> {
            self.sent.borrow_mut().push(request);
            Ok(self
                .responses
                .borrow_mut()
                .pop_front()
                .expect("unexpected request"))
        }
    }

    fn json_response(status: u16, body: Value) -> RawResponse {
        RawResponse {
            status,
            reason: if status == 200 { "OK" } else { "Not Found" }.to_string(),
            content_type: Some("application/json".to_string()),
            body: serde_json::to_vec(&body).unwrap(),
        }
    }

    fn config(timeout: Option<Duration>, raise: bool) -> ClientConfig {
        ClientConfig::new()
            .with_polling_interval(Duration::ZERO)
            .with_polling_timeout(timeout)
            .with_timeout_exception(raise)
    }

    #[test]
    fn test_error_is_terminal_without_get() {
        let transport = Scripted::new(vec![]);
        let config = config(None, true);
        let poller = Poller::new(&transport, ENDPOINT, &config);
        let outcome = poller
            .run(json_response(200, json!({"error": "infeasible", "reqId": "r1"})))
            .unwrap();
        assert!(matches!(outcome, JobOutcome::Failed(_)));
        assert!(transport.sent.borrow().is_empty());
    }

    #[test]
    fn test_step_walks_states() {
        let transport = Scripted::new(vec![json_response(200, json!({"response": {"status": 0}}))]);
        let config = config(None, true);
        let poller = Poller::new(&transport, ENDPOINT, &config);

        let state = poller
            .step(PollState::Submitted(json_response(200, json!({"id": "r1"}))))
            .unwrap();
        match &state {
            PollState::Polling(e) => assert_eq!(e.request_id(), Some("r1")),
            other => panic!("unexpected {:?}", other),
        }
        let state = poller.step(state).unwrap();
        assert!(matches!(state, PollState::Completed(_)));
        assert!(state.is_terminal());
        assert_eq!(poller.step(state.clone()).unwrap(), state);

        let sent = transport.sent.borrow();
        assert_eq!(sent[0].method, Method::Get);
        assert_eq!(sent[0].url, format!("{}/r1", ENDPOINT));
        assert_eq!(sent[0].header_value("Accept"), Some(MSGPACK_MIME));
    }

    #[test]
    fn test_unbounded_polls_until_result_file() {
        let transport = Scripted::new(vec![
            json_response(200, json!({"reqId": "r1"})),
            json_response(200, json!({"reqId": "r1"})),
            json_response(200, json!({"result_file": "out.json"})),
        ]);
        let config = config(None, true);
        let poller = Poller::new(&transport, ENDPOINT, &config);
        let outcome = poller.run(json_response(200, json!({"reqId": "r1"}))).unwrap();
        assert!(outcome.is_completed());
        assert_eq!(transport.sent.borrow().len(), 3);
    }

    #[test]
    fn test_zero_timeout_raises() {
        let transport = Scripted::new(vec![]);
        let config = config(Some(Duration::ZERO), true);
        let poller = Poller::new(&transport, ENDPOINT, &config);
        let err = poller.run(json_response(200, json!({"reqId": "r1"}))).unwrap_err();
        assert_eq!(err.request_id(), Some("r1"));
        assert!(transport.sent.borrow().is_empty());
    }

    #[test]
    fn test_zero_timeout_returns_normalized_envelope() {
        let transport = Scripted::new(vec![]);
        let config = config(Some(Duration::ZERO), false);
        let poller = Poller::new(&transport, ENDPOINT, &config);
        let outcome = poller.run(json_response(200, json!({"id": "r1"}))).unwrap();
        match outcome {
            JobOutcome::Pending(e) => assert_eq!(e.into_value(), json!({"reqId": "r1"})),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_failed_get_stops_loop() {
        let transport = Scripted::new(vec![json_response(404, json!({"error": "no such job"}))]);
        let config = config(None, true);
        let poller = Poller::new(&transport, ENDPOINT, &config);
        let err = poller.run(json_response(200, json!({"reqId": "r1"}))).unwrap_err();
        match err {
            CuOptError::Service { status, message, .. } => {
                assert_eq!(status, 404);
                assert_eq!(message, "no such job");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(transport.sent.borrow().len(), 1);
    }

    #[test]
    fn test_pending_without_id_is_decode_error() {
        let transport = Scripted::new(vec![]);
        let config = config(None, true);
        let poller = Poller::new(&transport, ENDPOINT, &config);
        let err = poller.run(json_response(200, json!({"status": "queued"}))).unwrap_err();
        assert!(matches!(err, CuOptError::Decode(_)));
    }
}
