use log::debug;
use serde_json::Value;

use crate::config::ClientConfig;
use crate::encode::encode;
use crate::error::{CuOptError, Result};
use crate::poll::{JobOutcome, Poller, MSGPACK_MIME};
use crate::response::{cleanup, decode_body, decode_envelope, error_for_status, Envelope};
use crate::solution::{is_lp_response, LpResponse};
use crate::transport::{HttpRequest, HttpTransport, Transport};
use crate::types::{DeleteFilter, ProblemPayload, ResponseType, SubmitOptions};
use crate::CLIENT_VERSION;

pub const DATA_FILE_HEADER: &str = "CUOPT-DATA-FILE";
pub const RESULT_FILE_HEADER: &str = "CUOPT-RESULT-FILE";
pub const CLIENT_VERSION_HEADER: &str = "CLIENT-VERSION";

/// Job to resume with [`CuOptClient::repoll`]
#[derive(Debug, Clone, PartialEq)]
pub enum RepollTarget {
    /// Bare request id
    Id(String),
    /// Envelope holding a `reqId`, e.g. from a poll timeout
    Envelope(Envelope),
}

impl RepollTarget {
    fn request_id(&self) -> Result<&str> {
        match self {
            RepollTarget::Id(id) => Ok(id),
            RepollTarget::Envelope(envelope) => envelope.request_id().ok_or_else(|| {
                CuOptError::InvalidRequest(format!("no reqId in {}", envelope))
            }),
        }
    }
}

impl From<&str> for RepollTarget {
    fn from(id: &str) -> Self {
        RepollTarget::Id(id.to_string())
    }
}

impl From<String> for RepollTarget {
    fn from(id: String) -> Self {
        RepollTarget::Id(id)
    }
}

impl From<Envelope> for RepollTarget {
    fn from(envelope: Envelope) -> Self {
        RepollTarget::Envelope(envelope)
    }
}

impl From<&Envelope> for RepollTarget {
    fn from(envelope: &Envelope) -> Self {
        RepollTarget::Envelope(envelope.clone())
    }
}

/// Result of [`CuOptClient::repoll`]
#[derive(Debug, Clone, PartialEq)]
pub enum RepollResponse {
    /// Cleaned mapping, for routing jobs or when a mapping was requested
    Mapping(JobOutcome),
    /// Typed LP/MILP solution
    Solution(LpResponse),
}

/// Blocking client for a self-hosted cuOpt service
#[derive(Debug, Clone)]
pub struct CuOptClient<T: Transport = HttpTransport> {
    transport: T,
    config: ClientConfig,
    endpoint: String,
}

impl CuOptClient<HttpTransport> {
    /// Create a client talking HTTP(S) to the configured server
    ///
    /// # Example
    ///
    /// ```no_run
    /// use cuopt_sh_client::{ClientConfig, CuOptClient};
    ///
    /// let client = CuOptClient::new(ClientConfig::new().with_ip("127.0.0.1")).unwrap();
    /// ```
    pub fn new(config: ClientConfig) -> Result<Self> {
        let transport = HttpTransport::new(&config.tls_verification())?;
        Self::with_transport(config, transport)
    }
}

impl<T: Transport> CuOptClient<T> {
    /// Create a client over a custom transport
    pub fn with_transport(config: ClientConfig, transport: T) -> Result<Self> {
        let endpoint = config.endpoint()?.to_string();
        Ok(Self {
            transport,
            config,
            endpoint,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// `{scheme}://{ip}:{port}/cuopt/request`
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn job_url(&self, id: &str) -> String {
        format!("{}/{}", self.endpoint, id)
    }

    /// Submit a problem and wait for its result.
    ///
    /// With `options.cache` set the server only stores the data and the
    /// acknowledgment, holding the new `reqId`, is returned right away.
    /// Otherwise the job is polled until it completes, fails, or the polling
    /// timeout elapses.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use cuopt_sh_client::{ClientConfig, CuOptClient, JobOutcome, ProblemPayload, SubmitOptions};
    /// # fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let client = CuOptClient::new(ClientConfig::new())?;
    /// let payload = ProblemPayload::File("problem.json".into());
    /// match client.get_optimized_routes(payload, &SubmitOptions::new())? {
    ///     JobOutcome::Completed(result) => println!("{}", result),
    ///     JobOutcome::Failed(result) => eprintln!("{}", result),
    ///     JobOutcome::Pending(ack) => println!("pending: {:?}", ack.request_id()),
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub fn get_optimized_routes(
        &self,
        payload: impl Into<ProblemPayload>,
        options: &SubmitOptions,
    ) -> Result<JobOutcome> {
        let mut payload = payload.into();
        if options.server_path {
            payload = payload.on_server();
        }
        let encoded = encode(&payload)?;

        let mut request = HttpRequest::post(&self.endpoint)
            .query("validation_only", self.config.only_validate())
            .query("cache", options.cache);
        if let Some(req_id) = &encoded.req_id {
            request = request.query("reqId", req_id);
        }
        if let Some(path) = &encoded.data_file {
            request = request.header(DATA_FILE_HEADER, path.as_str());
        }
        request = request.header(CLIENT_VERSION_HEADER, CLIENT_VERSION);
        if let Some(output) = options.output.as_deref().filter(|o| !o.is_empty()) {
            request = request.header(RESULT_FILE_HEADER, output);
        }
        let request = request
            .header("Content-Type", encoded.content_type.as_str())
            .header("Accept", MSGPACK_MIME)
            .body(encoded.body);

        debug!("POST {}", self.endpoint);
        let response = self.transport.send(request)?;
        error_for_status(&response)?;

        let outcome = if options.cache {
            let mut ack = decode_envelope(&response)?;
            ack.normalize_request_id();
            if ack.is_failed() {
                JobOutcome::Failed(ack)
            } else {
                JobOutcome::Pending(ack)
            }
        } else {
            Poller::new(&self.transport, &self.endpoint, &self.config).run(response)?
        };
        Ok(outcome.map(cleanup))
    }

    /// Delete a cached entry or abort a job.
    ///
    /// `id` may be the wildcard `*`, which matches every job selected by the
    /// filter. See [`DeleteFilter::resolve`] for how unspecified flags are
    /// filled in.
    pub fn delete(&self, id: &str, filter: DeleteFilter) -> Result<Value> {
        let flags = filter.resolve(id);
        let request = HttpRequest::delete(self.job_url(id))
            .query("running", flags.running)
            .query("queued", flags.queued)
            .query("cached", flags.cached);

        debug!("DELETE {}", request.url);
        let response = self.transport.send(request)?;
        error_for_status(&response)?;

        if response.body.is_empty() {
            return Ok(Value::Null);
        }
        decode_body(response.content_type.as_deref(), &response.body)
    }

    /// Resume polling a job whose earlier call timed out.
    ///
    /// With [`ResponseType::Obj`] a completed LP/MILP job is returned as an
    /// [`LpResponse`]; every other result comes back as a mapping.
    pub fn repoll(
        &self,
        target: impl Into<RepollTarget>,
        response_type: ResponseType,
    ) -> Result<RepollResponse> {
        let target = target.into();
        let url = self.job_url(target.request_id()?);

        debug!("GET {}", url);
        let response = self
            .transport
            .send(HttpRequest::get(url).header("Accept", MSGPACK_MIME))?;
        error_for_status(&response)?;

        let outcome = Poller::new(&self.transport, &self.endpoint, &self.config)
            .run(response)?
            .map(cleanup);

        if response_type == ResponseType::Obj {
            if let JobOutcome::Completed(envelope) = &outcome {
                if is_lp_response(envelope) {
                    return Ok(RepollResponse::Solution(LpResponse::try_from(envelope)?));
                }
            }
        }
        Ok(RepollResponse::Mapping(outcome))
    }
}
