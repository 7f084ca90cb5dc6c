//! # cuOpt self-hosted client
//!
//! A blocking client for submitting optimization problems to a self-hosted
//! cuOpt service and collecting the results.
//!
//! Problems are submitted to `/cuopt/request`; the client then polls the
//! returned request id until the job completes, fails, or the configured
//! polling timeout runs out. A timed-out job can be resumed later with
//! [`CuOptClient::repoll`].
//!
//! The library logs through the `log` facade and never installs a logger;
//! that is left to the host application.
//!
//! ## Example
//!
//! ```no_run
//! use cuopt_sh_client::{ClientConfig, CuOptClient, ProblemPayload, SubmitOptions};
//! use serde_json::json;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = CuOptClient::new(ClientConfig::new().with_ip("127.0.0.1"))?;
//!
//!     let problem = json!({
//!         "cost_matrix_data": {"data": {"0": [[0, 1], [1, 0]]}},
//!         "task_data": {"task_locations": [1]},
//!         "fleet_data": {"vehicle_locations": [[0, 0]]}
//!     });
//!
//!     let outcome = client.get_optimized_routes(ProblemPayload::Data(problem), &SubmitOptions::new())?;
//!     println!("{}", outcome.envelope());
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod encode;
pub mod error;
pub mod poll;
pub mod response;
pub mod solution;
pub mod transport;
pub mod types;

pub use client::{CuOptClient, RepollResponse, RepollTarget};
pub use config::{ClientConfig, TimeoutBehavior, TlsVerification};
pub use error::{CuOptError, Result};
pub use poll::{JobOutcome, PollState, Poller};
pub use response::Envelope;
pub use solution::{LpResponse, LpSolution, SolutionData};
pub use transport::{HttpRequest, HttpTransport, Method, RawResponse, Transport};
pub use types::{
    is_uuid, ContentType, DeleteFilter, ProblemPayload, ResponseType, SubmitOptions,
};

/// Value sent in the `CLIENT-VERSION` header
pub const CLIENT_VERSION: &str = "24.11.local";

/// Human-readable client version
pub fn client_version() -> &'static str {
    "24.11 (local)"
}
