use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Wire encodings understood by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    /// `application/json`
    Json,
    /// `application/vnd.msgpack`
    Msgpack,
    /// `application/zlib`
    Zlib,
    /// `application/octet-stream` (pickled data)
    OctetStream,
}

impl ContentType {
    /// MIME string sent in `Content-Type`
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Json => "application/json",
            ContentType::Msgpack => "application/vnd.msgpack",
            ContentType::Zlib => "application/zlib",
            ContentType::OctetStream => "application/octet-stream",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns true if `s` parses as a UUID.
///
/// Hyphenated, simple, braced and urn forms are accepted. The version nibble
/// is not checked; ids issued by the service are v4.
pub fn is_uuid(s: &str) -> bool {
    Uuid::parse_str(s).is_ok()
}

/// A problem to submit. Exactly one variant is active per submission.
#[derive(Debug, Clone, PartialEq)]
pub enum ProblemPayload {
    /// Inline structured data, encoded as msgpack
    Data(Value),
    /// Local file sent as-is, content type from its extension
    File(PathBuf),
    /// Local files bundled into one msgpack list of `(content-type, bytes)`
    Files(Vec<PathBuf>),
    /// Id of data previously cached on the server
    RequestId(String),
    /// Path of a data file relative to the server's data directory
    ServerFile(String),
}

impl ProblemPayload {
    /// Classify loosely typed problem data.
    ///
    /// With `server_path` set, a plain string is taken as a server-side
    /// path instead of a local file. A UUID string always wins.
    pub fn classify(data: Value, server_path: bool) -> Self {
        match data {
            Value::String(s) if is_uuid(&s) => ProblemPayload::RequestId(s),
            Value::String(s) if server_path => ProblemPayload::ServerFile(s),
            Value::String(s) => ProblemPayload::File(PathBuf::from(s)),
            Value::Array(items) if items.iter().all(Value::is_string) => {
                let paths = items
                    .into_iter()
                    .filter_map(|v| match v {
                        Value::String(s) => Some(PathBuf::from(s)),
                        _ => None,
                    })
                    .collect();
                ProblemPayload::Files(paths)
            }
            other => ProblemPayload::Data(other),
        }
    }

    /// Reinterpret a local file path as a server-side one.
    pub fn on_server(self) -> Self {
        match self {
            ProblemPayload::File(path) => {
                ProblemPayload::ServerFile(path.to_string_lossy().into_owned())
            }
            other => other,
        }
    }
}

impl From<Value> for ProblemPayload {
    fn from(data: Value) -> Self {
        ProblemPayload::classify(data, false)
    }
}

impl From<&str> for ProblemPayload {
    fn from(s: &str) -> Self {
        ProblemPayload::classify(Value::String(s.to_string()), false)
    }
}

/// Per-call options for [`crate::CuOptClient::get_optimized_routes`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitOptions {
    /// Treat a single string path as relative to the server's data directory
    pub server_path: bool,
    /// Store the payload on the server without solving it
    pub cache: bool,
    /// Result file name used when the server writes results to disk
    pub output: Option<String>,
}

impl SubmitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn server_path(mut self, server_path: bool) -> Self {
        self.server_path = server_path;
        self
    }

    pub fn cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    pub fn output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }
}

/// Job-state filters for [`crate::CuOptClient::delete`].
///
/// `None` means "not specified"; see [`DeleteFilter::resolve`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteFilter {
    pub running: Option<bool>,
    pub queued: Option<bool>,
    pub cached: Option<bool>,
}

/// Concrete delete flags as sent on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedDeleteFilter {
    pub running: bool,
    pub queued: bool,
    pub cached: bool,
}

impl DeleteFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn running(mut self, running: bool) -> Self {
        self.running = Some(running);
        self
    }

    pub fn queued(mut self, queued: bool) -> Self {
        self.queued = Some(queued);
        self
    }

    pub fn cached(mut self, cached: bool) -> Self {
        self.cached = Some(cached);
        self
    }

    /// Resolve unspecified flags for the given id.
    ///
    /// A concrete id with no flags at all deletes regardless of job state.
    /// Once any flag is given, the others default to false. The wildcard
    /// `*` never gets the all-true default.
    pub fn resolve(&self, id: &str) -> ResolvedDeleteFilter {
        let nothing_specified =
            self.running.is_none() && self.queued.is_none() && self.cached.is_none();
        let default = nothing_specified && id != "*";
        ResolvedDeleteFilter {
            running: self.running.unwrap_or(default),
            queued: self.queued.unwrap_or(default),
            cached: self.cached.unwrap_or(default),
        }
    }
}

/// Shape of the value returned by [`crate::CuOptClient::repoll`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseType {
    /// Always return the cleaned mapping
    Dict,
    /// Return a typed solution for LP/MILP responses
    #[default]
    Obj,
}
