//! Payload encoding: turns a [`ProblemPayload`] into request bytes plus the
//! header and query side channels the service expects.

use std::fs;
use std::path::Path;

use log::{info, warn};
use rmpv::Value as MsgValue;

use crate::error::{CuOptError, Result};
use crate::types::{ContentType, ProblemPayload};

/// Everything the submit call needs to build its POST
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedRequest {
    pub body: Vec<u8>,
    pub content_type: ContentType,
    /// Sent as the `reqId` query parameter
    pub req_id: Option<String>,
    /// Sent in the `CUOPT-DATA-FILE` header
    pub data_file: Option<String>,
}

impl EncodedRequest {
    fn bytes(body: Vec<u8>, content_type: ContentType) -> Self {
        Self {
            body,
            content_type,
            req_id: None,
            data_file: None,
        }
    }

    /// Empty JSON body; the payload travels out of band.
    fn empty() -> Self {
        Self::bytes(Vec::new(), ContentType::Json)
    }
}

/// Map a file extension to its content type.
pub fn content_type_for(path: &Path) -> Result<ContentType> {
    let ext = path.extension().map(|e| e.to_string_lossy().into_owned());
    match ext.as_deref() {
        Some("zlib") => Ok(ContentType::Zlib),
        Some("msgpack") => Ok(ContentType::Msgpack),
        Some("json") => Ok(ContentType::Json),
        Some("pickle") => Ok(ContentType::OctetStream),
        None => {
            info!("No file extension given, assuming JSON");
            Ok(ContentType::Json)
        }
        Some(other) => Err(CuOptError::UnsupportedFormat(other.to_string())),
    }
}

/// Read a problem file and tag it with the content type of its extension.
pub fn load_data(path: &Path) -> Result<(Vec<u8>, ContentType)> {
    // Check the extension before touching the filesystem
    let content_type = content_type_for(path)?;
    let raw = fs::read(path).map_err(|source| CuOptError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok((raw, content_type))
}

/// Encode a payload for submission.
pub fn encode(payload: &ProblemPayload) -> Result<EncodedRequest> {
    match payload {
        ProblemPayload::Data(data) => {
            let body = rmp_serde::to_vec(data)?;
            Ok(EncodedRequest::bytes(body, ContentType::Msgpack))
        }
        ProblemPayload::File(path) => {
            let (body, content_type) = load_data(path)?;
            Ok(EncodedRequest::bytes(body, content_type))
        }
        ProblemPayload::Files(paths) => {
            let mut entries = Vec::with_capacity(paths.len());
            for path in paths {
                let (raw, content_type) = load_data(path)?;
                entries.push(MsgValue::Array(vec![
                    MsgValue::from(content_type.as_str()),
                    MsgValue::Binary(raw),
                ]));
            }
            let mut body = Vec::new();
            rmpv::encode::write_value(&mut body, &MsgValue::Array(entries))?;
            Ok(EncodedRequest::bytes(body, ContentType::Msgpack))
        }
        ProblemPayload::RequestId(id) => Ok(EncodedRequest {
            req_id: Some(id.clone()),
            ..EncodedRequest::empty()
        }),
        ProblemPayload::ServerFile(path) => {
            if is_absolute_server_path(path) {
                warn!(
                    "Path of the data file on the server was specified, \
                     but an absolute path was given. \
                     Best practice is to specify the relative path of a \
                     data file under the CUOPT_DATA_DIR directory \
                     which was configured when the cuopt server was started."
                );
            }
            Ok(EncodedRequest {
                data_file: Some(path.clone()),
                ..EncodedRequest::empty()
            })
        }
    }
}

/// Server paths are meant to be relative to the server's data directory.
fn is_absolute_server_path(path: &str) -> bool {
    path.starts_with('/')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;
    use tempfile::{tempdir, TempDir};

    fn temp_file(dir: &TempDir, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_content_type_for_known_extensions() {
        let cases = [
            ("p.zlib", ContentType::Zlib),
            ("p.msgpack", ContentType::Msgpack),
            ("p.json", ContentType::Json),
            ("p.pickle", ContentType::OctetStream),
            ("problem", ContentType::Json),
        ];
        for (name, expected) in cases {
            assert_eq!(content_type_for(Path::new(name)).unwrap(), expected, "{}", name);
        }
    }

    #[test]
    fn test_content_type_for_unknown_extension() {
        let err = content_type_for(Path::new("p.csv")).unwrap_err();
        assert!(matches!(err, CuOptError::UnsupportedFormat(ref e) if e == "csv"));
        let msg = err.to_string();
        assert!(msg.contains(".json, .zlib, .msgpack, or .pickle"));
    }

    #[test]
    fn test_dotted_directory_has_no_extension() {
        assert_eq!(
            content_type_for(Path::new("./data.d/problem")).unwrap(),
            ContentType::Json
        );
    }

    #[test]
    fn test_encode_inline_data_as_msgpack() {
        let data = json!({"fleet_data": {"vehicle_locations": [[0, 0]]}});
        let encoded = encode(&ProblemPayload::Data(data.clone())).unwrap();
        assert_eq!(encoded.content_type, ContentType::Msgpack);
        let decoded: serde_json::Value = rmp_serde::from_slice(&encoded.body).unwrap();
        assert_eq!(decoded, data);
        assert!(encoded.req_id.is_none());
    }

    #[test]
    fn test_encode_single_file() {
        let dir = tempdir().unwrap();
        let path = temp_file(&dir, "single.json", br#"{"a": 1}"#);
        let encoded = encode(&ProblemPayload::File(path)).unwrap();
        assert_eq!(encoded.content_type, ContentType::Json);
        assert_eq!(encoded.body, br#"{"a": 1}"#.to_vec());
    }

    #[test]
    fn test_encode_unsupported_file_fails_before_reading() {
        let err = encode(&ProblemPayload::File(PathBuf::from("/nonexistent/p.txt"))).unwrap_err();
        assert!(matches!(err, CuOptError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_encode_missing_file_is_io_error() {
        let err = encode(&ProblemPayload::File(PathBuf::from("/nonexistent/p.json"))).unwrap_err();
        assert!(matches!(err, CuOptError::Io { .. }));
    }

    #[test]
    fn test_encode_file_list_keeps_order() {
        let dir = tempdir().unwrap();
        let first = temp_file(&dir, "list-a.msgpack", b"\x81\xa1a\x01");
        let second = temp_file(&dir, "list-b.zlib", b"zzz");
        let encoded = encode(&ProblemPayload::Files(vec![first, second])).unwrap();
        assert_eq!(encoded.content_type, ContentType::Msgpack);

        let value = rmpv::decode::read_value(&mut encoded.body.as_slice()).unwrap();
        let entries = value.as_array().unwrap();
        assert_eq!(entries.len(), 2);
        let first = entries[0].as_array().unwrap();
        assert_eq!(first[0].as_str(), Some("application/vnd.msgpack"));
        assert_eq!(first[1].as_slice(), Some(&b"\x81\xa1a\x01"[..]));
        let second = entries[1].as_array().unwrap();
        assert_eq!(second[0].as_str(), Some("application/zlib"));
        assert_eq!(second[1].as_slice(), Some(&b"zzz"[..]));
    }

    #[test]
    fn test_encode_request_id_has_empty_json_body() {
        let id = "7b1b5b1e-9f3c-4d6e-8a2b-0c1d2e3f4a5b";
        let encoded = encode(&ProblemPayload::RequestId(id.to_string())).unwrap();
        assert!(encoded.body.is_empty());
        assert_eq!(encoded.content_type, ContentType::Json);
        assert_eq!(encoded.req_id.as_deref(), Some(id));
    }

    #[test]
    fn test_encode_server_file_uses_header_channel() {
        let encoded = encode(&ProblemPayload::ServerFile("/abs/p.json".to_string())).unwrap();
        assert!(encoded.body.is_empty());
        assert_eq!(encoded.content_type, ContentType::Json);
        assert_eq!(encoded.data_file.as_deref(), Some("/abs/p.json"));
    }

    #[test]
    fn test_absolute_server_path_detection() {
        assert!(is_absolute_server_path("/abs/p.json"));
        assert!(!is_absolute_server_path("sub/p.json"));
        assert!(!is_absolute_server_path("p.json"));
    }
}
