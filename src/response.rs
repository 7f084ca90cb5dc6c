//! Response normalization: body decoding, status checks and advisory-field
//! cleanup.

use std::fmt;

use log::{debug, info, warn};
use rmpv::Value as MsgValue;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::error::{CuOptError, Result};
use crate::transport::RawResponse;

pub const KEY_RESPONSE: &str = "response";
pub const KEY_RESULT_FILE: &str = "result_file";
pub const KEY_ERROR: &str = "error";
pub const KEY_REQ_ID: &str = "reqId";
pub const KEY_LEGACY_ID: &str = "id";
pub const KEY_WARNINGS: &str = "warnings";
pub const KEY_NOTES: &str = "notes";

/// Canonical decoded service response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Envelope(Map<String, Value>);

impl Envelope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a decoded body. Only mappings are accepted.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(CuOptError::Decode(format!(
                "expected a mapping, got {}",
                other
            ))),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// The `reqId` of a pending job
    pub fn request_id(&self) -> Option<&str> {
        self.0.get(KEY_REQ_ID).and_then(Value::as_str)
    }

    /// Solved, or solved with the result stored server-side
    pub fn is_completed(&self) -> bool {
        self.contains_key(KEY_RESPONSE) || self.contains_key(KEY_RESULT_FILE)
    }

    pub fn is_failed(&self) -> bool {
        self.contains_key(KEY_ERROR)
    }

    pub fn is_terminal(&self) -> bool {
        self.is_completed() || self.is_failed()
    }

    /// Rename the legacy `id` key to `reqId`.
    pub fn normalize_request_id(&mut self) {
        if let Some(id) = self.0.remove(KEY_LEGACY_ID) {
            self.0.insert(KEY_REQ_ID.to_string(), id);
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(&self.0) {
            Ok(s) => f.write_str(&s),
            Err(_) => write!(f, "{:?}", self.0),
        }
    }
}

impl From<Map<String, Value>> for Envelope {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

fn is_json(content_type: Option<&str>) -> bool {
    content_type
        .and_then(|ct| ct.split(';').next())
        .map(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
        .unwrap_or(false)
}

/// Decode a body according to its declared content type.
///
/// `application/json` is parsed as JSON; anything else is read as msgpack.
pub fn decode_body(content_type: Option<&str>, body: &[u8]) -> Result<Value> {
    if is_json(content_type) {
        debug!("reading response as json");
        serde_json::from_slice(body).map_err(|e| CuOptError::Decode(e.to_string()))
    } else {
        debug!("reading response as msgpack");
        let mut reader = body;
        let value = rmpv::decode::read_value(&mut reader)
            .map_err(|e| CuOptError::Decode(e.to_string()))?;
        Ok(msgpack_to_json(value))
    }
}

/// Decode a response body into an [`Envelope`].
pub fn decode_envelope(response: &RawResponse) -> Result<Envelope> {
    let value = decode_body(response.content_type.as_deref(), &response.body)?;
    Envelope::from_value(value)
}

/// Turn a non-success response into [`CuOptError::Service`].
pub fn error_for_status(response: &RawResponse) -> Result<()> {
    if response.is_success() {
        return Ok(());
    }
    debug!("{} {}", response.status, response.reason);

    let decoded = decode_body(response.content_type.as_deref(), &response.body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&response.body).into_owned()));
    let message = match decoded {
        Value::Object(mut map) => match map.remove(KEY_ERROR) {
            Some(error) => value_to_message(error),
            None => Value::Object(map).to_string(),
        },
        other => value_to_message(other),
    };

    Err(CuOptError::Service {
        reason: response.reason.clone(),
        status: response.status,
        message,
    })
}

fn value_to_message(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Log and strip `warnings` and `notes` from a result.
pub fn cleanup(mut envelope: Envelope) -> Envelope {
    if let Some(warnings) = envelope.remove(KEY_WARNINGS) {
        for w in advisory_items(warnings) {
            warn!("{}", w);
        }
    }
    if let Some(notes) = envelope.remove(KEY_NOTES) {
        for n in advisory_items(notes) {
            info!("{}", n);
        }
    }
    envelope
}

fn advisory_items(value: Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.into_iter().map(value_to_message).collect(),
        Value::Null => Vec::new(),
        other => vec![value_to_message(other)],
    }
}

// ---------- msgpack → JSON ----------

fn msgpack_to_json(value: MsgValue) -> Value {
    match value {
        MsgValue::Nil => Value::Null,
        MsgValue::Boolean(b) => Value::Bool(b),
        MsgValue::Integer(i) => {
            if let Some(n) = i.as_u64() {
                Value::from(n)
            } else if let Some(n) = i.as_i64() {
                Value::from(n)
            } else {
                Value::Null
            }
        }
        MsgValue::F32(f) => float(f as f64),
        MsgValue::F64(f) => float(f),
        MsgValue::String(s) => Value::String(utf8_lossy(&s)),
        MsgValue::Binary(bytes) => bytes_to_json(&bytes),
        MsgValue::Array(items) => Value::Array(items.into_iter().map(msgpack_to_json).collect()),
        MsgValue::Map(entries) => {
            if let Some(array) = decode_ndarray(&entries) {
                return array;
            }
            let map = entries
                .into_iter()
                .map(|(k, v)| (key_to_string(&k), msgpack_to_json(v)))
                .collect();
            Value::Object(map)
        }
        MsgValue::Ext(_, bytes) => bytes_to_json(&bytes),
    }
}

fn float(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

fn bytes_to_json(bytes: &[u8]) -> Value {
    Value::Array(bytes.iter().map(|b| Value::from(*b)).collect())
}

fn utf8_lossy(s: &rmpv::Utf8String) -> String {
    match s.as_str() {
        Some(s) => s.to_string(),
        None => String::from_utf8_lossy(s.as_bytes()).into_owned(),
    }
}

fn key_to_string(key: &MsgValue) -> String {
    match key {
        MsgValue::String(s) => utf8_lossy(s),
        MsgValue::Binary(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        other => other.to_string(),
    }
}

/// Field lookup matching both str and bin keys, as msgpack-numpy writes
/// its markers as bytes.
fn field<'a>(entries: &'a [(MsgValue, MsgValue)], name: &str) -> Option<&'a MsgValue> {
    entries.iter().find_map(|(k, v)| {
        let matches = match k {
            MsgValue::String(s) => s.as_str() == Some(name),
            MsgValue::Binary(b) => b.as_slice() == name.as_bytes(),
            _ => false,
        };
        matches.then_some(v)
    })
}

fn text(value: &MsgValue) -> Option<&str> {
    match value {
        MsgValue::String(s) => s.as_str(),
        MsgValue::Binary(b) => std::str::from_utf8(b).ok(),
        _ => None,
    }
}

/// Rebuild a msgpack-numpy array as nested JSON arrays.
///
/// Returns `None` when the map is not a numpy array or uses a dtype that is
/// not handled, in which case it is decoded as a plain map.
fn decode_ndarray(entries: &[(MsgValue, MsgValue)]) -> Option<Value> {
    let nd = field(entries, "nd")?.as_bool()?;
    let dtype = text(field(entries, "type")?)?;
    let data = field(entries, "data")?.as_slice()?;
    let flat = decode_scalars(dtype, data)?;

    if !nd {
        return flat.into_iter().next();
    }

    let shape = field(entries, "shape")?
        .as_array()?
        .iter()
        .map(|d| d.as_u64().and_then(|n| usize::try_from(n).ok()))
        .collect::<Option<Vec<usize>>>()?;
    if !shape_fits(&shape, flat.len()) {
        return None;
    }
    Some(reshape(&flat, &shape))
}

/// Shape must multiply out to exactly `len` without overflow, and no
/// dimension may exceed `len` (or 1 for empty data).
fn shape_fits(shape: &[usize], len: usize) -> bool {
    let bound = len.max(1);
    if shape.iter().any(|&d| d > bound) {
        return false;
    }
    shape
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        == Some(len)
}

fn reshape(flat: &[Value], shape: &[usize]) -> Value {
    match shape.split_first() {
        None => flat.first().cloned().unwrap_or(Value::Null),
        Some((&len, rest)) => {
            let stride: usize = rest.iter().product();
            Value::Array(
                (0..len)
                    .map(|i| reshape(&flat[i * stride..(i + 1) * stride], rest))
                    .collect(),
            )
        }
    }
}

fn chunks<const N: usize>(data: &[u8], f: impl Fn([u8; N]) -> Value) -> Option<Vec<Value>> {
    if data.len() % N != 0 {
        return None;
    }
    data.chunks_exact(N)
        .map(|c| <[u8; N]>::try_from(c).ok().map(&f))
        .collect()
}

macro_rules! scalars {
    ($data:expr, $big:expr, $ty:ty, $n:literal, $conv:expr) => {
        chunks::<$n>($data, |b| {
            let v = if $big {
                <$ty>::from_be_bytes(b)
            } else {
                <$ty>::from_le_bytes(b)
            };
            $conv(v)
        })
    };
}

fn decode_scalars(dtype: &str, data: &[u8]) -> Option<Vec<Value>> {
    let order = dtype.get(..1)?;
    let code = dtype.get(1..)?;
    let big = match order {
        "<" | "|" | "=" => false,
        ">" => true,
        _ => return None,
    };
    match code {
        "f8" => scalars!(data, big, f64, 8, float),
        "f4" => scalars!(data, big, f32, 4, |v: f32| float(v as f64)),
        "i8" => scalars!(data, big, i64, 8, Value::from),
        "i4" => scalars!(data, big, i32, 4, Value::from),
        "i2" => scalars!(data, big, i16, 2, Value::from),
        "i1" => scalars!(data, big, i8, 1, Value::from),
        "u8" => scalars!(data, big, u64, 8, Value::from),
        "u4" => scalars!(data, big, u32, 4, Value::from),
        "u2" => scalars!(data, big, u16, 2, Value::from),
        "u1" => scalars!(data, big, u8, 1, Value::from),
        "b1" => Some(data.iter().map(|b| Value::Bool(*b != 0)).collect()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn msgpack(value: &MsgValue) -> Vec<u8> {
        let mut buf = Vec::new();
        rmpv::encode::write_value(&mut buf, value).unwrap();
        buf
    }

    fn raw(status: u16, reason: &str, content_type: &str, body: Vec<u8>) -> RawResponse {
        RawResponse {
            status,
            reason: reason.to_string(),
            content_type: Some(content_type.to_string()),
            body,
        }
    }

    #[test]
    fn test_decode_json_body() {
        let value = decode_body(Some("application/json"), br#"{"reqId": "x"}"#).unwrap();
        assert_eq!(value, json!({"reqId": "x"}));
    }

    #[test]
    fn test_decode_json_with_charset() {
        let value = decode_body(Some("application/json; charset=utf-8"), b"[1]").unwrap();
        assert_eq!(value, json!([1]));
    }

    #[test]
    fn test_decode_msgpack_body() {
        let body = rmp_serde::to_vec(&json!({"response": {"status": 0}})).unwrap();
        let value = decode_body(Some("application/vnd.msgpack"), &body).unwrap();
        assert_eq!(value, json!({"response": {"status": 0}}));
    }

    #[test]
    fn test_missing_content_type_reads_msgpack() {
        let body = rmp_serde::to_vec(&json!({"a": 1})).unwrap();
        assert_eq!(decode_body(None, &body).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_decode_numpy_array() {
        let data: Vec<u8> = [1.5f64, 2.0, 3.0, 4.0]
            .iter()
            .flat_map(|f| f.to_le_bytes())
            .collect();
        let array = MsgValue::Map(vec![
            (MsgValue::Binary(b"nd".to_vec()), MsgValue::Boolean(true)),
            (MsgValue::Binary(b"type".to_vec()), MsgValue::from("<f8")),
            (MsgValue::Binary(b"kind".to_vec()), MsgValue::Binary(Vec::new())),
            (
                MsgValue::Binary(b"shape".to_vec()),
                MsgValue::Array(vec![MsgValue::from(2), MsgValue::from(2)]),
            ),
            (MsgValue::Binary(b"data".to_vec()), MsgValue::Binary(data)),
        ]);
        let body = msgpack(&MsgValue::Map(vec![(MsgValue::from("primal"), array)]));
        let value = decode_body(Some("application/msgpack"), &body).unwrap();
        assert_eq!(value, json!({"primal": [[1.5, 2.0], [3.0, 4.0]]}));
    }

    #[test]
    fn test_decode_numpy_scalar() {
        let scalar = MsgValue::Map(vec![
            (MsgValue::Binary(b"nd".to_vec()), MsgValue::Boolean(false)),
            (MsgValue::Binary(b"type".to_vec()), MsgValue::from("<i4")),
            (MsgValue::Binary(b"data".to_vec()), MsgValue::Binary(7i32.to_le_bytes().to_vec())),
        ]);
        let value = decode_body(None, &msgpack(&scalar)).unwrap();
        assert_eq!(value, json!(7));
    }

    #[test]
    fn test_oversized_numpy_shape_falls_back_to_map() {
        let huge = MsgValue::from(1u64 << 32);
        for shape in [vec![huge.clone(), huge.clone()], vec![huge, MsgValue::from(0)]] {
            let array = MsgValue::Map(vec![
                (MsgValue::from("nd"), MsgValue::Boolean(true)),
                (MsgValue::from("type"), MsgValue::from("<f8")),
                (MsgValue::from("shape"), MsgValue::Array(shape)),
                (MsgValue::from("data"), MsgValue::Binary(Vec::new())),
            ]);
            let value = decode_body(None, &msgpack(&array)).unwrap();
            assert_eq!(value["type"], json!("<f8"));
            assert_eq!(value["data"], json!([]));
        }
    }

    #[test]
    fn test_shape_fits() {
        assert!(shape_fits(&[2, 2], 4));
        assert!(shape_fits(&[], 1));
        assert!(shape_fits(&[0], 0));
        assert!(shape_fits(&[1, 0], 0));
        assert!(!shape_fits(&[3], 4));
        assert!(!shape_fits(&[usize::MAX, 2], 4));
        assert!(!shape_fits(&[usize::MAX, 0], 0));
        assert!(!shape_fits(&[4; 40], 4));
    }

    #[test]
    fn test_unknown_dtype_falls_back_to_map() {
        let odd = MsgValue::Map(vec![
            (MsgValue::from("nd"), MsgValue::Boolean(true)),
            (MsgValue::from("type"), MsgValue::from("<c16")),
            (MsgValue::from("shape"), MsgValue::Array(vec![])),
            (MsgValue::from("data"), MsgValue::Binary(vec![1])),
        ]);
        let value = decode_body(None, &msgpack(&odd)).unwrap();
        assert_eq!(value["type"], json!("<c16"));
        assert_eq!(value["data"], json!([1]));
    }

    #[test]
    fn test_normalize_legacy_id() {
        let mut envelope = Envelope::from_value(json!({"id": "abc"})).unwrap();
        envelope.normalize_request_id();
        assert_eq!(envelope.request_id(), Some("abc"));
        assert!(!envelope.contains_key("id"));
    }

    #[test]
    fn test_envelope_rejects_non_mapping() {
        assert!(matches!(
            Envelope::from_value(json!([1, 2])),
            Err(CuOptError::Decode(_))
        ));
    }

    #[test]
    fn test_error_for_status_extracts_error_field() {
        let response = raw(
            422,
            "Unprocessable Entity",
            "application/json",
            br#"{"error": "cost matrix missing"}"#.to_vec(),
        );
        match error_for_status(&response) {
            Err(CuOptError::Service { reason, status, message }) => {
                assert_eq!(reason, "Unprocessable Entity");
                assert_eq!(status, 422);
                assert_eq!(message, "cost matrix missing");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_error_for_status_uses_whole_body_without_error_field() {
        let body = rmp_serde::to_vec(&json!({"detail": "nope"})).unwrap();
        let response = raw(500, "Internal Server Error", "application/vnd.msgpack", body);
        match error_for_status(&response) {
            Err(CuOptError::Service { message, .. }) => {
                assert_eq!(message, r#"{"detail":"nope"}"#);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_error_for_status_undecodable_body_used_as_text() {
        let response = raw(502, "Bad Gateway", "application/json", b"upstream down".to_vec());
        match error_for_status(&response) {
            Err(CuOptError::Service { message, .. }) => assert_eq!(message, "upstream down"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_error_for_status_passes_success() {
        let response = raw(200, "OK", "application/json", b"{}".to_vec());
        assert!(error_for_status(&response).is_ok());
    }

    #[test]
    fn test_cleanup_strips_advisories() {
        let envelope = Envelope::from_value(json!({
            "response": {"status": 0},
            "warnings": ["w1", "w2"],
            "notes": ["n1"],
        }))
        .unwrap();
        let cleaned = cleanup(envelope);
        assert!(!cleaned.contains_key("warnings"));
        assert!(!cleaned.contains_key("notes"));
        assert_eq!(cleaned.get("response"), Some(&json!({"status": 0})));
    }

    #[test]
    fn test_cleanup_strips_empty_advisories() {
        let envelope =
            Envelope::from_value(json!({"response": {}, "warnings": [], "notes": []})).unwrap();
        let cleaned = cleanup(envelope);
        assert_eq!(cleaned.into_value(), json!({"response": {}}));
    }
}
