//! Readings, cooked events, and the bus envelope (spec §3, §4.5, §6).

use crate::device::Name;
use crate::{Error, Value};
use base64::Engine;
use serde_json::{Map, Value as Json};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

pub const API_VERSION: &str = "v3";

/// Current wall-clock time in nanoseconds since the epoch. Used to
/// stamp a reading whenever the driver supplied `origin_ns == 0`
/// (spec §3 "0 means use wall clock at serialization").
pub fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// One value sampled or written at one resource, fully tagged for
/// publication (spec §4.3 step 8).
#[derive(Debug, Clone)]
pub struct Reading {
    pub id: Uuid,
    pub device_name: Name,
    pub profile_name: Name,
    pub resource_name: Name,
    pub origin_ns: u64,
    pub value: Value,
}

impl Reading {
    pub fn new(device_name: Name, profile_name: Name, resource_name: Name, origin_ns: u64, value: Value) -> Self {
        Reading {
            id: Uuid::new_v4(),
            device_name,
            profile_name,
            resource_name,
            origin_ns: if origin_ns == 0 { now_ns() } else { origin_ns },
            value,
        }
    }

    fn to_json(&self) -> Json {
        let mut map = Map::new();
        map.insert("apiVersion".into(), Json::String(API_VERSION.into()));
        map.insert("id".into(), Json::String(self.id.to_string()));
        map.insert("deviceName".into(), Json::String(self.device_name.to_string()));
        map.insert("profileName".into(), Json::String(self.profile_name.to_string()));
        map.insert("resourceName".into(), Json::String(self.resource_name.to_string()));
        map.insert("valueType".into(), Json::String(self.value.type_label().into()));
        map.insert("origin".into(), Json::Number(self.origin_ns.into()));

        match &self.value {
            Value::Binary(data, media_type) => {
                map.insert(
                    "binaryValue".into(),
                    Json::String(base64::engine::general_purpose::STANDARD.encode(data)),
                );
                map.insert("mediaType".into(), Json::String(media_type.clone()));
            }
            Value::Object(fields) => {
                let mut obj = Map::new();
                for (k, v) in fields {
                    obj.insert(k.clone(), scalar_to_json(v));
                }
                map.insert("objectValue".into(), Json::Object(obj));
            }
            other => {
                map.insert("value".into(), scalar_to_json(other));
            }
        }

        Json::Object(map)
    }
}

fn scalar_to_json(value: &Value) -> Json {
    match value {
        Value::Bool(v) => Json::Bool(*v),
        Value::I8(v) => Json::Number((*v as i64).into()),
        Value::I16(v) => Json::Number((*v as i64).into()),
        Value::I32(v) => Json::Number((*v as i64).into()),
        Value::I64(v) => Json::Number((*v).into()),
        Value::U8(v) => Json::Number((*v as u64).into()),
        Value::U16(v) => Json::Number((*v as u64).into()),
        Value::U32(v) => Json::Number((*v as u64).into()),
        Value::U64(v) => Json::Number((*v).into()),
        Value::F32(v) => serde_json::Number::from_f64(*v as f64).map(Json::Number).unwrap_or(Json::Null),
        Value::F64(v) => serde_json::Number::from_f64(*v).map(Json::Number).unwrap_or(Json::Null),
        Value::String(v) => Json::String(v.clone()),
        Value::BoolArray(v) => Json::Array(v.iter().map(|b| Json::Bool(*b)).collect()),
        Value::I64Array(v) => Json::Array(v.iter().map(|n| Json::Number((*n).into())).collect()),
        Value::F64Array(v) => Json::Array(
            v.iter()
                .map(|n| serde_json::Number::from_f64(*n).map(Json::Number).unwrap_or(Json::Null))
                .collect(),
        ),
        Value::StringArray(v) => Json::Array(v.iter().map(|s| Json::String(s.clone())).collect()),
        Value::Binary(..) | Value::Object(_) => Json::Null,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Textual,
    Binary,
}

impl Encoding {
    pub fn content_type(&self) -> &'static str {
        match self {
            Encoding::Textual => "application/json",
            Encoding::Binary => "application/cbor",
        }
    }
}

/// A path (profile/device/command), an encoding flag, the readings
/// that make it up, and the tag union (spec §3 "Cooked event").
#[derive(Debug, Clone)]
pub struct CookedEvent {
    pub profile: Name,
    pub device: Name,
    pub command: Name,
    pub readings: Vec<Reading>,
    pub tags: Vec<String>,
}

impl CookedEvent {
    /// BINARY (CBOR) if any reading is binary, else TEXTUAL (JSON) --
    /// spec §4.3 step 9.
    pub fn encoding(&self) -> Encoding {
        if self.readings.iter().any(|r| r.value.is_binary()) {
            Encoding::Binary
        } else {
            Encoding::Textual
        }
    }

    fn to_json(&self) -> Json {
        let mut map = Map::new();
        map.insert("apiVersion".into(), Json::String(API_VERSION.into()));
        map.insert("profileName".into(), Json::String(self.profile.to_string()));
        map.insert("deviceName".into(), Json::String(self.device.to_string()));
        map.insert("sourceName".into(), Json::String(self.command.to_string()));
        map.insert("tags".into(), Json::Array(self.tags.iter().map(|t| Json::String(t.clone())).collect()));
        map.insert(
            "readings".into(),
            Json::Array(self.readings.iter().map(Reading::to_json).collect()),
        );
        Json::Object(map)
    }

    /// Serializes the event body per its own encoding: CBOR bytes if
    /// `Encoding::Binary`, else compact JSON.
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let json = self.to_json();
        match self.encoding() {
            Encoding::Textual => serde_json::to_vec(&json).map_err(|e| Error::ConfParse(e.to_string())),
            Encoding::Binary => {
                let mut buf = Vec::new();
                ciborium::into_writer(&json, &mut buf).map_err(|e| Error::ConfParse(e.to_string()))?;
                Ok(buf)
            }
        }
    }
}

/// The bus-level wrapper around a request or response payload (spec
/// §4.5, §6).
#[derive(Debug, Clone, serde_derive::Serialize, serde_derive::Deserialize)]
pub struct Envelope {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    #[serde(rename = "correlationID")]
    pub correlation_id: String,
    #[serde(rename = "requestID", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(rename = "contentType")]
    pub content_type: String,
    #[serde(rename = "errorCode")]
    pub error_code: i32,
    pub payload: String,
    #[serde(rename = "queryParams", skip_serializing_if = "Option::is_none")]
    pub query_params: Option<HashMap<String, String>>,
}

impl Envelope {
    /// Wraps a successfully serialized event/body into a response
    /// envelope: base64-encodes the payload bytes, sets errorCode 0.
    pub fn success(correlation_id: String, content_type: &str, body: &[u8]) -> Self {
        Envelope {
            api_version: API_VERSION.to_string(),
            correlation_id,
            request_id: None,
            content_type: content_type.to_string(),
            error_code: 0,
            payload: base64::engine::general_purpose::STANDARD.encode(body),
            query_params: None,
        }
    }

    pub fn error(correlation_id: String, err: &Error) -> Self {
        Envelope {
            api_version: API_VERSION.to_string(),
            correlation_id,
            request_id: None,
            content_type: "application/json".to_string(),
            error_code: err.code(),
            payload: base64::engine::general_purpose::STANDARD.encode(err.to_string()),
            query_params: None,
        }
    }

    /// Decodes `payload` back into raw bytes (spec R1: encode(decode(e))
    /// preserves apiVersion, correlationID, contentType, and payload
    /// bytes).
    pub fn decode_payload(&self) -> Result<Vec<u8>, Error> {
        base64::engine::general_purpose::STANDARD
            .decode(&self.payload)
            .map_err(|e| Error::BadRequest(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_reading(value: Value) -> Reading {
        Reading::new(
            Name::create("d1").unwrap(),
            Name::create("p1").unwrap(),
            Name::create("temp").unwrap(),
            0,
            value,
        )
    }

    #[test]
    fn test_encoding_selection() {
        let textual = CookedEvent {
            profile: Name::create("p1").unwrap(),
            device: Name::create("d1").unwrap(),
            command: Name::create("read_all").unwrap(),
            readings: vec![mk_reading(Value::I32(5))],
            tags: vec![],
        };
        assert_eq!(textual.encoding(), Encoding::Textual);

        let binary = CookedEvent {
            readings: vec![mk_reading(Value::Binary(vec![1, 2, 3], "application/octet-stream".into()))],
            ..textual.clone_for_test()
        };
        assert_eq!(binary.encoding(), Encoding::Binary);
    }

    impl CookedEvent {
        fn clone_for_test(&self) -> Self {
            self.clone()
        }
    }

    #[test]
    fn test_json_encode_decodes_as_valid_json() {
        let event = CookedEvent {
            profile: Name::create("p1").unwrap(),
            device: Name::create("d1").unwrap(),
            command: Name::create("read_all").unwrap(),
            readings: vec![mk_reading(Value::I32(5))],
            tags: vec![],
        };
        let bytes = event.encode().unwrap();
        let parsed: Json = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed["deviceName"], "d1");
        assert_eq!(parsed["readings"][0]["value"], 5);
    }

    #[test]
    fn test_envelope_roundtrip_r1() {
        let env = Envelope::success("corr-1".into(), "application/json", b"hello");
        let json = serde_json::to_vec(&env).unwrap();
        let decoded: Envelope = serde_json::from_slice(&json).unwrap();
        assert_eq!(decoded.api_version, env.api_version);
        assert_eq!(decoded.correlation_id, env.correlation_id);
        assert_eq!(decoded.content_type, env.content_type);
        assert_eq!(decoded.decode_payload().unwrap(), b"hello");
    }
}
