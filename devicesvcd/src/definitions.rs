//! YAML/JSON device-profile and device-definition documents (spec §1
//! "YAML/JSON file readers", §4.10 DTOs). These are the on-disk
//! stand-in for what a real deployment receives over
//! `system-events/core-metadata/...`; `crate::callbacks` consumes the
//! very same `Device`/`Profile` types regardless of where they
//! originated.

use device_svc_api::device::command::ResourceOperation;
use device_svc_api::device::resource::{Bounds, NumericTransform, PropertyValue, TypeCode, ValueMapping};
use device_svc_api::device::{
    AdminState, Command, Device, Name, Profile, ProtocolAddress, Resource, ResourceAttrs,
};
use device_svc_api::{autoevent::Autoevent, Error, Value};
use serde_derive::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;

fn parse_type_code(spec: &str) -> Result<TypeCode, Error> {
    if let Some(inner) = spec.strip_prefix("Array(").and_then(|s| s.strip_suffix(')')) {
        return Ok(TypeCode::Array(Box::new(parse_type_code(inner)?)));
    }
    Ok(match spec {
        "Bool" => TypeCode::Bool,
        "Int8" => TypeCode::I8,
        "Int16" => TypeCode::I16,
        "Int32" => TypeCode::I32,
        "Int64" => TypeCode::I64,
        "Uint8" => TypeCode::U8,
        "Uint16" => TypeCode::U16,
        "Uint32" => TypeCode::U32,
        "Uint64" => TypeCode::U64,
        "Float32" => TypeCode::F32,
        "Float64" => TypeCode::F64,
        "String" => TypeCode::String,
        "Binary" => TypeCode::Binary,
        "Object" => TypeCode::Object,
        other => return Err(Error::ConfParse(format!("unknown value type {:?}", other))),
    })
}

#[derive(Debug, Deserialize, Default)]
struct TransformDoc {
    base: Option<f64>,
    scale: Option<f64>,
    offset: Option<f64>,
    shift: Option<i32>,
    mask: Option<u64>,
}

impl From<TransformDoc> for NumericTransform {
    fn from(d: TransformDoc) -> Self {
        NumericTransform { base: d.base, scale: d.scale, offset: d.offset, shift: d.shift, mask: d.mask }
    }
}

#[derive(Debug, Deserialize, Default)]
struct BoundsDoc {
    minimum: Option<f64>,
    maximum: Option<f64>,
}

impl From<BoundsDoc> for Bounds {
    fn from(d: BoundsDoc) -> Self {
        Bounds { minimum: d.minimum, maximum: d.maximum }
    }
}

#[derive(Debug, Deserialize)]
struct PropertyValueDoc {
    #[serde(rename = "valueType")]
    value_type: String,
    #[serde(default)]
    readable: bool,
    #[serde(default)]
    writable: bool,
    #[serde(default)]
    transform: Option<TransformDoc>,
    #[serde(default)]
    bounds: Option<BoundsDoc>,
    #[serde(default)]
    assertion: Option<String>,
    #[serde(default)]
    units: Option<String>,
    #[serde(default, rename = "mediaType")]
    media_type: Option<String>,
    #[serde(default)]
    mapping: Option<HashMap<String, String>>,
}

impl PropertyValueDoc {
    fn into_property(self) -> Result<PropertyValue, Error> {
        Ok(PropertyValue {
            type_code: parse_type_code(&self.value_type)?,
            readable: self.readable,
            writable: self.writable,
            transform: self.transform.map(Into::into),
            bounds: self.bounds.map(Into::into),
            assertion: self.assertion,
            units: self.units,
            default_value: None,
            media_type: self.media_type,
            mapping: self.mapping.map(|forward| ValueMapping { forward }),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ResourceDoc {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    attributes: HashMap<String, String>,
    properties: PropertyValueDoc,
    #[serde(default)]
    tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct ResourceOperationDoc {
    #[serde(rename = "deviceResource")]
    resource: String,
    #[serde(default)]
    mappings: Option<HashMap<String, String>>,
    #[serde(default, rename = "defaultValue")]
    default_value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CommandDoc {
    name: String,
    #[serde(default)]
    readable: bool,
    #[serde(default)]
    writable: bool,
    #[serde(rename = "resourceOperations")]
    resource_operations: Vec<ResourceOperationDoc>,
    #[serde(default)]
    tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct ProfileDoc {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    manufacturer: String,
    #[serde(default)]
    model: String,
    #[serde(default)]
    labels: Vec<String>,
    #[serde(rename = "deviceResources")]
    resources: Vec<ResourceDoc>,
    #[serde(rename = "deviceCommands", default)]
    commands: Vec<CommandDoc>,
}

impl ProfileDoc {
    pub fn into_profile(self) -> Result<Profile, Error> {
        let resources = self
            .resources
            .into_iter()
            .map(|r| {
                Ok(Resource {
                    name: Name::create(&r.name)?,
                    description: r.description,
                    attributes: ResourceAttrs(r.attributes.into_iter().map(|(k, v)| (k, Value::String(v))).collect()),
                    property: r.properties.into_property()?,
                    driver_handle: None,
                    tags: r.tags,
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;

        let commands = self
            .commands
            .into_iter()
            .map(|c| {
                let operations = c
                    .resource_operations
                    .into_iter()
                    .map(|op| {
                        Ok(ResourceOperation {
                            resource: Name::create(&op.resource)?,
                            mapping: op.mappings.map(|forward| ValueMapping { forward }),
                            default_value: op.default_value,
                        })
                    })
                    .collect::<Result<Vec<_>, Error>>()?;

                Ok(Command { name: Name::create(&c.name)?, operations, readable: c.readable, writable: c.writable, tags: c.tags })
            })
            .collect::<Result<Vec<_>, Error>>()?;

        Ok(Profile::new(Name::create(&self.name)?, self.description, self.manufacturer, self.model, self.labels, resources, commands))
    }
}

#[derive(Debug, Deserialize)]
struct AutoeventDoc {
    resource: String,
    interval: String,
    #[serde(default, rename = "onChange")]
    on_change: bool,
    #[serde(default, rename = "onChangeThreshold")]
    on_change_threshold: f64,
}

#[derive(Debug, Deserialize)]
pub struct DeviceDoc {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default, rename = "adminState")]
    admin_state: String,
    #[serde(rename = "profileName")]
    profile_name: String,
    #[serde(default)]
    protocols: HashMap<String, HashMap<String, String>>,
    #[serde(default, rename = "autoEvents")]
    auto_events: Vec<AutoeventDoc>,
}

impl DeviceDoc {
    pub fn into_device(self, service_name: &str) -> Result<Device, Error> {
        let admin_state = if self.admin_state.is_empty() { AdminState::Unlocked } else { AdminState::from_str(&self.admin_state)? };

        let mut protocol_address = ProtocolAddress::new();
        for (protocol, properties) in self.protocols {
            protocol_address.insert(protocol, properties.into_iter().map(|(k, v)| (k, Value::String(v))).collect());
        }

        let autoevents = self
            .auto_events
            .into_iter()
            .map(|a| Autoevent::new(Name::create(&a.resource)?, &a.interval, a.on_change, a.on_change_threshold))
            .collect::<Result<Vec<_>, Error>>()?;

        Ok(Device {
            name: Name::create(&self.name)?,
            parent: None,
            description: self.description,
            labels: self.labels,
            tags: None,
            admin_state,
            service_name: service_name.to_string(),
            protocol_address,
            profile_name: Name::create(&self.profile_name)?,
            autoevents,
            origin_ns: 0,
        })
    }
}

/// Reads every `*.yaml`/`*.yml` file directly under `dir` and parses
/// each as a `ProfileDoc`. Non-YAML files are skipped.
pub async fn load_profiles(dir: &std::path::Path) -> Result<Vec<Profile>, Error> {
    load_docs(dir, |text| serde_yaml::from_str::<ProfileDoc>(text).map_err(|e| Error::ConfParse(e.to_string()))?.into_profile()).await
}

/// Reads every `*.yaml`/`*.yml` file directly under `dir` and parses
/// each as a `DeviceDoc`, then converts it into a `Device` owned by
/// `service_name`.
pub async fn load_devices(dir: &std::path::Path, service_name: &str) -> Result<Vec<Device>, Error> {
    load_docs(dir, |text| serde_yaml::from_str::<DeviceDoc>(text).map_err(|e| Error::ConfParse(e.to_string()))?.into_device(service_name)).await
}

async fn load_docs<T>(dir: &std::path::Path, parse: impl Fn(&str) -> Result<T, Error>) -> Result<Vec<T>, Error> {
    let mut out = Vec::new();

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(e) => e,
        Err(_) => return Ok(out),
    };

    while let Some(entry) = entries.next_entry().await.map_err(|e| Error::ConfParse(e.to_string()))? {
        let path = entry.path();
        let is_yaml = matches!(path.extension().and_then(|e| e.to_str()), Some("yaml") | Some("yml"));
        if !is_yaml {
            continue;
        }

        let text = tokio::fs::read_to_string(&path).await.map_err(|e| Error::ConfParse(e.to_string()))?;
        out.push(parse(&text)?);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROFILE_YAML: &str = r#"
name: temp-sensor
description: a temperature sensor
deviceResources:
  - name: temperature
    properties:
      valueType: Float64
      readable: true
      writable: false
deviceCommands:
  - name: read_all
    readable: true
    resourceOperations:
      - deviceResource: temperature
"#;

    #[test]
    fn test_parse_profile_doc() {
        let doc: ProfileDoc = serde_yaml::from_str(PROFILE_YAML).unwrap();
        let profile = doc.into_profile().unwrap();
        assert_eq!(profile.name.as_str(), "temp-sensor");
        assert_eq!(profile.resources.len(), 1);
        assert_eq!(profile.commands.len(), 1);
    }

    const DEVICE_YAML: &str = r#"
name: sensor7
profileName: temp-sensor
protocols:
  other:
    address: "sim://sensor7"
autoEvents:
  - resource: temperature
    interval: 10s
    onChange: true
    onChangeThreshold: 0.5
"#;

    #[test]
    fn test_parse_device_doc() {
        let doc: DeviceDoc = serde_yaml::from_str(DEVICE_YAML).unwrap();
        let device = doc.into_device("device-svc").unwrap();
        assert_eq!(device.name.as_str(), "sensor7");
        assert_eq!(device.autoevents.len(), 1);
        assert_eq!(device.admin_state, AdminState::Unlocked);
    }
}
