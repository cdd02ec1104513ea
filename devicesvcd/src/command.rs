//! The get/set command pipeline (spec §4.3, §4.4): acquire a device,
//! resolve the command against its profile, invoke the driver, and run
//! readings or incoming values through value-mapping and numeric
//! transforms in the prescribed order.

use device_svc_api::device::command::ResolvedRequest;
use device_svc_api::device::resource::Direction;
use device_svc_api::driver::{CommandOptions, Driver, GetRequest, PutRequest};
use device_svc_api::event::{CookedEvent, Reading};
use device_svc_api::registry::Registry;
use device_svc_api::{transform, Error, Result, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Settings the pipeline needs on every call; cheap to clone and
/// shared across every command invocation and autoevent tick.
#[derive(Clone)]
pub struct PipelineConfig {
    pub data_transform: bool,
    pub max_cmd_ops: usize,
    pub service_name: String,
    /// Flipped by the `deviceservice/update` callback (spec §4.10):
    /// while set, every command fails `Locked` regardless of the
    /// individual device's own admin state.
    pub service_locked: Arc<AtomicBool>,
}

pub struct GetOutcome {
    pub event: Option<CookedEvent>,
    pub assertion_failed: bool,
}

/// Runs the 11-step get pipeline (spec §4.3) for one device/command
/// pair. `caller_tags` are unioned with the device's own tags on the
/// resulting event (deduplicated, sorted).
pub async fn run_get(
    registry: &Registry,
    driver: &dyn Driver,
    config: &PipelineConfig,
    device_name: &str,
    command_name: &str,
    options: &CommandOptions,
    caller_tags: &[String],
) -> Result<GetOutcome> {
    if config.service_locked.load(Ordering::Acquire) {
        return Err(Error::Locked);
    }

    let handle = registry.acquire_by_name(device_name).await.ok_or(Error::NotFound)?;

    if *handle.admin_state.read().await != device_svc_api::device::AdminState::Unlocked {
        return Err(Error::Locked);
    }
    if *handle.operating_state.read().await != device_svc_api::device::OperatingState::Up {
        return Err(Error::Locked);
    }

    let profile = handle.profile.read().await.clone();
    let resolved = profile.resolve_command(command_name, Direction::Get)?;
    if resolved.is_empty() {
        return Err(Error::NotFound);
    }
    if resolved.len() > config.max_cmd_ops {
        return Err(Error::BadRequest(format!(
            "command {} touches {} resources, exceeding the configured limit of {}",
            command_name,
            resolved.len(),
            config.max_cmd_ops
        )));
    }

    let requests: Vec<GetRequest> = resolved.iter().map(|r| GetRequest { resource: r.resource.clone(), resolved: r.clone() }).collect();

    let mut readings = driver.handle_get(&handle.device, &requests, options).await?;

    let mut assertion_failed = false;
    if config.data_transform {
        for (reading, resolved) in readings.iter_mut().zip(resolved.iter()) {
            apply_outgoing_transform(reading, resolved)?;
            if !check_assertion(&reading.value, resolved) {
                assertion_failed = true;
            }
        }
    } else {
        for (reading, resolved) in readings.iter().zip(resolved.iter()) {
            if !check_assertion(&reading.value, resolved) {
                assertion_failed = true;
            }
        }
    }

    if assertion_failed {
        return Ok(GetOutcome { event: None, assertion_failed: true });
    }

    let mut tags: Vec<String> = handle.device.tags.clone().unwrap_or_default();
    tags.extend(caller_tags.iter().cloned());
    tags.sort();
    tags.dedup();

    let event = CookedEvent {
        profile: profile.name.clone(),
        device: handle.device.name.clone(),
        command: device_svc_api::device::Name::create(command_name)?,
        readings,
        tags,
    };

    Ok(GetOutcome { event: Some(event), assertion_failed: false })
}

/// Runs the 7-step set pipeline (spec §4.3) for one device/command
/// pair. `values` are keyed by resource name; a resource the command
/// touches but that's missing from `values` is a `BadRequest`.
pub async fn run_set(
    registry: &Registry,
    driver: &dyn Driver,
    config: &PipelineConfig,
    device_name: &str,
    command_name: &str,
    values: HashMap<String, Value>,
    options: &CommandOptions,
) -> Result<()> {
    if config.service_locked.load(Ordering::Acquire) {
        return Err(Error::Locked);
    }

    let handle = registry.acquire_by_name(device_name).await.ok_or(Error::NotFound)?;

    if *handle.admin_state.read().await != device_svc_api::device::AdminState::Unlocked {
        return Err(Error::Locked);
    }
    if *handle.operating_state.read().await != device_svc_api::device::OperatingState::Up {
        return Err(Error::Locked);
    }

    let profile = handle.profile.read().await.clone();
    let resolved = profile.resolve_command(command_name, Direction::Set)?;
    if resolved.is_empty() {
        return Err(Error::NotFound);
    }
    if resolved.len() > config.max_cmd_ops {
        return Err(Error::BadRequest(format!(
            "command {} touches {} resources, exceeding the configured limit of {}",
            command_name,
            resolved.len(),
            config.max_cmd_ops
        )));
    }

    let mut requests = Vec::with_capacity(resolved.len());
    for r in &resolved {
        let raw = values
            .get(r.resource.as_str())
            .cloned()
            .or_else(|| r.default_value.as_ref().map(|s| Value::String(s.clone())))
            .ok_or_else(|| Error::BadRequest(format!("missing value for resource {}", r.resource)))?;

        let value = if config.data_transform { apply_incoming_transform(&raw, r)? } else { raw };

        requests.push(PutRequest { resource: r.resource.clone(), resolved: r.clone(), value });
    }

    driver.handle_put(&handle.device, &requests, options).await.map_err(|e| match e {
        Error::DriverError(_) => e,
        other => Error::DriverError(other.to_string()),
    })
}

/// Outgoing direction (spec §4.4): value-mapping first (on the
/// string form of the raw value), then the numeric transform. An
/// overflow is not propagated as an error -- the reading's value
/// becomes the literal string `"overflow"` and publication continues.
fn apply_outgoing_transform(reading: &mut Reading, resolved: &ResolvedRequest) -> Result<()> {
    if let Some(mapping) = &resolved.mapping {
        let raw = reading.value.to_string();
        let mapped = mapping.apply_outgoing(&raw);
        reading.value = Value::String(mapped.to_string());
        return Ok(());
    }

    if let Some(transform) = &resolved.property.transform {
        match transform::forward(&reading.value, transform, &resolved.property.type_code) {
            Ok(value) => reading.value = value,
            Err(Error::Overflow) => reading.value = Value::String("overflow".to_string()),
            Err(e) => return Err(e),
        }
    }

    Ok(())
}

/// Incoming direction (spec §4.4): reverse value-mapping, bounds
/// check, then the inverse numeric transform -- the mirror image of
/// `apply_outgoing_transform`'s ordering.
fn apply_incoming_transform(raw: &Value, resolved: &ResolvedRequest) -> Result<Value> {
    if let Some(mapping) = &resolved.mapping {
        let external = raw.to_string();
        let mapped = mapping
            .apply_incoming(&external)
            .ok_or_else(|| Error::BadRequest(format!("{:?} is not a recognized mapped value", external)))?;
        return Ok(Value::String(mapped.to_string()));
    }

    if let Some(bounds) = &resolved.property.bounds {
        if let Some(v) = raw.as_f64() {
            if !bounds.contains(v) {
                return Err(Error::BadRequest(format!("{} is outside the configured bounds", v)));
            }
        }
    }

    if let Some(transform) = &resolved.property.transform {
        return transform::inverse(raw, transform, &resolved.property.type_code);
    }

    Ok(raw.clone())
}

/// Evaluates an optional assertion expression of the form `"== N"`,
/// `"!= N"` against the (already-transformed) reading value. No
/// assertion always passes.
fn check_assertion(value: &Value, resolved: &ResolvedRequest) -> bool {
    let Some(assertion) = resolved.property.assertion.as_deref() else {
        return true;
    };

    let assertion = assertion.trim();
    let rendered = value.to_string();

    if let Some(expected) = assertion.strip_prefix("==").map(str::trim) {
        return rendered == expected;
    }
    if let Some(expected) = assertion.strip_prefix("!=").map(str::trim) {
        return rendered != expected;
    }

    rendered == assertion
}

/// Converts a decoded JSON scalar from a command-request payload into
/// our own `Value`, guessing the narrowest numeric representation
/// that fits (the transform/bounds machinery widens from there).
pub fn json_to_value(v: serde_json::Value) -> Result<Value> {
    match v {
        serde_json::Value::Bool(b) => Ok(Value::Bool(b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::I64(i))
            } else if let Some(f) = n.as_f64() {
                Ok(Value::F64(f))
            } else {
                Err(Error::BadRequest("unrepresentable number".to_string()))
            }
        }
        serde_json::Value::String(s) => Ok(Value::String(s)),
        other => Err(Error::BadRequest(format!("unsupported value shape: {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use device_svc_api::device::resource::{Bounds, NumericTransform, PropertyValue, TypeCode, ValueMapping};
    use device_svc_api::device::Name;

    fn mk_resolved(transform: Option<NumericTransform>, bounds: Option<Bounds>, mapping: Option<ValueMapping>) -> ResolvedRequest {
        ResolvedRequest {
            resource: Name::create("temp").unwrap(),
            property: PropertyValue {
                type_code: TypeCode::F64,
                readable: true,
                writable: true,
                transform,
                bounds,
                assertion: None,
                units: None,
                default_value: None,
                media_type: None,
                mapping: mapping.clone(),
            },
            mapping,
            default_value: None,
        }
    }

    fn mk_reading(value: Value) -> Reading {
        Reading::new(Name::create("d1").unwrap(), Name::create("p1").unwrap(), Name::create("temp").unwrap(), 0, value)
    }

    #[test]
    fn test_outgoing_transform_applies_scale_and_offset() {
        let resolved = mk_resolved(Some(NumericTransform { base: None, scale: Some(2.0), offset: Some(1.0), shift: None, mask: None }), None, None);
        let mut reading = mk_reading(Value::F64(10.0));
        apply_outgoing_transform(&mut reading, &resolved).unwrap();
        assert_eq!(reading.value, Value::F64(21.0));
    }

    #[test]
    fn test_outgoing_overflow_becomes_literal_string() {
        let resolved = mk_resolved(Some(NumericTransform { base: None, scale: Some(f64::MAX), offset: None, shift: None, mask: None }), None, None);
        let mut reading = mk_reading(Value::F64(f64::MAX));
        apply_outgoing_transform(&mut reading, &resolved).unwrap();
        assert_eq!(reading.value, Value::String("overflow".to_string()));
    }

    #[test]
    fn test_incoming_bounds_rejects_out_of_range() {
        let resolved = mk_resolved(None, Some(Bounds { minimum: Some(0.0), maximum: Some(100.0) }), None);
        let err = apply_incoming_transform(&Value::F64(150.0), &resolved).unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }

    #[test]
    fn test_incoming_mapping_rejects_unknown_value() {
        let mut forward = HashMap::new();
        forward.insert("on".to_string(), "1".to_string());
        let resolved = mk_resolved(None, None, Some(ValueMapping { forward }));
        assert!(apply_incoming_transform(&Value::String("maybe".to_string()), &resolved).is_err());
    }

    #[test]
    fn test_assertion_equality() {
        let mut resolved = mk_resolved(None, None, None);
        resolved.property.assertion = Some("== 5".to_string());
        assert!(check_assertion(&Value::I32(5), &resolved));
        assert!(!check_assertion(&Value::I32(6), &resolved));
    }
}
