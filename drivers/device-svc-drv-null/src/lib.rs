//! A reference driver implementing the `Driver` callback surface
//! entirely in memory: `handle_get` returns whatever was last written
//! by `handle_put` (or the resource's declared default), `handle_put`
//! just stores the value. No real device protocol is spoken.
//!
//! This exists so the command pipeline, registry, and autoevent
//! scheduler are exercised end-to-end by integration tests -- the
//! same role the teacher's `drv_memory` driver plays for its own
//! framework.

use async_trait::async_trait;
use device_svc_api::device::{Device, DriverHandle, Name, ProtocolAddress, Resource, ResourceAttrs};
use device_svc_api::driver::{CommandOptions, Driver, GetRequest, PutRequest};
use device_svc_api::event::Reading;
use device_svc_api::{Error, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use tracing::debug;

/// Keyed by `(device name, resource name)`.
type Store = Mutex<HashMap<(String, String), Value>>;

pub struct NullDriver {
    store: Store,
}

impl NullDriver {
    pub fn new() -> Self {
        NullDriver { store: Mutex::new(HashMap::new()) }
    }

    /// Seeds a resource's stored value ahead of a `handle_get`, useful
    /// in tests that want to drive a specific reading without going
    /// through `handle_put` first.
    pub fn seed(&self, device: &str, resource: &str, value: Value) {
        self.store.lock().unwrap().insert((device.to_string(), resource.to_string()), value);
    }
}

impl Default for NullDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Driver for NullDriver {
    async fn initialize(&self, _config: &HashMap<String, Value>) -> Result<bool, Error> {
        Ok(true)
    }

    async fn create_address(&self, _protocols: &ProtocolAddress) -> Result<DriverHandle, Error> {
        Ok(Arc::new(()))
    }

    async fn create_resource_attr(&self, _attributes: &ResourceAttrs) -> Result<DriverHandle, Error> {
        Ok(Arc::new(()))
    }

    async fn handle_get(
        &self,
        device: &Device,
        requests: &[GetRequest],
        _options: &CommandOptions,
    ) -> Result<Vec<Reading>, Error> {
        let store = self.store.lock().unwrap();
        let mut readings = Vec::with_capacity(requests.len());

        for req in requests {
            let key = (device.name.to_string(), req.resource.to_string());
            let value = store
                .get(&key)
                .cloned()
                .or_else(|| req.resolved.property.default_value.clone())
                .ok_or_else(|| Error::DriverError(format!("no stored value for {}", req.resource)))?;

            readings.push(Reading::new(device.name.clone(), device.profile_name.clone(), req.resource.clone(), 0, value));
        }

        Ok(readings)
    }

    async fn handle_put(
        &self,
        device: &Device,
        requests: &[PutRequest],
        _options: &CommandOptions,
    ) -> Result<(), Error> {
        let mut store = self.store.lock().unwrap();

        for req in requests {
            debug!(device = %device.name, resource = %req.resource, "storing value");
            store.insert((device.name.to_string(), req.resource.to_string()), req.value.clone());
        }

        Ok(())
    }

    async fn device_added(&self, _device: &Device, _resources: &[Resource]) {}

    async fn stop(&self, _force: bool) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use device_svc_api::device::entry::AdminState;
    use device_svc_api::device::resource::{PropertyValue, TypeCode};
    use device_svc_api::device::command::ResolvedRequest;

    fn mk_device() -> Device {
        Device {
            name: Name::create("d1").unwrap(),
            parent: None,
            description: String::new(),
            labels: vec![],
            tags: None,
            admin_state: AdminState::Unlocked,
            service_name: "svc".into(),
            protocol_address: ProtocolAddress::new(),
            profile_name: Name::create("p1").unwrap(),
            autoevents: vec![],
            origin_ns: 0,
        }
    }

    fn mk_request(resource: &str) -> GetRequest {
        GetRequest {
            resource: Name::create(resource).unwrap(),
            resolved: ResolvedRequest {
                resource: Name::create(resource).unwrap(),
                property: PropertyValue {
                    type_code: TypeCode::I32,
                    readable: true,
                    writable: true,
                    transform: None,
                    bounds: None,
                    assertion: None,
                    units: None,
                    default_value: Some(Value::I32(0)),
                    media_type: None,
                    mapping: None,
                },
                mapping: None,
                default_value: None,
            },
        }
    }

    #[tokio::test]
    async fn test_get_returns_default_when_unset() {
        let driver = NullDriver::new();
        let device = mk_device();
        let readings = driver.handle_get(&device, &[mk_request("temp")], &HashMap::new()).await.unwrap();
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].value, Value::I32(0));
    }

    #[tokio::test]
    async fn test_put_then_get_roundtrips() {
        let driver = NullDriver::new();
        let device = mk_device();
        driver.seed("d1", "temp", Value::I32(42));

        let readings = driver.handle_get(&device, &[mk_request("temp")], &HashMap::new()).await.unwrap();
        assert_eq!(readings[0].value, Value::I32(42));
    }
}
