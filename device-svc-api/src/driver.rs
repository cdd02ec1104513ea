//! The driver callback surface (spec §6, §9 "Driver callback struct").
//!
//! Modeled as a single `async_trait` with required methods
//! (`initialize`, `handle_get`, `handle_put`, `create_address`,
//! `create_resource_attr`, `stop`) and default-provided optional
//! methods for everything else -- the Rust reading of "interface with
//! optional methods via capability flags": a driver that doesn't
//! override an optional method gets the default (a no-op, or
//! `Ok(true)`/empty collection as appropriate), which is equivalent to
//! never having set the corresponding capability flag.

use crate::device::{Device, DriverHandle, Name, ProtocolAddress, ResolvedRequest, Resource, ResourceAttrs};
use crate::event::Reading;
use crate::{Error, Value};
use async_trait::async_trait;
use std::collections::HashMap;

/// A single resource request passed to `handle_get`/`handle_put`,
/// paired with the caller-supplied value on the `put` side.
#[derive(Debug, Clone)]
pub struct GetRequest {
    pub resource: Name,
    pub resolved: ResolvedRequest,
}

#[derive(Debug, Clone)]
pub struct PutRequest {
    pub resource: Name,
    pub resolved: ResolvedRequest,
    pub value: Value,
}

/// Options accompanying a command invocation (query parameters; the
/// core recognizes at least `ds-pushevent`/`ds-returnevent`, spec
/// §4.3, but any key may be present).
pub type CommandOptions = HashMap<String, String>;

/// The driver callback surface the core invokes. Every method is
/// `async` since drivers talk to real hardware or remote services.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Called once at startup with the driver's own configuration
    /// subtree. A `false` return aborts startup.
    async fn initialize(&self, config: &HashMap<String, Value>) -> Result<bool, Error>;

    /// Called on a `Writable/Driver/` subtree change (spec §4.9).
    async fn reconfigure(&self, _config: &HashMap<String, Value>) -> Result<(), Error> {
        Ok(())
    }

    /// Starts an asynchronous discovery scan; results arrive later as
    /// provisioned-device announcements (spec §4.7).
    async fn discover(&self, _request_id: &str) -> Result<(), Error> {
        Ok(())
    }

    async fn delete_discovery(&self, _request_id: &str) -> Result<bool, Error> {
        Ok(true)
    }

    /// Returns the resources a device exposes, if the driver wants to
    /// supplement the statically configured profile.
    async fn describe(&self, _device: &Device, _options: &CommandOptions) -> Result<Vec<Resource>, Error> {
        Ok(Vec::new())
    }

    /// Parses a protocol address into a driver-private handle.
    async fn create_address(&self, protocols: &ProtocolAddress) -> Result<DriverHandle, Error>;

    async fn free_address(&self, _handle: &DriverHandle) {}

    /// Parses resource attributes into a driver-private handle.
    async fn create_resource_attr(&self, attributes: &ResourceAttrs) -> Result<DriverHandle, Error>;

    async fn free_resource_attr(&self, _handle: &DriverHandle) {}

    async fn validate_address(&self, _protocols: &ProtocolAddress) -> Result<(), Error> {
        Ok(())
    }

    /// Executes a batch of reads against one device. One `Reading` per
    /// request, in request order.
    async fn handle_get(
        &self,
        device: &Device,
        requests: &[GetRequest],
        options: &CommandOptions,
    ) -> Result<Vec<Reading>, Error>;

    /// Executes a batch of writes against one device.
    async fn handle_put(
        &self,
        device: &Device,
        requests: &[PutRequest],
        options: &CommandOptions,
    ) -> Result<(), Error>;

    /// Installs a periodic job for the named resource/command; the
    /// returned opaque handle is passed back to `autoevent_stop`. The
    /// default implementation installs nothing (the core's own
    /// `tokio::time::interval` loop drives the schedule regardless --
    /// see `devicesvcd::autoevent` -- so most drivers never need to
    /// override this).
    async fn autoevent_start(&self, _device: &Device, _target: &Name, _interval_ms: u64, _on_change: bool) -> Option<u64> {
        None
    }

    async fn autoevent_stop(&self, _handle: u64) {}

    async fn device_added(&self, _device: &Device, _resources: &[Resource]) {}

    async fn device_updated(&self, _device: &Device) {}

    async fn device_removed(&self, _name: &Name) {}

    /// Graceful shutdown. `force` skips any in-progress drain.
    async fn stop(&self, force: bool);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::address::DriverHandle as Handle;
    use std::sync::Arc;

    struct NoopDriver;

    #[async_trait]
    impl Driver for NoopDriver {
        async fn initialize(&self, _config: &HashMap<String, Value>) -> Result<bool, Error> {
            Ok(true)
        }

        async fn create_address(&self, _protocols: &ProtocolAddress) -> Result<Handle, Error> {
            Ok(Arc::new(()))
        }

        async fn create_resource_attr(&self, _attributes: &ResourceAttrs) -> Result<Handle, Error> {
            Ok(Arc::new(()))
        }

        async fn handle_get(
            &self,
            _device: &Device,
            _requests: &[GetRequest],
            _options: &CommandOptions,
        ) -> Result<Vec<Reading>, Error> {
            Ok(Vec::new())
        }

        async fn handle_put(
            &self,
            _device: &Device,
            _requests: &[PutRequest],
            _options: &CommandOptions,
        ) -> Result<(), Error> {
            Ok(())
        }

        async fn stop(&self, _force: bool) {}
    }

    #[tokio::test]
    async fn test_optional_methods_default() {
        let driver = NoopDriver;
        assert!(driver.delete_discovery("x").await.unwrap());
        assert!(driver.describe(&mk_device(), &HashMap::new()).await.unwrap().is_empty());
        driver.device_removed(&Name::create("d1").unwrap()).await;
    }

    fn mk_device() -> Device {
        use crate::device::entry::AdminState;
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
}
