//! `Handler` adapters wiring the bus dispatcher onto the command
//! pipeline and the core-metadata callbacks (spec §4.8 "Dispatch",
//! §4.10). This is the only place `Dispatcher` registrations are
//! assembled; `main` just calls `register_all`.

use crate::autoevent::AutoeventContext;
use crate::bus::dispatch::{current_correlation_id, Dispatcher, Handler, HandlerReply, PathParams, QueryParams};
use crate::busrpc::publish_event;
use crate::callbacks;
use crate::command;
use crate::provision::WatcherList;
use async_trait::async_trait;
use device_svc_api::device::{AdminState, Name};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::warn;

/// `<prefix>/device/command/request/<service>/{name}/{cmd}`: an empty
/// request body means a `get`; a non-empty JSON object of resource ->
/// value pairs means a `set` (spec §4.3 "direction is inferred from
/// whether the request carries a value body").
struct CommandHandler {
    ctx: AutoeventContext,
}

#[async_trait]
impl Handler for CommandHandler {
    async fn handle(&self, request: &[u8], path: &PathParams, query: &QueryParams) -> HandlerReply {
        let (Some(name), Some(cmd)) = (path.get("name"), path.get("cmd")) else {
            return HandlerReply::status_only(device_svc_api::Error::BadRequest("missing name/cmd path parameters".into()).code());
        };

        if request.is_empty() {
            self.run_get(name, cmd, query).await
        } else {
            self.run_set(name, cmd, request, query).await
        }
    }
}

impl CommandHandler {
    async fn run_get(&self, name: &str, cmd: &str, query: &QueryParams) -> HandlerReply {
        match command::run_get(&self.ctx.registry, self.ctx.driver.as_ref(), &self.ctx.pipeline_config, name, cmd, query, &[]).await {
            Ok(outcome) if outcome.assertion_failed => HandlerReply::status_only(device_svc_api::Error::BadRequest("assertion failed".into()).code()),
            Ok(outcome) => {
                let Some(event) = outcome.event else {
                    return HandlerReply::status_only(0);
                };

                let push = query.get("ds-pushevent").map(String::as_str) != Some("false");
                if push {
                    publish_event(self.ctx.bus.as_ref(), self.ctx.metrics.as_ref(), &self.ctx.base_topic_prefix, current_correlation_id(), &event).await;
                }

                let return_event = query.get("ds-returnevent").map(String::as_str) != Some("false");
                if !return_event {
                    return HandlerReply::status_only(0);
                }

                match event.encode() {
                    Ok(body) => HandlerReply::ok(body, event.encoding().content_type()),
                    Err(e) => HandlerReply::status_only(e.code()),
                }
            }
            Err(e) => {
                self.ctx.metrics.command_failures.fetch_add(1, Ordering::Relaxed);
                warn!(device = name, command = cmd, error = %e, "get command failed");
                HandlerReply::status_only(e.code())
            }
        }
    }

    async fn run_set(&self, name: &str, cmd: &str, request: &[u8], query: &QueryParams) -> HandlerReply {
        let parsed: serde_json::Value = match serde_json::from_slice(request) {
            Ok(v) => v,
            Err(e) => return HandlerReply::status_only(device_svc_api::Error::BadRequest(e.to_string()).code()),
        };

        let serde_json::Value::Object(map) = parsed else {
            return HandlerReply::status_only(device_svc_api::Error::BadRequest("set body must be a JSON object".into()).code());
        };

        let mut values = HashMap::new();
        for (k, v) in map {
            match command::json_to_value(v) {
                Ok(value) => {
                    values.insert(k, value);
                }
                Err(e) => return HandlerReply::status_only(e.code()),
            }
        }

        match command::run_set(&self.ctx.registry, self.ctx.driver.as_ref(), &self.ctx.pipeline_config, name, cmd, values, query).await {
            Ok(()) => HandlerReply::status_only(0),
            Err(e) => {
                self.ctx.metrics.command_failures.fetch_add(1, Ordering::Relaxed);
                warn!(device = name, command = cmd, error = %e, "set command failed");
                HandlerReply::status_only(e.code())
            }
        }
    }
}

/// The `system-events/core-metadata/device/{add,update}` payloads
/// reuse `definitions::DeviceDoc` -- the same shape a device YAML file
/// parses into (spec §4.10), since both describe the identical wire
/// document.
struct DeviceAddedHandler {
    ctx: AutoeventContext,
}

#[async_trait]
impl Handler for DeviceAddedHandler {
    async fn handle(&self, request: &[u8], _path: &PathParams, _query: &QueryParams) -> HandlerReply {
        let doc: crate::definitions::DeviceDoc = match serde_json::from_slice(request) {
            Ok(d) => d,
            Err(e) => return HandlerReply::status_only(device_svc_api::Error::BadRequest(e.to_string()).code()),
        };

        match doc.into_device(&self.ctx.pipeline_config.service_name) {
            Ok(device) => match callbacks::device_added(&self.ctx, device).await {
                Ok(()) => HandlerReply::status_only(0),
                Err(e) => HandlerReply::status_only(e.code()),
            },
            Err(e) => HandlerReply::status_only(e.code()),
        }
    }
}

struct DeviceUpdatedHandler {
    ctx: AutoeventContext,
}

#[async_trait]
impl Handler for DeviceUpdatedHandler {
    async fn handle(&self, request: &[u8], _path: &PathParams, _query: &QueryParams) -> HandlerReply {
        let doc: crate::definitions::DeviceDoc = match serde_json::from_slice(request) {
            Ok(d) => d,
            Err(e) => return HandlerReply::status_only(device_svc_api::Error::BadRequest(e.to_string()).code()),
        };

        match doc.into_device(&self.ctx.pipeline_config.service_name) {
            Ok(device) => match callbacks::device_updated(&self.ctx, device).await {
                Ok(()) => HandlerReply::status_only(0),
                Err(e) => HandlerReply::status_only(e.code()),
            },
            Err(e) => HandlerReply::status_only(e.code()),
        }
    }
}

struct DeviceDeletedHandler {
    ctx: AutoeventContext,
}

#[async_trait]
impl Handler for DeviceDeletedHandler {
    async fn handle(&self, _request: &[u8], path: &PathParams, _query: &QueryParams) -> HandlerReply {
        let Some(name) = path.get("name") else {
            return HandlerReply::status_only(device_svc_api::Error::BadRequest("missing name path parameter".into()).code());
        };

        match callbacks::device_deleted(&self.ctx, name).await {
            Ok(()) => HandlerReply::status_only(0),
            Err(e) => HandlerReply::status_only(e.code()),
        }
    }
}

struct ProfileUpdatedHandler {
    ctx: AutoeventContext,
}

#[async_trait]
impl Handler for ProfileUpdatedHandler {
    async fn handle(&self, request: &[u8], _path: &PathParams, _query: &QueryParams) -> HandlerReply {
        let doc: crate::definitions::ProfileDoc = match serde_json::from_slice(request) {
            Ok(d) => d,
            Err(e) => return HandlerReply::status_only(device_svc_api::Error::BadRequest(e.to_string()).code()),
        };

        let profile = match doc.into_profile() {
            Ok(p) => p,
            Err(e) => return HandlerReply::status_only(e.code()),
        };

        match callbacks::profile_updated(&self.ctx, profile).await {
            Ok(()) => HandlerReply::status_only(0),
            Err(e) => HandlerReply::status_only(e.code()),
        }
    }
}

struct ServiceAdminStateHandler {
    ctx: AutoeventContext,
}

#[derive(serde_derive::Deserialize)]
struct AdminStateDto {
    #[serde(rename = "adminState")]
    admin_state: String,
}

#[async_trait]
impl Handler for ServiceAdminStateHandler {
    async fn handle(&self, request: &[u8], _path: &PathParams, _query: &QueryParams) -> HandlerReply {
        let dto: AdminStateDto = match serde_json::from_slice(request) {
            Ok(d) => d,
            Err(e) => return HandlerReply::status_only(device_svc_api::Error::BadRequest(e.to_string()).code()),
        };

        let admin_state = match AdminState::from_str(&dto.admin_state) {
            Ok(s) => s,
            Err(e) => return HandlerReply::status_only(e.code()),
        };

        match callbacks::service_admin_state_changed(&self.ctx, admin_state).await {
            Ok(()) => HandlerReply::status_only(0),
            Err(e) => HandlerReply::status_only(e.code()),
        }
    }
}

#[derive(Clone, Copy)]
enum ProvisionWatcherOp {
    Upsert,
    Delete,
}

struct ProvisionWatcherHandler {
    watchers: Arc<WatcherList>,
    op: ProvisionWatcherOp,
}

#[derive(serde_derive::Deserialize)]
struct ProvisionWatcherDto {
    name: String,
    #[serde(default, rename = "adminState")]
    admin_state: String,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    identifiers: HashMap<String, String>,
    #[serde(default, rename = "blockingIdentifiers")]
    blocking_identifiers: HashMap<String, Vec<String>>,
    #[serde(rename = "profileName")]
    profile_name: String,
}

fn default_true() -> bool {
    true
}

#[async_trait]
impl Handler for ProvisionWatcherHandler {
    async fn handle(&self, request: &[u8], path: &PathParams, _query: &QueryParams) -> HandlerReply {
        match self.op {
            ProvisionWatcherOp::Delete => {
                let Some(name) = path.get("name") else {
                    return HandlerReply::status_only(device_svc_api::Error::BadRequest("missing name path parameter".into()).code());
                };
                match callbacks::provision_watcher_deleted(&self.watchers, name).await {
                    Ok(()) => HandlerReply::status_only(0),
                    Err(e) => HandlerReply::status_only(e.code()),
                }
            }
            ProvisionWatcherOp::Upsert => {
                let dto: ProvisionWatcherDto = match serde_json::from_slice(request) {
                    Ok(d) => d,
                    Err(e) => return HandlerReply::status_only(device_svc_api::Error::BadRequest(e.to_string()).code()),
                };

                let admin_state = if dto.admin_state.is_empty() {
                    Ok(AdminState::Unlocked)
                } else {
                    AdminState::from_str(&dto.admin_state)
                };

                let watcher = admin_state.and_then(|admin_state| {
                    let name = Name::create(&dto.name)?;
                    let profile_name = Name::create(&dto.profile_name)?;
                    device_svc_api::provision::ProvisionWatcher::new(
                        name,
                        admin_state,
                        dto.enabled,
                        dto.identifiers,
                        dto.blocking_identifiers,
                        profile_name,
                        Vec::new(),
                    )
                });

                match watcher {
                    Ok(w) => match callbacks::provision_watcher_added(&self.watchers, w).await {
                        Ok(()) => HandlerReply::status_only(0),
                        Err(e) => HandlerReply::status_only(e.code()),
                    },
                    Err(e) => HandlerReply::status_only(e.code()),
                }
            }
        }
    }
}

/// Registers every topic this service answers on, in most-specific-
/// first order (spec §4.8 "more specific templates registered before
/// general ones").
pub async fn register_all(dispatcher: &Dispatcher, ctx: &AutoeventContext, watchers: Arc<WatcherList>, base_topic_prefix: &str, service_name: &str) {
    let prefix = base_topic_prefix.trim_end_matches('/');

    dispatcher
        .register(&format!("{}/device/command/request/{}/{{name}}/{{cmd}}", prefix, service_name), Arc::new(CommandHandler { ctx: ctx.clone() }))
        .await;

    dispatcher.register("system-events/core-metadata/device/add", Arc::new(DeviceAddedHandler { ctx: ctx.clone() })).await;
    dispatcher.register("system-events/core-metadata/device/update", Arc::new(DeviceUpdatedHandler { ctx: ctx.clone() })).await;
    dispatcher
        .register("system-events/core-metadata/device/delete/{name}", Arc::new(DeviceDeletedHandler { ctx: ctx.clone() }))
        .await;
    dispatcher
        .register("system-events/core-metadata/deviceprofile/update", Arc::new(ProfileUpdatedHandler { ctx: ctx.clone() }))
        .await;
    dispatcher
        .register("system-events/core-metadata/deviceservice/update", Arc::new(ServiceAdminStateHandler { ctx: ctx.clone() }))
        .await;

    dispatcher
        .register(
            "system-events/core-metadata/provisionwatcher/add",
            Arc::new(ProvisionWatcherHandler { watchers: watchers.clone(), op: ProvisionWatcherOp::Upsert }),
        )
        .await;
    dispatcher
        .register(
            "system-events/core-metadata/provisionwatcher/update",
            Arc::new(ProvisionWatcherHandler { watchers: watchers.clone(), op: ProvisionWatcherOp::Upsert }),
        )
        .await;
    dispatcher
        .register(
            "system-events/core-metadata/provisionwatcher/delete/{name}",
            Arc::new(ProvisionWatcherHandler { watchers, op: ProvisionWatcherOp::Delete }),
        )
        .await;
}
