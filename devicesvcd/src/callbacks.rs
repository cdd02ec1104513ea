//! Bus-driven callback handlers (spec §4.10): the platform's
//! `core-metadata` system-events topics carry device/profile/watcher
//! lifecycle DTOs whose effect is to mutate the shared `Registry` and
//! `WatcherList`. Each handler is idempotent and re-entrant, per spec.

use crate::autoevent::{self, AutoeventContext};
use crate::provision::WatcherList;
use device_svc_api::device::{AdminState, Device};
use device_svc_api::driver::Driver;
use device_svc_api::provision::ProvisionWatcher;
use device_svc_api::registry::UpsertOutcome;
use device_svc_api::{Error, Result};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{info, warn};

/// `system-events/core-metadata/device/add`: the profile named must
/// already be known (else `BadRequest`); insert and notify the
/// driver.
pub async fn device_added(ctx: &AutoeventContext, device: Device) -> Result<()> {
    let profile = ctx
        .registry
        .get_profile(device.profile_name.as_str())
        .await
        .ok_or_else(|| Error::BadRequest(format!("device {} references unknown profile {}", device.name, device.profile_name)))?;

    let name = device.name.clone();
    let (old, outcome) = ctx.registry.add_or_replace(device, profile).await?;

    if let Some(old_entry) = old {
        autoevent::stop_for_device(&old_entry).await;
    }

    if outcome == UpsertOutcome::Created {
        if let Some(handle) = ctx.registry.acquire_by_name(name.as_str()).await {
            autoevent::start_for_device(ctx, handle.entry(), name.as_str()).await;
            ctx.driver.device_added(&handle.device, &[]).await;
        }
    }

    Ok(())
}

/// `device/update`: replace in place when possible (name, profile,
/// autoevents, and protocol address all unchanged), else a full
/// replace. Autoevents restart whenever the incoming device has any,
/// regardless of which path was taken.
pub async fn device_updated(ctx: &AutoeventContext, device: Device) -> Result<()> {
    let profile = ctx
        .registry
        .get_profile(device.profile_name.as_str())
        .await
        .ok_or_else(|| Error::BadRequest(format!("device {} references unknown profile {}", device.name, device.profile_name)))?;

    let name = device.name.clone();
    let has_autoevents = !device.autoevents.is_empty();
    let (old, outcome) = ctx.registry.add_or_replace(device, profile).await?;

    if let Some(old_entry) = old {
        autoevent::stop_for_device(&old_entry).await;
    }

    if outcome == UpsertOutcome::UpdatedInPlace {
        ctx.driver.device_updated(&ctx.registry.acquire_by_name(name.as_str()).await.expect("just updated").device).await;
    }

    if has_autoevents && matches!(outcome, UpsertOutcome::UpdatedByReplace | UpsertOutcome::Created) {
        if let Some(handle) = ctx.registry.acquire_by_name(name.as_str()).await {
            autoevent::start_for_device(ctx, handle.entry(), name.as_str()).await;
        }
    }

    Ok(())
}

/// `device/delete`: remove by name and notify the driver once
/// teardown (autoevent stop, driver free-callbacks) has run.
pub async fn device_deleted(ctx: &AutoeventContext, name: &str) -> Result<()> {
    if let Some(entry) = ctx.registry.remove_by_name(name).await {
        autoevent::stop_for_device(&entry).await;

        if let Some(handle) = entry.driver_address_handle.read().await.clone() {
            ctx.driver.free_address(&handle).await;
        }

        ctx.driver.device_removed(&entry.device.name).await;
        info!(device = name, "device removed");
    } else {
        warn!(device = name, "device/delete for an unknown device, ignoring");
    }

    Ok(())
}

/// `deviceprofile/update`: install the new profile and relink every
/// device that named the predecessor, then notify the driver.
pub async fn profile_updated(ctx: &AutoeventContext, profile: device_svc_api::device::Profile) -> Result<()> {
    let name = profile.name.clone();
    let new_profile = ctx.registry.add_profile(profile).await;
    ctx.registry.relink_profile(name.as_str(), new_profile).await;
    info!(profile = %name, "profile updated and devices relinked");
    Ok(())
}

/// `deviceservice/update`: transitions the process-wide
/// admin-state flag consulted by the command pipeline. `LOCKED`
/// causes every subsequent command to fail `Locked` regardless of
/// individual device state, and suppresses autoevents from emitting
/// (the autoevent job itself keeps ticking -- it is the pipeline call
/// inside it that now always fails).
pub async fn service_admin_state_changed(ctx: &AutoeventContext, admin_state: AdminState) -> Result<()> {
    let locked = admin_state == AdminState::Locked;
    ctx.pipeline_config.service_locked.store(locked, Ordering::Release);
    info!(locked, "service admin-state changed");
    Ok(())
}

pub async fn provision_watcher_added(watchers: &WatcherList, watcher: ProvisionWatcher) -> Result<()> {
    watchers.upsert(watcher).await;
    Ok(())
}

pub async fn provision_watcher_updated(watchers: &WatcherList, watcher: ProvisionWatcher) -> Result<()> {
    watchers.upsert(watcher).await;
    Ok(())
}

pub async fn provision_watcher_deleted(watchers: &WatcherList, name: &str) -> Result<()> {
    watchers.remove(name).await;
    Ok(())
}
