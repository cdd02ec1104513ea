//! The autoevent scheduler (spec §4.6): one `tokio::time::interval`
//! job per device per autoevent, installed at device insertion and
//! cancelled at device removal or replacement.

use crate::busrpc::publish_event;
use crate::bus::Bus;
use crate::command::{self, PipelineConfig};
use crate::metrics::Metrics;
use device_svc_api::device::DeviceEntry;
use device_svc_api::driver::Driver;
use device_svc_api::event::CookedEvent;
use device_svc_api::registry::Registry;
use device_svc_api::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Everything one autoevent job needs for the lifetime of its loop;
/// cheap to clone since every field is an `Arc` or plain data.
#[derive(Clone)]
pub struct AutoeventContext {
    pub registry: Arc<Registry>,
    pub driver: Arc<dyn Driver>,
    pub bus: Arc<dyn Bus>,
    pub metrics: Arc<Metrics>,
    pub pipeline_config: PipelineConfig,
    pub base_topic_prefix: String,
}

/// Installs one `tokio::spawn`ed job per autoevent on `entry`,
/// recording each job's handle on the entry itself (spec §4.6
/// "device-local mutex" -- `install_autoevent_handle` already
/// serializes against concurrent teardown via its own lock).
pub async fn start_for_device(ctx: &AutoeventContext, entry: &Arc<DeviceEntry>, device_name: &str) {
    for autoevent in entry.device.autoevents.clone() {
        let ctx = ctx.clone();
        let registry = ctx.registry.clone();
        let device_name = device_name.to_string();
        let entry_weak = Arc::downgrade(entry);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(autoevent.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut previous: Option<CookedEvent> = None;

            loop {
                ticker.tick().await;

                if entry_weak.upgrade().is_none() {
                    debug!(device = %device_name, "device entry gone, stopping autoevent job");
                    break;
                }

                let options: HashMap<String, String> =
                    HashMap::from([("ds-pushevent".to_string(), "true".to_string()), ("ds-returnevent".to_string(), "false".to_string())]);

                let outcome = command::run_get(&registry, ctx.driver.as_ref(), &ctx.pipeline_config, &device_name, autoevent.target.as_str(), &options, &[]).await;

                match outcome {
                    Ok(outcome) if outcome.assertion_failed => {
                        debug!(device = %device_name, target = %autoevent.target, "autoevent assertion failed, no event emitted");
                    }
                    Ok(outcome) => {
                        if let Some(event) = outcome.event {
                            let should_publish = if autoevent.on_change {
                                let changed = differs(previous.as_ref(), &event, autoevent.on_change_threshold);
                                previous = Some(event.clone());
                                changed
                            } else {
                                true
                            };

                            if should_publish {
                                publish_event(ctx.bus.as_ref(), ctx.metrics.as_ref(), &ctx.base_topic_prefix, None, &event).await;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(device = %device_name, target = %autoevent.target, error = %e, "autoevent tick failed");
                    }
                }
            }
        });

        entry.install_autoevent_handle(handle).await;
    }
}

/// Aborts and clears every job handle installed on `entry` (spec §4.6
/// "cancelled at device removal"; also used on full replacement,
/// which removes the old entry first).
pub async fn stop_for_device(entry: &Arc<DeviceEntry>) {
    for handle in entry.take_autoevent_handles().await {
        handle.abort();
    }
}

/// Structural on-change comparison (spec §4.6, Open Question 2):
/// numeric readings compare by absolute difference against the
/// threshold; everything else (including vectors and maps) compares
/// for structural equality. Differs if any reading differs, or if
/// there is no previous event to compare against, or if the reading
/// count itself changed.
fn differs(previous: Option<&CookedEvent>, current: &CookedEvent, threshold: f64) -> bool {
    let Some(previous) = previous else {
        return true;
    };

    if previous.readings.len() != current.readings.len() {
        return true;
    }

    previous.readings.iter().zip(current.readings.iter()).any(|(old, new)| reading_differs(&old.value, &new.value, threshold))
}

fn reading_differs(old: &Value, new: &Value, threshold: f64) -> bool {
    match (old.as_f64(), new.as_f64()) {
        (Some(a), Some(b)) => (a - b).abs() >= threshold,
        _ => old != new,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use device_svc_api::device::Name;
    use device_svc_api::event::Reading;

    fn mk_event(value: Value) -> CookedEvent {
        CookedEvent {
            profile: Name::create("p1").unwrap(),
            device: Name::create("d1").unwrap(),
            command: Name::create("temp").unwrap(),
            readings: vec![Reading::new(Name::create("d1").unwrap(), Name::create("p1").unwrap(), Name::create("temp").unwrap(), 0, value)],
            tags: vec![],
        }
    }

    #[test]
    fn test_s5_scenario_on_change_threshold() {
        // driver returns 10.0, 10.5, 12.0 with threshold 1.0 -> emit,
        // skip, emit.
        let first = mk_event(Value::F64(10.0));
        assert!(differs(None, &first, 1.0));

        let second = mk_event(Value::F64(10.5));
        assert!(!differs(Some(&first), &second, 1.0));

        let third = mk_event(Value::F64(12.0));
        assert!(differs(Some(&second), &third, 1.0));
    }

    #[test]
    fn test_string_readings_compare_by_equality() {
        let a = mk_event(Value::String("OPEN".into()));
        let b = mk_event(Value::String("OPEN".into()));
        let c = mk_event(Value::String("CLOSED".into()));

        assert!(!differs(Some(&a), &b, 1.0));
        assert!(differs(Some(&a), &c, 1.0));
    }
}
