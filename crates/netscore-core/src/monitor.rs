//! # Change Monitors
//!
//! Two independent watchers that trigger a rebind evaluation:
//!
//! - [`PackageMonitor`] watches install/remove/update/force-stop events for
//!   a fixed list of candidate scorer packages.
//! - [`SettingsObserver`] watches the system-wide recommendations setting.
//!
//! Monitors hold only a weak reference to their [`BindingEvaluator`], so a
//! torn-down service is never kept alive by a late event. [`MonitorSet`]
//! owns the currently registered monitors; replacing the package monitor
//! (on user unlock) swaps it atomically under its own lock.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use netscore_common::protocol::PackageEvent;

/// Name of the setting the [`SettingsObserver`] watches.
pub const RECOMMENDATIONS_ENABLED_SETTING: &str = "network_recommendations_enabled";

/// Receives the rebind triggers produced by the monitors.
pub trait BindingEvaluator: Send + Sync {
    /// A watched candidate package changed. `force_disconnect` asks for any
    /// existing binding to the package to be dropped before rebinding.
    fn on_candidate_package_event(&self, package: &str, force_disconnect: bool);
    fn on_setting_changed(&self);
}

/// Packages an event concerns, each paired with its force-disconnect flag.
///
/// Adds, removals and finished updates replace the package's code, so the
/// binding is always dropped. A plain modification (e.g. a component being
/// enabled) only needs the binding re-checked. A force-stop that was merely
/// queried touches nothing.
pub fn rebind_triggers(event: &PackageEvent) -> Vec<(&str, bool)> {
    match event {
        PackageEvent::Added { package }
        | PackageEvent::Removed { package }
        | PackageEvent::UpdateFinished { package } => vec![(package.as_str(), true)],
        PackageEvent::Modified { package } => vec![(package.as_str(), false)],
        PackageEvent::ForceStopped { packages, executed } => {
            if *executed {
                packages.iter().map(|p| (p.as_str(), true)).collect()
            } else {
                Vec::new()
            }
        }
    }
}

/// Watches a fixed set of candidate scorer packages.
pub struct PackageMonitor {
    packages: Vec<String>,
    target: Weak<dyn BindingEvaluator>,
}

impl PackageMonitor {
    pub fn new(packages: Vec<String>, target: Weak<dyn BindingEvaluator>) -> Self {
        Self { packages, target }
    }

    pub fn packages(&self) -> &[String] {
        &self.packages
    }

    pub fn watches(&self, package: &str) -> bool {
        self.packages.iter().any(|p| p == package)
    }

    /// Forward `event` for every watched package it concerns.
    ///
    /// Returns the number of evaluations triggered.
    pub fn handle(&self, event: &PackageEvent) -> usize {
        let Some(target) = self.target.upgrade() else {
            return 0;
        };
        let mut triggered = 0;
        for (package, force) in rebind_triggers(event) {
            if !self.watches(package) {
                continue;
            }
            tracing::debug!(package, force_disconnect = force, "evaluating scorer binding");
            target.on_candidate_package_event(package, force);
            triggered += 1;
        }
        triggered
    }
}

/// Watches the recommendations-enabled setting.
pub struct SettingsObserver {
    target: Weak<dyn BindingEvaluator>,
}

impl SettingsObserver {
    pub fn new(target: Weak<dyn BindingEvaluator>) -> Self {
        Self { target }
    }

    pub fn setting(&self) -> &'static str {
        RECOMMENDATIONS_ENABLED_SETTING
    }

    pub fn on_change(&self) -> bool {
        let Some(target) = self.target.upgrade() else {
            return false;
        };
        tracing::debug!(setting = self.setting(), "setting changed");
        target.on_setting_changed();
        true
    }
}

/// The monitors currently registered by a service.
#[derive(Default)]
pub struct MonitorSet {
    packages: Mutex<Option<Arc<PackageMonitor>>>,
    settings: Mutex<Option<Arc<SettingsObserver>>>,
}

impl MonitorSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn packages_lock(&self) -> MutexGuard<'_, Option<Arc<PackageMonitor>>> {
        self.packages.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn settings_lock(&self) -> MutexGuard<'_, Option<Arc<SettingsObserver>>> {
        self.settings.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the package monitor with one watching `candidates`.
    ///
    /// With no candidates the old monitor is dropped and none replaces it.
    pub fn register_package_monitor(
        &self,
        candidates: Vec<String>,
        target: Weak<dyn BindingEvaluator>,
    ) -> bool {
        let mut slot = self.packages_lock();
        if let Some(old) = slot.take() {
            tracing::debug!(packages = ?old.packages(), "unregistered package monitor");
        }
        if candidates.is_empty() {
            return false;
        }
        tracing::debug!(packages = ?candidates, "registered package monitor");
        *slot = Some(Arc::new(PackageMonitor::new(candidates, target)));
        true
    }

    /// Register the settings observer unless one already exists.
    pub fn register_settings_observer(&self, target: Weak<dyn BindingEvaluator>) -> bool {
        let mut slot = self.settings_lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(Arc::new(SettingsObserver::new(target)));
        tracing::debug!(setting = RECOMMENDATIONS_ENABLED_SETTING, "registered settings observer");
        true
    }

    /// Deliver a package event to the registered monitor, if any.
    pub fn dispatch_package_event(&self, event: &PackageEvent) -> usize {
        let monitor = self.packages_lock().clone();
        monitor.map_or(0, |m| m.handle(event))
    }

    /// Deliver a setting change to the registered observer, if any.
    pub fn dispatch_setting_change(&self) -> bool {
        let observer = self.settings_lock().clone();
        observer.is_some_and(|o| o.on_change())
    }

    pub fn watched_packages(&self) -> Vec<String> {
        self.packages_lock()
            .as_ref()
            .map(|m| m.packages().to_vec())
            .unwrap_or_default()
    }

    pub fn has_settings_observer(&self) -> bool {
        self.settings_lock().is_some()
    }

    pub fn clear(&self) {
        self.packages_lock().take();
        self.settings_lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        packages: Mutex<Vec<(String, bool)>>,
        settings: Mutex<usize>,
    }

    impl BindingEvaluator for Recorder {
        fn on_candidate_package_event(&self, package: &str, force_disconnect: bool) {
            self.packages
                .lock()
                .unwrap()
                .push((package.to_string(), force_disconnect));
        }
        fn on_setting_changed(&self) {
            *self.settings.lock().unwrap() += 1;
        }
    }

    fn weak(r: &Arc<Recorder>) -> Weak<dyn BindingEvaluator> {
        let w: Weak<Recorder> = Arc::downgrade(r);
        w
    }

    #[test]
    fn trigger_flags_per_event_kind() {
        let pkg = || "p".to_string();
        assert_eq!(rebind_triggers(&PackageEvent::Added { package: pkg() }), vec![("p", true)]);
        assert_eq!(rebind_triggers(&PackageEvent::Removed { package: pkg() }), vec![("p", true)]);
        assert_eq!(
            rebind_triggers(&PackageEvent::UpdateFinished { package: pkg() }),
            vec![("p", true)]
        );
        assert_eq!(
            rebind_triggers(&PackageEvent::Modified { package: pkg() }),
            vec![("p", false)]
        );
        assert!(
            rebind_triggers(&PackageEvent::ForceStopped {
                packages: vec![pkg()],
                executed: false
            })
            .is_empty()
        );
    }

    #[test]
    fn package_monitor_ignores_unwatched_packages() {
        let rec = Arc::new(Recorder::default());
        let monitor = PackageMonitor::new(vec!["scorer".into()], weak(&rec));

        let n = monitor.handle(&PackageEvent::ForceStopped {
            packages: vec!["other".into(), "scorer".into()],
            executed: true,
        });
        assert_eq!(n, 1);
        assert_eq!(*rec.packages.lock().unwrap(), vec![("scorer".to_string(), true)]);
    }

    #[test]
    fn monitors_do_not_outlive_target() {
        let rec = Arc::new(Recorder::default());
        let monitor = PackageMonitor::new(vec!["scorer".into()], weak(&rec));
        let observer = SettingsObserver::new(weak(&rec));
        drop(rec);

        assert_eq!(
            monitor.handle(&PackageEvent::Removed {
                package: "scorer".into()
            }),
            0
        );
        assert!(!observer.on_change());
    }

    #[test]
    fn registering_package_monitor_replaces_previous() {
        let rec = Arc::new(Recorder::default());
        let set = MonitorSet::new();

        assert!(set.register_package_monitor(vec!["a".into()], weak(&rec)));
        assert!(set.register_package_monitor(vec!["b".into()], weak(&rec)));
        assert_eq!(set.watched_packages(), vec!["b".to_string()]);

        set.dispatch_package_event(&PackageEvent::Modified { package: "a".into() });
        set.dispatch_package_event(&PackageEvent::Modified { package: "b".into() });
        assert_eq!(*rec.packages.lock().unwrap(), vec![("b".to_string(), false)]);

        // No candidates leaves nothing registered.
        assert!(!set.register_package_monitor(Vec::new(), weak(&rec)));
        assert!(set.watched_packages().is_empty());
    }

    #[test]
    fn settings_observer_registers_once() {
        let rec = Arc::new(Recorder::default());
        let set = MonitorSet::new();
        assert!(!set.dispatch_setting_change());

        assert!(set.register_settings_observer(weak(&rec)));
        assert!(!set.register_settings_observer(weak(&rec)));
        assert!(set.dispatch_setting_change());
        assert_eq!(*rec.settings.lock().unwrap(), 1);
    }
}
