//! Observable device state shared between the session task and the app.
//!
//! Listeners running on the session task write here; UI-driven callers read
//! snapshots or await changes through a `watch` receiver.

use crate::domain::models::{GlassesAppState, NotificationApp, Side, WearState};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq)]
pub struct GlassesSnapshot {
    pub left_battery: Option<u8>,
    pub right_battery: Option<u8>,
    pub brightness: u8,
    pub auto_brightness: bool,
    pub silent_mode: bool,
    pub heads_up_angle: u8,
    pub heads_up_dashboard: bool,
    pub dash_vertical: u8,
    pub dash_distance: u8,
    pub wear_state: WearState,
    pub app_state: Option<GlassesAppState>,
    pub charging: bool,
    pub case_charging: bool,
    pub case_battery: Option<u8>,
    pub mic_enabled: bool,
    pub firmware: Option<String>,
    pub device_serial: Option<String>,
    pub lens_serial: Option<String>,
    pub notification_apps: Vec<NotificationApp>,
}

impl Default for GlassesSnapshot {
    fn default() -> Self {
        Self {
            left_battery: None,
            right_battery: None,
            brightness: 6,
            auto_brightness: true,
            silent_mode: false,
            heads_up_angle: 30,
            heads_up_dashboard: true,
            dash_vertical: 3,
            dash_distance: 2,
            wear_state: WearState::Off,
            app_state: None,
            charging: false,
            case_charging: false,
            case_battery: None,
            mic_enabled: false,
            firmware: None,
            device_serial: None,
            lens_serial: None,
            notification_apps: Vec::new(),
        }
    }
}

impl GlassesSnapshot {
    pub fn battery(&self, side: Side) -> Option<u8> {
        match side {
            Side::Left => self.left_battery,
            Side::Right => self.right_battery,
        }
    }
}

/// Cheaply cloneable handle to the shared glasses state.
#[derive(Debug, Clone)]
pub struct GlassesStore {
    tx: Arc<watch::Sender<GlassesSnapshot>>,
}

impl GlassesStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(GlassesSnapshot::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> GlassesSnapshot {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<GlassesSnapshot> {
        self.tx.subscribe()
    }

    /// Mutate the state in place; observers are only woken on actual change.
    pub fn update(&self, f: impl FnOnce(&mut GlassesSnapshot)) {
        self.tx.send_if_modified(|state| {
            let before = state.clone();
            f(state);
            *state != before
        });
    }

    pub fn set_battery(&self, side: Side, level: u8) {
        self.update(|s| match side {
            Side::Left => s.left_battery = Some(level),
            Side::Right => s.right_battery = Some(level),
        });
    }

    pub fn add_notification_app(&self, app: NotificationApp) {
        self.update(|s| {
            if !s.notification_apps.contains(&app) {
                s.notification_apps.push(app);
            }
        });
    }

    pub fn reset(&self) {
        self.update(|s| *s = GlassesSnapshot::default());
    }
}

impl Default for GlassesStore {
    fn default() -> Self {
        Self::new()
    }
}
