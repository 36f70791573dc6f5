//! Opcode Dispatch
//!
//! Routes inbound frames to listeners keyed by their opcode byte. Several
//! listeners may share an opcode. Frames with no listener, including bytes
//! outside the known opcode table, go to a diagnostic path that only logs.
//!
//! The registry is owned by the session task, so it is only ever touched by
//! one writer and needs no locking.

use crate::domain::models::{AppEvent, GlassesAppState, MessageSeverity, PeripheralId, Side, StatusMessage, WearState};
use crate::domain::store::GlassesStore;
use crate::infrastructure::bluetooth::protocol::checksum::verify_crc_response;
use crate::infrastructure::bluetooth::protocol::config::HeadsUpMode;
use crate::infrastructure::bluetooth::protocol::device::{decode_notification_setting, DeviceEvent, MicResponse};
use crate::infrastructure::bluetooth::protocol::info::{
    decode_ascii_payload, decode_battery, decode_heads_up_angle, BrightnessState, DashPosition, DeviceSerial,
    ErrorReport, GlassesStateReport,
};
use crate::infrastructure::bluetooth::protocol::{decode_status, hex, ResponseStatus, Opcode};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// Bytes seen from the glasses whose meaning is not known. Logged quietly.
const UNDOCUMENTED_OPCODES: [u8; 8] = [0x14, 0x22, 0x2A, 0x39, 0x3A, 0x3E, 0x3F, 0x50];

/// Everything a listener gets for one inbound frame.
pub struct ListenerContext<'a> {
    pub peripheral: &'a PeripheralId,
    /// The raw frame, opcode byte included.
    pub data: &'a [u8],
    pub side: Side,
    pub store: &'a GlassesStore,
    pub events: &'a mpsc::UnboundedSender<AppEvent>,
    /// Complete payload when this frame finished a chunked transfer.
    pub reassembled: Option<&'a [u8]>,
}

impl ListenerContext<'_> {
    fn emit(&self, event: AppEvent) {
        let _ = self.events.send(event);
    }

    fn status(&self) -> ResponseStatus {
        decode_status(self.data).unwrap_or(ResponseStatus::Failure)
    }

    fn log_failure(&self, what: &str) {
        if self.status() == ResponseStatus::Failure {
            warn!("{} failed on {} ({}): {}", what, self.side, self.peripheral, hex(self.data));
        }
    }
}

pub type Listener = Box<dyn Fn(&ListenerContext<'_>) + Send + Sync>;

/// Handle returned by [`ListenerRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription {
    opcode: Opcode,
    id: u64,
}

impl Subscription {
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }
}

/// What happened to a dispatched frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Delivered to this many listeners.
    Delivered(usize),
    /// Known opcode, but nobody is listening.
    NoListeners(Opcode),
    /// Byte outside the opcode table.
    Unknown(u8),
    Empty,
}

#[derive(Default)]
pub struct ListenerRegistry {
    listeners: HashMap<Opcode, Vec<(u64, Listener)>>,
    next_id: u64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry populated with [`default_listeners`].
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for (opcode, listener) in default_listeners() {
            registry.register(opcode, listener);
        }
        registry
    }

    pub fn register(&mut self, opcode: Opcode, listener: Listener) -> Subscription {
        let id = self.next_id;
        self.next_id += 1;
        self.listeners.entry(opcode).or_default().push((id, listener));
        Subscription { opcode, id }
    }

    /// Returns false if the subscription was already gone.
    pub fn unsubscribe(&mut self, subscription: Subscription) -> bool {
        let Some(list) = self.listeners.get_mut(&subscription.opcode) else {
            return false;
        };
        let before = list.len();
        list.retain(|(id, _)| *id != subscription.id);
        before != list.len()
    }

    pub fn listener_count(&self, opcode: Opcode) -> usize {
        self.listeners.get(&opcode).map_or(0, Vec::len)
    }

    pub fn dispatch(&self, ctx: &ListenerContext<'_>) -> DispatchOutcome {
        let Some(&byte) = ctx.data.first() else {
            return DispatchOutcome::Empty;
        };
        let Some(opcode) = Opcode::from_byte(byte) else {
            log_unknown(ctx, byte);
            return DispatchOutcome::Unknown(byte);
        };
        match self.listeners.get(&opcode) {
            Some(list) if !list.is_empty() => {
                for (_, listener) in list {
                    listener(ctx);
                }
                DispatchOutcome::Delivered(list.len())
            }
            _ => {
                debug!("No listeners for {:?} from {}: {}", opcode, ctx.side, hex(ctx.data));
                DispatchOutcome::NoListeners(opcode)
            }
        }
    }
}

fn log_unknown(ctx: &ListenerContext<'_>, byte: u8) {
    if UNDOCUMENTED_OPCODES.contains(&byte) {
        trace!("Undocumented {:#04x} from {}: {}", byte, ctx.side, hex(ctx.data));
    } else {
        debug!(
            "Unknown opcode {:#04x} from {} ({}): {} {:?}",
            byte,
            ctx.side,
            ctx.peripheral,
            hex(ctx.data),
            ctx.data.get(1..).and_then(crate::infrastructure::bluetooth::protocol::ascii)
        );
    }
}

fn listener(f: impl Fn(&ListenerContext<'_>) + Send + Sync + 'static) -> Listener {
    Box::new(f)
}

/// One listener for every opcode the glasses can emit, built once at startup.
pub fn default_listeners() -> Vec<(Opcode, Listener)> {
    vec![
        // Info responses
        (
            Opcode::Error,
            listener(|ctx| {
                if let Some(report) = ErrorReport::decode(ctx.data) {
                    warn!(
                        "Glasses error {:#04x} from {}: {}",
                        report.code,
                        ctx.side,
                        report.message.as_deref().unwrap_or("<>")
                    );
                }
            }),
        ),
        (
            Opcode::BrightnessState,
            listener(|ctx| {
                if let Some(state) = BrightnessState::decode(ctx.data) {
                    ctx.store.update(|s| {
                        s.brightness = state.level;
                        s.auto_brightness = state.auto;
                    });
                }
            }),
        ),
        (
            Opcode::DashPosition,
            listener(|ctx| {
                if let Some(position) = DashPosition::decode(ctx.data) {
                    ctx.store.update(|s| {
                        s.dash_vertical = position.vertical;
                        s.dash_distance = position.distance;
                    });
                }
            }),
        ),
        (
            Opcode::HeadsUp,
            listener(|ctx| {
                if let Some(angle) = decode_heads_up_angle(ctx.data) {
                    ctx.store.update(|s| s.heads_up_angle = angle);
                }
            }),
        ),
        (
            Opcode::Battery,
            listener(|ctx| match decode_battery(ctx.data) {
                Some(level) => ctx.store.set_battery(ctx.side, level),
                None => debug!("Battery {}: {}", ctx.side, hex(ctx.data)),
            }),
        ),
        (
            Opcode::GlassesState,
            listener(|ctx| {
                // The right earpiece reports stale state.
                if ctx.side != Side::Left {
                    return;
                }
                let Some(report) = GlassesStateReport::decode(ctx.data) else {
                    return;
                };
                if report.powered_on {
                    info!("Glasses turned on");
                }
                match report.wear {
                    Some(wear) => ctx.store.update(|s| s.wear_state = wear),
                    None if !report.powered_on => debug!("Unknown glasses state: {}", hex(ctx.data)),
                    None => {}
                }
                match report.silent_mode {
                    Some(silent) => ctx.store.update(|s| s.silent_mode = silent),
                    None => debug!("Unknown silent mode state: {}", hex(ctx.data)),
                }
            }),
        ),
        (Opcode::FirmwareInfo, listener(|_| {})),
        (
            Opcode::FirmwareInfoRes,
            listener(|ctx| {
                if let Some(text) = decode_ascii_payload(ctx.data) {
                    info!("Firmware {}: {}", ctx.side, text);
                    ctx.store.update(|s| s.firmware = Some(text));
                }
            }),
        ),
        (
            Opcode::LensSerialNumber,
            listener(|ctx| {
                let serial = decode_ascii_payload(ctx.data);
                info!("Lens serial number {}: {:?}", ctx.side, serial);
                if let Some(serial) = serial {
                    ctx.store.update(|s| s.lens_serial = Some(serial));
                }
            }),
        ),
        (
            Opcode::DeviceSerialNumber,
            listener(|ctx| {
                if let Some(serial) = DeviceSerial::decode(ctx.data) {
                    info!("Frame {:?}, colour {:?}", serial.shape, serial.colour);
                    ctx.store.update(|s| s.device_serial = Some(serial.serial));
                }
            }),
        ),
        (Opcode::Uptime, listener(|ctx| trace!("Uptime {}: {}", ctx.side, hex(ctx.data)))),
        // Config acknowledgements
        (Opcode::Brightness, listener(|ctx| ctx.log_failure("Brightness"))),
        (Opcode::SilentMode, listener(|ctx| ctx.log_failure("Silent mode"))),
        (Opcode::WearDetection, listener(|_| {})),
        (Opcode::DashMode, listener(|ctx| trace!("Dash mode ack {}: {}", ctx.side, hex(ctx.data)))),
        (Opcode::HeadTilt, listener(|ctx| ctx.log_failure("Head tilt"))),
        (Opcode::DashConfig, listener(|_| {})),
        (
            Opcode::HeadsUpConfig,
            listener(|ctx| {
                if let Some(mode) = HeadsUpMode::from_response(ctx.data) {
                    ctx.store.update(|s| s.heads_up_dashboard = mode == HeadsUpMode::Dashboard);
                }
            }),
        ),
        (
            Opcode::NotifSetting,
            listener(|ctx| {
                let Some(payload) = ctx.reassembled else {
                    return;
                };
                match decode_notification_setting(payload) {
                    Ok(Some(app)) => {
                        info!("Notification app added: {} ({})", app.display_name, app.app_identifier);
                        ctx.store.add_notification_app(app.clone());
                        ctx.emit(AppEvent::NotificationAppAdded(app));
                    }
                    Ok(None) => debug!("Notification setting from {}: {}", ctx.side, String::from_utf8_lossy(payload)),
                    Err(e) => warn!("Bad notification setting payload: {}", e),
                }
            }),
        ),
        // Device acknowledgements and events
        (Opcode::AddNotif, listener(|ctx| ctx.log_failure("Add notification"))),
        (Opcode::Navigate, listener(|ctx| ctx.store.update(|s| s.app_state = Some(GlassesAppState::Navigation)))),
        (
            Opcode::Mic,
            listener(|ctx| {
                if let Some(resp) = MicResponse::decode(ctx.data) {
                    info!("Mic success: {}, enabled: {}", resp.status.is_success(), resp.enabled);
                    if resp.status.is_success() {
                        ctx.store.update(|s| s.mic_enabled = resp.enabled);
                    }
                }
            }),
        ),
        // Audio streaming is not decoded.
        (Opcode::MicData, listener(|_| {})),
        (
            Opcode::Crc,
            listener(|ctx| {
                match verify_crc_response(ctx.data) {
                    Ok(()) => info!("Bitmap CRC accepted by {}", ctx.side),
                    Err(e) => {
                        warn!("Bitmap transfer to {} failed: {}", ctx.side, e);
                        ctx.emit(AppEvent::TransferFailed(ctx.side, e));
                        ctx.emit(AppEvent::LogMessage(StatusMessage::new(
                            format!("Image transfer failed on {} side", ctx.side),
                            MessageSeverity::Error,
                        )));
                    }
                }
            }),
        ),
        (Opcode::Notes, listener(|_| {})),
        (Opcode::Bmp, listener(|_| {})),
        (
            Opcode::BmpDone,
            listener(|ctx| {
                debug!("Bitmap done on {}, success: {}", ctx.side, ctx.status().is_success());
                ctx.store.update(|s| s.app_state = Some(GlassesAppState::Bmp));
            }),
        ),
        (
            Opcode::Notif,
            listener(|ctx| {
                // 0xCB is returned for accepted notifications too.
                let accepted = matches!(ctx.data.get(1), Some(&ResponseStatus::SUCCESS | &ResponseStatus::FAILURE));
                debug!("Notification on {}, accepted: {}", ctx.side, accepted);
            }),
        ),
        (Opcode::Heartbeat, listener(|_| {})),
        (Opcode::NotifConfig, listener(|ctx| ctx.log_failure("Notification config"))),
        (Opcode::Ping, listener(|ctx| debug!("Ping {}: {}", ctx.side, hex(ctx.data)))),
        (Opcode::Text, listener(|ctx| ctx.store.update(|s| s.app_state = Some(GlassesAppState::Text)))),
        (Opcode::Teleprompter, listener(|_| {})),
        (Opcode::Exit, listener(|ctx| ctx.store.update(|s| s.app_state = None))),
        (Opcode::Device, listener(on_device_event)),
    ]
}

fn on_device_event(ctx: &ListenerContext<'_>) {
    let Some(event) = DeviceEvent::decode(ctx.data) else {
        debug!("Short device event from {}: {}", ctx.side, hex(ctx.data));
        return;
    };
    match event {
        DeviceEvent::SingleTap | DeviceEvent::DoubleTap | DeviceEvent::LookUp | DeviceEvent::LookDown => {
            info!("{:?} on {}", event, ctx.side);
        }
        DeviceEvent::TripleTapSilent => ctx.store.update(|s| s.silent_mode = true),
        DeviceEvent::TripleTapNormal => ctx.store.update(|s| s.silent_mode = false),
        DeviceEvent::DashShown => ctx.store.update(|s| s.app_state = Some(GlassesAppState::Dash)),
        DeviceEvent::DashHide => ctx.store.update(|s| {
            if s.app_state == Some(GlassesAppState::Dash) {
                s.app_state = None;
            }
        }),
        DeviceEvent::CaseOpen => ctx.store.update(|s| s.wear_state = WearState::CaseOpen),
        DeviceEvent::CaseClose => ctx.store.update(|s| s.wear_state = WearState::CaseClosed),
        DeviceEvent::WearOn => ctx.store.update(|s| s.wear_state = WearState::Wearing),
        DeviceEvent::WearOff => ctx.store.update(|s| s.wear_state = WearState::Off),
        DeviceEvent::CaseCharging(charging) => ctx.store.update(|s| s.case_charging = charging),
        DeviceEvent::CaseBattery(level) => ctx.store.update(|s| s.case_battery = Some(level)),
        DeviceEvent::Charging(charging) => ctx.store.update(|s| s.charging = charging),
        // 0x0A, 0x11 and 0x12 show up regularly; their meaning is unknown.
        DeviceEvent::Unknown(0x0A | 0x11 | 0x12) => {}
        DeviceEvent::Unknown(code) => debug!("Unknown device event {:#04x} from {}: {}", code, ctx.side, hex(ctx.data)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::ProtocolError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Harness {
        peripheral: PeripheralId,
        store: GlassesStore,
        tx: mpsc::UnboundedSender<AppEvent>,
        rx: mpsc::UnboundedReceiver<AppEvent>,
    }

    impl Harness {
        fn new() -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            Self {
                peripheral: PeripheralId::new("left"),
                store: GlassesStore::new(),
                tx,
                rx,
            }
        }

        fn dispatch(&self, registry: &ListenerRegistry, data: &[u8], side: Side) -> DispatchOutcome {
            self.dispatch_with(registry, data, side, None)
        }

        fn dispatch_with(
            &self,
            registry: &ListenerRegistry,
            data: &[u8],
            side: Side,
            reassembled: Option<&[u8]>,
        ) -> DispatchOutcome {
            registry.dispatch(&ListenerContext {
                peripheral: &self.peripheral,
                data,
                side,
                store: &self.store,
                events: &self.tx,
                reassembled,
            })
        }
    }

    #[test]
    fn test_every_opcode_has_a_listener() {
        let registry = ListenerRegistry::with_defaults();
        for opcode in Opcode::ALL {
            assert!(registry.listener_count(opcode) > 0, "no listener for {:?}", opcode);
        }
    }

    #[test]
    fn test_multiple_listeners_and_unsubscribe() {
        let mut registry = ListenerRegistry::with_defaults();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let sub = registry.register(
            Opcode::Battery,
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let h = Harness::new();
        let frame = [0x2C, 0x66, 0x50];
        assert_eq!(h.dispatch(&registry, &frame, Side::Right), DispatchOutcome::Delivered(2));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(h.store.snapshot().right_battery, Some(0x50));

        assert!(registry.unsubscribe(sub));
        assert!(!registry.unsubscribe(sub));
        assert_eq!(h.dispatch(&registry, &frame, Side::Right), DispatchOutcome::Delivered(1));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unknown_path_is_non_fatal() {
        let registry = ListenerRegistry::with_defaults();
        let h = Harness::new();
        assert_eq!(h.dispatch(&registry, &[0x3E, 0xC9], Side::Right), DispatchOutcome::Unknown(0x3E));
        assert_eq!(h.dispatch(&registry, &[0x99], Side::Left), DispatchOutcome::Unknown(0x99));
        assert_eq!(h.dispatch(&registry, &[], Side::Left), DispatchOutcome::Empty);

        let empty = ListenerRegistry::new();
        assert_eq!(
            h.dispatch(&empty, &[0x2C, 0x66, 0x10], Side::Left),
            DispatchOutcome::NoListeners(Opcode::Battery)
        );
    }

    #[test]
    fn test_glasses_state_left_only() {
        let registry = ListenerRegistry::with_defaults();
        let h = Harness::new();
        h.dispatch(&registry, &[0x2B, 0x69, 0x0C, 0x06], Side::Right);
        assert_eq!(h.store.snapshot().wear_state, WearState::Off);

        h.dispatch(&registry, &[0x2B, 0x69, 0x0C, 0x06], Side::Left);
        let snapshot = h.store.snapshot();
        assert_eq!(snapshot.wear_state, WearState::Wearing);
        assert!(snapshot.silent_mode);
    }

    #[test]
    fn test_device_events_update_store() {
        let registry = ListenerRegistry::with_defaults();
        let h = Harness::new();
        h.dispatch(&registry, &[0xF5, 0x1E], Side::Left);
        assert_eq!(h.store.snapshot().app_state, Some(GlassesAppState::Dash));
        h.dispatch(&registry, &[0xF5, 0x1F], Side::Left);
        assert_eq!(h.store.snapshot().app_state, None);
        h.dispatch(&registry, &[0xF5, 0x0F, 0x46], Side::Right);
        assert_eq!(h.store.snapshot().case_battery, Some(0x46));
    }

    #[test]
    fn test_crc_failure_emits_transfer_failed() {
        let registry = ListenerRegistry::with_defaults();
        let mut h = Harness::new();
        let rejected = [0x16, 0xC2, 0x8F, 0x41, 0x43, 0xCA];
        h.dispatch(&registry, &rejected, Side::Right);
        match h.rx.try_recv() {
            Ok(AppEvent::TransferFailed(side, error)) => {
                assert_eq!(side, Side::Right);
                assert_eq!(error, ProtocolError::ChecksumFailure(rejected.to_vec()));
            }
            other => panic!("expected a failed transfer, got {:?}", other),
        }

        h.dispatch(&registry, &[0x16, 0xC2, 0x8F, 0x41, 0x43, 0xC9], Side::Left);
        assert!(matches!(h.rx.try_recv(), Ok(AppEvent::LogMessage(_))));
        assert!(h.rx.try_recv().is_err());
    }

    #[test]
    fn test_notification_setting_needs_complete_payload() {
        let registry = ListenerRegistry::with_defaults();
        let mut h = Harness::new();
        h.dispatch(&registry, &[0xF6, 0x02, 0x00, b'{'], Side::Left);
        assert!(h.rx.try_recv().is_err());

        let payload = br#"{"whitelist_app_add":{"app_identifier":"com.x","display_name":"X"}}"#;
        h.dispatch_with(&registry, &[0xF6, 0x02, 0x01, b'}'], Side::Left, Some(payload));
        assert!(matches!(h.rx.try_recv(), Ok(AppEvent::NotificationAppAdded(app)) if app.app_identifier == "com.x"));
        assert_eq!(h.store.snapshot().notification_apps.len(), 1);
    }

    #[test]
    fn test_heads_up_config_response() {
        let registry = ListenerRegistry::with_defaults();
        let h = Harness::new();
        h.dispatch(&registry, &[0x08, 0x06, 0, 0, 0x04, 0x02], Side::Right);
        assert!(!h.store.snapshot().heads_up_dashboard);
    }
}
