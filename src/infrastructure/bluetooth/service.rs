//! Glasses Session
//!
//! One task owns every piece of mutable protocol state: the listener
//! registry, the reassembler, the pairing matcher and both earpiece links.
//! Transport events, application commands and the heartbeat timer are all
//! serialized through its `select!` loop.
//!
//! ```text
//! Idle ─▶ Scanning ─▶ HalfConnected(side) ─▶ Connecting ─▶ ServicesDiscovered
//!                                  Restoring ─┘                   │
//!                                                                 ▼
//!          Idle ◀── both lost ── Disconnected ◀── Active ◀── CharacteristicsReady
//! ```
//!
//! Command encoding happens on the caller's side of [`SessionHandle`] so
//! argument errors come back synchronously; the encoded frames are then
//! queued to the session in order.

use crate::domain::error::{ProtocolError, ProtocolResult};
use crate::domain::models::{
    AppEvent, ConnectionState, KnownGlasses, MessageSeverity, PeripheralId, SessionPhase, Side, StatusMessage,
};
use crate::domain::settings::SessionConfig;
use crate::domain::store::GlassesStore;
use crate::infrastructure::bluetooth::dispatch::{Listener, ListenerContext, ListenerRegistry, Subscription};
use crate::infrastructure::bluetooth::pairing::{PairingMatcher, PairingOutcome};
use crate::infrastructure::bluetooth::protocol::chunk::{Reassembler, NOTIF_SETTING_LAYOUT};
use crate::infrastructure::bluetooth::protocol::command::{BitmapPacing, CommandEncoder, GlassesCommand, InfoQuery};
use crate::infrastructure::bluetooth::protocol::{
    hex, Opcode, OutboundFrame, Target, WriteMode, UART_RX_CHAR_UUID, UART_SERVICE_UUID, UART_TX_CHAR_UUID,
};
use crate::infrastructure::bluetooth::transport::{BleTransport, TransportEvent};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

const SIDES: [Side; 2] = [Side::Left, Side::Right];
/// Shortest heartbeat period the session runs with.
const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(100);

enum SessionCommand {
    StartPairing,
    StopPairing,
    Reconnect(KnownGlasses),
    Write(OutboundFrame),
    Subscribe {
        opcode: Opcode,
        listener: Listener,
        reply: oneshot::Sender<Subscription>,
    },
    Unsubscribe(Subscription),
    Disconnect {
        done: oneshot::Sender<()>,
    },
}

/// Per-earpiece link state.
#[derive(Debug)]
struct Link {
    id: PeripheralId,
    name: String,
    connected: bool,
    service_found: bool,
    tx_ready: bool,
    rx_ready: bool,
}

impl Link {
    fn new(id: PeripheralId, name: String) -> Self {
        Self {
            id,
            name,
            connected: false,
            service_found: false,
            tx_ready: false,
            rx_ready: false,
        }
    }

    fn ready(&self) -> bool {
        self.service_found && self.tx_ready && self.rx_ready
    }

    /// Characteristic handles do not survive a disconnect.
    fn clear(&mut self) {
        self.connected = false;
        self.service_found = false;
        self.tx_ready = false;
        self.rx_ready = false;
    }
}

/// Cloneable front end of a running [`GlassesSession`].
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    encoder: Arc<Mutex<CommandEncoder>>,
    state: watch::Receiver<ConnectionState>,
    phase: watch::Receiver<SessionPhase>,
    store: GlassesStore,
}

impl SessionHandle {
    fn submit(&self, command: SessionCommand) -> ProtocolResult<()> {
        self.commands.send(command).map_err(|_| ProtocolError::SessionClosed)
    }

    /// Encode `command` and queue its frames.
    ///
    /// Only argument errors are returned. Frames for a side without a write
    /// characteristic are dropped by the session and logged; check
    /// [`state`](Self::state) before sending.
    pub async fn send_command(&self, command: GlassesCommand) -> ProtocolResult<()> {
        let frames = {
            let mut encoder = self.encoder.lock().unwrap_or_else(|p| p.into_inner());
            encoder.encode(&command)?
        };
        debug!("Sending {} as {} frame(s)", command.name(), frames.len());
        for frame in frames {
            let pause = frame.pause_after;
            self.submit(SessionCommand::Write(frame))?;
            if let Some(pause) = pause {
                tokio::time::sleep(pause).await;
            }
        }
        Ok(())
    }

    pub async fn subscribe(&self, opcode: Opcode, listener: Listener) -> ProtocolResult<Subscription> {
        let (reply, rx) = oneshot::channel();
        self.submit(SessionCommand::Subscribe {
            opcode,
            listener,
            reply,
        })?;
        rx.await.map_err(|_| ProtocolError::SessionClosed)
    }

    pub fn unsubscribe(&self, subscription: Subscription) -> ProtocolResult<()> {
        self.submit(SessionCommand::Unsubscribe(subscription))
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn phase(&self) -> watch::Receiver<SessionPhase> {
        self.phase.clone()
    }

    pub fn store(&self) -> &GlassesStore {
        &self.store
    }

    /// Scan for an advertising left/right pair and connect the first one found.
    pub fn start_pairing(&self) -> ProtocolResult<()> {
        self.submit(SessionCommand::StartPairing)
    }

    pub fn stop_pairing(&self) -> ProtocolResult<()> {
        self.submit(SessionCommand::StopPairing)
    }

    /// Connect a remembered pair without scanning.
    pub fn reconnect_known(&self, glasses: KnownGlasses) -> ProtocolResult<()> {
        self.submit(SessionCommand::Reconnect(glasses))
    }

    /// Send Exit to both sides, drop both links and return to `Idle`.
    pub async fn disconnect(&self) -> ProtocolResult<()> {
        let (done, rx) = oneshot::channel();
        self.submit(SessionCommand::Disconnect { done })?;
        rx.await.map_err(|_| ProtocolError::SessionClosed)
    }
}

pub struct GlassesSession {
    transport: Arc<dyn BleTransport>,
    config: SessionConfig,
    registry: ListenerRegistry,
    reassembler: Reassembler,
    matcher: PairingMatcher,
    left: Option<Link>,
    right: Option<Link>,
    phase: SessionPhase,
    phase_tx: watch::Sender<SessionPhase>,
    state_tx: watch::Sender<ConnectionState>,
    encoder: Arc<Mutex<CommandEncoder>>,
    store: GlassesStore,
    event_sender: mpsc::UnboundedSender<AppEvent>,
}

impl GlassesSession {
    /// Start the session task.
    ///
    /// `transport_events` must be the receiving end of the channel the
    /// transport reports on. With `known` set and both of its peripherals
    /// among the transport's restored ones, the session reconnects them
    /// right away.
    pub fn spawn(
        transport: Arc<dyn BleTransport>,
        transport_events: mpsc::UnboundedReceiver<TransportEvent>,
        mut config: SessionConfig,
        known: Option<KnownGlasses>,
        event_sender: mpsc::UnboundedSender<AppEvent>,
    ) -> SessionHandle {
        config.heartbeat_interval = config.heartbeat_interval.max(MIN_HEARTBEAT_INTERVAL);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let (phase_tx, phase_rx) = watch::channel(SessionPhase::Idle);
        let encoder = Arc::new(Mutex::new(CommandEncoder::new(BitmapPacing::from(&config))));
        let store = GlassesStore::new();

        let session = GlassesSession {
            transport,
            matcher: PairingMatcher::new(config.name_filter.clone()),
            config,
            registry: ListenerRegistry::with_defaults(),
            reassembler: Reassembler::new(),
            left: None,
            right: None,
            phase: SessionPhase::Idle,
            phase_tx,
            state_tx,
            encoder: encoder.clone(),
            store: store.clone(),
            event_sender,
        };
        tokio::spawn(session.run(commands_rx, transport_events, known));

        SessionHandle {
            commands: commands_tx,
            encoder,
            state: state_rx,
            phase: phase_rx,
            store,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<SessionCommand>,
        mut transport_events: mpsc::UnboundedReceiver<TransportEvent>,
        known: Option<KnownGlasses>,
    ) {
        self.restore(known);

        let period = self.config.heartbeat_interval;
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                event = transport_events.recv() => match event {
                    Some(event) => self.handle_transport_event(event),
                    None => {
                        warn!("Transport event channel closed");
                        break;
                    }
                },
                _ = heartbeat.tick() => self.on_heartbeat(),
            }
        }
        info!("Glasses session stopped");
    }

    fn restore(&mut self, known: Option<KnownGlasses>) {
        let Some(known) = known else {
            return;
        };
        let restored = self.transport.restored_peripherals();
        if restored.contains(&known.left) && restored.contains(&known.right) {
            info!("Restoring {} / {}", known.left_name, known.right_name);
            self.set_phase(SessionPhase::Restoring);
            self.attach(&known);
        }
    }

    fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::StartPairing => self.start_pairing(),
            SessionCommand::StopPairing => self.stop_pairing(),
            SessionCommand::Reconnect(known) => {
                if self.is_attached() {
                    warn!("Already attached to a pair, ignoring reconnect");
                    return;
                }
                self.stop_pairing();
                self.attach(&known);
            }
            SessionCommand::Write(frame) => self.write_frame(&frame),
            SessionCommand::Subscribe {
                opcode,
                listener,
                reply,
            } => {
                let subscription = self.registry.register(opcode, listener);
                let _ = reply.send(subscription);
            }
            SessionCommand::Unsubscribe(subscription) => {
                if !self.registry.unsubscribe(subscription) {
                    debug!("Subscription for {:?} already gone", subscription.opcode());
                }
            }
            SessionCommand::Disconnect { done } => {
                self.disconnect();
                let _ = done.send(());
            }
        }
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Discovered { id, name } => self.on_discovered(id, &name),
            TransportEvent::ConnectedPeripherals { peripherals, .. } => {
                for (id, name) in peripherals {
                    self.on_discovered(id, &name);
                }
            }
            TransportEvent::Connected(id) => {
                let Some(side) = self.side_of(&id) else { return };
                info!("{} earpiece connected ({})", side, id);
                if let Some(link) = self.link_mut(side) {
                    link.connected = true;
                }
                if self.phase == SessionPhase::Disconnected {
                    self.set_phase(SessionPhase::Connecting);
                }
                if let Err(e) = self.transport.discover_services(&id, &[UART_SERVICE_UUID]) {
                    error!("Service discovery on {} failed: {}", side, e);
                }
            }
            TransportEvent::ConnectFailed { id, reason } => {
                let Some(side) = self.side_of(&id) else { return };
                warn!("Connecting {} earpiece failed: {}", side, reason);
                self.send_log(
                    format!("Could not connect {} earpiece: {}", side, reason),
                    MessageSeverity::Warning,
                );
            }
            TransportEvent::ServicesDiscovered { id, services } => {
                let Some(side) = self.side_of(&id) else { return };
                if !services.contains(&UART_SERVICE_UUID) {
                    warn!("{} earpiece does not offer the UART service", side);
                    return;
                }
                if let Some(link) = self.link_mut(side) {
                    link.service_found = true;
                }
                if matches!(self.phase, SessionPhase::Connecting | SessionPhase::Restoring) {
                    self.set_phase(SessionPhase::ServicesDiscovered);
                }
                if let Err(e) = self.transport.discover_characteristics(&id, UART_SERVICE_UUID) {
                    error!("Characteristic discovery on {} failed: {}", side, e);
                }
            }
            TransportEvent::CharacteristicsDiscovered {
                id,
                service,
                characteristics,
            } => {
                if service != UART_SERVICE_UUID {
                    return;
                }
                let Some(side) = self.side_of(&id) else { return };
                self.on_characteristics(side, &id, &characteristics);
            }
            TransportEvent::Disconnected(id) => {
                let Some(side) = self.side_of(&id) else { return };
                self.on_disconnected(side, &id);
            }
            TransportEvent::Notification {
                id,
                characteristic,
                data,
            } => {
                if characteristic != UART_RX_CHAR_UUID {
                    trace!("Ignoring notification on {}", characteristic);
                    return;
                }
                let Some(side) = self.side_of(&id) else {
                    debug!("Notification from unknown peripheral {}", id);
                    return;
                };
                self.handle_inbound(&id, side, &data);
            }
            TransportEvent::WriteFailed { id, reason } => {
                let side = self.side_of(&id).map_or_else(|| id.to_string(), |s| s.to_string());
                error!("Write to {} failed: {}", side, reason);
            }
        }
    }

    fn start_pairing(&mut self) {
        if self.is_attached() {
            warn!("Already attached to a pair; disconnect before pairing again");
            return;
        }
        self.matcher.clear();
        // Glasses paired by another app may already hold an OS-level link
        // and will not advertise.
        if let Err(e) = self.transport.connected_peripherals(UART_SERVICE_UUID) {
            warn!("Could not list connected peripherals: {}", e);
        }
        match self.transport.start_scan(&[]) {
            Ok(()) => {
                self.set_phase(SessionPhase::Scanning);
                self.send_log("Scanning for glasses...", MessageSeverity::Info);
            }
            Err(e) => {
                error!("Failed to start scan: {}", e);
                self.send_log(format!("Scan failed: {}", e), MessageSeverity::Error);
            }
        }
    }

    fn stop_pairing(&mut self) {
        if !self.is_scanning() {
            return;
        }
        if let Err(e) = self.transport.stop_scan() {
            warn!("Failed to stop scan: {}", e);
        }
        self.matcher.clear();
        self.set_phase(SessionPhase::Idle);
    }

    fn on_discovered(&mut self, id: PeripheralId, name: &str) {
        if !self.is_scanning() {
            return;
        }
        match self.matcher.observe(id, name) {
            PairingOutcome::Ignored => {}
            PairingOutcome::HalfFound { side, .. } => self.set_phase(SessionPhase::HalfConnected(side)),
            PairingOutcome::Complete(pair) => {
                if let Err(e) = self.transport.stop_scan() {
                    warn!("Failed to stop scan: {}", e);
                }
                self.send_log(
                    format!("Found glasses on channel {}", pair.channel),
                    MessageSeverity::Info,
                );
                self.attach(&pair.known_glasses());
            }
        }
    }

    /// Take ownership of a left/right pair and connect both sides.
    fn attach(&mut self, glasses: &KnownGlasses) {
        self.left = Some(Link::new(glasses.left.clone(), glasses.left_name.clone()));
        self.right = Some(Link::new(glasses.right.clone(), glasses.right_name.clone()));
        self.set_phase(SessionPhase::Connecting);
        for side in SIDES {
            self.connect_side(side);
        }
    }

    fn connect_side(&self, side: Side) {
        let Some(link) = self.link(side) else { return };
        if let Err(e) = self.transport.connect(&link.id) {
            error!("Connect to {} earpiece failed: {}", side, e);
        }
    }

    fn on_characteristics(&mut self, side: Side, id: &PeripheralId, characteristics: &[uuid::Uuid]) {
        let has_tx = characteristics.contains(&UART_TX_CHAR_UUID);
        let mut has_rx = characteristics.contains(&UART_RX_CHAR_UUID);
        if has_rx {
            if let Err(e) = self.transport.subscribe_notifications(id, UART_RX_CHAR_UUID) {
                error!("Subscribing to {} earpiece failed: {}", side, e);
                has_rx = false;
            }
        }
        let Some(link) = self.link_mut(side) else { return };
        link.tx_ready = has_tx;
        link.rx_ready = has_rx;
        if !link.ready() {
            warn!("{} earpiece is missing UART characteristics (tx: {}, rx: {})", side, has_tx, has_rx);
            return;
        }
        debug!("{} earpiece ready ({})", side, link.name);

        let both_ready = SIDES.iter().all(|s| self.link(*s).is_some_and(Link::ready));
        if both_ready {
            self.become_active();
        } else if matches!(
            self.phase,
            SessionPhase::Connecting | SessionPhase::ServicesDiscovered
        ) {
            self.set_phase(SessionPhase::CharacteristicsReady);
        }
    }

    fn become_active(&mut self) {
        self.set_phase(SessionPhase::Active);
        if let (Some(left), Some(right)) = (&self.left, &self.right) {
            let glasses = KnownGlasses {
                left: left.id.clone(),
                left_name: left.name.clone(),
                right: right.id.clone(),
                right_name: right.name.clone(),
            };
            let _ = self.event_sender.send(AppEvent::PairConnected(glasses));
        }
        self.send_log("Glasses connected", MessageSeverity::Success);
        for query in InfoQuery::ON_CONNECT {
            self.send(&GlassesCommand::Query(query));
        }
    }

    fn on_disconnected(&mut self, side: Side, id: &PeripheralId) {
        if let Some(link) = self.link_mut(side) {
            link.clear();
        }
        self.reassembler.clear_peripheral(id);
        warn!("{} earpiece disconnected ({})", side, id);

        let both_down = SIDES.iter().all(|s| self.link(*s).map_or(true, |l| !l.connected));
        if both_down {
            self.send_log("Glasses disconnected", MessageSeverity::Warning);
            self.reset();
        } else {
            self.send_log(format!("{} earpiece disconnected", side), MessageSeverity::Warning);
            self.set_phase(SessionPhase::Disconnected);
        }
    }

    fn disconnect(&mut self) {
        if !self.is_attached() {
            self.stop_pairing();
            return;
        }
        self.send(&GlassesCommand::Exit);
        for side in SIDES {
            if let Some(link) = self.link(side) {
                if let Err(e) = self.transport.disconnect(&link.id) {
                    warn!("Disconnecting {} earpiece failed: {}", side, e);
                }
            }
        }
        self.send_log("Disconnected from glasses", MessageSeverity::Info);
        self.reset();
    }

    /// Back to `Idle` with no carry-over from the previous pair.
    fn reset(&mut self) {
        self.left = None;
        self.right = None;
        self.reassembler.clear();
        self.matcher.clear();
        self.encoder.lock().unwrap_or_else(|p| p.into_inner()).reset();
        self.store.reset();
        self.set_phase(SessionPhase::Idle);
    }

    fn on_heartbeat(&mut self) {
        if !self.is_attached() {
            return;
        }
        for side in SIDES {
            let Some(link) = self.link(side) else { continue };
            if !self.transport.is_connected(&link.id) {
                info!("{} earpiece not connected, reconnecting", side);
                self.connect_side(side);
            }
        }
        if self.phase == SessionPhase::Active {
            self.send(&GlassesCommand::Heartbeat);
        }
    }

    fn handle_inbound(&mut self, id: &PeripheralId, side: Side, data: &[u8]) {
        trace!("<- {} {}", side, hex(data));
        let Some(&byte) = data.first() else {
            debug!("Empty notification from {}", side);
            return;
        };

        let mut completed = None;
        if let Some(opcode) = Opcode::from_byte(byte) {
            let min = opcode.min_response_len();
            if data.len() < min {
                let err = ProtocolError::MalformedFrame {
                    opcode: byte,
                    len: data.len(),
                    min,
                };
                warn!("Dropping frame from {}: {} ({})", side, err, hex(data));
                return;
            }
            if opcode.is_chunked_inbound() {
                match self.reassembler.feed_frame(id, NOTIF_SETTING_LAYOUT, data) {
                    Ok(payload) => completed = payload,
                    Err(e) => {
                        warn!("Dropping {:?} chunk from {}: {}", opcode, side, e);
                        return;
                    }
                }
            }
        }

        self.registry.dispatch(&ListenerContext {
            peripheral: id,
            data,
            side,
            store: &self.store,
            events: &self.event_sender,
            reassembled: completed.as_deref(),
        });
    }

    /// Encode and write from inside the session, ignoring pacing.
    fn send(&self, command: &GlassesCommand) {
        let frames = {
            let mut encoder = self.encoder.lock().unwrap_or_else(|p| p.into_inner());
            encoder.encode(command)
        };
        match frames {
            Ok(frames) => {
                for frame in &frames {
                    self.write_frame(frame);
                }
            }
            Err(e) => error!("Encoding {} failed: {}", command.name(), e),
        }
    }

    fn write_frame(&self, frame: &OutboundFrame) {
        let sides: &[Side] = match frame.target {
            Target::Both => &SIDES,
            Target::Left => &[Side::Left],
            Target::Right => &[Side::Right],
        };
        for side in sides {
            self.write_to(*side, &frame.bytes, frame.mode);
        }
    }

    fn write_to(&self, side: Side, bytes: &[u8], mode: WriteMode) {
        let Some(link) = self.link(side).filter(|l| l.tx_ready) else {
            let err = ProtocolError::TransportUnavailable(side.to_string());
            warn!("Dropping {} byte write: {}", bytes.len(), err);
            return;
        };
        trace!("-> {} {}", side, hex(bytes));
        if let Err(e) = self.transport.write(&link.id, UART_TX_CHAR_UUID, bytes.to_vec(), mode) {
            error!("Write to {} earpiece failed: {}", side, e);
        }
    }

    fn set_phase(&mut self, phase: SessionPhase) {
        if self.phase == phase {
            return;
        }
        info!("Session phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
        self.phase_tx.send_replace(phase);

        let state = phase.connection_state();
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
        if changed {
            let _ = self.event_sender.send(AppEvent::ConnectionState(state));
        }
    }

    fn send_log(&self, message: impl Into<String>, severity: MessageSeverity) {
        let _ = self
            .event_sender
            .send(AppEvent::LogMessage(StatusMessage::new(message, severity)));
    }

    fn is_attached(&self) -> bool {
        self.left.is_some() || self.right.is_some()
    }

    fn is_scanning(&self) -> bool {
        matches!(self.phase, SessionPhase::Scanning | SessionPhase::HalfConnected(_))
    }

    fn link(&self, side: Side) -> Option<&Link> {
        match side {
            Side::Left => self.left.as_ref(),
            Side::Right => self.right.as_ref(),
        }
    }

    fn link_mut(&mut self, side: Side) -> Option<&mut Link> {
        match side {
            Side::Left => self.left.as_mut(),
            Side::Right => self.right.as_mut(),
        }
    }

    fn side_of(&self, id: &PeripheralId) -> Option<Side> {
        SIDES
            .into_iter()
            .find(|side| self.link(*side).is_some_and(|link| &link.id == id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::NotificationApp;
    use crate::infrastructure::bluetooth::transport::TransportResult;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        ConnectedPeripherals,
        StartScan,
        StopScan,
        Connect(PeripheralId),
        Disconnect(PeripheralId),
        DiscoverServices(PeripheralId),
        DiscoverCharacteristics(PeripheralId),
        Subscribe(PeripheralId),
        Write(PeripheralId, Vec<u8>, WriteMode),
    }

    #[derive(Default)]
    struct MockTransport {
        calls: Mutex<Vec<Call>>,
        connected: Mutex<HashSet<PeripheralId>>,
        restored: Vec<PeripheralId>,
    }

    impl MockTransport {
        fn record(&self, call: Call) -> TransportResult<()> {
            self.calls.lock().unwrap().push(call);
            Ok(())
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn take_writes(&self) -> Vec<(PeripheralId, Vec<u8>, WriteMode)> {
            let mut calls = self.calls.lock().unwrap();
            let writes = calls
                .iter()
                .filter_map(|c| match c {
                    Call::Write(id, bytes, mode) => Some((id.clone(), bytes.clone(), *mode)),
                    _ => None,
                })
                .collect();
            calls.clear();
            writes
        }

        fn set_connected(&self, id: &PeripheralId, connected: bool) {
            let mut set = self.connected.lock().unwrap();
            if connected {
                set.insert(id.clone());
            } else {
                set.remove(id);
            }
        }
    }

    impl BleTransport for MockTransport {
        fn start_scan(&self, _services: &[Uuid]) -> TransportResult<()> {
            self.record(Call::StartScan)
        }
        fn stop_scan(&self) -> TransportResult<()> {
            self.record(Call::StopScan)
        }
        fn connected_peripherals(&self, _service: Uuid) -> TransportResult<()> {
            self.record(Call::ConnectedPeripherals)
        }
        fn connect(&self, id: &PeripheralId) -> TransportResult<()> {
            self.record(Call::Connect(id.clone()))
        }
        fn disconnect(&self, id: &PeripheralId) -> TransportResult<()> {
            self.record(Call::Disconnect(id.clone()))
        }
        fn discover_services(&self, id: &PeripheralId, _services: &[Uuid]) -> TransportResult<()> {
            self.record(Call::DiscoverServices(id.clone()))
        }
        fn discover_characteristics(&self, id: &PeripheralId, _service: Uuid) -> TransportResult<()> {
            self.record(Call::DiscoverCharacteristics(id.clone()))
        }
        fn subscribe_notifications(&self, id: &PeripheralId, _characteristic: Uuid) -> TransportResult<()> {
            self.record(Call::Subscribe(id.clone()))
        }
        fn write(&self, id: &PeripheralId, _characteristic: Uuid, bytes: Vec<u8>, mode: WriteMode) -> TransportResult<()> {
            self.record(Call::Write(id.clone(), bytes, mode))
        }
        fn is_connected(&self, id: &PeripheralId) -> bool {
            self.connected.lock().unwrap().contains(id)
        }
        fn restored_peripherals(&self) -> Vec<PeripheralId> {
            self.restored.clone()
        }
    }

    const LEFT_NAME: &str = "Even G1_7_L_39A1F0";
    const RIGHT_NAME: &str = "Even G1_7_R_11B2C3";

    fn left() -> PeripheralId {
        PeripheralId::new("left-id")
    }

    fn right() -> PeripheralId {
        PeripheralId::new("right-id")
    }

    fn known() -> KnownGlasses {
        KnownGlasses {
            left: left(),
            left_name: LEFT_NAME.into(),
            right: right(),
            right_name: RIGHT_NAME.into(),
        }
    }

    struct Fixture {
        transport: Arc<MockTransport>,
        events: mpsc::UnboundedSender<TransportEvent>,
        app_events: mpsc::UnboundedReceiver<AppEvent>,
        handle: SessionHandle,
    }

    impl Fixture {
        fn with(transport: MockTransport, config: SessionConfig, known: Option<KnownGlasses>) -> Self {
            let transport = Arc::new(transport);
            let (events, events_rx) = mpsc::unbounded_channel();
            let (app_tx, app_events) = mpsc::unbounded_channel();
            let handle = GlassesSession::spawn(transport.clone(), events_rx, config, known, app_tx);
            Self {
                transport,
                events,
                app_events,
                handle,
            }
        }

        fn new() -> Self {
            Self::with(MockTransport::default(), SessionConfig::default(), None)
        }

        fn emit(&self, event: TransportEvent) {
            self.events.send(event).unwrap();
        }

        fn phase(&self) -> SessionPhase {
            *self.handle.phase().borrow()
        }

        fn drain_app_events(&mut self) -> Vec<AppEvent> {
            let mut out = Vec::new();
            while let Ok(event) = self.app_events.try_recv() {
                out.push(event);
            }
            out
        }

        fn notify(&self, id: PeripheralId, data: &[u8]) {
            self.emit(TransportEvent::Notification {
                id,
                characteristic: UART_RX_CHAR_UUID,
                data: data.to_vec(),
            });
        }

        /// Drive a side from connected to ready.
        fn bring_up(&self, id: PeripheralId) {
            self.transport.set_connected(&id, true);
            self.emit(TransportEvent::Connected(id.clone()));
            self.emit(TransportEvent::ServicesDiscovered {
                id: id.clone(),
                services: vec![UART_SERVICE_UUID],
            });
            self.emit(TransportEvent::CharacteristicsDiscovered {
                id,
                service: UART_SERVICE_UUID,
                characteristics: vec![UART_TX_CHAR_UUID, UART_RX_CHAR_UUID],
            });
        }

        async fn activate(&mut self) {
            self.handle.reconnect_known(known()).unwrap();
            settle().await;
            self.bring_up(left());
            self.bring_up(right());
            settle().await;
            assert_eq!(self.phase(), SessionPhase::Active);
            self.transport.take_writes();
            self.drain_app_events();
        }
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_already_connected_pair_completes_pairing() {
        let mut fx = Fixture::new();
        fx.handle.start_pairing().unwrap();
        settle().await;

        fx.emit(TransportEvent::ConnectedPeripherals {
            service: UART_SERVICE_UUID,
            peripherals: vec![
                (PeripheralId::new("watch"), "Watch".into()),
                (left(), LEFT_NAME.into()),
                (right(), RIGHT_NAME.into()),
            ],
        });
        settle().await;
        assert_eq!(fx.phase(), SessionPhase::Connecting);
        assert_eq!(
            fx.transport.calls(),
            vec![
                Call::ConnectedPeripherals,
                Call::StartScan,
                Call::StopScan,
                Call::Connect(left()),
                Call::Connect(right())
            ]
        );

        // A late scan hit for the same pair changes nothing.
        fx.emit(TransportEvent::Discovered {
            id: left(),
            name: LEFT_NAME.into(),
        });
        settle().await;
        assert_eq!(fx.transport.calls().len(), 5);
        assert!(fx
            .drain_app_events()
            .iter()
            .all(|e| !matches!(e, AppEvent::PairConnected(_))));
    }

    #[tokio::test]
    async fn test_connected_peripherals_ignored_when_not_pairing() {
        let fx = Fixture::new();
        fx.emit(TransportEvent::ConnectedPeripherals {
            service: UART_SERVICE_UUID,
            peripherals: vec![(left(), LEFT_NAME.into()), (right(), RIGHT_NAME.into())],
        });
        settle().await;
        assert_eq!(fx.phase(), SessionPhase::Idle);
        assert!(fx.transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_pairing_scan_to_active() {
        let mut fx = Fixture::new();
        fx.handle.start_pairing().unwrap();
        settle().await;
        assert_eq!(fx.phase(), SessionPhase::Scanning);
        assert_eq!(fx.transport.calls(), vec![Call::ConnectedPeripherals, Call::StartScan]);

        fx.emit(TransportEvent::Discovered {
            id: PeripheralId::new("headphones"),
            name: "Headphones".into(),
        });
        fx.emit(TransportEvent::Discovered {
            id: left(),
            name: LEFT_NAME.into(),
        });
        settle().await;
        assert_eq!(fx.phase(), SessionPhase::HalfConnected(Side::Left));

        fx.emit(TransportEvent::Discovered {
            id: right(),
            name: RIGHT_NAME.into(),
        });
        settle().await;
        assert_eq!(fx.phase(), SessionPhase::Connecting);
        assert_eq!(
            fx.transport.calls(),
            vec![
                Call::ConnectedPeripherals,
                Call::StartScan,
                Call::StopScan,
                Call::Connect(left()),
                Call::Connect(right())
            ]
        );

        fx.transport.set_connected(&left(), true);
        fx.emit(TransportEvent::Connected(left()));
        fx.emit(TransportEvent::ServicesDiscovered {
            id: left(),
            services: vec![UART_SERVICE_UUID],
        });
        settle().await;
        assert_eq!(fx.phase(), SessionPhase::ServicesDiscovered);

        fx.emit(TransportEvent::CharacteristicsDiscovered {
            id: left(),
            service: UART_SERVICE_UUID,
            characteristics: vec![UART_TX_CHAR_UUID, UART_RX_CHAR_UUID],
        });
        settle().await;
        assert_eq!(fx.phase(), SessionPhase::CharacteristicsReady);
        assert_eq!(*fx.handle.state().borrow(), ConnectionState::Connecting);

        fx.bring_up(right());
        settle().await;
        assert_eq!(fx.phase(), SessionPhase::Active);
        assert_eq!(*fx.handle.state().borrow(), ConnectionState::Active);

        let events = fx.drain_app_events();
        assert!(events
            .iter()
            .any(|e| matches!(e, AppEvent::PairConnected(k) if *k == known())));
        assert!(events
            .iter()
            .any(|e| matches!(e, AppEvent::ConnectionState(ConnectionState::Active))));

        // Device info queries go out once both sides are ready.
        let writes = fx.transport.take_writes();
        assert!(writes.contains(&(left(), vec![0x2B], WriteMode::Acknowledged)));
        assert!(!writes.contains(&(right(), vec![0x2B], WriteMode::Acknowledged)));
        assert!(writes.contains(&(left(), vec![0x2C, 0x02], WriteMode::Acknowledged)));
        assert!(writes.contains(&(right(), vec![0x2C, 0x02], WriteMode::Acknowledged)));
        assert!(writes.contains(&(right(), vec![0x29], WriteMode::Acknowledged)));
    }

    #[tokio::test]
    async fn test_write_without_characteristic_is_noop() {
        let fx = Fixture::new();
        fx.handle.send_command(GlassesCommand::Text("hi".into())).await.unwrap();
        settle().await;
        assert!(fx.transport.take_writes().is_empty());
    }

    #[tokio::test]
    async fn test_validation_error_is_returned() {
        let fx = Fixture::new();
        let err = fx.handle.send_command(GlassesCommand::HeadTilt(61)).await.unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_write_policies() {
        let mut fx = Fixture::new();
        fx.activate().await;

        fx.handle
            .send_command(GlassesCommand::Brightness { level: 40, auto: false })
            .await
            .unwrap();
        settle().await;
        assert_eq!(
            fx.transport.take_writes(),
            vec![(right(), vec![0x01, 40, 0], WriteMode::Acknowledged)]
        );

        fx.handle.send_command(GlassesCommand::Exit).await.unwrap();
        settle().await;
        assert_eq!(
            fx.transport.take_writes(),
            vec![
                (left(), vec![0x18], WriteMode::FireAndForget),
                (right(), vec![0x18], WriteMode::FireAndForget)
            ]
        );
    }

    #[tokio::test]
    async fn test_inbound_frames_reach_store_and_listeners() {
        let mut fx = Fixture::new();
        fx.activate().await;

        fx.notify(left(), &[0x2C, 0x66, 0x50]);
        settle().await;
        assert_eq!(fx.handle.store().snapshot().left_battery, Some(0x50));

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let subscription = fx
            .handle
            .subscribe(
                Opcode::BrightnessState,
                Box::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await
            .unwrap();

        // Too short for a brightness state report.
        fx.notify(right(), &[0x29, 0xC9]);
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        fx.notify(right(), &[0x29, 0xC9, 0x2A, 0x01]);
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        let snapshot = fx.handle.store().snapshot();
        assert_eq!(snapshot.brightness, 0x2A);
        assert!(snapshot.auto_brightness);

        fx.handle.unsubscribe(subscription).unwrap();
        fx.notify(right(), &[0x29, 0xC9, 0x2A, 0x01]);
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // Unknown opcodes never take the session down.
        fx.notify(left(), &[0x99, 0x01]);
        fx.notify(left(), &[0x2C, 0x66, 0x51]);
        settle().await;
        assert_eq!(fx.handle.store().snapshot().left_battery, Some(0x51));
    }

    #[tokio::test]
    async fn test_notification_setting_is_reassembled() {
        let mut fx = Fixture::new();
        fx.activate().await;

        let json = br#"{"whitelist_app_add":{"app_identifier":"com.example.chat","display_name":"Chat"}}"#;
        let (first, second) = json.split_at(30);
        let mut frame = vec![0xF6, 2, 0];
        frame.extend_from_slice(first);
        fx.notify(left(), &frame);
        settle().await;
        assert!(fx.drain_app_events().is_empty());

        let mut frame = vec![0xF6, 2, 1];
        frame.extend_from_slice(second);
        fx.notify(left(), &frame);
        settle().await;

        let app = NotificationApp {
            app_identifier: "com.example.chat".into(),
            display_name: "Chat".into(),
        };
        let events = fx.drain_app_events();
        assert!(events
            .iter()
            .any(|e| matches!(e, AppEvent::NotificationAppAdded(a) if *a == app)));
        assert_eq!(fx.handle.store().snapshot().notification_apps, vec![app]);
    }

    #[tokio::test]
    async fn test_out_of_order_chunk_is_dropped() {
        let mut fx = Fixture::new();
        fx.activate().await;

        let json = br#"{"whitelist_app_add":{"app_identifier":"a","display_name":"A"}}"#;
        let mut frame = vec![0xF6, 3, 0];
        frame.extend_from_slice(&json[..10]);
        fx.notify(left(), &frame);
        let mut frame = vec![0xF6, 3, 2];
        frame.extend_from_slice(&json[10..]);
        fx.notify(left(), &frame);
        settle().await;

        assert!(fx.handle.store().snapshot().notification_apps.is_empty());
        assert!(!fx
            .drain_app_events()
            .iter()
            .any(|e| matches!(e, AppEvent::NotificationAppAdded(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_heartbeat_interval_is_clamped() {
        let config = SessionConfig {
            heartbeat_interval: Duration::ZERO,
            ..SessionConfig::default()
        };
        let mut fx = Fixture::with(MockTransport::default(), config, None);
        fx.activate().await;

        tokio::time::sleep(Duration::from_millis(250)).await;
        settle().await;
        let writes = fx.transport.take_writes();
        assert!(!writes.is_empty());
        assert!(writes.len() <= 6);
        assert!(writes.iter().all(|(_, bytes, _)| bytes[0] == 0x25));
        assert_eq!(fx.phase(), SessionPhase::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_reconnects_lost_side() {
        let config = SessionConfig {
            heartbeat_interval: Duration::from_secs(30),
            ..SessionConfig::default()
        };
        let mut fx = Fixture::with(MockTransport::default(), config, None);
        fx.activate().await;

        tokio::time::sleep(Duration::from_secs(31)).await;
        settle().await;
        let writes = fx.transport.take_writes();
        assert_eq!(writes.len(), 2);
        assert!(writes.iter().all(|(_, bytes, _)| bytes[0] == 0x25));

        fx.transport.set_connected(&left(), false);
        fx.emit(TransportEvent::Disconnected(left()));
        settle().await;
        assert_eq!(fx.phase(), SessionPhase::Disconnected);
        assert_eq!(*fx.handle.state().borrow(), ConnectionState::Disconnected);

        tokio::time::sleep(Duration::from_secs(30)).await;
        settle().await;
        let calls = fx.transport.calls();
        assert!(calls.contains(&Call::Connect(left())));
        assert!(!calls.contains(&Call::Connect(right())));
        // No heartbeat while only half the pair is up; the left write slot is gone.
        assert!(!calls.iter().any(|c| matches!(c, Call::Write(..))));

        fx.bring_up(left());
        settle().await;
        assert_eq!(fx.phase(), SessionPhase::Active);
    }

    #[tokio::test]
    async fn test_losing_both_sides_resets_to_idle() {
        let mut fx = Fixture::new();
        fx.activate().await;
        fx.notify(left(), &[0x2C, 0x66, 0x50]);

        fx.emit(TransportEvent::Disconnected(left()));
        fx.emit(TransportEvent::Disconnected(right()));
        settle().await;
        assert_eq!(fx.phase(), SessionPhase::Idle);
        assert_eq!(fx.handle.store().snapshot().left_battery, None);

        // A fresh pairing is allowed again.
        fx.handle.start_pairing().unwrap();
        settle().await;
        assert_eq!(fx.phase(), SessionPhase::Scanning);
    }

    #[tokio::test]
    async fn test_disconnect_sends_exit_and_resets() {
        let mut fx = Fixture::new();
        fx.activate().await;

        fx.handle.disconnect().await.unwrap();
        let calls = fx.transport.calls();
        assert_eq!(
            calls,
            vec![
                Call::Write(left(), vec![0x18], WriteMode::FireAndForget),
                Call::Write(right(), vec![0x18], WriteMode::FireAndForget),
                Call::Disconnect(left()),
                Call::Disconnect(right()),
            ]
        );
        assert_eq!(fx.phase(), SessionPhase::Idle);
        assert_eq!(*fx.handle.state().borrow(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_restored_pair_connects_without_scanning() {
        let transport = MockTransport {
            restored: vec![left(), right()],
            ..MockTransport::default()
        };
        let fx = Fixture::with(transport, SessionConfig::default(), Some(known()));
        settle().await;
        assert_eq!(fx.phase(), SessionPhase::Connecting);
        assert_eq!(
            fx.transport.calls(),
            vec![Call::Connect(left()), Call::Connect(right())]
        );
    }

    #[tokio::test]
    async fn test_unrestored_pair_waits() {
        let transport = MockTransport {
            restored: vec![left()],
            ..MockTransport::default()
        };
        let fx = Fixture::with(transport, SessionConfig::default(), Some(known()));
        settle().await;
        assert_eq!(fx.phase(), SessionPhase::Idle);
        assert!(fx.transport.calls().is_empty());
    }
}
