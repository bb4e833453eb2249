//! Hotkey engine: the single serialized execution context
//!
//! Every key transition, control command and timer deadline is handled here
//! in order. The engine owns the tracker, the registry, the trigger state
//! machine and the current conflict report; nothing else mutates them.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use super::machine::{Activation, Timing, TriggerDisambiguator};
use crate::bindings::{
    Binding, BuiltinShortcuts, ComboId, ComboRegistry, ConflictDetector, ConflictReport,
    SystemAction,
};
use crate::dispatch::BindingExecutor;
use crate::events::EngineEvent;
use crate::hotkey::{KeyChange, KeyStateTracker, KeyTransition};

/// Default debounce between a bindings update and the registry rebuild
pub const DEFAULT_REBUILD_DEBOUNCE: Duration = Duration::from_millis(150);

/// Inputs processed by the engine, in arrival order
#[derive(Debug, Clone)]
pub enum EngineInput {
    /// Raw transition from the event tap
    Key(KeyTransition),
    /// The OS disabled the event tap
    MonitoringLost,
    Start,
    Stop,
    /// Replace the user bindings (debounced)
    SetBindings(Vec<Binding>),
}

/// Observable engine state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub monitoring: bool,
    pub binding_count: usize,
    pub conflicts: ConflictReport,
}

/// Owned state of the hotkey engine
pub struct HotkeyEngine {
    tracker: KeyStateTracker,
    registry: ComboRegistry,
    machine: TriggerDisambiguator,
    bindings: Vec<Binding>,
    builtins: BuiltinShortcuts,
    conflicts: ConflictReport,
    pending_bindings: Option<(Vec<Binding>, Instant)>,
    rebuild_debounce: Duration,
    monitoring: bool,
    /// A release only resolves a combo if the previous edge was a press
    release_armed: bool,
    overlay_combo: Option<ComboId>,
    executor: Arc<dyn BindingExecutor>,
    event_tx: broadcast::Sender<EngineEvent>,
    status_tx: watch::Sender<EngineStatus>,
}

impl HotkeyEngine {
    pub fn new(
        timing: Timing,
        builtins: BuiltinShortcuts,
        executor: Arc<dyn BindingExecutor>,
        event_tx: broadcast::Sender<EngineEvent>,
    ) -> Self {
        let registry = ComboRegistry::build(&[], &builtins);
        let conflicts = ConflictDetector::from_registry(&registry).report();
        let (status_tx, _) = watch::channel(EngineStatus {
            monitoring: false,
            binding_count: registry.len(),
            conflicts: conflicts.clone(),
        });

        Self {
            tracker: KeyStateTracker::new(),
            registry,
            machine: TriggerDisambiguator::new(timing),
            bindings: Vec::new(),
            builtins,
            conflicts,
            pending_bindings: None,
            rebuild_debounce: DEFAULT_REBUILD_DEBOUNCE,
            monitoring: false,
            release_armed: false,
            overlay_combo: None,
            executor,
            event_tx,
            status_tx,
        }
    }

    pub fn with_rebuild_debounce(mut self, debounce: Duration) -> Self {
        self.rebuild_debounce = debounce;
        self
    }

    /// Receiver tracking the latest engine status
    pub fn status(&self) -> watch::Receiver<EngineStatus> {
        self.status_tx.subscribe()
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitoring
    }

    pub fn conflicts(&self) -> &ConflictReport {
        &self.conflicts
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    /// Run the engine until the input channel closes
    pub async fn run(&mut self, mut input_rx: mpsc::Receiver<EngineInput>) {
        info!("hotkey engine started");

        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                biased;

                _ = async {
                    match deadline {
                        Some(deadline) => tokio::time::sleep_until(deadline).await,
                        None => std::future::pending().await,
                    }
                } => {
                    self.process_due(Instant::now());
                }

                input = input_rx.recv() => {
                    match input {
                        Some(input) => self.process(input, Instant::now()),
                        None => break,
                    }
                }
            }
        }

        info!("hotkey engine stopped");
    }

    /// Earliest trigger or rebuild deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        let rebuild = self.pending_bindings.as_ref().map(|(_, at)| *at);
        match (self.machine.next_deadline(), rebuild) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Handle one input at `now`; timers due by then resolve first
    pub fn process(&mut self, input: EngineInput, now: Instant) {
        self.process_due(now);

        match input {
            EngineInput::Key(transition) => self.handle_key(&transition, now),
            EngineInput::MonitoringLost => {
                warn!("key interception lost, dropping pending triggers");
                self.reset(EngineEvent::MonitoringLost);
            }
            EngineInput::Start => self.start(),
            EngineInput::Stop => {
                if self.monitoring {
                    self.reset(EngineEvent::MonitoringStopped);
                }
            }
            EngineInput::SetBindings(bindings) => {
                debug!(count = bindings.len(), "bindings update queued");
                self.pending_bindings = Some((bindings, now + self.rebuild_debounce));
            }
        }
    }

    /// Resolve every deadline that has passed by `now`
    pub fn process_due(&mut self, now: Instant) {
        for task in self.machine.pop_due(now) {
            if let Some(activation) = self.machine.on_timer(&task, self.tracker.active(), &self.registry) {
                self.fire(activation);
            }
        }

        if self
            .pending_bindings
            .as_ref()
            .is_some_and(|(_, at)| *at <= now)
        {
            if let Some((bindings, _)) = self.pending_bindings.take() {
                self.rebuild(bindings);
            }
        }
    }

    /// Replace the user bindings and rebuild right away
    pub fn rebuild(&mut self, bindings: Vec<Binding>) {
        self.bindings = bindings;
        self.registry = ComboRegistry::build(&self.bindings, &self.builtins);

        let report = ConflictDetector::from_registry(&self.registry).report();
        if report != self.conflicts {
            for group in &report.groups {
                warn!(
                    combo = %group.combo,
                    trigger = %group.trigger,
                    bindings = ?group.binding_ids,
                    "conflicting shortcuts registered"
                );
            }
            self.conflicts = report.clone();
            self.emit(EngineEvent::ConflictsChanged { conflicts: report });
        }

        info!(count = self.registry.len(), "bindings reloaded");
        self.emit(EngineEvent::BindingsReloaded {
            count: self.registry.len(),
        });
        self.publish_status();
    }

    /// Begin handling key input with a clean key set
    fn start(&mut self) {
        if self.monitoring {
            debug!("monitoring already active");
            return;
        }
        self.tracker.clear();
        self.release_armed = false;
        self.monitoring = true;
        info!("monitoring started");
        self.emit(EngineEvent::MonitoringStarted);
        self.publish_status();
    }

    fn reset(&mut self, event: EngineEvent) {
        let dropped = self.machine.cancel_all();
        self.tracker.clear();
        self.release_armed = false;
        self.hide_overlay();
        self.monitoring = false;
        info!(dropped, %event, "monitoring halted");
        self.emit(event);
        self.publish_status();
    }

    fn handle_key(&mut self, transition: &KeyTransition, now: Instant) {
        if !self.monitoring {
            trace!(?transition, "key ignored while not monitoring");
            return;
        }

        for change in self.tracker.apply(transition) {
            match change {
                KeyChange::Pressed(combo) => {
                    self.release_armed = true;
                    self.machine.on_key_down(&combo, &self.registry, now);
                }
                KeyChange::Released(combo) => {
                    self.hide_overlay();
                    if !std::mem::take(&mut self.release_armed) {
                        trace!(%combo, "trailing release ignored");
                        continue;
                    }
                    if let Some(activation) = self.machine.on_key_up(&combo, &self.registry, now) {
                        self.fire(activation);
                    }
                }
            }
        }

        self.machine.release_stale_holds(self.tracker.active());
    }

    fn fire(&mut self, activation: Activation) {
        let Activation {
            combo,
            trigger,
            bindings,
        } = activation;

        if bindings.len() > 1 {
            debug!(%combo, %trigger, count = bindings.len(), "firing conflicting bindings together");
        }

        for binding in bindings {
            match binding.system_action() {
                Some(SystemAction::Cheatsheet) => {
                    if self.overlay_combo.replace(combo.clone()).is_none() {
                        self.emit(EngineEvent::OverlayShown);
                    }
                }
                Some(SystemAction::QuickAssign) => {
                    self.emit(EngineEvent::QuickAssignRequested {
                        combo: combo.clone(),
                    });
                }
                None => {
                    info!(binding_id = %binding.id, %combo, %trigger, "binding fired");
                    self.executor.execute(&binding);
                    self.emit(EngineEvent::BindingFired {
                        binding_id: binding.id,
                        trigger,
                        target: binding.target,
                    });
                }
            }
        }
    }

    fn hide_overlay(&mut self) {
        if self.overlay_combo.take().is_some() {
            self.emit(EngineEvent::OverlayHidden);
        }
    }

    fn emit(&self, event: EngineEvent) {
        trace!(%event, "engine event");
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    fn publish_status(&self) {
        self.status_tx.send_replace(EngineStatus {
            monitoring: self.monitoring,
            binding_count: self.registry.len(),
            conflicts: self.conflicts.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use tokio::sync::broadcast::error::TryRecvError;

    use super::*;
    use crate::bindings::{ShortcutKey, Target, TriggerType};
    use crate::hotkey::keys::{flags, keycode};

    const KEY_A: u16 = 0x00;
    const KEY_S: u16 = 0x01;

    #[derive(Default)]
    struct RecordingExecutor(Mutex<Vec<String>>);

    impl RecordingExecutor {
        fn fired(&self) -> Vec<String> {
            self.0.lock().clone()
        }
    }

    impl BindingExecutor for RecordingExecutor {
        fn execute(&self, binding: &Binding) {
            self.0.lock().push(binding.id.clone());
        }
    }

    fn cmd_a() -> Vec<ShortcutKey> {
        vec![ShortcutKey::normal(keycode::COMMAND), ShortcutKey::normal(KEY_A)]
    }

    fn url_binding(id: &str, keys: Vec<ShortcutKey>, trigger: TriggerType) -> Binding {
        Binding::new(
            id,
            keys,
            trigger,
            Target::Url {
                url: format!("https://example.com/{id}"),
            },
        )
    }

    struct Harness {
        engine: HotkeyEngine,
        executor: Arc<RecordingExecutor>,
        events: broadcast::Receiver<EngineEvent>,
        t0: Instant,
    }

    impl Harness {
        fn new(bindings: Vec<Binding>, builtins: BuiltinShortcuts) -> Self {
            let executor = Arc::new(RecordingExecutor::default());
            let (event_tx, events) = broadcast::channel(64);
            let mut engine = HotkeyEngine::new(
                Timing::default(),
                builtins,
                executor.clone(),
                event_tx,
            );
            engine.rebuild(bindings);
            let t0 = Instant::now();
            engine.process(EngineInput::Start, t0);
            let mut harness = Self {
                engine,
                executor,
                events,
                t0,
            };
            harness.drain();
            harness
        }

        fn at(&self, ms: u64) -> Instant {
            self.t0 + Duration::from_millis(ms)
        }

        fn send(&mut self, ms: u64, input: EngineInput) {
            let now = self.at(ms);
            self.engine.process(input, now);
        }

        fn key(&mut self, ms: u64, transition: KeyTransition) {
            self.send(ms, EngineInput::Key(transition));
        }

        fn tick(&mut self, ms: u64) {
            let now = self.at(ms);
            self.engine.process_due(now);
        }

        /// Cmd down, A down, A up, Cmd up, all at `ms`
        fn tap_cmd_a(&mut self, ms: u64) {
            self.key(ms, KeyTransition::flags_changed(keycode::COMMAND, flags::COMMAND));
            self.key(ms, KeyTransition::down(KEY_A));
            self.key(ms, KeyTransition::up(KEY_A));
            self.key(ms, KeyTransition::flags_changed(keycode::COMMAND, 0));
        }

        fn drain(&mut self) -> Vec<EngineEvent> {
            let mut events = Vec::new();
            loop {
                match self.events.try_recv() {
                    Ok(event) => events.push(event),
                    Err(TryRecvError::Lagged(_)) => continue,
                    Err(_) => break,
                }
            }
            events
        }
    }

    #[test]
    fn test_press_only_fires_on_release() {
        let mut h = Harness::new(
            vec![url_binding("x", cmd_a(), TriggerType::Press)],
            BuiltinShortcuts::default(),
        );
        h.key(0, KeyTransition::flags_changed(keycode::COMMAND, flags::COMMAND));
        h.key(0, KeyTransition::down(KEY_A));
        assert!(h.executor.fired().is_empty());

        h.key(50, KeyTransition::up(KEY_A));
        assert_eq!(h.executor.fired(), vec!["x"]);
        assert_eq!(h.engine.next_deadline(), None);
    }

    #[test]
    fn test_single_press_waits_for_window() {
        let mut h = Harness::new(
            vec![
                url_binding("x", cmd_a(), TriggerType::Press),
                url_binding("y", cmd_a(), TriggerType::DoublePress),
            ],
            BuiltinShortcuts::default(),
        );
        h.tap_cmd_a(0);
        h.tick(399);
        assert!(h.executor.fired().is_empty());

        h.tick(500);
        assert_eq!(h.executor.fired(), vec!["x"]);
    }

    #[test]
    fn test_double_press_resolves_on_second_release() {
        let mut h = Harness::new(
            vec![
                url_binding("x", cmd_a(), TriggerType::Press),
                url_binding("y", cmd_a(), TriggerType::DoublePress),
            ],
            BuiltinShortcuts::default(),
        );
        h.tap_cmd_a(0);
        h.tap_cmd_a(200);
        assert_eq!(h.executor.fired(), vec!["y"]);

        h.tick(2_000);
        assert_eq!(h.executor.fired(), vec!["y"]);
    }

    #[test]
    fn test_trailing_modifier_release_does_not_fire() {
        let mut h = Harness::new(
            vec![
                url_binding("cmd", vec![ShortcutKey::normal(keycode::COMMAND)], TriggerType::Press),
                url_binding("x", cmd_a(), TriggerType::Press),
            ],
            BuiltinShortcuts::default(),
        );
        h.tap_cmd_a(0);
        assert_eq!(h.executor.fired(), vec!["x"]);

        h.key(100, KeyTransition::flags_changed(keycode::COMMAND, flags::COMMAND));
        h.key(150, KeyTransition::flags_changed(keycode::COMMAND, 0));
        assert_eq!(h.executor.fired(), vec!["x", "cmd"]);
    }

    #[test]
    fn test_repeated_key_under_held_modifier() {
        let mut h = Harness::new(
            vec![url_binding("y", cmd_a(), TriggerType::DoublePress)],
            BuiltinShortcuts::default(),
        );
        h.key(0, KeyTransition::flags_changed(keycode::COMMAND, flags::COMMAND));
        h.key(0, KeyTransition::down(KEY_A));
        h.key(10, KeyTransition::up(KEY_A));
        h.key(100, KeyTransition::down(KEY_A));
        h.key(110, KeyTransition::up(KEY_A));
        assert_eq!(h.executor.fired(), vec!["y"]);
    }

    #[test]
    fn test_hold_fires_once_and_swallows_release() {
        let mut h = Harness::new(
            vec![
                url_binding("tap", cmd_a(), TriggerType::Press),
                url_binding("hold", cmd_a(), TriggerType::Hold),
            ],
            BuiltinShortcuts::default(),
        );
        h.key(0, KeyTransition::flags_changed(keycode::COMMAND, flags::COMMAND));
        h.key(0, KeyTransition::down(KEY_A));
        h.tick(400);
        assert_eq!(h.executor.fired(), vec!["hold"]);

        h.key(900, KeyTransition::up(KEY_A));
        h.key(900, KeyTransition::flags_changed(keycode::COMMAND, 0));
        h.tick(3_000);
        assert_eq!(h.executor.fired(), vec!["hold"]);
    }

    #[test]
    fn test_early_release_uses_press_path() {
        let mut h = Harness::new(
            vec![
                url_binding("tap", cmd_a(), TriggerType::Press),
                url_binding("hold", cmd_a(), TriggerType::Hold),
            ],
            BuiltinShortcuts::default(),
        );
        h.key(0, KeyTransition::flags_changed(keycode::COMMAND, flags::COMMAND));
        h.key(0, KeyTransition::down(KEY_A));
        h.key(100, KeyTransition::up(KEY_A));
        h.tick(1_000);
        assert_eq!(h.executor.fired(), vec!["tap"]);
    }

    #[test]
    fn test_hold_abandoned_when_key_set_changes() {
        let mut h = Harness::new(
            vec![url_binding("hold", cmd_a(), TriggerType::Hold)],
            BuiltinShortcuts::default(),
        );
        h.key(0, KeyTransition::flags_changed(keycode::COMMAND, flags::COMMAND));
        h.key(0, KeyTransition::down(KEY_A));
        h.key(100, KeyTransition::down(KEY_S));
        h.tick(1_000);
        assert!(h.executor.fired().is_empty());
    }

    #[test]
    fn test_tap_then_hold_fires_press_then_hold() {
        let mut h = Harness::new(
            vec![
                url_binding("p", cmd_a(), TriggerType::Press),
                url_binding("d", cmd_a(), TriggerType::DoublePress),
                url_binding("h", cmd_a(), TriggerType::Hold),
            ],
            BuiltinShortcuts::default(),
        );
        h.key(0, KeyTransition::flags_changed(keycode::COMMAND, flags::COMMAND));
        h.key(0, KeyTransition::down(KEY_A));
        h.key(100, KeyTransition::up(KEY_A));
        h.key(150, KeyTransition::down(KEY_A));

        // First tap resolves while A is down again
        h.tick(500);
        assert_eq!(h.executor.fired(), vec!["p"]);

        h.tick(600);
        assert_eq!(h.executor.fired(), vec!["p", "h"]);

        h.key(800, KeyTransition::up(KEY_A));
        h.key(800, KeyTransition::flags_changed(keycode::COMMAND, 0));
        h.tick(2_000);
        assert_eq!(h.executor.fired(), vec!["p", "h"]);
        assert_eq!(h.engine.machine.pending_count(), 0);
    }

    #[test]
    fn test_fired_hold_cleared_after_out_of_order_release() {
        let mut h = Harness::new(
            vec![url_binding("h", cmd_a(), TriggerType::Hold)],
            BuiltinShortcuts::default(),
        );
        h.key(0, KeyTransition::flags_changed(keycode::COMMAND, flags::COMMAND));
        h.key(0, KeyTransition::down(KEY_A));
        h.tick(400);
        assert_eq!(h.executor.fired(), vec!["h"]);

        h.key(500, KeyTransition::down(KEY_S));
        h.key(550, KeyTransition::up(KEY_S));
        h.key(600, KeyTransition::up(KEY_A));
        h.key(650, KeyTransition::flags_changed(keycode::COMMAND, 0));
        assert_eq!(h.engine.machine.pending_count(), 0);

        h.engine
            .rebuild(vec![url_binding("p", cmd_a(), TriggerType::Press)]);
        h.tap_cmd_a(1_000);
        assert_eq!(h.executor.fired(), vec!["h", "p"]);
    }

    #[test]
    fn test_stop_then_restart_drops_in_flight_sequence() {
        let mut h = Harness::new(
            vec![
                url_binding("x", cmd_a(), TriggerType::Press),
                url_binding("y", cmd_a(), TriggerType::DoublePress),
            ],
            BuiltinShortcuts::default(),
        );
        h.tap_cmd_a(0);
        h.key(50, KeyTransition::flags_changed(keycode::COMMAND, flags::COMMAND));
        h.key(50, KeyTransition::down(KEY_A));

        h.send(60, EngineInput::Stop);
        h.send(61, EngineInput::Start);
        assert_eq!(h.engine.next_deadline(), None);

        h.key(100, KeyTransition::up(KEY_A));
        h.key(100, KeyTransition::flags_changed(keycode::COMMAND, 0));
        h.tick(5_000);
        assert!(h.executor.fired().is_empty());

        let events = h.drain();
        assert_eq!(
            events,
            vec![EngineEvent::MonitoringStopped, EngineEvent::MonitoringStarted]
        );
    }

    #[test]
    fn test_monitoring_lost_clears_state() {
        let mut h = Harness::new(
            vec![url_binding("hold", cmd_a(), TriggerType::Hold)],
            BuiltinShortcuts::default(),
        );
        h.key(0, KeyTransition::flags_changed(keycode::COMMAND, flags::COMMAND));
        h.key(0, KeyTransition::down(KEY_A));
        h.send(100, EngineInput::MonitoringLost);

        assert!(!h.engine.is_monitoring());
        assert_eq!(h.engine.next_deadline(), None);
        assert_eq!(h.drain(), vec![EngineEvent::MonitoringLost]);

        h.key(200, KeyTransition::up(KEY_A));
        h.tick(1_000);
        assert!(h.executor.fired().is_empty());
        assert!(!h.engine.status().borrow().monitoring);
    }

    #[test]
    fn test_start_is_idempotent() {
        let mut h = Harness::new(vec![], BuiltinShortcuts::default());
        h.send(0, EngineInput::Start);
        assert!(h.drain().is_empty());
        assert!(h.engine.is_monitoring());
    }

    #[test]
    fn test_cheatsheet_hold_shows_and_hides_overlay() {
        let builtins = BuiltinShortcuts {
            cheatsheet: Some(vec![ShortcutKey::normal(keycode::COMMAND)]),
            quick_assign: None,
        };
        let mut h = Harness::new(vec![], builtins);
        h.key(0, KeyTransition::flags_changed(keycode::COMMAND, flags::COMMAND));
        h.tick(450);
        assert_eq!(h.drain(), vec![EngineEvent::OverlayShown]);

        h.key(2_000, KeyTransition::flags_changed(keycode::COMMAND, 0));
        assert_eq!(h.drain(), vec![EngineEvent::OverlayHidden]);
        assert!(h.executor.fired().is_empty());
    }

    #[test]
    fn test_quick_assign_requests_assignment() {
        let keys = vec![
            ShortcutKey::normal(keycode::OPTION),
            ShortcutKey::normal(KEY_S),
        ];
        let combo = ComboId::from_keys(&keys);
        let builtins = BuiltinShortcuts {
            cheatsheet: None,
            quick_assign: Some(keys),
        };
        let mut h = Harness::new(vec![], builtins);
        h.key(0, KeyTransition::flags_changed(keycode::OPTION, flags::OPTION));
        h.key(0, KeyTransition::down(KEY_S));
        h.key(20, KeyTransition::up(KEY_S));
        assert_eq!(h.drain(), vec![EngineEvent::QuickAssignRequested { combo }]);
    }

    #[test]
    fn test_set_bindings_is_debounced() {
        let mut h = Harness::new(vec![], BuiltinShortcuts::default());
        h.send(0, EngineInput::SetBindings(vec![url_binding("a", cmd_a(), TriggerType::Press)]));
        h.send(100, EngineInput::SetBindings(vec![
            url_binding("a", cmd_a(), TriggerType::Press),
            url_binding("b", cmd_a(), TriggerType::Hold),
        ]));
        h.tick(200);
        assert!(h.drain().is_empty());

        h.tick(250);
        assert_eq!(h.drain(), vec![EngineEvent::BindingsReloaded { count: 2 }]);
        assert_eq!(h.engine.bindings().len(), 2);
    }

    #[test]
    fn test_conflicts_changed_only_on_difference() {
        let mut h = Harness::new(vec![], BuiltinShortcuts::default());
        let conflicting = vec![
            url_binding("a", cmd_a(), TriggerType::Press),
            url_binding("b", cmd_a(), TriggerType::Press),
        ];

        h.engine.rebuild(conflicting.clone());
        let events = h.drain();
        assert!(matches!(
            &events[0],
            EngineEvent::ConflictsChanged { conflicts } if conflicts.is_conflicting("a") && conflicts.is_conflicting("b")
        ));
        assert_eq!(h.engine.conflicts().groups.len(), 1);
        assert_eq!(h.engine.conflicts().groups[0].binding_ids, vec!["a", "b"]);

        h.engine.rebuild(conflicting);
        assert_eq!(h.drain(), vec![EngineEvent::BindingsReloaded { count: 2 }]);

        h.engine.rebuild(vec![url_binding("a", cmd_a(), TriggerType::Press)]);
        let events = h.drain();
        assert_eq!(
            events[0],
            EngineEvent::ConflictsChanged {
                conflicts: ConflictReport::default()
            }
        );
        assert!(h.engine.conflicts().is_empty());
    }

    #[test]
    fn test_conflicting_bindings_all_fire() {
        let mut h = Harness::new(
            vec![
                url_binding("a", cmd_a(), TriggerType::Press),
                url_binding("b", cmd_a(), TriggerType::Press),
            ],
            BuiltinShortcuts::default(),
        );
        h.tap_cmd_a(0);
        assert_eq!(h.executor.fired(), vec!["a", "b"]);
    }

    #[test]
    fn test_keys_ignored_while_stopped() {
        let mut h = Harness::new(
            vec![url_binding("x", cmd_a(), TriggerType::Press)],
            BuiltinShortcuts::default(),
        );
        h.send(0, EngineInput::Stop);
        h.tap_cmd_a(10);
        assert!(h.executor.fired().is_empty());
    }

    async fn next_fired(events: &mut broadcast::Receiver<EngineEvent>) -> String {
        loop {
            match events.recv().await {
                Ok(EngineEvent::BindingFired { binding_id, .. }) => return binding_id,
                Ok(_) => continue,
                Err(e) => panic!("event channel closed: {e}"),
            }
        }
    }

    async fn send_tap(tx: &mpsc::Sender<EngineInput>) {
        for transition in [
            KeyTransition::flags_changed(keycode::COMMAND, flags::COMMAND),
            KeyTransition::down(KEY_A),
            KeyTransition::up(KEY_A),
            KeyTransition::flags_changed(keycode::COMMAND, 0),
        ] {
            tx.send(EngineInput::Key(transition)).await.unwrap();
        }
    }

    fn spawn_engine(
        bindings: Vec<Binding>,
    ) -> (
        mpsc::Sender<EngineInput>,
        broadcast::Receiver<EngineEvent>,
        Arc<RecordingExecutor>,
        tokio::task::JoinHandle<()>,
    ) {
        let executor = Arc::new(RecordingExecutor::default());
        let (event_tx, events) = broadcast::channel(64);
        let (tx, rx) = mpsc::channel(32);
        let mut engine = HotkeyEngine::new(
            Timing::default(),
            BuiltinShortcuts::default(),
            executor.clone(),
            event_tx,
        );
        engine.rebuild(bindings);
        let handle = tokio::spawn(async move { engine.run(rx).await });
        (tx, events, executor, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_single_press_after_window() {
        let (tx, mut events, executor, handle) = spawn_engine(vec![
            url_binding("x", cmd_a(), TriggerType::Press),
            url_binding("y", cmd_a(), TriggerType::DoublePress),
        ]);
        tx.send(EngineInput::Start).await.unwrap();

        let start = Instant::now();
        send_tap(&tx).await;
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(next_fired(&mut events).await, "x");
        assert!(Instant::now() - start >= Duration::from_millis(400));
        assert_eq!(executor.fired(), vec!["x"]);

        drop(tx);
        tokio_test::assert_ok!(handle.await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_double_press_resolves_early() {
        let (tx, mut events, executor, handle) = spawn_engine(vec![
            url_binding("x", cmd_a(), TriggerType::Press),
            url_binding("y", cmd_a(), TriggerType::DoublePress),
        ]);
        tx.send(EngineInput::Start).await.unwrap();

        let start = Instant::now();
        send_tap(&tx).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        send_tap(&tx).await;

        assert_eq!(next_fired(&mut events).await, "y");
        let elapsed = Instant::now() - start;
        assert!(elapsed >= Duration::from_millis(200) && elapsed < Duration::from_millis(250));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(executor.fired(), vec!["y"]);

        drop(tx);
        tokio_test::assert_ok!(handle.await);
    }
}
