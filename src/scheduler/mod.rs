//! Scheduler: owns `TargetState` for every target, applies priority and
//! admission rules, and drives the per-target pipeline (§4.7).

pub mod event;
pub mod state;

use std::collections::{HashMap, HashSet, VecDeque};

pub use event::Event;
pub use state::TargetState;

/// Which compile phase a target should run next, decided by whether it has
/// a connected browser session (§4.7 phase policy).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No connected session: verify only, don't emit JavaScript.
    TypecheckOnly,
    /// At least one connected session: produce a real artifact.
    FullBuild,
}

/// Priority tier a pending target falls into (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Tier {
    Focused,
    Connected,
    Other,
}

/// Bookkeeping for one target.
struct TargetEntry {
    state: TargetState,
    connected_sessions: HashSet<u64>,
    /// Set when an event arrives while a phase is active; consumed (and the
    /// target re-queued) once the active phase's child actually exits
    /// (§4.7 coalescing: "multiple events during `ElmMake` cause exactly
    /// one `Interrupted -> QueuedForElmMake` transition").
    pending_restart: bool,
    declaration_index: usize,
}

/// Owns every target's [`TargetState`] and produces work orders.
pub struct Scheduler {
    targets: HashMap<String, TargetEntry>,
    focused_target: Option<String>,
    slot_budget: usize,
    active_slots: usize,
    events: VecDeque<Event>,
    shutdown_requested: bool,
}

impl Scheduler {
    /// Creates a scheduler for `target_names`, in configuration declaration
    /// order, with `slot_budget` shared admission slots (§4.7: `ElmMake`
    /// and `typecheckOnly` share the same budget).
    #[must_use]
    pub fn new(target_names: &[String], slot_budget: usize) -> Self {
        let targets = target_names
            .iter()
            .enumerate()
            .map(|(index, name)| {
                (
                    name.clone(),
                    TargetEntry {
                        state: TargetState::Idle,
                        connected_sessions: HashSet::new(),
                        pending_restart: false,
                        declaration_index: index,
                    },
                )
            })
            .collect();

        Self {
            targets,
            focused_target: None,
            slot_budget: slot_budget.max(1),
            active_slots: 0,
            events: VecDeque::new(),
            shutdown_requested: false,
        }
    }

    /// Returns the current state of `target`, if known.
    #[must_use]
    pub fn state_of(&self, target: &str) -> Option<TargetState> {
        self.targets.get(target).map(|e| e.state)
    }

    /// Which phase `target` should compile with, based on whether it has a
    /// connected session (§4.7).
    #[must_use]
    pub fn phase_for(&self, target: &str) -> Phase {
        match self.targets.get(target) {
            Some(entry) if !entry.connected_sessions.is_empty() => Phase::FullBuild,
            _ => Phase::TypecheckOnly,
        }
    }

    /// Feeds one event into the scheduler, applying interruption and
    /// coalescing rules immediately. Does not itself admit new work — call
    /// [`Self::admit_next`] in the event loop after draining events.
    pub fn handle_event(&mut self, event: Event) {
        match &event {
            Event::ShutdownRequested => {
                self.shutdown_requested = true;
                return;
            }
            Event::SessionConnected { target, socket_id } => {
                if let Some(entry) = self.targets.get_mut(target) {
                    entry.connected_sessions.insert(*socket_id);
                }
                self.touch(target);
                return;
            }
            Event::SessionDisconnected { target, socket_id } => {
                if let Some(entry) = self.targets.get_mut(target) {
                    entry.connected_sessions.remove(socket_id);
                }
                return;
            }
            Event::FocusedTab { target } => {
                self.focused_target = Some(target.clone());
                return;
            }
            // §4.8: these two are "persist only" — the caller updates
            // PersistedState, but no rebuild is warranted (unlike
            // `ChangedCompilationMode`, which does fall through below).
            Event::ChangedBrowserUiPosition { .. } | Event::ChangedOpenErrorOverlay { .. } => {
                return;
            }
            _ => {}
        }

        if let Some(target) = event.target() {
            self.touch(target);
        } else {
            // Global events (file change not scoped to one target, config
            // reload, project file change) touch every target; callers that
            // have already computed `DependencyGraph::affected_by` should
            // prefer calling `touch` directly per affected target instead.
            let names: Vec<String> = self.targets.keys().cloned().collect();
            for name in names {
                self.touch(&name);
            }
        }
    }

    /// Marks `target` as having new work, applying the coalescing and
    /// interruption rules from §4.7.
    pub fn touch(&mut self, target: &str) {
        let Some(entry) = self.targets.get_mut(target) else {
            return;
        };
        match entry.state {
            TargetState::Idle | TargetState::Succeeded | TargetState::Failed => {
                entry.state = TargetState::QueuedForElmMake;
            }
            TargetState::QueuedForElmMake | TargetState::QueuedForPostprocess => {
                // Already queued: coalesces into the same pending build, no
                // state change needed.
            }
            TargetState::ElmMake | TargetState::Postprocess | TargetState::Injecting | TargetState::Writing => {
                entry.pending_restart = true;
            }
            TargetState::ElmMakeDone | TargetState::Interrupted => {
                // Mid-pipeline transition; a restart is already implied.
                entry.pending_restart = true;
            }
        }
    }

    /// Whether `target` accumulated a restart request while its active
    /// phase was running. Callers finishing a build should check this
    /// before finalising into `Succeeded`/`Failed` (§4.7 coalescing).
    #[must_use]
    pub fn has_pending_restart(&self, target: &str) -> bool {
        self.targets.get(target).is_some_and(|entry| entry.pending_restart)
    }

    /// Called when the worker running `target`'s active phase has actually
    /// exited after being signalled. Applies the single
    /// `Interrupted -> QueuedForElmMake` transition if a restart was
    /// requested while it was active.
    pub fn child_exited_after_interrupt(&mut self, target: &str) {
        if let Some(entry) = self.targets.get_mut(target) {
            entry.state = TargetState::Interrupted;
            if entry.pending_restart {
                entry.pending_restart = false;
                entry.state = TargetState::QueuedForElmMake;
            }
        }
    }

    fn tier_of(&self, target: &str) -> Tier {
        if self.focused_target.as_deref() == Some(target) {
            return Tier::Focused;
        }
        match self.targets.get(target) {
            Some(entry) if !entry.connected_sessions.is_empty() => Tier::Connected,
            _ => Tier::Other,
        }
    }

    /// Returns the names of targets currently queued (for either phase),
    /// ordered by §4.7 priority: focused target first, then targets with a
    /// connected session, then the rest; declaration order breaks ties
    /// within a tier.
    #[must_use]
    pub fn queued_in_priority_order(&self) -> Vec<String> {
        let mut queued: Vec<(&String, &TargetEntry)> = self
            .targets
            .iter()
            .filter(|(_, e)| matches!(e.state, TargetState::QueuedForElmMake | TargetState::QueuedForPostprocess))
            .collect();

        queued.sort_by_key(|(name, entry)| (self.tier_of(name), entry.declaration_index));
        queued.into_iter().map(|(name, _)| name.clone()).collect()
    }

    /// Admits the next eligible queued target if a slot is free, moving it
    /// from `QueuedForElmMake`/`QueuedForPostprocess` into its active phase.
    /// Returns the admitted target's name, if any.
    pub fn admit_next(&mut self) -> Option<String> {
        if self.active_slots >= self.slot_budget {
            return None;
        }
        let candidate = self.queued_in_priority_order().into_iter().next()?;
        let entry = self.targets.get_mut(&candidate)?;
        entry.state = match entry.state {
            TargetState::QueuedForElmMake => TargetState::ElmMake,
            TargetState::QueuedForPostprocess => TargetState::Postprocess,
            other => other,
        };
        self.active_slots += 1;
        Some(candidate)
    }

    /// Records that `target`'s active phase slot has been released (the
    /// compile or postprocess step finished, one way or another).
    pub fn release_slot(&mut self) {
        self.active_slots = self.active_slots.saturating_sub(1);
    }

    /// Transitions `target` after a successful compile: on to postprocess if
    /// it has one, otherwise straight to injection (watch mode) or writing
    /// (one-shot).
    pub fn elm_make_succeeded(&mut self, target: &str, has_postprocess: bool, watch_mode: bool) {
        if let Some(entry) = self.targets.get_mut(target) {
            entry.state = if has_postprocess {
                TargetState::QueuedForPostprocess
            } else if watch_mode {
                TargetState::Injecting
            } else {
                TargetState::Writing
            };
        }
    }

    /// Transitions `target` into `Failed`. Per §3/§8, the existing output
    /// file is never overwritten on this path; callers must not have
    /// written anything yet.
    pub fn fail(&mut self, target: &str) {
        if let Some(entry) = self.targets.get_mut(target) {
            entry.state = TargetState::Failed;
        }
    }

    /// Transitions `target` into `Succeeded`.
    pub fn succeed(&mut self, target: &str) {
        if let Some(entry) = self.targets.get_mut(target) {
            entry.state = TargetState::Succeeded;
        }
    }

    /// Advances `target` from `Postprocess`/`ElmMakeDone` into `Injecting`
    /// (watch mode) and then the caller drives `Writing` once the rewrite
    /// completes.
    pub fn advance_to_injecting(&mut self, target: &str) {
        if let Some(entry) = self.targets.get_mut(target) {
            entry.state = TargetState::Injecting;
        }
    }

    /// Advances `target` into `Writing`.
    pub fn advance_to_writing(&mut self, target: &str) {
        if let Some(entry) = self.targets.get_mut(target) {
            entry.state = TargetState::Writing;
        }
    }

    /// Whether shutdown has been requested and should be honoured once
    /// in-flight work drains.
    #[must_use]
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested
    }

    /// The stuck-in-progress watchdog (§4.7): call after believing all work
    /// has drained (no queued targets, `active_slots == 0`); returns the
    /// names of any targets still in an active phase, which is a
    /// soft-assertion failure used in tests.
    #[must_use]
    pub fn stuck_in_progress(&self) -> Vec<String> {
        self.targets
            .iter()
            .filter(|(_, e)| e.state.is_active())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Whether every target is quiesced (`Idle`, `Succeeded`, or `Failed`)
    /// and no work is queued.
    #[must_use]
    pub fn is_quiescent(&self) -> bool {
        self.active_slots == 0
            && self.targets.values().all(|e| {
                matches!(e.state, TargetState::Idle | TargetState::Succeeded | TargetState::Failed)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(n: &[&str]) -> Vec<String> {
        n.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn touch_moves_idle_target_to_queued() {
        let mut scheduler = Scheduler::new(&names(&["Main"]), 2);
        scheduler.touch("Main");
        assert_eq!(scheduler.state_of("Main"), Some(TargetState::QueuedForElmMake));
    }

    #[test]
    fn admit_next_respects_slot_budget() {
        let mut scheduler = Scheduler::new(&names(&["A", "B", "C"]), 2);
        for name in ["A", "B", "C"] {
            scheduler.touch(name);
        }
        assert!(scheduler.admit_next().is_some());
        assert!(scheduler.admit_next().is_some());
        assert!(scheduler.admit_next().is_none());
    }

    #[test]
    fn focused_tab_outranks_connected_and_others() {
        let mut scheduler = Scheduler::new(&names(&["A", "B", "C"]), 1);
        scheduler.handle_event(Event::SessionConnected { target: "B".to_string(), socket_id: 1 });
        scheduler.handle_event(Event::FocusedTab { target: "C".to_string() });
        for name in ["A", "B", "C"] {
            scheduler.touch(name);
        }
        let order = scheduler.queued_in_priority_order();
        assert_eq!(order, vec!["C", "B", "A"]);
    }

    #[test]
    fn declaration_order_breaks_ties_within_tier() {
        let mut scheduler = Scheduler::new(&names(&["Zed", "Alpha"]), 2);
        scheduler.touch("Zed");
        scheduler.touch("Alpha");
        assert_eq!(scheduler.queued_in_priority_order(), vec!["Zed", "Alpha"]);
    }

    #[test]
    fn multiple_touches_while_queued_coalesce() {
        let mut scheduler = Scheduler::new(&names(&["Main"]), 2);
        scheduler.touch("Main");
        scheduler.touch("Main");
        scheduler.touch("Main");
        assert_eq!(scheduler.queued_in_priority_order().len(), 1);
    }

    #[test]
    fn touch_during_active_phase_sets_pending_restart_not_immediate_interrupt() {
        let mut scheduler = Scheduler::new(&names(&["Main"]), 1);
        scheduler.touch("Main");
        scheduler.admit_next();
        assert_eq!(scheduler.state_of("Main"), Some(TargetState::ElmMake));
        scheduler.touch("Main");
        scheduler.touch("Main");
        assert_eq!(scheduler.state_of("Main"), Some(TargetState::ElmMake));

        scheduler.child_exited_after_interrupt("Main");
        assert_eq!(scheduler.state_of("Main"), Some(TargetState::QueuedForElmMake));
    }

    #[test]
    fn has_pending_restart_reflects_touches_during_active_phase() {
        let mut scheduler = Scheduler::new(&names(&["Main"]), 1);
        scheduler.touch("Main");
        scheduler.admit_next();
        assert!(!scheduler.has_pending_restart("Main"));
        scheduler.touch("Main");
        assert!(scheduler.has_pending_restart("Main"));
        scheduler.child_exited_after_interrupt("Main");
        assert!(!scheduler.has_pending_restart("Main"));
    }

    #[test]
    fn phase_for_target_without_session_is_typecheck_only() {
        let scheduler = Scheduler::new(&names(&["Main"]), 1);
        assert_eq!(scheduler.phase_for("Main"), Phase::TypecheckOnly);
    }

    #[test]
    fn phase_for_target_with_session_is_full_build() {
        let mut scheduler = Scheduler::new(&names(&["Main"]), 1);
        scheduler.handle_event(Event::SessionConnected { target: "Main".to_string(), socket_id: 7 });
        assert_eq!(scheduler.phase_for("Main"), Phase::FullBuild);
    }

    #[test]
    fn stuck_in_progress_reports_active_targets_after_believed_quiescence() {
        let mut scheduler = Scheduler::new(&names(&["Main"]), 1);
        scheduler.touch("Main");
        scheduler.admit_next();
        assert!(!scheduler.is_quiescent());
        assert_eq!(scheduler.stuck_in_progress(), vec!["Main".to_string()]);
    }

    #[test]
    fn is_quiescent_true_when_all_idle_and_no_slots_used() {
        let scheduler = Scheduler::new(&names(&["Main"]), 1);
        assert!(scheduler.is_quiescent());
        assert!(scheduler.stuck_in_progress().is_empty());
    }

    #[test]
    fn release_slot_frees_budget_for_next_admission() {
        let mut scheduler = Scheduler::new(&names(&["A", "B"]), 1);
        scheduler.touch("A");
        scheduler.touch("B");
        scheduler.admit_next();
        assert!(scheduler.admit_next().is_none());
        scheduler.release_slot();
        assert!(scheduler.admit_next().is_some());
    }

    #[test]
    fn changed_browser_ui_position_does_not_enqueue_a_rebuild() {
        let mut scheduler = Scheduler::new(&names(&["Main"]), 1);
        scheduler.handle_event(Event::ChangedBrowserUiPosition {
            target: "Main".to_string(),
            position: crate::persisted_state::BrowserUiPosition::TopLeft,
        });
        assert_eq!(scheduler.state_of("Main"), Some(TargetState::Idle));
    }

    #[test]
    fn changed_open_error_overlay_does_not_enqueue_a_rebuild() {
        let mut scheduler = Scheduler::new(&names(&["Main"]), 1);
        scheduler.handle_event(Event::ChangedOpenErrorOverlay { target: "Main".to_string(), open: true });
        assert_eq!(scheduler.state_of("Main"), Some(TargetState::Idle));
    }

    #[test]
    fn changed_compilation_mode_does_enqueue_a_rebuild() {
        let mut scheduler = Scheduler::new(&names(&["Main"]), 1);
        scheduler.handle_event(Event::ChangedCompilationMode {
            target: "Main".to_string(),
            mode: crate::persisted_state::CompilationMode::Optimize,
        });
        assert_eq!(scheduler.state_of("Main"), Some(TargetState::QueuedForElmMake));
    }

    #[test]
    fn shutdown_event_is_recorded() {
        let mut scheduler = Scheduler::new(&names(&["Main"]), 1);
        assert!(!scheduler.shutdown_requested());
        scheduler.handle_event(Event::ShutdownRequested);
        assert!(scheduler.shutdown_requested());
    }
}
