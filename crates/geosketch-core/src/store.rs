//! Reactive store contract shared by the drawing and measurement tools.
//!
//! The store is the only channel between the tools and the rest of the
//! application: commands come in as observed changes, derived state goes out
//! as dispatched actions. Subscribers are notified synchronously, in dispatch
//! order, and only when their selected value actually changed.

use crate::controller::InteractionMode;
use crate::feature::{FeatureId, StyleOption};
use crate::kind::{DrawKindRequest, SessionKind};
use crate::measure::MeasureStatistic;
use crate::sketch::SketchInfo;
use crate::storage::PersistenceCorrelation;
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};

/// Severity of a user-facing notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Info,
    Warn,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
}

impl Notification {
    pub fn warn(message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Warn,
            message: message.into(),
        }
    }
}

/// Per-tool slice of the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ToolSlice {
    /// Geometry kind the user asked to draw.
    pub requested: Option<DrawKindRequest>,
    /// Command counters. Every dispatch bumps the counter so repeated
    /// commands are observed as changes.
    pub finish: u64,
    pub reset: u64,
    pub remove: u64,
    pub selection: Vec<FeatureId>,
    pub mode: Option<InteractionMode>,
    /// Derived pointer state of the running sketch.
    pub pointer: Option<SketchInfo>,
    pub file_save_result: Option<PersistenceCorrelation>,
}

/// Everything the tools read from or write to the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreState {
    pub draw: ToolSlice,
    pub measurement: ToolSlice,
    /// Default style of new features.
    pub style: StyleOption,
    /// Style of the selected feature, for style editors to bind against.
    pub selected_style: Option<StyleOption>,
    /// Description of the selected feature.
    pub description: Option<String>,
    pub statistic: MeasureStatistic,
    pub display_ruler: bool,
    pub current_tool: Option<SessionKind>,
    pub notifications: Vec<Notification>,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            draw: ToolSlice::default(),
            measurement: ToolSlice::default(),
            style: StyleOption::default(),
            selected_style: None,
            description: None,
            statistic: MeasureStatistic::default(),
            display_ruler: true,
            current_tool: None,
            notifications: Vec::new(),
        }
    }
}

impl StoreState {
    pub fn slice(&self, kind: SessionKind) -> &ToolSlice {
        match kind {
            SessionKind::Draw => &self.draw,
            SessionKind::Measure => &self.measurement,
        }
    }

    pub fn slice_mut(&mut self, kind: SessionKind) -> &mut ToolSlice {
        match kind {
            SessionKind::Draw => &mut self.draw,
            SessionKind::Measure => &mut self.measurement,
        }
    }

    /// Apply an action.
    pub fn reduce(&mut self, action: StoreAction) {
        match action {
            StoreAction::RequestKind(kind, request) => self.slice_mut(kind).requested = request,
            StoreAction::Finish(kind) => self.slice_mut(kind).finish += 1,
            StoreAction::Reset(kind) => self.slice_mut(kind).reset += 1,
            StoreAction::Remove(kind) => self.slice_mut(kind).remove += 1,
            StoreAction::SetStyle(style) => self.style = style,
            StoreAction::SetSelectedStyle(style) => self.selected_style = style,
            StoreAction::SetDescription(description) => self.description = description,
            StoreAction::SetSelection(kind, ids) => self.slice_mut(kind).selection = ids,
            StoreAction::SetMode(kind, mode) => self.slice_mut(kind).mode = Some(mode),
            StoreAction::SetPointer(kind, info) => self.slice_mut(kind).pointer = info,
            StoreAction::SetFileSaveResult(correlation) => {
                // Both tools share one persisted resource.
                self.draw.file_save_result = Some(correlation.clone());
                self.measurement.file_save_result = Some(correlation);
            }
            StoreAction::SetStatistic(statistic) => self.statistic = statistic,
            StoreAction::SetDisplayRuler(display) => self.display_ruler = display,
            StoreAction::SetCurrentTool(tool) => self.current_tool = tool,
            StoreAction::Notify(notification) => self.notifications.push(notification),
        }
    }
}

/// Mutations of the store.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreAction {
    RequestKind(SessionKind, Option<DrawKindRequest>),
    Finish(SessionKind),
    Reset(SessionKind),
    Remove(SessionKind),
    SetStyle(StyleOption),
    SetSelectedStyle(Option<StyleOption>),
    SetDescription(Option<String>),
    SetSelection(SessionKind, Vec<FeatureId>),
    SetMode(SessionKind, InteractionMode),
    SetPointer(SessionKind, Option<SketchInfo>),
    SetFileSaveResult(PersistenceCorrelation),
    SetStatistic(MeasureStatistic),
    SetDisplayRuler(bool),
    SetCurrentTool(Option<SessionKind>),
    Notify(Notification),
}

/// Parts of the state a subscriber can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Selector {
    RequestedKind(SessionKind),
    Finish(SessionKind),
    Reset(SessionKind),
    Remove(SessionKind),
    Selection(SessionKind),
    SelectedStyle,
    Description,
    DisplayRuler,
    CurrentTool,
}

impl Selector {
    pub fn select(self, state: &StoreState) -> StoreChange {
        match self {
            Selector::RequestedKind(kind) => StoreChange::RequestedKind(state.slice(kind).requested.clone()),
            Selector::Finish(kind) => StoreChange::Finish(state.slice(kind).finish),
            Selector::Reset(kind) => StoreChange::Reset(state.slice(kind).reset),
            Selector::Remove(kind) => StoreChange::Remove(state.slice(kind).remove),
            Selector::Selection(kind) => StoreChange::Selection(state.slice(kind).selection.clone()),
            Selector::SelectedStyle => StoreChange::SelectedStyle(state.selected_style.clone()),
            Selector::Description => StoreChange::Description(state.description.clone()),
            Selector::DisplayRuler => StoreChange::DisplayRuler(state.display_ruler),
            Selector::CurrentTool => StoreChange::CurrentTool(state.current_tool),
        }
    }
}

/// A selected value, as delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreChange {
    RequestedKind(Option<DrawKindRequest>),
    Finish(u64),
    Reset(u64),
    Remove(u64),
    Selection(Vec<FeatureId>),
    SelectedStyle(Option<StyleOption>),
    Description(Option<String>),
    DisplayRuler(bool),
    CurrentTool(Option<SessionKind>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

pub type StoreCallback = Box<dyn FnMut(&StoreChange)>;

/// Observe/dispatch capability injected into each session.
pub trait ReactiveStore {
    /// Snapshot of the current state.
    fn state(&self) -> StoreState;

    fn dispatch(&self, action: StoreAction);

    /// Call `callback` whenever the value picked by `selector` changes, and
    /// once right away if `fire_on_subscribe` is set.
    fn observe(&self, selector: Selector, callback: StoreCallback, fire_on_subscribe: bool) -> SubscriptionId;

    fn unobserve(&self, id: SubscriptionId);
}

struct Subscriber {
    id: SubscriptionId,
    selector: Selector,
    last: StoreChange,
    callback: StoreCallback,
}

/// Single-threaded store kept in memory.
#[derive(Default)]
pub struct MemoryStore {
    state: RefCell<StoreState>,
    subscribers: RefCell<Vec<Subscriber>>,
    removed: RefCell<Vec<SubscriptionId>>,
    next_id: Cell<u64>,
    notifying: Cell<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: StoreState) -> Self {
        Self {
            state: RefCell::new(state),
            ..Self::default()
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }

    /// Deliver pending changes until the state settles. Callbacks may
    /// dispatch or unsubscribe; those effects are picked up by the next round.
    fn notify(&self) {
        if self.notifying.replace(true) {
            return;
        }
        loop {
            let mut subscribers = std::mem::take(&mut *self.subscribers.borrow_mut());
            let mut delivered = false;
            for subscriber in subscribers.iter_mut() {
                if self.removed.borrow().contains(&subscriber.id) {
                    continue;
                }
                let current = subscriber.selector.select(&self.state.borrow());
                if current != subscriber.last {
                    subscriber.last = current.clone();
                    (subscriber.callback)(&current);
                    delivered = true;
                }
            }
            // Keep subscriptions added by callbacks.
            let added = std::mem::take(&mut *self.subscribers.borrow_mut());
            subscribers.extend(added);
            let removed = std::mem::take(&mut *self.removed.borrow_mut());
            subscribers.retain(|subscriber| !removed.contains(&subscriber.id));
            *self.subscribers.borrow_mut() = subscribers;
            if !delivered {
                break;
            }
        }
        self.notifying.set(false);
    }
}

impl ReactiveStore for MemoryStore {
    fn state(&self) -> StoreState {
        self.state.borrow().clone()
    }

    fn dispatch(&self, action: StoreAction) {
        log::trace!("dispatch {:?}", action);
        self.state.borrow_mut().reduce(action);
        self.notify();
    }

    fn observe(&self, selector: Selector, mut callback: StoreCallback, fire_on_subscribe: bool) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        let last = selector.select(&self.state.borrow());
        if fire_on_subscribe {
            callback(&last);
        }
        self.subscribers.borrow_mut().push(Subscriber {
            id,
            selector,
            last,
            callback,
        });
        id
    }

    fn unobserve(&self, id: SubscriptionId) {
        if self.notifying.get() {
            self.removed.borrow_mut().push(id);
        }
        self.subscribers.borrow_mut().retain(|subscriber| subscriber.id != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::DrawKind;
    use std::rc::Rc;

    fn recorder() -> (Rc<RefCell<Vec<StoreChange>>>, StoreCallback) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        (seen, Box::new(move |change: &StoreChange| sink.borrow_mut().push(change.clone())))
    }

    #[test]
    fn test_observe_only_fires_on_change() {
        let store = MemoryStore::new();
        let (seen, callback) = recorder();
        store.observe(Selector::Selection(SessionKind::Draw), callback, false);

        let ids = vec![FeatureId::from("draw_line_1")];
        store.dispatch(StoreAction::SetSelection(SessionKind::Draw, ids.clone()));
        store.dispatch(StoreAction::SetSelection(SessionKind::Draw, ids.clone()));
        store.dispatch(StoreAction::SetSelection(SessionKind::Measure, ids.clone()));

        assert_eq!(*seen.borrow(), vec![StoreChange::Selection(ids)]);
    }

    #[test]
    fn test_fire_on_subscribe() {
        let store = MemoryStore::new();
        store.dispatch(StoreAction::RequestKind(SessionKind::Draw, Some(DrawKind::Line.into())));
        let (seen, callback) = recorder();
        store.observe(Selector::RequestedKind(SessionKind::Draw), callback, true);
        assert_eq!(
            *seen.borrow(),
            vec![StoreChange::RequestedKind(Some(DrawKindRequest::Kind(DrawKind::Line)))]
        );
    }

    #[test]
    fn test_repeated_commands_are_observed() {
        let store = MemoryStore::new();
        let (seen, callback) = recorder();
        store.observe(Selector::Finish(SessionKind::Measure), callback, false);
        store.dispatch(StoreAction::Finish(SessionKind::Measure));
        store.dispatch(StoreAction::Finish(SessionKind::Measure));
        assert_eq!(*seen.borrow(), vec![StoreChange::Finish(1), StoreChange::Finish(2)]);
    }

    #[test]
    fn test_save_result_is_mirrored() {
        let store = MemoryStore::new();
        let correlation = PersistenceCorrelation {
            admin_id: "a_1".to_string(),
            file_id: "f_1".to_string(),
        };
        store.dispatch(StoreAction::SetFileSaveResult(correlation.clone()));
        let state = store.state();
        assert_eq!(state.draw.file_save_result.as_ref(), Some(&correlation));
        assert_eq!(state.measurement.file_save_result.as_ref(), Some(&correlation));
    }

    #[test]
    fn test_unobserve() {
        let store = MemoryStore::new();
        let (seen, callback) = recorder();
        let id = store.observe(Selector::DisplayRuler, callback, false);
        store.unobserve(id);
        store.dispatch(StoreAction::SetDisplayRuler(false));
        assert!(seen.borrow().is_empty());
        assert_eq!(store.subscriber_count(), 0);
    }

    #[test]
    fn test_reentrant_dispatch() {
        let store = Rc::new(MemoryStore::new());
        let inner = store.clone();
        store.observe(
            Selector::CurrentTool,
            Box::new(move |_change: &StoreChange| {
                inner.dispatch(StoreAction::SetDisplayRuler(false));
            }),
            false,
        );
        let (seen, callback) = recorder();
        store.observe(Selector::DisplayRuler, callback, false);

        store.dispatch(StoreAction::SetCurrentTool(Some(SessionKind::Measure)));
        assert_eq!(*seen.borrow(), vec![StoreChange::DisplayRuler(false)]);
    }
}
