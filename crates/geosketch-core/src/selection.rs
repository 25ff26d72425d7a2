//! Bounded selection set and cross-tool handoff.

use crate::feature::{Feature, FeatureCollection, FeatureId, StyleOption};
use crate::kind::SessionKind;
use crate::store::{ReactiveStore, StoreAction};

/// Difference between two selections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionChange {
    pub added: Vec<FeatureId>,
    pub removed: Vec<FeatureId>,
}

impl SelectionChange {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// A feature that belongs to the other tool and must be selected there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handoff {
    pub target: SessionKind,
    pub feature_id: FeatureId,
}

/// Outcome of selecting a single feature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectOutcome {
    /// Already selected.
    Unchanged,
    Selected(SelectionChange),
    /// Not ours; nothing was selected locally.
    Handoff(Handoff),
}

/// Ordered selection of at most `max_size` feature ids, oldest first.
#[derive(Debug, Clone)]
pub struct SelectionCoordinator {
    kind: SessionKind,
    max_size: usize,
    selected: Vec<FeatureId>,
}

impl SelectionCoordinator {
    pub fn new(kind: SessionKind, max_size: usize) -> Self {
        Self {
            kind,
            max_size: max_size.max(1),
            selected: Vec::new(),
        }
    }

    pub fn selected(&self) -> &[FeatureId] {
        &self.selected
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    pub fn contains(&self, id: &FeatureId) -> bool {
        self.selected.contains(id)
    }

    /// Replace the selection. Duplicates are dropped and only the newest
    /// `max_size` ids are kept. Returns an empty change if nothing differs.
    pub fn set_selection(&mut self, ids: &[FeatureId]) -> SelectionChange {
        let mut next: Vec<FeatureId> = Vec::with_capacity(ids.len());
        for id in ids {
            if !next.contains(id) {
                next.push(id.clone());
            }
        }
        if next.len() > self.max_size {
            next.drain(..next.len() - self.max_size);
        }
        if next == self.selected {
            return SelectionChange::default();
        }
        let change = SelectionChange {
            added: next.iter().filter(|id| !self.selected.contains(id)).cloned().collect(),
            removed: self.selected.iter().filter(|id| !next.contains(id)).cloned().collect(),
        };
        self.selected = next;
        change
    }

    /// Select one feature, evicting the oldest members at capacity.
    ///
    /// Features created by the other tool are handed off instead.
    pub fn select(&mut self, id: &FeatureId) -> SelectOutcome {
        if let Some(owner) = id.session_kind() {
            if owner != self.kind {
                return SelectOutcome::Handoff(Handoff {
                    target: owner,
                    feature_id: id.clone(),
                });
            }
        }
        if self.contains(id) {
            return SelectOutcome::Unchanged;
        }
        let mut change = SelectionChange::default();
        while self.selected.len() >= self.max_size {
            change.removed.push(self.selected.remove(0));
        }
        self.selected.push(id.clone());
        change.added.push(id.clone());
        SelectOutcome::Selected(change)
    }

    /// Drop one id, e.g. after its feature was deleted.
    pub fn remove(&mut self, id: &FeatureId) -> bool {
        let before = self.selected.len();
        self.selected.retain(|existing| existing != id);
        before != self.selected.len()
    }

    pub fn clear(&mut self) -> SelectionChange {
        SelectionChange {
            added: Vec::new(),
            removed: std::mem::take(&mut self.selected),
        }
    }

    /// Style shown in the editors for a selected feature.
    pub fn derived_style(feature: &Feature, default: &StyleOption) -> StyleOption {
        feature.style.resolve(default)
    }

    /// Publish the selection to this tool's slice of the store.
    pub fn publish(&self, store: &dyn ReactiveStore) {
        store.dispatch(StoreAction::SetSelection(self.kind, self.selected.clone()));
    }

    /// Publish the derived style and description of the newest member. An
    /// empty selection clears both.
    ///
    /// Both values are shared by the tools; only the current tool may write
    /// them.
    pub fn publish_derived(&self, store: &dyn ReactiveStore, features: &FeatureCollection) {
        let feature = self.selected.last().and_then(|id| features.get(id));
        match feature {
            Some(feature) => {
                let default = store.state().style;
                store.dispatch(StoreAction::SetSelectedStyle(Some(Self::derived_style(feature, &default))));
                store.dispatch(StoreAction::SetDescription(feature.description.clone()));
            }
            None => {
                store.dispatch(StoreAction::SetSelectedStyle(None));
                store.dispatch(StoreAction::SetDescription(None));
            }
        }
    }

    /// Select the feature in the other tool and make that tool current.
    pub fn handoff(store: &dyn ReactiveStore, handoff: &Handoff) {
        log::debug!("handing {} over to the {} tool", handoff.feature_id, handoff.target);
        store.dispatch(StoreAction::SetSelection(handoff.target, vec![handoff.feature_id.clone()]));
        store.dispatch(StoreAction::SetCurrentTool(Some(handoff.target)));
    }
}
