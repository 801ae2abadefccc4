use crawldeck_api::RecordId;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::debug;

type SelectionSet = Mutex<BTreeSet<RecordId>>;

/// Ids chosen for a bulk action, scoped to one list view.
///
/// Clones share the same set. The only writers are the methods below and the
/// store's scrub after a confirmed delete.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    ids: Arc<SelectionSet>,
}

impl Selection {
    /// A selection no store knows about; deletes will not scrub it.
    pub fn detached() -> Self {
        Self::default()
    }

    /// Adds `id` if absent, removes it if present. Returns whether `id` is
    /// selected afterwards.
    pub fn toggle(&self, id: RecordId) -> bool {
        let mut ids = self.lock();
        if ids.remove(&id) {
            false
        } else {
            ids.insert(id);
            true
        }
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn select_all<I>(&self, ids: I)
    where
        I: IntoIterator<Item = RecordId>,
    {
        self.lock().extend(ids);
    }

    /// Drops every id not in `visible`. Never called implicitly; paging or
    /// filtering leaves the selection alone.
    pub fn retain_only<I>(&self, visible: I)
    where
        I: IntoIterator<Item = RecordId>,
    {
        let visible: BTreeSet<RecordId> = visible.into_iter().collect();
        self.lock().retain(|id| visible.contains(id));
    }

    pub fn contains(&self, id: RecordId) -> bool {
        self.lock().contains(&id)
    }

    /// Selected ids in ascending order.
    pub fn ids(&self) -> Vec<RecordId> {
        self.lock().iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn remove_all(&self, removed: &BTreeSet<RecordId>) -> usize {
        let mut ids = self.lock();
        let before = ids.len();
        ids.retain(|id| !removed.contains(id));
        before - ids.len()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<RecordId>> {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Tracks every live [`Selection`] handed out by a store so a confirmed
/// delete can remove the deleted ids from all of them.
#[derive(Debug, Clone, Default)]
pub struct SelectionRegistry {
    live: Arc<Mutex<Vec<Weak<SelectionSet>>>>,
}

impl SelectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self) -> Selection {
        let selection = Selection::default();
        self.lock().push(Arc::downgrade(&selection.ids));
        selection
    }

    /// Removes `ids` from every live selection. Returns how many memberships
    /// were dropped in total.
    pub fn scrub(&self, ids: &[RecordId]) -> usize {
        let removed: BTreeSet<RecordId> = ids.iter().copied().collect();
        let mut live = self.lock();
        live.retain(|weak| weak.strong_count() > 0);

        let dropped = live
            .iter()
            .filter_map(Weak::upgrade)
            .map(|ids| Selection { ids }.remove_all(&removed))
            .sum();
        debug!(dropped, selections = live.len(), "scrubbed deleted ids from selections");
        dropped
    }

    pub fn live_count(&self) -> usize {
        self.lock().iter().filter(|weak| weak.strong_count() > 0).count()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Weak<SelectionSet>>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u64) -> RecordId {
        RecordId::new(n).unwrap()
    }

    #[test]
    fn test_toggle_adds_then_removes() {
        let selection = Selection::detached();
        assert!(selection.toggle(id(1)));
        assert!(selection.contains(id(1)));
        assert!(!selection.toggle(id(1)));
        assert!(selection.is_empty());
    }

    #[test]
    fn test_ids_are_sorted_and_unique() {
        let selection = Selection::detached();
        selection.select_all([id(3), id(1), id(3), id(2)]);
        assert_eq!(selection.ids(), vec![id(1), id(2), id(3)]);
    }

    #[test]
    fn test_clear() {
        let selection = Selection::detached();
        selection.select_all([id(1), id(2)]);
        selection.clear();
        assert_eq!(selection.len(), 0);
    }

    #[test]
    fn test_retain_only() {
        let selection = Selection::detached();
        selection.select_all([id(1), id(2), id(3)]);
        selection.retain_only([id(2), id(4)]);
        assert_eq!(selection.ids(), vec![id(2)]);
    }

    #[test]
    fn test_clones_share_state() {
        let selection = Selection::detached();
        let other = selection.clone();
        other.toggle(id(5));
        assert!(selection.contains(id(5)));
    }

    #[test]
    fn test_scrub_reaches_every_live_selection() {
        let registry = SelectionRegistry::new();
        let first = registry.create();
        let second = registry.create();
        first.select_all([id(1), id(2), id(3)]);
        second.select_all([id(2), id(4)]);

        let dropped = registry.scrub(&[id(2), id(3)]);

        assert_eq!(dropped, 3);
        assert_eq!(first.ids(), vec![id(1)]);
        assert_eq!(second.ids(), vec![id(4)]);
    }

    #[test]
    fn test_dropped_selections_unregister() {
        let registry = SelectionRegistry::new();
        let kept = registry.create();
        drop(registry.create());

        assert_eq!(registry.live_count(), 1);
        registry.scrub(&[id(1)]);
        assert_eq!(registry.lock().len(), 1);
        drop(kept);
        assert_eq!(registry.live_count(), 0);
    }

    #[test]
    fn test_detached_selection_is_not_scrubbed() {
        let registry = SelectionRegistry::new();
        let detached = Selection::detached();
        detached.toggle(id(1));

        registry.scrub(&[id(1)]);
        assert!(detached.contains(id(1)));
    }
}
