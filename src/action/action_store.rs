use std::collections::HashMap;

use crate::component::{ActionId, ActionTimeline, Timestamp};

use super::ScheduledAction;

/// Outcome of a timeline merge: what the caller still has to resolve.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TimelineMerge {
    /// Freshly inserted actions, in store order. The caller resolves their
    /// encoding parameters with the transport.
    pub added: Vec<ActionId>,
    /// Actions the User Model withdrew, now marked `to_be_removed`. The
    /// caller rescues or fails their fragments, then purges them.
    pub withdrawn: Vec<ActionId>,
    /// Duplicate ids discarded from the incoming timeline.
    pub duplicates: usize,
}

/// Owns every scheduled action of a channel, kept strictly sorted by
/// `(timestamp, action_id)`. Per-link action queues hold ids into this
/// store.
#[derive(Debug, Default)]
pub struct ActionStore {
    actions: HashMap<ActionId, ScheduledAction>,
    order: Vec<ActionId>,
}

impl ActionStore {
    pub fn new() -> Self {
        ActionStore::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, id: ActionId) -> bool {
        self.actions.contains_key(&id)
    }

    pub fn get(&self, id: ActionId) -> Option<&ScheduledAction> {
        self.actions.get(&id)
    }

    pub fn get_mut(&mut self, id: ActionId) -> Option<&mut ScheduledAction> {
        self.actions.get_mut(&id)
    }

    /// Ids in `(timestamp, action_id)` order.
    pub fn ids_in_order(&self) -> &[ActionId] {
        &self.order
    }

    pub fn head(&self) -> Option<&ScheduledAction> {
        self.order.first().and_then(|id| self.actions.get(id))
    }

    /// Inserts a new action, keeping the order sorted. Returns false and
    /// leaves the store unchanged when the id already exists.
    pub fn insert(&mut self, action: ScheduledAction) -> bool {
        let id = action.id();
        if self.actions.contains_key(&id) {
            return false;
        }
        self.actions.insert(id, action);
        self.order.push(id);
        self.resort();
        true
    }

    pub fn remove(&mut self, id: ActionId) -> Option<ScheduledAction> {
        let removed = self.actions.remove(&id)?;
        self.order.retain(|other| *other != id);
        Some(removed)
    }

    fn sort_key(&self, id: ActionId) -> (Timestamp, ActionId) {
        match self.actions.get(&id) {
            Some(action) => (action.timestamp(), id),
            None => (f64::INFINITY, id),
        }
    }

    pub fn resort(&mut self) {
        let actions = &self.actions;
        self.order.sort_by(|a, b| {
            let ka = actions
                .get(a)
                .map(|x| x.timestamp())
                .unwrap_or(f64::INFINITY);
            let kb = actions
                .get(b)
                .map(|x| x.timestamp())
                .unwrap_or(f64::INFINITY);
            ka.total_cmp(&kb).then_with(|| a.cmp(b))
        });
    }

    /// Merges a refreshed timeline into the store.
    ///
    /// Actions already past `cutoff_start` are in flight and never touched.
    /// At or beyond the cutoff: actions absent from `new_actions` are marked
    /// `to_be_removed`, unknown ids are inserted, and actions present on
    /// both sides keep their existing instance untouched, preserving every
    /// fragment binding. Incoming actions already in the past are dropped.
    pub fn merge_timeline(
        &mut self,
        new_actions: ActionTimeline,
        cutoff_start: Timestamp,
    ) -> TimelineMerge {
        let mut merge = TimelineMerge::default();

        let mut incoming: HashMap<ActionId, crate::component::Action> = HashMap::new();
        for action in new_actions {
            if incoming.insert(action.action_id, action.clone()).is_some() {
                log::warn!(
                    "duplicate action id {} in timeline, discarding duplicate",
                    action.action_id
                );
                merge.duplicates += 1;
            }
        }

        for id in self.order.clone() {
            let existing = match self.actions.get_mut(&id) {
                Some(existing) => existing,
                None => continue,
            };
            if existing.timestamp() < cutoff_start {
                // in flight, keep regardless of what the model now says
                incoming.remove(&id);
                continue;
            }
            match incoming.remove(&id) {
                Some(new_action) => {
                    if new_action.timestamp != existing.timestamp() {
                        log::warn!(
                            "timeline disagrees on action {}: have ts {}, model says {}; keeping ours",
                            id,
                            existing.timestamp(),
                            new_action.timestamp
                        );
                    }
                }
                None => {
                    if !existing.to_be_removed {
                        existing.to_be_removed = true;
                        merge.withdrawn.push(id);
                    }
                }
            }
        }

        for (id, action) in incoming {
            if action.timestamp < cutoff_start {
                log::debug!(
                    "timeline action {} at {} is already in the past, skipping",
                    id,
                    action.timestamp
                );
                continue;
            }
            self.actions.insert(id, ScheduledAction::new(action));
            self.order.push(id);
            merge.added.push(id);
        }

        self.resort();
        merge
            .added
            .sort_by(|a, b| self.sort_key(*a).0.total_cmp(&self.sort_key(*b).0).then(a.cmp(b)));
        merge
    }
}
