use std::sync::Arc;
use std::time::Duration;

use crate::action::{EncodingSlot, EncodingSlotState, ScheduledAction};
use crate::channel::channel_internal::{unix_now, ChannelCore, ChannelInternal};
use crate::channel::channel_state::ChannelState;
use crate::channel::events::SdkEvent;
use crate::component::{
    Action, ActionId, ActionTimeline, PackageFragmentHandle, SdkHandle, Timestamp,
};
use crate::framing;
use crate::package::{PackageFragmentState, PackageId};
use crate::sdk::{ChannelStatus, PackageStatus};

/// What one pass of the driver decided: when to wake again (`None` parks
/// until an explicit wakeup) and whether the loop is finished.
pub(crate) struct TickOutcome {
    pub next_wake: Option<Timestamp>,
    pub stop: bool,
}

fn bump(next_wake: &mut Option<Timestamp>, candidate: Timestamp) {
    match next_wake {
        Some(current) if *current <= candidate => {}
        _ => *next_wake = Some(candidate),
    }
}

impl ChannelInternal {
    pub(crate) fn spawn_driver(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            this.drive().await;
        });
        *self.driver.lock().unwrap() = Some(handle);
    }

    async fn drive(self: Arc<Self>) {
        log::debug!("action driver running");
        loop {
            let outcome = self.tick(unix_now()).await;
            if outcome.stop {
                break;
            }
            match outcome.next_wake {
                None => self.notify.notified().await,
                Some(at) => {
                    let delay = (at - unix_now()).max(0.0);
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = tokio::time::sleep(Duration::from_secs_f64(delay)) => {}
                    }
                }
            }
        }
        log::debug!("action driver stopped");
    }

    /// Whether every slot that should carry content has it. Actions with no
    /// slots fire bare: the transport still performs the outward-visible
    /// behavior, there is just nothing riding in it.
    fn ready_to_fire(&self, action: &ScheduledAction) -> bool {
        action.slots.iter().all(|slot| {
            slot.state == EncodingSlotState::Encoded
                || (slot.state == EncodingSlotState::Unencoded
                    && slot.fragments.is_empty()
                    && !self.settings.cover_traffic)
        })
    }

    /// One pass of the scheduling loop: sweep deadlines, fire what is due
    /// and encoded, start encoding what is coming up, refresh the timeline,
    /// and poll the read side. Component calls collected under the mutex
    /// are issued after it is released.
    pub(crate) async fn tick(&self, now: Timestamp) -> TickOutcome {
        let mut next_wake: Option<Timestamp> = None;
        let mut fire_jobs = Vec::new();
        let mut encode_jobs = Vec::new();
        let mut refresh_window: Option<(Timestamp, Timestamp)> = None;
        let mut fetch_links = None;

        {
            let mut core = self.core.lock().await;
            if core.shutdown || core.state == ChannelState::Failed {
                return TickOutcome {
                    next_wake: None,
                    stop: true,
                };
            }
            match core.state {
                ChannelState::Activated => {}
                ChannelState::Deactivating => {
                    // pending work drains; nothing new is admitted
                    if core.packages.is_empty() && core.pending_encodings.is_empty() {
                        core.state = ChannelState::Deactivated;
                        log::info!("channel {} deactivated", core.channel_id);
                        self.events.push(SdkEvent::ChannelStatus {
                            handle: SdkHandle::default(),
                            channel_id: core.channel_id.clone(),
                            status: ChannelStatus::Unavailable,
                        });
                        return TickOutcome {
                            next_wake: None,
                            stop: true,
                        };
                    }
                }
                _ => {
                    return TickOutcome {
                        next_wake: None,
                        stop: false,
                    };
                }
            }

            self.sweep_deadlines_locked(&mut core, now);

            let ids: Vec<ActionId> = core.actions.ids_in_order().to_vec();
            for action_id in ids {
                let Some(action) = core.actions.get(action_id) else {
                    continue;
                };
                if action.to_be_removed {
                    continue;
                }
                let ts = action.timestamp();

                if ts <= now {
                    if self.ready_to_fire(action) {
                        if let Some(job) = self.take_fire_locked(&mut core, action_id) {
                            fire_jobs.push(job);
                        }
                    } else if action.encoding_in_flight() {
                        // completion will wake us
                    } else if action.unencoded() {
                        // overdue without content; encode now, fire when done
                        let jobs = self.start_encode_locked(&mut core, action_id);
                        if jobs.is_empty() && !self.can_fire_eventually(&core, action_id) {
                            log::warn!("discarding unservable action {action_id}");
                            self.discard_action_locked(&mut core, action_id);
                        } else {
                            encode_jobs.extend(jobs);
                        }
                    } else {
                        // mixed state after a slot failure: fire with the
                        // content that survived
                        if let Some(job) = self.take_fire_locked(&mut core, action_id) {
                            fire_jobs.push(job);
                        }
                    }
                    continue;
                }

                // first future action: everything later starts later too
                bump(&mut next_wake, ts);
                let encode_start = ts - core.max_encoding_time;
                if encode_start <= now && action.unencoded() {
                    let jobs = self.start_encode_locked(&mut core, action_id);
                    encode_jobs.extend(jobs);
                } else if action.unencoded() {
                    bump(&mut next_wake, encode_start);
                }
                break;
            }

            // keep the fetched window comfortably ahead of the clock
            if core.state == ChannelState::Activated && !core.refresh_in_flight {
                let refresh_due = core.refresh_requested
                    || core.timeline_horizon < now + core.timeline_lookahead / 2.0;
                if refresh_due {
                    core.refresh_requested = false;
                    core.refresh_in_flight = true;
                    refresh_window = Some((now, now + core.timeline_lookahead));
                } else {
                    bump(
                        &mut next_wake,
                        core.timeline_horizon - core.timeline_lookahead / 2.0,
                    );
                }
            }

            if core.state == ChannelState::Activated {
                if now >= core.next_fetch_time {
                    let links = core.links.link_ids();
                    if !links.is_empty() {
                        fetch_links = Some(links);
                    }
                    core.next_fetch_time = now + core.fetch_period;
                }
                bump(&mut next_wake, core.next_fetch_time);
            }

            for package_id in core.packages.ids().collect::<Vec<_>>() {
                if let Some(deadline) = core.packages.get(package_id).and_then(|p| p.deadline) {
                    bump(&mut next_wake, deadline);
                }
            }
        }

        for job in fire_jobs {
            self.execute_fire(job).await;
        }
        self.execute_encodes(encode_jobs).await;
        if let Some((start, end)) = refresh_window {
            self.refresh_timeline(start, end).await;
        }
        if let Some(links) = fetch_links {
            if let Ok(transport) = self.transport() {
                if let Err(err) = transport.fetch(links).await {
                    log::warn!("read-side fetch failed: {err}");
                }
            }
        }

        TickOutcome {
            next_wake,
            stop: false,
        }
    }

    /// A due action that produced no encode work can still fire bare if its
    /// slots are all legitimately empty; otherwise it is stuck.
    fn can_fire_eventually(&self, core: &ChannelCore, action_id: ActionId) -> bool {
        core.actions
            .get(action_id)
            .map(|a| self.ready_to_fire(a) || a.encoding_in_flight())
            .unwrap_or(false)
    }

    fn discard_action_locked(&self, core: &mut ChannelCore, action_id: ActionId) {
        if let Some(action) = core.actions.remove(action_id) {
            for slot in &action.slots {
                if let Some(handle) = slot.handle {
                    core.pending_encodings.remove(&handle);
                }
                for fragment_handle in &slot.fragments {
                    if let Some(package_id) = core.packages.package_of_fragment(*fragment_handle) {
                        self.fail_package_locked(core, package_id, PackageStatus::FailedGeneric);
                    }
                }
            }
        }
        for link in core.links.iter_mut() {
            link.action_queue.retain(|id| *id != action_id);
        }
    }

    // -----------------------------------------------------------------
    // timeline refresh
    // -----------------------------------------------------------------

    /// Fetches `[start, end]` from the User Model and merges it in.
    pub(crate) async fn refresh_timeline(&self, start: Timestamp, end: Timestamp) {
        let timeline = match self.user_model() {
            Ok(user_model) => user_model.get_timeline(start, end).await,
            Err(err) => Err(err),
        };
        let timeline = match timeline {
            Ok(timeline) => timeline,
            Err(err) => {
                log::warn!("timeline fetch failed: {err}");
                let mut core = self.core.lock().await;
                core.refresh_in_flight = false;
                return;
            }
        };

        self.merge_and_resolve(timeline, start).await;

        let mut core = self.core.lock().await;
        core.timeline_horizon = end;
        core.refresh_in_flight = false;
        self.notify.notify_one();
    }

    /// Merges a timeline (refresh or `on_send_package` injection), resolves
    /// encoding parameters for the new actions with the transport, rescues
    /// fragments off withdrawn actions, and rebinds queued packages.
    pub(crate) async fn merge_and_resolve(&self, timeline: ActionTimeline, cutoff: Timestamp) {
        let (added_actions, withdrawn) = {
            let mut core = self.core.lock().await;
            let merge = core.actions.merge_timeline(timeline, cutoff);
            let added: Vec<Action> = merge
                .added
                .iter()
                .filter_map(|id| core.actions.get(*id).map(|a| a.action.clone()))
                .collect();
            (added, merge.withdrawn)
        };

        // resolve slots for the new actions outside the lock
        let mut resolved: Vec<(ActionId, Vec<EncodingSlot>)> = Vec::new();
        if !added_actions.is_empty() {
            if let Ok(transport) = self.transport() {
                for action in &added_actions {
                    match transport.get_action_params(action).await {
                        Ok(params_list) => {
                            let mut slots = Vec::new();
                            for params in params_list {
                                match self.encoding_for_params(&params) {
                                    Ok(encoding) => {
                                        let props =
                                            encoding.encoding_properties_for_parameters(&params);
                                        slots.push(EncodingSlot::new(params, props.max_bytes));
                                    }
                                    Err(err) => {
                                        log::warn!(
                                            "action {} declares an unknown encoding: {err}",
                                            action.action_id
                                        );
                                    }
                                }
                            }
                            resolved.push((action.action_id, slots));
                        }
                        Err(err) => {
                            log::warn!(
                                "transport rejected params for action {}: {err}",
                                action.action_id
                            );
                            resolved.push((action.action_id, Vec::new()));
                        }
                    }
                }
            }
        }

        let dequeue_actions = {
            let mut core = self.core.lock().await;
            for (action_id, slots) in resolved {
                self.attach_slots_locked(&mut core, action_id, slots);
            }
            let (dequeue, affected) = self.purge_withdrawn_locked(&mut core, &withdrawn);
            for link_id in core.links.link_ids() {
                self.bind_link_packages(&mut core, &link_id);
            }
            // a rescued package with nowhere left to go fails now
            for package_id in affected {
                let stranded = core.packages.get(package_id).and_then(|p| {
                    (!p.failed && p.unbound_len() > 0).then(|| p.link_id.clone())
                });
                if let Some(link_id) = stranded {
                    if !self.link_has_bindable_capacity(&core, &link_id) {
                        log::debug!("package {package_id} lost its actions and cannot rebind");
                        self.fail_package_locked(
                            &mut core,
                            package_id,
                            PackageStatus::FailedGeneric,
                        );
                    }
                }
            }
            dequeue
        };

        if !dequeue_actions.is_empty() {
            if let Ok(transport) = self.transport() {
                for action in dequeue_actions {
                    if let Err(err) = transport.dequeue_content(&action).await {
                        log::debug!(
                            "dequeue_content for withdrawn action {}: {err}",
                            action.action_id
                        );
                    }
                }
            }
        }
        self.notify.notify_one();
    }

    /// Installs resolved encoding slots on a freshly merged action and
    /// queues it on its target link(s).
    fn attach_slots_locked(
        &self,
        core: &mut ChannelCore,
        action_id: ActionId,
        slots: Vec<EncodingSlot>,
    ) {
        let link_binding = slots.first().map(|slot| slot.params.link_id.clone());
        {
            let Some(action) = core.actions.get_mut(action_id) else {
                return;
            };
            action.slots = slots;
            match &link_binding {
                Some(link_id) if link_id == crate::WILDCARD_LINK => {
                    action.wildcard = true;
                    action.link_id = None;
                }
                Some(link_id) => {
                    action.link_id = Some(link_id.clone());
                }
                // no encodings: a bare behavioral action, queued on no link
                None => {}
            }
        }

        match link_binding {
            None => {}
            Some(link_id) if link_id == crate::WILDCARD_LINK => {
                for link in core.links.iter_mut() {
                    link.action_queue.push(action_id);
                }
            }
            Some(link_id) => match core.links.get_mut(&link_id) {
                Some(link) => link.action_queue.push(action_id),
                None => {
                    log::warn!("action {action_id} targets unknown link {link_id}, dropping");
                    core.actions.remove(action_id);
                }
            },
        }
    }

    /// Purges every withdrawn action: orphans in-flight encodings, detaches
    /// fragments, and reports which packages need rescuing and which
    /// actions had content staged (so the transport can reclaim it).
    fn purge_withdrawn_locked(
        &self,
        core: &mut ChannelCore,
        withdrawn: &[ActionId],
    ) -> (Vec<Action>, Vec<PackageId>) {
        let mut dequeue = Vec::new();
        let mut affected = Vec::new();

        for action_id in withdrawn {
            let Some(action) = core.actions.remove(*action_id) else {
                continue;
            };
            let mut staged = false;
            for slot in &action.slots {
                if matches!(
                    slot.state,
                    EncodingSlotState::Encoding | EncodingSlotState::Encoded
                ) {
                    staged = true;
                }
                if let Some(handle) = slot.handle {
                    core.pending_encodings.remove(&handle);
                }
                for fragment_handle in &slot.fragments {
                    if let Some(package_id) = core.packages.package_of_fragment(*fragment_handle) {
                        if !affected.contains(&package_id) {
                            affected.push(package_id);
                        }
                    }
                }
            }
            if staged {
                dequeue.push(action.action.clone());
            }
            for link in core.links.iter_mut() {
                link.action_queue.retain(|id| id != action_id);
            }
        }

        for package_id in &affected {
            self.rescue_package_locked(core, *package_id);
        }
        (dequeue, affected)
    }

    /// Detaches the dangling tail of a package whose action was withdrawn,
    /// reopening those bytes for rebinding. A confirmed fragment after the
    /// gap makes the package unrecoverable.
    fn rescue_package_locked(&self, core: &mut ChannelCore, package_id: PackageId) {
        let fragments: Vec<(PackageFragmentHandle, Option<ActionId>, usize, PackageFragmentState)> = {
            let Some(package) = core.packages.get(package_id) else {
                return;
            };
            if package.failed {
                return;
            }
            package
                .fragments
                .iter()
                .map(|f| (f.handle, f.action_id, f.len, f.state))
                .collect()
        };

        let first_dangling = fragments.iter().position(|(_, action_id, _, state)| {
            !state.is_terminal()
                && *state != PackageFragmentState::Enqueued
                && action_id.map(|id| !core.actions.contains(id)).unwrap_or(true)
        });
        let Some(start) = first_dangling else {
            return;
        };

        let hole = fragments[start..].iter().any(|(_, _, _, state)| {
            matches!(
                state,
                PackageFragmentState::Enqueued | PackageFragmentState::Sent
            )
        });
        if hole {
            self.fail_package_locked(core, package_id, PackageStatus::FailedGeneric);
            return;
        }

        for (handle, action_id, len, _) in fragments[start..].iter().rev() {
            if let Some(action_id) = action_id {
                Self::detach_fragment_from_action(core, *action_id, *handle, *len);
            }
            core.packages.unbind_fragment(*handle);
        }
    }

    fn detach_fragment_from_action(
        core: &mut ChannelCore,
        action_id: ActionId,
        handle: PackageFragmentHandle,
        len: usize,
    ) {
        let Some(action) = core.actions.get_mut(action_id) else {
            return;
        };
        let mut orphaned = None;
        for slot in action.slots.iter_mut() {
            if let Some(pos) = slot.fragments.iter().position(|h| *h == handle) {
                slot.fragments.remove(pos);
                slot.bound_bytes = slot.bound_bytes.saturating_sub(len);
                if slot.state == EncodingSlotState::Encoding {
                    orphaned = slot.handle;
                    slot.reset();
                }
            }
        }
        if let Some(encode_handle) = orphaned {
            core.pending_encodings.remove(&encode_handle);
        }
    }

    /// Whether any upcoming action on the link can still take payload.
    fn link_has_bindable_capacity(&self, core: &ChannelCore, link_id: &crate::component::LinkId) -> bool {
        let Some(link) = core.links.get(link_id) else {
            return false;
        };
        let mode = self.settings.framing;
        link.action_queue.iter().any(|id| {
            core.actions
                .get(*id)
                .map(|a| {
                    a.accepts_fragments()
                        && a.slots.iter().any(|slot| {
                            crate::channel::send::slot_remaining(slot, mode)
                                > framing::record_overhead(mode)
                        })
                })
                .unwrap_or(false)
        })
    }
}
