use std::sync::Arc;

use bytes::BytesMut;

use crate::action::{EncodingSlot, EncodingSlotState};
use crate::channel::channel_internal::{ChannelCore, ChannelInternal, PendingEncoding};
use crate::channel::events::SdkEvent;
use crate::component::{
    Action, ActionId, Encoding, EncodingHandle, EncodingParameters, EncodingStatus, LinkId,
    PackageFragmentHandle,
};
use crate::framing::{
    self, FragmentHeader, FramingMode, CONTINUE_LAST_PACKAGE, CONTINUE_NEXT_PACKAGE,
};
use crate::package::{PackageFragmentState, PackageId};
use crate::sdk::PackageStatus;

/// One encode request ready to issue once the core mutex is released.
pub(crate) struct EncodeJob {
    pub encoding: Arc<dyn Encoding>,
    pub handle: EncodingHandle,
    pub params: EncodingParameters,
    pub bytes: Vec<u8>,
}

/// One action ready to hand to the transport.
pub(crate) struct FireJob {
    pub action: Action,
    /// Per-slot parameters and encoded content. `None` content means the
    /// slot stayed empty (cover disabled) and nothing is staged for it.
    pub slots: Vec<(EncodingParameters, Option<Vec<u8>>)>,
    pub handles: Vec<PackageFragmentHandle>,
}

/// Payload bytes still bindable into a slot, after framing overhead and
/// what is already committed. Adding a record also costs its prefix; the
/// caller accounts for that via [`framing::record_overhead`].
pub(crate) fn slot_remaining(slot: &EncodingSlot, mode: FramingMode) -> usize {
    if slot.state != EncodingSlotState::Unencoded {
        return 0;
    }
    if mode == FramingMode::Single && !slot.fragments.is_empty() {
        return 0;
    }
    let used = framing::header_len(mode)
        + slot.bound_bytes
        + framing::record_overhead(mode) * slot.fragments.len();
    (slot.max_bytes as usize).saturating_sub(used)
}

impl ChannelInternal {
    // -----------------------------------------------------------------
    // fragment binding
    // -----------------------------------------------------------------

    /// Sort key an action occupies in the global order; fragments of one
    /// package must bind to strictly increasing keys.
    fn action_order(core: &ChannelCore, action_id: ActionId) -> Option<(f64, ActionId)> {
        core.actions
            .get(action_id)
            .map(|a| (a.timestamp(), action_id))
    }

    /// The earliest action key a package's next fragment may bind to, i.e.
    /// just after its last still-bound fragment.
    fn package_order_floor(core: &ChannelCore, package_id: PackageId) -> Option<(f64, ActionId)> {
        let package = core.packages.get(package_id)?;
        package
            .fragments
            .iter()
            .rev()
            .find_map(|f| f.action_id)
            .and_then(|id| Self::action_order(core, id))
    }

    /// Walks the link's package queue in FIFO order and binds unbound bytes
    /// into every action that still accepts fragments, committing wildcard
    /// actions to this link on first use.
    pub(crate) fn bind_link_packages(&self, core: &mut ChannelCore, link_id: &LinkId) {
        let mode = self.settings.framing;
        let Some(link) = core.links.get(link_id) else {
            return;
        };
        let action_ids: Vec<ActionId> = link.action_queue.clone();
        let package_ids: Vec<PackageId> = link.package_queue.iter().copied().collect();

        let mut next_package = 0usize;
        for action_id in action_ids {
            if next_package >= package_ids.len() {
                break;
            }
            let accepts = core
                .actions
                .get(action_id)
                .map(|a| a.accepts_fragments() && !a.slots.is_empty())
                .unwrap_or(false);
            if !accepts {
                continue;
            }
            let action_key = match Self::action_order(core, action_id) {
                Some(key) => key,
                None => continue,
            };

            let mut bound_any = false;
            let slot_count = core.actions.get(action_id).map(|a| a.slots.len()).unwrap_or(0);
            'slots: for slot_idx in 0..slot_count {
                loop {
                    let Some(&package_id) = package_ids.get(next_package) else {
                        break 'slots;
                    };
                    let (remaining, package_empty) = match core.packages.get(package_id) {
                        Some(p) if !p.failed => (p.unbound_len(), p.fragments.is_empty()),
                        _ => (0, true),
                    };
                    if remaining == 0 {
                        next_package += 1;
                        continue;
                    }
                    // fragments of one package must stay ordered by action
                    if let Some(floor) = Self::package_order_floor(core, package_id) {
                        if !order_after(action_key, floor) {
                            break 'slots;
                        }
                    }

                    let slot = &core.actions.get(action_id).unwrap().slots[slot_idx];
                    let capacity = slot_remaining(slot, mode);
                    let overhead = framing::record_overhead(mode);
                    let take = match mode {
                        FramingMode::Single => {
                            // whole packages only, one per slot
                            if package_empty && remaining <= capacity {
                                remaining
                            } else {
                                0
                            }
                        }
                        FramingMode::Batch => {
                            // whole packages only, FIFO head-of-line
                            if capacity > overhead && remaining <= capacity - overhead {
                                remaining
                            } else {
                                0
                            }
                        }
                        FramingMode::FragmentSingleProducer
                        | FramingMode::FragmentMultipleProducer => {
                            if capacity > overhead {
                                remaining.min(capacity - overhead)
                            } else {
                                0
                            }
                        }
                    };
                    if take == 0 {
                        // this slot cannot take the head package; FIFO means
                        // nothing later may jump ahead of it
                        break;
                    }

                    let Some(handle) = core.packages.bind_fragment(package_id, action_id, take)
                    else {
                        next_package += 1;
                        continue;
                    };
                    let action = core.actions.get_mut(action_id).unwrap();
                    let slot = &mut action.slots[slot_idx];
                    slot.fragments.push(handle);
                    slot.bound_bytes += take;
                    bound_any = true;

                    if take == remaining {
                        next_package += 1;
                        if mode == FramingMode::Single {
                            // one package per slot; move on
                            break;
                        }
                    } else {
                        // partial tail fills the slot
                        break;
                    }
                }
            }

            if bound_any {
                self.commit_action_to_link(core, action_id, link_id);
            }
        }
    }

    /// Pins a wildcard action to one link, withdrawing it from every other
    /// link's queue. No-op for actions already committed.
    fn commit_action_to_link(&self, core: &mut ChannelCore, action_id: ActionId, link_id: &LinkId) {
        let needs_commit = core
            .actions
            .get(action_id)
            .map(|a| a.link_id.is_none())
            .unwrap_or(false);
        if !needs_commit {
            return;
        }
        if let Some(action) = core.actions.get_mut(action_id) {
            action.link_id = Some(link_id.clone());
        }
        for link in core.links.iter_mut() {
            if link.link_id != *link_id {
                link.action_queue.retain(|id| *id != action_id);
            }
        }
        log::debug!("wildcard action {action_id} committed to link {link_id}");
    }

    /// Picks the target link for an uncommitted wildcard action reaching
    /// encode time: the link whose oldest unbound package is largest, ties
    /// to the lowest link id; with no pending traffic, the lowest link id
    /// carries the cover.
    pub(crate) fn choose_wildcard_link(
        &self,
        core: &ChannelCore,
        action_id: ActionId,
    ) -> Option<LinkId> {
        let mut best: Option<(usize, LinkId)> = None;
        for link in core.links.iter() {
            if !link.action_queue.contains(&action_id) {
                continue;
            }
            let oldest_unbound = link
                .package_queue
                .iter()
                .filter_map(|id| core.packages.get(*id))
                .find(|p| !p.failed && p.unbound_len() > 0)
                .map(|p| p.unbound_len())
                .unwrap_or(0);
            let better = match &best {
                None => true,
                Some((size, id)) => {
                    oldest_unbound > *size || (oldest_unbound == *size && link.link_id < *id)
                }
            };
            if better {
                best = Some((oldest_unbound, link.link_id.clone()));
            }
        }
        best.map(|(_, id)| id)
    }

    // -----------------------------------------------------------------
    // encoding
    // -----------------------------------------------------------------

    /// Builds the framed payload for one slot of an action. Also stamps the
    /// link's fragment counter in fragment modes.
    fn build_slot_payload(
        &self,
        core: &mut ChannelCore,
        action_id: ActionId,
        slot_idx: usize,
    ) -> Option<Vec<u8>> {
        let mode = self.settings.framing;
        let action = core.actions.get(action_id)?;
        let slot = &action.slots[slot_idx];
        if slot.fragments.is_empty() {
            return Some(Vec::new());
        }
        let link_id = action.link_id.clone()?;

        let mut pieces = Vec::with_capacity(slot.fragments.len());
        let mut first_is_tail = false;
        let mut last_is_head = false;
        for (idx, handle) in slot.fragments.iter().enumerate() {
            let package_id = core.packages.package_of_fragment(*handle)?;
            let package = core.packages.get(package_id)?;
            let fragment = package.fragment(*handle)?;
            if idx == 0 {
                first_is_tail = fragment.offset > 0;
            }
            if idx == slot.fragments.len() - 1 {
                last_is_head = fragment.offset + fragment.len < package.len();
            }
            pieces.push(package.fragment_bytes(fragment));
        }

        let mut buf = BytesMut::new();
        match mode {
            FramingMode::Single => {
                if pieces.len() > 1 || first_is_tail || last_is_head {
                    return None;
                }
                buf.extend_from_slice(&pieces[0]);
            }
            FramingMode::Batch => {
                for piece in &pieces {
                    framing::put_record(&mut buf, piece);
                }
            }
            FramingMode::FragmentSingleProducer | FramingMode::FragmentMultipleProducer => {
                let (producer_id, fragment_id) = {
                    let link = core.links.get_mut(&link_id)?;
                    (link.producer_id, link.take_fragment_id())
                };
                let mut flags = 0u8;
                if first_is_tail {
                    flags |= CONTINUE_LAST_PACKAGE;
                }
                if last_is_head {
                    flags |= CONTINUE_NEXT_PACKAGE;
                }
                let header = FragmentHeader {
                    producer_id,
                    fragment_id,
                    flags,
                };
                header.marshal_to(mode, &mut buf);
                for piece in &pieces {
                    framing::put_record(&mut buf, piece);
                }
            }
        }
        Some(buf.to_vec())
    }

    /// Fills any remaining capacity, then turns every slot of an action
    /// into an encode request. Slots with nothing to carry become cover
    /// traffic unless the composition disables it.
    pub(crate) fn start_encode_locked(
        &self,
        core: &mut ChannelCore,
        action_id: ActionId,
    ) -> Vec<EncodeJob> {
        let mut jobs = Vec::new();

        let ready = core
            .actions
            .get(action_id)
            .map(|a| a.accepts_fragments() && !a.slots.is_empty())
            .unwrap_or(false);
        if !ready {
            return jobs;
        }

        // resolve a wildcard target now, then top off from the queue
        let link_id = match core.actions.get(action_id).and_then(|a| a.link_id.clone()) {
            Some(link_id) => Some(link_id),
            None => {
                let chosen = self.choose_wildcard_link(core, action_id);
                if let Some(chosen) = &chosen {
                    self.commit_action_to_link(core, action_id, chosen);
                }
                chosen
            }
        };
        let Some(link_id) = link_id else {
            // wildcard with no links; nothing can carry it
            log::debug!("action {action_id} has no link to run on, leaving unencoded");
            return jobs;
        };
        self.bind_link_packages(core, &link_id);

        let slot_count = core.actions.get(action_id).map(|a| a.slots.len()).unwrap_or(0);
        for slot_idx in 0..slot_count {
            let (slot_state, has_fragments, params) = {
                let slot = &core.actions.get(action_id).unwrap().slots[slot_idx];
                (slot.state, !slot.fragments.is_empty(), slot.params.clone())
            };
            if slot_state != EncodingSlotState::Unencoded {
                continue;
            }
            if !has_fragments && !self.settings.cover_traffic {
                continue;
            }

            let payload = self.build_slot_payload(core, action_id, slot_idx);
            let Some(payload) = payload else {
                log::warn!(
                    "action {action_id} slot {slot_idx} cannot be framed in {} mode",
                    self.settings.framing
                );
                self.fail_slot_locked(core, action_id, slot_idx, PackageStatus::FailedGeneric);
                continue;
            };

            let mut params = params;
            params.link_id = link_id.clone();
            params.encode_package = has_fragments;

            let encoding = match self.encoding_for_params(&params) {
                Ok(encoding) => encoding,
                Err(err) => {
                    log::warn!("no encoding for action {action_id} slot {slot_idx}: {err}");
                    self.fail_slot_locked(core, action_id, slot_idx, PackageStatus::FailedGeneric);
                    continue;
                }
            };

            let handle = core.take_encoding_handle();
            core.pending_encodings.insert(
                handle,
                PendingEncoding {
                    action_id,
                    slot: slot_idx,
                },
            );
            let action = core.actions.get_mut(action_id).unwrap();
            let slot = &mut action.slots[slot_idx];
            slot.state = EncodingSlotState::Encoding;
            slot.handle = Some(handle);
            let fragment_handles = slot.fragments.clone();
            for fragment_handle in fragment_handles {
                Self::set_fragment_state(core, fragment_handle, PackageFragmentState::Encoding);
            }

            jobs.push(EncodeJob {
                encoding,
                handle,
                params,
                bytes: payload,
            });
        }
        jobs
    }

    pub(crate) async fn execute_encodes(&self, jobs: Vec<EncodeJob>) {
        for job in jobs {
            if let Err(err) = job
                .encoding
                .encode_bytes(job.handle, job.params, job.bytes)
                .await
            {
                log::warn!("encode request {} failed to issue: {err}", job.handle);
                self.handle_bytes_encoded(job.handle, Vec::new(), EncodingStatus::Failed)
                    .await;
            }
        }
    }

    /// Encode completion from the encoding component. Unknown handles are
    /// orphans of withdrawn work and are discarded.
    pub(crate) async fn handle_bytes_encoded(
        &self,
        handle: EncodingHandle,
        bytes: Vec<u8>,
        status: EncodingStatus,
    ) {
        let mut core = self.core.lock().await;
        let Some(pending) = core.pending_encodings.remove(&handle) else {
            log::debug!("discarding orphaned encode completion {handle}");
            return;
        };
        let Some(action) = core.actions.get_mut(pending.action_id) else {
            log::debug!(
                "encode completion {handle} for vanished action {}, discarding",
                pending.action_id
            );
            return;
        };
        let Some(slot) = action.slots.get_mut(pending.slot) else {
            return;
        };
        if slot.handle != Some(handle) {
            log::debug!("stale encode completion {handle}, discarding");
            return;
        }

        match status {
            EncodingStatus::Ok => {
                slot.state = EncodingSlotState::Encoded;
                slot.handle = None;
                slot.content = Some(bytes.into());
                let fragment_handles = slot.fragments.clone();
                for fragment_handle in fragment_handles {
                    Self::set_fragment_state(
                        &mut core,
                        fragment_handle,
                        PackageFragmentState::Encoded,
                    );
                }
            }
            _ => {
                log::warn!(
                    "encoding failed for action {} slot {}",
                    pending.action_id,
                    pending.slot
                );
                self.fail_slot_locked(
                    &mut core,
                    pending.action_id,
                    pending.slot,
                    PackageStatus::FailedGeneric,
                );
            }
        }
        self.notify.notify_one();
    }

    fn set_fragment_state(
        core: &mut ChannelCore,
        handle: PackageFragmentHandle,
        state: PackageFragmentState,
    ) {
        if let Some(package_id) = core.packages.package_of_fragment(handle) {
            if let Some(package) = core.packages.get_mut(package_id) {
                if let Some(fragment) = package.fragment_mut(handle) {
                    fragment.state = state;
                }
            }
        }
    }

    /// Fails every package riding in one slot and resets the slot so it can
    /// re-encode as cover. Packages in sibling slots are untouched.
    pub(crate) fn fail_slot_locked(
        &self,
        core: &mut ChannelCore,
        action_id: ActionId,
        slot_idx: usize,
        status: PackageStatus,
    ) {
        let fragment_handles = match core.actions.get_mut(action_id) {
            Some(action) => match action.slots.get_mut(slot_idx) {
                Some(slot) => {
                    let handles = std::mem::take(&mut slot.fragments);
                    slot.bound_bytes = 0;
                    slot.reset();
                    handles
                }
                None => return,
            },
            None => return,
        };
        for handle in fragment_handles {
            if let Some(package_id) = core.packages.package_of_fragment(handle) {
                self.fail_package_locked(core, package_id, status);
            }
        }
    }

    // -----------------------------------------------------------------
    // firing
    // -----------------------------------------------------------------

    /// Removes a due, fully encoded action from the store and packages it
    /// into a transport job. Fragments move to Enqueued and lose their
    /// action binding; from here the transport tracks them by handle.
    pub(crate) fn take_fire_locked(
        &self,
        core: &mut ChannelCore,
        action_id: ActionId,
    ) -> Option<FireJob> {
        let action = core.actions.remove(action_id)?;
        if let Some(link_id) = &action.link_id {
            if let Some(link) = core.links.get_mut(link_id) {
                link.action_queue.retain(|id| *id != action_id);
            }
        } else {
            for link in core.links.iter_mut() {
                link.action_queue.retain(|id| *id != action_id);
            }
        }

        let handles = action.fragment_handles();
        for handle in &handles {
            if let Some(package_id) = core.packages.package_of_fragment(*handle) {
                if let Some(package) = core.packages.get_mut(package_id) {
                    if let Some(fragment) = package.fragment_mut(*handle) {
                        fragment.state = PackageFragmentState::Enqueued;
                        fragment.action_id = None;
                    }
                }
            }
        }

        let slots = action
            .slots
            .into_iter()
            .map(|slot| {
                let content = match slot.state {
                    EncodingSlotState::Encoded => slot.content.map(|b| b.to_vec()),
                    _ => None,
                };
                (slot.params, content)
            })
            .collect();

        Some(FireJob {
            action: action.action,
            slots,
            handles,
        })
    }

    /// Stages content and performs the action. A transport refusal fails
    /// every package that had a fragment aboard and discards the action.
    pub(crate) async fn execute_fire(&self, job: FireJob) {
        let transport = match self.transport() {
            Ok(transport) => transport,
            Err(_) => return,
        };

        for (params, content) in &job.slots {
            let Some(content) = content else {
                continue;
            };
            if let Err(err) = transport
                .enqueue_content(params, &job.action, content.clone())
                .await
            {
                log::warn!(
                    "enqueue_content failed for action {}: {err}",
                    job.action.action_id
                );
                self.fail_fired_handles(&job.handles).await;
                return;
            }
        }

        if let Err(err) = transport.do_action(&job.handles, &job.action).await {
            log::warn!("do_action failed for action {}: {err}", job.action.action_id);
            self.fail_fired_handles(&job.handles).await;
        }
    }

    async fn fail_fired_handles(&self, handles: &[PackageFragmentHandle]) {
        let mut core = self.core.lock().await;
        for handle in handles {
            if let Some(package_id) = core.packages.package_of_fragment(*handle) {
                self.fail_package_locked(&mut core, package_id, PackageStatus::FailedGeneric);
            }
        }
    }

    // -----------------------------------------------------------------
    // package status fan-in
    // -----------------------------------------------------------------

    /// Per-fragment verdict from the transport. The package reports upward
    /// exactly once: Sent when its last fragment confirms, a failure the
    /// moment any fragment fails.
    pub(crate) async fn handle_package_status(
        &self,
        handle: PackageFragmentHandle,
        status: PackageStatus,
    ) {
        let mut core = self.core.lock().await;
        let Some(package_id) = core.packages.package_of_fragment(handle) else {
            log::debug!("package status for unknown fragment {handle}, discarding");
            return;
        };

        if status != PackageStatus::Sent {
            self.fail_package_locked(&mut core, package_id, status);
            self.notify.notify_one();
            return;
        }

        let finished = {
            let Some(package) = core.packages.get_mut(package_id) else {
                return;
            };
            if let Some(fragment) = package.fragment_mut(handle) {
                fragment.state = PackageFragmentState::Sent;
            }
            package.all_sent()
        };

        if finished {
            if let Some(package) = core.packages.remove(package_id) {
                if let Some(link) = core.links.get_mut(&package.link_id) {
                    link.package_queue.retain(|id| *id != package_id);
                }
                self.events.push(SdkEvent::PackageStatus {
                    handle: package.sdk_handle,
                    status: PackageStatus::Sent,
                });
            }
        }
        self.notify.notify_one();
    }

    /// Fails a package exactly once: reports upward, cancels every fragment
    /// that has not already left, unbinds them from future actions, and
    /// drops the package.
    pub(crate) fn fail_package_locked(
        &self,
        core: &mut ChannelCore,
        package_id: PackageId,
        status: PackageStatus,
    ) {
        let (link_id, fragments) = {
            let Some(package) = core.packages.get_mut(package_id) else {
                return;
            };
            if package.failed {
                return;
            }
            package.failed = true;
            (package.link_id.clone(), package.fragments.clone())
        };

        for fragment in fragments {
            if fragment.state.is_terminal() {
                continue;
            }
            let Some(action_id) = fragment.action_id else {
                continue;
            };
            // cancel the scheduled work this fragment still had
            if let Some(action) = core.actions.get_mut(action_id) {
                for slot in action.slots.iter_mut() {
                    if let Some(pos) = slot.fragments.iter().position(|h| *h == fragment.handle) {
                        slot.fragments.remove(pos);
                        slot.bound_bytes = slot.bound_bytes.saturating_sub(fragment.len);
                        if slot.state == EncodingSlotState::Encoding {
                            if let Some(encode_handle) = slot.handle {
                                core.pending_encodings.remove(&encode_handle);
                            }
                            slot.reset();
                        }
                    }
                }
            }
        }

        if let Some(package) = core.packages.remove(package_id) {
            if let Some(link) = core.links.get_mut(&link_id) {
                link.package_queue.retain(|id| *id != package_id);
            }
            self.events.push(SdkEvent::PackageStatus {
                handle: package.sdk_handle,
                status,
            });
        }
    }

    /// Fails every package whose deadline passed. In-flight encodings that
    /// carried their fragments are orphaned and re-encoded without them.
    pub(crate) fn sweep_deadlines_locked(&self, core: &mut ChannelCore, now: f64) {
        let overdue: Vec<PackageId> = core
            .packages
            .ids()
            .filter(|id| {
                core.packages
                    .get(*id)
                    .map(|p| !p.failed && p.deadline.map(|d| d < now).unwrap_or(false))
                    .unwrap_or(false)
            })
            .collect();
        for package_id in overdue {
            log::debug!("package {package_id} exceeded its deadline");
            self.fail_package_locked(core, package_id, PackageStatus::FailedTimeout);
        }
    }
}

fn order_after(candidate: (f64, ActionId), floor: (f64, ActionId)) -> bool {
    candidate.0.total_cmp(&floor.0).then(candidate.1.cmp(&floor.1)) == std::cmp::Ordering::Greater
}
