use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use smol_str::SmolStr;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use crate::action::ActionStore;
use crate::api::{ChannelSettings, ComponentFactories};
use crate::channel::channel_state::ChannelState;
use crate::channel::component_sdk::ComponentSdkHandle;
use crate::channel::events::{EventQueue, SdkEvent};
use crate::channel::receive::FragmentAssembler;
use crate::component::{
    ActionId, ChannelId, ComponentState, ConnectionId, DecodingHandle, Encoding, EncodingHandle,
    EncodingParameters, Event, LinkId, PluginConfig, SdkHandle, Timestamp, Transport, UserModel,
};
use crate::error::{Error, Result};
use crate::framing::ProducerId;
use crate::link::{Connection, Link, LinkTable};
use crate::package::{OutboundPackage, PackageStore};
use crate::sdk::{ChannelSdk, ChannelStatus, ConnectionStatus, LinkStatus, PackageStatus};

pub(crate) const TRANSPORT_COMPONENT_ID: &str = "transport";
pub(crate) const USER_MODEL_COMPONENT_ID: &str = "usermodel";

/// Current wall-clock time as a float timestamp.
pub(crate) fn unix_now() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// An encode request in flight, resolved back to its slot on completion.
#[derive(Debug, Copy, Clone)]
pub(crate) struct PendingEncoding {
    pub action_id: ActionId,
    pub slot: usize,
}

/// Everything guarded by the channel's one internal mutex: the stores, the
/// lifecycle state, and the scheduling bookkeeping. Component and SDK calls
/// never happen while this is held; work is collected into jobs and issued
/// after release.
pub(crate) struct ChannelCore {
    pub state: ChannelState,
    pub channel_id: ChannelId,
    pub role_name: String,
    pub links: LinkTable,
    pub actions: ActionStore,
    pub packages: PackageStore,
    pub component_states: HashMap<SmolStr, ComponentState>,
    pub pending_encodings: HashMap<EncodingHandle, PendingEncoding>,
    pub pending_decodings: HashMap<DecodingHandle, LinkId>,
    pub assemblers: HashMap<ProducerId, FragmentAssembler>,
    next_encoding_handle: u64,
    next_decoding_handle: u64,
    /// End of the window the last timeline fetch covered.
    pub timeline_horizon: Timestamp,
    pub refresh_requested: bool,
    pub refresh_in_flight: bool,
    pub next_fetch_time: Timestamp,
    /// Seconds of lead the driver gives encoding before an action fires.
    pub max_encoding_time: f64,
    pub timeline_lookahead: f64,
    pub fetch_period: f64,
    /// Set by `close`; tells the driver to exit its loop.
    pub shutdown: bool,
}

impl ChannelCore {
    pub(crate) fn new(settings: &ChannelSettings) -> Self {
        ChannelCore {
            state: ChannelState::Uninitialized,
            channel_id: ChannelId::default(),
            role_name: String::new(),
            links: LinkTable::new(),
            actions: ActionStore::new(),
            packages: PackageStore::new(),
            component_states: HashMap::new(),
            pending_encodings: HashMap::new(),
            pending_decodings: HashMap::new(),
            assemblers: HashMap::new(),
            next_encoding_handle: 1,
            next_decoding_handle: 1,
            timeline_horizon: 0.0,
            refresh_requested: false,
            refresh_in_flight: false,
            next_fetch_time: 0.0,
            max_encoding_time: settings.max_encoding_time,
            timeline_lookahead: settings.timeline_lookahead,
            fetch_period: settings.fetch_period,
            shutdown: false,
        }
    }

    pub(crate) fn take_encoding_handle(&mut self) -> EncodingHandle {
        let handle = EncodingHandle(self.next_encoding_handle);
        self.next_encoding_handle += 1;
        handle
    }

    pub(crate) fn take_decoding_handle(&mut self) -> DecodingHandle {
        let handle = DecodingHandle(self.next_decoding_handle);
        self.next_decoding_handle += 1;
        handle
    }

    /// Gate for operations only legal in the Activated state.
    pub(crate) fn require_activated(&self) -> Result<()> {
        match self.state {
            ChannelState::Activated => Ok(()),
            ChannelState::Failed => Err(Error::ErrChannelFailed),
            ChannelState::Deactivated => Err(Error::ErrClosed),
            _ => Err(Error::ErrNotReady),
        }
    }

    fn all_components_started(&self) -> bool {
        !self.component_states.is_empty()
            && self
                .component_states
                .values()
                .all(|s| *s == ComponentState::Started)
    }
}

/// The shared half of a channel: component handles, the guarded core, the
/// upward event queue, and the driver's wakeup signal. Public API and
/// component callbacks both land here.
pub(crate) struct ChannelInternal {
    pub(crate) settings: ChannelSettings,
    pub(crate) sdk: Arc<dyn ChannelSdk>,
    pub(crate) transport: OnceLock<Arc<dyn Transport>>,
    pub(crate) user_model: OnceLock<Arc<dyn UserModel>>,
    pub(crate) encodings: OnceLock<Vec<Arc<dyn Encoding>>>,
    pub(crate) core: Mutex<ChannelCore>,
    pub(crate) events: EventQueue,
    pub(crate) notify: Notify,
    pub(crate) driver: StdMutex<Option<JoinHandle<()>>>,
}

impl ChannelInternal {
    pub(crate) fn new(settings: ChannelSettings, sdk: Arc<dyn ChannelSdk>) -> Self {
        let core = ChannelCore::new(&settings);
        let events = EventQueue::new(Arc::clone(&sdk));
        ChannelInternal {
            settings,
            sdk,
            transport: OnceLock::new(),
            user_model: OnceLock::new(),
            encodings: OnceLock::new(),
            core: Mutex::new(core),
            events,
            notify: Notify::new(),
            driver: StdMutex::new(None),
        }
    }

    pub(crate) fn transport(&self) -> Result<Arc<dyn Transport>> {
        self.transport.get().cloned().ok_or(Error::ErrMissingComponent)
    }

    pub(crate) fn user_model(&self) -> Result<Arc<dyn UserModel>> {
        self.user_model
            .get()
            .cloned()
            .ok_or(Error::ErrMissingComponent)
    }

    pub(crate) fn encodings(&self) -> &[Arc<dyn Encoding>] {
        self.encodings.get().map(|e| e.as_slice()).unwrap_or(&[])
    }

    /// The composed encoding matching `params`, by MIME type. A wildcard
    /// type on either side matches the first candidate.
    pub(crate) fn encoding_for_params(
        &self,
        params: &EncodingParameters,
    ) -> Result<Arc<dyn Encoding>> {
        let encodings = self.encodings();
        if params.mime_type == "*/*" {
            return encodings
                .first()
                .cloned()
                .ok_or(Error::ErrUnknownEncoding);
        }
        encodings
            .iter()
            .find(|e| {
                let mime = e.encoding_properties().mime_type;
                mime == params.mime_type || mime == "*/*"
            })
            .cloned()
            .ok_or(Error::ErrUnknownEncoding)
    }

    // ---------------------------------------------------------------------
    // lifecycle
    // ---------------------------------------------------------------------

    /// Creates the components through their factories and starts the
    /// driver. The channel reaches Unactivated once every component reports
    /// started.
    pub(crate) async fn init(
        self: &Arc<Self>,
        factories: ComponentFactories,
        config: PluginConfig,
    ) -> Result<()> {
        {
            let mut core = self.core.lock().await;
            if core.state == ChannelState::Failed {
                return Err(Error::ErrChannelFailed);
            }
            if core.state != ChannelState::Uninitialized {
                return Err(Error::ErrNotReady);
            }
            core.state = ChannelState::Initializing;
            core.component_states
                .insert(TRANSPORT_COMPONENT_ID.into(), ComponentState::Unstarted);
            core.component_states
                .insert(USER_MODEL_COMPONENT_ID.into(), ComponentState::Unstarted);
            for idx in 0..factories.encoding_count() {
                core.component_states
                    .insert(encoding_component_id(idx), ComponentState::Unstarted);
            }
            log::debug!("channel initializing, config: {}", config.config);
        }

        let transport_sdk =
            ComponentSdkHandle::new(Arc::downgrade(self), TRANSPORT_COMPONENT_ID.into());
        let user_model_sdk =
            ComponentSdkHandle::new(Arc::downgrade(self), USER_MODEL_COMPONENT_ID.into());

        let built = factories.build(self, transport_sdk, user_model_sdk, &config)?;
        let _ = self.transport.set(built.transport);
        let _ = self.user_model.set(built.user_model);
        let _ = self.encodings.set(built.encodings);

        self.spawn_driver();
        Ok(())
    }

    /// A component reported new readiness. Aggregates into the channel
    /// lifecycle.
    pub(crate) async fn update_component_state(&self, component_id: &str, state: ComponentState) {
        let mut core = self.core.lock().await;
        log::debug!("component {component_id} reported {state}");
        core.component_states
            .insert(SmolStr::new(component_id), state);

        if state == ComponentState::Failed {
            self.fail_channel_locked(&mut core);
            return;
        }

        if !core.all_components_started() {
            return;
        }
        match core.state {
            ChannelState::Initializing => {
                core.state = ChannelState::Unactivated;
                log::info!("all components started, channel unactivated");
            }
            ChannelState::Starting => {
                core.state = ChannelState::Activated;
                core.refresh_requested = true;
                core.next_fetch_time = unix_now() + core.fetch_period;
                log::info!("channel {} activated", core.channel_id);
                self.events.push(SdkEvent::ChannelStatus {
                    handle: SdkHandle::default(),
                    channel_id: core.channel_id.clone(),
                    status: ChannelStatus::Available,
                });
                self.notify.notify_one();
            }
            _ => {}
        }
    }

    pub(crate) async fn activate_channel(
        &self,
        handle: SdkHandle,
        channel_id: ChannelId,
        role_name: String,
    ) -> Result<()> {
        {
            let mut core = self.core.lock().await;
            match core.state {
                ChannelState::Failed => return Err(Error::ErrChannelFailed),
                ChannelState::Unactivated => {}
                _ => return Err(Error::ErrNotReady),
            }
            core.state = ChannelState::Starting;
            core.channel_id = channel_id.clone();
            core.role_name = role_name.clone();
            // Transport and User Model must report started again for this
            // activation; encodings are passive and stay as they were.
            core.component_states
                .insert(TRANSPORT_COMPONENT_ID.into(), ComponentState::Unstarted);
            core.component_states
                .insert(USER_MODEL_COMPONENT_ID.into(), ComponentState::Unstarted);
        }

        // raise the encode lead to the slowest composed encoding
        let slowest = self
            .encodings()
            .iter()
            .map(|e| e.encoding_properties().encoding_time)
            .fold(0.0_f64, f64::max);
        {
            let mut core = self.core.lock().await;
            core.max_encoding_time = core.max_encoding_time.max(slowest);

            let model_props = self.user_model().ok().map(|m| m.user_model_properties());
            if let Some(props) = model_props {
                if props.timeline_length > 0.0 {
                    core.timeline_lookahead = props.timeline_length;
                }
                if props.timeline_fetch_period > 0.0 {
                    core.fetch_period = core.fetch_period.min(props.timeline_fetch_period);
                }
            }
        }

        let transport = self.transport()?;
        log::debug!(
            "activating {channel_id}: transport supports {} action kinds",
            transport.transport_properties().supported_actions.len()
        );
        transport
            .activate_channel(handle, channel_id.clone(), role_name.clone())
            .await?;
        self.user_model()?
            .activate_channel(handle, channel_id, role_name)
            .await?;
        Ok(())
    }

    pub(crate) async fn deactivate_channel(&self, _handle: SdkHandle) -> Result<()> {
        let mut core = self.core.lock().await;
        match core.state {
            ChannelState::Failed => return Err(Error::ErrChannelFailed),
            ChannelState::Activated => {}
            _ => return Err(Error::ErrNotReady),
        }
        core.state = ChannelState::Deactivating;
        log::info!("channel {} deactivating", core.channel_id);
        self.notify.notify_one();
        Ok(())
    }

    /// Stops the driver, drains the event queue, and leaves the channel
    /// Deactivated. Idempotent.
    pub(crate) async fn close(&self) {
        {
            let mut core = self.core.lock().await;
            if core.shutdown {
                return;
            }
            core.shutdown = true;
            if !core.state.is_terminal() {
                core.state = ChannelState::Deactivating;
            }
        }
        self.notify.notify_one();

        let driver = self.driver.lock().unwrap().take();
        if let Some(handle) = driver {
            let _ = handle.await;
        }

        self.events.done().await;
        self.events.close().await;

        let mut core = self.core.lock().await;
        if core.state != ChannelState::Failed {
            core.state = ChannelState::Deactivated;
        }
    }

    pub(crate) fn fail_channel_locked(&self, core: &mut ChannelCore) {
        if core.state == ChannelState::Failed {
            return;
        }
        log::error!("channel {} failed, quarantining", core.channel_id);
        core.state = ChannelState::Failed;
        self.events.push(SdkEvent::ChannelStatus {
            handle: SdkHandle::default(),
            channel_id: core.channel_id.clone(),
            status: ChannelStatus::Failed,
        });
        self.notify.notify_one();
    }

    pub(crate) async fn state(&self) -> ChannelState {
        self.core.lock().await.state
    }

    // ---------------------------------------------------------------------
    // links and connections
    // ---------------------------------------------------------------------

    async fn new_link_id(&self) -> Result<LinkId> {
        let channel_id = {
            let core = self.core.lock().await;
            core.require_activated()?;
            core.channel_id.clone()
        };
        // user-supplied generator; never invoked under the core mutex
        let link_id = self.sdk.generate_link_id(&channel_id);
        if link_id.is_empty() {
            return Err(Error::ErrInvalidArgument);
        }
        Ok(link_id)
    }

    async fn register_link(&self, link_id: &LinkId) -> Result<()> {
        let mut core = self.core.lock().await;
        core.require_activated()?;
        core.links.insert(Link::new(link_id.clone()));
        Ok(())
    }

    async fn discard_link(&self, link_id: &LinkId) {
        let mut core = self.core.lock().await;
        core.links.remove(link_id);
    }

    pub(crate) async fn create_link(&self, handle: SdkHandle) -> Result<LinkId> {
        let link_id = self.new_link_id().await?;
        self.register_link(&link_id).await?;
        if let Err(err) = self.transport()?.create_link(handle, link_id.clone()).await {
            self.discard_link(&link_id).await;
            return Err(err);
        }
        Ok(link_id)
    }

    pub(crate) async fn load_link_address(
        &self,
        handle: SdkHandle,
        link_address: String,
    ) -> Result<LinkId> {
        let link_id = self.new_link_id().await?;
        self.register_link(&link_id).await?;
        if let Err(err) = self
            .transport()?
            .load_link_address(handle, link_id.clone(), link_address)
            .await
        {
            self.discard_link(&link_id).await;
            return Err(err);
        }
        Ok(link_id)
    }

    pub(crate) async fn load_link_addresses(
        &self,
        handle: SdkHandle,
        link_addresses: Vec<String>,
    ) -> Result<LinkId> {
        let link_id = self.new_link_id().await?;
        self.register_link(&link_id).await?;
        if let Err(err) = self
            .transport()?
            .load_link_addresses(handle, link_id.clone(), link_addresses)
            .await
        {
            self.discard_link(&link_id).await;
            return Err(err);
        }
        Ok(link_id)
    }

    pub(crate) async fn create_link_from_address(
        &self,
        handle: SdkHandle,
        link_address: String,
    ) -> Result<LinkId> {
        let link_id = self.new_link_id().await?;
        self.register_link(&link_id).await?;
        if let Err(err) = self
            .transport()?
            .create_link_from_address(handle, link_id.clone(), link_address)
            .await
        {
            self.discard_link(&link_id).await;
            return Err(err);
        }
        Ok(link_id)
    }

    pub(crate) async fn destroy_link(&self, handle: SdkHandle, link_id: LinkId) -> Result<()> {
        {
            let core = self.core.lock().await;
            core.require_activated()?;
            if !core.links.contains(&link_id) {
                return Err(Error::ErrInvalidLinkId);
            }
        }
        // teardown happens when the transport reports LinkStatus::Destroyed
        self.transport()?.destroy_link(handle, link_id).await
    }

    pub(crate) async fn open_connection(
        &self,
        handle: SdkHandle,
        link_id: LinkId,
        send_timeout: Option<Timestamp>,
    ) -> Result<ConnectionId> {
        if link_id.is_empty() {
            return Err(Error::ErrInvalidArgument);
        }
        {
            let core = self.core.lock().await;
            core.require_activated()?;
            if !core.links.contains(&link_id) {
                return Err(Error::ErrInvalidLinkId);
            }
        }
        let connection_id = self.sdk.generate_connection_id(&link_id);
        if connection_id.is_empty() {
            return Err(Error::ErrInvalidArgument);
        }

        let mut core = self.core.lock().await;
        core.require_activated()?;
        let Some(link) = core.links.get(&link_id) else {
            return Err(Error::ErrInvalidLinkId);
        };
        let properties = link.properties.clone();
        core.links.open_connection(Connection {
            connection_id: connection_id.clone(),
            link_id,
            send_timeout,
        });
        self.events.push(SdkEvent::ConnectionStatus {
            handle,
            connection_id: connection_id.clone(),
            status: ConnectionStatus::Open,
            properties,
        });
        Ok(connection_id)
    }

    pub(crate) async fn close_connection(
        &self,
        handle: SdkHandle,
        connection_id: ConnectionId,
    ) -> Result<()> {
        let mut core = self.core.lock().await;
        core.require_activated()?;
        let Some(connection) = core.links.close_connection(&connection_id) else {
            return Err(Error::ErrInvalidConnectionId);
        };
        let properties = core
            .links
            .get(&connection.link_id)
            .map(|l| l.properties.clone())
            .unwrap_or_default();
        self.events.push(SdkEvent::ConnectionStatus {
            handle,
            connection_id,
            status: ConnectionStatus::Closed,
            properties,
        });
        Ok(())
    }

    // ---------------------------------------------------------------------
    // transport callbacks
    // ---------------------------------------------------------------------

    pub(crate) async fn handle_link_status_changed(
        &self,
        handle: SdkHandle,
        link_id: LinkId,
        status: LinkStatus,
        params: crate::component::LinkParameters,
    ) {
        match status {
            LinkStatus::Created | LinkStatus::Loaded => {
                let properties = self
                    .transport()
                    .ok()
                    .and_then(|t| t.link_properties(&link_id).ok())
                    .unwrap_or_default();
                {
                    let mut core = self.core.lock().await;
                    if let Some(link) = core.links.get_mut(&link_id) {
                        link.properties = properties.clone();
                    } else {
                        // transport-initiated link we have not seen yet
                        let mut link = Link::new(link_id.clone());
                        link.properties = properties.clone();
                        core.links.insert(link);
                    }
                    core.refresh_requested = true;
                    self.events.push(SdkEvent::LinkStatus {
                        handle,
                        link_id: link_id.clone(),
                        status,
                        properties,
                    });
                }
                if let Ok(user_model) = self.user_model() {
                    if let Err(err) = user_model.add_link(link_id.clone(), params).await {
                        log::warn!("user model rejected link {link_id}: {err}");
                    }
                }
                self.notify.notify_one();
            }
            LinkStatus::Destroyed => {
                self.handle_link_destroyed(handle, link_id.clone()).await;
                if let Ok(user_model) = self.user_model() {
                    if let Err(err) = user_model.remove_link(link_id.clone()).await {
                        log::warn!("user model remove_link {link_id}: {err}");
                    }
                }
                self.notify.notify_one();
            }
            LinkStatus::Unspecified => {
                log::warn!("transport reported unspecified link status for {link_id}");
            }
        }
    }

    /// The pathway is gone: close its connections, fail its packages once
    /// each, orphan its in-flight encodings, and drop its actions.
    async fn handle_link_destroyed(&self, handle: SdkHandle, link_id: LinkId) {
        let mut core = self.core.lock().await;
        let Some((link, closed_connections)) = core.links.remove(&link_id) else {
            log::debug!("destroyed link {link_id} was not tracked");
            return;
        };

        for connection_id in closed_connections {
            self.events.push(SdkEvent::ConnectionStatus {
                handle,
                connection_id,
                status: ConnectionStatus::Closed,
                properties: link.properties.clone(),
            });
        }

        for action_id in link.action_queue {
            let committed_here = core
                .actions
                .get(action_id)
                .map(|a| a.link_id.as_ref() == Some(&link_id) || !a.wildcard)
                .unwrap_or(false);
            if committed_here {
                if let Some(action) = core.actions.remove(action_id) {
                    for slot in &action.slots {
                        if let Some(encode_handle) = slot.handle {
                            // in-flight encoding is orphaned; its completion
                            // will find no pending entry and be discarded
                            core.pending_encodings.remove(&encode_handle);
                        }
                    }
                }
            }
        }

        for package_id in link.package_queue {
            self.fail_package_locked(&mut core, package_id, PackageStatus::FailedGeneric);
        }

        self.events.push(SdkEvent::LinkStatus {
            handle,
            link_id,
            status: LinkStatus::Destroyed,
            properties: link.properties,
        });
    }

    pub(crate) async fn handle_event(&self, event: Event) {
        if let Ok(user_model) = self.user_model() {
            if let Err(err) = user_model.on_transport_event(event).await {
                log::warn!("user model rejected transport event: {err}");
            }
        }
    }

    pub(crate) async fn handle_timeline_updated(&self) {
        let mut core = self.core.lock().await;
        core.refresh_requested = true;
        self.notify.notify_one();
    }

    pub(crate) async fn handle_user_input_request(
        &self,
        component_id: &str,
        key: &str,
        prompt: &str,
        cache: bool,
    ) -> Result<SdkHandle> {
        self.sdk
            .request_plugin_user_input(component_id, key, prompt, cache)
            .await
    }

    pub(crate) async fn handle_common_user_input_request(
        &self,
        component_id: &str,
        key: &str,
    ) -> Result<SdkHandle> {
        self.sdk.request_common_user_input(component_id, key).await
    }

    /// An answer (or refusal) for an earlier user-input request. The
    /// requester is identified only by handle, so every component hears it.
    pub(crate) async fn on_user_input_received(
        &self,
        handle: SdkHandle,
        answered: bool,
        response: &str,
    ) -> Result<()> {
        {
            let core = self.core.lock().await;
            if core.state == ChannelState::Failed {
                return Err(Error::ErrChannelFailed);
            }
        }
        if let Ok(transport) = self.transport() {
            if let Err(err) = transport
                .on_user_input_received(handle, answered, response)
                .await
            {
                log::warn!("transport rejected user input {handle}: {err}");
            }
        }
        if let Ok(user_model) = self.user_model() {
            if let Err(err) = user_model
                .on_user_input_received(handle, answered, response)
                .await
            {
                log::warn!("user model rejected user input {handle}: {err}");
            }
        }
        for encoding in self.encodings() {
            if let Err(err) = encoding
                .on_user_input_received(handle, answered, response)
                .await
            {
                log::warn!("encoding rejected user input {handle}: {err}");
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // send entry point
    // ---------------------------------------------------------------------

    /// Queues a package for the connection's link and offers the User Model
    /// the chance to schedule extra actions for it. Non-blocking; the
    /// package's fate arrives later as a package status event.
    pub(crate) async fn send_package(
        &self,
        handle: SdkHandle,
        connection_id: ConnectionId,
        bytes: Bytes,
        deadline: Option<Timestamp>,
    ) -> Result<()> {
        if bytes.is_empty() {
            return Err(Error::ErrInvalidArgument);
        }
        let package_len = bytes.len();
        let now = unix_now();

        let (link_id, package_id) = {
            let mut core = self.core.lock().await;
            core.require_activated()?;
            let (link_id, send_timeout) = match core.links.connection(&connection_id) {
                Some(connection) => (connection.link_id.clone(), connection.send_timeout),
                None => return Err(Error::ErrInvalidConnectionId),
            };
            let deadline = deadline.or(send_timeout.map(|t| now + t));
            let package_id = core.packages.insert(OutboundPackage::new(
                link_id.clone(),
                bytes,
                handle,
                deadline,
            ));
            if let Some(link) = core.links.get_mut(&link_id) {
                link.package_queue.push_back(package_id);
            }
            (link_id, package_id)
        };

        // let the model inject actions for this send before binding
        let injected = match self.user_model() {
            Ok(user_model) => match user_model.on_send_package(link_id.clone(), package_len).await {
                Ok(timeline) => timeline,
                Err(err) => {
                    log::warn!("user model on_send_package failed: {err}");
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };

        if !injected.is_empty() {
            self.merge_and_resolve(injected, now).await;
        }

        let mut core = self.core.lock().await;
        self.bind_link_packages(&mut core, &link_id);

        let bound = core
            .packages
            .get(package_id)
            .map(|p| !p.fragments.is_empty())
            .unwrap_or(false);
        if !bound && !self.link_has_usable_action(&core, &link_id) {
            // nothing to ride on and nothing coming: mirror the original's
            // temporary error instead of letting the package rot
            core.packages.remove(package_id);
            if let Some(link) = core.links.get_mut(&link_id) {
                link.package_queue.retain(|id| *id != package_id);
            }
            return Err(Error::ErrNoUsableAction);
        }

        self.notify.notify_one();
        Ok(())
    }

    fn link_has_usable_action(&self, core: &ChannelCore, link_id: &LinkId) -> bool {
        let Some(link) = core.links.get(link_id) else {
            return false;
        };
        link.action_queue.iter().any(|id| {
            core.actions
                .get(*id)
                .map(|a| a.accepts_fragments() && !a.slots.is_empty())
                .unwrap_or(false)
        })
    }
}

pub(crate) fn encoding_component_id(idx: usize) -> SmolStr {
    SmolStr::new(format!("encoding{idx}"))
}
