#[cfg(test)]
pub(crate) mod channel_test;

pub mod channel_state;

pub(crate) mod channel_internal;
pub(crate) mod component_sdk;
pub(crate) mod driver;
pub(crate) mod events;
pub(crate) mod receive;
pub(crate) mod send;

use std::sync::{Arc, Mutex as StdMutex};

use bytes::Bytes;

pub use channel_state::ChannelState;

use crate::api::{ChannelSettings, ComponentFactories};
use crate::component::{ChannelId, ConnectionId, LinkId, PluginConfig, SdkHandle, Timestamp};
use crate::error::{Error, Result};
use crate::sdk::ChannelSdk;

use channel_internal::ChannelInternal;

/// Channel composes one Transport, one User Model, and one or more
/// Encodings into a single logical covert channel: packages go in, a
/// stream of user-plausible outward actions comes out.
///
/// All operations are non-blocking. Link, connection, package, and channel
/// outcomes are reported asynchronously through the [`ChannelSdk`] the
/// channel was built against, in the order the transitions were observed.
pub struct Channel {
    pub(crate) internal: Arc<ChannelInternal>,
    factories: StdMutex<Option<ComponentFactories>>,
}

impl Channel {
    pub(crate) fn with_parts(
        settings: ChannelSettings,
        sdk: Arc<dyn ChannelSdk>,
        factories: ComponentFactories,
    ) -> Self {
        Channel {
            internal: Arc::new(ChannelInternal::new(settings, sdk)),
            factories: StdMutex::new(Some(factories)),
        }
    }

    /// Creates the components and starts the channel's driver task. The
    /// channel reaches [`ChannelState::Unactivated`] once every component
    /// reports started.
    pub async fn init(&self, config: PluginConfig) -> Result<()> {
        let factories = self
            .factories
            .lock()
            .unwrap()
            .take()
            .ok_or(Error::ErrNotReady)?;
        self.internal.init(factories, config).await
    }

    pub async fn state(&self) -> ChannelState {
        self.internal.state().await
    }

    /// Activates the composition under `channel_id`. Completion is
    /// reported via `on_channel_status_changed(Available)` once the
    /// Transport and User Model are up.
    pub async fn activate_channel(
        &self,
        handle: SdkHandle,
        channel_id: ChannelId,
        role_name: String,
    ) -> Result<()> {
        self.internal
            .activate_channel(handle, channel_id, role_name)
            .await
    }

    /// Rejects new sends and lets pending actions drain.
    pub async fn deactivate_channel(&self, handle: SdkHandle) -> Result<()> {
        self.internal.deactivate_channel(handle).await
    }

    /// Asks the Transport for a fresh link. The link id is returned
    /// immediately; readiness arrives via `on_link_status_changed`.
    pub async fn create_link(&self, handle: SdkHandle) -> Result<LinkId> {
        self.internal.create_link(handle).await
    }

    pub async fn load_link_address(
        &self,
        handle: SdkHandle,
        link_address: String,
    ) -> Result<LinkId> {
        self.internal.load_link_address(handle, link_address).await
    }

    pub async fn load_link_addresses(
        &self,
        handle: SdkHandle,
        link_addresses: Vec<String>,
    ) -> Result<LinkId> {
        self.internal
            .load_link_addresses(handle, link_addresses)
            .await
    }

    pub async fn create_link_from_address(
        &self,
        handle: SdkHandle,
        link_address: String,
    ) -> Result<LinkId> {
        self.internal
            .create_link_from_address(handle, link_address)
            .await
    }

    pub async fn destroy_link(&self, handle: SdkHandle, link_id: LinkId) -> Result<()> {
        self.internal.destroy_link(handle, link_id).await
    }

    /// Opens a logical flow over a link. `send_timeout` becomes the default
    /// deadline (relative, seconds) for packages sent without one.
    pub async fn open_connection(
        &self,
        handle: SdkHandle,
        link_id: LinkId,
        send_timeout: Option<Timestamp>,
    ) -> Result<ConnectionId> {
        self.internal
            .open_connection(handle, link_id, send_timeout)
            .await
    }

    pub async fn close_connection(
        &self,
        handle: SdkHandle,
        connection_id: ConnectionId,
    ) -> Result<()> {
        self.internal.close_connection(handle, connection_id).await
    }

    /// Queues a package for the connection's link. Never waits for the
    /// action to fire; the outcome arrives as exactly one
    /// `on_package_status_changed(handle, ...)`. `deadline` is absolute
    /// wall-clock seconds.
    pub async fn send_package(
        &self,
        handle: SdkHandle,
        connection_id: ConnectionId,
        bytes: Bytes,
        deadline: Option<Timestamp>,
    ) -> Result<()> {
        self.internal
            .send_package(handle, connection_id, bytes, deadline)
            .await
    }

    /// Routes an answer for an earlier `request_*_user_input` to the
    /// components. Requests are identified by handle, so the answer is
    /// offered to all of them.
    pub async fn on_user_input_received(
        &self,
        handle: SdkHandle,
        answered: bool,
        response: &str,
    ) -> Result<()> {
        self.internal
            .on_user_input_received(handle, answered, response)
            .await
    }

    /// Stops the driver, drains queued notifications, and leaves the
    /// channel Deactivated. Safe to call more than once.
    pub async fn close(&self) {
        self.internal.close().await
    }
}
