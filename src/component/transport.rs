use async_trait::async_trait;

use super::component_state::ComponentState;
use super::params::{
    Action, EncodingParameters, Event, LinkParameters, LinkProperties, TransportProperties,
};
use super::{ChannelId, LinkId, PackageFragmentHandle, SdkHandle};
use crate::error::Result;

/// Transport talks to the outside world. Every outward-visible interaction
/// happens inside a scheduled action; the core never asks a Transport to do
/// anything at a moment the User Model did not sanction.
///
/// Completions are delivered asynchronously through the [`TransportSdk`]
/// handle the factory received: link operations come back via
/// `on_link_status_changed`, delivery outcomes via
/// `on_package_status_changed`, and inbound bytes via `on_receive`.
#[async_trait]
pub trait Transport: Send + Sync {
    fn transport_properties(&self) -> TransportProperties;

    fn link_properties(&self, link_id: &LinkId) -> Result<LinkProperties>;

    async fn activate_channel(
        &self,
        handle: SdkHandle,
        channel_id: ChannelId,
        role_name: String,
    ) -> Result<()>;

    async fn create_link(&self, handle: SdkHandle, link_id: LinkId) -> Result<()>;

    async fn load_link_address(
        &self,
        handle: SdkHandle,
        link_id: LinkId,
        link_address: String,
    ) -> Result<()>;

    async fn load_link_addresses(
        &self,
        handle: SdkHandle,
        link_id: LinkId,
        link_addresses: Vec<String>,
    ) -> Result<()>;

    async fn create_link_from_address(
        &self,
        handle: SdkHandle,
        link_id: LinkId,
        link_address: String,
    ) -> Result<()>;

    async fn destroy_link(&self, handle: SdkHandle, link_id: LinkId) -> Result<()>;

    /// Resolves an action into its encoding slots. Called once per action
    /// when it enters the timeline.
    async fn get_action_params(&self, action: &Action) -> Result<Vec<EncodingParameters>>;

    /// Stages encoded content for one of `action`'s slots ahead of
    /// `do_action`.
    async fn enqueue_content(
        &self,
        params: &EncodingParameters,
        action: &Action,
        content: Vec<u8>,
    ) -> Result<()>;

    /// Reclaims content staged for an action that was withdrawn.
    async fn dequeue_content(&self, action: &Action) -> Result<()>;

    /// Performs the action. `handles` identifies every package fragment
    /// riding in it; the Transport reports a status for each.
    async fn do_action(&self, handles: &[PackageFragmentHandle], action: &Action) -> Result<()>;

    /// Read-side poll: check the named links for inbound content. The
    /// Transport delivers anything found through `on_receive`.
    async fn fetch(&self, link_ids: Vec<LinkId>) -> Result<()>;

    async fn on_user_input_received(
        &self,
        handle: SdkHandle,
        answered: bool,
        response: &str,
    ) -> Result<()>;
}

/// The core's callback surface handed to a Transport at creation.
#[async_trait]
pub trait TransportSdk: Send + Sync {
    async fn update_state(&self, state: ComponentState);

    async fn on_link_status_changed(
        &self,
        handle: SdkHandle,
        link_id: LinkId,
        status: crate::sdk::link_status::LinkStatus,
        params: LinkParameters,
    );

    async fn on_package_status_changed(
        &self,
        handle: PackageFragmentHandle,
        status: crate::sdk::package_status::PackageStatus,
    );

    /// Forwarded to the User Model as `on_transport_event`.
    async fn on_event(&self, event: Event);

    /// Inbound bytes read during an action, with the encoding parameters
    /// needed to decode them.
    async fn on_receive(&self, link_id: LinkId, params: EncodingParameters, bytes: Vec<u8>);

    async fn request_plugin_user_input(
        &self,
        key: &str,
        prompt: &str,
        cache: bool,
    ) -> Result<SdkHandle>;

    async fn request_common_user_input(&self, key: &str) -> Result<SdkHandle>;
}
