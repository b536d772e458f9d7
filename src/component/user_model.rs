use async_trait::async_trait;

use super::component_state::ComponentState;
use super::params::{ActionTimeline, Event, LinkParameters, UserModelProperties};
use super::{ChannelId, LinkId, SdkHandle, Timestamp};
use crate::error::Result;

/// UserModel decides *when* a plausible user would act. It owns the shape of
/// the timeline; the core only merges and executes it.
#[async_trait]
pub trait UserModel: Send + Sync {
    fn user_model_properties(&self) -> UserModelProperties;

    async fn activate_channel(
        &self,
        handle: SdkHandle,
        channel_id: ChannelId,
        role_name: String,
    ) -> Result<()>;

    async fn add_link(&self, link_id: LinkId, params: LinkParameters) -> Result<()>;

    async fn remove_link(&self, link_id: LinkId) -> Result<()>;

    /// Actions the modelled user would take in `[start, end]`. Overlapping
    /// windows must return the same `action_id` for the same action; that
    /// identity is what keeps fragments bound across refreshes.
    async fn get_timeline(&self, start: Timestamp, end: Timestamp) -> Result<ActionTimeline>;

    async fn on_transport_event(&self, event: Event) -> Result<()>;

    /// A package of `package_len` bytes was just queued for `link_id`. The
    /// model may inject additional near-term actions for it; returning an
    /// empty timeline leaves the schedule unchanged.
    async fn on_send_package(&self, link_id: LinkId, package_len: usize) -> Result<ActionTimeline>;

    async fn on_user_input_received(
        &self,
        handle: SdkHandle,
        answered: bool,
        response: &str,
    ) -> Result<()>;
}

/// The core's callback surface handed to a User Model at creation.
#[async_trait]
pub trait UserModelSdk: Send + Sync {
    async fn update_state(&self, state: ComponentState);

    /// The model's idea of the timeline changed; the core refreshes on its
    /// next tick.
    async fn on_timeline_updated(&self);

    async fn request_plugin_user_input(
        &self,
        key: &str,
        prompt: &str,
        cache: bool,
    ) -> Result<SdkHandle>;

    async fn request_common_user_input(&self, key: &str) -> Result<SdkHandle>;
}
