pub mod channel_status;
pub mod connection_status;
pub mod link_status;
pub mod package_status;

use std::fmt;

use async_trait::async_trait;

pub use channel_status::ChannelStatus;
pub use connection_status::ConnectionStatus;
pub use link_status::LinkStatus;
pub use package_status::PackageStatus;

use crate::component::{
    ChannelId, ConnectionId, LinkId, LinkProperties, SdkHandle, Timestamp,
};
use crate::error::Result;

/// How a piece of information should be surfaced to the human operating the
/// node.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub enum UserDisplayType {
    #[default]
    Dialog,
    QrCode,
    Notification,
}

impl fmt::Display for UserDisplayType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            UserDisplayType::Dialog => "dialog",
            UserDisplayType::QrCode => "qr-code",
            UserDisplayType::Notification => "notification",
        };
        write!(f, "{s}")
    }
}

/// The surface the outer SDK presents to the channel core. The core is the
/// only caller; every method is invoked outside the core's internal mutex,
/// in the order the underlying transitions were observed.
#[async_trait]
pub trait ChannelSdk: Send + Sync {
    fn generate_link_id(&self, channel_id: &ChannelId) -> LinkId;

    fn generate_connection_id(&self, link_id: &LinkId) -> ConnectionId;

    async fn on_link_status_changed(
        &self,
        handle: SdkHandle,
        link_id: LinkId,
        status: LinkStatus,
        properties: LinkProperties,
    );

    async fn on_connection_status_changed(
        &self,
        handle: SdkHandle,
        connection_id: ConnectionId,
        status: ConnectionStatus,
        properties: LinkProperties,
    );

    async fn on_channel_status_changed(
        &self,
        handle: SdkHandle,
        channel_id: ChannelId,
        status: ChannelStatus,
    );

    async fn on_package_status_changed(&self, handle: SdkHandle, status: PackageStatus);

    /// One decoded package, fanned out to every connection open on the link
    /// it arrived on.
    async fn receive_enc_pkg(
        &self,
        bytes: Vec<u8>,
        connection_ids: Vec<ConnectionId>,
        timeout: Option<Timestamp>,
    );

    async fn request_plugin_user_input(
        &self,
        component_id: &str,
        key: &str,
        prompt: &str,
        cache: bool,
    ) -> Result<SdkHandle>;

    async fn request_common_user_input(&self, component_id: &str, key: &str)
        -> Result<SdkHandle>;

    async fn display_info_to_user(&self, data: &str, display_type: UserDisplayType) -> Result<()>;
}
