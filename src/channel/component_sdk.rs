use std::sync::{Arc, Weak};

use async_trait::async_trait;
use smol_str::SmolStr;

use crate::channel::channel_internal::ChannelInternal;
use crate::component::{
    ComponentState, DecodingHandle, EncodingHandle, EncodingParameters, EncodingSdk,
    EncodingStatus, Event, LinkId, LinkParameters, PackageFragmentHandle, SdkHandle, TransportSdk,
    UserModelSdk,
};
use crate::error::{Error, Result};
use crate::sdk::{LinkStatus, PackageStatus};

/// The handle a component receives at creation. One struct serves all
/// three roles; each trait exposes only its own slice of the surface. The
/// channel is held weakly so a component outliving its channel cannot keep
/// the core alive, only talk into the void.
pub(crate) struct ComponentSdkHandle {
    internal: Weak<ChannelInternal>,
    component_id: SmolStr,
}

impl ComponentSdkHandle {
    pub(crate) fn new(internal: Weak<ChannelInternal>, component_id: SmolStr) -> Self {
        ComponentSdkHandle {
            internal,
            component_id,
        }
    }

    fn channel(&self) -> Option<Arc<ChannelInternal>> {
        let internal = self.internal.upgrade();
        if internal.is_none() {
            log::debug!(
                "component {} called into a dropped channel",
                self.component_id
            );
        }
        internal
    }
}

#[async_trait]
impl TransportSdk for ComponentSdkHandle {
    async fn update_state(&self, state: ComponentState) {
        if let Some(channel) = self.channel() {
            channel
                .update_component_state(&self.component_id, state)
                .await;
        }
    }

    async fn on_link_status_changed(
        &self,
        handle: SdkHandle,
        link_id: LinkId,
        status: LinkStatus,
        params: LinkParameters,
    ) {
        if let Some(channel) = self.channel() {
            channel
                .handle_link_status_changed(handle, link_id, status, params)
                .await;
        }
    }

    async fn on_package_status_changed(
        &self,
        handle: PackageFragmentHandle,
        status: PackageStatus,
    ) {
        if let Some(channel) = self.channel() {
            channel.handle_package_status(handle, status).await;
        }
    }

    async fn on_event(&self, event: Event) {
        if let Some(channel) = self.channel() {
            channel.handle_event(event).await;
        }
    }

    async fn on_receive(&self, link_id: LinkId, params: EncodingParameters, bytes: Vec<u8>) {
        if let Some(channel) = self.channel() {
            channel.handle_receive(link_id, params, bytes).await;
        }
    }

    async fn request_plugin_user_input(
        &self,
        key: &str,
        prompt: &str,
        cache: bool,
    ) -> Result<SdkHandle> {
        match self.channel() {
            Some(channel) => {
                channel
                    .handle_user_input_request(&self.component_id, key, prompt, cache)
                    .await
            }
            None => Err(Error::ErrClosed),
        }
    }

    async fn request_common_user_input(&self, key: &str) -> Result<SdkHandle> {
        match self.channel() {
            Some(channel) => {
                channel
                    .handle_common_user_input_request(&self.component_id, key)
                    .await
            }
            None => Err(Error::ErrClosed),
        }
    }
}

#[async_trait]
impl UserModelSdk for ComponentSdkHandle {
    async fn update_state(&self, state: ComponentState) {
        if let Some(channel) = self.channel() {
            channel
                .update_component_state(&self.component_id, state)
                .await;
        }
    }

    async fn on_timeline_updated(&self) {
        if let Some(channel) = self.channel() {
            channel.handle_timeline_updated().await;
        }
    }

    async fn request_plugin_user_input(
        &self,
        key: &str,
        prompt: &str,
        cache: bool,
    ) -> Result<SdkHandle> {
        match self.channel() {
            Some(channel) => {
                channel
                    .handle_user_input_request(&self.component_id, key, prompt, cache)
                    .await
            }
            None => Err(Error::ErrClosed),
        }
    }

    async fn request_common_user_input(&self, key: &str) -> Result<SdkHandle> {
        match self.channel() {
            Some(channel) => {
                channel
                    .handle_common_user_input_request(&self.component_id, key)
                    .await
            }
            None => Err(Error::ErrClosed),
        }
    }
}

#[async_trait]
impl EncodingSdk for ComponentSdkHandle {
    async fn update_state(&self, state: ComponentState) {
        if let Some(channel) = self.channel() {
            channel
                .update_component_state(&self.component_id, state)
                .await;
        }
    }

    async fn on_bytes_encoded(
        &self,
        handle: EncodingHandle,
        bytes: Vec<u8>,
        status: EncodingStatus,
    ) {
        if let Some(channel) = self.channel() {
            channel.handle_bytes_encoded(handle, bytes, status).await;
        }
    }

    async fn on_bytes_decoded(
        &self,
        handle: DecodingHandle,
        bytes: Vec<u8>,
        status: EncodingStatus,
    ) {
        if let Some(channel) = self.channel() {
            channel.handle_bytes_decoded(handle, bytes, status).await;
        }
    }

    async fn request_plugin_user_input(
        &self,
        key: &str,
        prompt: &str,
        cache: bool,
    ) -> Result<SdkHandle> {
        match self.channel() {
            Some(channel) => {
                channel
                    .handle_user_input_request(&self.component_id, key, prompt, cache)
                    .await
            }
            None => Err(Error::ErrClosed),
        }
    }

    async fn request_common_user_input(&self, key: &str) -> Result<SdkHandle> {
        match self.channel() {
            Some(channel) => {
                channel
                    .handle_common_user_input_request(&self.component_id, key)
                    .await
            }
            None => Err(Error::ErrClosed),
        }
    }
}
