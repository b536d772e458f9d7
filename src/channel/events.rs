use std::sync::Arc;

use tokio::sync::mpsc;
use waitgroup::WaitGroup;

use crate::component::{ChannelId, ConnectionId, LinkId, LinkProperties, SdkHandle, Timestamp};
use crate::sdk::{ChannelSdk, ChannelStatus, ConnectionStatus, LinkStatus, PackageStatus};

/// One queued upward notification. Events are recorded while the core mutex
/// is held and delivered strictly in insertion order by the queue's own
/// task, so no SDK callback ever runs under the mutex.
pub(crate) enum SdkEvent {
    LinkStatus {
        handle: SdkHandle,
        link_id: LinkId,
        status: LinkStatus,
        properties: LinkProperties,
    },
    ConnectionStatus {
        handle: SdkHandle,
        connection_id: ConnectionId,
        status: ConnectionStatus,
        properties: LinkProperties,
    },
    ChannelStatus {
        handle: SdkHandle,
        channel_id: ChannelId,
        status: ChannelStatus,
    },
    PackageStatus {
        handle: SdkHandle,
        status: PackageStatus,
    },
    ReceivePackage {
        bytes: Vec<u8>,
        connection_ids: Vec<ConnectionId>,
        timeout: Option<Timestamp>,
    },
    /// Barrier for `done()`: dropping the worker releases the waiter.
    Flush(waitgroup::Worker),
}

/// Ordered delivery queue for upward SDK notifications.
pub(crate) struct EventQueue {
    events_tx: mpsc::UnboundedSender<SdkEvent>,
    close_tx: mpsc::Sender<()>,
}

impl EventQueue {
    pub(crate) fn new(sdk: Arc<dyn ChannelSdk>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = mpsc::channel(1);
        tokio::spawn(async move {
            EventQueue::deliver(sdk, events_rx, close_rx).await;
        });

        EventQueue {
            events_tx,
            close_tx,
        }
    }

    /// Enqueues an event for delivery. Safe to call while holding the core
    /// mutex; delivery happens on the queue task.
    pub(crate) fn push(&self, event: SdkEvent) {
        if self.events_tx.send(event).is_err() {
            log::debug!("event queue closed, dropping notification");
        }
    }

    /// Resolves when every event enqueued before this call has been
    /// delivered.
    pub(crate) async fn done(&self) {
        let wg = WaitGroup::new();
        self.push(SdkEvent::Flush(wg.worker()));
        wg.wait().await;
    }

    pub(crate) async fn close(&self) {
        let _ = self.close_tx.send(()).await;
    }

    async fn deliver(
        sdk: Arc<dyn ChannelSdk>,
        mut events_rx: mpsc::UnboundedReceiver<SdkEvent>,
        mut close_rx: mpsc::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = close_rx.recv() => {
                    break;
                }
                event = events_rx.recv() => {
                    let Some(event) = event else {
                        break;
                    };
                    EventQueue::deliver_one(&sdk, event).await;
                }
            }
        }
    }

    async fn deliver_one(sdk: &Arc<dyn ChannelSdk>, event: SdkEvent) {
        match event {
            SdkEvent::LinkStatus {
                handle,
                link_id,
                status,
                properties,
            } => {
                sdk.on_link_status_changed(handle, link_id, status, properties)
                    .await;
            }
            SdkEvent::ConnectionStatus {
                handle,
                connection_id,
                status,
                properties,
            } => {
                sdk.on_connection_status_changed(handle, connection_id, status, properties)
                    .await;
            }
            SdkEvent::ChannelStatus {
                handle,
                channel_id,
                status,
            } => {
                sdk.on_channel_status_changed(handle, channel_id, status)
                    .await;
            }
            SdkEvent::PackageStatus { handle, status } => {
                sdk.on_package_status_changed(handle, status).await;
            }
            SdkEvent::ReceivePackage {
                bytes,
                connection_ids,
                timeout,
            } => {
                sdk.receive_enc_pkg(bytes, connection_ids, timeout).await;
            }
            SdkEvent::Flush(worker) => {
                drop(worker);
            }
        }
    }
}
