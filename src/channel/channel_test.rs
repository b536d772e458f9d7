use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;
use tokio::time::timeout;

use super::*;
use crate::api::{ChannelBuilder, ChannelSettings};
use crate::channel::channel_internal::unix_now;
use crate::component::*;
use crate::framing::{
    self, FragmentHeader, FramingMode, ProducerId, CONTINUE_LAST_PACKAGE, CONTINUE_NEXT_PACKAGE,
};
use crate::sdk::*;

const WAIT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------
// mock SDK
// ---------------------------------------------------------------------

struct SdkReceivers {
    channel_rx: mpsc::UnboundedReceiver<(ChannelId, ChannelStatus)>,
    link_rx: mpsc::UnboundedReceiver<(LinkId, LinkStatus)>,
    connection_rx: mpsc::UnboundedReceiver<(ConnectionId, ConnectionStatus)>,
    package_rx: mpsc::UnboundedReceiver<(SdkHandle, PackageStatus)>,
    receive_rx: mpsc::UnboundedReceiver<(Vec<u8>, Vec<ConnectionId>)>,
}

struct MockSdk {
    next_id: AtomicU64,
    channel_tx: mpsc::UnboundedSender<(ChannelId, ChannelStatus)>,
    link_tx: mpsc::UnboundedSender<(LinkId, LinkStatus)>,
    connection_tx: mpsc::UnboundedSender<(ConnectionId, ConnectionStatus)>,
    package_tx: mpsc::UnboundedSender<(SdkHandle, PackageStatus)>,
    receive_tx: mpsc::UnboundedSender<(Vec<u8>, Vec<ConnectionId>)>,
}

impl MockSdk {
    fn new() -> (Arc<Self>, SdkReceivers) {
        let (channel_tx, channel_rx) = mpsc::unbounded_channel();
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let (connection_tx, connection_rx) = mpsc::unbounded_channel();
        let (package_tx, package_rx) = mpsc::unbounded_channel();
        let (receive_tx, receive_rx) = mpsc::unbounded_channel();
        (
            Arc::new(MockSdk {
                next_id: AtomicU64::new(1),
                channel_tx,
                link_tx,
                connection_tx,
                package_tx,
                receive_tx,
            }),
            SdkReceivers {
                channel_rx,
                link_rx,
                connection_rx,
                package_rx,
                receive_rx,
            },
        )
    }
}

#[async_trait]
impl ChannelSdk for MockSdk {
    fn generate_link_id(&self, channel_id: &ChannelId) -> LinkId {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        LinkId::new(format!("{channel_id}/link-{n}"))
    }

    fn generate_connection_id(&self, link_id: &LinkId) -> ConnectionId {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        ConnectionId::new(format!("{link_id}/conn-{n}"))
    }

    async fn on_link_status_changed(
        &self,
        _handle: SdkHandle,
        link_id: LinkId,
        status: LinkStatus,
        _properties: LinkProperties,
    ) {
        let _ = self.link_tx.send((link_id, status));
    }

    async fn on_connection_status_changed(
        &self,
        _handle: SdkHandle,
        connection_id: ConnectionId,
        status: ConnectionStatus,
        _properties: LinkProperties,
    ) {
        let _ = self.connection_tx.send((connection_id, status));
    }

    async fn on_channel_status_changed(
        &self,
        _handle: SdkHandle,
        channel_id: ChannelId,
        status: ChannelStatus,
    ) {
        let _ = self.channel_tx.send((channel_id, status));
    }

    async fn on_package_status_changed(&self, handle: SdkHandle, status: PackageStatus) {
        let _ = self.package_tx.send((handle, status));
    }

    async fn receive_enc_pkg(
        &self,
        bytes: Vec<u8>,
        connection_ids: Vec<ConnectionId>,
        _timeout: Option<Timestamp>,
    ) {
        let _ = self.receive_tx.send((bytes, connection_ids));
    }

    async fn request_plugin_user_input(
        &self,
        _component_id: &str,
        _key: &str,
        _prompt: &str,
        _cache: bool,
    ) -> crate::error::Result<SdkHandle> {
        Ok(SdkHandle(0))
    }

    async fn request_common_user_input(
        &self,
        _component_id: &str,
        _key: &str,
    ) -> crate::error::Result<SdkHandle> {
        Ok(SdkHandle(0))
    }

    async fn display_info_to_user(
        &self,
        _data: &str,
        _display_type: UserDisplayType,
    ) -> crate::error::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------
// mock components
// ---------------------------------------------------------------------

struct MockTransport {
    sdk: Arc<dyn TransportSdk>,
    /// links the channel asked us to create, in order
    links: StdMutex<Vec<LinkId>>,
    /// payloads staged via enqueue_content
    enqueued_tx: mpsc::UnboundedSender<(Action, Vec<u8>)>,
    /// do_action invocations
    fired_tx: mpsc::UnboundedSender<(Vec<PackageFragmentHandle>, Action)>,
    /// report PACKAGE_SENT for every fragment handed to do_action
    auto_report: bool,
}

struct TransportTaps {
    enqueued_rx: mpsc::UnboundedReceiver<(Action, Vec<u8>)>,
    fired_rx: mpsc::UnboundedReceiver<(Vec<PackageFragmentHandle>, Action)>,
}

impl MockTransport {
    fn new(sdk: Arc<dyn TransportSdk>, auto_report: bool) -> (Arc<Self>, TransportTaps) {
        let (enqueued_tx, enqueued_rx) = mpsc::unbounded_channel();
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(MockTransport {
            sdk,
            links: StdMutex::new(Vec::new()),
            enqueued_tx,
            fired_tx,
            auto_report,
        });
        (
            transport,
            TransportTaps {
                enqueued_rx,
                fired_rx,
            },
        )
    }

    fn first_link(&self) -> Option<LinkId> {
        self.links.lock().unwrap().first().cloned()
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn transport_properties(&self) -> TransportProperties {
        TransportProperties::default()
    }

    fn link_properties(&self, _link_id: &LinkId) -> crate::error::Result<LinkProperties> {
        Ok(LinkProperties {
            link_address: "mock-address".into(),
            reliable: false,
            send_period: None,
        })
    }

    async fn activate_channel(
        &self,
        _handle: SdkHandle,
        _channel_id: ChannelId,
        _role_name: String,
    ) -> crate::error::Result<()> {
        self.sdk.update_state(ComponentState::Started).await;
        Ok(())
    }

    async fn create_link(&self, handle: SdkHandle, link_id: LinkId) -> crate::error::Result<()> {
        self.links.lock().unwrap().push(link_id.clone());
        self.sdk
            .on_link_status_changed(
                handle,
                link_id,
                LinkStatus::Created,
                LinkParameters::default(),
            )
            .await;
        Ok(())
    }

    async fn load_link_address(
        &self,
        handle: SdkHandle,
        link_id: LinkId,
        _link_address: String,
    ) -> crate::error::Result<()> {
        self.links.lock().unwrap().push(link_id.clone());
        self.sdk
            .on_link_status_changed(
                handle,
                link_id,
                LinkStatus::Loaded,
                LinkParameters::default(),
            )
            .await;
        Ok(())
    }

    async fn load_link_addresses(
        &self,
        _handle: SdkHandle,
        _link_id: LinkId,
        _link_addresses: Vec<String>,
    ) -> crate::error::Result<()> {
        Ok(())
    }

    async fn create_link_from_address(
        &self,
        handle: SdkHandle,
        link_id: LinkId,
        link_address: String,
    ) -> crate::error::Result<()> {
        self.load_link_address(handle, link_id, link_address).await
    }

    async fn destroy_link(&self, handle: SdkHandle, link_id: LinkId) -> crate::error::Result<()> {
        self.links.lock().unwrap().retain(|l| *l != link_id);
        self.sdk
            .on_link_status_changed(
                handle,
                link_id,
                LinkStatus::Destroyed,
                LinkParameters::default(),
            )
            .await;
        Ok(())
    }

    async fn get_action_params(
        &self,
        _action: &Action,
    ) -> crate::error::Result<Vec<EncodingParameters>> {
        let link_id = self.first_link().unwrap_or_else(|| LinkId::new("*"));
        Ok(vec![EncodingParameters {
            link_id,
            mime_type: "*/*".to_owned(),
            encode_package: true,
            config: serde_json::Value::Null,
        }])
    }

    async fn enqueue_content(
        &self,
        _params: &EncodingParameters,
        action: &Action,
        content: Vec<u8>,
    ) -> crate::error::Result<()> {
        let _ = self.enqueued_tx.send((action.clone(), content));
        Ok(())
    }

    async fn dequeue_content(&self, _action: &Action) -> crate::error::Result<()> {
        Ok(())
    }

    async fn do_action(
        &self,
        handles: &[PackageFragmentHandle],
        action: &Action,
    ) -> crate::error::Result<()> {
        let _ = self.fired_tx.send((handles.to_vec(), action.clone()));
        if self.auto_report {
            for handle in handles {
                self.sdk
                    .on_package_status_changed(*handle, PackageStatus::Sent)
                    .await;
            }
        }
        Ok(())
    }

    async fn fetch(&self, _link_ids: Vec<LinkId>) -> crate::error::Result<()> {
        Ok(())
    }

    async fn on_user_input_received(
        &self,
        _handle: SdkHandle,
        _answered: bool,
        _response: &str,
    ) -> crate::error::Result<()> {
        Ok(())
    }
}

struct MockUserModel {
    sdk: Arc<dyn UserModelSdk>,
    timeline: StdMutex<ActionTimeline>,
}

impl MockUserModel {
    fn new(sdk: Arc<dyn UserModelSdk>) -> Arc<Self> {
        Arc::new(MockUserModel {
            sdk,
            timeline: StdMutex::new(Vec::new()),
        })
    }

    /// Replaces the modelled timeline and pokes the channel to refresh.
    async fn publish_timeline(&self, actions: ActionTimeline) {
        *self.timeline.lock().unwrap() = actions;
        self.sdk.on_timeline_updated().await;
    }
}

#[async_trait]
impl UserModel for MockUserModel {
    fn user_model_properties(&self) -> UserModelProperties {
        UserModelProperties::default()
    }

    async fn activate_channel(
        &self,
        _handle: SdkHandle,
        _channel_id: ChannelId,
        _role_name: String,
    ) -> crate::error::Result<()> {
        self.sdk.update_state(ComponentState::Started).await;
        Ok(())
    }

    async fn add_link(
        &self,
        _link_id: LinkId,
        _params: LinkParameters,
    ) -> crate::error::Result<()> {
        Ok(())
    }

    async fn remove_link(&self, _link_id: LinkId) -> crate::error::Result<()> {
        Ok(())
    }

    async fn get_timeline(
        &self,
        start: Timestamp,
        end: Timestamp,
    ) -> crate::error::Result<ActionTimeline> {
        Ok(self
            .timeline
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.timestamp >= start && a.timestamp <= end)
            .cloned()
            .collect())
    }

    async fn on_transport_event(&self, _event: Event) -> crate::error::Result<()> {
        Ok(())
    }

    async fn on_send_package(
        &self,
        _link_id: LinkId,
        _package_len: usize,
    ) -> crate::error::Result<ActionTimeline> {
        Ok(Vec::new())
    }

    async fn on_user_input_received(
        &self,
        _handle: SdkHandle,
        _answered: bool,
        _response: &str,
    ) -> crate::error::Result<()> {
        Ok(())
    }
}

/// Identity encoding: carrier bytes are the payload bytes.
struct MockEncoding {
    sdk: Arc<dyn EncodingSdk>,
    mtu: u32,
}

#[async_trait]
impl Encoding for MockEncoding {
    fn encoding_properties(&self) -> EncodingProperties {
        EncodingProperties {
            encoding_time: 0.0,
            mime_type: "*/*".to_owned(),
        }
    }

    fn encoding_properties_for_parameters(
        &self,
        _params: &EncodingParameters,
    ) -> SpecificEncodingProperties {
        SpecificEncodingProperties {
            max_bytes: self.mtu,
        }
    }

    async fn encode_bytes(
        &self,
        handle: EncodingHandle,
        _params: EncodingParameters,
        bytes: Vec<u8>,
    ) -> crate::error::Result<()> {
        self.sdk
            .on_bytes_encoded(handle, bytes, EncodingStatus::Ok)
            .await;
        Ok(())
    }

    async fn decode_bytes(
        &self,
        handle: DecodingHandle,
        _params: EncodingParameters,
        bytes: Vec<u8>,
    ) -> crate::error::Result<()> {
        self.sdk
            .on_bytes_decoded(handle, bytes, EncodingStatus::Ok)
            .await;
        Ok(())
    }

    async fn on_user_input_received(
        &self,
        _handle: SdkHandle,
        _answered: bool,
        _response: &str,
    ) -> crate::error::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------
// harness
// ---------------------------------------------------------------------

struct Harness {
    channel: Channel,
    sdk: Arc<MockSdk>,
    receivers: SdkReceivers,
    transport: Arc<MockTransport>,
    taps: TransportTaps,
    user_model: Arc<MockUserModel>,
}

/// Builds, initializes, and activates a channel over the mock components,
/// waiting until it reports Available.
async fn activated_channel(settings: ChannelSettings, mtu: u32, auto_report: bool) -> Harness {
    let _ = env_logger::builder().is_test(true).try_init();

    let (sdk, mut receivers) = MockSdk::new();
    let transport_cell = Arc::new(StdMutex::new(None));
    let taps_cell = Arc::new(StdMutex::new(None));
    let model_cell = Arc::new(StdMutex::new(None));

    let channel = {
        let transport_cell = Arc::clone(&transport_cell);
        let taps_cell = Arc::clone(&taps_cell);
        let model_cell = Arc::clone(&model_cell);
        ChannelBuilder::new()
            .with_settings(settings)
            .with_transport(move |component_sdk, _| {
                let (transport, taps) = MockTransport::new(component_sdk.clone(), auto_report);
                *transport_cell.lock().unwrap() = Some(Arc::clone(&transport));
                *taps_cell.lock().unwrap() = Some(taps);
                tokio::spawn(async move {
                    component_sdk.update_state(ComponentState::Started).await;
                });
                let transport: Arc<dyn Transport> = transport;
                Ok(transport)
            })
            .with_user_model(move |component_sdk, _| {
                let model = MockUserModel::new(component_sdk.clone());
                *model_cell.lock().unwrap() = Some(Arc::clone(&model));
                tokio::spawn(async move {
                    component_sdk.update_state(ComponentState::Started).await;
                });
                let model: Arc<dyn UserModel> = model;
                Ok(model)
            })
            .with_encoding(move |component_sdk, _| {
                let encoding = Arc::new(MockEncoding {
                    sdk: component_sdk.clone(),
                    mtu,
                });
                tokio::spawn(async move {
                    component_sdk.update_state(ComponentState::Started).await;
                });
                let encoding: Arc<dyn Encoding> = encoding;
                Ok(encoding)
            })
            .build(sdk.clone())
            .expect("build channel")
    };

    channel.init(PluginConfig::default()).await.expect("init");

    // components report started asynchronously
    for _ in 0..50 {
        if channel.state().await == ChannelState::Unactivated {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(channel.state().await, ChannelState::Unactivated);

    channel
        .activate_channel(SdkHandle(1), "mock-channel".into(), "default".into())
        .await
        .expect("activate");

    let (channel_id, status) = timeout(WAIT, receivers.channel_rx.recv())
        .await
        .expect("channel status")
        .expect("channel status closed");
    assert_eq!(channel_id, "mock-channel");
    assert_eq!(status, ChannelStatus::Available);

    let transport = transport_cell.lock().unwrap().take().unwrap();
    let taps = taps_cell.lock().unwrap().take().unwrap();
    let user_model = model_cell.lock().unwrap().take().unwrap();

    Harness {
        channel,
        sdk,
        receivers,
        transport,
        taps,
        user_model,
    }
}

impl Harness {
    /// Creates one link and one connection on it.
    async fn link_and_connection(&mut self) -> (LinkId, ConnectionId) {
        let link_id = self
            .channel
            .create_link(SdkHandle(2))
            .await
            .expect("create_link");
        let (reported, status) = timeout(WAIT, self.receivers.link_rx.recv())
            .await
            .expect("link status")
            .expect("link status closed");
        assert_eq!(reported, link_id);
        assert_eq!(status, LinkStatus::Created);

        let connection_id = self
            .channel
            .open_connection(SdkHandle(3), link_id.clone(), None)
            .await
            .expect("open_connection");
        let (reported, status) = timeout(WAIT, self.receivers.connection_rx.recv())
            .await
            .expect("connection status")
            .expect("connection status closed");
        assert_eq!(reported, connection_id);
        assert_eq!(status, ConnectionStatus::Open);

        (link_id, connection_id)
    }

    async fn expect_package_status(&mut self) -> (SdkHandle, PackageStatus) {
        timeout(WAIT, self.receivers.package_rx.recv())
            .await
            .expect("package status")
            .expect("package status closed")
    }

    async fn expect_fire(&mut self) -> (Vec<PackageFragmentHandle>, Action) {
        timeout(WAIT, self.taps.fired_rx.recv())
            .await
            .expect("do_action")
            .expect("do_action closed")
    }

    async fn expect_payload(&mut self) -> Vec<u8> {
        timeout(WAIT, self.taps.enqueued_rx.recv())
            .await
            .expect("enqueue_content")
            .expect("enqueue_content closed")
            .1
    }
}

fn soon(offset: f64) -> Timestamp {
    unix_now() + offset
}

fn action_at(id: ActionId, timestamp: Timestamp) -> Action {
    Action {
        action_id: id,
        timestamp,
        config: serde_json::Value::Null,
    }
}

// ---------------------------------------------------------------------
// scenarios
// ---------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn test_single_one_package_one_fire() {
    let mut h = activated_channel(
        ChannelSettings {
            framing: FramingMode::Single,
            cover_traffic: false,
            ..ChannelSettings::default()
        },
        1000,
        true,
    )
    .await;
    let (_link_id, connection_id) = h.link_and_connection().await;

    h.user_model
        .publish_timeline(vec![action_at(1, soon(0.3))])
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let payload = Bytes::from_static(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
    h.channel
        .send_package(SdkHandle(40), connection_id, payload.clone(), None)
        .await
        .expect("send_package");

    // the transport sees the raw package bytes, unframed
    assert_eq!(h.expect_payload().await, payload.to_vec());
    let (handles, _action) = h.expect_fire().await;
    assert_eq!(handles.len(), 1);

    let (handle, status) = h.expect_package_status().await;
    assert_eq!(handle, SdkHandle(40));
    assert_eq!(status, PackageStatus::Sent);

    h.channel.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_batch_two_packages_one_fire() {
    let mut h = activated_channel(
        ChannelSettings {
            framing: FramingMode::Batch,
            cover_traffic: false,
            ..ChannelSettings::default()
        },
        1000,
        true,
    )
    .await;
    let (_link_id, connection_id) = h.link_and_connection().await;

    h.user_model
        .publish_timeline(vec![action_at(1, soon(0.4))])
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    h.channel
        .send_package(
            SdkHandle(41),
            connection_id.clone(),
            Bytes::from_static(&[0x31, 0x41, 0x59]),
            None,
        )
        .await
        .expect("send P1");
    h.channel
        .send_package(
            SdkHandle(42),
            connection_id,
            Bytes::from_static(&[0x26, 0x53]),
            None,
        )
        .await
        .expect("send P2");

    assert_eq!(
        h.expect_payload().await,
        vec![0x03, 0x00, 0x00, 0x00, 0x31, 0x41, 0x59, 0x02, 0x00, 0x00, 0x00, 0x26, 0x53]
    );

    let mut statuses = HashMap::new();
    for _ in 0..2 {
        let (handle, status) = h.expect_package_status().await;
        statuses.insert(handle, status);
    }
    assert_eq!(statuses.get(&SdkHandle(41)), Some(&PackageStatus::Sent));
    assert_eq!(statuses.get(&SdkHandle(42)), Some(&PackageStatus::Sent));

    h.channel.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_fragment_package_across_two_actions_and_back() {
    // mtu 21: header 5 + record prefix 4 leaves 12 content bytes per action
    let mut h = activated_channel(
        ChannelSettings {
            framing: FramingMode::FragmentSingleProducer,
            cover_traffic: false,
            ..ChannelSettings::default()
        },
        21,
        true,
    )
    .await;
    let (link_id, connection_id) = h.link_and_connection().await;

    h.user_model
        .publish_timeline(vec![action_at(1, soon(0.3)), action_at(2, soon(0.5))])
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let package: Vec<u8> = (0u8..18).collect();
    h.channel
        .send_package(
            SdkHandle(43),
            connection_id.clone(),
            Bytes::from(package.clone()),
            None,
        )
        .await
        .expect("send_package");

    let first = h.expect_payload().await;
    let second = h.expect_payload().await;

    // first frame: 12 bytes, to be continued
    let mut buf = Bytes::from(first.clone());
    let header = FragmentHeader::unmarshal(FramingMode::FragmentSingleProducer, &mut buf).unwrap();
    assert_eq!(header.fragment_id, 1);
    assert_eq!(header.flags, CONTINUE_NEXT_PACKAGE);
    let records = framing::read_records(buf).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(&records[0][..], &package[..12]);

    // second frame: remaining 6 bytes, continuing the last
    let mut buf = Bytes::from(second.clone());
    let header = FragmentHeader::unmarshal(FramingMode::FragmentSingleProducer, &mut buf).unwrap();
    assert_eq!(header.fragment_id, 2);
    assert_eq!(header.flags, CONTINUE_LAST_PACKAGE);
    let records = framing::read_records(buf).unwrap();
    assert_eq!(&records[0][..], &package[12..]);

    let (handle, status) = h.expect_package_status().await;
    assert_eq!(handle, SdkHandle(43));
    assert_eq!(status, PackageStatus::Sent);

    // loop the two frames back through the receive pipeline
    let params = EncodingParameters::default();
    h.transport
        .sdk
        .on_receive(link_id.clone(), params.clone(), first)
        .await;
    h.transport.sdk.on_receive(link_id, params, second).await;

    let (received, connections) = timeout(WAIT, h.receivers.receive_rx.recv())
        .await
        .expect("receive_enc_pkg")
        .expect("receive closed");
    assert_eq!(received, package);
    assert_eq!(connections.len(), 1);

    h.channel.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_action_withdrawn_rebinds_fragments() {
    // mtu 49: 40 content bytes per action
    let mut h = activated_channel(
        ChannelSettings {
            framing: FramingMode::FragmentSingleProducer,
            cover_traffic: false,
            ..ChannelSettings::default()
        },
        49,
        true,
    )
    .await;
    let (_link_id, connection_id) = h.link_and_connection().await;

    h.user_model
        .publish_timeline(vec![
            action_at(1, soon(0.6)),
            action_at(2, soon(0.8)),
            action_at(3, soon(1.0)),
        ])
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let package = vec![0xAA_u8; 100];
    h.channel
        .send_package(
            SdkHandle(44),
            connection_id,
            Bytes::from(package.clone()),
            None,
        )
        .await
        .expect("send_package");

    // the model withdraws action 2; its fragment must rebind to 3 and 4
    h.user_model
        .publish_timeline(vec![
            action_at(1, soon(0.6)),
            action_at(3, soon(1.0)),
            action_at(4, soon(1.2)),
        ])
        .await;

    let mut content = Vec::new();
    while content.len() < 100 {
        let frame = h.expect_payload().await;
        let mut buf = Bytes::from(frame);
        let _ =
            FragmentHeader::unmarshal(FramingMode::FragmentSingleProducer, &mut buf).unwrap();
        for record in framing::read_records(buf).unwrap() {
            content.extend_from_slice(&record);
        }
    }
    assert_eq!(content, package);

    let (handle, status) = h.expect_package_status().await;
    assert_eq!(handle, SdkHandle(44));
    assert_eq!(status, PackageStatus::Sent);

    h.channel.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_link_destroyed_mid_send_fails_package_once() {
    let mut h = activated_channel(
        ChannelSettings {
            framing: FramingMode::Single,
            cover_traffic: false,
            ..ChannelSettings::default()
        },
        1000,
        true,
    )
    .await;
    let (link_id, connection_id) = h.link_and_connection().await;

    h.user_model
        .publish_timeline(vec![action_at(1, soon(3.0))])
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    h.channel
        .send_package(
            SdkHandle(45),
            connection_id.clone(),
            Bytes::from_static(&[0xEE; 4]),
            None,
        )
        .await
        .expect("send_package");

    // the transport loses the pathway before the action fires
    h.transport
        .sdk
        .on_link_status_changed(
            SdkHandle(9),
            link_id.clone(),
            LinkStatus::Destroyed,
            LinkParameters::default(),
        )
        .await;

    let (handle, status) = h.expect_package_status().await;
    assert_eq!(handle, SdkHandle(45));
    assert_eq!(status, PackageStatus::FailedGeneric);

    let (closed_conn, status) = timeout(WAIT, h.receivers.connection_rx.recv())
        .await
        .expect("connection status")
        .expect("closed");
    assert_eq!(closed_conn, connection_id);
    assert_eq!(status, ConnectionStatus::Closed);

    // exactly once: nothing further arrives for this package
    assert!(
        timeout(Duration::from_millis(300), h.receivers.package_rx.recv())
            .await
            .is_err()
    );

    h.channel.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_multi_producer_interleaved_reassembly() {
    let mut h = activated_channel(
        ChannelSettings {
            framing: FramingMode::FragmentMultipleProducer,
            cover_traffic: false,
            ..ChannelSettings::default()
        },
        1000,
        true,
    )
    .await;
    let (link_id, _connection_id) = h.link_and_connection().await;

    let producer1 = ProducerId([
        0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1,
    ]);
    let producer2 = ProducerId([
        0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2,
    ]);

    let frame = |producer: ProducerId, id: u32, flags: u8, content: &[u8]| {
        let mut buf = BytesMut::new();
        FragmentHeader {
            producer_id: producer,
            fragment_id: id,
            flags,
        }
        .marshal_to(FramingMode::FragmentMultipleProducer, &mut buf);
        framing::put_record(&mut buf, content);
        buf.to_vec()
    };

    let params = EncodingParameters::default();
    // interleaved delivery: P1 head, P2 head, P1 tail, P2 tail
    for frame_bytes in [
        frame(producer1, 1, CONTINUE_NEXT_PACKAGE, b"from-one "),
        frame(producer2, 1, CONTINUE_NEXT_PACKAGE, b"from-two "),
        frame(producer1, 2, CONTINUE_LAST_PACKAGE, b"first"),
        frame(producer2, 2, CONTINUE_LAST_PACKAGE, b"second"),
    ] {
        h.transport
            .sdk
            .on_receive(link_id.clone(), params.clone(), frame_bytes)
            .await;
    }

    let mut received = Vec::new();
    for _ in 0..2 {
        let (bytes, _) = timeout(WAIT, h.receivers.receive_rx.recv())
            .await
            .expect("receive")
            .expect("receive closed");
        received.push(bytes);
    }
    received.sort();
    assert_eq!(received[0], b"from-one first".to_vec());
    assert_eq!(received[1], b"from-two second".to_vec());

    h.channel.close().await;
}

// ---------------------------------------------------------------------
// ordering, gating, timeouts, shutdown
// ---------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_sends_keep_queue_order() {
    let mut h = activated_channel(
        ChannelSettings {
            framing: FramingMode::Batch,
            cover_traffic: false,
            ..ChannelSettings::default()
        },
        1000,
        true,
    )
    .await;
    let (_link_id, connection_id) = h.link_and_connection().await;

    h.user_model
        .publish_timeline(vec![action_at(1, soon(0.5))])
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let send_a = h.channel.send_package(
        SdkHandle(50),
        connection_id.clone(),
        Bytes::from_static(b"alpha"),
        None,
    );
    let send_b = h.channel.send_package(
        SdkHandle(51),
        connection_id.clone(),
        Bytes::from_static(b"bravo"),
        None,
    );
    let (ra, rb) = tokio::join!(send_a, send_b);
    ra.expect("send a");
    rb.expect("send b");

    // whichever order the sends landed in, the batch preserves it
    let payload = Bytes::from(h.expect_payload().await);
    let records = framing::read_records(payload).unwrap();
    assert_eq!(records.len(), 2);
    let texts: Vec<&[u8]> = records.iter().map(|r| &r[..]).collect();
    assert!(
        texts == vec![b"alpha".as_slice(), b"bravo".as_slice()]
            || texts == vec![b"bravo".as_slice(), b"alpha".as_slice()]
    );

    for _ in 0..2 {
        let (_, status) = h.expect_package_status().await;
        assert_eq!(status, PackageStatus::Sent);
    }

    h.channel.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_send_rejected_outside_activated() {
    let (sdk, _receivers) = MockSdk::new();
    let channel = ChannelBuilder::new()
        .with_transport(|component_sdk, _| {
            let transport: Arc<dyn Transport> = MockTransport::new(component_sdk, false).0;
            Ok(transport)
        })
        .with_user_model(|component_sdk, _| {
            let model: Arc<dyn UserModel> = MockUserModel::new(component_sdk);
            Ok(model)
        })
        .with_encoding(|component_sdk, _| {
            let encoding: Arc<dyn Encoding> = Arc::new(MockEncoding {
                sdk: component_sdk,
                mtu: 100,
            });
            Ok(encoding)
        })
        .build(sdk)
        .expect("build");

    // not even initialized
    let err = channel
        .send_package(
            SdkHandle(1),
            "conn".into(),
            Bytes::from_static(b"x"),
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err, crate::Error::ErrNotReady);

    let err = channel
        .open_connection(SdkHandle(1), "link".into(), None)
        .await
        .unwrap_err();
    assert_eq!(err, crate::Error::ErrNotReady);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_send_with_no_timeline_is_retryable_error() {
    let mut h = activated_channel(
        ChannelSettings {
            framing: FramingMode::Batch,
            cover_traffic: false,
            ..ChannelSettings::default()
        },
        1000,
        true,
    )
    .await;
    let (_link_id, connection_id) = h.link_and_connection().await;

    let err = h
        .channel
        .send_package(
            SdkHandle(60),
            connection_id,
            Bytes::from_static(b"nowhere to go"),
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err, crate::Error::ErrNoUsableAction);

    h.channel.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_package_deadline_times_out() {
    let mut h = activated_channel(
        ChannelSettings {
            framing: FramingMode::Batch,
            cover_traffic: false,
            ..ChannelSettings::default()
        },
        1000,
        true,
    )
    .await;
    let (_link_id, connection_id) = h.link_and_connection().await;

    // the only action is far in the future; the deadline hits first
    h.user_model
        .publish_timeline(vec![action_at(1, soon(30.0))])
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    h.channel
        .send_package(
            SdkHandle(61),
            connection_id,
            Bytes::from_static(b"doomed"),
            Some(soon(0.2)),
        )
        .await
        .expect("send_package");

    let (handle, status) = h.expect_package_status().await;
    assert_eq!(handle, SdkHandle(61));
    assert_eq!(status, PackageStatus::FailedTimeout);

    h.channel.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_mid_action_sends_nothing() {
    let mut h = activated_channel(
        ChannelSettings {
            framing: FramingMode::Single,
            cover_traffic: false,
            ..ChannelSettings::default()
        },
        1000,
        true,
    )
    .await;
    let (_link_id, connection_id) = h.link_and_connection().await;

    h.user_model
        .publish_timeline(vec![action_at(1, soon(30.0))])
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    h.channel
        .send_package(
            SdkHandle(62),
            connection_id,
            Bytes::from_static(b"never leaves"),
            None,
        )
        .await
        .expect("send_package");

    h.channel.close().await;
    assert_eq!(h.channel.state().await, ChannelState::Deactivated);

    // the action never fired, so no Sent may have been reported
    while let Ok(Some((_, status))) =
        timeout(Duration::from_millis(200), h.receivers.package_rx.recv()).await
    {
        assert_ne!(status, PackageStatus::Sent);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_component_failure_quarantines_channel() {
    let mut h = activated_channel(
        ChannelSettings {
            framing: FramingMode::Single,
            cover_traffic: false,
            ..ChannelSettings::default()
        },
        1000,
        true,
    )
    .await;
    let (_link_id, connection_id) = h.link_and_connection().await;

    h.transport
        .sdk
        .update_state(ComponentState::Failed)
        .await;

    let (_, status) = timeout(WAIT, h.receivers.channel_rx.recv())
        .await
        .expect("channel status")
        .expect("closed");
    assert_eq!(status, ChannelStatus::Failed);
    assert_eq!(h.channel.state().await, ChannelState::Failed);

    let err = h
        .channel
        .send_package(
            SdkHandle(70),
            connection_id,
            Bytes::from_static(b"x"),
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err, crate::Error::ErrChannelFailed);

    h.channel.close().await;
}
