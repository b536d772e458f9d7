use bytes::Bytes;

use crate::channel::channel_internal::ChannelInternal;
use crate::channel::channel_state::ChannelState;
use crate::channel::events::SdkEvent;
use crate::component::{DecodingHandle, EncodingParameters, EncodingStatus, LinkId};
use crate::framing::{self, FragmentHeader, FramingMode};

/// Per-producer reassembly scratch. Holds at most one partial package: the
/// tail of the last fragment that promised a continuation.
#[derive(Debug, Default)]
pub(crate) struct FragmentAssembler {
    expected_next: u32,
    pending: Option<Vec<u8>>,
}

impl FragmentAssembler {
    /// Feeds one fragment frame through the scratch and returns the
    /// packages it completed, in order.
    ///
    /// A pending tail survives only when the arriving fragment is the exact
    /// successor (`fragment_id == expected_next`) *and* claims to continue
    /// it; anything else discards the scratch and delivers only the whole
    /// records the new fragment carries.
    pub(crate) fn push(&mut self, header: &FragmentHeader, mut records: Vec<Bytes>) -> Vec<Vec<u8>> {
        let mut delivered = Vec::new();
        let in_sequence = self.pending.is_some() && header.fragment_id == self.expected_next;

        if header.continues_last() {
            if in_sequence && !records.is_empty() {
                let mut package = self.pending.take().unwrap_or_default();
                package.extend_from_slice(&records.remove(0));
                if records.is_empty() && header.continues_next() {
                    // the whole frame is one middle slice; still incomplete
                    self.pending = Some(package);
                    self.expected_next = header.fragment_id.wrapping_add(1);
                    return delivered;
                }
                delivered.push(package);
            } else {
                // predecessor never seen (or empty frame): the leading
                // record is a tail of something we cannot finish
                log::debug!(
                    "fragment {} continues a package we do not have, dropping its head record",
                    header.fragment_id
                );
                self.pending = None;
                if !records.is_empty() {
                    records.remove(0);
                }
            }
        } else if self.pending.is_some() {
            log::debug!(
                "fragment {} does not continue pending package, discarding scratch",
                header.fragment_id
            );
            self.pending = None;
        }

        if header.continues_next() && !records.is_empty() {
            let tail = records.pop().unwrap_or_default();
            self.pending = Some(tail.to_vec());
            self.expected_next = header.fragment_id.wrapping_add(1);
        }

        for record in records {
            delivered.push(record.to_vec());
        }
        delivered
    }
}

impl ChannelInternal {
    /// Inbound carrier bytes from the transport: pick the matching
    /// encoding, remember the handle-to-link mapping, and request a decode.
    pub(crate) async fn handle_receive(
        &self,
        link_id: LinkId,
        params: EncodingParameters,
        bytes: Vec<u8>,
    ) {
        let encoding = match self.encoding_for_params(&params) {
            Ok(encoding) => encoding,
            Err(err) => {
                log::warn!("no encoding to decode receipt on {link_id}: {err}");
                return;
            }
        };

        let handle = {
            let mut core = self.core.lock().await;
            if !matches!(
                core.state,
                ChannelState::Activated | ChannelState::Deactivating
            ) {
                log::debug!("dropping receipt on {link_id} while {}", core.state);
                return;
            }
            if !core.links.contains(&link_id) {
                log::debug!("dropping receipt on unknown link {link_id}");
                return;
            }
            let handle = core.take_decoding_handle();
            core.pending_decodings.insert(handle, link_id.clone());
            handle
        };

        if let Err(err) = encoding.decode_bytes(handle, params, bytes).await {
            log::warn!("decode request on {link_id} failed to issue: {err}");
            let mut core = self.core.lock().await;
            core.pending_decodings.remove(&handle);
        }
    }

    /// Decode completion: unpack per the framing mode and deliver each
    /// reassembled package to every connection open on the link.
    pub(crate) async fn handle_bytes_decoded(
        &self,
        handle: DecodingHandle,
        bytes: Vec<u8>,
        status: EncodingStatus,
    ) {
        let mut core = self.core.lock().await;
        let Some(link_id) = core.pending_decodings.remove(&handle) else {
            log::debug!("discarding orphaned decode completion {handle}");
            return;
        };
        if status != EncodingStatus::Ok {
            log::warn!("decode failed on {link_id}, dropping buffer");
            return;
        }
        let connection_ids = core.links.connections_on(&link_id);

        let mut packages: Vec<Vec<u8>> = Vec::new();
        match self.settings.framing {
            FramingMode::Single => {
                packages.push(bytes);
            }
            FramingMode::Batch => match framing::read_records(Bytes::from(bytes)) {
                Ok(records) => {
                    packages.extend(records.into_iter().map(|r| r.to_vec()));
                }
                Err(err) => {
                    log::warn!("malformed batch on {link_id}: {err}");
                }
            },
            mode @ (FramingMode::FragmentSingleProducer
            | FramingMode::FragmentMultipleProducer) => {
                let mut buf = Bytes::from(bytes);
                let header = match FragmentHeader::unmarshal(mode, &mut buf) {
                    Ok(header) => header,
                    Err(err) => {
                        log::warn!("malformed fragment header on {link_id}: {err}");
                        return;
                    }
                };
                let records = match framing::read_records(buf) {
                    Ok(records) => records,
                    Err(err) => {
                        log::warn!("malformed fragment records on {link_id}: {err}");
                        return;
                    }
                };
                let assembler = core.assemblers.entry(header.producer_id).or_default();
                packages = assembler.push(&header, records);
            }
        }

        for package in packages {
            self.events.push(SdkEvent::ReceivePackage {
                bytes: package,
                connection_ids: connection_ids.clone(),
                timeout: None,
            });
        }
    }
}
