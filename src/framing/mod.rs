#[cfg(test)]
mod framing_test;

pub mod framing_mode;

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use rand::Rng;

pub use framing_mode::FramingMode;

use crate::error::{Error, Result};

/// The first record of this fragment is the tail of the package whose head
/// rode in the previous fragment.
pub const CONTINUE_LAST_PACKAGE: u8 = 0x01;

/// The last record of this fragment is a package head; its tail rides in the
/// next fragment.
pub const CONTINUE_NEXT_PACKAGE: u8 = 0x02;

pub const PRODUCER_ID_LEN: usize = 16;

const FRAGMENT_ID_LEN: usize = 4;
const FLAGS_LEN: usize = 1;
const RECORD_PREFIX_LEN: usize = 4;

/// Random identity of one fragment producer, carried on the wire in
/// multiple-producer framing so receivers can keep one reassembly scratch
/// per sender.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ProducerId(pub [u8; PRODUCER_ID_LEN]);

impl ProducerId {
    pub fn generate() -> Self {
        ProducerId(rand::rng().random())
    }

    /// The reserved id under which single-producer reassembly is tracked.
    pub fn zero() -> Self {
        ProducerId([0u8; PRODUCER_ID_LEN])
    }
}

impl fmt::Display for ProducerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Header leading every fragment-framed buffer. Layout, little-endian:
/// `[producer_id: 16]` (multiple-producer mode only), `fragment_id: u32`,
/// `flags: u8`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FragmentHeader {
    pub producer_id: ProducerId,
    pub fragment_id: u32,
    pub flags: u8,
}

impl FragmentHeader {
    pub fn continues_last(&self) -> bool {
        self.flags & CONTINUE_LAST_PACKAGE != 0
    }

    pub fn continues_next(&self) -> bool {
        self.flags & CONTINUE_NEXT_PACKAGE != 0
    }

    pub fn marshal_to(&self, mode: FramingMode, buf: &mut BytesMut) {
        if mode == FramingMode::FragmentMultipleProducer {
            buf.put_slice(&self.producer_id.0);
        }
        buf.put_u32_le(self.fragment_id);
        buf.put_u8(self.flags);
    }

    pub fn unmarshal(mode: FramingMode, buf: &mut Bytes) -> Result<Self> {
        if buf.remaining() < header_len(mode) {
            return Err(Error::ErrShortBuffer);
        }

        let mut producer_id = ProducerId::zero();
        if mode == FramingMode::FragmentMultipleProducer {
            buf.copy_to_slice(&mut producer_id.0);
        }
        let fragment_id = buf.get_u32_le();
        let flags = buf.get_u8();

        Ok(FragmentHeader {
            producer_id,
            fragment_id,
            flags,
        })
    }
}

/// Bytes a fragment header occupies in the given mode. Zero for modes with
/// no header.
pub fn header_len(mode: FramingMode) -> usize {
    match mode {
        FramingMode::Single | FramingMode::Batch => 0,
        FramingMode::FragmentSingleProducer => FRAGMENT_ID_LEN + FLAGS_LEN,
        FramingMode::FragmentMultipleProducer => PRODUCER_ID_LEN + FRAGMENT_ID_LEN + FLAGS_LEN,
    }
}

/// Bytes of prefix each record costs on top of its content.
pub fn record_overhead(mode: FramingMode) -> usize {
    match mode {
        FramingMode::Single => 0,
        _ => RECORD_PREFIX_LEN,
    }
}

/// Appends one length-prefixed record.
pub fn put_record(buf: &mut BytesMut, content: &[u8]) {
    buf.put_u32_le(content.len() as u32);
    buf.put_slice(content);
}

/// Walks length-prefixed records until the buffer is consumed. A record
/// whose declared length overruns the buffer fails the whole walk; a partial
/// record never reaches the caller.
pub fn read_records(mut buf: Bytes) -> Result<Vec<Bytes>> {
    let mut records = Vec::new();
    while buf.has_remaining() {
        if buf.remaining() < RECORD_PREFIX_LEN {
            return Err(Error::ErrMalformedRecord);
        }
        let len = buf.get_u32_le() as usize;
        if buf.remaining() < len {
            return Err(Error::ErrMalformedRecord);
        }
        records.push(buf.split_to(len));
    }
    Ok(records)
}
