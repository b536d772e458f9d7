use bytes::{Bytes, BytesMut};

use super::*;

#[test]
fn test_fragment_header_roundtrip_single_producer() {
    let header = FragmentHeader {
        producer_id: ProducerId::zero(),
        fragment_id: 7,
        flags: CONTINUE_NEXT_PACKAGE,
    };

    let mut buf = BytesMut::new();
    header.marshal_to(FramingMode::FragmentSingleProducer, &mut buf);
    assert_eq!(buf.len(), header_len(FramingMode::FragmentSingleProducer));
    assert_eq!(&buf[..], &[0x07, 0x00, 0x00, 0x00, CONTINUE_NEXT_PACKAGE]);

    let mut bytes = buf.freeze();
    let parsed = FragmentHeader::unmarshal(FramingMode::FragmentSingleProducer, &mut bytes)
        .expect("unmarshal");
    assert_eq!(parsed, header);
    assert!(!bytes.has_remaining());
}

#[test]
fn test_fragment_header_roundtrip_multiple_producer() {
    let producer_id = ProducerId([
        1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16,
    ]);
    let header = FragmentHeader {
        producer_id,
        fragment_id: 0x0102_0304,
        flags: CONTINUE_LAST_PACKAGE | CONTINUE_NEXT_PACKAGE,
    };

    let mut buf = BytesMut::new();
    header.marshal_to(FramingMode::FragmentMultipleProducer, &mut buf);
    assert_eq!(buf.len(), header_len(FramingMode::FragmentMultipleProducer));
    // producer id first, then little-endian fragment id, then flags
    assert_eq!(&buf[..PRODUCER_ID_LEN], &producer_id.0);
    assert_eq!(&buf[PRODUCER_ID_LEN..PRODUCER_ID_LEN + 4], &[0x04, 0x03, 0x02, 0x01]);

    let mut bytes = buf.freeze();
    let parsed = FragmentHeader::unmarshal(FramingMode::FragmentMultipleProducer, &mut bytes)
        .expect("unmarshal");
    assert_eq!(parsed, header);
    assert!(parsed.continues_last());
    assert!(parsed.continues_next());
}

#[test]
fn test_fragment_header_short_buffer() {
    let mut bytes = Bytes::from_static(&[0x01, 0x00]);
    let result = FragmentHeader::unmarshal(FramingMode::FragmentSingleProducer, &mut bytes);
    assert_eq!(result.unwrap_err(), Error::ErrShortBuffer);

    // a single-producer header is too short for multiple-producer framing
    let mut bytes = Bytes::from_static(&[0x01, 0x00, 0x00, 0x00, 0x00]);
    let result = FragmentHeader::unmarshal(FramingMode::FragmentMultipleProducer, &mut bytes);
    assert_eq!(result.unwrap_err(), Error::ErrShortBuffer);
}

#[test]
fn test_read_records_walks_in_order() {
    let mut buf = BytesMut::new();
    put_record(&mut buf, &[0x31, 0x41, 0x59]);
    put_record(&mut buf, &[0x26, 0x53]);
    put_record(&mut buf, &[]);

    assert_eq!(
        &buf[..],
        &[
            0x03, 0x00, 0x00, 0x00, 0x31, 0x41, 0x59, //
            0x02, 0x00, 0x00, 0x00, 0x26, 0x53, //
            0x00, 0x00, 0x00, 0x00,
        ]
    );

    let records = read_records(buf.freeze()).expect("read_records");
    assert_eq!(records.len(), 3);
    assert_eq!(&records[0][..], &[0x31, 0x41, 0x59]);
    assert_eq!(&records[1][..], &[0x26, 0x53]);
    assert!(records[2].is_empty());
}

#[test]
fn test_read_records_empty_buffer() {
    let records = read_records(Bytes::new()).expect("read_records");
    assert!(records.is_empty());
}

#[test]
fn test_read_records_truncated_prefix() {
    let result = read_records(Bytes::from_static(&[0x01, 0x00]));
    assert_eq!(result.unwrap_err(), Error::ErrMalformedRecord);
}

#[test]
fn test_read_records_overrunning_length() {
    let result = read_records(Bytes::from_static(&[0x05, 0x00, 0x00, 0x00, 0xAA]));
    assert_eq!(result.unwrap_err(), Error::ErrMalformedRecord);
}

#[test]
fn test_producer_id_generate_distinct() {
    let a = ProducerId::generate();
    let b = ProducerId::generate();
    assert_ne!(a, ProducerId::zero());
    assert_ne!(a, b);
    assert_eq!(a.to_string().len(), PRODUCER_ID_LEN * 2);
}
