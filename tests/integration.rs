//! Integration tests for the ETSI 004 wire protocol.
//!
//! These tests drive whole frames through the async reader, the way a
//! socket peer sees them.

use bytes::Bytes;

use qkd_etsi_api::etsi004::{Ksid, Qos, StreamStatus};
use qkd_etsi_api::protocol::{
    build_frame, read_frame, read_frame_opt, write_frame, CloseRequest, Frame, GetKeyRequest,
    GetKeyResponse, Header, Message, OpenConnectRequest, OpenConnectResponse, ServiceType,
    DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE,
};
use qkd_etsi_api::WireError;

/// Payloads of 0, 1 and several KB survive the reader intact.
#[tokio::test]
async fn test_frame_sizes() {
    for len in [0usize, 1, 4096, 3 * 4096 + 17] {
        let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let header = Header::new(ServiceType::GetKeyResponse, len as u32);
        let bytes = build_frame(&header, &payload);
        assert_eq!(bytes.len(), HEADER_SIZE + len);

        let mut reader = bytes.as_slice();
        let frame = read_frame(&mut reader, DEFAULT_MAX_PAYLOAD_SIZE).await.unwrap();
        assert_eq!(frame.header, header);
        assert_eq!(frame.payload(), payload.as_slice());
        assert!(reader.is_empty());
    }
}

/// Several frames back to back on one stream.
#[tokio::test]
async fn test_multiple_frames_sequence() {
    let ksid = Ksid::generate();
    let mut all_bytes = Vec::new();
    for index in 0u32..5 {
        let request = GetKeyRequest {
            ksid,
            index,
            metadata_capacity: 64,
        };
        all_bytes.extend(request.to_frame().to_bytes());
    }
    all_bytes.extend(CloseRequest { ksid }.to_frame().to_bytes());

    let mut reader = all_bytes.as_slice();
    for index in 0u32..5 {
        let frame = read_frame(&mut reader, DEFAULT_MAX_PAYLOAD_SIZE).await.unwrap();
        let request = GetKeyRequest::from_frame(&frame).unwrap();
        assert_eq!(request.index, index);
        assert_eq!(request.ksid, ksid);
    }
    let frame = read_frame(&mut reader, DEFAULT_MAX_PAYLOAD_SIZE).await.unwrap();
    assert_eq!(CloseRequest::from_frame(&frame).unwrap().ksid, ksid);

    // Clean end of stream.
    assert!(read_frame_opt(&mut reader, DEFAULT_MAX_PAYLOAD_SIZE)
        .await
        .unwrap()
        .is_none());
}

/// Open exchange through a duplex pipe.
#[tokio::test]
async fn test_open_exchange_over_duplex() {
    let (mut client, mut node) = tokio::io::duplex(1024);
    let qos = Qos::default();

    let request = OpenConnectRequest {
        source: "app://alice".to_string(),
        destination: "server://node".to_string(),
        qos: qos.clone(),
        ksid: Ksid::NIL,
    };
    write_frame(&mut client, &request.to_frame()).await.unwrap();

    let frame = read_frame(&mut node, DEFAULT_MAX_PAYLOAD_SIZE).await.unwrap();
    assert_eq!(frame.service_type().unwrap(), ServiceType::OpenConnectRequest);
    let received = OpenConnectRequest::from_frame(&frame).unwrap();
    assert_eq!(received, request);

    let ksid = Ksid::generate();
    let response = OpenConnectResponse {
        status: StreamStatus::PeerDisconnected.code(),
        granted: Some((qos, ksid)),
    };
    write_frame(&mut node, &response.to_frame()).await.unwrap();

    let frame = read_frame(&mut client, DEFAULT_MAX_PAYLOAD_SIZE).await.unwrap();
    assert_eq!(OpenConnectResponse::from_frame(&frame).unwrap(), response);
}

/// A failed GET_KEY carries only its status.
#[test]
fn test_get_key_failure_is_status_only() {
    let frame = GetKeyResponse::failure(StreamStatus::InsufficientKey).to_frame();
    assert_eq!(frame.payload_len(), 4);
    assert_eq!(frame.payload(), &[0, 0, 0, 2]);

    let decoded = GetKeyResponse::from_frame(&frame).unwrap();
    assert_eq!(decoded.status, StreamStatus::InsufficientKey.code());
    assert!(decoded.key.is_empty());
}

/// Decoding a frame of the wrong kind fails without touching the payload.
#[test]
fn test_wrong_service_type() {
    let frame = Frame::with_payload(ServiceType::CloseResponse, Bytes::from_static(&[0; 4]));
    assert!(matches!(
        CloseRequest::from_frame(&frame),
        Err(WireError::UnexpectedServiceType {
            expected: 0x08,
            actual: 0x09
        })
    ));
}

#[tokio::test]
async fn test_oversized_and_unknown_frames() {
    let header = Header::new(ServiceType::GetKeyResponse, 1024);
    let bytes = build_frame(&header, &[0; 1024]);
    let err = read_frame(&mut bytes.as_slice(), 512).await.unwrap_err();
    assert!(matches!(
        err,
        WireError::PayloadTooLarge {
            size: 1024,
            max: 512
        }
    ));

    let bytes = [1, 0, 1, 0x7f, 0, 0, 0, 0];
    let err = read_frame(&mut bytes.as_slice(), DEFAULT_MAX_PAYLOAD_SIZE)
        .await
        .unwrap_err();
    assert!(matches!(err, WireError::UnknownServiceType(0x7f)));
}
