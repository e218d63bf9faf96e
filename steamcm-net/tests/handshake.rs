use std::time::Duration;

use steamcm_net::transport::FramedTransport;
use steamcm_proto::header::LegacyHeader;
use steamcm_proto::{message_id, packet};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

fn encrypt_request_frame() -> Vec<u8> {
    let mut body = Vec::new();
    body.extend(1u32.to_le_bytes());
    body.extend(1u32.to_le_bytes());
    body.extend([0u8; 16]);
    packet::encode_legacy(LegacyHeader::new(message_id::CHANNEL_ENCRYPT_REQUEST), &body)
}

fn encrypt_result_frame(code: u32) -> Vec<u8> {
    packet::encode_legacy(LegacyHeader::new(message_id::CHANNEL_ENCRYPT_RESULT), &code.to_le_bytes())
}

async fn write_plain_frame(stream: &mut TcpStream, payload: &[u8]) {
    stream.write_all(&(payload.len() as u32).to_le_bytes()).await.unwrap();
    stream.write_all(b"VT01").await.unwrap();
    stream.write_all(payload).await.unwrap();
}

async fn read_plain_frame(stream: &mut TcpStream) -> Vec<u8> {
    let mut len_bytes = [0u8; 4];
    stream.read_exact(&mut len_bytes).await.unwrap();
    let len = u32::from_le_bytes(len_bytes) as usize;
    let mut magic = [0u8; 4];
    stream.read_exact(&mut magic).await.unwrap();
    assert_eq!(&magic, b"VT01");
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await.unwrap();
    payload
}

#[tokio::test]
async fn happy_path_handshake_installs_cipher() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        write_plain_frame(&mut stream, &encrypt_request_frame()).await;

        let response_frame = read_plain_frame(&mut stream).await;
        let response = packet::parse(&response_frame).unwrap();
        let key_size = u32::from_le_bytes(response.body[4..8].try_into().unwrap());
        let key = &response.body[8..8 + key_size as usize];
        assert_eq!(key_size, 128);
        assert_eq!(key.len(), 128);

        write_plain_frame(&mut stream, &encrypt_result_frame(1)).await;
    });

    let mut transport = FramedTransport::connect(&addr.to_string()).await.unwrap();
    let handshake = steamcm_net::handshake::run(&mut transport, Duration::from_secs(5)).await.unwrap();

    assert!(transport.is_encrypted());
    assert_eq!(handshake.aes_key.len(), 16);
    assert_eq!(handshake.hmac_secret.len(), 16);

    server.await.unwrap();
}

#[tokio::test]
async fn rejected_handshake_surfaces_result_code() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        write_plain_frame(&mut stream, &encrypt_request_frame()).await;
        let _ = read_plain_frame(&mut stream).await;
        write_plain_frame(&mut stream, &encrypt_result_frame(5)).await;
    });

    let mut transport = FramedTransport::connect(&addr.to_string()).await.unwrap();
    let result = steamcm_net::handshake::run(&mut transport, Duration::from_secs(5)).await;

    assert!(matches!(result, Err(steamcm_net::HandshakeError::Rejected(5))));
    assert!(!transport.is_encrypted());

    server.await.unwrap();
}
