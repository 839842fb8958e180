//! Shared test helpers: an in-process peer that serves metadata.

use sha1::{Digest, Sha1};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::bencode::{self, Value};
use crate::client::wire::{
    EXT_HANDSHAKE, HANDSHAKE_LEN, LOCAL_UT_METADATA, METADATA_DATA, METADATA_PIECE_SIZE,
    METADATA_REJECT, MSG_EXTENDED,
};
use crate::types::InfoHash;

/// How the fake peer misbehaves
#[derive(Clone, Copy)]
pub(crate) enum Behaviour {
    Honest,
    Reject,
    NoExtensions,
    HugeMetadata,
    /// Sends a second extended handshake with a different size
    RepeatHandshake,
}

pub(crate) fn sample_metadata() -> Vec<u8> {
    // Spans two pieces
    bencode::encode(&Value::dict([
        ("name", Value::bytes("a".repeat(20_000))),
        ("piece length", Value::Int(262_144)),
        ("pieces", Value::bytes([0u8; 20])),
    ]))
}

async fn write_message(
    stream: &mut TcpStream,
    id: u8,
    ext_id: u8,
    payload: &[u8],
) -> std::io::Result<()> {
    let mut frame = ((payload.len() + 2) as u32).to_be_bytes().to_vec();
    frame.push(id);
    frame.push(ext_id);
    frame.extend_from_slice(payload);
    stream.write_all(&frame).await
}

pub(crate) async fn spawn_peer(metadata: Vec<u8>, behaviour: Behaviour) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();

        let mut theirs = [0u8; HANDSHAKE_LEN];
        stream.read_exact(&mut theirs).await.unwrap();
        let mut ours = theirs;
        ours[48..68].copy_from_slice(b"-XX0000-fakepeer0000");
        if let Behaviour::NoExtensions = behaviour {
            ours[25] = 0;
        }
        stream.write_all(&ours).await.unwrap();
        if let Behaviour::NoExtensions = behaviour {
            return;
        }

        // Their extended handshake
        let len = stream.read_u32().await.unwrap() as usize;
        let mut frame = vec![0u8; len];
        stream.read_exact(&mut frame).await.unwrap();
        assert_eq!(&frame[..2], &[MSG_EXTENDED, EXT_HANDSHAKE]);

        // Noise the client must skip: keep-alive and unchoke
        stream.write_all(&0u32.to_be_bytes()).await.unwrap();
        stream.write_all(&[0, 0, 0, 1, 1]).await.unwrap();

        let size = match behaviour {
            Behaviour::HugeMetadata => 64 * 1024 * 1024,
            _ => metadata.len() as i64,
        };
        let handshake = bencode::encode(&Value::dict([
            ("m", Value::dict([("ut_metadata", Value::Int(3))])),
            ("metadata_size", Value::Int(size)),
        ]));
        write_message(&mut stream, MSG_EXTENDED, EXT_HANDSHAKE, &handshake)
            .await
            .unwrap();
        if let Behaviour::RepeatHandshake = behaviour {
            let again = bencode::encode(&Value::dict([
                ("m", Value::dict([("ut_metadata", Value::Int(3))])),
                ("metadata_size", Value::Int(size + 1)),
            ]));
            write_message(&mut stream, MSG_EXTENDED, EXT_HANDSHAKE, &again)
                .await
                .unwrap();
        }

        loop {
            let Ok(len) = stream.read_u32().await else {
                return;
            };
            let mut frame = vec![0u8; len as usize];
            if stream.read_exact(&mut frame).await.is_err() {
                return;
            }
            assert_eq!(&frame[..2], &[MSG_EXTENDED, 3]);
            let request = bencode::decode(&frame[2..]).unwrap();
            let piece = request.get("piece").and_then(Value::as_int).unwrap();

            let mut reply = match behaviour {
                Behaviour::Reject => bencode::encode(&Value::dict([
                    ("msg_type", Value::Int(METADATA_REJECT)),
                    ("piece", Value::Int(piece)),
                ])),
                _ => bencode::encode(&Value::dict([
                    ("msg_type", Value::Int(METADATA_DATA)),
                    ("piece", Value::Int(piece)),
                    ("total_size", Value::Int(metadata.len() as i64)),
                ])),
            };
            let start = piece as usize * METADATA_PIECE_SIZE;
            let end = (start + METADATA_PIECE_SIZE).min(metadata.len());
            if !matches!(behaviour, Behaviour::Reject) {
                reply.extend_from_slice(&metadata[start..end]);
            }
            // The client hangs up as soon as it has an answer
            if write_message(&mut stream, MSG_EXTENDED, LOCAL_UT_METADATA, &reply)
                .await
                .is_err()
            {
                return;
            }
        }
    });

    addr
}

pub(crate) fn hash_of(metadata: &[u8]) -> InfoHash {
    InfoHash::from_slice(&Sha1::digest(metadata)).unwrap()
}

