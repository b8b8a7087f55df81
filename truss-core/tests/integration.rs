//! Integration tests: client sessions against a scripted peer over a real
//! TCP connection on localhost.

use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use truss_core::message::HANDSHAKE_MARKER;
use truss_core::rekey;
use truss_core::{
    ChannelOptions, ClientIdentity, ClientSession, ConnectionInfo, Received, RekeyPolicy,
    Request, SecureChannel, SessionOptions,
};

const PSK: &str = "integration-psk";

// ── Helpers ──────────────────────────────────────────────────────

async fn ephemeral_listener() -> (TcpListener, ConnectionInfo) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let info = ConnectionInfo::new(addr.ip().to_string(), addr.port());
    (listener, info)
}

fn channel_options() -> ChannelOptions {
    ChannelOptions {
        receive_window: Duration::from_millis(500),
        idle_retries: 6,
        ..Default::default()
    }
}

fn session_options(rekey_interval: u32) -> SessionOptions {
    SessionOptions {
        channel: channel_options(),
        rekey: RekeyPolicy {
            prime_bits: 256,
            ..Default::default()
        },
        rekey_interval,
    }
}

/// Minimal peer: answers the handshake, responds to rekeys, and echoes
/// everything else upper-cased until `quit`. Returns the number of rekeys.
async fn scripted_peer(listener: TcpListener) -> u32 {
    let (stream, _) = listener.accept().await.unwrap();
    let mut channel = SecureChannel::new(stream, PSK, channel_options());

    let hello = channel.receive_message().await.unwrap();
    channel
        .send(&format!("{hello}{HANDSHAKE_MARKER}"))
        .await
        .unwrap();

    let mut rekeys = 0;
    loop {
        match channel.receive().await.unwrap() {
            Received::Message(text) => match Request::decode(&text) {
                Request::Quit => return rekeys,
                Request::Rekey => {
                    rekey::respond(&mut channel, &RekeyPolicy::default())
                        .await
                        .unwrap();
                    rekeys += 1;
                }
                _ => channel.send(&text.to_uppercase()).await.unwrap(),
            },
            Received::Idle => continue,
            Received::Closed | Received::Undecryptable => return rekeys,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[tokio::test]
async fn establish_then_request_over_tcp() {
    let (listener, info) = ephemeral_listener().await;
    let peer = tokio::spawn(scripted_peer(listener));

    let mut session = ClientSession::connect(
        &info,
        PSK,
        ClientIdentity::new("Linux", 0),
        session_options(0),
    )
    .await
    .unwrap();
    session.establish().await.unwrap();
    assert_eq!(session.channel().cipher().generation(), 1);

    let reply = tokio::time::timeout(Duration::from_secs(10), session.request("ping"))
        .await
        .expect("timeout")
        .unwrap();
    assert_eq!(reply, "PING");

    session.quit().await.unwrap();
    assert_eq!(peer.await.unwrap(), 1);
}

#[tokio::test]
async fn automatic_rekey_after_interval() {
    let (listener, info) = ephemeral_listener().await;
    let peer = tokio::spawn(scripted_peer(listener));

    let mut session = ClientSession::connect(
        &info,
        PSK,
        ClientIdentity::new("Linux", 0),
        session_options(2),
    )
    .await
    .unwrap();
    session.handshake().await.unwrap();

    for i in 0..5 {
        let reply = session.request(&format!("msg{i}")).await.unwrap();
        assert_eq!(reply, format!("MSG{i}"));
    }
    // Rekeys fire before rounds 3 and 5.
    assert_eq!(session.channel().cipher().generation(), 2);
    assert_eq!(session.rounds_since_rekey(), 1);

    session.quit().await.unwrap();
    assert_eq!(peer.await.unwrap(), 2);
}

#[tokio::test]
async fn frame_sealed_before_rekey_fails_after() {
    let (listener, info) = ephemeral_listener().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut channel = SecureChannel::new(stream, PSK, channel_options());
        let trigger = channel.receive_message().await.unwrap();
        assert_eq!(Request::decode(&trigger), Request::Rekey);
        rekey::respond(&mut channel, &RekeyPolicy::default())
            .await
            .unwrap();
        channel
    });

    let stream = TcpStream::connect(info.to_string()).await.unwrap();
    let mut client = SecureChannel::new(stream, PSK, channel_options());
    let stale = client.cipher().seal(b"sealed under the psk").unwrap();

    let policy = RekeyPolicy {
        prime_bits: 256,
        ..Default::default()
    };
    rekey::initiate(&mut client, &policy).await.unwrap();
    let mut server = server.await.unwrap();

    assert!(client.cipher().open(&stale).is_none());
    assert!(server.cipher().open(&stale).is_none());

    client.send("fresh").await.unwrap();
    assert_eq!(
        server.receive().await.unwrap(),
        Received::Message("fresh".into())
    );
}

#[tokio::test]
async fn psk_mismatch_surfaces_as_undecryptable() {
    let (listener, info) = ephemeral_listener().await;
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut channel = SecureChannel::new(stream, "some-other-psk", channel_options());
        channel.receive().await.unwrap()
    });

    let mut session = ClientSession::connect(
        &info,
        PSK,
        ClientIdentity::new("Linux", 0),
        session_options(0),
    )
    .await
    .unwrap();
    let _ = tokio::time::timeout(Duration::from_millis(200), session.handshake()).await;

    assert_eq!(server.await.unwrap(), Received::Undecryptable);
}
