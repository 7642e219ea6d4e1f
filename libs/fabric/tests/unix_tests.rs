use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use servlink_fabric::{
    error::Error,
    event_loop,
    transport::{Transport, TransportListener, UnixTransport, UnixTransportListener},
    EventEmitter, EventLoop, NativeObject, ServiceConnection, State, Stream, UnixEndpoint, Value,
};
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

type Seen = Arc<Mutex<Vec<(Stream, Value)>>>;

async fn turn(events: &mut EventLoop) {
    let ran = timeout(WAIT, events.turn())
        .await
        .expect("event loop stalled");
    assert!(ran);
}

fn record(conn: &ServiceConnection) -> Seen {
    let seen = Arc::new(Mutex::new(Vec::new()));
    for stream in [Stream::Event, Stream::Error] {
        let seen = Arc::clone(&seen);
        conn.on(stream, move |payload| seen.lock().push((stream, payload.clone())));
    }
    seen
}

fn dictionary(entries: &[(&str, NativeObject)]) -> NativeObject {
    NativeObject::Dictionary(
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect::<BTreeMap<_, _>>(),
    )
}

async fn connect(path: &std::path::Path) -> UnixTransport {
    UnixTransport::from_stream(tokio::net::UnixStream::connect(path).await.unwrap())
}

/// Serve one client, echoing every message until it goes away
async fn serve_echo(listener: UnixTransportListener) {
    let mut transport = listener.accept().await.unwrap();
    while let Ok(message) = transport.receive().await {
        if transport.send(&message).await.is_err() {
            break;
        }
    }
}

#[tokio::test]
async fn service_connection_over_socket() {
    let dir = tempfile::tempdir().unwrap();
    let endpoint = UnixEndpoint::new(dir.path()).unwrap();
    let listener = UnixTransportListener::bind(endpoint.socket_path("com.example.echo"))
        .await
        .unwrap();
    tokio::spawn(serve_echo(listener));

    let (handle, mut events) = event_loop(16);
    let conn = ServiceConnection::new("com.example.echo", Arc::new(endpoint), handle).unwrap();
    let seen = record(&conn);
    conn.setup().unwrap();

    let mut first = Value::map();
    first.insert("kMsgId", 1);
    first.insert("blob", vec![0xde_u8, 0xad]);
    let mut second = Value::map();
    second.insert("kMsgId", 2);

    conn.send_message(&first).unwrap();
    conn.send_message(&second).unwrap();
    turn(&mut events).await;
    turn(&mut events).await;

    assert_eq!(
        *seen.lock(),
        vec![(Stream::Event, first), (Stream::Event, second)]
    );
    conn.stop();
}

#[tokio::test]
async fn service_closing_socket_invalidates_client() {
    let dir = tempfile::tempdir().unwrap();
    let endpoint = UnixEndpoint::new(dir.path()).unwrap();
    let listener = UnixTransportListener::bind(endpoint.socket_path("com.example.svc"))
        .await
        .unwrap();

    tokio::spawn(async move {
        let mut transport = listener.accept().await.unwrap();
        transport
            .send(&dictionary(&[("hello", NativeObject::Bool(true))]))
            .await
            .unwrap();
        transport.close().await.unwrap();
    });

    let (handle, mut events) = event_loop(16);
    let conn = ServiceConnection::new("com.example.svc", Arc::new(endpoint), handle).unwrap();
    let seen = record(&conn);
    conn.setup().unwrap();

    turn(&mut events).await;
    turn(&mut events).await;

    let mut hello = Value::map();
    hello.insert("hello", true);
    assert_eq!(
        *seen.lock(),
        vec![
            (Stream::Event, hello),
            (Stream::Error, Value::from("connection invalid")),
        ]
    );
    assert_eq!(conn.state(), State::Stopped);
}

#[tokio::test]
async fn missing_socket_is_invalid() {
    let dir = tempfile::tempdir().unwrap();
    let endpoint = UnixEndpoint::new(dir.path()).unwrap();

    let (handle, mut events) = event_loop(16);
    let conn = ServiceConnection::new("com.example.nobody", Arc::new(endpoint), handle).unwrap();
    let seen = record(&conn);
    conn.setup().unwrap();

    turn(&mut events).await;
    assert_eq!(
        *seen.lock(),
        vec![(Stream::Error, Value::from("connection invalid"))]
    );
    assert_eq!(conn.state(), State::Stopped);
}

#[tokio::test]
async fn deeply_nested_frame_invalidates_client() {
    let dir = tempfile::tempdir().unwrap();
    let endpoint = UnixEndpoint::new(dir.path()).unwrap();
    let socket_path = endpoint.socket_path("com.example.deep");
    let listener = tokio::net::UnixListener::bind(socket_path).unwrap();

    // 400k single-element arrays wrapped around a null, in wire layout
    let mut payload = Vec::with_capacity(400_000 * 12 + 4);
    for _ in 0..400_000 {
        payload.extend_from_slice(&9u32.to_le_bytes());
        payload.extend_from_slice(&1u64.to_le_bytes());
    }
    payload.extend_from_slice(&0u32.to_le_bytes());

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        stream.write_u32(payload.len() as u32).await.unwrap();
        stream.write_all(&payload).await.unwrap();
        stream.flush().await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
    });

    let (handle, mut events) = event_loop(16);
    let conn = ServiceConnection::new("com.example.deep", Arc::new(endpoint), handle).unwrap();
    let seen = record(&conn);
    conn.setup().unwrap();

    turn(&mut events).await;
    assert_eq!(
        *seen.lock(),
        vec![(Stream::Error, Value::from("connection invalid"))]
    );
    assert_eq!(conn.state(), State::Stopped);
}

#[tokio::test]
async fn names_with_slashes_are_refused() {
    let dir = tempfile::tempdir().unwrap();
    let endpoint = UnixEndpoint::new(dir.path()).unwrap();

    let (handle, _events) = event_loop(4);
    let conn = ServiceConnection::new("../escape", Arc::new(endpoint), handle).unwrap();

    assert!(matches!(
        conn.setup(),
        Err(Error::InvalidServiceName { .. })
    ));
    assert_eq!(conn.state(), State::Created);
}

#[tokio::test]
async fn transport_preserves_message_boundaries() {
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("boundaries.sock");
    let listener = UnixTransportListener::bind(&socket_path).await.unwrap();
    tokio::spawn(serve_echo(listener));

    let mut client = connect(&socket_path).await;
    let messages = vec![
        NativeObject::String("first".into()),
        NativeObject::Data(b"second".to_vec()),
        dictionary(&[("third", NativeObject::Uint64(u64::MAX))]),
    ];

    for message in &messages {
        client.send(message).await.unwrap();
        let response = client.receive().await.unwrap();
        assert_eq!(&response, message);
    }
}

#[tokio::test]
async fn transport_rejects_oversized_frame() {
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("oversized.sock");
    let listener = tokio::net::UnixListener::bind(&socket_path).unwrap();

    // Frame header claiming 200MB, over the 100MB limit
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        stream.write_u32(200 * 1024 * 1024).await.unwrap();
        stream.flush().await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
    });

    let mut client = connect(&socket_path).await;
    match client.receive().await {
        Err(Error::InvalidFrame(msg)) => assert!(msg.contains("too large")),
        other => panic!("Expected InvalidFrame error, got {:?}", other),
    }
}

#[tokio::test]
async fn transport_reports_closed_connection() {
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("closed.sock");
    let listener = UnixTransportListener::bind(&socket_path).await.unwrap();

    tokio::spawn(async move {
        let mut transport = listener.accept().await.unwrap();
        transport.close().await.unwrap();
    });

    let mut client = connect(&socket_path).await;
    match client.receive().await {
        Err(Error::ConnectionClosed) => {}
        other => panic!("Expected ConnectionClosed, got {:?}", other),
    }
}

#[tokio::test]
async fn listener_works_through_the_trait_and_cleans_up() {
    async fn accept_generic<L: TransportListener>(listener: &L) -> Result<L::Transport, Error> {
        listener.accept().await
    }

    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("generic.sock");
    let mut listener = UnixTransportListener::bind(&socket_path).await.unwrap();
    assert!(socket_path.exists());

    let client_path = socket_path.clone();
    tokio::spawn(async move {
        let mut client = connect(&client_path).await;
        client.send(&NativeObject::Int64(7)).await.unwrap();
    });

    let mut transport = accept_generic(&listener).await.unwrap();
    assert_eq!(transport.receive().await.unwrap(), NativeObject::Int64(7));

    TransportListener::close(&mut listener).await.unwrap();
    assert!(!socket_path.exists());
}
