//! Client adapter against the real server, over TCP and in-process pipes.

use bytes::Bytes;
use smartwire_client::{ClientError, ClientMedium, ClientProtocol, RemoteTransport};
use smartwire_protocol::TransportError;
use smartwire_server::{
    backing_transport, Dispatch, LocalTransport, MemoryTransport, RequestHandler,
    RequestRegistry, ServeConfig, Server, ServerConfig, ServerError, ServerStreamMedium,
    Transport,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

struct TcpSetup {
    server: Arc<Server>,
    addr: SocketAddr,
    handle: JoinHandle<Result<(), ServerError>>,
}

impl TcpSetup {
    async fn start(transport: Arc<dyn Transport>, registry: RequestRegistry) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(Server::with_registry(
            ServerConfig::new(addr),
            transport,
            registry,
        ));
        let handle = {
            let server = server.clone();
            tokio::spawn(async move { server.serve_listener(listener).await })
        };
        Self {
            server,
            addr,
            handle,
        }
    }

    fn client(&self) -> RemoteTransport {
        RemoteTransport::new(ClientMedium::tcp(self.addr.to_string()))
    }

    async fn stop(self) {
        self.server.shutdown();
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}

/// Serves one in-process pipe; returns the client end.
fn pipe_client(
    transport: Arc<dyn Transport>,
    registry: RequestRegistry,
) -> (RemoteTransport, JoinHandle<Result<(), ServerError>>) {
    let (client_side, server_side) = tokio::io::duplex(4096);
    let handle = tokio::spawn(async move {
        let (reader, writer) = tokio::io::split(server_side);
        let mut medium = ServerStreamMedium::new(reader, writer, Arc::new(registry), transport);
        medium.serve().await
    });
    let (reader, writer) = tokio::io::split(client_side);
    (RemoteTransport::new(ClientMedium::pipe(reader, writer)), handle)
}

struct FailingHandler;

impl RequestHandler for FailingHandler {
    fn execute(&mut self, _args: &[Bytes]) -> Result<Dispatch, ServerError> {
        Err(ServerError::InvalidRequest("handler exploded".to_string()))
    }
}

fn registry_with_failing_handler() -> RequestRegistry {
    let mut registry = RequestRegistry::vfs();
    registry.register("explode", |_| Box::new(FailingHandler));
    registry
}

/// The hello, put/get, missing-file and readv scenarios.
async fn run_scenarios(client: &mut RemoteTransport, backing: &MemoryTransport) {
    assert_eq!(client.query_version().await.unwrap(), 1);

    client.put_bytes("foo.txt", b"hi", None).await.unwrap();
    assert_eq!(&backing.get_bytes("foo.txt").unwrap()[..], b"hi");
    assert_eq!(&client.get_bytes("foo.txt").await.unwrap()[..], b"hi");

    let err = client.get_bytes("missing.txt").await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::Transport(TransportError::NoSuchFile { ref path }) if path == "missing.txt"
    ));
    // Domain errors leave the connection usable.
    assert!(client.has("foo.txt").await.unwrap());

    backing.put_bytes("a", b"0123456789", None).unwrap();
    let pieces = client.readv("a", &[(0, 1), (3, 2)]).await.unwrap();
    assert_eq!(
        pieces,
        vec![(0, Bytes::from_static(b"0")), (3, Bytes::from_static(b"34"))]
    );
}

#[tokio::test]
async fn test_scenarios_over_tcp() {
    let backing = Arc::new(MemoryTransport::new());
    let setup = TcpSetup::start(backing.clone(), RequestRegistry::vfs()).await;

    let mut client = setup.client();
    run_scenarios(&mut client, &backing).await;
    client.disconnect().await;

    setup.stop().await;
}

#[tokio::test]
async fn test_scenarios_over_pipe() {
    let backing = Arc::new(MemoryTransport::new());
    let (mut client, handle) = pipe_client(backing.clone(), RequestRegistry::vfs());

    run_scenarios(&mut client, &backing).await;

    client.disconnect().await;
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_dispatch_isolation() {
    let backing = Arc::new(MemoryTransport::new());
    let setup = TcpSetup::start(backing, registry_with_failing_handler()).await;
    let mut medium = ClientMedium::tcp(setup.addr.to_string());

    {
        let mut protocol = ClientProtocol::new(medium.get_request().unwrap());
        protocol.call(&["explode", "x"]).await.unwrap();
        let response = protocol.read_response_tuple(false).await.unwrap();
        assert_eq!(
            response,
            vec![
                Bytes::from_static(b"error"),
                Bytes::from_static(b"invalid request: handler exploded")
            ]
        );
    }
    {
        let mut protocol = ClientProtocol::new(medium.get_request().unwrap());
        assert_eq!(protocol.query_version().await.unwrap(), 1);
    }

    medium.disconnect().await;
    setup.stop().await;
}

#[tokio::test]
async fn test_generic_error_reaches_client() {
    let dir = TempDir::new().unwrap();
    let backing: Arc<dyn Transport> = Arc::new(LocalTransport::new(dir.path()));

    let (mut client, _handle) = pipe_client(backing.clone(), RequestRegistry::vfs());
    let err = client.get_bytes("../outside").await.unwrap_err();
    assert!(matches!(err, ClientError::InvalidPath(_)));

    // A raw call skips the adapter's path checks and hits the server's jail.
    let (client_side, server_side) = tokio::io::duplex(4096);
    let _server = tokio::spawn(async move {
        let (reader, writer) = tokio::io::split(server_side);
        let mut medium =
            ServerStreamMedium::new(reader, writer, Arc::new(RequestRegistry::vfs()), backing);
        medium.serve().await
    });
    let (reader, writer) = tokio::io::split(client_side);
    let mut medium = ClientMedium::pipe(reader, writer);
    {
        let mut protocol = ClientProtocol::new(medium.get_request().unwrap());
        protocol.call(&["get", "../outside"]).await.unwrap();
        let response = protocol.read_response_tuple(false).await.unwrap();
        assert_eq!(&response[0][..], b"error");
        let err = smartwire_client::translate_error(&response, Some("../outside"));
        assert!(matches!(err, ClientError::Server(_)), "unexpected error: {}", err);
    }
    {
        let mut protocol = ClientProtocol::new(medium.get_request().unwrap());
        assert_eq!(protocol.query_version().await.unwrap(), 1);
    }
}

#[tokio::test]
async fn test_filesystem_operations() {
    let dir = TempDir::new().unwrap();
    let backing: Arc<dyn Transport> = Arc::new(LocalTransport::new(dir.path()));
    let setup = TcpSetup::start(backing, RequestRegistry::vfs()).await;
    let mut client = setup.client();

    client.mkdir("docs", None).await.unwrap();
    client
        .put_bytes_non_atomic("nested/file.txt", b"abc", None, true, None)
        .await
        .unwrap();
    client
        .put_bytes_non_atomic("nested/deep/f", b"d", None, true, None)
        .await
        .unwrap();
    client.put_bytes("docs/readme", b"hello", None).await.unwrap();
    assert_eq!(client.append_bytes("docs/readme", b"!!", None).await.unwrap(), 5);
    assert_eq!(
        &client.get_bytes("docs/readme").await.unwrap()[..],
        b"hello!!"
    );

    let stat = client.stat("docs/readme").await.unwrap();
    assert_eq!(stat.size, 7);
    #[cfg(unix)]
    assert_eq!(stat.mode & 0o170000, 0o100000);

    assert_eq!(client.list_dir("").await.unwrap(), vec!["docs", "nested"]);
    assert_eq!(
        client.iter_files_recursive("nested").await.unwrap(),
        vec!["deep/f", "file.txt"]
    );

    client.put_bytes("docs/other", b"x", None).await.unwrap();
    let err = client.rename("docs/other", "docs/readme").await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::Transport(TransportError::FileExists { .. })
    ));
    client.move_path("docs/other", "docs/readme").await.unwrap();
    assert_eq!(&client.get_bytes("docs/readme").await.unwrap()[..], b"x");

    let err = client.rmdir("docs").await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::Transport(TransportError::DirectoryNotEmpty { .. })
    ));
    client.delete("docs/readme").await.unwrap();
    client.rmdir("docs").await.unwrap();
    assert!(!client.has("docs").await.unwrap());
    assert!(dir.path().join("nested/deep/f").exists());

    client.disconnect().await;
    setup.stop().await;
}

#[tokio::test]
async fn test_base_path() {
    let backing = Arc::new(MemoryTransport::new());
    backing.mkdir("repo", None).unwrap();
    let (client, _handle) = pipe_client(backing.clone(), RequestRegistry::vfs());
    let mut client = client.with_base("/repo");

    client.put_bytes("branch.conf", b"x", None).await.unwrap();
    assert!(backing.has("repo/branch.conf").unwrap());
    assert!(client.has("../repo/branch.conf").await.unwrap());
}

#[tokio::test]
async fn test_read_only_serving() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("existing"), b"data").unwrap();
    let config = ServeConfig {
        directory: dir.path().to_path_buf(),
        allow_writes: false,
    };
    let (mut client, _handle) = pipe_client(backing_transport(&config), RequestRegistry::vfs());

    assert_eq!(&client.get_bytes("existing").await.unwrap()[..], b"data");
    let err = client.put_bytes("new", b"x", None).await.unwrap_err();
    assert!(matches!(err, ClientError::Transport(TransportError::ReadOnly)));
    let err = client.delete("existing").await.unwrap_err();
    assert!(matches!(err, ClientError::Transport(TransportError::ReadOnly)));
    assert!(dir.path().join("existing").exists());
}

#[tokio::test]
async fn test_server_accepts_pipelined_requests() {
    let backing = Arc::new(MemoryTransport::new());
    let setup = TcpSetup::start(backing, RequestRegistry::vfs()).await;

    let mut stream = TcpStream::connect(setup.addr).await.unwrap();
    stream
        .write_all(b"put\x01a\x01\n1\nxdone\nget\x01a\nhas\x01b\n")
        .await
        .unwrap();
    let expected = b"ok\nok\n1\nxdone\nno\n";
    let mut reply = vec![0u8; expected.len()];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(&reply[..], &expected[..]);

    drop(stream);
    setup.stop().await;
}

#[tokio::test]
async fn test_framing_error_closes_connection() {
    let backing = Arc::new(MemoryTransport::new());
    let setup = TcpSetup::start(backing, RequestRegistry::vfs()).await;

    let mut stream = TcpStream::connect(setup.addr).await.unwrap();
    stream
        .write_all(b"put\x01a\x01\n1\nxNOPE\nhello\n")
        .await
        .unwrap();
    let mut reply = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut reply))
        .await
        .unwrap()
        .unwrap();
    assert!(reply.starts_with(b"error\x01"));
    assert!(!reply.ends_with(b"ok\x011\n"));

    setup.stop().await;
}

#[tokio::test]
async fn test_client_sees_closed_connection() {
    let backing = Arc::new(MemoryTransport::new());
    let setup = TcpSetup::start(backing, RequestRegistry::vfs()).await;
    let mut client = setup.client();
    assert_eq!(client.query_version().await.unwrap(), 1);

    setup.stop().await;
    let err = client.query_version().await.unwrap_err();
    assert!(err.is_retryable(), "unexpected error: {}", err);
    assert!(!client.medium().has_outstanding_request());

    // The broken connection was dropped, so the next call tries to
    // reconnect instead of tripping over the failed request.
    let err = client.query_version().await.unwrap_err();
    assert!(!err.is_sequencing(), "unexpected error: {}", err);
    assert!(err.is_retryable(), "unexpected error: {}", err);
}
