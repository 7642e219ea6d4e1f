use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::codec::wire;
use crate::config::ConnectOptions;
use crate::error::{Error, Result};
use crate::native::{NativeError, NativeObject};
use crate::transport::queue::HandlerQueue;
use crate::transport::{Endpoint, NativeConnection, NativeHandler, Transport};

/// Largest frame accepted from a socket
pub const MAX_FRAME_LEN: usize = 100 * 1024 * 1024;

/// Write one object with a 4-byte big-endian length prefix
pub(crate) async fn write_frame<W>(writer: &mut W, message: &NativeObject) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = wire::to_bytes(message)?;
    if bytes.len() > MAX_FRAME_LEN {
        return Err(Error::InvalidFrame(format!(
            "Message too large: {} bytes",
            bytes.len()
        )));
    }

    writer.write_u32(bytes.len() as u32).await?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed object
pub(crate) async fn read_frame<R>(reader: &mut R) -> Result<NativeObject>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u32().await.map_err(eof_as_closed)? as usize;

    if len > MAX_FRAME_LEN {
        return Err(Error::InvalidFrame(format!(
            "Message too large: {} bytes",
            len
        )));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await.map_err(eof_as_closed)?;
    wire::from_bytes(&buf)
}

fn eof_as_closed(e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::ConnectionClosed
    } else {
        e.into()
    }
}

// ============================================================================
// Client side
// ============================================================================

/// Endpoint reaching services through Unix domain sockets
///
/// A service named `com.example.svc` listens on `<dir>/com.example.svc`.
/// Socket I/O runs on the given tokio runtime; callbacks still run on each
/// connection's own dispatch queue.
#[derive(Debug, Clone)]
pub struct UnixEndpoint {
    dir: PathBuf,
    runtime: Handle,
}

impl UnixEndpoint {
    /// Create an endpoint using the current tokio runtime
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|_| Error::Custom("UnixEndpoint requires a tokio runtime".to_string()))?;
        Ok(Self::with_runtime(dir, runtime))
    }

    pub fn with_runtime(dir: impl AsRef<Path>, runtime: Handle) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            runtime,
        }
    }

    /// Socket path a service name resolves to
    pub fn socket_path(&self, service_name: &str) -> PathBuf {
        self.dir.join(service_name)
    }
}

impl Endpoint for UnixEndpoint {
    fn connect(
        &self,
        service_name: &str,
        options: &ConnectOptions,
        handler: NativeHandler,
    ) -> Result<Box<dyn NativeConnection>> {
        if service_name.contains('/') {
            return Err(Error::InvalidServiceName {
                name: service_name.to_string(),
                reason: "must not contain '/'",
            });
        }

        let client = HandlerQueue::new(options.queue_label_for(service_name), handler)?;
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        Ok(Box::new(UnixConnection {
            path: self.socket_path(service_name),
            runtime: self.runtime.clone(),
            client,
            outbound_tx: Some(outbound_tx),
            outbound_rx: Some(outbound_rx),
            task: None,
        }))
    }
}

struct UnixConnection {
    path: PathBuf,
    runtime: Handle,
    client: Arc<HandlerQueue>,
    outbound_tx: Option<mpsc::UnboundedSender<NativeObject>>,
    outbound_rx: Option<mpsc::UnboundedReceiver<NativeObject>>,
    task: Option<JoinHandle<()>>,
}

impl NativeConnection for UnixConnection {
    fn resume(&mut self) {
        let Some(outbound) = self.outbound_rx.take() else {
            return;
        };
        let path = self.path.clone();
        let client = Arc::clone(&self.client);
        self.task = Some(self.runtime.spawn(run_connection(path, outbound, client)));
    }

    fn send_message(&mut self, message: NativeObject) {
        // Messages sent before the socket is up wait in the channel.
        if let Some(tx) = &self.outbound_tx {
            if tx.send(message).is_err() {
                trace!(path = %self.path.display(), "Message dropped, connection gone");
            }
        }
    }

    fn cancel(&mut self) {
        self.client.cancel();
        self.outbound_tx = None;
        self.outbound_rx = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for UnixConnection {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn run_connection(
    path: PathBuf,
    mut outbound: mpsc::UnboundedReceiver<NativeObject>,
    client: Arc<HandlerQueue>,
) {
    let stream = match UnixStream::connect(&path).await {
        Ok(stream) => stream,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Service socket unreachable");
            client.finish(NativeObject::Error(NativeError::ConnectionInvalid));
            return;
        }
    };
    let (mut reader, mut writer) = stream.into_split();

    // Writer ends when the connection drops its sender.
    let writer_path = path.clone();
    tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            if let Err(e) = write_frame(&mut writer, &message).await {
                warn!(path = %writer_path.display(), error = %e, "Failed to send message");
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    loop {
        match read_frame(&mut reader).await {
            Ok(object) => {
                if !client.deliver(object) {
                    break;
                }
            }
            Err(Error::ConnectionClosed) => {
                debug!(path = %path.display(), "Service closed the connection");
                client.finish(NativeObject::Error(NativeError::ConnectionInvalid));
                break;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Dropping connection");
                client.finish(NativeObject::Error(NativeError::ConnectionInvalid));
                break;
            }
        }
    }
}

// ============================================================================
// Service side
// ============================================================================

/// One accepted client on the service side, carrying length-prefixed
/// native objects
pub struct UnixTransport {
    stream: UnixStream,
}

impl UnixTransport {
    pub fn from_stream(stream: UnixStream) -> Self {
        Self { stream }
    }
}

#[async_trait::async_trait]
impl Transport for UnixTransport {
    async fn send(&mut self, message: &NativeObject) -> Result<()> {
        write_frame(&mut self.stream, message).await
    }

    async fn receive(&mut self) -> Result<NativeObject> {
        read_frame(&mut self.stream).await
    }

    async fn close(&mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

/// Unix socket listener a service accepts clients on
pub struct UnixTransportListener {
    listener: UnixListener,
    path: PathBuf,
}

impl UnixTransportListener {
    /// Bind to a Unix socket path
    pub async fn bind(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        // Remove existing socket file if it exists
        if path.exists() {
            std::fs::remove_file(&path)?;
        }

        let listener = UnixListener::bind(&path)?;
        Ok(Self { listener, path })
    }

    /// Accept an incoming connection
    pub async fn accept(&self) -> Result<UnixTransport> {
        let (stream, _) = self.listener.accept().await?;
        Ok(UnixTransport::from_stream(stream))
    }

    /// Get the path this listener is bound to
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close the listener and remove the socket file
    pub async fn close(&mut self) -> Result<()> {
        std::fs::remove_file(&self.path)?;
        Ok(())
    }
}

impl Drop for UnixTransportListener {
    fn drop(&mut self) {
        // Clean up socket file on drop
        let _ = std::fs::remove_file(&self.path);
    }
}

#[async_trait::async_trait]
impl crate::transport::TransportListener for UnixTransportListener {
    type Transport = UnixTransport;

    async fn accept(&self) -> Result<Self::Transport> {
        UnixTransportListener::accept(self).await
    }

    async fn close(&mut self) -> Result<()> {
        UnixTransportListener::close(self).await
    }
}
