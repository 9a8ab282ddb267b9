use super::RelayDirection;
use crate::error::ProxyError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tracing::debug;

/// 双向字节转发器
///
/// 两个方向各跑一个复制循环。任一方向结束（EOF 或 I/O 错误）都会置位共享的关闭标志，
/// 另一方向即使阻塞在读或写上也会随之退出，两端连接最终都被关闭。
#[derive(Debug, Clone, Copy)]
pub struct ConnectionForwarder {
    buffer_size: usize,
}

/// 一次转发的结果
#[derive(Debug, Default)]
pub struct RelaySummary {
    pub client_to_backend: u64,
    pub backend_to_client: u64,
    /// 第一个出现的 I/O 错误
    pub error: Option<ProxyError>,
}

impl RelaySummary {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn total_bytes(&self) -> u64 {
        self.client_to_backend + self.backend_to_client
    }
}

impl ConnectionForwarder {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// 在两个已连接的流之间转发，直到两个方向都结束
    pub async fn forward<C, B>(&self, client: C, backend: B) -> RelaySummary
    where
        C: AsyncRead + AsyncWrite + Unpin + Send,
        B: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let (client_read, client_write) = tokio::io::split(client);
        let (backend_read, backend_write) = tokio::io::split(backend);
        let (closed_tx, closed_rx) = watch::channel(false);

        let ((client_to_backend, upstream_error), (backend_to_client, downstream_error)) = tokio::join!(
            relay(
                RelayDirection::ClientToBackend,
                client_read,
                backend_write,
                self.buffer_size,
                &closed_tx,
                closed_rx.clone(),
            ),
            relay(
                RelayDirection::BackendToClient,
                backend_read,
                client_write,
                self.buffer_size,
                &closed_tx,
                closed_rx,
            ),
        );

        debug!(
            client_to_backend,
            backend_to_client, "Relay finished, both directions closed"
        );

        RelaySummary {
            client_to_backend,
            backend_to_client,
            error: upstream_error.or(downstream_error),
        }
    }
}

/// 单方向复制循环，返回时读写两半均已释放
async fn relay<R, W>(
    direction: RelayDirection,
    mut reader: R,
    mut writer: W,
    buffer_size: usize,
    closed_tx: &watch::Sender<bool>,
    mut closed_rx: watch::Receiver<bool>,
) -> (u64, Option<ProxyError>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut transferred = 0u64;

    let result = tokio::select! {
        result = pump(&mut reader, &mut writer, buffer_size, &mut transferred) => result,
        _ = closed_rx.wait_for(|closed| *closed) => {
            debug!(%direction, "Peer direction closed, stopping");
            Ok(())
        }
    };

    closed_tx.send_replace(true);
    let _ = writer.shutdown().await;

    let error = result.err().map(|source| {
        debug!(%direction, error = %source, "Relay I/O failure");
        ProxyError::RelayIo { direction, source }
    });

    (transferred, error)
}

async fn pump<R, W>(
    reader: &mut R,
    writer: &mut W,
    buffer_size: usize,
    transferred: &mut u64,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buffer = vec![0u8; buffer_size];

    loop {
        let n = reader.read(&mut buffer).await?;
        if n == 0 {
            return Ok(());
        }
        writer.write_all(&buffer[..n]).await?;
        writer.flush().await?;
        *transferred += n as u64;
    }
}
