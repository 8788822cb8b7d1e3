use std::future::Future;

use anyhow::{Context, Result};
use bytes::Bytes;
use skypipe::{receive_output, send_input, ClientConfig, Connection, PipeName, Server, ServerConfig};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::info;

/// Run the broker until `shutdown` resolves
pub async fn run_daemon<F>(config: ServerConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let server = Server::bind(config.clone())
        .await
        .with_context(|| format!("cannot bind {}", config.bind))?;
    let report = server.run(shutdown).await;
    info!(
        pipes = report.registry.pipes,
        pending_chunks = report.registry.pending_chunks,
        connections = report.connections.accepted,
        faults = report.connections.faults,
        "broker stopped"
    );
    Ok(())
}

/// Input mode: everything on `input` becomes one chunk on `pipe`
pub async fn run_input<R>(config: &ClientConfig, pipe: &PipeName, mut input: R) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut data = Vec::new();
    input
        .read_to_end(&mut data)
        .await
        .context("cannot read standard input")?;

    let mut conn = Connection::connect(config).await?;
    send_input(&mut conn, pipe, Bytes::from(data)).await?;
    conn.close().await?;
    Ok(())
}

/// Output mode: wait for one chunk on `pipe` and copy it to `output`
pub async fn run_output<W>(config: &ClientConfig, pipe: &PipeName, mut output: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut conn = Connection::connect(config).await?;
    let chunk = receive_output(&mut conn, pipe).await?;
    conn.close().await?;

    output
        .write_all(&chunk)
        .await
        .context("cannot write standard output")?;
    output.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    async fn start_broker() -> (SocketAddr, tokio::sync::oneshot::Sender<()>) {
        let config = ServerConfig::default().with_bind("127.0.0.1:0".parse().unwrap());
        let server = Server::bind(config).await.unwrap();
        let addr = server.local_addr().unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(server.run(async move {
            let _ = stop_rx.await;
        }));
        (addr, stop_tx)
    }

    #[tokio::test]
    async fn test_input_then_output() {
        let (addr, stop) = start_broker().await;
        let config = ClientConfig::default().with_address(&addr.to_string());
        let pipe = PipeName::new("__DEFAULT__").unwrap();

        run_input(&config, &pipe, &b"piped through\n"[..]).await.unwrap();

        let mut out = Vec::new();
        run_output(&config, &pipe, &mut out).await.unwrap();
        assert_eq!(out, b"piped through\n");

        let _ = stop.send(());
    }

    #[tokio::test]
    async fn test_unreachable_broker() {
        // Bind and drop to get a port nobody listens on
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let config = ClientConfig::default().with_address(&format!("127.0.0.1:{port}"));
        let pipe = PipeName::new("x").unwrap();

        let err = run_input(&config, &pipe, &b"data"[..]).await.unwrap_err();
        assert!(err.to_string().contains("cannot connect"));
    }
}
