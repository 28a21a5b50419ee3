//! Connecting to the host channel.
//!
//! - Unix: Unix domain socket
//! - Windows: named pipe client
//!
//! The agent itself runs over any `AsyncRead + AsyncWrite` stream; this
//! module only finds the host's end.

use std::io;
use std::time::Duration;

use tokio::time::Instant;

use crate::Result;

const RETRY_DELAY: Duration = Duration::from_millis(50);

#[cfg(unix)]
pub type ChannelStream = tokio::net::UnixStream;

#[cfg(windows)]
pub type ChannelStream = tokio::net::windows::named_pipe::NamedPipeClient;

/// Whether a failed connect may succeed once the host has created the channel
fn is_not_ready(e: &io::Error) -> bool {
    #[cfg(windows)]
    {
        const ERROR_PIPE_BUSY: i32 = 231;
        if e.raw_os_error() == Some(ERROR_PIPE_BUSY) {
            return true;
        }
    }
    matches!(
        e.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
    )
}

#[cfg(unix)]
async fn try_connect(path: &str) -> io::Result<ChannelStream> {
    tokio::net::UnixStream::connect(path).await
}

#[cfg(windows)]
async fn try_connect(path: &str) -> io::Result<ChannelStream> {
    tokio::net::windows::named_pipe::ClientOptions::new().open(path)
}

/// Connect to the channel at `path`, waiting up to `timeout` for it to
/// become available.
pub async fn connect(path: &str, timeout: Duration) -> Result<ChannelStream> {
    let deadline = Instant::now() + timeout;
    loop {
        match try_connect(path).await {
            Ok(stream) => {
                tracing::info!("connected to {}", path);
                return Ok(stream);
            }
            Err(e) if is_not_ready(&e) && Instant::now() + RETRY_DELAY < deadline => {
                tracing::debug!("channel {} not ready: {}", path, e);
                tokio::time::sleep(RETRY_DELAY).await;
            }
            Err(e) if is_not_ready(&e) => {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("channel {} not available after {:?}: {}", path, timeout, e),
                )
                .into());
            }
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::Error;

    fn socket_path(name: &str) -> String {
        std::env::temp_dir()
            .join(format!("vdagent-{}-{}.sock", name, std::process::id()))
            .to_string_lossy()
            .into_owned()
    }

    #[tokio::test]
    async fn test_connect_waits_for_listener() {
        let path = socket_path("wait");
        let _ = std::fs::remove_file(&path);

        let bind_path = path.clone();
        let server = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let listener = tokio::net::UnixListener::bind(&bind_path).unwrap();
            listener.accept().await.unwrap();
        });

        connect(&path, Duration::from_secs(5)).await.unwrap();
        server.await.unwrap();
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_connect_times_out() {
        let path = socket_path("missing");
        let _ = std::fs::remove_file(&path);

        match connect(&path, Duration::from_millis(120)).await {
            Err(Error::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::TimedOut),
            other => panic!("expected timeout, got {:?}", other.map(|_| ())),
        }
    }
}
