//! Line-oriented monitor channel to a running debug server.
//!
//! Experimental by design: the GDB-server backends differ in what (if
//! anything) they answer on their listen port, so the best-effort debug
//! operations built on this channel return whatever text came back instead
//! of a structured result.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::{BridgeError, Result};

/// Send one command line to the server's listen port and collect the reply
/// until the remote closes or `idle_timeout` passes with no data.
pub async fn send(port: u16, command: &str, idle_timeout: Duration) -> Result<String> {
    let mut stream = TcpStream::connect(("127.0.0.1", port))
        .await
        .map_err(BridgeError::Io)?;

    let mut line = command.trim_end().to_string();
    line.push('\n');
    stream.write_all(line.as_bytes()).await?;
    stream.flush().await?;

    let mut collected: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        match timeout(idle_timeout, stream.read(&mut chunk)).await {
            Err(_) => break,
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => collected.extend_from_slice(&chunk[..n]),
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "monitor channel read ended");
                break;
            }
        }
    }

    Ok(String::from_utf8_lossy(&collected).into_owned())
}

/// Monitor command for setting a breakpoint at an address.
pub fn breakpoint_command(addr: u64) -> String {
    format!("break *{addr:#x}")
}

/// Monitor command for a single instruction step.
pub fn step_command() -> String {
    "stepi".to_string()
}

/// Monitor command for reading a variable by name.
pub fn read_variable_command(name: &str) -> String {
    format!("print {name}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncBufReadExt;
    use tokio::net::TcpListener;

    #[test]
    fn test_command_formatting() {
        assert_eq!(breakpoint_command(0x0800_01F4), "break *0x80001f4");
        assert_eq!(step_command(), "stepi");
        assert_eq!(read_variable_command("counter"), "print counter");
    }

    #[tokio::test]
    async fn test_send_collects_reply_until_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut lines = tokio::io::BufReader::new(read_half).lines();
            let line = lines.next_line().await.unwrap().unwrap();
            let reply = format!("ack: {line}\n");
            write_half.write_all(reply.as_bytes()).await.unwrap();
            // Connection drops here, ending the client read.
        });

        let reply = send(port, "stepi", Duration::from_millis(500))
            .await
            .expect("send should succeed");
        assert_eq!(reply, "ack: stepi\n");
    }

    #[tokio::test]
    async fn test_send_returns_after_idle_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            // Say nothing and hold the connection open.
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });

        let started = tokio::time::Instant::now();
        let reply = send(port, "print x", Duration::from_millis(100))
            .await
            .expect("send should give up quietly");
        assert!(reply.is_empty());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_send_to_closed_port_is_an_io_error() {
        // Port 1 is essentially never listening.
        let err = send(1, "stepi", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "io");
    }
}
