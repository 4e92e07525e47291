//! Byte links to the Arduino
//!
//! The Arduino sketch reads one ASCII digit per command from its serial
//! port. It is reached either through a TCP-to-serial bridge on the lab
//! network ([`TcpSerialBridge`]) or, with the `serial` feature, directly
//! over USB ([`SerialPortWriter`], 9600 8N1).

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// Connection timeout for the TCP bridge.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Single-call seam to whatever forwards codes to the Arduino.
#[async_trait]
pub trait SerialWrite: Send + Sync {
    /// Send one switch code.
    async fn serial_write(&self, code: u8) -> Result<()>;
}

/// Type-erased write half of a byte stream.
pub type DynWriter = Box<dyn AsyncWrite + Unpin + Send>;

/// Encode a code the way the sketch parses it: one ASCII digit.
pub fn encode_code(code: u8) -> Result<u8> {
    if code > 9 {
        anyhow::bail!("switch code {} does not fit in one digit", code);
    }
    Ok(b'0' + code)
}

/// Exclusive byte stream shared by the link types.
struct Link {
    stream: Mutex<DynWriter>,
    label: String,
}

impl Link {
    fn new(stream: DynWriter, label: String) -> Self {
        Self {
            stream: Mutex::new(stream),
            label,
        }
    }

    async fn send(&self, code: u8) -> Result<()> {
        let byte = encode_code(code)?;
        let mut stream = self.stream.lock().await;
        stream
            .write_all(&[byte])
            .await
            .with_context(|| format!("writing switch code {} to {}", code, self.label))?;
        stream.flush().await?;
        tracing::debug!(code, link = %self.label, "Switch code sent");
        Ok(())
    }
}

// =============================================================================
// TCP bridge
// =============================================================================

/// TCP client of the serial bridge that forwards bytes to the Arduino.
pub struct TcpSerialBridge {
    link: Link,
}

impl TcpSerialBridge {
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let addr = format!("{}:{}", host, port);
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr))
            .await
            .with_context(|| format!("Timed out connecting to serial bridge at {}", addr))?
            .with_context(|| format!("Failed to connect to serial bridge at {}", addr))?;
        stream.set_nodelay(true)?;

        tracing::info!("Connected to serial bridge at {}", addr);
        Ok(Self::with_stream(Box::new(stream), addr))
    }

    /// Wrap an already open stream (tests use `tokio::io::duplex`).
    pub fn with_stream(stream: DynWriter, label: impl Into<String>) -> Self {
        Self {
            link: Link::new(stream, label.into()),
        }
    }
}

#[async_trait]
impl SerialWrite for TcpSerialBridge {
    async fn serial_write(&self, code: u8) -> Result<()> {
        self.link.send(code).await
    }
}

// =============================================================================
// Direct serial port
// =============================================================================

/// Direct serial connection to the Arduino.
#[cfg(feature = "serial")]
pub struct SerialPortWriter {
    link: Link,
}

#[cfg(feature = "serial")]
impl SerialPortWriter {
    /// Open `port_path` at 9600 baud, 8N1, no flow control.
    pub async fn open(port_path: &str) -> Result<Self> {
        use tokio_serial::SerialPortBuilderExt;

        let port_path_owned = port_path.to_string();
        let port = tokio::task::spawn_blocking(move || {
            tokio_serial::new(&port_path_owned, 9600)
                .data_bits(tokio_serial::DataBits::Eight)
                .parity(tokio_serial::Parity::None)
                .stop_bits(tokio_serial::StopBits::One)
                .flow_control(tokio_serial::FlowControl::None)
                .open_native_async()
                .context(format!(
                    "Failed to open switch controller serial port: {}",
                    port_path_owned
                ))
        })
        .await
        .context("spawn_blocking for switch controller port opening failed")??;

        tracing::info!("Opened switch controller serial port {}", port_path);
        Ok(Self {
            link: Link::new(Box::new(port), port_path.to_string()),
        })
    }
}

#[cfg(feature = "serial")]
#[async_trait]
impl SerialWrite for SerialPortWriter {
    async fn serial_write(&self, code: u8) -> Result<()> {
        self.link.send(code).await
    }
}

// =============================================================================
// Mock
// =============================================================================

/// Records every code instead of sending it.
#[derive(Default)]
pub struct MockSerial {
    codes: Mutex<Vec<u8>>,
}

impl MockSerial {
    pub fn new() -> Self {
        Self::default()
    }

    /// Codes written so far, oldest first.
    pub async fn codes(&self) -> Vec<u8> {
        self.codes.lock().await.clone()
    }
}

#[async_trait]
impl SerialWrite for MockSerial {
    async fn serial_write(&self, code: u8) -> Result<()> {
        tracing::debug!(code, "Mock switch code");
        self.codes.lock().await.push(code);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[test]
    fn codes_are_single_ascii_digits() {
        assert_eq!(encode_code(6).unwrap(), b'6');
        assert_eq!(encode_code(4).unwrap(), b'4');
        assert!(encode_code(12).is_err());
    }

    #[tokio::test]
    async fn bridge_writes_one_byte_per_code() -> Result<()> {
        let (mut host, device) = tokio::io::duplex(16);
        let bridge = TcpSerialBridge::with_stream(Box::new(device), "duplex");

        bridge.serial_write(7).await?;
        bridge.serial_write(5).await?;

        let mut buf = [0u8; 2];
        host.read_exact(&mut buf).await?;
        assert_eq!(&buf, b"75");
        Ok(())
    }

    #[tokio::test]
    async fn bridge_connects_over_tcp() -> Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await?;
            let mut buf = [0u8; 1];
            socket.read_exact(&mut buf).await?;
            Ok::<u8, std::io::Error>(buf[0])
        });

        let bridge = TcpSerialBridge::connect("127.0.0.1", addr.port()).await?;
        bridge.serial_write(6).await?;

        assert_eq!(server.await??, b'6');
        Ok(())
    }

    #[tokio::test]
    async fn mock_records_codes() -> Result<()> {
        let mock = MockSerial::new();
        mock.serial_write(4).await?;
        mock.serial_write(5).await?;
        assert_eq!(mock.codes().await, vec![4, 5]);
        Ok(())
    }
}
