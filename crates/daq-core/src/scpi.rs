//! SCPI over TCP communication helpers
//!
//! This module provides an async SCPI client shared by the instrument
//! drivers. Commands are newline-terminated text; queries read a single
//! reply line. The connection is exclusively owned by one driver and all
//! exchanges are strictly sequential (the stream sits behind a mutex).

use crate::error::DaqError;
use crate::parameter::Parameter;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

/// Default command timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Connection timeout in seconds
pub const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Line terminator appended to every command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminator {
    /// `\n`
    Lf,
    /// `\r\n`
    CrLf,
}

impl Terminator {
    /// The terminator bytes as text
    pub fn as_str(&self) -> &'static str {
        match self {
            Terminator::Lf => "\n",
            Terminator::CrLf => "\r\n",
        }
    }
}

// =============================================================================
// ScpiOps - transport seam
// =============================================================================

/// Request/response operations a driver needs from its SCPI transport.
///
/// Implemented by [`ScpiClient`] for real hardware and by each driver's
/// mock client for tests and `mock = true` configurations.
#[async_trait]
pub trait ScpiOps: Send + Sync {
    /// Send a command without expecting a response.
    async fn write(&self, command: &str) -> Result<()>;

    /// Send a query and return the trimmed reply line.
    async fn query(&self, query: &str) -> Result<String>;

    /// Query a floating-point value.
    async fn query_f64(&self, query: &str) -> Result<f64> {
        let response = self.query(query).await?;
        response.trim().parse::<f64>().with_context(|| {
            format!(
                "Failed to parse '{}' as f64 from query: {}",
                response, query
            )
        })
    }

    /// Query an integer value. Replies such as `100.000000` are accepted.
    async fn query_i64(&self, query: &str) -> Result<i64> {
        let response = self.query(query).await?;
        let trimmed = response.trim();
        if let Ok(value) = trimmed.parse::<i64>() {
            return Ok(value);
        }
        let value = trimmed.parse::<f64>().with_context(|| {
            format!(
                "Failed to parse '{}' as integer from query: {}",
                response, query
            )
        })?;
        Ok(value.round() as i64)
    }
}

// =============================================================================
// ScpiClient
// =============================================================================

/// Async SCPI client for TCP communication
pub struct ScpiClient {
    stream: Mutex<BufReader<TcpStream>>,
    terminator: Terminator,
    timeout: Duration,
}

impl ScpiClient {
    /// Create a new SCPI client connected to the specified host and port.
    ///
    /// # Arguments
    /// * `host` - Hostname or IP address
    /// * `port` - TCP port
    /// * `terminator` - Line terminator the instrument expects
    pub async fn connect(host: &str, port: u16, terminator: Terminator) -> Result<Self> {
        let stream = timeout(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            TcpStream::connect((host, port)),
        )
        .await
        .with_context(|| format!("Connection timeout to {}:{}", host, port))?
        .with_context(|| format!("Failed to connect to {}:{}", host, port))?;

        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;

        tracing::info!("Connected to SCPI server at {}:{}", host, port);

        Ok(Self {
            stream: Mutex::new(BufReader::new(stream)),
            terminator,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        })
    }

    /// Set the command timeout duration.
    pub fn set_timeout(&mut self, duration: Duration) {
        self.timeout = duration;
    }

    /// Clear any pending data from the input buffer.
    async fn flush_input_buffer(stream: &mut BufReader<TcpStream>) -> Result<()> {
        // Consume any data in BufReader's internal buffer
        {
            let buf = stream.buffer();
            if !buf.is_empty() {
                tracing::debug!("Flushing {} bytes from buffer", buf.len());
                let len = buf.len();
                stream.consume(len);
            }
        }

        // Try to read any pending data from the socket
        let mut discard = vec![0u8; 256];
        loop {
            match timeout(
                Duration::from_millis(10),
                stream.get_mut().peek(&mut discard),
            )
            .await
            {
                Ok(Ok(0)) | Err(_) => break,
                Ok(Ok(n)) => {
                    let mut consume_buf = vec![0u8; n];
                    match stream.get_mut().try_read(&mut consume_buf) {
                        Ok(read) => tracing::debug!("Flushed {} stale bytes from stream", read),
                        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                        Err(e) => {
                            tracing::debug!("Failed to flush stale bytes: {}", e);
                            break;
                        }
                    }
                }
                Ok(Err(e)) => {
                    tracing::debug!("Failed to peek input stream: {}", e);
                    break;
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl ScpiOps for ScpiClient {
    async fn write(&self, command: &str) -> Result<()> {
        let mut stream = self.stream.lock().await;

        let cmd = format!("{}{}", command, self.terminator.as_str());
        tracing::debug!("SCPI write: {:?}", truncate_for_log(command));

        stream
            .get_mut()
            .write_all(cmd.as_bytes())
            .await
            .with_context(|| format!("Failed to write command: {}", truncate_for_log(command)))?;

        stream
            .get_mut()
            .flush()
            .await
            .context("Failed to flush stream")?;

        // Small delay for command processing
        tokio::time::sleep(Duration::from_millis(10)).await;

        Ok(())
    }

    async fn query(&self, query: &str) -> Result<String> {
        let mut stream = self.stream.lock().await;

        Self::flush_input_buffer(&mut stream).await?;

        let cmd = format!("{}{}", query, self.terminator.as_str());
        tracing::debug!("SCPI query: {:?}", query);

        stream
            .get_mut()
            .write_all(cmd.as_bytes())
            .await
            .with_context(|| format!("Failed to write query: {}", query))?;

        stream
            .get_mut()
            .flush()
            .await
            .context("Failed to flush stream")?;

        let mut response = String::new();
        let result = timeout(self.timeout, stream.read_line(&mut response)).await;

        match result {
            Ok(Ok(0)) => anyhow::bail!("Connection closed by device"),
            Ok(Ok(_)) => {
                let trimmed = response.trim().to_string();
                tracing::debug!("SCPI response: {:?}", truncate_for_log(&trimmed));
                Ok(trimmed)
            }
            Ok(Err(e)) => Err(e).context("Failed to read response"),
            Err(_) => Err(DaqError::Timeout(query.to_string()).into()),
        }
    }
}

// =============================================================================
// Parameter binding
// =============================================================================

type Encoder<T> = Arc<dyn Fn(&T) -> Result<String, DaqError> + Send + Sync>;
type Decoder<T> = Arc<dyn Fn(&str) -> Result<T, DaqError> + Send + Sync>;

/// Conversion between a parameter's user value and its wire text.
pub struct WireCodec<T> {
    encode: Encoder<T>,
    decode: Decoder<T>,
    settle: Duration,
}

impl<T> Clone for WireCodec<T> {
    fn clone(&self) -> Self {
        Self {
            encode: self.encode.clone(),
            decode: self.decode.clone(),
            settle: self.settle,
        }
    }
}

impl<T: 'static> WireCodec<T> {
    /// Codec from an encoder (user value to wire text) and a decoder
    /// (reply text to user value).
    pub fn new(
        encode: impl Fn(&T) -> Result<String, DaqError> + Send + Sync + 'static,
        decode: impl Fn(&str) -> Result<T, DaqError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            encode: Arc::new(encode),
            decode: Arc::new(decode),
            settle: Duration::ZERO,
        }
    }

    /// Sleep this long before every write and after every read.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Encode a value for the wire.
    pub fn encode(&self, value: &T) -> Result<String, DaqError> {
        (self.encode)(value)
    }

    /// Decode a reply.
    pub fn decode(&self, reply: &str) -> Result<T, DaqError> {
        (self.decode)(reply)
    }
}

/// Parse a reply as a float.
pub fn decode_f64(reply: &str) -> Result<f64, DaqError> {
    reply
        .trim()
        .parse::<f64>()
        .map_err(|_| DaqError::Instrument(format!("expected a number, got '{}'", reply)))
}

/// Parse a reply as an integer; `100.000000` is accepted.
pub fn decode_i64(reply: &str) -> Result<i64, DaqError> {
    let trimmed = reply.trim();
    if let Ok(value) = trimmed.parse::<i64>() {
        return Ok(value);
    }
    decode_f64(trimmed).map(|v| v.round() as i64)
}

/// Map a transport error to the shared taxonomy, keeping typed errors.
pub fn to_daq_error(err: anyhow::Error) -> DaqError {
    match err.downcast::<DaqError>() {
        Ok(daq) => daq,
        Err(other) => DaqError::Instrument(format!("{:#}", other)),
    }
}

/// Connect a parameter to the instrument through its command template.
///
/// The set template (if any) becomes the hardware writer and the get
/// template (if any) the hardware reader.
pub fn bind_parameter<T>(param: &mut Parameter<T>, client: Arc<dyn ScpiOps>, codec: WireCodec<T>)
where
    T: Clone + Send + Sync + PartialEq + Debug + 'static,
{
    let command = param.metadata().command;

    if command.set.is_some() {
        let client = client.clone();
        let codec = codec.clone();
        param.connect_to_hardware_write(move |value: T| {
            let client = client.clone();
            let codec = codec.clone();
            Box::pin(async move {
                if !codec.settle.is_zero() {
                    tokio::time::sleep(codec.settle).await;
                }
                let cmd = command.render_set(&codec.encode(&value)?)?;
                client.write(&cmd).await.map_err(to_daq_error)
            })
        });
    }

    if let Some(query) = command.get {
        param.connect_to_hardware_read(move || {
            let client = client.clone();
            let codec = codec.clone();
            Box::pin(async move {
                let reply = client.query(query).await.map_err(to_daq_error)?;
                let value = codec.decode(&reply)?;
                if !codec.settle.is_zero() {
                    tokio::time::sleep(codec.settle).await;
                }
                Ok(value)
            })
        });
    }
}

/// LUT uploads and data replies can be tens of kilobytes; keep logs readable.
fn truncate_for_log(text: &str) -> String {
    const MAX: usize = 120;
    if text.len() <= MAX {
        return text.to_string();
    }
    let mut end = MAX;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... ({} bytes)", &text[..end], text.len())
}
