//! Simulated IQ SCPI server
//!
//! `MockRedPitaya` answers the same commands as the board: settings are
//! stored and echoed back, lookup tables are decoded and kept, and while
//! running every `OUTPUT:DATA?` returns a few tick-framed frames. Replies can
//! be scripted ahead of the generated data to simulate buffer faults, fast
//! polling or transport failures.

use crate::acquisition::{OutputMode, DATA_QUERY};
use anyhow::Result;
use async_trait::async_trait;
use daq_core::scpi::{decode_i64, ScpiOps};
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;

/// Per-lane value codes; physical value is `code / 8192`.
const LANE_CODES: [i32; 4] = [4096, -2048, 1024, 512];

#[derive(Debug, Clone)]
enum ScriptedReply {
    Text(String),
    Failure(String),
}

#[derive(Debug)]
struct MockState {
    settings: HashMap<String, String>,
    running: bool,
    frame_index: u64,
    frames_per_poll: usize,
    scripted: VecDeque<ScriptedReply>,
    writes: Vec<String>,
    queries: Vec<String>,
    tables: HashMap<String, Vec<i64>>,
}

/// Mock SCPI client for testing without hardware
pub struct MockRedPitaya {
    state: Mutex<MockState>,
}

impl Default for MockRedPitaya {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRedPitaya {
    /// Create a mock with a 100-sample ADC window in `ADC` mode.
    pub fn new() -> Self {
        let settings = [
            ("FILTER:FREQ", "1000000"),
            ("FILTER:DEC", "100"),
            ("ADC:STARTPOS", "0"),
            ("ADC:STOPPOS", "100"),
            ("DAC:STOPPOS", "8192"),
            ("PERIOD", "12500"),
            ("OUTPUT:SELECT", "ADC"),
            ("OUTPUT:FORMAT", "ASCII"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            state: Mutex::new(MockState {
                settings,
                running: false,
                frame_index: 0,
                frames_per_poll: 3,
                scripted: VecDeque::new(),
                writes: Vec::new(),
                queries: Vec::new(),
                tables: HashMap::new(),
            }),
        }
    }

    /// Number of frames generated per `OUTPUT:DATA?` while running.
    pub fn with_frames_per_poll(mut self, frames: usize) -> Self {
        self.state.get_mut().frames_per_poll = frames.max(1);
        self
    }

    /// Queue a raw data reply, returned before any generated data.
    pub async fn push_reply(&self, reply: impl Into<String>) {
        self.state
            .lock()
            .await
            .scripted
            .push_back(ScriptedReply::Text(reply.into()));
    }

    /// Queue `count` buffer-fault replies.
    pub async fn inject_buffer_faults(&self, count: usize) {
        let mut state = self.state.lock().await;
        for _ in 0..count {
            state.scripted.push_back(ScriptedReply::Text("#1{}".to_string()));
        }
    }

    /// Queue a transport failure for the next data query.
    pub async fn inject_transport_error(&self, message: impl Into<String>) {
        self.state
            .lock()
            .await
            .scripted
            .push_back(ScriptedReply::Failure(message.into()));
    }

    /// Every command written so far, in order.
    pub async fn writes(&self) -> Vec<String> {
        self.state.lock().await.writes.clone()
    }

    /// Every query received so far, in order.
    pub async fn queries(&self) -> Vec<String> {
        self.state.lock().await.queries.clone()
    }

    /// Decoded codes of a table, e.g. `DAC:CH1` or `Q:CH2`.
    pub async fn table(&self, name: &str) -> Option<Vec<i64>> {
        self.state.lock().await.tables.get(name).cloned()
    }

    /// Stored value of a setting, e.g. `OUTPUT:SELECT`.
    pub async fn setting(&self, header: &str) -> Option<String> {
        self.state.lock().await.settings.get(header).cloned()
    }

    /// True between `start` and `stop`.
    pub async fn is_running(&self) -> bool {
        self.state.lock().await.running
    }

    async fn handle_write(&self, command: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.writes.push(command.to_string());

        match command.trim() {
            "start" => {
                state.running = true;
                return Ok(());
            }
            "stop" => {
                state.running = false;
                return Ok(());
            }
            _ => {}
        }

        let Some((header, value)) = command.trim().split_once(' ') else {
            anyhow::bail!("Mock Red Pitaya: malformed command '{}'", command);
        };

        match header {
            "DAC:CH1" | "DAC:CH2" | "I:CH1" | "Q:CH1" | "I:CH2" | "Q:CH2" => {
                let codes = value
                    .split(',')
                    .map(|c| c.trim().parse::<i64>())
                    .collect::<Result<Vec<_>, _>>()?;
                state.tables.insert(header.to_string(), codes);
            }
            _ => {
                state
                    .settings
                    .insert(header.to_string(), value.trim().to_string());
            }
        }
        Ok(())
    }

    async fn handle_query(&self, query: &str) -> Result<String> {
        let mut state = self.state.lock().await;
        state.queries.push(query.to_string());

        match query.trim() {
            "*IDN?" => Ok("REDPITAYA,IQ-SCPI,MOCK,1.0".to_string()),
            DATA_QUERY => {
                if let Some(scripted) = state.scripted.pop_front() {
                    return match scripted {
                        ScriptedReply::Text(text) => Ok(text),
                        ScriptedReply::Failure(msg) => Err(anyhow::anyhow!(msg)),
                    };
                }
                if !state.running {
                    return Ok("#0{}".to_string());
                }
                Ok(state.next_chunk())
            }
            "OUTPUT:DATASIZE?" => {
                let size = if state.running {
                    state.block_length() * state.frames_per_poll
                } else {
                    0
                };
                Ok(size.to_string())
            }
            other => {
                let header = other.trim_end_matches('?');
                state
                    .settings
                    .get(header)
                    .cloned()
                    .ok_or_else(|| anyhow::anyhow!("Unknown mock query: {}", query))
            }
        }
    }
}

impl MockState {
    fn mode(&self) -> OutputMode {
        self.settings
            .get("OUTPUT:SELECT")
            .and_then(|m| m.parse().ok())
            .unwrap_or_default()
    }

    fn single_trace(&self) -> i64 {
        let read = |key: &str| {
            self.settings
                .get(key)
                .and_then(|v| decode_i64(v).ok())
                .unwrap_or(0)
        };
        (read("ADC:STOPPOS") - read("ADC:STARTPOS")).max(1)
    }

    fn block_length(&self) -> usize {
        let mode = self.mode();
        if mode.is_integrating() {
            mode.lanes()
        } else {
            mode.lanes() * self.single_trace() as usize
        }
    }

    fn next_chunk(&mut self) -> String {
        let mode = self.mode();
        let lanes = mode.lanes();
        let block = self.block_length();
        let weight = if mode.is_integrating() {
            self.single_trace() as i32
        } else {
            1
        };

        let mut samples = Vec::with_capacity(block * self.frames_per_poll);
        for _ in 0..self.frames_per_poll {
            let tick = 1 + (self.frame_index % 2) as i32;
            for j in 0..block {
                let code = LANE_CODES[j % lanes] * weight;
                samples.push((code * 4 + tick).to_string());
            }
            self.frame_index += 1;
        }
        format!("#0{{{}}}", samples.join(","))
    }
}

#[async_trait]
impl ScpiOps for MockRedPitaya {
    async fn write(&self, command: &str) -> Result<()> {
        tracing::debug!("Mock Red Pitaya write: {:.80}", command);
        self.handle_write(command).await
    }

    async fn query(&self, query: &str) -> Result<String> {
        tracing::debug!("Mock Red Pitaya query: {}", query);
        self.handle_query(query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::{parse_data_reply, tick_transitions, DataReply};

    #[tokio::test]
    async fn stores_settings_and_tables() {
        let mock = MockRedPitaya::new();
        mock.write("OUTPUT:SELECT IQINT").await.unwrap();
        assert_eq!(mock.query("OUTPUT:SELECT?").await.unwrap(), "IQINT");

        mock.write("DAC:CH2 4, -8, 1").await.unwrap();
        assert_eq!(mock.table("DAC:CH2").await, Some(vec![4, -8, 1]));
        assert!(mock.query("BOGUS?").await.is_err());
    }

    #[tokio::test]
    async fn generates_tick_framed_chunks_while_running() {
        let mock = MockRedPitaya::new();
        assert_eq!(mock.query(DATA_QUERY).await.unwrap(), "#0{}");

        mock.write("start").await.unwrap();
        let DataReply::Samples(chunk) = parse_data_reply(&mock.query(DATA_QUERY).await.unwrap())
        else {
            panic!("expected samples");
        };
        // 3 frames of 2 x 100 samples
        assert_eq!(chunk.len(), 600);
        assert_eq!(tick_transitions(&chunk), vec![199, 399]);
    }

    #[tokio::test]
    async fn scripted_replies_come_first() {
        let mock = MockRedPitaya::new();
        mock.write("start").await.unwrap();
        mock.inject_buffer_faults(1).await;
        mock.inject_transport_error("socket closed").await;

        assert_eq!(mock.query(DATA_QUERY).await.unwrap(), "#1{}");
        assert!(mock.query(DATA_QUERY).await.is_err());
        assert!(mock.query(DATA_QUERY).await.unwrap().starts_with("#0{"));
    }
}
