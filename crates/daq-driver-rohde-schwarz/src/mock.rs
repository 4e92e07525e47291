use anyhow::Result;
use async_trait::async_trait;
use daq_core::scpi::ScpiOps;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// In-memory SMB100A: stores every set command and answers the matching
/// query with the stored value (unit suffix stripped).
pub struct MockSmb100a {
    settings: Mutex<HashMap<String, String>>,
    writes: Mutex<Vec<String>>,
    queries: Mutex<Vec<String>>,
}

impl Default for MockSmb100a {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSmb100a {
    pub fn new() -> Self {
        let settings = [
            ("frequency", "1000000000.0"),
            ("power", "-30.0"),
            ("phase", "0.0"),
            ("output", "0"),
            ("FREQ:START", "100000.0"),
            ("FREQ:STOP", "20000000000.0"),
            ("SWE:STEP", "1000000.0"),
            ("SWE:POIN", "101"),
            ("SWE:DWEL", "0.01"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            settings: Mutex::new(settings),
            writes: Mutex::new(Vec::new()),
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Every command written so far.
    pub async fn writes(&self) -> Vec<String> {
        self.writes.lock().await.clone()
    }

    /// Every query received so far.
    pub async fn queries(&self) -> Vec<String> {
        self.queries.lock().await.clone()
    }
}

fn strip_unit(value: &str) -> &str {
    value
        .strip_suffix("Hz")
        .or_else(|| value.strip_suffix('s'))
        .unwrap_or(value)
}

#[async_trait]
impl ScpiOps for MockSmb100a {
    async fn write(&self, command: &str) -> Result<()> {
        tracing::debug!("Mock SMB100A write: {}", command);
        self.writes.lock().await.push(command.to_string());

        let Some((header, value)) = command.trim().split_once(' ') else {
            anyhow::bail!("Mock SMB100A: malformed command '{}'", command);
        };
        self.settings
            .lock()
            .await
            .insert(header.to_string(), strip_unit(value.trim()).to_string());
        Ok(())
    }

    async fn query(&self, query: &str) -> Result<String> {
        tracing::debug!("Mock SMB100A query: {}", query);
        self.queries.lock().await.push(query.to_string());
        if query == "*IDN?" {
            return Ok("Rohde&Schwarz,SMB100A,MOCK,3.1.18.2".to_string());
        }
        let header = query.trim().trim_end_matches('?');
        self.settings
            .lock()
            .await
            .get(header)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Unknown mock query: {}", query))
    }
}
