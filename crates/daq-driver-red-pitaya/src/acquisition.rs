//! Polling acquisition over the ASCII data channel
//!
//! The IQ SCPI server streams samples through `OUTPUT:DATA?`. Every reply
//! has the shape `#<flag>{v,v,...}`:
//!
//! - flag `0`: the body carries data,
//! - flag `}`: nothing buffered yet (polling too fast),
//! - anything else, or a reply of two characters or fewer: the server's
//!   buffer overflowed and acquisition must be restarted.
//!
//! The two low bits of every sample are a tick tag that toggles at each
//! frame boundary. The acquisition counts frames by counting tick
//! transitions inside each data chunk (plus one for the frame in progress)
//! until `nb_measure` frames have been seen.
//!
//! # State machine
//!
//! ```text
//!   Idle ──start──▶ Acquiring ──target reached, stop──▶ Idle
//!                    │    ▲
//!      buffer fault, │    │ start
//!               stop ▼    │
//!                  Recovering
//! ```
//!
//! Recovery never resets the frame counter. The number of recoveries, the
//! number of polls and the wall-clock time are bounded by a [`RetryBudget`].

use crate::timing::{SINGLE_PULSE_SETTLE, START_SETTLE, STATUS_SETTLE, STOP_SETTLE};
use daq_core::scpi::ScpiOps;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Query that returns the next chunk of buffered samples.
pub const DATA_QUERY: &str = "OUTPUT:DATA?";

/// Raw ADC counts per volt-equivalent unit: `4 * 8192`.
pub const RAW_SCALE: f64 = 4.0 * 8192.0;

// =============================================================================
// Errors
// =============================================================================

#[derive(Error, Debug)]
pub enum AcquisitionError {
    /// Acquisition window is empty or reversed.
    #[error("Invalid acquisition window: start={start} stop={stop} samples")]
    InvalidWindow { start: i64, stop: i64 },

    /// Retry budget ran out before the frame target was reached.
    #[error(
        "Retry budget exhausted ({reason}) after {frames}/{target} frames, \
         {faults} buffer faults, {polls} polls"
    )]
    BudgetExhausted {
        reason: BudgetReason,
        frames: usize,
        target: usize,
        faults: u32,
        polls: u64,
    },

    /// Talking to the device failed while acquiring.
    #[error("Transport error during {stage}: {source}")]
    Transport {
        stage: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A derived view needs channels the current output mode doesn't produce.
    #[error("Channel {index} not available in mode {mode} ({available} channels)")]
    ChannelUnavailable {
        index: usize,
        mode: OutputMode,
        available: usize,
    },
}

impl AcquisitionError {
    pub(crate) fn transport(stage: &'static str, err: anyhow::Error) -> Self {
        AcquisitionError::Transport {
            stage,
            source: err.into(),
        }
    }
}

/// Which limit of the budget was hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetReason {
    BufferFaults,
    Polls,
    Deadline,
}

impl fmt::Display for BudgetReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BudgetReason::BufferFaults => "too many buffer faults",
            BudgetReason::Polls => "too many polls",
            BudgetReason::Deadline => "deadline passed",
        };
        f.write_str(label)
    }
}

// =============================================================================
// Output mode & status
// =============================================================================

/// Demodulation mode selected with `OUTPUT:SELECT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OutputMode {
    /// Raw ADC samples, both channels
    #[default]
    Adc,
    /// Demodulated I/Q of ADC channel 1
    IqCh1,
    /// Demodulated I/Q of ADC channel 2
    IqCh2,
    /// Low-pass filtered I/Q of both channels
    IqLp1,
    /// Integrated I/Q of both channels, one value per frame
    IqInt,
}

impl OutputMode {
    pub const ALL: [OutputMode; 5] = [
        OutputMode::Adc,
        OutputMode::IqCh1,
        OutputMode::IqCh2,
        OutputMode::IqLp1,
        OutputMode::IqInt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputMode::Adc => "ADC",
            OutputMode::IqCh1 => "IQCH1",
            OutputMode::IqCh2 => "IQCH2",
            OutputMode::IqLp1 => "IQLP1",
            OutputMode::IqInt => "IQINT",
        }
    }

    /// Number of interleaved channels in the sample stream.
    pub fn lanes(&self) -> usize {
        match self {
            OutputMode::Adc | OutputMode::IqCh1 | OutputMode::IqCh2 => 2,
            OutputMode::IqLp1 | OutputMode::IqInt => 4,
        }
    }

    /// 4-way modes sum over the trace and are normalized by its length.
    pub fn is_integrating(&self) -> bool {
        self.lanes() == 4
    }

    /// Labels of the channels, in stream order.
    pub fn channel_labels(&self) -> &'static [&'static str] {
        match self {
            OutputMode::Adc => &["CH1", "CH2"],
            OutputMode::IqCh1 => &["I1", "Q1"],
            OutputMode::IqCh2 => &["I2", "Q2"],
            OutputMode::IqLp1 | OutputMode::IqInt => &["I1", "Q1", "I2", "Q2"],
        }
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        OutputMode::ALL
            .into_iter()
            .find(|m| m.as_str() == trimmed)
            .ok_or_else(|| format!("unknown output mode '{}'", trimmed))
    }
}

/// Acquisition run state written as a bare `start`/`stop` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    Start,
    #[default]
    Stop,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Start => "start",
            Status::Stop => "stop",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "start" => Ok(Status::Start),
            "stop" => Ok(Status::Stop),
            other => Err(format!("unknown status '{}'", other)),
        }
    }
}

/// Encoding of `OUTPUT:DATA?` replies. Only ASCII is decoded here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataFormat {
    #[default]
    Ascii,
    Bin,
}

impl DataFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataFormat::Ascii => "ASCII",
            DataFormat::Bin => "BIN",
        }
    }
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "ASCII" => Ok(DataFormat::Ascii),
            "BIN" => Ok(DataFormat::Bin),
            other => Err(format!("unknown data format '{}'", other)),
        }
    }
}

/// Settle, then write the status command.
pub async fn write_status(client: &dyn ScpiOps, status: Status) -> anyhow::Result<()> {
    tokio::time::sleep(STATUS_SETTLE).await;
    client.write(status.as_str()).await
}

// =============================================================================
// Reply parsing
// =============================================================================

/// One decoded `OUTPUT:DATA?` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataReply {
    /// Flag `}`: nothing to read yet
    FastPolling,
    /// Data flag with an empty body
    Empty,
    /// Buffer overflow or malformed reply
    BufferFault(String),
    /// Samples of this chunk
    Samples(Vec<i32>),
}

/// Decode a data reply.
pub fn parse_data_reply(reply: &str) -> DataReply {
    let mut chars = reply.chars();
    let flag = chars.nth(1);

    if flag == Some('}') {
        return DataReply::FastPolling;
    }
    if flag != Some('0') || reply.len() <= 2 {
        return DataReply::BufferFault(reply.chars().take(16).collect());
    }

    // `#0{` ... `}`
    let body = match reply.get(3..reply.len().saturating_sub(1).max(3)) {
        Some(body) => body.trim(),
        None => return DataReply::BufferFault(reply.chars().take(16).collect()),
    };
    // the server may leave a comma after the last sample
    let body = body.strip_suffix(',').map_or(body, str::trim_end);
    if body.is_empty() {
        return DataReply::Empty;
    }

    let parsed: Result<Vec<i32>, _> = body.split(',').map(|v| v.trim().parse::<i32>()).collect();
    match parsed {
        Ok(samples) => DataReply::Samples(samples),
        Err(_) => DataReply::BufferFault(reply.chars().take(16).collect()),
    }
}

// =============================================================================
// Frame tracking
// =============================================================================

/// Indices `i` where the tick tag of sample `i + 1` differs from sample `i`.
pub fn tick_transitions(samples: &[i32]) -> Vec<usize> {
    samples
        .windows(2)
        .enumerate()
        .filter(|(_, pair)| (pair[0] & 0b11) != (pair[1] & 0b11))
        .map(|(i, _)| i)
        .collect()
}

/// Frame counter threaded through the polling loop.
#[derive(Debug, Clone, Default)]
pub struct FrameTracker {
    frames: usize,
    last_transitions: Vec<usize>,
}

impl FrameTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one data chunk; returns the frames it contributed.
    pub fn observe(&mut self, chunk: &[i32]) -> usize {
        self.last_transitions = tick_transitions(chunk);
        let added = self.last_transitions.len() + 1;
        self.frames += added;
        added
    }

    /// Frames counted so far.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Samples per frame, measured on the last chunk.
    ///
    /// Spacing of the first two transitions, or the first transition + 1 if
    /// the chunk had only one. `None` if the chunk had no transition.
    pub fn block_length(&self) -> Option<usize> {
        match self.last_transitions.as_slice() {
            [] => None,
            [only] => Some(only + 1),
            [first, second, ..] => Some(second - first),
        }
    }
}

// =============================================================================
// Retry budget
// =============================================================================

/// Limits of one acquisition call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryBudget {
    /// Buffer-fault recoveries allowed before giving up
    pub max_buffer_faults: u32,
    /// `OUTPUT:DATA?` polls allowed before giving up
    pub max_polls: u64,
    /// Wall-clock limit from the first poll
    pub deadline: Option<Duration>,
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self {
            max_buffer_faults: 10,
            max_polls: 100_000,
            deadline: Some(Duration::from_secs(60)),
        }
    }
}

/// Serialized form of [`RetryBudget`] used in instrument configs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_buffer_faults: u32,
    pub max_polls: u64,
    /// Seconds; `0` disables the deadline
    pub deadline_secs: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let budget = RetryBudget::default();
        Self {
            max_buffer_faults: budget.max_buffer_faults,
            max_polls: budget.max_polls,
            deadline_secs: budget.deadline.map(|d| d.as_secs_f64()).unwrap_or(0.0),
        }
    }
}

impl From<RetryConfig> for RetryBudget {
    fn from(cfg: RetryConfig) -> Self {
        let deadline = (cfg.deadline_secs.is_finite() && cfg.deadline_secs > 0.0)
            .then(|| Duration::from_secs_f64(cfg.deadline_secs));
        RetryBudget {
            max_buffer_faults: cfg.max_buffer_faults,
            max_polls: cfg.max_polls,
            deadline,
        }
    }
}

// =============================================================================
// Demultiplexing
// =============================================================================

/// Scaled channel data of one acquisition.
#[derive(Debug, Clone, PartialEq)]
pub struct Traces {
    mode: OutputMode,
    channels: Vec<Vec<f64>>,
}

impl Traces {
    /// Output mode the data was acquired in.
    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// Number of channels (2 or 4).
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Channel by stream index.
    pub fn channel(&self, index: usize) -> Result<&[f64], AcquisitionError> {
        self.channels
            .get(index)
            .map(Vec::as_slice)
            .ok_or(AcquisitionError::ChannelUnavailable {
                index,
                mode: self.mode,
                available: self.channels.len(),
            })
    }

    /// All channels.
    pub fn channels(&self) -> &[Vec<f64>] {
        &self.channels
    }

    pub fn into_channels(self) -> Vec<Vec<f64>> {
        self.channels
    }
}

/// Split the interleaved stream by lane and scale it.
///
/// 2-way modes are scaled by `1 / (4 * 8192)`; 4-way modes are additionally
/// divided by the single-trace sample count. A trailing partial group of
/// samples is dropped so every channel has the same length.
pub fn demultiplex(signal: &[i32], mode: OutputMode, single_trace: usize) -> Traces {
    let lanes = mode.lanes();
    let whole = signal.len() / lanes * lanes;
    if whole < signal.len() {
        tracing::warn!(
            mode = %mode,
            samples = signal.len(),
            dropped = signal.len() - whole,
            "Red Pitaya: stream length is not a multiple of the channel count"
        );
    }
    let signal = &signal[..whole];
    let norm = if mode.is_integrating() {
        RAW_SCALE * single_trace as f64
    } else {
        RAW_SCALE
    };

    let channels = (0..lanes)
        .map(|lane| {
            signal
                .iter()
                .skip(lane)
                .step_by(lanes)
                .map(|&v| f64::from(v) / norm)
                .collect()
        })
        .collect();

    Traces { mode, channels }
}

// =============================================================================
// Polling loop
// =============================================================================

/// Run state of the device as seen by the acquisition loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    Idle,
    Acquiring,
    Recovering,
}

/// Counters reported alongside the data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcquisitionStats {
    pub frames: usize,
    pub polls: u64,
    pub buffer_faults: u32,
    pub fast_polls: u64,
    pub samples: usize,
}

/// Collect at least `target_frames` frames of raw samples.
///
/// Starts the device, polls until enough frames have been seen, stops it,
/// drains one trailing reply and truncates overshoot to whole frames. The
/// device is in ASCII format on entry.
pub struct FramePoller<'a> {
    client: &'a dyn ScpiOps,
    budget: RetryBudget,
    state: AcquisitionState,
    tracker: FrameTracker,
    signal: Vec<i32>,
    stats: AcquisitionStats,
}

impl<'a> FramePoller<'a> {
    pub fn new(client: &'a dyn ScpiOps, budget: RetryBudget) -> Self {
        Self {
            client,
            budget,
            state: AcquisitionState::Idle,
            tracker: FrameTracker::new(),
            signal: Vec::new(),
            stats: AcquisitionStats::default(),
        }
    }

    /// Current state.
    pub fn state(&self) -> AcquisitionState {
        self.state
    }

    /// Run the loop. Returns the (truncated) raw signal.
    pub async fn collect(
        mut self,
        target_frames: usize,
    ) -> Result<(Vec<i32>, AcquisitionStats), AcquisitionError> {
        write_status(self.client, Status::Start)
            .await
            .map_err(|e| AcquisitionError::transport("start", e))?;
        self.state = AcquisitionState::Acquiring;
        tokio::time::sleep(START_SETTLE).await;

        let started = Instant::now();

        while self.tracker.frames() < target_frames {
            if let Some(reason) = self.budget_exceeded(started) {
                return Err(self.abort(reason, target_frames).await);
            }
            self.stats.polls += 1;

            let reply = match self.client.query(DATA_QUERY).await {
                Ok(reply) => reply,
                Err(e) => {
                    self.stop_best_effort().await;
                    return Err(AcquisitionError::transport("polling", e));
                }
            };

            match parse_data_reply(&reply) {
                DataReply::FastPolling => {
                    self.stats.fast_polls += 1;
                    tracing::warn!("Red Pitaya: fast polling, no data buffered yet");
                }
                DataReply::Empty => {
                    tracing::trace!("Red Pitaya: empty data reply");
                }
                DataReply::BufferFault(head) => {
                    self.stats.buffer_faults += 1;
                    tracing::warn!(
                        fault = self.stats.buffer_faults,
                        reply = %head,
                        frames = self.tracker.frames(),
                        "Red Pitaya: memory problem, restarting acquisition"
                    );
                    if self.stats.buffer_faults > self.budget.max_buffer_faults {
                        return Err(self.abort(BudgetReason::BufferFaults, target_frames).await);
                    }
                    self.recover().await?;
                }
                DataReply::Samples(chunk) => {
                    let added = self.tracker.observe(&chunk);
                    tracing::debug!(
                        samples = chunk.len(),
                        frames = added,
                        total = self.tracker.frames(),
                        "Red Pitaya: data chunk"
                    );
                    self.signal.extend_from_slice(&chunk);
                }
            }
        }

        self.finish().await?;

        if self.tracker.frames() > target_frames {
            match self.tracker.block_length() {
                Some(block) => self.signal.truncate(target_frames * block),
                None => tracing::warn!(
                    frames = self.tracker.frames(),
                    wanted = target_frames,
                    "Red Pitaya: no tick transition in last chunk, keeping overshoot"
                ),
            }
        }

        self.stats.frames = self.tracker.frames();
        self.stats.samples = self.signal.len();
        Ok((self.signal, self.stats))
    }

    /// Read the first frame of the first data chunk.
    ///
    /// Used for a quick look at one pulse: no frame counting, the device is
    /// stopped as soon as one chunk arrived.
    pub async fn collect_single(
        mut self,
    ) -> Result<(Vec<i32>, AcquisitionStats), AcquisitionError> {
        write_status(self.client, Status::Start)
            .await
            .map_err(|e| AcquisitionError::transport("start", e))?;
        self.state = AcquisitionState::Acquiring;
        tokio::time::sleep(SINGLE_PULSE_SETTLE).await;

        let started = Instant::now();
        let mut chunk = loop {
            if let Some(reason) = self.budget_exceeded(started) {
                return Err(self.abort(reason, 1).await);
            }
            self.stats.polls += 1;

            let reply = match self.client.query(DATA_QUERY).await {
                Ok(reply) => reply,
                Err(e) => {
                    self.stop_best_effort().await;
                    return Err(AcquisitionError::transport("single pulse", e));
                }
            };

            match parse_data_reply(&reply) {
                DataReply::Samples(chunk) => break chunk,
                DataReply::FastPolling => self.stats.fast_polls += 1,
                DataReply::Empty => {}
                DataReply::BufferFault(head) => {
                    self.stats.buffer_faults += 1;
                    tracing::warn!(reply = %head, "Red Pitaya: memory problem during single pulse");
                    if self.stats.buffer_faults > self.budget.max_buffer_faults {
                        return Err(self.abort(BudgetReason::BufferFaults, 1).await);
                    }
                    self.recover().await?;
                }
            }
        };

        write_status(self.client, Status::Stop)
            .await
            .map_err(|e| AcquisitionError::transport("stop", e))?;
        self.state = AcquisitionState::Idle;

        self.tracker.observe(&chunk);
        match self.tracker.block_length() {
            Some(block) => chunk.truncate(block),
            None => tracing::warn!(
                samples = chunk.len(),
                "Red Pitaya: no frame edge in single pulse chunk, keeping all samples"
            ),
        }

        self.stats.frames = 1;
        self.stats.samples = chunk.len();
        Ok((chunk, self.stats))
    }

    fn budget_exceeded(&self, started: Instant) -> Option<BudgetReason> {
        if self.stats.polls >= self.budget.max_polls {
            return Some(BudgetReason::Polls);
        }
        match self.budget.deadline {
            Some(deadline) if started.elapsed() >= deadline => Some(BudgetReason::Deadline),
            _ => None,
        }
    }

    async fn recover(&mut self) -> Result<(), AcquisitionError> {
        self.state = AcquisitionState::Recovering;
        write_status(self.client, Status::Stop)
            .await
            .map_err(|e| AcquisitionError::transport("recovery stop", e))?;
        write_status(self.client, Status::Start)
            .await
            .map_err(|e| AcquisitionError::transport("recovery start", e))?;
        self.state = AcquisitionState::Acquiring;
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), AcquisitionError> {
        tokio::time::sleep(STOP_SETTLE).await;
        write_status(self.client, Status::Stop)
            .await
            .map_err(|e| AcquisitionError::transport("stop", e))?;
        self.state = AcquisitionState::Idle;
        tokio::time::sleep(STOP_SETTLE).await;

        // Discard whatever the server buffered before it stopped
        if let Err(e) = self.client.query(DATA_QUERY).await {
            tracing::warn!("Red Pitaya: drain read failed: {:#}", e);
        }
        Ok(())
    }

    async fn stop_best_effort(&mut self) {
        if let Err(e) = write_status(self.client, Status::Stop).await {
            tracing::warn!("Red Pitaya: stop after failure also failed: {:#}", e);
        }
        self.state = AcquisitionState::Idle;
    }

    async fn abort(&mut self, reason: BudgetReason, target: usize) -> AcquisitionError {
        tracing::error!(
            %reason,
            frames = self.tracker.frames(),
            wanted = target,
            "Red Pitaya: giving up acquisition"
        );
        self.stop_best_effort().await;
        AcquisitionError::BudgetExhausted {
            reason,
            frames: self.tracker.frames(),
            target,
            faults: self.stats.buffer_faults,
            polls: self.stats.polls,
        }
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;

    fn frame(len: usize, tick: i32, value: i32) -> Vec<i32> {
        vec![value * 4 + tick; len]
    }

    #[test]
    fn reply_flags() {
        assert_eq!(parse_data_reply("#}"), DataReply::FastPolling);
        assert!(matches!(parse_data_reply("#1{4,8}"), DataReply::BufferFault(_)));
        assert!(matches!(parse_data_reply("#0"), DataReply::BufferFault(_)));
        assert!(matches!(parse_data_reply(""), DataReply::BufferFault(_)));
        assert!(matches!(parse_data_reply("#0{4,x}"), DataReply::BufferFault(_)));
        assert_eq!(parse_data_reply("#0{}"), DataReply::Empty);
        assert_eq!(parse_data_reply("#0{"), DataReply::Empty);
        assert_eq!(
            parse_data_reply("#0{4, -8,13}"),
            DataReply::Samples(vec![4, -8, 13])
        );
    }

    #[test]
    fn trailing_comma_is_accepted() {
        assert_eq!(parse_data_reply("#0{4,8,}"), DataReply::Samples(vec![4, 8]));
        assert_eq!(parse_data_reply("#0{4, 8, }"), DataReply::Samples(vec![4, 8]));
        assert_eq!(parse_data_reply("#0{,}"), DataReply::Empty);
        assert!(matches!(parse_data_reply("#0{4,,}"), DataReply::BufferFault(_)));
    }

    #[test]
    fn ragged_stream_is_cut_to_whole_groups() {
        let signal = vec![32768; 5];

        let traces = demultiplex(&signal, OutputMode::IqInt, 1);
        let lengths: Vec<usize> = traces.channels().iter().map(Vec::len).collect();
        assert_eq!(lengths, vec![1, 1, 1, 1]);

        let traces = demultiplex(&signal, OutputMode::Adc, 1);
        let lengths: Vec<usize> = traces.channels().iter().map(Vec::len).collect();
        assert_eq!(lengths, vec![2, 2]);
    }

    #[test]
    fn transitions_follow_tick_bits() {
        let mut chunk = frame(3, 1, 10);
        chunk.extend(frame(3, 2, 10));
        chunk.extend(frame(3, 1, -5));
        assert_eq!(tick_transitions(&chunk), vec![2, 5]);

        // value bits never count as a transition
        assert!(tick_transitions(&[4, 8, 12, -4]).is_empty());
    }

    #[test]
    fn tracker_counts_frames_and_block_length() {
        let mut tracker = FrameTracker::new();
        let mut chunk = frame(4, 1, 0);
        chunk.extend(frame(4, 2, 0));
        chunk.extend(frame(4, 1, 0));
        assert_eq!(tracker.observe(&chunk), 3);
        assert_eq!(tracker.block_length(), Some(4));

        assert_eq!(tracker.observe(&frame(4, 2, 0)), 1);
        assert_eq!(tracker.frames(), 4);
        assert_eq!(tracker.block_length(), None);

        let mut single = frame(6, 1, 0);
        single.extend(frame(2, 3, 0));
        tracker.observe(&single);
        assert_eq!(tracker.block_length(), Some(6));
    }

    #[test]
    fn truncation_yields_whole_frames() {
        let block = 5;
        let mut signal = Vec::new();
        for k in 0..7 {
            signal.extend(frame(block, 1 + (k % 2), k));
        }
        let mut tracker = FrameTracker::new();
        tracker.observe(&signal);
        assert_eq!(tracker.frames(), 7);

        let nb = 4;
        let len = tracker.block_length().unwrap();
        signal.truncate(nb * len);
        assert_eq!(signal.len() % block, 0);
        assert_eq!(signal.len(), nb * block);
    }

    #[test]
    fn adc_mode_splits_even_and_odd() {
        let signal: Vec<i32> = (0..8).map(|i| i * 4096).collect();
        let traces = demultiplex(&signal, OutputMode::Adc, 100);
        assert_eq!(traces.len(), 2);
        assert_eq!(traces.channel(0).unwrap(), &[0.0, 0.25, 0.5, 0.75]);
        assert_eq!(traces.channel(1).unwrap(), &[0.125, 0.375, 0.625, 0.875]);
        assert!(traces.channel(2).is_err());
    }

    #[test]
    fn iqint_mode_splits_four_ways_and_normalizes() {
        let n = 10;
        let signal = vec![32768 * n, 2 * 32768 * n, 3 * 32768 * n, 4 * 32768 * n, 0, 0, 0, 0];
        let traces = demultiplex(&signal, OutputMode::IqInt, n as usize);
        assert_eq!(traces.len(), 4);
        for lane in 0..4 {
            assert_eq!(traces.channel(lane).unwrap(), &[(lane + 1) as f64, 0.0]);
        }
    }

    #[test]
    fn budget_from_config() {
        let budget: RetryBudget = RetryConfig {
            max_buffer_faults: 3,
            max_polls: 50,
            deadline_secs: 0.0,
        }
        .into();
        assert_eq!(budget.deadline, None);
        assert_eq!(budget.max_buffer_faults, 3);

        let default: RetryBudget = RetryConfig::default().into();
        assert_eq!(default, RetryBudget::default());
    }

    #[test]
    fn mode_round_trip_and_lanes() {
        for mode in OutputMode::ALL {
            assert_eq!(mode.as_str().parse::<OutputMode>().unwrap(), mode);
        }
        assert_eq!(OutputMode::IqCh2.lanes(), 2);
        assert!(OutputMode::IqLp1.is_integrating());
        assert!("IQ".parse::<OutputMode>().is_err());
        assert_eq!("stop".parse::<Status>().unwrap(), Status::Stop);
    }
}
