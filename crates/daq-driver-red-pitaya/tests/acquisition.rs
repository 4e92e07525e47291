//! Full acquisitions against the simulated IQ server.

use daq_core::capabilities::{TraceProducer, WaveformGenerator};
use daq_driver_red_pitaya::acquisition::BudgetReason;
use daq_driver_red_pitaya::{
    AcquisitionError, MockRedPitaya, OutputMode, RedPitayaDriver, RetryBudget, Traces, View,
    ViewValue,
};
use std::sync::Arc;

fn driver_with(mock: MockRedPitaya) -> (Arc<MockRedPitaya>, RedPitayaDriver) {
    let mock = Arc::new(mock);
    let driver = RedPitayaDriver::with_client(mock.clone());
    (mock, driver)
}

fn assert_all_close(values: &[f64], expected: f64) {
    for v in values {
        assert!((v - expected).abs() < 1e-3, "{} != {}", v, expected);
    }
}

fn lane_lengths(traces: &Traces) -> Vec<usize> {
    traces.channels().iter().map(Vec::len).collect()
}

async fn count(mock: &MockRedPitaya, command: &str) -> usize {
    mock.writes()
        .await
        .iter()
        .filter(|w| w.as_str() == command)
        .count()
}

#[tokio::test(start_paused = true)]
async fn adc_mode_truncates_overshoot_to_whole_frames() {
    let (mock, driver) = driver_with(MockRedPitaya::new());
    driver.nb_measure().set(5).await.unwrap();

    let traces = driver.get_data().await.unwrap();

    // 100-sample window, two interleaved channels
    assert_eq!(traces.mode(), OutputMode::Adc);
    assert_eq!(traces.len(), 2);
    assert_eq!(traces.channel(0).unwrap().len(), 500);
    assert_eq!(traces.channel(1).unwrap().len(), 500);
    assert_all_close(traces.channel(0).unwrap(), 0.5);
    assert_all_close(traces.channel(1).unwrap(), -0.25);

    assert!(!mock.is_running().await);
    let writes = mock.writes().await;
    assert_eq!(writes.first().map(String::as_str), Some("OUTPUT:FORMAT ASCII"));
    assert_eq!(writes.last().map(String::as_str), Some("stop"));
}

#[tokio::test(start_paused = true)]
async fn exact_frame_count_keeps_everything() {
    let (_mock, driver) = driver_with(MockRedPitaya::new().with_frames_per_poll(1));
    driver.nb_measure().set(3).await.unwrap();

    let traces = driver.get_data().await.unwrap();
    assert_eq!(traces.channel(0).unwrap().len(), 300);
}

#[tokio::test(start_paused = true)]
async fn integrated_mode_normalizes_by_trace_length() {
    let (_mock, driver) = driver_with(MockRedPitaya::new());
    driver.mode_output().set(OutputMode::IqInt).await.unwrap();
    driver.start_adc().set(0.0).await.unwrap();
    driver.stop_adc().set(800e-9).await.unwrap();
    driver.nb_measure().set(4).await.unwrap();

    let traces = driver.get_data().await.unwrap();
    assert_eq!(traces.len(), 4);
    for (lane, expected) in [0.5, -0.25, 0.125, 0.0625].into_iter().enumerate() {
        let channel = traces.channel(lane).unwrap();
        assert_eq!(channel.len(), 4);
        assert_all_close(channel, expected);
    }

    match driver.view(View::I2IntAvg).await.unwrap() {
        ViewValue::Scalar(v) => assert!((v - 0.125).abs() < 1e-3),
        other => panic!("unexpected view value {:?}", other),
    }
    match driver.view(View::IqIntAll).await.unwrap() {
        ViewValue::Matrix(rows) => assert_eq!(rows.len(), 4),
        other => panic!("unexpected view value {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn empty_window_in_integrated_mode_fails_before_start() {
    let (mock, driver) = driver_with(MockRedPitaya::new());
    driver.mode_output().set(OutputMode::IqLp1).await.unwrap();
    driver.start_adc().set(800e-9).await.unwrap();
    driver.stop_adc().set(800e-9).await.unwrap();

    let err = driver.get_data().await.unwrap_err();
    assert!(matches!(
        err,
        AcquisitionError::InvalidWindow {
            start: 100,
            stop: 100
        }
    ));
    assert_eq!(count(&mock, "start").await, 0);
}

#[tokio::test(start_paused = true)]
async fn buffer_faults_restart_without_losing_frames() {
    let (mock, driver) = driver_with(MockRedPitaya::new());
    driver.nb_measure().set(3).await.unwrap();
    mock.inject_buffer_faults(2).await;
    mock.push_reply("#}").await;
    mock.push_reply("#0{}").await;

    let traces = driver.get_data().await.unwrap();
    assert_eq!(traces.channel(0).unwrap().len(), 300);

    // initial start plus one per recovery
    assert_eq!(count(&mock, "start").await, 3);
    assert_eq!(count(&mock, "stop").await, 3);
}

#[tokio::test(start_paused = true)]
async fn too_many_buffer_faults_exhaust_the_budget() {
    let (mock, driver) = driver_with(MockRedPitaya::new());
    mock.inject_buffer_faults(5).await;

    let budget = RetryBudget {
        max_buffer_faults: 2,
        ..RetryBudget::default()
    };
    let err = driver.get_data_with(budget).await.unwrap_err();

    match err {
        AcquisitionError::BudgetExhausted {
            reason,
            faults,
            frames,
            ..
        } => {
            assert_eq!(reason, BudgetReason::BufferFaults);
            assert_eq!(faults, 3);
            assert_eq!(frames, 0);
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(!mock.is_running().await);
}

#[tokio::test(start_paused = true)]
async fn endless_fast_polling_hits_the_poll_limit() {
    let (mock, driver) = driver_with(MockRedPitaya::new());
    for _ in 0..20 {
        mock.push_reply("#}").await;
    }

    let budget = RetryBudget {
        max_polls: 10,
        ..RetryBudget::default()
    };
    let err = driver.get_data_with(budget).await.unwrap_err();
    assert!(matches!(
        err,
        AcquisitionError::BudgetExhausted {
            reason: BudgetReason::Polls,
            polls: 10,
            ..
        }
    ));
    assert!(!mock.is_running().await);
}

#[tokio::test(start_paused = true)]
async fn transport_failure_is_classified_and_stops_the_board() {
    let (mock, driver) = driver_with(MockRedPitaya::new());
    mock.inject_transport_error("connection reset").await;

    let err = driver.get_data().await.unwrap_err();
    assert!(matches!(
        err,
        AcquisitionError::Transport {
            stage: "polling",
            ..
        }
    ));
    assert!(err.to_string().contains("connection reset"));
    assert!(!mock.is_running().await);
}

#[tokio::test(start_paused = true)]
async fn single_pulse_returns_one_unnormalized_frame() {
    let (mock, driver) = driver_with(MockRedPitaya::new());

    let traces = driver.get_single_pulse().await.unwrap();
    assert_eq!(traces.channel(0).unwrap().len(), 100);
    assert_all_close(traces.channel(1).unwrap(), -0.25);
    assert!(!mock.is_running().await);

    driver.mode_output().set(OutputMode::IqInt).await.unwrap();
    let traces = driver.get_single_pulse().await.unwrap();
    assert_eq!(traces.len(), 4);
    // integrated over 100 samples, not divided back
    assert_all_close(traces.channel(0).unwrap(), 50.0);
}

#[tokio::test(start_paused = true)]
async fn single_pulse_in_iq_channel_mode_is_two_way() {
    let (_mock, driver) = driver_with(MockRedPitaya::new());
    driver.mode_output().set(OutputMode::IqCh1).await.unwrap();

    let traces = driver.get_single_pulse().await.unwrap();
    assert_eq!(traces.mode(), OutputMode::IqCh1);
    assert_eq!(traces.len(), 2);
    assert!(!traces.channel(0).unwrap().is_empty());
    assert_eq!(
        traces.channel(0).unwrap().len(),
        traces.channel(1).unwrap().len()
    );
}

#[tokio::test(start_paused = true)]
async fn ragged_integrated_chunk_yields_equal_lanes() {
    let (mock, driver) = driver_with(MockRedPitaya::new());
    driver.mode_output().set(OutputMode::IqInt).await.unwrap();
    driver.nb_measure().set(1).await.unwrap();

    mock.push_reply("#0{5,5,5,5,5}").await;
    let traces = driver.get_data().await.unwrap();
    assert_eq!(lane_lengths(&traces), vec![1, 1, 1, 1]);

    mock.push_reply("#0{5,5,5,5,5}").await;
    match driver.view(View::IqIntAll).await.unwrap() {
        ViewValue::Matrix(rows) => assert_eq!(rows.len(), 1),
        other => panic!("unexpected view value {:?}", other),
    }

    mock.push_reply("#0{5,5,5,5,5,5,5,}").await;
    match driver.view(View::AdcPower).await.unwrap() {
        ViewValue::Vector(power) => assert_eq!(power.len(), 2),
        other => panic!("unexpected view value {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn ragged_adc_chunk_yields_equal_channels() {
    let (mock, driver) = driver_with(MockRedPitaya::new());
    mock.push_reply("#0{4,4,4}").await;

    let traces = driver.get_data().await.unwrap();
    assert_eq!(traces.channel(0).unwrap().len(), 1);
    assert_eq!(traces.channel(1).unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn capability_traits_drive_the_board() {
    let (mock, driver) = driver_with(MockRedPitaya::new());
    driver.mode_output().set(OutputMode::IqCh2).await.unwrap();
    driver.nb_measure().set(2).await.unwrap();

    let producer: &dyn TraceProducer = &driver;
    assert_eq!(producer.channel_labels().await.unwrap(), vec!["I2", "Q2"]);
    let channels = producer.read_traces().await.unwrap();
    assert_eq!(channels.len(), 2);
    assert_eq!(channels[0].len(), 200);

    let generator: &dyn WaveformGenerator = &driver;
    let written = generator
        .load_waveform("STEP", &[1.0, 80e-9, 16e-9, 8e-9], "CH1", "CH1")
        .await
        .unwrap();
    assert_eq!(written, 15);

    let codes = mock.table("DAC:CH1").await.unwrap();
    assert_eq!(codes.len(), 15);
    assert_eq!(codes[0], 1);
    assert_eq!(codes.iter().max(), Some(&(8192 * 4 + 1)));
}

#[tokio::test(start_paused = true)]
async fn reset_drains_one_reply() {
    let (mock, driver) = driver_with(MockRedPitaya::new());
    mock.push_reply("ERR!").await;
    assert_eq!(driver.reset().await.unwrap(), "ERR!");
    assert_eq!(driver.reset().await.unwrap(), "#0{}");
}
