//! Connection lifecycle scenarios over the in-memory transport

mod common;

use common::{configure_acks, fast_config, rec_line, wait_until};
use gaze_link::protocol::{MessageKind, commands};
use gaze_link::transport::{MockConnector, MockTransport};
use gaze_link::{ConnectionState, GazeClient};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(3);

fn client_with(connector: &MockConnector) -> GazeClient {
    GazeClient::new(fast_config(), Box::new(connector.clone())).unwrap()
}

fn collect_counters(client: &mut GazeClient, expected: usize) -> Vec<u64> {
    let mut counters = Vec::new();
    wait_until(WAIT, || {
        counters.extend(client.drain_available().iter().filter_map(|s| s.counter()));
        counters.len() >= expected
    });
    counters
}

#[test]
fn test_connect_sends_enable_sequence() {
    let connector = MockConnector::new();
    let link = MockTransport::with_auto_ack();
    connector.push(link.clone());

    let mut client = client_with(&connector);
    client.connect().unwrap();
    assert!(wait_until(WAIT, || client.stats().acks_matched == configure_acks()));
    assert_eq!(client.state(), ConnectionState::Connected);

    let mut expected = vec![commands::ENABLE_SEND_DATA.to_string()];
    expected.extend(commands::DEFAULT_ENABLED_FIELDS.iter().map(|f| f.to_string()));
    assert_eq!(link.written_ids(), expected);

    client.disconnect();
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(link.is_closed());
}

#[test]
fn test_unsolicited_ack_is_ignored() {
    let connector = MockConnector::new();
    let link = MockTransport::with_auto_ack();
    link.inject_line("<ACK ID=\"CALIBRATE_START\" STATE=\"1\" />");
    connector.push(link.clone());

    let mut client = client_with(&connector);
    client.connect().unwrap();
    assert!(wait_until(WAIT, || client.stats().acks_matched == configure_acks()));

    let stats = client.stats();
    assert_eq!(stats.acks_unmatched, 1);
    assert_eq!(stats.reconnects, 0);
    assert_eq!(client.state(), ConnectionState::Connected);
    assert!(client.drain_available().is_empty());

    // A real request for the same id still works afterwards
    let ack = client
        .send_command(&commands::calibrate_start(true))
        .unwrap()
        .wait()
        .unwrap();
    assert_eq!(ack.kind(), MessageKind::Ack);
    assert_eq!(ack.id(), Some("CALIBRATE_START"));
}

#[test]
fn test_partial_line_is_cleared_on_reconnect() {
    let connector = MockConnector::new();
    let first = MockTransport::with_auto_ack();
    let second = MockTransport::with_auto_ack();
    // Continuation of the fragment the first link died with
    second.inject_read(b"5\" BPOGY=\"0.5\" BPOGV=\"1\" />\r\n");
    second.inject_line(&rec_line(5, 0.5, 0.5));
    connector.push(first.clone());
    connector.push(second.clone());

    let mut client = client_with(&connector);
    client.connect().unwrap();
    assert!(wait_until(WAIT, || client.stats().acks_matched == configure_acks()));

    let mut chunk = String::new();
    for n in 1..=3 {
        chunk.push_str(&rec_line(n, 0.5, 0.5));
        chunk.push_str("\r\n");
    }
    chunk.push_str("<REC CNT=\"4\" BPOGX=\"0.");
    first.inject_read(chunk.as_bytes());
    first.close_when_drained();

    let counters = collect_counters(&mut client, 4);
    assert_eq!(counters, vec![1, 2, 3, 5]);

    let stats = client.stats();
    assert_eq!(stats.reconnects, 1);
    assert_eq!(stats.malformed_lines, 1);
    assert_eq!(client.state(), ConnectionState::Connected);
}

#[test]
fn test_retries_until_tracker_appears() {
    let connector = MockConnector::new();
    let mut client = client_with(&connector);
    client.connect().unwrap();

    assert!(wait_until(WAIT, || connector.attempts() >= 3));
    assert_ne!(client.state(), ConnectionState::Connected);

    let link = MockTransport::with_auto_ack();
    connector.push(link.clone());
    assert!(wait_until(WAIT, || client.state() == ConnectionState::Connected));
    assert!(wait_until(WAIT, || client.stats().acks_matched == configure_acks()));

    link.inject_line(&rec_line(1, 0.25, 0.75));
    assert_eq!(collect_counters(&mut client, 1), vec![1]);
}

#[test]
fn test_missing_enable_ack_triggers_reconnect() {
    let connector = MockConnector::new();
    let stubborn = MockTransport::with_auto_ack();
    stubborn.silence_ack("ENABLE_SEND_POG_FIX");
    let healthy = MockTransport::with_auto_ack();
    connector.push(stubborn.clone());
    connector.push(healthy.clone());

    let mut client = client_with(&connector);
    client.connect().unwrap();

    assert!(wait_until(WAIT, || healthy.written_ids().len() == configure_acks() as usize));
    assert!(stubborn.is_closed());
    let retries = stubborn
        .written_ids()
        .iter()
        .filter(|id| id.as_str() == "ENABLE_SEND_POG_FIX")
        .count();
    assert_eq!(retries, 2);
    assert!(wait_until(WAIT, || client.state() == ConnectionState::Connected));
    assert_eq!(client.stats().reconnects, 1);
}

#[test]
fn test_blink_clears_position() {
    let connector = MockConnector::new();
    let link = MockTransport::with_auto_ack();
    connector.push(link.clone());

    let mut client = client_with(&connector);
    client.connect().unwrap();
    assert!(wait_until(WAIT, || client.stats().acks_matched == configure_acks()));

    link.inject_line(&rec_line(1, 0.3, 0.4));
    link.inject_line("<REC CNT=\"2\" BPOGV=\"0\" FPOGV=\"0\" LPOGV=\"0\" RPOGV=\"0\" />");

    let mut samples = Vec::new();
    wait_until(WAIT, || {
        samples.extend(client.drain_available());
        samples.len() >= 2
    });
    assert_eq!(samples.len(), 2);
    assert!(samples[0].is_valid());
    assert!(!samples[1].is_valid());
    assert_eq!(samples[1].position(), None);
    assert!(client.latest_calibrated().is_none());
}

#[test]
fn test_recording_keeps_every_sample() {
    let connector = MockConnector::new();
    let link = MockTransport::with_auto_ack();
    connector.push(link.clone());

    let mut client = client_with(&connector);
    client.connect().unwrap();
    assert!(wait_until(WAIT, || client.stats().acks_matched == configure_acks()));

    client.start_recording();
    for n in 0..600u64 {
        link.inject_line(&rec_line(n, 0.5, 0.5));
        if n % 100 == 99 {
            client.tick();
        }
    }
    assert!(wait_until(WAIT, || client.stats().data_records == 600));

    // Samples 500..600 are still queued; stopping drains them first
    let recorded = client.stop_recording();
    let counters: Vec<u64> = recorded.iter().filter_map(|s| s.counter()).collect();
    assert_eq!(counters, (0..600).collect::<Vec<u64>>());
    assert_eq!(client.stats().dropped_recording, 0);
}
