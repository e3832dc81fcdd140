//! Query lifecycle: issue transitions, soft not-ready, implicit end on a
//! fresh poll, and per-kind result decoding.

use novem_d3d9::query::{ISSUE_BEGIN, ISSUE_END, TIMESTAMP_FREQUENCY};
use novem_d3d9::unknown::UnknownExt;
use novem_d3d9::{D3dError, Device9, DeviceParams, GetData, GetDataFlags, QueryType};
use novem_pipe::trace::{TraceCall, TraceLog, TracePipe};
use novem_pipe::{PipeCaps, QueryCaps};
use pretty_assertions::assert_eq;

fn device() -> (Device9, TraceLog) {
    let pipe = TracePipe::new();
    let log = pipe.log();
    let device = Device9::new(Box::new(pipe), DeviceParams::default()).unwrap();
    log.take();
    (device, log)
}

#[test]
fn unsupported_kind_fails_at_creation() {
    let pipe = TracePipe::with_caps(PipeCaps {
        queries: QueryCaps::EVENT,
        ..PipeCaps::default()
    });
    let mut device = Device9::new(Box::new(pipe), DeviceParams::default()).unwrap();

    assert!(device.query_supported(QueryType::Event));
    assert!(!device.query_supported(QueryType::Occlusion));
    assert_eq!(
        device.create_query(QueryType::Occlusion).unwrap_err(),
        D3dError::NotAvailable
    );
    let query = device.create_query(QueryType::Event).unwrap();
    query.release();
}

#[test]
fn issue_flag_validation() {
    let (mut device, _log) = device();
    let query = device.create_query(QueryType::Occlusion).unwrap();

    assert_eq!(
        query.issue(ISSUE_BEGIN | ISSUE_END).unwrap_err(),
        D3dError::InvalidCall
    );
    assert_eq!(query.issue(1 << 4).unwrap_err(), D3dError::InvalidCall);
    query.issue(ISSUE_BEGIN).unwrap();
    query.issue(ISSUE_END).unwrap();
    query.release();
}

#[test]
fn polling_a_running_query_is_soft_not_ready() {
    let (mut device, _log) = device();
    let query = device.create_query(QueryType::Occlusion).unwrap();

    query.issue(ISSUE_BEGIN).unwrap();
    let mut out = [0u8; 4];
    assert_eq!(
        query.get_data(&mut out, GetDataFlags::default()).unwrap(),
        GetData::NotReady
    );

    query.issue(ISSUE_END).unwrap();
    // Ended but the backend hasn't flushed: still not ready without wait.
    assert_eq!(
        query.get_data(&mut out, GetDataFlags::default()).unwrap(),
        GetData::NotReady
    );

    // Forcing a flush makes the result observable.
    assert_eq!(
        query
            .get_data(&mut out, GetDataFlags { flush: true })
            .unwrap(),
        GetData::Ready
    );
    query.release();
}

#[test]
fn fresh_query_poll_implicitly_ends_and_waits() {
    let (mut device, log) = device();
    let query = device.create_query(QueryType::Event).unwrap();
    log.take();

    let mut out = [0u8; 4];
    assert_eq!(
        query.get_data(&mut out, GetDataFlags::default()).unwrap(),
        GetData::Ready,
        "a fresh query must deliver deterministically"
    );
    assert_eq!(u32::from_le_bytes(out), 1, "event decodes as signaled");
    assert!(
        log.snapshot()
            .iter()
            .any(|c| matches!(c, TraceCall::QueryEnd(_))),
        "implicit END reached the backend"
    );
    query.release();
}

#[test]
fn begin_on_instant_query_is_accepted_and_ignored() {
    let (mut device, log) = device();
    let query = device.create_query(QueryType::Event).unwrap();
    log.take();

    query.issue(ISSUE_BEGIN).unwrap();
    assert!(log.is_empty(), "no backend traffic for an instant begin");

    query.issue(ISSUE_END).unwrap();
    let mut out = [0u8; 4];
    assert_eq!(
        query
            .get_data(&mut out, GetDataFlags { flush: true })
            .unwrap(),
        GetData::Ready
    );
    query.release();
}

#[test]
fn ended_query_can_restart() {
    let (mut device, _log) = device();
    let query = device.create_query(QueryType::Occlusion).unwrap();

    query.issue(ISSUE_BEGIN).unwrap();
    query.issue(ISSUE_END).unwrap();
    query.issue(ISSUE_BEGIN).unwrap();
    let mut out = [0u8; 4];
    assert_eq!(
        query.get_data(&mut out, GetDataFlags::default()).unwrap(),
        GetData::NotReady,
        "restarted query is running again"
    );
    query.issue(ISSUE_END).unwrap();
    assert_eq!(
        query
            .get_data(&mut out, GetDataFlags { flush: true })
            .unwrap(),
        GetData::Ready
    );
    query.release();
}

#[test]
fn timestamp_frequency_reports_the_nanosecond_clock() {
    let (mut device, _log) = device();
    let query = device.create_query(QueryType::TimestampFreq).unwrap();
    let mut out = [0u8; 8];
    assert_eq!(
        query
            .get_data(&mut out, GetDataFlags { flush: true })
            .unwrap(),
        GetData::Ready
    );
    assert_eq!(u64::from_le_bytes(out), TIMESTAMP_FREQUENCY);
    query.release();
}

#[test]
fn undersized_buffers_are_rejected_but_empty_polls_allowed() {
    let (mut device, _log) = device();
    let query = device.create_query(QueryType::Timestamp).unwrap();
    assert_eq!(query.data_size(), 8);

    let mut small = [0u8; 4];
    assert_eq!(
        query.get_data(&mut small, GetDataFlags::default()).unwrap_err(),
        D3dError::InvalidCall
    );
    // Zero-length polls just ask "done yet?".
    assert_eq!(
        query.get_data(&mut [], GetDataFlags::default()).unwrap(),
        GetData::Ready
    );
    query.release();
}

#[test]
fn issue_zero_behaves_as_end() {
    let (mut device, _log) = device();
    let query = device.create_query(QueryType::Occlusion).unwrap();
    query.issue(ISSUE_BEGIN).unwrap();
    query.issue(0).unwrap();
    let mut out = [0u8; 4];
    assert_eq!(
        query
            .get_data(&mut out, GetDataFlags { flush: true })
            .unwrap(),
        GetData::Ready
    );
    query.release();
}

#[test]
fn destroying_a_query_returns_the_backend_handle() {
    let (mut device, log) = device();
    let query = device.create_query(QueryType::Occlusion).unwrap();
    log.take();
    query.release();
    device.flush();
    assert!(log
        .snapshot()
        .iter()
        .any(|c| matches!(c, TraceCall::QueryDestroy(_))));
}
