//! Threaded command submission: FIFO ordering, synchronous round trips,
//! and the serialized multithread entry layer.

use std::sync::Arc;

use novem_d3d9::abi::rs;
use novem_d3d9::query::ISSUE_END;
use novem_d3d9::unknown::{Unknown, UnknownExt};
use novem_d3d9::{
    Device9, DeviceParams, GetData, GetDataFlags, LockedDevice, PrimitiveType, QueryType,
};
use novem_pipe::trace::{TraceCall, TraceLog, TracePipe};
use novem_pipe::PrimitiveTopology;
use pretty_assertions::assert_eq;

fn csmt_params() -> DeviceParams {
    DeviceParams {
        csmt: true,
        ..DeviceParams::default()
    }
}

fn threaded_device() -> (Device9, TraceLog) {
    let pipe = TracePipe::new();
    let log = pipe.log();
    let device = Device9::new(Box::new(pipe), csmt_params()).unwrap();
    log.take();
    (device, log)
}

#[test]
fn commands_execute_in_submission_order() {
    let (mut device, log) = threaded_device();

    device.set_render_state(rs::STENCILENABLE, 1).unwrap();
    device.set_render_state(rs::STENCILREF, 2).unwrap();
    device
        .draw_primitive(PrimitiveType::LineList, 0, 3)
        .unwrap();
    device.flush();

    assert_eq!(
        log.take(),
        vec![
            TraceCall::SetRenderState {
                state_id: rs::STENCILENABLE,
                value: 1
            },
            TraceCall::SetRenderState {
                state_id: rs::STENCILREF,
                value: 2
            },
            TraceCall::Draw {
                topology: PrimitiveTopology::LineList,
                start_vertex: 0,
                vertex_count: 6
            },
            TraceCall::Flush,
        ]
    );
}

#[test]
fn flush_rendezvous_observes_all_prior_work() {
    let (mut device, log) = threaded_device();
    for value in 0..64 {
        device.set_render_state(rs::ALPHAREF, value + 1).unwrap();
    }
    device.flush();
    // Once flush returns, every prior command is visible, no sleeps, no
    // retries.
    assert_eq!(log.len(), 65);
}

#[test]
fn query_wait_round_trips_through_the_worker() {
    let (mut device, _log) = threaded_device();
    let query = device.create_query(QueryType::Occlusion).unwrap();

    query.issue(ISSUE_END).unwrap();
    let mut out = [0u8; 4];
    // The poll queues behind the END above; with the wait the call blocks
    // until the worker has delivered the result.
    assert_eq!(
        query
            .get_data(&mut out, GetDataFlags { flush: true })
            .unwrap(),
        GetData::Ready
    );
    query.release();
    device.flush();
}

#[test]
fn state_block_apply_is_one_atomic_batch() {
    let (mut device, log) = threaded_device();

    device.begin_state_block().unwrap();
    device.set_render_state(rs::FOGENABLE, 1).unwrap();
    device.set_render_state(rs::FOGCOLOR, 0x00ff_0000).unwrap();
    let block = device.end_state_block().unwrap();

    device.set_render_state(rs::ALPHAREF, 0x11).unwrap();
    device.apply_state_block(&block).unwrap();
    device.flush();

    let calls = log.take();
    let alpharef_at = calls
        .iter()
        .position(|c| {
            matches!(
                c,
                TraceCall::SetRenderState {
                    state_id: rs::ALPHAREF,
                    ..
                }
            )
        })
        .expect("pre-apply command executed");
    let fog_at = calls
        .iter()
        .position(|c| {
            matches!(
                c,
                TraceCall::SetRenderState {
                    state_id: rs::FOGENABLE,
                    ..
                }
            )
        })
        .expect("apply replayed the recorded state");
    assert!(
        alpharef_at < fog_at,
        "apply must not overtake earlier commands: {calls:?}"
    );
    assert!(calls.contains(&TraceCall::SetRenderState {
        state_id: rs::FOGCOLOR,
        value: 0x00ff_0000
    }));

    block.release();
    device.flush();
}

#[test]
fn locked_device_serializes_concurrent_callers() {
    let pipe = TracePipe::new();
    let log = pipe.log();
    let device = LockedDevice::new(Box::new(pipe), csmt_params()).unwrap();
    log.take();

    let threads: Vec<_> = (0..4u32)
        .map(|thread_index| {
            let device = device.clone();
            std::thread::spawn(move || {
                for i in 0..50u32 {
                    let value = thread_index * 1000 + i;
                    device.set_render_state(rs::ALPHAREF, value).unwrap();
                    assert!(device.get_render_state(rs::ALPHAREF).is_ok());
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }
    device.flush();

    // Whatever interleaving happened, the pipe saw a serial stream and the
    // final value is one some thread actually wrote.
    let final_value = device.get_render_state(rs::ALPHAREF).unwrap();
    assert!(final_value % 1000 < 50);
    let writes = log
        .snapshot()
        .iter()
        .filter(|c| matches!(c, TraceCall::SetRenderState { .. }))
        .count();
    assert!(writes <= 200, "elision may reduce but never duplicate writes");
}

#[test]
fn locked_release_tears_down_under_the_device_lock() {
    let pipe = TracePipe::new();
    let log = pipe.log();
    let device = LockedDevice::new(Box::new(pipe), csmt_params()).unwrap();
    log.take();

    let buffer = device.create_vertex_buffer(128).unwrap();
    let handle = buffer.resource_handle();

    let releaser = {
        let device = device.clone();
        let buffer = Arc::clone(&buffer);
        std::thread::spawn(move || {
            device.release_object(buffer.as_ref());
        })
    };
    releaser.join().unwrap();

    assert!(buffer.core().is_destroyed());
    device.flush();
    assert!(log.snapshot().contains(&TraceCall::DestroyResource(handle)));
}

#[test]
fn worker_drains_on_device_teardown() {
    let pipe = TracePipe::new();
    let log = pipe.log();
    {
        let mut device = Device9::new(Box::new(pipe), csmt_params()).unwrap();
        device.set_render_state(rs::STENCILREF, 9).unwrap();
    }
    // Device drop joins the worker; everything submitted must have landed.
    assert!(log.snapshot().contains(&TraceCall::SetRenderState {
        state_id: rs::STENCILREF,
        value: 9
    }));
}
