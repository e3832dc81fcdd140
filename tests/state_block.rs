//! State-block capture/apply semantics against a recording backend.

use std::sync::Arc;

use novem_d3d9::abi::{cmp, light, rs, samp, ts};
use novem_d3d9::unknown::{Unknown, UnknownExt};
use novem_d3d9::{
    D3dError, Device9, DeviceParams, Light, Matrix, StateBlockKind, TextureDesc,
};
use novem_pipe::trace::{TraceLog, TracePipe};
use novem_pipe::Viewport;
use pretty_assertions::assert_eq;

fn device() -> (Device9, TraceLog) {
    let pipe = TracePipe::new();
    let log = pipe.log();
    let device = Device9::new(Box::new(pipe), DeviceParams::default()).unwrap();
    log.take(); // drop creation-time noise
    (device, log)
}

#[test]
fn custom_block_records_only_touched_state() {
    // The canonical scenario: a block that recorded only ZENABLE must not
    // clobber a ZFUNC changed after recording ended.
    let (mut device, _log) = device();
    device.set_render_state(rs::ZENABLE, 1).unwrap();
    device.set_render_state(rs::ZFUNC, cmp::LESS).unwrap();

    device.begin_state_block().unwrap();
    device.set_render_state(rs::ZENABLE, 0).unwrap();
    let block = device.end_state_block().unwrap();

    device.set_render_state(rs::ZFUNC, cmp::GREATER).unwrap();

    device.apply_state_block(&block).unwrap();
    assert_eq!(device.get_render_state(rs::ZENABLE).unwrap(), 0);
    assert_eq!(device.get_render_state(rs::ZFUNC).unwrap(), cmp::GREATER);

    block.release();
}

#[test]
fn recording_does_not_touch_live_state_or_backend() {
    let (mut device, log) = device();
    device.set_render_state(rs::ALPHAREF, 0x10).unwrap();
    log.take();

    device.begin_state_block().unwrap();
    device.set_render_state(rs::ALPHAREF, 0x80).unwrap();
    device
        .set_vertex_shader_constant_f(3, &[1.0, 2.0, 3.0, 4.0])
        .unwrap();

    // Reads answer from the live state even mid-recording.
    assert_eq!(device.get_render_state(rs::ALPHAREF).unwrap(), 0x10);
    assert!(log.is_empty(), "recorded mutations must not reach the pipe");

    let block = device.end_state_block().unwrap();
    assert_eq!(device.get_render_state(rs::ALPHAREF).unwrap(), 0x10);

    device.apply_state_block(&block).unwrap();
    assert_eq!(device.get_render_state(rs::ALPHAREF).unwrap(), 0x80);
    let mut constant = [0.0f32; 4];
    device.get_vertex_shader_constant_f(3, &mut constant).unwrap();
    assert_eq!(constant, [1.0, 2.0, 3.0, 4.0]);

    block.release();
}

#[test]
fn partial_block_apply_is_idempotent() {
    let (mut device, log) = device();

    device.begin_state_block().unwrap();
    device.set_render_state(rs::FOGSTART, 0x3f00_0000).unwrap();
    let block = device.end_state_block().unwrap();

    device.apply_state_block(&block).unwrap();
    let after_first = device.get_render_state(rs::FOGSTART).unwrap();
    let calls_first = log.take();

    device.apply_state_block(&block).unwrap();
    assert_eq!(device.get_render_state(rs::FOGSTART).unwrap(), after_first);
    // The second apply replays the same recorded value; the context elides
    // it against its shadow, so nothing reaches the backend again.
    assert!(
        log.is_empty(),
        "redundant re-apply leaked to the pipe: {calls_first:?}"
    );

    block.release();
}

#[test]
fn all_block_round_trip_leaves_state_unchanged() {
    let (mut device, _log) = device();

    let texture = device
        .create_texture(TextureDesc {
            width: 16,
            height: 16,
            levels: 1,
        })
        .unwrap();
    device.set_texture(0, Some(&texture)).unwrap();
    device.set_render_state(rs::CULLMODE, 2).unwrap();
    device.set_sampler_state(1, samp::MAGFILTER, 3).unwrap();
    device
        .set_vertex_shader_constant_f(7, &[9.0, 8.0, 7.0, 6.0])
        .unwrap();
    device
        .set_viewport(Viewport {
            x: 0.0,
            y: 0.0,
            width: 320.0,
            height: 200.0,
            min_depth: 0.0,
            max_depth: 1.0,
        })
        .unwrap();
    device.set_light(0, &Light::default_directional()).unwrap();
    device.light_enable(0, true).unwrap();

    let block = device.create_state_block(StateBlockKind::All).unwrap();
    device.apply_state_block(&block).unwrap();

    assert_eq!(device.get_render_state(rs::CULLMODE).unwrap(), 2);
    assert_eq!(device.get_sampler_state(1, samp::MAGFILTER).unwrap(), 3);
    let mut constant = [0.0f32; 4];
    device.get_vertex_shader_constant_f(7, &mut constant).unwrap();
    assert_eq!(constant, [9.0, 8.0, 7.0, 6.0]);
    assert_eq!(device.get_viewport().width, 320.0);
    let bound = device.get_texture(0).unwrap().unwrap();
    assert!(Arc::ptr_eq(&bound, &texture));
    bound.release();
    assert!(device.get_light_enable(0).unwrap());

    block.release();
    device.set_texture(0, None).unwrap();
    texture.release();
}

#[test]
fn vertex_block_skips_pixel_state() {
    let (mut device, _log) = device();
    device.set_render_state(rs::LIGHTING, 0).unwrap();
    device.set_render_state(rs::ZFUNC, cmp::GREATER).unwrap();

    let block = device
        .create_state_block(StateBlockKind::VertexState)
        .unwrap();

    device.set_render_state(rs::LIGHTING, 1).unwrap();
    device.set_render_state(rs::ZFUNC, cmp::NEVER).unwrap();

    device.apply_state_block(&block).unwrap();
    assert_eq!(
        device.get_render_state(rs::LIGHTING).unwrap(),
        0,
        "vertex state restored"
    );
    assert_eq!(
        device.get_render_state(rs::ZFUNC).unwrap(),
        cmp::NEVER,
        "pixel state untouched"
    );

    block.release();
}

#[test]
fn pixel_block_skips_vertex_state() {
    let (mut device, _log) = device();
    device.set_render_state(rs::ZFUNC, cmp::GREATER).unwrap();
    device.set_render_state(rs::FOGVERTEXMODE, 2).unwrap();

    let block = device
        .create_state_block(StateBlockKind::PixelState)
        .unwrap();

    device.set_render_state(rs::ZFUNC, cmp::NEVER).unwrap();
    device.set_render_state(rs::FOGVERTEXMODE, 3).unwrap();

    device.apply_state_block(&block).unwrap();
    assert_eq!(device.get_render_state(rs::ZFUNC).unwrap(), cmp::GREATER);
    assert_eq!(device.get_render_state(rs::FOGVERTEXMODE).unwrap(), 3);

    block.release();
}

#[test]
fn capture_refreshes_the_recorded_slice_only() {
    let (mut device, _log) = device();
    device.set_render_state(rs::ALPHAREF, 1).unwrap();

    device.begin_state_block().unwrap();
    device.set_render_state(rs::ALPHAREF, 2).unwrap();
    let block = device.end_state_block().unwrap();

    device.set_render_state(rs::ALPHAREF, 0x42).unwrap();
    device.set_render_state(rs::STENCILREF, 0x99).unwrap();
    device.capture_state_block(&block).unwrap();

    device.set_render_state(rs::ALPHAREF, 1).unwrap();
    device.set_render_state(rs::STENCILREF, 1).unwrap();

    device.apply_state_block(&block).unwrap();
    assert_eq!(
        device.get_render_state(rs::ALPHAREF).unwrap(),
        0x42,
        "capture refreshed the recorded state"
    );
    assert_eq!(
        device.get_render_state(rs::STENCILREF).unwrap(),
        1,
        "capture must not widen the recorded set"
    );

    block.release();
}

#[test]
fn capture_grows_light_array_without_disturbing_recorded_lights() {
    let (mut device, _log) = device();
    let mut first = Light::default_directional();
    first.range = 5.0;
    device.set_light(0, &first).unwrap();

    let block = device.create_state_block(StateBlockKind::All).unwrap();

    // Device grows two more lights after the block's creation.
    device
        .set_light(2, &Light { kind: light::POINT, ..Light::default_directional() })
        .unwrap();
    device.capture_state_block(&block).unwrap();

    // Drop the device-side lights back, then apply: all three slots must
    // come back from the capture.
    device.set_light(0, &Light::default_directional()).unwrap();
    device.apply_state_block(&block).unwrap();

    assert_eq!(device.get_light(0).unwrap().range, 5.0);
    assert_eq!(device.get_light(2).unwrap().kind, light::POINT);

    block.release();
}

#[test]
fn transforms_recorded_per_slot() {
    let (mut device, _log) = device();
    let mut view = Matrix::IDENTITY;
    view.m[3][2] = -10.0;

    device.begin_state_block().unwrap();
    device.set_transform(ts::VIEW, &view).unwrap();
    let block = device.end_state_block().unwrap();

    let mut world = Matrix::IDENTITY;
    world.m[3][0] = 4.0;
    device.set_transform(ts::WORLD, &world).unwrap();

    device.apply_state_block(&block).unwrap();
    assert_eq!(device.get_transform(ts::VIEW).unwrap().m[3][2], -10.0);
    assert_eq!(
        device.get_transform(ts::WORLD).unwrap().m[3][0],
        4.0,
        "unrecorded transform untouched"
    );

    block.release();
}

#[test]
fn nested_begin_and_stray_end_are_invalid() {
    let (mut device, _log) = device();
    assert_eq!(device.end_state_block().unwrap_err(), D3dError::InvalidCall);

    device.begin_state_block().unwrap();
    assert_eq!(device.begin_state_block().unwrap_err(), D3dError::InvalidCall);

    let block = device.end_state_block().unwrap();
    block.release();
}

#[test]
fn recorded_bindings_keep_objects_alive() {
    let (mut device, _log) = device();
    let buffer = device.create_vertex_buffer(64).unwrap();

    device.begin_state_block().unwrap();
    device.set_stream_source(0, Some(&buffer), 0, 16).unwrap();
    let block = device.end_state_block().unwrap();

    // Drop the only application reference; the block's bind keeps the
    // buffer alive.
    assert_eq!(buffer.release(), 0);
    assert!(!buffer.core().is_destroyed());

    // Destroying the block drops the bind and with it the buffer.
    assert_eq!(block.release(), 0);
    assert!(block.core().is_destroyed());
    assert!(buffer.core().is_destroyed());
}

#[test]
fn apply_reaches_backend_through_the_funnel() {
    let (mut device, log) = device();

    device.begin_state_block().unwrap();
    device.set_render_state(rs::STENCILENABLE, 1).unwrap();
    device.set_render_state(rs::STENCILREF, 0x7f).unwrap();
    let block = device.end_state_block().unwrap();
    log.take();

    device.apply_state_block(&block).unwrap();
    let calls = log.take();
    use novem_pipe::trace::TraceCall;
    assert!(calls.contains(&TraceCall::SetRenderState {
        state_id: rs::STENCILENABLE,
        value: 1
    }));
    assert!(calls.contains(&TraceCall::SetRenderState {
        state_id: rs::STENCILREF,
        value: 0x7f
    }));

    block.release();
}
