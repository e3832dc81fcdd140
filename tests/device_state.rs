//! Device-level state plumbing: funnel forwarding, redundant-set elision,
//! validation, and the create-retry policy.

use std::sync::Arc;

use novem_d3d9::abi::{rs, samp, DMAP_SAMPLER};
use novem_d3d9::unknown::{Unknown, UnknownExt};
use novem_d3d9::{D3dError, Device9, DeviceParams, PrimitiveType, TextureDesc};
use novem_pipe::trace::{TraceCall, TraceLog, TracePipe};
use novem_pipe::{ClearFlags, IndexFormat, PrimitiveTopology, Viewport};
use pretty_assertions::assert_eq;

fn device() -> (Device9, TraceLog) {
    let pipe = TracePipe::new();
    let log = pipe.log();
    let device = Device9::new(Box::new(pipe), DeviceParams::default()).unwrap();
    log.take();
    (device, log)
}

#[test]
fn render_state_reaches_the_pipe_once() {
    let (mut device, log) = device();

    device.set_render_state(rs::STENCILENABLE, 1).unwrap();
    device.set_render_state(rs::STENCILENABLE, 1).unwrap();
    device.set_render_state(rs::STENCILENABLE, 1).unwrap();

    let calls = log.take();
    assert_eq!(
        calls,
        vec![TraceCall::SetRenderState {
            state_id: rs::STENCILENABLE,
            value: 1
        }]
    );
    assert_eq!(device.get_render_state(rs::STENCILENABLE).unwrap(), 1);
}

#[test]
fn out_of_range_render_state_is_dropped_not_failed() {
    let (mut device, log) = device();
    device.set_render_state(5000, 1).unwrap();
    assert!(log.is_empty());
    assert_eq!(device.get_render_state(5000).unwrap(), 0);
}

#[test]
fn vertex_sampler_stages_remap_to_the_array_tail() {
    let (mut device, log) = device();
    device
        .set_sampler_state(DMAP_SAMPLER, samp::MAGFILTER, 2)
        .unwrap();
    assert_eq!(
        log.take(),
        vec![TraceCall::SetSamplerState {
            sampler: 16,
            state_id: samp::MAGFILTER,
            value: 2
        }]
    );
    assert_eq!(
        device.get_sampler_state(DMAP_SAMPLER, samp::MAGFILTER).unwrap(),
        2
    );

    assert_eq!(
        device.set_sampler_state(40, samp::MAGFILTER, 1).unwrap_err(),
        D3dError::InvalidCall
    );
}

#[test]
fn draws_translate_primitive_counts() {
    let (mut device, log) = device();
    device
        .draw_primitive(PrimitiveType::TriangleStrip, 2, 5)
        .unwrap();
    assert_eq!(
        log.take(),
        vec![TraceCall::Draw {
            topology: PrimitiveTopology::TriangleStrip,
            start_vertex: 2,
            vertex_count: 7,
        }]
    );

    assert_eq!(
        device
            .draw_primitive(PrimitiveType::TriangleList, 0, 0)
            .unwrap_err(),
        D3dError::InvalidCall
    );
}

#[test]
fn indexed_draws_require_indices_and_declaration() {
    let (mut device, log) = device();
    assert_eq!(
        device
            .draw_indexed_primitive(PrimitiveType::TriangleList, 0, 0, 2)
            .unwrap_err(),
        D3dError::InvalidCall
    );

    let indices = device.create_index_buffer(96, IndexFormat::U16).unwrap();
    device.set_indices(Some(&indices)).unwrap();
    let decl = device
        .create_vertex_declaration(&[novem_pipe::VertexElement {
            stream: 0,
            offset: 0,
            decl_type: 2, // float3
            method: 0,
            usage: 0, // position
            usage_index: 0,
        }])
        .unwrap();
    device.set_vertex_declaration(Some(&decl)).unwrap();
    log.take();

    device
        .draw_indexed_primitive(PrimitiveType::TriangleList, 3, 6, 4)
        .unwrap();
    assert_eq!(
        log.take(),
        vec![TraceCall::DrawIndexed {
            topology: PrimitiveTopology::TriangleList,
            base_vertex: 3,
            start_index: 6,
            index_count: 12,
        }]
    );

    device.set_indices(None).unwrap();
    device.set_vertex_declaration(None).unwrap();
    indices.release();
    decl.release();
}

#[test]
fn stream_binding_is_elided_when_unchanged() {
    let (mut device, log) = device();
    let buffer = device.create_vertex_buffer(256).unwrap();
    log.take();

    device.set_stream_source(0, Some(&buffer), 0, 16).unwrap();
    device.set_stream_source(0, Some(&buffer), 0, 16).unwrap();
    assert_eq!(log.len(), 1, "identical rebind must be elided");

    device.set_stream_source(0, Some(&buffer), 0, 32).unwrap();
    assert_eq!(log.len(), 2, "stride change must go through");

    let (bound, offset, stride) = device.get_stream_source(0).unwrap();
    let bound = bound.unwrap();
    assert!(Arc::ptr_eq(&bound, &buffer));
    assert_eq!((offset, stride), (0, 32));
    bound.release();

    device.set_stream_source(0, None, 0, 0).unwrap();
    buffer.release();
    assert!(buffer.core().is_destroyed());
}

#[test]
fn stream_frequency_validation() {
    use novem_d3d9::abi::{STREAM_SOURCE_INDEXED_DATA, STREAM_SOURCE_INSTANCE_DATA};
    let (mut device, _log) = device();

    assert_eq!(
        device.set_stream_source_freq(0, 0).unwrap_err(),
        D3dError::InvalidCall
    );
    assert_eq!(
        device
            .set_stream_source_freq(0, STREAM_SOURCE_INSTANCE_DATA | 1)
            .unwrap_err(),
        D3dError::InvalidCall,
        "stream 0 cannot carry instance data"
    );
    assert_eq!(
        device
            .set_stream_source_freq(1, STREAM_SOURCE_INSTANCE_DATA | STREAM_SOURCE_INDEXED_DATA | 1)
            .unwrap_err(),
        D3dError::InvalidCall
    );

    device
        .set_stream_source_freq(1, STREAM_SOURCE_INSTANCE_DATA | 2)
        .unwrap();
    assert_eq!(
        device.get_stream_source_freq(1).unwrap(),
        STREAM_SOURCE_INSTANCE_DATA | 2
    );
}

#[test]
fn failed_creation_drains_and_retries_once() {
    let mut pipe = TracePipe::new();
    let log = pipe.log();
    pipe.fail_next_create();
    // The device's own swapchain creation hits the injected failure and
    // must recover through the drain-and-retry path.
    let mut device = Device9::new(Box::new(pipe), DeviceParams::default()).unwrap();
    let calls = log.take();
    assert!(
        calls.iter().any(|c| matches!(c, TraceCall::Flush)),
        "retry must drain first: {calls:?}"
    );
    assert!(calls
        .iter()
        .any(|c| matches!(c, TraceCall::CreateResource(..))));

    let buffer = device.create_vertex_buffer(128).unwrap();
    buffer.release();
}

#[test]
fn texture_bind_and_release_through_device_slots() {
    let (mut device, log) = device();
    let texture = device
        .create_texture(TextureDesc {
            width: 8,
            height: 8,
            levels: 3,
        })
        .unwrap();
    log.take();

    device.set_texture(2, Some(&texture)).unwrap();
    let handle = texture.resource_handle();
    assert_eq!(
        log.take(),
        vec![TraceCall::BindTexture {
            sampler: 2,
            texture: Some(handle)
        }]
    );

    // Redundant rebind is elided before the funnel.
    device.set_texture(2, Some(&texture)).unwrap();
    assert!(log.is_empty());

    // The device bind keeps the texture alive past its last reference.
    texture.release();
    assert!(!texture.core().is_destroyed());

    device.set_texture(2, None).unwrap();
    assert!(texture.core().is_destroyed());
    let calls = log.take();
    assert!(calls.contains(&TraceCall::BindTexture {
        sampler: 2,
        texture: None
    }));
    assert!(calls.contains(&TraceCall::DestroyResource(handle)));
}

#[test]
fn clear_validates_and_forwards() {
    let (mut device, log) = device();
    assert_eq!(
        device.clear(ClearFlags::empty(), 0, 0.0, 0).unwrap_err(),
        D3dError::InvalidCall
    );

    device
        .clear(
            ClearFlags::TARGET | ClearFlags::ZBUFFER,
            0xff00_00ff,
            1.0,
            0,
        )
        .unwrap();
    assert_eq!(
        log.take(),
        vec![TraceCall::Clear {
            flags: ClearFlags::TARGET | ClearFlags::ZBUFFER,
            color: 0xff00_00ff,
            depth: 1.0,
            stencil: 0
        }]
    );
}

#[test]
fn viewport_and_scissor_round_trip() {
    let (mut device, log) = device();
    let viewport = Viewport {
        x: 10.0,
        y: 20.0,
        width: 640.0,
        height: 480.0,
        min_depth: 0.0,
        max_depth: 1.0,
    };
    device.set_viewport(viewport).unwrap();
    device.set_viewport(viewport).unwrap();
    assert_eq!(log.take(), vec![TraceCall::SetViewport(viewport)]);
    assert_eq!(device.get_viewport(), viewport);
}

#[test]
fn bool_constants_normalize_nonzero_inputs() {
    let (mut device, log) = device();
    device
        .set_vertex_shader_constant_b(4, &[0, 7, 1])
        .unwrap();
    let calls = log.take();
    assert_eq!(
        calls,
        vec![TraceCall::SetConstantsB {
            stage: novem_pipe::ShaderStage::Vertex,
            start_register: 4,
            data: vec![0, !0, !0],
        }]
    );

    // Setting equivalent truth values again is a no-op.
    device
        .set_vertex_shader_constant_b(4, &[0, 1, 255])
        .unwrap();
    assert!(log.is_empty());
}

#[test]
fn constant_range_validation() {
    let (mut device, _log) = device();
    let max = device.caps().max_vs_const_f;
    assert_eq!(
        device
            .set_vertex_shader_constant_f(max - 1, &[0.0; 8])
            .unwrap_err(),
        D3dError::InvalidCall
    );
    assert_eq!(
        device
            .set_vertex_shader_constant_f(0, &[0.0; 3])
            .unwrap_err(),
        D3dError::InvalidCall,
        "partial vec4 payloads are malformed"
    );
    device
        .set_vertex_shader_constant_f(max - 1, &[1.0, 2.0, 3.0, 4.0])
        .unwrap();
}
