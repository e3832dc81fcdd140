//! D3D9 ABI-level constants and plain data types.
//!
//! State ids keep their original numeric encoding: the application-facing
//! surface speaks raw D3D9 values and the backend pipe consumes them
//! untranslated, so inventing a parallel enum would just add two conversion
//! tables. Only the ids the core's own logic inspects get named constants;
//! everything else passes through as an opaque `u32` slot index.

use bytemuck::{Pod, Zeroable};

/// Render state ids (`D3DRS_*`).
pub mod rs {
    pub const ZENABLE: u32 = 7;
    pub const FILLMODE: u32 = 8;
    pub const SHADEMODE: u32 = 9;
    pub const ZWRITEENABLE: u32 = 14;
    pub const ALPHATESTENABLE: u32 = 15;
    pub const LASTPIXEL: u32 = 16;
    pub const SRCBLEND: u32 = 19;
    pub const DESTBLEND: u32 = 20;
    pub const CULLMODE: u32 = 22;
    pub const ZFUNC: u32 = 23;
    pub const ALPHAREF: u32 = 24;
    pub const ALPHAFUNC: u32 = 25;
    pub const DITHERENABLE: u32 = 26;
    pub const ALPHABLENDENABLE: u32 = 27;
    pub const FOGENABLE: u32 = 28;
    pub const SPECULARENABLE: u32 = 29;
    pub const FOGCOLOR: u32 = 34;
    pub const FOGTABLEMODE: u32 = 35;
    pub const FOGSTART: u32 = 36;
    pub const FOGEND: u32 = 37;
    pub const FOGDENSITY: u32 = 38;
    pub const RANGEFOGENABLE: u32 = 48;
    pub const STENCILENABLE: u32 = 52;
    pub const STENCILFAIL: u32 = 53;
    pub const STENCILZFAIL: u32 = 54;
    pub const STENCILPASS: u32 = 55;
    pub const STENCILFUNC: u32 = 56;
    pub const STENCILREF: u32 = 57;
    pub const STENCILMASK: u32 = 58;
    pub const STENCILWRITEMASK: u32 = 59;
    pub const TEXTUREFACTOR: u32 = 60;
    pub const WRAP0: u32 = 128;
    pub const WRAP7: u32 = 135;
    pub const CLIPPING: u32 = 136;
    pub const LIGHTING: u32 = 137;
    pub const AMBIENT: u32 = 139;
    pub const FOGVERTEXMODE: u32 = 140;
    pub const COLORVERTEX: u32 = 141;
    pub const LOCALVIEWER: u32 = 142;
    pub const NORMALIZENORMALS: u32 = 143;
    pub const DIFFUSEMATERIALSOURCE: u32 = 145;
    pub const SPECULARMATERIALSOURCE: u32 = 146;
    pub const AMBIENTMATERIALSOURCE: u32 = 147;
    pub const EMISSIVEMATERIALSOURCE: u32 = 148;
    pub const VERTEXBLEND: u32 = 151;
    pub const CLIPPLANEENABLE: u32 = 152;
    pub const POINTSIZE: u32 = 154;
    pub const POINTSIZE_MIN: u32 = 155;
    pub const POINTSPRITEENABLE: u32 = 156;
    pub const POINTSCALEENABLE: u32 = 157;
    pub const POINTSCALE_A: u32 = 158;
    pub const POINTSCALE_B: u32 = 159;
    pub const POINTSCALE_C: u32 = 160;
    pub const MULTISAMPLEANTIALIAS: u32 = 161;
    pub const MULTISAMPLEMASK: u32 = 162;
    pub const PATCHEDGESTYLE: u32 = 163;
    pub const POINTSIZE_MAX: u32 = 166;
    pub const INDEXEDVERTEXBLENDENABLE: u32 = 167;
    pub const COLORWRITEENABLE: u32 = 168;
    pub const TWEENFACTOR: u32 = 170;
    pub const BLENDOP: u32 = 171;
    pub const SCISSORTESTENABLE: u32 = 174;
    pub const SLOPESCALEDEPTHBIAS: u32 = 175;
    pub const ANTIALIASEDLINEENABLE: u32 = 176;
    pub const TWOSIDEDSTENCILMODE: u32 = 185;
    pub const CCW_STENCILFAIL: u32 = 186;
    pub const CCW_STENCILZFAIL: u32 = 187;
    pub const CCW_STENCILPASS: u32 = 188;
    pub const CCW_STENCILFUNC: u32 = 189;
    pub const COLORWRITEENABLE1: u32 = 190;
    pub const COLORWRITEENABLE2: u32 = 191;
    pub const COLORWRITEENABLE3: u32 = 192;
    pub const BLENDFACTOR: u32 = 193;
    pub const SRGBWRITEENABLE: u32 = 194;
    pub const DEPTHBIAS: u32 = 195;
    pub const WRAP8: u32 = 198;
    pub const WRAP15: u32 = 205;
    pub const SEPARATEALPHABLENDENABLE: u32 = 206;
    pub const SRCBLENDALPHA: u32 = 207;
    pub const DESTBLENDALPHA: u32 = 208;
    pub const BLENDOPALPHA: u32 = 209;
}

/// Comparison functions (`D3DCMP_*`), for render states that take one.
pub mod cmp {
    pub const NEVER: u32 = 1;
    pub const LESS: u32 = 2;
    pub const EQUAL: u32 = 3;
    pub const LESSEQUAL: u32 = 4;
    pub const GREATER: u32 = 5;
    pub const NOTEQUAL: u32 = 6;
    pub const GREATEREQUAL: u32 = 7;
    pub const ALWAYS: u32 = 8;
}

/// Sampler state ids (`D3DSAMP_*`), 1-based.
pub mod samp {
    pub const ADDRESSU: u32 = 1;
    pub const ADDRESSV: u32 = 2;
    pub const ADDRESSW: u32 = 3;
    pub const BORDERCOLOR: u32 = 4;
    pub const MAGFILTER: u32 = 5;
    pub const MINFILTER: u32 = 6;
    pub const MIPFILTER: u32 = 7;
    pub const MIPMAPLODBIAS: u32 = 8;
    pub const MAXMIPLEVEL: u32 = 9;
    pub const MAXANISOTROPY: u32 = 10;
    pub const SRGBTEXTURE: u32 = 11;
    pub const ELEMENTINDEX: u32 = 12;
    pub const DMAPOFFSET: u32 = 13;
}

/// Texture stage state ids (`D3DTSS_*`), 1-based.
pub mod tss {
    pub const COLOROP: u32 = 1;
    pub const COLORARG1: u32 = 2;
    pub const COLORARG2: u32 = 3;
    pub const ALPHAOP: u32 = 4;
    pub const TEXCOORDINDEX: u32 = 11;
    pub const TEXTURETRANSFORMFLAGS: u32 = 24;
    pub const CONSTANT: u32 = 32;
}

/// Transform state ids (`D3DTS_*`). World matrices are encoded at 256+n.
pub mod ts {
    pub const VIEW: u32 = 2;
    pub const PROJECTION: u32 = 3;
    pub const TEXTURE0: u32 = 16;
    pub const TEXTURE7: u32 = 23;
    pub const WORLD: u32 = 256;

    pub const fn world_matrix(n: u32) -> u32 {
        WORLD + n
    }
}

/// Sampler slots above the pixel range: the displacement-map sampler and the
/// four vertex texture samplers.
pub const DMAP_SAMPLER: u32 = 256;
pub const VERTEX_TEXTURE_SAMPLER0: u32 = 257;
pub const VERTEX_TEXTURE_SAMPLER3: u32 = 260;

/// Stream-frequency encoding bits (`D3DSTREAMSOURCE_*`).
pub const STREAM_SOURCE_INDEXED_DATA: u32 = 1 << 30;
pub const STREAM_SOURCE_INSTANCE_DATA: u32 = 1 << 31;

/// Light kinds (`D3DLIGHT_*`), plus the internal sentinel for array slots
/// that were grown past but never defined.
pub mod light {
    pub const POINT: u32 = 1;
    pub const SPOT: u32 = 2;
    pub const DIRECTIONAL: u32 = 3;
    /// Internal: slot exists but holds no light. Never accepted from the
    /// application, never replayed by a state-block apply.
    pub const INVALID: u32 = 4;
}

/// State block kinds (`D3DSBT_*` plus the recording-produced custom kind).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StateBlockKind {
    All,
    VertexState,
    PixelState,
    /// Built up by Begin/EndStateBlock recording; dirty set is whatever the
    /// application touched in between.
    Custom,
}

/// Query kinds (`D3DQUERYTYPE_*` subset the core advertises).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueryType {
    VCache,
    Event,
    Occlusion,
    Timestamp,
    TimestampDisjoint,
    TimestampFreq,
    VertexStats,
}

/// Primitive types (`D3DPT_*`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    PointList,
    LineList,
    LineStrip,
    TriangleList,
    TriangleStrip,
    TriangleFan,
}

impl PrimitiveType {
    /// Vertices consumed by `prim_count` primitives of this type.
    pub fn vertex_count(self, prim_count: u32) -> u32 {
        match self {
            Self::PointList => prim_count,
            Self::LineList => prim_count * 2,
            Self::LineStrip => prim_count + 1,
            Self::TriangleList => prim_count * 3,
            Self::TriangleStrip | Self::TriangleFan => prim_count + 2,
        }
    }
}

/// 4x4 row-major matrix (`D3DMATRIX`).
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Matrix {
    pub m: [[f32; 4]; 4],
}

impl Matrix {
    pub const IDENTITY: Self = Self {
        m: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ],
    };
}

impl Default for Matrix {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// RGBA color (`D3DCOLORVALUE`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct ColorValue {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

/// Fixed-function material (`D3DMATERIAL9`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Material {
    pub diffuse: ColorValue,
    pub ambient: ColorValue,
    pub specular: ColorValue,
    pub emissive: ColorValue,
    pub power: f32,
}

/// Fixed-function light (`D3DLIGHT9`). `kind` is one of [`light`]'s
/// constants; a zeroed struct is *not* a valid light but is distinct from
/// the grown-past sentinel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Light {
    pub kind: u32,
    pub diffuse: ColorValue,
    pub specular: ColorValue,
    pub ambient: ColorValue,
    pub position: [f32; 3],
    pub direction: [f32; 3],
    pub range: f32,
    pub falloff: f32,
    pub attenuation0: f32,
    pub attenuation1: f32,
    pub attenuation2: f32,
    pub theta: f32,
    pub phi: f32,
}

impl Light {
    /// The default light created when an undefined index is enabled: white
    /// directional light shining down +z.
    pub fn default_directional() -> Self {
        Self {
            kind: light::DIRECTIONAL,
            diffuse: ColorValue {
                r: 1.0,
                g: 1.0,
                b: 1.0,
                a: 0.0,
            },
            direction: [0.0, 0.0, 1.0],
            ..Self::zeroed()
        }
    }
}

/// Render states captured by a vertex-kind state block.
pub const VERTEX_RENDER_STATES: &[u32] = &[
    rs::AMBIENT,
    rs::AMBIENTMATERIALSOURCE,
    rs::CLIPPING,
    rs::CLIPPLANEENABLE,
    rs::COLORVERTEX,
    rs::CULLMODE,
    rs::DIFFUSEMATERIALSOURCE,
    rs::EMISSIVEMATERIALSOURCE,
    rs::FOGCOLOR,
    rs::FOGDENSITY,
    rs::FOGENABLE,
    rs::FOGEND,
    rs::FOGSTART,
    rs::FOGTABLEMODE,
    rs::FOGVERTEXMODE,
    rs::INDEXEDVERTEXBLENDENABLE,
    rs::LIGHTING,
    rs::LOCALVIEWER,
    rs::MULTISAMPLEANTIALIAS,
    rs::MULTISAMPLEMASK,
    rs::NORMALIZENORMALS,
    rs::PATCHEDGESTYLE,
    rs::POINTSCALE_A,
    rs::POINTSCALE_B,
    rs::POINTSCALE_C,
    rs::POINTSCALEENABLE,
    rs::POINTSIZE,
    rs::POINTSIZE_MAX,
    rs::POINTSIZE_MIN,
    rs::POINTSPRITEENABLE,
    rs::RANGEFOGENABLE,
    rs::SHADEMODE,
    rs::SPECULARENABLE,
    rs::SPECULARMATERIALSOURCE,
    rs::TWEENFACTOR,
    rs::VERTEXBLEND,
];

/// Render states captured by a pixel-kind state block.
pub const PIXEL_RENDER_STATES: &[u32] = &[
    rs::ALPHABLENDENABLE,
    rs::ALPHAFUNC,
    rs::ALPHAREF,
    rs::ALPHATESTENABLE,
    rs::ANTIALIASEDLINEENABLE,
    rs::BLENDFACTOR,
    rs::BLENDOP,
    rs::BLENDOPALPHA,
    rs::CCW_STENCILFAIL,
    rs::CCW_STENCILFUNC,
    rs::CCW_STENCILPASS,
    rs::CCW_STENCILZFAIL,
    rs::COLORWRITEENABLE,
    rs::COLORWRITEENABLE1,
    rs::COLORWRITEENABLE2,
    rs::COLORWRITEENABLE3,
    rs::DEPTHBIAS,
    rs::DESTBLEND,
    rs::DESTBLENDALPHA,
    rs::DITHERENABLE,
    rs::FILLMODE,
    rs::FOGDENSITY,
    rs::FOGEND,
    rs::FOGSTART,
    rs::LASTPIXEL,
    rs::SCISSORTESTENABLE,
    rs::SEPARATEALPHABLENDENABLE,
    rs::SHADEMODE,
    rs::SLOPESCALEDEPTHBIAS,
    rs::SRCBLEND,
    rs::SRCBLENDALPHA,
    rs::SRGBWRITEENABLE,
    rs::STENCILENABLE,
    rs::STENCILFAIL,
    rs::STENCILFUNC,
    rs::STENCILMASK,
    rs::STENCILPASS,
    rs::STENCILREF,
    rs::STENCILWRITEMASK,
    rs::STENCILZFAIL,
    rs::TEXTUREFACTOR,
    rs::TWOSIDEDSTENCILMODE,
    rs::WRAP0,
    rs::WRAP0 + 1,
    rs::WRAP0 + 2,
    rs::WRAP0 + 3,
    rs::WRAP0 + 4,
    rs::WRAP0 + 5,
    rs::WRAP0 + 6,
    rs::WRAP7,
    rs::WRAP8,
    rs::WRAP8 + 1,
    rs::WRAP8 + 2,
    rs::WRAP8 + 3,
    rs::WRAP8 + 4,
    rs::WRAP8 + 5,
    rs::WRAP8 + 6,
    rs::WRAP15,
    rs::ZENABLE,
    rs::ZFUNC,
    rs::ZWRITEENABLE,
];
