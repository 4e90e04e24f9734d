//! Shader sources for the standard path
//!
//! Passes ask a [`ShaderLibrary`] for the WGSL of a shader class with a set
//! of feature names switched on. [`BuiltinShaders`] serves the sources below
//! and resolves `//#if NAME`, `//#else` and `//#endif` lines against the
//! features.

use crate::render_graph::ShaderClass;

pub const SHADOW: ShaderClass = ShaderClass("shadow");
pub const ENVIRONMENT: ShaderClass = ShaderClass("environment");
pub const GEOMETRY: ShaderClass = ShaderClass("geometry");
/// Geometry shader for alpha-blended batches
pub const GEOMETRY_BLEND: ShaderClass = ShaderClass("geometry_blend");
pub const SSAO: ShaderClass = ShaderClass("ssao");
pub const OUTPUT: ShaderClass = ShaderClass("output");

/// Source provider for shader classes
pub trait ShaderLibrary {
    /// WGSL source for `shader` with `features` enabled, or `None` if the
    /// library does not know the class.
    fn source(&self, shader: ShaderClass, features: &[&str]) -> Option<String>;
}

/// The WGSL shipped with the crate
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinShaders;

impl ShaderLibrary for BuiltinShaders {
    fn source(&self, shader: ShaderClass, features: &[&str]) -> Option<String> {
        let raw = match shader {
            SHADOW => SHADOW_SHADER,
            ENVIRONMENT => ENVIRONMENT_SHADER,
            GEOMETRY => GEOMETRY_SHADER,
            GEOMETRY_BLEND => {
                let mut features = features.to_vec();
                features.push("BLEND");
                return Some(preprocess(GEOMETRY_SHADER, &features));
            }
            SSAO => SSAO_SHADER,
            OUTPUT => OUTPUT_SHADER,
            _ => return None,
        };
        Some(preprocess(raw, features))
    }
}

/// Keep the lines whose enclosing `//#if` blocks are satisfied by `features`.
pub fn preprocess(source: &str, features: &[&str]) -> String {
    // One entry per open block: (block active, any branch taken)
    let mut blocks: Vec<(bool, bool)> = Vec::new();
    let mut out = String::with_capacity(source.len());

    for line in source.lines() {
        let trimmed = line.trim();
        let active = blocks.iter().all(|(active, _)| *active);

        if let Some(name) = trimmed.strip_prefix("//#if ") {
            let taken = features.contains(&name.trim());
            blocks.push((taken, taken));
        } else if trimmed == "//#else" {
            if let Some((active, taken)) = blocks.last_mut() {
                *active = !*taken;
                *taken = true;
            }
        } else if trimmed == "//#endif" {
            blocks.pop();
        } else if active {
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

/// Depth-only cascade rendering
pub const SHADOW_SHADER: &str = r#"
struct VertexInput {
    @location(0) position: vec3<f32>,
}

struct Cascade {
    view_proj: mat4x4<f32>,
}

@group(0) @binding(0) var<uniform> cascade: Cascade;

@vertex
fn vs_main(input: VertexInput) -> @builtin(position) vec4<f32> {
    return cascade.view_proj * vec4<f32>(input.position, 1.0);
}
"#;

/// Procedural sky rendered into each cube face
pub const ENVIRONMENT_SHADER: &str = r#"
struct Face {
    inv_view_proj: mat4x4<f32>,
    zenith: vec4<f32>,
    horizon: vec4<f32>,
}

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) ndc: vec2<f32>,
}

@group(0) @binding(0) var<uniform> face: Face;

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> VertexOutput {
    var output: VertexOutput;
    let uv = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    let ndc = uv * 2.0 - 1.0;
    output.position = vec4<f32>(ndc, 0.0, 1.0);
    output.ndc = ndc;
    return output;
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let world = face.inv_view_proj * vec4<f32>(input.ndc, 1.0, 1.0);
    let direction = normalize(world.xyz / world.w);
    let t = clamp(direction.y * 0.5 + 0.5, 0.0, 1.0);
    return vec4<f32>(mix(face.horizon.rgb, face.zenith.rgb, t), 1.0);
}
"#;

/// Forward-lit scene geometry
pub const GEOMETRY_SHADER: &str = r#"
struct Camera {
    view: mat4x4<f32>,
    proj: mat4x4<f32>,
    view_proj: mat4x4<f32>,
    position: vec4<f32>,
    near_far: vec4<f32>,
}

struct Frame {
    camera: Camera,
    sun_direction: vec4<f32>,
    sun_color: vec4<f32>,
}

struct Material {
    base_color: vec4<f32>,
}

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
    @location(3) tangent: vec4<f32>,
}

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) world_position: vec3<f32>,
    @location(1) world_normal: vec3<f32>,
    @location(2) @interpolate(flat) instance: u32,
}

struct FragmentOutput {
    @location(0) color: vec4<f32>,
//#if NORMALS
    @location(1) normal: vec4<f32>,
//#endif
//#if IDS
//#if NORMALS
    @location(2) id: u32,
//#else
    @location(1) id: u32,
//#endif
//#endif
}

@group(0) @binding(0) var<uniform> frame: Frame;

//#if SHADOWS
struct Cascades {
    view_proj: array<mat4x4<f32>, 8>,
    count: vec4<u32>,
}

@group(1) @binding(0) var shadow_map: texture_depth_2d_array;
@group(1) @binding(1) var shadow_sampler: sampler_comparison;
@group(1) @binding(2) var<uniform> cascades: Cascades;
//#endif
//#if ENVIRONMENT
@group(1) @binding(3) var environment_map: texture_cube<f32>;
@group(1) @binding(4) var environment_sampler: sampler;
//#endif

@group(2) @binding(0) var<uniform> material: Material;

@vertex
fn vs_main(input: VertexInput, @builtin(instance_index) instance: u32) -> VertexOutput {
    var output: VertexOutput;
    output.world_position = input.position;
    output.world_normal = normalize(input.normal);
    output.clip_position = frame.camera.view_proj * vec4<f32>(input.position, 1.0);
    output.instance = instance;
    return output;
}

//#if SHADOWS
fn shadow_factor(world_position: vec3<f32>) -> f32 {
    for (var i = 0u; i < cascades.count.x; i = i + 1u) {
        let clip = cascades.view_proj[i] * vec4<f32>(world_position, 1.0);
        let ndc = clip.xyz / clip.w;
        if (all(abs(ndc.xy) <= vec2<f32>(1.0)) && ndc.z >= 0.0 && ndc.z <= 1.0) {
            let uv = vec2<f32>(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5);
            return textureSampleCompareLevel(shadow_map, shadow_sampler, uv, i32(i), ndc.z - 0.002);
        }
    }
    return 1.0;
}
//#endif

@fragment
fn fs_main(input: VertexOutput) -> FragmentOutput {
    var output: FragmentOutput;
    let normal = normalize(input.world_normal);
    let to_sun = -normalize(frame.sun_direction.xyz);

    var lit = max(dot(normal, to_sun), 0.0);
//#if SHADOWS
    lit = lit * shadow_factor(input.world_position);
//#endif

    var ambient = vec3<f32>(0.03);
//#if ENVIRONMENT
    ambient = textureSampleLevel(environment_map, environment_sampler, normal, 0.0).rgb * 0.3;
//#endif

    let albedo = material.base_color.rgb;
    let color = albedo * (ambient + frame.sun_color.rgb * lit);
//#if BLEND
    output.color = vec4<f32>(color, material.base_color.a);
//#else
    output.color = vec4<f32>(color, 1.0);
//#endif
//#if NORMALS
    let view_normal = (frame.camera.view * vec4<f32>(normal, 0.0)).xyz;
    output.normal = vec4<f32>(normalize(view_normal) * 0.5 + 0.5, 1.0);
//#endif
//#if IDS
    output.id = input.instance + 1u;
//#endif
    return output;
}
"#;

/// Hemisphere-sampled ambient occlusion at reduced resolution
pub const SSAO_SHADER: &str = r#"
struct Params {
    proj: mat4x4<f32>,
    inv_proj: mat4x4<f32>,
    radius_bias: vec4<f32>,
}

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@group(0) @binding(0) var depth_map: texture_depth_2d;
@group(0) @binding(1) var normal_map: texture_2d<f32>;
@group(0) @binding(2) var<uniform> params: Params;

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> VertexOutput {
    var output: VertexOutput;
    let uv = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    output.position = vec4<f32>(uv * 2.0 - 1.0, 0.0, 1.0);
    output.uv = vec2<f32>(uv.x, 1.0 - uv.y);
    return output;
}

fn view_position(uv: vec2<f32>, depth: f32) -> vec3<f32> {
    let ndc = vec4<f32>(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0, depth, 1.0);
    let view = params.inv_proj * ndc;
    return view.xyz / view.w;
}

fn load_depth(uv: vec2<f32>) -> f32 {
    let size = vec2<f32>(textureDimensions(depth_map));
    let texel = clamp(vec2<i32>(uv * size), vec2<i32>(0), vec2<i32>(size) - 1);
    return textureLoad(depth_map, texel, 0);
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let depth = load_depth(input.uv);
    if (depth >= 1.0) {
        return vec4<f32>(1.0);
    }
    let size = vec2<f32>(textureDimensions(normal_map));
    let texel = clamp(vec2<i32>(input.uv * size), vec2<i32>(0), vec2<i32>(size) - 1);
    let normal = normalize(textureLoad(normal_map, texel, 0).xyz * 2.0 - 1.0);
    let origin = view_position(input.uv, depth);

    var kernel = array<vec3<f32>, 8>(
        vec3<f32>(0.36, 0.12, 0.45),
        vec3<f32>(-0.25, 0.31, 0.21),
        vec3<f32>(0.11, -0.42, 0.33),
        vec3<f32>(-0.52, -0.18, 0.62),
        vec3<f32>(0.67, -0.07, 0.29),
        vec3<f32>(-0.09, 0.71, 0.48),
        vec3<f32>(0.23, 0.54, 0.77),
        vec3<f32>(-0.71, 0.44, 0.36),
    );
    var occlusion = 0.0;
    for (var i = 0; i < 8; i = i + 1) {
        var offset = kernel[i];
        if (dot(offset, normal) < 0.0) {
            offset = -offset;
        }
        let sample_position = origin + offset * params.radius_bias.x;
        let clip = params.proj * vec4<f32>(sample_position, 1.0);
        let ndc = clip.xy / clip.w;
        let sample_uv = vec2<f32>(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5);
        let scene = view_position(sample_uv, load_depth(sample_uv));
        if (scene.z >= sample_position.z + params.radius_bias.y) {
            occlusion = occlusion + 1.0;
        }
    }
    return vec4<f32>(1.0 - occlusion / 8.0);
}
"#;

/// Final composite into the display format
pub const OUTPUT_SHADER: &str = r#"
struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@group(0) @binding(0) var color_map: texture_2d<f32>;
@group(0) @binding(1) var linear_sampler: sampler;
//#if AO
@group(0) @binding(2) var ao_map: texture_2d<f32>;
//#endif

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> VertexOutput {
    var output: VertexOutput;
    let uv = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    output.position = vec4<f32>(uv * 2.0 - 1.0, 0.0, 1.0);
    output.uv = vec2<f32>(uv.x, 1.0 - uv.y);
    return output;
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    var color = textureSample(color_map, linear_sampler, input.uv).rgb;
//#if AO
    color = color * textureSample(ao_map, linear_sampler, input.uv).r;
//#endif
//#if TONEMAP
    color = color / (color + vec3<f32>(1.0));
//#endif
    return vec4<f32>(color, 1.0);
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_selects_branches() {
        let source = "a\n//#if X\nb\n//#else\nc\n//#endif\nd\n";
        assert_eq!(preprocess(source, &["X"]), "a\nb\nd\n");
        assert_eq!(preprocess(source, &[]), "a\nc\nd\n");
    }

    #[test]
    fn test_preprocess_nested_blocks() {
        let source = "//#if A\n//#if B\nab\n//#else\na\n//#endif\n//#endif\n";
        assert_eq!(preprocess(source, &["A", "B"]), "ab\n");
        assert_eq!(preprocess(source, &["A"]), "a\n");
        assert_eq!(preprocess(source, &["B"]), "");
    }

    #[test]
    fn test_id_output_location_follows_normals() {
        let with_normals = BuiltinShaders.source(GEOMETRY, &["NORMALS", "IDS"]).unwrap();
        assert!(with_normals.contains("@location(2) id: u32"));

        let ids_only = BuiltinShaders.source(GEOMETRY, &["IDS"]).unwrap();
        assert!(ids_only.contains("@location(1) id: u32"));
        assert!(!ids_only.contains("normal: vec4<f32>,"));
    }

    #[test]
    fn test_blend_class_enables_blend_feature() {
        let blend = BuiltinShaders.source(GEOMETRY_BLEND, &[]).unwrap();
        assert!(blend.contains("material.base_color.a"));
        assert!(BuiltinShaders.source(ShaderClass("unknown"), &[]).is_none());
    }
}
