use std::borrow::Cow;

use wgpu::naga::ShaderStage;

use crate::device::ProgramKind;

/// Compiles the static full-screen triangle vertex shader.
pub(crate) fn compile_vertex_shader(device: &wgpu::Device) -> wgpu::ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("fullscreen triangle vertex"),
        source: wgpu::ShaderSource::Glsl {
            shader: Cow::Borrowed(VERTEX_SHADER_GLSL),
            stage: ShaderStage::Vertex,
            defines: &[],
        },
    })
}

/// Compiles the fragment program for one CRT stage.
pub(crate) fn compile_program(device: &wgpu::Device, kind: ProgramKind) -> wgpu::ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(kind.name()),
        source: wgpu::ShaderSource::Glsl {
            shader: Cow::Owned(program_source(kind)),
            stage: ShaderStage::Fragment,
            defines: &[],
        },
    })
}

/// Prepends [`HEADER`] to the body of `kind`.
fn program_source(kind: ProgramKind) -> String {
    let body = match kind {
        ProgramKind::Color => COLOR,
        ProgramKind::Ghosting => GHOSTING,
        ProgramKind::Blur => BLUR,
        ProgramKind::Phosphor => PHOSPHOR,
        ProgramKind::Blend => BLEND,
        ProgramKind::BlackCorrection => BLACK_CORRECTION,
        ProgramKind::Sharpen => SHARPEN,
        ProgramKind::Effects => EFFECTS,
    };
    format!("{HEADER}\n{body}")
}

/// Shared prologue of every stage program.
///
/// The uniform block layout must match `StageUniforms` in `gpu/uniforms.rs`.
/// `resolution` carries target width/height then source width/height. Every
/// program samples with `textureLod` so sampling inside loops and branches
/// needs no derivatives.
const HEADER: &str = r"#version 450
layout(location = 0) in vec2 v_uv;
layout(location = 0) out vec4 outColor;

layout(std140, set = 0, binding = 0) uniform StageParams {
    vec4 resolution;
    vec4 params0;
    vec4 params1;
} ubo;

layout(set = 1, binding = 0) uniform texture2D stage_texture0;
layout(set = 1, binding = 1) uniform sampler stage_sampler;
layout(set = 1, binding = 2) uniform texture2D stage_texture1;

#define Texture0 sampler2D(stage_texture0, stage_sampler)
#define Texture1 sampler2D(stage_texture1, stage_sampler)

vec3 source(vec2 uv) {
    return textureLod(Texture0, uv, 0.0).rgb;
}
";

const COLOR: &str = r"void main() {
    outColor = vec4(source(v_uv), 1.0);
}
";

const GHOSTING: &str = r"void main() {
    vec2 offset = vec2(3.0 / ubo.resolution.x, 0.0);
    vec3 color = source(v_uv);
    vec3 ghost = source(v_uv - offset) * ubo.params0.x;
    outColor = vec4(max(color, ghost), 1.0);
}
";

const BLUR: &str = r"void main() {
    int radius = int(ubo.params0.x);
    vec2 texel = vec2(1.0) / ubo.resolution.xy;
    vec3 sum = vec3(0.0);
    float count = 0.0;
    for (int y = -4; y <= 4; y++) {
        for (int x = -4; x <= 4; x++) {
            if (abs(x) <= radius && abs(y) <= radius) {
                sum += source(v_uv + vec2(float(x), float(y)) * texel);
                count += 1.0;
            }
        }
    }
    outColor = vec4(sum / count, 1.0);
}
";

const PHOSPHOR: &str = r"void main() {
    vec3 color = source(v_uv);
    vec3 previous = textureLod(Texture1, v_uv, 0.0).rgb * ubo.params0.x;
    outColor = vec4(max(color, previous), 1.0);
}
";

const BLEND: &str = r"void main() {
    vec3 a = source(v_uv);
    vec3 b = textureLod(Texture1, v_uv, 0.0).rgb;
    outColor = vec4(mix(a, b, ubo.params0.x), 1.0);
}
";

const BLACK_CORRECTION: &str = r"void main() {
    float level = ubo.params0.x;
    outColor = vec4(vec3(level) + source(v_uv) * (1.0 - level), 1.0);
}
";

const SHARPEN: &str = r"void main() {
    vec2 texel = vec2(1.0) / ubo.resolution.xy;
    vec3 center = source(v_uv);
    vec3 neighbours = source(v_uv + vec2(-texel.x, 0.0))
        + source(v_uv + vec2(texel.x, 0.0))
        + source(v_uv + vec2(0.0, -texel.y))
        + source(v_uv + vec2(0.0, texel.y));
    vec3 sharpened = center + ubo.params0.x * (center - neighbours * 0.25);
    outColor = vec4(clamp(sharpened, 0.0, 1.0), 1.0);
}
";

/// params0 = (curve, scanlines, mask, noise), params1 = (fringing, frame, -, -).
const EFFECTS: &str = r"vec2 barrel(vec2 uv, float amount) {
    vec2 c = uv * 2.0 - 1.0;
    vec2 b = c + c * c.yx * c.yx * amount * 0.25;
    return b * 0.5 + 0.5;
}

void main() {
    vec2 uv = barrel(v_uv, ubo.params0.x);
    if (uv.x < 0.0 || uv.x > 1.0 || uv.y < 0.0 || uv.y > 1.0) {
        outColor = vec4(0.0, 0.0, 0.0, 1.0);
        return;
    }

    float fringe = ubo.params1.x * 2.0 / ubo.resolution.x;
    vec3 color = vec3(
        source(uv + vec2(fringe, 0.0)).r,
        source(uv).g,
        source(uv - vec2(fringe, 0.0)).b
    );

    if (mod(floor(gl_FragCoord.y), 2.0) >= 1.0) {
        color *= 1.0 - ubo.params0.y * 0.5;
    }

    float dim = 1.0 - ubo.params0.z * 0.5;
    float column = mod(floor(gl_FragCoord.x), 3.0);
    vec3 mask = vec3(dim);
    if (column < 1.0) {
        mask.r = 1.0;
    } else if (column < 2.0) {
        mask.g = 1.0;
    } else {
        mask.b = 1.0;
    }
    color *= mask;

    float grain = fract(sin(dot(gl_FragCoord.xy + vec2(ubo.params1.y), vec2(12.9898, 78.233))) * 43758.5453);
    color += (grain * 2.0 - 1.0) * ubo.params0.w * 0.1;

    outColor = vec4(clamp(color, 0.0, 1.0), 1.0);
}
";

/// Full-screen triangle; `v_uv` has its origin at the top-left so that
/// texture rows and render target rows line up without flipping.
const VERTEX_SHADER_GLSL: &str = r"#version 450
layout(location = 0) out vec2 v_uv;

const vec2 positions[3] = vec2[3](
    vec2(-1.0, -3.0),
    vec2(3.0, 1.0),
    vec2(-1.0, 1.0)
);

void main() {
    uint vertex_index = uint(gl_VertexIndex);
    vec2 pos = positions[vertex_index];
    v_uv = vec2(pos.x * 0.5 + 0.5, 0.5 - pos.y * 0.5);
    gl_Position = vec4(pos, 0.0, 1.0);
}
";
