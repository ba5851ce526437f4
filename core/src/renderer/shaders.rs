//! GLSL sources for the per-mode shader programs (§9 "Shader toolchain").
//! Kept as plain `const` strings, selected by header at link time depending
//! on the `glow` context profile (desktop GL vs. GLES/WebGL).

pub const HEADER_GLES3: &str = "#version 300 es\nprecision highp float;\nprecision highp int;\n";
pub const HEADER_GL150: &str = "#version 150 core\n";

pub const VERTEX_QUAD: &str = r#"
in vec2 a_pos;
in vec2 a_uv;
out vec2 v_uv;

void main() {
    v_uv = a_uv;
    gl_Position = vec4(a_pos, 0.0, 1.0);
}
"#;

/// Mode 0 fragment body: samples a text-mode tile layer from a pre-expanded
/// RGBA8 layer texture produced by the CPU-side tile walk; the shader's job
/// is compositing, not tile decode, which mirrors how the reference GL path
/// keeps per-layer framebuffers and only blends/finalizes on the GPU.
pub const FRAGMENT_BG_LAYER: &str = r#"
in vec2 v_uv;
out vec4 fragColor;
uniform sampler2D u_layer;

void main() {
    vec4 c = texture(u_layer, v_uv);
    if (c.a == 0.0) {
        discard;
    }
    fragColor = c;
}
"#;

/// Finalize pass: alpha/brighten/darken blend between the two highest
/// layers selected by the CPU-side priority resolution, matching
/// `renderer::finalize`'s formulas exactly so both paths define the same
/// pixel contract.
pub const FRAGMENT_FINALIZE: &str = r#"
in vec2 v_uv;
out vec4 fragColor;

uniform sampler2D u_top;
uniform sampler2D u_second;
uniform int u_blend_mode; // 0=none 1=alpha 2=brighten 3=darken
uniform float u_eva;
uniform float u_evb;
uniform float u_evy;

void main() {
    vec4 top = texture(u_top, v_uv);
    vec4 second = texture(u_second, v_uv);
    vec3 result = top.rgb;

    if (u_blend_mode == 1) {
        result = clamp(top.rgb * u_eva + second.rgb * u_evb, 0.0, 1.0);
    } else if (u_blend_mode == 2) {
        result = top.rgb + (vec3(1.0) - top.rgb) * u_evy;
    } else if (u_blend_mode == 3) {
        result = top.rgb - top.rgb * u_evy;
    }

    fragColor = vec4(result, 1.0);
}
"#;

/// Sprite colour+flags pass: writes colour to attachment 0 and
/// (priority, semi-transparent, obj-window) flags to attachment 1, for the
/// stencil-gated priority-rewrite pass to consume.
pub const FRAGMENT_OBJ: &str = r#"
in vec2 v_uv;
layout(location = 0) out vec4 fragColor;
layout(location = 1) out vec4 fragFlags;
uniform sampler2D u_tiles;
uniform float u_priority;
uniform float u_semi_transparent;
uniform float u_obj_window;

void main() {
    vec4 c = texture(u_tiles, v_uv);
    if (c.a == 0.0) {
        discard;
    }
    fragColor = c;
    fragFlags = vec4(u_priority, u_semi_transparent, u_obj_window, 1.0);
}
"#;

pub fn assemble(header: &str, body: &str) -> String {
    format!("{header}{body}")
}
