//! GPU resource manager built on `glow`: shader/program lifetime, per-layer
//! framebuffers and textures, the VRAM staging texture, and the unit quad
//! used to composite every layer (§9 "GPU-accelerated rendering path").
#![allow(unsafe_code)]

use glow::HasContext;

use crate::error::RendererError;

pub struct Program {
    pub handle: glow::Program,
}

/// Compiles one shader stage, returning a detailed error on failure
/// (§11: this is one of the renderer's two fallible operations).
fn compile_shader(
    gl: &glow::Context,
    kind: u32,
    source: &str,
    program_name: &'static str,
    stage: &'static str,
) -> Result<glow::Shader, RendererError> {
    unsafe {
        let shader = gl.create_shader(kind).map_err(|_| RendererError::ResourceAlloc {
            resource: "shader",
        })?;
        gl.shader_source(shader, source);
        gl.compile_shader(shader);
        if !gl.get_shader_compile_status(shader) {
            let log = gl.get_shader_info_log(shader);
            gl.delete_shader(shader);
            return Err(RendererError::ShaderCompile {
                program: program_name,
                stage,
                log,
            });
        }
        Ok(shader)
    }
}

/// Links a vertex+fragment pair into a program, cleaning up the shader
/// objects afterward regardless of outcome.
pub fn link_program(
    gl: &glow::Context,
    vertex_src: &str,
    fragment_src: &str,
    program_name: &'static str,
) -> Result<Program, RendererError> {
    unsafe {
        let vs = compile_shader(gl, glow::VERTEX_SHADER, vertex_src, program_name, "vertex")?;
        let fs = match compile_shader(gl, glow::FRAGMENT_SHADER, fragment_src, program_name, "fragment") {
            Ok(fs) => fs,
            Err(e) => {
                gl.delete_shader(vs);
                return Err(e);
            }
        };

        let handle = gl.create_program().map_err(|_| RendererError::ResourceAlloc {
            resource: "program",
        })?;
        gl.attach_shader(handle, vs);
        gl.attach_shader(handle, fs);
        gl.link_program(handle);

        let linked = gl.get_program_link_status(handle);
        gl.delete_shader(vs);
        gl.delete_shader(fs);

        if !linked {
            let log = gl.get_program_info_log(handle);
            return Err(RendererError::ProgramLink {
                program: program_name,
                log,
            });
        }

        Ok(Program { handle })
    }
}

/// Allocates an empty RGBA8 2D texture of the given size, used for per-layer
/// framebuffers and the VRAM staging texture.
pub fn create_rgba8_texture(
    gl: &glow::Context,
    width: i32,
    height: i32,
) -> Result<glow::Texture, RendererError> {
    unsafe {
        let tex = gl
            .create_texture()
            .map_err(|_| RendererError::ResourceAlloc { resource: "texture" })?;
        gl.bind_texture(glow::TEXTURE_2D, Some(tex));
        gl.tex_image_2d(
            glow::TEXTURE_2D,
            0,
            glow::RGBA8 as i32,
            width,
            height,
            0,
            glow::RGBA,
            glow::UNSIGNED_BYTE,
            glow::PixelUnpackData::Slice(None),
        );
        gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MIN_FILTER, glow::NEAREST as i32);
        gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAG_FILTER, glow::NEAREST as i32);
        gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_S, glow::CLAMP_TO_EDGE as i32);
        gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_T, glow::CLAMP_TO_EDGE as i32);
        Ok(tex)
    }
}

/// A single background layer's render target: a framebuffer bound to an
/// RGBA8 colour texture, one per background plane.
pub struct LayerTarget {
    pub framebuffer: glow::Framebuffer,
    pub texture: glow::Texture,
}

pub fn create_layer_target(gl: &glow::Context, width: i32, height: i32) -> Result<LayerTarget, RendererError> {
    unsafe {
        let texture = create_rgba8_texture(gl, width, height)?;
        let framebuffer = gl
            .create_framebuffer()
            .map_err(|_| RendererError::ResourceAlloc {
                resource: "framebuffer",
            })?;
        gl.bind_framebuffer(glow::FRAMEBUFFER, Some(framebuffer));
        gl.framebuffer_texture_2d(
            glow::FRAMEBUFFER,
            glow::COLOR_ATTACHMENT0,
            glow::TEXTURE_2D,
            Some(texture),
            0,
        );
        gl.bind_framebuffer(glow::FRAMEBUFFER, None);
        Ok(LayerTarget { framebuffer, texture })
    }
}

pub fn destroy_layer_target(gl: &glow::Context, target: &LayerTarget) {
    unsafe {
        gl.delete_framebuffer(target.framebuffer);
        gl.delete_texture(target.texture);
    }
}

pub fn destroy_program(gl: &glow::Context, program: &Program) {
    unsafe {
        gl.delete_program(program.handle);
    }
}

/// Deletes a standalone texture created by `create_rgba8_texture` that
/// isn't already owned by a `LayerTarget` (e.g. the VRAM staging texture).
pub fn destroy_texture(gl: &glow::Context, texture: glow::Texture) {
    unsafe {
        gl.delete_texture(texture);
    }
}

/// Replaces a sub-rectangle of an RGBA8 texture already bound by
/// `create_rgba8_texture`/`create_layer_target`. Used both for the VRAM
/// staging texture (one call per dirty page) and for the screen target
/// (one call per flushed scanline range), so a flush only ever uploads the
/// bytes that actually changed (§4.4).
/// Reinterprets a row-major RGBA8 framebuffer as its packed byte form, for
/// `upload_sub_rgba8` calls sourcing from `Renderer`'s `[[u8;4]]` software
/// framebuffer rather than a raw VRAM byte slice.
pub fn rgba_rows_as_bytes(rows: &[[u8; 4]]) -> &[u8] {
    unsafe { core::slice::from_raw_parts(rows.as_ptr() as *const u8, rows.len() * 4) }
}

pub fn upload_sub_rgba8(gl: &glow::Context, texture: glow::Texture, x: i32, y: i32, width: i32, height: i32, data: &[u8]) {
    unsafe {
        gl.bind_texture(glow::TEXTURE_2D, Some(texture));
        gl.tex_sub_image_2d(
            glow::TEXTURE_2D,
            0,
            x,
            y,
            width,
            height,
            glow::RGBA,
            glow::UNSIGNED_BYTE,
            glow::PixelUnpackData::Slice(Some(data)),
        );
    }
}

/// The unit quad (position + UV) used to sample a layer or screen texture
/// during the finalize/present draw.
pub struct Quad {
    pub vbo: glow::Buffer,
    pub vao: glow::VertexArray,
}

#[rustfmt::skip]
const QUAD_VERTICES: [f32; 16] = [
    // x,    y,    u,   v
    -1.0, -1.0,  0.0, 0.0,
     1.0, -1.0,  1.0, 0.0,
    -1.0,  1.0,  0.0, 1.0,
     1.0,  1.0,  1.0, 1.0,
];

pub fn create_quad(gl: &glow::Context) -> Result<Quad, RendererError> {
    unsafe {
        let vbo = gl
            .create_buffer()
            .map_err(|_| RendererError::ResourceAlloc { resource: "quad vbo" })?;
        let vao = gl
            .create_vertex_array()
            .map_err(|_| RendererError::ResourceAlloc { resource: "quad vao" })?;

        gl.bind_vertex_array(Some(vao));
        gl.bind_buffer(glow::ARRAY_BUFFER, Some(vbo));
        let bytes: &[u8] = core::slice::from_raw_parts(
            QUAD_VERTICES.as_ptr() as *const u8,
            core::mem::size_of_val(&QUAD_VERTICES),
        );
        gl.buffer_data_u8_slice(glow::ARRAY_BUFFER, bytes, glow::STATIC_DRAW);

        let stride = 4 * core::mem::size_of::<f32>() as i32;
        gl.enable_vertex_attrib_array(0);
        gl.vertex_attrib_pointer_f32(0, 2, glow::FLOAT, false, stride, 0);
        gl.enable_vertex_attrib_array(1);
        gl.vertex_attrib_pointer_f32(1, 2, glow::FLOAT, false, stride, 2 * core::mem::size_of::<f32>() as i32);

        gl.bind_vertex_array(None);
        Ok(Quad { vbo, vao })
    }
}

pub fn destroy_quad(gl: &glow::Context, quad: &Quad) {
    unsafe {
        gl.delete_vertex_array(quad.vao);
        gl.delete_buffer(quad.vbo);
    }
}

/// Binds `program`, `quad`, and `texture` on texture unit 0 and draws the
/// quad as a triangle strip — the draw shared by every finalize/present
/// call (§4.8/§9).
pub fn draw_textured_quad(gl: &glow::Context, program: &Program, quad: &Quad, texture: glow::Texture) {
    unsafe {
        gl.use_program(Some(program.handle));
        gl.active_texture(glow::TEXTURE0);
        gl.bind_texture(glow::TEXTURE_2D, Some(texture));
        gl.bind_vertex_array(Some(quad.vao));
        gl.draw_arrays(glow::TRIANGLE_STRIP, 0, 4);
        gl.bind_vertex_array(None);
    }
}

#[cfg(test)]
mod tests {
    // `glow::Context` cannot be constructed without a live GL/GLES binding,
    // so this module has no unit tests; the software compositor in
    // `renderer::software` exercises the same pixel contract headlessly.
}
