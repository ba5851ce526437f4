//! GPU-accelerated, per-scanline GBA PPU renderer (§1-§9).
//!
//! `Renderer` owns the CPU-side captured state (dirty bitmap, shadow
//! registers, background/sprite/window models) and, once `init` has been
//! called with a live `glow` context, the GPU resources that actually
//! produce pixels. `renderer::software` mirrors the same pixel contract in
//! pure Rust so it can be exercised without a GL context.

pub mod background;
pub mod capture;
pub mod config;
pub mod diagnostics;
pub mod dirty;
pub mod finalize;
pub mod gpu;
pub mod registers;
pub mod shaders;
pub mod software;
pub mod sprite;
pub mod window;

use background::Background;
use capture::Capture;
use config::RendererConfig;
use diagnostics::Diagnostics;
use dirty::DirtySet;
use registers::RegisterFile;
use software::CompositorInput;
use sprite::Sprite;
use window::WindowState;

use crate::error::RendererError;
use crate::video::{GBA_SCREEN_H, GBA_SCREEN_W};

const VRAM_BYTES: usize = 96 * 1024;
const PALETTE_BYTES: usize = 1024;
const OAM_BYTES: usize = sprite::OAM_BYTES;

/// The 96 KiB VRAM mirror packed 4 bytes/texel fits exactly into a
/// 256x96 RGBA8 staging texture, so each 4 KiB dirty page is a clean
/// 4-row band of that texture.
const VRAM_TEX_WIDTH: i32 = 256;
const VRAM_TEX_HEIGHT: i32 = 96;
const VRAM_TEX_ROWS_PER_PAGE: i32 = (dirty::VRAM_PAGE_SIZE as i32) / (VRAM_TEX_WIDTH * 4);

/// GPU-side resources, present once `Renderer::init` has linked the shader
/// programs and allocated the staging/screen textures against a live
/// context (§2 "Resource manager"/"Shader program set").
struct GlResources {
    bg_layer_program: gpu::Program,
    finalize_program: gpu::Program,
    obj_program: gpu::Program,
    vram_texture: glow::Texture,
    screen_target: gpu::LayerTarget,
    quad: gpu::Quad,
}

pub struct Renderer {
    dirty: DirtySet,
    regs: RegisterFile,
    backgrounds: [Background; 4],
    sprites: Vec<Sprite>,
    window: WindowState,
    capture: Capture,
    config: RendererConfig,
    diagnostics: Diagnostics,

    vram: Vec<u8>,
    palette: Vec<u8>,
    oam: Vec<u8>,

    /// Software fallback framebuffer, always kept up to date so
    /// `get_pixels` works even without a GPU context.
    framebuffer: Vec<[u8; 4]>,

    /// Dirty state accumulated since the last GPU flush. Unlike `dirty`
    /// (cleared every scanline once the software pass has consumed it),
    /// this survives across scanlines until `flush_batch` uploads and
    /// clears it (§4.4).
    gpu_dirty: DirtySet,

    gl: Option<GlResources>,
}

impl Renderer {
    /// Builds the CPU-side renderer state. Infallible: GPU resource
    /// allocation is deferred to `init`.
    pub fn new() -> Self {
        Self {
            dirty: DirtySet::new(),
            regs: RegisterFile::new(),
            backgrounds: [
                Background::new(0),
                Background::new(1),
                Background::new(2),
                Background::new(3),
            ],
            sprites: Vec::new(),
            window: WindowState::new(),
            capture: Capture::new(),
            config: RendererConfig::new(),
            diagnostics: Diagnostics::new(),
            vram: vec![0u8; VRAM_BYTES],
            palette: vec![0u8; PALETTE_BYTES],
            oam: vec![0u8; OAM_BYTES],
            framebuffer: vec![[0u8; 4]; GBA_SCREEN_W * GBA_SCREEN_H],
            gpu_dirty: DirtySet::new(),
            gl: None,
        }
    }

    /// Compiles the GPU shader programs and allocates the staging/screen
    /// textures against a live context. The only other fallible renderer
    /// entry point besides `new` (§11). On failure, the renderer remains
    /// fully usable via the software compositor; the error is recorded in
    /// diagnostics for the frontend to surface.
    pub fn init(&mut self, gl: &glow::Context) -> Result<(), RendererError> {
        let result = (|| -> Result<GlResources, RendererError> {
            let bg_layer_program = gpu::link_program(
                gl,
                &shaders::assemble(shaders::HEADER_GLES3, shaders::VERTEX_QUAD),
                &shaders::assemble(shaders::HEADER_GLES3, shaders::FRAGMENT_BG_LAYER),
                "bg_layer",
            )?;
            let finalize_program = gpu::link_program(
                gl,
                &shaders::assemble(shaders::HEADER_GLES3, shaders::VERTEX_QUAD),
                &shaders::assemble(shaders::HEADER_GLES3, shaders::FRAGMENT_FINALIZE),
                "finalize",
            )?;
            let obj_program = gpu::link_program(
                gl,
                &shaders::assemble(shaders::HEADER_GLES3, shaders::VERTEX_QUAD),
                &shaders::assemble(shaders::HEADER_GLES3, shaders::FRAGMENT_OBJ),
                "obj",
            )?;
            let vram_texture = gpu::create_rgba8_texture(gl, VRAM_TEX_WIDTH, VRAM_TEX_HEIGHT)?;
            let screen_target = gpu::create_layer_target(gl, GBA_SCREEN_W as i32, GBA_SCREEN_H as i32)?;
            let quad = gpu::create_quad(gl)?;
            Ok(GlResources {
                bg_layer_program,
                finalize_program,
                obj_program,
                vram_texture,
                screen_target,
                quad,
            })
        })();

        match result {
            Ok(resources) => {
                self.gl = Some(resources);
                Ok(())
            }
            Err(err) => {
                self.diagnostics.record_init_error(err.clone());
                Err(err)
            }
        }
    }

    /// Tears down GPU resources allocated by `init` and returns to a
    /// blank, un-initialized state. A no-op if `init` never succeeded.
    pub fn deinit(&mut self, gl: &glow::Context) {
        if let Some(resources) = self.gl.take() {
            gpu::destroy_program(gl, &resources.bg_layer_program);
            gpu::destroy_program(gl, &resources.finalize_program);
            gpu::destroy_program(gl, &resources.obj_program);
            gpu::destroy_texture(gl, resources.vram_texture);
            gpu::destroy_layer_target(gl, &resources.screen_target);
            gpu::destroy_quad(gl, &resources.quad);
        }
    }

    /// Whether `init` has succeeded and GPU resources are live.
    pub fn gpu_ready(&self) -> bool {
        self.gl.is_some()
    }

    /// Resets all CPU-side state to power-on defaults, matching `new()`.
    /// GPU resources survive a reset; only `deinit` tears them down.
    pub fn reset(&mut self) {
        let gl = self.gl.take();
        *self = Self::new();
        self.gl = gl;
    }

    pub fn write_video_register(&mut self, addr: u32, value: u16) -> u16 {
        let masked = self.regs.write(&mut self.dirty, addr, value);
        self.apply_derived_state(addr);
        masked
    }

    /// Routes freshly-written register state into the derived background/
    /// window models that the dirty bitmap doesn't track directly (§4.1).
    fn apply_derived_state(&mut self, addr: u32) {
        use registers::*;

        self.backgrounds[0].apply_cnt(self.regs.bg0cnt);
        self.backgrounds[1].apply_cnt(self.regs.bg1cnt);
        self.backgrounds[2].apply_cnt(self.regs.bg2cnt);
        self.backgrounds[3].apply_cnt(self.regs.bg3cnt);

        for (i, bg) in self.backgrounds.iter_mut().enumerate() {
            let (x, y) = self.regs.bg_scroll[i];
            bg.set_scroll(x, y);
        }
        self.backgrounds[2].affine = self.regs.bg2_affine;
        self.backgrounds[3].affine = self.regs.bg3_affine;

        for i in 0..4 {
            let target1 = self.regs.bldcnt & (1 << i) != 0;
            let target2 = self.regs.bldcnt & (1 << (8 + i)) != 0;
            self.backgrounds[i].apply_blend_targets(target1, target2);
        }

        match addr {
            WININ => self.window.apply_winin(self.regs.winin),
            WINOUT => self.window.apply_winout(self.regs.winout),
            WIN0H | WIN0V => {
                self.window.win0h = self.regs.win0h;
                self.window.win0v = self.regs.win0v;
            }
            WIN1H | WIN1V => {
                self.window.win1h = self.regs.win1h;
                self.window.win1v = self.regs.win1v;
            }
            DISPCNT => {
                self.window.win0_enabled = self.regs.dispcnt & (1 << 13) != 0;
                self.window.win1_enabled = self.regs.dispcnt & (1 << 14) != 0;
                self.window.objwin_enabled = self.regs.dispcnt & (1 << 15) != 0;
            }
            _ => {}
        }
    }

    pub fn write_vram(&mut self, addr: usize, value: u8) {
        if let Some(slot) = self.vram.get_mut(addr) {
            *slot = value;
            self.dirty.set_vram_byte_range(addr, 1);
        }
    }

    pub fn write_palette(&mut self, addr: usize, value: u8) {
        if let Some(slot) = self.palette.get_mut(addr) {
            *slot = value;
            self.dirty.palette = true;
        }
    }

    pub fn write_oam(&mut self, addr: usize, value: u8) {
        if let Some(slot) = self.oam.get_mut(addr) {
            *slot = value;
            self.dirty.oam = true;
        }
    }

    /// Renders one scanline. Dirty OAM is resolved into a fresh sprite list
    /// before drawing (§4.3 step 6); the software compositor always runs so
    /// `get_pixels` stays correct regardless of GPU availability.
    pub fn draw_scanline(&mut self, y: usize) {
        if y == 0 {
            self.capture.start_frame();
        }

        if self.dirty.oam {
            self.sprites = sprite::rebuild_clean_list(&self.oam);
            self.dirty.clear_oam();
        }

        for (i, bg) in self.backgrounds.iter_mut().enumerate() {
            let wants_enabled = self.regs.dispcnt & (1 << (8 + i)) != 0;
            bg.tick_latch(wants_enabled);
        }

        self.capture
            .draw_scanline(y, &self.dirty, &mut self.backgrounds, &mut self.window);
        self.gpu_dirty.merge(&self.dirty);

        let input = CompositorInput {
            dispcnt: self.regs.dispcnt,
            bldcnt: self.regs.bldcnt,
            bldalpha: self.regs.bldalpha,
            bldy: self.regs.bldy,
            mosaic: self.regs.mosaic,
            backgrounds: &self.backgrounds,
            sprites: &self.sprites,
            window: &self.window,
            vram: &self.vram,
            bg_palette: &self.palette[0..512],
            obj_palette: &self.palette[512..1024],
            oam: &self.oam,
        };

        if y < GBA_SCREEN_H {
            let mut row = [[0u8; 4]; GBA_SCREEN_W];
            software::render_scanline(&input, y, &mut row);
            let start = y * GBA_SCREEN_W;
            self.framebuffer[start..start + GBA_SCREEN_W].copy_from_slice(&row);
        }

        self.dirty.clear_regs();
        self.dirty.clear_vram();
        self.dirty.clear_palette();
    }

    /// Resets the deferred-batch cursor and per-frame diagnostics state.
    /// Callers rendering through the GPU path should call `present` first
    /// so the pending batch is actually uploaded rather than just dropped.
    pub fn finish_frame(&mut self) {
        self.capture.mark_flushed(GBA_SCREEN_H);
        self.diagnostics.start_frame();
    }

    /// Uploads exactly the bytes that changed since the last flush — dirty
    /// VRAM pages into the staging texture, and the pending scanline range
    /// into `screen_target` — then marks the batch flushed (§4.4). A no-op
    /// if there is nothing pending or `init` hasn't succeeded.
    fn flush_batch(&mut self, gl: &glow::Context) {
        let Some((start, end)) = self.capture.should_flush() else {
            return;
        };
        let Some(resources) = &self.gl else {
            return;
        };

        for page in 0..dirty::VRAM_PAGE_COUNT {
            if !self.gpu_dirty.is_vram_page_dirty(page) {
                continue;
            }
            let byte_off = page * dirty::VRAM_PAGE_SIZE;
            let row0 = page as i32 * VRAM_TEX_ROWS_PER_PAGE;
            gpu::upload_sub_rgba8(
                gl,
                resources.vram_texture,
                0,
                row0,
                VRAM_TEX_WIDTH,
                VRAM_TEX_ROWS_PER_PAGE,
                &self.vram[byte_off..byte_off + dirty::VRAM_PAGE_SIZE],
            );
        }

        let height = (end - start) as i32;
        let row_start = start * GBA_SCREEN_W;
        let row_end = end * GBA_SCREEN_W;
        gpu::upload_sub_rgba8(
            gl,
            resources.screen_target.texture,
            0,
            start as i32,
            GBA_SCREEN_W as i32,
            height,
            gpu::rgba_rows_as_bytes(&self.framebuffer[row_start..row_end]),
        );

        self.gpu_dirty.clear_all();
        self.capture.mark_flushed(end);
    }

    /// Flushes any pending batch, then draws the composited screen target
    /// to whatever framebuffer is currently bound (§9). Cheap to call once
    /// per displayed frame; a no-op if `init` hasn't succeeded.
    pub fn present(&mut self, gl: &glow::Context) {
        self.flush_batch(gl);
        if let Some(resources) = &self.gl {
            gpu::draw_textured_quad(gl, &resources.finalize_program, &resources.quad, resources.screen_target.texture);
        }
    }

    /// Returns the current framebuffer as packed RGBA8 bytes.
    pub fn get_pixels(&self, out: &mut [u8]) {
        let n = self.framebuffer.len().min(out.len() / 4);
        for i in 0..n {
            let o = i * 4;
            out[o..o + 4].copy_from_slice(&self.framebuffer[i]);
        }
    }

    /// Overwrites the framebuffer directly, for frontends that capture
    /// externally-rendered frames (e.g. a replay tool).
    pub fn put_pixels(&mut self, src: &[u8]) {
        let n = self.framebuffer.len().min(src.len() / 4);
        for i in 0..n {
            let o = i * 4;
            self.framebuffer[i].copy_from_slice(&src[o..o + 4]);
        }
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut RendererConfig {
        &mut self.config
    }

    pub fn last_init_error(&self) -> Option<&RendererError> {
        self.diagnostics.last_init_error.as_ref()
    }
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}
