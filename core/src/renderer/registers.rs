//! Register ingress: masking to hardware-writable bits, routing to shadow
//! state or to side tables that bypass the dirty bitmap entirely, per
//! §4.1. This module is pure (no GPU, no VRAM) and is the part of the
//! renderer exercised most directly by the testable properties in §8.

use super::dirty::{
    DirtySet, REG_BG0CNT, REG_BG1CNT, REG_BG2CNT, REG_BG3CNT, REG_BLDALPHA, REG_BLDCNT, REG_BLDY,
    REG_DISPCNT, REG_MOSAIC, REG_WININ, REG_WINOUT,
};

pub const SCREEN_W: i32 = 240;
pub const SCREEN_H: i32 = 160;

// Absolute MMIO addresses, matching the published GBA register map.
pub const DISPCNT: u32 = 0x0400_0000;
pub const BG0CNT: u32 = 0x0400_0008;
pub const BG1CNT: u32 = 0x0400_000A;
pub const BG2CNT: u32 = 0x0400_000C;
pub const BG3CNT: u32 = 0x0400_000E;
pub const BG0HOFS: u32 = 0x0400_0010;
pub const BG0VOFS: u32 = 0x0400_0012;
pub const BG1HOFS: u32 = 0x0400_0014;
pub const BG1VOFS: u32 = 0x0400_0016;
pub const BG2HOFS: u32 = 0x0400_0018;
pub const BG2VOFS: u32 = 0x0400_001A;
pub const BG3HOFS: u32 = 0x0400_001C;
pub const BG3VOFS: u32 = 0x0400_001E;
pub const BG2PA: u32 = 0x0400_0020;
pub const BG2PB: u32 = 0x0400_0022;
pub const BG2PC: u32 = 0x0400_0024;
pub const BG2PD: u32 = 0x0400_0026;
pub const BG2X_LO: u32 = 0x0400_0028;
pub const BG2X_HI: u32 = 0x0400_002A;
pub const BG2Y_LO: u32 = 0x0400_002C;
pub const BG2Y_HI: u32 = 0x0400_002E;
pub const BG3PA: u32 = 0x0400_0030;
pub const BG3PB: u32 = 0x0400_0032;
pub const BG3PC: u32 = 0x0400_0034;
pub const BG3PD: u32 = 0x0400_0036;
pub const BG3X_LO: u32 = 0x0400_0038;
pub const BG3X_HI: u32 = 0x0400_003A;
pub const BG3Y_LO: u32 = 0x0400_003C;
pub const BG3Y_HI: u32 = 0x0400_003E;
pub const WIN0H: u32 = 0x0400_0040;
pub const WIN1H: u32 = 0x0400_0042;
pub const WIN0V: u32 = 0x0400_0044;
pub const WIN1V: u32 = 0x0400_0046;
pub const WININ: u32 = 0x0400_0048;
pub const WINOUT: u32 = 0x0400_004A;
pub const MOSAIC: u32 = 0x0400_004C;
pub const BLDCNT: u32 = 0x0400_0050;
pub const BLDALPHA: u32 = 0x0400_0052;
pub const BLDY: u32 = 0x0400_0054;

#[derive(Debug, Clone, Copy, Default)]
pub struct WindowBounds {
    pub start: i32,
    pub end: i32,
}

/// Clamps a WIN*H/WIN*V pair the way the PPU does: "if start > end and
/// start > screen, start = 0; end clamped to screen".
fn clamp_window(start: u8, end: u8, screen: i32) -> WindowBounds {
    let mut s = start as i32;
    let mut e = end as i32;
    if e > screen || e < s {
        e = screen;
    }
    if s > screen {
        s = 0;
    }
    WindowBounds { start: s, end: e }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AffineRegs {
    pub dx: i16,
    pub dmx: i16,
    pub dy: i16,
    pub dmy: i16,
    pub refx: i32,
    pub refy: i32,
}

#[derive(Debug, Default)]
pub struct RegisterFile {
    // Shadow words for dirty-bitmap-tracked registers.
    pub dispcnt: u16,
    pub bg0cnt: u16,
    pub bg1cnt: u16,
    pub bg2cnt: u16,
    pub bg3cnt: u16,
    pub bldcnt: u16,
    pub bldalpha: u16,
    pub bldy: u16,
    pub winin: u16,
    pub winout: u16,
    pub mosaic: u16,

    // Side tables that bypass the dirty bitmap entirely (§4.1/§4.3).
    pub bg_scroll: [(u16, u16); 4], // (x, y), masked to 9 bits
    pub bg2_affine: AffineRegs,
    pub bg3_affine: AffineRegs,
    pub win0h: WindowBounds,
    pub win1h: WindowBounds,
    pub win0v: WindowBounds,
    pub win1v: WindowBounds,

    // Raw 16-bit halves kept so a write to the high half can be combined
    // with whatever the low half currently holds (hardware semantics:
    // each half is independently addressable).
    bg2x_lo: u16,
    bg2x_hi: u16,
    bg2y_lo: u16,
    bg2y_hi: u16,
    bg3x_lo: u16,
    bg3x_hi: u16,
    bg3y_lo: u16,
    bg3y_hi: u16,
}

/// Reassembles a 28-bit signed reference point from its two 16-bit
/// halves and sign-extends it to 32 bits via "shift left 4, arithmetic
/// shift right 4" (§9 Fixed-point arithmetic).
fn reassemble_refpoint(lo: u16, hi: u16) -> i32 {
    let raw = ((hi as u32) << 16) | (lo as u32);
    let raw = raw & 0x0FFF_FFFF; // 28 significant bits
    ((raw << 4) as i32) >> 4
}

impl RegisterFile {
    pub fn new() -> Self {
        let mut r = Self::default();
        // Power-on affine identity matrix, matching hardware defaults.
        r.bg2_affine.dx = 0x0100;
        r.bg2_affine.dmy = 0x0100;
        r.bg3_affine.dx = 0x0100;
        r.bg3_affine.dmy = 0x0100;
        r
    }

    /// Applies a 16-bit MMIO write, masking to hardware-writable bits and
    /// routing to shadow state (with dirty-bit suppression on no-op
    /// writes) or directly into a side table. Returns the masked value,
    /// which the emulator stores back into its own MMIO mirror. Addresses
    /// outside the table are ignored, returning the value unchanged.
    pub fn write(&mut self, dirty: &mut DirtySet, addr: u32, value: u16) -> u16 {
        self.write_dispatch(dirty, addr, value)
    }

    fn write_dispatch(&mut self, dirty: &mut DirtySet, addr: u32, value: u16) -> u16 {
        match addr {
            DISPCNT => {
                let masked = value & 0xFFF7; // bit 3 forced to zero
                set_if_changed(dirty, REG_DISPCNT, &mut self.dispcnt, masked);
                masked
            }
            BG0CNT => {
                let masked = value & 0xDFFF;
                set_if_changed(dirty, REG_BG0CNT, &mut self.bg0cnt, masked);
                masked
            }
            BG1CNT => {
                let masked = value & 0xDFFF;
                set_if_changed(dirty, REG_BG1CNT, &mut self.bg1cnt, masked);
                masked
            }
            BG2CNT => {
                let masked = value & 0xFFFF;
                set_if_changed(dirty, REG_BG2CNT, &mut self.bg2cnt, masked);
                masked
            }
            BG3CNT => {
                let masked = value & 0xFFFF;
                set_if_changed(dirty, REG_BG3CNT, &mut self.bg3cnt, masked);
                masked
            }
            BLDCNT => {
                let masked = value & 0x3FFF;
                set_if_changed(dirty, REG_BLDCNT, &mut self.bldcnt, masked);
                masked
            }
            BLDALPHA => {
                let eva = (value & 0x1F).min(0x10);
                let evb = ((value >> 8) & 0x1F).min(0x10);
                let masked = eva | (evb << 8);
                set_if_changed(dirty, REG_BLDALPHA, &mut self.bldalpha, masked);
                masked
            }
            BLDY => {
                let masked = (value & 0x1F).min(0x10);
                set_if_changed(dirty, REG_BLDY, &mut self.bldy, masked);
                masked
            }
            WININ => {
                let masked = value & 0x3F3F;
                set_if_changed(dirty, REG_WININ, &mut self.winin, masked);
                masked
            }
            WINOUT => {
                let masked = value & 0x3F3F;
                set_if_changed(dirty, REG_WINOUT, &mut self.winout, masked);
                masked
            }
            MOSAIC => {
                let masked = value & 0xFFFF;
                set_if_changed(dirty, REG_MOSAIC, &mut self.mosaic, masked);
                masked
            }

            // Scroll registers: masked to 9 bits, bypass the dirty bitmap.
            BG0HOFS => { let m = value & 0x1FF; self.bg_scroll[0].0 = m; m }
            BG0VOFS => { let m = value & 0x1FF; self.bg_scroll[0].1 = m; m }
            BG1HOFS => { let m = value & 0x1FF; self.bg_scroll[1].0 = m; m }
            BG1VOFS => { let m = value & 0x1FF; self.bg_scroll[1].1 = m; m }
            BG2HOFS => { let m = value & 0x1FF; self.bg_scroll[2].0 = m; m }
            BG2VOFS => { let m = value & 0x1FF; self.bg_scroll[2].1 = m; m }
            BG3HOFS => { let m = value & 0x1FF; self.bg_scroll[3].0 = m; m }
            BG3VOFS => { let m = value & 0x1FF; self.bg_scroll[3].1 = m; m }

            // Affine coefficients: straight 8.8 signed, bypass the bitmap.
            BG2PA => { self.bg2_affine.dx = value as i16; value }
            BG2PB => { self.bg2_affine.dmx = value as i16; value }
            BG2PC => { self.bg2_affine.dy = value as i16; value }
            BG2PD => { self.bg2_affine.dmy = value as i16; value }
            BG3PA => { self.bg3_affine.dx = value as i16; value }
            BG3PB => { self.bg3_affine.dmx = value as i16; value }
            BG3PC => { self.bg3_affine.dy = value as i16; value }
            BG3PD => { self.bg3_affine.dmy = value as i16; value }

            // Reference points: reassembled from two halves, sign-extended
            // from 28 bits, bypass the bitmap.
            BG2X_LO => { self.bg2x_lo = value; self.bg2_affine.refx = reassemble_refpoint(self.bg2x_lo, self.bg2x_hi); value }
            BG2X_HI => { self.bg2x_hi = value; self.bg2_affine.refx = reassemble_refpoint(self.bg2x_lo, self.bg2x_hi); value }
            BG2Y_LO => { self.bg2y_lo = value; self.bg2_affine.refy = reassemble_refpoint(self.bg2y_lo, self.bg2y_hi); value }
            BG2Y_HI => { self.bg2y_hi = value; self.bg2_affine.refy = reassemble_refpoint(self.bg2y_lo, self.bg2y_hi); value }
            BG3X_LO => { self.bg3x_lo = value; self.bg3_affine.refx = reassemble_refpoint(self.bg3x_lo, self.bg3x_hi); value }
            BG3X_HI => { self.bg3x_hi = value; self.bg3_affine.refx = reassemble_refpoint(self.bg3x_lo, self.bg3x_hi); value }
            BG3Y_LO => { self.bg3y_lo = value; self.bg3_affine.refy = reassemble_refpoint(self.bg3y_lo, self.bg3y_hi); value }
            BG3Y_HI => { self.bg3y_hi = value; self.bg3_affine.refy = reassemble_refpoint(self.bg3y_lo, self.bg3y_hi); value }

            // Window bounds: high byte = start, low byte = end; clamped,
            // bypass the bitmap.
            WIN0H => { self.win0h = clamp_window((value >> 8) as u8, value as u8, SCREEN_W); value }
            WIN1H => { self.win1h = clamp_window((value >> 8) as u8, value as u8, SCREEN_W); value }
            WIN0V => { self.win0v = clamp_window((value >> 8) as u8, value as u8, SCREEN_H); value }
            WIN1V => { self.win1v = clamp_window((value >> 8) as u8, value as u8, SCREEN_H); value }

            // Out-of-range register address: silently ignored (§7).
            _ => value,
        }
    }
}

fn set_if_changed(dirty: &mut DirtySet, slot: u32, shadow: &mut u16, masked: u16) {
    if *shadow != masked {
        *shadow = masked;
        dirty.set_reg(slot);
    }
}
