//! Debugger stack-frame ring, ported from the core's stack-trace data
//! structure: an ordered sequence of call frames supporting push, pop,
//! clear, depth-query, and a truncating textual-format operation.
//!
//! `frame(0)` is always the newest (most recently pushed) frame; frame
//! index grows toward older frames, mirroring a typical "unwind" view.

/// One pushed call frame. `regs` is an opaque, fixed-size register
/// snapshot whose interpretation is owned by the `format_registers`
/// callback installed on the owning `StackTrace`.
#[derive(Debug, Clone)]
pub struct StackFrame {
    pub call_address: u32,
    pub entry_address: u32,
    pub frame_base_address: u32,
    pub regs: Vec<u8>,
    pub finished: bool,
    pub break_when_finished: bool,
    pub interrupt: bool,
}

/// Formats a frame's register snapshot into `out`, returning the text
/// actually written (may be truncated to fit the caller's budget).
pub trait FormatRegisters {
    fn format(&self, frame: &StackFrame) -> String;
}

impl<F: Fn(&StackFrame) -> String> FormatRegisters for F {
    fn format(&self, frame: &StackFrame) -> String {
        self(frame)
    }
}

pub struct StackTrace {
    frames: Vec<StackFrame>,
    registers_size: usize,
    format_registers: Option<Box<dyn FormatRegisters>>,
}

impl StackTrace {
    pub fn new(registers_size: usize) -> Self {
        Self {
            frames: Vec::new(),
            registers_size,
            format_registers: None,
        }
    }

    pub fn set_format_registers(&mut self, f: impl FormatRegisters + 'static) {
        self.format_registers = Some(Box::new(f));
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn push(&mut self, pc: u32, entry_address: u32, sp: u32, regs: &[u8]) -> &StackFrame {
        let mut snapshot = vec![0u8; self.registers_size];
        let n = snapshot.len().min(regs.len());
        snapshot[..n].copy_from_slice(&regs[..n]);
        self.frames.push(StackFrame {
            call_address: pc,
            entry_address,
            frame_base_address: sp,
            regs: snapshot,
            finished: false,
            break_when_finished: false,
            interrupt: false,
        });
        self.frames.last().unwrap()
    }

    pub fn pop(&mut self) {
        self.frames.pop();
    }

    /// `frame` is an external index, 0 = newest. Maps to the internal
    /// vector index `depth - frame - 1`; returns `None` once `frame`
    /// reaches or exceeds the current depth.
    pub fn frame(&self, frame: usize) -> Option<&StackFrame> {
        let depth = self.depth();
        if frame >= depth {
            return None;
        }
        self.frames.get(depth - frame - 1)
    }

    pub fn frame_mut(&mut self, frame: usize) -> Option<&mut StackFrame> {
        let depth = self.depth();
        if frame >= depth {
            return None;
        }
        let idx = depth - frame - 1;
        self.frames.get_mut(idx)
    }

    /// Formats frame `frame` as:
    /// `"#N  <entry> (<registers>)\n    at <call> [<entry>+<offset>]\n"`
    /// where `<entry>`/`<offset>` are relative to the frame's own entry
    /// point (offset = call - entry). The leading entry address, the
    /// register block, and the bracketed suffix are all gated on whether
    /// an older frame exists beneath this one — the outermost frame has
    /// nothing for the caller-relative fields to anchor to, and collapses
    /// to a bare "at <call>\n" even when a register formatter is
    /// installed.
    ///
    /// The result is truncated to `max_len` bytes with no partial
    /// numeric field ever emitted.
    pub fn format_frame(&self, frame: usize, max_len: usize) -> String {
        let mut out = format!("#{}  ", frame);

        let stack_frame = match self.frame(frame) {
            Some(f) => f,
            None => {
                out.push_str("no stack frame available)\n");
                return truncate_whole_fields(&out, max_len);
            }
        };

        // An older frame exists iff this is not the bottom of the stack.
        let has_older = self.frame(frame + 1).is_some();

        if has_older {
            out.push_str(&format!("{:08X} ", stack_frame.entry_address));
        }

        if has_older {
            if let Some(fmt) = &self.format_registers {
                out.push('(');
                out.push_str(&fmt.format(stack_frame));
                out.push_str(")\n    ");
            }
        }

        if has_older {
            let offset = stack_frame.call_address as i64 - stack_frame.entry_address as i64;
            out.push_str(&format!(
                "at {:08X} [{:08X}+{}]\n",
                stack_frame.call_address, stack_frame.entry_address, offset
            ));
        } else {
            out.push_str(&format!("at {:08X}\n", stack_frame.call_address));
        }

        truncate_whole_fields(&out, max_len)
    }
}

/// Truncates `s` to at most `max_len` bytes without splitting a UTF-8
/// code point (the format strings above are all ASCII, so this reduces
/// to a byte-boundary clamp).
fn truncate_whole_fields(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}
