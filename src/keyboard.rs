//! Terminal multiplexer: keystroke FIFO with paced delivery, plus the CRT's
//! byte-stream output sink.
//!
//! Per `spec.md` §4.6 and the non-goal in §1, the CRT itself (glyph
//! rendering, fonts, widgets) is external; this card only multiplexes a
//! byte stream in each direction: host keystrokes (already mapped to Wang
//! keycodes) flow in through [`TermMux::push_key`] and are drained one at a
//! time, paced by an internal timer, into `poll()`; bytes the CPU writes
//! out via OBS/CBS accumulate in an output sink a host-side terminal reads
//! with [`TermMux::drain_output`].
//!
//! `IoCardKeyboard.cpp`/`.h` (the concrete timing source cited by
//! `UiCrt_Keyboard.cpp`'s `#include`) is not present in the retrieved
//! source pack, so the UART-rate constant below is a documented
//! approximation rather than a figure pulled from the original; see
//! `DESIGN.md`.

use std::collections::VecDeque;

use crate::bus::Card;
use crate::observable::{Observable, Value};
use crate::scheduler::Scheduler;
use crate::ticks::Ticks;
use crate::trace::Trace;

/// Maximum depth of the keystroke FIFO.
pub const QUEUE_DEPTH: usize = 64;

/// Approximate per-character delivery pacing (about 100 characters/second),
/// standing in for the real UART bit rate absent a cited source figure.
const NS_PER_KEY: u64 = 10_000_000;

/// A single host keystroke, already mapped to its Wang keycode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub code: u8,
    /// Special-function keys additionally raise CPU status ST1 bit 2 (SF
    /// sense) alongside latching K; see `Cpu::poll_bus`.
    pub special_function: bool,
}

impl KeyEvent {
    #[must_use]
    pub fn plain(code: u8) -> Self {
        KeyEvent {
            code,
            special_function: false,
        }
    }

    #[must_use]
    pub fn special(code: u8) -> Self {
        KeyEvent {
            code,
            special_function: true,
        }
    }
}

/// Keyboard/CRT multiplexer card.
pub struct TermMux {
    base: u8,
    selected: bool,
    queue: VecDeque<KeyEvent>,
    pending_out: Option<KeyEvent>,
    last_was_special: bool,
    delivering: bool,
    output: Vec<u8>,
    sched: Scheduler<()>,
    trace: Trace,
}

impl TermMux {
    #[must_use]
    pub fn new(base: u8, trace: Trace) -> Self {
        TermMux {
            base,
            selected: false,
            queue: VecDeque::new(),
            pending_out: None,
            last_was_special: false,
            delivering: false,
            output: Vec::new(),
            sched: Scheduler::new(),
            trace,
        }
    }

    /// Enqueue a keystroke. Drops the oldest-enqueued press if the FIFO is
    /// already at [`QUEUE_DEPTH`], mirroring a hardware buffer overrun
    /// rather than blocking the host.
    pub fn push_key(&mut self, event: KeyEvent) {
        if self.queue.len() >= QUEUE_DEPTH {
            self.queue.pop_front();
            if self.trace.keyboard {
                eprintln!("keyboard: FIFO overrun, dropping oldest key");
            }
        }
        self.queue.push_back(event);
        self.kick_delivery();
    }

    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Drain and return every byte the CPU has written to the terminal
    /// sink so far (display data from OBS, control bytes from CBS are
    /// tagged by the host-side terminal's own interpretation of the
    /// stream, which is out of scope here).
    pub fn drain_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.output)
    }

    fn kick_delivery(&mut self) {
        if !self.delivering && self.pending_out.is_none() && !self.queue.is_empty() {
            self.delivering = true;
            self.sched.create_timer(Ticks::from_ns(NS_PER_KEY), ());
        }
    }
}

impl Card for TermMux {
    fn address(&self) -> u8 {
        self.base
    }

    fn reset(&mut self, _hard: bool) {
        self.selected = false;
        self.pending_out = None;
        self.delivering = false;
    }

    fn select(&mut self) {
        self.selected = true;
    }

    fn deselect(&mut self) {
        self.selected = false;
    }

    fn obs(&mut self, byte: u8, _ab_sel: u8) {
        if self.trace.keyboard {
            eprintln!("keyboard: CRT output byte {byte:02X}");
        }
        self.output.push(byte);
    }

    fn cbs(&mut self, byte: u8) {
        if self.trace.keyboard {
            eprintln!("keyboard: CRT control byte {byte:02X}");
        }
        self.output.push(byte);
    }

    fn cpb(&mut self, _busy: bool) {}

    fn poll(&mut self) -> Option<u8> {
        let event = self.pending_out.take()?;
        self.last_was_special = event.special_function;
        Some(event.code)
    }

    fn ib5(&self) -> bool {
        false
    }

    fn sf(&self) -> bool {
        self.last_was_special
    }

    fn advance(&mut self, ticks: u64) {
        let mut sched = std::mem::take(&mut self.sched);
        sched.tick(Ticks(ticks), |(), _s| {
            self.delivering = false;
            if let Some(event) = self.queue.pop_front() {
                self.pending_out = Some(event);
            }
            self.kick_delivery();
        });
        self.sched = sched;
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

impl Observable for TermMux {
    fn query(&self, path: &str) -> Option<Value> {
        match path {
            "queue_len" => Some(Value::U32(self.queue.len() as u32)),
            "selected" => Some(Value::Bool(self.selected)),
            "pending_out" => Some(match self.pending_out {
                Some(e) => Value::U8(e.code),
                None => Value::String("none".into()),
            }),
            "output_len" => Some(Value::U32(self.output.len() as u32)),
            _ => None,
        }
    }

    fn query_paths(&self) -> &'static [&'static str] {
        &["queue_len", "selected", "pending_out", "output_len"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pushed_key_is_delivered_after_pacing_delay() {
        let mut kb = TermMux::new(0x01, Trace::none());
        kb.push_key(KeyEvent::plain(b'A'));
        assert_eq!(kb.poll(), None);
        kb.advance(NS_PER_KEY / 100 + 1);
        assert_eq!(kb.poll(), Some(b'A'));
    }

    #[test]
    fn fifo_drops_oldest_on_overrun() {
        let mut kb = TermMux::new(0x01, Trace::none());
        for i in 0..QUEUE_DEPTH + 5 {
            kb.push_key(KeyEvent::plain(i as u8));
        }
        assert_eq!(kb.queue_len(), QUEUE_DEPTH);
    }

    #[test]
    fn special_function_key_is_reported_via_sf_line() {
        let mut kb = TermMux::new(0x01, Trace::none());
        kb.push_key(KeyEvent::special(0x0A));
        kb.advance(NS_PER_KEY / 100 + 1);
        assert_eq!(kb.poll(), Some(0x0A));
        assert!(kb.sf());
    }

    #[test]
    fn obs_bytes_land_in_output_sink() {
        let mut kb = TermMux::new(0x01, Trace::none());
        kb.obs(b'H', 0);
        kb.obs(b'I', 0);
        assert_eq!(kb.drain_output(), vec![b'H', b'I']);
        assert!(kb.drain_output().is_empty());
    }
}
