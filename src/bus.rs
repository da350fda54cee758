//! Backplane I/O bus: card selection and strobe routing.
//!
//! Resolves the cyclic CPU/bus/card ownership noted in `spec.md` §9 via
//! arena/id indirection: the bus owns every card in a flat `Vec`, keyed by
//! slot index; the "selected card" is an `Option<usize>`, never a
//! back-reference. The CPU never touches a card directly — every strobe goes
//! through the bus.

use std::any::Any;

use crate::observable::{Observable, Value};

/// Uniform interface for a pluggable I/O card.
pub trait Card: Any {
    /// The 8-bit address this card responds to on ABS.
    fn address(&self) -> u8;

    /// Whether `addr` selects this card. Defaults to an exact match against
    /// `address()`; a card occupying more than one address (e.g. the disk
    /// controller's primary/secondary F-R pairs) overrides this.
    fn matches_address(&self, addr: u8) -> bool {
        addr == self.address()
    }

    fn reset(&mut self, hard: bool);

    /// Called when this card's address matches an incoming ABS strobe.
    fn select(&mut self);

    /// Called when a previously-selected card is no longer selected.
    fn deselect(&mut self);

    /// Output-bus strobe: the CPU sent `byte` to the selected card. `ab_sel`
    /// is the CPU's currently latched address-bus-select value (last ABS
    /// target), which the disk protocol's CAX sideband rides on (0xA0 vs
    /// 0x40) independent of which byte this particular OBS carries.
    fn obs(&mut self, byte: u8, ab_sel: u8);

    /// Control-bus strobe: the CPU sent `byte` as a control strobe.
    fn cbs(&mut self, byte: u8);

    /// CPU busy-line edge (`true` = CPU busy, will not accept input).
    fn cpb(&mut self, busy: bool);

    /// Called when the CPU is ready and not busy. If the card has a byte
    /// ready, return it; this latches into K and pulses IBS/CPB on the CPU.
    fn poll(&mut self) -> Option<u8>;

    /// This card's contribution to the IB5 bus line (see ST3 bit 1).
    fn ib5(&self) -> bool;

    /// Whether the byte most recently handed back by `poll()` is a
    /// special-function keystroke (see ST1 bit 2, SF sense). Only the
    /// keyboard card ever reports `true`; every other card keeps the
    /// default.
    fn sf(&self) -> bool {
        false
    }

    /// Advance this card's internal event-driven state (seek timers, paced
    /// delivery, motor-off timeouts) by `ticks` simulated 100ns units.
    /// Cards with no time-driven behavior can ignore this.
    fn advance(&mut self, _ticks: u64) {}

    /// Downcasting hook so `System` can reach a card's concrete type (e.g.
    /// to mount a disk image or push a keystroke) despite the bus storing
    /// cards as trait objects. Every impl is just `{ self }`.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Global card selection and strobe routing.
pub struct Bus {
    cards: Vec<Box<dyn Card>>,
    selected: Option<usize>,
    cpu_busy: bool,
}

impl Bus {
    #[must_use]
    pub fn new() -> Self {
        Bus {
            cards: Vec::new(),
            selected: None,
            cpu_busy: false,
        }
    }

    /// Register a card, returning its slot index.
    pub fn add_card(&mut self, card: Box<dyn Card>) -> usize {
        self.cards.push(card);
        self.cards.len() - 1
    }

    #[must_use]
    pub fn selected_slot(&self) -> Option<usize> {
        self.selected
    }

    pub fn card_mut(&mut self, slot: usize) -> &mut dyn Card {
        self.cards[slot].as_mut()
    }

    /// Downcast the card at `slot` to a concrete type, for the rare caller
    /// (the top-level `System`) that needs more than the `Card` interface
    /// — mounting a disk image, pushing a keystroke.
    pub fn card_as_mut<T: Card + 'static>(&mut self, slot: usize) -> Option<&mut T> {
        self.cards[slot].as_any_mut().downcast_mut::<T>()
    }

    pub fn reset(&mut self, hard: bool) {
        for card in &mut self.cards {
            card.reset(hard);
        }
        self.selected = None;
        self.cpu_busy = false;
    }

    /// Route an ABS strobe: whichever card's address matches becomes
    /// selected; the previously selected card (if different) is deselected.
    pub fn abs(&mut self, addr: u8) {
        let new_selected = self
            .cards
            .iter()
            .position(|c| c.matches_address(addr));

        if new_selected != self.selected {
            if let Some(old) = self.selected {
                self.cards[old].deselect();
            }
            if let Some(new) = new_selected {
                self.cards[new].select();
            }
        }
        self.selected = new_selected;
    }

    /// Route an OBS strobe to the selected card only.
    pub fn obs(&mut self, byte: u8, ab_sel: u8) {
        if let Some(slot) = self.selected {
            self.cards[slot].obs(byte, ab_sel);
        }
    }

    /// Route a CBS strobe to the selected card only.
    pub fn cbs(&mut self, byte: u8) {
        if let Some(slot) = self.selected {
            self.cards[slot].cbs(byte);
        }
    }

    /// Notify the selected card of a CPU busy-line edge.
    pub fn cpu_cpb(&mut self, busy: bool) {
        self.cpu_busy = busy;
        if let Some(slot) = self.selected {
            self.cards[slot].cpb(busy);
        }
    }

    /// Poll the selected card for a ready byte.
    pub fn poll(&mut self) -> Option<u8> {
        let slot = self.selected?;
        self.cards[slot].poll()
    }

    /// The live IB5 line, aggregated from the selected card, for ST3 reads.
    #[must_use]
    pub fn ib5(&self) -> bool {
        self.selected
            .map(|slot| self.cards[slot].ib5())
            .unwrap_or(false)
    }

    /// Whether the byte last delivered by `poll()` was a special-function
    /// keystroke, for the CPU's ST1 bit 2 side effect.
    #[must_use]
    pub fn sf(&self) -> bool {
        self.selected
            .map(|slot| self.cards[slot].sf())
            .unwrap_or(false)
    }

    /// Advance every card's internal timers by `ticks`.
    pub fn advance(&mut self, ticks: u64) {
        for card in &mut self.cards {
            card.advance(ticks);
        }
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

impl Observable for Bus {
    fn query(&self, path: &str) -> Option<Value> {
        match path {
            "selected" => Some(match self.selected {
                Some(slot) => Value::U32(slot as u32),
                None => Value::String("none".into()),
            }),
            "cpu_busy" => Some(Value::Bool(self.cpu_busy)),
            "card_count" => Some(Value::U32(self.cards.len() as u32)),
            _ => None,
        }
    }

    fn query_paths(&self) -> &'static [&'static str] {
        &["selected", "cpu_busy", "card_count"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubCard {
        addr: u8,
        selected: bool,
        byte: Option<u8>,
    }

    impl Card for StubCard {
        fn address(&self) -> u8 {
            self.addr
        }
        fn reset(&mut self, _hard: bool) {
            self.selected = false;
        }
        fn select(&mut self) {
            self.selected = true;
        }
        fn deselect(&mut self) {
            self.selected = false;
        }
        fn obs(&mut self, _byte: u8, _ab_sel: u8) {}
        fn cbs(&mut self, _byte: u8) {}
        fn cpb(&mut self, _busy: bool) {}
        fn poll(&mut self) -> Option<u8> {
            self.byte.take()
        }
        fn ib5(&self) -> bool {
            false
        }
        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
    }

    #[test]
    fn abs_selects_matching_card_and_deselects_previous() {
        let mut bus = Bus::new();
        bus.add_card(Box::new(StubCard {
            addr: 0x01,
            selected: false,
            byte: None,
        }));
        bus.add_card(Box::new(StubCard {
            addr: 0x05,
            selected: false,
            byte: None,
        }));

        bus.abs(0x01);
        assert_eq!(bus.selected_slot(), Some(0));
        bus.abs(0x05);
        assert_eq!(bus.selected_slot(), Some(1));
        bus.abs(0xFF);
        assert_eq!(bus.selected_slot(), None);
    }

    #[test]
    fn obs_only_reaches_selected_card() {
        let mut bus = Bus::new();
        bus.add_card(Box::new(StubCard {
            addr: 0x01,
            selected: false,
            byte: Some(0x42),
        }));
        bus.abs(0x01);
        assert_eq!(bus.poll(), Some(0x42));
        assert_eq!(bus.poll(), None);
    }
}
