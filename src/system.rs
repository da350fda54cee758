//! Top-level system: constructs the CPU, bus, and cards, and owns the run
//! loop and reset, mirroring `C64::new`/`C64::tick` in
//! `examples/emu198x-emu198x/crates/emu-c64/src/c64.rs`.

use crate::bus::Bus;
use crate::config::{Config, ConfigError};
use crate::cpu::{Cpu, CpuFault};
use crate::disk::{DiskCtrl, Intelligence};
use crate::keyboard::{KeyEvent, TermMux};
use crate::observable::{Observable, Value};
use crate::ticks::Ticks;
use crate::trace::Trace;
use crate::vdisk::Vdisk;

/// Base I/O address of the disk controller (occupies `base` and `base+0x40`).
pub const DISK_BASE_ADDR: u8 = 0x20;
/// Base I/O address of the keyboard/CRT multiplexer.
pub const KEYBOARD_BASE_ADDR: u8 = 0x01;

/// The assembled Wang 2200: CPU, bus, and the disk/keyboard cards wired onto
/// it at their fixed addresses.
pub struct System {
    pub cpu: Cpu,
    pub bus: Bus,
    disk_slot: usize,
    keyboard_slot: usize,
    trace: Trace,
    fault: Option<CpuFault>,
    micro_ops_executed: u64,
}

impl System {
    /// Construct a system from `config`, rejecting bad geometry before any
    /// card is built.
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut cpu = Cpu::new(config.ram_kb, config.trace);
        cpu.ucode.load(&config.microcode_words);
        cpu.rom.load(&config.keyboard_rom);

        let mut bus = Bus::new();
        let disk_slot = bus.add_card(Box::new(DiskCtrl::new(
            DISK_BASE_ADDR,
            Intelligence::Auto,
            config.trace.disk,
        )));
        let keyboard_slot = bus.add_card(Box::new(TermMux::new(
            KEYBOARD_BASE_ADDR,
            config.trace,
        )));

        Ok(System {
            cpu,
            bus,
            disk_slot,
            keyboard_slot,
            trace: config.trace,
            fault: None,
            micro_ops_executed: 0,
        })
    }

    /// Reset the CPU and every card. `hard` distinguishes a power-on reset
    /// from the CPU's own reset instruction, per `Card::reset`.
    pub fn reset(&mut self, hard: bool) {
        self.cpu.reset();
        self.bus.reset(hard);
        self.fault = None;
    }

    /// Execute exactly one micro-op: CPU fetch/decode/execute, the bus
    /// poll that may latch a new input byte, then advance every card's
    /// internal timers by one micro-op's worth of simulated time (16
    /// ticks = 1.6 us, per `spec.md` §4.1/§6).
    ///
    /// Once a [`CpuFault`] has occurred the system stays halted: further
    /// calls return the same fault without executing anything, matching
    /// `spec.md` §7's "fatal errors halt the simulation" policy.
    pub fn step(&mut self) -> Result<(), CpuFault> {
        if let Some(fault) = self.fault {
            return Err(fault);
        }
        if let Err(fault) = self.cpu.tick(&mut self.bus) {
            self.fault = Some(fault);
            if self.trace.cpu {
                eprintln!("system: halted on {fault}");
            }
            return Err(fault);
        }
        self.cpu.poll_bus(&mut self.bus);
        self.bus.advance(Ticks::PER_MICRO_OP.0);
        self.micro_ops_executed += 1;
        Ok(())
    }

    /// Run up to `count` micro-ops, stopping early (and returning the
    /// fault) if the CPU halts. Returns the number of micro-ops actually
    /// executed.
    pub fn run(&mut self, count: u64) -> Result<u64, CpuFault> {
        for i in 0..count {
            if let Err(fault) = self.step() {
                return if i == 0 { Err(fault) } else { Ok(i) };
            }
        }
        Ok(count)
    }

    #[must_use]
    pub fn fault(&self) -> Option<CpuFault> {
        self.fault
    }

    #[must_use]
    pub fn micro_ops_executed(&self) -> u64 {
        self.micro_ops_executed
    }

    /// Mount a disk image on the given drive (0-3) of the disk controller.
    pub fn insert_disk(&mut self, drive: usize, vdisk: Vdisk) {
        if let Some(ctrl) = self.bus.card_as_mut::<DiskCtrl>(self.disk_slot) {
            ctrl.insert(drive, vdisk);
        }
    }

    /// Remove and return the disk image mounted on `drive`, if any.
    pub fn eject_disk(&mut self, drive: usize) -> Option<Vdisk> {
        self.bus
            .card_as_mut::<DiskCtrl>(self.disk_slot)
            .and_then(|ctrl| ctrl.eject(drive))
    }

    /// Queue a host keystroke (already mapped to its Wang keycode).
    pub fn push_key(&mut self, event: KeyEvent) {
        if let Some(kb) = self.bus.card_as_mut::<TermMux>(self.keyboard_slot) {
            kb.push_key(event);
        }
    }

    /// Drain bytes the CPU has written to the terminal sink.
    pub fn drain_terminal_output(&mut self) -> Vec<u8> {
        self.bus
            .card_as_mut::<TermMux>(self.keyboard_slot)
            .map(TermMux::drain_output)
            .unwrap_or_default()
    }
}

impl Observable for System {
    fn query(&self, path: &str) -> Option<Value> {
        if let Some(rest) = path.strip_prefix("cpu.") {
            self.cpu.query(rest)
        } else if let Some(rest) = path.strip_prefix("bus.") {
            self.bus.query(rest)
        } else {
            match path {
                "micro_ops_executed" => Some(Value::U64(self.micro_ops_executed)),
                "halted" => Some(Value::Bool(self.fault.is_some())),
                _ => None,
            }
        }
    }

    fn query_paths(&self) -> &'static [&'static str] {
        &["cpu.<path>", "bus.<path>", "micro_ops_executed", "halted"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MicrocodeVariant;

    fn test_config() -> Config {
        Config {
            ram_kb: 4,
            microcode_variant: MicrocodeVariant::Wang2200T,
            microcode_words: vec![],
            keyboard_rom: vec![],
            trace: Trace::none(),
        }
    }

    #[test]
    fn new_system_rejects_bad_ram_size() {
        let mut cfg = test_config();
        cfg.ram_kb = 5;
        let err = System::new(&cfg).unwrap_err();
        assert!(matches!(err, ConfigError::BadRamSize(5)));
    }

    #[test]
    fn step_through_preloaded_or_advances_ic_and_time() {
        let mut sys = System::new(&test_config()).unwrap();
        // OR R0,R1->R2
        let raw = (0x00u32 << 15) | (0x1 << 10) | (0x0 << 4) | 0x2;
        sys.cpu.ucode.write(0, raw);
        // seed registers through direct micro-op-free pokes isn't exposed;
        // rely on the default zero registers: 0 | 0 = 0.
        sys.step().unwrap();
        assert_eq!(sys.cpu.ic(), 1);
        assert_eq!(sys.micro_ops_executed(), 1);
    }

    #[test]
    fn illegal_instruction_halts_system_permanently() {
        let mut sys = System::new(&test_config()).unwrap();
        sys.cpu.ucode.write(0, 0x0_000D); // c_field=13, illegal ALU op
        let err1 = sys.step().unwrap_err();
        let err2 = sys.step().unwrap_err();
        assert_eq!(err1, err2);
        assert_eq!(sys.micro_ops_executed(), 0);
    }

    #[test]
    fn insert_and_eject_disk_round_trip() {
        let mut sys = System::new(&test_config()).unwrap();
        let path = std::env::temp_dir().join(format!(
            "wang2200-system-test-{}.wvd",
            std::process::id()
        ));
        let mut v = Vdisk::create(crate::vdisk::DiskType::Fd5, 1, 64);
        v.save(&path).unwrap();
        sys.insert_disk(0, v);
        assert!(sys.eject_disk(0).is_some());
        assert!(sys.eject_disk(0).is_none());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn pushed_key_eventually_reaches_terminal_via_bus_poll() {
        let mut sys = System::new(&test_config()).unwrap();
        sys.push_key(KeyEvent::plain(b'X'));
        // ABS select the keyboard card so polling routes to it.
        sys.cpu.ucode.write(0, 0); // filler, unused in this direct-bus test
        sys.bus.abs(KEYBOARD_BASE_ADDR);
        // Advance enough simulated time for the paced delivery timer.
        sys.bus.advance(200_000);
        sys.cpu.poll_bus(&mut sys.bus);
        assert_eq!(sys.cpu.query("k"), Some(Value::U8(b'X')));
    }
}
