//! System configuration: RAM size, ROM/microcode images, and trace flags.
//!
//! A plain struct-of-images, mirroring
//! `examples/emu198x-emu198x/crates/emu-c64/src/config.rs`'s style rather
//! than a config-file format (persistence is an explicit non-goal). Bad
//! geometry is rejected at construction time, per `spec.md` §7's
//! configuration-error policy.

use crate::memory::LEGAL_RAM_SIZES_KB;
use crate::microstore::MICROSTORE_WORDS;
use crate::trace::Trace;

/// Errors rejected at `System::new` time, before any simulation runs.
#[derive(Debug)]
pub enum ConfigError {
    /// `ram_kb` is not one of [`LEGAL_RAM_SIZES_KB`].
    BadRamSize(u16),
    /// A microcode image's word count doesn't fit the 16K microstore.
    MicrocodeTooLarge(usize),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::BadRamSize(kb) => write!(
                f,
                "{kb} KB is not a legal Wang 2200 RAM size (legal: {LEGAL_RAM_SIZES_KB:?})"
            ),
            ConfigError::MicrocodeTooLarge(n) => write!(
                f,
                "microcode image has {n} words, microstore holds {MICROSTORE_WORDS}"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Which prebuilt microcode variant to load at reset, per `spec.md` §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MicrocodeVariant {
    Wang2200B,
    Wang2200BPatched,
    Wang2200T,
}

/// Everything needed to construct a [`crate::system::System`].
pub struct Config {
    /// RAM size in KB; must be one of [`LEGAL_RAM_SIZES_KB`].
    pub ram_kb: u16,
    /// Which microcode variant `microcode_words` holds, for diagnostics.
    pub microcode_variant: MicrocodeVariant,
    /// Raw 20-bit microwords (low 20 bits significant), loaded at word 0.
    pub microcode_words: Vec<u32>,
    /// Keyboard/boot ROM image (up to 2048 bytes; shorter is zero-padded).
    pub keyboard_rom: Vec<u8>,
    pub trace: Trace,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !LEGAL_RAM_SIZES_KB.contains(&self.ram_kb) {
            return Err(ConfigError::BadRamSize(self.ram_kb));
        }
        if self.microcode_words.len() > MICROSTORE_WORDS {
            return Err(ConfigError::MicrocodeTooLarge(self.microcode_words.len()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_illegal_ram_size() {
        let cfg = Config {
            ram_kb: 17,
            microcode_variant: MicrocodeVariant::Wang2200T,
            microcode_words: vec![],
            keyboard_rom: vec![],
            trace: Trace::none(),
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::BadRamSize(17))));
    }

    #[test]
    fn accepts_legal_ram_size() {
        let cfg = Config {
            ram_kb: 16,
            microcode_variant: MicrocodeVariant::Wang2200T,
            microcode_words: vec![],
            keyboard_rom: vec![],
            trace: Trace::none(),
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_oversized_microcode_image() {
        let cfg = Config {
            ram_kb: 16,
            microcode_variant: MicrocodeVariant::Wang2200T,
            microcode_words: vec![0; MICROSTORE_WORDS + 1],
            keyboard_rom: vec![],
            trace: Trace::none(),
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::MicrocodeTooLarge(_))));
    }
}
