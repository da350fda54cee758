//! Per-subsystem debug toggles, threaded through the system at construction.
//!
//! Replaces the original implementation's module-level debug globals
//! (`m_dbg` in `Cpu2200t.cpp`, similar flags in the disk controller) with an
//! explicit, cheaply-cloneable configuration struct. Subsystems that want to
//! emit diagnostic chatter hold a `Trace` and check the relevant flag rather
//! than reading global state.

/// Debug verbosity toggles for each major subsystem.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Trace {
    pub cpu: bool,
    pub bus: bool,
    pub disk: bool,
    pub keyboard: bool,
}

impl Trace {
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn all() -> Self {
        Trace {
            cpu: true,
            bus: true,
            disk: true,
            keyboard: true,
        }
    }
}
