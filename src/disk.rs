//! Disk controller state machine and the virtual disk drives it owns.
//!
//! Ground truth is `IoCardDisk.h`/`IoCardDisk_Controller.cpp` in the original
//! implementation: a 28-state event-driven protocol engine reached through
//! OBS bytes and scheduler-driven "disk done" events. The controller
//! occupies two bus addresses (`base`, `base + 0x40`), each a primary/
//! secondary F-R pair, giving up to four drives.
//!
//! Chaining note: the original wraps every state transition in a re-poll on
//! the falling busy edge so purely logical transitions complete in zero
//! simulated time. Here that falls out for free: a state that has something
//! to say sets `pending_out`, and `Card::poll` both returns it *and* feeds
//! an `IbsPoll` event back into the state machine to set up whatever comes
//! next, all within the same call. No separate reentrancy loop is needed.

use crate::scheduler::Scheduler;
use crate::ticks::Ticks;
use crate::vdisk::{DiskType, Vdisk, VdiskError};
use crate::bus::Card;
use crate::observable::{Observable, Value};

/// Up to four drives per controller: two address pairs, F/R each.
pub const NUM_DRIVES: usize = 4;

/// Average track-to-track step time, per the 2280 user manual figures cited
/// in `IoCardDisk.cpp`.
const NS_PER_TRACK_STEP: u64 = 30_000_000;
/// Average rotational latency for one sector.
const NS_PER_SECTOR_ROTATION: u64 = 8_330_000;
/// Motor spins down after this long with no operation on the drive.
const MOTOR_OFF_NS: u64 = 4_000_000_000;

/// Reply status bytes. Device/protocol errors never leave the controller as
/// a `Result::Err`; they are just one of these bytes.
pub mod status {
    pub const OK: u8 = 0x00;
    pub const PROTECTED: u8 = 0x01;
    pub const NOT_READY: u8 = 0x02;
    pub const CRC_ERROR: u8 = 0x04;
}

/// How the controller identifies itself to the host at wakeup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intelligence {
    Dumb,
    Smart,
    /// Reports Smart unless every occupied drive is dumb-addressable.
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Read,
    Write,
    Verify,
    Special,
}

impl Command {
    fn from_ccc(ccc: u8) -> Command {
        match ccc {
            2 => Command::Write,
            4 => Command::Verify,
            1 => Command::Special,
            _ => Command::Read,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpecialCmd {
    Copy,
    Format,
    MsectWrStart,
    MsectWrEnd,
    VerifyRange,
    Unsupported(u8),
}

impl SpecialCmd {
    fn decode(byte: u8) -> SpecialCmd {
        match byte {
            0x01 => SpecialCmd::Copy,
            0x02 => SpecialCmd::Format,
            0x10 => SpecialCmd::MsectWrStart,
            0x11 => SpecialCmd::MsectWrEnd,
            0x12 => SpecialCmd::VerifyRange,
            other => SpecialCmd::Unsupported(other),
        }
    }
}

/// The 28 protocol states named in `spec.md` §4.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CtrlState {
    Wakeup,
    Status1,
    GetBytes,
    GetBytes2,
    SendBytes,
    Command,
    CommandEcho,
    CommandEchoBad,
    CommandStatus,
    Read1,
    Read2,
    Read3,
    Write1,
    Write2,
    Verify1,
    Verify2,
    Copy1,
    Copy2,
    Copy3,
    Copy5,
    Copy6,
    Copy7,
    Format1,
    Format2,
    Format3,
    MsectWrStart,
    MsectWrEnd1,
    MsectWrEnd2,
    VerifyRange1,
    VerifyRange2,
    VerifyRange3,
    VerifyRange4,
    VerifyRange5,
}

/// Events the controller reacts to.
#[derive(Debug, Clone, Copy)]
pub enum DiskCtrlEvent {
    Reset,
    Obs(u8),
    IbsPoll,
    DiskDone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Motor {
    Empty,
    Idle,
    Spinning,
}

struct Drive {
    vdisk: Option<Vdisk>,
    motor: Motor,
    track: u32,
}

impl Drive {
    fn empty() -> Drive {
        Drive {
            vdisk: None,
            motor: Motor::Empty,
            track: 0,
        }
    }

    fn sectors_per_track(&self) -> u32 {
        self.vdisk
            .as_ref()
            .map_or(1, |v| u32::from(v.disk_type().sectors_per_track()))
    }
}

/// A disk controller card: protocol state machine plus up to four drives.
pub struct DiskCtrl {
    base: u8,
    intelligence: Intelligence,
    reported_smart: bool,
    xfer_len: usize,

    drives: [Drive; NUM_DRIVES],
    selected_pair: u8,
    drive: usize,

    state: CtrlState,
    phase_count: usize,
    ccc: u8,
    platter: u8,
    special: Option<SpecialCmd>,
    addr_bytes: Vec<u8>,
    sector: u32,

    pending_out: Option<u8>,
    echo_invert: bool,

    gb_count: usize,
    gb_buf: Vec<u8>,
    gb_next: CtrlState,

    sb_buf: Vec<u8>,
    sb_idx: usize,
    sb_next: CtrlState,

    sector_buf: [u8; 256],
    lrc: u8,
    compare_error: bool,

    copy_pending: bool,
    range_drive: usize,
    range_platter: u8,
    range_start: u32,
    range_end: u32,
    range_cur: u32,
    range_fail: Option<u32>,
    dest_drive: usize,
    dest_platter: u8,
    dest_start: u32,
    format_track: u32,
    format_platter: u8,

    sched: Scheduler<()>,
    trace: bool,
}

impl DiskCtrl {
    #[must_use]
    pub fn new(base: u8, intelligence: Intelligence, trace: bool) -> Self {
        DiskCtrl {
            base,
            intelligence,
            reported_smart: false,
            xfer_len: 2,
            drives: [Drive::empty(), Drive::empty(), Drive::empty(), Drive::empty()],
            selected_pair: 0,
            drive: 0,
            state: CtrlState::Wakeup,
            phase_count: 0,
            ccc: 0,
            platter: 0,
            special: None,
            addr_bytes: Vec::new(),
            sector: 0,
            pending_out: None,
            echo_invert: false,
            gb_count: 0,
            gb_buf: Vec::new(),
            gb_next: CtrlState::Command,
            sb_buf: Vec::new(),
            sb_idx: 0,
            sb_next: CtrlState::Command,
            sector_buf: [0; 256],
            lrc: 0,
            compare_error: false,
            copy_pending: false,
            range_drive: 0,
            range_platter: 0,
            range_start: 0,
            range_end: 0,
            range_cur: 0,
            range_fail: None,
            dest_drive: 0,
            dest_platter: 0,
            dest_start: 0,
            format_track: 0,
            format_platter: 0,
            sched: Scheduler::new(),
            trace,
        }
    }

    /// Mount a disk image on `drive` (0-3).
    pub fn insert(&mut self, drive: usize, vdisk: Vdisk) {
        self.drives[drive].vdisk = Some(vdisk);
        self.drives[drive].motor = Motor::Idle;
    }

    #[must_use]
    pub fn eject(&mut self, drive: usize) -> Option<Vdisk> {
        self.drives[drive].motor = Motor::Empty;
        self.drives[drive].vdisk.take()
    }

    fn occupied_drives(&self) -> impl Iterator<Item = &Vdisk> {
        self.drives.iter().filter_map(|d| d.vdisk.as_ref())
    }

    fn compute_reported_smart(&self) -> bool {
        match self.intelligence {
            Intelligence::Dumb => false,
            Intelligence::Smart => true,
            Intelligence::Auto => !self.occupied_drives().all(Vdisk::is_dumb_addressable),
        }
    }

    fn tickle_motor(&mut self, drive: usize) {
        self.drives[drive].motor = Motor::Spinning;
        self.sched.create_timer(Ticks::from_ns(MOTOR_OFF_NS), ());
    }

    fn set_out(&mut self, byte: u8) {
        self.pending_out = Some(byte);
    }

    fn start_get_bytes(&mut self, count: usize, next: CtrlState) {
        self.gb_count = count;
        self.gb_buf.clear();
        self.gb_next = next;
        self.state = CtrlState::GetBytes;
    }

    fn start_send_bytes(&mut self, bytes: Vec<u8>, next: CtrlState) {
        self.sb_buf = bytes;
        self.sb_idx = 0;
        self.sb_next = next;
        self.state = CtrlState::SendBytes;
    }

    fn start_seek(&mut self, drive: usize, sector: u32) {
        self.tickle_motor(drive);
        let from_track = self.drives[drive].track;
        let spt = self.drives[drive].sectors_per_track().max(1);
        let to_track = sector / spt;
        let steps = from_track.abs_diff(to_track);
        self.drives[drive].track = to_track;
        let ns = u64::from(steps) * NS_PER_TRACK_STEP + NS_PER_SECTOR_ROTATION;
        self.sched.create_timer(Ticks::from_ns(ns), ());
    }

    fn assemble_sector(&self) -> u32 {
        self.addr_bytes
            .iter()
            .fold(0u32, |acc, &b| (acc << 8) | u32::from(b))
    }

    fn lrc_of(bytes: &[u8]) -> u8 {
        bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
    }

    fn abort_to_wakeup(&mut self) {
        self.state = CtrlState::Wakeup;
        self.phase_count = 0;
        self.pending_out = None;
    }

    /// The single entry point for every protocol event.
    fn dispatch(&mut self, event: DiskCtrlEvent) {
        match event {
            DiskCtrlEvent::Reset => {
                self.abort_to_wakeup();
                for d in &mut self.drives {
                    if d.vdisk.is_some() {
                        d.motor = Motor::Idle;
                    }
                }
                return;
            }
            DiskCtrlEvent::Obs(byte) => self.on_obs(byte),
            DiskCtrlEvent::IbsPoll => self.on_poll_delivered(),
            DiskCtrlEvent::DiskDone => self.on_disk_done(),
        }
    }

    fn on_obs(&mut self, byte: u8) {
        match self.state {
            CtrlState::Wakeup => self.handle_wakeup_byte(byte),
            CtrlState::Command => self.handle_command_byte(byte),
            CtrlState::GetBytes => {
                self.gb_buf.push(byte);
                self.set_out(byte);
                self.state = CtrlState::GetBytes2;
            }
            // Polling/input-not-expected events are logged, not acted upon.
            _ => {
                if self.trace {
                    eprintln!("disk: unexpected OBS={byte:02X} in state {:?}", self.state);
                }
            }
        }
    }

    fn handle_wakeup_byte(&mut self, host_byte: u8) {
        self.reported_smart = if host_byte == 0x00 {
            false
        } else {
            self.compute_reported_smart()
        };
        self.xfer_len = if self.reported_smart { 3 } else { 2 };
        let status_byte = if self.reported_smart { 0xD0 } else { 0xC0 };
        self.set_out(status_byte);
        self.state = CtrlState::Status1;
    }

    fn handle_command_byte(&mut self, byte: u8) {
        if self.phase_count == 0 {
            self.ccc = (byte >> 5) & 0x7;
            let r = (byte >> 4) & 1;
            self.platter = byte & 0xF;
            self.drive = usize::from(self.selected_pair) * 2 + usize::from(r);
            self.addr_bytes.clear();
            self.special = None;
            self.echo_invert = false;
        } else if Command::from_ccc(self.ccc) == Command::Special && self.phase_count == 1 {
            let sub = SpecialCmd::decode(byte);
            self.echo_invert = matches!(sub, SpecialCmd::Unsupported(_));
            self.special = Some(sub);
        } else {
            self.addr_bytes.push(byte);
        }
        self.phase_count += 1;
        let echoed = if self.echo_invert { !byte } else { byte };
        self.set_out(echoed);
        self.state = if self.echo_invert {
            CtrlState::CommandEchoBad
        } else {
            CtrlState::CommandEcho
        };
    }

    /// Called right after `pending_out` was handed to the CPU: whatever
    /// state we're in decides what the delivery of that byte means next.
    fn on_poll_delivered(&mut self) {
        match self.state {
            CtrlState::Status1 => self.state = CtrlState::Command,
            CtrlState::CommandEchoBad => self.abort_to_wakeup(),
            CtrlState::CommandEcho => self.advance_command_phase(),
            CtrlState::CommandStatus => self.advance_after_status(),
            CtrlState::GetBytes2 => {
                if self.gb_buf.len() < self.gb_count {
                    self.state = CtrlState::GetBytes;
                } else {
                    self.state = self.gb_next;
                    self.on_enter_state();
                }
            }
            CtrlState::SendBytes => {
                if self.sb_idx < self.sb_buf.len() {
                    self.set_out(self.sb_buf[self.sb_idx]);
                    self.sb_idx += 1;
                } else {
                    self.state = self.sb_next;
                    self.on_enter_state();
                }
            }
            CtrlState::Read3 => {
                // sb_idx already tracks progress via SendBytes below.
                self.state = CtrlState::Command;
                self.phase_count = 0;
            }
            CtrlState::Copy3 => self.copy_await_destination(),
            CtrlState::VerifyRange3 => self.verify_range_begin_scan(),
            CtrlState::Copy7 | CtrlState::Format3 | CtrlState::VerifyRange5
            | CtrlState::MsectWrEnd2 => {
                self.state = CtrlState::Command;
                self.phase_count = 0;
            }
            _ => {}
        }
    }

    fn advance_command_phase(&mut self) {
        match Command::from_ccc(self.ccc) {
            Command::Special => {
                if self.phase_count == 1 {
                    self.state = CtrlState::Command; // await special subcommand byte
                } else {
                    self.dispatch_special();
                }
            }
            _ => {
                if self.addr_bytes.len() < self.xfer_len {
                    self.state = CtrlState::Command;
                } else if self.copy_pending {
                    self.copy_pending = false;
                    self.copy_take_destination();
                } else {
                    self.sector = self.assemble_sector();
                    self.state = CtrlState::CommandStatus;
                    self.on_enter_state();
                }
            }
        }
    }

    fn dispatch_special(&mut self) {
        match self.special {
            Some(SpecialCmd::Copy) => {
                self.start_get_bytes(3, CtrlState::Copy2);
            }
            Some(SpecialCmd::Format) => {
                self.state = CtrlState::Format1;
                self.on_enter_state();
            }
            Some(SpecialCmd::MsectWrStart) => {
                self.state = CtrlState::MsectWrStart;
                self.on_enter_state();
            }
            Some(SpecialCmd::MsectWrEnd) => {
                self.state = CtrlState::MsectWrEnd1;
                self.on_enter_state();
            }
            Some(SpecialCmd::VerifyRange) => {
                self.range_start = self.assemble_sector();
                self.range_platter = self.platter;
                self.range_drive = self.drive;
                self.state = CtrlState::VerifyRange1;
                self.start_get_bytes(3, CtrlState::VerifyRange2);
            }
            _ => self.abort_to_wakeup(),
        }
    }

    fn current_drive_ready(&self) -> bool {
        self.drives[self.drive].vdisk.is_some()
    }

    /// States entered by a pure logical transition (no awaited OBS) run
    /// their body immediately here.
    fn on_enter_state(&mut self) {
        match self.state {
            CtrlState::CommandStatus => {
                if self.current_drive_ready() {
                    // Gate the header-ack byte on the same seek+rotation
                    // delay as a real transfer; on_disk_done delivers it.
                    self.start_seek(self.drive, self.sector);
                } else {
                    self.set_out(status::NOT_READY);
                }
            }
            CtrlState::Read1 => {
                // Track seek already happened while the header-ack status
                // byte was pending; only the rotational latency to the
                // target sector remains.
                self.tickle_motor(self.drive);
                self.sched.create_timer(Ticks::from_ns(NS_PER_SECTOR_ROTATION), ());
                self.state = CtrlState::Read2;
            }
            CtrlState::Write1 => {
                self.start_get_bytes(256 + 1, CtrlState::Write2);
            }
            CtrlState::Write2 => {
                self.tickle_motor(self.drive);
                self.sched.create_timer(Ticks::from_ns(NS_PER_SECTOR_ROTATION), ());
            }
            CtrlState::Verify1 => {
                self.start_get_bytes(256, CtrlState::Verify2);
            }
            CtrlState::Verify2 => {
                self.tickle_motor(self.drive);
                self.sched.create_timer(Ticks::from_ns(NS_PER_SECTOR_ROTATION), ());
            }
            CtrlState::Copy2 => self.begin_copy_after_end_sector(),
            CtrlState::Copy5 => self.copy_step_read(),
            CtrlState::Format1 => self.begin_format(),
            CtrlState::MsectWrStart => {
                self.set_out(status::OK);
                self.state = CtrlState::Command;
                self.phase_count = 0;
            }
            CtrlState::MsectWrEnd1 => {
                let protected = self.drives[self.drive]
                    .vdisk
                    .as_ref()
                    .is_some_and(Vdisk::write_protect);
                self.set_out(if protected { status::PROTECTED } else { status::OK });
                self.state = CtrlState::MsectWrEnd2;
            }
            CtrlState::VerifyRange2 => self.begin_verify_range(),
            CtrlState::VerifyRange4 => self.verify_range_step(),
            _ => {}
        }
    }

    fn advance_after_status(&mut self) {
        let ready = self.current_drive_ready();
        if !ready {
            self.state = CtrlState::Command;
            self.phase_count = 0;
            return;
        }
        self.state = match Command::from_ccc(self.ccc) {
            Command::Read => CtrlState::Read1,
            Command::Write => CtrlState::Write1,
            Command::Verify => CtrlState::Verify1,
            Command::Special => CtrlState::Command,
        };
        self.on_enter_state();
    }

    fn on_disk_done(&mut self) {
        match self.state {
            CtrlState::CommandStatus => {
                let status = if self.current_drive_ready() {
                    status::OK
                } else {
                    status::NOT_READY
                };
                self.set_out(status);
            }
            CtrlState::Read2 => {
                let ok = self.do_read_into_buffer(self.drive, self.platter, self.sector);
                let status = if ok { status::OK } else { status::NOT_READY };
                self.set_out(status);
                self.state = CtrlState::Read3;
                if ok {
                    let mut bytes = self.sector_buf.to_vec();
                    bytes.push(self.lrc);
                    self.start_send_bytes(bytes, CtrlState::Command);
                }
            }
            CtrlState::Verify2 => {
                let ok = self.do_read_into_buffer(self.drive, self.platter, self.sector);
                if ok && self.sector_buf != self.compare_buf_snapshot() {
                    self.compare_error = true;
                }
                let status = if self.compare_error { status::CRC_ERROR } else { status::OK };
                self.set_out(status);
                self.state = CtrlState::Command;
                self.phase_count = 0;
            }
            CtrlState::Write2 => {
                let data = &self.gb_buf[..256];
                let lrc = self.gb_buf[256];
                let computed = Self::lrc_of(data);
                let status = if computed != lrc {
                    status::CRC_ERROR
                } else {
                    let mut arr = [0u8; 256];
                    arr.copy_from_slice(data);
                    match self.drives[self.drive]
                        .vdisk
                        .as_mut()
                        .expect("validated ready before Write1")
                        .write_sector(u16::from(self.platter), self.sector, &arr)
                    {
                        Ok(()) => status::OK,
                        Err(VdiskError::WriteProtected) => status::PROTECTED,
                        Err(_) => status::NOT_READY,
                    }
                };
                self.set_out(status);
                self.state = CtrlState::Command;
                self.phase_count = 0;
            }
            CtrlState::Copy5 => self.copy_finish_read(),
            CtrlState::Copy6 => self.copy_finish_write(),
            CtrlState::Format2 => self.format_step(),
            CtrlState::VerifyRange4 => self.verify_range_finish_step(),
            _ => {
                if self.trace {
                    eprintln!("disk: unexpected DiskDone in state {:?}", self.state);
                }
            }
        }
    }

    /// Placeholder snapshot comparison target for VERIFY; the host's 256
    /// bytes to compare against arrive via the `GetBytes` engine reusing
    /// `gb_buf`, populated by `Verify1`'s caller before the seek starts.
    fn compare_buf_snapshot(&self) -> [u8; 256] {
        let mut arr = [0u8; 256];
        let n = self.gb_buf.len().min(256);
        arr[..n].copy_from_slice(&self.gb_buf[..n]);
        arr
    }

    fn do_read_into_buffer(&mut self, drive: usize, platter: u8, sector: u32) -> bool {
        let Some(vdisk) = self.drives[drive].vdisk.as_mut() else {
            return false;
        };
        match vdisk.read_sector(u16::from(platter), sector, &mut self.sector_buf) {
            Ok(()) => {
                self.lrc = Self::lrc_of(&self.sector_buf);
                true
            }
            Err(_) => false,
        }
    }

    // ---- SPECIAL COPY ----
    // header(cmd+sub+start) -> status -> 3-byte end sector -> status ->
    // next command (read-shaped) supplies destination -> track-at-a-time
    // copy until src_start > src_end -> final status.

    fn begin_copy_after_end_sector(&mut self) {
        self.range_end = self.gb_buf.iter().fold(0u32, |acc, &b| (acc << 8) | u32::from(b));
        self.set_out(status::OK);
        self.state = CtrlState::Copy3;
    }

    fn copy_await_destination(&mut self) {
        // The next command header (read-shaped) supplies dest drive/platter
        // and start sector; await it via the normal Command path but remember
        // we are mid-copy so `advance_command_phase` routes the completed
        // address bytes to `copy_take_destination` instead of `CommandStatus`.
        self.copy_pending = true;
        self.state = CtrlState::Command;
        self.phase_count = 0;
    }

    /// Called once the *next* command's header+address bytes have fully
    /// arrived while a copy is pending; `advance_command_phase` routes here
    /// instead of `CommandStatus` when `copy dest pending.
    fn copy_take_destination(&mut self) {
        self.dest_drive = self.drive;
        self.dest_platter = self.platter;
        self.dest_start = self.assemble_sector();
        self.range_cur = self.range_start;
        self.state = CtrlState::Copy5;
        self.on_enter_state();
    }

    fn copy_step_read(&mut self) {
        if self.range_cur > self.range_end {
            self.set_out(status::OK);
            self.state = CtrlState::Copy7;
            return;
        }
        self.start_seek(self.range_drive, self.range_cur);
        self.state = CtrlState::Copy5;
    }

    fn copy_finish_read(&mut self) {
        let ok = self.do_read_into_buffer(self.range_drive, self.range_platter, self.range_cur);
        if !ok {
            self.set_out(status::NOT_READY);
            self.state = CtrlState::Command;
            self.phase_count = 0;
            return;
        }
        let dest_sector = self.dest_start + (self.range_cur - self.range_start);
        self.start_seek(self.dest_drive, dest_sector);
        self.state = CtrlState::Copy6;
    }

    fn copy_finish_write(&mut self) {
        let dest_sector = self.dest_start + (self.range_cur - self.range_start);
        let buf = self.sector_buf;
        let result = self.drives[self.dest_drive]
            .vdisk
            .as_mut()
            .map(|v| v.write_sector(u16::from(self.dest_platter), dest_sector, &buf));
        if !matches!(result, Some(Ok(()))) {
            self.set_out(status::NOT_READY);
            self.state = CtrlState::Command;
            self.phase_count = 0;
            return;
        }
        self.range_cur += 1;
        self.copy_step_read();
    }

    // ---- SPECIAL FORMAT ----
    // padding byte (not echoed) -> seek track 0 -> zero-fill every sector of
    // every track, modeling ns-per-track per track -> final status.

    fn begin_format(&mut self) {
        self.format_platter = self.platter;
        self.format_track = 0;
        self.start_seek(self.drive, 0);
        self.state = CtrlState::Format2;
    }

    fn format_step(&mut self) {
        let spt = self.drives[self.drive].sectors_per_track().max(1);
        let total_sectors = self.drives[self.drive]
            .vdisk
            .as_ref()
            .map_or(0, |v| u32::from(v.num_sectors()));
        let start = self.format_track * spt;
        if start >= total_sectors {
            self.set_out(status::OK);
            self.state = CtrlState::Format3;
            return;
        }
        let zero = [0u8; 256];
        if let Some(v) = self.drives[self.drive].vdisk.as_mut() {
            for s in start..(start + spt).min(total_sectors) {
                let _ = v.write_sector(u16::from(self.format_platter), s, &zero);
            }
        }
        self.format_track += 1;
        self.start_seek(self.drive, self.format_track * spt);
        // stay in Format2 for the next track; on the final iteration
        // format_step() above short-circuits once start >= total_sectors.
    }

    // ---- VERIFY_SECTOR_RANGE ----
    // Like COPY's first two phases, then reads every sector in range one
    // track at a time, collecting the first failing sector.

    fn begin_verify_range(&mut self) {
        self.range_end = self.gb_buf.iter().fold(0u32, |acc, &b| (acc << 8) | u32::from(b));
        self.set_out(status::OK);
        self.state = CtrlState::VerifyRange3;
    }

    fn verify_range_begin_scan(&mut self) {
        self.range_cur = self.range_start;
        self.range_fail = None;
        self.state = CtrlState::VerifyRange4;
        self.on_enter_state();
    }

    fn verify_range_step(&mut self) {
        if self.range_cur > self.range_end {
            let (bytes, err) = match self.range_fail {
                Some(s) => (s.to_be_bytes()[1..].to_vec(), status::CRC_ERROR),
                None => (vec![0, 0, 0], status::OK),
            };
            let mut reply = bytes;
            reply.push(err);
            self.start_send_bytes(reply, CtrlState::Command);
            return;
        }
        self.start_seek(self.range_drive, self.range_cur);
        self.state = CtrlState::VerifyRange4;
    }

    fn verify_range_finish_step(&mut self) {
        let ok = self.do_read_into_buffer(self.range_drive, self.range_platter, self.range_cur);
        if !ok && self.range_fail.is_none() {
            self.range_fail = Some(self.range_cur);
        }
        self.range_cur += 1;
        self.verify_range_step();
    }

    pub fn intelligence(&self) -> Intelligence {
        self.intelligence
    }
}

impl Card for DiskCtrl {
    fn address(&self) -> u8 {
        self.base
    }

    fn matches_address(&self, addr: u8) -> bool {
        addr == self.base || addr == self.base.wrapping_add(0x40)
    }

    fn reset(&mut self, _hard: bool) {
        self.dispatch(DiskCtrlEvent::Reset);
    }

    fn select(&mut self) {
        // `selected_pair` is latched from the matched address, not here,
        // since `Card::select` doesn't receive which address matched.
    }

    fn deselect(&mut self) {}

    fn obs(&mut self, byte: u8, ab_sel: u8) {
        self.selected_pair = u8::from(ab_sel == self.base.wrapping_add(0x40));
        if ab_sel & 0xA0 == 0xA0 {
            self.abort_to_wakeup();
        }
        self.dispatch(DiskCtrlEvent::Obs(byte));
    }

    fn cbs(&mut self, _byte: u8) {}

    fn cpb(&mut self, _busy: bool) {}

    fn poll(&mut self) -> Option<u8> {
        let byte = self.pending_out.take()?;
        self.dispatch(DiskCtrlEvent::IbsPoll);
        Some(byte)
    }

    fn ib5(&self) -> bool {
        self.pending_out.is_some()
    }

    fn advance(&mut self, ticks: u64) {
        let mut sched = std::mem::take(&mut self.sched);
        sched.tick(Ticks(ticks), |(), _s| self.dispatch(DiskCtrlEvent::DiskDone));
        self.sched = sched;
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

impl Observable for DiskCtrl {
    fn query(&self, path: &str) -> Option<Value> {
        match path {
            "state" => Some(Value::String(format!("{:?}", self.state))),
            "drive" => Some(Value::U32(self.drive as u32)),
            "reported_smart" => Some(Value::Bool(self.reported_smart)),
            "pending_out" => Some(match self.pending_out {
                Some(b) => Value::U8(b),
                None => Value::String("none".into()),
            }),
            _ => None,
        }
    }

    fn query_paths(&self) -> &'static [&'static str] {
        &["state", "drive", "reported_smart", "pending_out"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disk_with_sector(disk_type: DiskType, sector: u32, fill: u8) -> Vdisk {
        let mut v = Vdisk::create(disk_type, 1, 256);
        let path = std::env::temp_dir().join(format!(
            "wang2200-disktest-{}-{}.wvd",
            std::process::id(),
            sector
        ));
        v.save(&path).unwrap();
        let mut buf = [fill; 256];
        v.write_sector(0, sector, &mut buf).unwrap();
        v
    }

    /// Scenario 4: wakeup handshake on a smart controller.
    #[test]
    fn wakeup_handshake_reports_smart() {
        let mut ctrl = DiskCtrl::new(0x20, Intelligence::Smart, false);
        ctrl.reset(true);
        ctrl.obs(0x01, 0xA0); // CAX wakeup, host = VP
        assert_eq!(ctrl.poll(), Some(0xD0));
    }

    #[test]
    fn command_header_bytes_are_echoed() {
        let mut ctrl = DiskCtrl::new(0x20, Intelligence::Smart, false);
        ctrl.reset(true);
        ctrl.insert(0, {
            let mut v = Vdisk::create(DiskType::Hd60, 1, 1000);
            let path = std::env::temp_dir().join(format!(
                "wang2200-disktest-hdr-{}.wvd",
                std::process::id()
            ));
            v.save(&path).unwrap();
            v
        });
        ctrl.obs(0x02, 0xA0);
        assert_eq!(ctrl.poll(), Some(0xD0));

        // READ, drive 0, platter 0, 3-byte sector address for sector 0.
        ctrl.obs(0x00, 0x40);
        assert_eq!(ctrl.poll(), Some(0x00));
        ctrl.obs(0x00, 0x40);
        assert_eq!(ctrl.poll(), Some(0x00));
        ctrl.obs(0x00, 0x40);
        assert_eq!(ctrl.poll(), Some(0x00));
        ctrl.obs(0x00, 0x40);
        assert_eq!(ctrl.poll(), Some(0x00));
    }

    /// Universal property: LRC mismatch on WRITE never touches the sector
    /// and reports CRC-error.
    #[test]
    fn write_with_bad_lrc_leaves_sector_untouched() {
        let mut ctrl = DiskCtrl::new(0x20, Intelligence::Dumb, false);
        ctrl.reset(true);
        let mut v = disk_with_sector(DiskType::Fd5, 10, 0xAA);
        let path = std::env::temp_dir().join("wang2200-disktest-lrc-verify.wvd");
        let _ = v.save(&path);
        ctrl.insert(0, v);

        ctrl.obs(0x00, 0xA0); // wakeup, dumb host
        assert_eq!(ctrl.poll(), Some(0xC0));

        // WRITE drive 0 platter 0, dumb 2-byte sector address = 10.
        ctrl.obs(0x40, 0x40); // CCC=010(write), R=0, platter=0
        assert_eq!(ctrl.poll(), Some(0x40));
        ctrl.obs(0x00, 0x40);
        assert_eq!(ctrl.poll(), Some(0x00));
        ctrl.obs(0x0A, 0x40);
        assert_eq!(ctrl.poll(), Some(0x0A));
        ctrl.advance(1_000_000); // seek settles before the header-ack byte
        assert_eq!(ctrl.poll(), Some(status::OK)); // CommandStatus -> OK, ready for data

        for _ in 0..256 {
            ctrl.obs(0x11, 0x40);
            let _ = ctrl.poll();
        }
        ctrl.obs(0x05, 0x40); // wrong LRC (actual is 256*0x11 mod 256 = 0)
        let _ = ctrl.poll();

        ctrl.advance(1_000_000);
        assert_eq!(ctrl.poll(), Some(status::CRC_ERROR));
    }

    #[test]
    fn write_protected_disk_rejects_write() {
        let mut ctrl = DiskCtrl::new(0x20, Intelligence::Dumb, false);
        ctrl.reset(true);
        let mut v = Vdisk::create(DiskType::Fd5, 1, 64);
        let path = std::env::temp_dir().join("wang2200-disktest-protect.wvd");
        v.save(&path).unwrap();
        v.set_write_protect(true);
        ctrl.insert(0, v);

        ctrl.obs(0x00, 0xA0);
        assert_eq!(ctrl.poll(), Some(0xC0));
        ctrl.obs(0x40, 0x40);
        let _ = ctrl.poll();
        ctrl.obs(0x00, 0x40);
        let _ = ctrl.poll();
        ctrl.obs(0x00, 0x40);
        let _ = ctrl.poll();
        ctrl.advance(1_000_000); // seek settles before the header-ack byte
        assert_eq!(ctrl.poll(), Some(status::OK));

        for _ in 0..256 {
            ctrl.obs(0x00, 0x40);
            let _ = ctrl.poll();
        }
        ctrl.obs(zero_lrc(), 0x40);
        let _ = ctrl.poll();
        ctrl.advance(1_000_000);
        assert_eq!(ctrl.poll(), Some(status::PROTECTED));
    }

    fn zero_lrc() -> u8 {
        0
    }
}
