//! Virtual disk (`.wvd`) file format and lifecycle.
//!
//! Mirrors `Wvd.h` from the original implementation: a fixed 256-byte header
//! (magic, disk type, platter count, sectors-per-platter, write-protect
//! flag, zero-terminated label) followed by `platters * sectors_per_platter`
//! fixed 256-byte sector payloads. `create`/`open` are mutually exclusive
//! entry points; `flush` closes the underlying file handle but keeps the
//! disk's identity so a later access transparently reopens and re-reads the
//! header (in case an external tool edited the file on disk).

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const MAGIC: &[u8; 8] = b"WANGVDSK";
const HEADER_BYTES: usize = 256;
const SECTOR_BYTES: usize = 256;
const LABEL_BYTES: usize = 239;

/// The physical disk drive type a `.wvd` image emulates, each with a fixed
/// sectors-per-platter count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskType {
    /// 5.25" floppy, single platter.
    Fd5,
    /// 8" floppy, single platter.
    Fd8,
    /// 60 MB hard disk, multi-platter.
    Hd60,
    /// 80 MB hard disk, multi-platter.
    Hd80,
}

impl DiskType {
    fn code(self) -> u8 {
        match self {
            DiskType::Fd5 => 0,
            DiskType::Fd8 => 1,
            DiskType::Hd60 => 2,
            DiskType::Hd80 => 3,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(DiskType::Fd5),
            1 => Some(DiskType::Fd8),
            2 => Some(DiskType::Hd60),
            3 => Some(DiskType::Hd80),
            _ => None,
        }
    }

    /// Sectors per track, used by the disk controller's timing model and
    /// by `driveIsSmart`/`driveIsDumb` capability checks.
    #[must_use]
    pub fn sectors_per_track(self) -> u16 {
        match self {
            DiskType::Fd5 => 10,
            DiskType::Fd8 => 16,
            DiskType::Hd60 => 24,
            DiskType::Hd80 => 64,
        }
    }

    /// Whether this geometry can ever be addressed with a 16-bit "dumb"
    /// sector number: single platter and no more than 32768 sectors.
    #[must_use]
    pub fn default_platters(self) -> u16 {
        match self {
            DiskType::Fd5 | DiskType::Fd8 => 1,
            DiskType::Hd60 => 2,
            DiskType::Hd80 => 4,
        }
    }
}

/// Errors surfaced by virtual disk file I/O. Never constructed for disk
/// *protocol* errors (bad checksum, write-protected, unreadable sector) --
/// those stay in-band as controller status bytes; this type is reserved for
/// the host filesystem misbehaving.
#[derive(Debug)]
pub enum VdiskError {
    Io(std::io::Error),
    BadMagic,
    UnknownDiskType(u8),
    NotOpen,
    WriteProtected,
    SectorOutOfRange { platter: u16, sector: u32 },
}

impl std::fmt::Display for VdiskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VdiskError::Io(e) => write!(f, "i/o error: {e}"),
            VdiskError::BadMagic => write!(f, "not a wang virtual disk image"),
            VdiskError::UnknownDiskType(c) => write!(f, "unknown disk type code {c}"),
            VdiskError::NotOpen => write!(f, "disk has no open file"),
            VdiskError::WriteProtected => write!(f, "disk is write-protected"),
            VdiskError::SectorOutOfRange { platter, sector } => {
                write!(f, "sector out of range: platter {platter}, sector {sector}")
            }
        }
    }
}

impl std::error::Error for VdiskError {}

impl From<std::io::Error> for VdiskError {
    fn from(e: std::io::Error) -> Self {
        VdiskError::Io(e)
    }
}

/// A virtual disk: file-backed sector storage plus metadata cached in
/// memory. `flush()` drops the file handle without forgetting path/geometry,
/// so a subsequent `read_sector`/`write_sector` transparently reopens it.
pub struct Vdisk {
    file: Option<File>,
    path: Option<PathBuf>,
    disk_type: DiskType,
    num_platters: u16,
    num_sectors: u16,
    write_protect: bool,
    label: String,
    modified: bool,
}

impl Vdisk {
    /// Create a brand-new image in memory (not yet written to disk; call
    /// `save` to write it out). Mutually exclusive with `open`.
    #[must_use]
    pub fn create(disk_type: DiskType, num_platters: u16, num_sectors: u16) -> Self {
        Vdisk {
            file: None,
            path: None,
            disk_type,
            num_platters,
            num_sectors,
            write_protect: false,
            label: String::new(),
            modified: true,
        }
    }

    /// Open an existing `.wvd` file, reading and validating its header.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, VdiskError> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
        let (disk_type, num_platters, num_sectors, write_protect, label) = read_header(&mut file)?;
        Ok(Vdisk {
            file: Some(file),
            path: Some(path),
            disk_type,
            num_platters,
            num_sectors,
            write_protect,
            label,
            modified: false,
        })
    }

    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn set_modified(&mut self, modified: bool) {
        self.modified = modified;
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn set_path(&mut self, path: impl Into<PathBuf>) {
        self.path = Some(path.into());
    }

    #[must_use]
    pub fn disk_type(&self) -> DiskType {
        self.disk_type
    }

    #[must_use]
    pub fn num_platters(&self) -> u16 {
        self.num_platters
    }

    #[must_use]
    pub fn num_sectors(&self) -> u16 {
        self.num_sectors
    }

    #[must_use]
    pub fn write_protect(&self) -> bool {
        self.write_protect
    }

    pub fn set_write_protect(&mut self, wp: bool) {
        self.write_protect = wp;
        self.modified = true;
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn set_label(&mut self, label: impl Into<String>) {
        self.label = label.into();
        self.modified = true;
    }

    /// Whether this geometry fits a 16-bit "dumb" sector address: a single
    /// platter and at most 32768 sectors total.
    #[must_use]
    pub fn is_dumb_addressable(&self) -> bool {
        self.num_platters == 1 && self.num_sectors <= 32768
    }

    /// Whether this geometry requires a 24-bit "smart" sector address.
    #[must_use]
    pub fn is_smart_addressable(&self) -> bool {
        true
    }

    fn ensure_open(&mut self) -> Result<&mut File, VdiskError> {
        if self.file.is_none() {
            let path = self.path.clone().ok_or(VdiskError::NotOpen)?;
            let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
            let (disk_type, num_platters, num_sectors, write_protect, label) =
                read_header(&mut file)?;
            self.disk_type = disk_type;
            self.num_platters = num_platters;
            self.num_sectors = num_sectors;
            self.write_protect = write_protect;
            self.label = label;
            self.file = Some(file);
        }
        Ok(self.file.as_mut().unwrap())
    }

    fn sector_offset(&self, platter: u16, sector: u32) -> Result<u64, VdiskError> {
        if platter >= self.num_platters || sector >= u32::from(self.num_sectors) {
            return Err(VdiskError::SectorOutOfRange { platter, sector });
        }
        let linear = u64::from(platter) * u64::from(self.num_sectors) + u64::from(sector);
        Ok(HEADER_BYTES as u64 + linear * SECTOR_BYTES as u64)
    }

    pub fn read_sector(&mut self, platter: u16, sector: u32, buf: &mut [u8; 256]) -> Result<(), VdiskError> {
        let offset = self.sector_offset(platter, sector)?;
        let file = self.ensure_open()?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }

    pub fn write_sector(&mut self, platter: u16, sector: u32, buf: &[u8; 256]) -> Result<(), VdiskError> {
        if self.write_protect {
            return Err(VdiskError::WriteProtected);
        }
        let offset = self.sector_offset(platter, sector)?;
        let file = self.ensure_open()?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)?;
        self.modified = true;
        Ok(())
    }

    /// Zero-fill a whole platter.
    pub fn format(&mut self, platter: u16) -> Result<(), VdiskError> {
        let zero = [0u8; 256];
        for sector in 0..u32::from(self.num_sectors) {
            self.write_sector(platter, sector, &zero)?;
        }
        Ok(())
    }

    /// Write the header and (for a freshly `create`d disk) zero-filled
    /// sector payloads to `path`, clearing the modified flag.
    pub fn save(&mut self, path: impl AsRef<Path>) -> Result<(), VdiskError> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        write_header(
            &mut file,
            self.disk_type,
            self.num_platters,
            self.num_sectors,
            self.write_protect,
            &self.label,
        )?;
        let total = u64::from(self.num_platters) * u64::from(self.num_sectors) * SECTOR_BYTES as u64;
        file.set_len(HEADER_BYTES as u64 + total)?;
        self.path = Some(path);
        self.file = Some(file);
        self.modified = false;
        Ok(())
    }

    /// Flush header metadata to disk and close the file handle, retaining
    /// path/geometry so the disk can be transparently reopened later.
    pub fn flush(&mut self) -> Result<(), VdiskError> {
        if let Some(file) = self.file.as_mut() {
            write_header(
                file,
                self.disk_type,
                self.num_platters,
                self.num_sectors,
                self.write_protect,
                &self.label,
            )?;
            file.flush()?;
        }
        self.file = None;
        Ok(())
    }
}

fn read_header(
    file: &mut File,
) -> Result<(DiskType, u16, u16, bool, String), VdiskError> {
    file.seek(SeekFrom::Start(0))?;
    let mut hdr = [0u8; HEADER_BYTES];
    file.read_exact(&mut hdr)?;
    if &hdr[0..8] != MAGIC {
        return Err(VdiskError::BadMagic);
    }
    let disk_type = DiskType::from_code(hdr[8]).ok_or(VdiskError::UnknownDiskType(hdr[8]))?;
    let num_platters = u16::from(hdr[9]);
    let num_sectors = u16::from_be_bytes([hdr[10], hdr[11]]);
    let write_protect = hdr[12] != 0;
    let label_bytes = &hdr[13..13 + LABEL_BYTES];
    let end = label_bytes.iter().position(|&b| b == 0).unwrap_or(LABEL_BYTES);
    let label = String::from_utf8_lossy(&label_bytes[..end]).into_owned();
    Ok((disk_type, num_platters, num_sectors, write_protect, label))
}

fn write_header(
    file: &mut File,
    disk_type: DiskType,
    num_platters: u16,
    num_sectors: u16,
    write_protect: bool,
    label: &str,
) -> Result<(), VdiskError> {
    let mut hdr = [0u8; HEADER_BYTES];
    hdr[0..8].copy_from_slice(MAGIC);
    hdr[8] = disk_type.code();
    hdr[9] = num_platters as u8;
    hdr[10..12].copy_from_slice(&num_sectors.to_be_bytes());
    hdr[12] = u8::from(write_protect);
    let label_bytes = label.as_bytes();
    let n = label_bytes.len().min(LABEL_BYTES - 1);
    hdr[13..13 + n].copy_from_slice(&label_bytes[..n]);
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&hdr)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn temp_path(name: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("wang2200-test-{}-{name}", std::process::id()));
        p
    }

    #[test]
    fn create_save_open_round_trips_header_fields() {
        let path = temp_path("roundtrip.wvd");
        let mut disk = Vdisk::create(DiskType::Fd5, 1, 1000);
        disk.set_label("TESTDISK");
        disk.save(&path).unwrap();
        assert!(!disk.is_modified());

        let mut reopened = Vdisk::open(&path).unwrap();
        assert_eq!(reopened.disk_type(), DiskType::Fd5);
        assert_eq!(reopened.num_platters(), 1);
        assert_eq!(reopened.num_sectors(), 1000);
        assert_eq!(reopened.label(), "TESTDISK");

        let mut buf = [0u8; 256];
        buf[0] = 0xAB;
        reopened.write_sector(0, 5, &buf).unwrap();
        let mut readback = [0u8; 256];
        reopened.read_sector(0, 5, &mut readback).unwrap();
        assert_eq!(readback, buf);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn flush_then_access_transparently_reopens() {
        let path = temp_path("reopen.wvd");
        let mut disk = Vdisk::create(DiskType::Fd8, 1, 64);
        disk.save(&path).unwrap();
        disk.flush().unwrap();

        let mut buf = [0xCCu8; 256];
        disk.write_sector(0, 1, &buf).unwrap();
        buf = [0u8; 256];
        disk.read_sector(0, 1, &mut buf).unwrap();
        assert_eq!(buf, [0xCCu8; 256]);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let path = temp_path("badmagic.wvd");
        std::fs::write(&path, vec![0u8; 512]).unwrap();
        let err = Vdisk::open(&path).unwrap_err();
        assert!(matches!(err, VdiskError::BadMagic));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn dumb_addressable_geometry_check() {
        let disk = Vdisk::create(DiskType::Fd5, 1, 2000);
        assert!(disk.is_dumb_addressable());
        let disk = Vdisk::create(DiskType::Hd60, 2, 2000);
        assert!(!disk.is_dumb_addressable());
        let _ = Cursor::new(Vec::<u8>::new());
    }
}
