//! Intel 8271 floppy disk controller.
//!
//! The BBC Micro's disk controller. It accepts a command byte and its
//! parameters, seeks, and then moves sector data one byte at a time through
//! the data register, raising a data request (wired to NMI) for each byte.
//! When a command completes the result register is loaded and the
//! interrupt request is raised.
//!
//! # Registers
//!
//! | Offset | Read     | Write     |
//! |--------|----------|-----------|
//! | 0      | Status   | Command   |
//! | 1      | Result   | Parameter |
//! | 2      |          | Reset     |
//! | 4-7    | Data     | Data      |
//!
//! # State machine
//!
//! Idle (collecting parameters) → Seeking → TransferringSector → Verifying
//! → Done or Error. Reading the result returns to Idle.
//!
//! Disks are shared with the host as `Arc<Mutex<DiskImage>>`. The
//! controller only ever `try_lock`s a drive; if the host holds it the
//! controller waits a tick and tries again.

pub mod commands;

use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use emu_core::{Observable, Value};
use format_ssd::{DiskError, DiskImage, SECTOR_SIZE, sector_crc};
use tracing::{debug, warn};

pub use commands::{
    Command, CommandKind, Opcode, RESULT_DATA_CRC, RESULT_LATE_DATA, RESULT_NOT_READY,
    RESULT_OK, RESULT_SECTOR_NOT_FOUND, RESULT_WRITE_PROTECTED,
};

pub const STATUS_BUSY: u8 = 0x80;
pub const STATUS_COMMAND_FULL: u8 = 0x40;
pub const STATUS_PARAM_FULL: u8 = 0x20;
pub const STATUS_RESULT_FULL: u8 = 0x10;
pub const STATUS_INT: u8 = 0x08;
pub const STATUS_DATA_REQUEST: u8 = 0x04;

/// Special register addresses.
pub const SPECIAL_TRACK_0: u8 = 0x12;
pub const SPECIAL_MODE: u8 = 0x17;
pub const SPECIAL_TRACK_1: u8 = 0x1A;
pub const SPECIAL_DRIVE_CONTROL: u8 = 0x23;

/// Byte written to every sector by Format.
pub const FORMAT_FILL: u8 = 0xE5;

/// A drive's disk, shared with the host.
pub type Drive = Arc<Mutex<DiskImage>>;

/// Timing and retry limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct FdcConfig {
    /// Extra attempts after a data CRC mismatch.
    pub max_retries: u8,
    /// Head settle time in ticks.
    pub seek_ticks: u32,
    /// Ticks per data byte.
    pub byte_ticks: u32,
}

impl Default for FdcConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            seek_ticks: 4000,
            byte_ticks: 64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdcPhase {
    Idle,
    Seeking,
    TransferringSector,
    Verifying,
    Error,
    Done,
}

impl FdcPhase {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Seeking => "seeking",
            Self::TransferringSector => "transferring",
            Self::Verifying => "verifying",
            Self::Error => "error",
            Self::Done => "done",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransferMode {
    /// Bytes go to the CPU through data requests.
    ToCpu,
    /// Bytes come from the CPU through data requests.
    FromCpu,
    /// Surface read without data requests (retries and Verify).
    Silent,
}

#[derive(Debug, Clone)]
struct Transfer {
    mode: TransferMode,
    buffer: Vec<u8>,
    index: usize,
    expected: usize,
    stored_crc: u16,
    loaded: bool,
}

impl Transfer {
    fn new(mode: TransferMode, expected: usize) -> Self {
        Self {
            mode,
            buffer: Vec::with_capacity(expected),
            index: 0,
            expected,
            stored_crc: 0,
            loaded: mode == TransferMode::FromCpu,
        }
    }
}

/// State of the command being executed.
#[derive(Debug, Clone)]
struct Active {
    command: Command,
    drive: Option<usize>,
    track: u8,
    sector: u8,
    remaining: u8,
    /// Retries spent on the current sector.
    retries: u8,
    /// Retries spent across the whole command.
    total_retries: u8,
    sectors_per_track: u8,
    validated: bool,
    transfer: Transfer,
}

enum Step {
    Continue,
    Finished,
    Failed(u8),
}

/// Intel 8271 floppy disk controller.
pub struct Fdc8271 {
    config: FdcConfig,
    phase: FdcPhase,
    drives: [Option<Drive>; 2],
    heads: [u8; 2],
    collecting: Option<Command>,
    active: Option<Active>,
    countdown: u32,

    command_full: bool,
    param_full: bool,
    result: u8,
    result_full: bool,
    irq: bool,
    data: u8,
    data_request: bool,

    special: [u8; 64],
    last_retries: u8,
    rejected_commands: u64,
    completed_commands: u64,
}

impl Fdc8271 {
    #[must_use]
    pub fn new(config: FdcConfig) -> Self {
        Self {
            config,
            phase: FdcPhase::Idle,
            drives: [None, None],
            heads: [0; 2],
            collecting: None,
            active: None,
            countdown: 0,
            command_full: false,
            param_full: false,
            result: 0,
            result_full: false,
            irq: false,
            data: 0,
            data_request: false,
            special: [0; 64],
            last_retries: 0,
            rejected_commands: 0,
            completed_commands: 0,
        }
    }

    #[must_use]
    pub fn config(&self) -> FdcConfig {
        self.config
    }

    pub fn insert_disk(&mut self, drive: usize, disk: Drive) {
        if let Some(slot) = self.drives.get_mut(drive) {
            *slot = Some(disk);
        }
    }

    pub fn eject_disk(&mut self, drive: usize) -> Option<Drive> {
        self.drives.get_mut(drive).and_then(Option::take)
    }

    #[must_use]
    pub fn drive(&self, drive: usize) -> Option<&Drive> {
        self.drives.get(drive).and_then(Option::as_ref)
    }

    #[must_use]
    pub fn phase(&self) -> FdcPhase {
        self.phase
    }

    /// Track the drive's head is over.
    #[must_use]
    pub fn head(&self, drive: usize) -> u8 {
        self.heads.get(drive).copied().unwrap_or(0)
    }

    /// Commands ignored because one was already in progress.
    #[must_use]
    pub fn rejected_commands(&self) -> u64 {
        self.rejected_commands
    }

    /// Retries used by the last completed command.
    #[must_use]
    pub fn last_retries(&self) -> u8 {
        self.last_retries
    }

    #[must_use]
    pub fn mode(&self) -> u8 {
        self.special[usize::from(SPECIAL_MODE)]
    }

    #[must_use]
    pub fn drive_control(&self) -> u8 {
        self.special[usize::from(SPECIAL_DRIVE_CONTROL)]
    }

    /// Interrupt output: completion or a pending data request.
    #[must_use]
    pub fn nmi_active(&self) -> bool {
        self.irq || self.data_request
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.collecting.is_some()
            || matches!(
                self.phase,
                FdcPhase::Seeking | FdcPhase::TransferringSector | FdcPhase::Verifying
            )
    }

    #[must_use]
    pub fn status(&self) -> u8 {
        let mut status = 0;
        if self.is_busy() {
            status |= STATUS_BUSY;
        }
        if self.command_full {
            status |= STATUS_COMMAND_FULL;
        }
        if self.param_full {
            status |= STATUS_PARAM_FULL;
        }
        if self.result_full {
            status |= STATUS_RESULT_FULL;
        }
        if self.irq {
            status |= STATUS_INT;
        }
        if self.data_request {
            status |= STATUS_DATA_REQUEST;
        }
        status
    }

    pub fn read(&mut self, reg: u8) -> u8 {
        match reg & 0x07 {
            0 => self.status(),
            1 => self.read_result(),
            4..=7 => {
                self.data_request = false;
                self.data
            }
            _ => 0,
        }
    }

    pub fn write(&mut self, reg: u8, value: u8) {
        match reg & 0x07 {
            0 => self.write_command(value),
            1 => self.write_parameter(value),
            2 => {
                if value & 0x01 != 0 {
                    self.reset();
                }
            }
            4..=7 => {
                self.data = value;
                self.data_request = false;
            }
            _ => {}
        }
    }

    /// Abort any command and clear the interface. Head positions and
    /// inserted disks are kept.
    pub fn reset(&mut self) {
        if self.active.is_some() || self.collecting.is_some() {
            debug!("8271 reset aborted command");
        }
        self.phase = FdcPhase::Idle;
        self.collecting = None;
        self.active = None;
        self.countdown = 0;
        self.command_full = false;
        self.param_full = false;
        self.result_full = false;
        self.irq = false;
        self.data_request = false;
    }

    /// Advance one 1 MHz cycle.
    pub fn tick(&mut self) {
        self.command_full = false;
        self.param_full = false;
        match self.phase {
            FdcPhase::Seeking => self.tick_seek(),
            FdcPhase::TransferringSector => self.tick_transfer(),
            FdcPhase::Verifying => self.tick_verify(),
            FdcPhase::Idle | FdcPhase::Error | FdcPhase::Done => {}
        }
    }

    // -----------------------------------------------------------------------
    // Command and parameter registers
    // -----------------------------------------------------------------------

    fn write_command(&mut self, value: u8) {
        if self.is_busy() {
            self.rejected_commands += 1;
            warn!(command = value, phase = self.phase.name(), "8271 command rejected while busy");
            return;
        }
        let Some(kind) = commands::decode(value) else {
            debug!(command = value, "unknown 8271 command ignored");
            return;
        };

        self.command_full = true;
        self.result_full = false;
        self.irq = false;
        self.phase = FdcPhase::Idle;

        let command = Command {
            raw: value,
            kind,
            params: Vec::with_capacity(kind.params),
        };
        if kind.params == 0 {
            self.start(command);
        } else {
            self.collecting = Some(command);
        }
    }

    fn write_parameter(&mut self, value: u8) {
        let Some(command) = self.collecting.as_mut() else {
            return;
        };
        self.param_full = true;
        command.params.push(value);
        if command.params.len() >= command.kind.params
            && let Some(command) = self.collecting.take()
        {
            self.start(command);
        }
    }

    fn read_result(&mut self) -> u8 {
        self.result_full = false;
        self.irq = false;
        if matches!(self.phase, FdcPhase::Done | FdcPhase::Error) {
            self.phase = FdcPhase::Idle;
        }
        self.result
    }

    fn start(&mut self, command: Command) {
        debug!(command = command.raw, params = ?command.params, "8271 command accepted");
        match command.opcode() {
            Opcode::Specify => {
                self.phase = FdcPhase::Idle;
                return;
            }
            Opcode::WriteSpecial => {
                self.write_special(command.param(0), command.param(1));
                self.phase = FdcPhase::Idle;
                return;
            }
            Opcode::ReadSpecial => {
                let value = self.read_special(command.param(0));
                self.immediate_result(value);
                return;
            }
            Opcode::ReadDriveStatus => {
                let value = self.drive_status(command.drive());
                self.immediate_result(value);
                return;
            }
            _ => {}
        }

        self.active = Some(Active {
            drive: command.drive(),
            track: command.track(),
            sector: command.sector(),
            remaining: command.count(),
            retries: 0,
            total_retries: 0,
            sectors_per_track: 0,
            validated: false,
            transfer: Transfer::new(TransferMode::Silent, 0),
            command,
        });
        self.phase = FdcPhase::Seeking;
        self.countdown = self.config.seek_ticks;
        self.validate();
    }

    /// Result without an interrupt (status and special register reads).
    fn immediate_result(&mut self, value: u8) {
        self.result = value;
        self.result_full = true;
        self.phase = FdcPhase::Done;
    }

    fn finish(&mut self, code: u8) {
        self.last_retries = self.active.take().map_or(0, |a| a.total_retries);
        self.result = code;
        self.result_full = true;
        self.irq = true;
        self.data_request = false;
        self.completed_commands += 1;
        self.phase = if code == RESULT_OK {
            FdcPhase::Done
        } else {
            FdcPhase::Error
        };
        debug!(result = code, retries = self.last_retries, "8271 command finished");
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    fn active_drive(&self) -> Option<Drive> {
        let drive = self.active.as_ref()?.drive?;
        self.drives.get(drive)?.clone()
    }

    /// Check the target against the disk before the head moves. Waits
    /// while the host holds the drive.
    fn validate(&mut self) {
        let Some(active) = &self.active else {
            return;
        };
        if active.validated {
            return;
        }
        let opcode = active.command.opcode();
        let (track, sector, size_code) = (active.track, active.sector, active.command.size_code());

        let Some(drive) = self.active_drive() else {
            self.finish(RESULT_NOT_READY);
            return;
        };
        let Some(disk) = try_lock(&drive) else {
            return;
        };
        let geometry = disk.geometry();
        let protected = disk.write_protected;
        drop(disk);

        let transfers = matches!(
            opcode,
            Opcode::ReadData { .. } | Opcode::WriteData { .. } | Opcode::Verify
        );
        let fault = if track >= geometry.tracks {
            Some(RESULT_SECTOR_NOT_FOUND)
        } else if (transfers || opcode == Opcode::Format) && size_code != commands::SIZE_CODE_256 {
            Some(RESULT_SECTOR_NOT_FOUND)
        } else if transfers && sector >= geometry.sectors_per_track {
            Some(RESULT_SECTOR_NOT_FOUND)
        } else if opcode.writes() && protected {
            Some(RESULT_WRITE_PROTECTED)
        } else {
            None
        };

        if let Some(code) = fault {
            self.finish(code);
        } else if let Some(active) = self.active.as_mut() {
            active.validated = true;
            active.sectors_per_track = geometry.sectors_per_track;
        }
    }

    fn tick_seek(&mut self) {
        self.validate();
        let Some(active) = &self.active else {
            return;
        };
        if !active.validated {
            return;
        }
        self.countdown = self.countdown.saturating_sub(1);
        if self.countdown > 0 {
            return;
        }

        let (drive, track, opcode, count) =
            (active.drive, active.track, active.command.opcode(), active.remaining);
        if let Some(drive) = drive {
            self.heads[drive] = track;
        }
        match opcode {
            Opcode::Seek => self.finish(RESULT_OK),
            _ if count == 0 => self.finish(RESULT_OK),
            Opcode::ReadId => self.begin_read_id(),
            Opcode::Format => self.begin_format(),
            _ => self.begin_sector(),
        }
    }

    fn begin_read_id(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let count = usize::from(active.remaining);
        let mut transfer = Transfer::new(TransferMode::ToCpu, count * 4);
        for i in 0..count {
            let sector = (i % usize::from(active.sectors_per_track.max(1))) as u8;
            transfer
                .buffer
                .extend_from_slice(&[active.track, 0, sector, commands::SIZE_CODE_256]);
        }
        transfer.loaded = true;
        active.transfer = transfer;
        self.enter_transfer(false);
    }

    /// Format takes four ID bytes per sector from the CPU.
    fn begin_format(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        active.transfer = Transfer::new(TransferMode::FromCpu, usize::from(active.remaining) * 4);
        self.enter_transfer(true);
    }

    /// Start a pass over the current sector. A read delivers the sector
    /// on its first pass; retry passes only re-check the surface.
    fn begin_sector(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let first_pass = active.retries == 0;
        let mode = match active.command.opcode() {
            Opcode::WriteData { .. } => TransferMode::FromCpu,
            Opcode::ReadData { .. } if first_pass => TransferMode::ToCpu,
            _ => TransferMode::Silent,
        };
        active.transfer = Transfer::new(mode, SECTOR_SIZE);
        self.enter_transfer(mode == TransferMode::FromCpu);
    }

    fn enter_transfer(&mut self, request_first: bool) {
        self.phase = FdcPhase::TransferringSector;
        self.countdown = self.config.byte_ticks.max(1);
        if request_first {
            self.data_request = true;
        }
    }

    fn tick_transfer(&mut self) {
        let Some(active) = &self.active else {
            return;
        };
        if !active.transfer.loaded {
            let (track, sector) = (active.track, active.sector);
            let Some(drive) = self.active_drive() else {
                self.finish(RESULT_NOT_READY);
                return;
            };
            let Some(disk) = try_lock(&drive) else {
                return;
            };
            let read = disk.read_sector(track, sector);
            drop(disk);
            match read {
                Ok(read) => {
                    if let Some(active) = self.active.as_mut() {
                        active.transfer.buffer = read.payload;
                        active.transfer.stored_crc = read.stored_crc;
                        active.transfer.loaded = true;
                    }
                }
                Err(_) => {
                    self.finish(RESULT_SECTOR_NOT_FOUND);
                    return;
                }
            }
        }

        self.countdown = self.countdown.saturating_sub(1);
        if self.countdown > 0 {
            return;
        }
        self.countdown = self.config.byte_ticks.max(1);

        match self.step_byte() {
            Step::Continue => {}
            Step::Failed(code) => self.finish(code),
            Step::Finished => {
                let read_id = self
                    .active
                    .as_ref()
                    .is_some_and(|a| a.command.opcode() == Opcode::ReadId);
                if read_id {
                    self.finish(RESULT_OK);
                } else {
                    self.phase = FdcPhase::Verifying;
                }
            }
        }
    }

    /// Move one byte between the surface buffer and the data register.
    fn step_byte(&mut self) -> Step {
        let late = self.data_request;
        let Some(active) = self.active.as_mut() else {
            return Step::Finished;
        };
        let transfer = &mut active.transfer;
        match transfer.mode {
            TransferMode::ToCpu => {
                if late {
                    return Step::Failed(RESULT_LATE_DATA);
                }
                if let Some(&byte) = transfer.buffer.get(transfer.index) {
                    transfer.index += 1;
                    self.data = byte;
                    self.data_request = true;
                    return Step::Continue;
                }
                Step::Finished
            }
            TransferMode::FromCpu => {
                if late {
                    return Step::Failed(RESULT_LATE_DATA);
                }
                transfer.buffer.push(self.data);
                if transfer.buffer.len() < transfer.expected {
                    self.data_request = true;
                    return Step::Continue;
                }
                Step::Finished
            }
            TransferMode::Silent => {
                transfer.index += 1;
                if transfer.index < transfer.buffer.len() {
                    Step::Continue
                } else {
                    Step::Finished
                }
            }
        }
    }

    fn tick_verify(&mut self) {
        let Some(active) = &self.active else {
            return;
        };
        let (opcode, track, sector) = (active.command.opcode(), active.track, active.sector);

        match opcode {
            Opcode::WriteData { .. } | Opcode::Format => {
                let Some(drive) = self.active_drive() else {
                    self.finish(RESULT_NOT_READY);
                    return;
                };
                let Some(mut disk) = try_lock(&drive) else {
                    return;
                };
                let outcome = if opcode == Opcode::Format {
                    disk.format_track(track, FORMAT_FILL).map(|()| true)
                } else {
                    commit_sector(&mut disk, track, sector, &active.transfer.buffer)
                };
                drop(disk);
                match outcome {
                    Ok(true) if opcode == Opcode::Format => self.finish(RESULT_OK),
                    Ok(true) => self.next_sector(),
                    Ok(false) => self.retry(),
                    Err(DiskError::WriteProtected) => self.finish(RESULT_WRITE_PROTECTED),
                    Err(_) => self.finish(RESULT_SECTOR_NOT_FOUND),
                }
            }
            _ => {
                if sector_crc(&active.transfer.buffer) == active.transfer.stored_crc {
                    self.next_sector();
                } else {
                    self.retry();
                }
            }
        }
    }

    /// Count a CRC failure. Reads go back to the surface; writes are
    /// committed again from the buffer on the next tick.
    fn retry(&mut self) {
        let max_retries = self.config.max_retries;
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if active.retries >= max_retries {
            self.finish(RESULT_DATA_CRC);
            return;
        }
        active.retries += 1;
        active.total_retries = active.total_retries.saturating_add(1);
        debug!(
            track = active.track,
            sector = active.sector,
            retry = active.retries,
            "8271 data CRC mismatch"
        );
        if !matches!(active.command.opcode(), Opcode::WriteData { .. }) {
            self.begin_sector();
        }
    }

    fn next_sector(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        active.remaining = active.remaining.saturating_sub(1);
        active.sector = active.sector.wrapping_add(1);
        active.retries = 0;
        if active.remaining == 0 {
            self.finish(RESULT_OK);
        } else if active.sector >= active.sectors_per_track {
            self.finish(RESULT_SECTOR_NOT_FOUND);
        } else {
            self.begin_sector();
        }
    }

    // -----------------------------------------------------------------------
    // Status and special registers
    // -----------------------------------------------------------------------

    fn drive_status(&self, drive: Option<usize>) -> u8 {
        let mut status = 0;
        if self.drives[0].is_some() {
            status |= 0x04;
        }
        if self.drives[1].is_some() {
            status |= 0x40;
        }
        if let Some(drive) = drive {
            if self.heads[drive] == 0 {
                status |= 0x02;
            }
            let protected = self.drives[drive]
                .as_ref()
                .and_then(|d| try_lock(d).map(|disk| disk.write_protected))
                .unwrap_or(false);
            if protected {
                status |= 0x08;
            }
        }
        status
    }

    fn read_special(&self, reg: u8) -> u8 {
        match reg {
            SPECIAL_TRACK_0 => self.heads[0],
            SPECIAL_TRACK_1 => self.heads[1],
            _ => self.special[usize::from(reg & 0x3F)],
        }
    }

    fn write_special(&mut self, reg: u8, value: u8) {
        match reg {
            SPECIAL_TRACK_0 => self.heads[0] = value,
            SPECIAL_TRACK_1 => self.heads[1] = value,
            _ => self.special[usize::from(reg & 0x3F)] = value,
        }
    }
}

impl Default for Fdc8271 {
    fn default() -> Self {
        Self::new(FdcConfig::default())
    }
}

fn try_lock(drive: &Drive) -> Option<MutexGuard<'_, DiskImage>> {
    match drive.try_lock() {
        Ok(guard) => Some(guard),
        Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
        Err(TryLockError::WouldBlock) => None,
    }
}

/// Write a sector and read it back. `Ok(false)` means the stored CRC does
/// not match what was written.
fn commit_sector(
    disk: &mut DiskImage,
    track: u8,
    sector: u8,
    payload: &[u8],
) -> format_ssd::Result<bool> {
    disk.write_sector(track, sector, payload)?;
    let read = disk.read_sector(track, sector)?;
    Ok(read.crc_ok() && read.payload == payload)
}

const QUERY_PATHS: &[&str] = &[
    "phase",
    "status",
    "result",
    "track.0",
    "track.1",
    "retries",
    "rejected_commands",
    "completed_commands",
];

impl Observable for Fdc8271 {
    fn query(&self, path: &str) -> Option<Value> {
        match path {
            "phase" => Some(self.phase.name().into()),
            "status" => Some(self.status().into()),
            "result" => Some(self.result.into()),
            "track.0" => Some(self.heads[0].into()),
            "track.1" => Some(self.heads[1].into()),
            "retries" => Some(self.last_retries.into()),
            "rejected_commands" => Some(self.rejected_commands.into()),
            "completed_commands" => Some(self.completed_commands.into()),
            _ => None,
        }
    }

    fn query_paths(&self) -> &'static [&'static str] {
        QUERY_PATHS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> FdcConfig {
        FdcConfig {
            max_retries: 3,
            seek_ticks: 10,
            byte_ticks: 4,
        }
    }

    fn fdc_with_disk() -> (Fdc8271, Drive) {
        let disk = Arc::new(Mutex::new(DiskImage::blank(40)));
        let mut fdc = Fdc8271::new(fast());
        fdc.insert_disk(0, Arc::clone(&disk));
        (fdc, disk)
    }

    fn issue(fdc: &mut Fdc8271, command: u8, params: &[u8]) {
        fdc.write(0, command);
        for &p in params {
            fdc.write(1, p);
        }
    }

    fn run_to_result(fdc: &mut Fdc8271) {
        for _ in 0..10_000 {
            if fdc.status() & STATUS_RESULT_FULL != 0 {
                return;
            }
            fdc.tick();
        }
        panic!("no result");
    }

    #[test]
    fn specify_and_special_registers_need_no_disk() {
        let mut fdc = Fdc8271::new(fast());
        issue(&mut fdc, 0x35, &[0x0D, 0x14, 0x05, 0xCA]);
        assert_eq!(fdc.phase(), FdcPhase::Idle);
        assert_eq!(fdc.status() & STATUS_BUSY, 0);

        issue(&mut fdc, 0x3A, &[SPECIAL_MODE, 0xC1]);
        assert_eq!(fdc.mode(), 0xC1);
        issue(&mut fdc, 0x3A, &[SPECIAL_TRACK_1, 7]);
        assert_eq!(fdc.head(1), 7);

        issue(&mut fdc, 0x3D, &[SPECIAL_TRACK_1]);
        fdc.tick();
        assert_eq!(fdc.status(), STATUS_RESULT_FULL, "no interrupt");
        assert_eq!(fdc.read(1), 7);
        assert_eq!(fdc.phase(), FdcPhase::Idle);
    }

    #[test]
    fn seek_moves_head_after_settle() {
        let (mut fdc, _disk) = fdc_with_disk();
        issue(&mut fdc, 0x69, &[5]);
        assert_ne!(fdc.status() & STATUS_BUSY, 0);
        assert_eq!(fdc.head(0), 0);
        for _ in 0..9 {
            fdc.tick();
        }
        assert_eq!(fdc.phase(), FdcPhase::Seeking);
        fdc.tick();
        assert_eq!(fdc.head(0), 5);
        assert!(fdc.nmi_active());
        assert_eq!(fdc.read(1), RESULT_OK);
        assert!(!fdc.nmi_active());
    }

    #[test]
    fn seek_past_last_track_faults_without_moving() {
        let (mut fdc, _disk) = fdc_with_disk();
        fdc.insert_disk(1, Arc::new(Mutex::new(DiskImage::blank(80))));
        issue(&mut fdc, 0x69, &[40]);
        assert_eq!(fdc.phase(), FdcPhase::Error);
        assert_eq!(fdc.read(1), RESULT_SECTOR_NOT_FOUND);
        assert_eq!(fdc.head(0), 0);
        assert_eq!(fdc.head(1), 0);
    }

    #[test]
    fn empty_drive_is_not_ready() {
        let mut fdc = Fdc8271::new(fast());
        issue(&mut fdc, 0x93, &[0, 0, 0x21]);
        assert_eq!(fdc.read(1), RESULT_NOT_READY);
        issue(&mut fdc, 0x29, &[0]);
        assert_eq!(fdc.read(1), RESULT_NOT_READY, "no drive selected");
    }

    #[test]
    fn single_record_forms_report_sector_not_found() {
        let (mut fdc, _disk) = fdc_with_disk();
        issue(&mut fdc, 0x52, &[0, 0]);
        assert_eq!(fdc.read(1), RESULT_SECTOR_NOT_FOUND);
    }

    #[test]
    fn command_while_busy_is_rejected() {
        let (mut fdc, _disk) = fdc_with_disk();
        issue(&mut fdc, 0x69, &[3]);
        issue(&mut fdc, 0x69, &[9]);
        assert_eq!(fdc.rejected_commands(), 1);
        run_to_result(&mut fdc);
        assert_eq!(fdc.head(0), 3);
    }

    #[test]
    fn drive_status_reports_ready_and_track_zero() {
        let (mut fdc, disk) = fdc_with_disk();
        disk.lock().expect("lock").write_protected = true;
        issue(&mut fdc, 0x6C, &[]);
        assert_eq!(fdc.read(1), 0x04 | 0x02 | 0x08);
    }

    #[test]
    fn host_lock_delays_command() {
        let (mut fdc, disk) = fdc_with_disk();
        let guard = disk.lock().expect("lock");
        issue(&mut fdc, 0x69, &[2]);
        for _ in 0..50 {
            fdc.tick();
        }
        assert_eq!(fdc.phase(), FdcPhase::Seeking);
        drop(guard);
        run_to_result(&mut fdc);
        assert_eq!(fdc.read(1), RESULT_OK);
        assert_eq!(fdc.head(0), 2);
    }

    #[test]
    fn reset_aborts_command() {
        let (mut fdc, _disk) = fdc_with_disk();
        issue(&mut fdc, 0x69, &[3]);
        fdc.write(2, 1);
        fdc.write(2, 0);
        assert_eq!(fdc.phase(), FdcPhase::Idle);
        assert_eq!(fdc.status(), 0);
    }

    #[test]
    fn observable_paths() {
        let (fdc, _disk) = fdc_with_disk();
        for path in fdc.query_paths() {
            assert!(fdc.query(path).is_some(), "{path}");
        }
        assert_eq!(fdc.query("phase"), Some(Value::from("idle")));
    }
}
