//! Top-level BBC Micro system.
//!
//! The master clock ticks at 2 MHz, the fastest rate any device sees.
//! The 1 MHz devices act on odd ticks. One 50 Hz frame is 40,000 ticks.
//!
//! # Tick loop
//!
//! Each tick:
//! 1. Drain host events into the keyboard, mouse and serial receiver
//! 2. Apply the interrupt lines computed at the end of the previous tick
//! 3. CPU, unless it is stretched for a 1 MHz access
//! 4. CRTC and video ULA (every tick at 2 MHz, odd ticks at 1 MHz)
//! 5. Odd ticks: system VIA, user VIA, keyboard scan, mouse, ACIA, FDC
//! 6. Recompute the interrupt lines for the next tick

use std::sync::{Arc, Mutex};

use emu_core::{
    Cpu, EventQueue, Frame, FrameSlot, HostEvent, MasterClock, Observable, Tickable, Value,
};
use format_ssd::DiskImage;
use mos_6502::Mos6502;
use tracing::{debug, info};

use crate::bus::BbcBus;
use crate::config::{BbcConfig, Roms};
use crate::frame_sink::FrameSink;
use crate::irq::IrqLines;
use crate::keyboard::BbcKey;
use crate::keyboard_map::{KEYSYM_BREAK, map_keysym};
use crate::vidproc::{Beam, screen_address};

/// Master clock rate.
pub const MASTER_HZ: u64 = 2_000_000;
pub const FRAMES_PER_SECOND: u64 = 50;

/// Frame size the display starts at before the first field.
const INITIAL_WIDTH: u32 = 640;
const INITIAL_HEIGHT: u32 = 256;

/// BBC Micro Model B.
pub struct Bbc {
    cpu: Mos6502,
    bus: BbcBus,
    clock: MasterClock,
    ticks: u64,
    irq_lines: IrqLines,
    events: Arc<EventQueue<HostEvent>>,
    sink: FrameSink,
    /// A field was published within the last frame period.
    video_active: bool,
    illegal_seen: u64,
}

impl Bbc {
    /// Build a machine from its configuration and ROM images and power
    /// it on. Disks are inserted separately.
    #[must_use]
    pub fn new(config: &BbcConfig, roms: &Roms) -> Self {
        let bus = BbcBus::new(
            roms,
            config.fdc,
            config.keyboard_links,
            config.event_queue_capacity,
        );
        let slot = Arc::new(FrameSlot::new(INITIAL_WIDTH, INITIAL_HEIGHT));
        let mut bbc = Self {
            cpu: Mos6502::with_policy(config.illegal_opcodes),
            bus,
            clock: MasterClock::new(MASTER_HZ),
            ticks: 0,
            irq_lines: IrqLines::empty(),
            events: Arc::new(EventQueue::new(config.event_queue_capacity)),
            sink: FrameSink::new(slot),
            video_active: false,
            illegal_seen: 0,
        };
        bbc.reset();
        bbc
    }

    /// Power-on reset: RAM cleared, every chip reset, CPU reset sequence.
    pub fn reset(&mut self) {
        self.bus.reset();
        self.cpu.reset();
        self.irq_lines = IrqLines::empty();
        info!("machine reset");
    }

    /// BREAK: the CPU and the devices on its reset line restart. RAM and
    /// the system VIA survive, which is how the OS tells BREAK from
    /// power-on.
    pub fn press_break(&mut self) {
        self.bus.reset_peripherals();
        self.bus.stretch = 0;
        self.cpu.reset();
        self.irq_lines = IrqLines::empty();
        info!("BREAK");
    }

    /// Advance one 2 MHz tick.
    pub fn tick(&mut self) {
        self.drain_events();

        self.cpu.set_irq(self.irq_lines.irq());
        self.cpu.set_nmi(self.irq_lines.nmi());

        let odd = self.ticks & 1 == 1;
        self.bus.odd_tick = odd;
        if self.bus.stretch > 0 {
            self.bus.stretch -= 1;
        } else {
            self.cpu.tick(&mut self.bus);
            self.note_illegal();
        }

        if odd || self.bus.ula.fast_clock() {
            self.clock_video();
        }
        if odd {
            self.bus.tick_slow();
        }

        self.irq_lines = self.bus.interrupt_lines();
        self.ticks += 1;
    }

    /// Run until the video publishes a field, or for one frame period
    /// when video is off. Returns the ticks executed.
    pub fn run_frame(&mut self) -> u64 {
        let period = self.clock.ticks_per_frame(FRAMES_PER_SECOND).get();
        // Allow for fields a little longer than 20 ms.
        let limit = if self.video_active {
            period + period / 4
        } else {
            period
        };
        let start_frames = self.sink.published();
        let start = self.ticks;
        while self.ticks - start < limit {
            self.tick();
            if self.sink.published() != start_frames {
                self.video_active = true;
                return self.ticks - start;
            }
        }
        self.video_active = false;
        self.ticks - start
    }

    pub fn insert_disk(&mut self, drive: usize, disk: Arc<Mutex<DiskImage>>) {
        info!(drive, "disk inserted");
        self.bus.fdc.insert_disk(drive, disk);
    }

    pub fn eject_disk(&mut self, drive: usize) -> Option<Arc<Mutex<DiskImage>>> {
        let disk = self.bus.fdc.eject_disk(drive);
        if disk.is_some() {
            info!(drive, "disk ejected");
        }
        disk
    }

    /// Queue for host input; safe to push from any thread.
    #[must_use]
    pub fn event_sender(&self) -> Arc<EventQueue<HostEvent>> {
        Arc::clone(&self.events)
    }

    /// Slot holding the latest completed frame.
    #[must_use]
    pub fn frame_slot(&self) -> Arc<FrameSlot> {
        self.sink.slot()
    }

    /// The latest completed frame.
    #[must_use]
    pub fn framebuffer(&self) -> Arc<Frame> {
        self.sink.slot().latest()
    }

    /// Bytes transmitted on the serial port.
    #[must_use]
    pub fn serial_output(&self) -> Arc<EventQueue<u8>> {
        self.bus.serial.output()
    }

    #[must_use]
    pub fn peek(&self, address: u16) -> u8 {
        self.bus.peek(address)
    }

    pub fn poke(&mut self, address: u16, value: u8) {
        self.bus.poke(address, value);
    }

    /// Copy `data` into RAM at `address`.
    pub fn load(&mut self, address: u16, data: &[u8]) {
        for (offset, &byte) in data.iter().enumerate() {
            self.bus.poke(address.wrapping_add(offset as u16), byte);
        }
    }

    /// Copy a machine code program into memory and start executing it at
    /// its first byte.
    pub fn load_and_run(&mut self, address: u16, data: &[u8]) {
        self.load(address, data);
        self.cpu.force_pc(address);
        info!(len = data.len(), "program loaded at {address:04X}");
    }

    pub fn press_key(&mut self, key: BbcKey) {
        self.bus.system_via.keyboard.set(key, true);
        self.bus.system_via.refresh_inputs();
    }

    pub fn release_key(&mut self, key: BbcKey) {
        self.bus.system_via.keyboard.set(key, false);
        self.bus.system_via.refresh_inputs();
    }

    #[must_use]
    pub fn cpu(&self) -> &Mos6502 {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut Mos6502 {
        &mut self.cpu
    }

    #[must_use]
    pub fn bus(&self) -> &BbcBus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut BbcBus {
        &mut self.bus
    }

    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Fields published since power-on.
    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.sink.published()
    }

    /// Displayed scanlines of the field still being assembled.
    #[must_use]
    pub fn buffered_lines(&self) -> usize {
        self.sink.buffered_lines()
    }

    #[must_use]
    pub fn irq_lines(&self) -> IrqLines {
        self.irq_lines
    }

    fn drain_events(&mut self) {
        while let Some(event) = self.events.pop() {
            match event {
                HostEvent::Key { keysym, pressed } => {
                    if keysym == KEYSYM_BREAK {
                        if pressed {
                            self.press_break();
                        }
                    } else if let Some(key) = map_keysym(keysym) {
                        self.bus.system_via.keyboard.set(key, pressed);
                        self.bus.system_via.refresh_inputs();
                    }
                }
                HostEvent::Pointer { x, y, buttons } => {
                    let bus = &mut self.bus;
                    bus.mouse.apply(&mut bus.user_via, x, y, buttons);
                }
                HostEvent::SerialByte(byte) => self.bus.serial.receive(byte),
            }
        }
    }

    fn clock_video(&mut self) {
        let crtc = &mut self.bus.crtc;
        let hcc = crtc.hcc();
        let row = crtc.row();
        let field_odd = crtc.field_odd();
        let output = crtc.tick();
        let beam = Beam {
            output,
            hcc,
            row,
            field_odd,
            display_skew: crtc.display_skew(),
            cursor_skew: crtc.cursor_skew(),
        };

        let address = screen_address(
            output.ma,
            output.ra,
            self.bus.ula.teletext_enabled(),
            self.bus.system_via.latch.wrap_size(),
        );
        let byte = self.bus.ram[usize::from(address & 0x7FFF)];
        self.bus.ula.character(beam, byte, &mut self.sink);
    }

    fn note_illegal(&mut self) {
        let count = self.cpu.illegal_count();
        if count != self.illegal_seen {
            self.illegal_seen = count;
            if let Some(illegal) = self.cpu.last_illegal() {
                debug!(
                    opcode = illegal.opcode,
                    pc = illegal.pc,
                    "undocumented opcode executed"
                );
            }
        }
    }

    fn query_crtc(&self, path: &str) -> Option<Value> {
        let crtc = &self.bus.crtc;
        if let Some(index) = path.strip_prefix('r') {
            let index: usize = index.parse().ok()?;
            return (index < 18).then(|| crtc.register(index).into());
        }
        match path {
            "hcc" => Some(crtc.hcc().into()),
            "row" => Some(crtc.row().into()),
            "ra" => Some(crtc.ra().into()),
            "vsync" => Some(crtc.vsync().into()),
            "field_odd" => Some(crtc.field_odd().into()),
            "field_count" => Some(crtc.field_count().into()),
            _ => None,
        }
    }
}

fn query_via(via: &mos_via_6522::Via6522, path: &str) -> Option<Value> {
    match path {
        "ifr" => Some(via.ifr().into()),
        "ier" => Some(via.ier().into()),
        "acr" => Some(via.acr().into()),
        "pcr" => Some(via.pcr().into()),
        "t1" => Some(via.timer1_counter().into()),
        "t2" => Some(via.timer2_counter().into()),
        "port_a" => Some(via.port_a_output().into()),
        "port_b" => Some(via.port_b_output().into()),
        "irq" => Some(via.irq_active().into()),
        _ => None,
    }
}

impl Observable for Bbc {
    fn query(&self, path: &str) -> Option<Value> {
        if let Some(rest) = path.strip_prefix("cpu.") {
            return self.cpu.query(rest);
        }
        if let Some(rest) = path.strip_prefix("crtc.") {
            return self.query_crtc(rest);
        }
        if let Some(rest) = path.strip_prefix("via.system.") {
            if rest == "latch" {
                return Some(self.bus.system_via.latch.bits().into());
            }
            return query_via(&self.bus.system_via.via, rest);
        }
        if let Some(rest) = path.strip_prefix("via.user.") {
            return query_via(&self.bus.user_via, rest);
        }
        if let Some(rest) = path.strip_prefix("fdc.") {
            return self.bus.fdc.query(rest);
        }
        match path {
            "open_bus_accesses" => Some(self.bus.open_bus_accesses().into()),
            "ticks" => Some(self.ticks.into()),
            "frames" => Some(self.sink.published().into()),
            "romsel" => Some(self.bus.romsel().into()),
            "ula.control" => Some(self.bus.ula.control().into()),
            _ => None,
        }
    }

    fn query_paths(&self) -> &'static [&'static str] {
        QUERY_PATHS
    }
}

/// One master tick per call, so `tick_n` runs a fixed slice of machine time.
impl Tickable for Bbc {
    fn tick(&mut self) {
        Bbc::tick(self);
    }
}

const QUERY_PATHS: &[&str] = &[
    "cpu.pc",
    "cpu.a",
    "cpu.x",
    "cpu.y",
    "cpu.s",
    "cpu.p",
    "cpu.cycles",
    "cpu.halted",
    "cpu.illegal_count",
    "crtc.r<0-17>",
    "crtc.hcc",
    "crtc.row",
    "crtc.ra",
    "crtc.vsync",
    "crtc.field_odd",
    "crtc.field_count",
    "via.system.ifr",
    "via.system.ier",
    "via.system.acr",
    "via.system.pcr",
    "via.system.t1",
    "via.system.t2",
    "via.system.port_a",
    "via.system.port_b",
    "via.system.irq",
    "via.system.latch",
    "via.user.ifr",
    "via.user.ier",
    "via.user.acr",
    "via.user.pcr",
    "via.user.t1",
    "via.user.t2",
    "via.user.port_a",
    "via.user.port_b",
    "via.user.irq",
    "fdc.phase",
    "fdc.status",
    "fdc.result",
    "fdc.track.0",
    "fdc.track.1",
    "fdc.retries",
    "fdc.rejected_commands",
    "fdc.completed_commands",
    "open_bus_accesses",
    "ticks",
    "frames",
    "romsel",
    "ula.control",
];
