//! The machine: registers, memory, processes, and the fetch/decode/
//! execute loop.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};

use mica_asm::{Image, Instruction, RawInstruction, RegId};
use mica_types::{pack_str, Word};
use tracing::{debug, info, trace};

use crate::consts::DEFAULT_SEGMENT_SIZE;
use crate::memory::{Memory, PageTable};
use crate::process::{ProcState, Process, Segment};
use crate::state::{KernelAction, StepState};
use crate::{Exception, VmError};

/// Processor state of the running process.
///
/// Register 0 is zero by convention; the compiler never writes to it and
/// the machine does not police it.
#[derive(Debug, Clone)]
pub struct Cpu {
    /// Program counter, a byte address.
    pub pc: Word,
    /// The 32 general purpose registers.
    pub regs: [Word; 32],
    /// Multiplication/division high word.
    pub hi: Word,
    /// Multiplication/division low word.
    pub lo: Word,
}

impl Default for Cpu {
    fn default() -> Self {
        Cpu {
            pc: 0,
            regs: [0; 32],
            hi: 0,
            lo: 0,
        }
    }
}

/// Tunables of one machine instance.
#[derive(Debug, Clone)]
pub struct MachineConfig {
    /// Physical (and backing) memory size in MiB, clamped to 1..=1024.
    pub memory_mb: u32,
    /// Instructions per time slice.
    pub time_slice: Word,
    /// Segment size for loaded executables.
    pub segment_size: Word,
    /// Collect writes to descriptors 1 and 2 instead of passing them to
    /// the host; used by tests.
    pub capture_output: bool,
}

impl Default for MachineConfig {
    fn default() -> Self {
        MachineConfig {
            memory_mb: 64,
            time_slice: crate::consts::TIME_SLICE,
            segment_size: DEFAULT_SEGMENT_SIZE,
            capture_output: false,
        }
    }
}

/// Host file descriptors of the emulated processes.
///
/// Descriptors 0..=2 are the host's stdio; opened files start at 3.
/// Failed operations report -1 to the caller instead of faulting, like
/// the host calls they wrap.
#[derive(Debug, Default)]
pub(crate) struct FdTable {
    files: Vec<Option<File>>,
    captured: Option<Vec<u8>>,
}

impl FdTable {
    fn new(capture_output: bool) -> Self {
        FdTable {
            files: Vec::new(),
            captured: capture_output.then(Vec::new),
        }
    }

    pub(crate) fn open(&mut self, path: &str, flags: Word) -> Word {
        let result = if flags == 0 {
            OpenOptions::new().read(true).open(path)
        } else {
            OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)
        };

        match result {
            Ok(file) => {
                self.files.push(Some(file));
                self.files.len() as Word + 2
            }
            Err(_) => -1,
        }
    }

    pub(crate) fn read(&mut self, fd: Word, buf: &mut [u8]) -> Word {
        let result = match fd {
            0 => std::io::stdin().read(buf),
            _ => match self.file(fd) {
                Some(file) => file.read(buf),
                None => return -1,
            },
        };
        result.map(|n| n as Word).unwrap_or(-1)
    }

    pub(crate) fn write(&mut self, fd: Word, buf: &[u8]) -> Word {
        if let (1 | 2, Some(captured)) = (fd, self.captured.as_mut()) {
            captured.extend_from_slice(buf);
            return buf.len() as Word;
        }

        let result = match fd {
            1 => std::io::stdout().write(buf),
            2 => std::io::stderr().write(buf),
            _ => match self.file(fd) {
                Some(file) => file.write(buf),
                None => return -1,
            },
        };
        result.map(|n| n as Word).unwrap_or(-1)
    }

    fn file(&mut self, fd: Word) -> Option<&mut File> {
        self.files
            .get_mut((fd - 3) as usize)
            .and_then(|f| f.as_mut())
    }

    fn captured(&self) -> Option<&[u8]> {
        self.captured.as_deref()
    }
}

/// The emulated machine.
///
/// Holds the live CPU context, both memory stores, the process and
/// segment tables, and the machine-side state the system calls bridge
/// to. Policy — who runs next — lives in [`crate::Kernel`].
#[derive(Debug)]
pub struct Machine {
    pub(crate) cpu: Cpu,
    pub(crate) mem: Memory,
    pub(crate) procs: Vec<Process>,
    pub(crate) segments: Vec<Segment>,
    next_segment: Word,
    pub(crate) running: usize,
    pub(crate) interrupts_active: bool,
    pub(crate) action: KernelAction,
    pub(crate) shared_bump: Word,
    pub(crate) queue_addr: Option<Word>,
    pub(crate) files: FdTable,
    config: MachineConfig,
}

impl Machine {
    /// Boots `image` as process 0 and marshals `args` onto its stack.
    ///
    /// The image is copied flat into the backing store, the boot
    /// process's registers are set up (`$sp` at the segment top, `$gp`
    /// and the heap pointer `$k1` at the image end), the arguments are
    /// packed and pushed, and only then is paging switched on.
    pub fn boot(image: &Image, config: MachineConfig, args: &[String]) -> Result<Self, VmError> {
        if image.is_empty() {
            return Err(VmError::NothingToRun);
        }

        let mut machine = Machine {
            cpu: Cpu::default(),
            mem: Memory::new(config.memory_mb),
            procs: Vec::new(),
            segments: Vec::new(),
            next_segment: 0,
            running: 0,
            interrupts_active: false,
            action: KernelAction::Schedule,
            shared_bump: crate::consts::SHARED_SPACE_START,
            queue_addr: None,
            files: FdTable::new(config.capture_output),
            config,
        };

        info!(
            bytes = image.len_bytes(),
            memory_mb = machine.config.memory_mb,
            "booting"
        );

        machine.create_process(0, machine.config.segment_size, image.len_bytes());

        // memory starts in the boot regime: flat stores into the backing
        // store, which the boot process pages from later
        for (i, w) in image.words().iter().enumerate() {
            machine.store_word(i as Word * 4, *w)?;
        }

        machine.restore(0)?;
        machine.interrupts_active = false;

        machine.copy_arguments(args)?;
        machine.mem.activate_paging();

        Ok(machine)
    }

    // ------------------------------------------------------------------
    // processes

    /// Creates a process record with a fresh segment and empty page
    /// table; returns its pid.
    fn create_process(&mut self, pid: Word, segment_size: Word, image_bytes: Word) -> Word {
        let segment = Segment {
            start: self.next_segment,
            size: segment_size,
        };
        self.next_segment += segment_size;
        self.segments.push(segment);

        let mut regs: [Word; 32] = [0; 32];
        regs[RegId::SP] = segment_size - 4;
        regs[RegId::GP] = image_bytes;
        regs[RegId::K1] = image_bytes;

        self.procs.push(Process {
            pid,
            pc: 0,
            regs,
            hi: 0,
            lo: 0,
            segment: self.segments.len() - 1,
            state: ProcState::Ready,
            page_table: PageTable::new(),
        });

        debug!(
            pid,
            segment_start = segment.start,
            segment_size,
            "process created"
        );
        pid
    }

    /// Loads an executable from the host into a fresh segment and
    /// creates its process; the `alarm` system call and the kernel
    /// spawn path.
    pub fn load_executable(
        &mut self,
        pid: Word,
        segment_size: Word,
        path: &str,
    ) -> Result<Word, VmError> {
        let image = Image::load(path)?;
        info!(pid, path, bytes = image.len_bytes(), "loading executable");

        let segment_start = self.next_segment;
        self.mem.begin_load(segment_start);
        for (i, w) in image.words().iter().enumerate() {
            self.store_word(i as Word * 4, *w)?;
        }
        let running_offset = self.segments[self.procs[self.running].segment].start;
        self.mem.end_load(running_offset);

        Ok(self.create_process(pid, segment_size, image.len_bytes()))
    }

    /// The pid of the running process.
    pub fn running_pid(&self) -> Word {
        self.procs[self.running].pid
    }

    /// All live pids, in creation order.
    pub fn pids(&self) -> Vec<Word> {
        self.procs.iter().map(|p| p.pid).collect()
    }

    /// One more than the highest live pid.
    pub fn next_pid(&self) -> Word {
        self.procs.iter().map(|p| p.pid).max().map_or(0, |p| p + 1)
    }

    fn index_of(&self, pid: Word) -> Option<usize> {
        self.procs.iter().position(|p| p.pid == pid)
    }

    /// Sets the scheduling state of `pid`.
    pub fn set_state(&mut self, pid: Word, state: ProcState) {
        if let Some(i) = self.index_of(pid) {
            self.procs[i].state = state;
        }
    }

    /// Snapshots the live CPU context into the running process.
    pub fn save_running(&mut self) {
        let p = &mut self.procs[self.running];
        p.pc = self.cpu.pc;
        p.regs = self.cpu.regs;
        p.hi = self.cpu.hi;
        p.lo = self.cpu.lo;
    }

    /// Snapshots the live CPU context into `pid`; the `select` system
    /// call saves into its first argument.
    pub fn save_into(&mut self, pid: Word) -> Result<(), VmError> {
        let i = self.index_of(pid).ok_or(VmError::NoSuchProcess(pid))?;
        let p = &mut self.procs[i];
        p.pc = self.cpu.pc;
        p.regs = self.cpu.regs;
        p.hi = self.cpu.hi;
        p.lo = self.cpu.lo;
        Ok(())
    }

    /// Restores `pid` into the CPU and arms interrupts.
    pub fn restore(&mut self, pid: Word) -> Result<(), VmError> {
        let i = self.index_of(pid).ok_or(VmError::NoSuchProcess(pid))?;

        let p = &mut self.procs[i];
        p.state = ProcState::Running;
        self.cpu.pc = p.pc;
        self.cpu.regs = p.regs;
        self.cpu.hi = p.hi;
        self.cpu.lo = p.lo;

        let offset = self.segments[p.segment].start;
        self.mem.set_segment_offset(offset);

        self.running = i;
        self.interrupts_active = true;

        info!(pid, "running process");
        Ok(())
    }

    /// Removes an exited process. The caller restores another process
    /// before the machine steps again.
    pub fn remove_process(&mut self, pid: Word) {
        self.procs.retain(|p| p.pid != pid);
    }

    /// True when no process is left.
    pub fn is_halted(&self) -> bool {
        self.procs.is_empty()
    }

    /// Turns tick counting off; the kernel does this when it takes a
    /// trap, and [`Machine::restore`] turns it back on.
    pub fn disable_interrupts(&mut self) {
        self.interrupts_active = false;
    }

    /// True while the running process may be preempted.
    pub fn interrupts_active(&self) -> bool {
        self.interrupts_active
    }

    /// The machine's configuration.
    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    /// Output collected from descriptors 1 and 2, when capturing.
    pub fn captured_output(&self) -> Option<&[u8]> {
        self.files.captured()
    }

    // ------------------------------------------------------------------
    // memory access through the running process

    pub(crate) fn load_word(&mut self, vaddr: Word) -> Result<Word, Exception> {
        let Machine {
            mem,
            procs,
            running,
            ..
        } = self;
        mem.load_word(vaddr, &mut procs[*running].page_table)
    }

    pub(crate) fn store_word(&mut self, vaddr: Word, value: Word) -> Result<(), Exception> {
        let Machine {
            mem,
            procs,
            running,
            ..
        } = self;
        mem.store_word(vaddr, value, &mut procs[*running].page_table)
    }

    /// Reads `count` bytes of a packed buffer from emulated memory.
    pub(crate) fn read_bytes(&mut self, vaddr: Word, count: Word) -> Result<Vec<u8>, Exception> {
        let mut bytes = Vec::with_capacity(count.max(0) as usize);
        for i in 0..count {
            let word = self.load_word(vaddr + (i / 4) * 4)?;
            bytes.push(mica_types::load_byte(&[word], (i % 4) as usize) as u8);
        }
        Ok(bytes)
    }

    /// Writes host bytes into a packed buffer in emulated memory.
    pub(crate) fn write_bytes(&mut self, vaddr: Word, bytes: &[u8]) -> Result<(), Exception> {
        for (i, b) in bytes.iter().enumerate() {
            let addr = vaddr + (i as Word / 4) * 4;
            let mut word = [self.load_word(addr)?];
            mica_types::store_byte(&mut word, i % 4, *b as Word);
            self.store_word(addr, word[0])?;
        }
        Ok(())
    }

    /// Reads a null-terminated packed string from emulated memory.
    pub(crate) fn read_string(&mut self, vaddr: Word) -> Result<String, Exception> {
        let mut s = String::new();
        let mut addr = vaddr;
        'words: loop {
            let word = [self.load_word(addr)?];
            for i in 0..4 {
                let c = mica_types::load_character(&word, i) & 0x7f;
                if c == 0 {
                    break 'words;
                }
                s.push(c as u8 as char);
            }
            addr += 4;
        }
        Ok(s)
    }

    // ------------------------------------------------------------------
    // heap and stack of the running process

    /// Bump-allocates on the running process's heap; the `malloc`
    /// system call and argument marshalling.
    pub(crate) fn malloc_bump(&mut self, size: Word) -> Result<Word, Exception> {
        let mut size = size;
        if size % 4 != 0 {
            size += 4 - size % 4;
        }

        let bump = self.cpu.regs[RegId::K1];
        if bump + size >= self.cpu.regs[RegId::SP] {
            return Err(Exception::HeapOverflow);
        }

        self.cpu.regs[RegId::K1] = bump + size;
        debug!(size, address = bump, "malloc");
        Ok(bump)
    }

    fn push_stack(&mut self, value: Word) -> Result<(), Exception> {
        self.cpu.regs[RegId::SP] -= 4;
        self.store_word(self.cpu.regs[RegId::SP], value)
    }

    fn copy_string_to_heap(&mut self, s: &str) -> Result<Word, Exception> {
        let words = pack_str(s);
        let addr = self.malloc_bump(words.len() as Word * 4)?;
        for (i, w) in words.iter().enumerate() {
            self.store_word(addr + i as Word * 4, *w)?;
        }
        Ok(addr)
    }

    /// Pushes `argc` and a heap-allocated `argv` of packed strings onto
    /// the boot process's stack, the calling convention `main` expects.
    fn copy_arguments(&mut self, args: &[String]) -> Result<(), VmError> {
        self.push_stack(args.len() as Word)?;

        let argv = self.malloc_bump(args.len() as Word * 4)?;
        self.push_stack(argv)?;

        for (i, arg) in args.iter().enumerate() {
            let addr = self.copy_string_to_heap(arg)?;
            self.store_word(argv + i as Word * 4, addr)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // the interpreter

    /// Fetches, decodes, and executes one instruction.
    pub fn step(&mut self) -> Result<StepState, VmError> {
        let raw = self.load_word(self.cpu.pc).map_err(VmError::Exception)? as RawInstruction;
        let instr = Instruction::decode(raw).map_err(Exception::from)?;

        trace!(pc = self.cpu.pc, %instr, "execute");

        match instr {
            Instruction::Nop => self.cpu.pc += 4,
            Instruction::Addu { rd, rs, rt } => {
                self.cpu.regs[rd] = self.cpu.regs[rs].wrapping_add(self.cpu.regs[rt]);
                self.cpu.pc += 4;
            }
            Instruction::Subu { rd, rs, rt } => {
                self.cpu.regs[rd] = self.cpu.regs[rs].wrapping_sub(self.cpu.regs[rt]);
                self.cpu.pc += 4;
            }
            Instruction::Slt { rd, rs, rt } => {
                self.cpu.regs[rd] = (self.cpu.regs[rs] < self.cpu.regs[rt]) as Word;
                self.cpu.pc += 4;
            }
            Instruction::Multu { rs, rt } => {
                // truncated to one word; hi stays untouched by design of
                // the emitted code, which never reads it after multu
                self.cpu.lo = self.cpu.regs[rs].wrapping_mul(self.cpu.regs[rt]);
                self.cpu.pc += 4;
            }
            Instruction::Divu { rs, rt } => {
                let divisor = self.cpu.regs[rt];
                if divisor == 0 {
                    return Err(Exception::Signal.into());
                }
                self.cpu.lo = self.cpu.regs[rs].wrapping_div(divisor);
                self.cpu.hi = self.cpu.regs[rs].wrapping_rem(divisor);
                self.cpu.pc += 4;
            }
            Instruction::Mfhi { rd } => {
                self.cpu.regs[rd] = self.cpu.hi;
                self.cpu.pc += 4;
            }
            Instruction::Mflo { rd } => {
                self.cpu.regs[rd] = self.cpu.lo;
                self.cpu.pc += 4;
            }
            Instruction::Jr { rs } => self.cpu.pc = self.cpu.regs[rs],
            Instruction::Syscall => return self.syscall(),
            Instruction::Teq { rs, rt } => {
                if self.cpu.regs[rs] == self.cpu.regs[rt] {
                    return Err(Exception::Signal.into());
                }
                self.cpu.pc += 4;
            }
            Instruction::Addiu { rt, rs, imm } => {
                self.cpu.regs[rt] = self.cpu.regs[rs].wrapping_add(imm.sign_extend());
                self.cpu.pc += 4;
            }
            Instruction::Lw { rt, rs, imm } => {
                let vaddr = self.cpu.regs[rs].wrapping_add(imm.sign_extend());
                self.cpu.regs[rt] = self.load_word(vaddr)?;
                self.cpu.pc += 4;
            }
            Instruction::Sw { rt, rs, imm } => {
                let vaddr = self.cpu.regs[rs].wrapping_add(imm.sign_extend());
                let value = self.cpu.regs[rt];
                self.store_word(vaddr, value)?;
                self.cpu.pc += 4;
            }
            Instruction::Beq { rs, rt, imm } => {
                self.cpu.pc += 4;
                if self.cpu.regs[rs] == self.cpu.regs[rt] {
                    self.cpu.pc = self.cpu.pc.wrapping_add(imm.sign_extend().wrapping_mul(4));
                }
            }
            Instruction::Bne { rs, rt, imm } => {
                self.cpu.pc += 4;
                if self.cpu.regs[rs] != self.cpu.regs[rt] {
                    self.cpu.pc = self.cpu.pc.wrapping_add(imm.sign_extend().wrapping_mul(4));
                }
            }
            Instruction::J { index } => self.cpu.pc = index as Word * 4,
            Instruction::Jal { index } => {
                self.cpu.regs[RegId::RA] = self.cpu.pc + 8;
                self.cpu.pc = index as Word * 4;
            }
        }

        Ok(StepState::Continue)
    }

    /// The live CPU context, for inspection.
    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }
}
