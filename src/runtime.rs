use std::cmp::Ordering;

use miette::{bail, Result, Severity};

use crate::io::IoProvider;

/// LC3 can address 65536 words of memory.
const MEMORY_MAX: usize = 0x10000;
/// Keyboard status register; bit 15 signals an available character.
pub const KBSR: u16 = 0xFE00;
/// Keyboard data register, low 8 bits meaningful.
pub const KBDR: u16 = 0xFE02;
/// Start of device address space. Program images must end below it.
const DEVICE_SPACE: u16 = 0xFE00;

/// Represents complete program state during runtime.
pub struct RunState {
    mem: [u16; MEMORY_MAX],
    /// Program counter
    pc: u16,
    /// 8x 16-bit registers
    reg: [u16; 8],
    /// Condition code
    flag: RunFlag,
    /// Single buffered keyboard byte, so that a status poll cannot lose
    /// input the program has not consumed yet.
    pending: Option<u8>,
    halted: bool,
    io: Box<dyn IoProvider>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum RunFlag {
    N = 0b100,
    Z = 0b010,
    P = 0b001,
}

impl RunState {
    /// Place a program image at its origin and point the machine at it.
    pub fn load(orig: u16, words: &[u16], io: Box<dyn IoProvider>) -> Result<RunState> {
        let start = orig as usize;
        let end = start + words.len();
        if end > DEVICE_SPACE as usize {
            bail!(
                severity = Severity::Error,
                code = "load::overflow",
                help = "programs must sit below the device registers at 0xFE00",
                "Image of {} words at origin 0x{orig:04X} runs into device address space",
                words.len(),
            );
        }
        let mut mem = [0u16; MEMORY_MAX];
        mem[start..end].copy_from_slice(words);
        Ok(RunState {
            mem,
            pc: orig,
            reg: [0; 8],
            flag: RunFlag::Z,
            pending: None,
            halted: false,
            io,
        })
    }

    /// Build state straight from an assembled image, origin header first.
    pub fn from_image(image: &[u16], io: Box<dyn IoProvider>) -> Result<RunState> {
        let Some((&orig, words)) = image.split_first() else {
            bail!(
                severity = Severity::Error,
                code = "load::empty",
                "Cannot load an image with no origin header",
            );
        };
        Self::load(orig, words, io)
    }

    const OP_TABLE: [fn(&mut RunState, u16) -> Result<()>; 16] = [
        Self::br,   // 0x0
        Self::add,  // 0x1
        Self::ld,   // 0x2
        Self::st,   // 0x3
        Self::jsr,  // 0x4
        Self::and,  // 0x5
        Self::ldr,  // 0x6
        Self::str,  // 0x7
        Self::rti,  // 0x8
        Self::not,  // 0x9
        Self::ldi,  // 0xA
        Self::sti,  // 0xB
        Self::jmp,  // 0xC
        Self::res,  // 0xD
        Self::lea,  // 0xE
        Self::trap, // 0xF
    ];

    /// Fetch-decode-execute until HALT.
    pub fn run(&mut self) -> Result<()> {
        while !self.halted {
            let instr = self.mem_read(self.pc);
            let opcode = (instr >> 12) as usize;
            // PC is incremented before the instruction executes
            self.pc = self.pc.wrapping_add(1);
            Self::OP_TABLE[opcode](self, instr)?;
        }
        Ok(())
    }

    #[inline]
    fn reg(&mut self, reg: u16) -> &mut u16 {
        // Mask keeps any encodable field in bounds
        &mut self.reg[(reg & 0b111) as usize]
    }

    /// Memory read with the keyboard registers serviced on access.
    fn mem_read(&mut self, addr: u16) -> u16 {
        match addr {
            KBSR => {
                if self.pending.is_none() {
                    self.pending = self.io.poll_char();
                }
                match self.pending {
                    Some(byte) => {
                        self.mem[KBSR as usize] = 1 << 15;
                        self.mem[KBDR as usize] = byte as u16;
                    }
                    None => self.mem[KBSR as usize] = 0,
                }
            }
            KBDR => {
                // Reading the data register consumes the buffered byte
                if self.pending.take().is_some() {
                    self.mem[KBSR as usize] = 0;
                }
            }
            _ => (),
        }
        self.mem[addr as usize]
    }

    fn mem_write(&mut self, addr: u16, val: u16) {
        self.mem[addr as usize] = val;
    }

    /// Next input byte, preferring one already captured by a status poll.
    fn take_char(&mut self) -> u8 {
        match self.pending.take() {
            Some(byte) => {
                self.mem[KBSR as usize] = 0;
                byte
            }
            None => self.io.get_char(),
        }
    }

    #[inline]
    fn s_ext(val: u16, bits: u32) -> u16 {
        let mask = ((1u32 << bits) - 1) as u16;
        let val = val & mask;
        if val & (1 << (bits - 1)) == 0 {
            // positive
            val
        } else {
            // negative
            val | !mask
        }
    }

    #[inline]
    fn set_flags(&mut self, val: u16) {
        self.flag = match (val as i16).cmp(&0) {
            Ordering::Less => RunFlag::N,
            Ordering::Equal => RunFlag::Z,
            Ordering::Greater => RunFlag::P,
        }
    }

    fn add(&mut self, instr: u16) -> Result<()> {
        let dr = (instr >> 9) & 0b111;
        let sr1 = (instr >> 6) & 0b111;
        let val1 = *self.reg(sr1);
        // Bit 5 selects the immediate mode
        let val2 = if instr & 0b100000 == 0 {
            *self.reg(instr & 0b111)
        } else {
            Self::s_ext(instr, 5)
        };
        let res = val1.wrapping_add(val2);
        *self.reg(dr) = res;
        self.set_flags(res);
        Ok(())
    }

    fn and(&mut self, instr: u16) -> Result<()> {
        let dr = (instr >> 9) & 0b111;
        let sr1 = (instr >> 6) & 0b111;
        let val1 = *self.reg(sr1);
        let val2 = if instr & 0b100000 == 0 {
            *self.reg(instr & 0b111)
        } else {
            Self::s_ext(instr, 5)
        };
        let res = val1 & val2;
        *self.reg(dr) = res;
        self.set_flags(res);
        Ok(())
    }

    fn not(&mut self, instr: u16) -> Result<()> {
        let dr = (instr >> 9) & 0b111;
        let sr = (instr >> 6) & 0b111;
        let val = !*self.reg(sr);
        *self.reg(dr) = val;
        self.set_flags(val);
        Ok(())
    }

    fn br(&mut self, instr: u16) -> Result<()> {
        let flag = (instr >> 9) & 0b111;
        if self.flag as u16 & flag != 0 {
            self.pc = self.pc.wrapping_add(Self::s_ext(instr, 9));
        }
        Ok(())
    }

    fn jmp(&mut self, instr: u16) -> Result<()> {
        let base = (instr >> 6) & 0b111;
        self.pc = *self.reg(base);
        Ok(())
    }

    fn jsr(&mut self, instr: u16) -> Result<()> {
        *self.reg(7) = self.pc;
        if instr & 0x800 == 0 {
            let base = (instr >> 6) & 0b111;
            self.pc = *self.reg(base);
        } else {
            self.pc = self.pc.wrapping_add(Self::s_ext(instr, 11));
        }
        Ok(())
    }

    fn ld(&mut self, instr: u16) -> Result<()> {
        let dr = (instr >> 9) & 0b111;
        let val = self.mem_read(self.pc.wrapping_add(Self::s_ext(instr, 9)));
        *self.reg(dr) = val;
        self.set_flags(val);
        Ok(())
    }

    fn ldi(&mut self, instr: u16) -> Result<()> {
        let dr = (instr >> 9) & 0b111;
        let ptr = self.mem_read(self.pc.wrapping_add(Self::s_ext(instr, 9)));
        let val = self.mem_read(ptr);
        *self.reg(dr) = val;
        self.set_flags(val);
        Ok(())
    }

    fn ldr(&mut self, instr: u16) -> Result<()> {
        let dr = (instr >> 9) & 0b111;
        let base = (instr >> 6) & 0b111;
        let ptr = *self.reg(base);
        let val = self.mem_read(ptr.wrapping_add(Self::s_ext(instr, 6)));
        *self.reg(dr) = val;
        self.set_flags(val);
        Ok(())
    }

    fn lea(&mut self, instr: u16) -> Result<()> {
        let dr = (instr >> 9) & 0b111;
        let val = self.pc.wrapping_add(Self::s_ext(instr, 9));
        *self.reg(dr) = val;
        self.set_flags(val);
        Ok(())
    }

    fn st(&mut self, instr: u16) -> Result<()> {
        let sr = (instr >> 9) & 0b111;
        let val = *self.reg(sr);
        self.mem_write(self.pc.wrapping_add(Self::s_ext(instr, 9)), val);
        Ok(())
    }

    fn sti(&mut self, instr: u16) -> Result<()> {
        let sr = (instr >> 9) & 0b111;
        let val = *self.reg(sr);
        let ptr = self.mem_read(self.pc.wrapping_add(Self::s_ext(instr, 9)));
        self.mem_write(ptr, val);
        Ok(())
    }

    fn str(&mut self, instr: u16) -> Result<()> {
        let sr = (instr >> 9) & 0b111;
        let base = (instr >> 6) & 0b111;
        let ptr = *self.reg(base);
        let val = *self.reg(sr);
        self.mem_write(ptr.wrapping_add(Self::s_ext(instr, 6)), val);
        Ok(())
    }

    fn rti(&mut self, _instr: u16) -> Result<()> {
        bail!(
            severity = Severity::Error,
            code = "run::unused_opcode",
            help = "supervisor mode is not implemented; RTI cannot be executed",
            "Unused op code 0x8 (RTI) at 0x{:04X}",
            self.pc.wrapping_sub(1),
        )
    }

    fn res(&mut self, _instr: u16) -> Result<()> {
        bail!(
            severity = Severity::Error,
            code = "run::unused_opcode",
            help = "0xD is reserved by the architecture; the image may be corrupt",
            "Unused op code 0xD (reserved) at 0x{:04X}",
            self.pc.wrapping_sub(1),
        )
    }

    fn trap(&mut self, instr: u16) -> Result<()> {
        // Service routines return through R7
        *self.reg(7) = self.pc;
        match instr & 0xFF {
            // getc
            0x20 => {
                let byte = self.take_char();
                *self.reg(0) = byte as u16;
                self.set_flags(byte as u16);
            }
            // out
            0x21 => {
                let byte = (*self.reg(0) & 0xFF) as u8;
                self.io.put_char(byte);
            }
            // puts
            0x22 => {
                let mut addr = *self.reg(0);
                loop {
                    let word = self.mem_read(addr);
                    if word == 0 {
                        break;
                    }
                    self.io.put_char((word & 0xFF) as u8);
                    addr = addr.wrapping_add(1);
                }
            }
            // in
            0x23 => {
                self.io.print("Enter a character: ");
                let byte = self.take_char();
                self.io.put_char(byte);
                *self.reg(0) = byte as u16;
                self.set_flags(byte as u16);
            }
            // putsp: two packed bytes per word, low byte first
            0x24 => {
                let mut addr = *self.reg(0);
                loop {
                    let word = self.mem_read(addr);
                    if word == 0 {
                        break;
                    }
                    self.io.put_char((word & 0xFF) as u8);
                    let high = (word >> 8) as u8;
                    if high != 0 {
                        self.io.put_char(high);
                    }
                    addr = addr.wrapping_add(1);
                }
            }
            // halt
            0x25 => {
                self.io.print("HALT\n");
                self.halted = true;
            }
            vect => bail!(
                severity = Severity::Error,
                code = "run::bad_trap",
                help = "service routines live at vectors 0x20 through 0x25",
                "Called a trap with unknown vector 0x{vect:02X}",
            ),
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::assemble;
    use crate::io::BufIo;

    /// Assemble, run to halt, and hand back state plus captured output.
    fn run_to_halt(src: &'static str, input: &[u8]) -> (RunState, String) {
        let io = BufIo::new(input);
        let out = io.output();
        let image = assemble(src).unwrap();
        let mut state = RunState::from_image(&image, Box::new(io)).unwrap();
        state.run().unwrap();
        let text = String::from_utf8(out.borrow().clone()).unwrap();
        (state, text)
    }

    #[test]
    fn sign_extend_vectors() {
        assert_eq!(RunState::s_ext(0b11111, 5), 0xFFFF);
        assert_eq!(RunState::s_ext(0b01111, 5), 0x000F);
        assert_eq!(RunState::s_ext(0b11111, 6), 0x001F);
    }

    #[test]
    fn sign_extend_idempotent() {
        for val in [0u16, 1, 0b11111, 0b01111, 0x1FF, 0x0FF] {
            for bits in [5u32, 6, 9, 11] {
                let once = RunState::s_ext(val, bits);
                assert_eq!(RunState::s_ext(once, 16), once);
            }
        }
    }

    #[test]
    fn halt_prints_banner() {
        let (state, out) = run_to_halt(".orig x3000\nhalt\n.end", b"");
        assert!(state.halted);
        assert_eq!(out, "HALT\n");
    }

    #[test]
    fn hello_program_output() {
        let (_, out) = run_to_halt(
            ".orig x3000\nlea r0, hello\nputs\nhalt\nhello .stringz \"Hi\"\n.end",
            b"",
        );
        assert_eq!(out, "HiHALT\n");
    }

    #[test]
    fn add_wraps_and_sets_negative() {
        let (state, _) = run_to_halt(".orig x3000\nadd r0 r0 #-1\nhalt\n.end", b"");
        assert_eq!(state.reg[0], 0xFFFF);
        assert_eq!(state.flag, RunFlag::N);
    }

    #[test]
    fn flags_track_last_write() {
        let (state, _) = run_to_halt(
            ".orig x3000\nand r1 r1 #0\nadd r1 r1 #5\nhalt\n.end",
            b"",
        );
        assert_eq!(state.reg[1], 5);
        assert_eq!(state.flag, RunFlag::P);
    }

    #[test]
    fn brz_taken_on_zero() {
        let (state, _) = run_to_halt(
            ".orig x3000\nand r0 r0 #0\nbrz skip\nadd r0 r0 #1\nskip halt\n.end",
            b"",
        );
        // Branch skipped the increment
        assert_eq!(state.reg[0], 0);
    }

    #[test]
    fn brz_not_taken_on_positive() {
        let (state, _) = run_to_halt(
            ".orig x3000\nand r0 r0 #0\nadd r0 r0 #2\nbrz skip\nadd r0 r0 #1\nskip halt\n.end",
            b"",
        );
        assert_eq!(state.reg[0], 3);
    }

    #[test]
    fn countdown_loop() {
        let (state, _) = run_to_halt(
            ".orig x3000\nand r2 r2 #0\nadd r2 r2 #10\nloop add r2 r2 #-1\nbrp loop\nhalt\n.end",
            b"",
        );
        assert_eq!(state.reg[2], 0);
        assert_eq!(state.flag, RunFlag::Z);
    }

    #[test]
    fn jsr_ret_roundtrip() {
        let (state, _) = run_to_halt(
            ".orig x3000\njsr sub\nhalt\nsub and r3 r3 #0\nadd r3 r3 #7\nret\n.end",
            b"",
        );
        assert_eq!(state.reg[3], 7);
        // R7 held the return address
        assert_eq!(state.reg[7], 0x3001);
    }

    #[test]
    fn load_store_roundtrip() {
        let (state, _) = run_to_halt(
            ".orig x3000\nld r1 val\nadd r1 r1 #1\nst r1 val\nld r2 val\nhalt\nval .fill #41\n.end",
            b"",
        );
        assert_eq!(state.reg[2], 42);
    }

    #[test]
    fn indirect_load_store() {
        let (state, _) = run_to_halt(
            ".orig x3000\nldi r1 ptr\nsti r1 ptr2\nld r2 slot\nhalt\n\
             ptr .fill val\nptr2 .fill slot\nval .fill #9\nslot .fill #0\n.end",
            b"",
        );
        assert_eq!(state.reg[1], 9);
        assert_eq!(state.reg[2], 9);
    }

    #[test]
    fn register_offset_load_store() {
        let (state, _) = run_to_halt(
            ".orig x3000\nlea r0 base\nldr r1 r0 #1\nstr r1 r0 #0\nldr r2 r0 #0\nhalt\n\
             base .fill #0\n.fill #13\n.end",
            b"",
        );
        assert_eq!(state.reg[1], 13);
        assert_eq!(state.reg[2], 13);
    }

    #[test]
    fn getc_reads_and_out_echoes() {
        let (state, out) = run_to_halt(".orig x3000\ngetc\nout\nhalt\n.end", b"A");
        assert_eq!(state.reg[0], b'A' as u16);
        assert_eq!(state.flag, RunFlag::P);
        assert_eq!(out, "AHALT\n");
    }

    #[test]
    fn trap_in_prompts_and_echoes() {
        let (state, out) = run_to_halt(".orig x3000\nin\nhalt\n.end", b"x");
        assert_eq!(state.reg[0], b'x' as u16);
        assert_eq!(out, "Enter a character: xHALT\n");
    }

    #[test]
    fn putsp_unpacks_byte_pairs() {
        // 0x6948 holds "Hi" low byte first; 0x0021 holds a bare "!"
        let (_, out) = run_to_halt(
            ".orig x3000\nlea r0 data\nputsp\nhalt\n\
             data .fill x6948\n.fill x21\nterm .fill #0\n.end",
            b"",
        );
        assert_eq!(out, "Hi!HALT\n");
    }

    #[test]
    fn kbsr_poll_sequence() {
        let io = BufIo::new(b"Z");
        let image = assemble(".orig x3000\nhalt\n.end").unwrap();
        let mut state = RunState::from_image(&image, Box::new(io)).unwrap();

        assert_eq!(state.mem_read(KBSR), 1 << 15);
        assert_eq!(state.mem_read(KBDR), b'Z' as u16);
        // Data read consumed the byte
        assert_eq!(state.mem_read(KBSR), 0);
    }

    #[test]
    fn kbsr_poll_without_input() {
        let io = BufIo::new(b"");
        let image = assemble(".orig x3000\nhalt\n.end").unwrap();
        let mut state = RunState::from_image(&image, Box::new(io)).unwrap();
        assert_eq!(state.mem_read(KBSR), 0);
    }

    #[test]
    fn polled_byte_feeds_getc() {
        let io = BufIo::new(b"Q");
        let image = assemble(".orig x3000\nhalt\n.end").unwrap();
        let mut state = RunState::from_image(&image, Box::new(io)).unwrap();
        // Poll buffers the byte, GETC must not lose it
        assert_eq!(state.mem_read(KBSR), 1 << 15);
        assert_eq!(state.take_char(), b'Q');
        assert_eq!(state.mem_read(KBSR), 0);
    }

    #[test]
    fn rti_is_fatal() {
        let io = BufIo::new(b"");
        let image = assemble(".orig x3000\nrti\n.end").unwrap();
        let mut state = RunState::from_image(&image, Box::new(io)).unwrap();
        assert!(state.run().is_err());
    }

    #[test]
    fn reserved_opcode_is_fatal() {
        let io = BufIo::new(b"");
        let image = assemble(".orig x3000\nbad .fill xD000\n.end").unwrap();
        let mut state = RunState::from_image(&image, Box::new(io)).unwrap();
        assert!(state.run().is_err());
    }

    #[test]
    fn unknown_trap_vector_is_fatal() {
        let io = BufIo::new(b"");
        let image = assemble(".orig x3000\ntrap x4F\n.end").unwrap();
        let mut state = RunState::from_image(&image, Box::new(io)).unwrap();
        assert!(state.run().is_err());
    }

    #[test]
    fn load_honors_origin() {
        let io = BufIo::new(b"");
        let image = assemble(".orig x4000\nhalt\n.end").unwrap();
        let state = RunState::from_image(&image, Box::new(io)).unwrap();
        assert_eq!(state.pc, 0x4000);
        assert_eq!(state.mem[0x4000], 0xF025);
    }

    #[test]
    fn load_rejects_device_space_overlap() {
        let io = BufIo::new(b"");
        assert!(RunState::load(0xFDFF, &[0, 0], Box::new(io)).is_err());
    }
}
