use std::cell::RefCell;
use std::str::FromStr;

use fxhash::FxHashMap;

thread_local! {
    /// Label -> absolute address, built by the first pass and read-only in
    /// the second.
    pub static SYMBOL_TABLE: RefCell<FxHashMap<String, u16>> = RefCell::new(FxHashMap::default());
}

/// Clear the symbol table before assembling a new file.
pub fn reset_state() {
    with_symbol_table(|sym| sym.clear());
}

/// Access to symbol table via closure
pub fn with_symbol_table<R, F>(f: F) -> R
where
    F: FnOnce(&mut FxHashMap<String, u16>) -> R,
{
    SYMBOL_TABLE.with_borrow_mut(f)
}

/// Record a label at an address. Returns `false` if the label already exists.
pub fn insert(label: &str, addr: u16) -> bool {
    with_symbol_table(|sym| sym.insert(label.to_string(), addr).is_none())
}

/// Address of a previously recorded label.
pub fn lookup(label: &str) -> Option<u16> {
    with_symbol_table(|sym| sym.get(label).copied())
}

/// Represents the CPU registers.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum Register {
    R0 = 0,
    R1,
    R2,
    R3,
    R4,
    R5,
    R6,
    /// Holds the return address for JSR/JSRR and TRAP.
    R7,
}

impl FromStr for Register {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "0" => Ok(Register::R0),
            "1" => Ok(Register::R1),
            "2" => Ok(Register::R2),
            "3" => Ok(Register::R3),
            "4" => Ok(Register::R4),
            "5" => Ok(Register::R5),
            "6" => Ok(Register::R6),
            "7" => Ok(Register::R7),
            _ => Err(()),
        }
    }
}

/// Condition codes tested by BR, encoded as the instruction's nzp field.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Flag {
    /// -
    N,
    /// 0
    Z,
    /// +
    P,
    /// <= 0
    Nz,
    /// >= 0
    Zp,
    /// != 0
    Np,
    /// Unconditional
    Nzp,
}

impl Flag {
    pub fn bits(&self) -> u16 {
        match self {
            Flag::N => 0b100,
            Flag::Z => 0b010,
            Flag::P => 0b001,
            Flag::Nz => 0b110,
            Flag::Zp => 0b011,
            Flag::Np => 0b101,
            Flag::Nzp => 0b111,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum InstrKind {
    Add,
    And,
    Br(Flag),
    Jmp,
    Jsr,
    Jsrr,
    Ld,
    Ldi,
    Ldr,
    Lea,
    Not,
    Ret,
    Rti,
    St,
    Sti,
    Str,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TrapKind {
    /// `trap x??` with an explicit vector
    Trap,
    Getc,
    Out,
    Puts,
    In,
    Putsp,
    Halt,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DirKind {
    Orig,
    Fill,
    Stringz,
    Blkw,
    End,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn table_insert_and_lookup() {
        reset_state();
        assert!(insert("loop", 0x3001));
        assert_eq!(lookup("loop"), Some(0x3001));
        assert_eq!(lookup("missing"), None);
    }

    #[test]
    fn table_rejects_duplicates() {
        reset_state();
        assert!(insert("again", 0x3000));
        assert!(!insert("again", 0x3005));
        // First definition wins
        assert_eq!(lookup("again"), Some(0x3000));
    }
}
