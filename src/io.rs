//! Byte-oriented IO behind the VM's keyboard and display traps.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// Capability set the VM needs from its host console.
pub trait IoProvider {
    /// Block until an input character is available.
    fn get_char(&mut self) -> u8;
    /// Non-blocking probe, used when the keyboard status register is read.
    fn poll_char(&mut self) -> Option<u8>;
    /// Emit one program output byte.
    fn put_char(&mut self, byte: u8);
    /// Emit a service string (prompts, the HALT banner).
    fn print(&mut self, text: &str);
}

/// Scripted IO: a fixed input queue and a captured output buffer, for
/// deterministic testing.
pub struct BufIo {
    input: VecDeque<u8>,
    output: Rc<RefCell<Vec<u8>>>,
}

impl BufIo {
    pub fn new(input: &[u8]) -> Self {
        BufIo {
            input: input.iter().copied().collect(),
            output: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Handle onto the captured output; stays valid after the VM is dropped.
    pub fn output(&self) -> Rc<RefCell<Vec<u8>>> {
        Rc::clone(&self.output)
    }
}

impl IoProvider for BufIo {
    fn get_char(&mut self) -> u8 {
        // An exhausted script reads as NUL rather than blocking forever
        self.input.pop_front().unwrap_or(0)
    }

    fn poll_char(&mut self) -> Option<u8> {
        self.input.pop_front()
    }

    fn put_char(&mut self, byte: u8) {
        self.output.borrow_mut().push(byte);
    }

    fn print(&mut self, text: &str) {
        self.output.borrow_mut().extend_from_slice(text.as_bytes());
    }
}
