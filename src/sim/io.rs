//! The console behind the simulator's syscalls.
//!
//! Print syscalls (1, 4, 11, 34-36) send text to the console, and read syscalls (5, 8, 12)
//! pull bytes from it. A console is anything implementing [`SyscallIO`];
//! the simulator holds one in its [`SimIO`] slot:
//! - [`EmptyIO`]: no console. Prints are dropped and reads find no input.
//! - [`BufferedIO`]: in-memory input and output, shared with whoever cloned it.
//! - [`ChannelIO`]: input and output over crossbeam channels (see [`ChannelIO::stdio`]).
//! - [`CustomIO`]: any other [`SyscallIO`].
//!
//! Console traffic is not part of the undo history, so back-stepping over a print
//! does not take the text back.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam_channel as cbc;

/// A console that syscalls read from and print to.
pub trait SyscallIO {
    /// Reads one byte of input.
    ///
    /// This returns `None` if no more input is available.
    fn read_byte(&self) -> Option<u8>;

    /// Prints text to the console, returning whether it was accepted.
    fn print(&self, text: &[u8]) -> bool;

    /// Reads a line of input, without the trailing newline.
    ///
    /// This returns `None` if the input was exhausted before any byte was read.
    fn read_line(&self) -> Option<Vec<u8>> {
        let mut line = vec![];
        loop {
            match self.read_byte() {
                Some(b'\n') => return Some(line),
                Some(b) => line.push(b),
                None if line.is_empty() => return None,
                None => return Some(line),
            }
        }
    }
}

/// No console.
pub struct EmptyIO;
impl SyscallIO for EmptyIO {
    fn read_byte(&self) -> Option<u8> {
        None
    }

    fn print(&self, _text: &[u8]) -> bool {
        false
    }
}

#[derive(Default)]
struct Buffers {
    input: VecDeque<u8>,
    output: Vec<u8>,
}

/// A console whose input and output live in memory.
///
/// Clones share the same buffers, so a caller can keep one clone
/// to feed input and collect output while the simulator holds the other.
///
/// # Example
///
/// ```
/// use mips_ensemble::sim::io::{BufferedIO, SyscallIO};
///
/// let io = BufferedIO::with_input(b"hi\n");
/// assert_eq!(io.read_line(), Some(b"hi".to_vec()));
///
/// io.print(b"ok");
/// assert_eq!(io.output(), b"ok");
/// ```
#[derive(Clone, Default)]
pub struct BufferedIO(Arc<Mutex<Buffers>>);
impl BufferedIO {
    /// Creates a console with no pending input.
    pub fn new() -> Self {
        Default::default()
    }
    /// Creates a console with the given pending input.
    pub fn with_input(input: &[u8]) -> Self {
        let io = Self::new();
        io.push_input(input);
        io
    }

    // A panic while holding the lock leaves the buffers intact, so poisoning is ignored.
    fn buffers(&self) -> MutexGuard<'_, Buffers> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends bytes to the pending input.
    pub fn push_input(&self, input: &[u8]) {
        self.buffers().input.extend(input);
    }
    /// The number of input bytes not yet read.
    pub fn pending_input(&self) -> usize {
        self.buffers().input.len()
    }
    /// A copy of everything printed so far.
    pub fn output(&self) -> Vec<u8> {
        self.buffers().output.clone()
    }
    /// Takes everything printed so far, leaving the output empty.
    pub fn take_output(&self) -> Vec<u8> {
        std::mem::take(&mut self.buffers().output)
    }
}
impl SyscallIO for BufferedIO {
    fn read_byte(&self) -> Option<u8> {
        self.buffers().input.pop_front()
    }

    fn print(&self, text: &[u8]) -> bool {
        self.buffers().output.extend_from_slice(text);
        true
    }
}

/// A console backed by a pair of channels.
///
/// Reads block until a byte arrives on the input channel.
/// Once every input sender is dropped, input is exhausted.
/// Each print is sent as one message on the output channel.
pub struct ChannelIO {
    input: cbc::Receiver<u8>,
    output: cbc::Sender<Vec<u8>>,
}
impl ChannelIO {
    /// Creates a console from the receiving end of an input channel
    /// and the sending end of an output channel.
    pub fn new(input: cbc::Receiver<u8>, output: cbc::Sender<Vec<u8>>) -> Self {
        Self { input, output }
    }

    /// Creates a console attached to the process's stdin and stdout.
    ///
    /// One thread forwards stdin and another writes (and flushes) stdout.
    /// Terminals only deliver stdin once a line is entered.
    pub fn stdio() -> Self {
        use std::io::{Read, Write};

        let (in_tx, in_rx) = cbc::bounded(1);
        let (out_tx, out_rx) = cbc::unbounded::<Vec<u8>>();

        std::thread::spawn(move || {
            for byte in std::io::stdin().lock().bytes() {
                let Ok(byte) = byte else { return };
                if in_tx.send(byte).is_err() { return };
            }
        });
        std::thread::spawn(move || {
            let mut stdout = std::io::stdout();
            for text in out_rx {
                if stdout.write_all(&text).and_then(|()| stdout.flush()).is_err() { return };
            }
        });

        Self::new(in_rx, out_tx)
    }
}
impl SyscallIO for ChannelIO {
    fn read_byte(&self) -> Option<u8> {
        self.input.recv().ok()
    }

    fn print(&self, text: &[u8]) -> bool {
        self.output.send(text.to_vec()).is_ok()
    }
}

/// A boxed console of any other kind.
pub struct CustomIO(Box<dyn SyscallIO + Send + Sync>);
impl CustomIO {
    /// Wraps a console.
    pub fn new(console: impl SyscallIO + Send + Sync + 'static) -> Self {
        CustomIO(Box::new(console))
    }
}
impl SyscallIO for CustomIO {
    fn read_byte(&self) -> Option<u8> {
        self.0.read_byte()
    }

    fn print(&self, text: &[u8]) -> bool {
        self.0.print(text)
    }
}

/// The console slot of the simulator.
#[derive(Default)]
pub enum SimIO {
    /// See [`EmptyIO`].
    #[default]
    Empty,
    /// See [`BufferedIO`].
    Buffered(BufferedIO),
    /// See [`ChannelIO`].
    Channel(ChannelIO),
    /// See [`CustomIO`].
    Custom(CustomIO)
}
impl SimIO {
    fn console(&self) -> &dyn SyscallIO {
        match self {
            SimIO::Empty => &EmptyIO,
            SimIO::Buffered(io) => io,
            SimIO::Channel(io) => io,
            SimIO::Custom(io) => io,
        }
    }
}
impl SyscallIO for SimIO {
    fn read_byte(&self) -> Option<u8> {
        self.console().read_byte()
    }

    fn print(&self, text: &[u8]) -> bool {
        self.console().print(text)
    }
}
impl std::fmt::Debug for SimIO {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            SimIO::Empty => "Empty",
            SimIO::Buffered(_) => "Buffered",
            SimIO::Channel(_) => "Channel",
            SimIO::Custom(_) => "Custom",
        };
        write!(f, "SimIO::{kind}")
    }
}
impl From<EmptyIO> for SimIO {
    fn from(_: EmptyIO) -> Self {
        SimIO::Empty
    }
}
impl From<BufferedIO> for SimIO {
    fn from(io: BufferedIO) -> Self {
        SimIO::Buffered(io)
    }
}
impl From<ChannelIO> for SimIO {
    fn from(io: ChannelIO) -> Self {
        SimIO::Channel(io)
    }
}
impl From<CustomIO> for SimIO {
    fn from(io: CustomIO) -> Self {
        SimIO::Custom(io)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{BufferedIO, ChannelIO, CustomIO, SimIO, SyscallIO};

    #[test]
    fn test_read_line() {
        let io = SimIO::from(BufferedIO::with_input(b"12\nabc"));

        assert_eq!(io.read_line(), Some(b"12".to_vec()));
        assert_eq!(io.read_line(), Some(b"abc".to_vec()));
        assert_eq!(io.read_line(), None);
    }

    #[test]
    fn test_buffered_shared() {
        let io = BufferedIO::new();
        let console = SimIO::from(io.clone());

        io.push_input(b"q");
        assert_eq!(io.pending_input(), 1);
        assert_eq!(console.read_byte(), Some(b'q'));
        assert_eq!(io.pending_input(), 0);

        assert!(console.print(b"out"));
        assert_eq!(io.take_output(), b"out");
        assert_eq!(io.output(), b"");
    }

    #[test]
    fn test_channel() {
        let (in_tx, in_rx) = crossbeam_channel::unbounded();
        let (out_tx, out_rx) = crossbeam_channel::unbounded();
        let io = SimIO::from(CustomIO::new(ChannelIO::new(in_rx, out_tx)));

        in_tx.send(b'x').unwrap();
        drop(in_tx);
        assert_eq!(io.read_byte(), Some(b'x'));
        assert_eq!(io.read_byte(), None);

        assert!(io.print(b"yz"));
        drop(io);
        assert_eq!(out_rx.iter().collect::<Vec<_>>(), [b"yz".to_vec()]);
    }

    #[test]
    fn test_empty() {
        let io = SimIO::default();
        assert_eq!(io.read_line(), None);
        assert!(!io.print(b"lost"));
        assert_eq!(format!("{io:?}"), "SimIO::Empty");
    }
}
