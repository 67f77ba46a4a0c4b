//! Three virtual terminals sharing one screen and one keyboard.
//!
//! Each terminal owns its cursor, its pending input line and the head of its
//! process chain. Only the visible terminal renders to the live video page;
//! the others render into their backing pages and are swapped in on Alt+Fn.

use core::fmt;

use crate::config::{LINE_BUFFER_SIZE, MAX_LINE_CHARS, NUM_TERMINALS, VIDEO_PHYS};
use crate::drivers::keyboard::KeyEvent;
use crate::drivers::vga::{self, Console, Cursor, VideoPage};
use crate::memory::paging::backing_frame;
use crate::process::ProcessId;

const TAB_WIDTH: usize = 4;
/// Room for one full queued line plus the one being typed.
const INPUT_QUEUE_SIZE: usize = 2 * LINE_BUFFER_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TerminalId(u8);

impl TerminalId {
    pub const FIRST: TerminalId = TerminalId(0);

    pub fn new(index: usize) -> Option<Self> {
        (index < NUM_TERMINALS).then(|| TerminalId(index as u8))
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn all() -> impl Iterator<Item = TerminalId> {
        (0..NUM_TERMINALS as u8).map(TerminalId)
    }

    /// The terminal after this one, wrapping around.
    pub fn next(self) -> TerminalId {
        TerminalId((self.0 + 1) % NUM_TERMINALS as u8)
    }
}

impl fmt::Display for TerminalId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "tty{}", self.0)
    }
}

/// Keyboard input for one terminal. Completed lines queue up in front of the
/// line being typed until a reader takes them.
#[derive(Clone, Copy)]
pub struct LineBuffer {
    bytes: [u8; INPUT_QUEUE_SIZE],
    len: usize,
    /// Start of the line being typed; everything before it is completed lines.
    line_start: usize,
}

impl LineBuffer {
    pub const EMPTY: LineBuffer = LineBuffer { bytes: [0; INPUT_QUEUE_SIZE], len: 0, line_start: 0 };

    /// Refused once the line being typed holds 127 characters, or when only
    /// the room for its newline is left.
    pub fn push(&mut self, byte: u8) -> bool {
        if self.is_full() || self.len + 1 >= INPUT_QUEUE_SIZE {
            return false;
        }
        self.bytes[self.len] = byte;
        self.len += 1;
        true
    }

    /// Completed lines are out of reach.
    pub fn pop(&mut self) -> bool {
        if self.len == self.line_start {
            return false;
        }
        self.len -= 1;
        true
    }

    /// Appends the newline and queues the line for the next reader.
    pub fn finish(&mut self) -> bool {
        if self.len >= INPUT_QUEUE_SIZE {
            return false;
        }
        self.bytes[self.len] = b'\n';
        self.len += 1;
        self.line_start = self.len;
        true
    }

    pub fn has_line(&self) -> bool {
        self.line_start > 0
    }

    pub fn is_full(&self) -> bool {
        self.len - self.line_start >= MAX_LINE_CHARS
    }

    /// The line being typed.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[self.line_start..self.len]
    }

    /// Copies out the oldest completed line, newline included. Bytes that do
    /// not fit in `buf` are dropped.
    pub fn take(&mut self, buf: &mut [u8]) -> Option<usize> {
        let end = self.bytes[..self.line_start].iter().position(|&b| b == b'\n')? + 1;
        let n = end.min(buf.len());
        buf[..n].copy_from_slice(&self.bytes[..n]);
        self.bytes.copy_within(end..self.len, 0);
        self.len -= end;
        self.line_start -= end;
        Some(n)
    }
}

#[derive(Clone, Copy)]
pub struct Terminal {
    pub cursor: Cursor,
    pub line: LineBuffer,
    /// Innermost process of this terminal's chain; the only one that runs.
    pub foreground: Option<ProcessId>,
    pub process_count: usize,
    /// Set once a shell has been started here.
    pub launched: bool,
}

impl Terminal {
    const fn new() -> Self {
        Terminal {
            cursor: Cursor { row: 0, col: 0 },
            line: LineBuffer::EMPTY,
            foreground: None,
            process_count: 0,
            launched: false,
        }
    }
}

pub struct Multiplexer {
    terminals: [Terminal; NUM_TERMINALS],
    visible: TerminalId,
}

impl Multiplexer {
    pub const fn new() -> Self {
        Multiplexer { terminals: [Terminal::new(); NUM_TERMINALS], visible: TerminalId::FIRST }
    }

    pub fn visible(&self) -> TerminalId {
        self.visible
    }

    pub fn get(&self, id: TerminalId) -> &Terminal {
        &self.terminals[id.index()]
    }

    pub fn get_mut(&mut self, id: TerminalId) -> &mut Terminal {
        &mut self.terminals[id.index()]
    }

    pub fn page_of(&self, id: TerminalId) -> VideoPage {
        if id == self.visible {
            VideoPage::Live
        } else {
            VideoPage::Backing(id)
        }
    }

    /// Physical page a program on `id` sees through its video mapping.
    pub fn video_frame(&self, id: TerminalId) -> u32 {
        if id == self.visible {
            VIDEO_PHYS
        } else {
            backing_frame(id.index())
        }
    }

    pub fn clear_all<C: Console + ?Sized>(&mut self, con: &mut C) {
        for id in TerminalId::all() {
            vga::clear(con, VideoPage::Backing(id));
            self.get_mut(id).cursor = Cursor::default();
        }
        vga::clear(con, VideoPage::Live);
        con.set_cursor(Cursor::default());
    }

    /// Renders on `id`'s own screen, visible or not.
    pub fn write<C: Console + ?Sized>(&mut self, con: &mut C, id: TerminalId, bytes: &[u8]) {
        let page = self.page_of(id);
        let term = &mut self.terminals[id.index()];
        vga::write_bytes(con, page, &mut term.cursor, bytes);
        if id == self.visible {
            con.set_cursor(term.cursor);
        }
    }

    /// Applies a keystroke to the visible terminal. Returns the requested
    /// terminal for Alt+Fn, which the caller switches to.
    pub fn handle_key<C: Console + ?Sized>(&mut self, con: &mut C, event: KeyEvent) -> Option<TerminalId> {
        let id = self.visible;
        match event {
            KeyEvent::SwitchTerminal(target) => return Some(target),
            KeyEvent::Char(byte) => self.type_byte(con, byte),
            KeyEvent::Tab => {
                for _ in 0..TAB_WIDTH {
                    self.type_byte(con, b' ');
                }
            }
            KeyEvent::Backspace => {
                let term = &mut self.terminals[id.index()];
                if term.line.pop() {
                    vga::backspace(con, VideoPage::Live, &mut term.cursor);
                    con.set_cursor(term.cursor);
                }
            }
            KeyEvent::Enter => {
                if self.get_mut(id).line.finish() {
                    self.write(con, id, b"\n");
                }
            }
            KeyEvent::ClearScreen => {
                vga::clear(con, VideoPage::Live);
                let term = &mut self.terminals[id.index()];
                term.cursor = Cursor::default();
                con.set_cursor(term.cursor);
            }
        }
        None
    }

    fn type_byte<C: Console + ?Sized>(&mut self, con: &mut C, byte: u8) {
        let id = self.visible;
        if !self.get_mut(id).line.push(byte) {
            return;
        }
        self.write(con, id, &[byte]);
        if self.get(id).line.is_full() && self.get_mut(id).line.finish() {
            self.write(con, id, b"\n");
        }
    }

    pub fn take_line(&mut self, id: TerminalId, buf: &mut [u8]) -> Option<usize> {
        self.get_mut(id).line.take(buf)
    }

    /// Parks the visible screen in its backing page and brings `target`'s
    /// onto the live page. False if `target` is already visible.
    pub fn show<C: Console + ?Sized>(&mut self, con: &mut C, target: TerminalId) -> bool {
        if target == self.visible {
            return false;
        }
        vga::copy_page(con, VideoPage::Live, VideoPage::Backing(self.visible));
        vga::copy_page(con, VideoPage::Backing(target), VideoPage::Live);
        self.visible = target;
        con.set_cursor(self.get(target).cursor);
        true
    }

    /// First terminal after `from`, in rotation order, with a foreground process.
    pub fn next_live_after(&self, from: TerminalId) -> Option<TerminalId> {
        let mut id = from.next();
        while id != from {
            if self.get(id).foreground.is_some() {
                return Some(id);
            }
            id = id.next();
        }
        None
    }
}

impl Default for Multiplexer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockHardware;

    fn t(n: usize) -> TerminalId {
        TerminalId::new(n).unwrap()
    }

    fn type_str(mux: &mut Multiplexer, hw: &mut MockHardware, s: &[u8]) {
        for &b in s {
            mux.handle_key(hw, KeyEvent::Char(b));
        }
    }

    #[test]
    fn line_completes_on_enter() {
        let mut hw = MockHardware::new();
        let mut mux = Multiplexer::new();
        type_str(&mut mux, &mut hw, b"lsx");
        mux.handle_key(&mut hw, KeyEvent::Backspace);
        let mut buf = [0u8; 16];
        assert_eq!(mux.take_line(t(0), &mut buf), None);
        mux.handle_key(&mut hw, KeyEvent::Enter);
        assert_eq!(mux.take_line(t(0), &mut buf), Some(3));
        assert_eq!(&buf[..3], b"ls\n");
        assert_eq!(mux.take_line(t(0), &mut buf), None);
        assert_eq!(hw.cell(VideoPage::Live, 0).ascii, b'l');
        assert_eq!(hw.cell(VideoPage::Live, 2).ascii, b' ');
    }

    #[test]
    fn lines_typed_ahead_wait_their_turn() {
        let mut hw = MockHardware::new();
        let mut mux = Multiplexer::new();
        type_str(&mut mux, &mut hw, b"ls");
        mux.handle_key(&mut hw, KeyEvent::Enter);
        type_str(&mut mux, &mut hw, b"cat");
        mux.handle_key(&mut hw, KeyEvent::Enter);
        type_str(&mut mux, &mut hw, b"ec");
        mux.handle_key(&mut hw, KeyEvent::Backspace);
        mux.handle_key(&mut hw, KeyEvent::Backspace);
        mux.handle_key(&mut hw, KeyEvent::Backspace);
        assert_eq!(hw.cell(VideoPage::Live, 80).ascii, b'c');
        assert_eq!(hw.cell(VideoPage::Live, 2 * 80).ascii, b' ');

        let mut buf = [0u8; 16];
        assert_eq!(mux.take_line(t(0), &mut buf), Some(3));
        assert_eq!(&buf[..3], b"ls\n");
        assert_eq!(mux.take_line(t(0), &mut buf), Some(4));
        assert_eq!(&buf[..4], b"cat\n");
        assert_eq!(mux.take_line(t(0), &mut buf), None);
        assert_eq!(mux.get(t(0)).line.as_bytes(), b"");
    }

    #[test]
    fn input_queue_never_overflows() {
        let mut hw = MockHardware::new();
        let mut mux = Multiplexer::new();
        for _ in 0..200 {
            mux.handle_key(&mut hw, KeyEvent::Enter);
        }
        type_str(&mut mux, &mut hw, b"lost");
        let mut buf = [0u8; 8];
        let mut lines = 0;
        while let Some(n) = mux.take_line(t(0), &mut buf) {
            assert_eq!(&buf[..n], b"\n");
            lines += 1;
        }
        assert_eq!(lines, INPUT_QUEUE_SIZE);
    }

    #[test]
    fn line_closes_at_character_cap() {
        let mut hw = MockHardware::new();
        let mut mux = Multiplexer::new();
        type_str(&mut mux, &mut hw, &[b'x'; 130]);
        let mut buf = [0u8; 256];
        assert_eq!(mux.take_line(t(0), &mut buf), Some(128));
        assert_eq!(buf[126], b'x');
        assert_eq!(buf[127], b'\n');
    }

    #[test]
    fn tab_inserts_four_spaces() {
        let mut hw = MockHardware::new();
        let mut mux = Multiplexer::new();
        mux.handle_key(&mut hw, KeyEvent::Tab);
        mux.handle_key(&mut hw, KeyEvent::Enter);
        let mut buf = [0u8; 8];
        assert_eq!(mux.take_line(t(0), &mut buf), Some(5));
        assert_eq!(&buf[..5], b"    \n");
    }

    #[test]
    fn clear_screen_resets_cursor_but_keeps_input() {
        let mut hw = MockHardware::new();
        let mut mux = Multiplexer::new();
        mux.write(&mut hw, t(0), b"junk\nmore");
        type_str(&mut mux, &mut hw, b"ab");
        mux.handle_key(&mut hw, KeyEvent::ClearScreen);
        assert_eq!(mux.get(t(0)).cursor, Cursor::default());
        assert_eq!(hw.cell(VideoPage::Live, 0).ascii, b' ');
        assert_eq!(hw.cursor, Cursor::default());
        assert_eq!(mux.get(t(0)).line.as_bytes(), b"ab");
    }

    #[test]
    fn hidden_terminal_writes_to_backing_page() {
        let mut hw = MockHardware::new();
        let mut mux = Multiplexer::new();
        mux.write(&mut hw, t(2), b"bg");
        assert_eq!(hw.cell(VideoPage::Live, 0).ascii, b' ');
        assert_eq!(hw.cell(VideoPage::Backing(t(2)), 1).ascii, b'g');
        assert_eq!(mux.video_frame(t(2)), backing_frame(2));
        assert_eq!(mux.video_frame(t(0)), VIDEO_PHYS);
    }

    #[test]
    fn show_swaps_pages_and_cursors() {
        let mut hw = MockHardware::new();
        let mut mux = Multiplexer::new();
        mux.write(&mut hw, t(0), b"zero");
        mux.write(&mut hw, t(1), b"one\n");
        assert!(mux.show(&mut hw, t(1)));
        assert!(!mux.show(&mut hw, t(1)));
        assert_eq!(mux.visible(), t(1));
        assert_eq!(hw.cell(VideoPage::Live, 0).ascii, b'o');
        assert_eq!(hw.cell(VideoPage::Backing(t(0)), 0).ascii, b'z');
        assert_eq!(hw.cursor, Cursor { row: 1, col: 0 });
        assert_eq!(mux.get(t(0)).cursor, Cursor { row: 0, col: 4 });
    }

    #[test]
    fn input_goes_to_visible_terminal_only() {
        let mut hw = MockHardware::new();
        let mut mux = Multiplexer::new();
        mux.show(&mut hw, t(2));
        type_str(&mut mux, &mut hw, b"hi");
        mux.handle_key(&mut hw, KeyEvent::Enter);
        let mut buf = [0u8; 8];
        assert_eq!(mux.take_line(t(0), &mut buf), None);
        assert_eq!(mux.take_line(t(2), &mut buf), Some(3));
    }

    #[test]
    fn rotation_skips_empty_terminals() {
        let mut mux = Multiplexer::new();
        let pid = ProcessId::new(0).unwrap();
        assert_eq!(mux.next_live_after(t(0)), None);
        mux.get_mut(t(0)).foreground = Some(pid);
        assert_eq!(mux.next_live_after(t(0)), None);
        mux.get_mut(t(2)).foreground = Some(pid);
        assert_eq!(mux.next_live_after(t(0)), Some(t(2)));
        assert_eq!(mux.next_live_after(t(2)), Some(t(0)));
        assert_eq!(mux.next_live_after(t(1)), Some(t(2)));
    }

    #[test]
    fn alt_fn_is_reported_not_typed() {
        let mut hw = MockHardware::new();
        let mut mux = Multiplexer::new();
        assert_eq!(mux.handle_key(&mut hw, KeyEvent::SwitchTerminal(t(1))), Some(t(1)));
        assert_eq!(mux.get(t(0)).line.as_bytes(), b"");
    }
}
