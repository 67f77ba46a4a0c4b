//! 80x25 text mode: the live page, per-terminal backing pages and the
//! cursor-driven writer shared by the terminals.

use crate::drivers::tty::TerminalId;

pub const WIDTH: usize = 80;
pub const HEIGHT: usize = 25;
pub const CELLS: usize = WIDTH * HEIGHT;

/// The two attribute colours the console draws with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Color {
    Black = 0,
    LightGray = 7,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct ColorCode(u8);

impl ColorCode {
    pub const fn new(fg: Color, bg: Color) -> ColorCode {
        ColorCode((bg as u8) << 4 | (fg as u8))
    }
}

pub const DEFAULT_COLOR: ColorCode = ColorCode::new(Color::LightGray, Color::Black);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct ScreenChar {
    pub ascii: u8,
    pub color: ColorCode,
}

impl ScreenChar {
    pub const BLANK: ScreenChar = ScreenChar { ascii: b' ', color: DEFAULT_COLOR };

    pub const fn new(ascii: u8) -> Self {
        ScreenChar { ascii, color: DEFAULT_COLOR }
    }
}

/// Which 4KB text page an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoPage {
    Live,
    /// Holds a hidden terminal's screen.
    Backing(TerminalId),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    pub row: usize,
    pub col: usize,
}

impl Cursor {
    fn index(self) -> usize {
        self.row * WIDTH + self.col
    }
}

pub trait Console {
    fn cell(&self, page: VideoPage, index: usize) -> ScreenChar;
    fn set_cell(&mut self, page: VideoPage, index: usize, ch: ScreenChar);
    /// Moves the blinking hardware cursor on the live page.
    fn set_cursor(&mut self, cursor: Cursor);
}

/// Renders one byte at `cursor` and advances it, wrapping and scrolling.
pub fn put_byte<C: Console + ?Sized>(con: &mut C, page: VideoPage, cursor: &mut Cursor, byte: u8) {
    match byte {
        b'\n' => newline(con, page, cursor),
        b'\r' => cursor.col = 0,
        0 => {}
        byte => {
            let byte = if (0x20..=0x7e).contains(&byte) { byte } else { 0xfe };
            con.set_cell(page, cursor.index(), ScreenChar::new(byte));
            cursor.col += 1;
            if cursor.col == WIDTH {
                newline(con, page, cursor);
            }
        }
    }
}

pub fn write_bytes<C: Console + ?Sized>(con: &mut C, page: VideoPage, cursor: &mut Cursor, bytes: &[u8]) {
    for &byte in bytes {
        put_byte(con, page, cursor, byte);
    }
}

/// Erases the cell before the cursor, stepping back over a line wrap.
pub fn backspace<C: Console + ?Sized>(con: &mut C, page: VideoPage, cursor: &mut Cursor) {
    if cursor.col > 0 {
        cursor.col -= 1;
    } else if cursor.row > 0 {
        cursor.row -= 1;
        cursor.col = WIDTH - 1;
    } else {
        return;
    }
    con.set_cell(page, cursor.index(), ScreenChar::BLANK);
}

fn newline<C: Console + ?Sized>(con: &mut C, page: VideoPage, cursor: &mut Cursor) {
    cursor.col = 0;
    if cursor.row + 1 < HEIGHT {
        cursor.row += 1;
    } else {
        scroll(con, page);
    }
}

pub fn scroll<C: Console + ?Sized>(con: &mut C, page: VideoPage) {
    for index in WIDTH..CELLS {
        let ch = con.cell(page, index);
        con.set_cell(page, index - WIDTH, ch);
    }
    for index in CELLS - WIDTH..CELLS {
        con.set_cell(page, index, ScreenChar::BLANK);
    }
}

pub fn clear<C: Console + ?Sized>(con: &mut C, page: VideoPage) {
    for index in 0..CELLS {
        con.set_cell(page, index, ScreenChar::BLANK);
    }
}

pub fn copy_page<C: Console + ?Sized>(con: &mut C, from: VideoPage, to: VideoPage) {
    for index in 0..CELLS {
        let ch = con.cell(from, index);
        con.set_cell(to, index, ch);
    }
}

#[cfg(all(target_arch = "x86_64", not(test)))]
pub use hw::VgaText;

#[cfg(all(target_arch = "x86_64", not(test)))]
mod hw {
    use volatile::Volatile;
    use x86_64::instructions::port::Port;

    use super::{Console, Cursor, ScreenChar, VideoPage, CELLS, WIDTH};
    use crate::config::VIDEO_PHYS;
    use crate::memory::paging::backing_frame;

    #[repr(transparent)]
    struct Buffer {
        chars: [Volatile<ScreenChar>; CELLS],
    }

    /// The VGA text page plus its backing pages, all identity mapped.
    pub struct VgaText {
        crtc_index: Port<u8>,
        crtc_data: Port<u8>,
    }

    impl VgaText {
        pub const fn new() -> Self {
            VgaText { crtc_index: Port::new(0x3D4), crtc_data: Port::new(0x3D5) }
        }

        fn buffer(&self, page: VideoPage) -> &'static mut Buffer {
            let phys = match page {
                VideoPage::Live => VIDEO_PHYS,
                VideoPage::Backing(term) => backing_frame(term.index()),
            };
            unsafe { &mut *(phys as usize as *mut Buffer) }
        }
    }

    impl Console for VgaText {
        fn cell(&self, page: VideoPage, index: usize) -> ScreenChar {
            self.buffer(page).chars[index].read()
        }

        fn set_cell(&mut self, page: VideoPage, index: usize, ch: ScreenChar) {
            self.buffer(page).chars[index].write(ch);
        }

        fn set_cursor(&mut self, cursor: Cursor) {
            let pos = (cursor.row * WIDTH + cursor.col) as u16;
            unsafe {
                self.crtc_index.write(0x0F);
                self.crtc_data.write((pos & 0xFF) as u8);
                self.crtc_index.write(0x0E);
                self.crtc_data.write((pos >> 8) as u8);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockHardware;

    fn row_text(hw: &MockHardware, page: VideoPage, row: usize) -> Vec<u8> {
        (0..WIDTH).map(|c| hw.cell(page, row * WIDTH + c).ascii).collect()
    }

    #[test]
    fn wraps_at_end_of_row() {
        let mut hw = MockHardware::new();
        let mut cursor = Cursor { row: 0, col: WIDTH - 1 };
        write_bytes(&mut hw, VideoPage::Live, &mut cursor, b"ab");
        assert_eq!(cursor, Cursor { row: 1, col: 1 });
        assert_eq!(hw.cell(VideoPage::Live, WIDTH - 1).ascii, b'a');
        assert_eq!(hw.cell(VideoPage::Live, WIDTH).ascii, b'b');
    }

    #[test]
    fn newline_on_last_row_scrolls() {
        let mut hw = MockHardware::new();
        let mut cursor = Cursor::default();
        write_bytes(&mut hw, VideoPage::Live, &mut cursor, b"top\n");
        cursor.row = HEIGHT - 1;
        write_bytes(&mut hw, VideoPage::Live, &mut cursor, b"last\n");
        assert_eq!(cursor, Cursor { row: HEIGHT - 1, col: 0 });
        assert_eq!(&row_text(&hw, VideoPage::Live, HEIGHT - 2)[..4], b"last");
        assert_eq!(row_text(&hw, VideoPage::Live, HEIGHT - 1), vec![b' '; WIDTH]);
    }

    #[test]
    fn backspace_steps_over_wrap() {
        let mut hw = MockHardware::new();
        let mut cursor = Cursor { row: 1, col: 0 };
        backspace(&mut hw, VideoPage::Live, &mut cursor);
        assert_eq!(cursor, Cursor { row: 0, col: WIDTH - 1 });
        let mut origin = Cursor::default();
        backspace(&mut hw, VideoPage::Live, &mut origin);
        assert_eq!(origin, Cursor::default());
    }

    #[test]
    fn pages_are_independent() {
        let mut hw = MockHardware::new();
        let t1 = VideoPage::Backing(TerminalId::new(1).unwrap());
        let mut cursor = Cursor::default();
        write_bytes(&mut hw, t1, &mut cursor, b"hidden");
        assert_eq!(hw.cell(VideoPage::Live, 0), ScreenChar::BLANK);
        copy_page(&mut hw, t1, VideoPage::Live);
        assert_eq!(&row_text(&hw, VideoPage::Live, 0)[..6], b"hidden");
    }

    #[test]
    fn default_attribute_is_light_gray_on_black() {
        assert_eq!(DEFAULT_COLOR, ColorCode(0x07));
        assert_eq!(ScreenChar::BLANK.color, ColorCode::new(Color::LightGray, Color::Black));
    }
}
