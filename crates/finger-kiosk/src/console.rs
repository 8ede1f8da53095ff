//! Workstation stand-ins for the kiosk hardware: a framed text screen on
//! stdout and keyboard-driven virtual buttons on stdin.

use std::convert::Infallible;
use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use embedded_hal::digital::{ErrorType, InputPin};
use finger_core::display::{layout, TextDisplay};
use finger_core::errors::{AppError, AppResult};
use tracing::{debug, warn};

use crate::operations::PositionSource;
use crate::panel::{Button, ButtonPanel};

/// A pin that reads low once per `press`, like a momentary switch.
#[derive(Debug, Clone)]
pub struct LatchedPin {
    latch: Arc<AtomicBool>,
}

impl ErrorType for LatchedPin {
    type Error = Infallible;
}

impl InputPin for LatchedPin {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.latch.load(Ordering::SeqCst))
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(self.latch.swap(false, Ordering::SeqCst))
    }
}

#[derive(Debug, Clone, Default)]
pub struct VirtualButtons {
    enroll: Arc<AtomicBool>,
    delete: Arc<AtomicBool>,
    toggle_liveness: Arc<AtomicBool>,
    return_to_menu: Arc<AtomicBool>,
}

impl VirtualButtons {
    pub fn new() -> Self {
        Self::default()
    }

    fn latch(&self, button: Button) -> &Arc<AtomicBool> {
        match button {
            Button::Enroll => &self.enroll,
            Button::Delete => &self.delete,
            Button::ToggleLiveness => &self.toggle_liveness,
            Button::ReturnToMenu => &self.return_to_menu,
        }
    }

    pub fn press(&self, button: Button) {
        self.latch(button).store(true, Ordering::SeqCst);
    }

    pub fn panel(&self) -> ButtonPanel<LatchedPin> {
        let pin = |button| LatchedPin {
            latch: Arc::clone(self.latch(button)),
        };
        ButtonPanel::new(
            pin(Button::Enroll),
            pin(Button::Delete),
            pin(Button::ToggleLiveness),
            pin(Button::ReturnToMenu),
        )
    }
}

/// Digits follow the menu numbering; letters work even while a template
/// position is being typed.
pub fn button_for_key(key: &str) -> Option<Button> {
    match key {
        "1" | "e" => Some(Button::Enroll),
        "2" | "d" => Some(Button::Delete),
        "3" | "s" => Some(Button::ToggleLiveness),
        "4" | "b" => Some(Button::ReturnToMenu),
        _ => None,
    }
}

/// Sends each console line either to the buttons or, while a delete is
/// waiting for one, to the position prompt.
pub struct ConsoleRouter {
    buttons: VirtualButtons,
    awaiting_position: Arc<AtomicBool>,
    positions: Sender<u32>,
}

impl ConsoleRouter {
    pub fn route(&self, line: &str) {
        let key = line.trim();
        if key.is_empty() {
            return;
        }
        if self.awaiting_position.load(Ordering::SeqCst) {
            if let Ok(position) = key.parse::<u32>() {
                if self.positions.send(position).is_err() {
                    warn!(target: "kiosk.console", "position prompt went away");
                }
                return;
            }
        }
        match button_for_key(key) {
            Some(button) => {
                debug!(target: "kiosk.console", ?button, "virtual button pressed");
                self.buttons.press(button);
            }
            None if self.awaiting_position.load(Ordering::SeqCst) => {
                warn!(target: "kiosk.console", input = key, "not a template position");
            }
            None => debug!(target: "kiosk.console", input = key, "ignored console input"),
        }
    }
}

pub struct ConsolePositionSource {
    awaiting_position: Arc<AtomicBool>,
    positions: Receiver<u32>,
    poll_interval: Duration,
}

impl PositionSource for ConsolePositionSource {
    fn request_position(
        &mut self,
        interrupted: &mut dyn FnMut() -> bool,
    ) -> AppResult<Option<u32>> {
        while self.positions.try_recv().is_ok() {}
        self.awaiting_position.store(true, Ordering::SeqCst);
        let result = loop {
            if interrupted() {
                break Ok(None);
            }
            match self.positions.recv_timeout(self.poll_interval) {
                Ok(position) => break Ok(Some(position)),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    break Err(AppError::Input("console input closed".into()))
                }
            }
        };
        self.awaiting_position.store(false, Ordering::SeqCst);
        result
    }
}

pub fn console_channel(
    buttons: VirtualButtons,
    poll_interval: Duration,
) -> (ConsoleRouter, ConsolePositionSource) {
    let awaiting_position = Arc::new(AtomicBool::new(false));
    let (tx, rx) = mpsc::channel();
    let router = ConsoleRouter {
        buttons,
        awaiting_position: Arc::clone(&awaiting_position),
        positions: tx,
    };
    let source = ConsolePositionSource {
        awaiting_position,
        positions: rx,
        poll_interval,
    };
    (router, source)
}

/// Reads lines from `reader` on a named thread until end of input.
pub fn spawn_reader<R>(reader: R, router: ConsoleRouter) -> AppResult<()>
where
    R: BufRead + Send + 'static,
{
    thread::Builder::new()
        .name("console-input".into())
        .spawn(move || {
            for line in reader.lines() {
                match line {
                    Ok(line) => router.route(&line),
                    Err(err) => {
                        warn!(target: "kiosk.console", error = %err, "console read failed");
                        break;
                    }
                }
            }
            debug!(target: "kiosk.console", "console input closed");
        })?;
    Ok(())
}

pub fn spawn_console_input(
    buttons: VirtualButtons,
    poll_interval: Duration,
) -> AppResult<ConsolePositionSource> {
    let (router, source) = console_channel(buttons, poll_interval);
    spawn_reader(io::BufReader::new(io::stdin()), router)?;
    Ok(source)
}

/// Renders each screen as a bordered block of `columns`-wide rows.
pub struct ConsoleDisplay<W = io::Stdout> {
    out: W,
    columns: usize,
}

impl ConsoleDisplay {
    pub fn stdout(columns: usize) -> Self {
        Self::new(io::stdout(), columns)
    }
}

impl<W: Write> ConsoleDisplay<W> {
    pub fn new(out: W, columns: usize) -> Self {
        Self {
            out,
            columns: columns.max(1),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn render(&mut self, rows: &[String]) -> io::Result<()> {
        let border = format!("+{}+", "-".repeat(self.columns + 2));
        writeln!(self.out, "{border}")?;
        for row in rows {
            writeln!(self.out, "| {:<width$} |", row, width = self.columns)?;
        }
        writeln!(self.out, "{border}")?;
        self.out.flush()
    }
}

impl<W: Write> TextDisplay for ConsoleDisplay<W> {
    fn show_lines(&mut self, lines: &[&str]) -> AppResult<()> {
        let rows = layout(lines, self.columns);
        self.render(&rows)
            .map_err(|err| AppError::Display(err.to_string()))
    }

    fn clear(&mut self) -> AppResult<()> {
        self.render(&[])
            .map_err(|err| AppError::Display(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::ButtonSource;
    use std::io::Cursor;

    #[test]
    fn latched_pin_reads_low_once_per_press() {
        let buttons = VirtualButtons::new();
        let mut panel = buttons.panel();
        assert_eq!(panel.poll().unwrap(), None);
        buttons.press(Button::ToggleLiveness);
        assert_eq!(panel.poll().unwrap(), Some(Button::ToggleLiveness));
        assert_eq!(panel.poll().unwrap(), None);
    }

    #[test]
    fn digits_press_buttons_unless_a_position_is_awaited() {
        let buttons = VirtualButtons::new();
        let mut panel = buttons.panel();
        let (router, source) = console_channel(buttons, Duration::from_millis(1));

        router.route("2\n");
        assert_eq!(panel.poll().unwrap(), Some(Button::Delete));

        source.awaiting_position.store(true, Ordering::SeqCst);
        router.route(" 2 ");
        router.route("b");
        assert_eq!(source.positions.try_recv().unwrap(), 2);
        assert_eq!(panel.poll().unwrap(), Some(Button::ReturnToMenu));
    }

    #[test]
    fn position_request_returns_entered_number() {
        let buttons = VirtualButtons::new();
        let (router, mut source) = console_channel(buttons, Duration::from_millis(1));
        let awaiting = Arc::clone(&source.awaiting_position);
        let feeder = thread::spawn(move || {
            while !awaiting.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(1));
            }
            router.route("17");
            router
        });

        let position = source.request_position(&mut || false).unwrap();
        assert_eq!(position, Some(17));
        assert!(!source.awaiting_position.load(Ordering::SeqCst));
        feeder.join().unwrap();
    }

    #[test]
    fn position_request_honours_interruption() {
        let (_router, mut source) = console_channel(VirtualButtons::new(), Duration::from_millis(1));
        let mut polls = 0;
        let position = source
            .request_position(&mut || {
                polls += 1;
                polls > 3
            })
            .unwrap();
        assert_eq!(position, None);
    }

    #[test]
    fn reader_thread_routes_lines() {
        let buttons = VirtualButtons::new();
        let mut panel = buttons.panel();
        let (router, _source) = console_channel(buttons, Duration::from_millis(1));
        spawn_reader(Cursor::new(b"hello\n3\n".to_vec()), router).unwrap();

        let mut pressed = None;
        for _ in 0..200 {
            pressed = panel.poll().unwrap();
            if pressed.is_some() {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(pressed, Some(Button::ToggleLiveness));
    }

    #[test]
    fn screen_is_framed_and_wrapped() {
        let mut display = ConsoleDisplay::new(Vec::new(), 10);
        display.show_lines(&["Finger enrolled!", "Pos #3"]).unwrap();
        let text = String::from_utf8(display.into_inner()).unwrap();
        let rows: Vec<&str> = text.lines().collect();
        assert_eq!(
            rows,
            vec![
                "+------------+",
                "| Finger     |",
                "| enrolled!  |",
                "| Pos #3     |",
                "+------------+",
            ]
        );
    }
}
