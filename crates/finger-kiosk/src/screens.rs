//! Texts shown on the kiosk display.

use finger_core::display::TextDisplay;
use finger_core::errors::AppError;
use finger_core::identity::TemplateUsage;
use tracing::warn;

use crate::panel::Button;

pub const SPOOF_DETECTED: &str = "Spoof Detected!";
pub const TEMPLATE_EXISTS: &str = "Template exists";
pub const NO_MATCH_FOUND: &str = "No match found";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Identify,
    Enroll,
    Delete,
    ToggleLiveness,
    ReturnToMenu,
}

impl Operation {
    pub fn name(self) -> &'static str {
        match self {
            Operation::Identify => "identify",
            Operation::Enroll => "enroll",
            Operation::Delete => "delete",
            Operation::ToggleLiveness => "toggle-liveness",
            Operation::ReturnToMenu => "return-to-menu",
        }
    }

    fn failure_title(self) -> &'static str {
        match self {
            Operation::Identify => "Search Failed!",
            Operation::Enroll => "Enroll Failed!",
            Operation::Delete => "Delete Failed!",
            Operation::ToggleLiveness => "Toggle Failed!",
            Operation::ReturnToMenu => "Menu Failed!",
        }
    }
}

impl From<Button> for Operation {
    fn from(button: Button) -> Self {
        match button {
            Button::Enroll => Operation::Enroll,
            Button::Delete => Operation::Delete,
            Button::ToggleLiveness => Operation::ToggleLiveness,
            Button::ReturnToMenu => Operation::ReturnToMenu,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Screen {
    lines: Vec<String>,
}

impl Screen {
    fn of<I, T>(lines: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }

    pub fn lines(&self) -> Vec<&str> {
        self.lines.iter().map(String::as_str).collect()
    }

    pub fn splash() -> Self {
        Self::of(["Fingerprint System"])
    }

    pub fn main_menu() -> Self {
        Self::of([
            "1: Enroll",
            "2: Delete",
            "3: Anti Spoof",
            "4: Back",
            "Waiting for finger..",
        ])
    }

    pub fn progress(operation: Operation) -> Self {
        let text = match operation {
            Operation::Enroll => "Enrolling Finger...",
            Operation::Delete => "Deleting Finger...",
            Operation::ToggleLiveness => "Toggling Spoof Guard...",
            Operation::ReturnToMenu => "Returning to Menu...",
            Operation::Identify => "Searching...",
        };
        Self::of([text])
    }

    pub fn template_usage(usage: TemplateUsage) -> Self {
        Self::of([
            "Used templates:".to_string(),
            format!("{}/{}", usage.used, usage.capacity),
        ])
    }

    pub fn waiting_for_finger() -> Self {
        Self::of(["Waiting for finger..."])
    }

    pub fn remove_finger() -> Self {
        Self::of(["Remove finger..."])
    }

    pub fn waiting_for_same_finger() -> Self {
        Self::of(["Waiting for same", "finger again..."])
    }

    pub fn enter_position() -> Self {
        Self::of(["Enter template pos:"])
    }

    pub fn template_exists(position: u32) -> Self {
        Self::of([TEMPLATE_EXISTS.to_string(), format!("Pos #{position}")])
    }

    pub fn no_match() -> Self {
        Self::of([NO_MATCH_FOUND])
    }

    pub fn spoof_detected() -> Self {
        Self::of([SPOOF_DETECTED])
    }

    pub fn enrolled(position: u32) -> Self {
        Self::of(["Finger enrolled!".to_string(), format!("Pos #{position}")])
    }

    pub fn deleted() -> Self {
        Self::of(["Template deleted!"])
    }

    pub fn delete_failed() -> Self {
        Self::of(["Failed to delete!"])
    }

    pub fn spoof_guard(enabled: bool) -> Self {
        Self::of([if enabled {
            "Anti-Spoof Enabled"
        } else {
            "Anti-Spoof Disabled"
        }])
    }

    pub fn failure(operation: Operation, err: &AppError) -> Self {
        let title = match err {
            AppError::SensorInit(_) => "Sensor Init Failed!",
            _ => operation.failure_title(),
        };
        Self::of([title.to_string(), err.short_message()])
    }
}

/// Shows a screen. A display that cannot draw is logged and otherwise
/// ignored; there is nowhere else to report it.
pub fn show<D: TextDisplay + ?Sized>(display: &mut D, screen: &Screen) {
    if let Err(err) = display.show_lines(&screen.lines()) {
        warn!(target: "kiosk.display", error = %err, "display update failed");
    }
}
