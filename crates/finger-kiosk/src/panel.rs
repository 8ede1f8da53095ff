//! The four administrative buttons.

use embedded_hal::digital::InputPin;
use finger_core::errors::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Button {
    Enroll,
    Delete,
    ToggleLiveness,
    ReturnToMenu,
}

impl Button {
    /// Order in which simultaneous presses are honoured.
    pub const PRIORITY: [Button; 4] = [
        Button::Enroll,
        Button::Delete,
        Button::ToggleLiveness,
        Button::ReturnToMenu,
    ];
}

pub trait ButtonSource {
    /// Returns the highest-priority button pressed since the previous poll.
    /// A button held down across polls is reported once.
    fn poll(&mut self) -> AppResult<Option<Button>>;
}

/// Four active-low inputs: a pin reading low is a pressed button. Presses
/// are reported on the falling edge.
pub struct ButtonPanel<P> {
    enroll: P,
    delete: P,
    toggle_liveness: P,
    return_to_menu: P,
    held: [bool; 4],
}

impl<P: InputPin> ButtonPanel<P> {
    pub fn new(enroll: P, delete: P, toggle_liveness: P, return_to_menu: P) -> Self {
        Self {
            enroll,
            delete,
            toggle_liveness,
            return_to_menu,
            held: [false; 4],
        }
    }

    fn pin_mut(&mut self, button: Button) -> &mut P {
        match button {
            Button::Enroll => &mut self.enroll,
            Button::Delete => &mut self.delete,
            Button::ToggleLiveness => &mut self.toggle_liveness,
            Button::ReturnToMenu => &mut self.return_to_menu,
        }
    }
}

impl<P: InputPin> ButtonSource for ButtonPanel<P> {
    fn poll(&mut self) -> AppResult<Option<Button>> {
        let mut newly_pressed = None;
        for (slot, button) in Button::PRIORITY.into_iter().enumerate() {
            let low = self
                .pin_mut(button)
                .is_low()
                .map_err(|err| AppError::Input(format!("{button:?} pin: {err:?}")))?;
            if low && !self.held[slot] && newly_pressed.is_none() {
                newly_pressed = Some(button);
            }
            self.held[slot] = low;
        }
        Ok(newly_pressed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal::digital::{ErrorKind, ErrorType};
    use std::cell::Cell;
    use std::rc::Rc;

    struct FixedPin(bool);

    impl ErrorType for FixedPin {
        type Error = ErrorKind;
    }

    impl InputPin for FixedPin {
        fn is_high(&mut self) -> Result<bool, Self::Error> {
            Ok(self.0)
        }

        fn is_low(&mut self) -> Result<bool, Self::Error> {
            Ok(!self.0)
        }
    }

    /// Level shared with the test body; `true` means held down.
    #[derive(Clone, Default)]
    struct SwitchPin(Rc<Cell<bool>>);

    impl ErrorType for SwitchPin {
        type Error = ErrorKind;
    }

    impl InputPin for SwitchPin {
        fn is_high(&mut self) -> Result<bool, Self::Error> {
            Ok(!self.0.get())
        }

        fn is_low(&mut self) -> Result<bool, Self::Error> {
            Ok(self.0.get())
        }
    }

    struct BrokenPin;

    impl ErrorType for BrokenPin {
        type Error = ErrorKind;
    }

    impl InputPin for BrokenPin {
        fn is_high(&mut self) -> Result<bool, Self::Error> {
            Err(ErrorKind::Other)
        }

        fn is_low(&mut self) -> Result<bool, Self::Error> {
            Err(ErrorKind::Other)
        }
    }

    #[test]
    fn released_pins_read_high() {
        let mut panel = ButtonPanel::new(
            FixedPin(true),
            FixedPin(true),
            FixedPin(true),
            FixedPin(true),
        );
        assert_eq!(panel.poll().unwrap(), None);
    }

    #[test]
    fn simultaneous_presses_follow_priority() {
        let mut panel = ButtonPanel::new(
            FixedPin(true),
            FixedPin(false),
            FixedPin(false),
            FixedPin(false),
        );
        assert_eq!(panel.poll().unwrap(), Some(Button::Delete));
    }

    #[test]
    fn held_button_is_reported_once_per_press() {
        let toggle = SwitchPin::default();
        let mut panel = ButtonPanel::new(
            SwitchPin::default(),
            SwitchPin::default(),
            toggle.clone(),
            SwitchPin::default(),
        );

        toggle.0.set(true);
        assert_eq!(panel.poll().unwrap(), Some(Button::ToggleLiveness));
        for _ in 0..5 {
            assert_eq!(panel.poll().unwrap(), None);
        }

        toggle.0.set(false);
        assert_eq!(panel.poll().unwrap(), None);
        toggle.0.set(true);
        assert_eq!(panel.poll().unwrap(), Some(Button::ToggleLiveness));
    }

    #[test]
    fn new_press_is_seen_while_another_button_is_held() {
        let enroll = SwitchPin::default();
        let delete = SwitchPin::default();
        let mut panel = ButtonPanel::new(
            enroll.clone(),
            delete.clone(),
            SwitchPin::default(),
            SwitchPin::default(),
        );

        enroll.0.set(true);
        assert_eq!(panel.poll().unwrap(), Some(Button::Enroll));
        delete.0.set(true);
        assert_eq!(panel.poll().unwrap(), Some(Button::Delete));
        assert_eq!(panel.poll().unwrap(), None);
    }

    #[test]
    fn pin_errors_surface_as_input_errors() {
        let mut panel = ButtonPanel::new(BrokenPin, BrokenPin, BrokenPin, BrokenPin);
        assert!(matches!(panel.poll(), Err(AppError::Input(_))));
    }
}
