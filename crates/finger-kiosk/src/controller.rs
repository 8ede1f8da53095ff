//! The kiosk control loop.
//!
//! The sensor and display travel together as a [`Station`]. While the
//! background identify task runs, the station lives inside its thread and
//! the controller holds only the join handle; a foreground operation can
//! reach the devices only after `interrupt_background` has set the stop
//! flag, joined the thread and taken the station back. That hand-over is
//! the whole of the mutual-exclusion story: there is no lock.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use finger_core::capture::CaptureAudit;
use finger_core::display::TextDisplay;
use finger_core::errors::{AppError, AppResult};
use finger_core::identity::IdentityResolver;
use finger_core::liveness::LivenessGate;
use finger_core::sensor::FingerprintSensor;
use tracing::{debug, info, warn};

use crate::config::KioskSettings;
use crate::flags::ControlFlags;
use crate::operations::{
    self, pause, report_failure, IdentifyContext, Interrupts, PositionSource, Station,
};
use crate::panel::{Button, ButtonSource};
use crate::screens::{self, Operation, Screen};

const IDENTIFY_THREAD: &str = "identify";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationMode {
    Idle,
    BackgroundIdentify,
    Enroll,
    Delete,
    ToggleLiveness,
    ReturnToMenu,
}

impl From<Button> for OperationMode {
    fn from(button: Button) -> Self {
        match button {
            Button::Enroll => OperationMode::Enroll,
            Button::Delete => OperationMode::Delete,
            Button::ToggleLiveness => OperationMode::ToggleLiveness,
            Button::ReturnToMenu => OperationMode::ReturnToMenu,
        }
    }
}

pub struct OperationController<S, D, B, P> {
    station: Option<Station<S, D>>,
    background: Option<JoinHandle<Station<S, D>>>,
    buttons: B,
    positions: P,
    pending: Option<Button>,
    mode: OperationMode,
    ctx: IdentifyContext,
}

impl<S, D, B, P> OperationController<S, D, B, P>
where
    S: FingerprintSensor + Send + 'static,
    D: TextDisplay + Send + 'static,
    B: ButtonSource,
    P: PositionSource,
{
    pub fn new(
        station: Station<S, D>,
        buttons: B,
        positions: P,
        gate: LivenessGate,
        flags: Arc<ControlFlags>,
        settings: KioskSettings,
    ) -> Self {
        Self {
            station: Some(station),
            background: None,
            buttons,
            positions,
            pending: None,
            mode: OperationMode::Idle,
            ctx: IdentifyContext {
                flags,
                gate,
                resolver: IdentityResolver::new(),
                settings,
                audit: None,
            },
        }
    }

    /// Archives every background capture under the audit directory.
    pub fn with_audit(mut self, audit: CaptureAudit) -> Self {
        self.ctx.audit = Some(audit);
        self
    }

    pub fn mode(&self) -> OperationMode {
        self.mode
    }

    pub fn flags(&self) -> &Arc<ControlFlags> {
        &self.ctx.flags
    }

    pub fn is_background_running(&self) -> bool {
        self.background
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    /// Splash screen, then the main menu.
    pub fn start(&mut self) -> AppResult<()> {
        let hold = self.ctx.settings.message_hold;
        let step = self.ctx.settings.poll_interval;
        let flags = Arc::clone(&self.ctx.flags);
        let station = self.station_mut()?;
        screens::show(&mut station.display, &Screen::splash());
        pause(hold, step, || flags.should_stop());
        screens::show(&mut station.display, &Screen::main_menu());
        Ok(())
    }

    /// One pass of the control loop. Errors returned here mean the station
    /// is gone; operation failures are reported on the display instead.
    pub fn tick(&mut self) -> AppResult<()> {
        if let Some(button) = self.pending.take().or_else(|| self.poll_buttons()) {
            return self.dispatch(button);
        }
        self.reap_background()?;
        if self.background.is_none() && !self.ctx.flags.shutdown_requested() {
            self.spawn_background()?;
        }
        Ok(())
    }

    /// Ticks on the configured cadence until shutdown, then hands the
    /// station back so its devices drop in scope order.
    pub fn run(mut self) -> AppResult<Station<S, D>> {
        self.start()?;
        while !self.ctx.flags.shutdown_requested() {
            self.tick()?;
            thread::sleep(self.ctx.settings.poll_interval);
        }
        info!(target: "kiosk.controller", "shutdown requested");
        self.shutdown()
    }

    pub fn shutdown(mut self) -> AppResult<Station<S, D>> {
        self.interrupt_background()?;
        let mut station = self.take_station()?;
        if let Err(err) = station.display.clear() {
            warn!(target: "kiosk.controller", error = %err, "failed to clear display");
        }
        Ok(station)
    }

    /// Sets the stop flag, joins the background task and reclaims the
    /// station. Blocks until the task has observed the flag; the flag is
    /// cleared again afterwards.
    pub fn interrupt_background(&mut self) -> AppResult<()> {
        let Some(handle) = self.background.take() else {
            return Ok(());
        };
        self.ctx.flags.request_stop();
        debug!(target: "kiosk.controller", "waiting for background identify to stop");
        let joined = handle.join();
        self.ctx.flags.clear_stop();
        self.station = Some(joined.map_err(|payload| AppError::TaskPanicked {
            task: IDENTIFY_THREAD,
            message: panic_message(payload.as_ref()),
        })?);
        self.mode = OperationMode::Idle;
        Ok(())
    }

    fn poll_buttons(&mut self) -> Option<Button> {
        match self.buttons.poll() {
            Ok(button) => button,
            Err(err) => {
                warn!(target: "kiosk.controller", error = %err, "button poll failed");
                None
            }
        }
    }

    fn reap_background(&mut self) -> AppResult<()> {
        if self
            .background
            .as_ref()
            .map_or(false, |handle| handle.is_finished())
        {
            self.interrupt_background()?;
        }
        Ok(())
    }

    fn spawn_background(&mut self) -> AppResult<()> {
        let mut station = self.take_station()?;
        let ctx = self.ctx.clone();
        let handle = thread::Builder::new()
            .name(IDENTIFY_THREAD.into())
            .spawn(move || {
                run_identify_task(&mut station, &ctx);
                station
            })?;
        self.background = Some(handle);
        self.mode = OperationMode::BackgroundIdentify;
        Ok(())
    }

    fn dispatch(&mut self, button: Button) -> AppResult<()> {
        let operation = Operation::from(button);
        info!(target: "kiosk.controller", operation = operation.name(), "button pressed");
        self.interrupt_background()?;
        self.mode = OperationMode::from(button);

        let settings = &self.ctx.settings;
        let resolver = &self.ctx.resolver;
        let flags = self.ctx.flags.as_ref();
        let station = self
            .station
            .as_mut()
            .ok_or_else(|| station_missing("dispatch"))?;
        screens::show(&mut station.display, &Screen::progress(operation));

        let mut interrupts = Interrupts::new(flags, &mut self.buttons, &mut self.pending);
        let result = match button {
            Button::Enroll => operations::enroll(station, resolver, settings, &mut interrupts),
            Button::Delete => operations::delete(
                station,
                resolver,
                settings,
                &mut self.positions,
                &mut interrupts,
            ),
            Button::ToggleLiveness => {
                operations::toggle_liveness(&mut station.display, flags, settings, &mut interrupts)
            }
            Button::ReturnToMenu => operations::return_to_menu(settings, &mut interrupts),
        };

        match result {
            Ok(outcome) => {
                debug!(target: "kiosk.controller", operation = operation.name(), ?outcome, "operation finished");
            }
            Err(err) => {
                report_failure(&mut station.display, operation, &err);
                pause(settings.message_hold, settings.capture_poll, || {
                    interrupts.check()
                });
            }
        }
        drop(interrupts);

        if !flags.shutdown_requested() {
            screens::show(&mut station.display, &Screen::main_menu());
        }
        self.mode = OperationMode::Idle;
        Ok(())
    }

    fn station_mut(&mut self) -> AppResult<&mut Station<S, D>> {
        self.station
            .as_mut()
            .ok_or_else(|| station_missing("access"))
    }

    fn take_station(&mut self) -> AppResult<Station<S, D>> {
        self.station.take().ok_or_else(|| station_missing("take"))
    }
}

fn station_missing(step: &str) -> AppError {
    AppError::TaskPanicked {
        task: "controller",
        message: format!("station unavailable during {step}"),
    }
}

/// Body of the background thread. A panic is contained here so the
/// station always makes it back to the controller.
fn run_identify_task<S, D>(station: &mut Station<S, D>, ctx: &IdentifyContext)
where
    S: FingerprintSensor,
    D: TextDisplay,
{
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        operations::identify_cycle(station, ctx)
    }));
    match result {
        Ok(outcome) => {
            debug!(target: "kiosk.identify", ?outcome, "identify cycle finished");
        }
        Err(payload) => {
            let err = AppError::TaskPanicked {
                task: IDENTIFY_THREAD,
                message: panic_message(payload.as_ref()),
            };
            report_failure(&mut station.display, Operation::Identify, &err);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
