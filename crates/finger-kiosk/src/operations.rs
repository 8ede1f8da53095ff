//! The five kiosk operations. Each one returns `AppResult<_>`; failures are
//! reported by the caller through `report_failure`.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use finger_core::capture::{wait_for_capture, CaptureAudit};
use finger_core::display::TextDisplay;
use finger_core::errors::{AppError, AppResult};
use finger_core::identity::{DeleteOutcome, EnrollOutcome, IdentityResolver, TemplateMatch};
use finger_core::liveness::{LivenessGate, LivenessVerdict};
use finger_core::sensor::FingerprintSensor;
use tracing::{debug, error, info, warn};

use crate::config::KioskSettings;
use crate::flags::ControlFlags;
use crate::panel::{Button, ButtonSource};
use crate::screens::{self, Operation, Screen};

/// The exclusive devices. Whoever holds the station may talk to them.
pub struct Station<S, D> {
    pub sensor: S,
    pub display: D,
}

impl<S, D> Station<S, D> {
    pub fn new(sensor: S, display: D) -> Self {
        Self { sensor, display }
    }
}

/// Supplies the template position for a delete.
pub trait PositionSource {
    /// Blocks until a position is entered. `None` means `interrupted` fired
    /// first.
    fn request_position(
        &mut self,
        interrupted: &mut dyn FnMut() -> bool,
    ) -> AppResult<Option<u32>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifyOutcome {
    Matched(u32),
    NoMatch,
    SpoofDetected,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationOutcome {
    Enrolled(u32),
    AlreadyEnrolled(u32),
    Deleted(u32),
    NothingToDelete(u32),
    SpoofCheck(bool),
    Menu,
    Cancelled,
}

/// State the background identify task carries into its thread.
#[derive(Clone)]
pub struct IdentifyContext {
    pub flags: Arc<ControlFlags>,
    pub gate: LivenessGate,
    pub resolver: IdentityResolver,
    pub settings: KioskSettings,
    pub audit: Option<CaptureAudit>,
}

/// Sleeps for `duration` in `step` slices. Returns `false` as soon as
/// `interrupted` fires.
pub fn pause<F>(duration: Duration, step: Duration, mut interrupted: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + duration;
    loop {
        if interrupted() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep(step.min(deadline - now));
    }
}

pub fn report_failure<D>(display: &mut D, operation: Operation, err: &AppError)
where
    D: TextDisplay + ?Sized,
{
    error!(
        target: "kiosk.controller",
        operation = operation.name(),
        error = %err.human_message(),
        "operation failed"
    );
    screens::show(display, &Screen::failure(operation, err));
}

/// One background scan: wait for a finger, gate it, resolve it, show the
/// result. Cancellation is only observed between sensor reads.
pub fn identify<S, D>(station: &mut Station<S, D>, ctx: &IdentifyContext) -> AppResult<IdentifyOutcome>
where
    S: FingerprintSensor,
    D: TextDisplay,
{
    let Station { sensor, display } = station;
    sensor.initialize()?;
    let policy = ctx.settings.background_capture();
    let Some(image) = wait_for_capture(sensor, &policy, || ctx.flags.should_stop())? else {
        return Ok(IdentifyOutcome::Cancelled);
    };

    if let Some(audit) = &ctx.audit {
        if let Err(err) = audit.persist(&image) {
            warn!(target: "kiosk.identify", error = %err, "failed to archive impression");
        }
    }

    let verdict = ctx.gate.classify(&image, ctx.flags.spoof_check_enabled())?;
    drop(image);
    if verdict == LivenessVerdict::Fake {
        warn!(target: "kiosk.identify", "spoof detected; identity not resolved");
        screens::show(display, &Screen::spoof_detected());
        return Ok(IdentifyOutcome::SpoofDetected);
    }

    match ctx.resolver.resolve(sensor)? {
        TemplateMatch::Found(position) => {
            info!(target: "kiosk.identify", position, "template exists");
            screens::show(display, &Screen::template_exists(position));
            Ok(IdentifyOutcome::Matched(position))
        }
        TemplateMatch::NotFound => {
            info!(target: "kiosk.identify", "no match found");
            screens::show(display, &Screen::no_match());
            Ok(IdentifyOutcome::NoMatch)
        }
    }
}

/// Full background cycle: scan, report, hold the result on screen, then
/// put the menu back unless something is waiting to take over.
pub fn identify_cycle<S, D>(station: &mut Station<S, D>, ctx: &IdentifyContext) -> Option<IdentifyOutcome>
where
    S: FingerprintSensor,
    D: TextDisplay,
{
    let outcome = match identify(station, ctx) {
        Ok(IdentifyOutcome::Cancelled) => {
            debug!(target: "kiosk.identify", "scan cancelled");
            return Some(IdentifyOutcome::Cancelled);
        }
        Ok(outcome) => Some(outcome),
        Err(err) => {
            report_failure(&mut station.display, Operation::Identify, &err);
            None
        }
    };
    let held = pause(ctx.settings.message_hold, ctx.settings.capture_poll, || {
        ctx.flags.should_stop()
    });
    if held {
        screens::show(&mut station.display, &Screen::main_menu());
    }
    outcome
}

/// Interruption check for foreground operations: a stop request, shutdown,
/// or a new button press. A press is latched for the next dispatch.
pub struct Interrupts<'a> {
    flags: &'a ControlFlags,
    buttons: &'a mut dyn ButtonSource,
    pending: &'a mut Option<Button>,
}

impl<'a> Interrupts<'a> {
    pub fn new(
        flags: &'a ControlFlags,
        buttons: &'a mut dyn ButtonSource,
        pending: &'a mut Option<Button>,
    ) -> Self {
        Self {
            flags,
            buttons,
            pending,
        }
    }

    pub fn check(&mut self) -> bool {
        if self.flags.should_stop() || self.pending.is_some() {
            return true;
        }
        match self.buttons.poll() {
            Ok(Some(button)) => {
                debug!(target: "kiosk.controller", ?button, "operation interrupted by button");
                *self.pending = Some(button);
                true
            }
            Ok(None) => false,
            Err(err) => {
                warn!(target: "kiosk.controller", error = %err, "button poll failed");
                false
            }
        }
    }
}

fn hold(settings: &KioskSettings, interrupts: &mut Interrupts<'_>) {
    pause(settings.message_hold, settings.capture_poll, || interrupts.check());
}

pub fn enroll<S, D>(
    station: &mut Station<S, D>,
    resolver: &IdentityResolver,
    settings: &KioskSettings,
    interrupts: &mut Interrupts<'_>,
) -> AppResult<OperationOutcome>
where
    S: FingerprintSensor,
    D: TextDisplay,
{
    let Station { sensor, display } = station;
    sensor.initialize()?;
    let usage = resolver.usage(sensor)?;
    info!(target: "kiosk.enroll", used = usage.used, capacity = usage.capacity, "used templates");
    screens::show(display, &Screen::template_usage(usage));
    if !pause(settings.message_hold, settings.capture_poll, || interrupts.check()) {
        return Ok(OperationOutcome::Cancelled);
    }

    screens::show(display, &Screen::waiting_for_finger());
    let policy = settings.foreground_capture();
    if wait_for_capture(sensor, &policy, || interrupts.check())?.is_none() {
        return Ok(OperationOutcome::Cancelled);
    }

    let outcome = resolver.enroll(sensor, |sensor| {
        screens::show(display, &Screen::remove_finger());
        if !pause(settings.message_hold, settings.capture_poll, || interrupts.check()) {
            return Ok(false);
        }
        screens::show(display, &Screen::waiting_for_same_finger());
        if !pause(settings.represent_delay, settings.capture_poll, || interrupts.check()) {
            return Ok(false);
        }
        Ok(wait_for_capture(sensor, &policy, || interrupts.check())?.is_some())
    })?;

    let outcome = match outcome {
        EnrollOutcome::Enrolled(position) => {
            info!(target: "kiosk.enroll", position, "finger enrolled");
            screens::show(display, &Screen::enrolled(position));
            OperationOutcome::Enrolled(position)
        }
        EnrollOutcome::Conflict(position) => {
            info!(target: "kiosk.enroll", position, "template exists");
            screens::show(display, &Screen::template_exists(position));
            OperationOutcome::AlreadyEnrolled(position)
        }
        EnrollOutcome::Cancelled => return Ok(OperationOutcome::Cancelled),
    };
    hold(settings, interrupts);
    Ok(outcome)
}

pub fn delete<S, D, P>(
    station: &mut Station<S, D>,
    resolver: &IdentityResolver,
    settings: &KioskSettings,
    positions: &mut P,
    interrupts: &mut Interrupts<'_>,
) -> AppResult<OperationOutcome>
where
    S: FingerprintSensor,
    D: TextDisplay,
    P: PositionSource + ?Sized,
{
    let Station { sensor, display } = station;
    sensor.initialize()?;
    let usage = resolver.usage(sensor)?;
    info!(target: "kiosk.delete", used = usage.used, capacity = usage.capacity, "used templates");
    screens::show(display, &Screen::template_usage(usage));
    if !pause(settings.message_hold, settings.capture_poll, || interrupts.check()) {
        return Ok(OperationOutcome::Cancelled);
    }

    screens::show(display, &Screen::enter_position());
    let Some(position) = positions.request_position(&mut || interrupts.check())? else {
        return Ok(OperationOutcome::Cancelled);
    };

    let outcome = match resolver.delete(sensor, position)? {
        DeleteOutcome::Deleted(position) => {
            screens::show(display, &Screen::deleted());
            OperationOutcome::Deleted(position)
        }
        DeleteOutcome::NotFound(position) => {
            info!(target: "kiosk.delete", position, "no template at position");
            screens::show(display, &Screen::delete_failed());
            OperationOutcome::NothingToDelete(position)
        }
    };
    hold(settings, interrupts);
    Ok(outcome)
}

pub fn toggle_liveness<D>(
    display: &mut D,
    flags: &ControlFlags,
    settings: &KioskSettings,
    interrupts: &mut Interrupts<'_>,
) -> AppResult<OperationOutcome>
where
    D: TextDisplay + ?Sized,
{
    let enabled = flags.toggle_spoof_check();
    info!(target: "kiosk.controller", enabled, "spoof check toggled");
    screens::show(display, &Screen::spoof_guard(enabled));
    hold(settings, interrupts);
    Ok(OperationOutcome::SpoofCheck(enabled))
}

pub fn return_to_menu(
    settings: &KioskSettings,
    interrupts: &mut Interrupts<'_>,
) -> AppResult<OperationOutcome> {
    hold(settings, interrupts);
    Ok(OperationOutcome::Menu)
}
