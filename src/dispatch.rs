//! Sequential command execution across displays.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::vibrance::{Field, SetOutcome, VibranceController, VibranceDriver};

/// Command applied to every targeted display.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Print a level.
    Get { field: Field, raw: bool },
    /// Set the level, as a percentage unless `raw` is set.
    Set { value: u32, raw: bool },
    Enable,
    Disable,
    Toggle,
    /// Print the full vibrance info.
    Info,
}

impl Operation {
    /// Apply the operation to a single display, writing any output to `out`.
    pub fn apply<D, W>(&self, controller: &mut VibranceController<'_, D>, out: &mut W) -> Result<()>
    where
        D: VibranceDriver,
        W: Write,
    {
        let outcome = match *self {
            Self::Get { field, raw } => {
                writeln!(out, "{}", controller.get(field, raw)?)?;
                return Ok(());
            },
            Self::Info => {
                writeln!(out, "{}\n", controller)?;
                return Ok(());
            },
            Self::Set { value, raw } => controller.set(raw, value)?,
            Self::Enable => controller.enable()?,
            Self::Disable => controller.disable()?,
            Self::Toggle => controller.toggle()?,
        };

        match outcome {
            SetOutcome::Changed { from, to } => {
                info!("Display {}: vibrance {} -> {}", controller.display(), from, to)
            },
            SetOutcome::Unchanged => info!("Display {}: vibrance unchanged", controller.display()),
        }

        Ok(())
    }
}

/// Applies one operation to a batch of displays, one display at a time.
pub struct Dispatcher<'a, D> {
    driver: &'a D,
    primary: Option<usize>,
    interrupted: &'a AtomicBool,
}

impl<'a, D: VibranceDriver> Dispatcher<'a, D> {
    pub fn new(driver: &'a D, primary: Option<usize>, interrupted: &'a AtomicBool) -> Self {
        Self { driver, primary, interrupted }
    }

    /// Run `operation` on every display in order.
    ///
    /// Each display is fully processed before the next controller is created. The first error
    /// aborts the batch; displays handled before it keep their new levels.
    pub fn apply<W>(&self, operation: &Operation, displays: &[usize], out: &mut W) -> Result<()>
    where
        W: Write,
    {
        for &number in displays {
            if self.interrupted.load(Ordering::SeqCst) {
                return Err(Error::Interrupted);
            }

            debug!("Applying {:?} to display {}", operation, number);

            let primary = self.primary == Some(number);
            let mut controller = VibranceController::new(self.driver, number, primary)?;
            operation.apply(&mut controller, out)?;
        }

        out.flush()?;

        Ok(())
    }
}
