//! Digital vibrance control for a single display.

use std::ffi::c_void;
use std::fmt::{self, Display, Formatter};
use std::mem;

#[cfg(test)]
use mockall::automock;
use tracing::debug;

use crate::error::{DriverError, DriverResult, Error, Result};

/// Opaque driver handle of a display.
///
/// Numbered independently of the 1-based display index.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DisplayHandle(usize);

impl DisplayHandle {
    pub fn from_ptr(ptr: *mut c_void) -> Self {
        Self(ptr as usize)
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0 as *mut c_void
    }
}

/// Digital vibrance control info, as filled in by `NvAPI_GetDVCInfo`.
///
/// All levels are in raw driver units.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct VibranceInfo {
    pub version: u32,
    pub current: u32,
    pub min: u32,
    pub max: u32,
}

impl VibranceInfo {
    /// Structure version expected by the driver.
    pub const VERSION: u32 = mem::size_of::<Self>() as u32 | 0x10000;

    /// Empty info, ready to be populated by the driver.
    pub fn new() -> Self {
        Self { version: Self::VERSION, ..Default::default() }
    }

    /// Convert a raw level to a percentage of the range.
    ///
    /// Returns `None` if the range is empty.
    pub fn to_percent(&self, value: u32) -> Option<u32> {
        let range = self.range()?;
        let offset = value.saturating_sub(self.min);
        Some((f64::from(offset) / range * 100.).round() as u32)
    }

    /// Convert a percentage of the range to a raw level.
    ///
    /// Percentages above 100 produce levels above `max`. Returns `None` if the range is empty.
    pub fn to_raw(&self, percent: u32) -> Option<u32> {
        let range = self.range()?;
        Some((f64::from(percent) / 100. * range + f64::from(self.min)).round() as u32)
    }

    fn range(&self) -> Option<f64> {
        (self.max > self.min).then(|| f64::from(self.max - self.min))
    }
}

/// Driver functions needed to control vibrance.
#[cfg_attr(test, automock)]
pub trait VibranceDriver {
    /// Get the driver handle for a 0-based display index.
    fn display_handle(&self, index: u32) -> DriverResult<DisplayHandle>;

    /// Read the current vibrance info.
    fn vibrance_info(&self, handle: DisplayHandle) -> DriverResult<VibranceInfo>;

    /// Write a raw vibrance level.
    fn set_vibrance_level(&self, handle: DisplayHandle, level: u32) -> DriverResult<()>;
}

/// Vibrance level readable through `get`.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub enum Field {
    #[default]
    Current,
    Min,
    Max,
}

/// Result of a successful `set`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SetOutcome {
    /// Level was already at the target, nothing was written.
    Unchanged,
    /// Level was written to the driver.
    Changed { from: u32, to: u32 },
}

/// Vibrance controller for one display.
///
/// Levels are read once at construction. Writes issued through this controller update the
/// snapshot, changes made by anything else are not picked up.
pub struct VibranceController<'a, D> {
    driver: &'a D,
    display: usize,
    primary: bool,
    handle: DisplayHandle,
    info: VibranceInfo,
}

impl<'a, D: VibranceDriver> VibranceController<'a, D> {
    /// Create a controller for the 1-based `display`.
    pub fn new(driver: &'a D, display: usize, primary: bool) -> Result<Self> {
        debug_assert!(display >= 1);
        let index = display.saturating_sub(1) as u32;

        let handle = driver
            .display_handle(index)
            .map_err(|err| err.into_error(|status| Error::DisplayHandle { display, status }))?;

        let info = driver
            .vibrance_info(handle)
            .map_err(|err| err.into_error(|status| Error::InfoFetch { display, status }))?;

        let controller = Self { driver, display, primary, handle, info };
        debug!(
            "Display {}: handle {:?}, version {:#x}, current {}, range [{}, {}]",
            controller.display, handle, info.version, info.current, info.min, info.max
        );

        Ok(controller)
    }

    /// 1-based display index.
    pub fn display(&self) -> usize {
        self.display
    }

    /// Read a level from the snapshot, as a percentage unless `raw` is set.
    pub fn get(&self, field: Field, raw: bool) -> Result<u32> {
        let value = match field {
            Field::Current => self.info.current,
            Field::Min => self.info.min,
            Field::Max => self.info.max,
        };

        if raw {
            Ok(value)
        } else {
            self.to_percent(value)
        }
    }

    /// Set the vibrance level.
    ///
    /// `requested` is a percentage unless `raw` is set. Setting the current level is a no-op.
    pub fn set(&mut self, raw: bool, requested: u32) -> Result<SetOutcome> {
        let target = if raw {
            requested
        } else if requested > 100 {
            return Err(Error::OutOfRange { value: requested, min: 0, max: 100 });
        } else {
            self.to_raw(requested)?
        };

        let VibranceInfo { current, min, max, .. } = self.info;
        if target < min || target > max {
            return Err(Error::OutOfRange { value: target, min, max });
        }

        if target == current {
            return Ok(SetOutcome::Unchanged);
        }

        self.driver.set_vibrance_level(self.handle, target).map_err(|err| {
            err.into_error(|status| Error::DriverWrite { display: self.display, status })
        })?;
        self.info.current = target;

        Ok(SetOutcome::Changed { from: current, to: target })
    }

    /// Set vibrance to its maximum.
    pub fn enable(&mut self) -> Result<SetOutcome> {
        self.set(true, self.info.max)
    }

    /// Set vibrance to its minimum.
    pub fn disable(&mut self) -> Result<SetOutcome> {
        self.set(true, self.info.min)
    }

    /// Disable vibrance if it is above the minimum, otherwise enable it.
    pub fn toggle(&mut self) -> Result<SetOutcome> {
        if self.info.current > self.info.min {
            self.disable()
        } else {
            self.enable()
        }
    }

    fn to_percent(&self, value: u32) -> Result<u32> {
        self.info.to_percent(value).ok_or_else(|| self.degenerate_range())
    }

    fn to_raw(&self, percent: u32) -> Result<u32> {
        self.info.to_raw(percent).ok_or_else(|| self.degenerate_range())
    }

    fn degenerate_range(&self) -> Error {
        Error::DegenerateRange { display: self.display, min: self.info.min, max: self.info.max }
    }
}

impl<'a, D> Display for VibranceController<'a, D> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let VibranceInfo { current, min, max, .. } = self.info;

        let marker = if self.primary { "*" } else { "" };
        writeln!(f, "Display {}{}", self.display, marker)?;

        match self.info.to_percent(current) {
            Some(percent) => writeln!(f, "Current DV: {:<4}({}%)", current, percent)?,
            None => writeln!(f, "Current DV: {:<4}(-)", current)?,
        }
        writeln!(f, "Minimum DV: {:<4}(0%)", min)?;
        write!(f, "Maximum DV: {:<4}(100%)", max)
    }
}
