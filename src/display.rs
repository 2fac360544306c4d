//! Connected display discovery.
//!
//! Displays are numbered from 1 in the order the OS reports them. This numbering is independent
//! of NvAPI's display handles.

#[cfg(test)]
use mockall::automock;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// OS display enumeration.
#[cfg_attr(test, automock)]
pub trait DisplayEnumerator {
    /// Number of connected displays.
    fn display_count(&self) -> Result<usize>;

    /// 1-based index of the primary display.
    fn primary_display(&self) -> Result<usize>;
}

/// Displays targeted by a command.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub enum Targets {
    #[default]
    Primary,
    Displays(Vec<usize>),
    All,
}

impl Targets {
    /// Resolve the 1-based display indices against the currently connected displays.
    pub fn resolve(&self, displays: &impl DisplayEnumerator) -> Result<Vec<usize>> {
        // Primary and display count come from different OS APIs and may disagree.
        let (targets, count) = match self {
            Self::Primary => (vec![displays.primary_display()?], displays.display_count()?),
            Self::Displays(indices) => (indices.clone(), displays.display_count()?),
            Self::All => {
                let count = displays.display_count()?;
                ((1..=count).collect(), count)
            },
        };

        if let Some(&index) = targets.iter().find(|&&index| index < 1 || index > count) {
            return Err(Error::InvalidDisplayIndex { index, count });
        }

        debug!("Target displays: {:?}", targets);

        Ok(targets)
    }
}

/// Primary display, if the OS reports one.
///
/// Only used for marking output when the targets were chosen explicitly.
pub fn primary_marker(displays: &impl DisplayEnumerator) -> Option<usize> {
    match displays.primary_display() {
        Ok(primary) => Some(primary),
        Err(err) => {
            warn!("Unable to mark primary display: {}", err);
            None
        },
    }
}

/// Displays reported by the operating system.
pub struct SystemDisplays;

#[cfg(windows)]
impl DisplayEnumerator for SystemDisplays {
    fn display_count(&self) -> Result<usize> {
        use std::ptr;

        use windows_sys::Win32::Foundation::{BOOL, LPARAM, RECT, TRUE};
        use windows_sys::Win32::Graphics::Gdi::{EnumDisplayMonitors, HDC, HMONITOR};

        unsafe extern "system" fn count_monitor(
            _monitor: HMONITOR,
            _hdc: HDC,
            _rect: *mut RECT,
            data: LPARAM,
        ) -> BOOL {
            *(data as *mut usize) += 1;
            TRUE
        }

        let mut count = 0usize;
        // SAFETY: `count` outlives the enumeration and is only accessed by the callback.
        unsafe {
            EnumDisplayMonitors(
                ptr::null_mut(),
                ptr::null(),
                Some(count_monitor),
                &mut count as *mut usize as LPARAM,
            );
        }

        debug!("Found {} display(s)", count);

        match count {
            0 => Err(Error::NoDisplays),
            count => Ok(count),
        }
    }

    fn primary_display(&self) -> Result<usize> {
        use std::mem;

        use windows_sys::Win32::Graphics::Gdi::{EnumDisplayDevicesW, DISPLAY_DEVICEW};

        const DISPLAY_DEVICE_PRIMARY_DEVICE: u32 = 0x4;

        for index in 0.. {
            // SAFETY: `DISPLAY_DEVICEW` is plain data, valid when zeroed.
            let mut device: DISPLAY_DEVICEW = unsafe { mem::zeroed() };
            device.cb = mem::size_of::<DISPLAY_DEVICEW>() as u32;

            // SAFETY: `device` is a valid, correctly sized output struct.
            if unsafe { EnumDisplayDevicesW(std::ptr::null(), index, &mut device, 0) } == 0 {
                break;
            }

            if device.StateFlags & DISPLAY_DEVICE_PRIMARY_DEVICE != 0 {
                debug!("Primary display is {}", index + 1);
                return Ok(index as usize + 1);
            }
        }

        Err(Error::NoPrimaryDisplay)
    }
}

#[cfg(not(windows))]
impl DisplayEnumerator for SystemDisplays {
    fn display_count(&self) -> Result<usize> {
        Err(Error::NoDisplays)
    }

    fn primary_display(&self) -> Result<usize> {
        Err(Error::NoPrimaryDisplay)
    }
}
