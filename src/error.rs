//! Error types.

use std::fmt::{self, Display, Formatter};
use std::io;

use thiserror::Error;

use crate::capability::Capability;

pub type Result<T> = std::result::Result<T, Error>;

/// Result of a single driver call.
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Everything that can go wrong between loading the driver and writing a vibrance level.
#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to load {library}: {source}")]
    DriverLoad {
        library: &'static str,
        #[source]
        source: libloading::Error,
    },

    #[error("failed to load `{0}`")]
    CapabilityUnavailable(&'static str),

    #[error("failed to initialize NvAPI: {0}")]
    Initialization(Status),

    #[error("unable to determine display count")]
    NoDisplays,

    #[error("unable to determine primary display")]
    NoPrimaryDisplay,

    #[error("invalid display number {index} (connected displays: 1-{count})")]
    InvalidDisplayIndex { index: usize, count: usize },

    #[error("failed to get handle for display {display}: {status}")]
    DisplayHandle { display: usize, status: Status },

    #[error("failed to get vibrance info for display {display}: {status}")]
    InfoFetch { display: usize, status: Status },

    #[error("value {value} out of range [{min}, {max}]")]
    OutOfRange { value: u32, min: u32, max: u32 },

    #[error("failed to set vibrance for display {display}: {status}")]
    DriverWrite { display: usize, status: Status },

    #[error("display {display} reports an empty vibrance range [{min}, {max}]")]
    DegenerateRange { display: usize, min: u32, max: u32 },

    #[error("interrupted")]
    Interrupted,

    #[error("unable to acquire instance lock: {0}")]
    InstanceLock(#[source] io::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Failure of a single driver call, before it is attributed to a display.
#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("`{}` is not exported by the driver", .0.name())]
    Unavailable(Capability),

    #[error("{0}")]
    Status(Status),
}

impl DriverError {
    /// Attribute a failed call to a display, using `f` to build the error for non-OK statuses.
    pub fn into_error(self, f: impl FnOnce(Status) -> Error) -> Error {
        match self {
            Self::Unavailable(capability) => Error::CapabilityUnavailable(capability.name()),
            Self::Status(status) => f(status),
        }
    }
}

/// Raw NvAPI status code.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Status(pub i32);

impl Status {
    pub const OK: Self = Self(0);

    /// Convert a raw status code into a `Result`.
    pub fn check(code: i32) -> std::result::Result<(), Self> {
        match Self(code) {
            Self::OK => Ok(()),
            status => Err(status),
        }
    }

    fn name(self) -> Option<&'static str> {
        let name = match self.0 {
            0 => "NVAPI_OK",
            -1 => "NVAPI_ERROR",
            -2 => "NVAPI_LIBRARY_NOT_FOUND",
            -3 => "NVAPI_NO_IMPLEMENTATION",
            -4 => "NVAPI_API_NOT_INITIALIZED",
            -5 => "NVAPI_INVALID_ARGUMENT",
            -6 => "NVAPI_NVIDIA_DEVICE_NOT_FOUND",
            -7 => "NVAPI_END_ENUMERATION",
            -8 => "NVAPI_INVALID_HANDLE",
            -9 => "NVAPI_INCOMPATIBLE_STRUCT_VERSION",
            -10 => "NVAPI_HANDLE_INVALIDATED",
            _ => return None,
        };
        Some(name)
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({})", name, self.0),
            None => write!(f, "status {}", self.0),
        }
    }
}
