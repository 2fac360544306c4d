//! NvAPI driver module.

use std::ffi::c_void;
use std::ptr::NonNull;

use libloading::Library;
use tracing::debug;

use crate::capability::CapabilityProvider;
use crate::error::{Error, Result};

/// Name of the vendor driver module.
#[cfg(target_pointer_width = "64")]
pub const LIBRARY: &str = "nvapi64.dll";
#[cfg(not(target_pointer_width = "64"))]
pub const LIBRARY: &str = "nvapi.dll";

/// Bootstrap symbol used to resolve every other driver function.
const QUERY_INTERFACE: &[u8] = b"nvapi_QueryInterface\0";

type QueryInterfaceFn = unsafe extern "C" fn(id: u32) -> *mut c_void;

/// Loaded NvAPI module.
///
/// The module stays loaded until this handle is dropped.
pub struct DriverHandle {
    query_interface: QueryInterfaceFn,
    _library: Library,
}

impl DriverHandle {
    /// Load the driver module and resolve its query interface.
    pub fn acquire() -> Result<Self> {
        debug!("Loading {}", LIBRARY);

        // SAFETY: NvAPI has no library initialization routines with preconditions.
        let library = unsafe { Library::new(LIBRARY) }
            .map_err(|source| Error::DriverLoad { library: LIBRARY, source })?;

        // SAFETY: The exported query interface matches `QueryInterfaceFn`, and the pointer is
        // stored next to the library that keeps it valid.
        let query_interface = match unsafe { library.get::<QueryInterfaceFn>(QUERY_INTERFACE) } {
            Ok(symbol) => *symbol,
            Err(err) => {
                debug!("Missing bootstrap symbol: {}", err);
                return Err(Error::CapabilityUnavailable("nvapi_QueryInterface"));
            },
        };

        Ok(Self { query_interface, _library: library })
    }
}

impl CapabilityProvider for DriverHandle {
    fn query(&self, id: u32) -> Option<NonNull<c_void>> {
        // SAFETY: The query interface accepts arbitrary IDs and returns NULL for unknown ones.
        NonNull::new(unsafe { (self.query_interface)(id) })
    }
}

impl Drop for DriverHandle {
    fn drop(&mut self) {
        debug!("Releasing {}", LIBRARY);
    }
}
