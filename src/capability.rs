//! NvAPI function resolution.
//!
//! NvAPI exports a single query function. Every other entry point is looked up through it by a
//! fixed numeric ID, several of which are undocumented.

use std::cell::Cell;
use std::ffi::c_void;
use std::mem;
use std::ptr::{self, NonNull};

use tracing::{debug, trace};

use crate::error::{DriverError, DriverResult, Error, Result, Status};
use crate::vibrance::{DisplayHandle, VibranceDriver, VibranceInfo};

type InitializeFn = unsafe extern "C" fn() -> i32;
type EnumNvidiaDisplayHandleFn = unsafe extern "C" fn(index: u32, handle: *mut *mut c_void) -> i32;
type GetDvcInfoFn =
    unsafe extern "C" fn(handle: *mut c_void, output: u32, info: *mut VibranceInfo) -> i32;
type SetDvcLevelFn = unsafe extern "C" fn(handle: *mut c_void, output: u32, level: u32) -> i32;

/// Driver functions required for vibrance control.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Capability {
    Initialize,
    EnumNvidiaDisplayHandle,
    GetDvcInfo,
    SetDvcLevel,
}

impl Capability {
    /// Query interface ID.
    pub const fn id(self) -> u32 {
        match self {
            Self::Initialize => 0x0150_e828,
            Self::EnumNvidiaDisplayHandle => 0x9abd_d40d,
            // Undocumented.
            Self::GetDvcInfo => 0x4085_de45,
            // Undocumented.
            Self::SetDvcLevel => 0x1724_09b4,
        }
    }

    /// Driver function name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Initialize => "NvAPI_Initialize",
            Self::EnumNvidiaDisplayHandle => "NvAPI_EnumNvidiaDisplayHandle",
            Self::GetDvcInfo => "NvAPI_GetDVCInfo",
            Self::SetDvcLevel => "NvAPI_SetDVCLevel",
        }
    }
}

/// Source of raw driver function pointers.
pub trait CapabilityProvider {
    /// Look up a function by its query interface ID.
    fn query(&self, id: u32) -> Option<NonNull<c_void>>;
}

/// Initialized driver with lazily resolved functions.
///
/// Owns its provider, so dropping the table releases the driver.
pub struct CapabilityTable<P> {
    provider: P,
    resolved: [Cell<Option<NonNull<c_void>>>; 4],
}

impl<P: CapabilityProvider> CapabilityTable<P> {
    /// Initialize the driver.
    ///
    /// This is the only way to construct a table, so no other function can be called before
    /// `NvAPI_Initialize` succeeded.
    pub fn initialize(provider: P) -> Result<Self> {
        let table = Self { provider, resolved: Default::default() };

        // SAFETY: `InitializeFn` is the signature of `NvAPI_Initialize`.
        let initialize = unsafe { table.function::<InitializeFn>(Capability::Initialize) }
            .map_err(|err| err.into_error(Error::Initialization))?;

        trace!("{}()", Capability::Initialize.name());
        // SAFETY: Takes no arguments.
        Status::check(unsafe { initialize() }).map_err(Error::Initialization)?;

        debug!("NvAPI initialized");

        Ok(table)
    }

    /// Resolve a capability, reusing earlier lookups.
    pub fn resolve(&self, capability: Capability) -> DriverResult<NonNull<c_void>> {
        let slot = &self.resolved[capability as usize];
        if let Some(function) = slot.get() {
            return Ok(function);
        }

        debug!("Resolving {} ({:#010x})", capability.name(), capability.id());
        let function =
            self.provider.query(capability.id()).ok_or(DriverError::Unavailable(capability))?;
        slot.set(Some(function));

        Ok(function)
    }

    /// Resolve a capability as a typed function pointer.
    ///
    /// # Safety
    ///
    /// `F` must be the function pointer type matching the driver's signature for `capability`.
    unsafe fn function<F: Copy>(&self, capability: Capability) -> DriverResult<F> {
        debug_assert_eq!(mem::size_of::<F>(), mem::size_of::<*mut c_void>());
        let function = self.resolve(capability)?;
        Ok(mem::transmute_copy::<*mut c_void, F>(&function.as_ptr()))
    }
}

impl<P: CapabilityProvider> VibranceDriver for CapabilityTable<P> {
    fn display_handle(&self, index: u32) -> DriverResult<DisplayHandle> {
        // SAFETY: Signature of `NvAPI_EnumNvidiaDisplayHandle`.
        let enum_display_handle = unsafe {
            self.function::<EnumNvidiaDisplayHandleFn>(Capability::EnumNvidiaDisplayHandle)?
        };

        trace!("{}({})", Capability::EnumNvidiaDisplayHandle.name(), index);
        let mut handle: *mut c_void = ptr::null_mut();
        // SAFETY: `handle` is a valid output location.
        let status = unsafe { enum_display_handle(index, &mut handle) };
        Status::check(status).map_err(DriverError::Status)?;

        Ok(DisplayHandle::from_ptr(handle))
    }

    fn vibrance_info(&self, handle: DisplayHandle) -> DriverResult<VibranceInfo> {
        // SAFETY: Signature of `NvAPI_GetDVCInfo`.
        let get_dvc_info = unsafe { self.function::<GetDvcInfoFn>(Capability::GetDvcInfo)? };

        trace!("{}({:?})", Capability::GetDvcInfo.name(), handle);
        let mut info = VibranceInfo::new();
        // SAFETY: `info` is a correctly versioned output struct.
        let status = unsafe { get_dvc_info(handle.as_ptr(), 0, &mut info) };
        Status::check(status).map_err(DriverError::Status)?;

        Ok(info)
    }

    fn set_vibrance_level(&self, handle: DisplayHandle, level: u32) -> DriverResult<()> {
        // SAFETY: Signature of `NvAPI_SetDVCLevel`.
        let set_dvc_level = unsafe { self.function::<SetDvcLevelFn>(Capability::SetDvcLevel)? };

        trace!("{}({:?}, {})", Capability::SetDvcLevel.name(), handle, level);
        // SAFETY: Only plain values are passed.
        let status = unsafe { set_dvc_level(handle.as_ptr(), 0, level) };
        Status::check(status).map_err(DriverError::Status)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;

    use super::*;

    thread_local! {
        static INITIALIZE_STATUS: Cell<i32> = Cell::new(0);
        static INITIALIZE_CALLS: Cell<usize> = Cell::new(0);
        static WRITES: RefCell<Vec<(usize, u32)>> = RefCell::new(Vec::new());
    }

    const DISPLAYS: u32 = 2;
    const HANDLE_BASE: usize = 0x1000;

    unsafe extern "C" fn fake_initialize() -> i32 {
        INITIALIZE_CALLS.with(|calls| calls.set(calls.get() + 1));
        INITIALIZE_STATUS.with(Cell::get)
    }

    unsafe extern "C" fn fake_enum_display_handle(index: u32, handle: *mut *mut c_void) -> i32 {
        if index >= DISPLAYS {
            return -7;
        }
        *handle = (HANDLE_BASE + index as usize) as *mut c_void;
        0
    }

    unsafe extern "C" fn fake_get_dvc_info(
        handle: *mut c_void,
        _output: u32,
        info: *mut VibranceInfo,
    ) -> i32 {
        if (*info).version != VibranceInfo::VERSION {
            return -9;
        }
        if handle as usize != HANDLE_BASE {
            return -8;
        }
        (*info).current = 50;
        (*info).min = 0;
        (*info).max = 63;
        0
    }

    unsafe extern "C" fn fake_set_dvc_level(handle: *mut c_void, _output: u32, level: u32) -> i32 {
        WRITES.with(|writes| writes.borrow_mut().push((handle as usize, level)));
        if level > 63 {
            -5
        } else {
            0
        }
    }

    /// Provider serving the fake driver functions above.
    struct FakeProvider {
        functions: HashMap<u32, NonNull<c_void>>,
        queries: Rc<Cell<usize>>,
    }

    impl FakeProvider {
        fn new() -> Self {
            let functions = [
                (Capability::Initialize, fake_initialize as InitializeFn as *mut c_void),
                (
                    Capability::EnumNvidiaDisplayHandle,
                    fake_enum_display_handle as EnumNvidiaDisplayHandleFn as *mut c_void,
                ),
                (Capability::GetDvcInfo, fake_get_dvc_info as GetDvcInfoFn as *mut c_void),
                (Capability::SetDvcLevel, fake_set_dvc_level as SetDvcLevelFn as *mut c_void),
            ];

            let functions = functions
                .into_iter()
                .map(|(capability, function)| (capability.id(), NonNull::new(function).unwrap()))
                .collect();

            Self { functions, queries: Rc::new(Cell::new(0)) }
        }

        fn without(mut self, capability: Capability) -> Self {
            self.functions.remove(&capability.id());
            self
        }
    }

    impl CapabilityProvider for FakeProvider {
        fn query(&self, id: u32) -> Option<NonNull<c_void>> {
            self.queries.set(self.queries.get() + 1);
            self.functions.get(&id).copied()
        }
    }

    #[test]
    fn version_tag() {
        assert_eq!(VibranceInfo::VERSION, 0x10010);
        assert_eq!(VibranceInfo::new().version, VibranceInfo::VERSION);
    }

    #[test]
    fn initialize_once() {
        let table = CapabilityTable::initialize(FakeProvider::new()).unwrap();
        table.display_handle(0).unwrap();
        assert_eq!(INITIALIZE_CALLS.with(Cell::get), 1);
    }

    #[test]
    fn initialize_rejected() {
        INITIALIZE_STATUS.with(|status| status.set(-6));
        let result = CapabilityTable::initialize(FakeProvider::new());
        assert!(matches!(result, Err(Error::Initialization(Status(-6)))));
    }

    #[test]
    fn initialize_unavailable() {
        let provider = FakeProvider::new().without(Capability::Initialize);
        let result = CapabilityTable::initialize(provider);
        assert!(matches!(result, Err(Error::CapabilityUnavailable("NvAPI_Initialize"))));
    }

    #[test]
    fn resolution_is_memoized() {
        let provider = FakeProvider::new();
        let queries = provider.queries.clone();
        let table = CapabilityTable::initialize(provider).unwrap();
        assert_eq!(queries.get(), 1);

        for _ in 0..3 {
            table.display_handle(0).unwrap();
        }
        assert_eq!(queries.get(), 2);
    }

    #[test]
    fn missing_capability() {
        let provider = FakeProvider::new().without(Capability::SetDvcLevel);
        let table = CapabilityTable::initialize(provider).unwrap();

        let handle = table.display_handle(0).unwrap();
        assert!(table.vibrance_info(handle).is_ok());
        assert_eq!(
            table.set_vibrance_level(handle, 10),
            Err(DriverError::Unavailable(Capability::SetDvcLevel))
        );
    }

    #[test]
    fn display_handle_status() {
        let table = CapabilityTable::initialize(FakeProvider::new()).unwrap();
        assert_eq!(table.display_handle(1), Ok(DisplayHandle::from_ptr((HANDLE_BASE + 1) as _)));
        assert_eq!(table.display_handle(DISPLAYS), Err(DriverError::Status(Status(-7))));
    }

    #[test]
    fn vibrance_info_is_versioned() {
        let table = CapabilityTable::initialize(FakeProvider::new()).unwrap();
        let handle = table.display_handle(0).unwrap();

        let info = table.vibrance_info(handle).unwrap();
        assert_eq!(info.version, VibranceInfo::VERSION);
        assert_eq!((info.current, info.min, info.max), (50, 0, 63));
    }

    #[test]
    fn set_level_passes_arguments() {
        let table = CapabilityTable::initialize(FakeProvider::new()).unwrap();
        let handle = table.display_handle(0).unwrap();

        assert_eq!(table.set_vibrance_level(handle, 42), Ok(()));
        assert_eq!(table.set_vibrance_level(handle, 64), Err(DriverError::Status(Status(-5))));
        assert_eq!(WRITES.with(|writes| writes.borrow().clone()), [
            (HANDLE_BASE, 42),
            (HANDLE_BASE, 64)
        ]);
    }
}
