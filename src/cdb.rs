//! Native access to SOFiSTiK CDB result databases through the vendor
//! `sof_cdb` library, loaded at runtime.

use std::ffi::CString;
use std::os::raw::{c_char, c_int, c_void};
use std::path::Path;

use libloading::Library;

use crate::{
    datatypes::{RawRecord, Selector},
    error::FlambError,
    results::ResultStore,
};

/// Base name of the vendor library; the platform prefix and extension are
/// added by [`libloading::library_filename`]
pub const CDB_LIBRARY_NAME: &str = "sof_cdb_w-2024";

/// `sof_cdb_init` mode used to bind an existing database
pub const CDB_INDEX: c_int = 99;

/// Node record, key 20/0
#[repr(C)]
#[allow(dead_code)]
#[derive(Debug, Default, Clone, Copy)]
struct CNode {
    nr: c_int,
    inr: c_int,
    kfix: c_int,
    ncod: c_int,
    xyz: [f32; 3],
}

/// Nodal displacement record, key 24/lc
#[repr(C)]
#[allow(dead_code)]
#[derive(Debug, Default, Clone, Copy)]
struct CNodeDisplacement {
    nr: c_int,
    ux: f32,
    uy: f32,
    uz: f32,
    urx: f32,
    ury: f32,
    urz: f32,
    urb: f32,
}

type InitFn = unsafe extern "C" fn(name: *const c_char, init_type: c_int) -> c_int;
type StatusFn = unsafe extern "C" fn(index: c_int) -> c_int;
type CloseFn = unsafe extern "C" fn(index: c_int) -> c_int;
type GetFn = unsafe extern "C" fn(
    index: c_int,
    kwh: c_int,
    kwl: c_int,
    data: *mut c_void,
    rec_len: *mut c_int,
    pos: c_int,
) -> c_int;

/// Entry points resolved from the vendor library
///
/// The function pointers are only valid while `_library` is loaded.
struct CdbApi {
    init: InitFn,
    status: StatusFn,
    close: CloseFn,
    get: GetFn,
    _library: Library,
}

/// Dependent DLLs sit next to the CDB library, so Windows has to search its
/// directory as well
#[cfg(windows)]
fn open_library(path: &Path) -> Result<Library, libloading::Error> {
    use libloading::os::windows::{Library as WindowsLibrary, LOAD_WITH_ALTERED_SEARCH_PATH};

    unsafe { WindowsLibrary::load_with_flags(path, LOAD_WITH_ALTERED_SEARCH_PATH) }
        .map(Library::from)
}

#[cfg(not(windows))]
fn open_library(path: &Path) -> Result<Library, libloading::Error> {
    unsafe { Library::new(path) }
}

/// Copies the function pointer exported as `name` (nul-terminated)
///
/// # Safety
/// `T` must match the exported function's signature.
unsafe fn symbol<T: Copy>(library: &Library, name: &[u8], path: &Path) -> Result<T, FlambError> {
    match library.get::<T>(name) {
        Ok(s) => Ok(*s),
        Err(err) => Err(FlambError::Store(format!(
            "{} does not export {}: {err}",
            path.display(),
            String::from_utf8_lossy(name.strip_suffix(b"\0").unwrap_or(name))
        ))),
    }
}

impl CdbApi {
    fn load(path: &Path) -> Result<CdbApi, FlambError> {
        let library = match open_library(path) {
            Ok(l) => l,
            Err(err) => {
                return Err(FlambError::Store(format!(
                    "Unable to load CDB library {}: {err}",
                    path.display()
                )))
            }
        };

        unsafe {
            let init = symbol::<InitFn>(&library, b"sof_cdb_init\0", path)?;
            let status = symbol::<StatusFn>(&library, b"sof_cdb_status\0", path)?;
            let close = symbol::<CloseFn>(&library, b"sof_cdb_close\0", path)?;
            let get = symbol::<GetFn>(&library, b"sof_cdb_get\0", path)?;

            Ok(CdbApi {
                init,
                status,
                close,
                get,
                _library: library,
            })
        }
    }

    /// Reads `T` from the next record of `kwh/kwl`; the library returns 0
    /// when a record was copied and 1 or 2 at the end of the key or file
    fn get_record<T: Default>(&self, index: c_int, kwh: c_int, kwl: c_int) -> Option<T> {
        let mut record = T::default();
        let mut rec_len = std::mem::size_of::<T>() as c_int;

        let status = unsafe {
            (self.get)(
                index,
                kwh,
                kwl,
                &mut record as *mut T as *mut c_void,
                &mut rec_len,
                1,
            )
        };

        if status == 0 {
            Some(record)
        } else {
            None
        }
    }
}

/// Result store backed by the SOFiSTiK CDB library
pub struct CdbStore {
    api: CdbApi,
    index: Option<c_int>,
}

impl CdbStore {
    /// Loads the vendor library from `library`
    ///
    /// # Arguments
    /// * `library` - Full path to `sof_cdb_w-2024.dll` (or the platform
    ///   equivalent)
    pub fn load(library: &Path) -> Result<CdbStore, FlambError> {
        Ok(CdbStore {
            api: CdbApi::load(library)?,
            index: None,
        })
    }
}

impl ResultStore for CdbStore {
    fn open(&mut self, path: &Path) -> Result<i32, FlambError> {
        let name = match path.to_str().map(CString::new) {
            Some(Ok(n)) => n,
            _ => {
                return Err(FlambError::Store(format!(
                    "Unusable result database path {}",
                    path.display()
                )))
            }
        };

        let (index, status) = unsafe {
            let index = (self.api.init)(name.as_ptr(), CDB_INDEX);
            (index, (self.api.status)(index))
        };
        self.index = Some(index);

        Ok(status)
    }

    fn next_record(&mut self, selector: Selector) -> Option<RawRecord> {
        let index = self.index?;

        match selector.record_type {
            20 => self
                .api
                .get_record::<CNode>(index, selector.record_type, selector.subtype)
                .map(|n| {
                    RawRecord::new(
                        n.nr,
                        n.xyz[0] as f64,
                        n.xyz[1] as f64,
                        n.xyz[2] as f64,
                    )
                }),
            24 => self
                .api
                .get_record::<CNodeDisplacement>(index, selector.record_type, selector.subtype)
                .map(|d| RawRecord::new(d.nr, d.ux as f64, d.uy as f64, d.uz as f64)),
            _ => None,
        }
    }

    fn close(&mut self) -> i32 {
        match self.index.take() {
            Some(index) => unsafe {
                // 0 closes every open database
                (self.api.close)(0);
                (self.api.status)(index)
            },
            None => 0,
        }
    }
}

impl Drop for CdbStore {
    fn drop(&mut self) {
        self.close();
    }
}
