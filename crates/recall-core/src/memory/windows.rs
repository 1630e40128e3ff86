//! Live process access through the Win32 debugging APIs.

use super::{PointerWidth, ProcessImage, ProcessMemoryReader};
use crate::account::{account_from_open_files, format_file_version, ClientInstance};
use crate::error::{RecallError, Result};
use std::ffi::c_void;
use std::path::PathBuf;
use tracing::{debug, info, warn};
use windows_sys::Win32::Foundation::{
    CloseHandle, DuplicateHandle, BOOL, DUPLICATE_SAME_ACCESS, HANDLE, INVALID_HANDLE_VALUE,
};
use windows_sys::Win32::Storage::FileSystem::{
    GetFileType, GetFileVersionInfoSizeW, GetFileVersionInfoW, GetFinalPathNameByHandleW, VerQueryValueW,
    FILE_NAME_NORMALIZED, FILE_TYPE_DISK, VOLUME_NAME_DOS, VS_FIXEDFILEINFO,
};
use windows_sys::Win32::System::Diagnostics::Debug::ReadProcessMemory;
use windows_sys::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, Module32FirstW, Module32NextW, Process32FirstW, Process32NextW,
    MODULEENTRY32W, PROCESSENTRY32W, TH32CS_SNAPMODULE, TH32CS_SNAPMODULE32, TH32CS_SNAPPROCESS,
};
use windows_sys::Win32::System::Threading::{
    GetCurrentProcess, IsWow64Process, OpenProcess, PROCESS_DUP_HANDLE, PROCESS_QUERY_INFORMATION,
    PROCESS_VM_READ,
};

pub const CLIENT_PROCESS: &str = "WeChat.exe";
pub const CLIENT_MODULE: &str = "WeChatWin.dll";

fn wide_to_string(buf: &[u16]) -> String {
    let end = buf.iter().position(|c| *c == 0).unwrap_or(buf.len());
    String::from_utf16_lossy(&buf[..end])
}

struct Snapshot(HANDLE);

impl Snapshot {
    fn new(flags: u32, pid: u32) -> Result<Self> {
        let handle = unsafe { CreateToolhelp32Snapshot(flags, pid) };
        if handle == INVALID_HANDLE_VALUE {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(Self(handle))
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.0);
        }
    }
}

/// Every process whose executable name matches `exe_name`.
pub fn find_processes(exe_name: &str) -> Result<Vec<u32>> {
    let snap = Snapshot::new(TH32CS_SNAPPROCESS, 0)?;
    let mut entry: PROCESSENTRY32W = unsafe { std::mem::zeroed() };
    entry.dwSize = std::mem::size_of::<PROCESSENTRY32W>() as u32;

    let mut pids = Vec::new();
    let mut ok = unsafe { Process32FirstW(snap.0, &mut entry) };
    while ok != 0 {
        if wide_to_string(&entry.szExeFile).eq_ignore_ascii_case(exe_name) {
            pids.push(entry.th32ProcessID);
        }
        ok = unsafe { Process32NextW(snap.0, &mut entry) };
    }
    Ok(pids)
}

/// First process whose executable name matches `exe_name`.
pub fn find_process(exe_name: &str) -> Result<u32> {
    find_processes(exe_name)?
        .into_iter()
        .next()
        .ok_or_else(|| RecallError::ProcessNotFound(exe_name.to_string()))
}

/// Every running client with a logged-in account.
///
/// Processes that cannot be inspected, or that have no account open yet,
/// are logged and skipped.
pub fn discover_clients() -> Result<Vec<ClientInstance>> {
    let mut found = Vec::new();
    for pid in find_processes(CLIENT_PROCESS)? {
        match inspect_client(pid) {
            Ok(Some(client)) => {
                info!(pid, account = %client.location.account_name, version = %client.version, "client found");
                found.push(client);
            }
            Ok(None) => info!(pid, "client has no account open"),
            Err(e) => warn!(pid, error = %e, "client skipped"),
        }
    }
    Ok(found)
}

fn inspect_client(pid: u32) -> Result<Option<ClientInstance>> {
    let process = WindowsProcess::open(pid)?;
    let Some(location) = account_from_open_files(process.open_file_paths()?) else {
        return Ok(None);
    };
    let module = process.module(CLIENT_MODULE)?;
    let version = file_version(&module.path)?;
    Ok(Some(ClientInstance {
        pid,
        pointer_width: process.width.as_str(),
        location,
        version,
        module_base: module.base,
        module_size: module.size,
    }))
}

struct OwnedHandle(HANDLE);

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.0);
        }
    }
}

/// Loaded module as reported by the module snapshot.
#[derive(Debug, Clone)]
pub struct ModuleInfo {
    pub base: u64,
    pub size: u32,
    pub path: PathBuf,
}

fn to_wide(text: &str) -> Vec<u16> {
    text.encode_utf16().chain(std::iter::once(0)).collect()
}

/// `major.minor.build.revision` from a binary's version resource.
pub fn file_version(path: &std::path::Path) -> Result<String> {
    let wide_path = to_wide(&path.to_string_lossy());
    let mut ignored = 0u32;
    let size = unsafe { GetFileVersionInfoSizeW(wide_path.as_ptr(), &mut ignored) };
    if size == 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    let mut block = vec![0u8; size as usize];
    let ok = unsafe { GetFileVersionInfoW(wide_path.as_ptr(), 0, size, block.as_mut_ptr() as *mut c_void) };
    if ok == 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    let root = to_wide("\\");
    let mut fixed: *mut c_void = std::ptr::null_mut();
    let mut len = 0u32;
    let ok = unsafe { VerQueryValueW(block.as_ptr() as *const c_void, root.as_ptr(), &mut fixed, &mut len) };
    if ok == 0 || fixed.is_null() || (len as usize) < std::mem::size_of::<VS_FIXEDFILEINFO>() {
        return Err(RecallError::Unsupported("module has no fixed version info"));
    }
    // points into `block`, which is still alive
    let info = unsafe { std::ptr::read_unaligned(fixed as *const VS_FIXEDFILEINFO) };
    Ok(format_file_version(info.dwFileVersionMS, info.dwFileVersionLS))
}

// System handle table as returned for SystemExtendedHandleInformation.
const SYSTEM_EXTENDED_HANDLE_INFORMATION: u32 = 64;
const STATUS_INFO_LENGTH_MISMATCH: i32 = 0xC000_0004_u32 as i32;
const MAX_HANDLE_TABLE: usize = 1 << 30;

#[repr(C)]
#[derive(Clone, Copy)]
struct HandleEntry {
    object: usize,
    unique_process_id: usize,
    handle_value: usize,
    granted_access: u32,
    creator_back_trace_index: u16,
    object_type_index: u16,
    handle_attributes: u32,
    reserved: u32,
}

#[link(name = "ntdll")]
extern "system" {
    fn NtQuerySystemInformation(class: u32, info: *mut c_void, len: u32, return_len: *mut u32) -> i32;
}

/// Snapshot of every handle open on the system.
fn system_handles() -> Result<Vec<HandleEntry>> {
    let mut bytes = 1usize << 20;
    loop {
        let mut buf = vec![0u64; bytes / 8];
        let mut needed = 0u32;
        let status = unsafe {
            NtQuerySystemInformation(
                SYSTEM_EXTENDED_HANDLE_INFORMATION,
                buf.as_mut_ptr() as *mut c_void,
                bytes as u32,
                &mut needed,
            )
        };
        if status == STATUS_INFO_LENGTH_MISMATCH {
            bytes = (bytes * 2).max(needed as usize + (1 << 16));
            if bytes > MAX_HANDLE_TABLE {
                return Err(RecallError::Unsupported("system handle table too large"));
            }
            continue;
        }
        if status < 0 {
            return Err(RecallError::Unsupported("system handle query failed"));
        }

        // header: handle count, reserved word, then the entries
        let header = 2 * std::mem::size_of::<usize>();
        let count = buf[0] as usize;
        let fits = (bytes - header) / std::mem::size_of::<HandleEntry>();
        let base = unsafe { (buf.as_ptr() as *const u8).add(header) as *const HandleEntry };
        let entries = (0..count.min(fits))
            .map(|i| unsafe { std::ptr::read_unaligned(base.add(i)) })
            .collect();
        return Ok(entries);
    }
}

pub struct WindowsProcess {
    pid: u32,
    handle: HANDLE,
    width: PointerWidth,
}

impl WindowsProcess {
    pub fn open(pid: u32) -> Result<Self> {
        let handle = unsafe { OpenProcess(PROCESS_QUERY_INFORMATION | PROCESS_VM_READ | PROCESS_DUP_HANDLE, 0, pid) };
        if handle == 0 {
            return Err(RecallError::ProcessNotFound(format!("pid {pid}")));
        }
        let mut wow: BOOL = 0;
        let queried = unsafe { IsWow64Process(handle, &mut wow) };
        let wow64 = if queried == 0 {
            warn!(
                pid,
                error = %std::io::Error::last_os_error(),
                "IsWow64Process failed, assuming host pointer width"
            );
            None
        } else {
            Some(wow != 0)
        };
        let width = PointerWidth::for_target(wow64);
        info!(pid, width = width.as_str(), "opened client process");
        Ok(Self { pid, handle, width })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Locates `module_name` in the module snapshot.
    pub fn module(&self, module_name: &str) -> Result<ModuleInfo> {
        let snap = Snapshot::new(TH32CS_SNAPMODULE | TH32CS_SNAPMODULE32, self.pid)?;
        let mut entry: MODULEENTRY32W = unsafe { std::mem::zeroed() };
        entry.dwSize = std::mem::size_of::<MODULEENTRY32W>() as u32;

        let mut ok = unsafe { Module32FirstW(snap.0, &mut entry) };
        while ok != 0 {
            if wide_to_string(&entry.szModule).eq_ignore_ascii_case(module_name) {
                let module = ModuleInfo {
                    base: entry.modBaseAddr as u64,
                    size: entry.modBaseSize,
                    path: PathBuf::from(wide_to_string(&entry.szExePath)),
                };
                debug!(base = format_args!("{:#x}", module.base), size = module.size, "module located");
                return Ok(module);
            }
            ok = unsafe { Module32NextW(snap.0, &mut entry) };
        }
        Err(RecallError::ProcessNotFound(format!(
            "module {module_name} in pid {}",
            self.pid
        )))
    }

    /// Copies the whole mapped range of `module_name`.
    pub fn module_image(&self, module_name: &str) -> Result<ProcessImage> {
        let module = self.module(module_name)?;
        let bytes = self.read(module.base, module.size as usize)?;
        Ok(ProcessImage {
            base: module.base,
            bytes,
        })
    }

    /// Paths of the on-disk files this process holds open.
    ///
    /// Handles that cannot be duplicated are skipped. Only disk files are
    /// resolved, so pipes never block the walk.
    pub fn open_file_paths(&self) -> Result<Vec<String>> {
        let pid = self.pid as usize;
        let mut paths = Vec::new();
        let mut name = vec![0u16; 32 * 1024];
        for entry in system_handles()?.into_iter().filter(|h| h.unique_process_id == pid) {
            let mut dup: HANDLE = 0;
            let ok = unsafe {
                DuplicateHandle(
                    self.handle,
                    entry.handle_value as HANDLE,
                    GetCurrentProcess(),
                    &mut dup,
                    0,
                    0,
                    DUPLICATE_SAME_ACCESS,
                )
            };
            if ok == 0 {
                continue;
            }
            let dup = OwnedHandle(dup);
            if unsafe { GetFileType(dup.0) } != FILE_TYPE_DISK {
                continue;
            }
            let len = unsafe {
                GetFinalPathNameByHandleW(
                    dup.0,
                    name.as_mut_ptr(),
                    name.len() as u32,
                    FILE_NAME_NORMALIZED | VOLUME_NAME_DOS,
                )
            } as usize;
            if len > 0 && len < name.len() {
                paths.push(String::from_utf16_lossy(&name[..len]));
            }
        }
        debug!(pid = self.pid, count = paths.len(), "open files listed");
        Ok(paths)
    }
}

impl ProcessMemoryReader for WindowsProcess {
    fn pointer_width(&self) -> PointerWidth {
        self.width
    }

    fn read(&self, address: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let mut read = 0usize;
        let ok = unsafe {
            ReadProcessMemory(
                self.handle,
                address as usize as *const c_void,
                buf.as_mut_ptr() as *mut c_void,
                len,
                &mut read,
            )
        };
        if ok == 0 || read != len {
            return Err(RecallError::MemoryRead { address, len });
        }
        Ok(buf)
    }
}

impl Drop for WindowsProcess {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.handle);
        }
    }
}
