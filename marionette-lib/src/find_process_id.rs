use std::mem::size_of;

use windows::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, Process32FirstW, Process32NextW, PROCESSENTRY32W,
    TH32CS_SNAPPROCESS,
};

use crate::{process::AttachError, win_api_wrappers::SafeHandle};

fn exe_file_of(pe: &PROCESSENTRY32W) -> String {
    let len = pe
        .szExeFile
        .iter()
        .position(|&c| c == 0)
        .unwrap_or(pe.szExeFile.len());
    String::from_utf16_lossy(&pe.szExeFile[..len])
}

fn find_process_id_in_snapshot(snapshot: SafeHandle, exe_file: &str) -> Option<u32> {
    let mut pe = PROCESSENTRY32W {
        dwSize: size_of::<PROCESSENTRY32W>() as u32,
        ..Default::default()
    };
    if unsafe { Process32FirstW(snapshot.0, &mut pe) }.is_err() {
        return None;
    }
    loop {
        // Whole-name match, case-insensitive like the shell. Ties between
        // same-named processes go to the first entry of this snapshot.
        if exe_file_of(&pe).eq_ignore_ascii_case(exe_file) {
            return Some(pe.th32ProcessID);
        }

        if unsafe { Process32NextW(snapshot.0, &mut pe) }.is_err() {
            return None;
        }
    }
}

pub fn find_process_id(exe_file: &str) -> Result<u32, AttachError> {
    let snapshot = SafeHandle(
        unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0) }
            .map_err(|_| AttachError::NotFound)?,
    );

    find_process_id_in_snapshot(snapshot, exe_file).ok_or(AttachError::NotFound)
}
