//! Optional CPU pinning for background worker threads.
//!
//! Linux pins with `sched_setaffinity` on the calling thread. Other
//! platforms report `Unsupported`.

use std::io;

use serde::{Deserialize, Serialize};

/// Placement of a background worker thread.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PinConfig {
    /// Logical core to pin the thread to; `None` leaves placement to the OS.
    pub core_id: Option<usize>,
}

/// Apply `cfg` to the calling thread.
pub fn pin_current_thread(cfg: &PinConfig) -> io::Result<()> {
    match cfg.core_id {
        None => Ok(()),
        Some(core) => pin_to_core(core),
    }
}

#[cfg(target_os = "linux")]
fn pin_to_core(core: usize) -> io::Result<()> {
    use core::mem::{size_of, zeroed};

    if core >= libc::CPU_SETSIZE as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("core {core} exceeds CPU_SETSIZE"),
        ));
    }
    // SAFETY: cpu_set_t is plain data; CPU_SET is bounds-checked above and
    // sched_setaffinity(0, ..) only reads the set for the calling thread.
    let rc = unsafe {
        let mut set: libc::cpu_set_t = zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(core, &mut set);
        libc::sched_setaffinity(0, size_of::<libc::cpu_set_t>(), &set)
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(target_os = "linux"))]
fn pin_to_core(_core: usize) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "thread pinning is only implemented on Linux",
    ))
}
