//! Autologin mutual exclusion
//!
//! A one-element System V semaphore keyed by a fixed IPC key. Acquiring
//! atomically waits for zero and increments with `SEM_UNDO`: the undo
//! record belongs to the process and survives `execve`, so a respawned
//! daemon keeps the slot, while a daemon that dies for good gives it back
//! through the kernel. The value never exceeds 1.

use std::io;
use tracing::{debug, info};

use super::error::{Result, SupervisorError};

/// Result of an autologin slot request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    /// The caller may autologin
    Acquired,
    /// An autologin already happened under this key
    Unavailable,
}

/// System-wide autologin guard
#[derive(Debug)]
pub struct AutologinSlot {
    key: libc::key_t,
    semid: libc::c_int,
}

impl AutologinSlot {
    /// Open (creating if needed) the semaphore for `key`
    pub fn open(key: i32) -> Result<Self> {
        // SAFETY: plain syscall wrapper, no pointers involved
        let semid = unsafe { libc::semget(key as libc::key_t, 1, libc::IPC_CREAT | 0o600) };
        if semid < 0 {
            return Err(SupervisorError::Semaphore(io::Error::last_os_error()));
        }
        debug!("Opened autologin semaphore key=0x{:x} id={}", key, semid);
        Ok(Self {
            key: key as libc::key_t,
            semid,
        })
    }

    /// Take the slot unless an autologin already holds it
    pub fn try_acquire(&self) -> Result<SlotStatus> {
        let mut ops = [
            sembuf(0, libc::IPC_NOWAIT),
            sembuf(1, libc::IPC_NOWAIT | libc::SEM_UNDO),
        ];
        match self.semop(&mut ops) {
            Ok(()) => {
                info!("Autologin slot acquired");
                Ok(SlotStatus::Acquired)
            }
            Err(e) if e.raw_os_error() == Some(libc::EAGAIN) => {
                info!("Autologin slot unavailable");
                Ok(SlotStatus::Unavailable)
            }
            Err(e) => Err(SupervisorError::Semaphore(e)),
        }
    }

    /// Current semaphore value
    pub fn value(&self) -> Result<i32> {
        // SAFETY: GETVAL takes no variadic argument
        let value = unsafe { libc::semctl(self.semid, 0, libc::GETVAL) };
        if value < 0 {
            return Err(SupervisorError::Semaphore(io::Error::last_os_error()));
        }
        Ok(value)
    }

    /// Whether this process (or the image it re-executed from) holds the slot
    pub fn is_held(&self) -> bool {
        // SAFETY: GETPID takes no variadic argument
        let last = unsafe { libc::semctl(self.semid, 0, libc::GETPID) };
        matches!(self.value(), Ok(1)) && last == std::process::id() as i32
    }

    /// Give the slot back; no-op unless held
    pub fn release(&self) -> Result<()> {
        if !self.is_held() {
            return Ok(());
        }
        let mut ops = [sembuf(-1, libc::IPC_NOWAIT | libc::SEM_UNDO)];
        self.semop(&mut ops).map_err(SupervisorError::Semaphore)?;
        info!("Autologin slot released");
        Ok(())
    }

    /// Delete the semaphore from the system
    pub fn remove(self) -> Result<()> {
        // SAFETY: IPC_RMID takes no variadic argument
        if unsafe { libc::semctl(self.semid, 0, libc::IPC_RMID) } < 0 {
            return Err(SupervisorError::Semaphore(io::Error::last_os_error()));
        }
        debug!("Removed autologin semaphore key=0x{:x}", self.key);
        Ok(())
    }

    fn semop(&self, ops: &mut [libc::sembuf]) -> io::Result<()> {
        // SAFETY: `ops` is a valid, exclusively borrowed slice for the call
        let rc = unsafe { libc::semop(self.semid, ops.as_mut_ptr(), ops.len()) };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

fn sembuf(op: i16, flags: libc::c_int) -> libc::sembuf {
    libc::sembuf {
        sem_num: 0,
        sem_op: op,
        sem_flg: flags as libc::c_short,
    }
}
