//! On-disk rendezvous files used for liveness detection and out-of-band
//! control of monitored processes.
//!
//! Every monitored process has a lockfile at `<dir>/procmon.<id>` holding a
//! fixed-layout header followed by the raw command line. The process that
//! owns the child keeps an advisory write lock on byte 0 for the child's
//! lifetime; the kernel drops the lock when the child dies, which is what
//! wakes anyone blocked in [`Lockfile::lock_wait`]. The `terminate` word in
//! the header is the control channel for the CLI: writing [`SUSPEND`] or
//! [`ABORT`] commands the monitor task out of band.

use std::ffi::CStr;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use crate::log;
use crate::logger::LogLevel;
use crate::timestamp::current_timestamp;

/// Control word: terminate the process and suspend monitoring.
pub const SUSPEND: u32 = 0xDEAD_BEEF;
/// Control word: terminate the process and delete its monitoring entry.
pub const ABORT: u32 = 0xDEAF_BABE;

/// Header layout. Offsets are written to directly for positional updates,
/// so the widths are pinned and there is no implicit padding.
pub const OFF_PID: u64 = 0;
pub const OFF_TERMINATE: u64 = 4;
pub const OFF_RUNCOUNT: u64 = 8;
pub const OFF_STARTTIME: u64 = 16;
pub const HEADER_LEN: usize = 24;

const OPEN_RETRIES: u32 = 5;
const OPEN_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Decoded contents of a lockfile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRecord {
    pub pid: i32,
    pub terminate: u32,
    pub runcount: u64,
    pub starttime: i64,
    pub exec: String,
}

impl LockRecord {
    fn encode_header(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[OFF_PID as usize..OFF_TERMINATE as usize].copy_from_slice(&self.pid.to_ne_bytes());
        buf[OFF_TERMINATE as usize..OFF_RUNCOUNT as usize]
            .copy_from_slice(&self.terminate.to_ne_bytes());
        buf[OFF_RUNCOUNT as usize..OFF_STARTTIME as usize]
            .copy_from_slice(&self.runcount.to_ne_bytes());
        buf[OFF_STARTTIME as usize..HEADER_LEN].copy_from_slice(&self.starttime.to_ne_bytes());
        buf
    }

    fn decode_header(buf: &[u8; HEADER_LEN]) -> LockRecord {
        let mut pid = [0u8; 4];
        let mut terminate = [0u8; 4];
        let mut runcount = [0u8; 8];
        let mut starttime = [0u8; 8];
        pid.copy_from_slice(&buf[OFF_PID as usize..OFF_TERMINATE as usize]);
        terminate.copy_from_slice(&buf[OFF_TERMINATE as usize..OFF_RUNCOUNT as usize]);
        runcount.copy_from_slice(&buf[OFF_RUNCOUNT as usize..OFF_STARTTIME as usize]);
        starttime.copy_from_slice(&buf[OFF_STARTTIME as usize..HEADER_LEN]);
        LockRecord {
            pid: i32::from_ne_bytes(pid),
            terminate: u32::from_ne_bytes(terminate),
            runcount: u64::from_ne_bytes(runcount),
            starttime: i64::from_ne_bytes(starttime),
            exec: String::new(),
        }
    }
}

/// Liveness/control state of a monitored process, derived from its lockfile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PidStatus {
    /// The stored PID corresponds to a live process.
    Running(i32),
    /// No lockfile, or the stored PID is dead.
    Absent,
    /// The `terminate` word is [`SUSPEND`]; monitoring is paused.
    Suspended,
    /// The `terminate` word is [`ABORT`]; monitoring must stop for good.
    Aborted,
}

/// An open handle on a process lockfile.
#[derive(Debug)]
pub struct Lockfile {
    file: File,
    path: PathBuf,
}

impl Lockfile {
    /// Lockfile path for a process id.
    pub fn path_for(dir: &Path, id: &str) -> PathBuf {
        dir.join(format!("procmon.{}", id))
    }

    /// Create (or truncate) the lockfile, writing a fresh header with
    /// `runcount = 1` and the command line trailer.
    pub fn create(dir: &Path, id: &str, pid: i32, exec: &str) -> io::Result<Lockfile> {
        let path = Self::path_for(dir, id);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&path)?;

        let record = LockRecord {
            pid,
            terminate: 0,
            runcount: 1,
            starttime: current_timestamp(),
            exec: exec.to_string(),
        };
        file.write_all_at(&record.encode_header(), 0)?;
        file.write_all_at(exec.as_bytes(), HEADER_LEN as u64)?;

        Ok(Lockfile { file, path })
    }

    /// Open an existing lockfile read/write, retrying for a short while to
    /// tolerate races with a creator that has not finished yet.
    pub fn open(dir: &Path, id: &str) -> io::Result<Lockfile> {
        let path = Self::path_for(dir, id);
        let mut tries = 0;
        loop {
            match OpenOptions::new().read(true).write(true).open(&path) {
                Ok(file) => return Ok(Lockfile { file, path }),
                Err(e) => {
                    tries += 1;
                    if tries >= OPEN_RETRIES {
                        return Err(e);
                    }
                    thread::sleep(OPEN_RETRY_DELAY);
                }
            }
        }
    }

    /// Open-or-create the lockfile for a process this caller owns, bump the
    /// run counter, stamp the new pid and start time, and take the try-now
    /// write lock. The returned handle must be kept alive for as long as the
    /// owner lives; dropping it releases the lock.
    pub fn make(dir: &Path, id: &str, pid: i32, exec: &str) -> io::Result<Lockfile> {
        let lockfile = match Self::open(dir, id) {
            Ok(lockfile) => {
                let mut record = lockfile.read_record()?;
                record.pid = pid;
                record.runcount += 1;
                record.starttime = current_timestamp();
                lockfile.file.write_all_at(&record.encode_header(), 0)?;
                lockfile
            }
            Err(_) => Self::create(dir, id, pid, exec)?,
        };

        lockfile.lock_try()?;
        Ok(lockfile)
    }

    /// Read the full record: header plus the command line trailer.
    pub fn read_record(&self) -> io::Result<LockRecord> {
        let mut header = [0u8; HEADER_LEN];
        self.file.read_exact_at(&mut header, 0)?;
        let mut record = LockRecord::decode_header(&header);

        let len = self.file.metadata()?.len();
        if len > HEADER_LEN as u64 {
            let mut trailer = vec![0u8; (len - HEADER_LEN as u64) as usize];
            self.file.read_exact_at(&mut trailer, HEADER_LEN as u64)?;
            record.exec = String::from_utf8_lossy(&trailer).into_owned();
        }

        Ok(record)
    }

    /// Positional rewrite of the `terminate` control word.
    pub fn set_terminate(&self, cmd: u32) -> io::Result<()> {
        self.file.write_all_at(&cmd.to_ne_bytes(), OFF_TERMINATE)
    }

    /// Positional rewrite of `starttime` to now, so both uptime and
    /// stopped-time read correctly from the `Since` column.
    pub fn reset_starttime(&self) -> io::Result<()> {
        self.file
            .write_all_at(&current_timestamp().to_ne_bytes(), OFF_STARTTIME)
    }

    /// Non-blocking write lock on byte 0.
    pub fn lock_try(&self) -> io::Result<()> {
        self.lock_op(libc::F_SETLK, libc::F_WRLCK)
    }

    /// Blocking write lock on byte 0. Returns when the current owner dies.
    pub fn lock_wait(&self) -> io::Result<()> {
        self.lock_op(libc::F_SETLKW, libc::F_WRLCK)
    }

    /// Release a previously acquired write lock.
    pub fn unlock(&self) -> io::Result<()> {
        self.lock_op(libc::F_SETLK, libc::F_UNLCK)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_op(&self, cmd: libc::c_int, ltype: libc::c_int) -> io::Result<()> {
        let mut fl: libc::flock = unsafe { std::mem::zeroed() };
        fl.l_type = ltype as libc::c_short;
        fl.l_whence = libc::SEEK_SET as libc::c_short;
        fl.l_start = 0;
        fl.l_len = 1;

        let rc = unsafe { libc::fcntl(self.file.as_raw_fd(), cmd, &fl) };
        if rc == -1 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

/// Unlink a process lockfile.
pub fn remove(dir: &Path, id: &str) -> io::Result<()> {
    std::fs::remove_file(Lockfile::path_for(dir, id))
}

/// One-shot liveness/control probe: open, read the header, close.
pub fn pid_status(dir: &Path, id: &str) -> PidStatus {
    let path = Lockfile::path_for(dir, id);
    let file = match OpenOptions::new().read(true).write(true).open(&path) {
        Ok(file) => file,
        Err(_) => return PidStatus::Absent,
    };

    let mut header = [0u8; HEADER_LEN];
    if file.read_exact_at(&mut header, 0).is_err() {
        return PidStatus::Absent;
    }
    let record = LockRecord::decode_header(&header);

    match record.terminate {
        SUSPEND => return PidStatus::Suspended,
        ABORT => return PidStatus::Aborted,
        _ => {}
    }

    if record.pid <= 0 {
        return PidStatus::Absent;
    }

    match is_pid_active(record.pid) {
        Ok(true) => PidStatus::Running(record.pid),
        Ok(false) => PidStatus::Absent,
        Err(e) => {
            log!(LogLevel::Trace, "pid probe for {} failed: {}", id, e);
            PidStatus::Absent
        }
    }
}

/// Checks if a PID is active on the system by sending signal 0.
///
/// # Returns
/// - `Ok(true)` if the process exists or if we lack permissions (EPERM).
/// - `Ok(false)` if the process does not exist (ESRCH).
/// - `Err(io::Error)` for other system errors.
pub fn is_pid_active(pid: i32) -> io::Result<bool> {
    let ret = unsafe { libc::kill(pid, 0) };
    if ret == 0 {
        Ok(true)
    } else {
        match io::Error::last_os_error().raw_os_error() {
            Some(libc::ESRCH) => Ok(false),
            Some(libc::EPERM) => Ok(true),
            Some(err) => Err(io::Error::from_raw_os_error(err)),
            None => Err(io::Error::new(io::ErrorKind::Other, "Unknown error")),
        }
    }
}

/// Child-side lockfile install, run between `fork` and `exec`.
///
/// Only direct libc calls on caller-prepared buffers are allowed here. The
/// fd is deliberately left open without close-on-exec so the write lock
/// survives `exec` and is released by the kernel when the child dies.
pub fn install_in_child(path: &CStr, exec: &[u8]) -> io::Result<()> {
    unsafe {
        let mut fresh = false;
        let mut fd = libc::open(path.as_ptr(), libc::O_RDWR);
        if fd < 0 {
            fd = libc::open(
                path.as_ptr(),
                libc::O_RDWR | libc::O_CREAT,
                0o600 as libc::c_uint,
            );
            if fd < 0 {
                return Err(io::Error::last_os_error());
            }
            fresh = true;
        }

        let pid = libc::getpid();
        let now = libc::time(std::ptr::null_mut()) as i64;

        let mut header = [0u8; HEADER_LEN];
        if !fresh {
            let n = libc::read(fd, header.as_mut_ptr() as *mut libc::c_void, HEADER_LEN);
            if n == HEADER_LEN as isize {
                let mut record = LockRecord::decode_header(&header);
                record.pid = pid;
                record.runcount += 1;
                record.starttime = now;
                header = record.encode_header();
            } else {
                fresh = true;
            }
        }
        if fresh {
            let record = LockRecord {
                pid,
                terminate: 0,
                runcount: 1,
                starttime: now,
                exec: String::new(),
            };
            header = record.encode_header();
        }

        if libc::lseek(fd, 0, libc::SEEK_SET) < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::write(fd, header.as_ptr() as *const libc::c_void, HEADER_LEN)
            != HEADER_LEN as isize
        {
            return Err(io::Error::last_os_error());
        }
        if fresh && !exec.is_empty() {
            if libc::write(fd, exec.as_ptr() as *const libc::c_void, exec.len())
                != exec.len() as isize
            {
                return Err(io::Error::last_os_error());
            }
        }

        let mut fl: libc::flock = std::mem::zeroed();
        fl.l_type = libc::F_WRLCK as libc::c_short;
        fl.l_whence = libc::SEEK_SET as libc::c_short;
        fl.l_start = 0;
        fl.l_len = 1;
        if libc::fcntl(fd, libc::F_SETLK, &fl) < 0 {
            return Err(io::Error::last_os_error());
        }
    }

    Ok(())
}
