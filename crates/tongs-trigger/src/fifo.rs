//! Thin wrappers around named pipes.

use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt};
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::time::Duration;

/// Returns true if `path` exists and is a FIFO.
pub fn is_fifo<P: AsRef<Path>>(path: P) -> bool {
    std::fs::metadata(path)
        .map(|m| m.file_type().is_fifo())
        .unwrap_or(false)
}

/// Creates a FIFO at `path` with permissions `mode`.
///
/// # Errors
///
/// Returns the OS error of `mkfifo(3)`.
pub fn create_fifo<P: AsRef<Path>>(path: P, mode: u32) -> io::Result<()> {
    let path = CString::new(path.as_ref().as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    if unsafe { libc::mkfifo(path.as_ptr(), mode as libc::mode_t) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Opens the write end, blocking until a reader opens the FIFO.
pub(crate) fn open_write(path: &Path) -> io::Result<File> {
    OpenOptions::new().write(true).open(path)
}

/// Opens the read end, blocking until a writer opens the FIFO.
pub(crate) fn open_read(path: &Path) -> io::Result<File> {
    OpenOptions::new().read(true).open(path)
}

/// Opens the read end without waiting for a writer; reads never block.
pub(crate) fn open_read_nonblocking(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
}

pub(crate) fn write_byte(file: &mut File, byte: u8) -> io::Result<()> {
    file.write_all(&[byte])
}

/// Result of one attempt to read a command byte.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ReadOutcome {
    Byte(u8),
    /// No writer holds the FIFO open
    HungUp,
    /// Nothing arrived before the timeout
    Timeout,
}

/// Waits up to `timeout` for the non-blocking `file` to become readable and reads one byte.
pub(crate) fn poll_byte(file: &mut File, timeout: Duration) -> io::Result<ReadOutcome> {
    let mut pfd = libc::pollfd {
        fd: file.as_raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    };
    let timeout_ms = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
    let ready = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
    if ready < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(ReadOutcome::Timeout);
        }
        return Err(err);
    }
    if ready == 0 {
        return Ok(ReadOutcome::Timeout);
    }
    read_byte(file)
}

/// Reads one byte. Blocking or not depends on how `file` was opened.
pub(crate) fn read_byte(file: &mut File) -> io::Result<ReadOutcome> {
    let mut buf = [0u8; 1];
    loop {
        match file.read(&mut buf) {
            Ok(0) => return Ok(ReadOutcome::HungUp),
            Ok(_) => return Ok(ReadOutcome::Byte(buf[0])),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(ReadOutcome::Timeout),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::TempDir;

    #[test]
    fn test_create_and_detect_fifo() -> anyhow::Result<()> {
        let dir = TempDir::new("fifo")?;
        let path = dir.path().join("f");
        assert!(!is_fifo(&path));
        create_fifo(&path, 0o600)?;
        assert!(is_fifo(&path));
        assert!(create_fifo(&path, 0o600).is_err());
        std::fs::write(dir.path().join("plain"), b"x")?;
        assert!(!is_fifo(dir.path().join("plain")));
        Ok(())
    }

    #[test]
    fn test_nonblocking_reads() -> anyhow::Result<()> {
        let dir = TempDir::new("nonblocking")?;
        let path = dir.path().join("f");
        create_fifo(&path, 0o600)?;
        let mut reader = open_read_nonblocking(&path)?;
        // no writer ever connected
        assert_eq!(
            poll_byte(&mut reader, Duration::from_millis(10))?,
            ReadOutcome::Timeout
        );
        let mut writer = open_write(&path)?;
        write_byte(&mut writer, 7)?;
        assert_eq!(
            poll_byte(&mut reader, Duration::from_millis(100))?,
            ReadOutcome::Byte(7)
        );
        assert_eq!(
            poll_byte(&mut reader, Duration::from_millis(10))?,
            ReadOutcome::Timeout
        );
        drop(writer);
        assert_eq!(
            poll_byte(&mut reader, Duration::from_millis(100))?,
            ReadOutcome::HungUp
        );
        Ok(())
    }
}
