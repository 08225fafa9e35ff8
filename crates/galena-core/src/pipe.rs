//! Named pipe (FIFO) helpers.
//!
//! All client-facing I/O in Galena travels over filesystem FIFOs. This
//! module wraps creation, the three open modes the server needs, and
//! idempotent removal. Opens are non-blocking and tokio-registered; see
//! [`open_bus`] for the trick that keeps a listener pipe readable across
//! writer turnover.

use std::io;
use std::os::unix::fs::FileTypeExt;
use std::path::Path;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::stat::Mode;
use nix::unistd;
use tokio::net::unix::pipe;

use crate::error::{GalenaError, Result};

/// How long [`open_sender`] keeps retrying before giving up on a client
/// that announced a response pipe but never opened its reading end.
const SENDER_RETRY_INTERVAL: Duration = Duration::from_millis(20);
const SENDER_RETRY_LIMIT: u32 = 250;

/// Create a FIFO at `path` with 0666 permissions.
///
/// A FIFO already present at the path is reused rather than treated as an
/// error, so a server restarted after a crash picks up its old
/// registration pipe.
pub fn create(path: &Path) -> Result<()> {
    match unistd::mkfifo(path, Mode::from_bits_truncate(0o666)) {
        Ok(()) | Err(Errno::EEXIST) => Ok(()),
        Err(e) => Err(GalenaError::Io(io::Error::from(e))),
    }
}

/// True if `path` names an existing FIFO.
pub fn is_fifo(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.file_type().is_fifo())
        .unwrap_or(false)
}

/// Remove the FIFO at `path`, tolerating prior removal.
pub fn remove(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(GalenaError::Io(e)),
    }
}

/// Open the reading end of `path` while also holding a writing end.
///
/// A plain FIFO reader hits EOF the moment its last writer closes; a
/// listener that must outlive any number of short-lived writers would then
/// spin on empty reads. Holding our own writer end keeps the writer count
/// nonzero forever, so reads simply park until the next client writes.
/// Used for the registration pipe.
pub fn open_bus(path: &Path) -> Result<pipe::Receiver> {
    let rx = pipe::OpenOptions::new()
        .read_write(true)
        .open_receiver(path)?;
    Ok(rx)
}

/// Open the reading end of `path`.
///
/// EOF semantics are preserved: once the writer closes, reads return zero.
/// Used for per-session request pipes, where EOF means the client is gone.
pub fn open_receiver(path: &Path) -> Result<pipe::Receiver> {
    let rx = pipe::OpenOptions::new().open_receiver(path)?;
    Ok(rx)
}

/// Open the writing end of `path`, waiting for a reader to appear.
///
/// Opening a FIFO for writing fails with ENXIO until some process holds
/// the reading end. During the connection handshake the client may not
/// have opened its response pipe yet, so retry briefly before declaring
/// the handshake dead.
pub async fn open_sender(path: &Path) -> Result<pipe::Sender> {
    for _ in 0..SENDER_RETRY_LIMIT {
        match pipe::OpenOptions::new().open_sender(path) {
            Ok(tx) => return Ok(tx),
            Err(e) if e.raw_os_error() == Some(Errno::ENXIO as i32) => {
                tokio::time::sleep(SENDER_RETRY_INTERVAL).await;
            }
            Err(e) => return Err(GalenaError::Io(e)),
        }
    }
    Err(GalenaError::Handshake(format!(
        "no reader on {}",
        path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_create_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reg");

        create(&path).unwrap();
        create(&path).unwrap();
        assert!(is_fifo(&path));
    }

    #[test]
    fn test_remove_tolerates_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone");

        create(&path).unwrap();
        remove(&path).unwrap();
        remove(&path).unwrap();
        assert!(!is_fifo(&path));
    }

    #[test]
    fn test_is_fifo_rejects_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain");
        std::fs::write(&path, b"x").unwrap();
        assert!(!is_fifo(&path));
    }

    #[tokio::test]
    async fn test_bus_survives_writer_turnover() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bus");
        create(&path).unwrap();

        let mut bus = open_bus(&path).unwrap();

        // First writer connects, writes, and disconnects entirely.
        {
            let mut tx = open_sender(&path).await.unwrap();
            tx.write_all(b"one\n").await.unwrap();
        }
        let mut buf = [0u8; 16];
        let n = bus.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"one\n");

        // A second writer can still reach the same reader; no EOF between.
        {
            let mut tx = open_sender(&path).await.unwrap();
            tx.write_all(b"two\n").await.unwrap();
        }
        let n = bus.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"two\n");
    }

    #[tokio::test]
    async fn test_plain_receiver_sees_eof() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("req");
        create(&path).unwrap();

        let mut rx = open_receiver(&path).unwrap();
        {
            let mut tx = open_sender(&path).await.unwrap();
            tx.write_all(b"DISCONNECT\n").await.unwrap();
        }

        let mut buf = [0u8; 32];
        let n = rx.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"DISCONNECT\n");
        // Writer is gone; the next read reports end of stream.
        assert_eq!(rx.read(&mut buf).await.unwrap(), 0);
    }
}
