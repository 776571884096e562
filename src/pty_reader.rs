//! Background reader feeding PTY output into a channel, so the session can
//! poll for bytes without blocking.

use std::io::{self, Read};
use std::sync::mpsc::{Receiver, channel};
use std::thread;

const READ_BUFFER: usize = 4096;

/// Spawn a named thread that forwards everything read from `reader`.
///
/// The channel disconnects once the reader hits end of file or an error,
/// which is how the session learns that the far end went away.
pub fn spawn_reader<R: Read + Send + 'static>(
    mut reader: R,
    label: &str,
) -> io::Result<Receiver<Vec<u8>>> {
    let (tx, rx) = channel();

    thread::Builder::new()
        .name(format!("pty-reader:{label}"))
        .spawn(move || {
            let mut buffer = [0u8; READ_BUFFER];
            loop {
                match reader.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(buffer[..n].to_vec()).is_err() {
                            break; // session dropped
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
        })?;

    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::mpsc::RecvTimeoutError;
    use std::time::Duration;

    #[test]
    fn test_forwards_then_disconnects() {
        let rx = spawn_reader(Cursor::new(b"hello".to_vec()), "test").unwrap();
        let mut got = Vec::new();
        loop {
            match rx.recv_timeout(Duration::from_secs(5)) {
                Ok(chunk) => got.extend(chunk),
                Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => panic!("reader thread hung"),
            }
        }
        assert_eq!(got, b"hello");
    }
}
