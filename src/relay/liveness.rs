//! Client connection liveness probe.

use socket2::SockRef;
use std::io::ErrorKind;
use std::mem::MaybeUninit;
use tokio::net::TcpStream;
use tracing::trace;

/// Report whether the peer of `stream` is still connected.
///
/// Never blocks and never fails: a zero-length write surfaces a reset or
/// broken pipe, and a one-byte non-blocking peek surfaces an orderly close
/// (`Ok(0)`). Pending unread data counts as alive.
pub fn is_alive(stream: &TcpStream) -> bool {
    match stream.try_write(&[]) {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::WouldBlock => {}
        Err(e) => {
            trace!(error = %e, "Zero-length write failed");
            return false;
        }
    }

    let mut probe = [MaybeUninit::<u8>::uninit(); 1];
    match SockRef::from(stream).peek(&mut probe) {
        Ok(0) => false,
        Ok(_) => true,
        Err(e) if e.kind() == ErrorKind::WouldBlock => true,
        Err(e) => {
            trace!(error = %e, "Peek failed");
            false
        }
    }
}
