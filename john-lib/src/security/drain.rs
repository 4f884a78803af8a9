//! Draining a connection after an auth-time rejection (C9 step 3), so a
//! rejected connection is closed on roughly the same wire shape as an
//! accepted one instead of snapping shut the instant trial decryption
//! fails — otherwise "wrong key" and "right key, still talking" would be
//! trivially distinguishable by timing alone.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::Instant;

/// Upper bound on bytes discarded by [`drain`], independent of the time
/// budget: bounds the work done for a connection that keeps its write
/// buffer full for the whole budget.
pub const MAX_DRAIN_BYTES: usize = 4096;

/// Reads and discards from `stream` until either [`MAX_DRAIN_BYTES`] have
/// been read, `budget` elapses, or the peer closes/errors. Never returns
/// an error: by the time a caller drains, it has already decided to close
/// the connection regardless of what draining finds.
pub async fn drain(stream: &mut (impl AsyncRead + Unpin), budget: Duration) -> usize {
    let deadline = Instant::now() + budget;
    let mut buf = [0u8; 512];
    let mut discarded = 0;

    while discarded < MAX_DRAIN_BYTES {
        let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
            break;
        };
        let want = (MAX_DRAIN_BYTES - discarded).min(buf.len());
        match tokio::time::timeout(remaining, stream.read(&mut buf[..want])).await {
            Ok(Ok(0)) | Ok(Err(_)) | Err(_) => break,
            Ok(Ok(n)) => discarded += n,
        }
    }

    discarded
}
