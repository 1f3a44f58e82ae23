//! Bounded readiness wait on a raw descriptor

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use psync_types::TimeoutConfig;
use std::io;
use std::os::fd::BorrowedFd;
use tracing::debug;

/// Readiness a caller waits for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Read,
    Write,
}

/// Block until `fd` is ready in `direction` or the poll timeout expires
///
/// `EINTR` restarts the wait. `POLLERR` and `POLLNVAL` are failures; a hang-up
/// is left for the following read or write to report.
pub(crate) fn wait_ready(
    fd: BorrowedFd<'_>,
    direction: Direction,
    timeout: &TimeoutConfig,
) -> io::Result<()> {
    let events = match direction {
        Direction::Read => PollFlags::POLLIN,
        Direction::Write => PollFlags::POLLOUT,
    };
    let millis = timeout.poll_millis();
    let poll_timeout = PollTimeout::try_from(millis).unwrap_or(PollTimeout::MAX);

    loop {
        let mut fds = [PollFd::new(fd, events)];
        match poll(&mut fds, poll_timeout) {
            Ok(0) => {
                debug!("Stream not ready for {:?} after {} ms", direction, millis);
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("peer inactive for {} ms", millis),
                ));
            }
            Ok(_) => {
                let revents = fds[0].revents().unwrap_or_else(PollFlags::empty);
                if revents.intersects(PollFlags::POLLERR | PollFlags::POLLNVAL) {
                    return Err(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        format!("descriptor reported {:?}", revents),
                    ));
                }
                return Ok(());
            }
            Err(Errno::EINTR) => continue,
            Err(errno) => return Err(io::Error::from(errno)),
        }
    }
}
