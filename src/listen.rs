//! Non-blocking TCP listener setup.
use std::net::Ipv4Addr;
use std::str::FromStr;

use mio::tcp::TcpListener;
use net2::TcpBuilder;

use crate::errors::Result;

/// Backlog passed to `listen(2)`.
const BACKLOG: i32 = 5;

/// Create a non-blocking, listening TCP socket bound to `address:port`.
///
/// `address` empty means `INADDR_ANY`. IPv4 only — parsing uses
/// `Ipv4Addr::from_str`'s own, platform-correct success/failure convention
/// (see DESIGN.md for the Open Question this resolves).
pub fn tcp_listen(address: &str, port: u16) -> Result<TcpListener> {
    let ip = if address.is_empty() {
        Ipv4Addr::UNSPECIFIED
    } else {
        Ipv4Addr::from_str(address)?
    };

    let builder = TcpBuilder::new_v4()?;
    builder.reuse_address(true)?;
    set_nodelay(&builder)?;
    builder.bind((ip, port))?;
    let std_listener = builder.listen(BACKLOG)?;
    std_listener.set_nonblocking(true)?;
    let listener = TcpListener::from_std(std_listener)?;
    Ok(listener)
}

/// `net2::TcpBuilder` has no `nodelay` setter of its own, so this goes
/// straight at the raw fd with `setsockopt` before bind/listen.
#[cfg(unix)]
fn set_nodelay(builder: &TcpBuilder) -> Result<()> {
    use std::os::unix::io::AsRawFd;

    let flag: libc::c_int = 1;
    let ret = unsafe {
        libc::setsockopt(
            builder.as_raw_fd(),
            libc::IPPROTO_TCP,
            libc::TCP_NODELAY,
            &flag as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

#[cfg(not(unix))]
fn set_nodelay(_builder: &TcpBuilder) -> Result<()> {
    Ok(())
}

/// Apply the core's per-connection socket options to a freshly accepted
/// stream: non-blocking (mio streams already are) and `TCP_NODELAY`, mirroring
/// the listener's own setting onto every accepted connection (nodelay is not
/// inherited across `accept(2)`).
pub fn configure_stream(stream: &mio::tcp::TcpStream) -> Result<()> {
    stream.set_nodelay(true)?;
    Ok(())
}
