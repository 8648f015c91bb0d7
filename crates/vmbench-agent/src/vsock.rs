//! AF_VSOCK listener for the benchmark VM's job channel.
//!
//! The agent listens on a vsock port that the host reaches through the
//! hypervisor's unix-socket mux. Only the server side exists here; the
//! host never speaks raw vsock.

use std::io::{Read, Write};
use std::os::fd::OwnedFd;

/// Pending connections to hold; the dispatcher opens exactly one.
#[cfg(target_os = "linux")]
const LISTEN_BACKLOG: libc::c_int = 4;

/// Listening vsock socket bound to a local port on any CID.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
pub struct VsockListener {
    fd: OwnedFd,
}

/// One accepted host connection.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
pub struct VsockStream {
    fd: OwnedFd,
    /// CID of the connecting peer, for logging.
    pub peer_cid: u32,
}

/// Bind a vsock listener on `port`.
pub fn listen(port: u32) -> std::io::Result<VsockListener> {
    VsockListener::bind(port)
}

#[cfg(target_os = "linux")]
mod imp {
    use super::*;
    use std::mem;
    use std::os::fd::{AsRawFd, FromRawFd};

    fn local_addr(port: u32) -> libc::sockaddr_vm {
        let mut addr: libc::sockaddr_vm = unsafe { mem::zeroed() };
        addr.svm_family = libc::AF_VSOCK as libc::sa_family_t;
        addr.svm_port = port;
        addr.svm_cid = libc::VMADDR_CID_ANY;
        addr
    }

    impl VsockListener {
        pub fn bind(port: u32) -> std::io::Result<Self> {
            let raw = unsafe { libc::socket(libc::AF_VSOCK, libc::SOCK_STREAM, 0) };
            if raw < 0 {
                return Err(std::io::Error::last_os_error());
            }
            let fd = unsafe { OwnedFd::from_raw_fd(raw) };

            let addr = local_addr(port);
            let rc = unsafe {
                libc::bind(
                    fd.as_raw_fd(),
                    &addr as *const libc::sockaddr_vm as *const libc::sockaddr,
                    mem::size_of::<libc::sockaddr_vm>() as libc::socklen_t,
                )
            };
            if rc < 0 {
                return Err(std::io::Error::last_os_error());
            }

            if unsafe { libc::listen(fd.as_raw_fd(), LISTEN_BACKLOG) } < 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(Self { fd })
        }

        pub fn accept(&self) -> std::io::Result<VsockStream> {
            let mut peer: libc::sockaddr_vm = unsafe { mem::zeroed() };
            let mut len = mem::size_of::<libc::sockaddr_vm>() as libc::socklen_t;

            let raw = unsafe {
                libc::accept(
                    self.fd.as_raw_fd(),
                    &mut peer as *mut libc::sockaddr_vm as *mut libc::sockaddr,
                    &mut len,
                )
            };
            if raw < 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(VsockStream {
                fd: unsafe { OwnedFd::from_raw_fd(raw) },
                peer_cid: peer.svm_cid,
            })
        }
    }

    impl Read for VsockStream {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = unsafe {
                libc::read(self.fd.as_raw_fd(), buf.as_mut_ptr() as *mut _, buf.len())
            };
            if n < 0 {
                Err(std::io::Error::last_os_error())
            } else {
                Ok(n as usize)
            }
        }
    }

    impl Write for VsockStream {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let n = unsafe {
                libc::write(self.fd.as_raw_fd(), buf.as_ptr() as *const _, buf.len())
            };
            if n < 0 {
                Err(std::io::Error::last_os_error())
            } else {
                Ok(n as usize)
            }
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}

// Non-Linux hosts only build the unix-socket path; binding vsock fails
// cleanly at runtime instead of at compile time so the crate still
// builds for development.
#[cfg(not(target_os = "linux"))]
mod imp {
    use super::*;

    fn unsupported() -> std::io::Error {
        std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "vsock is only available on linux",
        )
    }

    impl VsockListener {
        pub fn bind(_port: u32) -> std::io::Result<Self> {
            Err(unsupported())
        }

        pub fn accept(&self) -> std::io::Result<VsockStream> {
            Err(unsupported())
        }
    }

    impl Read for VsockStream {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(unsupported())
        }
    }

    impl Write for VsockStream {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(unsupported())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Err(unsupported())
        }
    }
}
