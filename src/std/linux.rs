//! Linux `AF_PACKET` raw socket transport.
//!
//! Socket setup copied from SmolTCP's `RawSocketDesc`, with inspiration from
//! [embassy](https://github.com/embassy-rs/embassy/blob/master/examples/std/src/tuntap.rs).

use crate::{transport::Transport, ETHERCAT_ETHERTYPE};
use core::ptr::addr_of;
use core::time::Duration;
use std::{
    io, mem,
    os::unix::io::{AsRawFd, RawFd},
};

#[repr(C)]
#[derive(Debug)]
struct ifreq {
    ifr_name: [libc::c_char; libc::IF_NAMESIZE],
    ifr_data: libc::c_int, /* ifr_ifindex or ifr_mtu */
}

fn ifreq_for(name: &str) -> ifreq {
    let mut ifreq = ifreq {
        ifr_name: [0; libc::IF_NAMESIZE],
        ifr_data: 0,
    };

    for (i, byte) in name.as_bytes().iter().enumerate() {
        ifreq.ifr_name[i] = *byte as libc::c_char
    }

    ifreq
}

fn ifreq_ioctl(
    lower: libc::c_int,
    ifreq: &mut ifreq,
    cmd: libc::c_ulong,
) -> io::Result<libc::c_int> {
    unsafe {
        #[allow(trivial_casts)]
        #[cfg(target_env = "musl")]
        let res = libc::ioctl(lower, cmd as libc::c_int, ifreq as *mut ifreq);
        #[allow(trivial_casts)]
        #[cfg(not(target_env = "musl"))]
        let res = libc::ioctl(lower, cmd, ifreq as *mut ifreq);

        if res == -1 {
            return Err(io::Error::last_os_error());
        }
    }

    Ok(ifreq.ifr_data)
}

/// A raw socket bound to a network interface, carrying EtherCAT frames directly in Ethernet II
/// frames.
///
/// Requires `CAP_NET_RAW` or root. Reception timeouts are implemented with `poll(2)`, so the
/// socket itself stays blocking and transmission never spins.
pub struct RawSocket {
    lower: i32,
    ifreq: ifreq,
}

impl RawSocket {
    /// Open a raw socket bound to the network interface with the given name, e.g. `"eth0"`.
    pub fn new(name: &str) -> io::Result<Self> {
        let protocol = ETHERCAT_ETHERTYPE as i16;

        let lower = unsafe {
            let lower = libc::socket(
                // Ethernet II frames
                libc::AF_PACKET,
                libc::SOCK_RAW,
                protocol.to_be() as i32,
            );

            if lower == -1 {
                return Err(io::Error::last_os_error());
            }

            lower
        };

        let mut self_ = RawSocket {
            lower,
            ifreq: ifreq_for(name),
        };

        self_.bind_interface()?;

        Ok(self_)
    }

    fn bind_interface(&mut self) -> io::Result<()> {
        let protocol = ETHERCAT_ETHERTYPE as i16;

        let sockaddr = libc::sockaddr_ll {
            sll_family: libc::AF_PACKET as u16,
            sll_protocol: protocol.to_be() as u16,
            sll_ifindex: ifreq_ioctl(self.lower, &mut self.ifreq, libc::SIOCGIFINDEX)?,
            sll_hatype: 1,
            sll_pkttype: 0,
            sll_halen: 6,
            sll_addr: [0; 8],
        };

        unsafe {
            #[allow(trivial_casts)]
            let res = libc::bind(
                self.lower,
                addr_of!(sockaddr).cast(),
                mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            );

            if res == -1 {
                return Err(io::Error::last_os_error());
            }
        }

        Ok(())
    }

    /// Get the maximum transmission unit of the bound interface.
    pub fn interface_mtu(&mut self) -> io::Result<usize> {
        ifreq_ioctl(self.lower, &mut self.ifreq, libc::SIOCGIFMTU).map(|mtu| mtu as usize)
    }

    /// Block until the socket is readable, at most `timeout`.
    fn wait_readable(&self, timeout: Duration) -> io::Result<()> {
        // `poll` takes whole milliseconds; round sub-millisecond timeouts up so short waits
        // don't degenerate into a busy loop.
        let millis = timeout
            .as_nanos()
            .div_ceil(1_000_000)
            .min(libc::c_int::MAX as u128) as libc::c_int;

        let mut pollfd = libc::pollfd {
            fd: self.lower,
            events: libc::POLLIN,
            revents: 0,
        };

        let res = unsafe { libc::poll(&mut pollfd, 1, millis) };

        match res {
            -1 => Err(io::Error::last_os_error()),
            0 => Err(io::ErrorKind::TimedOut.into()),
            _ => Ok(()),
        }
    }
}

impl AsRawFd for RawSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.lower
    }
}

impl Drop for RawSocket {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.lower);
        }
    }
}

impl Transport for RawSocket {
    fn send(&self, frame: &[u8]) -> io::Result<usize> {
        // Send and receive are raw fd syscalls, safe to issue from multiple threads at once
        let len = unsafe { libc::write(self.as_raw_fd(), frame.as_ptr().cast(), frame.len()) };

        if len == -1 {
            Err(io::Error::last_os_error())
        } else {
            Ok(len as usize)
        }
    }

    fn recv_timeout(&self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        self.wait_readable(timeout)?;

        let len = unsafe { libc::read(self.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len()) };

        if len == -1 {
            Err(io::Error::last_os_error())
        } else {
            Ok(len as usize)
        }
    }
}
