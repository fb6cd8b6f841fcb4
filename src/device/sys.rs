use std::fs::File;
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, RawFd};

const IOC_NRBITS: libc::c_ulong = 8;
const IOC_TYPEBITS: libc::c_ulong = 8;
const IOC_SIZEBITS: libc::c_ulong = 14;
const IOC_NRSHIFT: libc::c_ulong = 0;
const IOC_TYPESHIFT: libc::c_ulong = IOC_NRSHIFT + IOC_NRBITS;
const IOC_SIZESHIFT: libc::c_ulong = IOC_TYPESHIFT + IOC_TYPEBITS;
const IOC_DIRSHIFT: libc::c_ulong = IOC_SIZESHIFT + IOC_SIZEBITS;
const IOC_READ: libc::c_ulong = 2;

const MAX_INPUT_EV: usize = 64;

/// Read every [`libc::input_event`] currently buffered for `fd`.
///
/// Returns `WouldBlock` if nothing at all was available and `UnexpectedEof` if the device is
/// gone and no events were read before noticing. A read that ends in the middle of an event
/// is `InvalidData`.
pub(crate) fn read_available_events(fd: RawFd) -> io::Result<Vec<libc::input_event>> {
    let mut events = Vec::new();

    loop {
        match read_input_events(fd) {
            Ok(batch) if batch.is_empty() => {
                return if events.is_empty() {
                    Err(io::ErrorKind::UnexpectedEof.into())
                } else {
                    Ok(events)
                };
            }
            Ok(batch) => events.extend(batch),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock && !events.is_empty() => {
                return Ok(events)
            }
            Err(e) => return Err(e),
        }
    }
}

fn read_input_events(fd: RawFd) -> io::Result<Vec<libc::input_event>> {
    let mut input_events = [mem::MaybeUninit::<libc::input_event>::uninit(); MAX_INPUT_EV];

    let n = unsafe {
        libc::read(
            fd,
            input_events.as_mut_ptr() as *mut libc::c_void,
            MAX_INPUT_EV * mem::size_of::<libc::input_event>(),
        )
    };

    if n < 0 {
        return Err(io::Error::last_os_error());
    }

    let n = n as usize;
    if n % mem::size_of::<libc::input_event>() != 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("short read of {n} bytes"),
        ));
    }
    let n = n / mem::size_of::<libc::input_event>();

    // The first n elements of the array are initialized:
    Ok(input_events[..n]
        .iter()
        .map(|e| unsafe { e.assume_init() })
        .collect())
}

/// Set the `O_NONBLOCK` flag for the specified file.
pub(crate) fn set_nonblocking(f: &File) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(f.as_raw_fd(), libc::F_GETFL) };

    if flags < 0 {
        return Err(io::Error::last_os_error());
    }

    let res = unsafe { libc::fcntl(f.as_raw_fd(), libc::F_SETFL, flags | libc::O_NONBLOCK) };

    if res < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Read the name of the specified input device using the `EVIOCGNAME` ioctl.
pub(crate) fn read_name(f: &File) -> io::Result<String> {
    const DEVICE_NAME_MAX_LEN: usize = 256;

    let mut device_name = [0u8; DEVICE_NAME_MAX_LEN];

    let eviocgname = (IOC_READ << IOC_DIRSHIFT)
        | (('E' as libc::c_ulong) << IOC_TYPESHIFT)
        | (0x06 << IOC_NRSHIFT)
        | ((device_name.len() as libc::c_ulong) << IOC_SIZESHIFT);

    let res = unsafe { libc::ioctl(f.as_raw_fd(), eviocgname as _, device_name.as_mut_ptr()) };

    if res < 0 {
        return Err(io::Error::last_os_error());
    }

    let len = device_name
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(device_name.len());

    Ok(String::from_utf8_lossy(&device_name[..len]).into_owned())
}
