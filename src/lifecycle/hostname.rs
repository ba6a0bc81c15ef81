//! Canonical host name lookup, done while the resolver files are still
//! reachable.

use std::ffi::{CStr, CString};
use std::ptr;

/// Resolve `name` to its canonical form through `getaddrinfo`.
pub fn canonical_name(name: &str) -> Result<String, String> {
    let c_name = CString::new(name).map_err(|_| format!("invalid host name {:?}", name))?;

    // SAFETY: addrinfo is plain data; zeroed is the documented empty hint
    let mut hints: libc::addrinfo = unsafe { std::mem::zeroed() };
    hints.ai_family = libc::AF_UNSPEC;
    hints.ai_socktype = libc::SOCK_STREAM;
    hints.ai_flags = libc::AI_CANONNAME;

    let mut result: *mut libc::addrinfo = ptr::null_mut();
    // SAFETY: all pointers are valid; result is freed below on success
    let rc = unsafe { libc::getaddrinfo(c_name.as_ptr(), ptr::null(), &hints, &mut result) };
    if rc != 0 {
        // SAFETY: gai_strerror returns a static string
        let reason = unsafe { CStr::from_ptr(libc::gai_strerror(rc)) };
        return Err(format!("cannot resolve {}: {}", name, reason.to_string_lossy()));
    }

    // SAFETY: getaddrinfo succeeded, so result points to at least one entry
    let canon = unsafe {
        let first = &*result;
        let canon = if first.ai_canonname.is_null() {
            None
        } else {
            Some(CStr::from_ptr(first.ai_canonname).to_string_lossy().into_owned())
        };
        libc::freeaddrinfo(result);
        canon
    };

    match canon {
        Some(c) if !c.is_empty() => Ok(c),
        _ => Err(format!("no canonical name for {}", name)),
    }
}
