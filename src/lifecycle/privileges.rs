//! chroot and uid/gid switching.

use std::ffi::CString;
use std::io;
use std::path::Path;

/// Target user and group for the privilege drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub uid: libc::uid_t,
    pub gid: libc::gid_t,
}

pub fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

/// Resolve user and group names (or numeric ids) to an identity.
///
/// Without a group, a named user's primary group is used; a numeric user
/// with no passwd entry keeps the current gid.
pub fn resolve(user: Option<&str>, group: Option<&str>) -> Result<Identity, String> {
    let (uid, primary_gid) = match user {
        Some(name) => lookup_user(name)?,
        None => unsafe { (libc::getuid(), None) },
    };
    let gid = match group {
        Some(name) => lookup_group(name)?,
        None => primary_gid.unwrap_or_else(|| unsafe { libc::getgid() }),
    };
    Ok(Identity { uid, gid })
}

/// Make `root` the filesystem root and the working directory.
pub fn chroot(root: &Path) -> io::Result<()> {
    std::env::set_current_dir(root)?;
    std::os::unix::fs::chroot(".")?;
    std::env::set_current_dir("/")
}

/// Switch supplementary groups, gid and uid, in that order.
pub fn drop_to(id: &Identity) -> Result<(), String> {
    if !is_root() {
        return Err("switching user requires starting as root".to_string());
    }
    unsafe {
        if libc::setgroups(1, &id.gid) != 0 {
            return Err(format!("setgroups: {}", io::Error::last_os_error()));
        }
        if libc::setgid(id.gid) != 0 {
            return Err(format!("setgid({}): {}", id.gid, io::Error::last_os_error()));
        }
        if libc::setuid(id.uid) != 0 {
            return Err(format!("setuid({}): {}", id.uid, io::Error::last_os_error()));
        }
        if id.uid != 0 && libc::setuid(0) == 0 {
            return Err("root privileges could be regained".to_string());
        }
    }
    Ok(())
}

fn lookup_user(name: &str) -> Result<(libc::uid_t, Option<libc::gid_t>), String> {
    if let Ok(uid) = name.parse::<libc::uid_t>() {
        return Ok((uid, None));
    }
    let c_name = CString::new(name).map_err(|_| format!("invalid user name '{}'", name))?;
    let mut buf = lookup_buffer(libc::_SC_GETPW_R_SIZE_MAX);
    let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
    let mut result: *mut libc::passwd = std::ptr::null_mut();
    let rc = unsafe {
        libc::getpwnam_r(c_name.as_ptr(), &mut pwd, buf.as_mut_ptr(), buf.len(), &mut result)
    };
    if rc != 0 {
        return Err(format!("user '{}': {}", name, io::Error::from_raw_os_error(rc)));
    }
    if result.is_null() {
        return Err(format!("unknown user '{}'", name));
    }
    Ok((pwd.pw_uid, Some(pwd.pw_gid)))
}

fn lookup_group(name: &str) -> Result<libc::gid_t, String> {
    if let Ok(gid) = name.parse::<libc::gid_t>() {
        return Ok(gid);
    }
    let c_name = CString::new(name).map_err(|_| format!("invalid group name '{}'", name))?;
    let mut buf = lookup_buffer(libc::_SC_GETGR_R_SIZE_MAX);
    let mut grp: libc::group = unsafe { std::mem::zeroed() };
    let mut result: *mut libc::group = std::ptr::null_mut();
    let rc = unsafe {
        libc::getgrnam_r(c_name.as_ptr(), &mut grp, buf.as_mut_ptr(), buf.len(), &mut result)
    };
    if rc != 0 {
        return Err(format!("group '{}': {}", name, io::Error::from_raw_os_error(rc)));
    }
    if result.is_null() {
        return Err(format!("unknown group '{}'", name));
    }
    Ok(grp.gr_gid)
}

fn lookup_buffer(key: libc::c_int) -> Vec<libc::c_char> {
    let size = unsafe { libc::sysconf(key) };
    let size = if size > 0 { size as usize } else { 16 * 1024 };
    vec![0; size]
}
