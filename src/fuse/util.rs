/*
 * Tagdir
 * Copyright (C) 2021 The Tagdir authors
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <http://www.gnu.org/licenses/>.
 */

use crate::common::constants::DEVICE_ID;
use crate::common::mounts;
use crate::sql::types::Attr;
use fuse_shim::conf::{FuseConfig, MountConfig};
use fuse_shim::{stat, statvfs, timespec, O_RDWR, O_WRONLY};
use libc::mode_t;
use log::{debug, info};
use std::ffi::CString;
use std::fs::OpenOptions;
use std::os::raw::{c_char, c_void};
use std::path::Path;

const UTIL_TAG: &str = "util";

struct Stat {
    device: u64,
    inode: u64,
    mode: mode_t,
    nlink: u64,
    uid: u32,
    gid: u32,
    size: i64,
    atime: timespec,
    mtime: timespec,
    ctime: timespec,
}

impl From<Stat> for stat {
    fn from(s: Stat) -> Self {
        stat {
            st_dev: s.device,
            st_ino: s.inode,
            // good read: https://sourceforge.net/p/fuse/mailman/message/29281571/
            st_nlink: s.nlink,
            st_mode: s.mode,
            st_uid: s.uid,
            st_gid: s.gid,
            __pad0: 0,
            st_rdev: 0,
            st_size: s.size,
            st_blksize: 4096,
            st_blocks: 8,
            st_atim: s.atime,
            st_mtim: s.mtime,
            st_ctim: s.ctime,
            __glibc_reserved: [0; 3],
        }
    }
}

fn secs_to_timespec(secs: i64) -> timespec {
    timespec {
        tv_sec: secs,
        tv_nsec: 0,
    }
}

/// Renders a persisted attr row as the stat the kernel wants.
pub fn attr_stat(attr: &Attr, size: i64) -> stat {
    let nlink = if attr.is_dir() { 2 } else { 1 };
    Stat {
        device: DEVICE_ID,
        inode: attr.id as u64,
        mode: attr.mode,
        nlink,
        uid: attr.uid,
        gid: attr.gid,
        size,
        atime: secs_to_timespec(attr.atime),
        mtime: secs_to_timespec(attr.mtime),
        ctime: secs_to_timespec(attr.ctime),
    }
    .into()
}

/// lstat on the host filesystem, for paths resolved inside an entity.
pub fn host_stat(path: &Path) -> std::io::Result<stat> {
    let c_path = CString::new(path.as_os_str().to_string_lossy().to_string())?;
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    let err = unsafe { libc::lstat(c_path.as_ptr(), &mut st) };
    if err == -1 {
        return Err(std::io::Error::last_os_error());
    }

    Ok(Stat {
        device: st.st_dev,
        inode: st.st_ino,
        mode: st.st_mode,
        nlink: st.st_nlink,
        uid: st.st_uid,
        gid: st.st_gid,
        size: st.st_size,
        atime: timespec {
            tv_sec: st.st_atime,
            tv_nsec: st.st_atime_nsec,
        },
        mtime: timespec {
            tv_sec: st.st_mtime,
            tv_nsec: st.st_mtime_nsec,
        },
        ctime: timespec {
            tv_sec: st.st_ctime,
            tv_nsec: st.st_ctime_nsec,
        },
    }
    .into())
}

pub fn host_statvfs(path: &Path) -> std::io::Result<statvfs> {
    let c_path = CString::new(path.as_os_str().to_string_lossy().to_string())?;
    let mut vfs: libc::statvfs = unsafe { std::mem::zeroed() };
    let err = unsafe { libc::statvfs(c_path.as_ptr(), &mut vfs) };
    if err == -1 {
        return Err(std::io::Error::last_os_error());
    }

    let mut res = fuse_shim::new_statvfs();
    res.f_bsize = vfs.f_bsize;
    res.f_frsize = vfs.f_frsize;
    res.f_blocks = vfs.f_blocks;
    res.f_bfree = vfs.f_bfree;
    res.f_bavail = vfs.f_bavail;
    res.f_files = vfs.f_files;
    res.f_ffree = vfs.f_ffree;
    res.f_favail = vfs.f_favail;
    res.f_fsid = vfs.f_fsid;
    res.f_flag = vfs.f_flag;
    res.f_namemax = vfs.f_namemax;
    Ok(res)
}

/// What the synthetic parts of the tree report: a roomy make-believe volume,
/// since the store itself holds no file content.
pub fn synthetic_statvfs() -> statvfs {
    let mut res = fuse_shim::new_statvfs();
    res.f_bsize = 4096;
    res.f_frsize = 4096;

    // 100 GB worth of blocks
    res.f_blocks = (100 * 1024u64.pow(3u32)) / res.f_bsize;
    res.f_bfree = res.f_blocks;
    res.f_bavail = res.f_blocks;
    res.f_files = 100;
    res.f_ffree = 10_000;
    res.f_favail = res.f_ffree;
    res
}

pub fn make_mount_config(name: &str) -> MountConfig {
    let mut mount_conf = MountConfig::default();
    mount_conf.direct_io = Some(true);
    mount_conf.fsname = Some(mounts::device_name(name));
    mount_conf.subtype = Some("tagdir".to_string());
    mount_conf.default_permissions = Some(true); // kernel-enforced permission checks
    mount_conf.allow_other = Some(true);
    mount_conf
}

pub fn make_fuse_config() -> FuseConfig {
    let mut fuse_conf = FuseConfig::default();
    // the database can change underneath us through the side channel and the
    // watcher, so the kernel must not cache names or attrs
    fuse_conf.attr_timeout = Some(0);
    fuse_conf.entry_timeout = Some(0);
    fuse_conf.hard_remove = Some(true);
    fuse_conf.kernel_cache = Some(false);
    fuse_conf
}

pub fn open_opts_from_mode(opts: &mut OpenOptions, mode: i32) -> &OpenOptions {
    // O_RDONLY is 0, so it can't be bitwise-tested like the others
    let mut fopts = opts.read(true).write(false);

    let mode = mode as u32;
    if mode & O_RDWR > 0 {
        fopts = fopts.read(true).write(true)
    } else if mode & O_WRONLY > 0 {
        fopts = fopts.read(false).write(true)
    }
    fopts
}

pub fn host_access(path: &Path, mask: i32) -> std::io::Result<()> {
    let c_path = CString::new(path.to_string_lossy().to_string())?;
    let err = unsafe { libc::access(c_path.as_ptr(), mask) };
    if err == -1 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

pub fn truncate(path: &Path, offset: i64) -> std::io::Result<()> {
    let c_path = CString::new(path.to_string_lossy().to_string()).unwrap();
    let err;
    unsafe { err = libc::truncate(c_path.as_ptr(), offset) }
    if err == -1 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

pub fn host_chmod(path: &Path, mode: mode_t) -> std::io::Result<()> {
    let c_path = CString::new(path.to_string_lossy().to_string())?;
    let err = unsafe { libc::chmod(c_path.as_ptr(), mode) };
    if err == -1 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

pub fn host_chown(path: &Path, uid: libc::uid_t, gid: libc::gid_t) -> std::io::Result<()> {
    let c_path = CString::new(path.to_string_lossy().to_string())?;
    let err = unsafe { libc::chown(c_path.as_ptr(), uid, gid) };
    if err == -1 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

pub fn host_utimens(path: &Path, atime: timespec, mtime: timespec) -> std::io::Result<()> {
    let c_path = CString::new(path.to_string_lossy().to_string())?;
    let times = [
        libc::timespec {
            tv_sec: atime.tv_sec,
            tv_nsec: atime.tv_nsec,
        },
        libc::timespec {
            tv_sec: mtime.tv_sec,
            tv_nsec: mtime.tv_nsec,
        },
    ];
    let err = unsafe { libc::utimensat(libc::AT_FDCWD, c_path.as_ptr(), times.as_ptr(), 0) };
    if err == -1 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

pub fn getxattr(path: &Path, name: &str) -> std::io::Result<Vec<u8>> {
    info!(target: UTIL_TAG, "getxattr {} on {:?}", name, path);

    let c_path = CString::new(path.to_string_lossy().to_string())?;
    let c_name = CString::new(name)?;

    let desired_size = unsafe {
        libc::getxattr(
            c_path.as_ptr(),
            c_name.as_ptr() as *const c_char,
            std::ptr::null_mut(),
            0,
        )
    };

    if desired_size == -1 {
        return Err(std::io::Error::last_os_error());
    }

    let mut value: Vec<u8> = vec![0; desired_size as usize];

    let read_size = unsafe {
        libc::getxattr(
            c_path.as_ptr(),
            c_name.as_ptr() as *const c_char,
            value.as_mut_ptr() as *mut c_void,
            value.len(),
        )
    };

    if read_size == -1 {
        Err(std::io::Error::last_os_error())
    } else {
        value.truncate(read_size as usize);
        Ok(value)
    }
}

pub fn setxattr(path: &Path, name: &str, value: &[u8], flags: i32) -> std::io::Result<()> {
    info!(
        target: UTIL_TAG,
        "setxattr {} on {:?}, flags {}", name, path, flags
    );

    let c_path = CString::new(path.to_string_lossy().to_string())?;
    let c_name = CString::new(name)?;

    let err = unsafe {
        libc::setxattr(
            c_path.as_ptr(),
            c_name.as_ptr() as *const c_char,
            value.as_ptr() as *const c_void,
            value.len(),
            flags,
        )
    };

    if err == -1 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

pub fn listxattr(path: &Path) -> std::io::Result<Vec<String>> {
    info!(target: UTIL_TAG, "listxattr on {:?}", path);
    let c_path = CString::new(path.to_string_lossy().to_string())?;

    // first get the size we need to allocate
    let err_or_size = unsafe { libc::listxattr(c_path.as_ptr(), std::ptr::null_mut(), 0) };

    if err_or_size == -1 {
        return Err(std::io::Error::last_os_error());
    }

    let mut buf: Vec<u8> = vec![0; err_or_size as usize];

    let err_or_size =
        unsafe { libc::listxattr(c_path.as_ptr(), buf.as_mut_ptr() as *mut i8, buf.len()) };

    if err_or_size == -1 {
        return Err(std::io::Error::last_os_error());
    }

    debug!(target: UTIL_TAG, "Fetched xattr buffer {:?}", buf);
    let mut attrs = vec![];
    for chunk in buf.split(|c| c == &0u8) {
        if chunk.is_empty() {
            continue;
        }
        let name = String::from_utf8_lossy(chunk).to_string();
        attrs.push(name);
    }

    Ok(attrs)
}

pub fn removexattr(path: &Path, name: &str) -> std::io::Result<()> {
    info!(target: UTIL_TAG, "removexattr {} on {:?}", name, path);
    let c_path = CString::new(path.to_string_lossy().to_string())?;
    let c_name = CString::new(name)?;

    let err = unsafe { libc::removexattr(c_path.as_ptr(), c_name.as_ptr()) };

    if err == -1 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}
