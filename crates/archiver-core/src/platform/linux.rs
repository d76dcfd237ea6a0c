use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::Path;

/// `_IOW(0x94, 9, int)`
const FICLONE: u64 = 0x4004_9409;

/// Reflink `src` into a new file at `dst`. Fails with the ioctl's error on
/// filesystems without reflink support (ext4, tmpfs) and removes the empty
/// destination in that case.
pub fn ficlone(src: &Path, dst: &Path) -> io::Result<()> {
    let source = File::open(src)?;
    let target = OpenOptions::new().write(true).create_new(true).open(dst)?;

    let rc = unsafe { libc::ioctl(target.as_raw_fd(), FICLONE as _, source.as_raw_fd()) };
    if rc == -1 {
        let err = io::Error::last_os_error();
        drop(target);
        let _ = fs::remove_file(dst);
        return Err(err);
    }
    target.sync_all()
}
