//! Preview1 syscall semantics, independent of the wasm runtime.
//!
//! Every method takes the guest's memory explicitly and returns the errno
//! the import should hand back. The engine wraps each one in a thin
//! wasmtime host function.

use std::collections::BTreeMap;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use rand::RngCore;

use super::abi::{
    self, Errno, FDSTAT_SIZE, FILESTAT_SIZE, GuestMemory, clock, filetype, oflags, whence,
};
use super::fd::{FdEntry, FdTable, PREOPEN_FD, SnapshotFs, inode};
use crate::limits::{LimitedBuffer, OutputLimits};
use crate::workspace::join_path;

/// Everything a guest can observe for one execution.
#[derive(Debug)]
pub(crate) struct GuestContext {
    args: Vec<String>,
    env: Vec<String>,
    stdin: Vec<u8>,
    stdin_pos: usize,
    stdout: LimitedBuffer,
    stderr: LimitedBuffer,
    fs: SnapshotFs,
    fds: FdTable,
    started: Instant,
    max_file_bytes: u64,
}

/// What is left once the guest is done.
#[derive(Debug)]
pub(crate) struct GuestOutput {
    pub stdout: LimitedBuffer,
    pub stderr: LimitedBuffer,
    pub files: BTreeMap<String, Vec<u8>>,
}

impl GuestContext {
    pub(crate) fn new(
        args: Vec<String>,
        env: &BTreeMap<String, String>,
        cwd: &str,
        stdin: Vec<u8>,
        files: BTreeMap<String, Vec<u8>>,
        limits: &OutputLimits,
        max_file_bytes: u64,
    ) -> Self {
        let (stdout, stderr) = limits.buffers();
        let mut fs = SnapshotFs::new(files);
        fs.ensure_dir(cwd);
        Self {
            args,
            env: env.iter().map(|(k, v)| format!("{k}={v}")).collect(),
            stdin,
            stdin_pos: 0,
            stdout,
            stderr,
            fs,
            fds: FdTable::new(cwd),
            started: Instant::now(),
            max_file_bytes,
        }
    }

    /// Append host-side diagnostics to the guest's stderr.
    pub(crate) fn write_stderr(&mut self, data: &[u8]) {
        self.stderr.write(data);
    }

    pub(crate) fn finish(self) -> GuestOutput {
        GuestOutput {
            stdout: self.stdout,
            stderr: self.stderr,
            files: self.fs.into_files(),
        }
    }

    pub(crate) fn args_sizes_get(
        &self,
        mem: &mut GuestMemory<'_>,
        count_ptr: u32,
        size_ptr: u32,
    ) -> Result<(), Errno> {
        write_sizes(mem, &self.args, count_ptr, size_ptr)
    }

    pub(crate) fn args_get(
        &self,
        mem: &mut GuestMemory<'_>,
        ptrs: u32,
        buf: u32,
    ) -> Result<(), Errno> {
        mem.write_strings(ptrs, buf, &self.args)
    }

    pub(crate) fn environ_sizes_get(
        &self,
        mem: &mut GuestMemory<'_>,
        count_ptr: u32,
        size_ptr: u32,
    ) -> Result<(), Errno> {
        write_sizes(mem, &self.env, count_ptr, size_ptr)
    }

    pub(crate) fn environ_get(
        &self,
        mem: &mut GuestMemory<'_>,
        ptrs: u32,
        buf: u32,
    ) -> Result<(), Errno> {
        mem.write_strings(ptrs, buf, &self.env)
    }

    pub(crate) fn fd_write(
        &mut self,
        mem: &mut GuestMemory<'_>,
        fd: u32,
        iovs: u32,
        iovs_len: u32,
        nwritten_ptr: u32,
    ) -> Result<(), Errno> {
        let mut data = Vec::new();
        for (ptr, len) in mem.iovecs(iovs, iovs_len)? {
            data.extend_from_slice(mem.slice(ptr, len)?);
        }
        let written = match fd {
            1 => self.stdout.write(&data),
            2 => self.stderr.write(&data),
            0 => return Err(Errno::Badf),
            fd => self.write_file(fd, &data)?,
        };
        mem.write_u32(nwritten_ptr, to_u32(written)?)
    }

    fn write_file(&mut self, fd: u32, data: &[u8]) -> Result<usize, Errno> {
        let (path, offset, append) = match self.fds.get_mut(fd) {
            Some(FdEntry::File {
                path,
                offset,
                append,
            }) => (path, offset, *append),
            _ => return Err(Errno::Badf),
        };
        let file = self.fs.file_mut(path).ok_or(Errno::Badf)?;
        let start = if append {
            file.len()
        } else {
            usize::try_from(*offset).map_err(|_| Errno::Overflow)?
        };
        let end = start.checked_add(data.len()).ok_or(Errno::Overflow)?;
        if end as u64 > self.max_file_bytes {
            return Err(Errno::Fbig);
        }
        if file.len() < end {
            file.resize(end, 0);
        }
        file[start..end].copy_from_slice(data);
        *offset = end as u64;
        Ok(data.len())
    }

    pub(crate) fn fd_read(
        &mut self,
        mem: &mut GuestMemory<'_>,
        fd: u32,
        iovs: u32,
        iovs_len: u32,
        nread_ptr: u32,
    ) -> Result<(), Errno> {
        let iovs = mem.iovecs(iovs, iovs_len)?;
        let capacity = iovs
            .iter()
            .map(|(_, len)| *len as usize)
            .fold(0usize, usize::saturating_add);
        let data = match fd {
            0 => {
                let available = &self.stdin[self.stdin_pos..];
                let chunk = available[..available.len().min(capacity)].to_vec();
                self.stdin_pos += chunk.len();
                chunk
            }
            1 | 2 => return Err(Errno::Badf),
            fd => self.read_file(fd, capacity)?,
        };

        let mut cursor = 0;
        for (ptr, len) in iovs {
            if cursor >= data.len() {
                break;
            }
            let n = (len as usize).min(data.len() - cursor);
            mem.write(ptr, &data[cursor..cursor + n])?;
            cursor += n;
        }
        mem.write_u32(nread_ptr, to_u32(cursor)?)
    }

    fn read_file(&mut self, fd: u32, max: usize) -> Result<Vec<u8>, Errno> {
        let (path, offset) = match self.fds.get_mut(fd) {
            Some(FdEntry::File { path, offset, .. }) => (path, offset),
            Some(FdEntry::Dir { .. }) => return Err(Errno::Isdir),
            None => return Err(Errno::Badf),
        };
        let file = self.fs.file(path).ok_or(Errno::Badf)?;
        let start = usize::try_from(*offset).unwrap_or(usize::MAX).min(file.len());
        let end = start.saturating_add(max).min(file.len());
        *offset += (end - start) as u64;
        Ok(file[start..end].to_vec())
    }

    pub(crate) fn fd_seek(
        &mut self,
        mem: &mut GuestMemory<'_>,
        fd: u32,
        delta: i64,
        from: u32,
        newoffset_ptr: u32,
    ) -> Result<(), Errno> {
        let (path, offset) = match self.fds.get_mut(fd) {
            Some(FdEntry::File { path, offset, .. }) => (path, offset),
            Some(FdEntry::Dir { .. }) => return Err(Errno::Badf),
            None if fd <= 2 => return Err(Errno::Spipe),
            None => return Err(Errno::Badf),
        };
        let len = self.fs.file(path).map_or(0, |f| f.len() as u64);
        let base = match u8::try_from(from) {
            Ok(whence::SET) => 0,
            Ok(whence::CUR) => *offset,
            Ok(whence::END) => len,
            _ => return Err(Errno::Inval),
        };
        let target = i128::from(base) + i128::from(delta);
        if target < 0 {
            return Err(Errno::Inval);
        }
        let target = u64::try_from(target).map_err(|_| Errno::Overflow)?;
        *offset = target;
        mem.write_u64(newoffset_ptr, target)
    }

    pub(crate) fn fd_tell(
        &self,
        mem: &mut GuestMemory<'_>,
        fd: u32,
        offset_ptr: u32,
    ) -> Result<(), Errno> {
        match self.fds.get(fd) {
            Some(FdEntry::File { offset, .. }) => mem.write_u64(offset_ptr, *offset),
            Some(FdEntry::Dir { .. }) => Err(Errno::Badf),
            None if fd <= 2 => Err(Errno::Spipe),
            None => Err(Errno::Badf),
        }
    }

    pub(crate) fn fd_close(&mut self, fd: u32) -> Result<(), Errno> {
        if fd <= 2 {
            return Ok(());
        }
        self.fds.remove(fd).map(|_| ()).ok_or(Errno::Badf)
    }

    pub(crate) fn fd_prestat_get(
        &self,
        mem: &mut GuestMemory<'_>,
        fd: u32,
        prestat_ptr: u32,
    ) -> Result<(), Errno> {
        let name = self.preopen_name(fd)?;
        // prestat: u8 tag (0 = dir), padded to 4, then u32 name length
        mem.write_u32(prestat_ptr, 0)?;
        mem.write_u32(prestat_ptr + 4, to_u32(name.len())?)
    }

    pub(crate) fn fd_prestat_dir_name(
        &self,
        mem: &mut GuestMemory<'_>,
        fd: u32,
        path_ptr: u32,
        path_len: u32,
    ) -> Result<(), Errno> {
        let name = self.preopen_name(fd)?;
        if (path_len as usize) < name.len() {
            return Err(Errno::Nametoolong);
        }
        mem.write(path_ptr, name.as_bytes())
    }

    fn preopen_name(&self, fd: u32) -> Result<&str, Errno> {
        match self.fds.get(fd) {
            Some(FdEntry::Dir { name, .. }) if fd == PREOPEN_FD => Ok(name),
            _ => Err(Errno::Badf),
        }
    }

    pub(crate) fn fd_fdstat_get(
        &self,
        mem: &mut GuestMemory<'_>,
        fd: u32,
        stat_ptr: u32,
    ) -> Result<(), Errno> {
        let (kind, flags) = match self.fds.get(fd) {
            Some(FdEntry::Dir { .. }) => (filetype::DIRECTORY, 0),
            Some(FdEntry::File { append, .. }) => (
                filetype::REGULAR_FILE,
                if *append { abi::fdflags::APPEND } else { 0 },
            ),
            None if fd <= 2 => (filetype::CHARACTER_DEVICE, 0),
            None => return Err(Errno::Badf),
        };
        mem.slice_mut(stat_ptr, FDSTAT_SIZE)?.fill(0);
        mem.write(stat_ptr, &[kind])?;
        mem.write(stat_ptr + 2, &flags.to_le_bytes())?;
        mem.write_u64(stat_ptr + 8, abi::ALL_RIGHTS)?;
        mem.write_u64(stat_ptr + 16, abi::ALL_RIGHTS)
    }

    pub(crate) fn fd_filestat_get(
        &self,
        mem: &mut GuestMemory<'_>,
        fd: u32,
        stat_ptr: u32,
    ) -> Result<(), Errno> {
        let (kind, path) = match self.fds.get(fd) {
            Some(FdEntry::Dir { path, .. }) => (filetype::DIRECTORY, path.as_str()),
            Some(FdEntry::File { path, .. }) => (filetype::REGULAR_FILE, path.as_str()),
            None if fd <= 2 => return write_filestat(mem, stat_ptr, filetype::CHARACTER_DEVICE, 0, 0),
            None => return Err(Errno::Badf),
        };
        let size = self.fs.file(path).map_or(0, |f| f.len() as u64);
        write_filestat(mem, stat_ptr, kind, inode(path), size)
    }

    pub(crate) fn path_filestat_get(
        &self,
        mem: &mut GuestMemory<'_>,
        dirfd: u32,
        path_ptr: u32,
        path_len: u32,
        stat_ptr: u32,
    ) -> Result<(), Errno> {
        let path = self.fds.resolve(dirfd, &mem.read_str(path_ptr, path_len)?)?;
        let kind = self.fs.filetype(&path).ok_or(Errno::Noent)?;
        let size = self.fs.file(&path).map_or(0, |f| f.len() as u64);
        write_filestat(mem, stat_ptr, kind, inode(&path), size)
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn path_open(
        &mut self,
        mem: &mut GuestMemory<'_>,
        dirfd: u32,
        path_ptr: u32,
        path_len: u32,
        open_flags: u32,
        fd_flags: u32,
        fd_ptr: u32,
    ) -> Result<(), Errno> {
        mem.slice_mut(fd_ptr, 4)?;
        let path = self.fds.resolve(dirfd, &mem.read_str(path_ptr, path_len)?)?;
        let open_flags = u16::try_from(open_flags).map_err(|_| Errno::Inval)?;
        if open_flags & !oflags::ALL != 0 {
            return Err(Errno::Inval);
        }
        let has = |flag: u16| open_flags & flag != 0;
        let append = u16::try_from(fd_flags).map_err(|_| Errno::Inval)? & abi::fdflags::APPEND != 0;

        let entry = match self.fs.filetype(&path) {
            Some(_) if has(oflags::CREAT) && has(oflags::EXCL) => return Err(Errno::Exist),
            Some(filetype::DIRECTORY) => {
                if has(oflags::CREAT) || has(oflags::TRUNC) {
                    return Err(Errno::Isdir);
                }
                FdEntry::Dir {
                    name: path.clone(),
                    path,
                }
            }
            Some(_) => {
                if has(oflags::DIRECTORY) {
                    return Err(Errno::Notdir);
                }
                if has(oflags::TRUNC)
                    && let Some(file) = self.fs.file_mut(&path)
                {
                    file.clear();
                }
                FdEntry::File {
                    path,
                    offset: 0,
                    append,
                }
            }
            None if !has(oflags::CREAT) => return Err(Errno::Noent),
            None if has(oflags::DIRECTORY) => return Err(Errno::Inval),
            None => {
                self.fs.create_file(&path)?;
                FdEntry::File {
                    path,
                    offset: 0,
                    append,
                }
            }
        };
        let fd = self.fds.insert(entry)?;
        tracing::trace!(fd, "Guest opened descriptor");
        mem.write_u32(fd_ptr, fd)
    }

    pub(crate) fn path_unlink_file(
        &mut self,
        mem: &mut GuestMemory<'_>,
        dirfd: u32,
        path_ptr: u32,
        path_len: u32,
    ) -> Result<(), Errno> {
        let path = self.fds.resolve(dirfd, &mem.read_str(path_ptr, path_len)?)?;
        self.fs.remove_file(&path)
    }

    pub(crate) fn path_create_directory(
        &mut self,
        mem: &mut GuestMemory<'_>,
        dirfd: u32,
        path_ptr: u32,
        path_len: u32,
    ) -> Result<(), Errno> {
        let path = self.fds.resolve(dirfd, &mem.read_str(path_ptr, path_len)?)?;
        self.fs.create_dir(&path)
    }

    /// Entries are serialized from `cookie` onward until `buf_len` is
    /// reached. The last one may be cut short, in which case `bufused`
    /// equals `buf_len` and the guest retries with a larger buffer.
    pub(crate) fn fd_readdir(
        &self,
        mem: &mut GuestMemory<'_>,
        fd: u32,
        buf: u32,
        buf_len: u32,
        cookie: u64,
        bufused_ptr: u32,
    ) -> Result<(), Errno> {
        let dir = match self.fds.get(fd) {
            Some(FdEntry::Dir { path, .. }) => path,
            Some(FdEntry::File { .. }) => return Err(Errno::Notdir),
            None => return Err(Errno::Badf),
        };
        let limit = buf_len as usize;
        let start = usize::try_from(cookie).unwrap_or(usize::MAX);
        let mut out = Vec::new();
        for (index, (name, kind)) in self.fs.list(dir).into_iter().enumerate().skip(start) {
            if out.len() >= limit {
                break;
            }
            let next = index as u64 + 1;
            out.extend_from_slice(&next.to_le_bytes());
            out.extend_from_slice(&inode(&join_path(dir, &name)).to_le_bytes());
            out.extend_from_slice(&to_u32(name.len())?.to_le_bytes());
            out.push(kind);
            out.extend_from_slice(&[0; 3]);
            out.extend_from_slice(name.as_bytes());
        }
        out.truncate(limit);
        mem.write(buf, &out)?;
        mem.write_u32(bufused_ptr, to_u32(out.len())?)
    }

    pub(crate) fn clock_time_get(
        &self,
        mem: &mut GuestMemory<'_>,
        clock_id: u32,
        time_ptr: u32,
    ) -> Result<(), Errno> {
        let elapsed = match clock_id {
            clock::REALTIME => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_err(|_| Errno::Io)?,
            clock::MONOTONIC | clock::PROCESS_CPUTIME | clock::THREAD_CPUTIME => {
                self.started.elapsed()
            }
            _ => return Err(Errno::Inval),
        };
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        mem.write_u64(time_ptr, nanos)
    }

    /// Bytes from the thread-local CSPRNG, reseeded from the OS.
    pub(crate) fn random_get(
        &self,
        mem: &mut GuestMemory<'_>,
        buf: u32,
        buf_len: u32,
    ) -> Result<(), Errno> {
        let bytes = mem.slice_mut(buf, buf_len)?;
        rand::thread_rng()
            .try_fill_bytes(bytes)
            .map_err(|_| Errno::Io)
    }
}

fn to_u32(n: usize) -> Result<u32, Errno> {
    u32::try_from(n).map_err(|_| Errno::Overflow)
}

fn write_sizes(
    mem: &mut GuestMemory<'_>,
    strings: &[String],
    count_ptr: u32,
    size_ptr: u32,
) -> Result<(), Errno> {
    let size: usize = strings.iter().map(|s| s.len() + 1).sum();
    mem.write_u32(count_ptr, to_u32(strings.len())?)?;
    mem.write_u32(size_ptr, to_u32(size)?)
}

fn write_filestat(
    mem: &mut GuestMemory<'_>,
    ptr: u32,
    kind: u8,
    ino: u64,
    size: u64,
) -> Result<(), Errno> {
    mem.slice_mut(ptr, FILESTAT_SIZE)?.fill(0);
    mem.write_u64(ptr + 8, ino)?;
    mem.write(ptr + 16, &[kind])?;
    mem.write_u64(ptr + 24, 1)?;
    mem.write_u64(ptr + 32, size)
}
