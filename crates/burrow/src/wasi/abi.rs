//! WASI preview1 wire constants and guest-memory access.

/// Import module name for preview1.
pub const MODULE: &str = "wasi_snapshot_preview1";

/// Preview1 errno values used by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Errno {
    /// Permission denied
    Acces = 2,
    /// Bad file descriptor
    Badf = 8,
    /// File exists
    Exist = 20,
    /// Bad address
    Fault = 21,
    /// File too large
    Fbig = 22,
    /// Illegal byte sequence
    Ilseq = 25,
    /// Invalid argument
    Inval = 28,
    /// I/O error
    Io = 29,
    /// Is a directory
    Isdir = 31,
    /// Name too long
    Nametoolong = 37,
    /// No such file or directory
    Noent = 44,
    /// Function not supported
    Nosys = 52,
    /// Not a directory
    Notdir = 54,
    /// Value too large
    Overflow = 61,
    /// Invalid seek
    Spipe = 70,
}

impl Errno {
    /// Raw value returned to the guest.
    pub fn raw(self) -> i32 {
        self as i32
    }
}

/// `Ok` becomes errno 0.
pub fn errno(result: Result<(), Errno>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => e.raw(),
    }
}

/// `filetype` values.
pub mod filetype {
    /// Unknown
    pub const UNKNOWN: u8 = 0;
    /// Character device, used for stdio
    pub const CHARACTER_DEVICE: u8 = 2;
    /// Directory
    pub const DIRECTORY: u8 = 3;
    /// Regular file
    pub const REGULAR_FILE: u8 = 4;
}

/// `oflags` bits.
pub mod oflags {
    /// Create if missing
    pub const CREAT: u16 = 1 << 0;
    /// Fail unless a directory
    pub const DIRECTORY: u16 = 1 << 1;
    /// Fail if it exists
    pub const EXCL: u16 = 1 << 2;
    /// Truncate to zero length
    pub const TRUNC: u16 = 1 << 3;

    /// Every bit preview1 defines.
    pub const ALL: u16 = CREAT | DIRECTORY | EXCL | TRUNC;
}

/// `fdflags` bits.
pub mod fdflags {
    /// Writes always go to the end
    pub const APPEND: u16 = 1 << 0;
}

/// `whence` values.
pub mod whence {
    /// From the start
    pub const SET: u8 = 0;
    /// From the current offset
    pub const CUR: u8 = 1;
    /// From the end
    pub const END: u8 = 2;
}

/// `clockid` values.
pub mod clock {
    /// Wall clock
    pub const REALTIME: u32 = 0;
    /// Monotonic clock
    pub const MONOTONIC: u32 = 1;
    /// Process CPU time
    pub const PROCESS_CPUTIME: u32 = 2;
    /// Thread CPU time
    pub const THREAD_CPUTIME: u32 = 3;
}

/// Fixed size of a `dirent` header before the name bytes.
pub const DIRENT_SIZE: usize = 24;

/// Size of `filestat`.
pub const FILESTAT_SIZE: u32 = 64;

/// Size of `fdstat`.
pub const FDSTAT_SIZE: u32 = 24;

/// Rights reported for every descriptor. The engine does not enforce
/// rights, so everything is granted.
pub const ALL_RIGHTS: u64 = (1 << 30) - 1;

/// Bounds-checked view of guest linear memory.
#[derive(Debug)]
pub struct GuestMemory<'a> {
    bytes: &'a mut [u8],
}

impl<'a> GuestMemory<'a> {
    /// Wrap the guest's memory.
    pub fn new(bytes: &'a mut [u8]) -> Self {
        Self { bytes }
    }

    fn range(&self, ptr: u32, len: u32) -> Result<std::ops::Range<usize>, Errno> {
        let start = ptr as usize;
        let end = start.checked_add(len as usize).ok_or(Errno::Fault)?;
        if end > self.bytes.len() {
            return Err(Errno::Fault);
        }
        Ok(start..end)
    }

    /// Borrow `len` bytes at `ptr`.
    pub fn slice(&self, ptr: u32, len: u32) -> Result<&[u8], Errno> {
        let range = self.range(ptr, len)?;
        Ok(&self.bytes[range])
    }

    /// Mutably borrow `len` bytes at `ptr`.
    pub fn slice_mut(&mut self, ptr: u32, len: u32) -> Result<&mut [u8], Errno> {
        let range = self.range(ptr, len)?;
        Ok(&mut self.bytes[range])
    }

    /// Copy `data` to `ptr`.
    pub fn write(&mut self, ptr: u32, data: &[u8]) -> Result<(), Errno> {
        let len = u32::try_from(data.len()).map_err(|_| Errno::Fault)?;
        self.slice_mut(ptr, len)?.copy_from_slice(data);
        Ok(())
    }

    /// Little-endian u32 at `ptr`.
    pub fn read_u32(&self, ptr: u32) -> Result<u32, Errno> {
        let bytes = self.slice(ptr, 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Store a little-endian u32.
    pub fn write_u32(&mut self, ptr: u32, value: u32) -> Result<(), Errno> {
        self.write(ptr, &value.to_le_bytes())
    }

    /// Store a little-endian u64.
    pub fn write_u64(&mut self, ptr: u32, value: u64) -> Result<(), Errno> {
        self.write(ptr, &value.to_le_bytes())
    }

    /// UTF-8 string of `len` bytes at `ptr`.
    pub fn read_str(&self, ptr: u32, len: u32) -> Result<String, Errno> {
        let bytes = self.slice(ptr, len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| Errno::Ilseq)
    }

    /// `(buf, len)` pairs of an iovec array.
    pub fn iovecs(&self, ptr: u32, count: u32) -> Result<Vec<(u32, u32)>, Errno> {
        (0..count)
            .map(|i| {
                let base = ptr.checked_add(i.checked_mul(8).ok_or(Errno::Fault)?).ok_or(Errno::Fault)?;
                let len_ptr = base.checked_add(4).ok_or(Errno::Fault)?;
                Ok((self.read_u32(base)?, self.read_u32(len_ptr)?))
            })
            .collect()
    }

    /// Write NUL-terminated strings to `buf` and their addresses to `ptrs`.
    pub fn write_strings(&mut self, ptrs: u32, buf: u32, strings: &[String]) -> Result<(), Errno> {
        let mut cursor = buf;
        for (i, s) in strings.iter().enumerate() {
            let slot = ptrs
                .checked_add(u32::try_from(i * 4).map_err(|_| Errno::Fault)?)
                .ok_or(Errno::Fault)?;
            self.write_u32(slot, cursor)?;
            self.write(cursor, s.as_bytes())?;
            let end = cursor
                .checked_add(u32::try_from(s.len()).map_err(|_| Errno::Fault)?)
                .ok_or(Errno::Fault)?;
            self.write(end, &[0])?;
            cursor = end + 1;
        }
        Ok(())
    }
}
