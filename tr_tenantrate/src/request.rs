/// Shape of one request asking for admission
///
/// Counts and sizes are unsigned, so a request can never carry a negative
/// cost into the limiter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestInfo {
    pub read_count: u64,
    pub read_bytes: u64,
    pub write_count: u64,
    pub write_bytes: u64,
}

impl RequestInfo {
    pub const fn new(read_count: u64, read_bytes: u64, write_count: u64, write_bytes: u64) -> Self {
        Self { read_count, read_bytes, write_count, write_bytes }
    }

    /// A batch of `count` reads totalling `bytes`
    pub const fn read(count: u64, bytes: u64) -> Self {
        Self::new(count, bytes, 0, 0)
    }

    /// A batch of `count` writes totalling `bytes`
    pub const fn write(count: u64, bytes: u64) -> Self {
        Self::new(0, 0, count, bytes)
    }

    /// Total operations in the request
    pub fn operations(&self) -> u64 {
        self.read_count.saturating_add(self.write_count)
    }

    pub fn is_write(&self) -> bool {
        self.write_count > 0 || self.write_bytes > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors() {
        let read = RequestInfo::read(2, 4096);
        assert_eq!(read.operations(), 2);
        assert!(!read.is_write());

        let write = RequestInfo::write(1, 500);
        assert_eq!(write.write_bytes, 500);
        assert!(write.is_write());

        assert_eq!(RequestInfo::new(u64::MAX, 0, 1, 0).operations(), u64::MAX);
        assert_eq!(RequestInfo::default().operations(), 0);
    }
}
