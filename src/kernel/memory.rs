//! Process memory readings from `/proc/self/statm`.

/// Sizes in bytes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemorySnapshot {
    pub virtual_bytes: u64,
    pub resident_bytes: u64,
}

pub fn page_size() -> u64 {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as u64
    } else {
        4096
    }
}

/// Current address space and resident set, `None` where procfs is absent.
pub fn snapshot() -> Option<MemorySnapshot> {
    let text = std::fs::read_to_string("/proc/self/statm").ok()?;
    parse_statm(&text, page_size())
}

pub fn resident_bytes() -> Option<u64> {
    snapshot().map(|s| s.resident_bytes)
}

fn parse_statm(text: &str, page_size: u64) -> Option<MemorySnapshot> {
    let mut fields = text.split_whitespace().map(|f| f.parse::<u64>().ok());
    let size = fields.next()??;
    let resident = fields.next()??;
    Some(MemorySnapshot {
        virtual_bytes: size.saturating_mul(page_size),
        resident_bytes: resident.saturating_mul(page_size),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_statm() {
        let snap = parse_statm("2000 300 100 10 0 500 0\n", 4096).unwrap();
        assert_eq!(snap.virtual_bytes, 2000 * 4096);
        assert_eq!(snap.resident_bytes, 300 * 4096);
        assert!(parse_statm("garbage", 4096).is_none());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_live_snapshot() {
        let snap = snapshot().unwrap();
        assert!(snap.resident_bytes > 0);
        assert!(snap.virtual_bytes >= snap.resident_bytes);
    }
}
