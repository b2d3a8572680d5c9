//! Capability Decoding
//!
//! Turns the `CapEff`/`CapPrm` masks of `/proc/<pid>/status` into `CAP_*` names.

use crate::models::Capabilities;

const CAPABILITY_NAMES: [&str; 41] = [
    "CAP_CHOWN",
    "CAP_DAC_OVERRIDE",
    "CAP_DAC_READ_SEARCH",
    "CAP_FOWNER",
    "CAP_FSETID",
    "CAP_KILL",
    "CAP_SETGID",
    "CAP_SETUID",
    "CAP_SETPCAP",
    "CAP_LINUX_IMMUTABLE",
    "CAP_NET_BIND_SERVICE",
    "CAP_NET_BROADCAST",
    "CAP_NET_ADMIN",
    "CAP_NET_RAW",
    "CAP_IPC_LOCK",
    "CAP_IPC_OWNER",
    "CAP_SYS_MODULE",
    "CAP_SYS_RAWIO",
    "CAP_SYS_CHROOT",
    "CAP_SYS_PTRACE",
    "CAP_SYS_PACCT",
    "CAP_SYS_ADMIN",
    "CAP_SYS_BOOT",
    "CAP_SYS_NICE",
    "CAP_SYS_RESOURCE",
    "CAP_SYS_TIME",
    "CAP_SYS_TTY_CONFIG",
    "CAP_MKNOD",
    "CAP_LEASE",
    "CAP_AUDIT_WRITE",
    "CAP_AUDIT_CONTROL",
    "CAP_SETFCAP",
    "CAP_MAC_OVERRIDE",
    "CAP_MAC_ADMIN",
    "CAP_SYSLOG",
    "CAP_WAKE_ALARM",
    "CAP_BLOCK_SUSPEND",
    "CAP_AUDIT_READ",
    "CAP_PERFMON",
    "CAP_BPF",
    "CAP_CHECKPOINT_RESTORE",
];

/// Names the bits set in a capability mask, lowest bit first.
///
/// Bits beyond the known set are reported as `CAP_<bit>`.
pub fn decode_mask(mask: u64) -> Vec<String> {
    (0..64)
        .filter(|bit| mask & (1u64 << bit) != 0)
        .map(|bit| match CAPABILITY_NAMES.get(bit) {
            Some(name) => (*name).to_string(),
            None => format!("CAP_{bit}"),
        })
        .collect()
}

/// Fields of `/proc/<pid>/status` the provider uses.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProcStatus {
    pub uid: Option<String>,
    pub gid: Option<String>,
    pub capabilities: Capabilities,
}

/// Parses the contents of a `/proc/<pid>/status` file.
///
/// Unparseable lines are ignored; the real uid/gid is the first column.
pub fn parse_status(contents: &str) -> ProcStatus {
    let mut status = ProcStatus::default();
    for line in contents.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key {
            "Uid" => status.uid = value.split_whitespace().next().map(String::from),
            "Gid" => status.gid = value.split_whitespace().next().map(String::from),
            "CapEff" => {
                if let Ok(mask) = u64::from_str_radix(value, 16) {
                    status.capabilities.effective = decode_mask(mask);
                }
            }
            "CapPrm" => {
                if let Ok(mask) = u64::from_str_radix(value, 16) {
                    status.capabilities.permitted = decode_mask(mask);
                }
            }
            _ => {}
        }
    }
    status
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_empty_mask() {
        assert!(decode_mask(0).is_empty());
    }

    #[test]
    fn test_decode_known_bits() {
        assert_eq!(
            decode_mask(0b1000_0001),
            vec!["CAP_CHOWN".to_string(), "CAP_SETUID".to_string()]
        );
        assert_eq!(decode_mask(1 << 21), vec!["CAP_SYS_ADMIN".to_string()]);
    }

    #[test]
    fn test_decode_unknown_bit() {
        assert_eq!(decode_mask(1 << 63), vec!["CAP_63".to_string()]);
    }

    #[test]
    fn test_full_root_mask() {
        let names = decode_mask(0x0000_01ff_ffff_ffff);
        assert_eq!(names.len(), 41);
        assert_eq!(names.last().map(String::as_str), Some("CAP_CHECKPOINT_RESTORE"));
    }

    #[test]
    fn test_parse_status() {
        let contents = "Name:\tbash\nUid:\t1000\t1000\t1000\t1000\nGid:\t100\t100\t100\t100\n\
                        CapPrm:\t0000000000000000\nCapEff:\t0000000000000400\n";
        let status = parse_status(contents);

        assert_eq!(status.uid.as_deref(), Some("1000"));
        assert_eq!(status.gid.as_deref(), Some("100"));
        assert_eq!(status.capabilities.effective, vec!["CAP_NET_BIND_SERVICE".to_string()]);
        assert!(status.capabilities.permitted.is_empty());
    }
}
