use std::path::Path;

/// Filesystem types that carry SMB/CIFS shares.
const NETWORK_SHARE_TYPES: &[&str] = &["cifs", "smb3", "smbfs"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub source: String,
    pub target: String,
    pub fstype: String,
    pub options: Vec<String>,
}

impl MountEntry {
    pub fn is_network_share(&self) -> bool {
        NETWORK_SHARE_TYPES.contains(&self.fstype.as_str())
    }

    pub fn is_read_only(&self) -> bool {
        self.options.iter().any(|o| o == "ro" || o == "rdonly" || o == "read-only")
    }
}

/// Parse `/proc/mounts` text (Linux).
///
/// Format per line: `<source> <target> <fstype> <options> <dump> <pass>`.
/// Spaces and other special characters in fields are octal-escaped (`\040`).
pub fn parse_proc_mounts(text: &str) -> Vec<MountEntry> {
    text.lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let source = parts.next()?;
            let target = parts.next()?;
            let fstype = parts.next()?;
            let options = parts.next().unwrap_or_default();
            Some(MountEntry {
                source: unescape_octal(source),
                target: unescape_octal(target),
                fstype: fstype.to_string(),
                options: options.split(',').map(str::to_string).collect(),
            })
        })
        .collect()
}

/// Parse `mount` command output (macOS).
///
/// Format per line: `<source> on <target> (<fstype>, <option>, ...)`.
/// SMB sources carry the user (`//user@host/share`), which is dropped.
pub fn parse_mount_output(text: &str) -> Vec<MountEntry> {
    text.lines()
        .filter_map(|line| {
            let (source, rest) = line.split_once(" on ")?;
            let (target, opts) = rest.rsplit_once(" (")?;
            let mut opts = opts.trim_end_matches(')').split(',').map(str::trim);
            let fstype = opts.next()?.to_string();
            let options = opts.map(str::to_string).collect();
            let source = source.trim();
            let source = match source.strip_prefix("//").and_then(|s| s.split_once('@')) {
                Some((_, host_share)) => format!("//{host_share}"),
                None => source.to_string(),
            };
            Some(MountEntry {
                source,
                target: target.trim().to_string(),
                fstype,
                options,
            })
        })
        .collect()
}

/// Return the entry mounted at `target`, or `None` if not found.
///
/// When mounts are stacked the last (topmost) entry wins.
pub fn find_entry<'a>(entries: &'a [MountEntry], target: &Path) -> Option<&'a MountEntry> {
    let target_str = target.to_str()?;
    let target_str = match target_str.trim_end_matches('/') {
        "" => "/",
        t => t,
    };
    entries.iter().rev().find(|e| e.target == target_str)
}

/// Compare two SMB sources, ignoring case, slash direction and a trailing slash.
pub fn same_source(a: &str, b: &str) -> bool {
    normalize_source(a) == normalize_source(b)
}

fn normalize_source(s: &str) -> String {
    s.replace('\\', "/").trim_end_matches('/').to_ascii_lowercase()
}

fn unescape_octal(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\'
            && let Some(digits) = bytes.get(i + 1..i + 4)
            && digits.iter().all(|b| (b'0'..=b'7').contains(b))
        {
            out.push(
                digits
                    .iter()
                    .fold(0u8, |acc, d| acc.wrapping_mul(8).wrapping_add(d - b'0')),
            );
            i += 4;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
