use std::{env, fmt, fs};

use md5::{Digest, Md5};

/// Lower-case hexadecimal rendering of a digest.
pub(crate) fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;

    let mut hex = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

/// Fingerprint of the machine a rewrite ran on.
///
/// Cached rewrites are only reused on the machine that produced them, since the target
/// assemblies they were rewritten against are installation specific.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MachineIdentity(String);

impl MachineIdentity {
    /// Use an explicit fingerprint.
    pub fn new(fingerprint: impl Into<String>) -> Self {
        MachineIdentity(fingerprint.into())
    }

    /// Fingerprint this machine from its host name, operating system and architecture.
    #[must_use]
    pub fn current() -> Self {
        Self::from_parts(&host_name(), env::consts::OS, env::consts::ARCH)
    }

    /// Fingerprint from explicit parts.
    #[must_use]
    pub fn from_parts(host: &str, os: &str, arch: &str) -> Self {
        let mut hasher = Md5::new();
        hasher.update(host.as_bytes());
        hasher.update([0]);
        hasher.update(os.as_bytes());
        hasher.update([0]);
        hasher.update(arch.as_bytes());
        MachineIdentity(to_hex(&hasher.finalize()))
    }

    /// The fingerprint.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MachineIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn host_name() -> String {
    for variable in ["COMPUTERNAME", "HOSTNAME"] {
        if let Ok(name) = env::var(variable) {
            if !name.trim().is_empty() {
                return name.trim().to_string();
            }
        }
    }
    fs::read_to_string("/etc/hostname")
        .map(|name| name.trim().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprints_differ_by_part() {
        let base = MachineIdentity::from_parts("desk", "linux", "x86_64");
        assert_eq!(base, MachineIdentity::from_parts("desk", "linux", "x86_64"));
        assert_ne!(base, MachineIdentity::from_parts("desk", "windows", "x86_64"));
        assert_ne!(base, MachineIdentity::from_parts("deskl", "inux", "x86_64"));
        assert_eq!(base.as_str().len(), 32);
        assert_eq!(MachineIdentity::current(), MachineIdentity::current());
    }

    #[test]
    fn hex() {
        assert_eq!(to_hex(&[0x00, 0xab, 0x10]), "00ab10");
    }
}
