//! Host capability detection and the invoking-user context.

/// Environment variable carrying the original (non-elevated) uid.
///
/// Set by sudo, and by the helper launcher when it crosses into the
/// privileged container.
pub const SUDO_UID_ENV: &str = "SUDO_UID";

/// Environment variable carrying the original gid (sudo only).
pub const SUDO_GID_ENV: &str = "SUDO_GID";

/// Whether this process can build disk images itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Linux and running as root: build and convert in-process.
    Native,
    /// Anything else: relaunch inside the privileged helper container.
    NeedsHelper,
}

/// Probe the running process.
pub fn probe() -> Capability {
    probe_with(std::env::consts::OS, effective_uid())
}

/// Capability for a given OS name and effective uid.
///
/// An unknown uid resolves to [`Capability::NeedsHelper`].
pub fn probe_with(os: &str, euid: Option<u32>) -> Capability {
    match (os, euid) {
        ("linux", Some(0)) => Capability::Native,
        _ => Capability::NeedsHelper,
    }
}

#[cfg(unix)]
pub fn effective_uid() -> Option<u32> {
    // SAFETY: geteuid has no preconditions and cannot fail.
    Some(unsafe { libc::geteuid() })
}

#[cfg(not(unix))]
pub fn effective_uid() -> Option<u32> {
    None
}

/// Real uid of the caller, forwarded to the helper for ownership restoration.
#[cfg(unix)]
pub fn real_uid() -> Option<u32> {
    // SAFETY: getuid has no preconditions and cannot fail.
    Some(unsafe { libc::getuid() })
}

#[cfg(not(unix))]
pub fn real_uid() -> Option<u32> {
    None
}

/// Who launched us through a privilege-elevation mechanism, if anyone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InvokingUserContext {
    pub original_uid: Option<u32>,
    pub original_gid: Option<u32>,
}

impl InvokingUserContext {
    /// Read `SUDO_UID` / `SUDO_GID` from the process environment.
    pub fn from_env() -> Self {
        Self::from_vars(
            std::env::var(SUDO_UID_ENV).ok().as_deref(),
            std::env::var(SUDO_GID_ENV).ok().as_deref(),
        )
    }

    /// Build from raw variable values. Unparseable values count as absent.
    pub fn from_vars(uid: Option<&str>, gid: Option<&str>) -> Self {
        let parse = |name: &str, value: Option<&str>| {
            let value = value?.trim();
            match value.parse::<u32>() {
                Ok(id) => Some(id),
                Err(_) => {
                    tracing::warn!("ignoring non-numeric {}={:?}", name, value);
                    None
                }
            }
        };
        let original_uid = parse(SUDO_UID_ENV, uid);
        let original_gid = original_uid.and_then(|_| parse(SUDO_GID_ENV, gid));
        Self {
            original_uid,
            original_gid,
        }
    }

    /// Group to restore; the uid doubles as gid when sudo gave none.
    pub fn group(&self) -> Option<u32> {
        self.original_gid.or(self.original_uid)
    }
}
