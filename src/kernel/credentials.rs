//! UID/GID transition for the judged process.
//!
//! CRITICAL: setresgid MUST be called BEFORE setresuid, otherwise the
//! process no longer has the privilege to change its group.

use crate::config::types::{JudgeError, Result};

/// Credentials the child switches to before exec
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CredentialPlan {
    pub uid: u32,
    pub gid: u32,
}

/// Decide whether a credential change is needed, in the parent.
///
/// Returns `None` when the caller already runs as the target uid/gid.
/// A change requires effective uid 0.
pub fn plan_transition(uid: u32, gid: u32) -> Result<Option<CredentialPlan>> {
    use nix::unistd::{getegid, geteuid, getgid, getuid};

    let (ruid, euid) = (getuid().as_raw(), geteuid().as_raw());
    let (rgid, egid) = (getgid().as_raw(), getegid().as_raw());
    plan_for(uid, gid, (ruid, euid), (rgid, egid))
}

fn plan_for(
    uid: u32,
    gid: u32,
    (ruid, euid): (u32, u32),
    (rgid, egid): (u32, u32),
) -> Result<Option<CredentialPlan>> {
    if uid == ruid && uid == euid && gid == rgid && gid == egid {
        return Ok(None);
    }
    if euid != 0 {
        return Err(JudgeError::RootRequired(format!(
            "switching to uid={} gid={} needs euid 0, running as euid {}",
            uid, gid, euid
        )));
    }
    Ok(Some(CredentialPlan { uid, gid }))
}

impl CredentialPlan {
    /// clear groups -> setresgid -> setresuid -> verify. Child-safe.
    pub fn apply(&self) -> std::result::Result<(), i32> {
        // SAFETY: setgroups with a zero length never reads the pointer.
        if unsafe { libc::setgroups(0, std::ptr::null()) } != 0 {
            return Err(last_errno());
        }

        let gid = self.gid as libc::gid_t;
        // SAFETY: plain syscall on integer arguments.
        if unsafe { libc::setresgid(gid, gid, gid) } != 0 {
            return Err(last_errno());
        }

        let uid = self.uid as libc::uid_t;
        // SAFETY: plain syscall on integer arguments. Must follow setresgid.
        if unsafe { libc::setresuid(uid, uid, uid) } != 0 {
            return Err(last_errno());
        }

        // SAFETY: getters cannot fail.
        let (ruid, euid) = unsafe { (libc::getuid(), libc::geteuid()) };
        let (rgid, egid) = unsafe { (libc::getgid(), libc::getegid()) };
        if ruid != uid || euid != uid || rgid != gid || egid != gid {
            return Err(libc::EPERM);
        }
        Ok(())
    }
}

fn last_errno() -> i32 {
    std::io::Error::last_os_error()
        .raw_os_error()
        .unwrap_or(libc::EPERM)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_identity_needs_no_transition() {
        let plan = plan_for(1000, 1000, (1000, 1000), (1000, 1000)).unwrap();
        assert!(plan.is_none());
    }

    #[test]
    fn unprivileged_caller_cannot_switch() {
        let err = plan_for(1001, 1000, (1000, 1000), (1000, 1000)).unwrap_err();
        assert_eq!(err.error_code(), crate::ErrorCode::RootRequired);
    }

    #[test]
    fn root_caller_gets_a_plan() {
        let plan = plan_for(65534, 65534, (0, 0), (0, 0)).unwrap();
        assert_eq!(
            plan,
            Some(CredentialPlan {
                uid: 65534,
                gid: 65534
            })
        );
    }

    #[test]
    fn current_identity_from_process() {
        let uid = nix::unistd::getuid().as_raw();
        let gid = nix::unistd::getgid().as_raw();
        let euid = nix::unistd::geteuid().as_raw();
        let egid = nix::unistd::getegid().as_raw();
        if uid == euid && gid == egid {
            assert!(plan_transition(uid, gid).unwrap().is_none());
        }
    }
}
