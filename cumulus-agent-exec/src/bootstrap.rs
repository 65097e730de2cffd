/// Process hardening applied before the key is decrypted.
///
/// **`PR_SET_DUMPABLE 0`** keeps the decrypted key out of core dumps and
/// blocks `/proc/<pid>/mem` reads by other unprivileged processes.  The flag
/// is reset on `execve`, so the wrapped command is unaffected.  Best-effort:
/// a failure is logged and the launcher carries on.
#[cfg(target_os = "linux")]
pub fn secure_bootstrap() {
    // SAFETY: PR_SET_DUMPABLE takes plain integer arguments.
    let ret = unsafe { libc::prctl(libc::PR_SET_DUMPABLE, 0i64, 0i64, 0i64, 0i64) };
    if ret == 0 {
        tracing::debug!("PR_SET_DUMPABLE=0: core dumps and /proc/pid/mem access disabled");
    } else {
        let err = std::io::Error::last_os_error();
        tracing::warn!("PR_SET_DUMPABLE=0 failed (non-fatal): {err}");
    }
}

/// No-op outside Linux.
#[cfg(not(target_os = "linux"))]
pub fn secure_bootstrap() {}
