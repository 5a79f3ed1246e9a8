//! OCI runtime isolation descriptor.
//!
//! Serialized as `config.json` inside each instance's bundle directory
//! and handed to the low-level runtime control binary. The descriptor
//! pins every isolation knob explicitly rather than relying on runtime
//! defaults: empty capability sets, an unprivileged user, a read-only
//! root with a size-capped tmpfs, cpu/memory ceilings, process and file
//! descriptor rlimits, separate namespaces, masked kernel introspection
//! paths, and a default-deny syscall filter.
//!
//! Network access requires two independent controls to agree: the
//! network namespace flag and the presence of networking syscalls in
//! the allow-list. Disabling either is sufficient to block it.

use serde::Serialize;

use super::ResourceLimits;

/// Hard ceiling on open file descriptors inside the sandbox.
const NOFILE_LIMIT: u64 = 64;
/// CFS scheduler period used to derive the cpu quota.
const CPU_PERIOD: u64 = 100_000;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeSpec {
    pub oci_version: String,
    pub process: Process,
    pub root: Root,
    pub hostname: String,
    pub mounts: Vec<Mount>,
    pub linux: Linux,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Process {
    pub terminal: bool,
    pub user: User,
    pub args: Vec<String>,
    pub env: Vec<String>,
    pub cwd: String,
    pub capabilities: Capabilities,
    pub rlimits: Vec<Rlimit>,
    pub no_new_privileges: bool,
}

#[derive(Debug, Serialize)]
pub struct User {
    pub uid: u32,
    pub gid: u32,
}

/// All four capability sets stay empty: the workload gets no ambient
/// kernel privileges whatsoever.
#[derive(Debug, Serialize, Default)]
pub struct Capabilities {
    pub bounding: Vec<String>,
    pub effective: Vec<String>,
    pub inheritable: Vec<String>,
    pub permitted: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct Rlimit {
    #[serde(rename = "type")]
    pub kind: String,
    pub hard: u64,
    pub soft: u64,
}

#[derive(Debug, Serialize)]
pub struct Root {
    pub path: String,
    pub readonly: bool,
}

#[derive(Debug, Serialize)]
pub struct Mount {
    pub destination: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub source: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Linux {
    pub resources: Resources,
    pub namespaces: Vec<Namespace>,
    pub masked_paths: Vec<String>,
    pub readonly_paths: Vec<String>,
    pub seccomp: Seccomp,
}

#[derive(Debug, Serialize)]
pub struct Resources {
    pub cpu: Cpu,
    pub memory: Memory,
}

#[derive(Debug, Serialize)]
pub struct Cpu {
    pub shares: u64,
    pub quota: i64,
    pub period: u64,
}

#[derive(Debug, Serialize)]
pub struct Memory {
    pub limit: u64,
    pub swap: u64,
}

#[derive(Debug, Serialize)]
pub struct Namespace {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Seccomp {
    pub default_action: String,
    pub architectures: Vec<String>,
    pub syscalls: Vec<SyscallRule>,
}

#[derive(Debug, Serialize)]
pub struct SyscallRule {
    pub names: Vec<String>,
    pub action: String,
}

/// Syscalls an interpreted-language workload needs: file I/O, memory,
/// process/thread basics, time, signal handling, polling, and local
/// IPC. No networking data-path calls; those are appended separately
/// and only when the limits allow network use.
const BASE_SYSCALLS: &[&str] = &[
    "access", "arch_prctl", "brk", "chdir", "chmod", "clock_getres", "clock_gettime",
    "clock_nanosleep", "clone", "clone3", "close", "copy_file_range", "creat", "dup", "dup2",
    "dup3", "epoll_create", "epoll_create1", "epoll_ctl", "epoll_pwait", "epoll_wait", "eventfd",
    "eventfd2", "execve", "execveat", "exit", "exit_group", "faccessat", "faccessat2", "fadvise64",
    "fallocate", "fchdir", "fchmod", "fchmodat", "fcntl", "fdatasync", "flock", "fork", "fstat",
    "fstatfs", "fsync", "ftruncate", "futex", "getcwd", "getdents", "getdents64", "getegid",
    "geteuid", "getgid", "getgroups", "getitimer", "getpgid", "getpgrp", "getpid", "getppid",
    "getpriority", "getrandom", "getresgid", "getresuid", "getrlimit", "getrusage", "getsid",
    "gettid", "gettimeofday", "getuid", "inotify_add_watch", "inotify_init", "inotify_init1",
    "inotify_rm_watch", "ioctl", "kill", "lseek", "lstat", "madvise", "memfd_create", "mkdir",
    "mkdirat", "mmap", "mprotect", "mremap", "msync", "munmap", "nanosleep", "newfstatat", "open",
    "openat", "pause", "pipe", "pipe2", "poll", "ppoll", "prctl", "pread64", "preadv", "prlimit64",
    "pselect6", "pwrite64", "pwritev", "read", "readlink", "readlinkat", "readv", "rename",
    "renameat", "renameat2", "restart_syscall", "rmdir", "rseq", "rt_sigaction", "rt_sigpending",
    "rt_sigprocmask", "rt_sigqueueinfo", "rt_sigreturn", "rt_sigsuspend", "rt_sigtimedwait",
    "sched_getaffinity", "sched_getparam", "sched_getscheduler", "sched_yield", "select",
    "set_robust_list", "set_tid_address", "setitimer", "setpgid", "setsid", "sigaltstack",
    "socketpair", "splice", "stat", "statfs", "statx", "symlink", "symlinkat", "sysinfo", "tee",
    "tgkill", "time", "timer_create", "timer_delete", "timer_gettime", "timer_settime",
    "timerfd_create", "timerfd_gettime", "timerfd_settime", "times", "tkill", "truncate", "umask",
    "uname", "unlink", "unlinkat", "utimensat", "utimes", "vfork", "wait4", "waitid", "write",
    "writev",
];

/// Networking data-path syscalls, gated on `network_enabled`.
const NETWORK_SYSCALLS: &[&str] = &[
    "socket", "connect", "accept", "accept4", "bind", "listen", "getsockname", "getpeername",
    "getsockopt", "setsockopt", "send", "sendto", "sendmsg", "sendmmsg", "recv", "recvfrom",
    "recvmsg", "recvmmsg", "shutdown",
];

/// Kernel introspection surfaces hidden from the workload.
const MASKED_PATHS: &[&str] = &[
    "/proc/kcore",
    "/proc/latency_stats",
    "/proc/timer_list",
    "/proc/timer_stats",
    "/proc/sched_debug",
    "/sys/firmware",
];

const READONLY_PATHS: &[&str] = &[
    "/proc/asound",
    "/proc/bus",
    "/proc/fs",
    "/proc/irq",
    "/proc/sys",
    "/proc/sysrq-trigger",
];

/// Builds the full isolation descriptor for one sandbox instance.
pub fn build_spec(instance_id: &str, _skill_id: &str, limits: &ResourceLimits) -> RuntimeSpec {
    let mut syscalls: Vec<String> = BASE_SYSCALLS.iter().map(|s| s.to_string()).collect();
    if limits.network_enabled {
        syscalls.extend(NETWORK_SYSCALLS.iter().map(|s| s.to_string()));
    }

    // An own (empty) network namespace is the first network control:
    // when networking is off the workload is namespaced away from every
    // interface. When it is on, the namespace is shared and the syscall
    // allow-list above becomes the remaining control.
    let mut namespaces = vec!["pid", "ipc", "uts", "mount", "user"];
    if !limits.network_enabled {
        namespaces.insert(1, "network");
    }

    let short_id: String = instance_id.chars().take(8).collect();

    RuntimeSpec {
        oci_version: "1.0.0".to_string(),
        process: Process {
            terminal: false,
            user: User { uid: 65534, gid: 65534 },
            args: vec![
                "python3".to_string(),
                "-u".to_string(),
                "/app/skill/skill.py".to_string(),
            ],
            env: vec![
                "PATH=/usr/local/bin:/usr/bin:/bin".to_string(),
                "HOME=/home".to_string(),
                "PYTHONUNBUFFERED=1".to_string(),
            ],
            cwd: "/app".to_string(),
            capabilities: Capabilities::default(),
            rlimits: vec![
                Rlimit {
                    kind: "RLIMIT_NOFILE".to_string(),
                    hard: NOFILE_LIMIT,
                    soft: NOFILE_LIMIT,
                },
                Rlimit {
                    kind: "RLIMIT_NPROC".to_string(),
                    hard: u64::from(limits.max_processes),
                    soft: u64::from(limits.max_processes),
                },
            ],
            no_new_privileges: true,
        },
        root: Root {
            path: "rootfs".to_string(),
            readonly: true,
        },
        hostname: format!("sandbox-{short_id}"),
        mounts: vec![
            Mount {
                destination: "/proc".to_string(),
                kind: "proc".to_string(),
                source: "proc".to_string(),
                options: vec![],
            },
            Mount {
                destination: "/tmp".to_string(),
                kind: "tmpfs".to_string(),
                source: "tmpfs".to_string(),
                options: vec![
                    "nosuid".to_string(),
                    "noexec".to_string(),
                    "strictatime".to_string(),
                    "mode=1777".to_string(),
                    format!("size={}m", limits.disk_mb),
                ],
            },
        ],
        linux: Linux {
            resources: Resources {
                cpu: Cpu {
                    shares: (limits.cpu_cores * 1024.0) as u64,
                    quota: (limits.cpu_cores * CPU_PERIOD as f64) as i64,
                    period: CPU_PERIOD,
                },
                memory: Memory {
                    limit: limits.memory_mb * 1024 * 1024,
                    // Same value: no extra headroom via swap.
                    swap: limits.memory_mb * 1024 * 1024,
                },
            },
            namespaces: namespaces
                .into_iter()
                .map(|kind| Namespace {
                    kind: kind.to_string(),
                })
                .collect(),
            masked_paths: MASKED_PATHS.iter().map(|s| s.to_string()).collect(),
            readonly_paths: READONLY_PATHS.iter().map(|s| s.to_string()).collect(),
            seccomp: Seccomp {
                default_action: "SCMP_ACT_ERRNO".to_string(),
                architectures: vec![
                    "SCMP_ARCH_X86_64".to_string(),
                    "SCMP_ARCH_AARCH64".to_string(),
                ],
                syscalls: vec![SyscallRule {
                    names: syscalls,
                    action: "SCMP_ACT_ALLOW".to_string(),
                }],
            },
        },
    }
}
