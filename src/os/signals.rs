//! Exception/signal catalog.
//!
//! Bidirectional name/number mapping for the OS-level causes a debuggee can
//! stop or die with. The table is built once on first use and only contains
//! the signals the host platform actually defines; anything else behaves as
//! unknown. Several numbers carry two names (SIGIO is SIGPOLL on Linux), so
//! the catalog is a flat list: every name resolves to its number, and the
//! first name listed for a number is the canonical one.

use std::collections::BTreeMap;
use std::sync::OnceLock;

static CATALOG: OnceLock<Vec<(i64, &'static str)>> = OnceLock::new();
static BY_VALUE: OnceLock<BTreeMap<i64, &'static str>> = OnceLock::new();

#[cfg(unix)]
fn build_catalog() -> Vec<(i64, &'static str)> {
    let mut table = Vec::new();
    let mut add = |value: libc::c_int, name: &'static str| {
        table.push((i64::from(value), name));
    };

    add(libc::SIGABRT, "SIGABRT");
    add(libc::SIGALRM, "SIGALRM");
    add(libc::SIGBUS, "SIGBUS");
    add(libc::SIGCHLD, "SIGCHLD");
    add(libc::SIGCONT, "SIGCONT");
    add(libc::SIGFPE, "SIGFPE");
    add(libc::SIGHUP, "SIGHUP");
    add(libc::SIGILL, "SIGILL");
    add(libc::SIGINT, "SIGINT");
    add(libc::SIGIO, "SIGIO");
    add(libc::SIGKILL, "SIGKILL");
    add(libc::SIGPIPE, "SIGPIPE");
    add(libc::SIGPROF, "SIGPROF");
    add(libc::SIGQUIT, "SIGQUIT");
    add(libc::SIGSEGV, "SIGSEGV");
    add(libc::SIGSTOP, "SIGSTOP");
    add(libc::SIGSYS, "SIGSYS");
    add(libc::SIGTERM, "SIGTERM");
    add(libc::SIGTRAP, "SIGTRAP");
    add(libc::SIGTSTP, "SIGTSTP");
    add(libc::SIGTTIN, "SIGTTIN");
    add(libc::SIGTTOU, "SIGTTOU");
    add(libc::SIGURG, "SIGURG");
    add(libc::SIGUSR1, "SIGUSR1");
    add(libc::SIGUSR2, "SIGUSR2");
    add(libc::SIGVTALRM, "SIGVTALRM");
    add(libc::SIGWINCH, "SIGWINCH");
    add(libc::SIGXCPU, "SIGXCPU");
    add(libc::SIGXFSZ, "SIGXFSZ");

    #[cfg(target_os = "linux")]
    {
        add(libc::SIGPOLL, "SIGPOLL"); // alias of SIGIO
        add(libc::SIGPWR, "SIGPWR");
        add(libc::SIGSTKFLT, "SIGSTKFLT");
        add(libc::SIGRTMIN(), "SIGRTMIN");
        add(libc::SIGRTMAX(), "SIGRTMAX");
    }

    table
}

#[cfg(not(unix))]
fn build_catalog() -> Vec<(i64, &'static str)> {
    Vec::new()
}

fn catalog() -> &'static [(i64, &'static str)] {
    CATALOG.get_or_init(build_catalog)
}

/// Canonical code -> name enumeration, for populating pickers. Aliases are
/// collapsed to the first name listed for each number.
pub fn exceptions() -> &'static BTreeMap<i64, &'static str> {
    BY_VALUE.get_or_init(|| {
        let mut map = BTreeMap::new();
        for &(value, name) in catalog() {
            map.entry(value).or_insert(name);
        }
        map
    })
}

/// Canonical name for a signal number; empty string if unknown.
pub fn exception_name(value: i64) -> &'static str {
    exceptions().get(&value).copied().unwrap_or("")
}

/// Signal number for a name; -1 if unknown. Aliases resolve to the same
/// number as their canonical name.
pub fn exception_value(name: &str) -> i64 {
    catalog()
        .iter()
        .find(|(_, n)| *n == name)
        .map_or(-1, |(v, _)| *v)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn round_trip_known_signals() {
        assert_eq!(exception_name(i64::from(libc::SIGSEGV)), "SIGSEGV");
        assert_eq!(exception_value("SIGSEGV"), i64::from(libc::SIGSEGV));
        assert_eq!(exception_value("SIGTRAP"), i64::from(libc::SIGTRAP));
    }

    #[test]
    fn unknown_entries_behave_identically() {
        assert_eq!(exception_name(-12345), "");
        assert_eq!(exception_value("SIGBOGUS"), -1);
        assert_eq!(exception_value(""), -1);
    }

    #[test]
    fn enumeration_is_consistent() {
        for (value, name) in exceptions() {
            assert_eq!(exception_name(*value), *name);
            assert_eq!(exception_value(name), *value);
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn aliased_numbers_resolve_under_both_names() {
        assert_eq!(exception_value("SIGIO"), i64::from(libc::SIGIO));
        assert_eq!(exception_value("SIGPOLL"), i64::from(libc::SIGPOLL));
        assert_eq!(exception_value("SIGIO"), exception_value("SIGPOLL"));
        // one canonical entry per number
        assert_eq!(exception_name(i64::from(libc::SIGIO)), "SIGIO");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn realtime_bounds_are_present() {
        assert_eq!(exception_value("SIGRTMIN"), i64::from(libc::SIGRTMIN()));
        assert_eq!(exception_value("SIGRTMAX"), i64::from(libc::SIGRTMAX()));
    }
}
