//! Rift - Native-Code Debugger Core
//!
//! Entry point for the headless driver: launches or attaches to a target,
//! waits on child events, and dumps register state (changes highlighted)
//! at every stop.

use clap::Parser;

/// Rift: native-code debugger core driver
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Target binary to launch
    target: Option<String>,

    /// Arguments passed to the target
    #[arg(trailing_var_arg = true)]
    args: Vec<String>,

    /// Attach to a running process instead of launching
    #[arg(short, long, conflicts_with = "target")]
    attach: Option<i32>,

    /// Working directory for the launched target
    #[arg(long)]
    cwd: Option<String>,

    /// Launch with address-space randomization disabled
    #[arg(long, default_value_t = false)]
    disable_aslr: bool,

    /// Single-step this many instructions before continuing
    #[arg(short, long, default_value_t = 0)]
    steps: u32,

    /// Hex address to dump 64 bytes from at every stop
    #[arg(long, value_parser = parse_hex_address)]
    dump: Option<u64>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn parse_hex_address(s: &str) -> Result<u64, String> {
    let trimmed = s.trim_start_matches("0x");
    u64::from_str_radix(trimmed, 16).map_err(|e| format!("bad address '{s}': {e}"))
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(
        match std::env::args().filter(|a| a == "-v").count() {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        },
    ))
    .init();

    let args = Args::parse();
    log::debug!("target: {:?}, attach: {:?}", args.target, args.attach);

    run(args)
}

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
fn run(args: Args) -> anyhow::Result<()> {
    use anyhow::Context;
    use nix::sys::signal::Signal;
    use nix::sys::wait::WaitStatus;
    use rift::os::launch::LaunchOptions;
    use rift::os::signals;
    use rift::os::unix::ChildWaiter;
    use rift::process::Debuggee;

    let waiter = ChildWaiter::new().context("failed to set up child-event waiting")?;

    let mut debuggee = match (&args.target, args.attach) {
        (Some(target), None) => {
            let mut options = LaunchOptions::new(target);
            options.args = args.args.clone();
            options.cwd = args.cwd.as_ref().map(Into::into);
            options.disable_aslr = args.disable_aslr;
            Debuggee::launch(&options)?
        }
        (None, Some(pid)) => Debuggee::attach(pid)?,
        _ => anyhow::bail!("specify a target to launch or --attach <pid>"),
    };

    println!(
        "[*] rift v{} - tracing pid {}",
        env!("CARGO_PKG_VERSION"),
        debuggee.pid()
    );

    let mut steps_left = args.steps;
    let mut deliver: Option<Signal> = None;
    dump_stop(&mut debuggee, args.dump)?;

    loop {
        if steps_left > 0 {
            steps_left -= 1;
            debuggee.step(deliver.take())?;
        } else {
            debuggee.resume(deliver.take())?;
        }

        // the waiter latches SIGCHLD delivered at any point after setup, so
        // a child that stops before we get here is still observed
        let status = loop {
            if let Some(status) = debuggee.poll_status()? {
                break status;
            }
            waiter.wait_for_child_event(100)?;
        };

        match status {
            WaitStatus::Stopped(_, sig) => {
                if sig != Signal::SIGTRAP {
                    let name = signals::exception_name(sig as i64);
                    println!("[!] stopped by {name} ({})", sig as i32);
                    deliver = Some(sig);
                }
                dump_stop(&mut debuggee, args.dump)?;
            }
            status => {
                if report_final(status) {
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
fn report_final(status: nix::sys::wait::WaitStatus) -> bool {
    use nix::sys::wait::WaitStatus;
    use rift::os::signals;

    match status {
        WaitStatus::Exited(pid, code) => {
            println!("[*] process {pid} exited with code {code}");
            true
        }
        WaitStatus::Signaled(pid, sig, _) => {
            let name = signals::exception_name(sig as i64);
            println!("[*] process {pid} killed by {name} ({})", sig as i32);
            true
        }
        _ => false,
    }
}

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
fn dump_stop(
    debuggee: &mut rift::process::Debuggee,
    dump: Option<u64>,
) -> anyhow::Result<()> {
    use colored::Colorize;
    use rift::annotate::MemoryReader;

    debuggee.refresh_state()?;
    let mut line = String::new();
    let names: Vec<&'static str> = debuggee.state().iter().map(|r| r.name).collect();
    for (i, name) in names.iter().enumerate() {
        let reg = debuggee.state().by_name(name).unwrap();
        if !reg.is_present() {
            continue;
        }
        let text = format!("{name}={}", reg.to_hex());
        if debuggee.tracker().changed(name) {
            line.push_str(&text.red().to_string());
        } else {
            line.push_str(&text);
        }
        line.push(' ');
        if i % 4 == 3 {
            println!("{line}");
            line.clear();
        }
    }
    if !line.is_empty() {
        println!("{line}");
    }

    if let Some(address) = dump {
        let mut buf = [0u8; 64];
        match debuggee.read_bytes(address, &mut buf) {
            Ok(n) => {
                for (row, chunk) in buf[..n].chunks(16).enumerate() {
                    println!("{:016x}  {}", address + row as u64 * 16, hex::encode(chunk));
                }
            }
            Err(e) => println!("[!] {e}"),
        }
    }
    Ok(())
}

#[cfg(not(all(target_os = "linux", target_arch = "x86_64")))]
fn run(_args: Args) -> anyhow::Result<()> {
    anyhow::bail!("process control is only supported on x86-64 Linux")
}
