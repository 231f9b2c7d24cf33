//! Subcommands that open real device nodes.

use std::fs::{File, OpenOptions};
use std::os::fd::{AsFd, AsRawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use anyhow::Context;
use evsession_input::linux::{EvdevChannel, OutputTarget};
use evsession_input::{
    DeviceSession, EventChannel, GrabMode, ReadMode, ReadOutcome, SessionError, SyncMode,
    VirtualEmitter,
};
use evsession_types::registry::{self, EventType};
use evsession_types::{DeviceTemplate, StampedEvent};
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::Config;

/// Open `path` non-blocking and bind a session to it. The returned handle
/// is our own registration of the node for readiness; the session reads
/// through a duplicate of the same open file.
fn open_session(path: &str) -> anyhow::Result<(AsyncFd<File>, DeviceSession<EvdevChannel>)> {
    let node = OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
        .with_context(|| format!("failed to open {path}"))?;
    let channel = EvdevChannel::from_fd(node.as_fd())
        .with_context(|| format!("{path} is not an evdev device"))?;

    let mut session = DeviceSession::new();
    session.bind(channel)?;
    let node = AsyncFd::with_interest(node, Interest::READABLE)
        .with_context(|| format!("failed to register {path} with the reactor"))?;
    Ok((node, session))
}

/// A receiver that flips to `true` on Ctrl-C.
fn stop_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                let _ = tx.send(true);
            }
            Err(e) => {
                warn!("cannot listen for Ctrl-C: {e}");
                std::future::pending::<()>().await;
            }
        }
    });
    rx
}

/// Next outcome from `session`, parking on `node` readiness while nothing
/// is ready. `Ok(None)` means a stop was requested.
async fn next_outcome<C, F>(
    session: &mut DeviceSession<C>,
    node: &AsyncFd<F>,
    stop: &mut watch::Receiver<bool>,
) -> Result<Option<ReadOutcome>, SessionError>
where
    C: EventChannel,
    F: AsRawFd,
{
    loop {
        if *stop.borrow() {
            return Ok(None);
        }
        let draining = session.sync_mode() == SyncMode::Draining;
        match session.next_event(ReadMode::Normal) {
            Ok(outcome) => return Ok(Some(outcome)),
            // End of a resync diff; live events may already be buffered.
            Err(err) if err.is_would_block() && draining => {}
            Err(err) if err.is_would_block() => {
                tokio::select! {
                    _ = stop.changed() => {}
                    ready = node.readable() => ready?.clear_ready(),
                }
            }
            Err(err) => return Err(err),
        }
    }
}

fn format_event(stamped: &StampedEvent, sync_boundary: bool) -> String {
    let (type_id, code_id, value) = stamped.event.triple();
    let (type_name, code_name) = registry::describe(type_id, code_id);
    let marker = if sync_boundary { " [sync]" } else { "" };
    format!(
        "Event: time {}.{:06}, type {type_id} ({type_name}), code {code_id} ({code_name}), value {value}{marker}",
        stamped.time.seconds, stamped.time.microseconds
    )
}

fn release_grab(session: &mut DeviceSession<EvdevChannel>) {
    if let Err(e) = session.set_grab(GrabMode::Ungrab) {
        warn!("failed to release grab: {e}");
    }
}

pub async fn monitor(path: &str, grab: bool) -> anyhow::Result<()> {
    let (node, mut session) = open_session(path)?;
    let identity = session.identity()?;
    println!("Input device name: \"{}\"", identity.name);
    println!("Testing ... (interrupt to exit)");

    if grab {
        session.set_grab(GrabMode::Grab)?;
    }

    let mut stop = stop_signal();
    let result = loop {
        match next_outcome(&mut session, &node, &mut stop).await {
            Ok(Some(outcome)) => {
                if let Some(stamped) = outcome.event() {
                    println!("{}", format_event(stamped, outcome.is_sync_boundary()));
                }
            }
            Ok(None) => break Ok(()),
            Err(SessionError::ChannelClosed) => {
                info!(path, "device went away");
                break Ok(());
            }
            Err(err) => break Err(err.into()),
        }
    };

    if grab {
        release_grab(&mut session);
    }
    result
}

pub async fn mirror(path: &str, config: &Config) -> anyhow::Result<()> {
    let (node, mut session) = open_session(path)?;
    let mut template = session
        .channel()
        .context("session lost its channel")?
        .template()
        .context("failed to read device capabilities")?;
    template.identity.name.clone_from(&config.emitter.name);

    let mut emitter = match config.emitter.output_path() {
        None => VirtualEmitter::create(&template, OutputTarget::KernelManaged)?,
        Some(output) => {
            let uinput = OpenOptions::new()
                .write(true)
                .custom_flags(libc::O_NONBLOCK)
                .open(output)
                .with_context(|| format!("failed to open {}", output.display()))?;
            VirtualEmitter::create(&template, OutputTarget::CallerSupplied(uinput.as_fd()))?
        }
    };
    match emitter.devnode() {
        Ok(Some(node)) => println!("Virtual device: {}", node.display()),
        Ok(None) => println!("Virtual device created"),
        Err(e) => warn!("cannot locate virtual device node: {e}"),
    }

    session.set_grab(GrabMode::Grab)?;

    let mut stop = stop_signal();
    let mut forwarded: u64 = 0;
    let result = loop {
        match next_outcome(&mut session, &node, &mut stop).await {
            Ok(Some(outcome)) => {
                // The emitter frames every event with its own report.
                let Some(stamped) = outcome.event().filter(|s| !s.event.is_syn()) else {
                    continue;
                };
                if let Err(err) = emitter.emit(&stamped.event) {
                    break Err(err.into());
                }
                forwarded += 1;
            }
            Ok(None) => break Ok(()),
            Err(SessionError::ChannelClosed) => {
                info!(path, "source device went away");
                break Ok(());
            }
            Err(err) => break Err(err.into()),
        }
    };

    release_grab(&mut session);
    info!(forwarded, "mirror stopped");
    result
}

pub fn info(path: &str, verbose: bool) -> anyhow::Result<()> {
    let (_node, session) = open_session(path)?;
    let template = session
        .channel()
        .context("session lost its channel")?
        .template()
        .context("failed to read device capabilities")?;
    print_template(Path::new(path), &template, verbose);
    Ok(())
}

fn print_template(path: &Path, template: &DeviceTemplate, verbose: bool) {
    let id = &template.identity;
    println!("{}", path.display());
    println!("  name:    {}", id.name);
    println!("  phys:    {}", id.phys.as_deref().unwrap_or("-"));
    println!("  uniq:    {}", id.uniq.as_deref().unwrap_or("-"));
    println!(
        "  id:      bus {:#06x} vendor {:#06x} product {:#06x} version {:#06x}",
        id.bustype, id.vendor, id.product, id.version
    );

    for type_id in template.event_types() {
        let type_name = EventType::name_of(type_id).unwrap_or("?");
        let caps: Vec<_> = template
            .capabilities
            .iter()
            .filter(|cap| cap.event_type() == type_id)
            .collect();
        println!("  {type_name}: {} codes", caps.len());
        if verbose {
            for cap in caps {
                let (_, code_name) = registry::describe(type_id, cap.code());
                println!("    {:>5} {code_name}", cap.code());
            }
        }
    }
}
