use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use spotwire_mercury::SessionConfig;
use tracing::info;

use crate::cmd::SubscribeArgs;
use crate::exit::{mercury_error, CliError, CliResult, SUCCESS};
use crate::output::{print_message, OutputFormat};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub fn run(args: SubscribeArgs, format: OutputFormat) -> CliResult<i32> {
    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let session = args.session.open(SessionConfig::default())?;
    let stream = session
        .subscribe(&args.prefix)
        .map_err(|err| mercury_error("subscribe failed", err))?;
    info!(prefix = %args.prefix, "listening for pushes");

    let mut printed = 0usize;
    while running.load(Ordering::SeqCst) {
        let Some(message) = stream.recv_timeout(POLL_INTERVAL) else {
            if let Some(reason) = session.close_reason() {
                return Err(mercury_error("session ended", reason));
            }
            continue;
        };

        print_message(&message, "push", format);
        printed = printed.saturating_add(1);

        if args.count.is_some_and(|count| printed >= count) {
            break;
        }
    }

    if let Err(err) = session.unsubscribe(&args.prefix) {
        info!(error = %err, "unsubscribe on exit failed");
    }
    session.close();
    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}
