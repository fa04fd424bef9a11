use std::sync::Arc;

use hubwire_hub::{Hub, HubConfig};
use hubwire_transport::HubListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::cmd::{demo, parse_duration, ServeArgs};
use crate::exit::{hub_error, io_error, transport_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_listening, OutputFormat};

pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let config = hub_config(&args)?;
    let hub = Hub::new(demo::registry(), config)
        .map_err(|err| hub_error("hub setup failed", err))?;

    let shutdown = CancellationToken::new();
    install_ctrlc_handler(shutdown.clone())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| io_error("runtime setup failed", err))?;

    runtime.block_on(serve(Arc::new(hub), &args, shutdown, format))
}

fn hub_config(args: &ServeArgs) -> CliResult<HubConfig> {
    let keep_alive = if args.no_keep_alive {
        None
    } else {
        Some(parse_duration(&args.keep_alive)?)
    };
    let client_timeout = if args.no_client_timeout {
        None
    } else {
        Some(parse_duration(&args.client_timeout)?)
    };

    Ok(HubConfig::default()
        .with_keep_alive_interval(keep_alive)
        .with_client_timeout(client_timeout)
        .with_upstream_buffer(args.upstream_buffer)
        .with_detailed_errors(args.detailed_errors))
}

async fn serve(
    hub: Arc<Hub>,
    args: &ServeArgs,
    shutdown: CancellationToken,
    format: OutputFormat,
) -> CliResult<i32> {
    let listener = HubListener::bind(&args.addr)
        .await
        .map_err(|err| transport_error("bind failed", err))?;
    let local = listener
        .local_addr()
        .map_err(|err| transport_error("bind failed", err))?;
    print_listening(&local, format);
    tracing::info!(
        addr = %local,
        methods = ?hub.registry().names(),
        "hub ready"
    );

    let mut connections = JoinSet::new();
    let mut accepted = 0usize;

    loop {
        if args.count.is_some_and(|count| accepted >= count) {
            break;
        }

        let stream = tokio::select! {
            _ = shutdown.cancelled() => break,
            Some(_) = connections.join_next(), if !connections.is_empty() => continue,
            stream = listener.accept() => stream.map_err(|err| transport_error("accept failed", err))?,
        };
        accepted += 1;

        let hub = Arc::clone(&hub);
        connections.spawn(async move {
            let connection_id = stream.connection_id().to_string();
            match hub.serve(stream).await {
                Ok(()) => tracing::info!(%connection_id, "connection finished"),
                Err(err) => tracing::warn!(%connection_id, error = %err, "connection failed"),
            }
        });
    }

    // Dropping the set aborts whatever is still running.
    tokio::select! {
        _ = shutdown.cancelled() => {}
        _ = drain(&mut connections) => {}
    }
    tracing::info!(connections = accepted, "hub stopped");
    Ok(SUCCESS)
}

async fn drain(connections: &mut JoinSet<()>) {
    while connections.join_next().await.is_some() {}
}

fn install_ctrlc_handler(shutdown: CancellationToken) -> CliResult<()> {
    ctrlc::set_handler(move || {
        shutdown.cancel();
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
