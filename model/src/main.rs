// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![deny(clippy::all, clippy::pedantic)]

use args::{CmdArgs, Parser};
use config::{ModelConfig, RmtStringMap};
use coordinator::{EGRESS_PORT_WORD, Packet, Pipes, RmtPacketCoordinator, port_is_valid};
use mau::logical_table::{ActionSource, LogicalTableBuilder, PhvWrite};
use mau::table_id;
use miette::{Context, IntoDiagnostic, miette};
use parking_lot::Mutex;
use phv::Gress;
use std::sync::Arc;
use sweeper::{RmtSweeper, SweepTimer};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn init_logging(args: &CmdArgs) {
    let filter = match args.log_level() {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Give every pipe a keyless ingress table sending all packets to `port`.
fn install_forwarding(pipes: &Pipes, port: u16) -> miette::Result<()> {
    for p in 0..pipes.len() {
        let table = LogicalTableBuilder::default()
            .hit_actions(vec![PhvWrite {
                word: EGRESS_PORT_WORD,
                source: ActionSource::Const(u32::from(port)),
            }])
            .build()
            .into_diagnostic()?;
        let mut pipe = pipes.lock(p).into_diagnostic()?;
        pipe.stage_mut(0)
            .into_diagnostic()?
            .set_table(0, table)
            .into_diagnostic()?;
        pipe.set_first_table(Gress::Ingress, Some(table_id(0, 0)));
    }
    info!("forwarding every packet to port {port}");
    Ok(())
}

fn start_sweeper(
    args: &CmdArgs,
    config: &Arc<ModelConfig>,
    pipes: Arc<Pipes>,
) -> miette::Result<Option<SweepTimer>> {
    let Some(period) = args.sweep_period() else {
        debug!("sweeper timer disabled");
        return Ok(None);
    };
    let sweeper = Arc::new(RmtSweeper::new(config.clone(), pipes));
    let timer = sweeper
        .start_timer(period)
        .into_diagnostic()
        .wrap_err("failed to start the sweeper")?;
    Ok(Some(timer))
}

fn main() -> miette::Result<()> {
    let args = CmdArgs::parse();
    init_logging(&args);

    if args.show_knobs() {
        for key in RmtStringMap::keys() {
            println!("{key}");
        }
        return Ok(());
    }

    let config = args.model_config()?;
    if args.show_config() {
        println!("{config}");
        return Ok(());
    }
    let config = Arc::new(config);
    info!(chip = %config.chip, pipes = config.num_pipes, "━━━ model started ━━━");

    let packets = args.packets()?;
    let mut coordinator = RmtPacketCoordinator::new(config.clone())
        .into_diagnostic()
        .wrap_err("failed to build the pipes")?;
    if let Some(port) = args.forward_to() {
        if !port_is_valid(&config, port) {
            return Err(miette!("--forward-to {port} is not a port of the model"));
        }
        install_forwarding(&coordinator.pipes(), port)?;
    }

    let transmitted = Arc::new(Mutex::new(Vec::new()));
    {
        let transmitted = transmitted.clone();
        coordinator.set_tx_function(Arc::new(move |port: u16, buf: &[u8]| {
            transmitted.lock().push(Packet::new(port, buf));
        }));
    }
    {
        let transmitted = transmitted.clone();
        let pcie = config.pcie_port;
        coordinator.set_pcie_rx_function(Arc::new(move |buf: &[u8], cos: u8| {
            debug!(cos, "{} bytes to the CPU", buf.len());
            transmitted.lock().push(Packet::new(pcie, buf));
        }));
    }

    let mut timer = start_sweeper(&args, &config, coordinator.pipes())?;
    coordinator
        .start()
        .into_diagnostic()
        .wrap_err("failed to start the workers")?;

    for line in &packets {
        if let Err(e) = coordinator.enqueue(line.port, &line.data) {
            warn!("skipping packet: {e}");
        }
    }
    info!("injected {} packets", packets.len());
    coordinator
        .wait_for_idle_within(args.idle_timeout())
        .into_diagnostic()
        .wrap_err("the model did not drain")?;

    coordinator.stop();
    if let Some(timer) = timer.as_mut() {
        timer.stop();
    }

    let transmitted = transmitted.lock();
    for packet in transmitted.iter() {
        println!("{packet}");
    }
    info!("{} packets in, {} packets out", packets.len(), transmitted.len());
    Ok(())
}
