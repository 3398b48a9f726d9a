//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

#![warn(rust_2018_idioms)]

mod conf;

use capctl::caps;
use clap::{App, Arg};
use ldpd_kernel::fib::Fib;
use ldpd_kernel::kernel::{Kernel, KernelChannelsTx, ParentRequest};
use ldpd_utils::config::{CONF_FILE, Config, LDPD_USER};
use ldpd_utils::ibus;
use nix::unistd::{Uid, User};
use tracing::level_filters::LevelFilter;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::reload;

fn init_tracing(
    verbosity: u64,
) -> reload::Handle<LevelFilter, tracing_subscriber::Registry> {
    let level = match verbosity {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let (filter, handle) = reload::Layer::new(level);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .compact(),
        )
        .init();

    handle
}

fn privdrop(user: &str) -> nix::Result<()> {
    // Preserve the set of permitted capabilities upon privdrop.
    capctl::prctl::set_securebits(capctl::prctl::Secbits::KEEP_CAPS).unwrap();

    // Drop to the unprivileged user and group.
    if let Some(user) = User::from_name(user)? {
        nix::unistd::setgroups(&[user.gid])?;
        nix::unistd::setresgid(user.gid, user.gid, user.gid)?;
        nix::unistd::setresuid(user.uid, user.uid, user.uid)?;
    } else {
        error!(name = %user, "failed to find user");
        std::process::exit(1);
    }

    // Set permitted capabilities: socket creation on the privileged LDP
    // port and route programming remain possible after the drop.
    let mut caps = caps::CapState::empty();
    for cap in [
        caps::Cap::NET_ADMIN,
        caps::Cap::NET_BIND_SERVICE,
        caps::Cap::NET_RAW,
    ] {
        caps.permitted.add(cap);
    }
    if let Err(error) = caps.set_current() {
        error!(%error, "failed to set permitted capabilities");
    }

    Ok(())
}

// ===== main =====

fn main() {
    // Parse command-line parameters.
    let matches = App::new("LDP routing daemon")
        .version(clap::crate_version!())
        .arg(
            Arg::with_name("no_daemon")
                .short("d")
                .help("Do not daemonize."),
        )
        .arg(
            Arg::with_name("no_action")
                .short("n")
                .help("Configtest mode: only check the configuration file."),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .multiple(true)
                .help("Produce more verbose output."),
        )
        .arg(
            Arg::with_name("define")
                .short("D")
                .value_name("macro=value")
                .multiple(true)
                .number_of_values(1)
                .help("Define a macro to be used in the configuration file."),
        )
        .arg(
            Arg::with_name("config")
                .short("f")
                .value_name("file")
                .help("Specify an alternative configuration file."),
        )
        .get_matches();

    // Read and validate the configuration file.
    let config_file = matches.value_of("config").unwrap_or(CONF_FILE);
    let macros: Vec<&str> = matches
        .values_of("define")
        .map(|values| values.collect())
        .unwrap_or_default();
    let config = match conf::load(config_file, &macros) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("ldpd: {}", error);
            std::process::exit(1);
        }
    };

    if matches.is_present("no_action") {
        println!("configuration OK");
        std::process::exit(0);
    }

    // Check for root privileges.
    if !Uid::effective().is_root() {
        eprintln!("ldpd: need root privileges");
        std::process::exit(1);
    }

    // Initialize tracing.
    let verbosity = matches.occurrences_of("verbose");
    let filter_handle = init_tracing(verbosity);

    // Daemonize.
    if !matches.is_present("no_daemon") {
        if let Err(error) = nix::unistd::daemon(true, false) {
            eprintln!("ldpd: failed to daemonize: {}", error);
            std::process::exit(1);
        }
    }

    // Drop privileges.
    if let Err(error) = privdrop(LDPD_USER) {
        error!(%error, "failed to drop root privileges");
        std::process::exit(1);
    }

    // A panicking task means a corrupted invariant somewhere; take the
    // whole daemon down rather than limping along.
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_panic(info);
        std::process::exit(1);
    }));

    info!("startup");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to create async runtime")
        .block_on(async {
            run(config, config_file.to_owned(), macros_owned(&macros), filter_handle)
                .await;
        });
}

fn macros_owned(macros: &[&str]) -> Vec<String> {
    macros.iter().map(|s| s.to_string()).collect()
}

async fn run(
    config: Config,
    config_file: String,
    macros: Vec<String>,
    filter_handle: reload::Handle<LevelFilter, tracing_subscriber::Registry>,
) {
    // Create the pipes binding the three processes together.
    let (mut main_pipes, ldpe_pipes, lde_pipes) = ibus::pipes();

    // Open the kernel interface.
    let (fib, mut kernel_events) = match Fib::init().await {
        Ok(value) => value,
        Err(error) => {
            error!(%error, "failed to open the kernel routing interface");
            std::process::exit(1);
        }
    };

    // Spawn the label decision engine and the LDP engine.
    let lde_config = config.clone();
    let mut lde_task =
        tokio::spawn(async move { ldpd_lde::lde::run(lde_config, lde_pipes).await });
    let ldpe_config = config.clone();
    let mut ldpe_task = tokio::spawn(async move {
        if let Err(error) = ldpd_ldpe::ldpe::run(ldpe_config, ldpe_pipes).await
        {
            error.log();
        }
    });

    // The parent keeps the kernel mirror.
    let tx = KernelChannelsTx {
        ldpe: main_pipes.to_ldpe.clone(),
        lde: main_pipes.to_lde.clone(),
    };
    let mut kernel = Kernel::new(config, fib, tx);

    let mut sighup = tokio::signal::unix::signal(
        tokio::signal::unix::SignalKind::hangup(),
    )
    .expect("failed to register SIGHUP handler");
    let mut sigterm = tokio::signal::unix::signal(
        tokio::signal::unix::SignalKind::terminate(),
    )
    .expect("failed to register SIGTERM handler");

    let mut exit_code = 1;
    loop {
        tokio::select! {
            event = kernel_events.recv() => {
                match event {
                    Some(event) => kernel.process_event(event).await,
                    None => {
                        error!("kernel event stream closed");
                        break;
                    }
                }
            }
            msg = main_pipes.from_lde.recv() => {
                match msg {
                    Some(msg) => kernel.process_lde_msg(msg).await,
                    None => break,
                }
            }
            msg = main_pipes.from_ldpe.recv() => {
                let Some(msg) = msg else { break };
                match kernel.process_ldpe_msg(msg).await {
                    Some(ParentRequest::Reload) => {
                        reload(&mut kernel, &config_file, &macros, &main_pipes)
                            .await;
                    }
                    Some(ParentRequest::LogVerbose(verbose)) => {
                        let level = if verbose {
                            LevelFilter::DEBUG
                        } else {
                            LevelFilter::INFO
                        };
                        if let Err(error) =
                            filter_handle.reload(level)
                        {
                            error!(%error, "failed to update log verbosity");
                        }
                    }
                    None => (),
                }
            }
            _ = sighup.recv() => {
                reload(&mut kernel, &config_file, &macros, &main_pipes).await;
            }
            _ = sigterm.recv() => {
                info!("exiting on signal");
                exit_code = 0;
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("exiting on signal");
                exit_code = 0;
                break;
            }
            _ = &mut lde_task => {
                // A child exiting means the others can't make progress.
                error!("label decision engine terminated");
                break;
            }
            _ = &mut ldpe_task => {
                error!("ldp engine terminated");
                break;
            }
        }
    }

    std::process::exit(exit_code);
}

// SIGHUP reload: re-parse the configuration, stream the new tree to both
// children, then merge the parent's own copy.
async fn reload(
    kernel: &mut Kernel,
    config_file: &str,
    macros: &[String],
    main_pipes: &ibus::MainPipes,
) {
    let macros: Vec<&str> = macros.iter().map(|s| s.as_str()).collect();
    let new_config = match conf::load(config_file, &macros) {
        Ok(config) => config,
        Err(error) => {
            warn!(%error, "configuration reload failed");
            return;
        }
    };

    if new_config.router_id != kernel.config.router_id {
        warn!("router-id change requires a restart; keeping the old value");
    }

    for msg in new_config.reconf_messages() {
        let _ = main_pipes
            .to_ldpe
            .send(ibus::MainToLdpeMsg::Reconf(msg.clone()));
        let _ = main_pipes.to_lde.send(ibus::MainToLdeMsg::Reconf(msg));
    }

    kernel.merge_config(new_config).await;

    // Replay interface state so newly configured interfaces activate.
    kernel.resend_interfaces();

    info!("configuration reloaded");
}
