use anyhow::{Context, Result};
use crossbeam_channel::bounded;
use log::{info, LevelFilter};
use signal_hook::iterator::Signals;
use snmp_subagent::agent::Agent;
use snmp_subagent::agentx::encodings::ID;
use snmp_subagent::config;
use snmp_subagent::db::redis_client::RedisClient;
use snmp_subagent::db::{DbClient, Namespaces};
use snmp_subagent::modules;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// This subagent's own AgentX object identifier (RFC 2741 §6.2.4): an enterprise-arc
/// placeholder under which it registers, distinct from any of the data OIDs it serves.
const SUBAGENT_OID: [u32; 7] = [1, 3, 6, 1, 4, 1, 99999];

fn init_logger(level: &str) -> Result<()> {
    let filter = level.parse::<LevelFilter>().unwrap_or(LevelFilter::Info);
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} [{}] {}: {}",
                unix_timestamp(),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(filter)
        .chain(std::io::stderr())
        .apply()
        .context("installing logger")?;
    Ok(())
}

fn unix_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn connect_namespaces(cfg: &config::ConfigOpt) -> Result<Namespaces> {
    let mut clients: Vec<Box<dyn DbClient>> = Vec::new();
    let host = RedisClient::unix_socket("", &cfg.backend.redis_unix_socket_path)
        .context("connecting to host namespace backend")?;
    clients.push(Box::new(host));
    for (i, path) in cfg.backend.namespace_socket_paths.iter().enumerate() {
        let client = RedisClient::unix_socket(format!("asic{}", i), path)
            .with_context(|| format!("connecting to namespace backend {}", path))?;
        clients.push(Box::new(client));
    }
    Ok(Namespaces::new(clients))
}

fn run() -> Result<i32> {
    let cfg = config::from_args().context("loading configuration")?;
    init_logger(&cfg.log.level)?;
    info!("snmp-subagent starting up");

    let stop_flag = Arc::new(AtomicBool::new(false));
    let is_debug = Arc::new(AtomicBool::new(cfg.log.level == "debug" || cfg.log.level == "trace"));
    let mut signals = Signals::new(&[libc::SIGINT, libc::SIGTERM, libc::SIGUSR1])
        .context("registering signal handlers")?;
    {
        let stop_flag = Arc::clone(&stop_flag);
        let is_debug = Arc::clone(&is_debug);
        thread::spawn(move || {
            for signal in signals.forever() {
                match signal {
                    libc::SIGUSR1 => {
                        let now_debug = !is_debug.load(Ordering::SeqCst);
                        is_debug.store(now_debug, Ordering::SeqCst);
                        let level = if now_debug { LevelFilter::Debug } else { LevelFilter::Info };
                        log::set_max_level(level);
                        info!("SIGUSR1: log level toggled to {:?}", level);
                    }
                    _ => {
                        info!("received shutdown signal");
                        stop_flag.store(true, Ordering::SeqCst);
                    }
                }
            }
        });
    }

    let db = Arc::new(connect_namespaces(&cfg).context("connecting to DB backends")?);
    let bgpd_addr = "127.0.0.1:2605".to_string();
    let modules = modules::standard_modules(bgpd_addr);

    let descr = snmp_subagent::utils::uname_n().unwrap_or_else(|_| "snmp-subagent".to_string());
    let subagent_oid = ID::new(SUBAGENT_OID.to_vec());
    let agent = Agent::build(&cfg, db, modules, subagent_oid, descr)
        .context("constructing agent from configuration")?;

    let (stop_tx, stop_rx) = bounded::<()>(0);
    {
        let stop_flag = Arc::clone(&stop_flag);
        thread::spawn(move || loop {
            thread::sleep(Duration::from_millis(200));
            if stop_flag.load(Ordering::SeqCst) {
                info!("shutdown signal received, stopping");
                let _ = stop_tx.send(());
                return;
            }
        });
    }

    agent.run(&stop_rx);
    info!("snmp-subagent shut down cleanly");
    Ok(0)
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("snmp-subagent: fatal: {:#}", e);
            std::process::exit(1);
        }
    }
}
