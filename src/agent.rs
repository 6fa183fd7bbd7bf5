//! Top-level agent construction and run loop: wires the composed MIB tree, the updater
//! scheduler, the DB namespace fan-out, and the AgentX session FSM into one `run()` call.

use crate::agentx::encodings::ID;
use crate::config::ConfigOpt;
use crate::db::Namespaces;
use crate::mib::scheduler::{Scheduler, Updater};
use crate::mib::{Entry, MibTree};
use crate::oid::Oid;
use crate::session::{self, Connector, TcpConnector, UnixConnector};
use anyhow::{Context, Result};
use crossbeam_channel::Receiver;
use std::sync::Arc;
use std::time::Duration;

/// One data module's contribution: the updaters it needs scheduled, plus the `Entry` list it
/// composes into the tree. Passed in by the caller rather than discovered through a module-level
/// side-effecting registry.
pub type ModuleBuilder = Box<dyn FnOnce(Arc<Namespaces>) -> (Vec<Arc<dyn Updater>>, Vec<Entry>)>;

pub struct Agent {
    tree: Arc<MibTree>,
    updaters: Vec<Arc<dyn Updater>>,
    connector: Box<dyn Connector>,
    subagent_oid: ID,
    descr: String,
    agent_timeout: Duration,
    roots: Vec<Oid>,
}

impl Agent {
    pub fn build(
        config: &ConfigOpt,
        db: Arc<Namespaces>,
        modules: Vec<ModuleBuilder>,
        subagent_oid: ID,
        descr: String,
    ) -> Result<Self> {
        let mut all_updaters: Vec<Arc<dyn Updater>> = Vec::new();
        let mut all_entries: Vec<Entry> = Vec::new();
        let mut roots: Vec<Oid> = Vec::new();

        for build in modules {
            let (updaters, entries) = build(db.clone());
            for e in &entries {
                roots.push(e.oid.clone());
            }
            all_updaters.extend(updaters);
            all_entries.extend(entries);
        }
        roots.sort();
        roots.dedup();

        let tree = MibTree::build(all_entries)
            .map_err(|e| anyhow::anyhow!(e))
            .context("composing MIB tree from module entries")?;

        let connector: Box<dyn Connector> = if let Some(port) = config.master_agent.port {
            let host = config
                .master_agent
                .host
                .clone()
                .unwrap_or_else(|| "127.0.0.1".to_string());
            Box::new(TcpConnector {
                addr: format!("{}:{}", host, port),
            })
        } else {
            let path = config
                .master_agent
                .unix_socket_path
                .clone()
                .context("config has neither a master_agent port nor a unix_socket_path")?;
            Box::new(UnixConnector { path })
        };

        Ok(Agent {
            tree: Arc::new(tree),
            updaters: all_updaters,
            connector,
            subagent_oid,
            descr,
            agent_timeout: Duration::from_secs(config.master_agent.agent_timeout_secs),
            roots,
        })
    }

    /// Runs the updater scheduler and the session FSM until `stop` fires, then tears both down:
    /// the session's own close handshake first, then every updater thread.
    pub fn run(self, stop: &Receiver<()>) {
        let scheduler = Scheduler::start(self.updaters);
        session::run(
            self.connector.as_ref(),
            self.subagent_oid,
            &self.descr,
            self.tree,
            self.agent_timeout,
            self.roots,
            stop,
        );
        scheduler.shutdown();
    }
}
