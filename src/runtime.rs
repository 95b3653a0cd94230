//! Per-host runtime context.
//!
//! The reified execution state handed to every action: transport,
//! artifact store, registries, merged environment with the reserved
//! names injected last, run identity, cancellation token, and log sinks.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::artifacts::ArtifactStore;
use crate::envmap;
use crate::registry;
use crate::ssh::{Client, Host, Sink};
use crate::ui::Console;

pub struct Runtime {
    pub transport: Arc<dyn Client>,
    pub artifacts: Arc<ArtifactStore>,
    pub registries: Arc<registry::Manager>,

    /// Merged environment; reserved `HADES_*` names are always present
    /// and always win.
    pub env: HashMap<String, String>,

    pub run_id: String,
    pub plan: String,
    pub target: String,
    pub host: Host,

    pub cancel: CancellationToken,

    /// Raw command output sinks (the host's log file).
    pub log_out: Sink,
    pub log_err: Sink,

    pub console: Console,
}

impl Runtime {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transport: Arc<dyn Client>,
        artifacts: Arc<ArtifactStore>,
        registries: Arc<registry::Manager>,
        mut user_env: HashMap<String, String>,
        run_id: String,
        plan: String,
        target: String,
        host: Host,
        cancel: CancellationToken,
        log_out: Sink,
        log_err: Sink,
    ) -> Self {
        envmap::inject_reserved(&mut user_env, &run_id, &plan, &target, &host);
        Runtime {
            transport,
            artifacts,
            registries,
            env: user_env,
            run_id,
            plan,
            target,
            host,
            cancel,
            log_out,
            log_err,
            console: Console::new(),
        }
    }
}
