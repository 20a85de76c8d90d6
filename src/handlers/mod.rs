//! Command handlers
//!
//! One file per user-facing subcommand. Each handler owns its exit
//! semantics through `CliError`; success is plain `Ok(())`.

mod call;
mod grep;
mod info;
mod list;

pub use call::run_call;
pub use grep::run_grep;
pub use info::run_info;
pub use list::run_list;

use std::sync::Arc;

use crate::config::Catalogue;
use crate::credentials::CredentialStore;
use crate::mcp::{fan_out, session, FanoutResult, McpTool};
use crate::settings::Settings;

/// Everything a handler needs for one invocation.
pub struct Context {
    pub catalogue: Catalogue,
    pub store: CredentialStore,
    pub settings: Settings,
    pub with_descriptions: bool,
}

/// List tools on every configured server with bounded parallelism.
///
/// Sessions here are non-interactive: a fan-out must never park N servers
/// behind one browser prompt, so servers needing fresh authorization show
/// up as per-server errors instead.
pub(crate) async fn fetch_all_tools(ctx: &Context) -> Vec<FanoutResult<Vec<McpTool>>> {
    let names = ctx.catalogue.server_names();
    let catalogue = Arc::new(ctx.catalogue.clone());
    let store = ctx.store.clone();
    let settings = ctx.settings.clone();

    fan_out(names, ctx.settings.concurrency, move |name: String| {
        let catalogue = catalogue.clone();
        let store = store.clone();
        let settings = settings.clone();
        async move {
            let config = catalogue
                .get(&name)
                .ok_or_else(|| anyhow::anyhow!("server '{}' disappeared from config", name))?;
            let mut session = session::connect(
                &name,
                config,
                catalogue.path(),
                &store,
                &settings,
                false,
            )
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))?;
            let tools = session
                .list_tools()
                .await
                .map_err(|e| anyhow::anyhow!("{}", e));
            session.close().await;
            tools
        }
    })
    .await
}
