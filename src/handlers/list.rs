//! Default command: list every server and its tools.

use crate::error::CliResult;
use crate::output;

use super::{fetch_all_tools, Context};

pub async fn run_list(ctx: &Context) -> CliResult<()> {
    let names = ctx.catalogue.server_names();
    if names.is_empty() {
        println!("no servers configured in {}", ctx.catalogue.path().display());
        return Ok(());
    }

    let results = fetch_all_tools(ctx).await;
    println!("{}", output::render_server_list(&results, ctx.with_descriptions));
    Ok(())
}
