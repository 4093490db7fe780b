use murmur_core::history::HistoryLoader;
use murmur_core::ThreadId;

use crate::commands::common::{format_message_line, Context};
use crate::error::CliError;

pub async fn run_history(
    ctx: &Context,
    thread_id: ThreadId,
    pages: usize,
    as_json: bool,
) -> Result<(), CliError> {
    if pages == 0 {
        return Err(CliError::InvalidPageCount);
    }
    ctx.require_session().await?;
    let api = ctx.rest_client()?;

    let mut history = HistoryLoader::open(&api, thread_id, ctx.config.page_size).await?;
    for _ in 1..pages {
        if !history.has_more() {
            break;
        }
        history.load_older(&api).await?;
    }

    if as_json {
        println!("{}", serde_json::to_string_pretty(history.messages())?);
        return Ok(());
    }

    if history.has_more() {
        println!("({} older messages not shown)", history.offset());
    }
    for message in history.messages() {
        println!("{}", format_message_line(message));
    }
    Ok(())
}
