use murmur_core::api::ChatApi;
use murmur_core::store::ConversationStore;

use crate::commands::common::{format_conversation_line, Context};
use crate::error::CliError;

pub async fn run_conversations(ctx: &Context, refresh: bool, as_json: bool) -> Result<(), CliError> {
    let mut store = ConversationStore::new(ctx.open_storage()?);

    if refresh {
        ctx.require_session().await?;
        let snapshot = ctx.rest_client()?.fetch_conversations().await?;
        for error in store.apply_snapshot(snapshot) {
            eprintln!("Skipped conversation: {}", error.message);
        }
    }

    if as_json {
        println!("{}", serde_json::to_string_pretty(store.list())?);
        return Ok(());
    }

    if store.is_empty() {
        println!("No conversations.");
        return Ok(());
    }
    for conversation in store.list() {
        println!("{}", format_conversation_line(conversation));
    }
    println!("{} unread", store.total_unread());
    Ok(())
}
