use murmur_core::api::ChatApi;
use murmur_core::store::NotificationStore;

use crate::commands::common::{format_notification_line, Context};
use crate::error::CliError;

pub async fn run_notifications(
    ctx: &Context,
    refresh: bool,
    mark_all_read: bool,
    as_json: bool,
) -> Result<(), CliError> {
    let mut store = NotificationStore::new(ctx.open_storage()?);

    if refresh || mark_all_read {
        ctx.require_session().await?;
        let api = ctx.rest_client()?;
        if refresh {
            store.replace_all(api.fetch_notifications().await?);
        }
        if mark_all_read {
            api.mark_all_notifications_read().await?;
            store.mark_all_read();
        }
    }

    if as_json {
        println!("{}", serde_json::to_string_pretty(store.list())?);
        return Ok(());
    }

    if store.is_empty() {
        println!("No notifications.");
        return Ok(());
    }
    for notification in store.list() {
        println!("{}", format_notification_line(notification));
    }
    println!("{} unread", store.unread_count());
    Ok(())
}
