use std::io::{self, BufRead, IsTerminal, Write};

use chrono::DateTime;
use murmur_core::auth::CredentialProvider;
use murmur_core::store::{ConversationStore, NotificationStore};

use crate::commands::common::Context;
use crate::error::CliError;

pub async fn run_login(
    ctx: &Context,
    username: &str,
    password: Option<String>,
) -> Result<(), CliError> {
    let password = match password {
        Some(password) => password,
        None => read_password()?,
    };
    let session = ctx.credentials.sign_in(username, &password).await?;
    let label = session
        .user
        .as_ref()
        .map_or(username, |user| user.username.as_str());
    println!("Signed in to {} as {label}", ctx.api_url);
    Ok(())
}

fn read_password() -> Result<String, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        eprint!("Password: ");
        io::stderr().flush()?;
    }
    let mut line = String::new();
    stdin.lock().read_line(&mut line)?;
    let password = line.trim_end_matches(['\r', '\n']);
    if password.is_empty() {
        return Err(CliError::EmptyPassword);
    }
    Ok(password.to_string())
}

pub async fn run_status(ctx: &Context) -> Result<(), CliError> {
    let user = ctx.credentials.restore().await?;
    if !ctx.credentials.is_authenticated() {
        println!("Not signed in to {}.", ctx.api_url);
        return Ok(());
    }

    let label = user.map_or_else(|| "(unknown user)".to_string(), |user| user.username);
    let expiry = ctx
        .credentials
        .expires_at()
        .await
        .and_then(|exp| DateTime::from_timestamp(exp, 0))
        .map_or_else(|| "unknown".to_string(), |at| at.to_rfc3339());
    println!(
        "Signed in to {} as {label} (access token expires {expiry})",
        ctx.api_url
    );
    Ok(())
}

/// Sign out and drop every piece of local state tied to the session.
pub async fn run_logout(ctx: &Context) -> Result<(), CliError> {
    if let Err(error) = ctx.credentials.restore().await {
        tracing::debug!("Ignoring session restore failure during logout: {}", error);
    }
    ctx.credentials.sign_out().await?;

    let storage = ctx.open_storage()?;
    ConversationStore::new(std::sync::Arc::clone(&storage)).clear();
    NotificationStore::new(storage).clear();
    println!("Signed out of {}", ctx.api_url);
    Ok(())
}
