//! Single-item and current-user lookups

use anyhow::{bail, Result};
use futures::{pin_mut, StreamExt};

use super::client::CatalogClient;
use crate::models::{Item, Outcome, User};

pub async fn get_item(client: &CatalogClient, id: &str) -> Outcome<Item> {
    client.get_resource("items", id).await.into()
}

pub async fn current_user(client: &CatalogClient) -> Outcome<User> {
    client.get_json("users/me", &[]).await.into()
}

/// Fetch and display one item.
pub async fn show_item(client: &CatalogClient, id: &str) -> Result<()> {
    let item = settle(Outcome::observe(get_item(client, id)), "item").await?;

    println!();
    println!("ID:        {}", item.id);
    println!("Title:     {}", item.title.as_deref().unwrap_or("(none)"));
    if let Some(price) = item.price {
        println!(
            "Price:     {:.2} {}",
            price,
            item.currency_id.as_deref().unwrap_or("")
        );
    }
    if let Some(qty) = item.available_quantity {
        println!("Available: {}", qty);
    }
    println!("Condition: {}", item.condition.as_deref().unwrap_or("(none)"));
    println!("Status:    {}", item.status.as_deref().unwrap_or("(none)"));
    if let Some(ref link) = item.permalink {
        println!("Link:      {}", link);
    }

    Ok(())
}

/// Fetch and display the signed-in user.
pub async fn whoami(client: &CatalogClient) -> Result<()> {
    let me = settle(Outcome::observe(current_user(client)), "user").await?;

    println!();
    let id = match me.id {
        serde_json::Value::String(ref s) => s.clone(),
        ref other => other.to_string(),
    };
    println!("ID:       {}", id);
    println!("Nickname: {}", me.nickname.as_deref().unwrap_or("(none)"));
    println!("Email:    {}", me.email.as_deref().unwrap_or("(none)"));
    println!("Site:     {}", me.site_id.as_deref().unwrap_or("(none)"));

    Ok(())
}

async fn settle<T>(
    states: impl futures::Stream<Item = Outcome<T>>,
    what: &str,
) -> Result<T> {
    pin_mut!(states);
    while let Some(state) = states.next().await {
        match state {
            Outcome::Loading => tracing::info!("Fetching {}...", what),
            Outcome::Success(value) => return Ok(value),
            Outcome::Error { message, code, .. } => match code {
                Some(401) | Some(403) => {
                    bail!("{} (run 'catalog-cli login')", message)
                }
                _ => bail!("Failed to fetch {}: {}", what, message),
            },
        }
    }
    bail!("No response for {}", what)
}
