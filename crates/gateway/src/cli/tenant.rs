//! `pinmark tenant …`: account administration against the configured
//! store, without a running server.

use std::sync::Arc;

use anyhow::Context;
use chrono::{Duration, Utc};
use serde::Serialize;

use pm_domain::config::Config;
use pm_domain::model::{User, UserRole};
use pm_events::EventBus;
use pm_store::{Store, TenantStore};

use super::TenantCommand;

pub fn run(config: &Config, command: TenantCommand) -> anyhow::Result<()> {
    let store = Store::open(&config.store, EventBus::new()).context("opening store")?;
    let tenants = TenantStore::new(Arc::new(store));
    execute(&tenants, command)
}

fn execute(tenants: &TenantStore, command: TenantCommand) -> anyhow::Result<()> {
    match command {
        TenantCommand::CreateOrg { name } => {
            print_json(&tenants.create_organization(&name)?)
        }
        TenantCommand::CreateUser { email, org, role } => {
            let role = UserRole::parse(&role)
                .with_context(|| format!("unknown role {role:?} (owner, admin, member)"))?;
            print_json(&tenants.create_user(&email, &org, Some(role))?)
        }
        TenantCommand::CreateKey {
            user,
            name,
            expires_in_days,
        } => {
            let user = resolve_user(tenants, &user)?;
            let expires_at = expires_in_days.map(|d| Utc::now() + Duration::days(i64::from(d)));
            let created = tenants.create_api_key(&user.id, &name, expires_at)?;
            print_json(&created)?;
            eprintln!("Store this key now; it cannot be shown again.");
            Ok(())
        }
        TenantCommand::ListKeys { user } => {
            let user = resolve_user(tenants, &user)?;
            print_json(&tenants.list_api_keys(&user.id)?)
        }
        TenantCommand::RevokeKey { key_id } => {
            if !tenants.delete_api_key(&key_id)? {
                anyhow::bail!("no API key with id {key_id}");
            }
            println!("revoked {key_id}");
            Ok(())
        }
    }
}

/// Accept either a user id or an email address.
fn resolve_user(tenants: &TenantStore, user: &str) -> anyhow::Result<User> {
    let found = if user.contains('@') {
        tenants.get_user_by_email(user)?
    } else {
        tenants.get_user(user)?
    };
    found.with_context(|| format!("no user {user}"))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
