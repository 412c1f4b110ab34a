//! `pinmark sessions|session|pending|ack|resolve|dismiss|reply`: read
//! feedback and act on it through a running server.

use std::io::Write;

use serde::Serialize;

use pm_domain::config::Config;

use super::{AgentCommand, Remote};
use crate::bridge::Bridge;

impl AgentCommand {
    pub fn remote(&self) -> &Remote {
        match self {
            Self::Sessions { remote }
            | Self::Session { remote, .. }
            | Self::Pending { remote, .. }
            | Self::Ack { remote, .. }
            | Self::Resolve { remote, .. }
            | Self::Dismiss { remote, .. }
            | Self::Reply { remote, .. } => remote,
        }
    }
}

pub async fn run(config: &Config, command: AgentCommand) -> anyhow::Result<()> {
    let url = command
        .remote()
        .http_url
        .clone()
        .unwrap_or_else(|| config.server.local_url());
    let bridge = Bridge::new(&url, Bridge::token_from_env(config))?;
    execute(&bridge, command, &mut std::io::stdout().lock()).await
}

/// Run `command` against `bridge` and write the result as pretty JSON.
pub async fn execute<W: Write>(
    bridge: &Bridge,
    command: AgentCommand,
    out: &mut W,
) -> anyhow::Result<()> {
    match command {
        AgentCommand::Sessions { .. } => write_json(out, &bridge.list_sessions().await?),
        AgentCommand::Session { id, .. } => write_json(out, &bridge.session(&id).await?),
        AgentCommand::Pending { session, .. } => {
            write_json(out, &bridge.pending(session.as_deref()).await?)
        }
        AgentCommand::Ack { annotation_id, .. } => {
            write_json(out, &bridge.acknowledge(&annotation_id).await?)
        }
        AgentCommand::Resolve {
            annotation_id,
            summary,
            ..
        } => write_json(out, &bridge.resolve(&annotation_id, summary.as_deref()).await?),
        AgentCommand::Dismiss {
            annotation_id,
            reason,
            ..
        } => write_json(out, &bridge.dismiss(&annotation_id, &reason).await?),
        AgentCommand::Reply {
            annotation_id,
            message,
            ..
        } => write_json(out, &bridge.reply(&annotation_id, &message).await?),
    }
}

fn write_json<W: Write, T: Serialize>(out: &mut W, value: &T) -> anyhow::Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}
