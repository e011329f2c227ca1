//! Replay command handler: run a script against a simulated network and
//! print what ended up in the tree.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tabled::Tabled;
use tracing::{debug, info};

use zwlink_api::{DriverCall, Notification, NotificationKind, SimDriver};
use zwlink_config::Config;
use zwlink_core::{
    ActionArgs, CoreError, EntitySnapshot, MemoryTree, SessionStatus, Supervisor, ValueType,
};

use crate::cli::{GlobalOpts, ReplayArgs, ReplayView};
use crate::error::CliError;
use crate::output;
use crate::script::{Script, Step};

// ── Rows ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Tabled)]
struct EntityRow {
    #[tabled(rename = "Path")]
    path: String,
    #[tabled(rename = "Label")]
    label: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Type")]
    value_type: String,
    #[tabled(rename = "Flags")]
    flags: String,
}

#[derive(Debug, Serialize)]
struct SessionInfo {
    name: String,
    port: String,
    status: SessionStatus,
    home_id: Option<String>,
    devices: usize,
    last_full_query: Option<String>,
}

#[derive(Tabled)]
struct SessionRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Port")]
    port: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Home ID")]
    home_id: String,
    #[tabled(rename = "Devices")]
    devices: usize,
}

#[derive(Tabled)]
struct CallRow {
    #[tabled(rename = "Call")]
    call: String,
}

// ── Handler ──────────────────────────────────────────────────────────

pub async fn handle(args: ReplayArgs, config: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    let script = Script::load(&args.script)?;
    let driver = Arc::new(script.driver());

    let restore_from = args.tree.clone().or_else(|| config.tree.snapshot.clone());
    let tree = Arc::new(match restore_from.as_deref() {
        Some(path) if path.exists() => MemoryTree::load(path)?,
        _ => MemoryTree::new(),
    });

    let supervisor = Supervisor::new(driver.clone(), tree.clone(), config.engine_config()?)?;
    let restored = supervisor.restore()?;
    settle(&supervisor).await;
    info!(restored, steps = script.steps.len(), "replay starting");

    for (index, step) in script.steps.iter().enumerate() {
        debug!(index, ?step, "replaying step");
        run_step(&script, step, &supervisor, &tree, &driver).await?;
        settle(&supervisor).await;
    }

    let out = match args.show {
        ReplayView::Tree => render_tree(&tree, global)?,
        ReplayView::Sessions => render_sessions(&supervisor, global).await?,
        ReplayView::Calls => render_calls(&driver, global)?,
    };
    output::print_output(&out, global.quiet);

    supervisor.shutdown().await;
    if let Some(path) = save_target(&args, config) {
        tree.save(&path)?;
        info!(path = %path.display(), "tree snapshot written");
    }
    Ok(())
}

/// `--save` wins; otherwise the configured snapshot, unless `--tree`
/// pointed the replay somewhere else.
fn save_target(args: &ReplayArgs, config: &Config) -> Option<PathBuf> {
    match (&args.save, &args.tree) {
        (Some(path), _) => Some(path.clone()),
        (None, None) => config.tree.snapshot.clone(),
        (None, Some(_)) => None,
    }
}

async fn run_step(
    script: &Script,
    step: &Step,
    supervisor: &Supervisor,
    tree: &MemoryTree,
    driver: &SimDriver,
) -> Result<(), CliError> {
    match step {
        Step::Connect { name, port } => {
            supervisor.add_connection(name, port)?;
        }
        Step::Startup { port } => driver.emit_all(driver.startup_sequence(port)),
        Step::Notify(notification) => driver.emit(notification.clone()),
        Step::Update {
            home_id,
            node_id,
            label,
            data,
        } => {
            let id = script
                .value_id(*home_id, *node_id, label)
                .ok_or_else(|| CliError::NotFound {
                    resource_type: "value".into(),
                    identifier: format!("{home_id}/{node_id}/{label}"),
                })?;
            driver.set_data(&id, data.clone()).map_err(CoreError::from)?;
            driver.emit(Notification::new(
                *home_id,
                *node_id,
                NotificationKind::ValueChanged { value: id },
            ));
        }
        Step::SetAwake {
            home_id,
            node_id,
            awake,
        } => driver
            .set_awake(*home_id, *node_id, *awake)
            .map_err(CoreError::from)?,
        Step::Write { path, value } => {
            let entity = find(tree, path)?;
            tree.external_write(entity, value.clone())?;
        }
        Step::Invoke { path, args } => {
            let entity = find(tree, path)?;
            let args = args
                .iter()
                .fold(ActionArgs::new(), |acc, (k, v)| acc.with(k.clone(), v.clone()));
            tree.invoke(entity, args)?;
        }
        Step::Wait { ms } => tokio::time::sleep(Duration::from_millis(*ms)).await,
    }
    Ok(())
}

/// Let every session drain its mailbox. Two rounds, so that driver echoes
/// queued while handling the first round are applied too.
async fn settle(supervisor: &Supervisor) {
    for _ in 0..2 {
        for session in supervisor.sessions() {
            session.sync().await;
        }
    }
}

fn find(tree: &MemoryTree, path: &str) -> Result<zwlink_core::EntityId, CliError> {
    tree.find(path).ok_or_else(|| CliError::NotFound {
        resource_type: "entity".into(),
        identifier: path.into(),
    })
}

// ── Rendering ────────────────────────────────────────────────────────

fn render_tree(tree: &MemoryTree, global: &GlobalOpts) -> Result<String, CliError> {
    let mut rows = Vec::new();
    flatten(&tree.view(), "", &mut rows);
    output::render_list(&global.output, &rows, EntityRow::clone, |r| r.path.clone())
}

fn flatten(node: &EntitySnapshot, prefix: &str, out: &mut Vec<EntityRow>) {
    for child in &node.children {
        let path = format!("{prefix}/{}", child.name);
        out.push(entity_row(&path, child));
        flatten(child, &path, out);
    }
}

fn entity_row(path: &str, entity: &EntitySnapshot) -> EntityRow {
    let mut flags = Vec::new();
    if entity.writable {
        flags.push("writable".to_owned());
    }
    if entity.hidden {
        flags.push("hidden".to_owned());
    }
    if let Some(permission) = entity.action {
        flags.push(format!("op:{}", permission_name(permission)));
    }
    EntityRow {
        path: path.to_owned(),
        label: entity
            .display_name
            .clone()
            .filter(|d| *d != entity.name)
            .unwrap_or_default(),
        value: if entity.value.is_null() {
            String::new()
        } else {
            entity.value.to_string()
        },
        value_type: entity
            .value_type
            .as_ref()
            .map(type_name)
            .unwrap_or_default()
            .to_owned(),
        flags: flags.join(","),
    }
}

fn type_name(value_type: &ValueType) -> &'static str {
    match value_type {
        ValueType::Bool => "bool",
        ValueType::Number => "number",
        ValueType::String => "string",
        ValueType::Enum(_) => "enum",
        ValueType::Array => "array",
        ValueType::Dynamic => "dynamic",
    }
}

fn permission_name(permission: zwlink_core::Permission) -> &'static str {
    match permission {
        zwlink_core::Permission::Read => "read",
        zwlink_core::Permission::Write => "write",
    }
}

async fn render_sessions(supervisor: &Supervisor, global: &GlobalOpts) -> Result<String, CliError> {
    let mut sessions = Vec::new();
    for session in supervisor.sessions() {
        let devices = session.devices().await.map(|d| d.len()).unwrap_or_default();
        sessions.push(SessionInfo {
            name: session.name().to_owned(),
            port: session.port(),
            status: session.status(),
            home_id: session.home_id().map(|h| h.to_string()),
            devices,
            last_full_query: session.last_full_query().map(|t| t.to_rfc3339()),
        });
    }

    let color = output::should_color(&global.color);
    output::render_list(
        &global.output,
        &sessions,
        |s| SessionRow {
            name: s.name.clone(),
            port: s.port.clone(),
            status: output::status_label(s.status, color),
            home_id: s.home_id.clone().unwrap_or_default(),
            devices: s.devices,
        },
        |s| s.name.clone(),
    )
}

fn render_calls(driver: &SimDriver, global: &GlobalOpts) -> Result<String, CliError> {
    let calls: Vec<DriverCall> = driver.calls();
    output::render_list(
        &global.output,
        &calls,
        |c| CallRow {
            call: format!("{c:?}"),
        },
        |c| format!("{c:?}"),
    )
}
