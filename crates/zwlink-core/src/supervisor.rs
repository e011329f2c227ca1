// ── Session supervisor ──
//
// Process-level entry point. Owns the single driver subscription, the
// route table it feeds, and the registry of controller sessions. Hosts
// call `restore` once at startup; new connections come in through
// `add_connection` or the `Add Connection` tree operation.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use dashmap::DashMap;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zwlink_api::Driver;

use crate::codec::attr;
use crate::command::Mailbox;
use crate::config::EngineConfig;
use crate::error::CoreError;
use crate::ops;
use crate::route::RouteTable;
use crate::session::{ControllerSession, SessionParams, SessionStatus};
use crate::tree::{Action, ActionArgs, EntityId, Param, Permission, Tree, TreeValue, ValueType};

/// Top-level owner of every controller session.
///
/// Cheaply cloneable via `Arc<SupervisorInner>`.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<SupervisorInner>,
}

struct SupervisorInner {
    tree: Arc<dyn Tree>,
    driver: Arc<dyn Driver>,
    config: EngineConfig,
    routes: RouteTable,
    sessions: DashMap<String, ControllerSession>,
    runtime: Handle,
    cancel: CancellationToken,
    /// Serializes connection admission so name and port checks hold.
    admission: Mutex<()>,
}

impl Supervisor {
    /// Register the process-wide driver callback.
    ///
    /// Must be called from within a tokio runtime; sessions are spawned on
    /// it, including those added later from foreign threads.
    pub fn new(
        driver: Arc<dyn Driver>,
        tree: Arc<dyn Tree>,
        config: EngineConfig,
    ) -> Result<Self, CoreError> {
        let runtime = Handle::try_current()
            .map_err(|e| CoreError::Internal(format!("no tokio runtime: {e}")))?;
        let routes = RouteTable::new();

        let callback_routes = routes.clone();
        driver.subscribe(Arc::new(move |notification| {
            callback_routes.route(notification);
        }))?;

        Ok(Self {
            inner: Arc::new(SupervisorInner {
                tree,
                driver,
                config,
                routes,
                sessions: DashMap::new(),
                runtime,
                cancel: CancellationToken::new(),
                admission: Mutex::new(()),
            }),
        })
    }

    // ── Startup ──────────────────────────────────────────────────

    /// Bring back every controller persisted in the tree and publish the
    /// `Add Connection` operation. Returns how many sessions were restored.
    pub fn restore(&self) -> Result<usize, CoreError> {
        let tree = self.inner.tree.as_ref();
        let root = tree.root();
        let mut restored = 0;

        for child in tree.children(root) {
            let Some(name) = tree.name(child) else {
                continue;
            };
            match tree.attribute(child, attr::PORT) {
                Some(port) => {
                    let port = match port {
                        TreeValue::String(port) => port,
                        other => other.to_string(),
                    };
                    self.restore_session(&name, child, &port)?;
                    restored += 1;
                }
                None if tree.action(child).is_none() => {
                    debug!(name, "stale root entity removed");
                    tree.remove(child)?;
                }
                None => {}
            }
        }

        self.publish_add_connection()?;
        info!(restored, "controller sessions restored");
        Ok(restored)
    }

    fn restore_session(&self, name: &str, entity: EntityId, port: &str) -> Result<(), CoreError> {
        let (mailbox, rx) = Mailbox::channel();
        // A disconnected session keeps retrying the port on its own.
        let connected = if !self.inner.routes.try_bind_port(port, &mailbox) {
            warn!(name, port, "restored connection shares a port with another one");
            false
        } else {
            match self.inner.driver.add_connection(port) {
                Ok(()) => true,
                Err(e) => {
                    warn!(name, port, error = %e, "restored connection failed to open");
                    false
                }
            }
        };
        let session = ControllerSession::spawn(self.params(name, entity, port, connected), mailbox, rx)?;
        self.inner.sessions.insert(name.to_owned(), session);
        Ok(())
    }

    // ── Add connection ───────────────────────────────────────────

    /// Open a new controller connection named `name` on `port`.
    ///
    /// Rejected requests leave no trace in the tree, the routes, or the
    /// driver.
    pub fn add_connection(&self, name: &str, port: &str) -> Result<ControllerSession, CoreError> {
        let name = name.trim();
        let port = port.trim();
        if name.is_empty() {
            return Err(CoreError::MissingParameter {
                name: ops::PARAM_NAME.into(),
            });
        }
        if port.is_empty() {
            return Err(CoreError::MissingParameter {
                name: ops::PARAM_PORT.into(),
            });
        }
        if name.contains('/') {
            return Err(CoreError::InvalidParameter {
                name: ops::PARAM_NAME.into(),
                reason: "name contains '/'".into(),
            });
        }

        let _admission = self
            .inner
            .admission
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let tree = self.inner.tree.as_ref();
        let root = tree.root();

        if self.session(name).is_some() || tree.child(root, name).is_some() {
            return Err(CoreError::DuplicateConnection { name: name.into() });
        }
        let (mailbox, rx) = Mailbox::channel();
        if !self.inner.routes.try_bind_port(port, &mailbox) {
            let owner = self
                .sessions()
                .into_iter()
                .find(|s| s.port() == port)
                .map_or_else(|| "another connection".to_owned(), |s| format!("'{}'", s.name()));
            return Err(CoreError::InvalidParameter {
                name: ops::PARAM_PORT.into(),
                reason: format!("{port} is already used by {owner}"),
            });
        }

        let entity = match tree.create_child(root, name) {
            Ok(entity) => entity,
            Err(e) => {
                self.inner.routes.unbind_port(port, &mailbox);
                return Err(e.into());
            }
        };
        let opened = tree
            .set_attribute(entity, attr::PORT, TreeValue::from(port))
            .map_err(CoreError::from)
            .and_then(|()| self.inner.driver.add_connection(port).map_err(CoreError::from));
        if let Err(e) = opened {
            self.inner.routes.unbind_port(port, &mailbox);
            tree.remove(entity).ok();
            warn!(name, port, error = %e, "connection rejected");
            return Err(e);
        }

        let session = match ControllerSession::spawn(
            self.params(name, entity, port, true),
            mailbox.clone(),
            rx,
        ) {
            Ok(session) => session,
            Err(e) => {
                self.inner.driver.remove_connection(port).ok();
                self.inner.routes.unbind_port(port, &mailbox);
                tree.remove(entity).ok();
                return Err(e);
            }
        };
        self.inner.sessions.insert(name.to_owned(), session.clone());
        info!(name, port, "connection added");

        if let Err(e) = self.publish_add_connection() {
            warn!(error = %e, "failed to refresh the add-connection operation");
        }
        Ok(session)
    }

    /// (Re)attach `Add Connection` under the root with the ports
    /// available right now.
    fn publish_add_connection(&self) -> Result<(), CoreError> {
        let ports: Vec<String> = self.inner.driver.available_ports().into_iter().collect();
        let default_port = ports.first().cloned().unwrap_or_default();
        let weak: Weak<SupervisorInner> = Arc::downgrade(&self.inner);

        let action = Action::new(Permission::Write, move |args: ActionArgs| {
            let Some(inner) = weak.upgrade() else {
                return Err(CoreError::Internal("supervisor has shut down".into()));
            };
            let supervisor = Supervisor { inner };
            let name = args.string(ops::PARAM_NAME).unwrap_or_default();
            let port = args.string(ops::PARAM_PORT).unwrap_or_default();
            if !port.is_empty() && !supervisor.inner.driver.available_ports().contains(&port) {
                return Err(CoreError::InvalidParameter {
                    name: ops::PARAM_PORT.into(),
                    reason: format!("{port} is not an available port"),
                });
            }
            supervisor.add_connection(&name, &port).map(|_| ())
        })
        .with_param(
            Param::new(ops::PARAM_NAME, ValueType::String)
                .with_default(ops::DEFAULT_CONNECTION_NAME),
        )
        .with_param(Param::new(ops::PARAM_PORT, ValueType::Enum(ports)).with_default(default_port));

        let tree = self.inner.tree.as_ref();
        tree.attach_action(tree.root(), ops::ADD_CONNECTION, action)?;
        Ok(())
    }

    fn params(&self, name: &str, entity: EntityId, port: &str, connected: bool) -> SessionParams {
        SessionParams {
            name: name.to_owned(),
            entity,
            port: port.to_owned(),
            tree: Arc::clone(&self.inner.tree),
            driver: Arc::clone(&self.inner.driver),
            routes: self.inner.routes.clone(),
            config: self.inner.config.clone(),
            runtime: self.inner.runtime.clone(),
            cancel: self.inner.cancel.clone(),
            connected,
        }
    }

    // ── Registry ─────────────────────────────────────────────────

    /// A live session by connection name.
    pub fn session(&self, name: &str) -> Option<ControllerSession> {
        self.inner
            .sessions
            .get(name)
            .map(|s| s.clone())
            .filter(|s| s.status() != SessionStatus::Removed)
    }

    /// Every live session, ordered by name.
    pub fn sessions(&self) -> Vec<ControllerSession> {
        let mut sessions: Vec<ControllerSession> = self
            .inner
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|s| s.status() != SessionStatus::Removed)
            .collect();
        sessions.sort_by(|a, b| a.name().cmp(b.name()));
        sessions
    }

    /// Close every driver connection and stop every session. The tree is
    /// left as is so it can be persisted and restored later.
    pub async fn shutdown(&self) {
        for session in self.sessions() {
            session.shutdown().await;
        }
        self.inner.cancel.cancel();
        info!("supervisor shut down");
    }
}
