// ── Notification routing ──
//
// The driver has one process-wide callback. The route table forwards
// each notification to the mailbox of the session that owns it: by port
// for driver-lifecycle kinds (the home id is not known to anyone yet),
// by home id for everything else.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use zwlink_api::{HomeId, Notification, NotificationKind};

use crate::command::Mailbox;

#[derive(Clone, Default)]
pub(crate) struct RouteTable {
    by_port: Arc<DashMap<String, Mailbox>>,
    by_home: Arc<DashMap<HomeId, Mailbox>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `port` for `mailbox`. Fails when another session owns it;
    /// claiming a port the session already owns succeeds.
    pub fn try_bind_port(&self, port: &str, mailbox: &Mailbox) -> bool {
        match self.by_port.entry(port.to_owned()) {
            Entry::Occupied(owner) => owner.get().same_session(mailbox),
            Entry::Vacant(slot) => {
                slot.insert(mailbox.clone());
                true
            }
        }
    }

    /// Release `port` if `mailbox` owns it.
    pub fn unbind_port(&self, port: &str, mailbox: &Mailbox) {
        self.by_port.remove_if(port, |_, owner| owner.same_session(mailbox));
    }

    /// Release `home_id` if `mailbox` owns it.
    pub fn unbind_home(&self, home_id: HomeId, mailbox: &Mailbox) {
        self.by_home.remove_if(&home_id, |_, owner| owner.same_session(mailbox));
    }

    /// Forward one notification. Runs on the driver's callback thread and
    /// never blocks.
    pub fn route(&self, notification: Notification) {
        let mailbox = match &notification.kind {
            NotificationKind::DriverReady { port } => {
                let Some(mailbox) = self.by_port.get(port).map(|m| m.clone()) else {
                    tracing::debug!(port = %port, "driver ready for an unowned port, dropped");
                    return;
                };
                self.by_home.insert(notification.home_id, mailbox.clone());
                mailbox
            }
            NotificationKind::DriverFailed { port } => {
                let Some(mailbox) = self.by_port.get(port).map(|m| m.clone()) else {
                    tracing::debug!(port = %port, "driver failure for an unowned port, dropped");
                    return;
                };
                mailbox
            }
            _ => {
                let Some(mailbox) = self.by_home.get(&notification.home_id).map(|m| m.clone())
                else {
                    tracing::debug!(
                        home_id = %notification.home_id,
                        kind = notification.kind.as_ref(),
                        "notification for an unbound network, dropped"
                    );
                    return;
                };
                mailbox
            }
        };

        let home_id = notification.home_id;
        if !mailbox.notify(notification) {
            tracing::debug!(%home_id, "session stopped, notification dropped");
        }
    }
}
