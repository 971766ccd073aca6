//! Tracking of running instances, per-project locks, and last errors.
//!
//! The instance map and the pid/port lookup tables live behind one mutex so
//! they always change together: the orphan reaper must never see a pid that
//! is running but not yet (or no longer) tracked.

use crate::auth_config::AuthConfig;
use crate::composer::{ComposerInfo, ComposerInstance};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

pub type ProjectLock = Arc<tokio::sync::Mutex<()>>;

#[derive(Debug, Default)]
struct Tables {
    instances: HashMap<String, ComposerInstance>,
    pid_to_project: HashMap<u32, String>,
    port_to_project: HashMap<u16, String>,
    last_errors: HashMap<String, String>,
}

/// A point-in-time view of one tracked instance.
#[derive(Debug, Clone)]
pub struct InstanceState {
    pub alive: bool,
    pub auth: AuthConfig,
    pub info: ComposerInfo,
}

#[derive(Debug, Default)]
pub struct InstanceRegistry {
    tables: Mutex<Tables>,
    /// Created on first use and never removed, so a waiter can never end up
    /// holding a lock that a newer caller does not see.
    locks: Mutex<HashMap<String, ProjectLock>>,
    /// Generation of the newest start per project.
    starts: Mutex<HashMap<String, watch::Sender<u64>>>,
}

/// Held by a start for as long as it runs; see [`InstanceRegistry::begin_start`].
#[derive(Debug)]
pub struct StartTicket {
    generation: u64,
    newest: watch::Receiver<u64>,
}

impl StartTicket {
    /// Resolves once a newer start for the same project has begun.
    pub async fn superseded(mut self) {
        while *self.newest.borrow_and_update() == self.generation {
            if self.newest.changed().await.is_err() {
                // the registry is gone; nothing can supersede us now
                std::future::pending::<()>().await;
            }
        }
    }
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|poisoned| {
            warn!("instance registry mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn lock_for(&self, project_id: &str) -> ProjectLock {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(project_id.to_string())
            .or_insert_with(|| {
                trace!("creating lock for project {project_id}");
                Arc::new(tokio::sync::Mutex::new(()))
            })
            .clone()
    }

    /// Registers a new start for `project_id`, superseding any start in flight.
    pub fn begin_start(&self, project_id: &str) -> StartTicket {
        let mut starts = self.starts.lock().unwrap_or_else(|e| e.into_inner());
        let newest = starts
            .entry(project_id.to_string())
            .or_insert_with(|| watch::channel(0).0);
        let generation = *newest.borrow() + 1;
        newest.send_replace(generation);
        StartTicket {
            generation,
            newest: newest.subscribe(),
        }
    }

    pub fn put(&self, project_id: &str, instance: ComposerInstance) {
        let mut tables = self.tables();
        let pid = instance.process.pid();
        let port = instance.port;
        if let Some(old) = tables.instances.insert(project_id.to_string(), instance) {
            // callers stop the old instance first; keep the tables honest anyway
            warn!("replacing tracked instance for {project_id} (pid {})", old.process.pid());
            tables.pid_to_project.remove(&old.process.pid());
            if tables.port_to_project.get(&old.port).map(String::as_str) == Some(project_id) {
                tables.port_to_project.remove(&old.port);
            }
        }
        tables.pid_to_project.insert(pid, project_id.to_string());
        tables.port_to_project.insert(port, project_id.to_string());
    }

    pub fn remove(&self, project_id: &str) -> Option<ComposerInstance> {
        let mut tables = self.tables();
        let instance = tables.instances.remove(project_id)?;
        tables.pid_to_project.remove(&instance.process.pid());
        if tables.port_to_project.get(&instance.port).map(String::as_str) == Some(project_id) {
            tables.port_to_project.remove(&instance.port);
        }
        Some(instance)
    }

    pub fn inspect(&self, project_id: &str) -> Option<InstanceState> {
        let mut tables = self.tables();
        let instance = tables.instances.get_mut(project_id)?;
        Some(InstanceState {
            alive: instance.process.is_alive(),
            auth: instance.auth.clone(),
            info: instance.info(project_id),
        })
    }

    pub fn is_alive(&self, project_id: &str) -> Option<bool> {
        self.tables()
            .instances
            .get_mut(project_id)
            .map(|i| i.process.is_alive())
    }

    pub fn port_for(&self, project_id: &str) -> Option<u16> {
        self.tables().instances.get(project_id).map(|i| i.port)
    }

    pub fn info(&self, project_id: &str) -> Option<ComposerInfo> {
        self.tables()
            .instances
            .get(project_id)
            .map(|i| i.info(project_id))
    }

    pub fn project_on_port(&self, port: u16) -> Option<String> {
        self.tables().port_to_project.get(&port).cloned()
    }

    pub fn project_for_pid(&self, pid: u32) -> Option<String> {
        self.tables().pid_to_project.get(&pid).cloned()
    }

    pub fn tracked_pids(&self) -> HashSet<u32> {
        self.tables().pid_to_project.keys().copied().collect()
    }

    pub fn project_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.tables().instances.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn last_error(&self, project_id: &str) -> Option<String> {
        self.tables().last_errors.get(project_id).cloned()
    }

    pub fn set_last_error(&self, project_id: &str, message: impl Into<String>) {
        self.tables()
            .last_errors
            .insert(project_id.to_string(), message.into());
    }

    pub fn clear_last_error(&self, project_id: &str) {
        self.tables().last_errors.remove(project_id);
    }
}
