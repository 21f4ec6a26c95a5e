//! Test support for the warm pool.
//!
//! [`FakePlatform`] is an in-memory [`Platform`] with scriptable failures.
//! It records every mutation so tests can assert on what a reconciliation
//! cycle actually did, and counts creates that were abandoned mid-flight so
//! cancellation is observable.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use warmpool_platform::{
    Instance, InstanceId, InstanceState, Platform, PlatformError, TemplateBundle, TemplateVersion,
};

/// Build an instance record.
pub fn instance(id: &str, version: &str, state: InstanceState) -> Instance {
    Instance {
        id: InstanceId::new(id),
        name: format!("editor-{id}"),
        web_url: Some(format!("https://{id}.example.app")),
        template_version: TemplateVersion::new(version),
        state,
        created_at: None,
    }
}

/// Create a template directory with a couple of files.
pub fn template_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("create temp dir");
    write_template(dir.path());
    dir
}

/// Populate `dir` with template files.
pub fn write_template(dir: &Path) {
    std::fs::write(dir.join("package.json"), r#"{"name":"editor"}"#).expect("write template");
    std::fs::write(dir.join("index.js"), "require('./server')").expect("write template");
}

/// How one `create_instance` call behaves.
#[derive(Debug, Clone)]
pub enum CreateBehavior {
    /// Create immediately.
    Succeed,

    /// Fail immediately.
    Fail(String),

    /// Fail after a delay.
    FailAfter(Duration, String),

    /// Create after a delay.
    Delay(Duration),

    /// Never return; only cancellation ends the call.
    Hang,

    /// Create, but the build ends in `failed`.
    BuildFails,

    /// Panic inside the call.
    Panic(String),
}

#[derive(Debug, Default)]
struct FakeState {
    instances: Vec<Instance>,
    next_id: u64,
    creates: VecDeque<CreateBehavior>,
    fail_list: Option<String>,
    fail_deletes: HashSet<InstanceId>,
    fail_scales: bool,
    build_polls: u32,
    pending_builds: HashMap<InstanceId, (u32, InstanceState)>,
    created: Vec<InstanceId>,
    scaled: Vec<(InstanceId, u32)>,
    deleted: Vec<InstanceId>,
}

/// In-memory platform.
#[derive(Debug, Default)]
pub struct FakePlatform {
    state: Mutex<FakeState>,
    calls: AtomicUsize,
    abandoned: Arc<AtomicUsize>,
}

impl FakePlatform {
    /// Create an empty platform.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the listing, in order.
    pub fn with_instances(self, instances: Vec<Instance>) -> Self {
        self.lock().instances = instances;
        self
    }

    /// Make every list call fail.
    pub fn failing_list(self, message: &str) -> Self {
        self.lock().fail_list = Some(message.to_string());
        self
    }

    /// Script successive create calls; calls beyond the script succeed.
    pub fn with_creates(self, behaviors: Vec<CreateBehavior>) -> Self {
        self.lock().creates = behaviors.into();
        self
    }

    /// Make deletion of `id` fail.
    pub fn failing_delete(self, id: &str) -> Self {
        self.lock().fail_deletes.insert(InstanceId::new(id));
        self
    }

    /// Make every scale call fail.
    pub fn failing_scale(self) -> Self {
        self.lock().fail_scales = true;
        self
    }

    /// Report new instances as `building` for this many polls.
    pub fn with_build_polls(self, polls: u32) -> Self {
        self.lock().build_polls = polls;
        self
    }

    /// Total platform calls made.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Creates that were dropped before completing.
    pub fn abandoned_creates(&self) -> usize {
        self.abandoned.load(Ordering::SeqCst)
    }

    /// Ids created, in creation order.
    pub fn created(&self) -> Vec<InstanceId> {
        self.lock().created.clone()
    }

    /// Scale calls that succeeded, in order.
    pub fn scaled(&self) -> Vec<(InstanceId, u32)> {
        self.lock().scaled.clone()
    }

    /// Ids deleted, in deletion order.
    pub fn deleted(&self) -> Vec<InstanceId> {
        self.lock().deleted.clone()
    }

    /// Current listing.
    pub fn instances(&self) -> Vec<Instance> {
        self.lock().instances.clone()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record_call(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    fn insert_created(&self, pool: &str, bundle: &TemplateBundle, build_fails: bool) -> Instance {
        let mut state = self.lock();
        state.next_id += 1;
        let id = InstanceId::new(format!("fake-{}", state.next_id));

        let final_state = if build_fails {
            InstanceState::Failed
        } else {
            InstanceState::Running
        };
        let polls = state.build_polls;
        let initial = if polls > 0 {
            state.pending_builds.insert(id.clone(), (polls, final_state));
            InstanceState::Building
        } else {
            final_state
        };

        let instance = Instance {
            id: id.clone(),
            name: format!("{pool}-{}", state.next_id),
            web_url: Some(format!("https://{pool}-{}.example.app", state.next_id)),
            template_version: bundle.version().clone(),
            state: initial,
            created_at: None,
        };
        state.instances.push(instance.clone());
        state.created.push(id);
        instance
    }
}

/// Counts a create as abandoned if dropped while armed.
struct AbandonGuard {
    counter: Arc<AtomicUsize>,
    armed: bool,
}

impl AbandonGuard {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        Self {
            counter: Arc::clone(counter),
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        if self.armed {
            self.counter.fetch_add(1, Ordering::SeqCst);
        }
    }
}

fn unavailable(message: &str) -> PlatformError {
    PlatformError::Api {
        status: 503,
        message: message.to_string(),
    }
}

#[async_trait]
impl Platform for FakePlatform {
    async fn list_instances(&self, _pool: &str) -> Result<Vec<Instance>, PlatformError> {
        self.record_call();
        let state = self.lock();
        if let Some(message) = &state.fail_list {
            return Err(unavailable(message));
        }
        Ok(state.instances.clone())
    }

    async fn get_instance(&self, id: &InstanceId) -> Result<Instance, PlatformError> {
        self.record_call();
        let mut state = self.lock();

        let next_state = match state.pending_builds.get_mut(id) {
            Some((remaining, _)) if *remaining > 1 => {
                *remaining -= 1;
                None
            }
            Some((_, final_state)) => Some(*final_state),
            None => None,
        };
        if let Some(next_state) = next_state {
            state.pending_builds.remove(id);
            if let Some(instance) = state.instances.iter_mut().find(|i| &i.id == id) {
                instance.state = next_state;
            }
        }

        state
            .instances
            .iter()
            .find(|i| &i.id == id)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(id.to_string()))
    }

    async fn create_instance(
        &self,
        pool: &str,
        bundle: &TemplateBundle,
    ) -> Result<Instance, PlatformError> {
        self.record_call();
        let behavior = self
            .lock()
            .creates
            .pop_front()
            .unwrap_or(CreateBehavior::Succeed);

        let guard = AbandonGuard::new(&self.abandoned);
        let result = match behavior {
            CreateBehavior::Succeed => Ok(self.insert_created(pool, bundle, false)),
            CreateBehavior::BuildFails => Ok(self.insert_created(pool, bundle, true)),
            CreateBehavior::Fail(message) => Err(unavailable(&message)),
            CreateBehavior::FailAfter(delay, message) => {
                tokio::time::sleep(delay).await;
                Err(unavailable(&message))
            }
            CreateBehavior::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(self.insert_created(pool, bundle, false))
            }
            CreateBehavior::Hang => {
                std::future::pending::<()>().await;
                unreachable!("pending never resolves")
            }
            CreateBehavior::Panic(message) => panic!("{message}"),
        };
        guard.disarm();
        result
    }

    async fn scale_instance(&self, id: &InstanceId, size: u32) -> Result<(), PlatformError> {
        self.record_call();
        let mut state = self.lock();
        if state.fail_scales {
            return Err(unavailable("scale rejected"));
        }

        let instance = state
            .instances
            .iter_mut()
            .find(|i| &i.id == id)
            .ok_or_else(|| PlatformError::NotFound(id.to_string()))?;
        instance.state = if size == 0 {
            InstanceState::Idle
        } else {
            InstanceState::Running
        };
        state.scaled.push((id.clone(), size));
        Ok(())
    }

    async fn delete_instance(&self, id: &InstanceId) -> Result<(), PlatformError> {
        self.record_call();
        let mut state = self.lock();
        if state.fail_deletes.contains(id) {
            return Err(unavailable(&format!("cannot delete {id}")));
        }

        state.instances.retain(|i| &i.id != id);
        state.deleted.push(id.clone());
        Ok(())
    }
}
