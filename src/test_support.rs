//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use crate::exec::{CommandOutput, CommandRunner, ExecError, ExecFuture, RemoteExecutor, Target};
use crate::fix::{CheckError, CheckFuture, FixContext, Probe, Remedy};
use crate::provision::{
    CloudProvider, InstanceState, InstanceStatus, ProviderError, ProviderFuture, ReachFuture,
    ReachabilityProbe, ResourceHandle, ResourceRole, ResourceSpec,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

#[derive(Debug, Default)]
struct RunnerState {
    responses: VecDeque<CommandOutput>,
    invocations: Vec<CommandInvocation>,
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    state: Arc<Mutex<RunnerState>>,
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        lock(&self.state).invocations.clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        lock(&self.state).responses.push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run<'a>(&'a self, program: &'a str, args: &'a [OsString]) -> ExecFuture<'a, CommandOutput> {
        let response = {
            let mut state = lock(&self.state);
            state.invocations.push(CommandInvocation {
                program: program.to_owned(),
                args: args.to_vec(),
            });
            state.responses.pop_front()
        };
        Box::pin(async move {
            response.ok_or_else(|| ExecError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
        })
    }
}

type Response = Result<CommandOutput, ExecError>;

#[derive(Debug)]
struct ExecutorState {
    responses: BTreeMap<String, Response>,
    effects: BTreeMap<String, Vec<(String, Response)>>,
    calls: Vec<(Target, String)>,
    fallback: Response,
}

/// Executor double answering commands from a table keyed by command text.
///
/// Unknown commands exit 127 as if the tool were missing. `on_run` installs
/// side effects so a remedy can flip the answer of a later check.
#[derive(Clone, Debug)]
pub struct ScriptedExecutor {
    state: Arc<Mutex<ExecutorState>>,
}

impl Default for ScriptedExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedExecutor {
    /// Creates an executor where every command is "not found".
    #[must_use]
    pub fn new() -> Self {
        let mut missing = CommandOutput::with_code(127);
        missing.stderr = String::from("command not found");
        Self {
            state: Arc::new(Mutex::new(ExecutorState {
                responses: BTreeMap::new(),
                effects: BTreeMap::new(),
                calls: Vec::new(),
                fallback: Ok(missing),
            })),
        }
    }

    /// Answers `command` with `code` and empty output.
    pub fn set_status(&self, command: &str, code: i32) {
        lock(&self.state)
            .responses
            .insert(command.to_owned(), Ok(CommandOutput::with_code(code)));
    }

    /// Answers `command` successfully with `stdout`.
    pub fn set_stdout(&self, command: &str, stdout: &str) {
        let mut output = CommandOutput::with_code(0);
        output.stdout = stdout.to_owned();
        lock(&self.state)
            .responses
            .insert(command.to_owned(), Ok(output));
    }

    /// Answers `command` with an execution error.
    pub fn set_error(&self, command: &str, error: ExecError) {
        lock(&self.state)
            .responses
            .insert(command.to_owned(), Err(error));
    }

    /// Answers every unlisted command with `code`.
    pub fn set_fallback_status(&self, code: i32) {
        lock(&self.state).fallback = Ok(CommandOutput::with_code(code));
    }

    /// After `command` runs, answers `then` with exit code `code`.
    pub fn on_run(&self, command: &str, then: &str, code: i32) {
        lock(&self.state)
            .effects
            .entry(command.to_owned())
            .or_default()
            .push((then.to_owned(), Ok(CommandOutput::with_code(code))));
    }

    /// Commands executed so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        lock(&self.state)
            .calls
            .iter()
            .map(|(_, command)| command.clone())
            .collect()
    }

    /// Targets and commands executed so far, in order.
    #[must_use]
    pub fn calls_with_targets(&self) -> Vec<(Target, String)> {
        lock(&self.state).calls.clone()
    }

    /// Number of times `command` ran.
    #[must_use]
    pub fn call_count(&self, command: &str) -> usize {
        lock(&self.state)
            .calls
            .iter()
            .filter(|(_, candidate)| candidate == command)
            .count()
    }
}

impl RemoteExecutor for ScriptedExecutor {
    fn execute<'a>(
        &'a self,
        target: &'a Target,
        command: &'a str,
    ) -> ExecFuture<'a, CommandOutput> {
        let response = {
            let mut state = lock(&self.state);
            state.calls.push((target.clone(), command.to_owned()));
            let response = state
                .responses
                .get(command)
                .cloned()
                .unwrap_or_else(|| state.fallback.clone());
            if let Some(effects) = state.effects.get(command).cloned() {
                for (then, answer) in effects {
                    state.responses.insert(then, answer);
                }
            }
            response
        };
        Box::pin(async move { response })
    }
}

#[derive(Debug)]
struct CloudResource {
    role: ResourceRole,
    id: String,
    tags: Vec<String>,
    address: Option<String>,
}

#[derive(Debug)]
struct CloudState {
    resources: Vec<CloudResource>,
    next_id: usize,
    fail_create: BTreeSet<ResourceRole>,
    fail_delete: BTreeSet<ResourceRole>,
    create_counts: BTreeMap<ResourceRole, usize>,
    deleted: Vec<String>,
    instance_state: InstanceState,
    instance_ip: Option<IpAddr>,
}

/// In-memory cloud with tag search and failure injection.
#[derive(Clone, Debug)]
pub struct MemoryCloud {
    state: Arc<Mutex<CloudState>>,
}

impl Default for MemoryCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCloud {
    /// Address reported for running instances by default.
    pub const INSTANCE_IP: IpAddr = IpAddr::V4(Ipv4Addr::new(198, 51, 100, 7));
    /// Address assigned to elastic IPs.
    pub const ELASTIC_IP: IpAddr = IpAddr::V4(Ipv4Addr::new(198, 51, 100, 20));

    /// Creates an empty cloud whose instances boot immediately.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(CloudState {
                resources: Vec::new(),
                next_id: 1,
                fail_create: BTreeSet::new(),
                fail_delete: BTreeSet::new(),
                create_counts: BTreeMap::new(),
                deleted: Vec::new(),
                instance_state: InstanceState::Running,
                instance_ip: Some(Self::INSTANCE_IP),
            })),
        }
    }

    /// Makes creation of `role` fail.
    pub fn fail_create_on(&self, role: ResourceRole) {
        lock(&self.state).fail_create.insert(role);
    }

    /// Makes deletion of `role` fail.
    pub fn fail_delete_on(&self, role: ResourceRole) {
        lock(&self.state).fail_delete.insert(role);
    }

    /// Clears injected failures.
    pub fn clear_failures(&self) {
        let mut state = lock(&self.state);
        state.fail_create.clear();
        state.fail_delete.clear();
    }

    /// Sets the state reported for instances.
    pub fn set_instance_state(&self, instance_state: InstanceState) {
        lock(&self.state).instance_state = instance_state;
    }

    /// Sets the address reported for instances.
    pub fn set_instance_ip(&self, address: Option<IpAddr>) {
        lock(&self.state).instance_ip = address;
    }

    /// Number of times `role` was created.
    #[must_use]
    pub fn create_count(&self, role: ResourceRole) -> usize {
        lock(&self.state)
            .create_counts
            .get(&role)
            .copied()
            .unwrap_or(0)
    }

    /// Total creations across all roles.
    #[must_use]
    pub fn total_creates(&self) -> usize {
        lock(&self.state).create_counts.values().sum()
    }

    /// Identifiers deleted so far, in order.
    #[must_use]
    pub fn deleted_ids(&self) -> Vec<String> {
        lock(&self.state).deleted.clone()
    }

    /// Roles of resources currently present.
    #[must_use]
    pub fn roles_present(&self) -> Vec<ResourceRole> {
        lock(&self.state)
            .resources
            .iter()
            .map(|resource| resource.role)
            .collect()
    }

    /// Adds a resource as if created by an earlier run.
    pub fn seed(&self, role: ResourceRole, tags: &[String]) {
        let mut state = lock(&self.state);
        let id = format!("{}-seeded-{}", role.as_str(), state.next_id);
        state.next_id += 1;
        state.resources.push(CloudResource {
            role,
            id,
            tags: tags.to_vec(),
            address: None,
        });
    }
}

impl CloudProvider for MemoryCloud {
    fn find<'a>(&'a self, spec: &'a ResourceSpec) -> ProviderFuture<'a, Option<ResourceHandle>> {
        let found = lock(&self.state)
            .resources
            .iter()
            .find(|resource| resource.role == spec.role && spec.tags.matches(&resource.tags))
            .map(|resource| {
                let handle = ResourceHandle::discovered(resource.role, "memory", &resource.id);
                match &resource.address {
                    Some(address) => handle.with_address(address.clone()),
                    None => handle,
                }
            });
        Box::pin(async move { Ok(found) })
    }

    fn create<'a>(&'a self, spec: &'a ResourceSpec) -> ProviderFuture<'a, ResourceHandle> {
        let result = {
            let mut state = lock(&self.state);
            if state.fail_create.contains(&spec.role) {
                Err(ProviderError::Provider {
                    message: format!("injected failure creating {}", spec.role),
                })
            } else {
                let id = format!("{}-{}", spec.role.as_str(), state.next_id);
                state.next_id += 1;
                *state.create_counts.entry(spec.role).or_insert(0) += 1;
                let address =
                    (spec.role == ResourceRole::ElasticIp).then(|| Self::ELASTIC_IP.to_string());
                state.resources.push(CloudResource {
                    role: spec.role,
                    id: id.clone(),
                    tags: spec.tags.as_slice().to_vec(),
                    address: address.clone(),
                });
                let handle = ResourceHandle::created(spec.role, "memory", id);
                Ok(match address {
                    Some(value) => handle.with_address(value),
                    None => handle,
                })
            }
        };
        Box::pin(async move { result })
    }

    fn delete<'a>(&'a self, handle: &'a ResourceHandle) -> ProviderFuture<'a, ()> {
        let result = {
            let mut state = lock(&self.state);
            if state.fail_delete.contains(&handle.role) {
                Err(ProviderError::Provider {
                    message: format!("injected failure deleting {}", handle.role),
                })
            } else {
                state.resources.retain(|resource| resource.id != handle.id);
                state.deleted.push(handle.id.clone());
                Ok(())
            }
        };
        Box::pin(async move { result })
    }

    fn instance_status<'a>(
        &'a self,
        _handle: &'a ResourceHandle,
    ) -> ProviderFuture<'a, InstanceStatus> {
        let status = {
            let state = lock(&self.state);
            InstanceStatus {
                state: state.instance_state.clone(),
                public_ip: state.instance_ip,
            }
        };
        Box::pin(async move { Ok(status) })
    }
}

/// Reachability probe with a fixed answer.
#[derive(Clone, Copy, Debug)]
pub struct FixedReachability(pub bool);

impl ReachabilityProbe for FixedReachability {
    fn reachable(&self, _address: SocketAddr) -> ReachFuture<'_> {
        let answer = self.0;
        Box::pin(async move { answer })
    }
}

/// Probe returning a fixed verdict after an optional delay, counting calls.
#[derive(Clone, Debug, Default)]
pub struct StaticProbe {
    problem: bool,
    delay: Duration,
    calls: Arc<AtomicUsize>,
}

impl StaticProbe {
    /// Creates a probe reporting `problem`.
    #[must_use]
    pub fn new(problem: bool) -> Self {
        Self {
            problem,
            delay: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Delays the verdict, to exercise out-of-order completion.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Shared call counter.
    #[must_use]
    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl Probe for StaticProbe {
    fn scan<'a>(&'a self, _context: &'a FixContext<'_>) -> CheckFuture<'a> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(self.problem)
        })
    }
}

/// Probe that always errors.
#[derive(Clone, Debug, Default)]
pub struct ErrorProbe;

impl Probe for ErrorProbe {
    fn scan<'a>(&'a self, _context: &'a FixContext<'_>) -> CheckFuture<'a> {
        Box::pin(async move { Err(CheckError::Unavailable(String::from("probe exploded"))) })
    }
}

/// Remedy returning a fixed result, counting calls.
#[derive(Clone, Debug, Default)]
pub struct StaticRemedy {
    success: bool,
    calls: Arc<AtomicUsize>,
}

impl StaticRemedy {
    /// Creates a remedy reporting `success`.
    #[must_use]
    pub fn new(success: bool) -> Self {
        Self {
            success,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared call counter.
    #[must_use]
    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl Remedy for StaticRemedy {
    fn apply<'a>(&'a self, _context: &'a FixContext<'_>) -> CheckFuture<'a> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.success)
        })
    }
}

/// Remedy that always errors.
#[derive(Clone, Debug, Default)]
pub struct ErrorRemedy;

impl Remedy for ErrorRemedy {
    fn apply<'a>(&'a self, _context: &'a FixContext<'_>) -> CheckFuture<'a> {
        Box::pin(async move { Err(CheckError::Unavailable(String::from("remedy exploded"))) })
    }
}

/// Shared healthy/unhealthy flag for convergence tests.
#[derive(Clone, Debug, Default)]
pub struct HealthFlag {
    healthy: Arc<AtomicBool>,
    repairs: Arc<AtomicUsize>,
}

impl HealthFlag {
    /// Creates an unhealthy flag.
    #[must_use]
    pub fn unhealthy() -> Self {
        Self::default()
    }

    /// Whether the flag reads healthy.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    /// Number of repairs applied.
    #[must_use]
    pub fn repairs(&self) -> usize {
        self.repairs.load(Ordering::SeqCst)
    }
}

impl Probe for HealthFlag {
    fn scan<'a>(&'a self, _context: &'a FixContext<'_>) -> CheckFuture<'a> {
        Box::pin(async move { Ok(!self.is_healthy()) })
    }
}

impl Remedy for HealthFlag {
    fn apply<'a>(&'a self, _context: &'a FixContext<'_>) -> CheckFuture<'a> {
        Box::pin(async move {
            self.repairs.fetch_add(1, Ordering::SeqCst);
            self.healthy.store(true, Ordering::SeqCst);
            Ok(true)
        })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: AsyncMutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
