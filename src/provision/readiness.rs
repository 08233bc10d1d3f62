//! Bounded readiness waits for freshly provisioned instances.
//!
//! An instance is ready once the provider reports it running with a public
//! address, its SSH port accepts TCP connections, and an authenticated
//! command succeeds. All three phases share one deadline, and each attempt
//! is cut off when the deadline passes.

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tracing::debug;

use super::provider::{CloudProvider, InstanceState, ResourceHandle};
use crate::exec::{RemoteExecutor, RemoteHost, Target};

const TCP_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Budgets for the readiness wait.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReadinessPolicy {
    /// Total time allowed across all phases.
    pub timeout: Duration,
    /// Delay between attempts.
    pub poll_interval: Duration,
    /// Command that must succeed over SSH.
    pub probe_command: String,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            poll_interval: Duration::from_secs(5),
            probe_command: String::from("true"),
        }
    }
}

/// Where and as whom the authenticated probe connects.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SshLogin {
    /// Login user.
    pub user: String,
    /// SSH port.
    pub port: u16,
    /// Secret holding the private key.
    pub key_secret: Option<String>,
}

/// Typed failure of a readiness wait.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ReadinessError {
    /// The provider never reported the instance running.
    #[error("instance {instance_id} did not reach the running state within {seconds}s")]
    NotRunning {
        /// Provider instance identifier.
        instance_id: String,
        /// Budget that expired.
        seconds: u64,
    },
    /// The instance runs but never exposed a public address.
    #[error("instance {instance_id} has no public IPv4 address")]
    MissingPublicIp {
        /// Provider instance identifier.
        instance_id: String,
    },
    /// The SSH port never accepted connections.
    #[error("{address}:{port} did not accept TCP connections within {seconds}s")]
    Unreachable {
        /// Public address probed.
        address: IpAddr,
        /// Port probed.
        port: u16,
        /// Budget that expired.
        seconds: u64,
    },
    /// Authenticated commands kept failing.
    #[error("remote command on {address} kept failing: {message}")]
    CommandProbe {
        /// Public address probed.
        address: IpAddr,
        /// Last failure observed.
        message: String,
    },
    /// The provider could not be queried.
    #[error("instance status unavailable: {0}")]
    Provider(String),
}

/// Future returned by reachability checks.
pub type ReachFuture<'a> = Pin<Box<dyn Future<Output = bool> + Send + 'a>>;

/// Checks whether a TCP endpoint accepts connections.
pub trait ReachabilityProbe: Send + Sync {
    /// Returns `true` when `address` accepts a connection.
    fn reachable(&self, address: SocketAddr) -> ReachFuture<'_>;
}

/// Reachability probe that opens a real TCP connection.
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpProbe;

impl ReachabilityProbe for TcpProbe {
    fn reachable(&self, address: SocketAddr) -> ReachFuture<'_> {
        Box::pin(async move {
            matches!(
                timeout(TCP_CONNECT_TIMEOUT, TcpStream::connect(address)).await,
                Ok(Ok(_))
            )
        })
    }
}

/// Collaborators a readiness wait needs.
pub struct ReadinessCheck<'a> {
    /// Provider reporting instance state.
    pub provider: &'a dyn CloudProvider,
    /// TCP reachability probe.
    pub reachability: &'a dyn ReachabilityProbe,
    /// Executor for the authenticated probe.
    pub executor: &'a dyn RemoteExecutor,
    /// Budgets.
    pub policy: &'a ReadinessPolicy,
}

impl ReadinessCheck<'_> {
    /// Waits until `instance` is running, reachable, and accepts an
    /// authenticated command, returning its public address.
    ///
    /// # Errors
    ///
    /// Returns [`ReadinessError`] naming the phase that did not complete
    /// before the deadline.
    pub async fn wait(
        &self,
        instance: &ResourceHandle,
        login: &SshLogin,
    ) -> Result<IpAddr, ReadinessError> {
        let deadline = Instant::now() + self.policy.timeout;
        let address = self.wait_for_running(instance, deadline).await?;
        self.wait_for_port(address, login.port, deadline).await?;
        self.wait_for_command(address, login, deadline).await?;
        Ok(address)
    }

    async fn wait_for_running(
        &self,
        instance: &ResourceHandle,
        deadline: Instant,
    ) -> Result<IpAddr, ReadinessError> {
        let mut saw_running = false;
        while Instant::now() <= deadline {
            let Ok(queried) = timeout(
                remaining(deadline),
                self.provider.instance_status(instance),
            )
            .await
            else {
                debug!(instance = %instance.id, "instance status query outlived the deadline");
                break;
            };
            let status = queried.map_err(|err| ReadinessError::Provider(err.to_string()))?;
            if status.state == InstanceState::Running {
                saw_running = true;
                if let Some(address) = status.public_ip {
                    return Ok(address);
                }
            }
            debug!(instance = %instance.id, state = ?status.state, "waiting for instance");
            self.pause(deadline).await;
        }

        if saw_running {
            return Err(ReadinessError::MissingPublicIp {
                instance_id: instance.id.clone(),
            });
        }
        Err(ReadinessError::NotRunning {
            instance_id: instance.id.clone(),
            seconds: self.policy.timeout.as_secs(),
        })
    }

    async fn wait_for_port(
        &self,
        address: IpAddr,
        port: u16,
        deadline: Instant,
    ) -> Result<(), ReadinessError> {
        let endpoint = SocketAddr::new(address, port);
        while Instant::now() <= deadline {
            match timeout(remaining(deadline), self.reachability.reachable(endpoint)).await {
                Ok(true) => return Ok(()),
                Ok(false) => self.pause(deadline).await,
                Err(_) => break,
            }
        }
        Err(ReadinessError::Unreachable {
            address,
            port,
            seconds: self.policy.timeout.as_secs(),
        })
    }

    async fn wait_for_command(
        &self,
        address: IpAddr,
        login: &SshLogin,
        deadline: Instant,
    ) -> Result<(), ReadinessError> {
        let target = Target::Remote(RemoteHost {
            host: address.to_string(),
            port: login.port,
            user: login.user.clone(),
            key_secret: login.key_secret.clone(),
        });
        let mut last_failure = String::from("no attempt completed");
        while Instant::now() <= deadline {
            let attempt = self.executor.execute(&target, &self.policy.probe_command);
            match timeout(remaining(deadline), attempt).await {
                Ok(Ok(output)) if output.is_success() => return Ok(()),
                Ok(Ok(output)) => {
                    last_failure = format!(
                        "exit status {}: {}",
                        output.status_text(),
                        output.stderr.trim()
                    );
                }
                Ok(Err(err)) => last_failure = err.to_string(),
                Err(_) => {
                    last_failure = format!(
                        "`{}` did not finish within {}s",
                        self.policy.probe_command,
                        self.policy.timeout.as_secs()
                    );
                    break;
                }
            }
            self.pause(deadline).await;
        }
        Err(ReadinessError::CommandProbe {
            address,
            message: last_failure,
        })
    }

    /// Sleeps for the poll interval, never past `deadline`.
    async fn pause(&self, deadline: Instant) {
        sleep(self.policy.poll_interval.min(remaining(deadline))).await;
    }
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}
