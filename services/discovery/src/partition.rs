//! Registry partition actor
//!
//! A partition is the single owner of all colony/agent state for one
//! `mesh_id`: a tokio task that owns the SQLite store and a read-through
//! cache, fed by an mpsc command channel. Commands execute strictly in
//! arrival order, which gives registrations for a mesh a total order and
//! read-your-writes within the partition. A cleanup tick interleaves with
//! commands on the same loop; the first tick fires at spawn so an overdue
//! sweep runs immediately after a restart.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use coral::CoralError;
use coral::net::is_private_address;
use coral::types::{
    AgentRecord, ColonyRecord, LookupAgentResponse, LookupColonyResponse, ObservedEndpoint,
    RegisterAgentRequest, RegisterColonyRequest, RegisterResponse,
};

use crate::metrics::MetricsHandle;
use crate::store::RegistryStore;

const COMMAND_BUFFER: usize = 64;

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub(crate) fn rfc3339_ms(ms: i64) -> String {
    chrono::DateTime::<chrono::Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
        .unwrap_or_default()
}

enum RegistryCommand {
    RegisterColony {
        req: Box<RegisterColonyRequest>,
        observed_ip: Option<String>,
        reply: oneshot::Sender<Result<RegisterResponse, CoralError>>,
    },
    LookupColony {
        mesh_id: String,
        reply: oneshot::Sender<Result<LookupColonyResponse, CoralError>>,
    },
    RegisterAgent {
        req: Box<RegisterAgentRequest>,
        observed_ip: Option<String>,
        reply: oneshot::Sender<Result<RegisterResponse, CoralError>>,
    },
    LookupAgent {
        agent_id: String,
        reply: oneshot::Sender<Result<LookupAgentResponse, CoralError>>,
    },
    Count {
        reply: oneshot::Sender<Result<(i64, i64), CoralError>>,
    },
}

/// Address of a live registry partition.
#[derive(Clone)]
pub struct RegistryHandle {
    id: String,
    tx: mpsc::Sender<RegistryCommand>,
}

fn partition_gone() -> CoralError {
    CoralError::Internal("partition unavailable".to_string())
}

impl RegistryHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    async fn call<T>(
        &self,
        command: RegistryCommand,
        rx: oneshot::Receiver<Result<T, CoralError>>,
    ) -> Result<T, CoralError> {
        self.tx.send(command).await.map_err(|_| partition_gone())?;
        rx.await.map_err(|_| partition_gone())?
    }

    pub async fn register_colony(
        &self,
        req: RegisterColonyRequest,
        observed_ip: Option<String>,
    ) -> Result<RegisterResponse, CoralError> {
        let (reply, rx) = oneshot::channel();
        self.call(
            RegistryCommand::RegisterColony {
                req: Box::new(req),
                observed_ip,
                reply,
            },
            rx,
        )
        .await
    }

    pub async fn lookup_colony(&self, mesh_id: &str) -> Result<LookupColonyResponse, CoralError> {
        let (reply, rx) = oneshot::channel();
        self.call(
            RegistryCommand::LookupColony {
                mesh_id: mesh_id.to_string(),
                reply,
            },
            rx,
        )
        .await
    }

    pub async fn register_agent(
        &self,
        req: RegisterAgentRequest,
        observed_ip: Option<String>,
    ) -> Result<RegisterResponse, CoralError> {
        let (reply, rx) = oneshot::channel();
        self.call(
            RegistryCommand::RegisterAgent {
                req: Box::new(req),
                observed_ip,
                reply,
            },
            rx,
        )
        .await
    }

    pub async fn lookup_agent(&self, agent_id: &str) -> Result<LookupAgentResponse, CoralError> {
        let (reply, rx) = oneshot::channel();
        self.call(
            RegistryCommand::LookupAgent {
                agent_id: agent_id.to_string(),
                reply,
            },
            rx,
        )
        .await
    }

    /// Non-expired (colonies, agents).
    pub async fn count(&self) -> Result<(i64, i64), CoralError> {
        let (reply, rx) = oneshot::channel();
        self.call(RegistryCommand::Count { reply }, rx).await
    }
}

/// Spawns the partition task and returns its address.
pub fn spawn(
    id: String,
    store: RegistryStore,
    default_ttl_seconds: u32,
    cleanup_interval_ms: u64,
    metrics: Option<MetricsHandle>,
) -> RegistryHandle {
    let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
    let handle = RegistryHandle {
        id: id.clone(),
        tx,
    };

    let partition = RegistryPartition {
        id,
        store,
        default_ttl_seconds,
        metrics,
        cache: HashMap::new(),
    };
    tokio::spawn(partition.run(rx, cleanup_interval_ms));

    handle
}

#[derive(Hash, PartialEq, Eq)]
enum CacheKey {
    Colony(String),
    Agent(String),
}

enum CachedLookup {
    Colony(LookupColonyResponse),
    Agent(LookupAgentResponse),
}

struct RegistryPartition {
    id: String,
    store: RegistryStore,
    default_ttl_seconds: u32,
    metrics: Option<MetricsHandle>,
    cache: HashMap<CacheKey, (CachedLookup, i64)>,
}

impl RegistryPartition {
    async fn run(mut self, mut rx: mpsc::Receiver<RegistryCommand>, cleanup_interval_ms: u64) {
        let mut cleanup = tokio::time::interval(Duration::from_millis(cleanup_interval_ms.max(1)));
        cleanup.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = rx.recv() => {
                    match command {
                        Some(command) => self.handle(command),
                        None => {
                            tracing::debug!(partition = %self.id, "all handles dropped, stopping");
                            return;
                        }
                    }
                }
                _ = cleanup.tick() => self.run_cleanup().await,
            }
        }
    }

    fn handle(&mut self, command: RegistryCommand) {
        match command {
            RegistryCommand::RegisterColony {
                req,
                observed_ip,
                reply,
            } => {
                let _ = reply.send(self.register_colony(*req, observed_ip));
            }
            RegistryCommand::LookupColony { mesh_id, reply } => {
                let _ = reply.send(self.lookup_colony(&mesh_id));
            }
            RegistryCommand::RegisterAgent {
                req,
                observed_ip,
                reply,
            } => {
                let _ = reply.send(self.register_agent(*req, observed_ip));
            }
            RegistryCommand::LookupAgent { agent_id, reply } => {
                let _ = reply.send(self.lookup_agent(&agent_id));
            }
            RegistryCommand::Count { reply } => {
                let _ = reply.send(
                    self.store
                        .count_live(now_ms())
                        .map_err(|e| CoralError::Internal(format!("storage error: {}", e))),
                );
            }
        }
    }

    fn register_colony(
        &mut self,
        req: RegisterColonyRequest,
        observed_ip: Option<String>,
    ) -> Result<RegisterResponse, CoralError> {
        if req.mesh_id.is_empty() {
            return Err(CoralError::InvalidArgument("meshId is required".to_string()));
        }
        if req.pubkey.is_empty() {
            return Err(CoralError::InvalidArgument("pubkey is required".to_string()));
        }
        let has_endpoint = req.endpoints.iter().any(|e| !e.is_empty());
        if !has_endpoint && req.observed_endpoint.is_none() {
            return Err(CoralError::InvalidArgument(
                "at least one endpoint or observedEndpoint is required".to_string(),
            ));
        }

        let existing = self
            .store
            .get_colony(&req.mesh_id)
            .map_err(|e| CoralError::Internal(format!("storage error: {}", e)))?;

        if let Some(existing) = &existing {
            if existing.pubkey != req.pubkey {
                return Err(CoralError::AlreadyExists(format!(
                    "mesh {} is registered with a different key",
                    req.mesh_id
                )));
            }
        }

        let now = now_ms();
        let expires_at = now + i64::from(self.default_ttl_seconds) * 1_000;
        let observed_endpoint = synthesize_observed(req.observed_endpoint, observed_ip.as_deref());

        let record = ColonyRecord {
            mesh_id: req.mesh_id.clone(),
            pubkey: req.pubkey,
            endpoints: req.endpoints,
            mesh_ipv4: req.mesh_ipv4,
            mesh_ipv6: req.mesh_ipv6,
            connect_port: req.connect_port,
            public_port: req.public_port,
            metadata: req.metadata,
            observed_endpoint: observed_endpoint.clone(),
            public_endpoint: req.public_endpoint,
            nat_hint: existing.as_ref().map(|e| e.nat_hint).unwrap_or(0),
            created_at: existing.as_ref().map(|e| e.created_at).unwrap_or(now),
            updated_at: now,
            expires_at,
        };

        self.store
            .upsert_colony(&record)
            .map_err(|e| CoralError::Internal(format!("storage error: {}", e)))?;
        self.cache.remove(&CacheKey::Colony(req.mesh_id));

        Ok(RegisterResponse {
            success: true,
            ttl: self.default_ttl_seconds,
            expires_at: rfc3339_ms(expires_at),
            observed_endpoint,
        })
    }

    fn lookup_colony(&mut self, mesh_id: &str) -> Result<LookupColonyResponse, CoralError> {
        let now = now_ms();
        if let Some((CachedLookup::Colony(response), expires_at)) =
            self.cache.get(&CacheKey::Colony(mesh_id.to_string()))
        {
            if *expires_at >= now {
                return Ok(response.clone());
            }
        }

        let record = self
            .store
            .get_colony(mesh_id)
            .map_err(|e| CoralError::Internal(format!("storage error: {}", e)))?
            .filter(|record| record.expires_at >= now)
            .ok_or_else(|| CoralError::NotFound(format!("colony not found: {}", mesh_id)))?;

        let expires_at = record.expires_at;
        let response = LookupColonyResponse {
            mesh_id: record.mesh_id,
            pubkey: record.pubkey,
            endpoints: record.endpoints,
            mesh_ipv4: record.mesh_ipv4,
            mesh_ipv6: record.mesh_ipv6,
            connect_port: record.connect_port,
            public_port: record.public_port,
            metadata: if record.metadata.is_empty() {
                None
            } else {
                Some(record.metadata)
            },
            last_seen: Some(rfc3339_ms(record.updated_at)),
            observed_endpoints: record.observed_endpoint.into_iter().collect(),
            nat: record.nat_hint,
            public_endpoint: record.public_endpoint,
        };

        self.cache.insert(
            CacheKey::Colony(mesh_id.to_string()),
            (CachedLookup::Colony(response.clone()), expires_at),
        );
        Ok(response)
    }

    fn register_agent(
        &mut self,
        req: RegisterAgentRequest,
        observed_ip: Option<String>,
    ) -> Result<RegisterResponse, CoralError> {
        if req.agent_id.is_empty() {
            return Err(CoralError::InvalidArgument("agentId is required".to_string()));
        }
        if req.mesh_id.is_empty() {
            return Err(CoralError::InvalidArgument("meshId is required".to_string()));
        }
        if req.pubkey.is_empty() {
            return Err(CoralError::InvalidArgument("pubkey is required".to_string()));
        }
        let has_endpoint = req.endpoints.iter().any(|e| !e.is_empty());
        if !has_endpoint && req.observed_endpoint.is_none() {
            return Err(CoralError::InvalidArgument(
                "at least one endpoint or observedEndpoint is required".to_string(),
            ));
        }

        let existing = self
            .store
            .get_agent(&req.agent_id)
            .map_err(|e| CoralError::Internal(format!("storage error: {}", e)))?;

        let now = now_ms();
        let expires_at = now + i64::from(self.default_ttl_seconds) * 1_000;
        let observed_endpoint = synthesize_observed(req.observed_endpoint, observed_ip.as_deref());

        let record = AgentRecord {
            agent_id: req.agent_id.clone(),
            mesh_id: req.mesh_id,
            pubkey: req.pubkey,
            endpoints: req.endpoints,
            metadata: req.metadata,
            observed_endpoint: observed_endpoint.clone(),
            created_at: existing.as_ref().map(|e| e.created_at).unwrap_or(now),
            updated_at: now,
            expires_at,
        };

        self.store
            .upsert_agent(&record)
            .map_err(|e| CoralError::Internal(format!("storage error: {}", e)))?;
        self.cache.remove(&CacheKey::Agent(req.agent_id));

        Ok(RegisterResponse {
            success: true,
            ttl: self.default_ttl_seconds,
            expires_at: rfc3339_ms(expires_at),
            observed_endpoint,
        })
    }

    fn lookup_agent(&mut self, agent_id: &str) -> Result<LookupAgentResponse, CoralError> {
        let now = now_ms();
        if let Some((CachedLookup::Agent(response), expires_at)) =
            self.cache.get(&CacheKey::Agent(agent_id.to_string()))
        {
            if *expires_at >= now {
                return Ok(response.clone());
            }
        }

        let record = self
            .store
            .get_agent(agent_id)
            .map_err(|e| CoralError::Internal(format!("storage error: {}", e)))?
            .filter(|record| record.expires_at >= now)
            .ok_or_else(|| CoralError::NotFound(format!("agent not found: {}", agent_id)))?;

        let expires_at = record.expires_at;
        let response = LookupAgentResponse {
            agent_id: record.agent_id,
            mesh_id: record.mesh_id,
            pubkey: record.pubkey,
            endpoints: record.endpoints,
            observed_endpoints: record.observed_endpoint.into_iter().collect(),
            metadata: if record.metadata.is_empty() {
                None
            } else {
                Some(record.metadata)
            },
            last_seen: Some(rfc3339_ms(record.updated_at)),
        };

        self.cache.insert(
            CacheKey::Agent(agent_id.to_string()),
            (CachedLookup::Agent(response.clone()), expires_at),
        );
        Ok(response)
    }

    async fn run_cleanup(&mut self) {
        let now = now_ms();
        let colonies = match self.store.delete_expired_colonies(now) {
            Ok(count) => count,
            Err(e) => {
                tracing::error!(partition = %self.id, "cleanup failed deleting colonies: {}", e);
                return;
            }
        };
        let agents = match self.store.delete_expired_agents(now) {
            Ok(count) => count,
            Err(e) => {
                tracing::error!(partition = %self.id, "cleanup failed deleting agents: {}", e);
                return;
            }
        };

        if colonies > 0 || agents > 0 {
            tracing::info!(
                partition = %self.id,
                expired_colonies = colonies,
                expired_agents = agents,
                "cleanup removed expired records"
            );
            self.cache.clear();

            // Best effort: a metrics failure never fails the cleanup.
            if let Some(metrics) = &self.metrics {
                metrics
                    .report(&self.id, colonies as i64, agents as i64)
                    .await;
            }
        }
    }
}

/// Replaces the client-declared observed IP with the transport-observed one
/// when the claim is absent or private. The port is kept as declared (0 when
/// unknown) because the transport only sees the HTTP source port.
fn synthesize_observed(
    declared: Option<ObservedEndpoint>,
    observed_ip: Option<&str>,
) -> Option<ObservedEndpoint> {
    let Some(ip) = observed_ip else {
        return declared;
    };

    match declared {
        None => Some(ObservedEndpoint {
            ip: ip.to_string(),
            port: 0,
            protocol: "udp".to_string(),
        }),
        Some(declared) if is_private_address(&declared.ip) => Some(ObservedEndpoint {
            ip: ip.to_string(),
            port: declared.port,
            protocol: "udp".to_string(),
        }),
        Some(declared) => Some(declared),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn spawn_test_partition(ttl_secs: u32, cleanup_interval_ms: u64) -> RegistryHandle {
        spawn(
            "test-partition".to_string(),
            RegistryStore::open_in_memory().unwrap(),
            ttl_secs,
            cleanup_interval_ms,
            None,
        )
    }

    fn colony_request(mesh_id: &str, pubkey: &str) -> RegisterColonyRequest {
        RegisterColonyRequest {
            mesh_id: mesh_id.to_string(),
            pubkey: pubkey.to_string(),
            endpoints: vec!["1.2.3.4:51820".to_string()],
            mesh_ipv4: Some("10.42.0.1".to_string()),
            connect_port: Some(9000),
            metadata: HashMap::from([("region".to_string(), "eu".to_string())]),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_register_then_lookup_echoes_fields() {
        let partition = spawn_test_partition(300, 60_000);

        let response = partition
            .register_colony(colony_request("m1", "dGVzdA=="), Some("1.2.3.4".to_string()))
            .await
            .unwrap();
        assert!(response.success);
        assert_eq!(response.ttl, 300);
        let observed = response.observed_endpoint.unwrap();
        assert_eq!(observed.ip, "1.2.3.4");
        assert_eq!(observed.port, 0);
        assert_eq!(observed.protocol, "udp");

        let lookup = partition.lookup_colony("m1").await.unwrap();
        assert_eq!(lookup.mesh_id, "m1");
        assert_eq!(lookup.pubkey, "dGVzdA==");
        assert_eq!(lookup.endpoints, vec!["1.2.3.4:51820".to_string()]);
        assert_eq!(lookup.mesh_ipv4.as_deref(), Some("10.42.0.1"));
        assert_eq!(lookup.connect_port, Some(9000));
        assert_eq!(lookup.metadata.unwrap()["region"], "eu");
        assert_eq!(lookup.observed_endpoints.len(), 1);
        assert_eq!(lookup.nat, 0);
        assert!(lookup.last_seen.is_some());
    }

    #[tokio::test]
    async fn test_validation_failures() {
        let partition = spawn_test_partition(300, 60_000);

        let err = partition
            .register_colony(
                RegisterColonyRequest {
                    pubkey: "cGs=".to_string(),
                    endpoints: vec!["1.2.3.4:1".to_string()],
                    ..Default::default()
                },
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoralError::InvalidArgument(_)));

        let err = partition
            .register_colony(
                RegisterColonyRequest {
                    mesh_id: "m1".to_string(),
                    pubkey: "cGs=".to_string(),
                    ..Default::default()
                },
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoralError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_split_brain_rejected() {
        let partition = spawn_test_partition(300, 60_000);

        partition
            .register_colony(colony_request("m2", "A=="), None)
            .await
            .unwrap();
        let err = partition
            .register_colony(colony_request("m2", "B=="), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoralError::AlreadyExists(_)));

        // same key keeps working
        partition
            .register_colony(colony_request("m2", "A=="), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_reregistration_preserves_created_at() {
        let partition = spawn_test_partition(300, 60_000);

        partition
            .register_colony(colony_request("m3", "A=="), None)
            .await
            .unwrap();
        let first = partition.lookup_colony("m3").await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        partition
            .register_colony(colony_request("m3", "A=="), None)
            .await
            .unwrap();
        let second = partition.lookup_colony("m3").await.unwrap();

        // created_at is not surfaced, but last_seen advances while the record
        // stays the same row; counts stay at one colony
        assert!(second.last_seen.unwrap() > first.last_seen.unwrap());
        assert_eq!(partition.count().await.unwrap(), (1, 0));
    }

    #[tokio::test]
    async fn test_private_observed_claim_is_overridden() {
        let partition = spawn_test_partition(300, 60_000);

        let mut request = colony_request("m4", "A==");
        request.observed_endpoint = Some(ObservedEndpoint {
            ip: "192.168.1.5".to_string(),
            port: 4500,
            protocol: "udp".to_string(),
        });
        let response = partition
            .register_colony(request, Some("203.0.113.9".to_string()))
            .await
            .unwrap();

        let observed = response.observed_endpoint.unwrap();
        assert_eq!(observed.ip, "203.0.113.9");
        assert_eq!(observed.port, 4500);
    }

    #[tokio::test]
    async fn test_public_observed_claim_is_kept() {
        let partition = spawn_test_partition(300, 60_000);

        let mut request = colony_request("m5", "A==");
        request.observed_endpoint = Some(ObservedEndpoint {
            ip: "198.51.100.7".to_string(),
            port: 4500,
            protocol: "udp".to_string(),
        });
        let response = partition
            .register_colony(request, Some("203.0.113.9".to_string()))
            .await
            .unwrap();

        assert_eq!(response.observed_endpoint.unwrap().ip, "198.51.100.7");
    }

    #[tokio::test]
    async fn test_lookup_missing_is_not_found() {
        let partition = spawn_test_partition(300, 60_000);
        let err = partition.lookup_colony("does-not-exist").await.unwrap_err();
        assert!(matches!(err, CoralError::NotFound(_)));
        let err = partition.lookup_agent("nope").await.unwrap_err();
        assert!(matches!(err, CoralError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_agent_register_and_lookup() {
        let partition = spawn_test_partition(300, 60_000);

        let response = partition
            .register_agent(
                RegisterAgentRequest {
                    agent_id: "a1".to_string(),
                    mesh_id: "m1".to_string(),
                    pubkey: "cGs=".to_string(),
                    endpoints: vec!["10.0.0.2:7000".to_string()],
                    ..Default::default()
                },
                Some("203.0.113.4".to_string()),
            )
            .await
            .unwrap();
        assert!(response.success);

        let lookup = partition.lookup_agent("a1").await.unwrap();
        assert_eq!(lookup.mesh_id, "m1");
        assert_eq!(lookup.observed_endpoints[0].ip, "203.0.113.4");

        // agents have no split-brain check: a new key overwrites
        partition
            .register_agent(
                RegisterAgentRequest {
                    agent_id: "a1".to_string(),
                    mesh_id: "m1".to_string(),
                    pubkey: "b3RoZXI=".to_string(),
                    endpoints: vec!["10.0.0.2:7000".to_string()],
                    ..Default::default()
                },
                None,
            )
            .await
            .unwrap();
        let lookup = partition.lookup_agent("a1").await.unwrap();
        assert_eq!(lookup.pubkey, "b3RoZXI=");
    }

    #[tokio::test]
    async fn test_expired_record_not_returned_and_swept() {
        let partition = spawn_test_partition(0, 40);

        partition
            .register_colony(colony_request("m6", "A=="), None)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let err = partition.lookup_colony("m6").await.unwrap_err();
        assert!(matches!(err, CoralError::NotFound(_)));

        // wait for a cleanup tick to physically delete the row
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(partition.count().await.unwrap(), (0, 0));
    }

    #[test]
    fn test_synthesize_matrix() {
        // no transport IP: claim passes through untouched
        assert_eq!(synthesize_observed(None, None), None);
        let claim = ObservedEndpoint {
            ip: "192.168.1.1".to_string(),
            port: 9,
            protocol: "udp".to_string(),
        };
        assert_eq!(
            synthesize_observed(Some(claim.clone()), None),
            Some(claim.clone())
        );

        // transport IP, no claim: synthesized with port 0
        let synthesized = synthesize_observed(None, Some("1.2.3.4")).unwrap();
        assert_eq!(synthesized.ip, "1.2.3.4");
        assert_eq!(synthesized.port, 0);
        assert_eq!(synthesized.protocol, "udp");

        // private claim: IP replaced, port kept
        let replaced = synthesize_observed(Some(claim), Some("1.2.3.4")).unwrap();
        assert_eq!(replaced.ip, "1.2.3.4");
        assert_eq!(replaced.port, 9);
    }
}
