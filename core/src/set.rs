//! Connection Set
//!
//! Owns the primary endpoint and the replica endpoints and picks the one that
//! serves each call. Membership is fixed at construction: a replica that goes
//! away later is only noticed when a call routed to it fails.

use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::ClusterConfig;
use crate::context::Context;
use crate::error::{DbError, FleetError, FleetOp, Node, NodeFailure};
use crate::pool::DbPool;

pub struct ConnectionSet<P> {
    primary: P,
    replicas: Vec<P>,
    rng: Mutex<StdRng>,
}

impl<P: DbPool> ConnectionSet<P> {
    /// Wraps already-open endpoints. The replica RNG is seeded from OS entropy.
    pub fn new(primary: P, replicas: impl IntoIterator<Item = P>) -> Self {
        Self::with_rng(primary, replicas, StdRng::from_entropy())
    }

    /// Like [`new`](Self::new) with a fixed seed, for reproducible replica picks.
    pub fn with_seed(primary: P, replicas: impl IntoIterator<Item = P>, seed: u64) -> Self {
        Self::with_rng(primary, replicas, StdRng::seed_from_u64(seed))
    }

    fn with_rng(primary: P, replicas: impl IntoIterator<Item = P>, rng: StdRng) -> Self {
        Self {
            primary,
            replicas: replicas.into_iter().collect(),
            rng: Mutex::new(rng),
        }
    }

    /// Opens the primary and every replica that can be opened and pinged.
    ///
    /// Failing to open the primary fails the whole set. The primary is not pinged:
    /// an unreachable primary is kept and fails at first use. Replicas that fail to
    /// open or answer a ping are left out. Every replica ping runs under `ctx`, so a
    /// deadline on `ctx` bounds the whole startup.
    pub async fn open<S: AsRef<str>>(
        ctx: &Context,
        primary_url: &str,
        replica_urls: &[S],
    ) -> Result<Self, DbError> {
        Self::open_with(primary_url, replica_urls, || ctx.clone()).await
    }

    /// Opens the cluster described by `config` and applies its pool settings.
    ///
    /// `connect_timeout_secs` bounds each replica ping on its own, so one
    /// unresponsive replica cannot starve the ones after it.
    pub async fn connect(config: &ClusterConfig) -> Result<Self, DbError> {
        let timeout = config.connect_timeout();
        let ping_ctx = || match timeout {
            Some(timeout) => Context::background().with_timeout(timeout),
            None => Context::background(),
        };
        let set = Self::open_with(&config.primary_url(), &config.replica_urls(), ping_ctx).await?;

        if let Some(n) = config.pool.max_open_conns {
            set.set_max_open_conns(n);
        }
        if let Some(n) = config.pool.max_idle_conns {
            set.set_max_idle_conns(n);
        }
        if config.pool.conn_max_lifetime_secs.is_some() {
            set.set_conn_max_lifetime(config.pool.conn_max_lifetime());
        }
        Ok(set)
    }

    /// `ping_ctx` is called once per replica to build the context its ping runs under.
    pub(crate) async fn open_with<S: AsRef<str>>(
        primary_url: &str,
        replica_urls: &[S],
        ping_ctx: impl Fn() -> Context,
    ) -> Result<Self, DbError> {
        let primary = P::open(primary_url).await?;

        let mut replicas = Vec::with_capacity(replica_urls.len());
        for (index, url) in replica_urls.iter().enumerate() {
            let replica = match P::open(url.as_ref()).await {
                Ok(replica) => replica,
                Err(error) => {
                    tracing::warn!(sqlsplit.replica = index, %error, "Skipping replica: open failed");
                    continue;
                }
            };
            if let Err(error) = ping_ctx().run(replica.ping()).await {
                tracing::warn!(sqlsplit.replica = index, %error, "Skipping replica: ping failed");
                continue;
            }
            replicas.push(replica);
        }

        tracing::debug!(
            sqlsplit.replicas = replicas.len(),
            sqlsplit.candidates = replica_urls.len(),
            "Connection set opened"
        );
        Ok(Self::new(primary, replicas))
    }

    pub fn primary(&self) -> &P {
        &self.primary
    }

    pub fn replicas(&self) -> &[P] {
        &self.replicas
    }

    /// A uniformly random replica, or the primary when there are none.
    pub fn select_replica(&self) -> &P {
        self.pick_replica().1
    }

    pub(crate) fn pick_replica(&self) -> (Node, &P) {
        if self.replicas.is_empty() {
            return (Node::Primary, &self.primary);
        }
        let index = self.rng.lock().gen_range(0..self.replicas.len());
        (Node::Replica(index), &self.replicas[index])
    }

    fn nodes(&self) -> impl Iterator<Item = (Node, &P)> {
        std::iter::once((Node::Primary, &self.primary)).chain(
            self.replicas
                .iter()
                .enumerate()
                .map(|(index, replica)| (Node::Replica(index), replica)),
        )
    }

    /// Closes every endpoint, primary first, and reports every failure.
    pub async fn close(&self) -> Result<(), DbError> {
        let mut failures = Vec::new();
        for (node, pool) in self.nodes() {
            if let Err(error) = pool.close().await {
                failures.push(NodeFailure { node, error });
            }
        }
        FleetError::collect(FleetOp::Close, failures)?;
        Ok(())
    }

    /// Pings every endpoint and reports every failure.
    pub async fn check_readable(&self, ctx: &Context) -> Result<(), DbError> {
        let mut failures = Vec::new();
        for (node, pool) in self.nodes() {
            if let Err(error) = ctx.run(pool.ping()).await {
                failures.push(NodeFailure { node, error });
            }
        }
        FleetError::collect(FleetOp::Ping, failures)?;
        Ok(())
    }

    /// Pings the primary only.
    pub async fn check_writable(&self, ctx: &Context) -> Result<(), DbError> {
        ctx.run(self.primary.ping()).await
    }

    pub fn set_conn_max_lifetime(&self, lifetime: Option<Duration>) {
        for (_, pool) in self.nodes() {
            pool.set_conn_max_lifetime(lifetime);
        }
    }

    pub fn set_max_idle_conns(&self, n: u32) {
        for (_, pool) in self.nodes() {
            pool.set_max_idle_conns(n);
        }
    }

    pub fn set_max_open_conns(&self, n: u32) {
        for (_, pool) in self.nodes() {
            pool.set_max_open_conns(n);
        }
    }
}

impl<P> std::fmt::Debug for ConnectionSet<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSet")
            .field("replicas", &self.replicas.len())
            .finish()
    }
}
