//! Demo resolvers served by the binary.

use async_trait::async_trait;
use bridge_core::codec::{self, Value};
use bridge_core::warm::Warmup;
use bridge_core::{CallContext, CancellationToken, Resolver, ResolverError, ResolverRegistry};
use chrono::{DateTime, SubsecRound, TimeZone, Utc};
use futures::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// A project record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: i64,
    pub name: String,
    #[serde(with = "codec::date")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct ProjectQuery {
    id: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerTimeParams {
    interval_ms: Option<u64>,
    count: Option<usize>,
}

/// In-memory project store, populated on first use.
///
/// `HEAD` requests warm it so the first real call does not pay for loading.
#[derive(Debug, Default)]
pub struct ProjectStore {
    projects: OnceCell<HashMap<i64, Project>>,
}

impl ProjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the store if needed.
    pub async fn connect(&self) -> &HashMap<i64, Project> {
        self.projects
            .get_or_init(|| async {
                info!("Loading project store");
                seed_projects()
            })
            .await
    }

    pub async fn find(&self, id: i64) -> Option<Project> {
        self.connect().await.get(&id).cloned()
    }
}

#[async_trait]
impl Warmup for ProjectStore {
    async fn warm(&self) -> anyhow::Result<()> {
        self.connect().await;
        Ok(())
    }
}

fn seed_projects() -> HashMap<i64, Project> {
    let projects = [
        (1, "Resolver Bridge", Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0)),
        (2, "Codec Playground", Utc.with_ymd_and_hms(2021, 6, 15, 9, 30, 0)),
    ];
    projects
        .into_iter()
        .filter_map(|(id, name, created)| {
            created.single().map(|created_at| {
                (
                    id,
                    Project {
                        id,
                        name: name.to_string(),
                        created_at,
                    },
                )
            })
        })
        .collect()
}

/// Current time at the precision dates travel with.
fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

fn get_project(store: Arc<ProjectStore>) -> Resolver {
    Resolver::typed_unary("getProject", move |query: ProjectQuery, ctx: CallContext| {
        let store = store.clone();
        async move {
            if query.id < 0 {
                return Err(ResolverError::new("forbidden").with_status(403).clear_stack());
            }
            debug!(parent: ctx.span(), id = query.id, "looking up project");
            store.find(query.id).await.ok_or_else(|| {
                ResolverError::new(format!("Project {} not found", query.id))
                    .with_name("NotFoundError")
                    .with_status(404)
                    .with_field("id", query.id)
                    .clear_stack()
            })
        }
    })
}

fn get_server_time(default_interval: Duration) -> Resolver {
    Resolver::stream(
        "getServerTime",
        move |input: Value, ctx: CallContext, token: CancellationToken| {
            let params: ServerTimeParams = input
                .deserialize_into::<Option<ServerTimeParams>>()
                .ok()
                .flatten()
                .unwrap_or_default();
            let period = params
                .interval_ms
                .map(Duration::from_millis)
                .unwrap_or(default_interval)
                .max(Duration::from_millis(1));

            let span = ctx.span().clone();
            token.on_cancel(move || {
                info!(parent: &span, "client left, ticker stopped");
            });

            let stopped = token.clone();
            let ticks = stream::unfold(tokio::time::interval(period), |mut interval| async move {
                interval.tick().await;
                Some((Ok(Value::Date(now_millis())), interval))
            })
            .take_until(async move { stopped.cancelled().await });

            match params.count {
                Some(count) => ticks.take(count).left_stream(),
                None => ticks.right_stream(),
            }
        },
    )
}

/// Returns its input unchanged, which makes the codec observable end to end.
fn echo() -> Resolver {
    Resolver::unary("echo", |input: Value, _ctx| async move { Ok(input) })
}

/// Build the registry of demo resolvers.
pub fn registry(store: Arc<ProjectStore>, tick: Duration) -> ResolverRegistry {
    let mut registry = ResolverRegistry::new();
    registry
        .register(get_project(store))
        .register(get_server_time(tick))
        .register(echo());
    registry
}
