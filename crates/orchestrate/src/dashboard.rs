use anyhow::Context;
use fetch_join::{Config, EntitySource, Joiner, Primary, PrimarySource};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, clap::Args)]
pub struct Args {
    /// Path to a YAML dashboard fixture.
    /// Run `spec dashboard` to see its JSON schema.
    #[clap(long)]
    pub fixture: std::path::PathBuf,
}

/// Fixture of todos, and of the users they're assigned to.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Fixture {
    /// # Fetching and ordering of the join.
    #[serde(default)]
    pub join: Config,
    /// # Todos, in the order they're listed.
    pub todos: Vec<Todo>,
    /// # Users which may be assigned todos.
    pub users: Vec<FixtureUser>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Todo {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub user_id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct User {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FixtureUser {
    pub id: u64,
    pub name: String,
    /// # Latency of fetching this user.
    #[serde(default, with = "humantime_serde")]
    #[schemars(with = "Option<String>")]
    pub delay: Option<Duration>,
}

/// TodoWithUser is a todo joined with its assigned user.
#[derive(Debug, Serialize)]
pub struct TodoWithUser<'a> {
    pub todo: &'a Todo,
    pub user: &'a User,
}

impl Primary for Todo {
    type Key = u64;

    fn foreign_key(&self) -> u64 {
        self.user_id
    }
}

pub struct TodoService(Vec<Todo>);

impl PrimarySource for TodoService {
    type Item = Todo;

    async fn fetch_primary(&self) -> anyhow::Result<Vec<Todo>> {
        Ok(self.0.clone())
    }
}

pub struct UserService {
    users: HashMap<u64, (User, Duration)>,
    fetches: AtomicUsize,
}

impl UserService {
    pub fn new(users: Vec<FixtureUser>) -> Self {
        let users = users
            .into_iter()
            .map(|FixtureUser { id, name, delay }| {
                (id, (User { id, name }, delay.unwrap_or_default()))
            })
            .collect();

        Self {
            users,
            fetches: AtomicUsize::new(0),
        }
    }

    /// Number of user fetches issued.
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl EntitySource<u64> for UserService {
    type Entity = User;

    async fn fetch_entity(&self, id: &u64) -> anyhow::Result<User> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        let (user, delay) = self
            .users
            .get(id)
            .with_context(|| format!("user {id} not found"))?;

        tokio::time::sleep(*delay).await;
        tracing::debug!(id, ?delay, "fetched user");

        Ok(user.clone())
    }
}

/// Join the todos of `fixture` with their users, passing each to `emit`.
/// Returns the number of user fetches issued.
pub async fn run<F>(fixture: Fixture, mut emit: F) -> anyhow::Result<usize>
where
    F: FnMut(&TodoWithUser<'_>) -> anyhow::Result<()>,
{
    let Fixture { join, todos, users } = fixture;
    let joiner = Joiner::new(TodoService(todos), UserService::new(users), join);

    let records = joiner
        .join()
        .await
        .context("failed to join todos with users")?;

    for record in &records {
        emit(&TodoWithUser {
            todo: &record.primary,
            user: &record.entity,
        })?;
    }

    let fetches = joiner.entities().fetches();
    tracing::info!(records = records.len(), fetches, "joined todos with users");

    Ok(fetches)
}
