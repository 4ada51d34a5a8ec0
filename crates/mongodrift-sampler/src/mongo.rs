//! Live sampling through the async MongoDB driver.
//!
//! [`InventorySampler`] is synchronous. Each call builds a private
//! current-thread tokio runtime, runs the whole capture under one
//! `tokio::time::timeout`, and drops the runtime before returning.

use std::time::Duration;

use mongodb::Client;
use mongodb::bson::{Document, doc};
use mongodb::error::{Error as MongoError, ErrorKind};

use mongodrift_core::sampler::{InventorySampler, SampleError};

use crate::inventory::Inventory;

const ADMIN_DB: &str = "admin";

/// Samples the deployment behind a MongoDB connection string.
#[derive(Debug, Clone)]
pub struct MongoSampler {
    uri: String,
}

impl MongoSampler {
    /// The URI is passed to the driver untouched.
    #[must_use]
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }

    async fn capture(&self) -> Result<Inventory, SampleError> {
        let client = Client::with_uri_str(&self.uri)
            .await
            .map_err(|e| SampleError::Connect(e.to_string()))?;

        let databases = client
            .list_database_names()
            .await
            .map_err(|e| command_error("listDatabases", &e))?;
        tracing::debug!(count = databases.len(), "listed databases");

        let users_info = run_admin(&client, "usersInfo", doc! { "usersInfo": { "forAllDBs": true } })
            .await?;
        let repl_config = run_admin(&client, "replSetGetConfig", doc! { "replSetGetConfig": 1 })
            .await?;
        let repl_status = run_admin(&client, "replSetGetStatus", doc! { "replSetGetStatus": 1 })
            .await?;

        Inventory::from_replies(databases, users_info, repl_config, repl_status)
    }
}

async fn run_admin(
    client: &Client,
    command: &str,
    body: Document,
) -> Result<Document, SampleError> {
    let reply = client
        .database(ADMIN_DB)
        .run_command(body)
        .await
        .map_err(|e| command_error(command, &e))?;
    tracing::debug!(command, "admin command ok");
    Ok(reply)
}

/// Server selection failures mean nothing was reachable; everything else is
/// a command failure.
fn command_error(command: &str, err: &MongoError) -> SampleError {
    if matches!(*err.kind, ErrorKind::ServerSelection { .. }) {
        return SampleError::Connect(err.to_string());
    }
    SampleError::Command {
        command: command.to_string(),
        message: err.to_string(),
    }
}

impl InventorySampler for MongoSampler {
    fn sample(&self, timeout: Duration) -> Result<String, SampleError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| SampleError::Runtime(e.to_string()))?;

        let inventory = runtime.block_on(async {
            tokio::time::timeout(timeout, self.capture())
                .await
                .map_err(|_| SampleError::Timeout(timeout))?
        })?;

        tracing::debug!(
            databases = inventory.databases.len(),
            users = inventory.users.len(),
            members = inventory.members.len(),
            "inventory captured"
        );
        Ok(inventory.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_uri_is_a_connect_error() {
        let sampler = MongoSampler::new("not-a-mongo-uri");
        let err = sampler
            .sample(Duration::from_secs(2))
            .expect_err("bad uri");
        assert!(matches!(err, SampleError::Connect(_)), "got {err:?}");
    }

    #[test]
    fn unreachable_server_fails_within_timeout() {
        let sampler =
            MongoSampler::new("mongodb://127.0.0.1:1/?serverSelectionTimeoutMS=200&connectTimeoutMS=200");
        let started = std::time::Instant::now();
        let err = sampler
            .sample(Duration::from_secs(2))
            .expect_err("nothing listens on port 1");
        assert!(
            matches!(err, SampleError::Connect(_) | SampleError::Timeout(_)),
            "got {err:?}"
        );
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn timeout_is_enforced_over_the_driver() {
        // The driver alone would wait 30s for server selection.
        let sampler = MongoSampler::new("mongodb://127.0.0.1:1");
        let err = sampler
            .sample(Duration::from_millis(300))
            .expect_err("timeout");
        assert!(
            matches!(err, SampleError::Timeout(_) | SampleError::Connect(_)),
            "got {err:?}"
        );
    }
}
