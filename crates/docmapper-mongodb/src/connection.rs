//! Connection configuration and the alias -> connection registry

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bson::{doc, Document as BsonDocument};
use dashmap::DashMap;
use docmapper_common::{DocMapperError, Result};
use mongodb::{
    options::{ClientOptions, ServerApi, ServerApiVersion},
    Client, Database,
};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::storage::{CollectionHandle, Connector, MongoCollection};

/// Alias used when neither the call nor the document names one
pub const DEFAULT_CONNECTION_NAME: &str = "default";

/// Connection pool configuration
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// Minimum number of connections in the pool (default: 5)
    pub min_pool_size: Option<u32>,
    /// Maximum number of connections in the pool (default: 20)
    pub max_pool_size: Option<u32>,
    /// Maximum time a connection can remain idle before being closed (default: none)
    pub max_idle_time: Option<Duration>,
    /// Connection timeout (default: 10s)
    pub connect_timeout: Option<Duration>,
    /// Server selection timeout (default: 30s)
    pub server_selection_timeout: Option<Duration>,
    /// Application name for server logs
    pub app_name: Option<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_pool_size: Some(5),
            max_pool_size: Some(20),
            max_idle_time: None,
            connect_timeout: Some(Duration::from_secs(10)),
            server_selection_timeout: Some(Duration::from_secs(30)),
            app_name: Some("docmapper".to_string()),
        }
    }
}

impl PoolConfig {
    fn apply(&self, options: &mut ClientOptions) {
        if let Some(min) = self.min_pool_size {
            options.min_pool_size = Some(min);
        }
        if let Some(max) = self.max_pool_size {
            options.max_pool_size = Some(max);
        }
        if let Some(idle) = self.max_idle_time {
            options.max_idle_time = Some(idle);
        }
        if let Some(connect) = self.connect_timeout {
            options.connect_timeout = Some(connect);
        }
        if let Some(server_sel) = self.server_selection_timeout {
            options.server_selection_timeout = Some(server_sel);
        }
        if let Some(app) = &self.app_name {
            options.app_name = Some(app.clone());
        }
    }
}

/// Where and how to connect
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    pub uri: String,
    pub database: String,
    pub pool: PoolConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            uri: "mongodb://localhost:27017".to_string(),
            database: "test".to_string(),
            pool: PoolConfig::default(),
        }
    }
}

impl ConnectionConfig {
    pub fn new(uri: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            database: database.into(),
            pool: PoolConfig::default(),
        }
    }

    pub fn pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Read `DOCMAPPER_*` environment variables over the defaults
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ConnectionConfig::from_env`] with an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(uri) = lookup("DOCMAPPER_MONGODB_URI") {
            config.uri = uri;
        }
        if let Some(database) = lookup("DOCMAPPER_MONGODB_DATABASE") {
            config.database = database;
        }
        if let Some(raw) = lookup("DOCMAPPER_MAX_POOL_SIZE") {
            config.pool.max_pool_size = Some(parse_number("DOCMAPPER_MAX_POOL_SIZE", &raw)?);
        }
        if let Some(raw) = lookup("DOCMAPPER_MIN_POOL_SIZE") {
            config.pool.min_pool_size = Some(parse_number("DOCMAPPER_MIN_POOL_SIZE", &raw)?);
        }
        if let Some(app) = lookup("DOCMAPPER_APP_NAME") {
            config.pool.app_name = Some(app);
        }
        Ok(config)
    }
}

fn parse_number(key: &str, raw: &str) -> Result<u32> {
    raw.trim().parse().map_err(|_| {
        DocMapperError::Connection(format!("Invalid value for {}: '{}'", key, raw))
    })
}

// ============================================================================
// Connection
// ============================================================================

/// MongoDB connection with pooling support
#[derive(Debug, Clone)]
pub struct Connection {
    client: Client,
    database: Database,
    database_name: String,
}

impl Connection {
    /// Connect with default pool settings; the URI must name a database
    pub async fn new(connection_string: &str) -> Result<Self> {
        Self::with_config(connection_string, PoolConfig::default()).await
    }

    /// Connect with custom pool settings; the URI must name a database
    pub async fn with_config(connection_string: &str, config: PoolConfig) -> Result<Self> {
        let client = Self::open_client(connection_string, &config).await?;
        let database = client.default_database().ok_or_else(|| {
            DocMapperError::Connection(
                "No default database specified in connection string".to_string(),
            )
        })?;
        Ok(Self::from_parts(client, database))
    }

    /// Connect to `config.database` on `config.uri`
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let client = Self::open_client(&config.uri, &config.pool).await?;
        let database = client.database(&config.database);
        Ok(Self::from_parts(client, database))
    }

    async fn open_client(connection_string: &str, config: &PoolConfig) -> Result<Client> {
        let mut client_options = ClientOptions::parse(connection_string).await?;
        config.apply(&mut client_options);

        // Set stable API version for compatibility
        let server_api = ServerApi::builder().version(ServerApiVersion::V1).build();
        client_options.server_api = Some(server_api);

        Ok(Client::with_options(client_options)?)
    }

    fn from_parts(client: Client, database: Database) -> Self {
        let database_name = database.name().to_string();
        Self {
            client,
            database,
            database_name,
        }
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Check if the connection is healthy by pinging the server
    pub async fn ping(&self) -> Result<bool> {
        match self.database.run_command(doc! { "ping": 1 }).await {
            Ok(_) => Ok(true),
            Err(e) => Err(DocMapperError::Connection(format!("Ping failed: {}", e))),
        }
    }
}

#[async_trait]
impl Connector for Connection {
    fn database_name(&self) -> &str {
        &self.database_name
    }

    async fn collection(&self, name: &str) -> Result<Arc<dyn CollectionHandle>> {
        let handle: Arc<dyn CollectionHandle> =
            Arc::new(MongoCollection::new(self.database.collection::<BsonDocument>(name)));
        Ok(handle)
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Alias -> connector table with memoized collection handles
#[derive(Default)]
pub struct ConnectionRegistry {
    connectors: RwLock<HashMap<String, Arc<dyn Connector>>>,
    handles: DashMap<(String, String), Arc<dyn CollectionHandle>>,
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("aliases", &self.aliases())
            .field("open_handles", &self.handles.len())
            .finish()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connector under `alias`. Replacing an alias drops the
    /// handles opened through the previous connector.
    pub fn register(&self, alias: impl Into<String>, connector: Arc<dyn Connector>) -> Option<Arc<dyn Connector>> {
        let alias = alias.into();
        let database = connector.database_name().to_string();
        let previous = self.connectors.write().insert(alias.clone(), connector);
        if previous.is_some() {
            self.handles.retain(|(a, _), _| a != &alias);
            warn!(alias = %alias, database = %database, "connection alias re-registered");
        } else {
            info!(alias = %alias, database = %database, "registered connection");
        }
        previous
    }

    /// Open a MongoDB connection and register it
    pub async fn connect(&self, alias: impl Into<String>, config: &ConnectionConfig) -> Result<()> {
        let connection = Connection::connect(config).await?;
        self.register(alias, Arc::new(connection));
        Ok(())
    }

    pub fn disconnect(&self, alias: &str) -> bool {
        let removed = self.connectors.write().remove(alias).is_some();
        if removed {
            self.handles.retain(|(a, _), _| a != alias);
            info!(alias = alias, "disconnected");
        }
        removed
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.connectors.read().contains_key(alias)
    }

    /// Registered aliases, sorted
    pub fn aliases(&self) -> Vec<String> {
        let mut aliases: Vec<String> = self.connectors.read().keys().cloned().collect();
        aliases.sort();
        aliases
    }

    /// Resolve, or lazily open, the handle for a collection
    pub async fn get_collection(&self, alias: &str, collection: &str) -> Result<Arc<dyn CollectionHandle>> {
        let key = (alias.to_string(), collection.to_string());
        if let Some(handle) = self.handles.get(&key) {
            return Ok(Arc::clone(handle.value()));
        }

        let connector = self.connectors.read().get(alias).cloned().ok_or_else(|| {
            DocMapperError::Connection(format!("You have not defined a connection named '{}'", alias))
        })?;
        let handle = connector.collection(collection).await?;
        debug!(alias = alias, collection = collection, "opened collection handle");
        Ok(Arc::clone(self.handles.entry(key).or_insert(handle).value()))
    }
}
